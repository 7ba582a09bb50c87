//! Auth provider flows against a local mock token server

use base64::Engine;
use mockito::Matcher;

use surfacer::auth::{AuthProvider, JwtAuth, OAuthAuth, OAuthConfig};

/// Unsigned JWT with the given `exp` claim (Unix seconds)
fn jwt_with_exp(exp: i64) -> String {
    let engine = &base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let header = engine.encode(r#"{"alg":"none","typ":"JWT"}"#);
    let payload = engine.encode(format!(r#"{{"sub":"crawler","exp":{exp}}}"#));
    format!("{header}.{payload}.")
}

#[tokio::test]
async fn jwt_refreshes_inside_the_window() {
    let mut server = mockito::Server::new_async().await;

    let near_expiry = jwt_with_exp(chrono::Utc::now().timestamp() + 240);
    let long_lived = jwt_with_exp(chrono::Utc::now().timestamp() + 3600);

    let refresh = server
        .mock("POST", "/token/refresh")
        .match_header("authorization", "Bearer refresh-secret")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!(
            r#"{{"access_token":"{long_lived}","refresh_token":"refresh-secret-2"}}"#
        ))
        .create_async()
        .await;

    let auth = JwtAuth::new(
        near_expiry,
        Some("refresh-secret".to_string()),
        Some(format!("{}/token/refresh", server.url())),
        reqwest::Client::new(),
    );
    assert!(auth.is_authenticated());

    // exp - now < 5 minutes, so the refresh must fire
    assert!(auth.refresh_if_needed().await);
    refresh.assert_async().await;

    let headers = auth.headers_to_inject();
    assert_eq!(headers.len(), 1);
    assert_eq!(headers[0].1, format!("Bearer {long_lived}"));

    let expiry = auth.expires_at().expect("expiry recorded");
    assert!(expiry > chrono::Utc::now() + chrono::Duration::minutes(30));
}

#[tokio::test]
async fn jwt_with_distant_expiry_does_not_refresh() {
    let mut server = mockito::Server::new_async().await;
    let refresh = server
        .mock("POST", "/token/refresh")
        .expect(0)
        .create_async()
        .await;

    let auth = JwtAuth::new(
        jwt_with_exp(chrono::Utc::now().timestamp() + 7200),
        Some("refresh-secret".to_string()),
        Some(format!("{}/token/refresh", server.url())),
        reqwest::Client::new(),
    );

    assert!(!auth.refresh_if_needed().await);
    refresh.assert_async().await;
}

#[tokio::test]
async fn jwt_force_refresh_ignores_the_window() {
    let mut server = mockito::Server::new_async().await;
    let long_lived = jwt_with_exp(chrono::Utc::now().timestamp() + 7200);
    let refresh = server
        .mock("POST", "/token/refresh")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!(r#"{{"access_token":"{long_lived}"}}"#))
        .expect(1)
        .create_async()
        .await;

    // Hours from expiry, so the windowed refresh would stay idle
    let auth = JwtAuth::new(
        jwt_with_exp(chrono::Utc::now().timestamp() + 7200),
        Some("refresh-secret".to_string()),
        Some(format!("{}/token/refresh", server.url())),
        reqwest::Client::new(),
    );
    assert!(!auth.refresh_if_needed().await);

    assert!(auth.force_refresh().await);
    refresh.assert_async().await;
    assert_eq!(
        auth.headers_to_inject(),
        [("Authorization".to_string(), format!("Bearer {long_lived}"))]
    );
}

#[tokio::test]
async fn failed_force_refresh_marks_jwt_unauthenticated() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/token/refresh")
        .with_status(500)
        .create_async()
        .await;

    let auth = JwtAuth::new(
        jwt_with_exp(chrono::Utc::now().timestamp() + 7200),
        Some("refresh-secret".to_string()),
        Some(format!("{}/token/refresh", server.url())),
        reqwest::Client::new(),
    );
    assert!(auth.is_authenticated());

    assert!(!auth.force_refresh().await);
    assert!(!auth.is_authenticated());
}

#[tokio::test]
async fn marked_jwt_recovers_through_its_next_refresh() {
    let mut server = mockito::Server::new_async().await;
    let long_lived = jwt_with_exp(chrono::Utc::now().timestamp() + 7200);
    let refresh = server
        .mock("POST", "/token/refresh")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!(r#"{{"access_token":"{long_lived}"}}"#))
        .expect(1)
        .create_async()
        .await;

    let auth = JwtAuth::new(
        jwt_with_exp(chrono::Utc::now().timestamp() + 7200),
        Some("refresh-secret".to_string()),
        Some(format!("{}/token/refresh", server.url())),
        reqwest::Client::new(),
    );

    // A rejection makes the next windowed refresh fire despite the
    // distant expiry, and success restores the authenticated state.
    auth.mark_unauthenticated();
    assert!(!auth.is_authenticated());
    assert!(auth.refresh_if_needed().await);
    refresh.assert_async().await;
    assert!(auth.is_authenticated());
}

#[tokio::test]
async fn jwt_failed_refresh_is_best_effort() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/token/refresh")
        .with_status(500)
        .create_async()
        .await;

    let token = jwt_with_exp(chrono::Utc::now().timestamp() + 60);
    let auth = JwtAuth::new(
        token.clone(),
        Some("refresh-secret".to_string()),
        Some(format!("{}/token/refresh", server.url())),
        reqwest::Client::new(),
    );

    // Refresh fails but the crawl-facing API stays calm
    assert!(!auth.refresh_if_needed().await);
    assert_eq!(auth.access_token(), token);
}

fn oauth_config(server: &mockito::Server) -> OAuthConfig {
    OAuthConfig {
        client_id: "client-1".into(),
        client_secret: "shh".into(),
        authorize_url: format!("{}/oauth/authorize", server.url()),
        token_url: format!("{}/oauth/token", server.url()),
        redirect_url: "https://app.example.com/callback".into(),
        scopes: vec!["read".into()],
    }
}

#[tokio::test]
async fn oauth_client_credentials_grant() {
    let mut server = mockito::Server::new_async().await;
    let token = server
        .mock("POST", "/oauth/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()),
            Matcher::UrlEncoded("client_id".into(), "client-1".into()),
            Matcher::UrlEncoded("client_secret".into(), "shh".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"X","token_type":"Bearer","expires_in":3600}"#)
        .create_async()
        .await;

    let auth = OAuthAuth::new(oauth_config(&server), reqwest::Client::new());
    auth.authenticate(None).await.expect("grant succeeds");

    token.assert_async().await;
    assert!(auth.is_authenticated());
    assert_eq!(
        auth.headers_to_inject(),
        [("Authorization".to_string(), "Bearer X".to_string())]
    );
}

#[tokio::test]
async fn oauth_refresh_token_grant_fires_near_expiry() {
    let mut server = mockito::Server::new_async().await;
    // Initial grant hands back a short-lived token plus a refresh token
    server
        .mock("POST", "/oauth/token")
        .match_body(Matcher::UrlEncoded(
            "grant_type".into(),
            "client_credentials".into(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"access_token":"short","refresh_token":"R","token_type":"Bearer","expires_in":120}"#,
        )
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/oauth/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
            Matcher::UrlEncoded("refresh_token".into(), "R".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"fresh","token_type":"Bearer","expires_in":3600}"#)
        .create_async()
        .await;

    let auth = OAuthAuth::new(oauth_config(&server), reqwest::Client::new());
    auth.authenticate(None).await.expect("initial grant");

    // 120 s remaining is inside the 5-minute refresh window
    assert!(auth.refresh_if_needed().await);
    refresh.assert_async().await;
    assert_eq!(
        auth.headers_to_inject(),
        [("Authorization".to_string(), "Bearer fresh".to_string())]
    );
}

#[tokio::test]
async fn oauth_force_refresh_regrants_client_credentials() {
    let mut server = mockito::Server::new_async().await;
    // No refresh token in the response: the forced path must fall back to
    // re-running the client-credentials grant.
    let token = server
        .mock("POST", "/oauth/token")
        .match_body(Matcher::UrlEncoded(
            "grant_type".into(),
            "client_credentials".into(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"X","token_type":"Bearer","expires_in":3600}"#)
        .expect(2)
        .create_async()
        .await;

    let auth = OAuthAuth::new(oauth_config(&server), reqwest::Client::new());
    auth.authenticate(None).await.expect("initial grant");

    auth.mark_unauthenticated();
    assert!(!auth.is_authenticated());

    assert!(auth.force_refresh().await);
    token.assert_async().await;
    assert!(auth.is_authenticated());
}

#[tokio::test]
async fn oauth_without_tokens_is_unauthenticated() {
    let server = mockito::Server::new_async().await;
    let auth = OAuthAuth::new(oauth_config(&server), reqwest::Client::new());
    assert!(!auth.is_authenticated());
    assert!(auth.headers_to_inject().is_empty());
}
