//! Endpoint discovery: passive observation and active probing

pub mod active;
pub mod endpoints;
pub mod passive;

pub use active::ActiveDiscovery;
pub use endpoints::{
    Endpoint, EndpointParameter, EndpointRegistry, EndpointSource, ParamLocation,
};
pub use passive::PassiveDiscovery;
