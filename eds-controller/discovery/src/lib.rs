//! Endpoint discovery
//!
//! Serves the index's cluster load assignments to Envoy. Requests and responses use Envoy's v2
//! discovery envelope, encoded as JSON and exchanged over `POST /v2/discovery:endpoints`.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod api;
mod error;
mod rest;
mod server;

pub use self::{
    api::{DiscoveryRequest, DiscoveryResponse, Resource, TYPE_URL},
    error::DiscoveryError,
    rest::{serve, DISCOVERY_PATH},
    server::{EndpointDiscoveryServer, ResponseStream},
};
