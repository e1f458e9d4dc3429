//! Outbound HTTP transport.

mod http;

pub use http::{HttpReply, HttpTransport, HttpTransportConfig, TransportError};
