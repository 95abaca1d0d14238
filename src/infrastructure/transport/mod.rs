//! HTTP transport backed by `reqwest`.

mod http_transport;

pub use http_transport::HttpTransport;
