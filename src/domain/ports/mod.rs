//! Trait boundaries injected into the engine.
//!
//! Each port is a narrow seam: implementations are provided by the
//! infrastructure layer and may be swapped by callers (tests inject
//! deterministic fakes).

mod clock_port;
mod decoder_port;
mod observer_port;
mod provider_port;
mod transport_port;

pub use clock_port::Sleeper;
pub use decoder_port::ImageDecoder;
pub use observer_port::FetchObserver;
pub use provider_port::{CompressionProvider, IdProvider, PathProvider};
pub use transport_port::{AuthHook, NetworkTransport, ProgressFn, RequestTemplate, TransportRequest};
