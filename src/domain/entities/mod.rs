//! Core value types shared across the engine.

mod request;
mod resource;

pub use request::{CacheTier, CallerToken, LatencyHint, Priority};
pub use resource::{DecodedImage, DeliveredImage, ImageSource, ResourceKey};
