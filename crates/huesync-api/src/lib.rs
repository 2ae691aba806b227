// huesync-api: Async Rust client for the Hue bridge CLIP v2 API and its event stream

pub mod client;
pub mod error;
pub mod eventstream;
pub mod models;
pub mod transport;

pub use client::BridgeClient;
pub use error::Error;
pub use eventstream::{EventStreamHandle, ReconnectConfig, StreamEvent};
pub use models::{BridgeEvent, EventKind, ResourceRef, ResourceType};
pub use transport::{TlsMode, TransportConfig};
