// ── Reactive data store ──
//
// Keyed entity storage with push-based change notification.

mod collection;
mod data_store;

pub use data_store::{ChannelState, DataStore, DeviceEntry};
