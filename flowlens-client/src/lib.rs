pub mod client;
pub mod error;
pub mod wire;

pub use client::{ApiClient, ClientConfig};
pub use error::ClientError;
pub use wire::{ConnectedDevice, FlowSettings, RawFlowGroup, RawFlowRecord, ResolvedHost};
