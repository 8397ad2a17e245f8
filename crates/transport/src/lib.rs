//! Transport layer for the voicechat pipeline

pub mod channel;
pub mod traits;

pub use channel::{ChannelTransport, RemoteHandle};
pub use traits::{Transport, TransportEvent, TransportParams};
