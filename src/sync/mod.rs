//! Realtime push synchronization.

pub mod backoff;
pub mod channel;
pub mod connector;
pub mod envelope;

pub use backoff::{Backoff, BackoffConfig};
pub use channel::{ChannelState, SyncChannel, SyncHandle};
pub use connector::{MemoryConnector, PushConnector, PushStream, WsConnector};
pub use envelope::{Applied, Envelope, PushEvent, TopicSink};
