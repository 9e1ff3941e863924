//! Remote control
//!
//! Wire protocol and the auto-reconnecting WebSocket client that carries it.

pub mod channel;
pub mod protocol;

pub use channel::{ChannelConfig, ControlChannel, ControlError, EventHandler, PendingReply};
pub use protocol::{events, CurrentInfo, Envelope, SourceRef, StageReport, StageStatus};
