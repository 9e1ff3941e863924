//! Control command handlers
//!
//! A static table maps every inbound event name to its handler. Handlers
//! drive the recording coordinator and answer with a status snapshot.

pub mod recording;
pub mod stages;

use crate::control::protocol::DataPayload;
use crate::control::{events, ControlChannel};
use crate::recorder::RecordingCoordinator;
use crate::utils::{AppError, ErrorResponse};
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, Weak};

/// Outbound side of the control link
pub trait StatusSink: Send + Sync {
    fn publish(&self, event: &str, data: Value);
}

impl StatusSink for ControlChannel {
    fn publish(&self, event: &str, data: Value) {
        self.send(event, &data);
    }
}

/// What every handler gets
#[derive(Clone)]
pub struct CommandContext {
    pub coordinator: Arc<RecordingCoordinator>,
    sink: Weak<dyn StatusSink>,
}

impl CommandContext {
    pub fn new(coordinator: Arc<RecordingCoordinator>, sink: Weak<dyn StatusSink>) -> Self {
        Self { coordinator, sink }
    }

    fn emit(&self, event: &str, data: Value) {
        match self.sink.upgrade() {
            Some(sink) => sink.publish(event, data),
            None => tracing::debug!("Control link gone, dropping {}", event),
        }
    }

    /// Publish the status snapshot as DATA
    pub fn publish_info(&self) {
        let payload = DataPayload {
            current_info: self.coordinator.current_info(),
        };
        match serde_json::to_value(&payload) {
            Ok(data) => self.emit(events::DATA, data),
            Err(e) => tracing::error!("Failed to serialize status: {}", e),
        }
    }

    /// Log a failed command and report it as ERROR
    pub fn report(&self, event: &str, error: impl Into<AppError>) {
        let response = ErrorResponse::from(error.into());
        tracing::warn!("{} failed: {}", event, response.message);
        match serde_json::to_value(&response) {
            Ok(data) => self.emit(events::ERROR, data),
            Err(e) => tracing::error!("Failed to serialize error report: {}", e),
        }
    }

    /// Decode a payload, reporting malformed ones
    pub fn payload<T: DeserializeOwned>(&self, event: &str, data: Value) -> Option<T> {
        match serde_json::from_value(data) {
            Ok(payload) => Some(payload),
            Err(e) => {
                self.report(event, e);
                None
            }
        }
    }
}

pub type Command = fn(CommandContext, Value) -> BoxFuture<'static, ()>;

/// Event name → handler
pub const COMMANDS: &[(&str, Command)] = &[
    (events::START, recording::start),
    (events::STOP, recording::stop),
    (events::GET_CURRENT_INFO, recording::get_current_info),
    (events::TOGGLE_PREVIEW, recording::toggle_preview),
    (events::ENABLE_STAGE, stages::enable_stage),
    (events::DISABLE_STAGE, stages::disable_stage),
    (events::SET_PARAMETER, stages::set_parameter),
];

/// Install every command on the channel
pub fn register_commands(channel: &Arc<ControlChannel>, coordinator: Arc<RecordingCoordinator>) {
    let sink: Weak<dyn StatusSink> = Arc::downgrade(channel) as Weak<ControlChannel>;
    let context = CommandContext::new(coordinator, sink);

    for &(event, command) in COMMANDS {
        let context = context.clone();
        channel.register(
            event,
            Arc::new(move |data: Value| command(context.clone(), data)),
        );
    }
    tracing::info!("Registered {} control commands", COMMANDS.len());
}
