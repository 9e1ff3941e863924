//! Pipeline stage commands

use super::CommandContext;
use crate::control::events;
use crate::control::protocol::{SetParameterPayload, StagePayload};
use crate::recorder::RecordingError;
use futures_util::future::BoxFuture;
use serde_json::Value;

fn set_enabled(context: &CommandContext, event: &str, data: Value, enabled: bool) {
    let Some(payload) = context.payload::<StagePayload>(event, data) else {
        return;
    };

    match context
        .coordinator
        .set_stage_enabled(&payload.source, &payload.stage_name, enabled)
    {
        Ok(()) => tracing::info!(
            "[{}] Stage {} {}",
            payload.source,
            payload.stage_name,
            if enabled { "enabled" } else { "disabled" }
        ),
        Err(e) => context.report(event, e),
    }
    context.publish_info();
}

/// ENABLE_STAGE `{stage_name, source}`
pub fn enable_stage(context: CommandContext, data: Value) -> BoxFuture<'static, ()> {
    Box::pin(async move { set_enabled(&context, events::ENABLE_STAGE, data, true) })
}

/// DISABLE_STAGE `{stage_name, source}`
pub fn disable_stage(context: CommandContext, data: Value) -> BoxFuture<'static, ()> {
    Box::pin(async move { set_enabled(&context, events::DISABLE_STAGE, data, false) })
}

/// SET_PARAMETER `{stage_name, param_name, value, source}`
pub fn set_parameter(context: CommandContext, data: Value) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let Some(payload) = context.payload::<SetParameterPayload>(events::SET_PARAMETER, data) else {
            return;
        };

        // Waits for the stage lock, which a frame in flight may hold
        let coordinator = context.coordinator.clone();
        let applied = tokio::task::spawn_blocking(move || {
            let result = coordinator.set_parameter(
                &payload.source,
                &payload.stage_name,
                &payload.param_name,
                &payload.value,
            );
            (payload, result)
        })
        .await;

        match applied {
            Ok((payload, Ok(()))) => tracing::info!(
                "[{}] {}.{} = {}",
                payload.source,
                payload.stage_name,
                payload.param_name,
                payload.value
            ),
            Ok((_, Err(e))) => context.report(events::SET_PARAMETER, e),
            Err(e) => context.report(events::SET_PARAMETER, RecordingError::Task(e.to_string())),
        }
        context.publish_info();
    })
}
