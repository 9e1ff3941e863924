//! Recording lifecycle commands

use super::CommandContext;
use crate::control::events;
use crate::control::protocol::StartPayload;
use crate::recorder::RecordingError;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::task::JoinHandle;

/// START `{name?}`
pub fn start(context: CommandContext, data: Value) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        launch_start(context, data);
    })
}

/// Claim the start right away so commands that follow see it, then wait
/// for the sources in the background. A later STOP cancels that wait.
pub(crate) fn launch_start(context: CommandContext, data: Value) -> Option<JoinHandle<()>> {
    let payload = if data.is_null() {
        StartPayload::default()
    } else {
        context.payload::<StartPayload>(events::START, data)?
    };

    let name = match context.coordinator.begin_start(payload.name) {
        Ok(Some(name)) => name,
        Ok(None) => {
            context.publish_info();
            return None;
        }
        Err(e) => {
            context.report(events::START, e);
            context.publish_info();
            return None;
        }
    };

    Some(tokio::spawn(async move {
        if let Err(e) = context.coordinator.finish_start(name).await {
            context.report(events::START, e);
        }
        context.publish_info();
    }))
}

/// STOP `{}`
pub fn stop(context: CommandContext, _data: Value) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        if let Err(e) = context.coordinator.stop_recording().await {
            context.report(events::STOP, e);
        }
        context.publish_info();
    })
}

/// GET_CURRENT_INFO `{}`
pub fn get_current_info(context: CommandContext, _data: Value) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        context.publish_info();
    })
}

/// TOGGLE_PREVIEW `{}`
pub fn toggle_preview(context: CommandContext, _data: Value) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        // Stopping the writer joins its thread
        let coordinator = context.coordinator.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || coordinator.toggle_preview()).await {
            context.report(events::TOGGLE_PREVIEW, RecordingError::Task(e.to_string()));
        }
        context.publish_info();
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{context, context_with_preview};
    use crate::recorder::RecordingState;
    use serde_json::json;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_start_and_stop_publish_status() {
        let dir = tempdir().unwrap();
        let (context, sink) = context(&dir);
        context.coordinator.orchestrator().start_all();

        launch_start(context.clone(), json!({"name": "lecture-1"}))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(context.coordinator.state(), RecordingState::Recording);
        let published = sink.take();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, events::DATA);
        assert_eq!(published[0].1["current_info"]["recording"], true);
        assert!(dir.path().join("recordings").join("lecture-1").is_dir());

        // Second START is a no-op that still answers
        assert!(launch_start(context.clone(), Value::Null).is_none());
        assert_eq!(sink.take().len(), 1);

        stop(context.clone(), json!({})).await;
        let published = sink.take();
        assert_eq!(published[0].1["current_info"]["recording"], false);
        assert_eq!(context.coordinator.state(), RecordingState::Idle);

        // STOP while idle
        stop(context.clone(), json!({})).await;
        assert_eq!(sink.take()[0].0, events::DATA);

        context.coordinator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_reports_not_ready() {
        let dir = tempdir().unwrap();
        let (context, sink) = context(&dir);

        // Sources never started, so the bounded wait gives up
        launch_start(context.clone(), json!({})).unwrap().await.unwrap();
        let published = sink.take();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].0, events::ERROR);
        assert_eq!(published[0].1["code"], "RECORDING_ERROR");
        assert_eq!(published[1].1["current_info"]["recording"], false);
    }

    #[tokio::test]
    async fn test_start_rejects_path_like_name() {
        let dir = tempdir().unwrap();
        let (context, sink) = context(&dir);
        context.coordinator.orchestrator().start_all();

        let outside = dir.path().join("escaped");
        assert!(launch_start(context.clone(), json!({"name": outside})).is_none());
        let published = sink.take();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].0, events::ERROR);
        assert!(published[0].1["message"]
            .as_str()
            .unwrap()
            .contains("Invalid session name"));
        assert_eq!(published[1].1["current_info"]["recording"], false);
        assert!(!outside.exists());

        context.coordinator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_right_after_start_wins() {
        let dir = tempdir().unwrap();
        let (context, sink) = context(&dir);
        context.coordinator.orchestrator().start_all();

        start(context.clone(), json!({"name": "short"})).await;
        stop(context.clone(), json!({})).await;

        // The cancelled start answers once its wait ends
        tokio::time::timeout(Duration::from_secs(2), async {
            while sink.events.lock().len() < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(context.coordinator.state(), RecordingState::Idle);
        assert!(!dir.path().join("recordings").join("short").exists());
        let published = sink.take();
        assert_eq!(published[1].0, events::ERROR);
        assert!(published[1].1["message"].as_str().unwrap().contains("cancelled"));

        context.coordinator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_toggle_preview_and_info() {
        let dir = tempdir().unwrap();
        let (context, sink) = context(&dir);

        toggle_preview(context.clone(), Value::Null).await;
        assert_eq!(sink.take()[0].1["current_info"]["is_streaming"], true);

        get_current_info(context.clone(), Value::Null).await;
        let published = sink.take();
        let info = &published[0].1["current_info"];
        assert_eq!(info["stages"][0]["name"], "DeblurringStage");
        assert_eq!(info["stages"][0]["status"]["key"], "board");

        toggle_preview(context.clone(), Value::Null).await;
        assert_eq!(sink.take()[0].1["current_info"]["is_streaming"], false);
    }

    #[tokio::test]
    async fn test_preview_stop_leaves_runtime_free() {
        let dir = tempdir().unwrap();
        let (context, sink) = context_with_preview(&dir, Duration::from_millis(400));

        toggle_preview(context.clone(), Value::Null).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Stopping waits out the writer's sleep; other tasks keep running
        let ticker = tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Instant::now()
        });
        toggle_preview(context.clone(), Value::Null).await;
        let toggled_at = Instant::now();
        let ticked_at = ticker.await.unwrap();

        assert!(ticked_at < toggled_at);
        assert_eq!(sink.take()[1].1["current_info"]["is_streaming"], false);
    }
}
