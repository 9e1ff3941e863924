//! Control channel
//!
//! A WebSocket client that keeps one connection to the remote controller
//! alive. A supervisor task connects, authenticates and then dispatches
//! inbound events until the connection drops, retrying after a fixed
//! backoff until [`ControlChannel::stop`] is called.
//!
//! Handlers of one connection run one at a time in arrival order. A handler
//! that must not hold up the events behind it spawns its own task.

use super::protocol::{events, AuthenticatePayload, Envelope};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex as ParkingMutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};

/// Control channel errors
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Authentication rejected")]
    Unauthorized,

    #[error("Connection closed")]
    Disconnected,
}

impl From<tungstenite::Error> for ControlError {
    fn from(error: tungstenite::Error) -> Self {
        ControlError::WebSocket(Box::new(error))
    }
}

/// Handles one inbound event
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, data: Value);
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, data: Value) {
        (self)(data).await
    }
}

/// Connection settings
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub uri: String,
    pub token: String,
    pub retry_interval: Duration,
    pub auth_timeout: Duration,
}

struct Waiter {
    names: Vec<String>,
    reply: oneshot::Sender<(String, Value)>,
}

type Waiters = Arc<ParkingMutex<HashMap<u64, Waiter>>>;

/// A one-shot reply registration. Dropping it unregisters the waiter.
pub struct PendingReply {
    id: u64,
    waiters: Waiters,
    names: Vec<String>,
    reply: Option<oneshot::Receiver<(String, Value)>>,
}

impl PendingReply {
    /// Resolve with whichever awaited event arrives first
    pub async fn wait(mut self, timeout: Duration) -> Result<(String, Value), ControlError> {
        let Some(reply) = self.reply.take() else {
            return Err(ControlError::Disconnected);
        };
        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ControlError::Disconnected),
            Err(_) => Err(ControlError::Timeout(self.names.join(" | "))),
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.waiters.lock().remove(&self.id);
    }
}

/// Auto-reconnecting control client
pub struct ControlChannel {
    config: ChannelConfig,
    handlers: RwLock<HashMap<String, Arc<dyn EventHandler>>>,
    waiters: Waiters,
    next_waiter: AtomicU64,
    outbound: ParkingMutex<Option<mpsc::UnboundedSender<Message>>>,
    authenticated: AtomicBool,
    shutdown: watch::Sender<bool>,
    supervisor: ParkingMutex<Option<JoinHandle<()>>>,
}

impl ControlChannel {
    pub fn new(config: ChannelConfig) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            config,
            handlers: RwLock::new(HashMap::new()),
            waiters: Arc::new(ParkingMutex::new(HashMap::new())),
            next_waiter: AtomicU64::new(0),
            outbound: ParkingMutex::new(None),
            authenticated: AtomicBool::new(false),
            shutdown,
            supervisor: ParkingMutex::new(None),
        })
    }

    /// Register the handler for an event name, replacing any previous one
    pub fn register(&self, event: &str, handler: Arc<dyn EventHandler>) {
        self.handlers.write().insert(event.to_string(), handler);
        tracing::debug!("Registered handler for event: {}", event);
    }

    pub fn handled_events(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// True while an authenticated connection is up
    pub fn is_connected(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    /// Launch the connection supervisor. A running supervisor is left alone.
    pub fn start(self: &Arc<Self>) {
        let mut supervisor = self.supervisor.lock();
        if supervisor.as_ref().is_some_and(|handle| !handle.is_finished()) {
            tracing::warn!("Control channel is already running");
            return;
        }

        self.shutdown.send_replace(false);
        let shutdown = self.shutdown.subscribe();
        *supervisor = Some(tokio::spawn(self.clone().supervise(shutdown)));
        tracing::info!("Control channel started");
    }

    /// Close the connection and wait for the supervisor to exit
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let handle = self.supervisor.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("Control supervisor failed: {}", e);
            }
            tracing::info!("Control channel stopped");
        }
    }

    /// Queue an event for the server. Failures are logged, never returned.
    pub fn send<T: Serialize>(&self, event: &str, payload: &T) {
        let data = match serde_json::to_value(payload) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!("Failed to serialize {} payload: {}", event, e);
                return;
            }
        };
        let text = match serde_json::to_string(&Envelope::new(event, data)) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Failed to serialize {} envelope: {}", event, e);
                return;
            }
        };

        match self.outbound.lock().as_ref() {
            Some(outbound) => {
                if outbound.send(Message::Text(text)).is_err() {
                    tracing::error!("Failed to send event {}: connection closing", event);
                } else {
                    tracing::debug!("Sent event: {}", event);
                }
            }
            None => tracing::warn!("Not connected, dropping event {}", event),
        }
    }

    /// Install a one-shot waiter for any of `names`. Register before sending
    /// the request that triggers the reply.
    pub fn expect(&self, names: &[&str]) -> PendingReply {
        let id = self.next_waiter.fetch_add(1, Ordering::Relaxed);
        let (reply, receiver) = oneshot::channel();
        let names: Vec<String> = names.iter().map(|name| name.to_string()).collect();
        self.waiters.lock().insert(
            id,
            Waiter {
                names: names.clone(),
                reply,
            },
        );
        PendingReply {
            id,
            waiters: self.waiters.clone(),
            names,
            reply: Some(receiver),
        }
    }

    /// Wait up to `timeout` for the first of `names` to arrive
    pub async fn wait_for(&self, names: &[&str], timeout: Duration) -> Result<(String, Value), ControlError> {
        self.expect(names).wait(timeout).await
    }

    #[cfg(test)]
    fn pending_waiters(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Route one inbound message to a waiter or a registered handler, and
    /// run the handler to completion
    pub(crate) async fn dispatch(&self, envelope: Envelope) {
        let Envelope { event, data } = envelope;

        let waiter = {
            let mut waiters = self.waiters.lock();
            let id = waiters
                .iter()
                .find(|(_, waiter)| waiter.names.iter().any(|name| *name == event))
                .map(|(id, _)| *id);
            id.and_then(|id| waiters.remove(&id))
        };
        if let Some(waiter) = waiter {
            let _ = waiter.reply.send((event, data));
            return;
        }

        let handler = self.handlers.read().get(&event).cloned();
        match handler {
            Some(handler) => {
                tracing::debug!("Received event: {}", event);
                handler.handle(data).await;
            }
            None => tracing::warn!("Unhandled event: {}", event),
        }
    }

    async fn dispatch_text(&self, text: &str) {
        match serde_json::from_str::<Envelope>(text) {
            Ok(envelope) => self.dispatch(envelope).await,
            Err(e) => tracing::warn!("Malformed control message: {}", e),
        }
    }

    async fn supervise(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_session(&mut shutdown).await {
                Ok(()) => tracing::info!("Disconnected from control server"),
                Err(e) => tracing::error!("Control connection failed: {}", e),
            }

            if *shutdown.borrow() {
                break;
            }
            tracing::info!(
                "Will attempt to reconnect in {:?}",
                self.config.retry_interval
            );
            tokio::select! {
                _ = tokio::time::sleep(self.config.retry_interval) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    async fn run_session(&self, shutdown: &mut watch::Receiver<bool>) -> Result<(), ControlError> {
        tracing::info!("Attempting to connect to control server at {}", self.config.uri);
        let connection = tokio::select! {
            connection = tokio_tungstenite::connect_async(self.config.uri.as_str()) => connection?,
            _ = shutdown.changed() => return Ok(()),
        };
        let (stream, _) = connection;
        tracing::info!("Connected to control server at {}", self.config.uri);

        let (mut sink, mut source) = stream.split();
        let (outbound, mut queue) = mpsc::unbounded_channel::<Message>();
        *self.outbound.lock() = Some(outbound);

        let writer = tokio::spawn(async move {
            while let Some(message) = queue.recv().await {
                if let Err(e) = sink.send(message).await {
                    tracing::error!("Failed to write to control server: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let (inbound, mut received) = mpsc::unbounded_channel::<String>();
        let mut reader = tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if inbound.send(text).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Control connection error: {}", e);
                        break;
                    }
                }
            }
        });

        let session = async {
            let pump = async {
                while let Some(text) = received.recv().await {
                    self.dispatch_text(&text).await;
                }
            };
            tokio::pin!(pump);

            // Inbound messages must flow while the handshake is pending
            tokio::select! {
                auth = self.authenticate() => auth?,
                _ = &mut pump => return Err(ControlError::Disconnected),
            }
            self.authenticated.store(true, Ordering::SeqCst);

            pump.await;
            Err::<(), ControlError>(ControlError::Disconnected)
        };

        let result = tokio::select! {
            result = session => result,
            _ = shutdown.changed() => Ok(()),
        };

        self.authenticated.store(false, Ordering::SeqCst);
        self.outbound.lock().take();
        reader.abort();
        let _ = (&mut reader).await;
        if let Err(e) = writer.await {
            tracing::error!("Control writer failed: {}", e);
        }
        result
    }

    async fn authenticate(&self) -> Result<(), ControlError> {
        let reply = self.expect(&[events::AUTHENTICATED, events::UNAUTHORIZED]);
        self.send(
            events::AUTHENTICATE,
            &AuthenticatePayload {
                token: self.config.token.clone(),
            },
        );
        tracing::info!("Authenticating with control server");

        let (event, _) = reply.wait(self.config.auth_timeout).await?;
        if event == events::AUTHENTICATED {
            tracing::info!("Authentication successful");
            Ok(())
        } else {
            Err(ControlError::Unauthorized)
        }
    }
}
