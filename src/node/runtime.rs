//! Node runtime: trigger handling and the per-node input loop
//!
//! Each node owns one task that consumes its input queue one trigger at a
//! time. Poll ticks and messages delivered through the API share that queue.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::task::JoinHandle;

use super::poller::Poller;
use crate::config::FetchMode;
use crate::error::SensiboError;
use crate::models::{ensure_msgid, Message, NodeEvent, NodeStatus, MSGID_FIELD};
use crate::sensibo::{translate_command, SensiboApi};

const INPUT_QUEUE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Fetches measurements or configuration on every trigger
    In(FetchMode),
    /// Translates every trigger into a command and patches the pod
    Send,
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::In(FetchMode::Measurement) => "in:measurement",
            NodeKind::In(FetchMode::Config) => "in:config",
            NodeKind::Send => "send",
        }
    }
}

/// Result of handling one trigger
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    Success(Vec<Message>),
    /// The triggering message is still forwarded, with the error text as payload
    Failure { message: Message, error: String },
}

#[derive(Debug, Default)]
pub struct NodeState {
    pub status: NodeStatus,
    pub polling: bool,
    pub last_event: Option<NodeEvent>,
}

pub struct NodeHandler {
    pub name: String,
    pub kind: NodeKind,
    pub device_id: String,
    api_key: String,
    api: Arc<dyn SensiboApi>,
    state: Arc<RwLock<NodeState>>,
}

impl NodeHandler {
    pub fn new(
        name: impl Into<String>,
        kind: NodeKind,
        device_id: impl Into<String>,
        api_key: impl Into<String>,
        api: Arc<dyn SensiboApi>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            device_id: device_id.into(),
            api_key: api_key.into(),
            api,
            state: Arc::new(RwLock::new(NodeState::default())),
        }
    }

    pub fn state(&self) -> Arc<RwLock<NodeState>> {
        self.state.clone()
    }

    async fn set_status(&self, status: NodeStatus) {
        self.state.write().await.status = status;
        tracing::trace!("[Node] {} status: {}", self.name, status);
    }

    pub async fn handle(&self, msg: Message) -> NodeOutcome {
        match self.kind {
            NodeKind::In(mode) => self.handle_fetch(mode, msg).await,
            NodeKind::Send => self.handle_send(msg).await,
        }
    }

    async fn handle_fetch(&self, mode: FetchMode, mut msg: Message) -> NodeOutcome {
        self.set_status(NodeStatus::Polling).await;

        match mode {
            FetchMode::Measurement => {
                match self.api.get_measurements(&self.api_key, &self.device_id).await {
                    Ok(report) => {
                        let m = report.measurement;
                        msg.insert("temperature".to_string(), m.temperature.into());
                        msg.insert("humidity".to_string(), m.humidity.into());
                        msg.insert("secondsAgo".to_string(), m.time.seconds_ago.into());
                        msg.insert("time".to_string(), Value::String(m.time.time));
                        msg.insert("payload".to_string(), Value::String(report.status));
                        self.set_status(NodeStatus::Waiting).await;
                        NodeOutcome::Success(vec![msg])
                    }
                    Err(e) => self.fail(msg, e).await,
                }
            }
            FetchMode::Config => match self.api.get_config(&self.api_key, &self.device_id).await {
                Ok(envelope) => {
                    let mut out = Message::new();
                    if let Some(id) = msg.get(MSGID_FIELD) {
                        out.insert(MSGID_FIELD.to_string(), id.clone());
                    }
                    out.insert("status".to_string(), Value::String(envelope.status));
                    out.insert("result".to_string(), envelope.result);
                    self.set_status(NodeStatus::Waiting).await;
                    NodeOutcome::Success(vec![out])
                }
                Err(e) => self.fail(msg, e).await,
            },
        }
    }

    async fn handle_send(&self, mut msg: Message) -> NodeOutcome {
        self.set_status(NodeStatus::Sending).await;

        let patch = translate_command(&msg);
        tracing::debug!(
            "[Node] {} compiled command: {}",
            self.name,
            serde_json::to_string(&patch).unwrap_or_default()
        );

        match self.api.patch_device(&self.api_key, &self.device_id, &patch).await {
            Ok(ac_state) => {
                msg.insert("payload".to_string(), Value::Object(ac_state));
                self.set_status(NodeStatus::Connected).await;
                NodeOutcome::Success(vec![msg])
            }
            Err(e) => self.fail(msg, e).await,
        }
    }

    async fn fail(&self, mut msg: Message, err: SensiboError) -> NodeOutcome {
        let error = err.to_string();
        msg.insert("payload".to_string(), Value::String(error.clone()));
        self.set_status(NodeStatus::Error).await;
        NodeOutcome::Failure {
            message: msg,
            error,
        }
    }

    /// Handle one trigger, publish its outbound events and report completion once.
    async fn process(&self, mut msg: Message, events: &broadcast::Sender<NodeEvent>) {
        let msgid = ensure_msgid(&mut msg);

        let (messages, error) = match self.handle(msg).await {
            NodeOutcome::Success(messages) => (messages, None),
            NodeOutcome::Failure { message, error } => {
                tracing::error!("[Node] {} trigger {} failed: {}", self.name, msgid, error);
                (vec![message], Some(error))
            }
        };

        for message in messages {
            let event = NodeEvent {
                node: self.name.clone(),
                message,
                error: error.clone(),
                emitted_at: Utc::now(),
            };
            self.state.write().await.last_event = Some(event.clone());
            // No subscribers is fine
            let _ = events.send(event);
        }

        if error.is_none() {
            tracing::debug!("[Node] {} trigger {} done", self.name, msgid);
        }
    }
}

/// Handle to a running node task
pub struct NodeHandle {
    pub name: String,
    pub kind: NodeKind,
    pub device_id: String,
    pub state: Arc<RwLock<NodeState>>,
    input_tx: mpsc::Sender<Message>,
    interval_tx: watch::Sender<Duration>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl NodeHandle {
    /// Queue an inbound message for the node. Never waits: a full queue is
    /// reported back to the caller.
    pub fn deliver(&self, msg: Message) -> Result<(), String> {
        self.input_tx.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => format!("node {} input queue is full", self.name),
            TrySendError::Closed(_) => format!("node {} is not running", self.name),
        })
    }

    /// Change the poll interval; zero stops polling
    pub fn set_poll_interval(&self, interval: Duration) {
        self.interval_tx.send_replace(interval);
    }

    /// Stop polling, then stop the input loop. A trigger already being
    /// handled runs to completion; queued triggers are dropped.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!("[Node] {} task ended abnormally: {}", self.name, e);
        }
        tracing::info!("[Node] {} stopped", self.name);
    }
}

/// Start the input loop for `handler`
pub fn spawn_node(
    handler: NodeHandler,
    poll_interval: Duration,
    events: broadcast::Sender<NodeEvent>,
) -> NodeHandle {
    let (input_tx, mut input_rx) = mpsc::channel(INPUT_QUEUE);
    let (interval_tx, mut interval_rx) = watch::channel(poll_interval);
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let name = handler.name.clone();
    let kind = handler.kind;
    let device_id = handler.device_id.clone();
    let state = handler.state();
    let tick_tx = input_tx.clone();

    let task = tokio::spawn(async move {
        let mut poller = Poller::new(handler.name.clone(), tick_tx);
        if matches!(handler.kind, NodeKind::In(_)) {
            poller.set_interval(poll_interval).await;
        }
        handler.state.write().await.polling = poller.is_polling();

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                changed = interval_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let interval = *interval_rx.borrow_and_update();
                    if matches!(handler.kind, NodeKind::In(_)) {
                        poller.set_interval(interval).await;
                        tracing::info!("[Node] {} poll state: {:?}", handler.name, poller.state());
                        handler.state.write().await.polling = poller.is_polling();
                    }
                }
                msg = input_rx.recv() => match msg {
                    Some(msg) => handler.process(msg, &events).await,
                    None => break,
                },
            }
        }

        poller.stop().await;
        handler.state.write().await.polling = false;
    });

    NodeHandle {
        name,
        kind,
        device_id,
        state,
        input_tx,
        interval_tx,
        shutdown_tx,
        task,
    }
}
