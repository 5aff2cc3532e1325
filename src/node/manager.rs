//! NodeManager: lifecycle of all configured nodes

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex, RwLock};

use super::runtime::{spawn_node, NodeHandle, NodeHandler, NodeKind};
use crate::config::{NodeConfig, NodeKindConfig};
use crate::error::AppError;
use crate::models::{ensure_msgid, Message, NodeDetail, NodeEvent, NodeSummary};
use crate::sensibo::SensiboApi;

const EVENT_BUFFER: usize = 256;

/// Owns every running node
pub struct NodeManager {
    /// node name → running node
    nodes: RwLock<HashMap<String, NodeHandle>>,
    /// Serializes node start and teardown; the map lock is only held briefly
    lifecycle: Mutex<()>,
    api: Arc<dyn SensiboApi>,
    default_api_key: String,
    events: broadcast::Sender<NodeEvent>,
}

impl NodeManager {
    pub fn new(api: Arc<dyn SensiboApi>, default_api_key: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            nodes: RwLock::new(HashMap::new()),
            lifecycle: Mutex::new(()),
            api,
            default_api_key: default_api_key.into(),
            events,
        }
    }

    /// Outbound events of every node
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    /// Start one node. Replaces (and tears down) a node with the same name.
    pub async fn start_node(&self, config: &NodeConfig) {
        let kind = match config.kind {
            NodeKindConfig::In => NodeKind::In(config.mode),
            NodeKindConfig::Send => NodeKind::Send,
        };
        let api_key = config
            .api_key
            .clone()
            .unwrap_or_else(|| self.default_api_key.clone());

        // The old node and its timer are gone before the replacement starts
        let _lifecycle = self.lifecycle.lock().await;
        let previous = self.nodes.write().await.remove(&config.name);
        if let Some(previous) = previous {
            previous.shutdown().await;
        }

        let handler = NodeHandler::new(
            config.name.clone(),
            kind,
            config.device_id.clone(),
            api_key,
            self.api.clone(),
        );
        let handle = spawn_node(
            handler,
            Duration::from_secs(config.poll_interval_secs),
            self.events.clone(),
        );
        self.nodes.write().await.insert(config.name.clone(), handle);

        tracing::info!(
            "[NodeManager] Started node {} ({}, pod {}, poll {}s)",
            config.name,
            kind.label(),
            config.device_id,
            config.poll_interval_secs
        );
    }

    pub async fn start_all(&self, configs: &[NodeConfig]) -> usize {
        for config in configs {
            self.start_node(config).await;
        }
        let count = self.nodes.read().await.len();
        tracing::info!("[NodeManager] {} nodes running", count);
        count
    }

    /// Queue an inbound message; returns its `_msgid`
    pub async fn deliver(&self, name: &str, mut msg: Message) -> Result<String, AppError> {
        let msgid = ensure_msgid(&mut msg);
        let nodes = self.nodes.read().await;
        let node = nodes
            .get(name)
            .ok_or_else(|| AppError::NotFound(format!("node {}", name)))?;

        node.deliver(msg).map_err(AppError::Unavailable)?;
        Ok(msgid)
    }

    pub async fn set_poll_interval(&self, name: &str, seconds: u64) -> Result<(), AppError> {
        let nodes = self.nodes.read().await;
        let node = nodes
            .get(name)
            .ok_or_else(|| AppError::NotFound(format!("node {}", name)))?;

        if !matches!(node.kind, NodeKind::In(_)) {
            return Err(AppError::BadRequest(format!("node {} does not poll", name)));
        }

        node.set_poll_interval(Duration::from_secs(seconds));
        tracing::info!("[NodeManager] Node {} poll interval set to {}s", name, seconds);
        Ok(())
    }

    async fn summary(node: &NodeHandle) -> NodeSummary {
        let state = node.state.read().await;
        NodeSummary {
            name: node.name.clone(),
            kind: node.kind.label().to_string(),
            device_id: node.device_id.clone(),
            status: state.status,
            polling: state.polling,
        }
    }

    pub async fn list(&self) -> Vec<NodeSummary> {
        let nodes = self.nodes.read().await;
        let mut out = Vec::with_capacity(nodes.len());
        for node in nodes.values() {
            out.push(Self::summary(node).await);
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub async fn detail(&self, name: &str) -> Option<NodeDetail> {
        let nodes = self.nodes.read().await;
        let node = nodes.get(name)?;
        let summary = Self::summary(node).await;
        let last_event = node.state.read().await.last_event.clone();
        Some(NodeDetail { summary, last_event })
    }

    /// Tear down every node
    pub async fn shutdown_all(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let nodes: Vec<NodeHandle> = self.nodes.write().await.drain().map(|(_, n)| n).collect();
        let count = nodes.len();
        futures::future::join_all(nodes.into_iter().map(NodeHandle::shutdown)).await;
        tracing::info!("[NodeManager] {} nodes stopped", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchMode;
    use crate::error::SensiboError;
    use crate::models::{AcState, DeviceOption, Envelope, MeasurementReport, NodeStatus, Patch};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::sync::Semaphore;
    use tokio_test::assert_ok;

    struct EchoSensibo;

    #[async_trait]
    impl SensiboApi for EchoSensibo {
        async fn list_devices(&self, _api_key: &str) -> Result<Vec<DeviceOption>, SensiboError> {
            Ok(vec![])
        }

        async fn get_measurements(
            &self,
            _api_key: &str,
            _device_id: &str,
        ) -> Result<MeasurementReport, SensiboError> {
            Err(SensiboError::MalformedResponse("no measurements".to_string()))
        }

        async fn get_config(&self, api_key: &str, device_id: &str) -> Result<Envelope<Value>, SensiboError> {
            Ok(Envelope {
                status: "success".to_string(),
                result: json!({ "id": device_id, "key": api_key }),
            })
        }

        async fn patch_device(
            &self,
            _api_key: &str,
            _device_id: &str,
            patch: &Patch,
        ) -> Result<AcState, SensiboError> {
            Ok(serde_json::to_value(patch).unwrap().as_object().cloned().unwrap())
        }
    }

    /// Patches block until the test hands out permits
    struct GatedSensibo {
        gate: Semaphore,
    }

    #[async_trait]
    impl SensiboApi for GatedSensibo {
        async fn list_devices(&self, _api_key: &str) -> Result<Vec<DeviceOption>, SensiboError> {
            Ok(vec![])
        }

        async fn get_measurements(
            &self,
            _api_key: &str,
            _device_id: &str,
        ) -> Result<MeasurementReport, SensiboError> {
            Err(SensiboError::MalformedResponse("no measurements".to_string()))
        }

        async fn get_config(&self, _api_key: &str, _device_id: &str) -> Result<Envelope<Value>, SensiboError> {
            Err(SensiboError::MalformedResponse("no config".to_string()))
        }

        async fn patch_device(
            &self,
            _api_key: &str,
            _device_id: &str,
            _patch: &Patch,
        ) -> Result<AcState, SensiboError> {
            self.gate.acquire().await.unwrap().forget();
            Ok(AcState::new())
        }
    }

    fn gated() -> (Arc<GatedSensibo>, Arc<NodeManager>) {
        let api = Arc::new(GatedSensibo { gate: Semaphore::new(0) });
        let mgr = Arc::new(NodeManager::new(api.clone(), "account-key"));
        (api, mgr)
    }

    async fn wait_for_status(mgr: &NodeManager, name: &str, status: NodeStatus) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while mgr.detail(name).await.map(|d| d.summary.status) != Some(status) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    fn node(name: &str, kind: NodeKindConfig, mode: FetchMode, api_key: Option<&str>) -> NodeConfig {
        NodeConfig {
            name: name.to_string(),
            kind,
            device_id: format!("pod-{}", name),
            api_key: api_key.map(str::to_string),
            poll_interval_secs: 0,
            mode,
        }
    }

    fn manager() -> NodeManager {
        NodeManager::new(Arc::new(EchoSensibo), "account-key")
    }

    async fn next_event(rx: &mut broadcast::Receiver<NodeEvent>) -> NodeEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_deliver_and_detail() {
        let mgr = manager();
        mgr.start_all(&[
            node("b", NodeKindConfig::Send, FetchMode::Measurement, None),
            node("a", NodeKindConfig::In, FetchMode::Config, Some("own-key")),
        ])
        .await;
        let mut rx = mgr.subscribe();

        let listed: Vec<String> = mgr.list().await.into_iter().map(|n| n.name).collect();
        assert_eq!(listed, vec!["a", "b"]);

        let msgid = mgr.deliver("a", Message::new()).await.unwrap();
        let event = next_event(&mut rx).await;
        assert_eq!(event.message["_msgid"], json!(msgid));
        assert_eq!(event.message["result"], json!({ "id": "pod-a", "key": "own-key" }));

        let detail = mgr.detail("a").await.unwrap();
        assert_eq!(detail.summary.status, NodeStatus::Waiting);
        assert!(detail.last_event.is_some());

        mgr.shutdown_all().await;
        assert!(mgr.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_default_api_key_used() {
        let mgr = manager();
        mgr.start_node(&node("a", NodeKindConfig::In, FetchMode::Config, None)).await;
        let mut rx = mgr.subscribe();

        mgr.deliver("a", Message::new()).await.unwrap();
        let event = next_event(&mut rx).await;
        assert_eq!(event.message["result"]["key"], json!("account-key"));

        mgr.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_failure_event_carries_error() {
        let mgr = manager();
        mgr.start_node(&node("m", NodeKindConfig::In, FetchMode::Measurement, None)).await;
        let mut rx = mgr.subscribe();

        let mut msg = Message::new();
        msg.insert("topic".to_string(), json!("living"));
        mgr.deliver("m", msg).await.unwrap();

        let event = next_event(&mut rx).await;
        assert_eq!(event.error.as_deref(), Some("Malformed response: no measurements"));
        assert_eq!(event.message["payload"], json!("Malformed response: no measurements"));
        assert_eq!(event.message["topic"], json!("living"));
        assert_eq!(mgr.detail("m").await.unwrap().summary.status, NodeStatus::Error);

        mgr.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_unknown_node_and_non_polling_interval() {
        let mgr = manager();
        mgr.start_node(&node("s", NodeKindConfig::Send, FetchMode::Measurement, None)).await;

        assert!(matches!(
            mgr.deliver("missing", Message::new()).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            mgr.set_poll_interval("s", 10).await,
            Err(AppError::BadRequest(_))
        ));
        assert!(mgr.detail("missing").await.is_none());

        mgr.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_full_queue_does_not_stall_other_nodes() {
        let (api, mgr) = gated();
        mgr.start_all(&[
            node("slow", NodeKindConfig::Send, FetchMode::Measurement, None),
            node("other", NodeKindConfig::Send, FetchMode::Measurement, None),
        ])
        .await;

        let mut accepted = 0;
        let full = loop {
            match mgr.deliver("slow", Message::new()).await {
                Ok(_) => accepted += 1,
                Err(e) => break e,
            }
            assert!(accepted <= 40, "queue never filled");
        };
        assert!(accepted >= 32);
        assert!(matches!(&full, AppError::Unavailable(m) if m.contains("queue is full")));

        let limit = Duration::from_secs(2);
        assert_ok!(tokio::time::timeout(limit, mgr.deliver("other", Message::new())).await.unwrap());
        assert_eq!(tokio::time::timeout(limit, mgr.list()).await.unwrap().len(), 2);
        tokio::time::timeout(limit, mgr.start_node(&node("new", NodeKindConfig::Send, FetchMode::Measurement, None)))
            .await
            .unwrap();
        assert_eq!(mgr.list().await.len(), 3);

        api.gate.add_permits(1000);
        mgr.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_replacement_waits_for_previous_node() {
        let (api, mgr) = gated();
        mgr.start_node(&node("a", NodeKindConfig::Send, FetchMode::Measurement, None)).await;

        mgr.deliver("a", Message::new()).await.unwrap();
        wait_for_status(&mgr, "a", NodeStatus::Sending).await;

        let mut replacement = node("a", NodeKindConfig::Send, FetchMode::Measurement, None);
        replacement.device_id = "pod-replaced".to_string();
        let restart = {
            let mgr = mgr.clone();
            tokio::spawn(async move { mgr.start_node(&replacement).await })
        };

        // old node still busy: it is out of the map and nothing new runs yet
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(mgr.detail("a").await.is_none());

        api.gate.add_permits(1);
        tokio::time::timeout(Duration::from_secs(2), restart)
            .await
            .unwrap()
            .unwrap();

        let detail = mgr.detail("a").await.unwrap();
        assert_eq!(detail.summary.device_id, "pod-replaced");
        assert_eq!(detail.summary.status, NodeStatus::Idle);

        mgr.shutdown_all().await;
    }
}
