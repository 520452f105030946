//! Egress node pool
//!
//! This module provides the proxy pool:
//! - Node discovery from the control plane group
//! - Per-node failure tracking
//! - Serialized switching of the active node
//! - Egress client construction and public IP probing

pub mod directory;
pub mod egress;
pub mod health;
pub mod switcher;

pub use directory::NodeDirectory;
pub use health::HealthTracker;
pub use switcher::NodeSwitcher;

use std::sync::Arc;

use reqwest::Client;
use tracing::{info, instrument, warn};

use crate::config::{ControlPlaneConfig, EgressProxyConfig, PoolConfig};
use crate::control::{ClashApi, ControlPlane};
use crate::error::{PoolError, Result};
use crate::models::{IpEcho, NodeId, NodeStatus, ReservedTokens};

/// Shared pool of egress nodes behind one control plane group
pub struct ProxyPool {
    group: String,
    health: Arc<HealthTracker>,
    switcher: NodeSwitcher,
    config: PoolConfig,
    probe_client: Client,
}

impl ProxyPool {
    /// Connect to a Clash external controller and load the group's nodes
    pub async fn connect(control: &ControlPlaneConfig, config: PoolConfig) -> Result<Self> {
        let api = ClashApi::new(control)?;
        Self::with_control_plane(
            Arc::new(api),
            &control.group,
            ReservedTokens::new(control.reserved.iter().cloned()),
            config,
        )
        .await
    }

    /// Build a pool on top of any control plane implementation
    pub async fn with_control_plane(
        control: Arc<dyn ControlPlane>,
        group: &str,
        reserved: ReservedTokens,
        config: PoolConfig,
    ) -> Result<Self> {
        if config.max_fail == 0 {
            return Err(PoolError::InvalidConfig("max_fail must be at least 1".into()));
        }

        let mut directory = NodeDirectory::new(control.clone(), group, reserved);
        directory.resolve_group().await?;

        let nodes = directory.fetch_nodes().await?;
        let current = directory.query_current_node().await;
        let health = Arc::new(HealthTracker::new(nodes, config.max_fail));
        let switcher = NodeSwitcher::new(control, health.clone(), directory.group(), current);

        let probe_client = egress::build_client(Some(&config.egress), config.probe_timeout, true)?;

        info!(
            "Proxy pool ready: group {}, {} nodes, current {}",
            directory.group(),
            health.nodes().len(),
            switcher
                .current()
                .map(|n| n.to_string())
                .unwrap_or_else(|| "<none>".to_string())
        );

        Ok(Self {
            group: directory.group().to_string(),
            health,
            switcher,
            config,
            probe_client,
        })
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn nodes(&self) -> &[NodeId] {
        self.health.nodes()
    }

    pub fn max_fail(&self) -> u32 {
        self.health.max_fail()
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    pub fn current_node(&self) -> Option<NodeId> {
        self.switcher.current()
    }

    pub fn egress(&self) -> &EgressProxyConfig {
        &self.config.egress
    }

    /// Address of the egress proxy, e.g. `http://127.0.0.1:7897/`
    pub fn egress_url(&self) -> Result<String> {
        egress::proxy_url(&self.config.egress).map(String::from)
    }

    pub fn record_success(&self, node: &str) {
        self.health.record_success(node);
    }

    pub fn record_failure(&self, node: &str) {
        self.health.record_failure(node);
    }

    pub fn is_healthy(&self, node: &str) -> bool {
        self.health.is_healthy(node)
    }

    pub fn healthy_set(&self) -> Vec<NodeId> {
        self.health.healthy_set()
    }

    /// Activate a random healthy node
    pub async fn switch_node(&self) -> Result<NodeId> {
        let node = self.switcher.switch_node().await?;
        self.after_switch().await;
        Ok(node)
    }

    /// Activate a named node of the pool, healthy or not
    pub async fn switch_to(&self, node: &str) -> Result<NodeId> {
        let node = self.switcher.switch_to(node).await?;
        self.after_switch().await;
        Ok(node)
    }

    /// Make sure a healthy node is active, switching when the current one is
    /// unknown or has exceeded the failure threshold.
    pub async fn ensure_node(&self) -> Result<NodeId> {
        match self.current_node() {
            Some(node) if self.is_healthy(node.as_str()) => Ok(node),
            _ => self.switch_node().await,
        }
    }

    /// Health listing of every node, in discovery order
    pub fn list_nodes(&self) -> Vec<NodeStatus> {
        let current = self.current_node();
        self.health
            .nodes()
            .iter()
            .map(|node| NodeStatus {
                id: node.clone(),
                failures: self.health.failures(node.as_str()).unwrap_or(0),
                healthy: self.health.is_healthy(node.as_str()),
                current: current.as_ref() == Some(node),
            })
            .collect()
    }

    /// Public IP seen by the echo endpoint when going through the egress proxy
    #[instrument(skip(self))]
    pub async fn public_ip(&self) -> Result<String> {
        let url = self.config.ip_echo_url.as_str();
        let response = self
            .probe_client
            .get(url)
            .send()
            .await
            .map_err(|e| PoolError::from_send(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PoolError::HttpStatus {
                url: url.to_string(),
                status,
            });
        }

        let echo: IpEcho = response
            .json()
            .await
            .map_err(|e| PoolError::from_send(url, e))?;
        Ok(echo.origin)
    }

    async fn after_switch(&self) {
        if !self.config.probe_on_switch {
            return;
        }
        match self.public_ip().await {
            Ok(ip) => info!("Egress IP is now {}", ip),
            Err(e) => warn!("Failed to probe egress IP: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{EgressStub, FakeControlPlane, Reply};
    use std::time::Duration;

    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn pool_config(max_fail: u32) -> PoolConfig {
        PoolConfig {
            max_fail,
            ..PoolConfig::default()
        }
    }

    async fn pool(fake: &FakeControlPlane, max_fail: u32) -> ProxyPool {
        ProxyPool::with_control_plane(
            Arc::new(fake.clone()),
            "GLOBAL",
            ReservedTokens::default(),
            pool_config(max_fail),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_pool_loads_nodes_and_current() {
        let fake = FakeControlPlane::with_group("GLOBAL", &["DIRECT", "A", "B", "C"]);
        fake.set_now(Some("B"));
        let pool = pool(&fake, 3).await;

        assert_eq!(pool.group(), "GLOBAL");
        assert_eq!(pool.nodes().len(), 3);
        assert_eq!(pool.current_node(), Some(NodeId::from("B")));
        assert!(pool.nodes().iter().all(|n| pool.health().failures(n.as_str()) == Some(0)));
    }

    #[tokio::test]
    async fn test_pool_reserved_current_is_unset() {
        let fake = FakeControlPlane::with_group("GLOBAL", &["DIRECT", "A"]);
        fake.set_now(Some("DIRECT"));
        let pool = pool(&fake, 3).await;
        assert_eq!(pool.current_node(), None);
    }

    #[tokio::test]
    async fn test_pool_rejects_zero_max_fail() {
        let fake = FakeControlPlane::with_group("GLOBAL", &["A"]);
        let result = ProxyPool::with_control_plane(
            Arc::new(fake),
            "GLOBAL",
            ReservedTokens::default(),
            pool_config(0),
        )
        .await;
        assert!(matches!(result, Err(PoolError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_ensure_node_switches_only_when_needed() {
        let fake = FakeControlPlane::with_group("GLOBAL", &["A", "B", "C"]);
        fake.set_now(Some("A"));
        let pool = pool(&fake, 2).await;

        assert_eq!(pool.ensure_node().await.unwrap().as_str(), "A");
        assert!(fake.selected().is_empty());

        pool.record_failure("A");
        pool.record_failure("A");
        let node = pool.ensure_node().await.unwrap();
        assert_ne!(node.as_str(), "A");
        assert_eq!(fake.selected(), vec![node.to_string()]);
    }

    #[tokio::test]
    async fn test_ensure_node_without_current_switches() {
        let fake = FakeControlPlane::with_group("GLOBAL", &["A"]);
        let pool = pool(&fake, 1).await;
        assert_eq!(pool.current_node(), None);

        assert_eq!(pool.ensure_node().await.unwrap().as_str(), "A");
        assert_eq!(pool.current_node(), Some(NodeId::from("A")));
    }

    #[tokio::test]
    async fn test_list_nodes_marks_current_and_health() {
        let fake = FakeControlPlane::with_group("GLOBAL", &["A", "B"]);
        fake.set_now(Some("B"));
        let pool = pool(&fake, 1).await;
        pool.record_failure("A");

        let listing = pool.list_nodes();
        assert_eq!(
            listing,
            vec![
                NodeStatus {
                    id: NodeId::from("A"),
                    failures: 1,
                    healthy: false,
                    current: false,
                },
                NodeStatus {
                    id: NodeId::from("B"),
                    failures: 0,
                    healthy: true,
                    current: true,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_egress_url() {
        let fake = FakeControlPlane::with_group("GLOBAL", &["A"]);
        let pool = pool(&fake, 1).await;
        assert_eq!(pool.egress_url().unwrap(), "http://127.0.0.1:7897/");
    }

    #[tokio::test]
    async fn test_public_ip_goes_through_egress() {
        let stub = EgressStub::start(vec![Reply::json(200, r#"{"origin": "203.0.113.7"}"#)]).await;
        let fake = FakeControlPlane::with_group("GLOBAL", &["A"]);
        let config = PoolConfig {
            egress: EgressProxyConfig::http("127.0.0.1", stub.port()),
            ip_echo_url: "http://echo.test/ip".to_string(),
            ..pool_config(1)
        };
        let pool = ProxyPool::with_control_plane(
            Arc::new(fake),
            "GLOBAL",
            ReservedTokens::default(),
            config,
        )
        .await
        .unwrap();

        assert_eq!(pool.public_ip().await.unwrap(), "203.0.113.7");
        assert_eq!(stub.request_lines(), vec!["GET http://echo.test/ip HTTP/1.1"]);
    }

    #[tokio::test]
    async fn test_probe_on_switch_tolerates_probe_failure() {
        let stub = EgressStub::start(vec![Reply::Drop]).await;
        let fake = FakeControlPlane::with_group("GLOBAL", &["A"]);
        let config = PoolConfig {
            egress: EgressProxyConfig::http("127.0.0.1", stub.port()),
            ip_echo_url: "http://echo.test/ip".to_string(),
            probe_on_switch: true,
            probe_timeout: Duration::from_secs(1),
            ..pool_config(1)
        };
        let pool = ProxyPool::with_control_plane(
            Arc::new(fake),
            "GLOBAL",
            ReservedTokens::default(),
            config,
        )
        .await
        .unwrap();

        assert_eq!(pool.switch_node().await.unwrap().as_str(), "A");
        assert_eq!(stub.request_lines().len(), 1);
    }

    #[tokio::test]
    async fn test_connect_missing_group_is_configuration_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/proxies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "proxies": {"Proxy": {"type": "Selector", "all": ["HK-01"]}}
            })))
            .mount(&server)
            .await;

        let control = ControlPlaneConfig {
            api_url: Url::parse(&server.uri()).unwrap(),
            secret: None,
            group: "GLOBAL".to_string(),
            reserved: vec!["DIRECT".to_string(), "REJECT".to_string()],
            timeout: Duration::from_secs(2),
        };
        let result = ProxyPool::connect(&control, pool_config(3)).await;
        assert!(matches!(result, Err(PoolError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_connect_against_clash_api() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/proxies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "proxies": {
                    "GLOBAL": {"type": "Selector", "now": "JP-02", "all": ["DIRECT", "REJECT", "HK-01", "JP-02"]},
                    "HK-01": {"type": "Vmess"},
                    "JP-02": {"type": "Vmess"}
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/proxies/GLOBAL"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"now": "JP-02"})))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/proxies/GLOBAL"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let control = ControlPlaneConfig {
            api_url: Url::parse(&server.uri()).unwrap(),
            secret: None,
            group: "GLOBAL".to_string(),
            reserved: vec!["DIRECT".to_string(), "REJECT".to_string()],
            timeout: Duration::from_secs(2),
        };
        let pool = ProxyPool::connect(&control, pool_config(3)).await.unwrap();
        assert_eq!(pool.nodes(), &[NodeId::from("HK-01"), NodeId::from("JP-02")]);
        assert_eq!(pool.current_node(), Some(NodeId::from("JP-02")));

        let node = pool.switch_to("HK-01").await.unwrap();
        assert_eq!(node.as_str(), "HK-01");
        assert_eq!(pool.current_node(), Some(node));
    }
}
