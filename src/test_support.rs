//! In-process fakes shared by the unit tests

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::control::ControlPlane;
use crate::error::{PoolError, Result};
use crate::models::{GroupInfo, ProxiesPayload};

#[derive(Default)]
struct ControlState {
    groups: BTreeMap<String, Vec<String>>,
    now: Option<String>,
    unreachable: bool,
    reject: bool,
    select_delay: Option<Duration>,
    selected: Vec<String>,
}

/// In-memory control plane recording every activation
#[derive(Clone, Default)]
pub struct FakeControlPlane {
    state: Arc<Mutex<ControlState>>,
}

impl FakeControlPlane {
    pub fn with_group(group: &str, nodes: &[&str]) -> Self {
        let fake = Self::default();
        fake.state.lock().groups.insert(
            group.to_string(),
            nodes.iter().map(|n| n.to_string()).collect(),
        );
        fake
    }

    pub fn set_now(&self, now: Option<&str>) {
        self.state.lock().now = now.map(str::to_string);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    pub fn set_reject(&self, reject: bool) {
        self.state.lock().reject = reject;
    }

    pub fn set_select_delay(&self, delay: Option<Duration>) {
        self.state.lock().select_delay = delay;
    }

    pub fn now(&self) -> Option<String> {
        self.state.lock().now.clone()
    }

    pub fn selected(&self) -> Vec<String> {
        self.state.lock().selected.clone()
    }

    fn check_reachable(&self) -> Result<()> {
        if self.state.lock().unreachable {
            return Err(PoolError::ControlPlaneUnavailable("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn list_groups(&self) -> Result<ProxiesPayload> {
        self.check_reachable()?;
        let state = self.state.lock();
        let proxies = state
            .groups
            .iter()
            .map(|(name, nodes)| {
                let info = GroupInfo {
                    all: Some(nodes.clone()),
                    now: state.now.clone(),
                    kind: Some("Selector".to_string()),
                };
                (name.clone(), info)
            })
            .collect();
        Ok(ProxiesPayload { proxies })
    }

    async fn group_now(&self, _group: &str) -> Result<Option<String>> {
        self.check_reachable()?;
        Ok(self.now())
    }

    async fn select(&self, _group: &str, node: &str) -> Result<()> {
        self.check_reachable()?;
        let delay = self.state.lock().select_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if state.reject {
            return Err(PoolError::ControlPlane {
                status: StatusCode::BAD_REQUEST,
                body: "proxy not exist".to_string(),
            });
        }
        state.selected.push(node.to_string());
        state.now = Some(node.to_string());
        Ok(())
    }
}

/// Scripted behaviour of the egress stub for one connection
#[derive(Debug, Clone)]
pub enum Reply {
    /// Answer with a status and body
    Respond { status: u16, body: String },
    /// Read the request, then close without answering
    Drop,
    /// Read the request, then never answer
    Hang,
}

impl Reply {
    pub fn status(status: u16) -> Self {
        Reply::Respond {
            status,
            body: String::new(),
        }
    }

    pub fn json(status: u16, body: &str) -> Self {
        Reply::Respond {
            status,
            body: body.to_string(),
        }
    }
}

/// Minimal HTTP forward proxy that answers from a script.
///
/// The last reply repeats once the script runs out.
pub struct EgressStub {
    port: u16,
    lines: Arc<Mutex<Vec<String>>>,
    task: tokio::task::JoinHandle<()>,
}

impl EgressStub {
    pub async fn start(script: Vec<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let lines = Arc::new(Mutex::new(Vec::new()));
        let script = Arc::new(Mutex::new(VecDeque::from(script)));

        let recorded = lines.clone();
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let reply = {
                    let mut script = script.lock();
                    if script.len() > 1 {
                        script.pop_front()
                    } else {
                        script.front().cloned()
                    }
                };
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    serve(stream, reply.unwrap_or(Reply::status(200)), recorded).await;
                });
            }
        });

        Self { port, lines, task }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Request lines seen so far, e.g. `GET http://origin.test/ HTTP/1.1`
    pub fn request_lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl Drop for EgressStub {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(mut stream: TcpStream, reply: Reply, lines: Arc<Mutex<Vec<String>>>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }

    let head = String::from_utf8_lossy(&buf);
    if let Some(line) = head.lines().next() {
        lines.lock().push(line.to_string());
    }

    match reply {
        Reply::Respond { status, body } => {
            let reason = StatusCode::from_u16(status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("Unknown");
            let response = format!(
                "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                reason,
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
        Reply::Drop => {}
        Reply::Hang => {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }
}
