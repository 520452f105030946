//! Resilient request execution
//!
//! `RequestRetrier` issues a request directly until the origin answers with the
//! block status, then routes the remaining attempts of that call through the
//! pool's egress proxy, rotating nodes that fail.

pub mod policy;
pub mod request;
pub mod state;

pub use policy::RetryPolicy;
pub use request::RetryRequest;
pub use state::{AttemptContext, Mode, Outcome, Report, Step, Transition, BLOCK_STATUS};

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Response};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::error::{PoolError, Result};
use crate::models::NodeId;
use crate::pool::{egress, ProxyPool};

/// Direct and proxied clients, each with and without redirect following
struct ClientSet {
    direct: Client,
    direct_follow: Client,
    proxied: Option<(Client, Client)>,
}

impl ClientSet {
    fn new(pool: Option<&ProxyPool>, timeout: Duration) -> Result<Self> {
        let proxied = match pool {
            Some(pool) => Some((
                egress::build_client(Some(pool.egress()), timeout, false)?,
                egress::build_client(Some(pool.egress()), timeout, true)?,
            )),
            None => None,
        };

        Ok(Self {
            direct: egress::build_client(None, timeout, false)?,
            direct_follow: egress::build_client(None, timeout, true)?,
            proxied,
        })
    }

    fn get(&self, mode: Mode, follow_redirects: bool) -> &Client {
        match (mode, &self.proxied) {
            (Mode::Proxied, Some((manual, follow))) => {
                if follow_redirects {
                    follow
                } else {
                    manual
                }
            }
            _ => {
                if follow_redirects {
                    &self.direct_follow
                } else {
                    &self.direct
                }
            }
        }
    }
}

/// Issues requests with retry, escalating to the proxy pool on block signals
pub struct RequestRetrier {
    clients: ClientSet,
    pool: Option<Arc<ProxyPool>>,
    policy: RetryPolicy,
}

impl RequestRetrier {
    /// `pool` enables escalation to proxied mode; without it every attempt goes direct.
    pub fn new(pool: Option<Arc<ProxyPool>>, policy: RetryPolicy, timeout: Duration) -> Result<Self> {
        Ok(Self {
            clients: ClientSet::new(pool.as_deref(), timeout)?,
            pool,
            policy,
        })
    }

    pub fn direct(policy: RetryPolicy, timeout: Duration) -> Result<Self> {
        Self::new(None, policy, timeout)
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn pool(&self) -> Option<&Arc<ProxyPool>> {
        self.pool.as_ref()
    }

    /// Run the request until it succeeds, hits a non-retryable error, or the
    /// retry budget is spent.
    ///
    /// Every call starts in direct mode. Dropping the returned future abandons
    /// the loop; an attempt that never completed leaves node counters untouched.
    #[instrument(skip(self, request), fields(method = %request.method()))]
    pub async fn send(&self, request: &RetryRequest) -> Result<Response> {
        let pool = self.pool.as_deref();
        let mut ctx = AttemptContext::new();

        for attempt in 0..=self.policy.max_retries {
            ctx.attempt = attempt;
            let url = request.pick_url();

            let node = match (ctx.mode(), pool) {
                (Mode::Proxied, Some(pool)) => self.prepare_node(pool).await?,
                _ => None,
            };

            let result = self.issue(request, url, ctx.mode()).await;
            let outcome = Outcome::of(&result);
            let transition = Transition::decide(
                ctx.mode(),
                pool.is_some(),
                node.is_some(),
                outcome,
                attempt,
                &self.policy,
            );

            if let (Some(pool), Some(node)) = (pool, &node) {
                match transition.report {
                    Some(Report::Success) => pool.record_success(node.as_str()),
                    Some(Report::Failure) => pool.record_failure(node.as_str()),
                    None => {}
                }
            }

            if let Err(err) = &result {
                self.log_failure(&ctx, outcome, err, node.as_ref());
            }

            if transition.switch {
                if let Some(pool) = pool {
                    self.rotate(pool).await?;
                }
            }

            if ctx.apply(&transition) {
                info!("{} {} was blocked, switching to proxy mode", request.method(), url);
            }

            match (result, transition.step) {
                (Ok(response), _) => return Ok(response),
                (Err(err), Step::Retry { delay }) => {
                    ctx.last_error = Some(err);
                    // No backoff once the budget is spent.
                    if attempt < self.policy.max_retries {
                        tokio::time::sleep(delay).await;
                    }
                }
                (Err(err), _) => {
                    warn!("{} {} failed without retry: {}", request.method(), url, err);
                    return Err(err);
                }
            }
        }

        error!(
            "{} exceeded {} attempts: {:?}",
            request.method(),
            self.policy.attempts(),
            request.urls().iter().map(Url::as_str).collect::<Vec<_>>()
        );
        Err(ctx.last_error.unwrap_or_else(|| {
            PoolError::InvalidRequest("retry loop ended without an attempt".into())
        }))
    }

    /// One attempt; non-2xx responses become `HttpStatus` errors
    async fn issue(&self, request: &RetryRequest, url: &Url, mode: Mode) -> Result<Response> {
        let client = self.clients.get(mode, request.follows_redirects());
        let response = request
            .build(client, url)
            .send()
            .await
            .map_err(|e| PoolError::from_send(url.as_str(), e))?;

        let status = response.status();
        if status.is_success() {
            debug!("{} {} -> {} ({})", request.method(), url, status, mode);
            Ok(response)
        } else {
            Err(PoolError::HttpStatus {
                url: url.to_string(),
                status,
            })
        }
    }

    /// Make sure a usable node is active before a proxied attempt.
    ///
    /// Returns the node that will carry the attempt, if one is known.
    async fn prepare_node(&self, pool: &ProxyPool) -> Result<Option<NodeId>> {
        match pool.ensure_node().await {
            Ok(node) => Ok(Some(node)),
            Err(PoolError::NoHealthyNode) => Err(PoolError::NoHealthyNode),
            Err(e) => {
                warn!("Could not activate a node, using the egress as is: {}", e);
                Ok(pool.current_node())
            }
        }
    }

    /// Switch away from a failing node. Only an exhausted pool ends the call.
    async fn rotate(&self, pool: &ProxyPool) -> Result<()> {
        match pool.switch_node().await {
            Ok(node) => {
                debug!("Rotated to node {}", node);
                Ok(())
            }
            Err(PoolError::NoHealthyNode) => {
                error!("All {} nodes exceeded the failure threshold", pool.nodes().len());
                Err(PoolError::NoHealthyNode)
            }
            Err(e) => {
                warn!("Node rotation failed: {}", e);
                Ok(())
            }
        }
    }

    fn log_failure(&self, ctx: &AttemptContext, outcome: Outcome, err: &PoolError, node: Option<&NodeId>) {
        let node = node.map(NodeId::as_str).unwrap_or("-");
        match outcome {
            Outcome::Transport if ctx.attempt == 0 => info!(
                "Attempt {} ({}, node {}) failed: {}",
                ctx.attempt + 1,
                ctx.mode(),
                node,
                err
            ),
            Outcome::Transport | Outcome::Status(_) => warn!(
                "Attempt {} ({}, node {}) failed: {}",
                ctx.attempt + 1,
                ctx.mode(),
                node,
                err
            ),
            _ => {}
        }
    }
}
