use std::time::Duration;

use reqwest::redirect::Policy;
use reqwest::{Client, Proxy};
use url::Url;

use crate::config::EgressProxyConfig;
use crate::error::{PoolError, Result};

/// Redirects followed when a request asks for them
const MAX_REDIRECTS: usize = 10;

/// URL of the egress proxy, credentials included
pub fn proxy_url(egress: &EgressProxyConfig) -> Result<Url> {
    let mut url = Url::parse(&format!(
        "{}://{}",
        egress.protocol.scheme(),
        format_tcp_addr(&egress.host, egress.port)
    ))
    .map_err(|e| PoolError::InvalidConfig(format!("Invalid egress proxy address: {}", e)))?;

    if let Some(username) = &egress.username {
        url.set_username(username)
            .and_then(|_| url.set_password(egress.password.as_deref()))
            .map_err(|_| PoolError::InvalidConfig("Egress proxy cannot carry credentials".into()))?;
    }

    Ok(url)
}

/// Build an HTTP client, routed through `egress` when given.
///
/// Proxied clients keep no idle connections: the forward proxy binds a tunnel to
/// the node that was active when it opened, so a reused tunnel would outlive a switch.
pub fn build_client(
    egress: Option<&EgressProxyConfig>,
    timeout: Duration,
    follow_redirects: bool,
) -> Result<Client> {
    let redirect = if follow_redirects {
        Policy::limited(MAX_REDIRECTS)
    } else {
        Policy::none()
    };

    let builder = Client::builder().timeout(timeout).redirect(redirect);

    let builder = match egress {
        Some(egress) => {
            let proxy = Proxy::all(proxy_url(egress)?.as_str())
                .map_err(|e| PoolError::Client(format!("Invalid egress proxy: {}", e)))?;
            builder.proxy(proxy).pool_max_idle_per_host(0)
        }
        None => builder.no_proxy(),
    };

    builder
        .build()
        .map_err(|e| PoolError::Client(format!("Failed to build HTTP client: {}", e)))
}

fn format_tcp_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
