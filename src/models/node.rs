use std::borrow::Borrow;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Identifier of an egress node, as assigned by the control plane
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifiers the control plane reports that never name a usable node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedTokens(Vec<String>);

impl ReservedTokens {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            tokens
                .into_iter()
                .map(|t| t.into().trim().to_uppercase())
                .filter(|t| !t.is_empty())
                .collect(),
        )
    }

    /// Case-insensitive membership test
    pub fn is_reserved(&self, id: &str) -> bool {
        let id = id.trim().to_uppercase();
        self.0.iter().any(|t| *t == id)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl Default for ReservedTokens {
    fn default() -> Self {
        Self::new(["DIRECT", "REJECT"])
    }
}

/// Health snapshot of a single node, used for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub id: NodeId,
    pub failures: u32,
    pub healthy: bool,
    pub current: bool,
}

/// `GET /proxies` response body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxiesPayload {
    #[serde(default)]
    pub proxies: BTreeMap<String, GroupInfo>,
}

/// One entry of the `proxies` map. Plain proxies carry no `all` list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupInfo {
    #[serde(default)]
    pub all: Option<Vec<String>>,
    #[serde(default)]
    pub now: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

/// `PUT /proxies/{group}` request body
#[derive(Debug, Serialize)]
pub struct SelectRequest<'a> {
    pub name: &'a str,
}

/// Body returned by the public-IP echo endpoint
#[derive(Debug, Deserialize)]
pub struct IpEcho {
    pub origin: String,
}
