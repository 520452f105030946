use std::time::Duration;

use bytes::Bytes;
use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, RequestBuilder};
use url::Url;

use crate::error::{PoolError, Result};

/// A request the retrier may issue many times, against one URL or a set of mirrors
#[derive(Debug, Clone)]
pub struct RetryRequest {
    urls: Vec<Url>,
    method: Method,
    headers: HeaderMap,
    body: Option<Bytes>,
    timeout: Option<Duration>,
    follow_redirects: bool,
}

impl RetryRequest {
    pub fn new(method: Method, url: &str) -> Result<Self> {
        Self::mirrors(method, [url])
    }

    pub fn get(url: &str) -> Result<Self> {
        Self::new(Method::GET, url)
    }

    /// Request served by any of `urls`; each attempt picks one at random
    pub fn mirrors<I, S>(method: Method, urls: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let urls = urls
            .into_iter()
            .map(|u| Url::parse(u.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if urls.is_empty() {
            return Err(PoolError::InvalidRequest("no candidate URLs".into()));
        }

        Ok(Self {
            urls,
            method,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            follow_redirects: false,
        })
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Per-attempt timeout, overriding the client default
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn urls(&self) -> &[Url] {
        &self.urls
    }

    pub fn follows_redirects(&self) -> bool {
        self.follow_redirects
    }

    /// Candidate for the next attempt
    pub fn pick_url(&self) -> &Url {
        if self.urls.len() == 1 {
            return &self.urls[0];
        }
        let mut rng = rand::thread_rng();
        self.urls.choose(&mut rng).unwrap_or(&self.urls[0])
    }

    pub(crate) fn build(&self, client: &Client, url: &Url) -> RequestBuilder {
        let mut builder = client
            .request(self.method.clone(), url.clone())
            .headers(self.headers.clone());

        if let Some(body) = &self.body {
            builder = builder.body(body.clone());
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        builder
    }
}
