//! HTTP transport for venta.renfe.com
//!
//! This module provides the single "POST, get raw text" primitive the
//! protocol steps are built on. The client validates TLS certificates,
//! caps redirects and response size, and only talks to allow-listed hosts.
//! Redirects are followed here rather than by reqwest so that cookies set
//! on every hop reach the caller.
//! Cookies are not stored here: each scrape owns a [`CookieJar`] that is
//! sent with every call, so one pooled client serves concurrent scrapes.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, COOKIE, LOCATION};
use reqwest::{StatusCode, Url};
use tracing::debug;

use crate::config::TransportConfig;
use crate::error::{NetworkErrorKind, RenfeError, Result};

/// Base URL for the Renfe sales site
pub const RENFE_BASE_URL: &str = "https://venta.renfe.com";

/// Hosts the transport may contact by default
pub const ALLOWED_HOSTS: &[&str] = &["venta.renfe.com", "renfe.com", "www.renfe.com"];

/// Hosts that are never contacted unless the policy allows loopback
const LOCAL_HOSTS: &[&str] = &["localhost", "127.0.0.1", "0.0.0.0", "::1", "[::1]"];

/// Default User-Agent mimicking a modern browser
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Default Accept-Language header for Spanish content
const DEFAULT_ACCEPT_LANGUAGE: &str = "es-ES,es;q=0.9,en;q=0.8";

const DEFAULT_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Which URLs the transport may request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPolicy {
    require_https: bool,
    allow_local: bool,
    allowed_hosts: Vec<String>,
}

impl Default for UrlPolicy {
    fn default() -> Self {
        Self::renfe()
    }
}

impl UrlPolicy {
    /// HTTPS to the Renfe hosts only
    pub fn renfe() -> Self {
        Self {
            require_https: true,
            allow_local: false,
            allowed_hosts: ALLOWED_HOSTS.iter().map(|h| h.to_string()).collect(),
        }
    }

    /// Plain HTTP to loopback, for local mock servers
    pub fn loopback() -> Self {
        Self {
            require_https: false,
            allow_local: true,
            allowed_hosts: vec!["127.0.0.1".to_string(), "localhost".to_string()],
        }
    }

    /// Check a URL against the policy
    pub fn check(&self, url: &Url) -> Result<()> {
        match url.scheme() {
            "https" => {}
            "http" if !self.require_https => {}
            other => {
                return Err(RenfeError::InvalidUrl(format!(
                    "insecure or unsupported scheme: {}",
                    other
                )))
            }
        }
        let host = url
            .host_str()
            .ok_or_else(|| RenfeError::InvalidUrl("URL has no host".to_string()))?
            .to_ascii_lowercase();
        if !self.allow_local && LOCAL_HOSTS.contains(&host.as_str()) {
            return Err(RenfeError::InvalidUrl(format!("local address not allowed: {}", host)));
        }
        if !self.allowed_hosts.iter().any(|h| *h == host) {
            return Err(RenfeError::InvalidUrl(format!("host not allowed: {}", host)));
        }
        Ok(())
    }

    /// Parse and check a URL string
    pub fn parse(&self, url: &str) -> Result<Url> {
        let parsed = Url::parse(url).map_err(|_| RenfeError::InvalidUrl(url.to_string()))?;
        self.check(&parsed)?;
        Ok(parsed)
    }
}

/// URLs of the four protocol steps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::with_base_url(RENFE_BASE_URL)
    }
}

impl Endpoints {
    /// Endpoints rooted at another base URL (e.g., a mock server)
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Search form that initialises the page context
    pub fn search_page(&self) -> String {
        format!("{}/vol/buscarTren.do?Idioma=es&Pais=ES", self.base_url)
    }

    fn plain_call(&self, script: &str, method: &str) -> String {
        format!("{}/vol/dwr/call/plaincall/{}.{}.dwr", self.base_url, script, method)
    }

    pub fn generate_id(&self) -> String {
        self.plain_call("__System", "generateId")
    }

    pub fn update_session(&self) -> String {
        self.plain_call("buyEnlacesManager", "actualizaObjetosSesion")
    }

    pub fn trains_list(&self) -> String {
        self.plain_call("trainEnlacesManager", "getTrainsList")
    }
}

/// Overwrite a string's bytes before releasing them
pub(crate) fn wipe(value: &mut String) {
    let len = value.len();
    value.clear();
    value.extend(std::iter::repeat('\0').take(len));
    std::hint::black_box(value.as_str());
    value.clear();
}

/// Cookies of one scrape, sent as a `Cookie` header on every request
#[derive(Default, Clone)]
pub struct CookieJar {
    cookies: BTreeMap<String, String>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if let Some(mut old) = self.cookies.insert(name.into(), value.into()) {
            wipe(&mut old);
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Remove a cookie, wiping its value; returns whether it was present
    pub fn remove(&mut self, name: &str) -> bool {
        match self.cookies.remove(name) {
            Some(mut value) => {
                wipe(&mut value);
                true
            }
            None => false,
        }
    }

    /// Remove every cookie
    pub fn clear(&mut self) {
        let names: Vec<String> = self.cookies.keys().cloned().collect();
        for name in names {
            self.remove(&name);
        }
    }

    /// Apply cookies returned by the server; empty values delete
    pub fn merge(&mut self, cookies: Vec<(String, String)>) {
        for (name, value) in cookies {
            if value.is_empty() {
                self.remove(&name);
            } else {
                self.set(name, value);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.cookies.keys().map(String::as_str)
    }

    /// Render as a `Cookie` header value
    pub fn header_value(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

impl std::fmt::Debug for CookieJar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.cookies.keys()).finish()
    }
}

impl Drop for CookieJar {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Request payload
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// `application/x-www-form-urlencoded` pairs
    Form(Vec<(String, String)>),
    /// `text/plain` remote-call batch
    Plain(String),
}

/// Raw response text plus the cookies the server set
#[derive(Debug, Clone, PartialEq)]
pub struct FormResponse {
    pub body: String,
    pub cookies: Vec<(String, String)>,
}

/// HTTP transport with bounded redirects, timeouts and body size
///
/// Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct Transport {
    /// Underlying HTTP client
    client: reqwest::Client,
    policy: UrlPolicy,
    max_redirects: usize,
    max_response_bytes: usize,
}

impl Transport {
    /// Create a transport restricted to the Renfe hosts
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created
    pub fn new(config: &TransportConfig) -> Result<Self> {
        Self::with_policy(config, UrlPolicy::renfe())
    }

    /// Create a transport with a custom URL policy
    pub fn with_policy(config: &TransportConfig, policy: UrlPolicy) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static(DEFAULT_ACCEPT_LANGUAGE),
        );
        headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));

        let client = reqwest::Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .timeout(config.total_timeout())
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|err| {
                debug!(error = %err, "failed to build HTTP client");
                RenfeError::Config("HTTP client could not be created".to_string())
            })?;

        Ok(Self {
            client,
            policy,
            max_redirects: config.max_redirects,
            max_response_bytes: config.max_response_bytes,
        })
    }

    /// POST a body and return the raw response text and cookies.
    ///
    /// Redirects are followed up to the configured limit. Every hop must
    /// pass the URL policy, and cookies set along the way are sent on the
    /// next hop and returned in arrival order. 301, 302 and 303 continue
    /// as a GET without body; 307 and 308 resend the body.
    ///
    /// # Errors
    /// - `RenfeError::InvalidUrl` - URL rejected by the policy
    /// - `RenfeError::Network` - any network failure, non-success status,
    ///   refused or excess redirect, or oversized body
    /// - `RenfeError::Protocol` - the body is not valid UTF-8
    pub async fn post_form(
        &self,
        url: &str,
        headers: HeaderMap,
        body: RequestBody,
        cookies: &CookieJar,
    ) -> Result<FormResponse> {
        let mut url = self.policy.parse(url)?;
        let mut body = Some(body);
        let mut jar = cookies.clone();
        let mut received = Vec::new();
        let mut hops = 0;

        let mut response = loop {
            let response = self
                .request(&url, headers.clone(), body.as_ref(), &jar)?
                .send()
                .await?;
            let status = response.status();
            debug!(path = url.path(), status = status.as_u16(), "response received");

            let hop_cookies: Vec<(String, String)> = response
                .cookies()
                .map(|c| (c.name().to_string(), c.value().to_string()))
                .collect();
            jar.merge(hop_cookies.clone());
            received.extend(hop_cookies);

            if !status.is_redirection() {
                break response;
            }
            let location = response.headers().get(LOCATION).cloned();
            let Some(location) = location else {
                break response;
            };
            if hops >= self.max_redirects {
                debug!(limit = self.max_redirects, "too many redirects");
                return Err(RenfeError::Network(NetworkErrorKind::Redirect));
            }
            let next = location
                .to_str()
                .ok()
                .and_then(|location| url.join(location).ok())
                .ok_or(RenfeError::Network(NetworkErrorKind::Redirect))?;
            if self.policy.check(&next).is_err() {
                debug!(host = next.host_str().unwrap_or(""), "redirect target not allowed");
                return Err(RenfeError::Network(NetworkErrorKind::Redirect));
            }
            if !matches!(
                status,
                StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT
            ) {
                body = None;
            }
            hops += 1;
            url = next;
        };

        let status = response.status();
        if !status.is_success() {
            return Err(RenfeError::Network(NetworkErrorKind::Status(status.as_u16())));
        }

        if let Some(length) = response.content_length() {
            if length > self.max_response_bytes as u64 {
                debug!(length, limit = self.max_response_bytes, "response too large");
                return Err(RenfeError::Network(NetworkErrorKind::BodyTooLarge));
            }
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if bytes.len() + chunk.len() > self.max_response_bytes {
                debug!(limit = self.max_response_bytes, "response body exceeded limit");
                return Err(RenfeError::Network(NetworkErrorKind::BodyTooLarge));
            }
            bytes.extend_from_slice(&chunk);
        }

        let body = String::from_utf8(bytes).map_err(|err| {
            let len = err.as_bytes().len();
            debug!(valid_up_to = err.utf8_error().valid_up_to(), len, "response is not UTF-8");
            RenfeError::protocol("response is not valid UTF-8", len)
        })?;

        Ok(FormResponse {
            body,
            cookies: received,
        })
    }

    /// Build one hop: a POST carrying `body`, or a GET once a redirect
    /// has dropped it.
    fn request(
        &self,
        url: &Url,
        headers: HeaderMap,
        body: Option<&RequestBody>,
        cookies: &CookieJar,
    ) -> Result<reqwest::RequestBuilder> {
        let mut request = match body {
            Some(_) => self.client.post(url.clone()),
            None => self.client.get(url.clone()),
        }
        .headers(headers);
        if let Some(cookie_header) = cookies.header_value() {
            let value = HeaderValue::from_str(&cookie_header)
                .map_err(|_| RenfeError::InvalidRequest("cookie value is not a valid header".to_string()))?;
            request = request.header(COOKIE, value);
        }
        Ok(match body {
            Some(RequestBody::Form(pairs)) => request.form(pairs),
            Some(RequestBody::Plain(text)) => request
                .header(CONTENT_TYPE, HeaderValue::from_static("text/plain"))
                .body(text.clone()),
            None => request,
        })
    }

    /// Get the URL policy this transport enforces
    pub fn policy(&self) -> &UrlPolicy {
        &self.policy
    }
}
