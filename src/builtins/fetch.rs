//! Web fetch tool.
//!
//! Fetches a URL with a hard timeout, follows redirects, refuses final
//! hosts that resolve to private address space (unless configured
//! otherwise), rewrites GitHub blob URLs to their raw host, converts HTML
//! to text, and caps the body size.

use crate::tools::{OutputSink, Tool, ToolInvocation};
use crate::types::{EngineError, ToolKind, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, ToSocketAddrs};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Request timeout mandated by the tool contract.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Response body cap, applied after HTML conversion.
const MAX_CONTENT_CHARS: usize = 100_000;

/// Width passed to the HTML renderer; large enough to disable wrapping.
const NO_WRAP_WIDTH: usize = 10_000;

/// Configuration for the fetch tool.
#[derive(Clone, Debug)]
pub struct FetchConfig {
    /// Permit requests whose final host resolves to private address space.
    pub allow_private_ips: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            allow_private_ips: false,
        }
    }
}

/// Tool for retrieving web page content.
pub struct WebFetchTool {
    client: reqwest::Client,
    config: FetchConfig,
}

impl WebFetchTool {
    /// # Panics
    /// Panics if the HTTP client cannot be built, which cannot happen with
    /// these settings.
    #[must_use]
    pub fn new(config: FetchConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("agent-engine/0.1")
            .build()
            .expect("default client settings are valid");
        Self { client, config }
    }

    async fn fetch(&self, raw_url: &str) -> Result<String, String> {
        let url = Url::parse(raw_url).map_err(|e| format!("invalid URL: {e}"))?;
        match url.scheme() {
            "http" | "https" => {}
            scheme => return Err(format!("unsupported URL scheme: {scheme}")),
        }

        let url = rewrite_github_blob(&url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        // Redirects were followed; the policy applies to where we ended up.
        let final_host = response
            .url()
            .host_str()
            .ok_or_else(|| "response URL has no host".to_string())?
            .to_string();
        if !self.config.allow_private_ips {
            check_host_is_public(&final_host)?;
        }

        if !response.status().is_success() {
            return Err(format!("HTTP error: {}", response.status()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = response
            .text()
            .await
            .map_err(|e| format!("failed to read body: {e}"))?;

        let converted = if content_type.is_empty() || content_type.contains("text/html") {
            convert_html(&body)
        } else {
            body
        };

        Ok(cap_content(converted))
    }
}

#[derive(Debug, Deserialize)]
struct FetchInput {
    url: String,
}

impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn display_name(&self) -> &str {
        "Web fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL and return its content as text. HTML pages are converted to plain text."
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Fetch
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The http(s) URL to fetch"
                }
            },
            "required": ["url"]
        })
    }

    fn build_invocation(&self, params: Value) -> Result<Box<dyn ToolInvocation>, EngineError> {
        let input: FetchInput = serde_json::from_value(params)
            .map_err(|e| EngineError::InvalidParams(e.to_string()))?;
        Ok(Box::new(FetchInvocation {
            client: self.client.clone(),
            config: self.config.clone(),
            input,
        }))
    }
}

struct FetchInvocation {
    client: reqwest::Client,
    config: FetchConfig,
    input: FetchInput,
}

#[async_trait]
impl ToolInvocation for FetchInvocation {
    fn describe(&self) -> String {
        format!("fetch {}", self.input.url)
    }

    async fn execute(
        &self,
        cancel: CancellationToken,
        _output: Option<OutputSink>,
    ) -> Result<ToolResult, EngineError> {
        let tool = WebFetchTool {
            client: self.client.clone(),
            config: self.config.clone(),
        };

        let fetched = tokio::select! {
            fetched = tool.fetch(&self.input.url) => fetched,
            () = cancel.cancelled() => return Err(EngineError::Cancelled),
        };

        match fetched {
            Ok(content) => Ok(ToolResult::success_with_data(
                content,
                json!({ "url": self.input.url }),
            )),
            Err(reason) => Ok(ToolResult::error(format!(
                "failed to fetch {}: {reason}",
                self.input.url
            ))),
        }
    }
}

/// Rewrite `github.com/<owner>/<repo>/blob/<ref>/<path>` to the raw host.
fn rewrite_github_blob(url: &Url) -> Url {
    if url.host_str() != Some("github.com") {
        return url.clone();
    }
    let segments: Vec<&str> = url.path().trim_start_matches('/').split('/').collect();
    if segments.len() >= 4 && segments[2] == "blob" {
        let raw = format!(
            "https://raw.githubusercontent.com/{}/{}/{}",
            segments[0],
            segments[1],
            segments[3..].join("/")
        );
        if let Ok(rewritten) = Url::parse(&raw) {
            return rewritten;
        }
    }
    url.clone()
}

/// Resolve the host and reject private, loopback, or link-local addresses.
fn check_host_is_public(host: &str) -> Result<(), String> {
    if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
        if is_private_ip(&ip) {
            return Err(format!("access to private address {ip} is blocked"));
        }
        return Ok(());
    }

    let addrs: Vec<_> = format!("{host}:443")
        .to_socket_addrs()
        .map(Iterator::collect)
        .unwrap_or_default();
    for addr in addrs {
        let ip = addr.ip();
        if is_private_ip(&ip) {
            return Err(format!(
                "host '{host}' resolves to private address {ip}, blocked"
            ));
        }
    }
    Ok(())
}

/// The private-IP predicate: 10/8, 127/8, 172.16/12, 192.168/16, ::1,
/// fc00::/7, fe80::/10.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_ipv4(*v4),
        IpAddr::V6(v6) => is_private_ipv6(v6),
    }
}

fn is_private_ipv4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    octets[0] == 10
        || octets[0] == 127
        || (octets[0] == 172 && (16..=31).contains(&octets[1]))
        || (octets[0] == 192 && octets[1] == 168)
}

const fn is_private_ipv6(ip: &Ipv6Addr) -> bool {
    let segments = ip.segments();
    ip.is_loopback()
        || (segments[0] & 0xfe00) == 0xfc00
        || (segments[0] & 0xffc0) == 0xfe80
}

fn convert_html(html: &str) -> String {
    html2text::from_read(html.as_bytes(), NO_WRAP_WIDTH)
        .unwrap_or_else(|_| html.to_string())
}

fn cap_content(content: String) -> String {
    if content.len() <= MAX_CONTENT_CHARS {
        return content;
    }
    let mut end = MAX_CONTENT_CHARS;
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[content truncated]", &content[..end])
}
