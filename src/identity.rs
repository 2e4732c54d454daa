//! Caller identity extraction for admission checks.

use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderMap;
use regex::Regex;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::LazyLock;

const MAX_IDENTITY_LEN: usize = 128;

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9:._\-]").expect("valid identity regex"));

/// Strategy for identifying the caller a limit applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStrategy {
    /// Use client IP address
    IpAddress,
    /// Use the `x-api-key` header, falling back to the client IP
    ApiKey,
}

impl FromStr for KeyStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ip" | "ip-address" => Ok(KeyStrategy::IpAddress),
            "api-key" | "apikey" => Ok(KeyStrategy::ApiKey),
            other => Err(format!("unknown identity strategy '{}'", other)),
        }
    }
}

impl fmt::Display for KeyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyStrategy::IpAddress => f.write_str("ip"),
            KeyStrategy::ApiKey => f.write_str("api-key"),
        }
    }
}

impl KeyStrategy {
    /// Derive the limiter key for `request`.
    pub fn identify(&self, request: &Request) -> String {
        match self {
            KeyStrategy::IpAddress => format!("ip:{}", client_ip(request)),
            KeyStrategy::ApiKey => match header_str(request.headers(), "x-api-key") {
                Some(key) if !key.is_empty() => format!("key:{}", sanitize(key)),
                _ => format!("ip:{}", client_ip(request)),
            },
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// Best-effort client address: proxy headers first, then the socket peer.
pub fn client_ip(request: &Request) -> String {
    let headers = request.headers();

    if let Some(forwarded) = header_str(headers, "x-forwarded-for") {
        if let Some(first_ip) = forwarded.split(',').next() {
            let first_ip = first_ip.trim();
            if !first_ip.is_empty() {
                return sanitize(first_ip);
            }
        }
    }

    if let Some(real_ip) = header_str(headers, "x-real-ip") {
        if !real_ip.is_empty() {
            return sanitize(real_ip);
        }
    }

    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        addr.ip().to_string()
    } else {
        "unknown".to_string()
    }
}

/// Replace characters that have no business in a store key and cap the length.
pub fn sanitize(raw: &str) -> String {
    let mut cleaned = UNSAFE_CHARS.replace_all(raw, "_").into_owned();
    cleaned.truncate(MAX_IDENTITY_LEN);
    cleaned
}
