//! Network domain value types shared by events and session commands.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier the debugging session assigns to one network transaction.
///
/// Ids are only unique while the transaction is alive; the browser may hand
/// the same id out again once it has completed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TransactionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Header map as reported by the protocol.
///
/// Repeated headers arrive folded into one value separated by `\n`.
pub type Headers = BTreeMap<String, String>;

/// Case-insensitive header lookup.
pub fn header_value<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Request data carried by `Network.requestWillBeSent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestData {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_fragment: Option<String>,
}

/// Timing breakdown in milliseconds relative to `request_time`.
///
/// Unavailable phases are reported as `-1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTiming {
    pub request_time: f64,
    #[serde(default = "unset_phase")]
    pub dns_start: f64,
    #[serde(default = "unset_phase")]
    pub dns_end: f64,
    #[serde(default = "unset_phase")]
    pub connect_start: f64,
    #[serde(default = "unset_phase")]
    pub connect_end: f64,
    #[serde(default = "unset_phase")]
    pub ssl_start: f64,
    #[serde(default = "unset_phase")]
    pub ssl_end: f64,
    #[serde(default = "unset_phase")]
    pub send_start: f64,
    #[serde(default = "unset_phase")]
    pub send_end: f64,
    #[serde(default = "unset_phase")]
    pub receive_headers_end: f64,
}

fn unset_phase() -> f64 {
    -1.0
}

/// Response metadata carried by `Network.responseReceived`, and by
/// `Network.requestWillBeSent` as the snapshot of a redirect response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub url: String,
    pub status: i64,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers_text: Option<String>,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_headers: Option<Headers>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_headers_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, rename = "remoteIPAddress", skip_serializing_if = "Option::is_none")]
    pub remote_ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<f64>,
    #[serde(default)]
    pub encoded_data_length: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<ResourceTiming>,
}

impl ResponseMetadata {
    /// Declared MIME type, preferring the explicit field over the `Content-Type` header.
    pub fn content_type(&self) -> Option<&str> {
        if !self.mime_type.is_empty() {
            return Some(&self.mime_type);
        }
        header_value(&self.headers, "Content-Type")
    }
}

/// Result of `Network.getResponseBody`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseBody {
    pub body: String,
    #[serde(rename = "base64Encoded", alias = "isBase64Encoded")]
    pub base64_encoded: bool,
}

impl ResponseBody {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            base64_encoded: false,
        }
    }

    pub fn base64(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            base64_encoded: true,
        }
    }
}

/// Cookie as returned by `Network.getCookies`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub path: String,
    /// Seconds since the epoch; negative for session cookies.
    #[serde(default = "unset_phase")]
    pub expires: f64,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: String::new(),
            path: "/".to_string(),
            expires: -1.0,
            http_only: false,
            secure: false,
        }
    }
}
