//! HAR entry model.
//!
//! A [`FinishedRecord`] is one fully correlated transaction hop, shaped like a
//! HAR 1.2 `entries[]` item. Only the entry level is modelled; assembling a
//! complete HAR document is left to whoever consumes the record stream.

pub mod builder;
pub mod writer;

pub use builder::{build_completed, build_failed, resolve_http_version};
pub use writer::NdjsonWriter;

use crate::protocol::{header_value, Cookie, Headers, RequestWillBeSent, ResponseMetadata};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameValue {
    pub name: String,
    pub value: String,
}

impl NameValue {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Flatten a protocol header map, splitting folded repeated headers.
pub fn har_headers(headers: &Headers) -> Vec<NameValue> {
    headers
        .iter()
        .flat_map(|(name, value)| value.split('\n').map(move |v| NameValue::new(name.clone(), v)))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarCookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
    pub http_only: bool,
    pub secure: bool,
}

impl From<&Cookie> for HarCookie {
    fn from(cookie: &Cookie) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        // session cookies carry a negative expiry
        let expires = (cookie.expires >= 0.0)
            .then(|| epoch_seconds_to_rfc3339(cookie.expires))
            .flatten();

        Self {
            name: cookie.name.clone(),
            value: cookie.value.clone(),
            path: non_empty(&cookie.path),
            domain: non_empty(&cookie.domain),
            expires,
            http_only: cookie.http_only,
            secure: cookie.secure,
        }
    }
}

pub fn har_cookies(cookies: &[Cookie]) -> Vec<HarCookie> {
    cookies.iter().map(HarCookie::from).collect()
}

/// Format seconds since the epoch as an RFC 3339 timestamp with milliseconds.
pub fn epoch_seconds_to_rfc3339(seconds: f64) -> Option<String> {
    let millis = (seconds * 1000.0).round() as i64;
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostData {
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<NameValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl PostData {
    /// Form-encoded bodies become name/value params, anything else is kept as text.
    pub fn parse(body: &str, mime_type: Option<&str>) -> Self {
        let mime_type = mime_type.unwrap_or_default().to_string();

        if mime_type.starts_with("application/x-www-form-urlencoded") {
            Self {
                params: parse_form_pairs(body),
                mime_type,
                text: None,
            }
        } else {
            Self {
                mime_type,
                params: Vec::new(),
                text: Some(body.to_string()),
            }
        }
    }
}

fn decode_form_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .unwrap_or(spaced)
}

fn parse_form_pairs(body: &str) -> Vec<NameValue> {
    body.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            NameValue::new(decode_form_component(name), decode_form_component(value))
        })
        .collect()
}

/// Query string pairs of `url`, empty when the URL does not parse.
pub fn parse_query_string(url: &str) -> Vec<NameValue> {
    reqwest::Url::parse(url)
        .map(|parsed| {
            parsed
                .query_pairs()
                .map(|(name, value)| NameValue::new(name, value))
                .collect()
        })
        .unwrap_or_default()
}

/// One observed hop of a transaction.
///
/// `http_version` is left empty until the response is known; the entry
/// builder fills it in. `redirect_response` holds the response that
/// redirected away from this hop, if any, and is not serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub method: String,
    pub url: String,
    pub http_version: String,
    pub cookies: Vec<HarCookie>,
    pub headers: Vec<NameValue>,
    pub query_string: Vec<NameValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_data: Option<PostData>,
    pub headers_size: i64,
    pub body_size: i64,
    #[serde(skip)]
    pub redirect_response: Option<ResponseMetadata>,
}

impl RequestRecord {
    pub fn from_event(event: &RequestWillBeSent, cookies: &[Cookie]) -> Self {
        let request = &event.request;
        let post_data = request.post_data.as_deref().map(|body| {
            PostData::parse(body, header_value(&request.headers, "Content-Type"))
        });

        Self {
            method: request.method.clone(),
            url: request.url.clone(),
            http_version: String::new(),
            cookies: har_cookies(cookies),
            headers: har_headers(&request.headers),
            query_string: parse_query_string(&request.url),
            body_size: request.post_data.as_ref().map_or(0, |body| body.len() as i64),
            post_data,
            headers_size: -1,
            redirect_response: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarContent {
    pub size: i64,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarResponse {
    pub status: i64,
    pub status_text: String,
    pub http_version: String,
    pub cookies: Vec<HarCookie>,
    pub headers: Vec<NameValue>,
    pub content: HarContent,
    #[serde(rename = "redirectURL")]
    pub redirect_url: String,
    pub headers_size: i64,
    pub body_size: i64,
}

impl HarResponse {
    /// Sentinel response for a load that failed before completing.
    pub fn failed(error_text: impl Into<String>) -> Self {
        Self {
            status: -1,
            status_text: error_text.into(),
            http_version: String::new(),
            cookies: Vec::new(),
            headers: Vec::new(),
            content: HarContent::default(),
            redirect_url: String::new(),
            headers_size: -1,
            body_size: -1,
        }
    }
}

/// Phase durations in milliseconds; `-1` marks a phase that does not apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarTimings {
    pub blocked: f64,
    pub dns: f64,
    pub connect: f64,
    pub ssl: f64,
    pub send: f64,
    pub wait: f64,
    pub receive: f64,
}

impl Default for HarTimings {
    fn default() -> Self {
        Self {
            blocked: -1.0,
            dns: -1.0,
            connect: -1.0,
            ssl: -1.0,
            send: 0.0,
            wait: 0.0,
            receive: 0.0,
        }
    }
}

impl HarTimings {
    /// Sum of the phases that apply.
    pub fn total(&self) -> f64 {
        [
            self.blocked,
            self.dns,
            self.connect,
            self.send,
            self.wait,
            self.receive,
        ]
        .iter()
        .filter(|phase| **phase > 0.0)
        .sum()
    }
}

/// One trace entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishedRecord {
    #[serde(rename = "_transactionId")]
    pub transaction_id: crate::protocol::TransactionId,
    pub started_date_time: String,
    pub time: f64,
    pub request: RequestRecord,
    pub response: HarResponse,
    pub cache: serde_json::Map<String, serde_json::Value>,
    pub timings: HarTimings,
    #[serde(
        default,
        rename = "serverIPAddress",
        skip_serializing_if = "Option::is_none"
    )]
    pub server_ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
}
