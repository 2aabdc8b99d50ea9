//! Assemble finished trace records from a resolved request chain.

use super::{
    epoch_seconds_to_rfc3339, har_cookies, har_headers, FinishedRecord, HarContent, HarResponse,
    HarTimings, RequestRecord,
};
use crate::protocol::{
    header_value, Cookie, LoadingFailed, ResourceTiming, ResponseBody, ResponseMetadata,
};
use crate::recorder::store::PendingEntry;
use base64::Engine;
use regex::Regex;
use std::sync::OnceLock;

/// Placeholder when neither the header block nor the protocol name is known.
pub const UNKNOWN_HTTP_VERSION: &str = "unknown";

const EPOCH: &str = "1970-01-01T00:00:00.000Z";

fn http_version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"HTTP/\d+\.\d+").expect("static pattern"))
}

/// Take the `HTTP/<major>.<minor>` token from a raw header block, falling back
/// to the upper-cased protocol name.
pub fn resolve_http_version(headers_text: Option<&str>, protocol: Option<&str>) -> String {
    headers_text
        .and_then(|text| http_version_pattern().find(text))
        .map(|m| m.as_str().to_string())
        .or_else(|| protocol.filter(|p| !p.is_empty()).map(str::to_uppercase))
        .unwrap_or_else(|| UNKNOWN_HTTP_VERSION.to_string())
}

fn phase(start: f64, end: f64) -> f64 {
    if start < 0.0 || end < 0.0 {
        -1.0
    } else {
        end - start
    }
}

fn har_timings(timing: Option<&ResourceTiming>) -> HarTimings {
    let Some(t) = timing else {
        return HarTimings::default();
    };

    let blocked = [t.dns_start, t.connect_start, t.send_start]
        .into_iter()
        .find(|start| *start >= 0.0)
        .unwrap_or(-1.0);

    HarTimings {
        blocked,
        dns: phase(t.dns_start, t.dns_end),
        connect: phase(t.connect_start, t.connect_end),
        ssl: phase(t.ssl_start, t.ssl_end),
        send: phase(t.send_start, t.send_end).max(0.0),
        wait: phase(t.send_end, t.receive_headers_end).max(0.0),
        receive: 0.0,
    }
}

fn content_from_body(body: &ResponseBody, mime_type: &str) -> HarContent {
    if body.base64_encoded {
        let size = base64::engine::general_purpose::STANDARD
            .decode(body.body.as_bytes())
            .map(|bytes| bytes.len())
            .unwrap_or(body.body.len());

        HarContent {
            size: size as i64,
            mime_type: mime_type.to_string(),
            text: Some(body.body.clone()),
            encoding: Some("base64".to_string()),
        }
    } else {
        HarContent {
            size: body.body.len() as i64,
            mime_type: mime_type.to_string(),
            text: Some(body.body.clone()),
            encoding: Some("ascii".to_string()),
        }
    }
}

fn started_date_time(wall_time: f64) -> String {
    epoch_seconds_to_rfc3339(wall_time).unwrap_or_else(|| EPOCH.to_string())
}

fn assemble(
    entry_id: &crate::protocol::TransactionId,
    wall_time: f64,
    mut request: RequestRecord,
    source: &ResponseMetadata,
    response: HarResponse,
) -> FinishedRecord {
    request.http_version =
        resolve_http_version(source.request_headers_text.as_deref(), None);
    if request.http_version == UNKNOWN_HTTP_VERSION {
        request.http_version = response.http_version.clone();
    }
    if let Some(text) = &source.request_headers_text {
        request.headers_size = text.len() as i64;
    }

    let timings = har_timings(source.timing.as_ref());

    FinishedRecord {
        transaction_id: entry_id.clone(),
        started_date_time: started_date_time(wall_time),
        time: timings.total(),
        request,
        response,
        cache: serde_json::Map::new(),
        timings,
        server_ip_address: source.remote_ip_address.clone(),
        connection: source.connection_id.map(|id| format!("{}", id as i64)),
    }
}

/// One record per hop of the chain.
///
/// A hop that was redirected away from is paired with its own redirect
/// response; every other hop is paired with the final `response`, `body` and
/// `cookies`.
pub fn build_completed(
    entry: PendingEntry,
    response: &ResponseMetadata,
    body: &ResponseBody,
    cookies: &[Cookie],
) -> Vec<FinishedRecord> {
    let transaction_id = entry.transaction_id.clone();
    let wall_time = entry.wall_time;
    let chain = entry.into_chain();
    let next_urls: Vec<Option<String>> = chain
        .iter()
        .skip(1)
        .map(|next| Some(next.url.clone()))
        .chain(std::iter::once(None))
        .collect();

    chain
        .into_iter()
        .zip(next_urls)
        .map(|(mut request, next_url)| match request.redirect_response.take() {
            Some(snapshot) => {
                let redirect_url = next_url
                    .or_else(|| header_value(&snapshot.headers, "Location").map(str::to_string))
                    .unwrap_or_default();
                let hop_response = redirect_response(&snapshot, redirect_url);
                assemble(&transaction_id, wall_time, request, &snapshot, hop_response)
            }
            None => {
                let final_response = final_response(response, body, cookies);
                assemble(&transaction_id, wall_time, request, response, final_response)
            }
        })
        .collect()
}

fn final_response(response: &ResponseMetadata, body: &ResponseBody, cookies: &[Cookie]) -> HarResponse {
    let content = content_from_body(body, response.content_type().unwrap_or_default());

    HarResponse {
        status: response.status,
        status_text: response.status_text.clone(),
        http_version: resolve_http_version(
            response.headers_text.as_deref(),
            response.protocol.as_deref(),
        ),
        cookies: har_cookies(cookies),
        headers: har_headers(&response.headers),
        body_size: body.body.len() as i64,
        content,
        redirect_url: header_value(&response.headers, "Location")
            .unwrap_or_default()
            .to_string(),
        headers_size: response.headers_text.as_ref().map_or(-1, |t| t.len() as i64),
    }
}

fn redirect_response(snapshot: &ResponseMetadata, redirect_url: String) -> HarResponse {
    HarResponse {
        status: snapshot.status,
        status_text: snapshot.status_text.clone(),
        http_version: resolve_http_version(
            snapshot.headers_text.as_deref(),
            snapshot.protocol.as_deref(),
        ),
        cookies: Vec::new(),
        headers: har_headers(&snapshot.headers),
        content: HarContent {
            size: 0,
            mime_type: snapshot.content_type().unwrap_or_default().to_string(),
            text: None,
            encoding: None,
        },
        redirect_url,
        headers_size: snapshot.headers_text.as_ref().map_or(-1, |t| t.len() as i64),
        body_size: 0,
    }
}

/// A single record for a failed load, built from the first hop only.
pub fn build_failed(entry: PendingEntry, failure: &LoadingFailed) -> FinishedRecord {
    let transaction_id = entry.transaction_id.clone();
    let wall_time = entry.wall_time;
    let mut request = entry.into_first();
    request.redirect_response = None;
    request.http_version = UNKNOWN_HTTP_VERSION.to_string();

    let mut response = HarResponse::failed(failure.error_text.clone());
    response.http_version = UNKNOWN_HTTP_VERSION.to_string();

    FinishedRecord {
        transaction_id,
        started_date_time: started_date_time(wall_time),
        time: 0.0,
        request,
        response,
        cache: serde_json::Map::new(),
        timings: HarTimings::default(),
        server_ip_address: None,
        connection: None,
    }
}
