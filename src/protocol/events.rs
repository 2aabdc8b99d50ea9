//! Network domain events consumed by the recorder.

use super::types::{RequestData, ResponseMetadata, TransactionId};
use crate::error::{HarError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const REQUEST_WILL_BE_SENT: &str = "Network.requestWillBeSent";
pub const RESPONSE_RECEIVED: &str = "Network.responseReceived";
pub const LOADING_FAILED: &str = "Network.loadingFailed";

/// A request is about to be sent.
///
/// When the request follows a redirect, `redirect_response` holds the
/// response that redirected the previous hop of the same transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSent {
    pub request_id: TransactionId,
    pub request: RequestData,
    /// Monotonic timestamp in seconds.
    pub timestamp: f64,
    /// Wall clock time in seconds since the epoch.
    pub wall_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_response: Option<ResponseMetadata>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
}

/// Response headers are available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceived {
    pub request_id: TransactionId,
    pub response: ResponseMetadata,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
}

/// Loading of a request failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFailed {
    pub request_id: TransactionId,
    pub error_text: String,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub canceled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
}

/// One event from any of the three streams the recorder listens to.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    RequestWillBeSent(RequestWillBeSent),
    ResponseReceived(ResponseReceived),
    LoadingFailed(LoadingFailed),
}

impl NetworkEvent {
    /// Decode a raw `(method, params)` pair as delivered by the protocol client.
    pub fn from_method(method: &str, params: Value) -> Result<Self> {
        let malformed = |e: serde_json::Error| HarError::MalformedEvent {
            method: method.to_string(),
            reason: e.to_string(),
        };

        match method {
            REQUEST_WILL_BE_SENT => serde_json::from_value(params)
                .map(NetworkEvent::RequestWillBeSent)
                .map_err(malformed),
            RESPONSE_RECEIVED => serde_json::from_value(params)
                .map(NetworkEvent::ResponseReceived)
                .map_err(malformed),
            LOADING_FAILED => serde_json::from_value(params)
                .map(NetworkEvent::LoadingFailed)
                .map_err(malformed),
            other => Err(HarError::UnknownEvent(other.to_string())),
        }
    }

    pub fn transaction_id(&self) -> &TransactionId {
        match self {
            NetworkEvent::RequestWillBeSent(e) => &e.request_id,
            NetworkEvent::ResponseReceived(e) => &e.request_id,
            NetworkEvent::LoadingFailed(e) => &e.request_id,
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            NetworkEvent::RequestWillBeSent(_) => REQUEST_WILL_BE_SENT,
            NetworkEvent::ResponseReceived(_) => RESPONSE_RECEIVED,
            NetworkEvent::LoadingFailed(_) => LOADING_FAILED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_request_will_be_sent() {
        let event = NetworkEvent::from_method(
            REQUEST_WILL_BE_SENT,
            json!({
                "requestId": "7",
                "request": {"url": "http://x/a", "method": "GET", "headers": {}},
                "timestamp": 10.5,
                "wallTime": 1500000000.25,
                "type": "Document"
            }),
        )
        .unwrap();

        assert_eq!(event.transaction_id().as_str(), "7");
        assert_eq!(event.method(), REQUEST_WILL_BE_SENT);
        match event {
            NetworkEvent::RequestWillBeSent(e) => {
                assert_eq!(e.request.url, "http://x/a");
                assert!(e.redirect_response.is_none());
                assert_eq!(e.resource_type.as_deref(), Some("Document"));
            }
            _ => panic!("Expected RequestWillBeSent"),
        }
    }

    #[test]
    fn test_decode_redirect_request() {
        let event = NetworkEvent::from_method(
            REQUEST_WILL_BE_SENT,
            json!({
                "requestId": "9",
                "request": {"url": "http://x/b", "method": "GET"},
                "timestamp": 11.0,
                "wallTime": 1500000001.0,
                "redirectResponse": {
                    "url": "http://x/a",
                    "status": 302,
                    "statusText": "Found",
                    "headers": {"Location": "/b"}
                }
            }),
        )
        .unwrap();

        match event {
            NetworkEvent::RequestWillBeSent(e) => {
                let redirect = e.redirect_response.unwrap();
                assert_eq!(redirect.status, 302);
                assert_eq!(redirect.url, "http://x/a");
            }
            _ => panic!("Expected RequestWillBeSent"),
        }
    }

    #[test]
    fn test_decode_loading_failed() {
        let event = NetworkEvent::from_method(
            LOADING_FAILED,
            json!({"requestId": "3", "errorText": "net::ERR_ABORTED", "canceled": true}),
        )
        .unwrap();

        match event {
            NetworkEvent::LoadingFailed(e) => {
                assert_eq!(e.error_text, "net::ERR_ABORTED");
                assert!(e.canceled);
            }
            _ => panic!("Expected LoadingFailed"),
        }
    }

    #[test]
    fn test_missing_fields_are_malformed() {
        let result = NetworkEvent::from_method(RESPONSE_RECEIVED, json!({"requestId": "1"}));

        match result {
            Err(HarError::MalformedEvent { method, reason }) => {
                assert_eq!(method, RESPONSE_RECEIVED);
                assert!(reason.contains("response"));
            }
            other => panic!("Expected MalformedEvent, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_method() {
        let result = NetworkEvent::from_method("Network.dataReceived", json!({}));
        assert!(matches!(result, Err(HarError::UnknownEvent(m)) if m == "Network.dataReceived"));
    }
}
