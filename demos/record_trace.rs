//! Record a short scripted browsing session to an NDJSON trace.
//!
//! No browser is needed: a `ScriptedSession` answers body and cookie lookups
//! and a fixed list of raw Network events is replayed through the recorder.
//! If a browser is listening on `CDP_HOST`/`CDP_PORT`, the page it would
//! attach to is reported as well.
//!
//! Usage: `cargo run --example record_trace -- [output.ndjson]`

use devtools_har::prelude::*;
use devtools_har::protocol::{Cookie, ResponseBody};
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;

fn scripted_events() -> Vec<(&'static str, Value)> {
    vec![
        (
            "Network.requestWillBeSent",
            json!({
                "requestId": "1000.1",
                "request": {"url": "http://example.test/", "method": "GET", "headers": {"Accept": "text/html"}},
                "timestamp": 10.0,
                "wallTime": 1_700_000_000.0
            }),
        ),
        (
            "Network.requestWillBeSent",
            json!({
                "requestId": "1000.1",
                "request": {"url": "http://example.test/home", "method": "GET", "headers": {"Accept": "text/html"}},
                "timestamp": 10.05,
                "wallTime": 1_700_000_000.05,
                "redirectResponse": {
                    "url": "http://example.test/",
                    "status": 302,
                    "statusText": "Found",
                    "headers": {"Location": "/home"},
                    "protocol": "http/1.1"
                }
            }),
        ),
        (
            "Network.responseReceived",
            json!({
                "requestId": "1000.1",
                "response": {
                    "url": "http://example.test/home",
                    "status": 200,
                    "statusText": "OK",
                    "headers": {"Content-Type": "text/html; charset=utf-8"},
                    "mimeType": "text/html",
                    "protocol": "http/1.1",
                    "remoteIPAddress": "127.0.0.1"
                }
            }),
        ),
        (
            "Network.requestWillBeSent",
            json!({
                "requestId": "1000.2",
                "request": {"url": "http://example.test/logo.png", "method": "GET", "headers": {}},
                "timestamp": 10.2,
                "wallTime": 1_700_000_000.2
            }),
        ),
        (
            "Network.responseReceived",
            json!({
                "requestId": "1000.2",
                "response": {"url": "http://example.test/logo.png", "status": 200, "mimeType": "image/png"}
            }),
        ),
        (
            "Network.requestWillBeSent",
            json!({
                "requestId": "1000.3",
                "request": {
                    "url": "http://example.test/api/login",
                    "method": "POST",
                    "headers": {"Content-Type": "application/x-www-form-urlencoded"},
                    "postData": "user=ada&remember=1"
                },
                "timestamp": 10.3,
                "wallTime": 1_700_000_000.3
            }),
        ),
        (
            "Network.loadingFailed",
            json!({"requestId": "1000.3", "errorText": "net::ERR_CONNECTION_RESET", "timestamp": 10.4}),
        ),
    ]
}

async fn report_target(endpoint: &DevToolsEndpoint) {
    let discovery = match TargetDiscovery::new(endpoint) {
        Ok(discovery) => discovery,
        Err(e) => {
            tracing::warn!("Cannot build discovery client: {}", e);
            return;
        }
    };

    match discovery.page_target().await {
        Ok(target) => println!("Browser page available: {} ({})", target.title, target.url),
        Err(e) => println!("No page to attach to at {}: {}", endpoint.base_url(), e),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let output = std::env::args().nth(1).unwrap_or_else(|| "trace.ndjson".to_string());

    let config = RecorderConfig::default().with_filter(
        FilterConfig::default()
            .with_ignored_mime(r"^image/[^/]+")
            .with_ignored_mime(r"^application/x-font-woff")
            .with_ignored_mime(r"^text/css")
            .with_ignored_url(r"\.woff2"),
    );
    report_target(&config.endpoint).await;

    let session = Arc::new(
        ScriptedSession::new()
            .with_body("1000.1", ResponseBody::text("<html><body>home</body></html>"))
            .with_body("1000.2", ResponseBody::base64("iVBORw0KGgo="))
            .with_cookies("http://example.test/home", vec![Cookie::new("session", "f00d")]),
    );

    let recorder = Arc::new(NetworkRecorder::new(session, config)?);
    recorder.start().await?;

    let records = recorder.records();
    let events = stream::iter(scripted_events()).filter_map(|(method, params)| async move {
        match NetworkEvent::from_method(method, params) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!("Skipping scripted event: {}", e);
                None
            }
        }
    });

    let runner = {
        let recorder = Arc::clone(&recorder);
        tokio::spawn(async move { recorder.run(events).await })
    };

    let mut writer = NdjsonWriter::create(&output).await?;
    let written = writer.write_stream(records).await?;
    runner.await??;

    println!("Wrote {} record(s) to {}", written, output);
    Ok(())
}
