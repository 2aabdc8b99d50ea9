use crate::config::{DevToolsEndpoint, DEFAULT_TIMEOUT};
use crate::error::{HarError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Browser build information from `/json/version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserVersion {
    #[serde(rename = "Browser")]
    pub browser: String,
    #[serde(rename = "Protocol-Version")]
    pub protocol_version: String,
    #[serde(rename = "User-Agent", default)]
    pub user_agent: String,
    #[serde(rename = "webSocketDebuggerUrl", default)]
    pub web_socket_debugger_url: Option<String>,
}

/// One debuggable target from `/json/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub target_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub web_socket_debugger_url: Option<String>,
}

impl TargetInfo {
    pub fn is_attachable_page(&self) -> bool {
        self.target_type == "page" && self.web_socket_debugger_url.is_some()
    }
}

/// Client for the browser's remote-debugging HTTP endpoint.
pub struct TargetDiscovery {
    client: Client,
    base_url: String,
    timeout: Option<Duration>,
}

impl TargetDiscovery {
    pub fn new(endpoint: &DevToolsEndpoint) -> Result<Self> {
        let mut client_builder = Client::builder();

        if let Some(timeout) = endpoint.timeout {
            client_builder = client_builder.timeout(timeout);
        }

        Ok(Self {
            client: client_builder.build()?,
            base_url: endpoint.base_url(),
            timeout: endpoint.timeout,
        })
    }

    /// Point discovery at an explicit base URL, e.g. a tunnelled endpoint.
    ///
    /// Requests time out after [`DEFAULT_TIMEOUT`].
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        Self::with_base_url_and_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_base_url_and_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Some(timeout),
        })
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub async fn version(&self) -> Result<BrowserVersion> {
        let version: BrowserVersion = self.get_json("/json/version").await?;
        info!("Connected to {} (protocol {})", version.browser, version.protocol_version);
        Ok(version)
    }

    pub async fn list_targets(&self) -> Result<Vec<TargetInfo>> {
        let targets: Vec<TargetInfo> = self.get_json("/json/list").await?;
        debug!("Found {} debug targets", targets.len());
        Ok(targets)
    }

    /// Pick the first page target that accepts a debugger connection.
    pub async fn page_target(&self) -> Result<TargetInfo> {
        self.list_targets()
            .await?
            .into_iter()
            .find(TargetInfo::is_attachable_page)
            .ok_or_else(|| {
                HarError::Transport(format!("No attachable page target at {}", self.base_url))
            })
    }

    async fn get_json<T>(&self, path: &str) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(HarError::Transport(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGETS: &str = r#"[
        {"id": "A1", "type": "service_worker", "title": "sw", "url": "http://x/sw.js",
         "webSocketDebuggerUrl": "ws://localhost:9222/devtools/page/A1"},
        {"id": "B2", "type": "page", "title": "Detached", "url": "http://x/old"},
        {"id": "C3", "type": "page", "title": "Example", "url": "http://x/a",
         "webSocketDebuggerUrl": "ws://localhost:9222/devtools/page/C3"}
    ]"#;

    #[test]
    fn test_new_uses_endpoint_url() {
        let discovery = TargetDiscovery::new(&DevToolsEndpoint::new("chrome", 9333)).unwrap();
        assert_eq!(discovery.base_url, "http://chrome:9333");
    }

    #[test]
    fn test_with_base_url_trims_slash() {
        let discovery = TargetDiscovery::with_base_url("http://chrome:9222/").unwrap();
        assert_eq!(discovery.base_url, "http://chrome:9222");
    }

    #[test]
    fn test_with_base_url_sets_timeout() {
        let discovery = TargetDiscovery::with_base_url("http://chrome:9222").unwrap();
        assert_eq!(discovery.timeout(), Some(DEFAULT_TIMEOUT));

        let discovery =
            TargetDiscovery::with_base_url_and_timeout("http://chrome:9222", Duration::from_millis(250))
                .unwrap();
        assert_eq!(discovery.timeout(), Some(Duration::from_millis(250)));
    }

    #[tokio::test]
    async fn test_slow_endpoint_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            // accept and never answer
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let discovery = TargetDiscovery::with_base_url_and_timeout(
            format!("http://{}", address),
            Duration::from_millis(100),
        )
        .unwrap();

        let result = discovery.list_targets().await;
        assert!(matches!(result, Err(HarError::HttpError(_))));
    }

    #[tokio::test]
    async fn test_version() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/json/version")
            .with_status(200)
            .with_body(
                r#"{"Browser": "HeadlessChrome/120.0", "Protocol-Version": "1.3",
                    "User-Agent": "Mozilla/5.0",
                    "webSocketDebuggerUrl": "ws://localhost:9222/devtools/browser/x"}"#,
            )
            .create_async()
            .await;

        let discovery = TargetDiscovery::with_base_url(server.url()).unwrap();
        let version = discovery.version().await.unwrap();

        mock.assert_async().await;
        assert_eq!(version.browser, "HeadlessChrome/120.0");
        assert_eq!(version.protocol_version, "1.3");
    }

    #[tokio::test]
    async fn test_list_targets() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/json/list")
            .with_status(200)
            .with_body(TARGETS)
            .create_async()
            .await;

        let discovery = TargetDiscovery::with_base_url(server.url()).unwrap();
        let targets = discovery.list_targets().await.unwrap();

        mock.assert_async().await;
        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0].target_type, "service_worker");
        assert!(targets[1].web_socket_debugger_url.is_none());
    }

    #[tokio::test]
    async fn test_page_target_skips_detached_pages() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/json/list")
            .with_status(200)
            .with_body(TARGETS)
            .create_async()
            .await;

        let discovery = TargetDiscovery::with_base_url(server.url()).unwrap();
        let target = discovery.page_target().await.unwrap();

        assert_eq!(target.id, "C3");
    }

    #[tokio::test]
    async fn test_page_target_none_available() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/json/list")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let discovery = TargetDiscovery::with_base_url(server.url()).unwrap();
        let result = discovery.page_target().await;

        assert!(matches!(result, Err(HarError::Transport(_))));
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/json/version")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let discovery = TargetDiscovery::with_base_url(server.url()).unwrap();
        let result = discovery.version().await;

        mock.assert_async().await;
        assert!(result.is_err());
    }
}
