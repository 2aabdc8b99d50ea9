use super::DevToolsSession;
use crate::error::{HarError, Result};
use crate::protocol::{Cookie, ResponseBody, TransactionId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// In-memory session that answers commands from preloaded data.
///
/// Bodies are keyed by transaction id and cookies by URL. A cookie lookup can
/// be delayed per URL to reproduce the request/response registration race.
#[derive(Default)]
pub struct ScriptedSession {
    bodies: Mutex<HashMap<TransactionId, ResponseBody>>,
    cookies: Mutex<HashMap<String, Vec<Cookie>>>,
    cookie_delays: Mutex<HashMap<String, Duration>>,
    failing_cookie_urls: Mutex<Vec<String>>,
    network_enabled: AtomicBool,
    body_fetches: AtomicUsize,
    cookie_fetches: AtomicUsize,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(self, id: impl Into<TransactionId>, body: ResponseBody) -> Self {
        lock(&self.bodies).insert(id.into(), body);
        self
    }

    pub fn with_cookies(self, url: impl Into<String>, cookies: Vec<Cookie>) -> Self {
        lock(&self.cookies).insert(url.into(), cookies);
        self
    }

    pub fn with_cookie_delay(self, url: impl Into<String>, delay: Duration) -> Self {
        lock(&self.cookie_delays).insert(url.into(), delay);
        self
    }

    pub fn with_failing_cookies(self, url: impl Into<String>) -> Self {
        lock(&self.failing_cookie_urls).push(url.into());
        self
    }

    pub fn is_network_enabled(&self) -> bool {
        self.network_enabled.load(Ordering::SeqCst)
    }

    pub fn body_fetches(&self) -> usize {
        self.body_fetches.load(Ordering::SeqCst)
    }

    pub fn cookie_fetches(&self) -> usize {
        self.cookie_fetches.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl DevToolsSession for ScriptedSession {
    async fn enable_network(&self) -> Result<()> {
        self.network_enabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_response_body(&self, id: &TransactionId) -> Result<ResponseBody> {
        self.body_fetches.fetch_add(1, Ordering::SeqCst);
        lock(&self.bodies)
            .get(id)
            .cloned()
            .ok_or_else(|| HarError::enrichment(id, "No resource with given identifier found"))
    }

    async fn fetch_cookies(&self, urls: &[String]) -> Result<Vec<Cookie>> {
        self.cookie_fetches.fetch_add(1, Ordering::SeqCst);

        let delay = {
            let delays = lock(&self.cookie_delays);
            urls.iter().filter_map(|url| delays.get(url).copied()).max()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if lock(&self.failing_cookie_urls).iter().any(|failing| urls.contains(failing)) {
            return Err(HarError::Transport("Target closed".to_string()));
        }

        let cookies = lock(&self.cookies);
        Ok(urls.iter().filter_map(|url| cookies.get(url)).flatten().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enable_network() {
        let session = ScriptedSession::new();
        assert!(!session.is_network_enabled());

        session.enable_network().await.unwrap();
        assert!(session.is_network_enabled());
    }

    #[tokio::test]
    async fn test_fetch_known_body() {
        let session = ScriptedSession::new().with_body("7", ResponseBody::text("<html/>"));

        let body = session.fetch_response_body(&TransactionId::from("7")).await.unwrap();

        assert_eq!(body.body, "<html/>");
        assert_eq!(session.body_fetches(), 1);
    }

    #[tokio::test]
    async fn test_fetch_evicted_body_fails() {
        let session = ScriptedSession::new();
        let result = session.fetch_response_body(&TransactionId::from("404")).await;
        assert!(matches!(result, Err(HarError::EnrichmentFetch { .. })));
    }

    #[tokio::test]
    async fn test_fetch_cookies_by_url() {
        let session = ScriptedSession::new()
            .with_cookies("http://x/a", vec![Cookie::new("sid", "1")])
            .with_cookies("http://x/b", vec![Cookie::new("pref", "dark")]);

        let cookies = session.fetch_cookies(&["http://x/a".to_string()]).await.unwrap();

        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].name, "sid");
    }

    #[tokio::test]
    async fn test_failing_cookies() {
        let session = ScriptedSession::new().with_failing_cookies("http://x/a");
        let result = session.fetch_cookies(&["http://x/a".to_string()]).await;
        assert!(matches!(result, Err(HarError::Transport(_))));
    }
}
