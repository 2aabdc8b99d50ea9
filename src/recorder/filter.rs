//! Decide, before any enrichment fetch, whether a response is worth recording.

use crate::config::FilterConfig;
use crate::error::{HarError, Result};
use crate::protocol::ResponseMetadata;
use regex::Regex;

/// Compiled ignore-lists. Evaluation is pure: the same response always gets
/// the same answer.
#[derive(Debug, Clone, Default)]
pub struct TraceFilter {
    ignore_mime: Vec<Regex>,
    ignore_url: Vec<Regex>,
    ignore_base64_bodies: bool,
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns.iter().map(|p| Regex::new(p).map_err(HarError::from)).collect()
}

/// Whether the browser hands this MIME type's body back as text.
///
/// Anything else (images, fonts, media, archives) comes back base64 encoded.
pub fn is_textual_mime(mime_type: &str) -> bool {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    essence.is_empty()
        || essence.starts_with("text/")
        || essence.ends_with("+xml")
        || essence.ends_with("+json")
        || ["json", "javascript", "ecmascript", "xml", "x-www-form-urlencoded"]
            .iter()
            .any(|marker| essence.contains(marker))
}

impl TraceFilter {
    pub fn new(config: &FilterConfig) -> Result<Self> {
        Ok(Self {
            ignore_mime: compile(&config.ignore_mime)?,
            ignore_url: compile(&config.ignore_url)?,
            ignore_base64_bodies: config.ignore_base64_bodies,
        })
    }

    /// A filter that records everything.
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn ignores_base64_bodies(&self) -> bool {
        self.ignore_base64_bodies
    }

    pub fn should_ignore(&self, response: &ResponseMetadata) -> bool {
        let mime_type = response.content_type().unwrap_or_default();

        if self.ignore_mime.iter().any(|re| re.is_match(mime_type)) {
            return true;
        }
        if self.ignore_url.iter().any(|re| re.is_match(&response.url)) {
            return true;
        }

        self.ignore_base64_bodies && !is_textual_mime(mime_type)
    }
}
