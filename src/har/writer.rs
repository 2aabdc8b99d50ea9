//! Newline-delimited JSON persistence for a record stream.

use super::FinishedRecord;
use crate::error::Result;
use futures::stream::{Stream, StreamExt};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, info};

/// Writes each record as one JSON object per line.
pub struct NdjsonWriter<W> {
    writer: W,
    written: usize,
}

impl NdjsonWriter<BufWriter<File>> {
    /// Create (or truncate) the file at `path`.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path.as_ref()).await?;
        info!("Writing trace to {}", path.as_ref().display());
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: AsyncWrite + Unpin> NdjsonWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    pub async fn write_record(&mut self, record: &FinishedRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.written += 1;
        debug!("Wrote record {} for {}", self.written, record.request.url);
        Ok(())
    }

    /// Drain `records` until it ends, flushing at the end.
    ///
    /// Returns the number of records written by this call.
    pub async fn write_stream<S>(&mut self, records: S) -> Result<usize>
    where
        S: Stream<Item = FinishedRecord>,
    {
        let before = self.written;
        let mut records = std::pin::pin!(records);

        while let Some(record) = records.next().await {
            self.write_record(&record).await?;
        }

        self.flush().await?;
        Ok(self.written - before)
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }

    pub fn records_written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::har::{HarResponse, HarTimings, RequestRecord};
    use crate::protocol::{Headers, RequestData, RequestWillBeSent};

    fn record(url: &str) -> FinishedRecord {
        let event = RequestWillBeSent {
            request_id: "1".into(),
            request: RequestData {
                url: url.to_string(),
                method: "GET".to_string(),
                headers: Headers::new(),
                post_data: None,
                url_fragment: None,
            },
            timestamp: 1.0,
            wall_time: 0.0,
            redirect_response: None,
            resource_type: None,
        };

        FinishedRecord {
            transaction_id: "1".into(),
            started_date_time: "1970-01-01T00:00:00.000Z".to_string(),
            time: 0.0,
            request: RequestRecord::from_event(&event, &[]),
            response: HarResponse::failed("net::ERR_ABORTED"),
            cache: serde_json::Map::new(),
            timings: HarTimings::default(),
            server_ip_address: None,
            connection: None,
        }
    }

    #[tokio::test]
    async fn test_write_record_appends_newline() {
        let mut writer = NdjsonWriter::new(Vec::new());
        writer.write_record(&record("http://x/a")).await.unwrap();

        let output = String::from_utf8(writer.into_inner()).unwrap();
        assert!(output.ends_with('\n'));
        assert_eq!(output.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_write_stream_in_order() {
        let records = futures::stream::iter(vec![record("http://x/1"), record("http://x/2")]);
        let mut writer = NdjsonWriter::new(Vec::new());

        let count = writer.write_stream(records).await.unwrap();
        assert_eq!(count, 2);

        let output = String::from_utf8(writer.into_inner()).unwrap();
        let urls: Vec<String> = output
            .lines()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).unwrap();
                value["request"]["url"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(urls, vec!["http://x/1", "http://x/2"]);
    }

    #[tokio::test]
    async fn test_create_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.ndjson");

        let mut writer = NdjsonWriter::create(&path).await.unwrap();
        writer.write_stream(futures::stream::iter(vec![record("http://x/a")])).await.unwrap();
        assert_eq!(writer.records_written(), 1);

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: FinishedRecord = serde_json::from_str(contents.trim_end()).unwrap();
        assert_eq!(parsed.response.status, -1);
    }
}
