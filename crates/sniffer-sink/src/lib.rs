//! The output sink layer (spec.md §1's "external collaborator" boundary):
//! receives completed message records from the core and routes them to a
//! user callback, an HTTP POST endpoint, or line-delimited JSON on a log
//! stream. Retry policy, authentication, and serialization all live here —
//! the core never sees a sink error, only logs one.

use std::io::Write;

use sniffer_core::error::SinkError;
use sniffer_core::model::HttpMessageRecord;
use tracing::warn;

/// A destination for completed message records. Implementations must never
/// block the capture pipeline indefinitely; errors are reported, not
/// retried, by the caller (spec.md §7's "per-connection non-fatal" policy
/// extended to the sink boundary).
pub trait MessageSink: Send {
    fn send(&mut self, record: &HttpMessageRecord) -> Result<(), SinkError>;
}

/// Hands every record to a user-supplied closure.
pub struct CallbackSink<F> {
    callback: F,
}

impl<F> CallbackSink<F>
where
    F: FnMut(&HttpMessageRecord) -> Result<(), SinkError> + Send,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> MessageSink for CallbackSink<F>
where
    F: FnMut(&HttpMessageRecord) -> Result<(), SinkError> + Send,
{
    fn send(&mut self, record: &HttpMessageRecord) -> Result<(), SinkError> {
        (self.callback)(record)
    }
}

/// Writes one JSON object per line to any `Write` (a file, stdout, a
/// socket-backed writer the embedder supplies).
pub struct JsonLinesSink<W> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write + Send> MessageSink for JsonLinesSink<W> {
    fn send(&mut self, record: &HttpMessageRecord) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, record).map_err(|e| SinkError::Io(e.to_string()))?;
        self.writer
            .write_all(b"\n")
            .map_err(|e| SinkError::Io(e.to_string()))?;
        self.writer.flush().map_err(|e| SinkError::Io(e.to_string()))
    }
}

/// POSTs each record as a JSON body to a fixed URL. No retry: a failed POST
/// is reported once via `SinkError::Http` and the record is dropped,
/// matching spec.md §5's "operation timeouts at the sink ... are not the
/// core's concern".
pub struct HttpPostSink {
    client: reqwest::blocking::Client,
    url: String,
}

impl HttpPostSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            url: url.into(),
        }
    }
}

impl MessageSink for HttpPostSink {
    fn send(&mut self, record: &HttpMessageRecord) -> Result<(), SinkError> {
        let response = self.client.post(&self.url).json(record).send().map_err(|e| {
            let err = SinkError::Http(e.to_string());
            warn!(url = %self.url, error = %err, "sink POST failed");
            err
        })?;

        if !response.status().is_success() {
            let err = SinkError::Http(format!("{} returned {}", self.url, response.status()));
            warn!(url = %self.url, error = %err, "sink POST rejected");
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sniffer_core::model::{Endpoint, MessageDirection};
    use std::io::Read;

    fn sample_record() -> HttpMessageRecord {
        HttpMessageRecord {
            receiver: Endpoint::new("10.0.0.2", 80),
            destination: Endpoint::new("10.0.0.1", 51000),
            direction: MessageDirection::Request,
            headers: Default::default(),
            method: Some("GET".to_string()),
            path: Some("/".to_string()),
            status_code: None,
            body: vec![],
            body_truncated: false,
            body_encoding: None,
            timestamp: "2026-01-01T00:00:00.000Z".to_string(),
        }
    }

    #[test]
    fn callback_sink_invokes_closure() {
        let mut seen = Vec::new();
        let mut sink = CallbackSink::new(|record: &HttpMessageRecord| {
            seen.push(record.method.clone());
            Ok(())
        });
        sink.send(&sample_record()).unwrap();
        assert_eq!(seen, vec![Some("GET".to_string())]);
    }

    #[test]
    fn json_lines_sink_writes_one_line_per_record() {
        let mut file = tempfile::tempfile().unwrap();
        {
            let mut sink = JsonLinesSink::new(&file);
            sink.send(&sample_record()).unwrap();
            sink.send(&sample_record()).unwrap();
        }
        let mut contents = String::new();
        use std::io::Seek;
        file.seek(std::io::SeekFrom::Start(0)).unwrap();
        file.read_to_string(&mut contents).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["method"], "GET");
    }
}
