// Server-sent-events decoding for RESTCONF notification streams
// (RFC 8040 §6.3). Events arrive as `data:` lines terminated by a
// blank line; each event body is an `ietf-restconf:notification`
// JSON document.

use async_stream::try_stream;
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use futures_util::StreamExt;
use tracing::warn;

use crate::error::Error;
use crate::op::Update;
use crate::path::Path;
use crate::value::Value;

/// Decoded notifications from one RESTCONF event stream. The stream
/// ends when the server closes the response body.
pub struct RestconfNotifications {
    inner: std::pin::Pin<Box<dyn Stream<Item = Result<Update, Error>> + Send>>,
}

impl RestconfNotifications {
    pub(crate) fn new(resp: reqwest::Response, path: Path) -> Self {
        Self { inner: Box::pin(decode_events(resp, path)) }
    }

    pub async fn next(&mut self) -> Option<Result<Update, Error>> {
        self.inner.next().await
    }
}

impl std::fmt::Debug for RestconfNotifications {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestconfNotifications").finish_non_exhaustive()
    }
}

fn decode_events(
    resp: reqwest::Response,
    path: Path,
) -> impl Stream<Item = Result<Update, Error>> + Send {
    try_stream! {
        let mut body = resp.bytes_stream();
        let mut buf = BytesMut::new();
        let mut data = String::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
            while let Some(line) = take_line(&mut buf) {
                if line.is_empty() {
                    // Blank line ends the event.
                    if !data.is_empty() {
                        if let Some(update) = decode_notification(&data, &path) {
                            yield update;
                        }
                        data.clear();
                    }
                } else if let Some(rest) = line.strip_prefix("data:") {
                    if !data.is_empty() {
                        data.push('\n');
                    }
                    data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
                }
                // Other fields (id:, event:, comments) are irrelevant
                // to notification delivery.
            }
        }
    }
}

/// Next `\n`-terminated line, with the terminator (and a trailing
/// `\r`) stripped. `None` until a full line is buffered.
fn take_line(buf: &mut BytesMut) -> Option<String> {
    let pos = buf.iter().position(|&b| b == b'\n')?;
    let mut line = buf.split_to(pos + 1);
    line.truncate(pos);
    if line.last() == Some(&b'\r') {
        line.truncate(line.len() - 1);
    }
    Some(String::from_utf8_lossy(&line).into_owned())
}

/// One event body into an [`Update`]. Undecodable events are logged
/// and skipped so a single garbled frame cannot end the stream.
fn decode_notification(data: &str, path: &Path) -> Option<Update> {
    let json: serde_json::Value = match serde_json::from_str(data) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "skipping undecodable event-stream payload");
            return None;
        }
    };
    let notification = json.get("ietf-restconf:notification").cloned().unwrap_or(json);
    let timestamp = notification
        .get("eventTime")
        .and_then(serde_json::Value::as_str)
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc));
    let body = notification
        .as_object()
        .and_then(|map| map.iter().find(|(key, _)| *key != "eventTime"))
        .map_or(serde_json::Value::Null, |(_, value)| value.clone());
    Some(Update { path: path.clone(), value: Value::from(body), timestamp })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn lines_split_on_lf_and_strip_cr() {
        let mut buf = BytesMut::from(&b"data: one\r\ndata: two\n\npartial"[..]);
        assert_eq!(take_line(&mut buf).as_deref(), Some("data: one"));
        assert_eq!(take_line(&mut buf).as_deref(), Some("data: two"));
        assert_eq!(take_line(&mut buf).as_deref(), Some(""));
        assert_eq!(take_line(&mut buf), None);
        assert_eq!(&buf[..], b"partial");
    }

    #[test]
    fn notification_body_becomes_an_update() {
        let path = Path::parse("/ietf-interfaces:interfaces").expect("valid path");
        let data = r#"{"ietf-restconf:notification":{
            "eventTime":"2026-03-01T10:20:30Z",
            "ietf-interfaces:interface-state-change":{"name":"eth0","oper-status":"down"}}}"#;
        let update = decode_notification(data, &path).expect("decodes");
        assert_eq!(update.path, path);
        assert!(update.timestamp.is_some());
        assert_eq!(
            update.value.get("name").and_then(Value::as_str),
            Some("eth0")
        );
    }

    #[test]
    fn garbled_event_is_skipped_not_fatal() {
        let path = Path::root();
        assert!(decode_notification("{not json", &path).is_none());
    }
}
