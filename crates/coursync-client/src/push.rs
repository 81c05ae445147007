//! Reconnecting reader of the server's push stream.
//!
//! The reader runs in one background task and hands out two channels:
//! decoded JSON payloads on `events` and transport failures on `errors`.
//! It cycles connect, stream, back off and reconnect until stopped. The
//! request carries no timeout, so only the stop signal or a transport
//! failure ends a healthy stream. Both channels close when the task ends.

use std::time::Duration;

use bytes::BytesMut;
use coursync_shared::constants::{MAX_PUSH_LINE_BYTES, USER_ID_HEADER};
use coursync_shared::protocol::parse_data_line;
use coursync_shared::types::UserId;
use futures::StreamExt;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the events channel between the reader and its consumer.
const EVENT_BUFFER: usize = 64;
/// Capacity of the errors channel; older errors win when it is full.
const ERROR_BUFFER: usize = 16;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PushError {
    #[error("push connection failed: {0}")]
    Connect(String),

    #[error("push endpoint returned {0}")]
    Status(u16),

    #[error("push stream failed: {0}")]
    Stream(String),

    #[error("push stream closed by server")]
    Closed,
}

/// Read side handed to the consumer.
pub struct PushChannels {
    pub events: mpsc::Receiver<Value>,
    pub errors: mpsc::Receiver<PushError>,
}

/// Owner side of a running reader.
pub struct PushHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PushHandle {
    /// Ask the reader to stop. In-flight reads are abandoned and no further
    /// reconnect is attempted. Calling it again has no effect.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop and wait for the task to exit.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.task.await {
            warn!(error = %e, "push task ended abnormally");
        }
    }
}

#[derive(Clone)]
pub struct PushClient {
    http: reqwest::Client,
    url: String,
    user_id: UserId,
    backoff: Duration,
}

impl PushClient {
    pub fn new(server_url: &str, user_id: UserId, backoff: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: format!("{}/events", server_url.trim_end_matches('/')),
            user_id,
            backoff,
        }
    }

    /// Spawn the reader task.
    pub fn spawn(self) -> (PushHandle, PushChannels) {
        let (events_tx, events) = mpsc::channel(EVENT_BUFFER);
        let (errors_tx, errors) = mpsc::channel(ERROR_BUFFER);
        let (stop, stop_rx) = watch::channel(false);

        let task = tokio::spawn(self.run(events_tx, errors_tx, stop_rx));

        (PushHandle { stop, task }, PushChannels { events, errors })
    }

    async fn run(
        self,
        events: mpsc::Sender<Value>,
        errors: mpsc::Sender<PushError>,
        mut stop: watch::Receiver<bool>,
    ) {
        info!(url = %self.url, user_id = %self.user_id, "push client started");

        loop {
            if *stop.borrow() || events.is_closed() {
                break;
            }

            let failure = tokio::select! {
                _ = stop.changed() => break,
                failure = self.stream_once(&events) => failure,
            };

            if events.is_closed() {
                break;
            }
            warn!(error = %failure, backoff = ?self.backoff, "push stream interrupted");
            if errors.try_send(failure).is_err() {
                debug!("push error channel full or closed, error dropped");
            }

            tokio::select! {
                _ = stop.changed() => break,
                _ = tokio::time::sleep(self.backoff) => {}
            }
        }

        info!(user_id = %self.user_id, "push client stopped");
    }

    /// Run one connection until it fails. Returns why it ended.
    async fn stream_once(&self, events: &mpsc::Sender<Value>) -> PushError {
        let response = match self
            .http
            .get(&self.url)
            .header(USER_ID_HEADER, self.user_id.to_string())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return PushError::Connect(e.to_string()),
        };

        let status = response.status();
        if !status.is_success() {
            return PushError::Status(status.as_u16());
        }
        info!(user_id = %self.user_id, "push stream connected");

        let mut body = response.bytes_stream();
        let mut buffer = BytesMut::new();

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => return PushError::Stream(e.to_string()),
            };
            buffer.extend_from_slice(&chunk);

            loop {
                let line = match next_line(&mut buffer) {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => return e,
                };
                let Some(payload) = decode_line(&line) else {
                    continue;
                };
                if events.send(payload).await.is_err() {
                    return PushError::Closed;
                }
            }
        }

        PushError::Closed
    }
}

/// Split the next complete line off `buffer`. A line, finished or not,
/// longer than [`MAX_PUSH_LINE_BYTES`] fails the stream.
fn next_line(buffer: &mut BytesMut) -> Result<Option<BytesMut>, PushError> {
    let end = buffer.iter().position(|b| *b == b'\n');
    let length = end.unwrap_or(buffer.len());
    if length > MAX_PUSH_LINE_BYTES {
        return Err(PushError::Stream(format!(
            "line exceeds {MAX_PUSH_LINE_BYTES} bytes"
        )));
    }
    Ok(end.map(|end| buffer.split_to(end + 1)))
}

/// JSON payload of one stream line, if it carries a well-formed one.
fn decode_line(line: &[u8]) -> Option<Value> {
    let line = std::str::from_utf8(line).ok()?;
    let payload = parse_data_line(line)?;
    match serde_json::from_str(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "skipping malformed push frame");
            None
        }
    }
}
