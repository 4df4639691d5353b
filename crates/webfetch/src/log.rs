// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Structured fetch records and the sink they are delivered to.
//!
//! The client emits exactly one [`FetchRecord`] per fetch attempt and
//! one per force-closed fetcher during shutdown. A record serializes to
//! a single JSON object:
//!
//! ```json
//! {"where":"webfetch","what":"fetch","name":"https://example.com/x",
//!  "when":1754060400000,"duration":12,"status":200,"len":1024}
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// The kind of event a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchEvent {
    /// A fetch attempt completed (successfully or not).
    Fetch,
    /// A fetcher was force-closed during shutdown.
    ForceShutdown,
}

/// One structured log record.
#[derive(Debug, Clone, Serialize)]
pub struct FetchRecord {
    /// Always `"webfetch"`.
    #[serde(rename = "where")]
    pub component: &'static str,
    /// The event kind.
    pub what: FetchEvent,
    /// The request URL.
    pub name: String,
    /// Event time, milliseconds since the Unix epoch.
    pub when: u64,
    /// Transport call duration in milliseconds (fetch events only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    /// HTTP status code, or 0 if the transport failed (fetch events only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Bytes buffered from the body (fetch events only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub len: Option<u64>,
}

impl FetchRecord {
    pub(crate) fn fetch(name: &str, when: SystemTime, duration: Duration, status: u16, len: u64) -> Self {
        Self {
            component: "webfetch",
            what: FetchEvent::Fetch,
            name: name.to_owned(),
            when: unix_millis(when),
            duration: Some(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)),
            status: Some(status),
            len: Some(len),
        }
    }

    pub(crate) fn force_shutdown(name: &str, when: SystemTime) -> Self {
        Self {
            component: "webfetch",
            what: FetchEvent::ForceShutdown,
            name: name.to_owned(),
            when: unix_millis(when),
            duration: None,
            status: None,
            len: None,
        }
    }

    /// The record as a single JSON object.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("fetch record serialization cannot fail")
    }
}

fn unix_millis(when: SystemTime) -> u64 {
    when.duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Receives the client's structured records.
pub trait LogSink: Send + Sync + 'static {
    /// Delivers one record. Called from fetch tasks and the shutdown
    /// path; implementations should not block.
    fn emit(&self, record: &FetchRecord);
}

/// A [`LogSink`] that forwards each record to [`tracing`] as one
/// `info`-level event under the `webfetch` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, record: &FetchRecord) {
        tracing::info!(target: "webfetch", "{}", record.to_json());
    }
}
