//! Audit trail for gate decisions
//!
//! Every denial produced by the trust boundary carries a reason string and
//! is reported through an [`AuditSink`]; nothing is silently swallowed.
//! Hosts plug in their own sink, or use [`TracingAuditSink`] to forward
//! events into the process-wide `tracing` subscriber.

use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

/// A single audit-worthy event at the trust boundary.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// RFC 3339 timestamp of the event.
    pub timestamp: String,

    /// Kind of event.
    pub kind: AuditKind,

    /// Extension name the event concerns.
    pub extension: String,

    /// Denial or rejection reason, when the event carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    /// Create an event stamped with the current time.
    pub fn new(kind: AuditKind, extension: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            kind,
            extension: extension.into(),
            reason: None,
        }
    }

    /// Attach a reason string.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Kind of audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// Signature verification succeeded at install time.
    ExtensionVerified,
    /// The extension was hard-rejected (signature or bytecode).
    ExtensionRejected,
    /// An ordinary symbol lookup was denied (advisory).
    SymbolDenied,
    /// A class load was denied by the name policy.
    ClassLoadDenied,
    /// A sandboxed file operation was refused for escaping the root.
    SandboxViolation,
    /// A sandboxed file view was opened for an extension.
    FileViewOpened,
    /// A sandboxed file view was closed.
    FileViewClosed,
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync {
    /// Record one event. Implementations must not panic on I/O trouble.
    fn record(&self, event: &AuditEvent);
}

/// Sink that forwards events to the `tracing` subscriber.
///
/// Denials and rejections are logged at `warn`, the rest at `info`.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        let reason = event.reason.as_deref().unwrap_or("");
        match event.kind {
            AuditKind::ExtensionRejected
            | AuditKind::SymbolDenied
            | AuditKind::ClassLoadDenied
            | AuditKind::SandboxViolation => {
                tracing::warn!(
                    extension = %event.extension,
                    kind = ?event.kind,
                    reason = %reason,
                    "extension gate denial"
                );
            }
            _ => {
                tracing::info!(
                    extension = %event.extension,
                    kind = ?event.kind,
                    "extension gate event"
                );
            }
        }
    }
}

/// Sink that keeps events in memory; intended for tests.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Sink that discards everything.
#[derive(Debug, Default)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _event: &AuditEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_records_in_order() {
        let sink = MemoryAuditSink::new();
        sink.record(&AuditEvent::new(AuditKind::ExtensionVerified, "a"));
        sink.record(
            &AuditEvent::new(AuditKind::SymbolDenied, "a").with_reason("default deny"),
        );

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, AuditKind::ExtensionVerified);
        assert_eq!(events[1].reason.as_deref(), Some("default deny"));
    }

    #[test]
    fn test_event_serializes_kind_snake_case() {
        let event = AuditEvent::new(AuditKind::SandboxViolation, "ext");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("sandbox_violation"));
    }

    #[test]
    fn test_null_sink_discards() {
        let sink = NullAuditSink;
        sink.record(&AuditEvent::new(AuditKind::FileViewClosed, "ext"));
    }
}
