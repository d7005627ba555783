//! Structured progress events for whatever UI consumes the run.

use crate::core::types::FailureRecord;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    Log {
        message: String,
        severity: Severity,
    },
    #[serde(rename_all = "camelCase")]
    Progress {
        progress_percent: f64,
        current_count: u64,
        total_count: u64,
    },
    Failure {
        failure: FailureRecord,
    },
    Stats {
        success: u64,
        failed: u64,
    },
}

impl EngineEvent {
    pub fn log(severity: Severity, message: impl Into<String>) -> Self {
        Self::Log {
            message: message.into(),
            severity,
        }
    }

    pub fn progress(current_count: u64, total_count: u64) -> Self {
        let progress_percent = if total_count == 0 {
            0.0
        } else {
            (current_count as f64 / total_count as f64 * 100.0).min(100.0)
        };
        Self::Progress {
            progress_percent,
            current_count,
            total_count,
        }
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// Re-emits every event as a log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: EngineEvent) {
        match event {
            EngineEvent::Log { message, severity } => match severity {
                Severity::Info | Severity::Success => info!("{}", message),
                Severity::Warning => warn!("{}", message),
                Severity::Error => error!("{}", message),
            },
            EngineEvent::Progress {
                progress_percent,
                current_count,
                total_count,
            } => info!(
                "progress: {}/{} ({:.0}%)",
                current_count, total_count, progress_percent
            ),
            EngineEvent::Failure { failure } => warn!(
                "failed: {} (page {}): {}",
                failure.name, failure.page_number, failure.reason
            ),
            EngineEvent::Stats { success, failed } => {
                info!("stats: {} succeeded, {} failed", success, failed)
            }
        }
    }
}

/// Forwards events to an async consumer. A dropped receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: EngineEvent) {}
}
