use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use serde_json::Value;

use crate::error::SinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// A collector has not completed a cycle within its allowance
    Staleness,

    /// No records were persisted by any collector in a monitor window
    NoData,

    /// A collector could not be started
    CollectorStartFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// One anomaly notice.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: Severity,
    pub title: String,
    pub message: String,

    /// Free-form structured context (collector name, timings, ...)
    pub context: Value,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        kind: AlertKind,
        severity: Severity,
        title: impl Into<String>,
        message: impl Into<String>,
        context: Value,
    ) -> Self {
        Self {
            kind,
            severity,
            title: title.into(),
            message: message.into(),
            context,
            raised_at: Utc::now(),
        }
    }
}

/// Side channel for anomaly notices.
///
/// Delivery is best-effort. Callers go through
/// `Orchestrator`/`HealthMonitor`, which log and swallow errors,
/// so an implementation may fail freely.
#[async_trait::async_trait]
pub trait AlertSink: Send + Sync {
    async fn raise(&self, alert: &Alert) -> Result<(), SinkError>;
}

// ------------------------------------------------------------
// Log sink
// ------------------------------------------------------------
pub struct LogAlertSink;

#[async_trait::async_trait]
impl AlertSink for LogAlertSink {
    async fn raise(&self, alert: &Alert) -> Result<(), SinkError> {
        match alert.severity {
            Severity::High => error!("[ALERT] {}: {} {}", alert.title, alert.message, alert.context),
            Severity::Medium => warn!("[ALERT] {}: {} {}", alert.title, alert.message, alert.context),
            Severity::Low => info!("[ALERT] {}: {} {}", alert.title, alert.message, alert.context),
        }
        Ok(())
    }
}

// ------------------------------------------------------------
// Memory sink
// ------------------------------------------------------------
//
// Keeps every raised alert; handy for embedding the pipeline in a
// host application that polls alerts itself.
//
#[derive(Default)]
pub struct MemoryAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn count_of(&self, kind: AlertKind) -> usize {
        self.alerts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|a| a.kind == kind)
            .count()
    }
}

#[async_trait::async_trait]
impl AlertSink for MemoryAlertSink {
    async fn raise(&self, alert: &Alert) -> Result<(), SinkError> {
        self.alerts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(alert.clone());
        Ok(())
    }
}

// ------------------------------------------------------------
// Fan-out sink
// ------------------------------------------------------------
//
// Delivers to every inner sink. One failing sink does not stop
// delivery to the others; the first error is returned.
//
pub struct FanoutAlertSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl FanoutAlertSink {
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait::async_trait]
impl AlertSink for FanoutAlertSink {
    async fn raise(&self, alert: &Alert) -> Result<(), SinkError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.raise(alert).await {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
