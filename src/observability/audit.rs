/// Structured audit events for snipbox
///
/// Every security-relevant step of a request is emitted as one JSON line
/// through the `log` facade under the `snipbox::audit` target, correlated by
/// request id. Routing and retention are left to the logger configuration.
use crate::config::policy::{ContainmentReport, ABSENT_HOST_GLOBALS};
use crate::config::types::SandboxError;
use crate::core::types::{RejectReason, RunEvidence};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

pub const AUDIT_TARGET: &str = "snipbox::audit";

/// Audit event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

/// Types of events we track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Lifecycle events
    ExecutionStart,
    ExecutionEnd,

    // Intake
    InputRejected,

    // Policy and control events
    CapabilityDenied,
    ControlDegraded,

    // Termination and cleanup
    ForcedKill,
    CleanupFailure,

    HostFault,
}

impl AuditEventType {
    /// Get the default severity for this event type
    pub fn default_severity(&self) -> Severity {
        match self {
            AuditEventType::ExecutionStart => Severity::Low,
            AuditEventType::ExecutionEnd => Severity::Low,
            AuditEventType::InputRejected => Severity::Low,
            AuditEventType::CapabilityDenied => Severity::Medium,
            AuditEventType::ControlDegraded => Severity::High,
            AuditEventType::ForcedKill => Severity::Medium,
            AuditEventType::CleanupFailure => Severity::Critical,
            AuditEventType::HostFault => Severity::Critical,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub severity: Severity,
    pub request_id: Option<Uuid>,
    pub message: String,
    pub details: Value,
}

impl AuditEvent {
    /// Create a new event with default severity
    pub fn new(event_type: AuditEventType, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            severity: event_type.default_severity(),
            request_id: None,
            message: message.into(),
            details: Value::Null,
        }
    }

    pub fn with_request(mut self, request_id: Uuid) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                "{{\"event_type\":\"{:?}\",\"serialization_error\":\"{}\"}}",
                self.event_type, e
            )
        })
    }
}

/// Emit an event at the log level matching its severity.
pub fn emit(event: AuditEvent) {
    let line = event.to_json();
    match event.severity {
        Severity::Critical => error!(target: AUDIT_TARGET, "{}", line),
        Severity::High => warn!(target: AUDIT_TARGET, "{}", line),
        Severity::Medium | Severity::Low => info!(target: AUDIT_TARGET, "{}", line),
    }
}

pub fn execution_start(request_id: Uuid, code_bytes: usize) {
    emit(
        AuditEvent::new(AuditEventType::ExecutionStart, "execution started")
            .with_request(request_id)
            .with_details(json!({ "code_bytes": code_bytes })),
    );
}

pub fn execution_end(outcome: &str, evidence: &RunEvidence) {
    let mut details = serde_json::to_value(evidence).unwrap_or_else(|_| json!({}));
    if let Some(map) = details.as_object_mut() {
        map.insert("outcome".to_string(), json!(outcome));
    }
    emit(
        AuditEvent::new(
            AuditEventType::ExecutionEnd,
            format!("execution ended: {}", outcome),
        )
        .with_request(evidence.request_id)
        .with_details(details),
    );
}

pub fn input_rejected(request_id: Uuid, reason: &RejectReason) {
    emit(
        AuditEvent::new(
            AuditEventType::InputRejected,
            format!("input rejected: {}", reason),
        )
        .with_request(request_id)
        .with_details(json!({ "reason": reason.label() })),
    );
}

/// Host global a fault message shows the snippet tried to reach, if any.
pub fn denied_global(fault_message: &str) -> Option<&'static str> {
    let name = fault_message.strip_suffix(" is not defined")?;
    ABSENT_HOST_GLOBALS.iter().copied().find(|global| *global == name)
}

pub fn capability_denied(request_id: Uuid, global: &str) {
    emit(
        AuditEvent::new(
            AuditEventType::CapabilityDenied,
            format!("snippet referenced host global {}", global),
        )
        .with_request(request_id)
        .with_details(json!({ "global": global })),
    );
}

pub fn control_degraded(request_id: Uuid, report: &ContainmentReport) {
    let missing: Vec<&str> = report.missing.iter().map(|c| c.as_str()).collect();
    emit(
        AuditEvent::new(
            AuditEventType::ControlDegraded,
            format!("controls missing: {}", missing.join(", ")),
        )
        .with_request(request_id)
        .with_details(json!({ "missing": missing, "notes": report.notes })),
    );
}

pub fn forced_kill(request_id: Uuid, reason: String) {
    emit(AuditEvent::new(AuditEventType::ForcedKill, reason).with_request(request_id));
}

pub fn cleanup_failure(request_id: Uuid, reason: String) {
    emit(AuditEvent::new(AuditEventType::CleanupFailure, reason).with_request(request_id));
}

pub fn host_fault(request_id: Uuid, err: &SandboxError) {
    emit(
        AuditEvent::new(AuditEventType::HostFault, err.to_string())
            .with_request(request_id)
            .with_details(json!({ "error_kind": err.kind() })),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_severity() {
        assert_eq!(
            AuditEventType::ExecutionStart.default_severity(),
            Severity::Low
        );
        assert_eq!(
            AuditEventType::CleanupFailure.default_severity(),
            Severity::Critical
        );
        assert_eq!(
            AuditEventType::ControlDegraded.default_severity(),
            Severity::High
        );
    }

    #[test]
    fn test_event_serialization() {
        let id = Uuid::new_v4();
        let event = AuditEvent::new(AuditEventType::ForcedKill, "deadline exceeded")
            .with_request(id)
            .with_details(json!({ "waited_ms": 3 }));
        let parsed: Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(parsed["event_type"], "forced_kill");
        assert_eq!(parsed["severity"], "medium");
        assert_eq!(parsed["request_id"], id.to_string());
        assert_eq!(parsed["details"]["waited_ms"], 3);
        assert!(parsed["timestamp"].is_string());
    }

    #[test]
    fn test_severity_override() {
        let event =
            AuditEvent::new(AuditEventType::ExecutionEnd, "x").with_severity(Severity::High);
        assert_eq!(event.severity, Severity::High);
        assert!(event.request_id.is_none());
    }

    #[test]
    fn test_denied_global_detection() {
        assert_eq!(denied_global("process is not defined"), Some("process"));
        assert_eq!(denied_global("require is not defined"), Some("require"));
        assert_eq!(denied_global("myVar is not defined"), None);
        assert_eq!(denied_global("boom"), None);
    }
}
