//! Event envelope - the common wrapper for all events.

use chrono::{DateTime, Utc};
use hotplug_id::EventId;
use serde::{Deserialize, Serialize};

use crate::{EventAction, EventDetail, EventError};

/// The event envelope - common metadata for all events.
///
/// Serialized as one flat JSON object, so a JSON-lines log holds one record
/// per line: `{"event_id":..,"occurred_at":..,"subject":..,"action":..,"detail":{..}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<P> {
    /// Globally ordered event identifier.
    pub event_id: EventId,

    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,

    /// Agent name or `agent/job` key the event is about.
    pub subject: String,

    /// Event-specific payload.
    #[serde(flatten)]
    pub detail: P,
}

impl<P> EventEnvelope<P> {
    /// Wraps a payload with a fresh ID and the current time.
    pub fn new(subject: impl Into<String>, detail: P) -> Self {
        Self {
            event_id: EventId::new(),
            occurred_at: Utc::now(),
            subject: subject.into(),
            detail,
        }
    }

    /// Overrides the occurrence time.
    pub fn with_occurred_at(mut self, ts: DateTime<Utc>) -> Self {
        self.occurred_at = ts;
        self
    }
}

/// An event produced by the allocation engine.
pub type AllocationEvent = EventEnvelope<EventDetail>;

impl AllocationEvent {
    /// The action kind of this event.
    pub fn action(&self) -> EventAction {
        self.detail.action()
    }

    /// Serializes the event as a single JSON line (no trailing newline).
    pub fn to_json_line(&self) -> Result<String, EventError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses one JSON line back into an event.
    pub fn from_json_line(line: &str) -> Result<Self, EventError> {
        Ok(serde_json::from_str(line)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CompletePayload, RegisterPayload};
    use hotplug_id::{AgentName, JobName};

    #[test]
    fn test_envelope_is_flat() {
        let event = AllocationEvent::new(
            "agentA",
            EventDetail::Register(RegisterPayload {
                agent: AgentName::parse("agentA").unwrap(),
                endpoint: "http://10.0.0.1:6000".to_string(),
                total_cores: 4,
                offset: 0,
                refreshed: false,
            }),
        );

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["subject"], "agentA");
        assert_eq!(value["action"], "register");
        assert_eq!(value["detail"]["total_cores"], 4);
        assert!(value["event_id"].as_str().unwrap().starts_with("evt_"));
    }

    #[test]
    fn test_json_line_parses_back() {
        let event = AllocationEvent::new(
            "agentA/job1",
            EventDetail::Complete(CompletePayload {
                agent: AgentName::parse("agentA").unwrap(),
                job: JobName::parse("job1").unwrap(),
                freed: vec![0, 1, 2, 3],
            }),
        );

        let line = event.to_json_line().unwrap();
        assert!(!line.contains('\n'));

        let parsed = AllocationEvent::from_json_line(&line).unwrap();
        assert_eq!(parsed, event);
        assert_eq!(parsed.action(), EventAction::Complete);
    }

    #[test]
    fn test_malformed_line_is_encode_error() {
        let err = AllocationEvent::from_json_line("{not json").unwrap_err();
        assert!(matches!(err, EventError::Encode(_)));
    }
}
