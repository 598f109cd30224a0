//! Typed names and IDs used across the controller.

use crate::{define_id, define_name};

// =============================================================================
// Names
// =============================================================================

define_name!(AgentName, "agent name");
define_name!(JobName, "job name");

// =============================================================================
// Events and requests
// =============================================================================

define_id!(EventId, "evt");
define_id!(RequestId, "req");

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IdError;
    use proptest::prelude::*;

    #[test]
    fn test_agent_name_accepts_common_labels() {
        for raw in ["agentA", "vm-1", "host_2.rack3", "A"] {
            let name: AgentName = raw.parse().unwrap();
            assert_eq!(name.as_str(), raw);
        }
    }

    #[test]
    fn test_name_empty() {
        let err = JobName::parse("").unwrap_err();
        assert!(err.is_empty());
        assert_eq!(err.to_string(), "job name cannot be empty");
    }

    #[test]
    fn test_name_too_long() {
        let raw = "j".repeat(65);
        assert!(matches!(
            JobName::parse(&raw),
            Err(IdError::TooLong { len: 65, max: 64, .. })
        ));
    }

    #[test]
    fn test_name_rejects_separator_characters() {
        assert!(matches!(
            AgentName::parse("agent|A"),
            Err(IdError::InvalidCharacter { ch: '|', .. })
        ));
        assert!(matches!(
            JobName::parse("job 1"),
            Err(IdError::InvalidCharacter { ch: ' ', .. })
        ));
    }

    #[test]
    fn test_name_deserialize_validates() {
        let ok: AgentName = serde_json::from_str("\"agentB\"").unwrap();
        assert_eq!(ok.to_string(), "agentB");

        let err = serde_json::from_str::<AgentName>("\"bad/name\"");
        assert!(err.is_err());
    }

    #[test]
    fn test_event_id_prefix_and_parse() {
        let id = EventId::new();
        let s = id.to_string();
        assert!(s.starts_with("evt_"));
        assert_eq!(s.parse::<EventId>().unwrap(), id);
    }

    #[test]
    fn test_event_id_invalid_prefix() {
        assert!(matches!(
            "job_01HV4Z2WQXKJNM8GPQY6VBKC3D".parse::<EventId>(),
            Err(IdError::InvalidPrefix { .. })
        ));
        assert!(matches!(
            "evt01HV4Z2WQXKJNM8GPQY6VBKC3D".parse::<EventId>(),
            Err(IdError::MissingSeparator)
        ));
    }

    #[test]
    fn test_request_id_distinct_prefix() {
        let id = RequestId::new();
        assert!(id.to_string().starts_with("req_"));
        assert!(id.to_string().parse::<EventId>().is_err());
    }

    #[test]
    fn test_event_ids_sortable() {
        let id1 = EventId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = EventId::new();
        assert!(id1 < id2);
    }

    proptest! {
        #[test]
        fn prop_valid_names_parse(raw in "[A-Za-z0-9._-]{1,64}") {
            let name = JobName::parse(&raw).unwrap();
            prop_assert_eq!(name.as_str(), raw.as_str());
        }

        #[test]
        fn prop_names_with_foreign_chars_rejected(
            prefix in "[a-z]{0,8}",
            bad in "[ /|:@#]",
            suffix in "[a-z]{0,8}",
        ) {
            let raw = format!("{prefix}{bad}{suffix}");
            prop_assert!(AgentName::parse(&raw).is_err());
        }
    }
}
