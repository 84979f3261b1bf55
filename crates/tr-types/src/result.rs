use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::TerminalStatus;

/// A step's terminal outcome (§3 "Result" entity).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_name: String,
    pub status: TerminalStatus,
    pub message: String,
    pub error_cause: Option<String>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl StepResult {
    pub fn ok(step_name: impl Into<String>, message: impl Into<String>, duration: Duration) -> Self {
        Self {
            step_name: step_name.into(),
            status: TerminalStatus::Ok,
            message: message.into(),
            error_cause: None,
            duration,
        }
    }

    pub fn warn(step_name: impl Into<String>, message: impl Into<String>, error_cause: String, duration: Duration) -> Self {
        Self {
            step_name: step_name.into(),
            status: TerminalStatus::Warn,
            message: message.into(),
            error_cause: Some(error_cause),
            duration,
        }
    }

    pub fn error(step_name: impl Into<String>, message: impl Into<String>, error_cause: String, duration: Duration) -> Self {
        Self {
            step_name: step_name.into(),
            status: TerminalStatus::Error,
            message: message.into(),
            error_cause: Some(error_cause),
            duration,
        }
    }

    pub fn skipped(step_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            status: TerminalStatus::Skipped,
            message: message.into(),
            error_cause: None,
            duration: Duration::ZERO,
        }
    }
}

mod duration_ms {
    use std::time::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u128(d.as_millis())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
