use crate::CoreError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    #[default]
    Uninitialized,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Uninitialized => write!(f, "uninitialized"),
            EngineState::Starting => write!(f, "starting"),
            EngineState::Running => write!(f, "running"),
            EngineState::Stopping => write!(f, "stopping"),
            EngineState::Stopped => write!(f, "stopped"),
        }
    }
}

pub fn validate_transition(from: EngineState, to: EngineState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (
            EngineState::Uninitialized | EngineState::Stopped,
            EngineState::Starting
        ) | (
            EngineState::Starting,
            EngineState::Running | EngineState::Stopping | EngineState::Stopped
        ) | (EngineState::Running, EngineState::Stopping)
            | (EngineState::Stopping, EngineState::Stopped)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
