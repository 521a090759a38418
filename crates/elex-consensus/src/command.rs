//! Commands replicated through the consensus log

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConsensusError, ConsensusResult};

/// A state machine command
///
/// Serialises as `{"type": "set", "key": .., "value": ..}` or
/// `{"type": "delete", "key": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Store `value` under `key`
    Set { key: String, value: Value },
    /// Remove `key`
    Delete { key: String },
}

impl Command {
    /// Build a `set` command
    pub fn set(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Command::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Build a `delete` command
    pub fn delete(key: impl Into<String>) -> Self {
        Command::Delete { key: key.into() }
    }

    /// Key the command targets
    pub fn key(&self) -> &str {
        match self {
            Command::Set { key, .. } | Command::Delete { key } => key,
        }
    }

    /// Reject commands that must never reach the log
    pub fn validate(&self) -> ConsensusResult<()> {
        if self.key().trim().is_empty() {
            return Err(ConsensusError::InvalidCommand(
                "command key cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse a command from its JSON form, validating it
    pub fn from_json(value: Value) -> ConsensusResult<Self> {
        let command: Command = serde_json::from_value(value)
            .map_err(|e| ConsensusError::InvalidCommand(e.to_string()))?;
        command.validate()?;
        Ok(command)
    }
}
