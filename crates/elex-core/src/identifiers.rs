//! Validated identifier types shared by every coordination crate
//!
//! Node, agent and category identifiers are distinct newtypes so a
//! `Category` can never be passed where an `AgentId` is expected. All of
//! them share the same validation rules:
//!
//! - Non-empty, at most 128 characters
//! - No leading or trailing whitespace
//! - Only alphanumeric characters, hyphens (`-`), underscores (`_`),
//!   dots (`.`) and colons (`:`)
//!
//! Feature codes (`FAJ 121 3094`) carry spaces and use their own, looser
//! rule set.
//!
//! # Examples
//!
//! ```rust
//! use elex_core::identifiers::{AgentId, Category};
//!
//! let agent = AgentId::parse("agent-42").unwrap();
//! let category = Category::parse("energy-saving").unwrap();
//! assert_eq!(agent.as_str(), "agent-42");
//! assert!(Category::parse("").is_err());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length for all identifier types
pub const MAX_ID_LENGTH: usize = 128;

/// Error type for identifier validation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdValidationError {
    /// The identifier string is empty
    #[error("Identifier cannot be empty")]
    Empty,
    /// The identifier has leading or trailing whitespace
    #[error("Identifier cannot have leading or trailing whitespace")]
    LeadingTrailingWhitespace,
    /// The identifier contains invalid characters
    #[error(
        "Identifier can only contain alphanumeric characters, hyphens, underscores, dots and colons"
    )]
    InvalidCharacters,
    /// The identifier exceeds the maximum length
    #[error("Identifier too long ({length} chars, max {max})")]
    TooLong { length: usize, max: usize },
}

/// Validator for identifier strings
pub struct IdValidator;

impl IdValidator {
    /// Validate a node, agent or category identifier.
    pub fn validate(id: &str) -> Result<&str, IdValidationError> {
        Self::validate_shape(id)?;

        if !id
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
        {
            return Err(IdValidationError::InvalidCharacters);
        }

        Ok(id)
    }

    /// Validate a feature code. Inner spaces are allowed.
    pub fn validate_feature_code(code: &str) -> Result<&str, IdValidationError> {
        Self::validate_shape(code)?;

        if code.chars().any(|c| c.is_control()) {
            return Err(IdValidationError::InvalidCharacters);
        }

        Ok(code)
    }

    fn validate_shape(id: &str) -> Result<(), IdValidationError> {
        if id.trim().is_empty() {
            return Err(IdValidationError::Empty);
        }

        if id != id.trim() {
            return Err(IdValidationError::LeadingTrailingWhitespace);
        }

        if id.len() > MAX_ID_LENGTH {
            return Err(IdValidationError::TooLong {
                length: id.len(),
                max: MAX_ID_LENGTH,
            });
        }

        Ok(())
    }
}

macro_rules! validated_id {
    ($(#[$meta:meta])* $name:ident, $validate:path) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Parse and validate an identifier from a string
            pub fn parse(id: impl AsRef<str>) -> Result<Self, IdValidationError> {
                $validate(id.as_ref()).map(|s| Self(s.to_string()))
            }

            /// Get the identifier as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Create an identifier without validation (for testing only)
            #[doc(hidden)]
            pub fn new_unchecked(id: impl Into<String>) -> Self {
                Self(id.into())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdValidationError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::parse(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

validated_id!(
    /// Identifier of a coordinator process (a Raft replica and gossip peer)
    NodeId,
    IdValidator::validate
);

validated_id!(
    /// Identifier of a feature agent in the swarm
    AgentId,
    IdValidator::validate
);

validated_id!(
    /// A partition of the agent population sharing one consensus group
    Category,
    IdValidator::validate
);

validated_id!(
    /// Feature code an agent is specialised for, e.g. `FAJ 121 3094`
    FajCode,
    IdValidator::validate_feature_code
);
