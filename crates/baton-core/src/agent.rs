//! Agent identity

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Environment variable the surrounding runtime uses to pass the agent identity
pub const AGENT_ID_ENV: &str = "BATON_AGENT_ID";

/// Unique agent identifier
///
/// Never empty: an operation that needs a caller identity fails with
/// [`Error::MissingContext`] rather than running under a made-up one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentId(String);

impl AgentId {
    /// Create a new agent ID
    ///
    /// # Errors
    ///
    /// Returns `MissingContext` if the id is empty or whitespace-only, and
    /// `ValidationError` if it starts or ends with whitespace.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::MissingContext(
                "agent id is required but was empty".to_string(),
            ));
        }
        if id.trim() != id {
            return Err(Error::ValidationError(format!(
                "agent id '{id}' has leading or trailing whitespace"
            )));
        }
        Ok(Self(id))
    }

    /// Read the calling agent's identity from `BATON_AGENT_ID`
    ///
    /// # Errors
    ///
    /// Returns `MissingContext` if the variable is unset or blank.
    pub fn from_env() -> Result<Self> {
        std::env::var(AGENT_ID_ENV)
            .map_err(|_| Error::MissingContext(format!("{AGENT_ID_ENV} is not set")))
            .and_then(Self::new)
    }

    /// Get the ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for AgentId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<AgentId> for String {
    fn from(id: AgentId) -> Self {
        id.0
    }
}

impl std::str::FromStr for AgentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}
