//! The stable invocation contract between any caller and this layer.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Error;
use crate::message::HistoryTurn;

/// A single tool invocation.
///
/// Only `message` is required. Every other field defaults to empty, whether
/// it is absent from the payload or explicitly `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationRequest {
    /// The user's query text
    pub message: String,

    /// Prior turns, oldest first
    #[serde(default, deserialize_with = "null_as_default")]
    pub conversation_history: Vec<HistoryTurn>,

    /// Order data supplied by the orchestrator
    #[serde(default, deserialize_with = "null_as_default")]
    pub order_context: serde_json::Map<String, serde_json::Value>,

    /// User/session identifiers and attributes
    #[serde(default, deserialize_with = "null_as_default")]
    pub user_metadata: serde_json::Map<String, serde_json::Value>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl ToolInvocationRequest {
    /// Create a request carrying only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_history(mut self, history: Vec<HistoryTurn>) -> Self {
        self.conversation_history = history;
        self
    }

    pub fn with_order_context(
        mut self,
        order_context: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        self.order_context = order_context;
        self
    }

    pub fn with_user_metadata(
        mut self,
        user_metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        self.user_metadata = user_metadata;
        self
    }

    /// Reject requests that cannot be served.
    pub fn validate(&self) -> Result<(), Error> {
        if self.message.trim().is_empty() {
            return Err(Error::InvalidRequest("message must not be empty".into()));
        }
        Ok(())
    }
}
