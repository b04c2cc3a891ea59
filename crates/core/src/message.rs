//! Message block domain types.
//!
//! A request to the model is an ordered sequence of [`MessageBlock`]s.
//! Cache-eligible blocks always come first so the provider can reuse a
//! single contiguous prefix across requests.

use serde::{Deserialize, Serialize};

/// The role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions and injected context
    System,
    /// The end user
    User,
    /// The model
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single typed block of a composed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBlock {
    /// Who the block speaks as
    pub role: Role,

    /// The text content
    pub content: String,

    /// Whether this block belongs to the provider-cacheable prefix
    #[serde(default)]
    pub cache_eligible: bool,
}

impl MessageBlock {
    /// A cache-eligible system block (the static prefix).
    pub fn cached_system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            cache_eligible: true,
        }
    }

    /// A non-cacheable system block carrying per-request data.
    pub fn dynamic_system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            cache_eligible: false,
        }
    }

    /// The final user query block.
    pub fn user_query(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            cache_eligible: false,
        }
    }
}

/// One prior turn of a conversation, as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: Role,
    pub content: String,
}

impl HistoryTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}
