//! Static instruction templates and their content hashes.
//!
//! The whole template is one atomic cache key: its SHA-256 identifies the
//! provider-side prefix. A version label is pinned to the first hash it is
//! registered with, and any later content under the same label is rejected.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use warmprompt_core::error::CompositionError;

use crate::token;

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// An immutable, hashed instruction template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticTemplate {
    version: String,
    content: Arc<str>,
    sha256: String,
}

impl StaticTemplate {
    /// Hash `content` exactly as given. No normalisation is applied.
    pub fn new(
        version: impl Into<String>,
        content: impl Into<Arc<str>>,
    ) -> Result<Self, CompositionError> {
        let version = version.into();
        let content: Arc<str> = content.into();
        if content.trim().is_empty() {
            return Err(CompositionError::EmptyTemplate(version));
        }
        let sha256 = sha256_hex(content.as_bytes());
        Ok(Self {
            version,
            content,
            sha256,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    /// Estimated tokens of the static block built from this template.
    pub fn token_count(&self) -> usize {
        token::BLOCK_OVERHEAD + token::estimate_tokens(&self.content)
    }

    /// Check the content against a hash pinned out of band (e.g. in config).
    pub fn verify_pinned(&self, expected_sha256: &str) -> Result<(), CompositionError> {
        if self.sha256.eq_ignore_ascii_case(expected_sha256.trim()) {
            Ok(())
        } else {
            Err(CompositionError::PrefixHashMismatch {
                version: self.version.clone(),
                expected: expected_sha256.trim().to_lowercase(),
                actual: self.sha256.clone(),
            })
        }
    }
}

/// Version label → pinned SHA-256.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    pinned: RwLock<HashMap<String, String>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template, pinning its hash on first sight.
    ///
    /// Re-registering identical bytes is a no-op; different bytes under a
    /// known version fail with [`CompositionError::PrefixHashMismatch`].
    pub fn register(
        &self,
        version: impl Into<String>,
        content: impl Into<Arc<str>>,
    ) -> Result<StaticTemplate, CompositionError> {
        let template = StaticTemplate::new(version, content)?;
        let mut pinned = self.pinned.write().unwrap_or_else(|e| e.into_inner());

        match pinned.get(template.version()) {
            Some(expected) if expected != template.sha256() => {
                warn!(
                    version = template.version(),
                    expected = %expected,
                    actual = template.sha256(),
                    "Template content changed under a pinned version"
                );
                Err(CompositionError::PrefixHashMismatch {
                    version: template.version().to_string(),
                    expected: expected.clone(),
                    actual: template.sha256().to_string(),
                })
            }
            Some(_) => Ok(template),
            None => {
                debug!(
                    version = template.version(),
                    sha256 = template.sha256(),
                    tokens = template.token_count(),
                    "Template registered"
                );
                pinned.insert(template.version().to_string(), template.sha256().to_string());
                Ok(template)
            }
        }
    }

    /// Verify that `rendered` is byte-identical to what `version` was pinned to.
    pub fn verify(&self, version: &str, rendered: &str) -> Result<(), CompositionError> {
        let actual = sha256_hex(rendered.as_bytes());
        let pinned = self.pinned.read().unwrap_or_else(|e| e.into_inner());
        match pinned.get(version) {
            Some(expected) if *expected == actual => Ok(()),
            Some(expected) => Err(CompositionError::PrefixHashMismatch {
                version: version.to_string(),
                expected: expected.clone(),
                actual,
            }),
            None => Err(CompositionError::PrefixHashMismatch {
                version: version.to_string(),
                expected: "<unregistered>".into(),
                actual,
            }),
        }
    }

    pub fn pinned_hash(&self, version: &str) -> Option<String> {
        self.pinned
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(version)
            .cloned()
    }
}
