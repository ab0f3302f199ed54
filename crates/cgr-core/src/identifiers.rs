// crates/cgr-core/src/identifiers.rs
// ============================================================================
// Module: Constitutional Governance Runtime Identifiers
// Description: Canonical opaque identifiers shared across every component.
// Purpose: Provide strongly typed, serializable identifiers with stable wire
//          forms so tenant/actor/trace/event/batch ids are never confused.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Identifiers here are opaque newtypes over `String`. None of them are
//! normalized or case-folded; callers are expected to pass through whatever
//! the upstream caller or content-addressing scheme produced. Construction
//! rejects the empty string, which can never be a valid identifier for any
//! of these types.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Identifier Error
// ============================================================================

/// Error returned when constructing an identifier from an invalid string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("identifier must not be empty")]
pub struct EmptyIdentifierError;

// ============================================================================
// SECTION: Identifier Macro
// ============================================================================

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an identifier from an owned string.
            ///
            /// # Errors
            ///
            /// Returns [`EmptyIdentifierError`] when `value` is empty.
            pub fn new(value: impl Into<String>) -> Result<Self, EmptyIdentifierError> {
                let value = value.into();
                if value.is_empty() {
                    return Err(EmptyIdentifierError);
                }
                Ok(Self(value))
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes the identifier, returning the inner string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

opaque_id! {
    /// Tenant identifier scoping every envelope, event, and audit record.
    ///
    /// # Invariants
    /// - Non-empty; opaque beyond that.
    TenantId
}

opaque_id! {
    /// Actor identifier (human, agent, or service) that originated an action.
    ///
    /// # Invariants
    /// - Non-empty; opaque beyond that.
    ActorId
}

opaque_id! {
    /// Envelope identifier. Immutable once assigned (§3 Envelope invariants).
    ///
    /// # Invariants
    /// - Non-empty; never reassigned after creation.
    EnvelopeId
}

opaque_id! {
    /// Trace identifier generated at guardrail pipeline entry if absent.
    ///
    /// # Invariants
    /// - Non-empty; stable for the lifetime of one pipeline traversal.
    TraceId
}

opaque_id! {
    /// Content-addressed constitutional event identifier.
    ///
    /// # Invariants
    /// - Non-empty; derived deterministically from event contents.
    EventId
}

impl EventId {
    /// Builds an event id directly from a hash digest's hex text.
    ///
    /// Infallible: a [`crate::hashing::HashDigest`] hex string is always
    /// non-empty, so this bypasses the [`EmptyIdentifierError`] check that
    /// [`EventId::new`] performs for caller-supplied strings.
    #[must_use]
    pub fn from_digest(digest: &crate::hashing::HashDigest) -> Self {
        Self(digest.as_str().to_string())
    }
}

opaque_id! {
    /// Merkle batch identifier of the form `batch_<counter>_<unix_seconds>`.
    ///
    /// # Invariants
    /// - Non-empty; unique per ledger instance.
    BatchId
}

opaque_id! {
    /// HITL approval request identifier.
    ///
    /// # Invariants
    /// - Non-empty; stable for the request's lifetime.
    ApprovalRequestId
}

opaque_id! {
    /// HITL chain-local audit entry identifier (uuid).
    ///
    /// # Invariants
    /// - Non-empty; unique per audit entry.
    HitlEntryId
}

opaque_id! {
    /// Approval chain definition identifier (versioned).
    ///
    /// # Invariants
    /// - Non-empty; stable across chain revisions that share lineage.
    ChainDefinitionId
}

/// 16-character lowercase hexadecimal constitutional anchor value.
///
/// # Invariants
/// - Exactly 16 characters, all ASCII hex digits, lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConstitutionalHash(String);

/// Error returned when a constitutional hash fails shape validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("constitutional hash must be 16 lowercase hex characters, got {0:?}")]
pub struct InvalidConstitutionalHash(pub String);

impl ConstitutionalHash {
    /// Creates a constitutional hash, validating its shape.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidConstitutionalHash`] when `value` is not 16 lowercase
    /// hex characters.
    pub fn new(value: impl Into<String>) -> Result<Self, InvalidConstitutionalHash> {
        let value = value.into();
        let valid = value.len() == 16 && value.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase());
        if !valid {
            return Err(InvalidConstitutionalHash(value));
        }
        Ok(Self(value))
    }

    /// Returns the hash as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConstitutionalHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Test-only assertions are permitted."
)]
mod tests {
    use super::ConstitutionalHash;
    use super::TenantId;

    #[test]
    fn rejects_empty_identifier() {
        assert!(TenantId::new("").is_err());
    }

    #[test]
    fn accepts_opaque_identifier() {
        let id = TenantId::new("tenant-42").expect("valid");
        assert_eq!(id.as_str(), "tenant-42");
        assert_eq!(id.to_string(), "tenant-42");
    }

    #[test]
    fn constitutional_hash_requires_sixteen_lowercase_hex() {
        assert!(ConstitutionalHash::new("abcdef0123456789").is_ok());
        assert!(ConstitutionalHash::new("ABCDEF0123456789").is_err());
        assert!(ConstitutionalHash::new("short").is_err());
        assert!(ConstitutionalHash::new("zzzzzzzzzzzzzzzz").is_err());
    }
}
