//! Audit vocabulary and the record hash-chain function.

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

/// Fixed-width UTC RFC 3339 layout, so stored timestamps sort lexically.
const TIMESTAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z");

/// Format a timestamp the way audit records persist it.
pub fn format_timestamp(ts: OffsetDateTime) -> crate::Result<String> {
    ts.to_offset(UtcOffset::UTC)
        .format(TIMESTAMP_FORMAT)
        .map_err(|e| crate::Error::InvalidTimestamp(e.to_string()))
}

/// Parse a persisted audit timestamp.
pub fn parse_timestamp(s: &str) -> crate::Result<OffsetDateTime> {
    OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339)
        .map_err(|e| crate::Error::InvalidTimestamp(format!("{s}: {e}")))
}

/// Operation recorded by an audit record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOperation {
    Store,
    Retrieve,
    Repair,
    Verify,
    Migrate,
    Update,
    Delete,
}

/// Coarse grouping used by audit views and exports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditCategory {
    Access,
    Crud,
    Maintenance,
}

/// Security level of an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Standard,
    Sensitive,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "ACCESS",
            Self::Crud => "CRUD",
            Self::Maintenance => "MAINTENANCE",
        }
    }
}

impl SecurityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Sensitive => "sensitive",
        }
    }
}

impl AuditOperation {
    pub const ALL: [AuditOperation; 7] = [
        Self::Store,
        Self::Retrieve,
        Self::Repair,
        Self::Verify,
        Self::Migrate,
        Self::Update,
        Self::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Store => "store",
            Self::Retrieve => "retrieve",
            Self::Repair => "repair",
            Self::Verify => "verify",
            Self::Migrate => "migrate",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    pub fn category(&self) -> AuditCategory {
        match self {
            Self::Retrieve => AuditCategory::Access,
            Self::Store | Self::Update | Self::Delete => AuditCategory::Crud,
            Self::Repair | Self::Verify | Self::Migrate => AuditCategory::Maintenance,
        }
    }

    pub fn security_level(&self) -> SecurityLevel {
        match self {
            Self::Update | Self::Delete | Self::Migrate => SecurityLevel::Sensitive,
            _ => SecurityLevel::Standard,
        }
    }
}

impl fmt::Display for AuditOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditOperation {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| crate::Error::InvalidAuditOperation(s.to_string()))
    }
}

/// Outcome recorded by an audit record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Success,
    Failure,
}

impl AuditResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

impl fmt::Display for AuditResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditResult {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            other => Err(crate::Error::InvalidAuditResult(other.to_string())),
        }
    }
}

/// Fields covered by an audit record's integrity hash.
///
/// `timestamp` is the exact persisted text; re-formatting it would change the hash.
#[derive(Clone, Copy, Debug)]
pub struct ChainFields<'a> {
    pub id: i64,
    pub prev_hash: Option<&'a str>,
    pub actor_id: &'a str,
    pub operation: &'a str,
    pub subject_key: &'a str,
    pub result: &'a str,
    pub timestamp: &'a str,
    pub detail: Option<&'a str>,
}

impl ChainFields<'_> {
    /// Compute the integrity hash.
    ///
    /// Every field is length-prefixed so that moving bytes between adjacent
    /// fields changes the digest.
    pub fn integrity_hash(&self) -> ContentHash {
        let mut hasher = Sha256::new();
        hasher.update(self.id.to_be_bytes());
        for field in [
            self.prev_hash.unwrap_or(""),
            self.actor_id,
            self.operation,
            self.subject_key,
            self.result,
            self.timestamp,
        ] {
            absorb(&mut hasher, Some(field));
        }
        absorb(&mut hasher, self.detail);
        ContentHash::from_bytes(hasher.finalize().into())
    }
}

fn absorb(hasher: &mut Sha256, field: Option<&str>) {
    match field {
        Some(value) => {
            hasher.update([1u8]);
            hasher.update((value.len() as u64).to_be_bytes());
            hasher.update(value.as_bytes());
        }
        None => hasher.update([0u8]),
    }
}
