//! Core data models shared by every JobSight layer.
//!
//! These types describe the job identifier used as the merge key, the
//! ternary PMS classification, the status record stored per job, and the
//! wire shapes exchanged with the remote store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest accepted job identifier.
pub const MAX_ENTITY_ID_LEN: usize = 64;

/// Rejected job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityIdError {
    #[error("job id must not be empty")]
    Empty,
    #[error("job id is longer than {MAX_ENTITY_ID_LEN} characters")]
    TooLong,
    #[error("job id contains invalid character {0:?}")]
    InvalidChar(char),
    #[error("no job id found in url: {0}")]
    NoIdInUrl(String),
}

/// Stable, opaque identifier of a job (e.g. a job number).
///
/// Used as the merge key in the local cache and in the remote store, so
/// it is validated once at the edge and carried around as a newtype.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    pub fn new(raw: &str) -> Result<Self, EntityIdError> {
        if raw.is_empty() {
            return Err(EntityIdError::Empty);
        }
        if raw.chars().count() > MAX_ENTITY_ID_LEN {
            return Err(EntityIdError::TooLong);
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(EntityIdError::InvalidChar(bad));
        }
        Ok(Self(raw.to_string()))
    }

    /// Extract the job id from a job page URL (`...job.aspx?ID=12345`).
    pub fn from_job_url(url: &str) -> Result<Self, EntityIdError> {
        lazy_static::lazy_static! {
            static ref JOB_ID_RE: Regex = Regex::new(r"(?i)[?&]ID=(\d+)").unwrap();
        }
        JOB_ID_RE
            .captures(url)
            .and_then(|c| c.get(1))
            .map(|m| Self(m.as_str().to_string()))
            .ok_or_else(|| EntityIdError::NoIdInUrl(url.to_string()))
    }

    /// Parse either a bare job id or a job page URL.
    pub fn parse_id_or_url(input: &str) -> Result<Self, EntityIdError> {
        let trimmed = input.trim();
        if trimmed.contains("://") || trimmed.contains('?') {
            Self::from_job_url(trimmed)
        } else {
            Self::new(trimmed)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntityId {
    type Err = EntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for EntityId {
    type Error = EntityIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Ternary PMS classification of a job.
///
/// `Unknown` means no local or remote data exists and the classifier has
/// not run yet; the classifier itself never produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Present,
    Absent,
    Unknown,
}

impl Classification {
    pub fn from_flag(has_pms: bool) -> Self {
        if has_pms {
            Self::Present
        } else {
            Self::Absent
        }
    }

    /// `Some(true)` / `Some(false)` for a known classification.
    pub fn as_flag(self) -> Option<bool> {
        match self {
            Self::Present => Some(true),
            Self::Absent => Some(false),
            Self::Unknown => None,
        }
    }

    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Provenance of a status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusSource {
    Detected,
    UserOverride,
}

impl StatusSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Detected => "detected",
            Self::UserOverride => "user_override",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "detected" => Some(Self::Detected),
            "user_override" => Some(Self::UserOverride),
            _ => None,
        }
    }
}

/// What caused a local status write.
///
/// Both detection variants persist with [`StatusSource::Detected`]; only
/// [`WriteOrigin::ExplicitDetect`] may replace a user override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    /// Classifier run triggered by rendering or refreshing a page.
    PassiveScan,
    /// Classifier run the user asked for ("Auto").
    ExplicitDetect,
    /// Manual "Has PMS" / "No PMS".
    UserOverride,
}

impl WriteOrigin {
    pub fn source(self) -> StatusSource {
        match self {
            Self::PassiveScan | Self::ExplicitDetect => StatusSource::Detected,
            Self::UserOverride => StatusSource::UserOverride,
        }
    }
}

/// The last-known classification of one job, with provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub entity_id: EntityId,
    pub has_pms: bool,
    pub source: StatusSource,
    pub updated_at: DateTime<Utc>,
}

impl StatusRecord {
    pub fn classification(&self) -> Classification {
        Classification::from_flag(self.has_pms)
    }
}

/// Image attached to a job page. Opaque to the sync layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobImage {
    pub url: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub asset_tag: String,
}

/// Everything the local cache keeps under one job id.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CacheEntry {
    pub status: Option<StatusRecord>,
    pub images: Option<Vec<JobImage>>,
    pub images_updated_at: Option<DateTime<Utc>>,
    /// Set when the status was written locally in the current session.
    pub session_write: bool,
    /// Set on entries loaded from durable storage until the remote row has
    /// been consulted in the current session.
    pub unverified: bool,
}

/// A row as returned by the remote store.
///
/// Status and images are merged independently, so each group carries its
/// own timestamp. `updated_at` is the newest write to any group; rows that
/// predate the per-group columns fall back to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: EntityId,
    #[serde(default)]
    pub has_pms: Option<bool>,
    #[serde(default)]
    pub source: Option<StatusSource>,
    #[serde(default)]
    pub status_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub images: Option<Vec<JobImage>>,
    #[serde(default)]
    pub images_updated_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl RemoteRecord {
    /// A new row holding exactly what `patch` carries.
    pub fn from_patch(patch: &RemotePatch) -> Self {
        Self {
            id: patch.id.clone(),
            has_pms: patch.has_pms,
            source: patch.source,
            status_updated_at: patch.status_updated_at,
            images: patch.images.clone(),
            images_updated_at: patch.images_updated_at,
            updated_at: patch.updated_at,
        }
    }

    /// When the status fields were last written.
    pub fn status_at(&self) -> DateTime<Utc> {
        self.status_updated_at.unwrap_or(self.updated_at)
    }

    /// When the images were last written.
    pub fn images_at(&self) -> DateTime<Utc> {
        self.images_updated_at.unwrap_or(self.updated_at)
    }

    /// The status carried by this row, if it has one.
    ///
    /// Rows written before provenance was tracked have no `source`; they
    /// are treated as detections.
    pub fn status(&self) -> Option<StatusRecord> {
        self.has_pms.map(|has_pms| StatusRecord {
            entity_id: self.id.clone(),
            has_pms,
            source: self.source.unwrap_or(StatusSource::Detected),
            updated_at: self.status_at(),
        })
    }
}

/// A partial upsert sent to the remote store.
///
/// Only the fields being changed are serialized, so a status push never
/// clobbers images and an image push never clobbers the status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemotePatch {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_pms: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<StatusSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<JobImage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images_updated_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl RemotePatch {
    pub fn status(record: &StatusRecord) -> Self {
        Self {
            id: record.entity_id.clone(),
            has_pms: Some(record.has_pms),
            source: Some(record.source),
            status_updated_at: Some(record.updated_at),
            images: None,
            images_updated_at: None,
            updated_at: record.updated_at,
        }
    }

    pub fn images(id: &EntityId, images: Vec<JobImage>, updated_at: DateTime<Utc>) -> Self {
        Self {
            id: id.clone(),
            has_pms: None,
            source: None,
            status_updated_at: None,
            images: Some(images),
            images_updated_at: Some(updated_at),
            updated_at,
        }
    }

    pub fn has_status(&self) -> bool {
        self.has_pms.is_some() || self.source.is_some()
    }

    /// Timestamp the status fields are judged by.
    pub fn status_at(&self) -> DateTime<Utc> {
        self.status_updated_at.unwrap_or(self.updated_at)
    }

    /// Timestamp the images are judged by.
    pub fn images_at(&self) -> DateTime<Utc> {
        self.images_updated_at.unwrap_or(self.updated_at)
    }
}
