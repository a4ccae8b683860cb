//! Core data structures for collections, entries and reports.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ServiceError;

/// Content class of a collection. Decides MIME validation, conversion
/// planning and which technical metadata fields are maintained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Image,
    Audio,
    File,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Image => "image",
            ContentType::Audio => "audio",
            ContentType::File => "file",
        }
    }

    /// Closed allow-list per content type; `file` collections accept anything.
    pub fn permits_mime(&self, mime: &str) -> bool {
        match self {
            ContentType::Image => matches!(
                mime,
                "image/jpeg" | "image/png" | "image/gif" | "image/webp"
            ),
            ContentType::Audio => matches!(
                mime,
                "audio/mpeg"
                    | "audio/wav"
                    | "audio/flac"
                    | "audio/x-flac"
                    | "audio/opus"
                    | "audio/ogg"
                    | "application/ogg"
            ),
            ContentType::File => true,
        }
    }
}

/// Lifecycle state of an entry. Never writable through a user edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Processing,
    Ready,
    Error,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Processing => "processing",
            EntryStatus::Ready => "ready",
            EntryStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ServiceError> {
        match s {
            "processing" => Ok(EntryStatus::Processing),
            "ready" => Ok(EntryStatus::Ready),
            "error" => Ok(EntryStatus::Error),
            other => Err(ServiceError::Internal(format!(
                "unknown entry status: {}",
                other
            ))),
        }
    }
}

/// Value type of a collection-defined custom field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomFieldKind {
    Text,
    Integer,
    Real,
    Boolean,
}

/// Schema definition for one custom metadata field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomField {
    pub name: String,
    pub kind: CustomFieldKind,
}

/// Automated retention rules. Human-readable strings; "0" disables a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub interval: String,
    pub max_age: String,
    pub max_disk_space: String,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            interval: "1h".to_string(),
            max_age: "365d".to_string(),
            max_disk_space: "100G".to_string(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_no_conversion() -> String {
    "none".to_string()
}

/// Per-collection conversion and preview configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    #[serde(default = "default_true")]
    pub create_preview: bool,
    #[serde(default)]
    pub convert_to_jpeg: bool,
    /// Audio auto-conversion target: "none", "flac" or "opus".
    #[serde(default = "default_no_conversion")]
    pub auto_conversion: String,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            create_preview: true,
            convert_to_jpeg: false,
            auto_conversion: "none".to_string(),
        }
    }
}

/// Incrementally maintained statistics. Updated inside the same transaction
/// as the entry mutation that changes them.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CollectionStats {
    pub entry_count: i64,
    pub total_disk_space_bytes: i64,
}

/// A named, typed bucket of entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub name: String,
    pub content_type: ContentType,
    pub config: CollectionConfig,
    pub retention: RetentionPolicy,
    pub custom_fields: Vec<CustomField>,
    pub stats: CollectionStats,
    /// Unix seconds of the last eviction run, 0 if never.
    pub last_eviction_run: i64,
}

/// Field names owned by the entry core; custom fields may not shadow them.
const RESERVED_FIELD_NAMES: [&str; 11] = [
    "id",
    "collection",
    "timestamp",
    "filesize",
    "filename",
    "mime_type",
    "status",
    "width",
    "height",
    "duration_sec",
    "channels",
];

pub fn is_reserved_field(name: &str) -> bool {
    RESERVED_FIELD_NAMES.contains(&name)
}

impl Collection {
    /// Validates a custom-field map against this collection's schema.
    /// Unknown keys and ill-typed values are rejected; null clears a field.
    pub fn validate_custom_fields(&self, fields: &Map<String, Value>) -> Result<(), ServiceError> {
        for (name, value) in fields {
            let field = self
                .custom_fields
                .iter()
                .find(|f| f.name == *name)
                .ok_or_else(|| {
                    ServiceError::Validation(format!("unknown custom field: {}", name))
                })?;

            if value.is_null() {
                continue;
            }
            let ok = match field.kind {
                CustomFieldKind::Text => value.is_string(),
                CustomFieldKind::Integer => value.is_i64(),
                CustomFieldKind::Real => value.is_number(),
                CustomFieldKind::Boolean => value.is_boolean(),
            };
            if !ok {
                return Err(ServiceError::Validation(format!(
                    "custom field '{}' has the wrong type",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Creation payload for a collection.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    pub content_type: ContentType,
    #[serde(default)]
    pub config: Option<CollectionConfig>,
    #[serde(default)]
    pub retention: Option<RetentionPolicy>,
    #[serde(default)]
    pub custom_fields: Option<Vec<CustomField>>,
}

/// One stored object: fixed core plus the collection-defined extension set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub id: i64,
    pub timestamp: i64,
    pub filesize: i64,
    pub filename: String,
    pub mime_type: String,
    pub status: EntryStatus,
    pub width: i64,
    pub height: i64,
    pub duration_sec: f64,
    pub channels: i64,
    #[serde(flatten)]
    pub custom_fields: Map<String, Value>,
}

/// Insert payload used by the processors.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub timestamp: i64,
    pub filename: String,
    pub mime_type: String,
    pub status: EntryStatus,
    pub custom_fields: Map<String, Value>,
}

/// The user-editable projection of an entry. Everything system-owned
/// (id, timestamp, filesize, mime_type, status, derived fields) is absent
/// from this type on purpose.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserEntryPatch {
    pub filename: Option<String>,
    #[serde(flatten)]
    pub custom_fields: Map<String, Value>,
}

/// Technical metadata derived from the stored file.
#[derive(Debug, Clone, Copy, Default)]
pub struct TechMetadata {
    pub width: i64,
    pub height: i64,
    pub duration_sec: f64,
    pub channels: i64,
}

/// Internal-only projection written by the asynchronous processor when the
/// pipeline finishes.
#[derive(Debug, Clone)]
pub struct EntryCompletion {
    pub filesize: i64,
    pub mime_type: String,
    pub filename: String,
    pub tech: TechMetadata,
}

/// Provisional record returned with HTTP 202 while processing continues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingEntry {
    pub id: i64,
    pub timestamp: i64,
    pub collection: String,
    pub status: EntryStatus,
    pub custom_fields: Map<String, Value>,
}

/// Bulk deletion request body.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkDeleteRequest {
    pub ids: Vec<i64>,
}

/// Result of one bulk deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkDeleteReport {
    pub collection: String,
    pub entries_deleted: u64,
    pub bytes_freed: u64,
    pub message: String,
}

/// Result of one eviction run for one collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvictionReport {
    pub collection: String,
    pub entries_deleted: u64,
    pub bytes_freed: u64,
    pub message: String,
}

impl EvictionReport {
    pub fn new(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            ..Default::default()
        }
    }
}

/// General service information.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub service_name: String,
    pub version: String,
    pub uptime_since: chrono::DateTime<chrono::Utc>,
    pub ffmpeg: bool,
    pub ffprobe: bool,
}
