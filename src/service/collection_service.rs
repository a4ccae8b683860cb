//! Collection lifecycle and validation.

use log::info;
use std::collections::HashSet;

use super::blocking;
use super::ingest::PipelineContext;
use crate::error::ServiceError;
use crate::models::{
    is_reserved_field, Collection, CollectionSpec, CollectionStats, ContentType,
};
use crate::util::{parse_duration, parse_size, SAFE_NAME};

const AUTO_CONVERSION_TARGETS: [&str; 3] = ["none", "flac", "opus"];

pub async fn create_collection(
    ctx: &PipelineContext,
    spec: CollectionSpec,
) -> Result<Collection, ServiceError> {
    let collection = validate_spec(spec)?;
    let repo = ctx.repo.clone();
    let created = collection.clone();
    blocking(move || repo.create_collection(&created)).await?;
    info!(
        "Collection '{}' created (type {})",
        collection.name,
        collection.content_type.as_str()
    );
    Ok(collection)
}

pub async fn list_collections(ctx: &PipelineContext) -> Result<Vec<Collection>, ServiceError> {
    let repo = ctx.repo.clone();
    blocking(move || repo.list_collections()).await
}

fn validate_spec(spec: CollectionSpec) -> Result<Collection, ServiceError> {
    if !SAFE_NAME.is_match(&spec.name) {
        return Err(ServiceError::Validation(format!(
            "collection name '{}' must match [A-Za-z0-9_]+",
            spec.name
        )));
    }

    let config = spec.config.unwrap_or_default();
    if !AUTO_CONVERSION_TARGETS.contains(&config.auto_conversion.as_str()) {
        return Err(ServiceError::Validation(format!(
            "auto_conversion must be one of none/flac/opus, got '{}'",
            config.auto_conversion
        )));
    }
    if config.auto_conversion != "none" && spec.content_type != ContentType::Audio {
        return Err(ServiceError::Validation(
            "auto_conversion applies to audio collections only".to_string(),
        ));
    }

    // Fail at creation time rather than in the first eviction run.
    let retention = spec.retention.unwrap_or_default();
    parse_duration(&retention.interval)?;
    parse_duration(&retention.max_age)?;
    parse_size(&retention.max_disk_space)?;

    let custom_fields = spec.custom_fields.unwrap_or_default();
    let mut seen = HashSet::new();
    for field in &custom_fields {
        if !SAFE_NAME.is_match(&field.name) {
            return Err(ServiceError::Validation(format!(
                "custom field name '{}' must match [A-Za-z0-9_]+",
                field.name
            )));
        }
        if is_reserved_field(&field.name) {
            return Err(ServiceError::Validation(format!(
                "custom field name '{}' is reserved",
                field.name
            )));
        }
        if !seen.insert(field.name.as_str()) {
            return Err(ServiceError::Validation(format!(
                "duplicate custom field name '{}'",
                field.name
            )));
        }
    }

    Ok(Collection {
        name: spec.name,
        content_type: spec.content_type,
        config,
        retention,
        custom_fields,
        stats: CollectionStats::default(),
        last_eviction_run: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CollectionConfig, CustomField, CustomFieldKind, RetentionPolicy};

    fn spec(name: &str) -> CollectionSpec {
        CollectionSpec {
            name: name.to_string(),
            content_type: ContentType::File,
            config: None,
            retention: None,
            custom_fields: None,
        }
    }

    #[test]
    fn test_defaults_applied() {
        let col = validate_spec(spec("docs")).unwrap();
        assert!(col.config.create_preview);
        assert_eq!(col.config.auto_conversion, "none");
        assert_eq!(col.retention.interval, "1h");
        assert_eq!(col.retention.max_age, "365d");
        assert_eq!(col.retention.max_disk_space, "100G");
    }

    #[test]
    fn test_bad_names_rejected() {
        assert!(validate_spec(spec("../etc")).is_err());
        assert!(validate_spec(spec("a b")).is_err());
        assert!(validate_spec(spec("")).is_err());
    }

    #[test]
    fn test_auto_conversion_validation() {
        let mut s = spec("music");
        s.content_type = ContentType::Audio;
        s.config = Some(CollectionConfig {
            auto_conversion: "mp3".to_string(),
            ..Default::default()
        });
        assert!(validate_spec(s).is_err());

        let mut s = spec("photos");
        s.content_type = ContentType::Image;
        s.config = Some(CollectionConfig {
            auto_conversion: "flac".to_string(),
            ..Default::default()
        });
        assert!(validate_spec(s).is_err());
    }

    #[test]
    fn test_retention_strings_validated() {
        let mut s = spec("docs");
        s.retention = Some(RetentionPolicy {
            interval: "soon".to_string(),
            ..Default::default()
        });
        assert!(validate_spec(s).is_err());
    }

    #[test]
    fn test_reserved_and_duplicate_custom_fields_rejected() {
        let mut s = spec("docs");
        s.custom_fields = Some(vec![CustomField {
            name: "status".to_string(),
            kind: CustomFieldKind::Text,
        }]);
        assert!(validate_spec(s).is_err());

        let mut s = spec("docs");
        s.custom_fields = Some(vec![
            CustomField {
                name: "tag".to_string(),
                kind: CustomFieldKind::Text,
            },
            CustomField {
                name: "tag".to_string(),
                kind: CustomFieldKind::Integer,
            },
        ]);
        assert!(validate_spec(s).is_err());
    }
}
