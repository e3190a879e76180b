//! Exemplar records and builders
//!
//! An exemplar is one human correction: an embedding produced by the
//! classifier for some image, and the label a person said it should have.
//!
//! Records written by older tooling used `source_image`/`added_at` and
//! offset-less ISO timestamps. Both shapes deserialize into [`Exemplar`];
//! serialization always emits the current shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};

/// A stored (embedding, label) correction with provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exemplar {
    /// Corrected label (non-empty)
    pub label: String,
    /// Feature vector, dimensionality fixed per store
    pub embedding: Vec<f32>,
    /// Where the embedding came from (usually an image file name)
    #[serde(alias = "source_image", default)]
    pub source_reference: String,
    /// When the correction was first recorded
    #[serde(alias = "added_at", with = "lenient_timestamp")]
    pub created_at: DateTime<Utc>,
    /// When the label was last rewritten by a correction
    #[serde(default, with = "lenient_timestamp::option")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Exemplar {
    /// Create a new builder for Exemplar
    pub fn builder() -> ExemplarBuilder {
        ExemplarBuilder::default()
    }

    /// Embedding dimensionality
    pub fn dimension(&self) -> usize {
        self.embedding.len()
    }

    /// Whether a later correction rewrote this exemplar's label
    pub fn was_relabeled(&self) -> bool {
        self.updated_at.is_some()
    }

    /// Replace the label and stamp `updated_at`
    pub fn relabel(&mut self, label: impl Into<String>) -> Result<()> {
        let label = validate_label(label.into())?;
        self.label = label;
        self.updated_at = Some(Utc::now());
        Ok(())
    }
}

/// Builder for Exemplar with fluent API
#[derive(Debug, Default)]
pub struct ExemplarBuilder {
    label: Option<String>,
    embedding: Vec<f32>,
    source_reference: Option<String>,
    created_at: Option<DateTime<Utc>>,
}

impl ExemplarBuilder {
    /// Set the corrected label
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the embedding vector
    pub fn embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    /// Set the provenance reference
    pub fn source_reference(mut self, source: impl Into<String>) -> Self {
        self.source_reference = Some(source.into());
        self
    }

    /// Override the creation time (defaults to now)
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Build the Exemplar
    pub fn build(self) -> Result<Exemplar> {
        let label = validate_label(self.label.unwrap_or_default())?;
        validate_embedding(&self.embedding)?;

        Ok(Exemplar {
            label,
            embedding: self.embedding,
            source_reference: self.source_reference.unwrap_or_default(),
            created_at: self.created_at.unwrap_or_else(Utc::now),
            updated_at: None,
        })
    }
}

/// Reject labels that are empty once surrounding whitespace is removed
pub(crate) fn validate_label(label: String) -> Result<String> {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        return Err(MemoryError::EmptyLabel);
    }
    if trimmed.len() == label.len() {
        Ok(label)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Reject empty embeddings and non-finite components
///
/// JSON has no NaN or infinity, so such a record could not be read back.
pub(crate) fn validate_embedding(embedding: &[f32]) -> Result<()> {
    if embedding.is_empty() {
        return Err(MemoryError::invalid_prediction("embedding must not be empty"));
    }
    if let Some(index) = embedding.iter().position(|v| !v.is_finite()) {
        return Err(MemoryError::invalid_prediction(format!(
            "embedding component {index} is not finite: {}",
            embedding[index]
        )));
    }
    Ok(())
}

/// RFC 3339 timestamps, also accepting offset-less ISO-8601 as UTC
mod lenient_timestamp {
    use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive))
    }

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&at.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp: {raw}")))
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            at: &Option<DateTime<Utc>>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match at {
                Some(at) => s.serialize_str(&at.to_rfc3339()),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(d)? {
                Some(raw) => parse(&raw)
                    .map(Some)
                    .ok_or_else(|| de::Error::custom(format!("invalid timestamp: {raw}"))),
                None => Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_builder_defaults() {
        let exemplar = Exemplar::builder()
            .label("Basset Hound")
            .embedding(vec![0.1, 0.2, 0.3])
            .source_reference("IMG_0042.jpg")
            .build()
            .unwrap();

        assert_eq!(exemplar.label, "Basset Hound");
        assert_eq!(exemplar.dimension(), 3);
        assert_eq!(exemplar.source_reference, "IMG_0042.jpg");
        assert!(!exemplar.was_relabeled());
    }

    #[test]
    fn test_builder_rejects_blank_label() {
        let result = Exemplar::builder()
            .label("   ")
            .embedding(vec![1.0])
            .build();
        assert!(matches!(result, Err(MemoryError::EmptyLabel)));

        let result = Exemplar::builder().embedding(vec![1.0]).build();
        assert!(matches!(result, Err(MemoryError::EmptyLabel)));
    }

    #[test]
    fn test_builder_trims_label() {
        let exemplar = Exemplar::builder()
            .label("  Pug ")
            .embedding(vec![1.0])
            .build()
            .unwrap();
        assert_eq!(exemplar.label, "Pug");
    }

    #[test]
    fn test_builder_rejects_empty_embedding() {
        let result = Exemplar::builder().label("Pug").build();
        assert!(matches!(result, Err(MemoryError::InvalidPrediction(_))));
    }

    #[test]
    fn test_builder_rejects_non_finite_embedding() {
        let result = Exemplar::builder()
            .label("Pug")
            .embedding(vec![1.0, f32::NAN])
            .build();
        assert!(matches!(result, Err(MemoryError::InvalidPrediction(_))));

        let result = Exemplar::builder()
            .label("Pug")
            .embedding(vec![f32::INFINITY])
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_relabel_sets_updated_at() {
        let mut exemplar = Exemplar::builder()
            .label("Beagle")
            .embedding(vec![1.0, 2.0])
            .build()
            .unwrap();

        exemplar.relabel("Basset Hound").unwrap();
        assert_eq!(exemplar.label, "Basset Hound");
        assert!(exemplar.was_relabeled());

        assert!(matches!(exemplar.relabel(""), Err(MemoryError::EmptyLabel)));
        assert_eq!(exemplar.label, "Basset Hound");
    }

    #[test]
    fn test_legacy_record_shape() {
        let json = r#"{
            "label": "Samoyed",
            "embedding": [0.5, 0.25],
            "source_image": "dog.png",
            "added_at": "2024-03-09T14:22:05.123456"
        }"#;

        let exemplar: Exemplar = serde_json::from_str(json).unwrap();
        assert_eq!(exemplar.source_reference, "dog.png");
        assert_eq!(exemplar.created_at.year(), 2024);
        assert_eq!(exemplar.created_at.hour(), 14);
        assert!(exemplar.updated_at.is_none());
    }

    #[test]
    fn test_serialization_uses_current_shape() {
        let exemplar = Exemplar::builder()
            .label("Samoyed")
            .embedding(vec![0.5])
            .source_reference("dog.png")
            .build()
            .unwrap();

        let value = serde_json::to_value(&exemplar).unwrap();
        assert_eq!(value["source_reference"], "dog.png");
        assert!(value.get("source_image").is_none());
        assert!(value["updated_at"].is_null());

        let back: Exemplar = serde_json::from_value(value).unwrap();
        assert_eq!(back.created_at.timestamp(), exemplar.created_at.timestamp());
    }

    #[test]
    fn test_invalid_timestamp_rejected() {
        let json = r#"{"label": "Pug", "embedding": [1.0], "created_at": "yesterday"}"#;
        assert!(serde_json::from_str::<Exemplar>(json).is_err());
    }
}
