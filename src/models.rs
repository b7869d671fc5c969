//! Core data models used throughout the pipeline.
//!
//! Records are stored as open JSON objects ([`Fields`]) so that a field can
//! be genuinely absent, as in a document database. The typed structs here
//! are views over those objects for the two stages that write them.

use serde_json::{json, Value};

/// The body of one stored document.
pub type Fields = serde_json::Map<String, Value>;

/// The parts of a stored record the stages read back.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    pub content: String,
    pub file_name: Option<String>,
    /// `None` when the enrichment flag field is missing from the record.
    pub processed: Option<bool>,
}

impl DocumentRecord {
    pub fn from_fields(fields: &Fields, processed_field: &str) -> Self {
        Self {
            content: fields
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            file_name: fields
                .get("file_name")
                .and_then(Value::as_str)
                .map(str::to_string),
            processed: fields.get(processed_field).and_then(Value::as_bool),
        }
    }

    /// Whether enrichment has completed for this record.
    pub fn is_enriched(&self) -> bool {
        self.processed == Some(true)
    }
}

/// Record written by the conversion stage (create-or-overwrite).
#[derive(Debug, Clone)]
pub struct ConvertedRecord {
    pub title: String,
    pub content: String,
    pub source: String,
    pub file_name: String,
    pub converted_at: i64,
}

impl ConvertedRecord {
    /// Full record body, with the enrichment flag initialised to `false`.
    pub fn to_fields(&self, processed_field: &str) -> Fields {
        let mut fields = Fields::new();
        fields.insert("title".into(), json!(self.title));
        fields.insert("content".into(), json!(self.content));
        fields.insert("source".into(), json!(self.source));
        fields.insert("file_name".into(), json!(self.file_name));
        fields.insert("converted_at".into(), json!(self.converted_at));
        fields.insert(processed_field.into(), Value::Bool(false));
        fields
    }
}

/// Derive a record title from an item name: the trailing `.pdf` (any case)
/// is dropped, everything else is kept.
pub fn title_from_name(name: &str) -> String {
    if name.to_ascii_lowercase().ends_with(".pdf") {
        name[..name.len() - 4].to_string()
    } else {
        name.to_string()
    }
}

/// Case-insensitive `.pdf` suffix match used to select source objects.
pub fn is_pdf(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".pdf")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_strips_pdf_suffix_any_case() {
        assert_eq!(title_from_name("reports/q1.pdf"), "reports/q1");
        assert_eq!(title_from_name("Economist.PDF"), "Economist");
        assert_eq!(title_from_name("notes.pdf.txt"), "notes.pdf.txt");
    }

    #[test]
    fn pdf_filter_is_case_insensitive() {
        assert!(is_pdf("a.pdf"));
        assert!(is_pdf("dir/B.PdF"));
        assert!(!is_pdf("a.pdf.bak"));
        assert!(!is_pdf("pdf"));
    }

    #[test]
    fn converted_record_starts_unprocessed() {
        let rec = ConvertedRecord {
            title: "a".into(),
            content: "# A".into(),
            source: "local:/tmp".into(),
            file_name: "a.pdf".into(),
            converted_at: 1,
        };
        let fields = rec.to_fields("done");
        assert_eq!(fields.get("done"), Some(&Value::Bool(false)));
        let view = DocumentRecord::from_fields(&fields, "done");
        assert_eq!(view.processed, Some(false));
        assert_eq!(view.content, "# A");
        assert_eq!(view.file_name.as_deref(), Some("a.pdf"));
        assert!(!view.is_enriched());
    }

    #[test]
    fn missing_flag_reads_as_absent() {
        let mut fields = Fields::new();
        fields.insert("content".into(), json!("x"));
        let view = DocumentRecord::from_fields(&fields, "processed_language_model");
        assert_eq!(view.processed, None);
        assert!(!view.is_enriched());

        fields.insert("processed_language_model".into(), json!(true));
        let view = DocumentRecord::from_fields(&fields, "processed_language_model");
        assert!(view.is_enriched());
    }
}
