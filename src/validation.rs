// Validation Layer
// Enforces the admission rules of §4.4 (Upload Intake) and the query/entity
// boundary checks used across the HTTP Edge, with detailed rejection context.

use std::collections::HashMap;

use crate::error::AppError;

/// Validation context for detailed rejection messages.
#[derive(Clone)]
pub struct ValidationContext {
    operation: String,
    attributes: HashMap<String, String>,
}

impl ValidationContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn validate(self, condition: bool, message: &str) -> Result<(), AppError> {
        if !condition {
            let context = format!(
                "operation={}, attributes={:?}",
                self.operation, self.attributes
            );
            return Err(AppError::validation(format!("{message} ({context})")));
        }
        Ok(())
    }
}

/// Upload filename validation, in the order specified by §4.4.
pub mod upload {
    use super::*;

    const ALLOWED_EXTENSIONS: &[&str] = &["txt", "csv"];
    const MAX_CONTENT_LENGTH: u64 = 10 * 1024 * 1024;

    /// Rule 1: non-empty, no path separators or null bytes.
    pub fn validate_filename(name: &str) -> Result<(), AppError> {
        let ctx = ValidationContext::new("upload_filename").with_attribute("name", name);

        ctx.clone()
            .validate(!name.is_empty(), "filename cannot be empty")?;
        ctx.clone()
            .validate(!name.contains('\0'), "filename contains null bytes")?;
        ctx.validate(
            !name.contains('/') && !name.contains('\\'),
            "filename cannot contain path separators",
        )?;
        Ok(())
    }

    /// Rule 2: extension (case-insensitive) in the allowed set.
    pub fn validate_extension(name: &str) -> Result<(), AppError> {
        let ext = std::path::Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        let ctx = ValidationContext::new("upload_extension").with_attribute("name", name);
        ctx.validate(
            matches!(ext, Some(ref e) if ALLOWED_EXTENSIONS.contains(&e.as_str())),
            "file extension must be one of .txt, .csv",
        )
    }

    /// Rule 3: content length strictly positive and at most 10 MiB.
    pub fn validate_content_length(content_length: u64) -> Result<(), AppError> {
        let ctx = ValidationContext::new("upload_content_length")
            .with_attribute("content_length", content_length.to_string());
        ctx.clone()
            .validate(content_length > 0, "uploaded file cannot be empty")?;
        ctx.validate(
            content_length <= MAX_CONTENT_LENGTH,
            "uploaded file exceeds the 10 MiB limit",
        )
    }
}

/// Search query validation (§4.5 — non-empty after whitespace trim).
pub mod query {
    use super::*;

    pub fn validate_search_query(query: &str) -> Result<(), AppError> {
        ValidationContext::new("search_query")
            .with_attribute("query", query)
            .validate(!query.trim().is_empty(), "query cannot be empty")
    }
}

/// Entity and community-level parameter validation used by the Artifact
/// Store, Derived-Metrics Cache, and Search Gateway entry points.
pub mod entity {
    use super::*;

    pub fn validate_entity_id(id: &str) -> Result<(), AppError> {
        ValidationContext::new("entity_id")
            .with_attribute("id", id)
            .validate(!id.trim().is_empty(), "entity id cannot be empty")
    }

    pub fn validate_community_level(level: u32) -> Result<(), AppError> {
        ValidationContext::new("community_level")
            .with_attribute("level", level.to_string())
            .validate(level <= 10, "community level out of bounds")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_rejects_empty_and_separators() {
        assert!(upload::validate_filename("").is_err());
        assert!(upload::validate_filename("a/b.txt").is_err());
        assert!(upload::validate_filename("a\\b.txt").is_err());
        assert!(upload::validate_filename("a\0b.txt").is_err());
        assert!(upload::validate_filename("a.txt").is_ok());
    }

    #[test]
    fn extension_allowlist_is_case_insensitive() {
        assert!(upload::validate_extension("a.TXT").is_ok());
        assert!(upload::validate_extension("a.csv").is_ok());
        assert!(upload::validate_extension("a.pdf").is_err());
        assert!(upload::validate_extension("a").is_err());
    }

    #[test]
    fn content_length_bounds() {
        assert!(upload::validate_content_length(0).is_err());
        assert!(upload::validate_content_length(12).is_ok());
        assert!(upload::validate_content_length(10 * 1024 * 1024).is_ok());
        assert!(upload::validate_content_length(11 * 1024 * 1024).is_err());
    }

    #[test]
    fn search_query_rejects_whitespace_only() {
        assert!(query::validate_search_query("   ").is_err());
        assert!(query::validate_search_query("").is_err());
        assert!(query::validate_search_query("hello").is_ok());
    }

    #[test]
    fn entity_id_rejects_blank() {
        assert!(entity::validate_entity_id("").is_err());
        assert!(entity::validate_entity_id("e-1").is_ok());
    }

    #[test]
    fn community_level_bounds() {
        assert!(entity::validate_community_level(2).is_ok());
        assert!(entity::validate_community_level(11).is_err());
    }
}
