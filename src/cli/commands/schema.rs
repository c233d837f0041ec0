use schemars::schema_for;

use crate::cli::SchemaTarget;
use crate::error::Result;
use crate::format::{IssueDetail, IssueView};
use crate::model::UserProperties;
use crate::query::Page;
use crate::service::{IssueCreate, IssuePatch};

/// The JSON schema of `target`.
#[must_use]
pub fn schema_of(target: SchemaTarget) -> serde_json::Value {
    let schema = match target {
        SchemaTarget::Issue => schema_for!(IssueView),
        SchemaTarget::Detail => schema_for!(IssueDetail),
        SchemaTarget::Page => schema_for!(Page<IssueView>),
        SchemaTarget::Properties => schema_for!(UserProperties),
        SchemaTarget::Create => schema_for!(IssueCreate),
        SchemaTarget::Patch => schema_for!(IssuePatch),
        SchemaTarget::Error => return error_schema(),
    };
    serde_json::to_value(schema).unwrap_or_default()
}

fn error_schema() -> serde_json::Value {
    serde_json::json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "StructuredError",
        "type": "object",
        "required": ["error"],
        "properties": {
            "error": {
                "type": "object",
                "required": ["code", "status", "message", "retryable"],
                "properties": {
                    "code": { "type": "string" },
                    "status": { "type": "integer" },
                    "message": { "type": "string" },
                    "hint": { "type": ["string", "null"] },
                    "retryable": { "type": "boolean" },
                    "context": { "type": ["object", "null"] }
                }
            }
        }
    })
}

/// Print the schema of `target` as pretty JSON.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn execute(target: SchemaTarget) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&schema_of(target))?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_schema_names_core_fields() {
        let schema = schema_of(SchemaTarget::Issue);
        let properties = &schema["properties"];
        assert!(properties.get("sequence_id").is_some());
        assert!(properties.get("label_ids").is_some());
    }

    #[test]
    fn every_target_renders() {
        for target in [
            SchemaTarget::Detail,
            SchemaTarget::Page,
            SchemaTarget::Properties,
            SchemaTarget::Create,
            SchemaTarget::Patch,
            SchemaTarget::Error,
        ] {
            assert!(schema_of(target).is_object());
        }
    }
}
