//! Per-user, per-project display preferences.

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// How a user's issue list is arranged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DisplayFilters {
    pub group_by: Option<String>,
    pub sub_group_by: Option<String>,
    pub order_by: String,
    #[serde(rename = "type")]
    pub issue_type: Option<String>,
    pub layout: String,
    pub sub_issue: bool,
    pub show_empty_groups: bool,
    pub calendar_date_range: String,
}

impl Default for DisplayFilters {
    fn default() -> Self {
        Self {
            group_by: None,
            sub_group_by: None,
            order_by: "-created_at".to_string(),
            issue_type: None,
            layout: "list".to_string(),
            sub_issue: true,
            show_empty_groups: true,
            calendar_date_range: String::new(),
        }
    }
}

/// Which columns/badges a user sees. Everything is shown by default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct DisplayProperties {
    pub assignee: bool,
    pub start_date: bool,
    pub due_date: bool,
    pub labels: bool,
    pub key: bool,
    pub priority: bool,
    pub state: bool,
    pub sub_issue_count: bool,
    pub link: bool,
    pub attachment_count: bool,
    pub estimate: bool,
    pub created_on: bool,
    pub updated_on: bool,
    pub modules: bool,
    pub cycle: bool,
    pub issue_type: bool,
}

impl Default for DisplayProperties {
    fn default() -> Self {
        Self {
            assignee: true,
            start_date: true,
            due_date: true,
            labels: true,
            key: true,
            priority: true,
            state: true,
            sub_issue_count: true,
            link: true,
            attachment_count: true,
            estimate: true,
            created_on: true,
            updated_on: true,
            modules: true,
            cycle: true,
            issue_type: true,
        }
    }
}

/// Stored preferences for one user in one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UserProperties {
    pub user_id: Uuid,
    pub project_id: Uuid,
    /// Saved filter parameters, kept as a free-form JSON object.
    pub filters: serde_json::Value,
    pub display_filters: DisplayFilters,
    pub display_properties: DisplayProperties,
}

impl UserProperties {
    /// Preferences as they look before a user ever saves any.
    #[must_use]
    pub fn defaults_for(user_id: Uuid, project_id: Uuid) -> Self {
        Self {
            user_id,
            project_id,
            filters: serde_json::Value::Object(serde_json::Map::new()),
            display_filters: DisplayFilters::default(),
            display_properties: DisplayProperties::default(),
        }
    }

    /// Replace only the sections present in `patch`.
    pub fn apply(&mut self, patch: UserPropertiesPatch) {
        if let Some(filters) = patch.filters {
            self.filters = filters;
        }
        if let Some(display_filters) = patch.display_filters {
            self.display_filters = display_filters;
        }
        if let Some(display_properties) = patch.display_properties {
            self.display_properties = display_properties;
        }
    }
}

/// Partial update of [`UserProperties`]. Absent sections are untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UserPropertiesPatch {
    #[serde(default, deserialize_with = "present")]
    pub filters: Option<serde_json::Value>,
    #[serde(default)]
    pub display_filters: Option<DisplayFilters>,
    #[serde(default)]
    pub display_properties: Option<DisplayProperties>,
}

/// `filters: null` means "reset to empty", not "absent".
fn present<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(Some(if value.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        value
    }))
}
