//! User-editable task settings.
//!
//! Settings are a closed set of named fields. Patches arrive as loosely typed
//! form fields and are validated here before they ever reach the database.

use crate::error::{ActionError, ActionResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keys that identify the task rather than describe it; dropped from patches.
const ID_KEYS: &[&str] = &["taskId", "task_id", "id"];

/// Every key a patch may carry.
pub const ALLOWED_KEYS: &[&str] = &["estimated_hours", "user_notes", "due_date", "assignee", "tags"];

/// Settings stored alongside a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_notes: Option<String>,
    /// Calendar date, `YYYY-MM-DD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl TaskSettings {
    /// Shallow merge: fields present in the patch overwrite, the rest persist.
    pub fn apply(&mut self, patch: TaskSettingsPatch) {
        if let Some(v) = patch.estimated_hours {
            self.estimated_hours = v;
        }
        if let Some(v) = patch.user_notes {
            self.user_notes = v;
        }
        if let Some(v) = patch.due_date {
            self.due_date = v;
        }
        if let Some(v) = patch.assignee {
            self.assignee = v;
        }
        if let Some(v) = patch.tags {
            self.tags = v;
        }
    }
}

/// A validated partial update.
///
/// Outer `None` leaves the field untouched, `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskSettingsPatch {
    pub estimated_hours: Option<Option<f64>>,
    pub user_notes: Option<Option<String>>,
    pub due_date: Option<Option<String>>,
    pub assignee: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
}

impl TaskSettingsPatch {
    /// Build a patch from submitted fields.
    ///
    /// Identifier keys are ignored, unknown keys are rejected. Empty strings
    /// and nulls clear a field.
    pub fn from_fields(fields: &Map<String, Value>) -> ActionResult<Self> {
        let mut patch = Self::default();

        for (key, value) in fields {
            if ID_KEYS.contains(&key.as_str()) {
                continue;
            }
            match key.as_str() {
                "estimated_hours" => {
                    patch.estimated_hours = Some(parse_hours(value)?);
                }
                "user_notes" => patch.user_notes = Some(text_value(key, value)?),
                "assignee" => patch.assignee = Some(text_value(key, value)?),
                "due_date" => {
                    let date = text_value(key, value)?;
                    if let Some(ref d) = date {
                        NaiveDate::parse_from_str(d, "%Y-%m-%d").map_err(|_| {
                            ActionError::invalid_value(key, "due_date must be YYYY-MM-DD")
                        })?;
                    }
                    patch.due_date = Some(date);
                }
                "tags" => patch.tags = Some(parse_tags(value)?),
                other => {
                    return Err(ActionError::invalid_value(
                        other,
                        &format!(
                            "Unknown setting '{}'. Allowed: {}",
                            other,
                            ALLOWED_KEYS.join(", ")
                        ),
                    ));
                }
            }
        }

        Ok(patch)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn text_value(key: &str, value: &Value) -> ActionResult<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => Ok(Some(s.trim().to_string())),
        Value::Number(n) => Ok(Some(n.to_string())),
        _ => Err(ActionError::invalid_value(key, "expected text")),
    }
}

/// Coerce `estimated_hours` to a number. Accepts numbers and numeric strings.
fn parse_hours(value: &Value) -> ActionResult<Option<f64>> {
    let hours = match value {
        Value::Null => return Ok(None),
        Value::String(s) if s.trim().is_empty() => return Ok(None),
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| {
            ActionError::invalid_value("estimated_hours", "estimated_hours must be a number")
        })?,
        Value::Number(n) => n.as_f64().ok_or_else(|| {
            ActionError::invalid_value("estimated_hours", "estimated_hours must be a number")
        })?,
        _ => {
            return Err(ActionError::invalid_value(
                "estimated_hours",
                "estimated_hours must be a number",
            ));
        }
    };

    if !hours.is_finite() || hours < 0.0 {
        return Err(ActionError::invalid_value(
            "estimated_hours",
            "estimated_hours must be a non-negative number",
        ));
    }
    Ok(Some(hours))
}

/// Tags come either as a JSON array or as a comma-separated string.
fn parse_tags(value: &Value) -> ActionResult<Vec<String>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::String(s) => Ok(s
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()),
        Value::Array(items) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(|s| s.trim().to_string())
                    .ok_or_else(|| ActionError::invalid_value("tags", "tags must be strings"))
            })
            .filter(|r| r.as_ref().map(|s| !s.is_empty()).unwrap_or(true))
            .collect(),
        _ => Err(ActionError::invalid_value(
            "tags",
            "tags must be a list or comma-separated string",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    fn fields(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_estimated_hours_string_is_coerced() {
        let patch = TaskSettingsPatch::from_fields(&fields(json!({"estimated_hours": "4"}))).unwrap();
        assert_eq!(patch.estimated_hours, Some(Some(4.0)));
    }

    #[test]
    fn test_merge_keeps_untouched_keys() {
        let mut settings = TaskSettings {
            user_notes: Some("x".into()),
            ..Default::default()
        };
        let patch = TaskSettingsPatch::from_fields(&fields(json!({"estimated_hours": "4"}))).unwrap();
        settings.apply(patch);

        assert_eq!(settings.user_notes.as_deref(), Some("x"));
        assert_eq!(settings.estimated_hours, Some(4.0));
        assert_eq!(
            serde_json::to_value(&settings).unwrap(),
            json!({"user_notes": "x", "estimated_hours": 4.0})
        );
    }

    #[test]
    fn test_task_id_is_ignored() {
        let patch = TaskSettingsPatch::from_fields(&fields(
            json!({"taskId": "abc", "user_notes": "hello"}),
        ))
        .unwrap();
        assert_eq!(patch.user_notes, Some(Some("hello".into())));
        assert!(patch.estimated_hours.is_none());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = TaskSettingsPatch::from_fields(&fields(json!({"status": "done"}))).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidFieldValue);
        assert_eq!(err.field.as_deref(), Some("status"));
    }

    #[test]
    fn test_bad_hours_rejected() {
        assert!(TaskSettingsPatch::from_fields(&fields(json!({"estimated_hours": "four"}))).is_err());
        assert!(TaskSettingsPatch::from_fields(&fields(json!({"estimated_hours": -1}))).is_err());
    }

    #[test]
    fn test_empty_string_clears() {
        let mut settings = TaskSettings {
            assignee: Some("sam".into()),
            ..Default::default()
        };
        settings.apply(TaskSettingsPatch::from_fields(&fields(json!({"assignee": ""}))).unwrap());
        assert!(settings.assignee.is_none());
    }

    #[test]
    fn test_due_date_validated() {
        assert!(TaskSettingsPatch::from_fields(&fields(json!({"due_date": "2026-11-01"}))).is_ok());
        assert!(TaskSettingsPatch::from_fields(&fields(json!({"due_date": "next week"}))).is_err());
    }

    #[test]
    fn test_tags_from_comma_string() {
        let patch = TaskSettingsPatch::from_fields(&fields(json!({"tags": "legal, finance,,"}))).unwrap();
        assert_eq!(patch.tags, Some(vec!["legal".to_string(), "finance".to_string()]));
    }
}
