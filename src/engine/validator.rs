use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use time::macros::format_description;
use time::Date;

use super::conditions::{evaluate, is_empty_value, value_as_string};
use crate::models::field::{FieldDefinition, FieldType, FieldValues};
use crate::models::template::WorkflowTemplate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationReason {
    Required,
    InvalidType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub field: String,
    pub reason: ValidationReason,
    pub message: String,
}

/// Every failing field of one submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{} field(s) failed validation", .errors.len())]
pub struct ValidationErrors {
    pub errors: Vec<ValidationError>,
}

impl ValidationErrors {
    pub fn fields(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.field.as_str()).collect()
    }
}

/// Validates raw submitted values and returns the effective map: hidden
/// fields and keys the template does not know are stripped.
pub fn validate_submission(
    template: &WorkflowTemplate,
    raw: &FieldValues,
) -> Result<FieldValues, ValidationErrors> {
    let visible = visibility(&template.fields, raw);
    let mut effective = FieldValues::new();
    let mut errors = Vec::new();

    for field in &template.fields {
        if !visible.get(field.name.as_str()).copied().unwrap_or(false) {
            continue;
        }
        let value = raw.get(&field.name);
        if field.required && is_blank(field, value) {
            errors.push(ValidationError {
                field: field.name.clone(),
                reason: ValidationReason::Required,
                message: format!("{} is required", field.label),
            });
            continue;
        }
        let Some(value) = value.filter(|v| !is_empty_value(Some(*v))) else {
            continue;
        };
        if let Err(message) = check_type(field, value) {
            errors.push(ValidationError {
                field: field.name.clone(),
                reason: ValidationReason::InvalidType,
                message,
            });
            continue;
        }
        effective.insert(field.name.clone(), value.clone());
    }

    if errors.is_empty() {
        Ok(effective)
    } else {
        Err(ValidationErrors { errors })
    }
}

/// Visibility of every field. Conditionals read the raw values, so field
/// order does not matter; a hidden source reads as absent.
pub fn visibility<'a>(fields: &'a [FieldDefinition], raw: &FieldValues) -> HashMap<&'a str, bool> {
    let mut resolved = HashMap::new();
    let mut stack = Vec::new();
    for field in fields {
        resolve(&field.name, fields, raw, &mut resolved, &mut stack);
    }
    resolved
}

fn resolve<'a>(
    name: &'a str,
    fields: &'a [FieldDefinition],
    raw: &FieldValues,
    resolved: &mut HashMap<&'a str, bool>,
    stack: &mut Vec<&'a str>,
) -> bool {
    if let Some(visible) = resolved.get(name) {
        return *visible;
    }
    let Some(field) = fields.iter().find(|f| f.name == name) else {
        return false;
    };
    let Some(condition) = &field.conditional else {
        resolved.insert(name, true);
        return true;
    };
    // cyclic conditionals never become visible
    if stack.contains(&name) {
        return false;
    }

    stack.push(name);
    let source_visible = resolve(&condition.field, fields, raw, resolved, stack);
    stack.pop();

    let scoped: FieldValues = if source_visible {
        raw.get(&condition.field)
            .map(|v| (condition.field.clone(), v.clone()))
            .into_iter()
            .collect()
    } else {
        FieldValues::new()
    };
    let visible = evaluate(condition, &scoped);
    resolved.insert(name, visible);
    visible
}

fn is_blank(field: &FieldDefinition, value: Option<&Value>) -> bool {
    if field.field_type == FieldType::Checkbox && field.options.is_empty() {
        return match value {
            None | Some(Value::Null) | Some(Value::Bool(false)) => true,
            Some(Value::String(s)) => matches!(s.trim(), "" | "false"),
            _ => false,
        };
    }
    is_empty_value(value)
}

fn check_type(field: &FieldDefinition, value: &Value) -> Result<(), String> {
    let label = &field.label;
    match field.field_type {
        FieldType::Text | FieldType::Textarea => match value {
            Value::Array(_) | Value::Object(_) => Err(format!("{label} must be text")),
            _ => Ok(()),
        },
        FieldType::Number => {
            let parsed = match value {
                Value::Number(_) => true,
                Value::String(s) => s.trim().parse::<f64>().map(|n| n.is_finite()).unwrap_or(false),
                _ => false,
            };
            parsed
                .then_some(())
                .ok_or_else(|| format!("{label} must be a number"))
        }
        FieldType::Date => {
            let format = format_description!("[year]-[month]-[day]");
            value
                .as_str()
                .and_then(|s| Date::parse(s.trim(), &format).ok())
                .map(|_| ())
                .ok_or_else(|| format!("{label} must be a date in YYYY-MM-DD format"))
        }
        FieldType::Email => value
            .as_str()
            .filter(|s| is_email(s.trim()))
            .map(|_| ())
            .ok_or_else(|| format!("{label} must be an email address")),
        FieldType::Phone => value
            .as_str()
            .filter(|s| is_phone(s.trim()))
            .map(|_| ())
            .ok_or_else(|| format!("{label} must be a phone number")),
        FieldType::Url => value
            .as_str()
            .and_then(|s| reqwest::Url::parse(s.trim()).ok())
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .map(|_| ())
            .ok_or_else(|| format!("{label} must be an http(s) URL")),
        FieldType::Select | FieldType::Radio => value_as_string(value)
            .filter(|v| field.has_option(v))
            .map(|_| ())
            .ok_or_else(|| format!("{label} must be one of the listed options")),
        FieldType::Checkbox => check_checkbox(field, value),
    }
}

fn check_checkbox(field: &FieldDefinition, value: &Value) -> Result<(), String> {
    let label = &field.label;
    if field.options.is_empty() {
        return match value {
            Value::Bool(_) => Ok(()),
            Value::String(s) if matches!(s.as_str(), "true" | "false") => Ok(()),
            _ => Err(format!("{label} must be true or false")),
        };
    }
    let chosen: Vec<Option<String>> = match value {
        Value::Array(items) => items.iter().map(value_as_string).collect(),
        other => vec![value_as_string(other)],
    };
    let all_known = chosen
        .iter()
        .all(|c| c.as_deref().map(|v| field.has_option(v)).unwrap_or(false));
    if all_known {
        Ok(())
    } else {
        Err(format!("{label} contains a value outside the listed options"))
    }
}

fn is_email(candidate: &str) -> bool {
    if candidate.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = candidate.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

fn is_phone(candidate: &str) -> bool {
    let body = candidate.strip_prefix('+').unwrap_or(candidate);
    if !body
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | '(' | ')'))
    {
        return false;
    }
    let digits = body.chars().filter(|c| c.is_ascii_digit()).count();
    (7..=15).contains(&digits)
}
