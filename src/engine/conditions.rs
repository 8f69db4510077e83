use serde_json::Value;

use crate::models::field::{Condition, ConditionOperator, FieldValues};

/// Scalar rendering used for every string comparison. Arrays and objects
/// have no scalar form.
pub fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

pub fn is_empty_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

fn equals(actual: Option<&Value>, expected: &str) -> bool {
    match actual {
        None => false,
        // multi-choice values match when any element does
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(value_as_string)
            .any(|item| item == expected),
        Some(value) => value_as_string(value).as_deref() == Some(expected),
    }
}

fn contains(actual: Option<&Value>, expected: &str) -> bool {
    match actual {
        None => false,
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(value_as_string)
            .any(|item| item == expected),
        Some(value) => value_as_string(value)
            .map(|s| s.contains(expected))
            .unwrap_or(false),
    }
}

pub fn evaluate(condition: &Condition, values: &FieldValues) -> bool {
    let actual = values.get(&condition.field);
    let expected = condition.value.as_deref().unwrap_or("");
    match condition.operator {
        ConditionOperator::Equals => equals(actual, expected),
        ConditionOperator::NotEquals => !equals(actual, expected),
        ConditionOperator::Contains => contains(actual, expected),
        ConditionOperator::NotEmpty => !is_empty_value(actual),
        ConditionOperator::Empty => is_empty_value(actual),
    }
}

/// True when every condition holds; an empty list holds vacuously.
pub fn all_hold(conditions: &[Condition], values: &FieldValues) -> bool {
    conditions.iter().all(|c| evaluate(c, values))
}

pub fn any_holds(conditions: &[Condition], values: &FieldValues) -> bool {
    conditions.iter().any(|c| evaluate(c, values))
}
