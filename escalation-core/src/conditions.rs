//! Trigger conditions: predicates over an inbound event payload.
//!
//! A condition is a small tree of `all` / `any` / `not` groups whose leaves
//! compare a dotted field path in the payload against an expected value.
//! Evaluation is total: unknown operators, missing fields and type
//! mismatches all evaluate to `false` rather than erroring.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use trigger_registry::FieldIssue;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerCondition {
    /// Matches every payload.
    #[default]
    Always,
    All {
        conditions: Vec<TriggerCondition>,
    },
    Any {
        conditions: Vec<TriggerCondition>,
    },
    Not {
        condition: Box<TriggerCondition>,
    },
    Compare {
        field: String,
        op: Operator,
        #[serde(default)]
        value: Value,
    },
}

/// Comparison operators. Anything unrecognised deserialises to `Unknown`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Contains,
    Between,
    IsNull,
    IsNotNull,
    In,
    Unknown,
}

impl From<String> for Operator {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "equals" | "eq" => Operator::Equals,
            "not_equals" | "ne" => Operator::NotEquals,
            "greater_than" | "gt" => Operator::GreaterThan,
            "greater_or_equal" | "gte" => Operator::GreaterOrEqual,
            "less_than" | "lt" => Operator::LessThan,
            "less_or_equal" | "lte" => Operator::LessOrEqual,
            "contains" => Operator::Contains,
            "between" => Operator::Between,
            "is_null" => Operator::IsNull,
            "is_not_null" => Operator::IsNotNull,
            "in" => Operator::In,
            _ => Operator::Unknown,
        }
    }
}

impl TriggerCondition {
    pub fn compare(field: &str, op: Operator, value: Value) -> Self {
        TriggerCondition::Compare {
            field: field.to_string(),
            op,
            value,
        }
    }

    pub fn all(conditions: Vec<TriggerCondition>) -> Self {
        TriggerCondition::All { conditions }
    }

    pub fn any(conditions: Vec<TriggerCondition>) -> Self {
        TriggerCondition::Any { conditions }
    }

    pub fn negate(condition: TriggerCondition) -> Self {
        TriggerCondition::Not {
            condition: Box::new(condition),
        }
    }

    pub fn evaluate(&self, payload: &Value) -> bool {
        evaluate(self, payload)
    }
}

/// A tree containing an unknown operator anywhere never matches, negated
/// or not.
pub fn evaluate(condition: &TriggerCondition, payload: &Value) -> bool {
    !has_unknown_operator(condition) && matches(condition, payload)
}

fn matches(condition: &TriggerCondition, payload: &Value) -> bool {
    match condition {
        TriggerCondition::Always => true,
        TriggerCondition::All { conditions } => conditions.iter().all(|c| matches(c, payload)),
        TriggerCondition::Any { conditions } => conditions.iter().any(|c| matches(c, payload)),
        TriggerCondition::Not { condition } => !matches(condition, payload),
        TriggerCondition::Compare { field, op, value } => {
            compare(resolve_path(payload, field), *op, value)
        }
    }
}

fn has_unknown_operator(condition: &TriggerCondition) -> bool {
    match condition {
        TriggerCondition::Always => false,
        TriggerCondition::All { conditions } | TriggerCondition::Any { conditions } => {
            conditions.iter().any(has_unknown_operator)
        }
        TriggerCondition::Not { condition } => has_unknown_operator(condition),
        TriggerCondition::Compare { op, .. } => *op == Operator::Unknown,
    }
}

/// Collect structural problems in a condition tree. `path` is the field
/// name used to report issues for the root node.
pub fn validate(condition: &TriggerCondition, path: &str, issues: &mut Vec<FieldIssue>) {
    match condition {
        TriggerCondition::Always => {}
        TriggerCondition::All { conditions } | TriggerCondition::Any { conditions } => {
            if conditions.is_empty() {
                issues.push(FieldIssue::new(
                    path,
                    "empty_group",
                    "condition group needs at least one member",
                ));
            }
            for (idx, child) in conditions.iter().enumerate() {
                validate(child, &format!("{path}.conditions[{idx}]"), issues);
            }
        }
        TriggerCondition::Not { condition } => {
            validate(condition, &format!("{path}.condition"), issues);
        }
        TriggerCondition::Compare { field, op, value } => {
            if field.trim().is_empty() {
                issues.push(FieldIssue::new(
                    &format!("{path}.field"),
                    "required",
                    "comparison needs a field path",
                ));
            }
            match op {
                Operator::Unknown => issues.push(FieldIssue::new(
                    &format!("{path}.op"),
                    "unknown_operator",
                    "operator is not recognised",
                )),
                Operator::Between => {
                    let valid = value
                        .as_array()
                        .is_some_and(|bounds| bounds.len() == 2 && bounds.iter().all(|b| as_f64(b).is_some()));
                    if !valid {
                        issues.push(FieldIssue::new(
                            &format!("{path}.value"),
                            "invalid_range",
                            "between expects [low, high] numbers",
                        ));
                    }
                }
                Operator::In if !value.is_array() => issues.push(FieldIssue::new(
                    &format!("{path}.value"),
                    "invalid_type",
                    "in expects an array of values",
                )),
                _ => {}
            }
        }
    }
}

fn compare(actual: Option<&Value>, op: Operator, expected: &Value) -> bool {
    match op {
        Operator::IsNull => matches!(actual, None | Some(Value::Null)),
        Operator::IsNotNull => !matches!(actual, None | Some(Value::Null)),
        Operator::Unknown => false,
        _ => {
            let Some(actual) = actual else {
                return false;
            };
            match op {
                Operator::Equals => loosely_equal(actual, expected),
                Operator::NotEquals => !loosely_equal(actual, expected),
                Operator::GreaterThan => compare_numeric(actual, expected, |a, b| a > b),
                Operator::GreaterOrEqual => compare_numeric(actual, expected, |a, b| a >= b),
                Operator::LessThan => compare_numeric(actual, expected, |a, b| a < b),
                Operator::LessOrEqual => compare_numeric(actual, expected, |a, b| a <= b),
                Operator::Contains => match (actual, expected) {
                    (Value::String(haystack), Value::String(needle)) => {
                        haystack.to_lowercase().contains(&needle.to_lowercase())
                    }
                    (Value::Array(items), _) => items.iter().any(|item| loosely_equal(item, expected)),
                    _ => false,
                },
                Operator::Between => match expected.as_array().map(Vec::as_slice) {
                    Some([low, high]) => match (as_f64(actual), as_f64(low), as_f64(high)) {
                        (Some(v), Some(lo), Some(hi)) => lo <= v && v <= hi,
                        _ => false,
                    },
                    _ => false,
                },
                Operator::In => match expected {
                    Value::Array(items) => items.iter().any(|item| loosely_equal(actual, item)),
                    _ => false,
                },
                Operator::IsNull | Operator::IsNotNull | Operator::Unknown => false,
            }
        }
    }
}

/// Equality that treats `5` and `"5"` as the same value.
fn loosely_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            matches!((as_f64(a), as_f64(b)), (Some(x), Some(y)) if x == y)
        }
        _ => false,
    }
}

fn compare_numeric(a: &Value, b: &Value, cmp: fn(f64, f64) -> bool) -> bool {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => cmp(x, y),
        _ => false,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

pub(crate) fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> Value {
        json!({
            "risk": {"score": 82, "label": "High exposure"},
            "institution": "north-campus",
            "tags": ["ferpa", "audit"],
            "days_overdue": "3",
            "owner": null
        })
    }

    #[test]
    fn equals_and_not_equals() {
        let p = payload();
        assert!(TriggerCondition::compare("institution", Operator::Equals, json!("north-campus")).evaluate(&p));
        assert!(TriggerCondition::compare("days_overdue", Operator::Equals, json!(3)).evaluate(&p));
        assert!(TriggerCondition::compare("institution", Operator::NotEquals, json!("south")).evaluate(&p));
    }

    #[test]
    fn numeric_comparisons_use_nested_paths() {
        let p = payload();
        assert!(TriggerCondition::compare("risk.score", Operator::GreaterThan, json!(80)).evaluate(&p));
        assert!(!TriggerCondition::compare("risk.score", Operator::LessThan, json!(80)).evaluate(&p));
        assert!(TriggerCondition::compare("days_overdue", Operator::GreaterOrEqual, json!(3)).evaluate(&p));
        assert!(!TriggerCondition::compare("risk.label", Operator::GreaterThan, json!(1)).evaluate(&p));
    }

    #[test]
    fn contains_works_on_strings_and_arrays() {
        let p = payload();
        assert!(TriggerCondition::compare("risk.label", Operator::Contains, json!("exposure")).evaluate(&p));
        assert!(TriggerCondition::compare("tags", Operator::Contains, json!("ferpa")).evaluate(&p));
        assert!(!TriggerCondition::compare("tags", Operator::Contains, json!("hipaa")).evaluate(&p));
    }

    #[test]
    fn between_is_inclusive() {
        let p = payload();
        assert!(TriggerCondition::compare("risk.score", Operator::Between, json!([82, 90])).evaluate(&p));
        assert!(!TriggerCondition::compare("risk.score", Operator::Between, json!([83, 90])).evaluate(&p));
        assert!(!TriggerCondition::compare("risk.score", Operator::Between, json!(85)).evaluate(&p));
    }

    #[test]
    fn null_checks_cover_missing_fields() {
        let p = payload();
        assert!(TriggerCondition::compare("owner", Operator::IsNull, Value::Null).evaluate(&p));
        assert!(TriggerCondition::compare("nope.deeper", Operator::IsNull, Value::Null).evaluate(&p));
        assert!(TriggerCondition::compare("institution", Operator::IsNotNull, Value::Null).evaluate(&p));
        assert!(!TriggerCondition::compare("missing", Operator::Equals, json!("x")).evaluate(&p));
    }

    #[test]
    fn groups_compose() {
        let p = payload();
        let cond = TriggerCondition::all(vec![
            TriggerCondition::compare("risk.score", Operator::GreaterThan, json!(50)),
            TriggerCondition::any(vec![
                TriggerCondition::compare("institution", Operator::Equals, json!("south")),
                TriggerCondition::compare("tags", Operator::Contains, json!("audit")),
            ]),
            TriggerCondition::negate(TriggerCondition::compare("owner", Operator::IsNotNull, Value::Null)),
        ]);
        assert!(cond.evaluate(&p));
    }

    #[test]
    fn unknown_operator_fails_closed() {
        let cond: TriggerCondition = serde_json::from_value(json!({
            "kind": "compare",
            "field": "risk.score",
            "op": "approximately",
            "value": 82
        }))
        .expect("deserialize");

        assert!(matches!(cond, TriggerCondition::Compare { op: Operator::Unknown, .. }));
        assert!(!cond.evaluate(&payload()));
        assert!(!TriggerCondition::negate(cond.clone()).evaluate(&payload()));
        assert!(!TriggerCondition::any(vec![
            TriggerCondition::Always,
            TriggerCondition::negate(cond),
        ])
        .evaluate(&payload()));
    }

    #[test]
    fn validate_reports_paths() {
        let cond = TriggerCondition::all(vec![
            TriggerCondition::compare("", Operator::Equals, json!(1)),
            TriggerCondition::any(vec![]),
            TriggerCondition::compare("x", Operator::Between, json!([1])),
            TriggerCondition::compare("y", Operator::Unknown, json!(1)),
        ]);
        let mut issues = Vec::new();
        validate(&cond, "condition", &mut issues);

        let fields = issues.iter().map(|i| i.field.as_str()).collect::<Vec<_>>();
        assert_eq!(
            fields,
            vec![
                "condition.conditions[0].field",
                "condition.conditions[1]",
                "condition.conditions[2].value",
                "condition.conditions[3].op",
            ]
        );
    }
}
