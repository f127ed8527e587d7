//! Conditions carried by conditional and loop nodes.
//!
//! A condition is either a boolean literal or a group of comparisons whose
//! left-hand side is a template selector such as `{{nodes.check.output}}`.
//! Selectors that cannot be resolved compare as absent; evaluation never fails.

use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    Result, StepflowError,
    workflow::template::{self, Scope},
};

/// Logical operator
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

/// Comparison operator
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ComparisonOperator {
    // for string or array
    Contains,
    NotContains,
    StartWith,
    EndWith,
    Is,
    IsNot,
    Empty,
    NotEmpty,
    In,
    NotIn,
    AllOf,
    // for number
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Null,
    NotNull,
}

/// Right-hand side of a comparison. Numbers and booleans are kept in their
/// textual form and parsed back where a numeric comparison needs them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", untagged)]
pub enum ConditionValue {
    Str(String),
    List(Vec<String>),
}

impl From<Value> for ConditionValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => ConditionValue::List(items.iter().map(scalar_text).collect()),
            other => ConditionValue::Str(scalar_text(&other)),
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparison {
    #[serde(alias = "variable_selector")]
    pub variable_selector: String,
    #[serde(alias = "comparison_operator")]
    pub comparison_operator: ComparisonOperator,
    #[serde(default)]
    pub value: Option<ConditionValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Literal(bool),
    Group {
        #[serde(default, rename = "logicalOperator", alias = "logical_operator")]
        logical_operator: LogicalOperator,
        conditions: Vec<Comparison>,
    },
}

impl Default for Condition {
    fn default() -> Self {
        Condition::Literal(false)
    }
}

static CONDITION_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    serde_json::json!({
        "oneOf": [
            { "type": "boolean" },
            {
                "type": "object",
                "properties": {
                    "logicalOperator": { "type": "string", "enum": ["and", "or"] },
                    "logical_operator": { "type": "string", "enum": ["and", "or"] },
                    "conditions": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "variableSelector": { "type": "string" },
                                "variable_selector": { "type": "string" },
                                "comparisonOperator": { "type": "string" },
                                "comparison_operator": { "type": "string" },
                                "value": {}
                            },
                            "anyOf": [
                                { "required": ["variableSelector"] },
                                { "required": ["variable_selector"] }
                            ]
                        }
                    }
                },
                "required": ["conditions"]
            }
        ]
    })
});

impl Condition {
    /// Parses and validates a condition; `None` (absent) means `false`.
    pub fn parse(
        node_id: &str,
        value: Option<&Value>,
    ) -> Result<Self> {
        let Some(value) = value else {
            return Ok(Condition::default());
        };
        jsonschema::validate(&CONDITION_SCHEMA, value).map_err(|e| StepflowError::Node(format!("invalid condition on node {}: {}", node_id, e)))?;
        serde_json::from_value(value.clone()).map_err(|e| StepflowError::Node(format!("invalid condition on node {}: {}", node_id, e)))
    }

    pub fn evaluate(
        &self,
        scope: &Scope<'_>,
    ) -> bool {
        match self {
            Condition::Literal(b) => *b,
            Condition::Group {
                logical_operator,
                conditions,
            } => {
                let mut results = conditions.iter().map(|c| c.evaluate(scope));
                match logical_operator {
                    LogicalOperator::And => results.all(|r| r),
                    LogicalOperator::Or => results.any(|r| r),
                }
            }
        }
    }
}

impl Comparison {
    pub fn evaluate(
        &self,
        scope: &Scope<'_>,
    ) -> bool {
        let actual = template::resolve_value(scope, &self.variable_selector);
        evaluate_comparison(&actual, self.comparison_operator, &self.value)
    }
}

/// Evaluate a single comparison
fn evaluate_comparison(
    actual: &Option<Value>,
    operator: ComparisonOperator,
    expected: &Option<ConditionValue>,
) -> bool {
    match operator {
        ComparisonOperator::Null => actual.is_none() || matches!(actual, Some(Value::Null)),
        ComparisonOperator::NotNull => actual.is_some() && !matches!(actual, Some(Value::Null)),
        ComparisonOperator::Empty => is_empty(actual),
        ComparisonOperator::NotEmpty => !is_empty(actual),
        _ => {
            let (Some(actual), Some(expected)) = (actual, expected) else {
                return false;
            };
            evaluate_with_value(actual, operator, expected)
        }
    }
}

fn is_empty(actual: &Option<Value>) -> bool {
    match actual {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(arr)) => arr.is_empty(),
        Some(Value::Object(obj)) => obj.is_empty(),
        _ => false,
    }
}

/// Evaluate comparison operators that require a value
fn evaluate_with_value(
    actual: &Value,
    operator: ComparisonOperator,
    expected: &ConditionValue,
) -> bool {
    match operator {
        ComparisonOperator::Contains => eval_contains(actual, expected),
        ComparisonOperator::NotContains => !eval_contains(actual, expected),
        ComparisonOperator::StartWith => as_text(actual).zip(expected_str(expected)).is_some_and(|(a, e)| a.starts_with(e)),
        ComparisonOperator::EndWith => as_text(actual).zip(expected_str(expected)).is_some_and(|(a, e)| a.ends_with(e)),
        ComparisonOperator::Is => eval_is(actual, expected),
        ComparisonOperator::IsNot => !eval_is(actual, expected),
        ComparisonOperator::In => eval_in(actual, expected),
        ComparisonOperator::NotIn => !eval_in(actual, expected),
        ComparisonOperator::AllOf => eval_all_of(actual, expected),
        ComparisonOperator::Eq => eval_eq(actual, expected),
        ComparisonOperator::Ne => !eval_eq(actual, expected),
        ComparisonOperator::Gt => eval_cmp(actual, expected, |a, b| a > b),
        ComparisonOperator::Lt => eval_cmp(actual, expected, |a, b| a < b),
        ComparisonOperator::Ge => eval_cmp(actual, expected, |a, b| a >= b),
        ComparisonOperator::Le => eval_cmp(actual, expected, |a, b| a <= b),
        ComparisonOperator::Null | ComparisonOperator::NotNull | ComparisonOperator::Empty | ComparisonOperator::NotEmpty => false,
    }
}

fn expected_str(expected: &ConditionValue) -> Option<&str> {
    match expected {
        ConditionValue::Str(s) => Some(s),
        ConditionValue::List(_) => None,
    }
}

fn as_text(actual: &Value) -> Option<String> {
    match actual {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn as_number(actual: &Value) -> Option<f64> {
    match actual {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn eval_contains(
    actual: &Value,
    expected: &ConditionValue,
) -> bool {
    let Some(e) = expected_str(expected) else {
        return false;
    };
    match actual {
        Value::String(s) => s.contains(e),
        Value::Array(arr) => arr.iter().any(|v| as_text(v).as_deref() == Some(e)),
        _ => false,
    }
}

fn eval_is(
    actual: &Value,
    expected: &ConditionValue,
) -> bool {
    match (actual, expected) {
        (Value::String(s), ConditionValue::Str(e)) => s.trim() == e,
        (Value::Bool(b), ConditionValue::Str(e)) => (*b && e == "true") || (!*b && e == "false"),
        _ => false,
    }
}

fn eval_in(
    actual: &Value,
    expected: &ConditionValue,
) -> bool {
    let Some(a) = as_text(actual) else {
        return false;
    };
    match expected {
        ConditionValue::List(list) => list.contains(&a),
        ConditionValue::Str(s) => s.contains(a.as_str()),
    }
}

fn eval_all_of(
    actual: &Value,
    expected: &ConditionValue,
) -> bool {
    match (actual, expected) {
        (Value::Array(arr), ConditionValue::List(list)) => list.iter().all(|e| arr.iter().any(|v| as_text(v).as_deref() == Some(e.as_str()))),
        _ => false,
    }
}

fn eval_eq(
    actual: &Value,
    expected: &ConditionValue,
) -> bool {
    let Some(e) = expected_str(expected) else {
        return false;
    };
    if let (Some(a), Ok(e)) = (as_number(actual), e.trim().parse::<f64>()) {
        return a == e;
    }
    as_text(actual).is_some_and(|a| a == e)
}

fn eval_cmp<F>(
    actual: &Value,
    expected: &ConditionValue,
    cmp: F,
) -> bool
where
    F: Fn(f64, f64) -> bool,
{
    let Some(e) = expected_str(expected).and_then(|e| e.trim().parse::<f64>().ok()) else {
        return false;
    };
    as_number(actual).is_some_and(|a| cmp(a, e))
}
