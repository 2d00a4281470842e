//! Custom-field conditions and the groups that combine them.
//!
//! A [`Condition`] is a single `field <operator> value` test. Values arrive from
//! the editor as one string; construction splits and validates that string
//! against the operator so a `BETWEEN` with one bound or an `IN` with no
//! members cannot exist past this module.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<")]
    Less,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "LIKE")]
    Like,
    #[serde(rename = "NOT LIKE")]
    NotLike,
    #[serde(rename = "EXISTS")]
    Exists,
    #[serde(rename = "NOT EXISTS")]
    NotExists,
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "NOT IN")]
    NotIn,
    #[serde(rename = "BETWEEN")]
    Between,
    #[serde(rename = "NOT BETWEEN")]
    NotBetween,
}

/// Shape of the value an operator consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    None,
    Single,
    List,
    Pair,
}

impl Operator {
    pub const ALL: [Operator; 14] = [
        Operator::Equal,
        Operator::NotEqual,
        Operator::Greater,
        Operator::GreaterOrEqual,
        Operator::Less,
        Operator::LessOrEqual,
        Operator::Like,
        Operator::NotLike,
        Operator::Exists,
        Operator::NotExists,
        Operator::In,
        Operator::NotIn,
        Operator::Between,
        Operator::NotBetween,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Equal => "=",
            Operator::NotEqual => "!=",
            Operator::Greater => ">",
            Operator::GreaterOrEqual => ">=",
            Operator::Less => "<",
            Operator::LessOrEqual => "<=",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
            Operator::Exists => "EXISTS",
            Operator::NotExists => "NOT EXISTS",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::Between => "BETWEEN",
            Operator::NotBetween => "NOT BETWEEN",
        }
    }

    pub fn arity(self) -> Arity {
        match self {
            Operator::Exists | Operator::NotExists => Arity::None,
            Operator::In | Operator::NotIn => Arity::List,
            Operator::Between | Operator::NotBetween => Arity::Pair,
            _ => Arity::Single,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        Operator::ALL
            .into_iter()
            .find(|op| op.as_str() == normalized)
            .ok_or_else(|| DomainError::unknown("operator", value))
    }
}

/// Storage type of a custom field. Drives value coercion only; every operator
/// is accepted with every type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValueType {
    #[default]
    Char,
    Numeric,
    Date,
    Datetime,
    Time,
    Binary,
}

impl ValueType {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::Char => "CHAR",
            ValueType::Numeric => "NUMERIC",
            ValueType::Date => "DATE",
            ValueType::Datetime => "DATETIME",
            ValueType::Time => "TIME",
            ValueType::Binary => "BINARY",
        }
    }

    /// Coerce a raw editor value into the JSON scalar sent to the content API.
    pub fn coerce(self, raw: &str) -> Value {
        match self {
            ValueType::Numeric => {
                let trimmed = raw.trim();
                if let Ok(int) = trimmed.parse::<i64>() {
                    return Value::from(int);
                }
                match trimmed.parse::<f64>() {
                    Ok(float) if float.is_finite() => Value::from(float),
                    _ => Value::String(raw.to_string()),
                }
            }
            ValueType::Binary => match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Value::String("1".to_string()),
                "" | "0" | "false" | "no" | "off" => Value::String("0".to_string()),
                _ => Value::String(raw.to_string()),
            },
            ValueType::Char | ValueType::Date | ValueType::Datetime | ValueType::Time => {
                Value::String(raw.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Relation {
    #[default]
    And,
    Or,
}

impl Relation {
    pub fn as_str(self) -> &'static str {
        match self {
            Relation::And => "AND",
            Relation::Or => "OR",
        }
    }
}

/// Operator-shaped condition value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionValue {
    Absent,
    Single(String),
    List(Vec<String>),
    Range { min: String, max: String },
}

impl ConditionValue {
    /// Split a raw editor string according to the operator's arity.
    pub fn parse(compare: Operator, raw: &str) -> Result<Self, DomainError> {
        match compare.arity() {
            Arity::None => Ok(ConditionValue::Absent),
            Arity::Single => Ok(ConditionValue::Single(raw.to_string())),
            Arity::List => {
                let members = split_list(raw);
                if members.is_empty() {
                    return Err(DomainError::validation(
                        "value",
                        format!("{compare} requires at least one comma-separated value"),
                    ));
                }
                Ok(ConditionValue::List(members))
            }
            Arity::Pair => {
                let mut members = split_list(raw);
                if members.len() != 2 {
                    return Err(DomainError::validation(
                        "value",
                        format!(
                            "{compare} requires exactly two values as `min,max`, got {}",
                            members.len()
                        ),
                    ));
                }
                let max = members.pop().unwrap_or_default();
                let min = members.pop().unwrap_or_default();
                Ok(ConditionValue::Range { min, max })
            }
        }
    }

    /// Raw editor form, the inverse of [`ConditionValue::parse`].
    pub fn to_raw(&self) -> String {
        match self {
            ConditionValue::Absent => String::new(),
            ConditionValue::Single(value) => value.clone(),
            ConditionValue::List(values) => values.join(","),
            ConditionValue::Range { min, max } => format!("{min},{max}"),
        }
    }

    /// Typed JSON for the serialized field-condition payload. `None` for
    /// existence checks, which carry no value.
    pub fn to_payload(&self, value_type: ValueType) -> Option<Value> {
        match self {
            ConditionValue::Absent => None,
            ConditionValue::Single(value) => Some(value_type.coerce(value)),
            ConditionValue::List(values) => Some(Value::Array(
                values.iter().map(|v| value_type.coerce(v)).collect(),
            )),
            ConditionValue::Range { min, max } => Some(Value::Array(vec![
                value_type.coerce(min),
                value_type.coerce(max),
            ])),
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCondition", into = "RawCondition")]
pub struct Condition {
    id: String,
    field: String,
    compare: Operator,
    value: ConditionValue,
    value_type: ValueType,
}

impl Condition {
    pub fn new(
        id: impl Into<String>,
        field: impl Into<String>,
        compare: Operator,
        raw_value: &str,
        value_type: ValueType,
    ) -> Result<Self, DomainError> {
        let field = field.into();
        if field.trim().is_empty() {
            return Err(DomainError::validation("field", "field name is required"));
        }
        let value = ConditionValue::parse(compare, raw_value)?;
        Ok(Self {
            id: id.into(),
            field,
            compare,
            value,
            value_type,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn compare(&self) -> Operator {
        self.compare
    }

    pub fn value(&self) -> &ConditionValue {
        &self.value
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCondition {
    #[serde(default)]
    id: String,
    #[serde(default)]
    field: String,
    compare: Operator,
    #[serde(default)]
    value: String,
    #[serde(default, rename = "type")]
    value_type: ValueType,
}

impl TryFrom<RawCondition> for Condition {
    type Error = DomainError;

    fn try_from(raw: RawCondition) -> Result<Self, Self::Error> {
        Condition::new(raw.id, raw.field, raw.compare, &raw.value, raw.value_type)
    }
}

impl From<Condition> for RawCondition {
    fn from(condition: Condition) -> Self {
        RawCondition {
            value: condition.value.to_raw(),
            id: condition.id,
            field: condition.field,
            compare: condition.compare,
            value_type: condition.value_type,
        }
    }
}

/// Ordered set of conditions.
///
/// `relation` combines the conditions inside this group. `combine_with_previous`
/// combines this group with the accumulated result of the groups before it and
/// is ignored on the first group. Payloads that only carry `relation` use it for
/// both roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawConditionGroup", rename_all = "camelCase")]
pub struct ConditionGroup {
    pub id: String,
    pub relation: Relation,
    pub combine_with_previous: Relation,
    pub conditions: Vec<Condition>,
}

impl ConditionGroup {
    pub fn new(id: impl Into<String>, relation: Relation) -> Self {
        Self {
            id: id.into(),
            relation,
            combine_with_previous: relation,
            conditions: Vec::new(),
        }
    }

    pub fn combined_with(mut self, relation: Relation) -> Self {
        self.combine_with_previous = relation;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConditionGroup {
    #[serde(default)]
    id: String,
    #[serde(default)]
    relation: Option<Relation>,
    #[serde(default)]
    combine_with_previous: Option<Relation>,
    #[serde(default)]
    conditions: Vec<Value>,
}

impl From<RawConditionGroup> for ConditionGroup {
    fn from(raw: RawConditionGroup) -> Self {
        let relation = raw.relation.unwrap_or_default();
        let conditions = raw
            .conditions
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<Condition>(value) {
                Ok(condition) => Some(condition),
                Err(err) => {
                    warn!(
                        group_id = %raw.id,
                        error = %err,
                        "Dropping invalid field condition"
                    );
                    None
                }
            })
            .collect();

        ConditionGroup {
            combine_with_previous: raw.combine_with_previous.unwrap_or(relation),
            relation,
            conditions,
            id: raw.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn operator_parses_all_fourteen_spellings() {
        for op in Operator::ALL {
            assert_eq!(op.as_str().parse::<Operator>().expect("known operator"), op);
        }
        assert_eq!("not like".parse::<Operator>(), Ok(Operator::NotLike));
        assert!("CONTAINS".parse::<Operator>().is_err());
    }

    #[test]
    fn exists_ignores_value() {
        let condition =
            Condition::new("c1", "price", Operator::Exists, "whatever", ValueType::Numeric)
                .expect("valid condition");
        assert_eq!(condition.value(), &ConditionValue::Absent);
        assert_eq!(condition.value().to_payload(ValueType::Numeric), None);
    }

    #[test]
    fn in_splits_and_trims_list() {
        let condition = Condition::new("c1", "color", Operator::In, " red, blue ,,green", ValueType::Char)
            .expect("valid condition");
        assert_eq!(
            condition.value(),
            &ConditionValue::List(vec!["red".into(), "blue".into(), "green".into()])
        );
    }

    #[test]
    fn in_with_no_members_is_rejected() {
        let err = Condition::new("c1", "color", Operator::NotIn, " , ", ValueType::Char)
            .expect_err("empty list rejected");
        assert!(matches!(err, DomainError::Validation { field: "value", .. }));
    }

    #[test]
    fn between_requires_exactly_two_bounds() {
        assert!(Condition::new("c1", "price", Operator::Between, "10", ValueType::Numeric).is_err());
        assert!(
            Condition::new("c1", "price", Operator::Between, "1,2,3", ValueType::Numeric).is_err()
        );

        let condition = Condition::new("c1", "price", Operator::NotBetween, "10, 20", ValueType::Numeric)
            .expect("valid range");
        assert_eq!(
            condition.value(),
            &ConditionValue::Range {
                min: "10".into(),
                max: "20".into()
            }
        );
    }

    #[test]
    fn empty_field_is_rejected() {
        let err = Condition::new("c1", "  ", Operator::Equal, "x", ValueType::Char)
            .expect_err("field required");
        assert!(matches!(err, DomainError::Validation { field: "field", .. }));
    }

    #[test]
    fn numeric_coercion_emits_numbers_when_parseable() {
        assert_eq!(ValueType::Numeric.coerce(" 42 "), json!(42));
        assert_eq!(ValueType::Numeric.coerce("2.5"), json!(2.5));
        assert_eq!(ValueType::Numeric.coerce("n/a"), json!("n/a"));
        assert_eq!(ValueType::Char.coerce("42"), json!("42"));
    }

    #[test]
    fn binary_coercion_normalizes_flags() {
        assert_eq!(ValueType::Binary.coerce("true"), json!("1"));
        assert_eq!(ValueType::Binary.coerce("off"), json!("0"));
        assert_eq!(ValueType::Binary.coerce(""), json!("0"));
    }

    #[test]
    fn condition_round_trips_through_editor_json() {
        let value = json!({
            "id": "c1",
            "field": "price",
            "compare": "BETWEEN",
            "value": "10,20",
            "type": "NUMERIC"
        });
        let condition: Condition = serde_json::from_value(value.clone()).expect("deserialize");
        assert_eq!(condition.compare(), Operator::Between);
        assert_eq!(serde_json::to_value(&condition).expect("serialize"), value);
    }

    #[test]
    fn group_drops_invalid_conditions() {
        let group: ConditionGroup = serde_json::from_value(json!({
            "id": "g1",
            "relation": "OR",
            "conditions": [
                { "id": "ok", "field": "price", "compare": ">", "value": "5", "type": "NUMERIC" },
                { "id": "bad-range", "field": "price", "compare": "BETWEEN", "value": "5" },
                { "id": "no-field", "field": "", "compare": "=", "value": "x" },
                { "id": "bad-op", "field": "price", "compare": "CONTAINS", "value": "x" }
            ]
        }))
        .expect("group deserializes");

        assert_eq!(group.conditions.len(), 1);
        assert_eq!(group.conditions[0].id(), "ok");
    }

    #[test]
    fn legacy_relation_fills_both_roles() {
        let group: ConditionGroup =
            serde_json::from_value(json!({ "id": "g1", "relation": "OR", "conditions": [] }))
                .expect("group deserializes");
        assert_eq!(group.relation, Relation::Or);
        assert_eq!(group.combine_with_previous, Relation::Or);

        let split: ConditionGroup = serde_json::from_value(json!({
            "id": "g2",
            "relation": "OR",
            "combineWithPrevious": "AND",
            "conditions": []
        }))
        .expect("group deserializes");
        assert_eq!(split.relation, Relation::Or);
        assert_eq!(split.combine_with_previous, Relation::And);
    }
}
