// Query Params - raw filter values and how they are read
// A parameter is a join word plus values, each value an optional operator plus an operand

use serde_json::Value;
use std::collections::BTreeMap;

use crate::collections::Collection;
use crate::core::{CollectionId, ElementId, RatingId, UserId};
use crate::infrastructure::collaborators::{Element, User};
use crate::ratings::status::RatingStatus;

/// Marker for "no value"; `not :empty:` matches any value.
pub const EMPTY: &str = ":empty:";
pub const NOT_EMPTY: &str = ":notempty:";

/// A raw filter value as a caller supplies it
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    Int(i64),
    Str(String),
    List(Vec<ParamValue>),
    Object(BTreeMap<String, ParamValue>),
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(value as i64)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(values: Vec<T>) -> Self {
        ParamValue::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(ParamValue::Null)
    }
}

macro_rules! id_param {
    ($($id:ty),*) => {
        $(impl From<$id> for ParamValue {
            fn from(id: $id) -> Self {
                ParamValue::Int(id.value())
            }
        })*
    };
}

id_param!(RatingId, CollectionId, ElementId, UserId);

impl From<&Collection> for ParamValue {
    fn from(collection: &Collection) -> Self {
        ParamValue::Int(collection.id.value())
    }
}

impl From<&Element> for ParamValue {
    fn from(element: &Element) -> Self {
        ParamValue::Int(element.id.value())
    }
}

impl From<&User> for ParamValue {
    fn from(user: &User) -> Self {
        ParamValue::Int(user.id.value())
    }
}

impl From<RatingStatus> for ParamValue {
    fn from(status: RatingStatus) -> Self {
        ParamValue::Str(status.as_str().to_string())
    }
}

impl From<Value> for ParamValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => ParamValue::Null,
            Value::Bool(flag) => ParamValue::Int(flag as i64),
            Value::Number(number) => match number.as_i64() {
                Some(int) => ParamValue::Int(int),
                None => ParamValue::Str(number.to_string()),
            },
            Value::String(text) => ParamValue::Str(text),
            Value::Array(items) => ParamValue::List(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => ParamValue::Object(
                map.into_iter()
                    .map(|(key, value)| (key, value.into()))
                    .collect(),
            ),
        }
    }
}

/// How the values of one parameter combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Join {
    And,
    #[default]
    Or,
}

impl Join {
    pub fn as_sql(self) -> &'static str {
        match self {
            Join::And => " AND ",
            Join::Or => " OR ",
        }
    }
}

/// A parameter split into its join and its values
#[derive(Debug, Clone, PartialEq)]
pub struct BaseParam {
    pub join: Join,
    pub values: Vec<ParamValue>,
}

/// Split a raw value into join and values.
///
/// A leading "and"/"or" element of a list is the join (default "or").
/// An object carrying an `id` key stands for that id.
pub fn parse_base_param(value: impl Into<ParamValue>) -> BaseParam {
    let mut join = Join::Or;
    let values = match value.into() {
        ParamValue::List(mut items) => {
            if let Some(ParamValue::Str(first)) = items.first() {
                let first = first.trim();
                if first.eq_ignore_ascii_case("and") {
                    join = Join::And;
                    items.remove(0);
                } else if first.eq_ignore_ascii_case("or") {
                    items.remove(0);
                }
            }
            items.into_iter().map(collapse_object).collect()
        }
        other => vec![collapse_object(other)],
    };
    BaseParam { join, values }
}

fn collapse_object(value: ParamValue) -> ParamValue {
    match value {
        ParamValue::Object(mut map) => map.remove("id").unwrap_or(ParamValue::Object(map)),
        other => other,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Operator {
    pub fn as_sql(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
        }
    }

    pub fn is_negated(self) -> bool {
        self == Operator::Ne
    }
}

/// Longest prefixes first so `<=` wins over `<`.
const OPERATOR_PREFIXES: &[(&str, Operator)] = &[
    ("not ", Operator::Ne),
    ("!=", Operator::Ne),
    ("<=", Operator::Le),
    (">=", Operator::Ge),
    ("<", Operator::Lt),
    (">", Operator::Gt),
    ("=", Operator::Eq),
];

/// What a value compares against once its operator is stripped
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No value at all
    Empty,
    /// A numeric id, usable directly
    Id(i64),
    /// Text: a handle, URI, username/email or a literal for text columns
    Text(String),
}

impl Operand {
    /// Literal text for text columns.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Operand::Empty => None,
            Operand::Id(id) => Some(id.to_string()),
            Operand::Text(text) => Some(text.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamCondition {
    pub operator: Operator,
    pub operand: Operand,
}

/// Read one value of a parameter into an operator and an operand.
pub fn find_param_value(value: &ParamValue) -> ParamCondition {
    let text = match value {
        ParamValue::Null => EMPTY.to_string(),
        ParamValue::Int(id) => {
            return ParamCondition { operator: Operator::Eq, operand: Operand::Id(*id) };
        }
        ParamValue::Str(text) if text.trim().is_empty() => EMPTY.to_string(),
        ParamValue::Str(text) => text.trim().to_string(),
        // lists and id-less objects cannot be compared against a column
        ParamValue::List(_) | ParamValue::Object(_) => {
            return ParamCondition {
                operator: Operator::Eq,
                operand: Operand::Text(String::new()),
            };
        }
    };

    let text = if text.eq_ignore_ascii_case(NOT_EMPTY) {
        format!("not {}", EMPTY)
    } else {
        text
    };

    let (operator, residue) = split_operator(&text);
    let operand = if residue.eq_ignore_ascii_case(EMPTY) {
        Operand::Empty
    } else if let Ok(id) = residue.parse::<i64>() {
        Operand::Id(id)
    } else {
        Operand::Text(residue.to_string())
    };
    ParamCondition { operator, operand }
}

fn split_operator(text: &str) -> (Operator, &str) {
    for (prefix, operator) in OPERATOR_PREFIXES {
        if let Some(head) = text.get(..prefix.len()) {
            if head.eq_ignore_ascii_case(prefix) {
                return (*operator, text[prefix.len()..].trim());
            }
        }
    }
    (Operator::Eq, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_word_is_extracted() {
        let param = parse_base_param(json!(["and", 5, 7]));
        assert_eq!(param.join, Join::And);
        assert_eq!(param.values, vec![ParamValue::Int(5), ParamValue::Int(7)]);

        let param = parse_base_param(json!(["OR", "reviews"]));
        assert_eq!(param.join, Join::Or);
        assert_eq!(param.values, vec![ParamValue::from("reviews")]);

        let param = parse_base_param(vec![3, 4]);
        assert_eq!(param.join, Join::Or);
        assert_eq!(param.values.len(), 2);
    }

    #[test]
    fn test_object_with_id_collapses() {
        let param = parse_base_param(json!({"id": 9}));
        assert_eq!(param.values, vec![ParamValue::Int(9)]);

        let param = parse_base_param(json!(["and", {"id": 1}, {"id": 2}]));
        assert_eq!(param.values, vec![ParamValue::Int(1), ParamValue::Int(2)]);
    }

    #[test]
    fn test_operator_prefixes() {
        let plain = find_param_value(&"5".into());
        assert_eq!(plain, ParamCondition { operator: Operator::Eq, operand: Operand::Id(5) });

        let ge = find_param_value(&">= 3".into());
        assert_eq!(ge, ParamCondition { operator: Operator::Ge, operand: Operand::Id(3) });

        let le = find_param_value(&"<=10".into());
        assert_eq!(le.operator, Operator::Le);

        let not = find_param_value(&"NOT reviews".into());
        assert_eq!(not.operator, Operator::Ne);
        assert_eq!(not.operand, Operand::Text("reviews".into()));

        let ne = find_param_value(&"!=blog/post".into());
        assert_eq!(ne.operator, Operator::Ne);
        assert_eq!(ne.operand, Operand::Text("blog/post".into()));
    }

    #[test]
    fn test_empty_markers() {
        assert_eq!(find_param_value(&ParamValue::Null).operand, Operand::Empty);
        assert_eq!(find_param_value(&"".into()).operand, Operand::Empty);

        let not_empty = find_param_value(&NOT_EMPTY.into());
        assert_eq!(not_empty.operator, Operator::Ne);
        assert_eq!(not_empty.operand, Operand::Empty);
    }

    #[test]
    fn test_word_starting_with_not_is_not_an_operator() {
        let value = find_param_value(&"notable".into());
        assert_eq!(value.operator, Operator::Eq);
        assert_eq!(value.operand, Operand::Text("notable".into()));
    }
}
