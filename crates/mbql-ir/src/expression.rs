//! Custom expressions and the named-expression clause

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value as Json};

use crate::aggregation::OffsetOptions;
use crate::codec::{self, impl_serde_via_json, Tagged};
use crate::error::ModelError;
use crate::field::ConcreteFieldRef;
use crate::filter::Filter;
use crate::types::{Literal, Value};

/// Free-form options of calls and `["value", …]`.
pub type CallOptions = Map<String, Json>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseOperator {
    Case,
    If,
}

impl CaseOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseOperator::Case => "case",
            CaseOperator::If => "if",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CaseOptions {
    pub default: Option<Box<Expression>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseExpression {
    pub operator: CaseOperator,
    pub clauses: Vec<(Expression, Expression)>,
    pub options: Option<CaseOptions>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallExpression {
    pub operator: String,
    pub args: Vec<Expression>,
    pub options: Option<CallOptions>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OffsetExpression {
    pub options: OffsetOptions,
    pub expr: Box<Expression>,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Literal),
    Field(ConcreteFieldRef),
    /// Boolean-valued expressions are filters.
    Filter(Box<Filter>),
    /// `["value", v, options|null]`; unlike literals this may wrap null.
    Value {
        value: Value,
        options: Option<CallOptions>,
    },
    Case(CaseExpression),
    Call(CallExpression),
    Offset(OffsetExpression),
}

impl Expression {
    pub fn call(operator: impl Into<String>, args: Vec<Expression>) -> Self {
        Expression::Call(CallExpression {
            operator: operator.into(),
            args,
            options: None,
        })
    }

    /// Visit every field reference in this expression, depth first.
    pub fn for_each_field<'a>(&'a self, visit: &mut impl FnMut(&'a ConcreteFieldRef)) {
        match self {
            Expression::Literal(_) | Expression::Value { .. } => {}
            Expression::Field(field) => visit(field),
            Expression::Filter(filter) => filter.for_each_field(visit),
            Expression::Case(case) => {
                for (condition, result) in &case.clauses {
                    condition.for_each_field(visit);
                    result.for_each_field(visit);
                }
                if let Some(default) = case.options.as_ref().and_then(|o| o.default.as_ref()) {
                    default.for_each_field(visit);
                }
            }
            Expression::Call(call) => {
                for arg in &call.args {
                    arg.for_each_field(visit);
                }
            }
            Expression::Offset(offset) => offset.expr.for_each_field(visit),
        }
    }

    /// Visit this expression and every nested sub-expression, depth first.
    /// Filters are visited as a single node.
    pub fn for_each_node<'a>(&'a self, visit: &mut impl FnMut(&'a Expression)) {
        visit(self);
        match self {
            Expression::Case(case) => {
                for (condition, result) in &case.clauses {
                    condition.for_each_node(visit);
                    result.for_each_node(visit);
                }
                if let Some(default) = case.options.as_ref().and_then(|o| o.default.as_ref()) {
                    default.for_each_node(visit);
                }
            }
            Expression::Call(call) => {
                for arg in &call.args {
                    arg.for_each_node(visit);
                }
            }
            Expression::Offset(offset) => offset.expr.for_each_node(visit),
            Expression::Literal(_) | Expression::Field(_) | Expression::Filter(_) | Expression::Value { .. } => {}
        }
    }

    /// Names of the expressions this one refers to.
    pub fn referenced_expressions(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.for_each_field(&mut |field| {
            if let Some(name) = field.expression_name() {
                names.push(name);
            }
        });
        names
    }
}

impl From<Literal> for Expression {
    fn from(literal: Literal) -> Self {
        Expression::Literal(literal)
    }
}

impl From<ConcreteFieldRef> for Expression {
    fn from(field: ConcreteFieldRef) -> Self {
        Expression::Field(field)
    }
}

impl From<Filter> for Expression {
    fn from(filter: Filter) -> Self {
        Expression::Filter(Box::new(filter))
    }
}

impl Tagged for Expression {
    const CLAUSE: &'static str = "expression";

    fn to_json(&self) -> Json {
        match self {
            Expression::Literal(literal) => literal.to_json(),
            Expression::Field(field) => field.to_json(),
            Expression::Filter(filter) => filter.to_json(),
            Expression::Value { value, options } => codec::tagged(
                "value",
                [value.to_json(), options.clone().map_or(Json::Null, Json::Object)],
            ),
            Expression::Case(case) => {
                let clauses = case
                    .clauses
                    .iter()
                    .map(|(condition, result)| Json::Array(vec![condition.to_json(), result.to_json()]))
                    .collect();
                let mut args = vec![Json::Array(clauses)];
                if let Some(options) = &case.options {
                    let mut map = Map::new();
                    codec::insert_opt(&mut map, "default", options.default.as_ref().map(|d| d.to_json()));
                    args.push(Json::Object(map));
                }
                codec::tagged(case.operator.as_str(), args)
            }
            Expression::Call(call) => {
                let mut args: Vec<Json> = call.args.iter().map(Expression::to_json).collect();
                if let Some(options) = &call.options {
                    args.push(Json::Object(options.clone()));
                }
                codec::tagged(&call.operator, args)
            }
            Expression::Offset(offset) => codec::tagged(
                "offset",
                [
                    offset.options.to_json(),
                    offset.expr.to_json(),
                    Json::from(offset.offset),
                ],
            ),
        }
    }

    fn from_json(value: &Json) -> Result<Self, ModelError> {
        const CLAUSE: &str = Expression::CLAUSE;
        match value {
            Json::Number(_) | Json::String(_) | Json::Bool(_) => {
                return Literal::from_json(value).map(Expression::Literal);
            }
            Json::Null => return Err(ModelError::shape(CLAUSE, "null is not an expression; use [\"value\", null, null]")),
            Json::Object(_) => return Err(ModelError::shape(CLAUSE, "an options object is not an expression")),
            Json::Array(_) => {}
        }

        let (tag, args) = codec::split_tagged(CLAUSE, value)?;
        match tag {
            "field" | "expression" => ConcreteFieldRef::from_json(value).map(Expression::Field),
            "aggregation" => Err(ModelError::shape(
                CLAUSE,
                "aggregation references are not valid inside expressions",
            )),
            "value" => {
                codec::expect_arity(CLAUSE, tag, args, 2, 2)?;
                let options = match &args[1] {
                    Json::Null => None,
                    raw => Some(codec::as_object(CLAUSE, raw)?.clone()),
                };
                Ok(Expression::Value {
                    value: Value::from_json(&args[0])?,
                    options,
                })
            }
            "case" | "if" => decode_case(tag, args),
            "offset" => {
                codec::expect_arity(CLAUSE, tag, args, 3, 3)?;
                let expr = Expression::from_json(&args[1])?;
                if matches!(expr, Expression::Offset(_)) {
                    return Err(ModelError::shape(CLAUSE, "offset expressions cannot be nested"));
                }
                Ok(Expression::Offset(OffsetExpression {
                    options: OffsetOptions::from_json(&args[0])?,
                    expr: Box::new(expr),
                    offset: codec::as_i64(CLAUSE, &args[2])?,
                }))
            }
            _ if Filter::is_filter_tag(tag) => match Filter::from_json(value) {
                Ok(filter) => Ok(Expression::Filter(Box::new(filter))),
                // Operators such as "=" and "<" also accept arbitrary operands.
                Err(_) => decode_call(tag, args),
            },
            _ => decode_call(tag, args),
        }
    }
}

impl_serde_via_json!(Expression);

fn decode_case(tag: &str, args: &[Json]) -> Result<Expression, ModelError> {
    const CLAUSE: &str = Expression::CLAUSE;
    codec::expect_arity(CLAUSE, tag, args, 1, 2)?;
    let operator = if tag == "case" { CaseOperator::Case } else { CaseOperator::If };

    let pairs = args[0]
        .as_array()
        .ok_or_else(|| ModelError::shape(CLAUSE, format!("\"{tag}\" expects a list of [condition, result] pairs")))?;
    let clauses = pairs
        .iter()
        .map(|pair| match pair.as_array().map(Vec::as_slice) {
            Some([condition, result]) => Ok((Expression::from_json(condition)?, Expression::from_json(result)?)),
            _ => Err(ModelError::shape(CLAUSE, format!("expected a [condition, result] pair, got {pair}"))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let options = args
        .get(1)
        .map(|raw| -> Result<_, ModelError> {
            let map = codec::as_object(CLAUSE, raw)?;
            codec::check_keys(CLAUSE, map, &["default"])?;
            let default = map.get("default").map(Expression::from_json).transpose()?;
            Ok(CaseOptions {
                default: default.map(Box::new),
            })
        })
        .transpose()?;

    Ok(Expression::Case(CaseExpression {
        operator,
        clauses,
        options,
    }))
}

fn decode_call(tag: &str, args: &[Json]) -> Result<Expression, ModelError> {
    let (operands, options) = match args.split_last() {
        Some((Json::Object(options), operands)) => (operands, Some(options.clone())),
        _ => (args, None),
    };
    let args = operands
        .iter()
        .map(Expression::from_json)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Expression::Call(CallExpression {
        operator: tag.to_string(),
        args,
        options,
    }))
}

/// The `expressions` clause: named expressions in authoring order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExpressionClause(Vec<(String, Expression)>);

impl ExpressionClause {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Expression> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, e)| e)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Insert or replace; a replaced expression keeps its position.
    pub fn insert(&mut self, name: impl Into<String>, expression: Expression) -> Option<Expression> {
        let name = name.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, expression)),
            None => {
                self.0.push((name, expression));
                None
            }
        }
    }

    /// Remove a named expression. References to it become dangling.
    pub fn remove(&mut self, name: &str) -> Option<Expression> {
        let index = self.0.iter().position(|(n, _)| n == name)?;
        Some(self.0.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Expression)> {
        self.0.iter().map(|(n, e)| (n.as_str(), e))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Tagged for ExpressionClause {
    const CLAUSE: &'static str = "expressions";

    fn to_json(&self) -> Json {
        Json::Object(
            self.0
                .iter()
                .map(|(name, expression)| (name.clone(), expression.to_json()))
                .collect(),
        )
    }

    fn from_json(value: &Json) -> Result<Self, ModelError> {
        let object = codec::as_object(Self::CLAUSE, value)?;
        object
            .iter()
            .map(|(name, raw)| Ok((name.clone(), Expression::from_json(raw)?)))
            .collect::<Result<Vec<_>, ModelError>>()
            .map(ExpressionClause)
    }
}

impl FromIterator<(String, Expression)> for ExpressionClause {
    fn from_iter<I: IntoIterator<Item = (String, Expression)>>(iter: I) -> Self {
        let mut clause = ExpressionClause::new();
        for (name, expression) in iter {
            clause.insert(name, expression);
        }
        clause
    }
}

impl Serialize for ExpressionClause {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, expression) in &self.0 {
            map.serialize_entry(name, expression)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ExpressionClause {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ClauseVisitor;

        impl<'de> Visitor<'de> for ClauseVisitor {
            type Value = ExpressionClause;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of expression names to expressions")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries: Vec<(String, Expression)> = Vec::new();
                while let Some((name, expression)) = access.next_entry::<String, Expression>()? {
                    if entries.iter().any(|(n, _)| *n == name) {
                        return Err(serde::de::Error::custom(format!("duplicate expression \"{name}\"")));
                    }
                    entries.push((name, expression));
                }
                Ok(ExpressionClause(entries))
            }
        }

        deserializer.deserialize_map(ClauseVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn round_trip(value: Json) -> Expression {
        let expression = Expression::from_json(&value).unwrap();
        assert_eq!(expression.to_json(), value);
        expression
    }

    #[test]
    fn test_literals_and_values() {
        assert!(matches!(round_trip(json!(42)), Expression::Literal(_)));
        assert!(matches!(round_trip(json!("x")), Expression::Literal(_)));
        assert!(matches!(round_trip(json!(["value", null, null])), Expression::Value { .. }));
        round_trip(json!(["value", "a", {"base_type": "type/Text"}]));
        assert!(Expression::from_json(&json!(null)).is_err());
    }

    #[test]
    fn test_call_with_options() {
        let expression = round_trip(json!(["concat", "a", ["field", 1, null], {"separator": ","}]));
        let Expression::Call(call) = expression else {
            panic!("expected a call");
        };
        assert_eq!(call.operator, "concat");
        assert_eq!(call.args.len(), 2);
        assert!(call.options.is_some());
    }

    #[test]
    fn test_filter_tags_fall_back_to_calls() {
        assert!(matches!(
            round_trip(json!(["=", ["field", 1, null], 3])),
            Expression::Filter(_)
        ));
        assert!(matches!(
            round_trip(json!(["<", ["+", ["field", 1, null], 1], 3])),
            Expression::Call(_)
        ));
    }

    #[test]
    fn test_case_expression() {
        let value = json!([
            "case",
            [[[">", ["field", 1, null], 10], "big"], [["<", ["field", 1, null], 0], "negative"]],
            {"default": "small"}
        ]);
        let Expression::Case(case) = round_trip(value) else {
            panic!("expected case");
        };
        assert_eq!(case.clauses.len(), 2);
        round_trip(json!(["if", [[["is-null", ["field", 1, null]], 0]]]));
        assert!(Expression::from_json(&json!(["case", [["only-one"]]])).is_err());
    }

    #[test]
    fn test_offset_expression() {
        round_trip(json!([
            "offset",
            {"lib/uuid": "0b0c7a4e-9e3a-4a53-bc5e-5e3f06f0a2c1", "name": "p", "display-name": "P"},
            ["field", 1, null],
            -1
        ]));
    }

    #[test]
    fn test_referenced_expressions() {
        let expression = Expression::from_json(&json!([
            "+",
            ["expression", "A"],
            ["case", [[["=", ["expression", "B"], 1], 2]], {"default": ["expression", "C"]}]
        ]))
        .unwrap();
        assert_eq!(expression.referenced_expressions(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_expression_clause_keeps_order() {
        let clause: ExpressionClause =
            serde_json::from_str(r#"{"Zeta": 1, "Alpha": ["expression", "Zeta"], "Mid": "m"}"#).unwrap();
        assert_eq!(clause.names().collect::<Vec<_>>(), vec!["Zeta", "Alpha", "Mid"]);
        assert_eq!(
            serde_json::to_string(&clause).unwrap(),
            r#"{"Zeta":1,"Alpha":["expression","Zeta"],"Mid":"m"}"#
        );
        assert!(serde_json::from_str::<ExpressionClause>(r#"{"A": 1, "A": 2}"#).is_err());
    }
}
