//! Semantic validation of decoded queries.
//!
//! Decoding only guarantees that every clause has a legal shape. This pass
//! checks what the shapes cannot express on their own:
//! - expression references resolve within their stage, without cycles
//! - join aliases are unique and every `join-alias` names a join
//! - `["aggregation", n]` points at an existing aggregation
//! - values assembled in code respect the constructor invariants

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::{
    Aggregation, ConcreteFieldRef, DatasetQuery, Expression, ExpressionClause, Filter, FieldReference,
    JoinFields, QuerySource, StructuredQuery,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IssueKind {
    #[error("reference to undefined expression \"{name}\"")]
    DanglingReference { name: String },

    #[error("expression \"{name}\" refers to itself")]
    CyclicExpression { name: String },

    #[error("join alias \"{alias}\" is used by more than one join")]
    DuplicateJoinAlias { alias: String },

    #[error("join alias \"{alias}\" does not name a join in this stage")]
    UnknownJoinAlias { alias: String },

    #[error("aggregation index {index} is out of range ({count} aggregations)")]
    AggregationIndexOutOfRange { index: usize, count: usize },

    #[error("compound filter has no operands")]
    EmptyCompoundFilter,

    #[error("offset cannot wrap another offset")]
    NestedOffset,
}

/// One problem found in a query, located by clause path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryIssue {
    /// e.g. `stage 1 / order-by[0]`
    pub path: String,
    pub kind: IssueKind,
}

impl fmt::Display for QueryIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.kind)
    }
}

/// Validate every stage of a structured query. Native queries have nothing
/// to check and always yield an empty list.
pub fn validate(query: &DatasetQuery) -> Vec<QueryIssue> {
    let mut validator = Validator::default();
    if let Some(structured) = query.as_structured() {
        validator.validate_query(structured, "");
    }
    debug!(issues = validator.issues.len(), "Validated dataset query");
    validator.issues
}

/// Names and aliases visible within one stage.
struct Scope<'a> {
    expressions: Option<&'a ExpressionClause>,
    join_aliases: HashSet<&'a str>,
    aggregation_count: usize,
}

#[derive(Default)]
struct Validator {
    issues: Vec<QueryIssue>,
}

impl Validator {
    fn report(&mut self, path: impl Into<String>, kind: IssueKind) {
        self.issues.push(QueryIssue {
            path: path.into(),
            kind,
        });
    }

    fn validate_query(&mut self, query: &StructuredQuery, prefix: &str) {
        for (index, stage) in query.stages().into_iter().enumerate() {
            self.validate_stage(stage, &format!("{prefix}stage {index}"));
        }
    }

    fn validate_stage(&mut self, stage: &StructuredQuery, path: &str) {
        let mut join_aliases = HashSet::new();
        for (index, join) in stage.joins.iter().flatten().enumerate() {
            if let Some(alias) = join.alias.as_deref() {
                if !join_aliases.insert(alias) {
                    self.report(
                        format!("{path} / joins[{index}]"),
                        IssueKind::DuplicateJoinAlias {
                            alias: alias.to_string(),
                        },
                    );
                }
            }
        }

        let scope = Scope {
            expressions: stage.expressions.as_ref(),
            join_aliases,
            aggregation_count: stage.aggregation.as_ref().map_or(0, Vec::len),
        };

        if let Some(expressions) = &stage.expressions {
            self.validate_expressions(&scope, expressions, path);
        }

        for (index, join) in stage.joins.iter().flatten().enumerate() {
            let join_path = format!("{path} / joins[{index}]");
            if let QuerySource::Query(inner) = &join.source {
                self.validate_query(inner, &format!("{join_path} / source-query / "));
            }
            let condition_path = format!("{join_path} / condition");
            self.check_reference(&scope, &join.condition.lhs, &condition_path);
            self.check_reference(&scope, &join.condition.rhs, &condition_path);
            if let Some(JoinFields::Fields(fields)) = &join.fields {
                for (i, field) in fields.iter().enumerate() {
                    self.check_field(&scope, field, &format!("{join_path} / fields[{i}]"));
                }
            }
        }

        if let Some(filter) = &stage.filter {
            self.check_filter(&scope, filter, &format!("{path} / filter"));
        }

        for (index, aggregation) in stage.aggregation.iter().flatten().enumerate() {
            self.check_aggregation(&scope, aggregation, &format!("{path} / aggregation[{index}]"));
        }

        for (index, field) in stage.breakout.iter().flatten().enumerate() {
            self.check_field(&scope, field, &format!("{path} / breakout[{index}]"));
        }

        for (index, order_by) in stage.order_by.iter().flatten().enumerate() {
            self.check_reference(&scope, &order_by.target, &format!("{path} / order-by[{index}]"));
        }

        for (index, field) in stage.fields.iter().flatten().enumerate() {
            self.check_field(&scope, field, &format!("{path} / fields[{index}]"));
        }
    }

    fn validate_expressions(&mut self, scope: &Scope<'_>, expressions: &ExpressionClause, path: &str) {
        for (name, expression) in expressions.iter() {
            let expression_path = format!("{path} / expressions.{name}");
            self.check_expression(scope, expression, &expression_path);
            if reaches(expressions, name, name) {
                self.report(
                    expression_path,
                    IssueKind::CyclicExpression {
                        name: name.to_string(),
                    },
                );
            }
        }
    }

    fn check_expression(&mut self, scope: &Scope<'_>, expression: &Expression, path: &str) {
        let mut nodes = Vec::new();
        expression.for_each_node(&mut |node| nodes.push(node));
        for node in nodes {
            match node {
                Expression::Field(field) => self.check_field(scope, field, path),
                Expression::Filter(filter) => self.check_filter(scope, filter, path),
                Expression::Offset(offset) if matches!(*offset.expr, Expression::Offset(_)) => {
                    self.report(path, IssueKind::NestedOffset)
                }
                _ => {}
            }
        }
    }

    fn check_filter(&mut self, scope: &Scope<'_>, filter: &Filter, path: &str) {
        let mut empty = 0;
        filter.for_each_filter(&mut |f| {
            if matches!(f, Filter::And(operands) | Filter::Or(operands) if operands.is_empty()) {
                empty += 1;
            }
        });
        for _ in 0..empty {
            self.report(path, IssueKind::EmptyCompoundFilter);
        }

        let mut fields = Vec::new();
        filter.for_each_field(&mut |field| fields.push(field));
        for field in fields {
            self.check_field(scope, field, path);
        }
    }

    fn check_aggregation(&mut self, scope: &Scope<'_>, aggregation: &Aggregation, path: &str) {
        if has_nested_offset(aggregation) {
            self.report(path, IssueKind::NestedOffset);
        }

        let mut fields = Vec::new();
        aggregation.for_each_field(&mut |field| fields.push(field));
        for field in fields {
            self.check_field(scope, field, path);
        }
    }

    fn check_reference(&mut self, scope: &Scope<'_>, reference: &FieldReference, path: &str) {
        match reference {
            FieldReference::Concrete(field) => self.check_field(scope, field, path),
            FieldReference::Aggregation(aggregation) => {
                if aggregation.index >= scope.aggregation_count {
                    self.report(
                        path,
                        IssueKind::AggregationIndexOutOfRange {
                            index: aggregation.index,
                            count: scope.aggregation_count,
                        },
                    );
                }
            }
        }
    }

    fn check_field(&mut self, scope: &Scope<'_>, field: &ConcreteFieldRef, path: &str) {
        if let Some(name) = field.expression_name() {
            if !scope.expressions.is_some_and(|e| e.contains(name)) {
                self.report(
                    path,
                    IssueKind::DanglingReference {
                        name: name.to_string(),
                    },
                );
            }
        }
        if let Some(alias) = field.join_alias() {
            if !scope.join_aliases.contains(alias) {
                self.report(
                    path,
                    IssueKind::UnknownJoinAlias {
                        alias: alias.to_string(),
                    },
                );
            }
        }
    }
}

fn has_nested_offset(aggregation: &Aggregation) -> bool {
    match aggregation {
        Aggregation::Offset { inner, .. } => inner.is_offset() || has_nested_offset(inner),
        Aggregation::Named { inner, .. } => has_nested_offset(inner),
        _ => false,
    }
}

/// Whether `target` is reachable from the references of expression `from`.
fn reaches(expressions: &ExpressionClause, from: &str, target: &str) -> bool {
    let mut seen = BTreeSet::new();
    let mut pending: Vec<&str> = expressions
        .get(from)
        .map(Expression::referenced_expressions)
        .unwrap_or_default();

    while let Some(name) = pending.pop() {
        if name == target {
            return true;
        }
        if !seen.insert(name) {
            continue;
        }
        if let Some(expression) = expressions.get(name) {
            pending.extend(expression.referenced_expressions());
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn issues(query: serde_json::Value) -> Vec<IssueKind> {
        let query: DatasetQuery = serde_json::from_value(query).unwrap();
        validate(&query).into_iter().map(|issue| issue.kind).collect()
    }

    fn stage(body: serde_json::Value) -> serde_json::Value {
        json!({"type": "query", "database": 1, "query": body})
    }

    #[test]
    fn test_valid_query_has_no_issues() {
        let query = stage(json!({
            "source-table": 1,
            "expressions": {"Total": ["+", ["field", 1, null], ["field", 2, null]]},
            "aggregation": [["sum", ["expression", "Total"]]],
            "breakout": [["field", 3, {"temporal-unit": "month"}]],
            "order-by": [["desc", ["aggregation", 0]]]
        }));
        assert!(issues(query).is_empty());
    }

    #[test]
    fn test_dangling_reference() {
        let query = stage(json!({
            "source-table": 1,
            "filter": [">", ["expression", "Missing"], 1]
        }));
        assert_eq!(
            issues(query),
            vec![IssueKind::DanglingReference {
                name: "Missing".to_string()
            }]
        );
    }

    #[test]
    fn test_cyclic_expressions() {
        let query = stage(json!({
            "source-table": 1,
            "expressions": {
                "A": ["+", ["expression", "B"], 1],
                "B": ["*", ["expression", "A"], 2],
                "C": ["+", ["expression", "A"], 3]
            }
        }));
        assert_eq!(
            issues(query),
            vec![
                IssueKind::CyclicExpression { name: "A".to_string() },
                IssueKind::CyclicExpression { name: "B".to_string() },
            ]
        );
    }

    #[test]
    fn test_join_aliases() {
        let query = stage(json!({
            "source-table": 1,
            "joins": [
                {"source-table": 2, "alias": "P", "condition": ["=", ["field", 1, null], ["field", 2, {"join-alias": "P"}]]},
                {"source-table": 3, "alias": "P", "condition": ["=", ["field", 1, null], ["field", 3, {"join-alias": "Q"}]]}
            ]
        }));
        assert_eq!(
            issues(query),
            vec![
                IssueKind::DuplicateJoinAlias { alias: "P".to_string() },
                IssueKind::UnknownJoinAlias { alias: "Q".to_string() },
            ]
        );
    }

    #[test]
    fn test_aggregation_index_out_of_range_reports_path() {
        let query: DatasetQuery = serde_json::from_value(stage(json!({
            "source-query": {"source-table": 1},
            "aggregation": [["count"]],
            "order-by": [["asc", ["aggregation", 1]]]
        })))
        .unwrap();
        let found = validate(&query);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, "stage 1 / order-by[0]");
        assert_eq!(
            found[0].to_string(),
            "stage 1 / order-by[0]: aggregation index 1 is out of range (1 aggregations)"
        );
    }

    #[test]
    fn test_constructed_values_bypassing_constructors() {
        let mut query = StructuredQuery::from_table(1);
        query.filter = Some(Filter::And(Vec::new()));
        let offset = Aggregation::Offset {
            options: crate::OffsetOptions::new("a", "A"),
            inner: Box::new(Aggregation::Offset {
                options: crate::OffsetOptions::new("b", "B"),
                inner: Box::new(Aggregation::Count),
                offset: -1,
            }),
            offset: -1,
        };
        query.add_aggregation(offset);

        let found: Vec<_> = validate(&DatasetQuery::structured(query, Some(1)))
            .into_iter()
            .map(|issue| issue.kind)
            .collect();
        assert_eq!(found, vec![IssueKind::EmptyCompoundFilter, IssueKind::NestedOffset]);
    }

    #[test]
    fn test_native_query_is_not_validated() {
        let query = DatasetQuery::native(crate::NativeQuery::new("select 1"), None);
        assert!(validate(&query).is_empty());
    }
}
