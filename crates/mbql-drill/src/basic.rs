//! Built-in drill-throughs that need only the query and the click

use tracing::{debug, info};

use std::collections::BTreeMap;

use mbql_ir::{
    Aggregation, BinnedField, BinningOptions, Bucketing, CardId, ComparisonOp, ConcreteFieldRef, DatasetQuery,
    DatetimeUnit, EqualityOp, Expression, ExpressionClause, ExpressionRefOptions, FieldKey, FieldLiteral,
    FieldReference, Filter, Literal, NullityOp, OptionsSlot, SortDirection, StructuredQuery, TemporalField, Value,
};

use crate::{
    default_separator, ClickContext, ClickDimension, ColumnKind, DatasetColumn, DrillArg, DrillError, DrillThru,
    FilterTarget, PivotType, QueryEngine, QuickFilterOperator, SummaryAggregation,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct BasicEngine;

impl BasicEngine {
    pub fn new() -> Self {
        Self
    }
}

impl QueryEngine for BasicEngine {
    fn available_drill_thrus(
        &self,
        query: &DatasetQuery,
        stage_index: i32,
        card_id: Option<CardId>,
        click: &ClickContext,
    ) -> Result<Vec<DrillThru>, DrillError> {
        let Some(outer) = query.as_structured() else {
            return Ok(Vec::new());
        };
        let stage = outer.stage(stage_index).ok_or(DrillError::StageOutOfRange(stage_index))?;

        let mut drills = Vec::new();
        match (&click.column, &click.value) {
            (Some(column), None) => {
                drills.extend(sort_drill(stage, column));
                drills.extend(distribution_drill(stage, column));
                drills.extend(summarize_column_drill(stage, column));
                drills.extend(combine_columns_drill(stage_index, stage, column));
            }
            (Some(column), Some(value)) => {
                drills.extend(quick_filter_drill(outer, stage_index, stage, column, value));
                drills.extend(underlying_records_drill(stage, click));
                drills.extend(pivot_drill(stage_index, stage, column, click));
            }
            (None, Some(_)) => drills.extend(underlying_records_drill(stage, click)),
            (None, None) => {}
        }

        debug!(
            stage_index,
            card_id,
            drills = ?drills.iter().map(DrillThru::kind).collect::<Vec<_>>(),
            "Computed available drill-throughs"
        );
        Ok(drills)
    }

    fn drill_thru(
        &self,
        query: &DatasetQuery,
        stage_index: i32,
        card_id: Option<CardId>,
        drill: &DrillThru,
        args: &[DrillArg],
    ) -> Result<DatasetQuery, DrillError> {
        let mut result = query.clone();
        let outer = result.as_structured_mut().ok_or(DrillError::NativeQuery)?;

        match drill {
            DrillThru::Sort { column, directions } => {
                let direction = match pick(args, |arg| match arg {
                    DrillArg::Direction(d) => Some(*d),
                    _ => None,
                }) {
                    Some(direction) => direction,
                    None => only(directions).ok_or(DrillError::MissingArgument {
                        drill: drill.kind(),
                        expected: "direction",
                    })?,
                };
                if !directions.contains(&direction) {
                    return Err(DrillError::InvalidArgument {
                        drill: drill.kind(),
                        message: format!("direction {} is not offered", direction.as_str()),
                    });
                }
                let target = column
                    .field_ref
                    .clone()
                    .ok_or_else(|| DrillError::NoFieldRef(column.name.clone()))?;
                stage_mut(outer, stage_index)?.set_order_by(target, direction);
            }

            DrillThru::QuickFilter {
                value,
                operators,
                target,
                ..
            } => {
                let operator = match pick(args, |arg| match arg {
                    DrillArg::Operator(op) => Some(*op),
                    _ => None,
                }) {
                    Some(operator) => operator,
                    None => only(operators).ok_or(DrillError::MissingArgument {
                        drill: drill.kind(),
                        expected: "operator",
                    })?,
                };
                if !operators.contains(&operator) {
                    return Err(DrillError::InvalidArgument {
                        drill: drill.kind(),
                        message: format!("operator {operator:?} is not offered"),
                    });
                }
                let filter = quick_filter(operator, target.field.clone(), value)?;
                *outer = target.query.clone();
                stage_mut(outer, target.stage_index)?.add_filter(filter);
            }

            DrillThru::Distribution { column } => {
                let field = concrete_ref(column)?;
                let stage = stage_mut(outer, stage_index)?;
                stage.aggregation = Some(vec![Aggregation::Count]);
                stage.breakout = Some(vec![default_bucketing(field, column.kind())]);
                stage.order_by = None;
                stage.limit = None;
            }

            DrillThru::SummarizeColumn { column, aggregations } => {
                let aggregation = match pick(args, |arg| match arg {
                    DrillArg::Aggregation(a) => Some(*a),
                    _ => None,
                }) {
                    Some(aggregation) => aggregation,
                    None => only(aggregations).ok_or(DrillError::MissingArgument {
                        drill: drill.kind(),
                        expected: "aggregation",
                    })?,
                };
                if !aggregations.contains(&aggregation) {
                    return Err(DrillError::InvalidArgument {
                        drill: drill.kind(),
                        message: format!("aggregation {aggregation:?} is not offered"),
                    });
                }
                let field = concrete_ref(column)?;
                stage_mut(outer, stage_index)?.add_aggregation(Aggregation::field(aggregation.op(), field));
            }

            DrillThru::UnderlyingRecords { dimensions } => {
                let stage = stage_mut(outer, stage_index)?;
                stage.aggregation = None;
                stage.breakout = None;
                stage.order_by = None;
                stage.limit = None;
                for dimension in dimensions {
                    let field = concrete_ref(&dimension.column)?;
                    stage.add_filter(dimension_filter(field, &dimension.value));
                }
            }

            DrillThru::Pivot { dimensions, pivots, .. } => {
                let chosen = pick(args, |arg| match arg {
                    DrillArg::Column(c) => Some(c),
                    _ => None,
                })
                .ok_or(DrillError::MissingArgument {
                    drill: drill.kind(),
                    expected: "column",
                })?;
                if !pivots.values().flatten().any(|c| c == chosen) {
                    return Err(DrillError::InvalidArgument {
                        drill: drill.kind(),
                        message: format!("column {} is not offered", chosen.name),
                    });
                }
                let breakout = default_bucketing(concrete_ref(chosen)?, chosen.kind());
                let stage = stage_mut(outer, stage_index)?;
                stage.breakout = Some(vec![breakout]);
                // Orderings on the old breakouts no longer apply.
                if let Some(order_by) = stage.order_by.as_mut() {
                    order_by.retain(|o| matches!(o.target, FieldReference::Aggregation(_)));
                    if order_by.is_empty() {
                        stage.order_by = None;
                    }
                }
                for dimension in dimensions {
                    let field = concrete_ref(&dimension.column)?;
                    stage.add_filter(dimension_filter(field, &dimension.value));
                }
            }

            DrillThru::CombineColumns { column, .. } => {
                let others: Vec<&DatasetColumn> = args
                    .iter()
                    .filter_map(|arg| match arg {
                        DrillArg::Column(c) => Some(c),
                        _ => None,
                    })
                    .collect();
                if others.is_empty() {
                    return Err(DrillError::MissingArgument {
                        drill: drill.kind(),
                        expected: "column",
                    });
                }
                let separator = pick(args, |arg| match arg {
                    DrillArg::Separator(s) => Some(s.as_str()),
                    _ => None,
                })
                .unwrap_or_else(|| default_separator(column));

                let mut operands = vec![Expression::Field(concrete_ref(column)?)];
                for other in &others {
                    if !separator.is_empty() {
                        operands.push(Expression::Literal(Literal::String(separator.to_string())));
                    }
                    operands.push(Expression::Field(concrete_ref(other)?));
                }

                let labels: Vec<&str> = std::iter::once(column)
                    .chain(others.iter().copied())
                    .map(DatasetColumn::label)
                    .collect();
                let stage = stage_mut(outer, stage_index)?;
                let expressions = stage.expressions.get_or_insert_with(ExpressionClause::new);
                let name = unique_name(expressions, format!("Combined {}", labels.join(", ")));
                expressions.insert(name.clone(), Expression::call("concat", operands));
                if let Some(fields) = stage.fields.as_mut() {
                    fields.push(ConcreteFieldRef::expression(name));
                }
            }
        }

        info!(drill = drill.kind(), stage_index, card_id, "Applied drill-through");
        Ok(result)
    }
}

fn stage_mut(query: &mut StructuredQuery, stage_index: i32) -> Result<&mut StructuredQuery, DrillError> {
    query
        .stage_mut(stage_index)
        .ok_or(DrillError::StageOutOfRange(stage_index))
}

fn concrete_ref(column: &DatasetColumn) -> Result<ConcreteFieldRef, DrillError> {
    column
        .concrete_ref()
        .cloned()
        .ok_or_else(|| DrillError::NoFieldRef(column.name.clone()))
}

fn pick<'a, T>(args: &'a [DrillArg], select: impl Fn(&'a DrillArg) -> Option<T>) -> Option<T> {
    args.iter().find_map(select)
}

fn only<T: Copy>(choices: &[T]) -> Option<T> {
    match choices {
        [single] => Some(*single),
        _ => None,
    }
}

fn unique_name(expressions: &ExpressionClause, base: String) -> String {
    if !expressions.contains(&base) {
        return base;
    }
    let mut n = 2;
    loop {
        let name = format!("{base} ({n})");
        if !expressions.contains(&name) {
            return name;
        }
        n += 1;
    }
}

fn sort_drill(stage: &StructuredQuery, column: &DatasetColumn) -> Option<DrillThru> {
    let target = column.field_ref.as_ref()?;
    let current = stage
        .order_by
        .iter()
        .flatten()
        .find(|order_by| order_by.target_matches(target));
    let directions: Vec<_> = [SortDirection::Asc, SortDirection::Desc]
        .into_iter()
        .filter(|d| current.map_or(true, |c| c.direction != *d))
        .collect();

    Some(DrillThru::Sort {
        column: column.clone(),
        directions,
    })
}

fn distribution_drill(stage: &StructuredQuery, column: &DatasetColumn) -> Option<DrillThru> {
    if column.is_aggregate() || stage.has_aggregation() || column.concrete_ref().is_none() {
        return None;
    }
    Some(DrillThru::Distribution { column: column.clone() })
}

fn summarize_column_drill(stage: &StructuredQuery, column: &DatasetColumn) -> Option<DrillThru> {
    if column.is_aggregate() || stage.has_aggregation() || column.concrete_ref().is_none() {
        return None;
    }
    let aggregations = if column.kind() == ColumnKind::Numeric {
        vec![SummaryAggregation::Sum, SummaryAggregation::Avg, SummaryAggregation::Distinct]
    } else {
        vec![SummaryAggregation::Distinct]
    };
    Some(DrillThru::SummarizeColumn {
        column: column.clone(),
        aggregations,
    })
}

fn quick_filter_drill(
    outer: &StructuredQuery,
    stage_index: i32,
    stage: &StructuredQuery,
    column: &DatasetColumn,
    value: &Value,
) -> Option<DrillThru> {
    let operators = match value {
        Value::Null => vec![QuickFilterOperator::IsNull, QuickFilterOperator::NotNull],
        Value::Number(_) => vec![
            QuickFilterOperator::Equal,
            QuickFilterOperator::NotEqual,
            QuickFilterOperator::LessThan,
            QuickFilterOperator::GreaterThan,
        ],
        Value::String(_) if column.kind() == ColumnKind::Temporal && value.as_orderable().is_some() => vec![
            QuickFilterOperator::Equal,
            QuickFilterOperator::NotEqual,
            QuickFilterOperator::LessThan,
            QuickFilterOperator::GreaterThan,
        ],
        Value::String(_) | Value::Bool(_) => vec![QuickFilterOperator::Equal, QuickFilterOperator::NotEqual],
    };

    let target = if column.is_aggregate() && stage.has_aggregation() {
        // Aggregate values only exist after the stage runs; filter in a new stage.
        let stage_number = outer.resolve_stage_index(stage_index)?;
        let mut query = outer.clone();
        if stage_number + 1 == outer.stage_count() {
            query = query.nest();
        }
        FilterTarget {
            query,
            stage_index: stage_number as i32 + 1,
            field: ConcreteFieldRef::Literal(FieldLiteral {
                name: column.name.clone(),
                base_type: column.base_type.clone(),
            }),
        }
    } else {
        FilterTarget {
            query: outer.clone(),
            stage_index,
            field: column.concrete_ref()?.clone(),
        }
    };

    Some(DrillThru::QuickFilter {
        column: column.clone(),
        value: value.clone(),
        operators,
        target,
    })
}

fn underlying_records_drill(stage: &StructuredQuery, click: &ClickContext) -> Option<DrillThru> {
    if !stage.has_aggregation() || click.dimensions.is_empty() {
        return None;
    }
    let dimensions: Vec<ClickDimension> = click
        .dimensions
        .iter()
        .filter(|d| d.column.concrete_ref().is_some())
        .cloned()
        .collect();
    if dimensions.is_empty() {
        return None;
    }
    Some(DrillThru::UnderlyingRecords { dimensions })
}

/// Offered on an aggregated cell: break the value down by another column of
/// the clicked row instead of the current breakouts.
fn pivot_drill(
    stage_index: i32,
    stage: &StructuredQuery,
    column: &DatasetColumn,
    click: &ClickContext,
) -> Option<DrillThru> {
    if !column.is_aggregate() || !stage.has_aggregation() || click.dimensions.is_empty() {
        return None;
    }
    let broken_out: Vec<&ConcreteFieldRef> = click.dimensions.iter().filter_map(|d| d.column.concrete_ref()).collect();

    let mut pivots: BTreeMap<PivotType, Vec<DatasetColumn>> = BTreeMap::new();
    for entry in &click.row {
        let candidate = &entry.column;
        if candidate.is_aggregate() {
            continue;
        }
        let Some(field) = candidate.concrete_ref() else {
            continue;
        };
        if broken_out.contains(&field) || click.dimensions.iter().any(|d| d.column.name == candidate.name) {
            continue;
        }
        if let Some(pivot_type) = PivotType::of(candidate) {
            pivots.entry(pivot_type).or_default().push(candidate.clone());
        }
    }
    if pivots.is_empty() {
        return None;
    }

    Some(DrillThru::Pivot {
        column: column.clone(),
        stage_index,
        dimensions: click.dimensions.clone(),
        pivots,
    })
}

fn combine_columns_drill(stage_index: i32, stage: &StructuredQuery, column: &DatasetColumn) -> Option<DrillThru> {
    if column.kind() != ColumnKind::Text || column.is_aggregate() || stage.has_aggregation() {
        return None;
    }
    column.concrete_ref()?;
    Some(DrillThru::CombineColumns {
        column: column.clone(),
        stage_index,
    })
}

fn quick_filter(operator: QuickFilterOperator, field: ConcreteFieldRef, value: &Value) -> Result<Filter, DrillError> {
    let filter = match operator {
        QuickFilterOperator::Equal => Filter::Equality {
            op: EqualityOp::Eq,
            field,
            value: value.clone(),
        },
        QuickFilterOperator::NotEqual => Filter::Equality {
            op: EqualityOp::Ne,
            field,
            value: value.clone(),
        },
        QuickFilterOperator::LessThan => comparison(ComparisonOp::Lt, field, value)?,
        QuickFilterOperator::GreaterThan => comparison(ComparisonOp::Gt, field, value)?,
        QuickFilterOperator::IsNull => Filter::Nullity {
            op: NullityOp::IsNull,
            field,
        },
        QuickFilterOperator::NotNull => Filter::Nullity {
            op: NullityOp::NotNull,
            field,
        },
    };
    Ok(filter)
}

fn comparison(op: ComparisonOp, field: ConcreteFieldRef, value: &Value) -> Result<Filter, DrillError> {
    let value = value.as_orderable().ok_or_else(|| DrillError::InvalidArgument {
        drill: "quick-filter",
        message: "value cannot be compared".to_string(),
    })?;
    Ok(Filter::Comparison { op, field, value })
}

fn dimension_filter(field: ConcreteFieldRef, value: &Value) -> Filter {
    match value {
        Value::Null => Filter::Nullity {
            op: NullityOp::IsNull,
            field,
        },
        value => Filter::Equality {
            op: EqualityOp::Eq,
            field,
            value: value.clone(),
        },
    }
}

/// Month buckets for temporal columns, default bins for numeric ones.
/// References that already carry bucketing are kept as they are.
fn default_bucketing(field: ConcreteFieldRef, kind: ColumnKind) -> ConcreteFieldRef {
    let bucketing = match kind {
        ColumnKind::Temporal => Bucketing::Temporal(DatetimeUnit::Month),
        ColumnKind::Numeric => Bucketing::Binned(BinningOptions::Default),
        _ => return field,
    };
    if field.bucketing().is_some() {
        return field;
    }

    let (id, join_alias, source_field, base_type) = match field {
        ConcreteFieldRef::Local(f) => (FieldKey::Id(f.id), None, None, f.options.and_then(|o| o.base_type)),
        ConcreteFieldRef::Literal(f) => (FieldKey::Name(f.name), None, None, Some(f.base_type)),
        ConcreteFieldRef::Foreign(f) => (f.id, None, Some(f.source_field), f.base_type),
        ConcreteFieldRef::Joined(f) => (f.id, Some(f.join_alias), f.source_field, f.base_type),
        ConcreteFieldRef::Expression(mut e) => {
            let mut options = e.options.as_present().cloned().unwrap_or_else(ExpressionRefOptions::default);
            options.bucketing = Some(bucketing);
            e.options = OptionsSlot::Present(options);
            return ConcreteFieldRef::Expression(e);
        }
        other @ (ConcreteFieldRef::Temporal(_) | ConcreteFieldRef::Binned(_)) => return other,
    };

    match bucketing {
        Bucketing::Temporal(temporal_unit) => ConcreteFieldRef::Temporal(TemporalField {
            id,
            temporal_unit,
            join_alias,
            source_field,
            base_type,
        }),
        Bucketing::Binned(binning) => ConcreteFieldRef::Binned(BinnedField {
            id,
            binning,
            join_alias,
            source_field,
            base_type,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bucketing() {
        let temporal = default_bucketing(ConcreteFieldRef::field(3), ColumnKind::Temporal);
        assert_eq!(temporal.bucketing(), Some(Bucketing::Temporal(DatetimeUnit::Month)));

        let binned = default_bucketing(ConcreteFieldRef::field(4), ColumnKind::Numeric);
        assert_eq!(binned.bucketing(), Some(Bucketing::Binned(BinningOptions::Default)));

        let text = default_bucketing(ConcreteFieldRef::field(5), ColumnKind::Text);
        assert_eq!(text, ConcreteFieldRef::field(5));

        let expression = default_bucketing(ConcreteFieldRef::expression("Created"), ColumnKind::Temporal);
        assert_eq!(expression.bucketing(), Some(Bucketing::Temporal(DatetimeUnit::Month)));
    }

    #[test]
    fn test_quick_filter_rejects_uncomparable_values() {
        let result = quick_filter(
            QuickFilterOperator::LessThan,
            ConcreteFieldRef::field(1),
            &Value::String("Widget".to_string()),
        );
        assert!(matches!(result, Err(DrillError::InvalidArgument { .. })));
    }

    #[test]
    fn test_unique_expression_names() {
        let mut expressions = ExpressionClause::new();
        assert_eq!(unique_name(&expressions, "Combined A, B".to_string()), "Combined A, B");

        expressions.insert("Combined A, B", Expression::call("concat", vec![]));
        expressions.insert("Combined A, B (2)", Expression::call("concat", vec![]));
        assert_eq!(unique_name(&expressions, "Combined A, B".to_string()), "Combined A, B (3)");
    }
}
