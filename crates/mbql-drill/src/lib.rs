//! Drill-through boundary
//!
//! Given a query and a clicked point in its results, a [`QueryEngine`]
//! proposes follow-up transformations ("drill-throughs") and applies the
//! one the user picks. [`BasicEngine`] implements the drills that need no
//! metadata service.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use mbql_ir::{
    CardId, ConcreteFieldRef, DatasetQuery, FieldAggregationOp, FieldReference, SortDirection, StructuredQuery, Value,
};

mod basic;
mod error;

pub use basic::BasicEngine;
pub use error::DrillError;

/// Where a result column comes from in its stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnSource {
    Fields,
    Aggregation,
    Breakout,
    Expressions,
    Native,
}

/// A column of a query result, as the results table describes it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetColumn {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub base_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_ref: Option<FieldReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ColumnSource>,
}

/// Coarse classification of a column's base type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Numeric,
    Temporal,
    Text,
    Boolean,
    Other,
}

impl DatasetColumn {
    pub fn kind(&self) -> ColumnKind {
        match self.base_type.as_str() {
            "type/Integer" | "type/BigInteger" | "type/Float" | "type/Decimal" | "type/Number" => ColumnKind::Numeric,
            "type/Date" | "type/DateTime" | "type/DateTimeWithTZ" | "type/DateTimeWithLocalTZ" | "type/Time"
            | "type/Temporal" => ColumnKind::Temporal,
            "type/Text" | "type/Category" => ColumnKind::Text,
            "type/Boolean" => ColumnKind::Boolean,
            _ => ColumnKind::Other,
        }
    }

    /// Address-like semantic types: the columns a map can place.
    pub fn is_location(&self) -> bool {
        matches!(
            self.semantic_type.as_deref(),
            Some("type/Address" | "type/City" | "type/State" | "type/Country" | "type/ZipCode")
        )
    }

    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    pub fn is_aggregate(&self) -> bool {
        self.source == Some(ColumnSource::Aggregation)
            || matches!(self.field_ref, Some(FieldReference::Aggregation(_)))
    }

    pub fn concrete_ref(&self) -> Option<&ConcreteFieldRef> {
        self.field_ref.as_ref().and_then(FieldReference::as_concrete)
    }
}

/// One cell of the clicked row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowEntry {
    pub column: DatasetColumn,
    pub value: Value,
}

/// A breakout dimension of the clicked cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickDimension {
    pub column: DatasetColumn,
    pub value: Value,
}

/// What the user clicked.
///
/// `value` is `None` for a column header click and `Some(Value::Null)` for
/// a cell holding SQL NULL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClickContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<DatasetColumn>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub row: Vec<RowEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dimensions: Vec<ClickDimension>,
}

/// Keep an explicit `null` as `Some(Value::Null)`; only a missing key is `None`.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl ClickContext {
    pub fn header(column: DatasetColumn) -> Self {
        Self {
            column: Some(column),
            ..Self::default()
        }
    }

    pub fn cell(column: DatasetColumn, value: Value) -> Self {
        Self {
            column: Some(column),
            value: Some(value),
            ..Self::default()
        }
    }

    pub fn is_header(&self) -> bool {
        self.column.is_some() && self.value.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuickFilterOperator {
    #[serde(rename = "=")]
    Equal,
    #[serde(rename = "≠")]
    NotEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "is-null")]
    IsNull,
    #[serde(rename = "not-null")]
    NotNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryAggregation {
    Sum,
    Avg,
    Distinct,
}

impl SummaryAggregation {
    pub fn op(&self) -> FieldAggregationOp {
        match self {
            SummaryAggregation::Sum => FieldAggregationOp::Sum,
            SummaryAggregation::Avg => FieldAggregationOp::Avg,
            SummaryAggregation::Distinct => FieldAggregationOp::Distinct,
        }
    }
}

/// Column groups a pivot drill offers to break out by
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PivotType {
    Category,
    Location,
    Time,
}

impl PivotType {
    /// The group `column` belongs to, if any. Numeric measures never pivot.
    pub fn of(column: &DatasetColumn) -> Option<PivotType> {
        if column.is_location() {
            return Some(PivotType::Location);
        }
        match column.kind() {
            ColumnKind::Temporal => Some(PivotType::Time),
            ColumnKind::Text | ColumnKind::Boolean => Some(PivotType::Category),
            ColumnKind::Numeric | ColumnKind::Other => None,
        }
    }
}

/// The query and stage a filter drill writes into. Filtering on an
/// aggregate column appends a new stage after the aggregated one.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterTarget {
    pub query: StructuredQuery,
    pub stage_index: i32,
    pub field: ConcreteFieldRef,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DrillThru {
    Sort {
        column: DatasetColumn,
        directions: Vec<SortDirection>,
    },
    QuickFilter {
        column: DatasetColumn,
        value: Value,
        operators: Vec<QuickFilterOperator>,
        #[serde(skip)]
        target: FilterTarget,
    },
    Distribution {
        column: DatasetColumn,
    },
    SummarizeColumn {
        column: DatasetColumn,
        aggregations: Vec<SummaryAggregation>,
    },
    UnderlyingRecords {
        dimensions: Vec<ClickDimension>,
    },
    Pivot {
        column: DatasetColumn,
        stage_index: i32,
        dimensions: Vec<ClickDimension>,
        pivots: BTreeMap<PivotType, Vec<DatasetColumn>>,
    },
    CombineColumns {
        column: DatasetColumn,
        stage_index: i32,
    },
}

impl DrillThru {
    pub fn kind(&self) -> &'static str {
        match self {
            DrillThru::Sort { .. } => "sort",
            DrillThru::QuickFilter { .. } => "quick-filter",
            DrillThru::Distribution { .. } => "distribution",
            DrillThru::SummarizeColumn { .. } => "summarize-column",
            DrillThru::UnderlyingRecords { .. } => "underlying-records",
            DrillThru::Pivot { .. } => "pivot",
            DrillThru::CombineColumns { .. } => "combine-columns",
        }
    }
}

/// Extra input picked by the user when applying a drill.
///
/// `Column` may repeat: a pivot takes the first, combine-columns takes
/// them all in order.
#[derive(Debug, Clone, PartialEq)]
pub enum DrillArg {
    Direction(SortDirection),
    Operator(QuickFilterOperator),
    Aggregation(SummaryAggregation),
    Column(DatasetColumn),
    Separator(String),
}

/// Details a filter UI needs to render a filter drill
#[derive(Debug, Clone, PartialEq)]
pub struct FilterDrillDetails {
    pub column: DatasetColumn,
    pub operators: Vec<QuickFilterOperator>,
    pub query: StructuredQuery,
    pub stage_index: i32,
}

pub fn filter_drill_details(drill: &DrillThru) -> Result<FilterDrillDetails, DrillError> {
    match drill {
        DrillThru::QuickFilter {
            column,
            operators,
            target,
            ..
        } => Ok(FilterDrillDetails {
            column: column.clone(),
            operators: operators.clone(),
            query: target.query.clone(),
            stage_index: target.stage_index,
        }),
        other => Err(DrillError::NotAFilterDrill(other.kind())),
    }
}

/// What a pivot picker shows: the non-empty column groups, in order
#[derive(Debug, Clone, PartialEq)]
pub struct PivotDrillDetails {
    pub available_types: Vec<PivotType>,
    pub stage_index: i32,
}

pub fn pivot_drill_details(drill: &DrillThru) -> Result<PivotDrillDetails, DrillError> {
    match drill {
        DrillThru::Pivot {
            stage_index, pivots, ..
        } => Ok(PivotDrillDetails {
            available_types: pivots
                .iter()
                .filter(|(_, columns)| !columns.is_empty())
                .map(|(pivot_type, _)| *pivot_type)
                .collect(),
            stage_index: *stage_index,
        }),
        other => Err(DrillError::NotAPivotDrill(other.kind())),
    }
}

/// Columns a pivot drill can break out by for one group; empty when the
/// group has none.
pub fn pivot_columns_for_type(drill: &DrillThru, pivot_type: PivotType) -> Result<Vec<DatasetColumn>, DrillError> {
    match drill {
        DrillThru::Pivot { pivots, .. } => Ok(pivots.get(&pivot_type).cloned().unwrap_or_default()),
        other => Err(DrillError::NotAPivotDrill(other.kind())),
    }
}

/// The column being combined and the separator to pre-fill
#[derive(Debug, Clone, PartialEq)]
pub struct CombineColumnDrillDetails {
    pub column: DatasetColumn,
    pub default_separator: String,
    pub stage_index: i32,
}

pub fn combine_column_drill_details(drill: &DrillThru) -> Result<CombineColumnDrillDetails, DrillError> {
    match drill {
        DrillThru::CombineColumns { column, stage_index } => Ok(CombineColumnDrillDetails {
            column: column.clone(),
            default_separator: default_separator(column).to_string(),
            stage_index: *stage_index,
        }),
        other => Err(DrillError::NotACombineDrill(other.kind())),
    }
}

/// E-mail parts join with nothing, URL parts with a slash, anything else with a space.
pub fn default_separator(column: &DatasetColumn) -> &'static str {
    match column.semantic_type.as_deref() {
        Some("type/Email") => "",
        Some("type/URL") => "/",
        _ => " ",
    }
}

/// Computes and applies drill-throughs
pub trait QueryEngine {
    /// Drills available for a click on the results of `query` at `stage_index`.
    fn available_drill_thrus(
        &self,
        query: &DatasetQuery,
        stage_index: i32,
        card_id: Option<CardId>,
        click: &ClickContext,
    ) -> Result<Vec<DrillThru>, DrillError>;

    /// Apply `drill`, returning the transformed query.
    fn drill_thru(
        &self,
        query: &DatasetQuery,
        stage_index: i32,
        card_id: Option<CardId>,
        drill: &DrillThru,
        args: &[DrillArg],
    ) -> Result<DatasetQuery, DrillError>;
}
