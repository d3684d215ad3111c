//! Aggregation clauses

use serde_json::{Map, Value as Json};
use uuid::Uuid;

use crate::codec::{self, impl_serde_via_json, Tagged};
use crate::error::ModelError;
use crate::field::ConcreteFieldRef;
use crate::types::CardId;

/// Options of `["offset", …]` aggregations and expressions.
///
/// `lib_uuid` is kept exactly as written; only [`OffsetOptions::new`]
/// generates one.
#[derive(Debug, Clone, PartialEq)]
pub struct OffsetOptions {
    pub lib_uuid: String,
    pub name: String,
    pub display_name: String,
}

impl OffsetOptions {
    /// Options with a freshly generated `lib/uuid`.
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            lib_uuid: Uuid::new_v4().to_string(),
            name: name.into(),
            display_name: display_name.into(),
        }
    }

    /// Whether `lib_uuid` parses as a UUID.
    pub fn has_valid_uuid(&self) -> bool {
        Uuid::parse_str(&self.lib_uuid).is_ok()
    }
}

impl Tagged for OffsetOptions {
    const CLAUSE: &'static str = "offset options";

    fn to_json(&self) -> Json {
        let mut object = Map::new();
        object.insert("lib/uuid".to_string(), Json::from(self.lib_uuid.as_str()));
        object.insert("name".to_string(), Json::from(self.name.as_str()));
        object.insert("display-name".to_string(), Json::from(self.display_name.as_str()));
        Json::Object(object)
    }

    fn from_json(value: &Json) -> Result<Self, ModelError> {
        let object = codec::as_object(Self::CLAUSE, value)?;
        codec::check_keys(Self::CLAUSE, object, &["lib/uuid", "name", "display-name"])?;
        Ok(OffsetOptions {
            lib_uuid: codec::required_string(Self::CLAUSE, object, "lib/uuid")?,
            name: codec::required_string(Self::CLAUSE, object, "name")?,
            display_name: codec::required_string(Self::CLAUSE, object, "display-name")?,
        })
    }
}

/// Options of `["aggregation-options", …]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationOptions {
    pub name: String,
    pub display_name: String,
}

impl Tagged for AggregationOptions {
    const CLAUSE: &'static str = "aggregation options";

    fn to_json(&self) -> Json {
        let mut object = Map::new();
        object.insert("name".to_string(), Json::from(self.name.as_str()));
        object.insert("display-name".to_string(), Json::from(self.display_name.as_str()));
        Json::Object(object)
    }

    fn from_json(value: &Json) -> Result<Self, ModelError> {
        let object = codec::as_object(Self::CLAUSE, value)?;
        codec::check_keys(Self::CLAUSE, object, &["name", "display-name"])?;
        Ok(AggregationOptions {
            name: codec::required_string(Self::CLAUSE, object, "name")?,
            display_name: codec::required_string(Self::CLAUSE, object, "display-name")?,
        })
    }
}

impl_serde_via_json!(OffsetOptions, AggregationOptions);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldAggregationOp {
    Count,
    Avg,
    Sum,
    Min,
    Max,
    Median,
    StdDev,
    CumSum,
    Distinct,
}

impl FieldAggregationOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldAggregationOp::Count => "count",
            FieldAggregationOp::Avg => "avg",
            FieldAggregationOp::Sum => "sum",
            FieldAggregationOp::Min => "min",
            FieldAggregationOp::Max => "max",
            FieldAggregationOp::Median => "median",
            FieldAggregationOp::StdDev => "stddev",
            FieldAggregationOp::CumSum => "cum-sum",
            FieldAggregationOp::Distinct => "distinct",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "count" => FieldAggregationOp::Count,
            "avg" => FieldAggregationOp::Avg,
            "sum" => FieldAggregationOp::Sum,
            "min" => FieldAggregationOp::Min,
            "max" => FieldAggregationOp::Max,
            "median" => FieldAggregationOp::Median,
            "stddev" => FieldAggregationOp::StdDev,
            "cum-sum" => FieldAggregationOp::CumSum,
            "distinct" => FieldAggregationOp::Distinct,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    /// `["count"]`
    Count,
    /// `["sum", field]` and friends. `["count", field]` lands here too.
    Field {
        op: FieldAggregationOp,
        field: ConcreteFieldRef,
    },
    /// `["metric", card-id]`
    Metric(CardId),
    /// `["offset", options, aggregation, n]`. Build with [`Aggregation::offset`].
    Offset {
        options: OffsetOptions,
        inner: Box<Aggregation>,
        offset: i64,
    },
    /// `["aggregation-options", aggregation, options]`. Build with [`Aggregation::named`].
    Named {
        inner: Box<Aggregation>,
        options: AggregationOptions,
    },
}

impl Aggregation {
    pub fn field(op: FieldAggregationOp, field: ConcreteFieldRef) -> Self {
        Aggregation::Field { op, field }
    }

    /// Offset aggregation; the inner aggregation may not itself be an offset.
    pub fn offset(options: OffsetOptions, inner: Aggregation, offset: i64) -> Result<Self, ModelError> {
        if inner.is_offset() {
            return Err(ModelError::shape(Self::CLAUSE, "offset aggregations cannot be nested"));
        }
        Ok(Aggregation::Offset {
            options,
            inner: Box::new(inner),
            offset,
        })
    }

    /// Attach a name and display name to a common aggregation.
    pub fn named(inner: Aggregation, options: AggregationOptions) -> Result<Self, ModelError> {
        match inner {
            Aggregation::Metric(_) | Aggregation::Named { .. } => Err(ModelError::shape(
                Self::CLAUSE,
                "\"aggregation-options\" only wraps count, field and offset aggregations",
            )),
            inner => Ok(Aggregation::Named {
                inner: Box::new(inner),
                options,
            }),
        }
    }

    /// Whether this is an offset aggregation, looking through `aggregation-options`.
    pub fn is_offset(&self) -> bool {
        match self {
            Aggregation::Offset { .. } => true,
            Aggregation::Named { inner, .. } => inner.is_offset(),
            _ => false,
        }
    }

    pub fn for_each_field<'a>(&'a self, visit: &mut impl FnMut(&'a ConcreteFieldRef)) {
        match self {
            Aggregation::Field { field, .. } => visit(field),
            Aggregation::Offset { inner, .. } | Aggregation::Named { inner, .. } => inner.for_each_field(visit),
            Aggregation::Count | Aggregation::Metric(_) => {}
        }
    }

    /// Name given by `aggregation-options` or the offset options, if any.
    pub fn display_name(&self) -> Option<&str> {
        match self {
            Aggregation::Named { options, .. } => Some(&options.display_name),
            Aggregation::Offset { options, .. } => Some(&options.display_name),
            _ => None,
        }
    }
}

impl Tagged for Aggregation {
    const CLAUSE: &'static str = "aggregation";

    fn to_json(&self) -> Json {
        match self {
            Aggregation::Count => codec::tagged("count", std::iter::empty()),
            Aggregation::Field { op, field } => codec::tagged(op.as_str(), [field.to_json()]),
            Aggregation::Metric(id) => codec::tagged("metric", [Json::from(*id)]),
            Aggregation::Offset {
                options,
                inner,
                offset,
            } => codec::tagged(
                "offset",
                [options.to_json(), inner.to_json(), Json::from(*offset)],
            ),
            Aggregation::Named { inner, options } => {
                codec::tagged("aggregation-options", [inner.to_json(), options.to_json()])
            }
        }
    }

    fn from_json(value: &Json) -> Result<Self, ModelError> {
        const CLAUSE: &str = Aggregation::CLAUSE;
        let (tag, args) = codec::split_tagged(CLAUSE, value)?;

        if tag == "count" && args.is_empty() {
            return Ok(Aggregation::Count);
        }
        if let Some(op) = FieldAggregationOp::from_tag(tag) {
            codec::expect_arity(CLAUSE, tag, args, 1, 1)?;
            return Ok(Aggregation::Field {
                op,
                field: ConcreteFieldRef::from_json(&args[0])?,
            });
        }

        match tag {
            "metric" => {
                codec::expect_arity(CLAUSE, tag, args, 1, 1)?;
                Ok(Aggregation::Metric(codec::as_i64(CLAUSE, &args[0])?))
            }
            "offset" => {
                codec::expect_arity(CLAUSE, tag, args, 3, 3)?;
                Aggregation::offset(
                    OffsetOptions::from_json(&args[0])?,
                    Aggregation::from_json(&args[1])?,
                    codec::as_i64(CLAUSE, &args[2])?,
                )
            }
            "aggregation-options" => {
                codec::expect_arity(CLAUSE, tag, args, 2, 2)?;
                Aggregation::named(Aggregation::from_json(&args[0])?, AggregationOptions::from_json(&args[1])?)
            }
            other => Err(ModelError::shape(CLAUSE, format!("unknown aggregation \"{other}\""))),
        }
    }
}

impl_serde_via_json!(Aggregation);
