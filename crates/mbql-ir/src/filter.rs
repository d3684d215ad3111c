//! Filter clauses

use serde_json::{Map, Value as Json};

use crate::codec::{self, impl_serde_via_json, Tagged};
use crate::error::ModelError;
use crate::field::ConcreteFieldRef;
use crate::types::{AbsoluteUnit, Number, OrderableValue, SegmentId, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqualityOp {
    Eq,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Lt,
    Le,
    Ge,
    Gt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringOp {
    StartsWith,
    Contains,
    DoesNotContain,
    EndsWith,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullityOp {
    IsNull,
    NotNull,
    IsEmpty,
    NotEmpty,
}

macro_rules! tag_enum {
    ($name:ident { $($variant:ident => $tag:literal),* $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $tag),*
                }
            }

            pub fn from_tag(tag: &str) -> Option<Self> {
                match tag {
                    $($tag => Some($name::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

tag_enum!(EqualityOp { Eq => "=", Ne => "!=" });
tag_enum!(ComparisonOp { Lt => "<", Le => "<=", Ge => ">=", Gt => ">" });
tag_enum!(StringOp {
    StartsWith => "starts-with",
    Contains => "contains",
    DoesNotContain => "does-not-contain",
    EndsWith => "ends-with",
});
tag_enum!(NullityOp {
    IsNull => "is-null",
    NotNull => "not-null",
    IsEmpty => "is-empty",
    NotEmpty => "not-empty",
});

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StringMatchOptions {
    pub case_sensitive: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimeIntervalOptions {
    pub include_current: Option<bool>,
}

/// `"current"`, `"last"`, `"next"` or a signed number of units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelativePeriod {
    Current,
    Last,
    Next,
    Units(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equality {
        op: EqualityOp,
        field: ConcreteFieldRef,
        value: Value,
    },
    Comparison {
        op: ComparisonOp,
        field: ConcreteFieldRef,
        value: OrderableValue,
    },
    Between {
        field: ConcreteFieldRef,
        min: OrderableValue,
        max: OrderableValue,
    },
    StringMatch {
        op: StringOp,
        field: ConcreteFieldRef,
        value: String,
        options: Option<StringMatchOptions>,
    },
    Nullity {
        op: NullityOp,
        field: ConcreteFieldRef,
    },
    /// Geographic bounding box.
    Inside {
        lat_field: ConcreteFieldRef,
        lon_field: ConcreteFieldRef,
        lat_max: Number,
        lon_min: Number,
        lat_min: Number,
        lon_max: Number,
    },
    TimeInterval {
        field: ConcreteFieldRef,
        period: RelativePeriod,
        unit: AbsoluteUnit,
        options: Option<TimeIntervalOptions>,
    },
    Segment(SegmentId),
}

impl Filter {
    /// `["and", …]`; rejects an empty operand list.
    pub fn and(filters: Vec<Filter>) -> Result<Self, ModelError> {
        if filters.is_empty() {
            return Err(ModelError::shape(Self::CLAUSE, "\"and\" needs at least one filter"));
        }
        Ok(Filter::And(filters))
    }

    /// `["or", …]`; rejects an empty operand list.
    pub fn or(filters: Vec<Filter>) -> Result<Self, ModelError> {
        if filters.is_empty() {
            return Err(ModelError::shape(Self::CLAUSE, "\"or\" needs at least one filter"));
        }
        Ok(Filter::Or(filters))
    }

    pub fn negate(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    /// Add `filter` to an existing filter clause, flattening into a top-level `and`.
    pub fn conjoin(existing: Option<Filter>, filter: Filter) -> Filter {
        match existing {
            None => filter,
            Some(Filter::And(mut filters)) => {
                filters.push(filter);
                Filter::And(filters)
            }
            Some(other) => Filter::And(vec![other, filter]),
        }
    }

    pub(crate) fn is_filter_tag(tag: &str) -> bool {
        matches!(tag, "and" | "or" | "not" | "between" | "inside" | "time-interval" | "segment")
            || EqualityOp::from_tag(tag).is_some()
            || ComparisonOp::from_tag(tag).is_some()
            || StringOp::from_tag(tag).is_some()
            || NullityOp::from_tag(tag).is_some()
    }

    /// Visit every field reference in this filter, depth first.
    pub fn for_each_field<'a>(&'a self, visit: &mut impl FnMut(&'a ConcreteFieldRef)) {
        match self {
            Filter::And(filters) | Filter::Or(filters) => {
                for filter in filters {
                    filter.for_each_field(visit);
                }
            }
            Filter::Not(inner) => inner.for_each_field(visit),
            Filter::Equality { field, .. }
            | Filter::Comparison { field, .. }
            | Filter::Between { field, .. }
            | Filter::StringMatch { field, .. }
            | Filter::Nullity { field, .. }
            | Filter::TimeInterval { field, .. } => visit(field),
            Filter::Inside {
                lat_field, lon_field, ..
            } => {
                visit(lat_field);
                visit(lon_field);
            }
            Filter::Segment(_) => {}
        }
    }

    /// Visit this filter and every nested filter, depth first.
    pub fn for_each_filter<'a>(&'a self, visit: &mut impl FnMut(&'a Filter)) {
        visit(self);
        match self {
            Filter::And(filters) | Filter::Or(filters) => {
                for filter in filters {
                    filter.for_each_filter(visit);
                }
            }
            Filter::Not(inner) => inner.for_each_filter(visit),
            _ => {}
        }
    }
}

impl Tagged for Filter {
    const CLAUSE: &'static str = "filter";

    fn to_json(&self) -> Json {
        match self {
            Filter::And(filters) => codec::tagged("and", filters.iter().map(Filter::to_json)),
            Filter::Or(filters) => codec::tagged("or", filters.iter().map(Filter::to_json)),
            Filter::Not(inner) => codec::tagged("not", [inner.to_json()]),
            Filter::Equality { op, field, value } => {
                codec::tagged(op.as_str(), [field.to_json(), value.to_json()])
            }
            Filter::Comparison { op, field, value } => {
                codec::tagged(op.as_str(), [field.to_json(), value.to_json()])
            }
            Filter::Between { field, min, max } => {
                codec::tagged("between", [field.to_json(), min.to_json(), max.to_json()])
            }
            Filter::StringMatch {
                op,
                field,
                value,
                options,
            } => {
                let mut args = vec![field.to_json(), Json::from(value.as_str())];
                if let Some(options) = options {
                    let mut map = Map::new();
                    codec::insert_opt(&mut map, "case-sensitive", options.case_sensitive.map(Json::Bool));
                    args.push(Json::Object(map));
                }
                codec::tagged(op.as_str(), args)
            }
            Filter::Nullity { op, field } => codec::tagged(op.as_str(), [field.to_json()]),
            Filter::Inside {
                lat_field,
                lon_field,
                lat_max,
                lon_min,
                lat_min,
                lon_max,
            } => codec::tagged(
                "inside",
                [
                    lat_field.to_json(),
                    lon_field.to_json(),
                    lat_max.to_json(),
                    lon_min.to_json(),
                    lat_min.to_json(),
                    lon_max.to_json(),
                ],
            ),
            Filter::TimeInterval {
                field,
                period,
                unit,
                options,
            } => {
                let period = match period {
                    RelativePeriod::Current => Json::from("current"),
                    RelativePeriod::Last => Json::from("last"),
                    RelativePeriod::Next => Json::from("next"),
                    RelativePeriod::Units(n) => Json::from(*n),
                };
                let mut args = vec![field.to_json(), period, Json::from(unit.as_str())];
                if let Some(options) = options {
                    let mut map = Map::new();
                    codec::insert_opt(&mut map, "include-current", options.include_current.map(Json::Bool));
                    args.push(Json::Object(map));
                }
                codec::tagged("time-interval", args)
            }
            Filter::Segment(id) => codec::tagged("segment", [Json::from(*id)]),
        }
    }

    fn from_json(value: &Json) -> Result<Self, ModelError> {
        const CLAUSE: &str = Filter::CLAUSE;
        let (tag, args) = codec::split_tagged(CLAUSE, value)?;

        if let Some(op) = EqualityOp::from_tag(tag) {
            codec::expect_arity(CLAUSE, tag, args, 2, 2)?;
            return Ok(Filter::Equality {
                op,
                field: ConcreteFieldRef::from_json(&args[0])?,
                value: Value::from_json(&args[1])?,
            });
        }
        if let Some(op) = ComparisonOp::from_tag(tag) {
            codec::expect_arity(CLAUSE, tag, args, 2, 2)?;
            return Ok(Filter::Comparison {
                op,
                field: ConcreteFieldRef::from_json(&args[0])?,
                value: OrderableValue::from_json(&args[1])?,
            });
        }
        if let Some(op) = StringOp::from_tag(tag) {
            codec::expect_arity(CLAUSE, tag, args, 2, 3)?;
            let options = args
                .get(2)
                .map(|raw| -> Result<_, ModelError> {
                    let map = codec::as_object(CLAUSE, raw)?;
                    codec::check_keys(CLAUSE, map, &["case-sensitive"])?;
                    Ok(StringMatchOptions {
                        case_sensitive: codec::opt_bool(CLAUSE, map, "case-sensitive")?,
                    })
                })
                .transpose()?;
            return Ok(Filter::StringMatch {
                op,
                field: ConcreteFieldRef::from_json(&args[0])?,
                value: codec::as_str(CLAUSE, &args[1])?.to_string(),
                options,
            });
        }
        if let Some(op) = NullityOp::from_tag(tag) {
            codec::expect_arity(CLAUSE, tag, args, 1, 1)?;
            return Ok(Filter::Nullity {
                op,
                field: ConcreteFieldRef::from_json(&args[0])?,
            });
        }

        match tag {
            "and" | "or" => {
                if args.is_empty() {
                    return Err(ModelError::shape(CLAUSE, format!("\"{tag}\" needs at least one filter")));
                }
                let filters = args.iter().map(Filter::from_json).collect::<Result<Vec<_>, _>>()?;
                Ok(if tag == "and" { Filter::And(filters) } else { Filter::Or(filters) })
            }
            "not" => {
                codec::expect_arity(CLAUSE, tag, args, 1, 1)?;
                Ok(Filter::negate(Filter::from_json(&args[0])?))
            }
            "between" => {
                codec::expect_arity(CLAUSE, tag, args, 3, 3)?;
                Ok(Filter::Between {
                    field: ConcreteFieldRef::from_json(&args[0])?,
                    min: OrderableValue::from_json(&args[1])?,
                    max: OrderableValue::from_json(&args[2])?,
                })
            }
            "inside" => {
                codec::expect_arity(CLAUSE, tag, args, 6, 6)?;
                Ok(Filter::Inside {
                    lat_field: ConcreteFieldRef::from_json(&args[0])?,
                    lon_field: ConcreteFieldRef::from_json(&args[1])?,
                    lat_max: Number::from_json(&args[2])?,
                    lon_min: Number::from_json(&args[3])?,
                    lat_min: Number::from_json(&args[4])?,
                    lon_max: Number::from_json(&args[5])?,
                })
            }
            "time-interval" => {
                codec::expect_arity(CLAUSE, tag, args, 3, 4)?;
                let period = match &args[1] {
                    Json::String(s) if s == "current" => RelativePeriod::Current,
                    Json::String(s) if s == "last" => RelativePeriod::Last,
                    Json::String(s) if s == "next" => RelativePeriod::Next,
                    other => RelativePeriod::Units(codec::as_i64(CLAUSE, other)?),
                };
                let options = args
                    .get(3)
                    .map(|raw| -> Result<_, ModelError> {
                        let map = codec::as_object(CLAUSE, raw)?;
                        codec::check_keys(CLAUSE, map, &["include-current"])?;
                        Ok(TimeIntervalOptions {
                            include_current: codec::opt_bool(CLAUSE, map, "include-current")?,
                        })
                    })
                    .transpose()?;
                Ok(Filter::TimeInterval {
                    field: ConcreteFieldRef::from_json(&args[0])?,
                    period,
                    unit: codec::from_serde(CLAUSE, &args[2])?,
                    options,
                })
            }
            "segment" => {
                codec::expect_arity(CLAUSE, tag, args, 1, 1)?;
                Ok(Filter::Segment(codec::as_i64(CLAUSE, &args[0])?))
            }
            other => Err(ModelError::shape(CLAUSE, format!("unknown filter \"{other}\""))),
        }
    }
}

impl_serde_via_json!(Filter);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn round_trip(value: Json) {
        let filter = Filter::from_json(&value).unwrap();
        assert_eq!(filter.to_json(), value);
    }

    #[test]
    fn test_leaf_filters_round_trip() {
        round_trip(json!(["=", ["field", 1, null], "Widget"]));
        round_trip(json!(["!=", ["field", 1, null], null]));
        round_trip(json!([">=", ["field", 2, null], 10]));
        round_trip(json!(["between", ["field", 3, null], "2024-01-01", "2024-12-31"]));
        round_trip(json!(["contains", ["field", 4, null], "abc", {"case-sensitive": false}]));
        round_trip(json!(["ends-with", ["field", 4, null], "xyz"]));
        round_trip(json!(["is-null", ["field", 5, null]]));
        round_trip(json!(["inside", ["field", 6, null], ["field", 7, null], 10, -20, -10, 20]));
        round_trip(json!(["time-interval", ["field", 8, null], "last", "month", {"include-current": true}]));
        round_trip(json!(["time-interval", ["field", 8, null], -3, "week"]));
        round_trip(json!(["segment", 9]));
    }

    #[test]
    fn test_compound_filters() {
        round_trip(json!(["and", ["segment", 1], ["not", ["is-empty", ["field", 2, null]]]]));
        assert!(Filter::from_json(&json!(["or"])).is_err());
        assert!(Filter::and(vec![]).is_err());
        assert!(Filter::or(vec![Filter::Segment(1)]).is_ok());
    }

    #[test]
    fn test_comparison_requires_orderable_operand() {
        assert!(Filter::from_json(&json!(["<", ["field", 1, null], "abc"])).is_err());
        assert!(Filter::from_json(&json!([">", ["field", 1, null], true])).is_err());
        assert!(Filter::from_json(&json!(["between", ["field", 1, null], 1, false])).is_err());
    }

    #[test]
    fn test_time_interval_rejects_relative_unit() {
        let value = json!(["time-interval", ["field", 8, null], "next", "day-of-week"]);
        assert!(Filter::from_json(&value).is_err());
    }

    #[test]
    fn test_conjoin_flattens_and() {
        let a = Filter::Segment(1);
        let b = Filter::Segment(2);
        let c = Filter::Segment(3);
        let ab = Filter::conjoin(Some(a), b);
        let abc = Filter::conjoin(Some(ab), c);
        assert_eq!(abc.to_json(), json!(["and", ["segment", 1], ["segment", 2], ["segment", 3]]));
        assert_eq!(Filter::conjoin(None, Filter::Segment(4)), Filter::Segment(4));
    }

    #[test]
    fn test_for_each_field_visits_nested() {
        let filter = Filter::from_json(&json!([
            "or",
            ["=", ["field", 1, null], 1],
            ["not", ["inside", ["field", 2, null], ["field", 3, null], 1, 2, 3, 4]]
        ]))
        .unwrap();
        let mut seen = Vec::new();
        filter.for_each_field(&mut |field| seen.push(field.field_key()));
        assert_eq!(seen.len(), 3);
    }
}
