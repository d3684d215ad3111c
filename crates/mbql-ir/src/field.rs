//! Field references
//!
//! Every `["field", …]` shape gets its own record type so that the option
//! keys a variant requires are plain fields and the keys it forbids do not
//! exist. In particular no record carries both a temporal unit and a binning
//! strategy.
//!
//! Decoding picks the variant by the keys present in the options object, in
//! this order: `binning`, `temporal-unit`, `join-alias`, `source-field`, then
//! a string id with `base-type` (field literal), then a plain local field.

use serde_json::{Map, Value as Json};

use crate::codec::{self, impl_serde_via_json, Tagged};
use crate::error::ModelError;
use crate::types::{BinningOptions, DatetimeUnit, FieldId, FieldKey};

const FIELD_OPTION_KEYS: &[&str] = &["base-type", "join-alias", "source-field", "temporal-unit", "binning"];
const EXPRESSION_OPTION_KEYS: &[&str] = &["base-type", "temporal-unit", "binning"];
const AGGREGATION_OPTION_KEYS: &[&str] = &["base-type", "name", "display-name"];

/// Distinguishes `["expression", "x"]`, `["expression", "x", null]` and
/// `["expression", "x", {…}]` so all three survive a round trip.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum OptionsSlot<T> {
    #[default]
    Absent,
    Null,
    Present(T),
}

impl<T> OptionsSlot<T> {
    pub fn as_present(&self) -> Option<&T> {
        match self {
            OptionsSlot::Present(options) => Some(options),
            _ => None,
        }
    }
}

/// `["field", 10, null]` or `["field", 10, {"base-type": …}]`.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalField {
    pub id: FieldId,
    /// `None` encodes as `null`.
    pub options: Option<LocalOptions>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocalOptions {
    pub base_type: Option<String>,
}

/// `["field", "TOTAL", {"base-type": "type/Float"}]`
#[derive(Debug, Clone, PartialEq)]
pub struct FieldLiteral {
    pub name: String,
    pub base_type: String,
}

/// A field reached through a foreign key: `{"source-field": fk}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignField {
    pub id: FieldKey,
    pub source_field: FieldKey,
    pub base_type: Option<String>,
}

/// A field of a joined table: `{"join-alias": "Products"}`.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedField {
    pub id: FieldKey,
    pub join_alias: String,
    pub source_field: Option<FieldKey>,
    pub base_type: Option<String>,
}

/// A datetime field bucketed by unit. Cannot carry binning.
#[derive(Debug, Clone, PartialEq)]
pub struct TemporalField {
    pub id: FieldKey,
    pub temporal_unit: DatetimeUnit,
    pub join_alias: Option<String>,
    pub source_field: Option<FieldKey>,
    pub base_type: Option<String>,
}

/// A numeric field bucketed into bins. Cannot carry a temporal unit.
#[derive(Debug, Clone, PartialEq)]
pub struct BinnedField {
    pub id: FieldKey,
    pub binning: BinningOptions,
    pub join_alias: Option<String>,
    pub source_field: Option<FieldKey>,
    pub base_type: Option<String>,
}

/// Either a temporal unit or a binning strategy, never both.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bucketing {
    Temporal(DatetimeUnit),
    Binned(BinningOptions),
}

/// `["expression", "Profit"]`, optionally with options.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionRef {
    pub name: String,
    pub options: OptionsSlot<ExpressionRefOptions>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExpressionRefOptions {
    pub base_type: Option<String>,
    pub bucketing: Option<Bucketing>,
}

/// `["aggregation", 0]`: the n-th aggregation of the same stage.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationRef {
    pub index: usize,
    pub options: OptionsSlot<AggregationRefOptions>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AggregationRefOptions {
    pub base_type: Option<String>,
    pub name: Option<String>,
    pub display_name: Option<String>,
}

/// A reference to a non-aggregate column.
#[derive(Debug, Clone, PartialEq)]
pub enum ConcreteFieldRef {
    Local(LocalField),
    Literal(FieldLiteral),
    Foreign(ForeignField),
    Joined(JoinedField),
    Temporal(TemporalField),
    Binned(BinnedField),
    Expression(ExpressionRef),
}

/// Anything an `order-by` or join condition may point at.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldReference {
    Concrete(ConcreteFieldRef),
    Aggregation(AggregationRef),
}

impl ConcreteFieldRef {
    /// `["field", id, null]`
    pub fn field(id: FieldId) -> Self {
        ConcreteFieldRef::Local(LocalField { id, options: None })
    }

    /// `["expression", name]`
    pub fn expression(name: impl Into<String>) -> Self {
        ConcreteFieldRef::Expression(ExpressionRef {
            name: name.into(),
            options: OptionsSlot::Absent,
        })
    }

    pub fn join_alias(&self) -> Option<&str> {
        match self {
            ConcreteFieldRef::Joined(f) => Some(&f.join_alias),
            ConcreteFieldRef::Temporal(f) => f.join_alias.as_deref(),
            ConcreteFieldRef::Binned(f) => f.join_alias.as_deref(),
            _ => None,
        }
    }

    pub fn expression_name(&self) -> Option<&str> {
        match self {
            ConcreteFieldRef::Expression(e) => Some(&e.name),
            _ => None,
        }
    }

    pub fn field_key(&self) -> Option<FieldKey> {
        match self {
            ConcreteFieldRef::Local(f) => Some(FieldKey::Id(f.id)),
            ConcreteFieldRef::Literal(f) => Some(FieldKey::Name(f.name.clone())),
            ConcreteFieldRef::Foreign(f) => Some(f.id.clone()),
            ConcreteFieldRef::Joined(f) => Some(f.id.clone()),
            ConcreteFieldRef::Temporal(f) => Some(f.id.clone()),
            ConcreteFieldRef::Binned(f) => Some(f.id.clone()),
            ConcreteFieldRef::Expression(_) => None,
        }
    }

    fn source_field(&self) -> Option<&FieldKey> {
        match self {
            ConcreteFieldRef::Foreign(f) => Some(&f.source_field),
            ConcreteFieldRef::Joined(f) => f.source_field.as_ref(),
            ConcreteFieldRef::Temporal(f) => f.source_field.as_ref(),
            ConcreteFieldRef::Binned(f) => f.source_field.as_ref(),
            _ => None,
        }
    }

    pub fn bucketing(&self) -> Option<Bucketing> {
        match self {
            ConcreteFieldRef::Temporal(f) => Some(Bucketing::Temporal(f.temporal_unit)),
            ConcreteFieldRef::Binned(f) => Some(Bucketing::Binned(f.binning)),
            ConcreteFieldRef::Expression(e) => e.options.as_present().and_then(|o| o.bucketing),
            _ => None,
        }
    }

    /// Whether both references point at the same column, ignoring bucketing
    /// and base type.
    pub fn same_column(&self, other: &ConcreteFieldRef) -> bool {
        match (self.expression_name(), other.expression_name()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => {
                self.field_key() == other.field_key()
                    && self.join_alias() == other.join_alias()
                    && self.source_field() == other.source_field()
            }
            _ => false,
        }
    }
}

impl FieldReference {
    pub fn as_concrete(&self) -> Option<&ConcreteFieldRef> {
        match self {
            FieldReference::Concrete(field) => Some(field),
            FieldReference::Aggregation(_) => None,
        }
    }
}

impl From<ConcreteFieldRef> for FieldReference {
    fn from(field: ConcreteFieldRef) -> Self {
        FieldReference::Concrete(field)
    }
}

impl From<AggregationRef> for FieldReference {
    fn from(aggregation: AggregationRef) -> Self {
        FieldReference::Aggregation(aggregation)
    }
}

impl Tagged for ConcreteFieldRef {
    const CLAUSE: &'static str = "field reference";

    fn to_json(&self) -> Json {
        match self {
            ConcreteFieldRef::Local(f) => {
                let options = match &f.options {
                    None => Json::Null,
                    Some(o) => {
                        let mut map = Map::new();
                        codec::insert_opt(&mut map, "base-type", o.base_type.as_deref().map(Json::from));
                        Json::Object(map)
                    }
                };
                codec::tagged("field", [Json::from(f.id), options])
            }
            ConcreteFieldRef::Literal(f) => {
                let mut map = Map::new();
                map.insert("base-type".to_string(), Json::from(f.base_type.as_str()));
                codec::tagged("field", [Json::from(f.name.as_str()), Json::Object(map)])
            }
            ConcreteFieldRef::Foreign(f) => {
                let mut map = common_options(None, None, f.base_type.as_deref());
                map.insert("source-field".to_string(), f.source_field.to_json());
                codec::tagged("field", [f.id.to_json(), Json::Object(map)])
            }
            ConcreteFieldRef::Joined(f) => {
                let map = common_options(Some(&f.join_alias), f.source_field.as_ref(), f.base_type.as_deref());
                codec::tagged("field", [f.id.to_json(), Json::Object(map)])
            }
            ConcreteFieldRef::Temporal(f) => {
                let mut map = common_options(f.join_alias.as_deref(), f.source_field.as_ref(), f.base_type.as_deref());
                map.insert("temporal-unit".to_string(), Json::from(f.temporal_unit.as_str()));
                codec::tagged("field", [f.id.to_json(), Json::Object(map)])
            }
            ConcreteFieldRef::Binned(f) => {
                let mut map = common_options(f.join_alias.as_deref(), f.source_field.as_ref(), f.base_type.as_deref());
                map.insert("binning".to_string(), f.binning.to_json());
                codec::tagged("field", [f.id.to_json(), Json::Object(map)])
            }
            ConcreteFieldRef::Expression(e) => {
                let name = Json::from(e.name.as_str());
                match &e.options {
                    OptionsSlot::Absent => codec::tagged("expression", [name]),
                    OptionsSlot::Null => codec::tagged("expression", [name, Json::Null]),
                    OptionsSlot::Present(o) => {
                        let mut map = Map::new();
                        codec::insert_opt(&mut map, "base-type", o.base_type.as_deref().map(Json::from));
                        insert_bucketing(&mut map, o.bucketing.as_ref());
                        codec::tagged("expression", [name, Json::Object(map)])
                    }
                }
            }
        }
    }

    fn from_json(value: &Json) -> Result<Self, ModelError> {
        let (tag, args) = codec::split_tagged(Self::CLAUSE, value)?;
        match tag {
            "field" => decode_field(args),
            "expression" => decode_expression_ref(args),
            other => Err(ModelError::shape(
                Self::CLAUSE,
                format!("expected \"field\" or \"expression\", got \"{other}\""),
            )),
        }
    }
}

impl Tagged for FieldReference {
    const CLAUSE: &'static str = "field reference";

    fn to_json(&self) -> Json {
        match self {
            FieldReference::Concrete(field) => field.to_json(),
            FieldReference::Aggregation(aggregation) => {
                let index = Json::from(aggregation.index);
                match &aggregation.options {
                    OptionsSlot::Absent => codec::tagged("aggregation", [index]),
                    OptionsSlot::Null => codec::tagged("aggregation", [index, Json::Null]),
                    OptionsSlot::Present(o) => {
                        let mut map = Map::new();
                        codec::insert_opt(&mut map, "base-type", o.base_type.as_deref().map(Json::from));
                        codec::insert_opt(&mut map, "name", o.name.as_deref().map(Json::from));
                        codec::insert_opt(&mut map, "display-name", o.display_name.as_deref().map(Json::from));
                        codec::tagged("aggregation", [index, Json::Object(map)])
                    }
                }
            }
        }
    }

    fn from_json(value: &Json) -> Result<Self, ModelError> {
        let (tag, args) = codec::split_tagged(Self::CLAUSE, value)?;
        if tag != "aggregation" {
            return ConcreteFieldRef::from_json(value).map(FieldReference::Concrete);
        }
        codec::expect_arity(Self::CLAUSE, tag, args, 1, 2)?;
        let index = args[0]
            .as_u64()
            .and_then(|i| usize::try_from(i).ok())
            .ok_or_else(|| ModelError::shape(Self::CLAUSE, format!("aggregation index must be a non-negative integer, got {}", args[0])))?;
        let options = match args.get(1) {
            None => OptionsSlot::Absent,
            Some(Json::Null) => OptionsSlot::Null,
            Some(raw) => {
                let map = codec::as_object(Self::CLAUSE, raw)?;
                codec::check_keys(Self::CLAUSE, map, AGGREGATION_OPTION_KEYS)?;
                OptionsSlot::Present(AggregationRefOptions {
                    base_type: codec::opt_string(Self::CLAUSE, map, "base-type")?,
                    name: codec::opt_string(Self::CLAUSE, map, "name")?,
                    display_name: codec::opt_string(Self::CLAUSE, map, "display-name")?,
                })
            }
        };
        Ok(FieldReference::Aggregation(AggregationRef { index, options }))
    }
}

/// Target of a template tag or parameter: a column, or another template
/// tag by name (`["template-tag", name]`).
#[derive(Debug, Clone, PartialEq)]
pub enum DimensionReference {
    Field(FieldReference),
    TemplateTag(String),
}

impl Tagged for DimensionReference {
    const CLAUSE: &'static str = "dimension reference";

    fn to_json(&self) -> Json {
        match self {
            DimensionReference::Field(field) => field.to_json(),
            DimensionReference::TemplateTag(name) => codec::tagged("template-tag", [Json::from(name.as_str())]),
        }
    }

    fn from_json(value: &Json) -> Result<Self, ModelError> {
        let (tag, args) = codec::split_tagged(Self::CLAUSE, value)?;
        if tag != "template-tag" {
            return FieldReference::from_json(value).map(DimensionReference::Field);
        }
        codec::expect_arity(Self::CLAUSE, tag, args, 1, 1)?;
        Ok(DimensionReference::TemplateTag(
            codec::as_str(Self::CLAUSE, &args[0])?.to_string(),
        ))
    }
}

impl From<ConcreteFieldRef> for DimensionReference {
    fn from(field: ConcreteFieldRef) -> Self {
        DimensionReference::Field(FieldReference::Concrete(field))
    }
}

impl_serde_via_json!(ConcreteFieldRef, FieldReference, DimensionReference);

fn common_options(
    join_alias: Option<&str>,
    source_field: Option<&FieldKey>,
    base_type: Option<&str>,
) -> Map<String, Json> {
    let mut map = Map::new();
    codec::insert_opt(&mut map, "join-alias", join_alias.map(Json::from));
    codec::insert_opt(&mut map, "source-field", source_field.map(FieldKey::to_json));
    codec::insert_opt(&mut map, "base-type", base_type.map(Json::from));
    map
}

fn insert_bucketing(map: &mut Map<String, Json>, bucketing: Option<&Bucketing>) {
    match bucketing {
        Some(Bucketing::Temporal(unit)) => {
            map.insert("temporal-unit".to_string(), Json::from(unit.as_str()));
        }
        Some(Bucketing::Binned(binning)) => {
            map.insert("binning".to_string(), binning.to_json());
        }
        None => {}
    }
}

fn decode_bucketing(clause: &'static str, map: &Map<String, Json>) -> Result<Option<Bucketing>, ModelError> {
    let unit = map
        .get("temporal-unit")
        .map(|raw| codec::from_serde::<DatetimeUnit>(clause, raw))
        .transpose()?;
    let binning = map
        .get("binning")
        .map(|raw| codec::from_serde::<BinningOptions>(clause, raw))
        .transpose()?;
    match (unit, binning) {
        (Some(_), Some(_)) => Err(ModelError::shape(
            clause,
            "\"temporal-unit\" and \"binning\" are mutually exclusive",
        )),
        (Some(unit), None) => Ok(Some(Bucketing::Temporal(unit))),
        (None, Some(binning)) => Ok(Some(Bucketing::Binned(binning))),
        (None, None) => Ok(None),
    }
}

fn decode_field(args: &[Json]) -> Result<ConcreteFieldRef, ModelError> {
    const CLAUSE: &str = ConcreteFieldRef::CLAUSE;
    codec::expect_arity(CLAUSE, "field", args, 2, 2)?;
    let id = FieldKey::from_json(&args[0])?;

    let map = match &args[1] {
        Json::Null => {
            return match id {
                FieldKey::Id(id) => Ok(ConcreteFieldRef::Local(LocalField { id, options: None })),
                FieldKey::Name(name) => Err(ModelError::shape(
                    CLAUSE,
                    format!("field literal \"{name}\" requires \"base-type\""),
                )),
            };
        }
        raw => codec::as_object(CLAUSE, raw)?,
    };
    codec::check_keys(CLAUSE, map, FIELD_OPTION_KEYS)?;

    let base_type = codec::opt_string(CLAUSE, map, "base-type")?;
    let join_alias = codec::opt_string(CLAUSE, map, "join-alias")?;
    let source_field = map.get("source-field").map(FieldKey::from_json).transpose()?;

    let field = match decode_bucketing(CLAUSE, map)? {
        Some(Bucketing::Binned(binning)) => ConcreteFieldRef::Binned(BinnedField {
            id,
            binning,
            join_alias,
            source_field,
            base_type,
        }),
        Some(Bucketing::Temporal(temporal_unit)) => ConcreteFieldRef::Temporal(TemporalField {
            id,
            temporal_unit,
            join_alias,
            source_field,
            base_type,
        }),
        None => match (join_alias, source_field) {
            (Some(join_alias), source_field) => ConcreteFieldRef::Joined(JoinedField {
                id,
                join_alias,
                source_field,
                base_type,
            }),
            (None, Some(source_field)) => ConcreteFieldRef::Foreign(ForeignField {
                id,
                source_field,
                base_type,
            }),
            (None, None) => match id {
                FieldKey::Id(id) => ConcreteFieldRef::Local(LocalField {
                    id,
                    options: Some(LocalOptions { base_type }),
                }),
                FieldKey::Name(name) => {
                    let base_type = base_type.ok_or_else(|| {
                        ModelError::shape(CLAUSE, format!("field literal \"{name}\" requires \"base-type\""))
                    })?;
                    ConcreteFieldRef::Literal(FieldLiteral { name, base_type })
                }
            },
        },
    };
    Ok(field)
}

fn decode_expression_ref(args: &[Json]) -> Result<ConcreteFieldRef, ModelError> {
    const CLAUSE: &str = ConcreteFieldRef::CLAUSE;
    codec::expect_arity(CLAUSE, "expression", args, 1, 2)?;
    let name = codec::as_str(CLAUSE, &args[0])?.to_string();
    let options = match args.get(1) {
        None => OptionsSlot::Absent,
        Some(Json::Null) => OptionsSlot::Null,
        Some(raw) => {
            let map = codec::as_object(CLAUSE, raw)?;
            codec::check_keys(CLAUSE, map, EXPRESSION_OPTION_KEYS)?;
            OptionsSlot::Present(ExpressionRefOptions {
                base_type: codec::opt_string(CLAUSE, map, "base-type")?,
                bucketing: decode_bucketing(CLAUSE, map)?,
            })
        }
    };
    Ok(ConcreteFieldRef::Expression(ExpressionRef { name, options }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(value: Json) -> ConcreteFieldRef {
        ConcreteFieldRef::from_json(&value).unwrap()
    }

    #[test]
    fn test_local_field_null_and_empty_options_differ() {
        let null = decode(json!(["field", 1, null]));
        let empty = decode(json!(["field", 1, {}]));
        assert_ne!(null, empty);
        assert_eq!(null.to_json(), json!(["field", 1, null]));
        assert_eq!(empty.to_json(), json!(["field", 1, {}]));
    }

    #[test]
    fn test_variant_selection() {
        assert!(matches!(
            decode(json!(["field", "TOTAL", {"base-type": "type/Float"}])),
            ConcreteFieldRef::Literal(_)
        ));
        assert!(matches!(
            decode(json!(["field", 5, {"source-field": 3}])),
            ConcreteFieldRef::Foreign(_)
        ));
        assert!(matches!(
            decode(json!(["field", 5, {"join-alias": "Products", "source-field": 3}])),
            ConcreteFieldRef::Joined(_)
        ));
        assert!(matches!(
            decode(json!(["field", 5, {"temporal-unit": "month", "join-alias": "P"}])),
            ConcreteFieldRef::Temporal(_)
        ));
        assert!(matches!(
            decode(json!(["field", 5, {"binning": {"strategy": "default"}}])),
            ConcreteFieldRef::Binned(_)
        ));
    }

    #[test]
    fn test_temporal_unit_and_binning_are_exclusive() {
        let both = json!(["field", 5, {"temporal-unit": "month", "binning": {"strategy": "default"}}]);
        let err = ConcreteFieldRef::from_json(&both).unwrap_err();
        assert!(err.is_shape_violation());

        let expr = json!(["expression", "x", {"temporal-unit": "day", "binning": {"strategy": "default"}}]);
        assert!(ConcreteFieldRef::from_json(&expr).is_err());
    }

    #[test]
    fn test_field_literal_requires_base_type() {
        assert!(ConcreteFieldRef::from_json(&json!(["field", "TOTAL", null])).is_err());
        assert!(ConcreteFieldRef::from_json(&json!(["field", "TOTAL", {}])).is_err());
    }

    #[test]
    fn test_unknown_option_rejected() {
        let err = ConcreteFieldRef::from_json(&json!(["field", 1, {"colour": "red"}])).unwrap_err();
        assert!(err.to_string().contains("colour"));
    }

    #[test]
    fn test_expression_ref_option_slots() {
        for value in [
            json!(["expression", "Profit"]),
            json!(["expression", "Profit", null]),
            json!(["expression", "Profit", {"temporal-unit": "week"}]),
        ] {
            assert_eq!(decode(value.clone()).to_json(), value);
        }
    }

    #[test]
    fn test_aggregation_ref() {
        let value = json!(["aggregation", 0]);
        let reference = FieldReference::from_json(&value).unwrap();
        assert!(matches!(reference, FieldReference::Aggregation(AggregationRef { index: 0, .. })));
        assert_eq!(reference.to_json(), value);
        assert!(FieldReference::from_json(&json!(["aggregation", -1])).is_err());
    }

    #[test]
    fn test_same_column_ignores_bucketing() {
        let plain = decode(json!(["field", 7, null]));
        let by_month = decode(json!(["field", 7, {"temporal-unit": "month"}]));
        let joined = decode(json!(["field", 7, {"join-alias": "J"}]));
        assert!(plain.same_column(&by_month));
        assert!(!plain.same_column(&joined));
    }

    #[test]
    fn test_dimension_reference_targets() {
        let tag = json!(["template-tag", "created"]);
        assert_eq!(
            DimensionReference::from_json(&tag).unwrap(),
            DimensionReference::TemplateTag("created".to_string())
        );
        assert_eq!(DimensionReference::from_json(&tag).unwrap().to_json(), tag);

        let field = json!(["field", 10, {"temporal-unit": "day"}]);
        assert!(matches!(
            DimensionReference::from_json(&field).unwrap(),
            DimensionReference::Field(FieldReference::Concrete(_))
        ));
        assert!(DimensionReference::from_json(&json!(["template-tag", 3])).is_err());
    }
}
