//! MBQL query model
//!
//! Typed representation of dataset queries as they travel between the
//! query builder, the query engine and storage. Structured queries are
//! closed sum types encoded as MBQL's tagged JSON arrays; every value
//! round-trips through JSON without loss, including `null` versus absent.
//! Top-level keys the model does not interpret (`info`, `page`, …) are
//! carried in `extra` and written back unchanged.

use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value as Json};
use sha2::{Digest, Sha256};

mod aggregation;
mod codec;
mod error;
mod expression;
mod field;
mod filter;
mod types;
pub mod validate;

pub use aggregation::*;
pub use codec::Tagged;
pub use error::ModelError;
pub use expression::*;
pub use field::*;
pub use filter::*;
pub use types::*;

const DATASET_QUERY_KEYS: &[&str] = &["type", "query", "native", "database", "parameters"];

/// Top-level dataset query
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetQuery {
    pub body: QueryBody,

    /// `null` when the user lacks data permissions on the database.
    /// The key itself is required.
    pub database: Option<DatabaseId>,

    pub parameters: Option<Vec<Json>>,

    /// Uninterpreted top-level keys.
    pub extra: Map<String, Json>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryBody {
    /// `"type": "query"`
    Structured { query: StructuredQuery },
    /// `"type": "native"`
    Native { native: NativeQuery },
}

impl DatasetQuery {
    pub fn structured(query: StructuredQuery, database: Option<DatabaseId>) -> Self {
        Self {
            body: QueryBody::Structured { query },
            database,
            parameters: None,
            extra: Map::new(),
        }
    }

    pub fn native(native: NativeQuery, database: Option<DatabaseId>) -> Self {
        Self {
            body: QueryBody::Native { native },
            database,
            parameters: None,
            extra: Map::new(),
        }
    }

    /// Decode from JSON text. Malformed text is [`ModelError::Json`]; text
    /// that parses but is not a dataset query is a shape violation.
    pub fn from_json_str(json: &str) -> Result<Self, ModelError> {
        let value: Json = serde_json::from_str(json)?;
        Self::from_json(&value)
    }

    pub fn from_json(value: &Json) -> Result<Self, ModelError> {
        const CLAUSE: &str = "dataset query";
        let mut object = codec::as_object(CLAUSE, value)?.clone();

        let query_type = object
            .remove("type")
            .ok_or_else(|| ModelError::shape(CLAUSE, "missing \"type\""))?;
        let body = match codec::as_str(CLAUSE, &query_type)? {
            "query" => {
                let raw = object
                    .remove("query")
                    .ok_or_else(|| ModelError::shape(CLAUSE, "missing \"query\""))?;
                QueryBody::Structured {
                    query: StructuredQuery::from_json(&raw)?,
                }
            }
            "native" => {
                let raw = object
                    .remove("native")
                    .ok_or_else(|| ModelError::shape(CLAUSE, "missing \"native\""))?;
                QueryBody::Native {
                    native: codec::from_serde("native query", &raw)?,
                }
            }
            other => {
                return Err(ModelError::shape(
                    CLAUSE,
                    format!("\"type\" must be \"query\" or \"native\", got \"{other}\""),
                ))
            }
        };

        let database = match object.remove("database") {
            None => return Err(ModelError::shape(CLAUSE, "missing \"database\"")),
            Some(Json::Null) => None,
            Some(raw) => Some(codec::as_i64(CLAUSE, &raw)?),
        };
        let parameters = match object.remove("parameters") {
            None => None,
            Some(Json::Array(items)) => Some(items),
            Some(other) => {
                return Err(ModelError::shape(
                    CLAUSE,
                    format!("\"parameters\" must be a list, got {other}"),
                ))
            }
        };

        Ok(DatasetQuery {
            body,
            database,
            parameters,
            extra: object,
        })
    }

    pub fn to_json_string(&self) -> Result<String, ModelError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn as_structured(&self) -> Option<&StructuredQuery> {
        match &self.body {
            QueryBody::Structured { query } => Some(query),
            QueryBody::Native { .. } => None,
        }
    }

    pub fn as_structured_mut(&mut self) -> Option<&mut StructuredQuery> {
        match &mut self.body {
            QueryBody::Structured { query } => Some(query),
            QueryBody::Native { .. } => None,
        }
    }

    /// SHA-256 of the canonical JSON encoding, for caching and provenance
    pub fn fingerprint(&self) -> Result<String, ModelError> {
        let json = serde_json::to_string(self)?;
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// The shape shared with public and embedded viewers: the query type,
    /// plus template tags for native queries. Everything else is withheld.
    pub fn to_public(&self) -> PublicDatasetQuery {
        match &self.body {
            QueryBody::Structured { .. } => PublicDatasetQuery::Structured,
            QueryBody::Native { native } => PublicDatasetQuery::Native {
                native: PublicNativeQuery {
                    template_tags: native.template_tags.clone(),
                },
            },
        }
    }
}

impl Serialize for DatasetQuery {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        match &self.body {
            QueryBody::Structured { query } => {
                map.serialize_entry("type", "query")?;
                map.serialize_entry("query", query)?;
            }
            QueryBody::Native { native } => {
                map.serialize_entry("type", "native")?;
                map.serialize_entry("native", native)?;
            }
        }
        map.serialize_entry("database", &self.database)?;
        if let Some(parameters) = &self.parameters {
            map.serialize_entry("parameters", parameters)?;
        }
        // Sorted so the fingerprint does not depend on input key order.
        let mut extra: Vec<_> = self
            .extra
            .iter()
            .filter(|(key, _)| !DATASET_QUERY_KEYS.contains(&key.as_str()))
            .collect();
        extra.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (key, value) in extra {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for DatasetQuery {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Json::deserialize(deserializer)?;
        DatasetQuery::from_json(&value).map_err(serde::de::Error::custom)
    }
}

/// Public view of a dataset query, see [`DatasetQuery::to_public`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PublicDatasetQuery {
    #[serde(rename = "query")]
    Structured,
    #[serde(rename = "native")]
    Native { native: PublicNativeQuery },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublicNativeQuery {
    #[serde(rename = "template-tags", default, skip_serializing_if = "Option::is_none")]
    pub template_tags: Option<BTreeMap<String, TemplateTag>>,
}

/// Native query text plus template tags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeQuery {
    pub query: String,

    #[serde(rename = "template-tags", default, skip_serializing_if = "Option::is_none")]
    pub template_tags: Option<BTreeMap<String, TemplateTag>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Json>,
}

impl NativeQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            template_tags: None,
            collection: None,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemplateTagType {
    Text,
    Number,
    Date,
    Dimension,
    Card,
    Snippet,
    TemporalUnit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TemplateTag {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub tag_type: TemplateTagType,
    /// A column for field filters, or another tag via `["template-tag", name]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<DimensionReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_id: Option<CardId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet_id: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Json>,
}

const STAGE_KEYS: &[&str] = &[
    "source-table",
    "source-query",
    "aggregation",
    "breakout",
    "filter",
    "joins",
    "order-by",
    "limit",
    "expressions",
    "fields",
];

/// One stage of a structured query. Its source is a table, a saved
/// question, or the previous stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredQuery {
    pub source: QuerySource,
    pub aggregation: Option<Vec<Aggregation>>,
    pub breakout: Option<Vec<ConcreteFieldRef>>,
    pub filter: Option<Filter>,
    pub joins: Option<Vec<Join>>,
    pub order_by: Option<Vec<OrderBy>>,
    pub limit: Option<u64>,
    pub expressions: Option<ExpressionClause>,
    pub fields: Option<Vec<ConcreteFieldRef>>,
    /// Uninterpreted stage keys such as `page`.
    pub extra: Map<String, Json>,
}

/// `source-table` or `source-query`, exactly one of them
#[derive(Debug, Clone, PartialEq)]
pub enum QuerySource {
    Table(SourceTable),
    Query(Box<StructuredQuery>),
}

impl QuerySource {
    fn take(clause: &'static str, object: &mut Map<String, Json>) -> Result<Self, ModelError> {
        match (object.remove("source-table"), object.remove("source-query")) {
            (Some(table), None) => SourceTable::from_json(&table).map(QuerySource::Table),
            (None, Some(query)) => StructuredQuery::from_json(&query).map(|q| QuerySource::Query(Box::new(q))),
            (Some(_), Some(_)) => Err(ModelError::shape(
                clause,
                "\"source-table\" and \"source-query\" are mutually exclusive",
            )),
            (None, None) => Err(ModelError::shape(
                clause,
                "one of \"source-table\" or \"source-query\" is required",
            )),
        }
    }

    fn insert_into(&self, object: &mut Map<String, Json>) {
        match self {
            QuerySource::Table(table) => object.insert("source-table".to_string(), table.to_json()),
            QuerySource::Query(query) => object.insert("source-query".to_string(), query.to_json()),
        };
    }
}

/// Append `extra` entries that do not collide with keys the model owns.
fn extend_extra(object: &mut Map<String, Json>, extra: &Map<String, Json>, owned: &[&str]) {
    for (key, value) in extra {
        if !owned.contains(&key.as_str()) {
            object.insert(key.clone(), value.clone());
        }
    }
}

impl Tagged for StructuredQuery {
    const CLAUSE: &'static str = "query stage";

    fn to_json(&self) -> Json {
        let mut object = Map::new();
        self.source.insert_into(&mut object);
        codec::insert_opt(&mut object, "aggregation", self.aggregation.as_deref().map(codec::list_json));
        codec::insert_opt(&mut object, "breakout", self.breakout.as_deref().map(codec::list_json));
        codec::insert_opt(&mut object, "filter", self.filter.as_ref().map(Filter::to_json));
        codec::insert_opt(&mut object, "joins", self.joins.as_deref().map(codec::list_json));
        codec::insert_opt(&mut object, "order-by", self.order_by.as_deref().map(codec::list_json));
        codec::insert_opt(&mut object, "limit", self.limit.map(Json::from));
        codec::insert_opt(&mut object, "expressions", self.expressions.as_ref().map(ExpressionClause::to_json));
        codec::insert_opt(&mut object, "fields", self.fields.as_deref().map(codec::list_json));
        extend_extra(&mut object, &self.extra, STAGE_KEYS);
        Json::Object(object)
    }

    fn from_json(value: &Json) -> Result<Self, ModelError> {
        let mut object = codec::as_object(Self::CLAUSE, value)?.clone();
        let source = QuerySource::take(Self::CLAUSE, &mut object)?;
        let limit = match object.remove("limit") {
            None => None,
            Some(raw) => Some(raw.as_u64().ok_or_else(|| {
                ModelError::shape(Self::CLAUSE, format!("\"limit\" must be a non-negative integer, got {raw}"))
            })?),
        };
        Ok(StructuredQuery {
            source,
            aggregation: codec::take_list(Self::CLAUSE, &mut object, "aggregation")?,
            breakout: codec::take_list(Self::CLAUSE, &mut object, "breakout")?,
            filter: codec::take(&mut object, "filter")?,
            joins: codec::take_list(Self::CLAUSE, &mut object, "joins")?,
            order_by: codec::take_list(Self::CLAUSE, &mut object, "order-by")?,
            limit,
            expressions: codec::take(&mut object, "expressions")?,
            fields: codec::take_list(Self::CLAUSE, &mut object, "fields")?,
            extra: object,
        })
    }
}

impl StructuredQuery {
    /// A bare query over `source`.
    pub fn new(source: QuerySource) -> Self {
        Self {
            source,
            aggregation: None,
            breakout: None,
            filter: None,
            joins: None,
            order_by: None,
            limit: None,
            expressions: None,
            fields: None,
            extra: Map::new(),
        }
    }

    pub fn from_table(table: TableId) -> Self {
        Self::new(QuerySource::Table(SourceTable::Table(table)))
    }

    /// Wrap `self` as the source of a new, empty stage.
    pub fn nest(self) -> Self {
        Self::new(QuerySource::Query(Box::new(self)))
    }

    pub fn stage_count(&self) -> usize {
        match &self.source {
            QuerySource::Query(inner) => inner.stage_count() + 1,
            QuerySource::Table(_) => 1,
        }
    }

    /// Resolve a stage index, where negative indices count from the last stage.
    pub fn resolve_stage_index(&self, index: i32) -> Option<usize> {
        let count = self.stage_count() as i64;
        let index = if index < 0 { count + index as i64 } else { index as i64 };
        (0..count).contains(&index).then_some(index as usize)
    }

    /// Stage 0 is the innermost `source-query`; `-1` is `self`.
    pub fn stage(&self, index: i32) -> Option<&StructuredQuery> {
        let index = self.resolve_stage_index(index)?;
        self.nth_inner(self.stage_count() - 1 - index)
    }

    pub fn stage_mut(&mut self, index: i32) -> Option<&mut StructuredQuery> {
        let index = self.resolve_stage_index(index)?;
        let steps = self.stage_count() - 1 - index;
        self.nth_inner_mut(steps)
    }

    /// All stages, innermost first.
    pub fn stages(&self) -> Vec<&StructuredQuery> {
        let mut stages = vec![self];
        let mut current = self;
        while let QuerySource::Query(inner) = &current.source {
            stages.push(inner);
            current = inner;
        }
        stages.reverse();
        stages
    }

    fn nth_inner(&self, steps: usize) -> Option<&StructuredQuery> {
        if steps == 0 {
            return Some(self);
        }
        match &self.source {
            QuerySource::Query(inner) => inner.nth_inner(steps - 1),
            QuerySource::Table(_) => None,
        }
    }

    fn nth_inner_mut(&mut self, steps: usize) -> Option<&mut StructuredQuery> {
        if steps == 0 {
            return Some(self);
        }
        match &mut self.source {
            QuerySource::Query(inner) => inner.nth_inner_mut(steps - 1),
            QuerySource::Table(_) => None,
        }
    }

    pub fn has_aggregation(&self) -> bool {
        self.aggregation.as_ref().is_some_and(|a| !a.is_empty())
            || self.breakout.as_ref().is_some_and(|b| !b.is_empty())
    }

    pub fn add_filter(&mut self, filter: Filter) {
        self.filter = Some(Filter::conjoin(self.filter.take(), filter));
    }

    pub fn add_aggregation(&mut self, aggregation: Aggregation) {
        self.aggregation.get_or_insert_with(Vec::new).push(aggregation);
    }

    pub fn add_breakout(&mut self, field: ConcreteFieldRef) {
        self.breakout.get_or_insert_with(Vec::new).push(field);
    }

    /// Sort on `target`, replacing any existing ordering on the same column.
    pub fn set_order_by(&mut self, target: FieldReference, direction: SortDirection) {
        let order_by = self.order_by.get_or_insert_with(Vec::new);
        order_by.retain(|existing| !existing.target_matches(&target));
        order_by.insert(0, OrderBy { direction, target });
    }

    pub fn join_aliases(&self) -> impl Iterator<Item = &str> {
        self.joins
            .iter()
            .flatten()
            .filter_map(|join| join.alias.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JoinStrategy {
    LeftJoin,
    RightJoin,
    InnerJoin,
    FullJoin,
}

impl JoinStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinStrategy::LeftJoin => "left-join",
            JoinStrategy::RightJoin => "right-join",
            JoinStrategy::InnerJoin => "inner-join",
            JoinStrategy::FullJoin => "full-join",
        }
    }
}

const JOIN_KEYS: &[&str] = &[
    "source-table",
    "source-query",
    "condition",
    "alias",
    "ident",
    "strategy",
    "fields",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub source: QuerySource,
    pub condition: JoinCondition,
    /// Unique within the stage's joins; the engine enforces this and
    /// [`validate`] reports duplicates.
    pub alias: Option<String>,
    pub ident: Option<String>,
    pub strategy: Option<JoinStrategy>,
    pub fields: Option<JoinFields>,
    pub extra: Map<String, Json>,
}

impl Tagged for Join {
    const CLAUSE: &'static str = "join";

    fn to_json(&self) -> Json {
        let mut object = Map::new();
        self.source.insert_into(&mut object);
        object.insert("condition".to_string(), self.condition.to_json());
        codec::insert_opt(&mut object, "alias", self.alias.as_deref().map(Json::from));
        codec::insert_opt(&mut object, "ident", self.ident.as_deref().map(Json::from));
        codec::insert_opt(&mut object, "strategy", self.strategy.map(|s| Json::from(s.as_str())));
        codec::insert_opt(&mut object, "fields", self.fields.as_ref().map(JoinFields::to_json));
        extend_extra(&mut object, &self.extra, JOIN_KEYS);
        Json::Object(object)
    }

    fn from_json(value: &Json) -> Result<Self, ModelError> {
        let mut object = codec::as_object(Self::CLAUSE, value)?.clone();
        let source = QuerySource::take(Self::CLAUSE, &mut object)?;
        let condition = codec::take(&mut object, "condition")?
            .ok_or_else(|| ModelError::shape(Self::CLAUSE, "missing \"condition\""))?;
        let alias = codec::opt_string(Self::CLAUSE, &object, "alias")?;
        let ident = codec::opt_string(Self::CLAUSE, &object, "ident")?;
        let strategy = object
            .get("strategy")
            .map(|raw| codec::from_serde::<JoinStrategy>(Self::CLAUSE, raw))
            .transpose()?;
        let fields = codec::take(&mut object, "fields")?;
        for key in ["alias", "ident", "strategy"] {
            object.remove(key);
        }
        Ok(Join {
            source,
            condition,
            alias,
            ident,
            strategy,
            fields,
            extra: object,
        })
    }
}

codec::impl_serde_via_json!(StructuredQuery, Join);

/// `["=", lhs, rhs]`
#[derive(Debug, Clone, PartialEq)]
pub struct JoinCondition {
    pub lhs: FieldReference,
    pub rhs: FieldReference,
}

impl Tagged for JoinCondition {
    const CLAUSE: &'static str = "join condition";

    fn to_json(&self) -> Json {
        codec::tagged("=", [self.lhs.to_json(), self.rhs.to_json()])
    }

    fn from_json(value: &Json) -> Result<Self, ModelError> {
        let (tag, args) = codec::split_tagged(Self::CLAUSE, value)?;
        if tag != "=" {
            return Err(ModelError::shape(Self::CLAUSE, format!("expected \"=\", got \"{tag}\"")));
        }
        codec::expect_arity(Self::CLAUSE, tag, args, 2, 2)?;
        Ok(JoinCondition {
            lhs: FieldReference::from_json(&args[0])?,
            rhs: FieldReference::from_json(&args[1])?,
        })
    }
}


/// `"all"`, `"none"`, or a list of joined-field references
#[derive(Debug, Clone, PartialEq)]
pub enum JoinFields {
    All,
    None,
    Fields(Vec<ConcreteFieldRef>),
}

impl Tagged for JoinFields {
    const CLAUSE: &'static str = "join fields";

    fn to_json(&self) -> Json {
        match self {
            JoinFields::All => Json::from("all"),
            JoinFields::None => Json::from("none"),
            JoinFields::Fields(fields) => Json::Array(fields.iter().map(ConcreteFieldRef::to_json).collect()),
        }
    }

    fn from_json(value: &Json) -> Result<Self, ModelError> {
        match value {
            Json::String(s) if s == "all" => Ok(JoinFields::All),
            Json::String(s) if s == "none" => Ok(JoinFields::None),
            Json::Array(items) => {
                let fields = items
                    .iter()
                    .map(ConcreteFieldRef::from_json)
                    .collect::<Result<Vec<_>, _>>()?;
                if let Some(field) = fields.iter().find(|f| f.join_alias().is_none()) {
                    return Err(ModelError::shape(
                        Self::CLAUSE,
                        format!("join fields must carry a join alias, got {}", field.to_json()),
                    ));
                }
                Ok(JoinFields::Fields(fields))
            }
            other => Err(ModelError::shape(
                Self::CLAUSE,
                format!("expected \"all\", \"none\" or a list of fields, got {other}"),
            )),
        }
    }
}

/// `["asc" | "desc", reference]`
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub direction: SortDirection,
    pub target: FieldReference,
}

impl OrderBy {
    /// Whether this ordering sorts on the same column as `other`.
    pub fn target_matches(&self, other: &FieldReference) -> bool {
        match (&self.target, other) {
            (FieldReference::Concrete(a), FieldReference::Concrete(b)) => a.same_column(b),
            (FieldReference::Aggregation(a), FieldReference::Aggregation(b)) => a.index == b.index,
            _ => false,
        }
    }
}

impl Tagged for OrderBy {
    const CLAUSE: &'static str = "order-by";

    fn to_json(&self) -> Json {
        codec::tagged(self.direction.as_str(), [self.target.to_json()])
    }

    fn from_json(value: &Json) -> Result<Self, ModelError> {
        let (tag, args) = codec::split_tagged(Self::CLAUSE, value)?;
        let direction = match tag {
            "asc" => SortDirection::Asc,
            "desc" => SortDirection::Desc,
            other => {
                return Err(ModelError::shape(
                    Self::CLAUSE,
                    format!("expected \"asc\" or \"desc\", got \"{other}\""),
                ))
            }
        };
        codec::expect_arity(Self::CLAUSE, tag, args, 1, 1)?;
        Ok(OrderBy {
            direction,
            target: FieldReference::from_json(&args[0])?,
        })
    }
}

codec::impl_serde_via_json!(JoinCondition, JoinFields, OrderBy);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> DatasetQuery {
        DatasetQuery::from_json_str(
            &json!({
                "type": "query",
                "database": 1,
                "query": {
                    "source-query": {
                        "source-table": 2,
                        "aggregation": [["count"]],
                        "breakout": [["field", 10, {"temporal-unit": "month"}]]
                    },
                    "filter": [">", ["field", "count", {"base-type": "type/Integer"}], 10],
                    "order-by": [["desc", ["field", "count", {"base-type": "type/Integer"}]]],
                    "limit": 5
                }
            })
            .to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let query1 = sample();
        let query2 = query1.clone();

        assert_eq!(query1.fingerprint().unwrap(), query2.fingerprint().unwrap());
    }

    #[test]
    fn test_json_round_trip() {
        let query = sample();
        let json = query.to_json_string().unwrap();
        let parsed = DatasetQuery::from_json_str(&json).unwrap();

        assert_eq!(query, parsed);
        assert_eq!(query.fingerprint().unwrap(), parsed.fingerprint().unwrap());
    }

    #[test]
    fn test_database_null_vs_absent() {
        let with_null = json!({"type": "native", "native": {"query": "select 1"}, "database": null});
        let query: DatasetQuery = serde_json::from_value(with_null.clone()).unwrap();
        assert_eq!(query.database, None);
        assert_eq!(serde_json::to_value(&query).unwrap(), with_null);

        let absent = json!({"type": "native", "native": {"query": "select 1"}});
        assert!(serde_json::from_value::<DatasetQuery>(absent).is_err());
    }

    #[test]
    fn test_source_keys_are_exclusive() {
        let both = json!({
            "type": "query",
            "database": 1,
            "query": {"source-table": 1, "source-query": {"source-table": 2}}
        });
        assert!(serde_json::from_value::<DatasetQuery>(both).is_err());

        let neither = json!({"type": "query", "database": 1, "query": {"limit": 1}});
        assert!(serde_json::from_value::<DatasetQuery>(neither).is_err());
    }

    #[test]
    fn test_stages() {
        let query = sample();
        let outer = query.as_structured().unwrap();
        assert_eq!(outer.stage_count(), 2);
        assert_eq!(outer.stage(-1).unwrap().limit, Some(5));
        assert_eq!(
            outer.stage(0).unwrap().source,
            QuerySource::Table(SourceTable::Table(2))
        );
        assert!(outer.stage(2).is_none());
        assert!(outer.stage(-3).is_none());
        assert_eq!(outer.stages().len(), 2);
    }

    #[test]
    fn test_stage_mut_edits_inner_stage() {
        let mut query = sample();
        let outer = query.as_structured_mut().unwrap();
        outer.stage_mut(0).unwrap().limit = Some(100);
        assert_eq!(outer.stage(0).unwrap().limit, Some(100));
    }

    #[test]
    fn test_set_order_by_replaces_same_column() {
        let mut query = StructuredQuery::from_table(1);
        let column: FieldReference = ConcreteFieldRef::field(3).into();
        query.set_order_by(column.clone(), SortDirection::Asc);
        query.set_order_by(column, SortDirection::Desc);
        let order_by = query.order_by.unwrap();
        assert_eq!(order_by.len(), 1);
        assert_eq!(order_by[0].direction, SortDirection::Desc);
    }

    #[test]
    fn test_join_round_trip() {
        let join = json!({
            "source-table": 5,
            "condition": ["=", ["field", 1, null], ["field", 7, {"join-alias": "Products"}]],
            "alias": "Products",
            "strategy": "left-join",
            "fields": [["field", 8, {"join-alias": "Products"}]]
        });
        let parsed: Join = serde_json::from_value(join.clone()).unwrap();
        assert_eq!(parsed.strategy, Some(JoinStrategy::LeftJoin));
        assert_eq!(serde_json::to_value(&parsed).unwrap(), join);

        let bad_fields = json!({
            "source-table": 5,
            "condition": ["=", ["field", 1, null], ["field", 7, null]],
            "fields": [["field", 8, null]]
        });
        assert!(serde_json::from_value::<Join>(bad_fields).is_err());
    }

    #[test]
    fn test_native_template_tags() {
        let native = json!({
            "query": "select * from orders where {{created}}",
            "template-tags": {
                "created": {
                    "id": "abc",
                    "name": "created",
                    "display-name": "Created",
                    "type": "dimension",
                    "dimension": ["field", 10, null],
                    "widget-type": "date/all-options"
                }
            }
        });
        let parsed: NativeQuery = serde_json::from_value(native.clone()).unwrap();
        let tags = parsed.template_tags.as_ref().unwrap();
        assert_eq!(tags["created"].tag_type, TemplateTagType::Dimension);
        assert_eq!(serde_json::to_value(&parsed).unwrap(), native);
    }

    #[test]
    fn test_template_tag_can_target_another_tag() {
        let tag = json!({
            "name": "alias",
            "display-name": "Alias",
            "type": "dimension",
            "dimension": ["template-tag", "created"]
        });
        let parsed: TemplateTag = serde_json::from_value(tag.clone()).unwrap();
        assert_eq!(parsed.dimension, Some(DimensionReference::TemplateTag("created".to_string())));
        assert_eq!(serde_json::to_value(&parsed).unwrap(), tag);
    }

    #[test]
    fn test_public_view_withholds_query_details() {
        assert_eq!(
            serde_json::to_value(sample().to_public()).unwrap(),
            json!({"type": "query"})
        );

        let mut native = NativeQuery::new("select * from t where x = {{x}}");
        native.collection = Some("orders".to_string());
        native.template_tags = Some(BTreeMap::from([(
            "x".to_string(),
            serde_json::from_value(json!({"name": "x", "display-name": "X", "type": "number"})).unwrap(),
        )]));
        let public = DatasetQuery::native(native, Some(1)).to_public();
        assert_eq!(
            serde_json::to_value(&public).unwrap(),
            json!({
                "type": "native",
                "native": {"template-tags": {"x": {"name": "x", "display-name": "X", "type": "number"}}}
            })
        );
        let decoded: PublicDatasetQuery = serde_json::from_value(json!({"type": "query"})).unwrap();
        assert_eq!(decoded, PublicDatasetQuery::Structured);
    }

    #[test]
    fn test_fingerprint_ignores_extra_key_order() {
        let a = DatasetQuery::from_json_str(
            r#"{"type": "query", "database": 1, "query": {"source-table": 1}, "info": 1, "constraints": 2}"#,
        )
        .unwrap();
        let b = DatasetQuery::from_json_str(
            r#"{"constraints": 2, "info": 1, "database": 1, "type": "query", "query": {"source-table": 1}}"#,
        )
        .unwrap();
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }
}
