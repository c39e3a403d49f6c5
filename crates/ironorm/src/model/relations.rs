//! Relation descriptors (component K): the edges of the model graph.
//!
//! A [`Relation`] is data, not reflection — a model's `relations()` map
//! returns a factory that, given the *parent* `Record`, produces one of
//! these already carrying the key value it needs to constrain a query.
//! [`Relation::load`] runs that single query. [`Relation::load_many`] runs
//! the batched equivalent across a whole parent set — one query per named
//! relation regardless of how many parents are in it, the way eager
//! loading is supposed to avoid an N+1 round trip.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as Json;

use crate::connection::Connection;
use crate::error::{OrmError, OrmResult};
use crate::ident::Identifier;

use super::{json_to_placeholder, AttributeStore, ModelMeta, Record};

/// Wraps a table name for `connection`'s dialect, applying its configured
/// `prefix` — every relation query goes through here rather than splicing
/// the bare name, so a prefixed connection reads/writes the right table.
fn table_sql(table: &str, connection: &Connection) -> OrmResult<String> {
    Ok(Identifier::parse(table)?.wrap_table(connection.dialect(), connection.prefix()))
}

fn column_sql(column: &str, connection: &Connection) -> OrmResult<String> {
    Ok(Identifier::parse(column)?.wrap(connection.dialect()))
}

/// The outcome of resolving a relation: absent, a single record, or many.
#[derive(Debug, Clone)]
pub enum RelationValue {
    None,
    One(Record),
    Many(Vec<Record>),
}

impl RelationValue {
    pub fn one(&self) -> Option<&Record> {
        match self {
            RelationValue::One(r) => Some(r),
            _ => None,
        }
    }

    pub fn many(&self) -> &[Record] {
        match self {
            RelationValue::Many(v) => v,
            _ => &[],
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, RelationValue::None)
    }

    /// `Record` has no derived `PartialEq` — attribute and relation
    /// comparisons are deliberate, not structural — so relation equality
    /// is hand-rolled here too, recursing into `Record::structurally_eq`.
    pub fn eq_loaded(&self, other: &RelationValue) -> bool {
        match (self, other) {
            (RelationValue::None, RelationValue::None) => true,
            (RelationValue::One(a), RelationValue::One(b)) => a.structurally_eq(b),
            (RelationValue::Many(a), RelationValue::Many(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.structurally_eq(y))
            }
            _ => false,
        }
    }
}

/// A synthetic pivot row for a `belongs_to_many` relation: join-table
/// columns beyond the two foreign keys, surfaced the way Eloquent hangs a
/// `pivot` accessor off the related model rather than inventing a new
/// first-class type for every many-to-many join table.
#[derive(Debug, Clone)]
pub struct Pivot {
    pub table: String,
    pub foreign_pivot_key: String,
    pub related_pivot_key: String,
    pub attributes: AttributeStore,
}

impl Pivot {
    pub fn to_json(&self) -> Json {
        let mut map = serde_json::Map::new();
        for (k, v) in self.attributes.iter() {
            map.insert(k.to_string(), v.clone());
        }
        Json::Object(map)
    }
}

#[derive(Clone)]
pub struct HasDescriptor {
    pub related: Arc<ModelMeta>,
    /// Column on the *related* table pointing back at the parent.
    pub foreign_key: String,
    /// The parent's own key value (usually its primary key).
    pub local_key_value: Option<Json>,
}

#[derive(Clone)]
pub struct BelongsToDescriptor {
    pub related: Arc<ModelMeta>,
    /// Column on the *related* table identified by the parent's foreign key.
    pub owner_key: String,
    /// The value stored in the parent's foreign-key column.
    pub foreign_key_value: Option<Json>,
}

#[derive(Clone)]
pub struct BelongsToManyDescriptor {
    pub related: Arc<ModelMeta>,
    pub pivot_table: String,
    /// Pivot column referencing the parent.
    pub foreign_pivot_key: String,
    /// Pivot column referencing the related model.
    pub related_pivot_key: String,
    /// The parent's own key value (usually its primary key).
    pub parent_key_value: Option<Json>,
    /// Column on the related table the pivot's `related_pivot_key` joins to.
    pub related_key: String,
    /// Extra pivot columns to surface under each related record's `pivot`.
    pub pivot_columns: Vec<String>,
}

/// One relation edge, already bound to the owning record's key value. Built
/// by a model's relation factory (see `Model::relations`), never
/// constructed directly by application code.
#[derive(Clone)]
pub enum Relation {
    HasOne(HasDescriptor),
    HasMany(HasDescriptor),
    BelongsTo(BelongsToDescriptor),
    BelongsToMany(BelongsToManyDescriptor),
}

impl Relation {
    pub fn has_one(
        parent: &Record,
        related: Arc<ModelMeta>,
        foreign_key: impl Into<String>,
        local_key: &str,
    ) -> Relation {
        Relation::HasOne(HasDescriptor {
            related,
            foreign_key: foreign_key.into(),
            local_key_value: parent.attributes.get(local_key).cloned(),
        })
    }

    pub fn has_many(
        parent: &Record,
        related: Arc<ModelMeta>,
        foreign_key: impl Into<String>,
        local_key: &str,
    ) -> Relation {
        Relation::HasMany(HasDescriptor {
            related,
            foreign_key: foreign_key.into(),
            local_key_value: parent.attributes.get(local_key).cloned(),
        })
    }

    pub fn belongs_to(
        parent: &Record,
        related: Arc<ModelMeta>,
        foreign_key: &str,
        owner_key: impl Into<String>,
    ) -> Relation {
        Relation::BelongsTo(BelongsToDescriptor {
            related,
            owner_key: owner_key.into(),
            foreign_key_value: parent.attributes.get(foreign_key).cloned(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn belongs_to_many(
        parent: &Record,
        related: Arc<ModelMeta>,
        pivot_table: impl Into<String>,
        foreign_pivot_key: impl Into<String>,
        related_pivot_key: impl Into<String>,
        parent_key: &str,
        related_key: impl Into<String>,
    ) -> Relation {
        Relation::BelongsToMany(BelongsToManyDescriptor {
            related,
            pivot_table: pivot_table.into(),
            foreign_pivot_key: foreign_pivot_key.into(),
            related_pivot_key: related_pivot_key.into(),
            parent_key_value: parent.attributes.get(parent_key).cloned(),
            related_key: related_key.into(),
            pivot_columns: Vec::new(),
        })
    }

    /// Adds extra pivot columns to surface under `pivot` on each loaded
    /// related record. A no-op on anything but `BelongsToMany`.
    pub fn with_pivot_columns(mut self, columns: Vec<impl Into<String>>) -> Relation {
        if let Relation::BelongsToMany(desc) = &mut self {
            desc.pivot_columns = columns.into_iter().map(Into::into).collect();
        }
        self
    }

    fn related_meta(&self) -> &Arc<ModelMeta> {
        match self {
            Relation::HasOne(d) | Relation::HasMany(d) => &d.related,
            Relation::BelongsTo(d) => &d.related,
            Relation::BelongsToMany(d) => &d.related,
        }
    }

    /// Runs this relation's single-parent query against `connection`.
    pub async fn load(&self, connection: &Connection) -> OrmResult<RelationValue> {
        match self {
            Relation::HasOne(desc) => {
                let tz = connection.timezone();
                let rows = query_has(desc, connection).await?;
                Ok(rows
                    .into_iter()
                    .next()
                    .map(|r| hydrate(desc.related.clone(), r, tz))
                    .map(RelationValue::One)
                    .unwrap_or(RelationValue::None))
            }
            Relation::HasMany(desc) => {
                let tz = connection.timezone();
                let rows = query_has(desc, connection).await?;
                Ok(RelationValue::Many(
                    rows.into_iter().map(|r| hydrate(desc.related.clone(), r, tz)).collect(),
                ))
            }
            Relation::BelongsTo(desc) => match &desc.foreign_key_value {
                None => Ok(RelationValue::None),
                Some(v) if v.is_null() => Ok(RelationValue::None),
                Some(v) => {
                    let table = table_sql(&desc.related.table, connection)?;
                    let col = column_sql(&desc.owner_key, connection)?;
                    let sql = format!("select * from {table} where {col} = ?");
                    let binding = json_to_placeholder(v).ok_or_else(|| {
                        OrmError::validation("belongs-to foreign key cannot be null after the null check")
                    })?;
                    let row = connection.select_one(&sql, &[binding]).await?;
                    Ok(row
                        .map(|r| hydrate(desc.related.clone(), r, connection.timezone()))
                        .map(RelationValue::One)
                        .unwrap_or(RelationValue::None))
                }
            },
            Relation::BelongsToMany(desc) => {
                let Some(key) = desc.parent_key_value.clone() else {
                    return Ok(RelationValue::Many(Vec::new()));
                };
                let mut by_parent = query_belongs_to_many(desc, &[key.clone()], connection).await?;
                Ok(RelationValue::Many(by_parent.remove(&json_key(&key)).unwrap_or_default()))
            }
        }
    }

    /// Batches a homogeneous slice of the same named relation — one
    /// descriptor per parent record — into a single query, then returns
    /// one `RelationValue` per input descriptor in the same order.
    pub async fn load_many(relations: &[Relation], connection: &Connection) -> OrmResult<Vec<RelationValue>> {
        if relations.is_empty() {
            return Ok(Vec::new());
        }
        match &relations[0] {
            Relation::HasOne(_) => load_many_has(relations, connection, false).await,
            Relation::HasMany(_) => load_many_has(relations, connection, true).await,
            Relation::BelongsTo(_) => load_many_belongs_to(relations, connection).await,
            Relation::BelongsToMany(_) => load_many_belongs_to_many(relations, connection).await,
        }
    }
}

fn json_key(v: &Json) -> String {
    match v {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

async fn query_has(desc: &HasDescriptor, connection: &Connection) -> OrmResult<Vec<crate::connection::Row>> {
    let Some(key) = desc.local_key_value.clone() else {
        return Ok(Vec::new());
    };
    if key.is_null() {
        return Ok(Vec::new());
    }
    let table = table_sql(&desc.related.table, connection)?;
    let col = column_sql(&desc.foreign_key, connection)?;
    let sql = format!("select * from {table} where {col} = ?");
    let binding = json_to_placeholder(&key)
        .ok_or_else(|| OrmError::validation("has-one/has-many local key cannot be null after the null check"))?;
    connection.select(&sql, &[binding]).await
}

async fn load_many_has(
    relations: &[Relation],
    connection: &Connection,
    many: bool,
) -> OrmResult<Vec<RelationValue>> {
    let descriptors: Vec<&HasDescriptor> = relations
        .iter()
        .map(|r| match r {
            Relation::HasOne(d) | Relation::HasMany(d) => d,
            _ => unreachable!("load_many_has called with mixed relation kinds"),
        })
        .collect();

    let keys: Vec<Json> = descriptors.iter().filter_map(|d| d.local_key_value.clone()).filter(|v| !v.is_null()).collect();
    if keys.is_empty() {
        return Ok(descriptors
            .iter()
            .map(|_| if many { RelationValue::Many(Vec::new()) } else { RelationValue::None })
            .collect());
    }

    let related = descriptors[0].related.clone();
    let foreign_key = descriptors[0].foreign_key.clone();
    let rows = query_in(&related.table, &foreign_key, &keys, connection).await?;
    let tz = connection.timezone();

    let mut buckets: HashMap<String, Vec<Record>> = HashMap::new();
    for row in rows {
        let attrs = row_to_attributes_tz(&row, tz);
        let bucket_key = attrs.get(&foreign_key).map(json_key).unwrap_or_default();
        buckets
            .entry(bucket_key)
            .or_default()
            .push(Record::hydrated(related.clone(), attrs));
    }

    Ok(descriptors
        .into_iter()
        .map(|d| match &d.local_key_value {
            Some(v) if !v.is_null() => {
                let mut matched = buckets.remove(&json_key(v)).unwrap_or_default();
                if many {
                    RelationValue::Many(matched)
                } else if matched.is_empty() {
                    RelationValue::None
                } else {
                    RelationValue::One(matched.remove(0))
                }
            }
            _ => {
                if many {
                    RelationValue::Many(Vec::new())
                } else {
                    RelationValue::None
                }
            }
        })
        .collect())
}

async fn load_many_belongs_to(relations: &[Relation], connection: &Connection) -> OrmResult<Vec<RelationValue>> {
    let descriptors: Vec<&BelongsToDescriptor> = relations
        .iter()
        .map(|r| match r {
            Relation::BelongsTo(d) => d,
            _ => unreachable!("load_many_belongs_to called with mixed relation kinds"),
        })
        .collect();

    let keys: Vec<Json> =
        descriptors.iter().filter_map(|d| d.foreign_key_value.clone()).filter(|v| !v.is_null()).collect();
    if keys.is_empty() {
        return Ok(descriptors.iter().map(|_| RelationValue::None).collect());
    }

    let related = descriptors[0].related.clone();
    let owner_key = descriptors[0].owner_key.clone();
    let rows = query_in(&related.table, &owner_key, &keys, connection).await?;
    let tz = connection.timezone();

    let mut by_owner: HashMap<String, Record> = HashMap::new();
    for row in rows {
        let attrs = row_to_attributes_tz(&row, tz);
        let key = attrs.get(&owner_key).map(json_key).unwrap_or_default();
        by_owner.insert(key, Record::hydrated(related.clone(), attrs));
    }

    Ok(descriptors
        .into_iter()
        .map(|d| match &d.foreign_key_value {
            Some(v) if !v.is_null() => {
                by_owner.get(&json_key(v)).map(|r| RelationValue::One(clone_record(r))).unwrap_or(RelationValue::None)
            }
            _ => RelationValue::None,
        })
        .collect())
}

async fn query_belongs_to_many(
    desc: &BelongsToManyDescriptor,
    keys: &[Json],
    connection: &Connection,
) -> OrmResult<HashMap<String, Vec<Record>>> {
    let mut buckets: HashMap<String, Vec<Record>> = HashMap::new();
    if keys.is_empty() {
        return Ok(buckets);
    }

    let related_table = table_sql(&desc.related.table, connection)?;
    let pivot_table = table_sql(&desc.pivot_table, connection)?;
    let foreign_pivot_key = column_sql(&desc.foreign_pivot_key, connection)?;
    let related_pivot_key = column_sql(&desc.related_pivot_key, connection)?;
    let related_key = column_sql(&desc.related_key, connection)?;

    let mut pivot_select = vec![format!("{pivot_table}.{foreign_pivot_key} as __pivot_parent_key")];
    for col in &desc.pivot_columns {
        let wrapped = column_sql(col, connection)?;
        pivot_select.push(format!("{pivot_table}.{wrapped} as __pivot_{col}"));
    }
    let sql = format!(
        "select {related_table}.*, {} from {related_table} join {pivot_table} on {pivot_table}.{related_pivot_key} = {related_table}.{related_key} where {pivot_table}.{foreign_pivot_key} in ({})",
        pivot_select.join(", "),
        placeholders(keys.len()),
    );
    let bindings: Vec<crate::value::Value> =
        keys.iter().filter_map(json_to_placeholder).collect();
    let rows = connection.select(&sql, &bindings).await?;
    let tz = connection.timezone();

    for row in rows {
        let mut attrs = row_to_attributes_tz(&row, tz);
        let parent_key = attrs.remove("__pivot_parent_key").map(|v| json_key(&v)).unwrap_or_default();
        let mut pivot_attrs = AttributeStore::new();
        for col in &desc.pivot_columns {
            if let Some(v) = attrs.remove(&format!("__pivot_{col}")) {
                pivot_attrs.set(col.clone(), v);
            }
        }
        let pivot = Pivot {
            table: desc.pivot_table.clone(),
            foreign_pivot_key: desc.foreign_pivot_key.clone(),
            related_pivot_key: desc.related_pivot_key.clone(),
            attributes: pivot_attrs,
        };
        attrs.set("pivot", pivot.to_json());
        let record = Record::hydrated(desc.related.clone(), attrs);
        buckets.entry(parent_key).or_default().push(record);
    }

    Ok(buckets)
}

async fn load_many_belongs_to_many(relations: &[Relation], connection: &Connection) -> OrmResult<Vec<RelationValue>> {
    let descriptors: Vec<&BelongsToManyDescriptor> = relations
        .iter()
        .map(|r| match r {
            Relation::BelongsToMany(d) => d,
            _ => unreachable!("load_many_belongs_to_many called with mixed relation kinds"),
        })
        .collect();

    let keys: Vec<Json> =
        descriptors.iter().filter_map(|d| d.parent_key_value.clone()).filter(|v| !v.is_null()).collect();
    if keys.is_empty() {
        return Ok(descriptors.iter().map(|_| RelationValue::Many(Vec::new())).collect());
    }

    let mut buckets = query_belongs_to_many(descriptors[0], &keys, connection).await?;

    Ok(descriptors
        .into_iter()
        .map(|d| match &d.parent_key_value {
            Some(v) if !v.is_null() => RelationValue::Many(buckets.remove(&json_key(v)).unwrap_or_default()),
            _ => RelationValue::Many(Vec::new()),
        })
        .collect())
}

async fn query_in(
    table: &str,
    column: &str,
    keys: &[Json],
    connection: &Connection,
) -> OrmResult<Vec<crate::connection::Row>> {
    let wrapped_table = table_sql(table, connection)?;
    let wrapped_column = column_sql(column, connection)?;
    let sql = format!("select * from {wrapped_table} where {wrapped_column} in ({})", placeholders(keys.len()));
    let bindings: Vec<crate::value::Value> = keys.iter().filter_map(json_to_placeholder).collect();
    connection.select(&sql, &bindings).await
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn hydrate(meta: Arc<ModelMeta>, row: crate::connection::Row, tz: Option<&str>) -> Record {
    Record::hydrated(meta, row_to_attributes_tz(&row, tz))
}

/// Deep-ish clone of a hydrated record for fan-out to multiple parents
/// (a `belongs_to` target can be shared by many owners). Loaded relations
/// are not copied — only the attribute/identity state a fresh fetch would
/// have produced.
fn clone_record(record: &Record) -> Record {
    let mut copy = Record::hydrated(record.meta.clone(), record.attributes.clone());
    copy.connection_name = record.connection_name.clone();
    copy
}

/// Decodes a driver row into an attribute bag without knowing its schema
/// ahead of time, the way the active-record layer needs to for relation
/// hydration (there is no generated `FromRow` impl for an arbitrary related
/// table). Falls back to a string decode for any type not recognized
/// explicitly. `tz` is the connection's configured display zone (§4.4):
/// a `timestamptz` value is normalized into it before the caller ever sees
/// it, so downstream code never has to think about the server's session
/// zone.
fn row_to_attributes_tz(row: &crate::connection::Row, tz: Option<&str>) -> AttributeStore {
    use tokio_postgres::types::Type;

    let mut store = AttributeStore::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = match *column.type_() {
            Type::BOOL => decode::<bool>(row, i).map(Json::Bool),
            Type::INT2 => decode::<i16>(row, i).map(Json::from),
            Type::INT4 => decode::<i32>(row, i).map(Json::from),
            Type::INT8 => decode::<i64>(row, i).map(Json::from),
            Type::FLOAT4 => decode::<f32>(row, i).map(|v| Json::from(v as f64)),
            Type::FLOAT8 => decode::<f64>(row, i).map(Json::from),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => decode::<String>(row, i).map(Json::String),
            Type::UUID => decode::<uuid::Uuid>(row, i).map(|v| Json::String(v.to_string())),
            Type::JSON | Type::JSONB => decode::<Json>(row, i),
            Type::TIMESTAMP => decode::<chrono::NaiveDateTime>(row, i).map(|v| Json::String(v.and_utc().to_rfc3339())),
            Type::TIMESTAMPTZ => {
                decode::<chrono::DateTime<chrono::Utc>>(row, i).map(|v| Json::String(normalize_to_zone(v, tz)))
            }
            Type::DATE => decode::<chrono::NaiveDate>(row, i).map(|v| Json::String(v.to_string())),
            _ => decode::<String>(row, i).map(Json::String),
        }
        .unwrap_or(Json::Null);
        store.set(column.name().to_string(), value);
    }
    store
}

/// Rewrites a UTC instant into the connection's configured display zone.
/// Only fixed-offset specs (`+02:00`, `-05:30`) and the `UTC` tag are
/// understood — named IANA zones need a tz-database dependency this crate
/// doesn't carry, so they pass through as UTC rather than silently guessing.
fn normalize_to_zone(v: chrono::DateTime<chrono::Utc>, tz: Option<&str>) -> String {
    let Some(spec) = tz else { return v.to_rfc3339() };
    if spec.eq_ignore_ascii_case("utc") {
        return v.to_rfc3339();
    }
    match parse_fixed_offset(spec) {
        Some(offset) => v.with_timezone(&offset).to_rfc3339(),
        None => v.to_rfc3339(),
    }
}

/// Parses a `+HH:MM` / `-HH:MM` (or `+HHMM`) fixed-offset spec.
fn parse_fixed_offset(spec: &str) -> Option<chrono::FixedOffset> {
    let (sign, rest) = match spec.as_bytes().first()? {
        b'+' => (1, &spec[1..]),
        b'-' => (-1, &spec[1..]),
        _ => return None,
    };
    let rest = rest.replace(':', "");
    if rest.len() != 4 || !rest.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = rest[0..2].parse().ok()?;
    let minutes: i32 = rest[2..4].parse().ok()?;
    let seconds = sign * (hours * 3600 + minutes * 60);
    chrono::FixedOffset::east_opt(seconds)
}

fn decode<'a, T>(row: &'a crate::connection::Row, i: usize) -> Option<T>
where
    T: tokio_postgres::types::FromSql<'a>,
{
    row.try_get::<_, Option<T>>(i).ok().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelMeta;

    fn meta(table: &str) -> Arc<ModelMeta> {
        Arc::new(ModelMeta::new(table))
    }

    #[test]
    fn has_many_descriptor_captures_parents_local_key() {
        let parent_meta = meta("users");
        let mut parent = Record::new(parent_meta);
        parent.attributes.set("id", Json::from(7));
        let related = meta("posts");
        let relation = Relation::has_many(&parent, related, "user_id", "id");
        match relation {
            Relation::HasMany(d) => assert_eq!(d.local_key_value, Some(Json::from(7))),
            _ => panic!("expected HasMany"),
        }
    }

    #[test]
    fn belongs_to_descriptor_is_none_when_foreign_key_missing() {
        let parent_meta = meta("posts");
        let parent = Record::new(parent_meta);
        let related = meta("users");
        let relation = Relation::belongs_to(&parent, related, "user_id", "id");
        match relation {
            Relation::BelongsTo(d) => assert!(d.foreign_key_value.is_none()),
            _ => panic!("expected BelongsTo"),
        }
    }

    #[test]
    fn relation_value_eq_loaded_compares_structurally() {
        let t = meta("users");
        let mut a = Record::new(t.clone());
        a.attributes.set("id", Json::from(1));
        let mut b = Record::new(t);
        b.attributes.set("id", Json::from(1));
        assert!(RelationValue::One(a).eq_loaded(&RelationValue::One(b)));
        assert!(RelationValue::None.eq_loaded(&RelationValue::None));
        assert!(!RelationValue::None.eq_loaded(&RelationValue::Many(Vec::new())));
    }

    #[test]
    fn placeholders_joins_question_marks() {
        assert_eq!(placeholders(3), "?, ?, ?");
        assert_eq!(placeholders(0), "");
    }
}
