use async_trait::async_trait;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

use super::document::{from_document, id_value, same, text, to_document};
use crate::base::timestamp_now;
use super::{Plan, Storage, StorageError};
use crate::context::RequestContext;
use crate::query::QueryTransformation;
use crate::registry::{ModelInfo, Registry, Relation, RelationKind};
use crate::traits::{Identity, Model};

type Row = Map<String, Value>;

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, Vec<Row>>,
    /// Join table name -> (parent id, child id) links.
    joins: HashMap<String, Vec<(Value, Value)>>,
}

/// Registry-driven in-process store.
///
/// Rows are JSON objects holding the stored columns of each model. The lock is
/// only taken inside synchronous helpers, never across an `.await`.
#[derive(Clone)]
pub struct MemoryStorage {
    registry: Arc<Registry>,
    state: Arc<RwLock<State>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            state: Arc::default(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Inserts `record` directly, with the same rules as [`Storage::create`].
    ///
    /// # Errors
    ///
    /// Fails when the model is unknown or the record collides with a stored one.
    pub fn seed<T: Model>(&self, record: T) -> Result<T, StorageError> {
        let info = self.info::<T>()?;
        let document = to_document(&record)?;
        let row = self.write(|state| {
            insert(state, info, &document, record.identity().1.is_unset(), &[])
        })?;
        Ok(from_document(info.materialize(&row, &[]))?)
    }

    fn info<T: Model>(&self) -> Result<&ModelInfo, StorageError> {
        self.model(T::TYPE_NAME)
    }

    fn model(&self, type_name: &str) -> Result<&ModelInfo, StorageError> {
        self.registry
            .model(type_name)
            .ok_or_else(|| StorageError::UnknownModel(type_name.to_string()))
    }

    fn read<R>(&self, f: impl FnOnce(&State) -> R) -> R {
        let guard = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Filters, orders and pages `rows`, then materializes them with their preloads.
    fn load(
        &self,
        state: &State,
        info: &ModelInfo,
        rows: Vec<&Row>,
        plan: &Plan,
    ) -> Result<Vec<Row>, StorageError> {
        plan.check(info)?;

        let mut rows: Vec<&Row> = rows
            .into_iter()
            .filter(|row| matches(info, row, plan))
            .collect();
        // Stable sorts, last key first, give lexicographic ordering.
        for (field, descending) in plan.order.iter().rev() {
            rows.sort_by(|a, b| {
                let ordering = compare(a.get(field), b.get(field));
                if *descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }

        let offset = usize::try_from(plan.offset).unwrap_or(usize::MAX);
        let limit = plan
            .limit
            .map_or(usize::MAX, |limit| usize::try_from(limit).unwrap_or(usize::MAX));
        let page: Vec<&Row> = rows.into_iter().skip(offset).take(limit).collect();

        let mut documents: Vec<Row> = page
            .iter()
            .map(|row| info.materialize(row, &plan.omit))
            .collect();

        for preload in &plan.preloads {
            let relation = info
                .relation(&preload.field)
                .ok_or_else(|| unknown_relation(info, &preload.field))?;
            let target = self.model(relation.target)?;
            let scope = Plan::new(&preload.scope);
            for (row, document) in page.iter().zip(documents.iter_mut()) {
                let related = related_rows(state, info, relation, target, row);
                let loaded = self.load(state, target, related, &scope)?;
                document.insert(preload.field.clone(), shape(relation, loaded));
            }
        }

        Ok(documents)
    }
}

fn unknown_relation(info: &ModelInfo, field: &str) -> StorageError {
    StorageError::UnknownRelation {
        model: info.type_name.to_string(),
        field: field.to_string(),
    }
}

fn relation_to<'a, C: Model>(info: &'a ModelInfo, field: &str) -> Result<&'a Relation, StorageError> {
    info.relation(field)
        .filter(|relation| relation.target == C::TYPE_NAME)
        .ok_or_else(|| unknown_relation(info, field))
}

fn id_of(info: &ModelInfo, row: &Row) -> Value {
    row.get(info.identity_field).cloned().unwrap_or(Value::Null)
}

fn table_rows<'a>(state: &'a State, info: &ModelInfo) -> Vec<&'a Row> {
    state
        .tables
        .get(info.table)
        .map(|table| table.iter().collect())
        .unwrap_or_default()
}

fn position(table: &[Row], info: &ModelInfo, id: &Value) -> Option<usize> {
    table
        .iter()
        .position(|row| row.get(info.identity_field).is_some_and(|value| same(value, id)))
}

/// Equality filters compare after typing the raw value like the column, so
/// `filters[active]=1` matches a stored `true`.
fn matches(info: &ModelInfo, row: &Row, plan: &Plan) -> bool {
    let field_text = |field: &str| row.get(field).map(text).unwrap_or_default();
    plan.filters
        .iter()
        .all(|(field, raw)| {
            let stored = field_text(field.as_str());
            stored == *raw || stored == text(&info.coerce(field, raw))
        })
        && plan
            .ranges
            .iter()
            .all(|(from, to)| in_range(&field_text(info.range_field.as_str()), from, to))
}

/// `[from, to)`, numeric when all three parse as numbers.
fn in_range(value: &str, from: &str, to: &str) -> bool {
    match (value.parse::<f64>(), from.parse::<f64>(), to.parse::<f64>()) {
        (Ok(value), Ok(from), Ok(to)) => from <= value && value < to,
        _ => from <= value && value < to,
    }
}

fn compare(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    match (left, right) {
        (Some(Value::Number(left)), Some(Value::Number(right))) => left
            .as_f64()
            .partial_cmp(&right.as_f64())
            .unwrap_or(Ordering::Equal),
        _ => {
            let left = left.map(text).unwrap_or_default();
            let right = right.map(text).unwrap_or_default();
            left.cmp(&right)
        }
    }
}

fn shape(relation: &Relation, loaded: Vec<Row>) -> Value {
    if relation.is_collection() {
        Value::Array(loaded.into_iter().map(Value::Object).collect())
    } else {
        loaded.into_iter().next().map_or(Value::Null, Value::Object)
    }
}

fn related_rows<'a>(
    state: &'a State,
    info: &ModelInfo,
    relation: &Relation,
    target: &ModelInfo,
    parent: &Row,
) -> Vec<&'a Row> {
    let candidates = table_rows(state, target);
    let parent_id = id_of(info, parent);
    match &relation.kind {
        RelationKind::HasOne { foreign_key } | RelationKind::HasMany { foreign_key } => candidates
            .into_iter()
            .filter(|row| row.get(foreign_key).is_some_and(|value| same(value, &parent_id)))
            .collect(),
        RelationKind::BelongsTo { foreign_key } => {
            let child_id = parent.get(foreign_key).cloned().unwrap_or(Value::Null);
            candidates
                .into_iter()
                .filter(|row| same(&id_of(target, row), &child_id))
                .collect()
        }
        RelationKind::ManyToMany { join_table, .. } => {
            let linked: Vec<&Value> = state
                .joins
                .get(join_table)
                .into_iter()
                .flatten()
                .filter(|(parent, _)| same(parent, &parent_id))
                .map(|(_, child)| child)
                .collect();
            candidates
                .into_iter()
                .filter(|row| {
                    let id = id_of(target, row);
                    linked.iter().any(|child| same(child, &id))
                })
                .collect()
        }
    }
}

fn check_unique(
    info: &ModelInfo,
    table: &[Row],
    row: &Row,
    skip: Option<usize>,
) -> Result<(), StorageError> {
    for field in &info.unique_fields {
        let Some(value) = row.get(field).filter(|value| !value.is_null()) else {
            continue;
        };
        let taken = table.iter().enumerate().any(|(index, other)| {
            Some(index) != skip && other.get(field).is_some_and(|other| same(other, value))
        });
        if taken {
            return Err(StorageError::UniqueViolation {
                field: field.clone(),
            });
        }
    }
    Ok(())
}

fn insert(
    state: &mut State,
    info: &ModelInfo,
    document: &Row,
    unset: bool,
    omit: &[String],
) -> Result<Row, StorageError> {
    let mut row = info.to_row(document);
    for field in omit {
        if info.is_column(field) && field != info.identity_field {
            row.insert(field.clone(), info.default_value(field));
        }
    }
    info.stamp(&mut row, &timestamp_now(), true, omit);

    let table = state.tables.entry(info.table.to_string()).or_default();
    if unset {
        let id = if info.has_numeric_identity() {
            let max = table
                .iter()
                .filter_map(|row| row.get(info.identity_field).and_then(Value::as_i64))
                .max()
                .unwrap_or(0);
            Value::from(max + 1)
        } else {
            Value::String(Uuid::new_v4().to_string())
        };
        row.insert(info.identity_field.to_string(), id);
    } else if position(table, info, &id_of(info, &row)).is_some() {
        return Err(StorageError::AlreadyExists);
    }

    check_unique(info, table, &row, None)?;
    table.push(row.clone());
    Ok(row)
}

fn save_row(
    state: &mut State,
    info: &ModelInfo,
    document: &Row,
    plan: &Plan,
) -> Result<Row, StorageError> {
    plan.check(info)?;
    let id = id_of(info, document);
    let table = state.tables.entry(info.table.to_string()).or_default();
    let index = table
        .iter()
        .position(|row| same(&id_of(info, row), &id) && matches(info, row, plan))
        .ok_or(StorageError::NotFound)?;

    let mut updated = table[index].clone();
    for column in info.columns() {
        if column == info.identity_field || plan.omit.iter().any(|field| field == column) {
            continue;
        }
        let value = document
            .get(column)
            .cloned()
            .unwrap_or_else(|| info.default_value(column));
        updated.insert(column.to_string(), value);
    }
    info.stamp(&mut updated, &timestamp_now(), false, &plan.omit);

    check_unique(info, table, &updated, Some(index))?;
    table[index] = updated.clone();
    Ok(updated)
}

fn upsert(state: &mut State, info: &ModelInfo, document: &Row, unset: bool) -> Result<Row, StorageError> {
    if !unset {
        let exists = state
            .tables
            .get(info.table)
            .is_some_and(|table| position(table, info, &id_of(info, document)).is_some());
        if exists {
            return save_row(state, info, document, &Plan::default());
        }
    }
    insert(state, info, document, unset, &[])
}

/// Resets `column` to its default on the rows of `info` selected by `select`.
fn reset_column(
    state: &mut State,
    info: &ModelInfo,
    column: &str,
    select: impl Fn(&Row) -> bool,
) -> usize {
    let default = info.default_value(column);
    let mut changed = 0;
    if let Some(table) = state.tables.get_mut(info.table) {
        for row in table.iter_mut().filter(|row| select(row)) {
            row.insert(column.to_string(), default.clone());
            changed += 1;
        }
    }
    changed
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn find_many<T: Model>(
        &self,
        ctx: &RequestContext,
        query: &[QueryTransformation],
    ) -> Result<Vec<T>, StorageError> {
        let info = self.info::<T>()?;
        tracing::trace!(request_id = %ctx.request_id, table = info.table, "memory find_many");
        let plan = Plan::new(query);
        let documents = self.read(|state| self.load(state, info, table_rows(state, info), &plan))?;
        documents
            .into_iter()
            .map(|document| from_document(document).map_err(StorageError::from))
            .collect()
    }

    async fn find_by_id<T: Model>(
        &self,
        ctx: &RequestContext,
        id: &T::Id,
        query: &[QueryTransformation],
    ) -> Result<T, StorageError> {
        let info = self.info::<T>()?;
        tracing::trace!(request_id = %ctx.request_id, table = info.table, %id, "memory find_by_id");
        let id = serde_json::to_value(id)?;
        let plan = Plan::new(query);
        let documents = self.read(|state| {
            let rows = table_rows(state, info)
                .into_iter()
                .filter(|row| same(&id_of(info, row), &id))
                .collect();
            self.load(state, info, rows, &plan)
        })?;
        let document = documents.into_iter().next().ok_or(StorageError::NotFound)?;
        Ok(from_document(document)?)
    }

    async fn count<T: Model>(
        &self,
        ctx: &RequestContext,
        query: &[QueryTransformation],
    ) -> Result<u64, StorageError> {
        let info = self.info::<T>()?;
        tracing::trace!(request_id = %ctx.request_id, table = info.table, "memory count");
        let plan = Plan::new(query);
        plan.check(info)?;
        let count = self.read(|state| {
            table_rows(state, info)
                .into_iter()
                .filter(|row| matches(info, row, &plan))
                .count()
        });
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    async fn count_association<P: Model>(
        &self,
        ctx: &RequestContext,
        parent: &P,
        field: &str,
        query: &[QueryTransformation],
    ) -> Result<u64, StorageError> {
        let info = self.info::<P>()?;
        tracing::trace!(request_id = %ctx.request_id, table = info.table, field, "memory count_association");
        let relation = info
            .relation(field)
            .ok_or_else(|| unknown_relation(info, field))?;
        let target = self.model(relation.target)?;
        let plan = Plan::new(query);
        plan.check(target)?;
        let parent_id = id_value(parent)?;

        let count = self.read(|state| -> Result<usize, StorageError> {
            let parent_row = table_rows(state, info)
                .into_iter()
                .find(|row| same(&id_of(info, row), &parent_id))
                .ok_or(StorageError::NotFound)?;
            Ok(related_rows(state, info, relation, target, parent_row)
                .into_iter()
                .filter(|row| matches(target, row, &plan))
                .count())
        })?;
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    async fn create<T: Model>(
        &self,
        ctx: &RequestContext,
        record: T,
        query: &[QueryTransformation],
    ) -> Result<T, StorageError> {
        let info = self.info::<T>()?;
        tracing::trace!(request_id = %ctx.request_id, table = info.table, "memory create");
        let plan = Plan::new(query);
        let document = to_document(&record)?;
        let unset = record.identity().1.is_unset();
        let row = self.write(|state| insert(state, info, &document, unset, &plan.omit))?;
        Ok(from_document(info.materialize(&row, &[]))?)
    }

    async fn save<T: Model>(
        &self,
        ctx: &RequestContext,
        record: T,
        query: &[QueryTransformation],
    ) -> Result<T, StorageError> {
        let info = self.info::<T>()?;
        tracing::trace!(request_id = %ctx.request_id, table = info.table, "memory save");
        let plan = Plan::new(query);
        let document = to_document(&record)?;
        let row = self.write(|state| save_row(state, info, &document, &plan))?;
        Ok(from_document(info.materialize(&row, &[]))?)
    }

    async fn delete<T: Model>(
        &self,
        ctx: &RequestContext,
        record: &T,
        query: &[QueryTransformation],
    ) -> Result<(), StorageError> {
        let info = self.info::<T>()?;
        tracing::trace!(request_id = %ctx.request_id, table = info.table, "memory delete");
        let plan = Plan::new(query);
        plan.check(info)?;
        let id = id_value(record)?;

        self.write(|state| -> Result<(), StorageError> {
            let table = state.tables.entry(info.table.to_string()).or_default();
            let index = table
                .iter()
                .position(|row| same(&id_of(info, row), &id) && matches(info, row, &plan))
                .ok_or(StorageError::NotFound)?;
            table.remove(index);

            // Links on either side of a join table, including self relations.
            for (owner, relation) in self.registry.many_to_many() {
                let RelationKind::ManyToMany { join_table, .. } = &relation.kind else {
                    continue;
                };
                let as_parent = owner.type_name == info.type_name;
                let as_child = relation.target == info.type_name;
                if let Some(links) = state.joins.get_mut(join_table) {
                    links.retain(|(parent, child)| {
                        !(as_parent && same(parent, &id)) && !(as_child && same(child, &id))
                    });
                }
            }
            Ok(())
        })
    }

    async fn append_association<P: Model, C: Model>(
        &self,
        ctx: &RequestContext,
        parent: &P,
        field: &str,
        child: C,
    ) -> Result<C, StorageError> {
        let info = self.info::<P>()?;
        tracing::trace!(request_id = %ctx.request_id, table = info.table, field, "memory append_association");
        let relation = relation_to::<C>(info, field)?;
        let target = self.info::<C>()?;
        let parent_id = id_value(parent)?;
        let mut document = to_document(&child)?;
        let unset = child.identity().1.is_unset();

        let row = self.write(|state| -> Result<Row, StorageError> {
            let parent_index = state
                .tables
                .get(info.table)
                .and_then(|table| position(table, info, &parent_id))
                .ok_or(StorageError::NotFound)?;

            match &relation.kind {
                RelationKind::HasOne { foreign_key } | RelationKind::HasMany { foreign_key } => {
                    document.insert(foreign_key.clone(), parent_id.clone());
                    let row = upsert(state, target, &document, unset)?;
                    if matches!(relation.kind, RelationKind::HasOne { .. }) {
                        let child_id = id_of(target, &row);
                        reset_column(state, target, foreign_key, |other| {
                            other.get(foreign_key).is_some_and(|value| same(value, &parent_id))
                                && !same(&id_of(target, other), &child_id)
                        });
                    }
                    Ok(row)
                }
                RelationKind::BelongsTo { foreign_key } => {
                    let row = upsert(state, target, &document, unset)?;
                    if let Some(parent_row) = state
                        .tables
                        .get_mut(info.table)
                        .and_then(|table| table.get_mut(parent_index))
                    {
                        parent_row.insert(foreign_key.clone(), id_of(target, &row));
                    }
                    Ok(row)
                }
                RelationKind::ManyToMany { join_table, .. } => {
                    let row = upsert(state, target, &document, unset)?;
                    let child_id = id_of(target, &row);
                    let links = state.joins.entry(join_table.clone()).or_default();
                    if !links
                        .iter()
                        .any(|(parent, child)| same(parent, &parent_id) && same(child, &child_id))
                    {
                        links.push((parent_id.clone(), child_id));
                    }
                    Ok(row)
                }
            }
        })?;

        Ok(from_document(target.materialize(&row, &[]))?)
    }

    async fn delete_association<P: Model, C: Model>(
        &self,
        ctx: &RequestContext,
        parent: &P,
        field: &str,
        child: &C,
    ) -> Result<(), StorageError> {
        let info = self.info::<P>()?;
        tracing::trace!(request_id = %ctx.request_id, table = info.table, field, "memory delete_association");
        let relation = relation_to::<C>(info, field)?;
        let target = self.info::<C>()?;
        let parent_id = id_value(parent)?;
        let child_id = id_value(child)?;

        let removed = self.write(|state| match &relation.kind {
            RelationKind::HasOne { foreign_key } | RelationKind::HasMany { foreign_key } => {
                reset_column(state, target, foreign_key, |row| {
                    same(&id_of(target, row), &child_id)
                        && row.get(foreign_key).is_some_and(|value| same(value, &parent_id))
                })
            }
            RelationKind::BelongsTo { foreign_key } => reset_column(state, info, foreign_key, |row| {
                same(&id_of(info, row), &parent_id)
                    && row.get(foreign_key).is_some_and(|value| same(value, &child_id))
            }),
            RelationKind::ManyToMany { join_table, .. } => {
                state.joins.get_mut(join_table).map_or(0, |links| {
                    let before = links.len();
                    links.retain(|(parent, child)| !(same(parent, &parent_id) && same(child, &child_id)));
                    before - links.len()
                })
            }
        });

        if removed == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}
