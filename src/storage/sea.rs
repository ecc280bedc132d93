use async_trait::async_trait;
use sea_orm::sea_query::{
    Alias, Asterisk, Condition, Expr, Func, OnConflict, Order, Query, SelectStatement, SimpleExpr,
};
use sea_orm::{
    ConnectionTrait, DatabaseConnection, FromQueryResult, TransactionTrait, Value as SqlValue,
};
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

use super::document::{from_document, id_value, to_document};
use crate::base::timestamp_now;
use super::{Plan, Storage, StorageError};
use crate::context::RequestContext;
use crate::query::QueryTransformation;
use crate::registry::{ModelInfo, Registry, Relation, RelationKind};
use crate::traits::{Identity, Model};

type Row = Map<String, Value>;
type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// `LIMIT` used when only an offset is requested.
const UNBOUNDED: u64 = 9_223_372_036_854_775_807;

/// SQL storage over a sea-orm connection.
///
/// Statements are built with sea-query from the registry, so every identifier
/// is quoted and every value bound. Rows are read back as JSON objects.
#[derive(Clone)]
pub struct SeaOrmStorage {
    db: DatabaseConnection,
    registry: Arc<Registry>,
}

impl SeaOrmStorage {
    #[must_use]
    pub fn new(db: DatabaseConnection, registry: Arc<Registry>) -> Self {
        Self { db, registry }
    }

    #[must_use]
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    fn info<T: Model>(&self) -> Result<&ModelInfo, StorageError> {
        self.model(T::TYPE_NAME)
    }

    fn model(&self, type_name: &str) -> Result<&ModelInfo, StorageError> {
        self.registry
            .model(type_name)
            .ok_or_else(|| StorageError::UnknownModel(type_name.to_string()))
    }

    /// Selects rows of `info` matching `base` and the plan, then loads preloads
    /// with one query per parent row.
    fn fetch<'a>(
        &'a self,
        info: &'a ModelInfo,
        base: Condition,
        plan: &'a Plan,
    ) -> BoxFuture<'a, Result<Vec<Row>, StorageError>> {
        Box::pin(async move {
            plan.check(info)?;

            let mut select = select_columns(info, &plan.omit);
            select.cond_where(base.add(conditions(info, plan)));
            for (field, descending) in &plan.order {
                let order = if *descending { Order::Desc } else { Order::Asc };
                select.order_by(Alias::new(field), order);
            }
            paginate(&mut select, plan);

            let rows = query_rows(&self.db, &select).await?;
            let mut documents: Vec<Row> = rows
                .iter()
                .map(|row| info.materialize(row, &plan.omit))
                .collect();

            for preload in &plan.preloads {
                let relation = info
                    .relation(&preload.field)
                    .ok_or_else(|| unknown_relation(info, &preload.field))?;
                let target = self.model(relation.target)?;
                let scope = Plan::new(&preload.scope);
                for (row, document) in rows.iter().zip(documents.iter_mut()) {
                    let loaded = match related_condition(info, relation, target, row) {
                        Some(condition) => self.fetch(target, condition, &scope).await?,
                        None => Vec::new(),
                    };
                    document.insert(preload.field.clone(), shape(relation, loaded));
                }
            }

            Ok(documents)
        })
    }

    async fn reload<T: Model>(&self, info: &ModelInfo, id: &Value) -> Result<T, StorageError> {
        let document = self
            .fetch(info, id_condition(info, id), &Plan::default())
            .await?
            .into_iter()
            .next()
            .ok_or(StorageError::NotFound)?;
        Ok(from_document(document)?)
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

fn shape(relation: &Relation, loaded: Vec<Row>) -> Value {
    if relation.is_collection() {
        Value::Array(loaded.into_iter().map(Value::Object).collect())
    } else {
        loaded.into_iter().next().map_or(Value::Null, Value::Object)
    }
}

/// Binds a JSON value. Arrays and objects are stored as JSON text.
fn sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::String(None),
        Value::Bool(flag) => SqlValue::from(*flag),
        Value::Number(number) => number
            .as_i64()
            .map(SqlValue::from)
            .or_else(|| number.as_u64().map(SqlValue::from))
            .unwrap_or_else(|| SqlValue::from(number.as_f64().unwrap_or_default())),
        Value::String(text) => SqlValue::from(text.clone()),
        other => SqlValue::from(other.to_string()),
    }
}

fn column_eq(column: &str, value: &Value) -> SimpleExpr {
    Expr::col(Alias::new(column)).eq(sql_value(value))
}

fn id_condition(info: &ModelInfo, id: &Value) -> Condition {
    Condition::all().add(column_eq(info.identity_field, id))
}

fn select_columns(info: &ModelInfo, omit: &[String]) -> SelectStatement {
    let mut select = Query::select();
    select.from(Alias::new(info.table));
    for column in info.columns() {
        if column == info.identity_field || !omit.iter().any(|field| field == column) {
            select.column(Alias::new(column));
        }
    }
    select
}

fn conditions(info: &ModelInfo, plan: &Plan) -> Condition {
    let mut condition = Condition::all();
    for (field, value) in &plan.filters {
        condition = condition.add(column_eq(field, &info.coerce(field, value)));
    }
    let range = info.range_field.as_str();
    for (from, to) in &plan.ranges {
        condition = condition
            .add(Expr::col(Alias::new(range)).gte(sql_value(&info.coerce(range, from))))
            .add(Expr::col(Alias::new(range)).lt(sql_value(&info.coerce(range, to))));
    }
    condition
}

fn paginate(select: &mut SelectStatement, plan: &Plan) {
    match (plan.limit, plan.offset) {
        (Some(limit), offset) => {
            select.limit(limit);
            if offset > 0 {
                select.offset(offset);
            }
        }
        (None, 0) => {}
        (None, offset) => {
            select.limit(UNBOUNDED).offset(offset);
        }
    }
}

/// Condition selecting the `target` rows related to `parent`, or `None` when
/// the parent links to nothing.
fn related_condition(
    info: &ModelInfo,
    relation: &Relation,
    target: &ModelInfo,
    parent: &Row,
) -> Option<Condition> {
    let parent_id = parent.get(info.identity_field).filter(|id| !id.is_null())?;
    let condition = match &relation.kind {
        RelationKind::HasOne { foreign_key } | RelationKind::HasMany { foreign_key } => {
            Condition::all().add(column_eq(foreign_key, parent_id))
        }
        RelationKind::BelongsTo { foreign_key } => {
            let child_id = parent.get(foreign_key).filter(|id| !id.is_null())?;
            Condition::all().add(column_eq(target.identity_field, child_id))
        }
        RelationKind::ManyToMany {
            join_table,
            parent_key,
            child_key,
        } => {
            let mut links = Query::select();
            links
                .column(Alias::new(child_key))
                .from(Alias::new(join_table))
                .and_where(column_eq(parent_key, parent_id));
            Condition::all().add(Expr::col(Alias::new(target.identity_field)).in_subquery(links))
        }
    };
    Some(condition)
}

async fn query_rows<C: ConnectionTrait>(
    conn: &C,
    select: &SelectStatement,
) -> Result<Vec<Row>, StorageError> {
    let statement = conn.get_database_backend().build(select);
    let rows = Value::find_by_statement(statement).all(conn).await?;
    Ok(rows
        .into_iter()
        .filter_map(|row| match row {
            Value::Object(row) => Some(row),
            _ => None,
        })
        .collect())
}

async fn count_rows<C: ConnectionTrait>(
    conn: &C,
    table: &str,
    condition: Condition,
) -> Result<u64, StorageError> {
    let mut select = Query::select();
    select
        .expr_as(Func::count(Expr::col(Asterisk)), Alias::new("total"))
        .from(Alias::new(table))
        .cond_where(condition);
    let statement = conn.get_database_backend().build(&select);
    let total = match conn.query_one(statement).await? {
        Some(row) => row.try_get::<i64>("", "total")?,
        None => 0,
    };
    Ok(u64::try_from(total).unwrap_or(0))
}

async fn fetch_row<C: ConnectionTrait>(
    conn: &C,
    info: &ModelInfo,
    id: &Value,
) -> Result<Option<Row>, StorageError> {
    let mut select = select_columns(info, &[]);
    select.cond_where(id_condition(info, id));
    Ok(query_rows(conn, &select).await?.into_iter().next())
}

async fn check_unique<C: ConnectionTrait>(
    conn: &C,
    info: &ModelInfo,
    row: &Row,
    exclude: Option<&Value>,
) -> Result<(), StorageError> {
    for field in &info.unique_fields {
        let Some(value) = row.get(field).filter(|value| !value.is_null()) else {
            continue;
        };
        let mut condition = Condition::all().add(column_eq(field, value));
        if let Some(id) = exclude {
            condition = condition.add(Expr::col(Alias::new(info.identity_field)).ne(sql_value(id)));
        }
        if count_rows(conn, info.table, condition).await? > 0 {
            return Err(StorageError::UniqueViolation {
                field: field.clone(),
            });
        }
    }
    Ok(())
}

/// Inserts unless a row with the same identity exists. Returns the identity.
async fn insert_row<C: ConnectionTrait>(
    conn: &C,
    info: &ModelInfo,
    document: &Row,
    unset: bool,
    omit: &[String],
) -> Result<Value, StorageError> {
    let mut row = info.to_row(document);
    row.retain(|column, _| column == info.identity_field || !omit.contains(column));
    info.stamp(&mut row, &timestamp_now(), true, omit);

    if unset {
        if info.has_numeric_identity() {
            row.remove(info.identity_field);
        } else {
            row.insert(
                info.identity_field.to_string(),
                Value::String(Uuid::new_v4().to_string()),
            );
        }
    } else if count_rows(conn, info.table, id_condition(info, &id_of(info, &row))).await? > 0 {
        return Err(StorageError::AlreadyExists);
    }
    check_unique(conn, info, &row, None).await?;

    let (columns, values): (Vec<Alias>, Vec<SimpleExpr>) = row
        .iter()
        .map(|(column, value)| (Alias::new(column), SimpleExpr::from(sql_value(value))))
        .unzip();
    let mut insert = Query::insert();
    insert
        .into_table(Alias::new(info.table))
        .columns(columns)
        .values(values)
        .map_err(|err| StorageError::Query(err.to_string()))?;
    insert.on_conflict(
        OnConflict::column(Alias::new(info.identity_field))
            .do_nothing()
            .to_owned(),
    );

    let backend = conn.get_database_backend();
    if backend.support_returning() {
        insert.returning_col(Alias::new(info.identity_field));
        let returned = Value::find_by_statement(backend.build(&insert))
            .one(conn)
            .await?;
        return returned
            .and_then(|row| row.get(info.identity_field).cloned())
            .ok_or(StorageError::AlreadyExists);
    }

    let result = conn.execute(backend.build(&insert)).await?;
    if result.rows_affected() == 0 {
        return Err(StorageError::AlreadyExists);
    }
    if unset && info.has_numeric_identity() {
        Ok(Value::from(result.last_insert_id()))
    } else {
        Ok(id_of(info, &row))
    }
}

/// Writes the non-omitted columns of `document` over the row with its
/// identity, provided the row matches the plan. Returns the identity.
async fn update_row<C: ConnectionTrait>(
    conn: &C,
    info: &ModelInfo,
    document: &Row,
    plan: &Plan,
) -> Result<Value, StorageError> {
    plan.check(info)?;
    let mut document = document.clone();
    info.stamp(&mut document, &timestamp_now(), false, &plan.omit);
    let id = id_of(info, &document);
    let scope = id_condition(info, &id).add(conditions(info, plan));
    check_unique(conn, info, &document, Some(&id)).await?;

    let mut update = Query::update();
    update.table(Alias::new(info.table));
    let mut assigned = false;
    for column in info.columns() {
        if column == info.identity_field || plan.omit.iter().any(|field| field == column) {
            continue;
        }
        let value = document
            .get(column)
            .cloned()
            .unwrap_or_else(|| info.default_value(column));
        update.value(Alias::new(column), sql_value(&value));
        assigned = true;
    }

    if !assigned {
        return if count_rows(conn, info.table, scope).await? > 0 {
            Ok(id)
        } else {
            Err(StorageError::NotFound)
        };
    }

    update.cond_where(scope);
    let result = conn.execute(conn.get_database_backend().build(&update)).await?;
    if result.rows_affected() == 0 {
        return Err(StorageError::NotFound);
    }
    Ok(id)
}

async fn upsert<C: ConnectionTrait>(
    conn: &C,
    info: &ModelInfo,
    document: &Row,
    unset: bool,
) -> Result<Value, StorageError> {
    if !unset {
        let id = id_of(info, document);
        if count_rows(conn, info.table, id_condition(info, &id)).await? > 0 {
            return update_row(conn, info, document, &Plan::default()).await;
        }
    }
    insert_row(conn, info, document, unset, &[]).await
}

#[async_trait]
impl Storage for SeaOrmStorage {
    async fn find_many<T: Model>(
        &self,
        ctx: &RequestContext,
        query: &[QueryTransformation],
    ) -> Result<Vec<T>, StorageError> {
        let info = self.info::<T>()?;
        tracing::trace!(request_id = %ctx.request_id, table = info.table, "sql find_many");
        let plan = Plan::new(query);
        self.fetch(info, Condition::all(), &plan)
            .await?
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
        tracing::trace!(request_id = %ctx.request_id, table = info.table, %id, "sql find_by_id");
        let id = serde_json::to_value(id)?;
        let plan = Plan::new(query);
        let document = self
            .fetch(info, id_condition(info, &id), &plan)
            .await?
            .into_iter()
            .next()
            .ok_or(StorageError::NotFound)?;
        Ok(from_document(document)?)
    }

    async fn count<T: Model>(
        &self,
        ctx: &RequestContext,
        query: &[QueryTransformation],
    ) -> Result<u64, StorageError> {
        let info = self.info::<T>()?;
        tracing::trace!(request_id = %ctx.request_id, table = info.table, "sql count");
        let plan = Plan::new(query);
        plan.check(info)?;
        count_rows(&self.db, info.table, conditions(info, &plan)).await
    }

    async fn count_association<P: Model>(
        &self,
        ctx: &RequestContext,
        parent: &P,
        field: &str,
        query: &[QueryTransformation],
    ) -> Result<u64, StorageError> {
        let info = self.info::<P>()?;
        tracing::trace!(request_id = %ctx.request_id, table = info.table, field, "sql count_association");
        let relation = info
            .relation(field)
            .ok_or_else(|| unknown_relation(info, field))?;
        let target = self.model(relation.target)?;
        let plan = Plan::new(query);
        plan.check(target)?;

        let parent_id = id_value(parent)?;
        let parent_row = fetch_row(&self.db, info, &parent_id)
            .await?
            .ok_or(StorageError::NotFound)?;
        let Some(related) = related_condition(info, relation, target, &parent_row) else {
            return Ok(0);
        };
        count_rows(&self.db, target.table, related.add(conditions(target, &plan))).await
    }

    async fn create<T: Model>(
        &self,
        ctx: &RequestContext,
        record: T,
        query: &[QueryTransformation],
    ) -> Result<T, StorageError> {
        let info = self.info::<T>()?;
        tracing::trace!(request_id = %ctx.request_id, table = info.table, "sql create");
        let plan = Plan::new(query);
        let document = to_document(&record)?;
        let unset = record.identity().1.is_unset();
        let id = insert_row(&self.db, info, &document, unset, &plan.omit).await?;
        self.reload(info, &id).await
    }

    async fn save<T: Model>(
        &self,
        ctx: &RequestContext,
        record: T,
        query: &[QueryTransformation],
    ) -> Result<T, StorageError> {
        let info = self.info::<T>()?;
        tracing::trace!(request_id = %ctx.request_id, table = info.table, "sql save");
        let plan = Plan::new(query);
        let document = to_document(&record)?;
        let id = update_row(&self.db, info, &document, &plan).await?;
        self.reload(info, &id).await
    }

    async fn delete<T: Model>(
        &self,
        ctx: &RequestContext,
        record: &T,
        query: &[QueryTransformation],
    ) -> Result<(), StorageError> {
        let info = self.info::<T>()?;
        tracing::trace!(request_id = %ctx.request_id, table = info.table, "sql delete");
        let plan = Plan::new(query);
        plan.check(info)?;
        let id = id_value(record)?;

        let txn = self.db.begin().await?;
        let mut delete = Query::delete();
        delete
            .from_table(Alias::new(info.table))
            .cond_where(id_condition(info, &id).add(conditions(info, &plan)));
        let result = txn.execute(txn.get_database_backend().build(&delete)).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }

        // Links on either side of a join table, including self relations.
        for (owner, relation) in self.registry.many_to_many() {
            let RelationKind::ManyToMany {
                join_table,
                parent_key,
                child_key,
            } = &relation.kind
            else {
                continue;
            };
            let mut linked = Condition::any();
            if owner.type_name == info.type_name {
                linked = linked.add(column_eq(parent_key, &id));
            }
            if relation.target == info.type_name {
                linked = linked.add(column_eq(child_key, &id));
            }
            if linked.is_empty() {
                continue;
            }
            let mut links = Query::delete();
            links.from_table(Alias::new(join_table)).cond_where(linked);
            txn.execute(txn.get_database_backend().build(&links)).await?;
        }

        txn.commit().await?;
        Ok(())
    }

    async fn append_association<P: Model, C: Model>(
        &self,
        ctx: &RequestContext,
        parent: &P,
        field: &str,
        child: C,
    ) -> Result<C, StorageError> {
        let info = self.info::<P>()?;
        tracing::trace!(request_id = %ctx.request_id, table = info.table, field, "sql append_association");
        let relation = relation_to::<C>(info, field)?;
        let target = self.info::<C>()?;
        let parent_id = id_value(parent)?;
        let mut document = to_document(&child)?;
        let unset = child.identity().1.is_unset();

        let txn = self.db.begin().await?;
        if count_rows(&txn, info.table, id_condition(info, &parent_id)).await? == 0 {
            return Err(StorageError::NotFound);
        }

        let child_id = match &relation.kind {
            RelationKind::HasOne { foreign_key } | RelationKind::HasMany { foreign_key } => {
                document.insert(foreign_key.clone(), parent_id.clone());
                let child_id = upsert(&txn, target, &document, unset).await?;
                if matches!(relation.kind, RelationKind::HasOne { .. }) {
                    let mut detach = Query::update();
                    detach
                        .table(Alias::new(target.table))
                        .value(
                            Alias::new(foreign_key),
                            sql_value(&target.default_value(foreign_key)),
                        )
                        .cond_where(
                            Condition::all()
                                .add(column_eq(foreign_key, &parent_id))
                                .add(
                                    Expr::col(Alias::new(target.identity_field))
                                        .ne(sql_value(&child_id)),
                                ),
                        );
                    txn.execute(txn.get_database_backend().build(&detach)).await?;
                }
                child_id
            }
            RelationKind::BelongsTo { foreign_key } => {
                let child_id = upsert(&txn, target, &document, unset).await?;
                let mut link = Query::update();
                link.table(Alias::new(info.table))
                    .value(Alias::new(foreign_key), sql_value(&child_id))
                    .cond_where(id_condition(info, &parent_id));
                txn.execute(txn.get_database_backend().build(&link)).await?;
                child_id
            }
            RelationKind::ManyToMany {
                join_table,
                parent_key,
                child_key,
            } => {
                let child_id = upsert(&txn, target, &document, unset).await?;
                let existing = Condition::all()
                    .add(column_eq(parent_key, &parent_id))
                    .add(column_eq(child_key, &child_id));
                if count_rows(&txn, join_table, existing).await? == 0 {
                    let mut link = Query::insert();
                    link.into_table(Alias::new(join_table))
                        .columns([Alias::new(parent_key), Alias::new(child_key)])
                        .values([
                            SimpleExpr::from(sql_value(&parent_id)),
                            SimpleExpr::from(sql_value(&child_id)),
                        ])
                        .map_err(|err| StorageError::Query(err.to_string()))?;
                    txn.execute(txn.get_database_backend().build(&link)).await?;
                }
                child_id
            }
        };

        txn.commit().await?;
        self.reload(target, &child_id).await
    }

    async fn delete_association<P: Model, C: Model>(
        &self,
        ctx: &RequestContext,
        parent: &P,
        field: &str,
        child: &C,
    ) -> Result<(), StorageError> {
        let info = self.info::<P>()?;
        tracing::trace!(request_id = %ctx.request_id, table = info.table, field, "sql delete_association");
        let relation = relation_to::<C>(info, field)?;
        let target = self.info::<C>()?;
        let parent_id = id_value(parent)?;
        let child_id = id_value(child)?;
        let backend = self.db.get_database_backend();

        let statement = match &relation.kind {
            RelationKind::HasOne { foreign_key } | RelationKind::HasMany { foreign_key } => {
                let mut detach = Query::update();
                detach
                    .table(Alias::new(target.table))
                    .value(
                        Alias::new(foreign_key),
                        sql_value(&target.default_value(foreign_key)),
                    )
                    .cond_where(
                        id_condition(target, &child_id).add(column_eq(foreign_key, &parent_id)),
                    );
                backend.build(&detach)
            }
            RelationKind::BelongsTo { foreign_key } => {
                let mut detach = Query::update();
                detach
                    .table(Alias::new(info.table))
                    .value(
                        Alias::new(foreign_key),
                        sql_value(&info.default_value(foreign_key)),
                    )
                    .cond_where(
                        id_condition(info, &parent_id).add(column_eq(foreign_key, &child_id)),
                    );
                backend.build(&detach)
            }
            RelationKind::ManyToMany {
                join_table,
                parent_key,
                child_key,
            } => {
                let mut unlink = Query::delete();
                unlink.from_table(Alias::new(join_table)).cond_where(
                    Condition::all()
                        .add(column_eq(parent_key, &parent_id))
                        .add(column_eq(child_key, &child_id)),
                );
                backend.build(&unlink)
            }
        };

        let result = self.db.execute(statement).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}
