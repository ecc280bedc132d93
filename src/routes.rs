//! Generic CRUD handlers.
//!
//! Each handler is instantiated per model type and receives its route
//! configuration explicitly; [`crate::router`] wires them into axum routes.
//! Every storage delegation runs under the request deadline and every failure
//! is converted to an [`ApiError`] here.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::context::RequestContext;
use crate::errors::ApiError;
use crate::hooks::GetPretreat;
use crate::models::RequestOptions;
use crate::options::{CreateOption, DeleteOption, GetOption, ListOption, Operation, UpdateOption};
use crate::query::{QueryTransformation, compose, compose_filters};
use crate::registry::Relation;
use crate::response::Envelope;
use crate::storage::document::{from_document, overlay, to_document};
use crate::storage::{Storage, StorageError};
use crate::traits::Model;

/// Path parameters of the matched route, by name.
pub type PathParams = HashMap<String, String>;

/// Resolved metadata for routes under `/{ParentID}/<field>`.
#[derive(Debug, Clone)]
pub struct NestedRoute {
    pub relation: Relation,
    pub parent_param: String,
    pub child_param: String,
}

impl NestedRoute {
    #[must_use]
    pub fn field(&self) -> &str {
        &self.relation.field
    }
}

fn raw_param<'a>(params: &'a PathParams, param: &str) -> Result<&'a str, ApiError> {
    params
        .get(param)
        .map(String::as_str)
        .filter(|raw| !raw.is_empty())
        .ok_or_else(|| ApiError::missing_identifier(param))
}

fn parse_id<T: Model>(param: &str, raw: &str) -> Result<T::Id, ApiError> {
    raw.parse::<T::Id>()
        .map_err(|err| ApiError::bind(format!("invalid {param} '{raw}': {err}")))
}

/// Reads and parses the identity named `param`.
///
/// # Errors
///
/// [`ApiError::MissingIdentifier`] when absent or empty, [`ApiError::Bind`]
/// when it does not parse.
pub fn path_id<T: Model>(params: &PathParams, param: &str) -> Result<T::Id, ApiError> {
    parse_id::<T>(param, raw_param(params, param)?)
}

/// Decodes a JSON object body over `base`; fields absent from the body keep
/// the value they have in `base`.
///
/// # Errors
///
/// [`ApiError::Bind`] when the body is not a JSON object or the result does
/// not deserialize into `T`.
pub fn bind<T: Model>(body: &[u8], mut base: Map<String, Value>) -> Result<T, ApiError> {
    let patch = match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(patch)) => patch,
        Ok(_) => return Err(ApiError::bind("expected a JSON object")),
        Err(err) => return Err(ApiError::bind(err.to_string())),
    };
    overlay(&mut base, patch);
    from_document(base).map_err(|err| ApiError::bind(err.to_string()))
}

fn default_document<T: Model>() -> Result<Map<String, Value>, ApiError> {
    to_document(&T::default()).map_err(|err| ApiError::bind(err.to_string()))
}

fn envelope(
    operation: Operation,
    key: &str,
    payload: &impl Serialize,
) -> Result<Envelope, ApiError> {
    Envelope::new(key, payload)
        .map_err(|err| ApiError::process_failed(operation, StorageError::from(err)))
}

fn decode_options(
    ctx: &RequestContext,
    raw_query: Option<&str>,
    operation: Operation,
    pretreat: Option<&dyn GetPretreat>,
) -> Result<RequestOptions, ApiError> {
    let options = RequestOptions::from_query(raw_query)?;
    match pretreat {
        Some(hook) => hook
            .pretreat(ctx, options)
            .map_err(|err| ApiError::pretreat_rejected(operation, err)),
        None => Ok(options),
    }
}

fn check_denylist<T: Model>(limit_id: &[T::Id], param: &str, id: &T::Id) -> Result<(), ApiError> {
    if limit_id.contains(id) {
        return Err(ApiError::denylisted(param, id));
    }
    Ok(())
}

/// Omission first, then the route scope.
fn write_query(omit: &[String], scope: Option<QueryTransformation>) -> Vec<QueryTransformation> {
    let mut query = Vec::new();
    if !omit.is_empty() {
        query.push(QueryTransformation::Omit(omit.to_vec()));
    }
    query.extend(scope);
    query
}

/// Adds `total`, or `totalError` when counting failed.
fn attach_total(
    envelope: &mut Envelope,
    ctx: &RequestContext,
    count: Result<u64, StorageError>,
) {
    match count {
        Ok(total) => envelope.insert("total", total),
        Err(err) => {
            tracing::warn!(request_id = %ctx.request_id, error = %err, "count failed");
            envelope.insert("totalError", err.to_string());
        }
    }
}

/// `GET /` - `{ <plural>: [...] }`, plus `total` when requested.
///
/// # Errors
///
/// 400 on bind or pretreat failure, 422 when fetching fails. A failing count
/// only adds `totalError`.
pub async fn get_list<T: Model, S: Storage>(
    storage: &S,
    ctx: &RequestContext,
    raw_query: Option<&str>,
    option: &ListOption,
) -> Result<Envelope, ApiError> {
    let options = decode_options(ctx, raw_query, Operation::List, option.pretreat.as_deref())?;
    let scope = option.query_option.as_ref().map(|scope| scope.scope(ctx));
    let query = compose(&options, option.limit_max, &option.omit, scope.clone());

    let records: Vec<T> = ctx
        .within(storage.find_many::<T>(ctx, &query))
        .await
        .map_err(|err| ApiError::process_failed(Operation::List, err))?;
    let mut body = envelope(Operation::List, T::RESOURCE_NAME_PLURAL, &records)?;

    if options.total {
        let filters = compose_filters(&options, scope);
        let count = ctx.within(storage.count::<T>(ctx, &filters)).await;
        attach_total(&mut body, ctx, count);
    }
    Ok(body)
}

/// `GET /{ID}` - `{ <singular>: {...} }`.
///
/// # Errors
///
/// 400 on a missing or malformed id, bind or pretreat failure; 422 when
/// fetching fails.
pub async fn get_by_id<T: Model, S: Storage>(
    storage: &S,
    ctx: &RequestContext,
    params: &PathParams,
    param: &str,
    raw_query: Option<&str>,
    option: &GetOption,
) -> Result<Envelope, ApiError> {
    let id = path_id::<T>(params, param)?;
    let options = decode_options(ctx, raw_query, Operation::Get, option.pretreat.as_deref())?;
    let scope = option.query_option.as_ref().map(|scope| scope.scope(ctx));
    let query = compose(&options, 1, &option.omit, scope);

    let record: T = ctx
        .within(storage.find_by_id::<T>(ctx, &id, &query))
        .await
        .map_err(|err| ApiError::process_failed(Operation::Get, err))?;
    envelope(Operation::Get, T::RESOURCE_NAME_SINGULAR, &record)
}

/// `GET /{ParentID}/<field>` - `{ <field>: [...] or {...} }`.
///
/// The request options apply to the related records: a `preload=product` on
/// `/users/3/orders` loads `orders.product`. Reads are single-record unless
/// the route opts in with [`ListOption::with_nested_limit_max`]. Collections
/// also get `total` when requested.
///
/// # Errors
///
/// 400 on a missing parent id, bind or pretreat failure; 422 when fetching fails.
pub async fn get_field<P: Model, S: Storage>(
    storage: &S,
    ctx: &RequestContext,
    params: &PathParams,
    route: &NestedRoute,
    raw_query: Option<&str>,
    option: &ListOption,
) -> Result<Envelope, ApiError> {
    let parent_id = path_id::<P>(params, &route.parent_param)?;
    let options = decode_options(ctx, raw_query, Operation::List, option.pretreat.as_deref())?;
    let scope = option.query_option.as_ref().map(|scope| scope.scope(ctx));
    let collection = route.relation.is_collection();
    let limit_max = if collection { option.nested_limit_max } else { 1 };

    let preload = QueryTransformation::preload_with(
        route.field(),
        compose(&options, limit_max, &option.omit, scope.clone()),
    );
    let parent: P = ctx
        .within(storage.find_by_id::<P>(ctx, &parent_id, &[preload]))
        .await
        .map_err(|err| ApiError::process_failed(Operation::Get, err))?;

    let mut document = to_document(&parent)
        .map_err(|err| ApiError::process_failed(Operation::Get, StorageError::from(err)))?;
    let related = document.remove(route.field()).unwrap_or_else(|| {
        if collection {
            Value::Array(Vec::new())
        } else {
            Value::Null
        }
    });
    let mut body = Envelope::from_value(route.field(), related);

    if collection && options.total {
        let filters = compose_filters(&options, scope);
        let count = ctx
            .within(storage.count_association(ctx, &parent, route.field(), &filters))
            .await;
        attach_total(&mut body, ctx, count);
    }
    Ok(body)
}

/// `POST /` - `{ <singular>: {...} }`.
///
/// # Errors
///
/// 400 on bind or pretreat failure, 422 when the insert fails or an
/// equivalent record exists.
pub async fn create<T: Model, S: Storage>(
    storage: &S,
    ctx: &RequestContext,
    body: &[u8],
    option: &CreateOption<T>,
) -> Result<Envelope, ApiError> {
    let mut record: T = bind(body, default_document::<T>()?)?;
    if let Some(hook) = &option.pretreat {
        record = hook
            .pretreat(ctx, record)
            .map_err(|err| ApiError::pretreat_rejected(Operation::Create, err))?;
    }

    let scope = option.query_option.as_ref().map(|scope| scope.scope(ctx));
    let query = write_query(&option.omit, scope);
    let created: T = ctx
        .within(storage.create(ctx, record, &query))
        .await
        .map_err(|err| ApiError::process_failed(Operation::Create, err))?;
    envelope(Operation::Create, T::RESOURCE_NAME_SINGULAR, &created)
}

/// `PUT /{ID}` - `{ <singular>: {...} }`.
///
/// The body is bound over the stored record, so omitted fields keep their
/// stored values. The identity can never change.
///
/// # Errors
///
/// 400 on a missing or protected id, bind or pretreat failure, or an identity
/// change; 404 when the record does not exist; 422 when saving fails.
pub async fn update<T: Model, S: Storage>(
    storage: &S,
    ctx: &RequestContext,
    params: &PathParams,
    param: &str,
    body: &[u8],
    option: &UpdateOption<T>,
) -> Result<Envelope, ApiError> {
    let id = path_id::<T>(params, param)?;
    check_denylist::<T>(&option.limit_id, param, &id)?;

    let scope = option.query_option.as_ref().map(|scope| scope.scope(ctx));
    let lookup: Vec<QueryTransformation> = scope.iter().cloned().collect();
    let stored: T = match ctx.within(storage.find_by_id::<T>(ctx, &id, &lookup)).await {
        Ok(stored) => stored,
        Err(StorageError::NotFound) => return Err(ApiError::not_found(T::RESOURCE_NAME_SINGULAR, &id)),
        Err(err) => return Err(ApiError::process_failed(Operation::Update, err)),
    };

    let base = to_document(&stored).map_err(|err| ApiError::bind(err.to_string()))?;
    let mut record: T = bind(body, base)?;
    if let Some(hook) = &option.pretreat {
        record = hook
            .pretreat(ctx, record)
            .map_err(|err| ApiError::pretreat_rejected(Operation::Update, err))?;
    }

    let (field, stored_id) = stored.identity();
    let (_, submitted_id) = record.identity();
    if stored_id != submitted_id {
        return Err(ApiError::identity_mismatch(field, stored_id, submitted_id));
    }

    let query = write_query(&option.omit, scope);
    let saved: T = ctx
        .within(storage.save(ctx, record, &query))
        .await
        .map_err(|err| ApiError::process_failed(Operation::Update, err))?;
    envelope(Operation::Update, T::RESOURCE_NAME_SINGULAR, &saved)
}

/// Resolves the identity to delete: denylist, optional rewrite, denylist again.
fn delete_target<T: Model>(
    ctx: &RequestContext,
    params: &PathParams,
    param: &str,
    option: &DeleteOption<T>,
) -> Result<T::Id, ApiError> {
    let raw = raw_param(params, param)?;
    let id = parse_id::<T>(param, raw)?;
    check_denylist::<T>(&option.limit_id, param, &id)?;

    let Some(hook) = &option.pretreat else {
        return Ok(id);
    };
    let rewritten = hook
        .pretreat(ctx, raw.to_string())
        .map_err(|err| ApiError::pretreat_rejected(Operation::Delete, err))?;
    let id = parse_id::<T>(param, &rewritten)?;
    check_denylist::<T>(&option.limit_id, param, &id)?;
    Ok(id)
}

/// `DELETE /{ID}` - `{ "deleted": true }`.
///
/// # Errors
///
/// 400 on a missing or protected id or a pretreat failure; 422 when the record
/// cannot be fetched or deleted.
pub async fn delete<T: Model, S: Storage>(
    storage: &S,
    ctx: &RequestContext,
    params: &PathParams,
    param: &str,
    option: &DeleteOption<T>,
) -> Result<Envelope, ApiError> {
    let id = delete_target(ctx, params, param, option)?;
    let scope = option.query_option.as_ref().map(|scope| scope.scope(ctx));
    let query: Vec<QueryTransformation> = scope.into_iter().collect();

    let record: T = ctx
        .within(storage.find_by_id::<T>(ctx, &id, &query))
        .await
        .map_err(|err| ApiError::process_failed(Operation::Delete, err))?;
    ctx.within(storage.delete(ctx, &record, &query))
        .await
        .map_err(|err| ApiError::process_failed(Operation::Delete, err))?;
    Ok(Envelope::deleted())
}

/// `POST /{ParentID}/<field>` - `{ <field>: {...} }`.
///
/// Binds a child record and links it to the parent, inserting it first when
/// it does not exist.
///
/// # Errors
///
/// 400 on a missing parent id, bind or pretreat failure; 422 when the parent
/// cannot be fetched or the link fails.
pub async fn create_nested<P: Model, C: Model, S: Storage>(
    storage: &S,
    ctx: &RequestContext,
    params: &PathParams,
    route: &NestedRoute,
    body: &[u8],
    option: &CreateOption<C>,
) -> Result<Envelope, ApiError> {
    let parent_id = path_id::<P>(params, &route.parent_param)?;
    let mut child: C = bind(body, default_document::<C>()?)?;
    if let Some(hook) = &option.pretreat {
        child = hook
            .pretreat(ctx, child)
            .map_err(|err| ApiError::pretreat_rejected(Operation::Create, err))?;
    }

    let parent: P = ctx
        .within(storage.find_by_id::<P>(ctx, &parent_id, &[]))
        .await
        .map_err(|err| ApiError::process_failed(Operation::Create, err))?;
    let linked: C = ctx
        .within(storage.append_association(ctx, &parent, route.field(), child))
        .await
        .map_err(|err| ApiError::process_failed(Operation::Create, err))?;
    envelope(Operation::Create, route.field(), &linked)
}

/// `DELETE /{ParentID}/<field>/{ChildID}` - `{ "deleted": true }`.
///
/// Removes the link only; the child record stays.
///
/// # Errors
///
/// 400 on a missing parent or child id, a protected child id or a pretreat
/// failure; 422 when either record cannot be fetched or no link exists.
pub async fn delete_nested<P: Model, C: Model, S: Storage>(
    storage: &S,
    ctx: &RequestContext,
    params: &PathParams,
    route: &NestedRoute,
    option: &DeleteOption<C>,
) -> Result<Envelope, ApiError> {
    let parent_id = path_id::<P>(params, &route.parent_param)?;
    let child_id = delete_target(ctx, params, &route.child_param, option)?;
    let scope = option.query_option.as_ref().map(|scope| scope.scope(ctx));
    let child_query: Vec<QueryTransformation> = scope.into_iter().collect();

    let parent: P = ctx
        .within(storage.find_by_id::<P>(ctx, &parent_id, &[]))
        .await
        .map_err(|err| ApiError::process_failed(Operation::Delete, err))?;
    let child: C = ctx
        .within(storage.find_by_id::<C>(ctx, &child_id, &child_query))
        .await
        .map_err(|err| ApiError::process_failed(Operation::Delete, err))?;
    ctx.within(storage.delete_association(ctx, &parent, route.field(), &child))
        .await
        .map_err(|err| ApiError::process_failed(Operation::Delete, err))?;
    Ok(Envelope::deleted())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: i64,
        title: String,
        body: String,
    }

    impl Model for Note {
        type Id = i64;
        const TYPE_NAME: &'static str = "Note";
        const RESOURCE_NAME_SINGULAR: &'static str = "note";
        const RESOURCE_NAME_PLURAL: &'static str = "notes";
        const TABLE_NAME: &'static str = "notes";

        fn identity(&self) -> (&'static str, i64) {
            ("id", self.id)
        }
    }

    fn params(pairs: &[(&str, &str)]) -> PathParams {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn test_path_id() {
        assert_eq!(path_id::<Note>(&params(&[("NoteID", "7")]), "NoteID").unwrap(), 7);

        let missing = path_id::<Note>(&params(&[]), "NoteID").unwrap_err();
        assert!(matches!(missing, ApiError::MissingIdentifier { .. }));

        let empty = path_id::<Note>(&params(&[("NoteID", "")]), "NoteID").unwrap_err();
        assert!(matches!(empty, ApiError::MissingIdentifier { .. }));

        let malformed = path_id::<Note>(&params(&[("NoteID", "seven")]), "NoteID").unwrap_err();
        assert_eq!(malformed.status_code(), StatusCode::BAD_REQUEST);
        assert!(matches!(malformed, ApiError::Bind { .. }));
    }

    #[test]
    fn test_bind_over_defaults() {
        let note: Note = bind(br#"{"title": "hello"}"#, default_document::<Note>().unwrap()).unwrap();
        assert_eq!(
            note,
            Note {
                title: "hello".to_string(),
                ..Note::default()
            }
        );
    }

    #[test]
    fn test_bind_over_stored_record_keeps_fields() {
        let stored = Note {
            id: 3,
            title: "a".to_string(),
            body: "kept".to_string(),
        };
        let base = to_document(&stored).unwrap();
        let note: Note = bind(br#"{"title": "b"}"#, base).unwrap();
        assert_eq!(note.body, "kept");
        assert_eq!(note.title, "b");
        assert_eq!(note.id, 3);
    }

    #[test]
    fn test_bind_rejects_non_objects() {
        for body in [&b"[1, 2]"[..], &b"not json"[..], &b""[..]] {
            let err = bind::<Note>(body, default_document::<Note>().unwrap()).unwrap_err();
            assert!(matches!(err, ApiError::Bind { .. }));
        }
        let wrong_type = bind::<Note>(br#"{"id": "x"}"#, default_document::<Note>().unwrap());
        assert!(wrong_type.is_err());
    }

    #[test]
    fn test_delete_target_rechecks_denylist_after_pretreat() {
        let option = DeleteOption::<Note>::default()
            .with_limit_id([1])
            .with_pretreat(|_: &RequestContext, _id: String| -> Result<String, crate::hooks::BoxError> {
                Ok("1".to_string())
            });
        let ctx = RequestContext::default();

        let direct = delete_target(&ctx, &params(&[("NoteID", "1")]), "NoteID", &option).unwrap_err();
        assert!(matches!(direct, ApiError::Denylisted { .. }));

        let rewritten = delete_target(&ctx, &params(&[("NoteID", "5")]), "NoteID", &option).unwrap_err();
        assert!(matches!(rewritten, ApiError::Denylisted { .. }));
    }

    #[test]
    fn test_write_query_order() {
        let scope = QueryTransformation::filter_by("tenant", "acme");
        assert_eq!(
            write_query(&["secret".to_string()], Some(scope.clone())),
            vec![QueryTransformation::omit(["secret"]), scope]
        );
        assert!(write_query(&[], None).is_empty());
    }

    #[test]
    fn test_attach_total_degrades_on_error() {
        let ctx = RequestContext::default();
        let mut body = Envelope::from_value("notes", json!([]));
        attach_total(&mut body, &ctx, Err(StorageError::Query("boom".to_string())));
        assert_eq!(
            body.into_value(),
            json!({"notes": [], "totalError": "invalid query: boom"})
        );
    }
}
