//! Route composition: turns a model type and its [`CrudOption`] into an axum
//! [`Router`] with one route per enabled verb.

use axum::{
    Router,
    body::Bytes,
    extract::{Path, RawQuery, State},
    routing::MethodRouter,
};
use std::sync::Arc;

use crate::context::RequestContext;
use crate::options::CrudOption;
use crate::registry::{Registry, RegistryError};
use crate::routes::{self, NestedRoute, PathParams};
use crate::storage::Storage;
use crate::traits::Model;

/// Path parameter naming the identity of `T`: the type name followed by the
/// identity field in `PascalCase`, e.g. `UserId` for `User { id }`.
///
/// Distinct per type, so sibling and nested resources never share a name.
#[must_use]
pub fn id_param<T: Model>() -> String {
    format!("{}{}", T::TYPE_NAME, pascal_case(T::identity_field()))
}

fn pascal_case(field: &str) -> String {
    field
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect()
            })
        })
        .collect()
}

fn base_path(relative_path: &str) -> &str {
    relative_path.trim_end_matches('/')
}

/// CRUD routes for `T` under `relative_path`:
///
/// ```text
///    GET /users
///   POST /users
///    GET /users/{UserId}
///    PUT /users/{UserId}
/// DELETE /users/{UserId}
/// ```
///
/// Verbs whose option has `enabled = false` are not registered. Merge the
/// result into the application router and supply the storage as state.
pub fn crud<T: Model, S: Storage>(relative_path: &str, option: &CrudOption<T>) -> Router<S> {
    let base = base_path(relative_path);
    let collection_path = if base.is_empty() { "/".to_string() } else { base.to_string() };
    let param = Arc::new(id_param::<T>());
    let item_path = format!("{base}/{{{param}}}");

    let mut collection: Option<MethodRouter<S>> = None;
    let mut item: Option<MethodRouter<S>> = None;

    if option.list.enabled {
        let list = Arc::new(option.list.clone());
        collection = Some(collection.unwrap_or_else(MethodRouter::new).get(
            move |State(storage): State<S>, ctx: RequestContext, RawQuery(query): RawQuery| {
                let list = Arc::clone(&list);
                async move { routes::get_list::<T, S>(&storage, &ctx, query.as_deref(), &list).await }
            },
        ));
    }

    if option.create.enabled {
        let create = Arc::new(option.create.clone());
        collection = Some(collection.unwrap_or_else(MethodRouter::new).post(
            move |State(storage): State<S>, ctx: RequestContext, body: Bytes| {
                let create = Arc::clone(&create);
                async move { routes::create::<T, S>(&storage, &ctx, &body, &create).await }
            },
        ));
    }

    if option.get.enabled {
        let get = Arc::new(option.get.clone());
        let param = Arc::clone(&param);
        item = Some(item.unwrap_or_else(MethodRouter::new).get(
            move |State(storage): State<S>,
                  ctx: RequestContext,
                  Path(params): Path<PathParams>,
                  RawQuery(query): RawQuery| {
                let get = Arc::clone(&get);
                let param = Arc::clone(&param);
                async move {
                    routes::get_by_id::<T, S>(&storage, &ctx, &params, &param, query.as_deref(), &get)
                        .await
                }
            },
        ));
    }

    if option.update.enabled {
        let update = Arc::new(option.update.clone());
        let param = Arc::clone(&param);
        item = Some(item.unwrap_or_else(MethodRouter::new).put(
            move |State(storage): State<S>,
                  ctx: RequestContext,
                  Path(params): Path<PathParams>,
                  body: Bytes| {
                let update = Arc::clone(&update);
                let param = Arc::clone(&param);
                async move {
                    routes::update::<T, S>(&storage, &ctx, &params, &param, &body, &update).await
                }
            },
        ));
    }

    if option.delete.enabled {
        let delete = Arc::new(option.delete.clone());
        let param = Arc::clone(&param);
        item = Some(item.unwrap_or_else(MethodRouter::new).delete(
            move |State(storage): State<S>, ctx: RequestContext, Path(params): Path<PathParams>| {
                let delete = Arc::clone(&delete);
                let param = Arc::clone(&param);
                async move { routes::delete::<T, S>(&storage, &ctx, &params, &param, &delete).await }
            },
        ));
    }

    tracing::info!(
        model = T::TYPE_NAME,
        path = %collection_path,
        "adding CRUD routes"
    );

    let mut router = Router::new();
    if let Some(collection) = collection {
        router = router.route(&collection_path, collection);
    }
    if let Some(item) = item {
        router = router.route(&item_path, item);
    }
    router
}

/// Routes for the relation `field` of `P`, whose records are `C`s:
///
/// ```text
///    GET /users/{UserId}/orders
///   POST /users/{UserId}/orders
/// DELETE /users/{UserId}/orders/{OrderId}
/// ```
///
/// GET follows `option.list` (collections return one record unless
/// `nested_limit_max` is raised),
/// POST follows `option.create` and DELETE follows `option.delete`. For a
/// relation of a type to itself the child parameter is prefixed with `Child`.
///
/// # Errors
///
/// [`RegistryError::UnknownRelation`] when `P` has no relation `field`, and
/// [`RegistryError::RelationTargetMismatch`] when it does not lead to `C`.
pub fn crud_nested<P: Model, C: Model, S: Storage>(
    relative_path: &str,
    registry: &Registry,
    field: &str,
    option: &CrudOption<C>,
) -> Result<Router<S>, RegistryError> {
    let relation = registry.relation::<P>(field)?.clone();
    if relation.target != C::TYPE_NAME {
        return Err(RegistryError::RelationTargetMismatch {
            model: P::TYPE_NAME.to_string(),
            field: field.to_string(),
            expected: C::TYPE_NAME.to_string(),
            actual: relation.target.to_string(),
        });
    }

    let parent_param = id_param::<P>();
    let mut child_param = id_param::<C>();
    if child_param == parent_param {
        child_param = format!("Child{child_param}");
    }

    let base = base_path(relative_path);
    let field_path = format!("{base}/{{{parent_param}}}/{field}");
    let item_path = format!("{field_path}/{{{child_param}}}");
    let route = Arc::new(NestedRoute {
        relation,
        parent_param,
        child_param,
    });

    let mut field_routes: Option<MethodRouter<S>> = None;

    if option.list.enabled {
        let list = Arc::new(option.list.clone());
        let route = Arc::clone(&route);
        field_routes = Some(field_routes.unwrap_or_else(MethodRouter::new).get(
            move |State(storage): State<S>,
                  ctx: RequestContext,
                  Path(params): Path<PathParams>,
                  RawQuery(query): RawQuery| {
                let list = Arc::clone(&list);
                let route = Arc::clone(&route);
                async move {
                    routes::get_field::<P, S>(&storage, &ctx, &params, &route, query.as_deref(), &list)
                        .await
                }
            },
        ));
    }

    if option.create.enabled {
        let create = Arc::new(option.create.clone());
        let route = Arc::clone(&route);
        field_routes = Some(field_routes.unwrap_or_else(MethodRouter::new).post(
            move |State(storage): State<S>,
                  ctx: RequestContext,
                  Path(params): Path<PathParams>,
                  body: Bytes| {
                let create = Arc::clone(&create);
                let route = Arc::clone(&route);
                async move {
                    routes::create_nested::<P, C, S>(&storage, &ctx, &params, &route, &body, &create)
                        .await
                }
            },
        ));
    }

    let mut router = Router::new();
    if let Some(field_routes) = field_routes {
        router = router.route(&field_path, field_routes);
    }

    if option.delete.enabled {
        let delete = Arc::new(option.delete.clone());
        let route = Arc::clone(&route);
        router = router.route(
            &item_path,
            axum::routing::delete(
                move |State(storage): State<S>, ctx: RequestContext, Path(params): Path<PathParams>| {
                    let delete = Arc::clone(&delete);
                    let route = Arc::clone(&route);
                    async move {
                        routes::delete_nested::<P, C, S>(&storage, &ctx, &params, &route, &delete)
                            .await
                    }
                },
            ),
        );
    }

    tracing::info!(
        parent = P::TYPE_NAME,
        child = C::TYPE_NAME,
        path = %field_path,
        "adding nested CRUD routes"
    );
    Ok(router)
}
