#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use crudroute::options::DEFAULT_LIMIT_MAX;
use crudroute::{
    BasicModel, CrudOption, ListOption, MemoryStorage, Model, QueryTransformation, Registry,
    RequestContext, Storage, StorageError, crud, crud_nested,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub created_at: String,
    #[serde(default)]
    pub orders: Vec<Order>,
    #[serde(default)]
    pub friends: Vec<User>,
}

impl Model for User {
    type Id = i64;
    const TYPE_NAME: &'static str = "User";
    const RESOURCE_NAME_SINGULAR: &'static str = "user";
    const RESOURCE_NAME_PLURAL: &'static str = "users";
    const TABLE_NAME: &'static str = "users";

    fn identity(&self) -> (&'static str, i64) {
        ("id", self.id)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub product_code: String,
    pub quantity: i64,
    #[serde(default)]
    pub product: Option<Box<Product>>,
}

impl Model for Order {
    type Id = i64;
    const TYPE_NAME: &'static str = "Order";
    const RESOURCE_NAME_SINGULAR: &'static str = "order";
    const RESOURCE_NAME_PLURAL: &'static str = "orders";
    const TABLE_NAME: &'static str = "orders";

    fn identity(&self) -> (&'static str, i64) {
        ("id", self.id)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub code: String,
    pub title: String,
    pub price: i64,
}

impl Model for Product {
    type Id = String;
    const TYPE_NAME: &'static str = "Product";
    const RESOURCE_NAME_SINGULAR: &'static str = "product";
    const RESOURCE_NAME_PLURAL: &'static str = "products";
    const TABLE_NAME: &'static str = "products";

    fn identity(&self) -> (&'static str, String) {
        ("code", self.code.clone())
    }
}

/// Timestamped model: storage stamps `created_at` and `updated_at`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Note {
    #[serde(flatten)]
    pub base: BasicModel,
    pub text: String,
}

impl Model for Note {
    type Id = i64;
    const TYPE_NAME: &'static str = "Note";
    const RESOURCE_NAME_SINGULAR: &'static str = "note";
    const RESOURCE_NAME_PLURAL: &'static str = "notes";
    const TABLE_NAME: &'static str = "notes";

    fn identity(&self) -> (&'static str, i64) {
        ("id", self.base.id)
    }
}

pub fn registry() -> Arc<Registry> {
    let registry = Registry::builder()
        .model::<User>()
        .model::<Order>()
        .model::<Product>()
        .model::<Note>()
        .timestamps::<Note>()
        .has_many::<User, Order>("orders", "user_id")
        .many_to_many::<User, User>("friends", "friendships", "user_id", "friend_id")
        .belongs_to::<Order, Product>("product", "product_code")
        .unique::<User>("email")
        .build()
        .expect("registry should build");
    Arc::new(registry)
}

pub fn user(name: &str, created_at: &str) -> User {
    User {
        name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase()),
        created_at: created_at.to_string(),
        ..User::default()
    }
}

/// Ann, Bo, Cy and Di with ids 1 to 4; Ann owns orders 1 and 2, Bo owns order 3.
pub fn seeded_storage() -> MemoryStorage {
    let storage = MemoryStorage::new(registry());
    for (name, created_at) in [
        ("Ann", "2024-01-10"),
        ("Bo", "2024-02-10"),
        ("Cy", "2024-03-10"),
        ("Di", "2024-04-10"),
    ] {
        storage.seed(user(name, created_at)).expect("seed user");
    }
    for (code, title, price) in [("kb", "Keyboard", 40), ("ms", "Mouse", 15)] {
        storage
            .seed(Product {
                code: code.to_string(),
                title: title.to_string(),
                price,
            })
            .expect("seed product");
    }
    for (user_id, product_code, quantity) in [(1, "kb", 1), (1, "ms", 2), (2, "ms", 5)] {
        storage
            .seed(Order {
                user_id,
                product_code: product_code.to_string(),
                quantity,
                ..Order::default()
            })
            .expect("seed order");
    }
    storage
}

/// Routes for users, orders, products and notes with the given user options, plus
/// the nested `orders` and `friends` routes under users (paged up to
/// `DEFAULT_LIMIT_MAX`) and `product` under orders.
pub fn app_with<S: Storage>(storage: S, users: &CrudOption<User>) -> Router {
    let registry = registry();
    let paged = ListOption::default().with_nested_limit_max(DEFAULT_LIMIT_MAX);
    Router::new()
        .merge(crud::<User, S>("/users", users))
        .merge(crud::<Order, S>("/orders", &CrudOption::default()))
        .merge(crud::<Product, S>("/products", &CrudOption::default()))
        .merge(crud::<Note, S>("/notes", &CrudOption::default()))
        .merge(
            crud_nested::<User, Order, S>(
                "/users",
                &registry,
                "orders",
                &CrudOption::default().with_list(paged.clone()),
            )
            .expect("orders relation"),
        )
        .merge(
            crud_nested::<User, User, S>(
                "/users",
                &registry,
                "friends",
                &CrudOption::default().with_list(paged),
            )
            .expect("friends relation"),
        )
        .merge(
            crud_nested::<Order, Product, S>("/orders", &registry, "product", &CrudOption::default())
                .expect("product relation"),
        )
        .with_state(storage)
}

pub fn app(storage: MemoryStorage) -> Router {
    app_with(storage, &CrudOption::default())
}

pub async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(body) => {
            request = request.header("content-type", "application/json");
            Body::from(body.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .oneshot(request.body(body).expect("request"))
        .await
        .expect("response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

pub async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    send(app, Method::GET, uri, None).await
}

/// Wraps a storage, recording every transformation list it receives and
/// optionally failing counts.
#[derive(Clone)]
pub struct Recording<S> {
    inner: S,
    calls: Arc<Mutex<Vec<(&'static str, Vec<QueryTransformation>)>>>,
    fail_counts: bool,
}

impl<S: Storage> Recording<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            calls: Arc::default(),
            fail_counts: false,
        }
    }

    pub fn failing_counts(mut self) -> Self {
        self.fail_counts = true;
        self
    }

    pub fn calls(&self) -> Vec<(&'static str, Vec<QueryTransformation>)> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn query_of(&self, method: &str) -> Vec<QueryTransformation> {
        self.calls()
            .into_iter()
            .find(|(name, _)| *name == method)
            .map(|(_, query)| query)
            .unwrap_or_else(|| panic!("no {method} call recorded"))
    }

    fn record(&self, method: &'static str, query: &[QueryTransformation]) {
        self.calls
            .lock()
            .expect("calls lock")
            .push((method, query.to_vec()));
    }

    fn count_result(&self, count: Result<u64, StorageError>) -> Result<u64, StorageError> {
        if self.fail_counts {
            Err(StorageError::Query("count unavailable".to_string()))
        } else {
            count
        }
    }
}

#[async_trait]
impl<S: Storage> Storage for Recording<S> {
    async fn find_many<T: Model>(
        &self,
        ctx: &RequestContext,
        query: &[QueryTransformation],
    ) -> Result<Vec<T>, StorageError> {
        self.record("find_many", query);
        self.inner.find_many::<T>(ctx, query).await
    }

    async fn find_by_id<T: Model>(
        &self,
        ctx: &RequestContext,
        id: &T::Id,
        query: &[QueryTransformation],
    ) -> Result<T, StorageError> {
        self.record("find_by_id", query);
        self.inner.find_by_id::<T>(ctx, id, query).await
    }

    async fn count<T: Model>(
        &self,
        ctx: &RequestContext,
        query: &[QueryTransformation],
    ) -> Result<u64, StorageError> {
        self.record("count", query);
        let count = self.inner.count::<T>(ctx, query).await;
        self.count_result(count)
    }

    async fn count_association<P: Model>(
        &self,
        ctx: &RequestContext,
        parent: &P,
        field: &str,
        query: &[QueryTransformation],
    ) -> Result<u64, StorageError> {
        self.record("count_association", query);
        let count = self.inner.count_association(ctx, parent, field, query).await;
        self.count_result(count)
    }

    async fn create<T: Model>(
        &self,
        ctx: &RequestContext,
        record: T,
        query: &[QueryTransformation],
    ) -> Result<T, StorageError> {
        self.record("create", query);
        self.inner.create(ctx, record, query).await
    }

    async fn save<T: Model>(
        &self,
        ctx: &RequestContext,
        record: T,
        query: &[QueryTransformation],
    ) -> Result<T, StorageError> {
        self.record("save", query);
        self.inner.save(ctx, record, query).await
    }

    async fn delete<T: Model>(
        &self,
        ctx: &RequestContext,
        record: &T,
        query: &[QueryTransformation],
    ) -> Result<(), StorageError> {
        self.record("delete", query);
        self.inner.delete(ctx, record, query).await
    }

    async fn append_association<P: Model, C: Model>(
        &self,
        ctx: &RequestContext,
        parent: &P,
        field: &str,
        child: C,
    ) -> Result<C, StorageError> {
        self.record("append_association", &[]);
        self.inner.append_association(ctx, parent, field, child).await
    }

    async fn delete_association<P: Model, C: Model>(
        &self,
        ctx: &RequestContext,
        parent: &P,
        field: &str,
        child: &C,
    ) -> Result<(), StorageError> {
        self.record("delete_association", &[]);
        self.inner.delete_association(ctx, parent, field, child).await
    }
}
