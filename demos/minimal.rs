//! Minimal CRUD API over SQLite
//!
//! ```bash
//! cargo run --example minimal
//! ```
//!
//! Then try:
//! - `curl -X POST localhost:3000/authors -d '{"name":"Ada"}' -H 'content-type: application/json'`
//! - `curl -X POST localhost:3000/authors/1/posts -d '{"title":"Hello"}' -H 'content-type: application/json'`
//! - `curl 'localhost:3000/authors/1/posts?filters_at=2024-01-01&filters_at=2100-01-01&total=true'`

use axum::Router;
use crudroute::{
    BasicModel, CrudOption, DeleteOption, ListOption, Model, Registry, SeaOrmStorage, crud,
    crud_nested, deadline_middleware,
};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection};
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Author {
    pub id: i64,
    pub name: String,
    pub created_at: String,
    #[serde(default)]
    pub posts: Vec<Post>,
}

impl Model for Author {
    type Id = i64;
    const TYPE_NAME: &'static str = "Author";
    const RESOURCE_NAME_SINGULAR: &'static str = "author";
    const RESOURCE_NAME_PLURAL: &'static str = "authors";
    const TABLE_NAME: &'static str = "authors";

    fn identity(&self) -> (&'static str, i64) {
        ("id", self.id)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Post {
    #[serde(flatten)]
    pub base: BasicModel,
    pub author_id: i64,
    pub title: String,
}

impl Model for Post {
    type Id = i64;
    const TYPE_NAME: &'static str = "Post";
    const RESOURCE_NAME_SINGULAR: &'static str = "post";
    const RESOURCE_NAME_PLURAL: &'static str = "posts";
    const TABLE_NAME: &'static str = "posts";

    fn identity(&self) -> (&'static str, i64) {
        ("id", self.base.id)
    }
}

async fn create_tables(db: &DatabaseConnection) -> Result<(), sea_orm::DbErr> {
    db.execute_unprepared(
        r"CREATE TABLE IF NOT EXISTS authors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        );",
    )
    .await?;
    db.execute_unprepared(
        r"CREATE TABLE IF NOT EXISTS posts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            author_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );",
    )
    .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite::memory:".to_string());
    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());

    let db = Database::connect(&database_url).await?;
    create_tables(&db).await?;

    let registry = Registry::builder()
        .model::<Author>()
        .model::<Post>()
        .timestamps::<Author>()
        .timestamps::<Post>()
        .has_many::<Author, Post>("posts", "author_id")
        .unique::<Author>("name")
        .build()?;
    let storage = SeaOrmStorage::new(db, Arc::new(registry.clone()));

    // Author 1 is the site owner and cannot be removed.
    let authors = CrudOption::default()
        .with_list(ListOption::default().with_limit_max(50))
        .with_delete(DeleteOption::default().with_limit_id([1]));

    let app = Router::new()
        .merge(crud::<Author, SeaOrmStorage>("/authors", &authors))
        .merge(crud::<Post, SeaOrmStorage>("/posts", &CrudOption::default()))
        .merge(crud_nested::<Author, Post, SeaOrmStorage>(
            "/authors",
            &registry,
            "posts",
            &CrudOption::default().with_list(ListOption::default().with_nested_limit_max(20)),
        )?)
        .with_state(storage)
        .layer(axum::middleware::from_fn_with_state(
            Duration::from_secs(5),
            deadline_middleware,
        ));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(%bind_addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
