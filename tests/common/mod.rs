//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;

use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Schema, Set};

use txscope::session::ambient;
use txscope::{EngineOptions, Repository, SessionProvider};

pub mod widget {
    use sea_orm::entity::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "widgets")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub name: String,
        pub quantity: i32,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub type Widgets = Repository<widget::Entity, widget::ActiveModel>;

/// New, unsaved widget
pub fn new_widget(name: &str) -> widget::ActiveModel {
    widget::ActiveModel {
        name: Set(name.to_owned()),
        quantity: Set(0),
        ..Default::default()
    }
}

/// In-memory sqlite engine with the widgets table.
///
/// The pool holds a single connection so every session sees the same
/// in-memory database.
pub async fn memory_engine() -> DatabaseConnection {
    let options = EngineOptions::default()
        .max_connections(1)
        .min_connections(1);
    let engine = Database::connect(options.to_connect_options("sqlite::memory:"))
        .await
        .expect("Failed to open sqlite engine");

    let backend = engine.get_database_backend();
    let schema = Schema::new(backend);
    engine
        .execute(backend.build(&schema.create_table_from_entity(widget::Entity)))
        .await
        .expect("Failed to create widgets table");
    engine
}

pub async fn memory_provider() -> Arc<SessionProvider> {
    Arc::new(SessionProvider::with_engine(memory_engine().await))
}

/// Run `fut` against its own in-memory database.
pub async fn run_isolated<F: Future>(fut: F) -> F::Output {
    let provider = memory_provider().await;
    ambient::with_provider(provider, fut).await
}
