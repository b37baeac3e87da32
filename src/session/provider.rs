//! Session provider and engine factory.
//!
//! The provider builds its engine (a SeaORM connection pool) lazily on first
//! use and hands out a fresh [`Session`] bound to it on every request.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use sea_orm::{Database, DatabaseConnection};
use tokio::sync::OnceCell;

#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;

use super::Session;
use crate::config::{DatabaseConfig, EngineOptions};
use crate::errors::DataResult;

/// Engine factory trait for dependency injection.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait EngineFactory: Send + Sync {
    /// Build an engine for `url`
    async fn create_engine(
        &self,
        url: &str,
        options: &EngineOptions,
    ) -> DataResult<DatabaseConnection>;
}

/// Engine factory backed by `sea_orm::Database::connect`
pub struct SeaEngineFactory;

#[async_trait]
impl EngineFactory for SeaEngineFactory {
    async fn create_engine(
        &self,
        url: &str,
        options: &EngineOptions,
    ) -> DataResult<DatabaseConnection> {
        let connection = Database::connect(options.to_connect_options(url)).await?;
        Ok(connection)
    }
}

/// Where the provider takes its configuration from
enum ConfigSource {
    Env,
    Explicit(DatabaseConfig, EngineOptions),
}

static GLOBAL: Lazy<Arc<SessionProvider>> = Lazy::new(|| Arc::new(SessionProvider::from_env()));

/// Produces sessions bound to one lazily built engine
pub struct SessionProvider {
    source: ConfigSource,
    factory: Arc<dyn EngineFactory>,
    engine: OnceCell<DatabaseConnection>,
}

impl SessionProvider {
    /// Provider configured from `DB_*` environment variables, read when the
    /// engine is first needed.
    pub fn from_env() -> Self {
        Self {
            source: ConfigSource::Env,
            factory: Arc::new(SeaEngineFactory),
            engine: OnceCell::new(),
        }
    }

    /// Provider with an explicit configuration
    pub fn new(config: DatabaseConfig, options: EngineOptions) -> Self {
        Self {
            source: ConfigSource::Explicit(config, options),
            factory: Arc::new(SeaEngineFactory),
            engine: OnceCell::new(),
        }
    }

    /// Provider adopting an engine that is already connected
    pub fn with_engine(engine: DatabaseConnection) -> Self {
        Self {
            source: ConfigSource::Env,
            factory: Arc::new(SeaEngineFactory),
            engine: OnceCell::from(engine),
        }
    }

    /// Replace the engine factory
    pub fn factory(mut self, factory: Arc<dyn EngineFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// The process-wide provider, configured from the environment
    pub fn global() -> Arc<SessionProvider> {
        GLOBAL.clone()
    }

    /// Whether the engine has been built
    pub fn is_initialized(&self) -> bool {
        self.engine.initialized()
    }

    /// Get the shared engine, building it on first call.
    ///
    /// Concurrent first calls build the engine once; a failed build is not
    /// cached.
    pub async fn engine(&self) -> DataResult<DatabaseConnection> {
        let engine = self
            .engine
            .get_or_try_init(|| async {
                let (config, options) = match &self.source {
                    ConfigSource::Env => (DatabaseConfig::from_env()?, EngineOptions::from_env()),
                    ConfigSource::Explicit(config, options) => (config.clone(), options.clone()),
                };

                tracing::info!(
                    kind = %config.kind,
                    url = %config.redacted_url(),
                    "Creating database engine"
                );
                self.factory
                    .create_engine(&config.connection_url(), &options)
                    .await
            })
            .await?;
        Ok(engine.clone())
    }

    /// Create a new session bound to the engine
    pub async fn get_session(&self) -> DataResult<Arc<Session>> {
        let engine = self.engine().await?;
        let session = Arc::new(Session::new(engine));
        tracing::debug!(session = %session.id(), "Session created");
        Ok(session)
    }
}
