//! txscope - transaction scopes and generic repositories over SeaORM
//!
//! Data access code runs inside *scopes*. The outermost scope of a call chain
//! draws a session from the provider and opens a transaction; scopes nested
//! inside it open savepoints on the same session. The active session travels
//! with the call chain, so repositories find it without it being passed in.
//!
//! # Architecture Layers
//!
//! - **config**: Database configuration, engine options and constants
//! - **session**: Engine/session provider and the ambient session slot
//! - **transaction**: Transaction scopes and operation interception
//! - **repository**: Generic entity repository and the instance registry
//! - **types**: Shared types (pagination)
//! - **errors**: Centralized error handling
//! - **cli** / **commands**: The `txscope` binary
//!
//! # Example
//!
//! ```ignore
//! use txscope::{transaction, Repository};
//!
//! let widgets = Repository::<widget::Entity, widget::ActiveModel>::instance();
//! transaction(|_| async {
//!     let a = widgets.create(widget::new("X")).await?;
//!     // Savepoint: a failure here leaves `a` in place
//!     let _ = transaction(|_| async { widgets.create(widget::new("Y")).await }).await;
//!     widgets.find_by_id(a.id).await
//! })
//! .await?;
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod errors;
pub mod repository;
pub mod session;
pub mod transaction;
pub mod types;

// Re-export commonly used types at crate root
pub use config::{DatabaseConfig, DbKind, EngineOptions};
pub use errors::{DataError, DataResult};
pub use repository::{get_instance, Repository, RepositoryRegistry, Singleton};
pub use session::{Session, SessionProvider};
pub use transaction::{intercept, transaction, Operation, ScopeHandle};
pub use types::{PageRequest, Paginated};
