//! Repository layer
//!
//! - `registry`: one shared instance per repository type
//! - `base`: the generic entity repository

mod base;
mod registry;

pub use base::{PrimaryKeyValue, Repository};
pub use registry::{get_instance, RepositoryRegistry, Singleton};
