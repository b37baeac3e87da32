//! Configuration constants
//!
//! Centralized location for environment variable names and defaults.

// =============================================================================
// Environment variables
// =============================================================================

/// Database kind selector (`postgresql`, `mysql`, `sqlite`)
pub const ENV_DB_TYPE: &str = "DB_TYPE";

pub const ENV_DB_USER: &str = "DB_USER";

pub const ENV_DB_PASSWORD: &str = "DB_PASSWORD";

pub const ENV_DB_HOST: &str = "DB_HOST";

pub const ENV_DB_PORT: &str = "DB_PORT";

/// Database name, or the file path for sqlite
pub const ENV_DB_NAME: &str = "DB_NAME";

pub const ENV_DB_MAX_CONNECTIONS: &str = "DB_MAX_CONNECTIONS";

pub const ENV_DB_MIN_CONNECTIONS: &str = "DB_MIN_CONNECTIONS";

pub const ENV_DB_CONNECT_TIMEOUT_SECS: &str = "DB_CONNECT_TIMEOUT_SECS";

/// Enables SQL statement logging in the engine
pub const ENV_DB_SQL_LOGGING: &str = "DB_SQL_LOGGING";

// =============================================================================
// Defaults
// =============================================================================

pub const DEFAULT_DB_TYPE: &str = "postgresql";

pub const DEFAULT_DB_HOST: &str = "localhost";

/// Default PostgreSQL port
pub const DEFAULT_DB_PORT: &str = "5432";

/// Name that selects an in-memory sqlite database
pub const SQLITE_MEMORY_NAME: &str = ":memory:";

// =============================================================================
// Pagination
// =============================================================================

/// Default number of items per page
pub const DEFAULT_PAGE_SIZE: u64 = 10;

/// Default starting page number (1-indexed)
pub const DEFAULT_PAGE_NUMBER: u64 = 1;

/// Upper bound applied to a requested page size
pub const MAX_PAGE_SIZE: u64 = 100;
