//! Shared value types.

mod pagination;

pub use pagination::{PageRequest, Paginated, PaginationMeta};
