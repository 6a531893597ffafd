//! Listing pagination
//!
//! Walks the paginated directory index and collects detail-page URLs.

mod paginator;
mod types;

pub use paginator::{resolve_link, ListingPaginator};
pub use types::{ListingWalk, PaginationCursor, WalkState};
