//! Query engine shared by both storage backends.
//!
//! Pure functions only — no I/O. The flat-file store evaluates these
//! predicates directly over deserialized records; the SQLite store
//! compiles the same semantics to SQL, so both backends agree on
//! filtered, sorted, and paginated results for identical data.
//!
//! - [`filter`] - per-field predicates combined with AND
//! - [`sort`] - multi-key sort with domain rank orders
//! - [`cursor`] - opaque cursor pagination and offset/limit paging

pub mod cursor;
pub mod filter;
pub mod sort;

pub use cursor::{decode_cursor, encode_cursor, paginate, CursorPage, Page};
pub use filter::{DateRange, ItemFilter, ScalarPred, TextPred};
pub use sort::{sort_items, SortDir, SortField, SortKey};
