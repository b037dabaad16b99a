//! SQLite-backed revision store: append-only bundles of versioned rows.

pub mod schema;
pub mod store;

pub use schema::*;
pub use store::*;
