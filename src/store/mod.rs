//! Persistence layer.
//!
//! All store access goes through the async [`Database`] trait; the libSQL
//! backend is the reference implementation (local file or in-memory).

pub mod libsql_backend;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::Database;
