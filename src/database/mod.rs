// Database module
// PostgreSQL + pgvector for points, SQLite for local pipeline state

pub mod postgres;
pub mod sqlite;

pub use postgres::PgvectorClient;
pub use sqlite::{StateDatabase, StateKind};
