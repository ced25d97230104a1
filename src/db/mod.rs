//! Storage layer: the transactional Postgres client, its bind arguments and
//! per-call query records.

pub mod args;
pub mod client;
pub mod error;
pub mod query_log;

pub use args::SqlArg;
pub use client::Client;
pub use error::{BoxError, DbError};
pub use query_log::QueryLog;
