//! SQLite plumbing for the workspace index.

pub mod connection;
pub mod repositories;
pub mod row_types;
