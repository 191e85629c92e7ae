//! Database initialization for study records

pub mod init;

pub use init::{create_study_tables, init_database};
