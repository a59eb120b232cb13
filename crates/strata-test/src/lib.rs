//! # strata-test
//!
//! Test utilities for strata. [`TestDatabase`] is an in-memory SQLite
//! database that creates tables from a [`Registry`](strata_db::Registry)
//! and counts the statements it runs; [`assert_num_queries`] and
//! [`assert_max_queries`] turn that count into assertions, which is how
//! N+1 regressions are caught.

pub mod assert_queries;
pub mod test_database;

pub use assert_queries::{assert_max_queries, assert_num_queries};
pub use test_database::TestDatabase;
