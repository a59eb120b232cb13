//! Query counting assertions for database tests.
//!
//! [`assert_num_queries`] counts the SQL statements executed during an async
//! closure and asserts the count matches an expected value. This is how
//! prefetch and `select_related` are kept free of N+1 patterns.
//!
//! ## Example
//!
//! ```rust,no_run
//! use strata_db::Registry;
//! use strata_test::{assert_num_queries, TestDatabase};
//!
//! async fn example(registry: Registry) {
//!     let db = TestDatabase::new(&registry).unwrap();
//!     db.create_all().await.unwrap();
//!
//!     assert_num_queries(&db, 1, || async {
//!         registry.query("Album").unwrap().all(&db).await.unwrap();
//!     })
//!     .await;
//! }
//! ```

use std::future::Future;

use crate::test_database::TestDatabase;

/// Asserts that exactly `expected_count` SQL statements are executed during
/// the async closure.
///
/// Resets the counter on the [`TestDatabase`] first.
///
/// # Panics
///
/// Panics if the number of statements does not match `expected_count`.
pub async fn assert_num_queries<F, Fut>(db: &TestDatabase, expected_count: usize, f: F)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    db.reset_query_count();
    f().await;
    let actual = db.query_count();
    assert_eq!(
        actual, expected_count,
        "Expected {expected_count} SQL queries, but {actual} were executed"
    );
}

/// Asserts that at most `max_count` SQL statements are executed during the
/// async closure.
///
/// # Panics
///
/// Panics if more than `max_count` statements are executed.
pub async fn assert_max_queries<F, Fut>(db: &TestDatabase, max_count: usize, f: F)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    db.reset_query_count();
    f().await;
    let actual = db.query_count();
    assert!(
        actual <= max_count,
        "Expected at most {max_count} SQL queries, but {actual} were executed"
    );
}
