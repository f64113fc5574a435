//! Integration tests for db-invoke.
//!
//! These tests require a running PostgreSQL database.
//! Set DATABASE_URL environment variable to run them.

pub mod connection_test;
pub mod messages_test;
pub mod parameters_test;
pub mod query_test;

use db_invoke::request::ExecutionRequestBuilder;
use db_invoke::ExecutionRequest;

/// Helper to get test database URL from environment.
pub fn get_test_database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok()
}

/// Helper to start a request against the test database.
pub fn test_request(sql: &str) -> Option<ExecutionRequestBuilder> {
    let url = get_test_database_url()?;
    Some(
        ExecutionRequest::builder()
            .connection_string(url)
            .query(sql),
    )
}
