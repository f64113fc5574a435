//! Connection integration tests.
//!
//! Tests connection failures and validation that happens before connecting.

use std::time::Duration;

use db_invoke::{ExecutionRequest, InvokeError};

use super::test_request;

#[tokio::test]
async fn test_connect_with_valid_connection_string() {
    let Some(builder) = test_request("SELECT 1") else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = db_invoke::execute(&builder.build().unwrap()).await;
    assert!(result.is_ok(), "Expected success, got {result:?}");
}

#[tokio::test(flavor = "current_thread")]
async fn test_connect_with_invalid_host() {
    let request = ExecutionRequest::builder()
        .server("invalid.host.that.does.not.exist.local")
        .database("testdb")
        .credential("testuser", "testpass")
        .encrypt(false)
        .connect_timeout(Duration::from_secs(5))
        .query("SELECT 1")
        .build()
        .unwrap();

    let error = db_invoke::execute(&request).await.unwrap_err();

    assert!(matches!(error, InvokeError::QueryExecutionFailed(_)));
    assert!(
        !error.to_string().contains("testpass"),
        "Secret leaked into error: {error}"
    );
}

#[tokio::test(flavor = "current_thread")]
async fn test_connect_with_invalid_port() {
    let request = ExecutionRequest::builder()
        .server("127.0.0.1:1")
        .database("testdb")
        .encrypt(false)
        .connect_timeout(Duration::from_secs(5))
        .query("SELECT 1")
        .build()
        .unwrap();

    let error = db_invoke::execute(&request).await.unwrap_err();
    assert!(matches!(error, InvokeError::QueryExecutionFailed(_)));
}

#[tokio::test]
async fn test_missing_database_fails_before_connecting() {
    let result = ExecutionRequest::builder()
        .server("127.0.0.1:1")
        .query("SELECT 1")
        .build();

    assert!(matches!(result, Err(InvokeError::InvalidArgument(_))));
}

#[tokio::test]
async fn test_bad_sql_reports_driver_message() {
    let Some(builder) = test_request("SELECT * FROM nonexistent_table_xyz") else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let error = db_invoke::execute(&builder.build().unwrap())
        .await
        .unwrap_err();

    match error {
        InvokeError::QueryExecutionFailed(message) => {
            assert!(message.contains("nonexistent_table_xyz"), "{message}");
        }
        other => panic!("Expected QueryExecutionFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_query_timeout() {
    let Some(builder) = test_request("SELECT pg_sleep(5)") else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let request = builder
        .query_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let error = db_invoke::execute(&request).await.unwrap_err();

    assert!(error.to_string().contains("timed out"), "{error}");
}
