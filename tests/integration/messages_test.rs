//! Server message capture integration tests.

use std::sync::{Arc, Mutex};

use db_invoke::{ExecutionMode, QueryExecutor};

use super::test_request;

const NOTICES: &str = "DO $$ BEGIN RAISE NOTICE 'first'; RAISE NOTICE 'second'; END $$";

#[tokio::test]
async fn test_messages_captured_in_emission_order() {
    let Some(builder) = test_request(NOTICES) else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let request = builder
        .mode(ExecutionMode::NonQuery)
        .capture_messages(true)
        .build()
        .unwrap();
    let result = db_invoke::execute(&request).await.unwrap();

    assert!(result.messages_requested);
    assert_eq!(result.messages, vec!["first", "second"]);
}

#[tokio::test]
async fn test_messages_ignored_without_capture() {
    let Some(builder) = test_request(NOTICES) else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let request = builder.mode(ExecutionMode::NonQuery).build().unwrap();
    let result = db_invoke::execute(&request).await.unwrap();

    assert!(!result.messages_requested);
    assert!(result.messages.is_empty());
}

#[tokio::test]
async fn test_listener_receives_messages() {
    let Some(builder) = test_request(NOTICES) else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let executor = QueryExecutor::postgres().with_message_listener(move |msg| {
        sink.lock().unwrap().push(msg.to_string());
    });

    let request = builder
        .mode(ExecutionMode::NonQuery)
        .capture_messages(true)
        .build()
        .unwrap();
    executor.execute(&request).await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
}
