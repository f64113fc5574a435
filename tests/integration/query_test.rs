//! Query execution integration tests.
//!
//! Tests result shaping for every execution mode against a live server.

use std::io::Write;

use db_invoke::{ExecutionMode, ExecutionRequest, Value};

use super::{get_test_database_url, test_request};

#[tokio::test]
async fn test_single_result_set_with_rows() {
    let Some(builder) = test_request("SELECT n, 'row ' || n AS label FROM generate_series(1, 3) AS n")
    else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = db_invoke::execute(&builder.build().unwrap()).await.unwrap();

    assert_eq!(result.mode, ExecutionMode::SingleResultSet);
    assert_eq!(result.tables.len(), 1);
    let table = &result.tables[0];
    assert_eq!(table.column_names(), vec!["n", "label"]);
    assert_eq!(table.rows.len(), 3);
    assert_eq!(table.rows[2].get("n"), Some(&Value::Int(3)));
    assert_eq!(table.rows[0].get("label"), Some(&Value::from("row 1")));
}

#[tokio::test]
async fn test_single_result_set_with_zero_rows() {
    let Some(builder) = test_request("SELECT 1 AS n WHERE false") else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = db_invoke::execute(&builder.build().unwrap()).await.unwrap();

    assert!(result.tables.is_empty(), "Expected no tables, got {:?}", result.tables);
}

#[tokio::test]
async fn test_multiple_result_sets_in_statement_order() {
    let Some(builder) = test_request("SELECT 1 AS first; SELECT 2 AS second") else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = db_invoke::execute(&builder.build().unwrap()).await.unwrap();

    assert_eq!(result.mode, ExecutionMode::MultipleResultSets);
    assert_eq!(result.tables.len(), 2);
    assert_eq!(result.tables[0].column_names(), vec!["first"]);
    assert_eq!(result.tables[1].column_names(), vec!["second"]);
}

#[tokio::test]
async fn test_auto_matches_explicit_multiple() {
    let sql = "SELECT 1 AS a; SELECT 2 AS b";
    let (Some(auto), Some(explicit)) = (test_request(sql), test_request(sql)) else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let auto = db_invoke::execute(&auto.build().unwrap()).await.unwrap();
    let explicit = db_invoke::execute(
        &explicit
            .mode(ExecutionMode::MultipleResultSets)
            .build()
            .unwrap(),
    )
    .await
    .unwrap();

    assert_eq!(auto, explicit);
}

#[tokio::test]
async fn test_scalar() {
    let Some(builder) = test_request("SELECT 40 + 2 AS answer, 'ignored' AS other") else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = db_invoke::execute(&builder.mode(ExecutionMode::Scalar).build().unwrap())
        .await
        .unwrap();

    assert_eq!(result.tables.len(), 1);
    assert_eq!(result.tables[0].column_names(), vec!["answer"]);
    assert_eq!(result.scalar(), Some(&Value::Int(42)));
}

#[tokio::test]
async fn test_nonquery_returns_no_tables() {
    let Some(builder) = test_request(
        "CREATE TEMP TABLE invoke_nonquery (id int); \
         INSERT INTO invoke_nonquery VALUES (1), (2); \
         UPDATE invoke_nonquery SET id = id + 1",
    ) else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = db_invoke::execute(&builder.mode(ExecutionMode::NonQuery).build().unwrap())
        .await
        .unwrap();

    assert!(result.tables.is_empty());
    assert!(result.rows_affected.is_some());
}

#[tokio::test]
async fn test_query_from_file() {
    let Some(url) = get_test_database_url() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "SELECT 'from file' AS source").unwrap();

    let request = ExecutionRequest::builder()
        .connection_string(url)
        .input_file(file.path())
        .build()
        .unwrap();
    let result = db_invoke::execute(&request).await.unwrap();

    assert_eq!(
        result.tables[0].rows[0].get("source"),
        Some(&Value::from("from file"))
    );
}

#[tokio::test]
async fn test_null_column_values() {
    let Some(builder) = test_request("SELECT NULL::text AS nothing, now() AS stamp") else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = db_invoke::execute(&builder.build().unwrap()).await.unwrap();
    let row = &result.tables[0].rows[0];

    assert!(row.get("nothing").unwrap().is_null());
    assert!(matches!(row.get("stamp"), Some(Value::String(_))));
}

#[tokio::test]
async fn test_multiple_keeps_empty_result_set_in_position() {
    let Some(builder) =
        test_request("SELECT 1 AS a; SELECT 2 AS b WHERE false; SELECT 3 AS c")
    else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = db_invoke::execute(
        &builder
            .mode(ExecutionMode::MultipleResultSets)
            .build()
            .unwrap(),
    )
    .await
    .unwrap();

    let names: Vec<Vec<&str>> = result.tables.iter().map(|t| t.column_names()).collect();
    assert_eq!(names, vec![vec!["a"], vec!["b"], vec!["c"]]);
    assert!(result.tables[1].rows.is_empty());
}

#[tokio::test]
async fn test_multiple_skips_statements_without_result() {
    let Some(builder) = test_request(
        "CREATE TEMP TABLE invoke_batch (id int); \
         INSERT INTO invoke_batch VALUES (1); \
         SELECT id FROM invoke_batch WHERE id > 5; \
         SELECT count(*) AS total FROM invoke_batch",
    ) else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = db_invoke::execute(&builder.build().unwrap()).await.unwrap();

    assert_eq!(result.tables.len(), 2);
    assert_eq!(result.tables[0].column_names(), vec!["id"]);
    assert!(result.tables[0].rows.is_empty());
    assert_eq!(result.tables[1].rows[0].get("total"), Some(&Value::Int(1)));
}

#[tokio::test]
async fn test_scalar_with_empty_first_statement_is_null() {
    let Some(builder) = test_request("SELECT 1 AS x WHERE false; SELECT 2 AS y") else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = db_invoke::execute(&builder.mode(ExecutionMode::Scalar).build().unwrap())
        .await
        .unwrap();

    assert_eq!(result.tables[0].column_names(), vec!["x"]);
    assert_eq!(result.scalar(), Some(&Value::Null));
}
