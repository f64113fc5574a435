//! Parameter binding integration tests.

use db_invoke::{ExecutionMode, InvokeError, Value};

use super::test_request;

#[tokio::test]
async fn test_named_parameters() {
    let Some(builder) = test_request("SELECT @a::int + @b::int AS total") else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let request = builder
        .mode(ExecutionMode::Scalar)
        .parameter("a", 40)
        .parameter("@b", 2)
        .build()
        .unwrap();
    let result = db_invoke::execute(&request).await.unwrap();

    assert_eq!(result.scalar(), Some(&Value::Int(42)));
}

#[tokio::test]
async fn test_null_parameter_equals_null_literal() {
    let sql_bound = "SELECT @v::text IS NULL AS is_null, coalesce(@v::text, 'fallback') AS picked";
    let sql_literal = "SELECT NULL::text IS NULL AS is_null, coalesce(NULL::text, 'fallback') AS picked";
    let (Some(bound), Some(literal)) = (test_request(sql_bound), test_request(sql_literal)) else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let bound = db_invoke::execute(&bound.parameter("v", Value::Null).build().unwrap())
        .await
        .unwrap();
    let literal = db_invoke::execute(&literal.build().unwrap()).await.unwrap();

    assert_eq!(bound.tables, literal.tables);
    assert_eq!(bound.tables[0].rows[0].get("is_null"), Some(&Value::Bool(true)));
}

#[tokio::test]
async fn test_bound_and_literal_queries_render_types_alike() {
    let columns = "DATE '2024-07-01' AS d, TIMESTAMP '2024-07-01 12:30:00.25' AS ts, \
                   TIME '08:15:00' AS t, 12.5::numeric AS n, 0.001::numeric AS small, \
                   '{\"a\": 1}'::jsonb AS j, '{\"b\":2}'::json AS js, \
                   'a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11'::uuid AS u, 'x'::varchar AS v";
    let sql_bound = format!("SELECT {columns}, @id::int AS id");
    let sql_literal = format!("SELECT {columns}, 5::int AS id");
    let (Some(bound), Some(literal)) = (test_request(&sql_bound), test_request(&sql_literal))
    else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let bound = db_invoke::execute(&bound.parameter("id", 5).build().unwrap())
        .await
        .unwrap();
    let literal = db_invoke::execute(&literal.build().unwrap()).await.unwrap();

    assert_eq!(bound.tables, literal.tables);
    let row = &bound.tables[0].rows[0];
    assert_eq!(row.get("d"), Some(&Value::from("2024-07-01")));
    assert_eq!(row.get("ts"), Some(&Value::from("2024-07-01 12:30:00.25")));
    assert_eq!(row.get("n"), Some(&Value::from("12.5")));
    assert_eq!(row.get("j"), Some(&Value::from("{\"a\": 1}")));
}

#[tokio::test]
async fn test_bound_timestamptz_renders_in_utc() {
    let Some(builder) =
        test_request("SELECT TIMESTAMPTZ '2024-07-01 12:30:00+00' AS ts, @days::int AS days")
    else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = db_invoke::execute(
        &builder
            .mode(ExecutionMode::Scalar)
            .parameter("days", 0)
            .build()
            .unwrap(),
    )
    .await
    .unwrap();

    assert_eq!(result.scalar(), Some(&Value::from("2024-07-01 12:30:00+00")));
}

#[tokio::test]
async fn test_bound_unsupported_type_is_an_error() {
    let Some(builder) = test_request("SELECT ARRAY[@n::int, 2] AS numbers") else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let error = db_invoke::execute(&builder.parameter("n", 1).build().unwrap())
        .await
        .unwrap_err();

    match error {
        InvokeError::QueryExecutionFailed(message) => {
            assert!(message.contains("numbers"), "{message}");
        }
        other => panic!("Expected QueryExecutionFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_parameters_across_statements() {
    let Some(builder) = test_request("SELECT @a::int AS a; SELECT @b::text AS b, @a::int AS a")
    else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = db_invoke::execute(
        &builder
            .parameter("a", 1)
            .parameter("b", "two")
            .parameter("unused", Value::Null)
            .build()
            .unwrap(),
    )
    .await
    .unwrap();

    assert_eq!(result.tables.len(), 2);
    assert_eq!(result.tables[0].rows[0].get("a"), Some(&Value::Int(1)));
    assert_eq!(result.tables[1].rows[0].get("b"), Some(&Value::from("two")));
}

#[tokio::test]
async fn test_string_parameter_compared_as_date_after_cast() {
    let Some(builder) = test_request("SELECT @d::date > DATE '2024-01-01' AS later") else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let request = builder
        .mode(ExecutionMode::Scalar)
        .parameter("d", "2024-03-15")
        .build()
        .unwrap();
    let result = db_invoke::execute(&request).await.unwrap();

    assert_eq!(result.scalar(), Some(&Value::Bool(true)));
}
