//! Unit tests for rivven-bulk error module

use rivven_bulk::error::{Error, ErrorCategory};

#[test]
fn test_error_schema_mismatch() {
    let err = Error::schema_mismatch("expected 2 fields, got 3");

    assert_eq!(err.category(), ErrorCategory::Schema);
    assert!(err.to_string().contains("expected 2 fields"));
    assert!(!err.is_retriable());
}

#[test]
fn test_error_capacity() {
    let err = Error::CapacityExceeded { max_rows: 10 };

    assert_eq!(err.category(), ErrorCategory::Capacity);
    assert!(err.to_string().contains("10 rows"));
    assert!(!err.is_retriable());
}

#[test]
fn test_error_invalid_state() {
    let err = Error::invalid_state("cannot append to a finalized buffer");

    assert_eq!(err.category(), ErrorCategory::State);
    assert!(err.to_string().contains("finalized"));
}

#[test]
fn test_error_no_viable_strategy() {
    let err = Error::no_viable_strategy("target offers no bulk copy");

    assert_eq!(err.category(), ErrorCategory::Strategy);
    assert!(!err.is_retriable());
}

#[test]
fn test_error_constraint_with_row() {
    let err = Error::constraint("duplicate key", Some(41));

    assert_eq!(err.category(), ErrorCategory::Constraint);
    assert_eq!(err.row_index(), Some(41));
    assert!(err.to_string().contains("at row 41"));
    assert!(!err.is_retriable());
}

#[test]
fn test_error_at_row_fills_missing_index() {
    let err = Error::constraint("duplicate key", None).at_row(7);
    assert_eq!(err.row_index(), Some(7));

    // An index reported by the target wins
    let err = Error::constraint("duplicate key", Some(3)).at_row(7);
    assert_eq!(err.row_index(), Some(3));

    // Other kinds are left alone
    let err = Error::query("syntax error").at_row(7);
    assert_eq!(err.row_index(), None);
}

#[test]
fn test_error_cancelled() {
    let err = Error::Cancelled;

    assert_eq!(err.category(), ErrorCategory::Cancelled);
    assert_eq!(err.to_string(), "load cancelled");
    assert!(!err.is_retriable());
}

#[test]
fn test_error_connection_lost() {
    let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
    let err = Error::connection_lost_with_source("connection dropped mid-transfer", io);

    assert_eq!(err.category(), ErrorCategory::Connection);
    assert!(err.is_retriable());
    assert!(std::error::Error::source(&err).is_some());
}

#[test]
fn test_error_timeout() {
    let err = Error::timeout("transfer did not finish within 500 ms");

    assert_eq!(err.category(), ErrorCategory::Timeout);
    assert!(err.is_retriable());
}

#[test]
fn test_error_query_with_sql() {
    let err = Error::query_with_sql("syntax error", "INSERT INTO x");

    assert_eq!(err.category(), ErrorCategory::Query);
    match err {
        Error::Query { sql, .. } => assert_eq!(sql.as_deref(), Some("INSERT INTO x")),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_error_config_and_other() {
    assert_eq!(Error::config("bad").category(), ErrorCategory::Configuration);
    assert_eq!(Error::unsupported("x").category(), ErrorCategory::Other);
    assert_eq!(Error::internal("x").category(), ErrorCategory::Other);
    assert_eq!(Error::transaction("x").category(), ErrorCategory::Transaction);
}

#[test]
fn test_error_category_display() {
    assert_eq!(ErrorCategory::Constraint.to_string(), "constraint");
    assert_eq!(ErrorCategory::Connection.to_string(), "connection");
    assert_eq!(ErrorCategory::Cancelled.to_string(), "cancelled");
}
