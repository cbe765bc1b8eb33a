//! Scenario: LokiReader against a mocked HTTP backend (no network).
//!
//! # Invariants under test
//!
//! 1. Range queries send the stream selector, nanosecond bounds and forward
//!    direction, and return the timestamps encoded at the start of each line.
//! 2. Count queries wrap the selector in `count_over_time(...[range])` and sum
//!    the vector samples.
//! 3. Non-2xx answers surface as `ReaderError::Api` with the status code.
//! 4. Lines that do not start with a timestamp surface as `ReaderError::Decode`.

use canary_config::ReaderConfig;
use canary_reader::{LokiReader, QueryReader, ReaderError};
use chrono::{TimeZone, Utc};
use httpmock::prelude::*;
use serde_json::json;

fn reader_for(server: &MockServer) -> LokiReader {
    let cfg = ReaderConfig {
        address: server.base_url(),
        labels: r#"{name="canary"}"#.to_string(),
        query_limit: 500,
    };
    LokiReader::new(&cfg).expect("mock server URL is valid")
}

#[tokio::test]
async fn range_query_returns_line_timestamps() {
    let server = MockServer::start_async().await;
    let start = Utc.timestamp_nanos(1_700_000_000_000_000_000);
    let end = Utc.timestamp_nanos(1_700_000_020_000_000_000);

    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/loki/api/v1/query_range")
                .query_param("query", r#"{name="canary"}"#)
                .query_param("start", "1700000000000000000")
                .query_param("end", "1700000020000000000")
                .query_param("limit", "500")
                .query_param("direction", "forward");
            then.status(200).json_body(json!({
                "status": "success",
                "data": {
                    "resultType": "streams",
                    "result": [
                        {
                            "stream": {"name": "canary"},
                            "values": [
                                ["1700000005000000100", "1700000005000000000 ppppp"],
                                ["1700000006000000100", "1700000006000000000 ppppp"]
                            ]
                        },
                        {
                            "stream": {"name": "canary", "pod": "b"},
                            "values": [
                                ["1700000007000000100", "1700000007000000000 ppppp"]
                            ]
                        }
                    ]
                }
            }));
        })
        .await;

    let got = reader_for(&server).query(start, end).await.unwrap();
    mock.assert_async().await;

    let nanos: Vec<i64> = got
        .iter()
        .map(|t| t.timestamp_nanos_opt().unwrap())
        .collect();
    assert_eq!(
        nanos,
        vec![
            1_700_000_005_000_000_000,
            1_700_000_006_000_000_000,
            1_700_000_007_000_000_000
        ]
    );
}

#[tokio::test]
async fn count_query_sums_vector_samples() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/loki/api/v1/query")
                .query_param("query", r#"count_over_time({name="canary"}[24h])"#);
            then.status(200).json_body(json!({
                "status": "success",
                "data": {
                    "resultType": "vector",
                    "result": [
                        {"metric": {"pod": "a"}, "value": [1700000000.5, "40000"]},
                        {"metric": {"pod": "b"}, "value": [1700000000.5, "46000"]}
                    ]
                }
            }));
        })
        .await;

    let count = reader_for(&server)
        .query_count_over_time("24h")
        .await
        .unwrap();
    mock.assert_async().await;
    assert_eq!(count, 86_000.0);
}

#[tokio::test]
async fn empty_result_is_zero_entries() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/loki/api/v1/query_range");
            then.status(200).json_body(json!({
                "status": "success",
                "data": {"resultType": "streams", "result": []}
            }));
        })
        .await;

    let got = reader_for(&server)
        .query(Utc.timestamp_nanos(0), Utc.timestamp_nanos(1_000))
        .await
        .unwrap();
    assert!(got.is_empty());
}

#[tokio::test]
async fn server_error_is_api_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/loki/api/v1/query");
            then.status(500).body("too many outstanding requests");
        })
        .await;

    let err = reader_for(&server)
        .query_count_over_time("1h")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ReaderError::Api {
            status: 500,
            message: "too many outstanding requests".to_string()
        }
    );
}

#[tokio::test]
async fn foreign_line_is_decode_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/loki/api/v1/query_range");
            then.status(200).json_body(json!({
                "status": "success",
                "data": {
                    "resultType": "streams",
                    "result": [{"stream": {}, "values": [["1", "not a canary line"]]}]
                }
            }));
        })
        .await;

    let err = reader_for(&server)
        .query(Utc.timestamp_nanos(0), Utc.timestamp_nanos(1_000))
        .await
        .unwrap_err();
    assert!(matches!(err, ReaderError::Decode(_)), "got {err:?}");
}
