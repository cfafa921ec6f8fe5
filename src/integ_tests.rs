//! Integration tests for the stream load client and runner.
//!
//! These tests run against a local axum stub of the store's stream load
//! endpoint to exercise end to end scenarios: wire shapes, redirects,
//! rejection classification, deadlines and cancellation.

#[cfg(test)]
mod tests {
    use crate::{
        batch::LoadBatch,
        client::{Destination, StreamLoadClient, response::LoadStatus},
        encode::FormatConfig,
        error::LoadError,
        rows::{Row, VecRowSource},
        runner::{LoadSettings, run_step},
        telemetry::{StepStats, TelemetryEvent},
    };
    use axum::{
        Router,
        body::Bytes,
        extract::Path,
        http::{HeaderMap, StatusCode, header},
        response::{IntoResponse, Json},
        routing::put,
    };
    use serde_json::json;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::{mpsc, watch};

    // ============ Test Helpers ============

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    /// What the stub saw for one request.
    #[derive(Debug, Clone)]
    struct Captured {
        label: String,
        format: String,
        columns: String,
        column_separator: String,
        line_delimiter: String,
        strip_outer_array: Option<String>,
        body: Vec<u8>,
    }

    fn captured(headers: &HeaderMap, body: &Bytes) -> Captured {
        let get = |name: &str| {
            headers
                .get(name)
                .map(|v| v.to_str().unwrap().to_string())
                .unwrap_or_default()
        };
        Captured {
            label: get("label"),
            format: get("format"),
            columns: get("columns"),
            column_separator: get("column_separator"),
            line_delimiter: get("line_delimiter"),
            strip_outer_array: headers
                .get("strip_outer_array")
                .map(|v| v.to_str().unwrap().to_string()),
            body: body.to_vec(),
        }
    }

    fn success_payload(total: u64, loaded: u64, filtered: u64) -> serde_json::Value {
        json!({
            "TxnId": 1001,
            "Status": "Success",
            "Message": "OK",
            "NumberTotalRows": total,
            "NumberLoadedRows": loaded,
            "NumberFilteredRows": filtered,
            "LoadBytes": 0,
            "LoadTimeMs": 5,
        })
    }

    /// Stub route that captures every request and answers Success with the
    /// CSV row count taken from the body.
    fn counting_store(seen: Arc<Mutex<Vec<Captured>>>) -> Router {
        Router::new().route(
            "/api/:db/:table/_stream_load",
            put(
                move |_path: Path<(String, String)>, headers: HeaderMap, body: Bytes| {
                    let seen = Arc::clone(&seen);
                    async move {
                        let rows = body.split(|b| *b == b'\n').count() as u64;
                        seen.lock().unwrap().push(captured(&headers, &body));
                        Json(success_payload(rows, rows, 0))
                    }
                },
            ),
        )
    }

    async fn spawn_app(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn destination(addr: SocketAddr) -> Destination {
        Destination::builder()
            .host(addr.ip().to_string())
            .port(addr.port())
            .build()
            .unwrap()
    }

    fn people_batch(label: &str, format: FormatConfig, merge_on_write: bool) -> Arc<LoadBatch> {
        Arc::new(LoadBatch {
            database: "demo".to_string(),
            table: "people".to_string(),
            columns: vec!["id".to_string(), "name".to_string()],
            label: label.to_string(),
            format,
            merge_on_write,
            rows: vec![
                Row::insert(vec!["1".into(), "Alice".into()]),
                Row::insert(vec!["2".into(), "Bob".into()]),
                Row::insert(vec!["3".into(), "Carol".into()]),
            ],
        })
    }

    fn people_settings(addr: SocketAddr) -> LoadSettings {
        LoadSettings::builder()
            .destination(destination(addr))
            .database("demo")
            .table("people")
            .columns(vec!["id".to_string(), "name".to_string()])
            .build()
            .unwrap()
    }

    // ============ Client: wire shapes ============

    #[tokio::test]
    async fn csv_body_and_headers_on_the_wire() {
        init_tracing();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let addr = spawn_app(counting_store(Arc::clone(&seen))).await;

        let client = StreamLoadClient::new(destination(addr)).unwrap();
        let batch = people_batch("people_csv_1", FormatConfig::csv(), false);
        let result = client.submit(&batch).await.unwrap();

        assert_eq!(result.status, LoadStatus::Success);
        assert_eq!(result.loaded_rows, 3);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let req = &seen[0];
        assert_eq!(req.body, b"1,Alice\n2,Bob\n3,Carol");
        assert_eq!(req.label, "people_csv_1");
        assert_eq!(req.format, "csv");
        assert_eq!(req.columns, "id,name");
        assert_eq!(req.column_separator, ",");
        assert_eq!(req.line_delimiter, "\\n");
        assert!(req.strip_outer_array.is_none());
    }

    #[tokio::test]
    async fn json_array_body_on_the_wire() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let addr = spawn_app(counting_store(Arc::clone(&seen))).await;

        let client = StreamLoadClient::new(destination(addr)).unwrap();
        let format = FormatConfig::json().with_strip_outer_array(false);
        let batch = people_batch("people_json_1", format, false);
        client.submit(&batch).await.unwrap();

        let seen = seen.lock().unwrap();
        let req = &seen[0];
        assert_eq!(
            req.body,
            br#"[{"id":"1","name":"Alice"},{"id":"2","name":"Bob"},{"id":"3","name":"Carol"}]"#
        );
        assert_eq!(req.format, "json");
        assert_eq!(req.line_delimiter, ",");
        assert_eq!(req.strip_outer_array.as_deref(), Some("false"));
    }

    #[tokio::test]
    async fn delete_markers_on_the_wire() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let addr = spawn_app(counting_store(Arc::clone(&seen))).await;

        let client = StreamLoadClient::new(destination(addr)).unwrap();
        let batch = Arc::new(LoadBatch {
            database: "demo".to_string(),
            table: "people".to_string(),
            columns: vec!["id".to_string(), "name".to_string()],
            label: "people_mow_1".to_string(),
            format: FormatConfig::csv(),
            merge_on_write: true,
            rows: vec![
                Row::insert(vec!["1".into(), "Alice".into()]),
                Row::delete(vec!["2".into(), "Bob".into()]),
            ],
        });
        client.submit(&batch).await.unwrap();

        let seen = seen.lock().unwrap();
        let req = &seen[0];
        assert_eq!(req.body, b"1,Alice,0\n2,Bob,1");
        assert_eq!(req.columns, "id,name,__DORIS_DELETE_SIGN__");
    }

    // ============ Client: redirects ============

    #[tokio::test]
    async fn redirect_is_followed_once_with_the_same_label() {
        init_tracing();
        let coordinator_hits = Arc::new(Mutex::new(0usize));
        let backend_seen: Arc<Mutex<Vec<Captured>>> = Arc::new(Mutex::new(Vec::new()));

        let hits = Arc::clone(&coordinator_hits);
        let seen = Arc::clone(&backend_seen);
        let app = Router::new()
            .route(
                "/api/:db/:table/_stream_load",
                put(
                    move |Path((db, table)): Path<(String, String)>,
                          _headers: HeaderMap,
                          _body: Bytes| {
                        let hits = Arc::clone(&hits);
                        async move {
                            *hits.lock().unwrap() += 1;
                            let location = format!("/be/api/{db}/{table}/_stream_load");
                            (
                                StatusCode::TEMPORARY_REDIRECT,
                                [(header::LOCATION, location)],
                            )
                                .into_response()
                        }
                    },
                ),
            )
            .route(
                "/be/api/:db/:table/_stream_load",
                put(
                    move |_path: Path<(String, String)>, headers: HeaderMap, body: Bytes| {
                        let seen = Arc::clone(&seen);
                        async move {
                            seen.lock().unwrap().push(captured(&headers, &body));
                            Json(success_payload(3, 3, 0)).into_response()
                        }
                    },
                ),
            );
        let addr = spawn_app(app).await;

        let client = StreamLoadClient::new(destination(addr)).unwrap();
        let batch = people_batch("people_redirect_1", FormatConfig::csv(), false);
        let result = client.submit(&batch).await.unwrap();
        assert_eq!(result.loaded_rows, 3);

        assert_eq!(*coordinator_hits.lock().unwrap(), 1);
        let backend = backend_seen.lock().unwrap();
        assert_eq!(backend.len(), 1);
        // Same logical transaction: the label survives the hop and the body
        // is re-streamed in full.
        assert_eq!(backend[0].label, "people_redirect_1");
        assert_eq!(backend[0].body, b"1,Alice\n2,Bob\n3,Carol");
    }

    #[tokio::test]
    async fn second_redirect_is_refused() {
        let final_hits = Arc::new(Mutex::new(0usize));

        let hits = Arc::clone(&final_hits);
        let app = Router::new()
            .route(
                "/api/:db/:table/_stream_load",
                put(|| async {
                    (
                        StatusCode::TEMPORARY_REDIRECT,
                        [(header::LOCATION, "/hop1")],
                    )
                }),
            )
            .route(
                "/hop1",
                put(|| async {
                    (
                        StatusCode::TEMPORARY_REDIRECT,
                        [(header::LOCATION, "/hop2")],
                    )
                }),
            )
            .route(
                "/hop2",
                put(move || {
                    let hits = Arc::clone(&hits);
                    async move {
                        *hits.lock().unwrap() += 1;
                        Json(success_payload(3, 3, 0))
                    }
                }),
            );
        let addr = spawn_app(app).await;

        let client = StreamLoadClient::new(destination(addr)).unwrap();
        let batch = people_batch("people_redirect_2", FormatConfig::csv(), false);
        let err = client.submit(&batch).await.unwrap_err();

        match err {
            LoadError::Transport { message, .. } => assert!(message.contains("second redirect")),
            other => panic!("expected transport error, got {other:?}"),
        }
        assert_eq!(*final_hits.lock().unwrap(), 0);
    }

    // ============ Client: store verdicts ============

    #[tokio::test]
    async fn label_collision_is_store_rejection_without_retry() {
        let hits = Arc::new(Mutex::new(0usize));

        let counter = Arc::clone(&hits);
        let app = Router::new().route(
            "/api/:db/:table/_stream_load",
            put(move || {
                let counter = Arc::clone(&counter);
                async move {
                    *counter.lock().unwrap() += 1;
                    Json(json!({
                        "Status": "Label Already Exists",
                        "Message": "label [people_dup_1] has already been used",
                        "ExistingJobStatus": "FINISHED",
                    }))
                }
            }),
        );
        let addr = spawn_app(app).await;

        let client = StreamLoadClient::new(destination(addr)).unwrap();
        let batch = people_batch("people_dup_1", FormatConfig::csv(), false);
        let err = client.submit(&batch).await.unwrap_err();

        match &err {
            LoadError::StoreRejection { result } => {
                assert_eq!(result.status, LoadStatus::LabelAlreadyExists);
                assert_eq!(result.existing_job_status.as_deref(), Some("FINISHED"));
            }
            other => panic!("expected store rejection, got {other:?}"),
        }
        // The label is spent; the caller must mint a new one.
        assert!(err.outcome_observed());
        assert_eq!(*hits.lock().unwrap(), 1, "no automatic retry");
    }

    #[tokio::test]
    async fn fail_status_carries_store_message_verbatim() {
        let app = Router::new().route(
            "/api/:db/:table/_stream_load",
            put(|| async {
                Json(json!({
                    "Status": "Fail",
                    "Message": "too many filtered rows",
                    "NumberTotalRows": 3,
                    "NumberLoadedRows": 0,
                    "NumberFilteredRows": 3,
                    "ErrorURL": "http://be:8040/api/_load_error_log?file=abc",
                }))
            }),
        );
        let addr = spawn_app(app).await;

        let client = StreamLoadClient::new(destination(addr)).unwrap();
        let batch = people_batch("people_fail_1", FormatConfig::csv(), false);
        let err = client.submit(&batch).await.unwrap_err();
        assert!(err.to_string().contains("too many filtered rows"));
    }

    #[tokio::test]
    async fn partial_acceptance_is_success_with_filtered_count() {
        let app = Router::new().route(
            "/api/:db/:table/_stream_load",
            put(|| async {
                let mut payload = success_payload(3, 2, 1);
                payload["ErrorURL"] = json!("http://be:8040/api/_load_error_log?file=abc");
                Json(payload)
            }),
        );
        let addr = spawn_app(app).await;

        let client = StreamLoadClient::new(destination(addr)).unwrap();
        let batch = people_batch("people_partial_1", FormatConfig::csv(), false);
        let result = client.submit(&batch).await.unwrap();

        assert!(result.is_partial());
        assert_eq!(result.loaded_rows, 2);
        assert_eq!(result.filtered_rows, 1);
        assert!(result.error_url.as_deref().unwrap().contains("_load_error_log"));
    }

    // ============ Client: transport failures ============

    #[tokio::test]
    async fn malformed_response_body_is_transport_error() {
        let app = Router::new().route(
            "/api/:db/:table/_stream_load",
            put(|| async { (StatusCode::OK, "<html>proxy error</html>") }),
        );
        let addr = spawn_app(app).await;

        let client = StreamLoadClient::new(destination(addr)).unwrap();
        let batch = people_batch("people_garbage_1", FormatConfig::csv(), false);
        let err = client.submit(&batch).await.unwrap_err();

        assert!(matches!(err, LoadError::Transport { .. }));
        assert!(!err.outcome_observed(), "no verdict was observed");
    }

    #[tokio::test]
    async fn connection_failure_is_transport_error() {
        // Bind then drop to get a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = StreamLoadClient::new(destination(addr)).unwrap();
        let batch = people_batch("people_refused_1", FormatConfig::csv(), false);
        let err = client.submit(&batch).await.unwrap_err();

        assert!(matches!(err, LoadError::Transport { .. }));
        assert!(!err.outcome_observed());
    }

    #[tokio::test]
    async fn mid_stream_write_failure_is_transport_error() {
        // A store stand-in that accepts the connection, reads the request
        // line, headers and the first stretch of body, then drops the
        // socket while the client is still streaming rows.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            use tokio::io::AsyncReadExt;
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read_exact(&mut buf).await;
        });

        // A body far larger than what the stub reads, so the failure lands
        // mid-body with rows still unwritten.
        let wide = "x".repeat(1024 * 1024);
        let batch = Arc::new(LoadBatch {
            database: "demo".to_string(),
            table: "people".to_string(),
            columns: vec!["id".to_string(), "name".to_string()],
            label: "people_reset_1".to_string(),
            format: FormatConfig::csv(),
            merge_on_write: false,
            rows: vec![
                Row::insert(vec!["1".into(), wide.clone().into()]),
                Row::insert(vec!["2".into(), wide.clone().into()]),
                Row::insert(vec!["3".into(), wide.into()]),
            ],
        });

        let client = StreamLoadClient::new(destination(addr)).unwrap();
        let err = client.submit(&batch).await.unwrap_err();

        assert!(matches!(err, LoadError::Transport { .. }));
        assert!(
            !err.outcome_observed(),
            "outcome is indeterminate; the label must not be reused blindly"
        );
    }

    #[tokio::test]
    async fn deadline_bounds_the_whole_exchange() {
        let app = Router::new().route(
            "/api/:db/:table/_stream_load",
            put(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Json(success_payload(3, 3, 0))
            }),
        );
        let addr = spawn_app(app).await;

        let client = StreamLoadClient::new(destination(addr))
            .unwrap()
            .with_deadline(Duration::from_millis(100));
        let batch = people_batch("people_slow_1", FormatConfig::csv(), false);
        let err = client.submit(&batch).await.unwrap_err();

        match err {
            LoadError::Transport { message, .. } => assert!(message.contains("deadline")),
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    // ============ Runner ============

    #[tokio::test]
    async fn runner_splits_batches_and_mints_distinct_labels() {
        init_tracing();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let addr = spawn_app(counting_store(Arc::clone(&seen))).await;

        let mut settings = people_settings(addr);
        settings.batch_max_rows = 2;

        let rows = (1..=5)
            .map(|i| Row::insert(vec![i.to_string().into(), format!("name_{i}").into()]))
            .collect();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let summary = run_step(VecRowSource::new(rows), settings, Some(tx), None)
            .await
            .unwrap();

        assert_eq!(summary.batches_submitted, 3);
        assert_eq!(summary.rows_loaded, 5);
        assert_eq!(summary.rows_filtered, 0);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        let mut labels: Vec<&str> = seen.iter().map(|r| r.label.as_str()).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), 3, "each batch owns a distinct label");

        let mut stats = StepStats::new();
        while let Ok(event) = rx.try_recv() {
            stats.update(&event);
        }
        assert_eq!(stats.batches_started, 3);
        assert_eq!(stats.batches_completed, 3);
        assert_eq!(stats.batches_failed, 0);
        assert_eq!(stats.rows_loaded, 5);
    }

    #[tokio::test]
    async fn runner_submits_nothing_for_an_empty_source() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let addr = spawn_app(counting_store(Arc::clone(&seen))).await;

        let summary = run_step(
            VecRowSource::new(Vec::new()),
            people_settings(addr),
            None,
            None,
        )
        .await
        .unwrap();

        assert_eq!(summary.batches_submitted, 0);
        assert_eq!(summary.rows_loaded, 0);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn runner_fails_the_step_on_store_rejection() {
        let app = Router::new().route(
            "/api/:db/:table/_stream_load",
            put(|| async {
                Json(json!({
                    "Status": "Fail",
                    "Message": "tablet writer quorum failed",
                }))
            }),
        );
        let addr = spawn_app(app).await;

        let rows = vec![Row::insert(vec!["1".into(), "Alice".into()])];
        let (tx, mut rx) = mpsc::unbounded_channel();

        let err = run_step(VecRowSource::new(rows), people_settings(addr), Some(tx), None)
            .await
            .unwrap_err();

        let chain = format!("{err:#}");
        assert!(chain.contains("failed terminally"));
        assert!(chain.contains("tablet writer quorum failed"));

        let mut saw_failure = false;
        while let Ok(event) = rx.try_recv() {
            if let TelemetryEvent::BatchFailed { message, .. } = event {
                assert!(message.contains("tablet writer quorum failed"));
                saw_failure = true;
            }
        }
        assert!(saw_failure);
    }

    #[tokio::test]
    async fn runner_cancellation_aborts_in_flight_batches() {
        let app = Router::new().route(
            "/api/:db/:table/_stream_load",
            put(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Json(success_payload(1, 1, 0))
            }),
        );
        let addr = spawn_app(app).await;

        let rows = vec![Row::insert(vec!["1".into(), "Alice".into()])];
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let step = tokio::spawn(run_step(
            VecRowSource::new(rows),
            people_settings(addr),
            None,
            Some(cancel_rx),
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel_tx.send(true).unwrap();

        let err = step.await.unwrap().unwrap_err();
        let chain = format!("{err:#}");
        // The in-flight label's outcome is unknown; nothing is retried.
        assert!(chain.contains("cancelled"));
        assert!(chain.contains("indeterminate"));
    }
}
