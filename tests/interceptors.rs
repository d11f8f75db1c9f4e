use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use intercept_log_sink::context::CommitFlag;
use intercept_log_sink::interceptor::GENERIC_ERROR_MESSAGE;
use intercept_log_sink::utils::{REDACTED_VALUE, TRUNCATION_MARKER};
use intercept_log_sink::{
    AccessLog, AccessLogInterceptor, Dispatcher, ExceptionInterceptor, HandlerError, Identity,
    IdentityProvider, InterceptorContext, LogConfig, LogHandler, LogRecord, LogType, OperationLog,
    OperationLogInterceptor, OperationType, RequestContext, RequestSnapshot, ServerInfo,
};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
enum ServiceError {
    #[error("user {0} not found")]
    NotFound(u32),
    #[error("")]
    Silent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct User {
    id: u32,
    name: String,
}

#[derive(Clone, Default)]
struct Collect(Arc<Mutex<Vec<LogRecord>>>);

impl Collect {
    fn records(&self) -> Vec<LogRecord> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl LogHandler for Collect {
    async fn handle(&self, record: &LogRecord) -> Result<(), HandlerError> {
        self.0.lock().unwrap().push(record.clone());
        Ok(())
    }

    fn order(&self) -> i32 {
        10
    }
}

struct StaticIdentity;

impl IdentityProvider for StaticIdentity {
    fn current_identity(&self, request: Option<&dyn RequestContext>) -> Option<Identity> {
        request?.uri()?;
        Some(Identity {
            user_id: Some("1001".into()),
            username: Some("alice".into()),
        })
    }
}

fn sync_config() -> LogConfig {
    LogConfig {
        async_dispatch: false,
        app_name: "user-service".into(),
        ..LogConfig::default()
    }
}

fn setup(config: LogConfig) -> (Arc<InterceptorContext>, Collect) {
    let collect = Collect::default();
    let dispatcher = Arc::new(Dispatcher::inline(vec![Arc::new(collect.clone())]));
    let ctx = InterceptorContext::new(Arc::new(config), dispatcher)
        .unwrap()
        .with_server_info(ServerInfo::new("10.0.0.2", "app-1"))
        .with_identity(Arc::new(StaticIdentity));
    (Arc::new(ctx), collect)
}

fn get_user_request() -> RequestSnapshot {
    RequestSnapshot::new("GET", "/api/users/7")
        .param("verbose", "true")
        .header("User-Agent", "integration-test")
        .header("Authorization", "Bearer abc")
        .peer_ip("172.16.0.4")
}

async fn find_user(id: u32) -> Result<User, ServiceError> {
    if id == 7 {
        Ok(User { id, name: "alice".into() })
    } else {
        Err(ServiceError::NotFound(id))
    }
}

#[tokio::test]
async fn access_success_is_recorded() {
    let (ctx, collect) = setup(sync_config());
    let access = AccessLogInterceptor::new(ctx);
    let request = get_user_request();

    let user = access
        .intercept(
            &AccessLog::new().description("fetch user").target("UserController", "get"),
            Some(&request),
            || find_user(7),
        )
        .await
        .unwrap();
    assert_eq!(user.name, "alice");

    let records = collect.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.log_type, LogType::Access);
    assert!(record.success);
    assert!(!record.slow_request);
    assert!(record.create_time.is_some());
    assert_eq!(record.response_status, Some(200));
    assert_eq!(record.response_result.as_deref(), Some(r#"{"id":7,"name":"alice"}"#));
    assert_eq!(record.request_params.as_deref(), Some("verbose=true"));
    assert!(record.request_headers.is_none());
    assert_eq!(record.app_name.as_deref(), Some("user-service"));
    assert_eq!(record.server_host.as_deref(), Some("app-1"));
    assert_eq!(record.client_ip.as_deref(), Some("172.16.0.4"));
    assert_eq!(record.user_agent.as_deref(), Some("integration-test"));
    assert_eq!(record.username.as_deref(), Some("alice"));
    assert_eq!(record.description.as_deref(), Some("fetch user"));
    assert_eq!(record.class_name.as_deref(), Some("UserController"));
    assert_eq!(record.method_name.as_deref(), Some("get"));
}

#[tokio::test]
async fn access_failure_is_recorded_and_propagated() {
    let (ctx, collect) = setup(sync_config());
    let access = AccessLogInterceptor::new(ctx);
    let request = get_user_request();

    let err = access
        .intercept(&AccessLog::new(), Some(&request), || find_user(9))
        .await
        .unwrap_err();
    assert_eq!(err, ServiceError::NotFound(9));

    let records = collect.records();
    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
    assert_eq!(records[0].exception.as_deref(), Some("user 9 not found"));
    assert!(records[0].stack_trace.as_deref().unwrap().starts_with("user 9 not found"));
    assert!(records[0].response_result.is_none());
    assert!(records[0].create_time.is_some());
}

#[tokio::test]
async fn slow_calls_are_flagged() {
    let (ctx, collect) = setup(LogConfig {
        slow_request_threshold_ms: 10,
        ..sync_config()
    });
    let access = AccessLogInterceptor::new(ctx);
    let request = get_user_request();

    access
        .intercept(&AccessLog::new(), Some(&request), || async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok::<_, ServiceError>(())
        })
        .await
        .unwrap();

    let records = collect.records();
    assert!(records[0].slow_request);
    assert!(records[0].execution_time >= 30);
}

#[tokio::test]
async fn excluded_paths_skip_handlers() {
    let (ctx, collect) = setup(sync_config());
    let access = AccessLogInterceptor::new(Arc::clone(&ctx));
    let operation = OperationLogInterceptor::new(ctx);
    let health = RequestSnapshot::new("GET", "/health");
    let metrics = RequestSnapshot::new("GET", "/actuator/metrics/jvm.memory");

    let a = access
        .intercept(&AccessLog::new(), Some(&health), || async { Ok::<_, ServiceError>("UP") })
        .await;
    let b = operation
        .intercept(&OperationLog::new("metrics", OperationType::Query), Some(&metrics), &(), || async { Ok::<_, ServiceError>(1) })
        .await;

    assert_eq!(a, Ok("UP"));
    assert_eq!(b, Ok(1));
    assert!(collect.records().is_empty());
}

#[tokio::test]
async fn access_without_request_is_not_logged() {
    let (ctx, collect) = setup(sync_config());
    let access = AccessLogInterceptor::new(ctx);

    let user = access.intercept(&AccessLog::new(), None, || find_user(7)).await;

    assert!(user.is_ok());
    assert!(collect.records().is_empty());
}

#[tokio::test]
async fn disabling_logging_only_changes_observability() {
    for enabled in [true, false] {
        let (ctx, collect) = setup(LogConfig { enabled, ..sync_config() });
        let access = AccessLogInterceptor::new(Arc::clone(&ctx));
        let operation = OperationLogInterceptor::new(ctx);
        let request = get_user_request();

        let ok = access.intercept(&AccessLog::new(), Some(&request), || find_user(7)).await;
        let err = operation
            .intercept(&OperationLog::new("users", OperationType::Query), Some(&request), &3u32, || find_user(3))
            .await;

        assert_eq!(ok, Ok(User { id: 7, name: "alice".into() }));
        assert_eq!(err, Err(ServiceError::NotFound(3)));
        assert_eq!(collect.records().len(), if enabled { 2 } else { 0 });
    }
}

#[tokio::test]
async fn headers_are_captured_with_redaction() {
    let (ctx, collect) = setup(sync_config());
    let access = AccessLogInterceptor::new(ctx);
    let request = get_user_request();

    access
        .intercept(&AccessLog::new().record_headers(true).record_params(false), Some(&request), || find_user(7))
        .await
        .unwrap();

    let record = &collect.records()[0];
    let headers = record.request_headers.as_ref().unwrap();
    assert_eq!(headers.get("Authorization").map(String::as_str), Some(REDACTED_VALUE));
    assert_eq!(headers.get("User-Agent").map(String::as_str), Some("integration-test"));
    assert!(record.request_params.is_none());
}

#[tokio::test]
async fn long_results_are_truncated() {
    let (ctx, collect) = setup(LogConfig {
        max_response_length: 10,
        ..sync_config()
    });
    let access = AccessLogInterceptor::new(ctx);
    let request = get_user_request();

    let body = "x".repeat(100);
    let returned = access
        .intercept(&AccessLog::new(), Some(&request), || async { Ok::<_, ServiceError>(body.clone()) })
        .await
        .unwrap();
    assert_eq!(returned.len(), 100);

    let result = collect.records()[0].response_result.clone().unwrap();
    assert_eq!(result, format!("\"xxxxxxxxx{}", TRUNCATION_MARKER));
}

#[tokio::test]
async fn operation_records_metadata_and_args() {
    let (ctx, collect) = setup(sync_config());
    let operation = OperationLogInterceptor::new(ctx);
    let request = RequestSnapshot::new("DELETE", "/api/users/3");

    let err = operation
        .intercept(
            &OperationLog::new("users", OperationType::Delete)
                .description("remove user")
                .record_exception(false)
                .target("UserService", "delete"),
            Some(&request),
            &serde_json::json!({ "id": 3 }),
            || find_user(3),
        )
        .await
        .unwrap_err();
    assert_eq!(err, ServiceError::NotFound(3));

    let record = &collect.records()[0];
    assert_eq!(record.log_type, LogType::Operation);
    assert_eq!(record.module.as_deref(), Some("users"));
    assert_eq!(record.operation_type.as_deref(), Some("DELETE"));
    assert_eq!(record.description.as_deref(), Some("remove user"));
    assert_eq!(record.request_params.as_deref(), Some(r#"{"id":3}"#));
    assert_eq!(record.exception.as_deref(), Some("user 3 not found"));
    assert!(record.stack_trace.is_none());
    assert_eq!(record.method_name.as_deref(), Some("delete"));
}

#[tokio::test]
async fn operation_outside_request_is_logged() {
    let (ctx, collect) = setup(sync_config());
    let operation = OperationLogInterceptor::new(ctx);

    operation
        .intercept(&OperationLog::new("reports", OperationType::Export), None, &(), || async {
            Ok::<_, ServiceError>(vec![1, 2, 3])
        })
        .await
        .unwrap();

    let record = &collect.records()[0];
    assert!(record.request_uri.is_none());
    assert!(record.request_params.is_none());
    assert!(record.username.is_none());
    assert_eq!(record.response_result.as_deref(), Some("[1,2,3]"));
}

#[tokio::test]
async fn exception_produces_payload_when_not_committed() {
    let (ctx, collect) = setup(sync_config());
    let exceptions = ExceptionInterceptor::new(ctx);
    let request = get_user_request();

    let handled = exceptions
        .intercept(Some(&request), &false, || find_user(5))
        .await
        .unwrap_err();

    assert_eq!(handled.error, ServiceError::NotFound(5));
    let payload = handled.response.unwrap();
    assert!(!payload.success);
    assert_eq!(payload.code, 500);
    assert_eq!(payload.message, "user 5 not found");

    let record = &collect.records()[0];
    assert_eq!(record.log_type, LogType::Exception);
    assert!(!record.success);
    assert_eq!(record.response_status, Some(500));
    assert!(record.stack_trace.is_some());
    assert_eq!(record.request_params.as_deref(), Some("verbose=true"));
}

#[tokio::test]
async fn committed_response_is_log_only() {
    let (ctx, collect) = setup(sync_config());
    let exceptions = ExceptionInterceptor::new(ctx);
    let request = get_user_request();
    let flag = CommitFlag::new();
    flag.commit();

    let handled = exceptions
        .intercept(Some(&request), &flag, || async { Err::<(), _>(ServiceError::Silent) })
        .await
        .unwrap_err();

    assert!(handled.response.is_none());
    assert_eq!(collect.records().len(), 1);
    assert!(collect.records()[0].response_status.is_none());
}

#[tokio::test]
async fn exception_payload_survives_disabled_logging() {
    let (ctx, collect) = setup(LogConfig {
        exception_enabled: false,
        ..sync_config()
    });
    let exceptions = ExceptionInterceptor::new(ctx);

    let payload = exceptions.handle_error(&ServiceError::Silent, None, &false).await.unwrap();

    assert_eq!(payload.message, GENERIC_ERROR_MESSAGE);
    assert!(collect.records().is_empty());
}

#[tokio::test]
async fn successful_calls_pass_the_exception_interceptor() {
    let (ctx, collect) = setup(sync_config());
    let exceptions = ExceptionInterceptor::new(ctx);

    let user = exceptions.intercept(None, &false, || find_user(7)).await.unwrap();

    assert_eq!(user.id, 7);
    assert!(collect.records().is_empty());
}

#[tokio::test]
async fn cancelled_call_still_produces_record() {
    let (ctx, collect) = setup(sync_config());
    let access = AccessLogInterceptor::new(ctx);
    let request = get_user_request();

    let timed_out = tokio::time::timeout(
        Duration::from_millis(20),
        access.intercept(&AccessLog::new(), Some(&request), || async {
            std::future::pending::<Result<(), ServiceError>>().await
        }),
    )
    .await;
    assert!(timed_out.is_err());

    for _ in 0..20 {
        if !collect.records().is_empty() {
            break;
        }
        tokio::task::yield_now().await;
    }
    let records = collect.records();
    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
    assert_eq!(records[0].exception.as_deref(), Some("cancelled"));
    assert!(records[0].execution_time >= 15);
}

#[tokio::test]
async fn async_dispatch_delivers_after_shutdown() {
    let collect = Collect::default();
    let config = LogConfig::default();
    let dispatcher = Arc::new(
        intercept_log_sink::dispatcher::DispatcherBuilder::from_config(&config)
            .handler(Arc::new(collect.clone()))
            .build()
            .unwrap(),
    );
    assert!(dispatcher.is_async());
    let ctx = Arc::new(InterceptorContext::new(Arc::new(config), Arc::clone(&dispatcher)).unwrap());
    let access = AccessLogInterceptor::new(ctx);

    for id in [7, 8, 7] {
        let request = RequestSnapshot::new("GET", format!("/api/users/{id}"));
        let _ = access.intercept(&AccessLog::new(), Some(&request), || find_user(id)).await;
    }
    dispatcher.shutdown_timeout(Duration::from_secs(5)).await.unwrap();

    let records = collect.records();
    assert_eq!(records.len(), 3);
    assert_eq!(records.iter().filter(|r| !r.success).count(), 1);
    let mut ids: Vec<_> = records.iter().map(|r| r.log_id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3);
}

fn assert_send<F: Future + Send>(future: F) -> F {
    future
}

async fn render_invoice(_id: u32) -> Result<String, ServiceError> {
    panic!("invoice template missing")
}

async fn wait_for_records(collect: &Collect, count: usize) -> Vec<LogRecord> {
    for _ in 0..50 {
        if collect.records().len() >= count {
            break;
        }
        tokio::task::yield_now().await;
    }
    collect.records()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn interceptors_run_on_spawned_tasks() {
    let (ctx, collect) = setup(sync_config());
    let access = AccessLogInterceptor::new(Arc::clone(&ctx));
    let operation = OperationLogInterceptor::new(Arc::clone(&ctx));
    let exceptions = ExceptionInterceptor::new(ctx);
    let late_errors = exceptions.clone();

    let accessed = tokio::spawn(assert_send(async move {
        let request = get_user_request();
        access.intercept(&AccessLog::new(), Some(&request), || find_user(7)).await
    }));
    let operated = tokio::spawn(assert_send(async move {
        operation
            .intercept(&OperationLog::new("users", OperationType::Query), None, &7u32, || find_user(7))
            .await
    }));
    let handled = tokio::spawn(assert_send(async move {
        let request = get_user_request();
        exceptions.intercept(Some(&request), &false, || find_user(5)).await
    }));
    let payload = tokio::spawn(assert_send(async move {
        late_errors.handle_error(&ServiceError::NotFound(6), None, &false).await
    }));

    assert_eq!(accessed.await.unwrap().unwrap().id, 7);
    assert_eq!(operated.await.unwrap().unwrap().id, 7);
    let handled = handled.await.unwrap().unwrap_err();
    assert_eq!(handled.error, ServiceError::NotFound(5));
    assert_eq!(handled.response.unwrap().message, "user 5 not found");
    assert_eq!(payload.await.unwrap().unwrap().message, "user 6 not found");

    let records = collect.records();
    assert_eq!(records.len(), 4);
    assert_eq!(records.iter().filter(|r| r.log_type == LogType::Exception).count(), 2);
}

#[tokio::test]
async fn panicking_call_is_recorded_as_panicked() {
    let (ctx, collect) = setup(sync_config());
    let access = AccessLogInterceptor::new(ctx);

    let task = tokio::spawn(async move {
        let request = RequestSnapshot::new("GET", "/api/invoices/3");
        access.intercept(&AccessLog::new(), Some(&request), || render_invoice(3)).await
    });
    let joined = task.await;
    assert!(joined.unwrap_err().is_panic());

    let records = wait_for_records(&collect, 1).await;
    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
    assert_eq!(records[0].exception.as_deref(), Some("panicked"));
    assert_eq!(records[0].request_uri.as_deref(), Some("/api/invoices/3"));
}
