use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use qgate_core::ExecutionContext;
use qgate_query::{
    CellValue, Connector, ConnectorFactory, DataSource, InMemoryDataSourceRepository, Limits,
    QueryError, QueryRegistry, QueryRequest, QueryService, Row, POSTGRES_TYPE,
};

#[derive(Default)]
struct FakeConnector {
    rows: Vec<Row>,
    fail_count: bool,
    delay: Option<Duration>,
    statements: Mutex<Vec<(String, Vec<Value>)>>,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn query(
        &self,
        ctx: &ExecutionContext,
        sql: &str,
        params: &[Value],
    ) -> qgate_query::Result<Vec<Row>> {
        self.statements.lock().push((sql.to_string(), params.to_vec()));

        if let Some(delay) = self.delay {
            ctx.run(tokio::time::sleep(delay))
                .await
                .map_err(|reason| QueryError::interrupted(reason, 0))?;
        }

        if sql.starts_with("SELECT COUNT(1)") {
            if self.fail_count {
                return Err(QueryError::query_failed("count exploded"));
            }
            let mut row = Row::new();
            row.insert("total".into(), CellValue::Int(42));
            return Ok(vec![row]);
        }
        Ok(self.rows.clone())
    }

    async fn close(&self) -> qgate_query::Result<()> {
        Ok(())
    }
}

struct FakeFactory(Arc<FakeConnector>);

#[async_trait]
impl ConnectorFactory for FakeFactory {
    fn backend_type(&self) -> &'static str {
        POSTGRES_TYPE
    }

    async fn connect(&self, _: &DataSource) -> qgate_query::Result<Arc<dyn Connector>> {
        Ok(self.0.clone())
    }
}

fn user_row(id: i64) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), CellValue::Int(id));
    row.insert("email".into(), CellValue::Text(format!("u{}@example.com", id)));
    row.insert("PASSWORD".into(), CellValue::Text("hunter2".into()));
    row
}

async fn service_with(connector: Arc<FakeConnector>, limits: Limits) -> QueryService {
    let source = DataSource {
        name: "main".into(),
        source_type: POSTGRES_TYPE.into(),
        limits,
        blocked_columns: vec!["users.password".into()],
        ..Default::default()
    };
    let registry = Arc::new(QueryRegistry::new());
    registry.register_factory(Arc::new(FakeFactory(connector))).await;

    QueryService::new(
        Arc::new(InMemoryDataSourceRepository::new(vec![source])),
        registry,
        Duration::from_secs(4),
    )
}

#[tokio::test]
async fn test_query_scrubs_blocked_columns_and_counts() {
    let connector = Arc::new(FakeConnector {
        rows: vec![user_row(1), user_row(2)],
        ..Default::default()
    });
    let service = service_with(connector.clone(), Limits::default()).await;

    let request: QueryRequest = serde_json::from_value(json!({"countTotal": true})).unwrap();
    let response = service
        .query_table(&ExecutionContext::new(), "main", "users", &request)
        .await
        .unwrap();

    assert_eq!(response.metadata.rows, 2);
    assert_eq!(response.metadata.table, "users");
    assert_eq!(response.metadata.total, Some(42));
    for row in &response.data {
        assert!(row.contains_key("email"));
        assert!(!row.keys().any(|k| k.eq_ignore_ascii_case("password")));
    }

    let statements = connector.statements.lock();
    assert_eq!(statements.len(), 2);
    assert!(statements[1].1.is_empty());
}

#[tokio::test]
async fn test_failed_count_omits_total() {
    let connector = Arc::new(FakeConnector {
        rows: vec![user_row(1)],
        fail_count: true,
        ..Default::default()
    });
    let service = service_with(connector, Limits::default()).await;

    let request: QueryRequest = serde_json::from_value(json!({"countTotal": true})).unwrap();
    let response = service
        .query_table(&ExecutionContext::new(), "main", "users", &request)
        .await
        .unwrap();

    assert_eq!(response.metadata.rows, 1);
    assert!(response.metadata.total.is_none());
    let json = serde_json::to_value(&response).unwrap();
    assert!(json["metadata"].get("total").is_none());
}

#[tokio::test]
async fn test_unknown_data_source() {
    let service = service_with(Arc::new(FakeConnector::default()), Limits::default()).await;
    let err = service
        .query_table(&ExecutionContext::new(), "nope", "users", &QueryRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err, QueryError::DataSourceNotFound("nope".into()));
}

#[tokio::test]
async fn test_table_validated_before_lookup() {
    let service = service_with(Arc::new(FakeConnector::default()), Limits::default()).await;
    let err = service
        .prepare("nope", "bad table", &QueryRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err, QueryError::InvalidTable);
}

#[tokio::test(start_paused = true)]
async fn test_data_source_timeout_applies() {
    let connector = Arc::new(FakeConnector {
        delay: Some(Duration::from_secs(30)),
        ..Default::default()
    });
    let limits = Limits {
        max_rows: 0,
        query_timeout_ms: 250,
    };
    let service = service_with(connector, limits).await;

    let err = service
        .query_table(&ExecutionContext::new(), "main", "users", &QueryRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::QueryTimeout(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_cancelled_context() {
    let connector = Arc::new(FakeConnector {
        delay: Some(Duration::from_secs(30)),
        ..Default::default()
    });
    let service = service_with(connector, Limits::default()).await;

    let ctx = ExecutionContext::new();
    ctx.cancel();
    let err = service
        .query_table(&ctx, "main", "users", &QueryRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err, QueryError::Cancelled);
}

#[tokio::test]
async fn test_list_data_sources_hides_connection() {
    let service = service_with(Arc::new(FakeConnector::default()), Limits::default()).await;
    let sources = service.list_data_sources().await.unwrap();
    assert_eq!(sources.len(), 1);

    let json = serde_json::to_value(&sources[0]).unwrap();
    assert_eq!(json["name"], "main");
    assert_eq!(json["type"], "postgres");
    assert!(json.get("connection").is_none());
}
