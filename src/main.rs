use procurement_reconciler::config::Backend;
use procurement_reconciler::db::DocumentStore;
use procurement_reconciler::service::ChangePropagator;
use procurement_reconciler::{api, create_pool, AppConfig, MemoryStore, PgStore, ReconciliationEngine};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tower::ServiceBuilder;
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志 - 本地时间格式
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .with_level(true)
        .init();

    // 加载配置
    let config = AppConfig::from_env();
    info!("Starting server with config: {:?}", config);

    // 文档库
    let store: Arc<dyn DocumentStore> = match config.engine.backend {
        Backend::Memory => {
            info!("使用内存文档库 (数据不落盘)");
            Arc::new(MemoryStore::new())
        }
        Backend::Postgres => {
            let pool = create_pool(&config.database).await?;
            let store = PgStore::new(
                pool,
                config.engine.bulk_chunk_size,
                Duration::from_secs(config.engine.write_timeout_secs),
            );
            store.ensure_schema().await?;
            Arc::new(store)
        }
    };

    // 会话引擎, 后台订阅所有集合
    let engine = Arc::new(Mutex::new(ReconciliationEngine::with_store(
        store,
        config.engine.tenant.clone(),
        ChangePropagator::new(),
    )));
    let driver = Arc::clone(&engine);
    tokio::spawn(async move {
        if let Err(e) = ReconciliationEngine::run(driver).await {
            tracing::error!("✗ 会话驱动退出: {}", e);
        }
    });

    let app = api::router(engine).layer(ServiceBuilder::new());

    // 启动服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  POST /api/receipts/import              - 订单导入收货单");
    info!("  POST /api/procurement/import-indents   - 请购导入采购记录");
    info!("  POST /api/reconcile                    - 孤儿清理");
    info!("  GET  /api/live-stock                   - 实时库存");
    info!("  GET  /api/reports/purchase-actuals.csv - 实际入库汇总");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
