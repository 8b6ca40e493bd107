pub mod handlers;

pub use handlers::*;

use crate::service::ReconciliationEngine;
use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tokio::sync::Mutex;

/// 共享状态: 会话引擎 (同一时刻只有一个操作在改会话状态)
pub type SharedEngine = Arc<Mutex<ReconciliationEngine>>;

pub fn router(engine: SharedEngine) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/receipts", post(add_receipt))
        .route("/api/receipts/import", post(import_receipts))
        .route("/api/receipts/:id", put(update_receipt))
        .route("/api/receipts/:id/items/:index", delete(delete_receipt_line))
        .route("/api/inspections/:id", delete(delete_inspection))
        .route("/api/procurement", get(list_procurement).post(add_procurement))
        .route("/api/procurement/import-indents", post(import_indents))
        .route("/api/procurement/:index", put(update_procurement).delete(delete_procurement))
        .route("/api/reconcile", post(reconcile))
        .route("/api/live-stock", get(live_stock))
        .route("/api/match", get(match_details))
        .route("/api/batch-code/next", get(next_batch_code))
        .route("/api/reports/purchase-actuals", get(purchase_actuals))
        .route("/api/reports/purchase-actuals.csv", get(purchase_actuals_csv))
        .with_state(engine)
}
