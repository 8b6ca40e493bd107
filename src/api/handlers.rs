use super::SharedEngine;
use crate::error::{ReconcileError, StoreError};
use crate::models::{ProcurementRecord, ReceiptRecord};
use crate::service::actuals::write_csv;
use axum::{
    extract::{Json, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

/// 统一响应体
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

fn ok<T: Serialize>(message: impl Into<String>, data: T) -> Response {
    let response = ApiResponse {
        success: true,
        message: message.into(),
        data: Some(data),
    };
    (StatusCode::OK, Json(response)).into_response()
}

fn status_for(err: &ReconcileError) -> StatusCode {
    match err {
        ReconcileError::NoStore => StatusCode::SERVICE_UNAVAILABLE,
        ReconcileError::NotAuthenticated => StatusCode::UNAUTHORIZED,
        ReconcileError::MissingId | ReconcileError::Validation(_) => StatusCode::BAD_REQUEST,
        ReconcileError::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
        ReconcileError::Store(StoreError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failed(err: ReconcileError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        tracing::error!("✗ 请求失败: {}", err);
    } else {
        tracing::warn!("请求被拒绝: {}", err);
    }
    let response: ApiResponse<()> = ApiResponse {
        success: false,
        message: format!("Error: {}", err),
        data: None,
    };
    (status, Json(response)).into_response()
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

#[derive(Debug, Default, Deserialize)]
pub struct ImportRequest {
    #[serde(default)]
    pub force: bool,
}

/// 订单 -> 收货单导入; force 时跳过已处理与墓碑检查
pub async fn import_receipts(State(engine): State<SharedEngine>, body: Option<Json<ImportRequest>>) -> Response {
    let force = body.map(|Json(req)| req.force).unwrap_or_default();
    match engine.lock().await.import_receipts(force).await {
        Ok(summary) if summary.is_nothing() => ok("Nothing to import", summary),
        Ok(summary) => ok(
            format!("Imported {} receipts, patched {}", summary.created, summary.patched),
            summary,
        ),
        Err(e) => failed(e),
    }
}

pub async fn import_indents(State(engine): State<SharedEngine>) -> Response {
    match engine.lock().await.import_indents().await {
        Ok(summary) => ok("Indent import finished", summary),
        Err(e) => failed(e),
    }
}

pub async fn reconcile(State(engine): State<SharedEngine>) -> Response {
    match engine.lock().await.reconcile_orphans().await {
        Ok(sweep) => ok(format!("Removed {} orphaned records", sweep.len()), sweep),
        Err(e) => failed(e),
    }
}

pub async fn add_receipt(State(engine): State<SharedEngine>, Json(receipt): Json<ReceiptRecord>) -> Response {
    match engine.lock().await.add_receipt(receipt).await {
        Ok(id) => ok("Receipt saved", id),
        Err(e) => failed(e),
    }
}

pub async fn update_receipt(
    State(engine): State<SharedEngine>,
    Path(id): Path<String>,
    Json(mut receipt): Json<ReceiptRecord>,
) -> Response {
    receipt.id = Some(id);
    match engine.lock().await.update_receipt(receipt).await {
        Ok(()) => ok("Receipt updated", ()),
        Err(e) => failed(e),
    }
}

pub async fn delete_receipt_line(
    State(engine): State<SharedEngine>,
    Path((id, index)): Path<(String, usize)>,
) -> Response {
    match engine.lock().await.delete_receipt_line(&id, index).await {
        Ok(()) => ok("Receipt line deleted", ()),
        Err(e) => failed(e),
    }
}

pub async fn delete_inspection(State(engine): State<SharedEngine>, Path(id): Path<String>) -> Response {
    match engine.lock().await.delete_inspection(&id).await {
        Ok(()) => ok("Inspection record deleted", ()),
        Err(e) => failed(e),
    }
}

pub async fn list_procurement(State(engine): State<SharedEngine>) -> Response {
    let records = engine.lock().await.procurement().to_vec();
    ok(format!("{} records", records.len()), records)
}

pub async fn add_procurement(State(engine): State<SharedEngine>, Json(record): Json<ProcurementRecord>) -> Response {
    match engine.lock().await.add_procurement(record).await {
        Ok(records) => ok("Procurement record saved", records),
        Err(e) => failed(e),
    }
}

pub async fn update_procurement(
    State(engine): State<SharedEngine>,
    Path(index): Path<usize>,
    Json(record): Json<ProcurementRecord>,
) -> Response {
    match engine.lock().await.update_procurement(index, record).await {
        Ok(records) => ok("Procurement record updated", records),
        Err(e) => failed(e),
    }
}

pub async fn delete_procurement(State(engine): State<SharedEngine>, Path(index): Path<usize>) -> Response {
    match engine.lock().await.delete_procurement(index).await {
        Ok(records) => ok("Procurement record deleted", records),
        Err(e) => failed(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStockQuery {
    pub indent_no: String,
    pub item_code: String,
}

pub async fn live_stock(State(engine): State<SharedEngine>, Query(q): Query<LiveStockQuery>) -> Response {
    let stock = engine.lock().await.live_stock_lookup(&q.indent_no, &q.item_code);
    ok("OK", stock)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MatchQuery {
    pub po_no: String,
    pub indent_no: String,
    pub item_code: String,
}

/// 订货数量匹配诊断
pub async fn match_details(State(engine): State<SharedEngine>, Query(q): Query<MatchQuery>) -> Response {
    let details = engine.lock().await.match_details(&q.po_no, &q.indent_no, &q.item_code);
    ok("OK", details)
}

pub async fn next_batch_code(State(engine): State<SharedEngine>) -> Response {
    let code = engine.lock().await.next_batch_code();
    ok("OK", code)
}

pub async fn purchase_actuals(State(engine): State<SharedEngine>) -> Response {
    let rows = engine.lock().await.purchase_actuals();
    ok(format!("{} items", rows.len()), rows)
}

pub async fn purchase_actuals_csv(State(engine): State<SharedEngine>) -> Response {
    let rows = engine.lock().await.purchase_actuals();
    let mut buf = Vec::new();
    if let Err(e) = write_csv(&rows, &mut buf) {
        tracing::error!("✗ CSV 导出失败: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {}", e)).into_response();
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
        buf,
    )
        .into_response()
}
