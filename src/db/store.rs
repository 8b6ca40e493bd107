use crate::error::StoreError;
use crate::models::{InspectionRecord, ProcurementRecord, ReceiptRecord};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// 文档集合名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    /// 采购记录
    PurchaseData,
    /// 采购订单 (与采购记录互为镜像, 也可能由外部写入)
    PurchaseOrders,
    /// 收货单
    PsirData,
    /// 检验记录
    VsirData,
    OpenIndentItems,
    ClosedIndentItems,
    /// 请购单明细
    IndentData,
    StockRecords,
    ItemMaster,
}

impl Collection {
    pub const ALL: [Collection; 9] = [
        Collection::PurchaseData,
        Collection::PurchaseOrders,
        Collection::PsirData,
        Collection::VsirData,
        Collection::OpenIndentItems,
        Collection::ClosedIndentItems,
        Collection::IndentData,
        Collection::StockRecords,
        Collection::ItemMaster,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Collection::PurchaseData => "purchaseData",
            Collection::PurchaseOrders => "purchaseOrders",
            Collection::PsirData => "psirData",
            Collection::VsirData => "vsirData",
            Collection::OpenIndentItems => "openIndentItems",
            Collection::ClosedIndentItems => "closedIndentItems",
            Collection::IndentData => "indentData",
            Collection::StockRecords => "stockRecords",
            Collection::ItemMaster => "itemMaster",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 一条文档: 文档库分配的 id + JSON 对象
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub body: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, body: Map<String, Value>) -> Self {
        Self { id: id.into(), body }
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.body.clone()))
    }
}

/// 集合的完整快照
pub type Snapshot = Arc<Vec<Document>>;

/// 记录转文档体; id 不进入文档体
pub fn to_body<T: Serialize>(record: &T) -> Result<Map<String, Value>, StoreError> {
    match serde_json::to_value(record)? {
        Value::Object(mut body) => {
            body.remove("id");
            Ok(body)
        }
        other => Ok(Map::from_iter([("value".to_string(), other)])),
    }
}

/// 带文档 id 的记录
pub trait StoredRecord: DeserializeOwned + Serialize {
    fn id(&self) -> Option<&str>;
    fn set_id(&mut self, id: String);
}

macro_rules! stored_record {
    ($($ty:ty),*) => {
        $(impl StoredRecord for $ty {
            fn id(&self) -> Option<&str> {
                self.id.as_deref()
            }

            fn set_id(&mut self, id: String) {
                self.id = Some(id);
            }
        })*
    };
}

stored_record!(ProcurementRecord, ReceiptRecord, InspectionRecord);

/// 解码带 id 的记录; 无法解码的文档记日志后跳过
pub fn decode_records<T: StoredRecord>(collection: Collection, docs: &[Document]) -> Vec<T> {
    docs.iter()
        .filter_map(|doc| match doc.decode::<T>() {
            Ok(mut rec) => {
                rec.set_id(doc.id.clone());
                Some(rec)
            }
            Err(e) => {
                tracing::warn!("skip undecodable document {}/{}: {}", collection, doc.id, e);
                None
            }
        })
        .collect()
}

/// 解码只读输入 (不关心 id)
pub fn decode_plain<T: DeserializeOwned>(collection: Collection, docs: &[Document]) -> Vec<T> {
    docs.iter()
        .filter_map(|doc| match doc.decode::<T>() {
            Ok(rec) => Some(rec),
            Err(e) => {
                tracing::warn!("skip undecodable document {}/{}: {}", collection, doc.id, e);
                None
            }
        })
        .collect()
}

/// 按租户隔离的文档库
///
/// `subscribe` 立即给出当前完整集合, 之后每次变化再给出完整集合 (不做差量);
/// 丢弃 Receiver 即取消订阅。写操作之间没有乐观锁, 后写者覆盖。
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn subscribe(&self, tenant: &str, collection: Collection) -> Result<watch::Receiver<Snapshot>, StoreError>;

    async fn list(&self, tenant: &str, collection: Collection) -> Result<Vec<Document>, StoreError>;

    /// 新增文档, 返回分配的 id
    async fn add(&self, tenant: &str, collection: Collection, body: Map<String, Value>) -> Result<String, StoreError>;

    /// 浅合并 patch 到已有文档
    async fn update(
        &self,
        tenant: &str,
        collection: Collection,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<(), StoreError>;

    async fn delete(&self, tenant: &str, collection: Collection, id: &str) -> Result<(), StoreError>;

    /// 整体覆盖集合, 返回新文档的 id (与输入顺序一致)
    async fn replace_collection(
        &self,
        tenant: &str,
        collection: Collection,
        bodies: Vec<Map<String, Value>>,
    ) -> Result<Vec<String>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collection_names_round_trip() {
        for c in Collection::ALL {
            assert_eq!(Collection::from_name(c.name()), Some(c));
        }
        assert_eq!(Collection::from_name("nope"), None);
    }

    #[test]
    fn records_carry_document_id_but_body_does_not() {
        let docs = vec![
            Document::new("d1", json!({ "poNo": "PO-1", "items": [] }).as_object().cloned().unwrap()),
            Document::new("d2", json!({ "poNo": "PO-2" }).as_object().cloned().unwrap()),
        ];
        let receipts: Vec<ReceiptRecord> = decode_records(Collection::PsirData, &docs);

        assert_eq!(receipts[0].id.as_deref(), Some("d1"));
        let body = to_body(&receipts[1]).unwrap();
        assert!(!body.contains_key("id"));
        assert_eq!(body.get("poNo"), Some(&json!("PO-2")));
    }
}
