//! 内存文档库 (测试与单机运行)

use super::store::{Collection, Document, DocumentStore, Snapshot};
use crate::error::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::watch;

struct Slot {
    docs: IndexMap<String, Map<String, Value>>,
    tx: watch::Sender<Snapshot>,
}

impl Slot {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(Vec::new()));
        Self {
            docs: IndexMap::new(),
            tx,
        }
    }

    fn snapshot(&self) -> Snapshot {
        Arc::new(
            self.docs
                .iter()
                .map(|(id, body)| Document::new(id.clone(), body.clone()))
                .collect(),
        )
    }

    /// 把最新快照推给订阅者 (没有订阅者也保留最新值)
    fn publish(&self) {
        self.tx.send_replace(self.snapshot());
    }
}

#[derive(Default)]
pub struct MemoryStore {
    slots: DashMap<(String, Collection), Slot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接装入一批文档 (初始化数据用), 返回分配的 id
    pub fn seed(&self, tenant: &str, collection: Collection, bodies: Vec<Map<String, Value>>) -> Vec<String> {
        let mut slot = self.slot(tenant, collection);
        let ids: Vec<String> = bodies
            .into_iter()
            .map(|body| {
                let id = new_id();
                slot.docs.insert(id.clone(), body);
                id
            })
            .collect();
        slot.publish();
        ids
    }

    fn slot(&self, tenant: &str, collection: Collection) -> dashmap::mapref::one::RefMut<'_, (String, Collection), Slot> {
        self.slots
            .entry((tenant.to_string(), collection))
            .or_insert_with(Slot::new)
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn not_found(collection: Collection, id: &str) -> StoreError {
    StoreError::NotFound {
        collection: collection.name().to_string(),
        id: id.to_string(),
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn subscribe(&self, tenant: &str, collection: Collection) -> Result<watch::Receiver<Snapshot>, StoreError> {
        let slot = self.slot(tenant, collection);
        let rx = slot.tx.subscribe();
        Ok(rx)
    }

    async fn list(&self, tenant: &str, collection: Collection) -> Result<Vec<Document>, StoreError> {
        let slot = self.slot(tenant, collection);
        Ok(slot.snapshot().as_ref().clone())
    }

    async fn add(&self, tenant: &str, collection: Collection, body: Map<String, Value>) -> Result<String, StoreError> {
        let mut slot = self.slot(tenant, collection);
        let id = new_id();
        slot.docs.insert(id.clone(), body);
        slot.publish();
        Ok(id)
    }

    async fn update(
        &self,
        tenant: &str,
        collection: Collection,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<(), StoreError> {
        let mut slot = self.slot(tenant, collection);
        let doc = slot.docs.get_mut(id).ok_or_else(|| not_found(collection, id))?;
        for (k, v) in patch {
            doc.insert(k, v);
        }
        slot.publish();
        Ok(())
    }

    async fn delete(&self, tenant: &str, collection: Collection, id: &str) -> Result<(), StoreError> {
        let mut slot = self.slot(tenant, collection);
        if slot.docs.shift_remove(id).is_none() {
            return Err(not_found(collection, id));
        }
        slot.publish();
        Ok(())
    }

    async fn replace_collection(
        &self,
        tenant: &str,
        collection: Collection,
        bodies: Vec<Map<String, Value>>,
    ) -> Result<Vec<String>, StoreError> {
        let mut slot = self.slot(tenant, collection);
        slot.docs.clear();
        let ids: Vec<String> = bodies
            .into_iter()
            .map(|body| {
                let id = new_id();
                slot.docs.insert(id.clone(), body);
                id
            })
            .collect();
        slot.publish();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn subscriber_gets_full_snapshot_on_every_change() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe("t1", Collection::PsirData).await.unwrap();
        assert!(rx.borrow().is_empty());

        let id = store.add("t1", Collection::PsirData, body(json!({ "poNo": "PO-1" }))).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().len(), 1);

        store
            .update("t1", Collection::PsirData, &id, body(json!({ "supplierName": "Acme" })))
            .await
            .unwrap();
        rx.changed().await.unwrap();
        let snap = rx.borrow_and_update().clone();
        assert_eq!(snap[0].body.get("poNo"), Some(&json!("PO-1")));
        assert_eq!(snap[0].body.get("supplierName"), Some(&json!("Acme")));
    }

    #[tokio::test]
    async fn tenants_are_isolated_and_missing_ids_are_reported() {
        let store = MemoryStore::new();
        store.seed("t1", Collection::StockRecords, vec![body(json!({ "itemCode": "A1" }))]);

        assert_eq!(store.list("t1", Collection::StockRecords).await.unwrap().len(), 1);
        assert!(store.list("t2", Collection::StockRecords).await.unwrap().is_empty());

        let err = store.delete("t1", Collection::StockRecords, "missing").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn replace_collection_keeps_input_order() {
        let store = MemoryStore::new();
        store.seed("t1", Collection::PurchaseData, vec![body(json!({ "indentNo": "OLD" }))]);
        let ids = store
            .replace_collection(
                "t1",
                Collection::PurchaseData,
                vec![body(json!({ "indentNo": "A" })), body(json!({ "indentNo": "B" }))],
            )
            .await
            .unwrap();

        let docs = store.list("t1", Collection::PurchaseData).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, ids[0]);
        assert_eq!(docs[1].body.get("indentNo"), Some(&json!("B")));
    }
}
