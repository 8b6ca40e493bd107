//! 对账引擎 (会话编排)
//!
//! 引擎持有一个会话的全部状态: 各集合的最新快照及是否已加载、已处理订单键、墓碑集合、
//! 修复闩锁, 以及实时库存表和匹配器两个派生缓存。任一输入集合变化时对应缓存整体作废,
//! 下次使用时一次性重建。
//!
//! 写操作完成后引擎重新读取受影响的集合; 通过 `run` 驱动时, 同样的变化还会以快照的形式
//! 再送回来, 所有反应都是幂等的, 第二次不会产生写入。

use super::actuals::purchase_actuals;
use super::batch_code::BatchCodeAllocator;
use super::dedupe::{dedupe_inspections, dedupe_procurement};
use super::events::{ChangeEvent, ChangePropagator};
use super::import::ImportTracker;
use super::indent_import::import_from_indents;
use super::keys::{composite_key, normalize, order_key};
use super::live_stock::{evaluate, LiveStockMap};
use super::orphans::{plan_sweep, valid_order_keys, Tombstones};
use super::repair::{run_repair, RepairLatch};
use super::resolver::MatchResolver;
use super::sync::{apply_indent_update, apply_receipts, refresh_order_quantities};
use crate::db::store::{decode_plain, decode_records, to_body, Collection, Document, DocumentStore};
use crate::error::{ReconcileError, Result, StoreError};
use crate::models::{
    ImportSummary, IndentImportSummary, Indent, IndentItem, IndentStatus, InspectionRecord, ItemMasterEntry,
    LiveStock, MatchDetails, OrphanSweep, ProcurementRecord, PurchaseActual, ReceiptRecord, RepairOutcome,
    SourceEntry, StockRecord,
};
use bigdecimal::{BigDecimal, Zero};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

/// 一个集合的会话内副本
#[derive(Debug, Clone)]
struct Slot<T> {
    items: Vec<T>,
    loaded: bool,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            loaded: false,
        }
    }
}

impl<T> Slot<T> {
    fn set(&mut self, items: Vec<T>) {
        self.items = items;
        self.loaded = true;
    }
}

#[derive(Debug, Default)]
struct Session {
    procurement: Slot<ProcurementRecord>,
    /// purchaseData 的原始文档形式 (匹配器和导入用)
    procurement_raw: Slot<SourceEntry>,
    purchase_orders: Slot<SourceEntry>,
    receipts: Slot<ReceiptRecord>,
    inspections: Slot<InspectionRecord>,
    open_items: Slot<IndentItem>,
    closed_items: Slot<IndentItem>,
    indents: Slot<Indent>,
    stock: Slot<StockRecord>,
    item_master: Slot<ItemMasterEntry>,

    tracker: ImportTracker,
    tracker_seeded: bool,
    tombstones: Tombstones,
    repair: RepairLatch,

    live_stock: Option<Arc<LiveStockMap>>,
    resolver: Option<Arc<MatchResolver>>,
}

/// 一轮反应的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reactions {
    /// 删除的空收货单数
    pub empty_receipts_removed: usize,
    /// 删除的孤儿记录数
    pub swept: usize,
    /// 收货数量是否回写了采购记录
    pub receipts_synced: bool,
    /// 请购变化是否刷新了采购记录
    pub indents_synced: bool,
    /// 订货数量缓存有变化的收货单数
    pub order_qty_refreshed: usize,
    /// 修复的收货明细行数
    pub repaired_lines: usize,
}

/// 尽力而为的批量写入计数
#[derive(Debug, Default)]
struct Tally {
    written: usize,
    failed: usize,
}

impl Tally {
    fn record<T>(&mut self, what: &str, result: std::result::Result<T, StoreError>) -> Option<T> {
        match result {
            Ok(v) => {
                self.written += 1;
                Some(v)
            }
            Err(e) => {
                tracing::error!("{} 失败: {}", what, e);
                self.failed += 1;
                None
            }
        }
    }

    fn finish(self) -> Result<usize> {
        if self.failed > 0 {
            Err(ReconcileError::PartialBatch {
                written: self.written,
                failed: self.failed,
            })
        } else {
            Ok(self.written)
        }
    }
}

fn touches(changed: &[Collection], watched: &[Collection]) -> bool {
    changed.iter().any(|c| watched.contains(c))
}

fn items_patch(receipt: &ReceiptRecord) -> std::result::Result<Map<String, Value>, StoreError> {
    let items = serde_json::to_value(&receipt.items)?;
    Ok(Map::from_iter([("items".to_string(), items)]))
}

pub struct ReconciliationEngine {
    store: Option<Arc<dyn DocumentStore>>,
    tenant: Option<String>,
    bus: ChangePropagator,
    batch_codes: BatchCodeAllocator,
    session: Session,
}

impl ReconciliationEngine {
    /// 未连接文档库的引擎; 读操作可用, 写操作返回 NoStore
    pub fn new(bus: ChangePropagator) -> Self {
        Self {
            store: None,
            tenant: None,
            bus,
            batch_codes: BatchCodeAllocator::current(),
            session: Session::default(),
        }
    }

    pub fn with_store(store: Arc<dyn DocumentStore>, tenant: impl Into<String>, bus: ChangePropagator) -> Self {
        let mut engine = Self::new(bus);
        engine.attach(store, tenant);
        engine
    }

    /// 连接文档库并切换租户; 会话状态清空
    pub fn attach(&mut self, store: Arc<dyn DocumentStore>, tenant: impl Into<String>) {
        self.store = Some(store);
        self.tenant = Some(tenant.into());
        self.reset_session();
    }

    pub fn with_batch_codes(mut self, allocator: BatchCodeAllocator) -> Self {
        self.batch_codes = allocator;
        self
    }

    pub fn bus(&self) -> &ChangePropagator {
        &self.bus
    }

    // ---------------------------------------------------------------
    // 会话状态
    // ---------------------------------------------------------------

    pub fn reset_session(&mut self) {
        self.session = Session::default();
        tracing::debug!("session state reset");
    }

    pub fn processed_keys(&self) -> Vec<String> {
        self.session.tracker.keys().cloned().collect()
    }

    pub fn tombstones(&self) -> &Tombstones {
        &self.session.tombstones
    }

    pub fn repair_done(&self) -> bool {
        self.session.repair.is_done()
    }

    pub fn is_loaded(&self, collection: Collection) -> bool {
        let s = &self.session;
        match collection {
            Collection::PurchaseData => s.procurement.loaded,
            Collection::PurchaseOrders => s.purchase_orders.loaded,
            Collection::PsirData => s.receipts.loaded,
            Collection::VsirData => s.inspections.loaded,
            Collection::OpenIndentItems => s.open_items.loaded,
            Collection::ClosedIndentItems => s.closed_items.loaded,
            Collection::IndentData => s.indents.loaded,
            Collection::StockRecords => s.stock.loaded,
            Collection::ItemMaster => s.item_master.loaded,
        }
    }

    pub fn procurement(&self) -> &[ProcurementRecord] {
        &self.session.procurement.items
    }

    pub fn receipts(&self) -> &[ReceiptRecord] {
        &self.session.receipts.items
    }

    pub fn inspections(&self) -> &[InspectionRecord] {
        &self.session.inspections.items
    }

    fn session_handle(&self) -> Result<(Arc<dyn DocumentStore>, String)> {
        let store = self.store.clone().ok_or(ReconcileError::NoStore)?;
        let tenant = self
            .tenant
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or(ReconcileError::NotAuthenticated)?;
        Ok((store, tenant))
    }

    fn sources_loaded(&self) -> bool {
        self.session.procurement.loaded && self.session.purchase_orders.loaded
    }

    /// 订单来源: 订单集合非空时用订单集合, 否则用采购记录
    fn order_sources(&self) -> &[SourceEntry] {
        if self.session.purchase_orders.items.is_empty() {
            &self.session.procurement_raw.items
        } else {
            &self.session.purchase_orders.items
        }
    }

    // ---------------------------------------------------------------
    // 派生缓存
    // ---------------------------------------------------------------

    pub fn live_stock(&mut self) -> Arc<LiveStockMap> {
        let s = &mut self.session;
        if s.live_stock.is_none() {
            let map = LiveStockMap::compute(&s.open_items.items, &s.closed_items.items, &s.indents.items, &s.stock.items);
            tracing::debug!("live stock rebuilt ({} entries)", map.len());
            s.live_stock = Some(Arc::new(map));
        }
        s.live_stock.clone().unwrap_or_default()
    }

    /// 匹配器: 采购订单在前, 采购记录同键覆盖
    pub fn resolver(&mut self) -> Arc<MatchResolver> {
        let s = &mut self.session;
        if s.resolver.is_none() {
            s.resolver = Some(Arc::new(MatchResolver::new(&s.purchase_orders.items, &s.procurement_raw.items)));
        }
        s.resolver.clone().unwrap_or_default()
    }

    fn closing_stock(&self, item_code: &str) -> BigDecimal {
        let code = normalize(item_code);
        self.session
            .stock
            .items
            .iter()
            .find(|r| normalize(&r.item_code) == code)
            .map(|r| r.closing_stock.clone())
            .unwrap_or_else(BigDecimal::zero)
    }

    /// 采购记录的实时库存; 表中没有时用原始请购数量与期末库存比较
    pub fn live_stock_for(&mut self, rec: &ProcurementRecord) -> LiveStock {
        if let Some(hit) = self.live_stock().get(&rec.indent_no, &rec.item_code) {
            return hit.clone();
        }
        let closing = self.closing_stock(&rec.item_code);
        let (display, is_short) = evaluate(&rec.original_indent_qty, &closing);
        LiveStock {
            display,
            is_short,
            status: rec.indent_status,
        }
    }

    /// 按 `(indentNo, itemCode)` 查询: 实时库存表 > 同键采购记录 > 期末库存
    pub fn live_stock_lookup(&mut self, indent_no: &str, item_code: &str) -> LiveStock {
        if let Some(hit) = self.live_stock().get(indent_no, item_code) {
            return hit.clone();
        }
        let key = composite_key(indent_no, item_code);
        let record = self
            .session
            .procurement
            .items
            .iter()
            .find(|r| composite_key(&r.indent_no, &r.item_code) == key)
            .cloned();
        match record {
            Some(rec) => self.live_stock_for(&rec),
            None => LiveStock {
                display: self.closing_stock(item_code),
                is_short: false,
                status: IndentStatus::Open,
            },
        }
    }

    pub fn match_details(&mut self, po_no: &str, indent_no: &str, item_code: &str) -> MatchDetails {
        self.resolver().explain(po_no, indent_no, item_code)
    }

    pub fn next_batch_code(&self) -> String {
        self.batch_codes.next_for(&self.session.receipts.items)
    }

    pub fn purchase_actuals(&self) -> Vec<PurchaseActual> {
        purchase_actuals(&self.session.receipts.items, &self.session.stock.items)
    }

    fn item_code_for(&self, item_name: &str) -> Option<String> {
        let name = item_name.trim();
        self.session
            .item_master
            .items
            .iter()
            .find(|m| m.item_name.trim() == name && !m.item_code.trim().is_empty())
            .map(|m| m.item_code.clone())
    }

    // ---------------------------------------------------------------
    // 快照
    // ---------------------------------------------------------------

    /// 替换一个集合的副本并作废依赖它的缓存 (同步, 不写库)
    pub fn ingest(&mut self, collection: Collection, docs: &[Document]) {
        let s = &mut self.session;
        match collection {
            Collection::PurchaseData => {
                s.procurement.set(dedupe_procurement(decode_records(collection, docs)));
                s.procurement_raw.set(decode_plain(collection, docs));
                s.resolver = None;
            }
            Collection::PurchaseOrders => {
                s.purchase_orders.set(decode_plain(collection, docs));
                s.resolver = None;
            }
            Collection::PsirData => {
                // 同一订单可以有多张收货单 (分批到货), 以文档 id 区分, 不去重
                let receipts: Vec<ReceiptRecord> = decode_records(collection, docs);
                if !s.tracker_seeded {
                    s.tracker.seed(&receipts);
                    s.tracker_seeded = true;
                }
                s.receipts.set(receipts);
            }
            Collection::VsirData => {
                s.inspections.set(dedupe_inspections(decode_records(collection, docs)));
            }
            Collection::OpenIndentItems => {
                s.open_items.set(decode_plain(collection, docs));
                s.live_stock = None;
            }
            Collection::ClosedIndentItems => {
                s.closed_items.set(decode_plain(collection, docs));
                s.live_stock = None;
            }
            Collection::IndentData => {
                s.indents.set(decode_plain(collection, docs));
                s.live_stock = None;
            }
            Collection::StockRecords => {
                s.stock.set(decode_plain(collection, docs));
                s.live_stock = None;
            }
            Collection::ItemMaster => {
                s.item_master.set(decode_plain(collection, docs));
            }
        }
        tracing::debug!("ingested {} ({} documents)", collection, docs.len());
    }

    /// 收到一个集合的新快照: 替换副本后执行反应
    pub async fn apply_snapshot(&mut self, collection: Collection, docs: &[Document]) -> Result<Reactions> {
        self.ingest(collection, docs);
        self.react(&[collection]).await
    }

    /// 读取全部集合后统一执行一轮反应
    pub async fn load_all(&mut self) -> Result<Reactions> {
        let (store, tenant) = self.session_handle()?;
        for collection in Collection::ALL {
            let docs = store.list(&tenant, collection).await?;
            self.ingest(collection, &docs);
        }
        tracing::info!(
            "会话已加载: 采购记录 {}, 收货单 {}, 检验记录 {}",
            self.session.procurement.items.len(),
            self.session.receipts.items.len(),
            self.session.inspections.items.len()
        );
        self.react(&Collection::ALL).await
    }

    /// 重新读取一个集合 (自身写入之后)
    async fn refresh(&mut self, collection: Collection) -> Result<()> {
        let (store, tenant) = self.session_handle()?;
        let docs = store.list(&tenant, collection).await?;
        self.ingest(collection, &docs);
        Ok(())
    }

    /// 按变化的集合执行反应, 最后发布对应的变更事件
    pub async fn react(&mut self, changed: &[Collection]) -> Result<Reactions> {
        use Collection::*;
        let mut out = Reactions::default();

        if touches(changed, &[PsirData]) && self.session.receipts.loaded {
            out.empty_receipts_removed = self.purge_empty_receipts().await?;
        }

        let sweep_inputs = [PurchaseData, PurchaseOrders, PsirData, VsirData, OpenIndentItems, ClosedIndentItems];
        if touches(changed, &sweep_inputs) && self.sweep_ready() {
            out.swept = self.reconcile_orphans().await?.len();
        }

        if touches(changed, &[PsirData, PurchaseData])
            && self.session.receipts.loaded
            && !self.session.receipts.items.is_empty()
            && !self.session.procurement.items.is_empty()
        {
            let (updated, dirty) = apply_receipts(&self.session.procurement.items, &self.session.receipts.items);
            if dirty {
                self.persist_procurement(updated).await?;
                out.receipts_synced = true;
            }
        }

        if touches(changed, &[OpenIndentItems, ClosedIndentItems]) && !self.session.procurement.items.is_empty() {
            let (updated, dirty) = apply_indent_update(
                &self.session.procurement.items,
                &self.session.open_items.items,
                &self.session.closed_items.items,
            );
            if dirty {
                self.persist_procurement(updated).await?;
                out.indents_synced = true;
            }
        }

        if touches(changed, &[PsirData, PurchaseData, PurchaseOrders])
            && self.session.receipts.loaded
            && self.sources_loaded()
        {
            out.order_qty_refreshed = self.refresh_order_cache().await?;
        }

        if self.session.receipts.loaded && self.sources_loaded() && !self.session.repair.is_done() {
            out.repaired_lines = self.repair_receipts().await?.restored_lines;
        }

        self.publish_changes(changed);
        Ok(out)
    }

    fn publish_changes(&self, changed: &[Collection]) {
        let s = &self.session;
        if touches(changed, &[Collection::PurchaseData]) {
            self.bus.publish(&ChangeEvent::ProcurementOrdersChanged {
                records: Arc::new(s.procurement.items.clone()),
            });
        }
        if touches(changed, &[Collection::PsirData]) {
            self.bus.publish(&ChangeEvent::ReceiptsChanged {
                receipts: Arc::new(s.receipts.items.clone()),
            });
        }
        if touches(changed, &[Collection::OpenIndentItems, Collection::ClosedIndentItems]) {
            self.bus.publish(&ChangeEvent::IndentsChanged {
                open: Arc::new(s.open_items.items.clone()),
                closed: Arc::new(s.closed_items.items.clone()),
            });
        }
    }

    /// 订阅全部集合, 把快照送进引擎, 直到所有订阅关闭
    pub async fn run(engine: Arc<Mutex<Self>>) -> Result<()> {
        let (store, tenant) = engine.lock().await.session_handle()?;
        let mut receivers = Vec::with_capacity(Collection::ALL.len());
        for collection in Collection::ALL {
            receivers.push((collection, store.subscribe(&tenant, collection).await?));
        }

        {
            let mut guard = engine.lock().await;
            for (collection, rx) in receivers.iter_mut() {
                let snapshot = rx.borrow_and_update().clone();
                guard.ingest(*collection, &snapshot);
            }
            if let Err(e) = guard.react(&Collection::ALL).await {
                tracing::error!("初始对账失败: {}", e);
            }
        }
        tracing::info!("session driver started for tenant {}", tenant);

        while !receivers.is_empty() {
            let ((collection, changed), idx, _) = futures::future::select_all(
                receivers
                    .iter_mut()
                    .map(|(c, rx)| Box::pin(async move { (*c, rx.changed().await) })),
            )
            .await;
            if changed.is_err() {
                tracing::warn!("subscription to {} closed", collection);
                receivers.remove(idx);
                continue;
            }
            let snapshot = receivers[idx].1.borrow_and_update().clone();
            let mut guard = engine.lock().await;
            if let Err(e) = guard.apply_snapshot(collection, &snapshot).await {
                tracing::error!("处理 {} 快照失败: {}", collection, e);
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // 孤儿清理 / 导入 / 修复
    // ---------------------------------------------------------------

    fn sweep_ready(&self) -> bool {
        let s = &self.session;
        (s.receipts.loaded || s.inspections.loaded)
            && self.sources_loaded()
            && !(s.procurement_raw.items.is_empty() && s.purchase_orders.items.is_empty())
    }

    /// 删除没有明细的收货单并登记墓碑, 返回删除数
    async fn purge_empty_receipts(&mut self) -> Result<usize> {
        let (store, tenant) = self.session_handle()?;
        let empty: Vec<(String, String)> = self
            .session
            .receipts
            .items
            .iter()
            .filter(|r| r.is_empty())
            .filter_map(|r| Some((r.id.clone()?, order_key(&r.po_no, &r.indent_no))))
            .collect();
        if empty.is_empty() {
            return Ok(0);
        }

        let mut tally = Tally::default();
        for (id, key) in &empty {
            let result = store.delete(&tenant, Collection::PsirData, id).await;
            if tally.record("删除空收货单", result).is_some() {
                self.session.tombstones.bury(key);
                self.session.tracker.forget(key);
            }
        }
        tracing::info!("删除无明细收货单 {} 张", empty.len());

        self.refresh(Collection::PsirData).await?;
        tally.finish()
    }

    /// 删除上级订单已不存在的收货单和检验记录, 并登记墓碑
    pub async fn reconcile_orphans(&mut self) -> Result<OrphanSweep> {
        let (store, tenant) = self.session_handle()?;
        if !self.sweep_ready() {
            tracing::debug!("orphan sweep skipped: sources not loaded or empty");
            return Ok(OrphanSweep::default());
        }
        let valid = valid_order_keys(
            self.session
                .procurement_raw
                .items
                .iter()
                .chain(self.session.purchase_orders.items.iter()),
        );
        let sweep = plan_sweep(&valid, &self.session.receipts.items, &self.session.inspections.items);
        if sweep.is_empty() {
            return Ok(sweep);
        }

        let mut tally = Tally::default();
        for orphan in &sweep.receipts {
            let result = store.delete(&tenant, Collection::PsirData, &orphan.id).await;
            if tally.record("删除孤儿收货单", result).is_some() {
                self.session.tombstones.bury(&orphan.key);
                self.session.tracker.forget(&orphan.key);
            }
        }
        for orphan in &sweep.inspections {
            let result = store.delete(&tenant, Collection::VsirData, &orphan.id).await;
            if tally.record("删除孤儿检验记录", result).is_some() {
                self.session.tombstones.bury(&orphan.key);
            }
        }
        tracing::info!(
            "孤儿清理: 收货单 {}, 检验记录 {}",
            sweep.receipts.len(),
            sweep.inspections.len()
        );

        self.refresh(Collection::PsirData).await?;
        self.refresh(Collection::VsirData).await?;
        tally.finish()?;
        Ok(sweep)
    }

    /// 订单 -> 收货单导入
    pub async fn import_receipts(&mut self, force: bool) -> Result<ImportSummary> {
        let (store, tenant) = self.session_handle()?;
        let resolver = self.resolver();
        let orders = self.order_sources().to_vec();
        let s = &mut self.session;
        if !s.tracker_seeded {
            s.tracker.seed(&s.receipts.items);
            s.tracker_seeded = true;
        }
        let plan = s.tracker.import_all(
            &orders,
            &s.procurement_raw.items,
            &s.receipts.items,
            &s.tombstones,
            &resolver,
            force,
        );
        let summary = plan.summary();
        if summary.is_nothing() {
            return Ok(summary);
        }

        let mut tally = Tally::default();
        for receipt in &plan.created {
            let result = match to_body(receipt) {
                Ok(body) => store.add(&tenant, Collection::PsirData, body).await,
                Err(e) => Err(e),
            };
            tally.record("新建收货单", result);
        }
        for receipt in &plan.patched {
            let Some(id) = receipt.id.as_deref() else {
                tracing::warn!("patched receipt {} has no id", receipt.po_no);
                tally.failed += 1;
                continue;
            };
            let result = match to_body(receipt) {
                Ok(body) => store.update(&tenant, Collection::PsirData, id, body).await,
                Err(e) => Err(e),
            };
            tally.record("补全收货单", result);
        }

        self.refresh(Collection::PsirData).await?;
        tally.finish()?;
        Ok(summary)
    }

    /// 请购明细 -> 采购记录导入 (手动)
    pub async fn import_indents(&mut self) -> Result<IndentImportSummary> {
        self.session_handle()?;
        if self.session.open_items.items.is_empty() && self.session.closed_items.items.is_empty() {
            return Err(ReconcileError::Validation("no indent items loaded".into()));
        }
        let live = self.live_stock();
        let s = &self.session;
        let (records, summary) =
            import_from_indents(&s.procurement.items, &s.open_items.items, &s.closed_items.items, &live);
        self.persist_procurement(records).await?;
        Ok(summary)
    }

    /// 重算收货明细的订货数量缓存, 返回更新的收货单数
    async fn refresh_order_cache(&mut self) -> Result<usize> {
        let (store, tenant) = self.session_handle()?;
        let resolver = self.resolver();
        let changed = refresh_order_quantities(&self.session.receipts.items, &resolver);
        if changed.is_empty() {
            return Ok(0);
        }
        let written = self.patch_receipt_items(&store, &tenant, &changed, "更新订货数量").await;
        self.refresh(Collection::PsirData).await?;
        written.finish()
    }

    /// 一次性修复 (闩锁); 之后的调用直接返回空结果
    pub async fn repair_receipts(&mut self) -> Result<RepairOutcome> {
        let (store, tenant) = self.session_handle()?;
        if !(self.session.receipts.loaded && self.sources_loaded()) {
            return Ok(RepairOutcome::default());
        }
        if !self.session.repair.try_enter() {
            return Ok(RepairOutcome::default());
        }
        tracing::debug!("repair latch entered");
        let resolver = self.resolver();
        let outcome = run_repair(&self.session.receipts.items, &resolver);
        if outcome.changed.is_empty() {
            return Ok(outcome);
        }
        let tally = self.patch_receipt_items(&store, &tenant, &outcome.changed, "修复收货数量").await;
        self.refresh(Collection::PsirData).await?;
        tally.finish()?;
        Ok(outcome)
    }

    async fn patch_receipt_items(
        &self,
        store: &Arc<dyn DocumentStore>,
        tenant: &str,
        receipts: &[ReceiptRecord],
        what: &str,
    ) -> Tally {
        let mut tally = Tally::default();
        for receipt in receipts {
            let Some(id) = receipt.id.as_deref() else {
                tally.failed += 1;
                continue;
            };
            let result = match items_patch(receipt) {
                Ok(patch) => store.update(tenant, Collection::PsirData, id, patch).await,
                Err(e) => Err(e),
            };
            tally.record(what, result);
        }
        tally
    }

    // ---------------------------------------------------------------
    // 收货单维护
    // ---------------------------------------------------------------

    fn prepare_receipt(&mut self, receipt: &mut ReceiptRecord) -> Result<()> {
        let missing = receipt.missing_header_fields();
        if !missing.is_empty() {
            return Err(ReconcileError::Validation(format!("missing fields: {}", missing.join(", "))));
        }
        let resolver = self.resolver();
        for line in receipt.items.iter_mut() {
            if line.item_code.trim().is_empty() {
                if let Some(code) = self.item_code_for(&line.item_name) {
                    line.item_code = code;
                }
            }
            if line.qty_received <= BigDecimal::zero() {
                line.qty_received = &line.ok_qty + &line.reject_qty;
            }
            line.po_qty = Some(resolver.resolve(&receipt.po_no, &receipt.indent_no, &line.item_code));
        }
        Ok(())
    }

    pub async fn add_receipt(&mut self, mut receipt: ReceiptRecord) -> Result<String> {
        let (store, tenant) = self.session_handle()?;
        self.prepare_receipt(&mut receipt)?;
        if receipt.batch_no.trim().is_empty() {
            receipt.batch_no = self.next_batch_code();
        }
        let id = store.add(&tenant, Collection::PsirData, to_body(&receipt)?).await?;
        self.session.tracker.mark(&order_key(&receipt.po_no, &receipt.indent_no));
        tracing::info!("新增收货单 {} (批次 {})", receipt.po_no, receipt.batch_no);
        self.refresh(Collection::PsirData).await?;
        Ok(id)
    }

    pub async fn update_receipt(&mut self, mut receipt: ReceiptRecord) -> Result<()> {
        let (store, tenant) = self.session_handle()?;
        let id = receipt.id.clone().ok_or(ReconcileError::MissingId)?;
        self.prepare_receipt(&mut receipt)?;
        store.update(&tenant, Collection::PsirData, &id, to_body(&receipt)?).await?;
        self.refresh(Collection::PsirData).await
    }

    /// 删除一行明细; 收货单因此变空时整张删除并登记墓碑
    pub async fn delete_receipt_line(&mut self, id: &str, index: usize) -> Result<()> {
        let (store, tenant) = self.session_handle()?;
        if id.trim().is_empty() {
            return Err(ReconcileError::MissingId);
        }
        let mut receipt = self
            .session
            .receipts
            .items
            .iter()
            .find(|r| r.id.as_deref() == Some(id))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                collection: Collection::PsirData.name().to_string(),
                id: id.to_string(),
            })?;
        if index >= receipt.items.len() {
            return Err(ReconcileError::Validation(format!(
                "line {} out of range ({} lines)",
                index,
                receipt.items.len()
            )));
        }
        receipt.items.remove(index);

        if receipt.is_empty() {
            let key = order_key(&receipt.po_no, &receipt.indent_no);
            store.delete(&tenant, Collection::PsirData, id).await?;
            self.session.tombstones.bury(&key);
            self.session.tracker.forget(&key);
            tracing::info!("收货单 {} 已无明细, 删除并登记墓碑", key);
        } else {
            store.update(&tenant, Collection::PsirData, id, items_patch(&receipt)?).await?;
        }
        self.refresh(Collection::PsirData).await
    }

    pub async fn delete_inspection(&mut self, id: &str) -> Result<()> {
        let (store, tenant) = self.session_handle()?;
        if id.trim().is_empty() {
            return Err(ReconcileError::MissingId);
        }
        store.delete(&tenant, Collection::VsirData, id).await?;
        self.refresh(Collection::VsirData).await
    }

    // ---------------------------------------------------------------
    // 采购记录维护
    // ---------------------------------------------------------------

    fn validate_procurement(rec: &ProcurementRecord) -> Result<()> {
        let mut missing = Vec::new();
        if rec.po_no.trim().is_empty() {
            missing.push("poNo");
        }
        if rec.supplier_name.trim().is_empty() {
            missing.push("supplierName");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ReconcileError::Validation(format!("missing fields: {}", missing.join(", "))))
        }
    }

    /// 采购数量: 开放状态取实时库存显示值, 否则 0
    fn with_purchase_qty(&mut self, mut rec: ProcurementRecord) -> ProcurementRecord {
        rec.purchase_qty = if rec.indent_status.is_open() {
            self.live_stock_for(&rec).display
        } else {
            BigDecimal::zero()
        };
        rec
    }

    pub async fn add_procurement(&mut self, rec: ProcurementRecord) -> Result<Vec<ProcurementRecord>> {
        self.session_handle()?;
        Self::validate_procurement(&rec)?;
        let rec = self.with_purchase_qty(rec);
        let mut records = self.session.procurement.items.clone();
        records.push(rec);
        self.persist_procurement(records).await
    }

    pub async fn update_procurement(&mut self, index: usize, rec: ProcurementRecord) -> Result<Vec<ProcurementRecord>> {
        self.session_handle()?;
        if index >= self.session.procurement.items.len() {
            return Err(ReconcileError::Validation(format!("procurement index {} out of range", index)));
        }
        Self::validate_procurement(&rec)?;
        let rec = self.with_purchase_qty(rec);
        let mut records = self.session.procurement.items.clone();
        records[index] = rec;
        self.persist_procurement(records).await
    }

    pub async fn delete_procurement(&mut self, index: usize) -> Result<Vec<ProcurementRecord>> {
        self.session_handle()?;
        if index >= self.session.procurement.items.len() {
            return Err(ReconcileError::Validation(format!("procurement index {} out of range", index)));
        }
        let mut records = self.session.procurement.items.clone();
        records.remove(index);
        self.persist_procurement(records).await
    }

    /// 去重后覆盖采购记录及其订单镜像, 并发布变更事件
    async fn persist_procurement(&mut self, records: Vec<ProcurementRecord>) -> Result<Vec<ProcurementRecord>> {
        let (store, tenant) = self.session_handle()?;
        let deduped = dedupe_procurement(records);
        let bodies = deduped.iter().map(to_body).collect::<std::result::Result<Vec<_>, _>>()?;

        store
            .replace_collection(&tenant, Collection::PurchaseData, bodies.clone())
            .await?;
        if let Err(e) = store.replace_collection(&tenant, Collection::PurchaseOrders, bodies).await {
            tracing::error!("采购订单镜像写入失败: {}", e);
            self.refresh(Collection::PurchaseData).await?;
            return Err(ReconcileError::PartialBatch { written: 1, failed: 1 });
        }
        tracing::info!("采购记录已保存: {} 条", deduped.len());

        self.refresh(Collection::PurchaseData).await?;
        self.refresh(Collection::PurchaseOrders).await?;
        self.bus.publish(&ChangeEvent::ProcurementOrdersChanged {
            records: Arc::new(self.session.procurement.items.clone()),
        });
        Ok(self.session.procurement.items.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::ReceiptLine;
    use serde_json::json;

    fn body(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn engine_with(store: Arc<MemoryStore>) -> ReconciliationEngine {
        ReconciliationEngine::with_store(store, "t1", ChangePropagator::new())
            .with_batch_codes(BatchCodeAllocator::for_year(2024))
    }

    #[tokio::test]
    async fn preconditions_are_distinguished_before_store_access() {
        let mut detached = ReconciliationEngine::new(ChangePropagator::new());
        assert!(matches!(detached.import_receipts(false).await, Err(ReconcileError::NoStore)));

        let mut anonymous =
            ReconciliationEngine::with_store(Arc::new(MemoryStore::new()), " ", ChangePropagator::new());
        assert!(matches!(anonymous.delete_inspection("x").await, Err(ReconcileError::NotAuthenticated)));

        let mut engine = engine_with(Arc::new(MemoryStore::new()));
        let err = engine.update_receipt(ReceiptRecord::default()).await.unwrap_err();
        assert!(matches!(err, ReconcileError::MissingId));
        assert!(err.is_precondition());

        let err = engine
            .add_receipt(ReceiptRecord {
                po_no: "PO-1".into(),
                ..ReceiptRecord::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Validation(_)));
    }

    #[tokio::test]
    async fn add_receipt_assigns_batch_code_and_order_qty() {
        let store = Arc::new(MemoryStore::new());
        store.seed(
            "t1",
            Collection::PurchaseOrders,
            vec![
                body(json!({ "poNo": "PO-0", "itemCode": "Z" })),
                body(json!({ "poNo": "PO-1", "itemCode": "A1", "purchaseQty": 12 })),
            ],
        );
        store.seed("t1", Collection::PsirData, vec![body(json!({ "poNo": "PO-0", "batchNo": "24/P4", "items": [{ "itemCode": "Z" }] }))]);
        store.seed("t1", Collection::ItemMaster, vec![body(json!({ "itemName": "Bolt", "itemCode": "A1" }))]);
        let mut engine = engine_with(store);
        engine.load_all().await.unwrap();

        let receipt = ReceiptRecord {
            received_date: "2024-06-01".into(),
            indent_no: "IND-1".into(),
            po_no: "PO-1".into(),
            invoice_no: "INV-1".into(),
            supplier_name: "Acme".into(),
            items: vec![ReceiptLine {
                ok_qty: BigDecimal::from(8),
                reject_qty: BigDecimal::from(2),
                ..ReceiptLine::blank("Bolt", "")
            }],
            ..ReceiptRecord::default()
        };
        engine.add_receipt(receipt).await.unwrap();

        let saved = engine.receipts().iter().find(|r| r.po_no == "PO-1").unwrap();
        assert_eq!(saved.batch_no, "24/P5");
        assert_eq!(saved.items[0].item_code, "A1");
        assert_eq!(saved.items[0].qty_received, BigDecimal::from(10));
        assert_eq!(saved.items[0].po_qty, Some(BigDecimal::from(12)));
    }

    #[tokio::test]
    async fn several_receipts_for_one_order_all_stay_visible() {
        let store = Arc::new(MemoryStore::new());
        let ids = store.seed(
            "t1",
            Collection::PsirData,
            vec![
                body(json!({ "poNo": "PO-1", "batchNo": "24/P3", "items": [{ "itemName": "Bolt", "itemCode": "A1", "okQty": 5 }] })),
                body(json!({ "poNo": "PO-1", "batchNo": "24/P9", "items": [{ "itemName": "Bolt", "itemCode": "A1", "okQty": 7 }] })),
            ],
        );
        store.seed("t1", Collection::StockRecords, vec![body(json!({ "itemName": "Bolt", "itemCode": "A1" }))]);
        let mut engine = engine_with(store);
        engine.load_all().await.unwrap();

        assert_eq!(engine.receipts().len(), 2);
        assert_eq!(engine.purchase_actuals()[0].ok_total, BigDecimal::from(12));
        assert_eq!(engine.next_batch_code(), "24/P10");

        engine.delete_receipt_line(&ids[1], 0).await.unwrap();
        assert_eq!(engine.receipts().len(), 1);
        assert_eq!(engine.receipts()[0].batch_no, "24/P3");
    }

    #[tokio::test]
    async fn receipt_without_lines_is_deleted_on_load() {
        let store = Arc::new(MemoryStore::new());
        store.seed(
            "t1",
            Collection::PurchaseOrders,
            vec![
                body(json!({ "poNo": "PO-1", "itemCode": "A1" })),
                body(json!({ "poNo": "PO-2", "itemCode": "B1" })),
            ],
        );
        store.seed(
            "t1",
            Collection::PsirData,
            vec![
                body(json!({ "poNo": "PO-1", "items": [{ "itemCode": "A1" }] })),
                body(json!({ "poNo": "PO-2", "items": [] })),
            ],
        );
        let mut engine = engine_with(Arc::clone(&store));
        let reactions = engine.load_all().await.unwrap();

        assert_eq!(reactions.empty_receipts_removed, 1);
        assert_eq!(store.list("t1", Collection::PsirData).await.unwrap().len(), 1);
        assert!(engine.tombstones().contains("PO-2"));
        assert!(engine.import_receipts(false).await.unwrap().is_nothing());
    }

    #[tokio::test]
    async fn deleting_last_line_removes_receipt_and_tombstones_it() {
        let store = Arc::new(MemoryStore::new());
        let ids = store.seed(
            "t1",
            Collection::PsirData,
            vec![body(json!({ "poNo": "PO-5", "items": [{ "itemCode": "A1" }] }))],
        );
        let mut engine = engine_with(store);
        engine.load_all().await.unwrap();

        engine.delete_receipt_line(&ids[0], 0).await.unwrap();
        assert!(engine.receipts().is_empty());
        assert!(engine.tombstones().contains("PO-5"));
    }

    #[tokio::test]
    async fn manual_procurement_requires_po_and_supplier_and_mirrors_orders() {
        let store = Arc::new(MemoryStore::new());
        store.seed("t1", Collection::StockRecords, vec![body(json!({ "itemCode": "A1", "closingStock": 5 }))]);
        let mut engine = engine_with(Arc::clone(&store));
        engine.load_all().await.unwrap();

        let rec = ProcurementRecord {
            indent_no: "IND-1".into(),
            item_code: "A1".into(),
            original_indent_qty: BigDecimal::from(20),
            ..ProcurementRecord::default()
        };
        let err = engine.add_procurement(rec.clone()).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Validation(_)));

        let saved = engine
            .add_procurement(ProcurementRecord {
                po_no: "PO-1".into(),
                supplier_name: "Acme".into(),
                ..rec
            })
            .await
            .unwrap();
        assert_eq!(saved[0].purchase_qty, BigDecimal::from(15));
        assert_eq!(store.list("t1", Collection::PurchaseOrders).await.unwrap().len(), 1);
    }
}
