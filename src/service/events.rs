//! 进程内变更通知
//!
//! 同步分发给发布时已注册的监听者; 不缓存历史事件, 之后注册的监听者收不到 (不重放)。
//! 每个监听者单独调用: 某个监听者返回错误或 panic 不影响其余监听者。

use crate::models::{IndentItem, ProcurementRecord, ReceiptRecord};
use indexmap::IndexMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// 事件名 (封闭集合)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ProcurementOrdersChanged,
    ReceiptsChanged,
    IndentsChanged,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ProcurementOrdersChanged => "procurement-orders-changed",
            EventKind::ReceiptsChanged => "receipts-changed",
            EventKind::IndentsChanged => "indents-changed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 事件及其载荷 (发布时的完整快照)
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    ProcurementOrdersChanged { records: Arc<Vec<ProcurementRecord>> },
    ReceiptsChanged { receipts: Arc<Vec<ReceiptRecord>> },
    IndentsChanged {
        open: Arc<Vec<IndentItem>>,
        closed: Arc<Vec<IndentItem>>,
    },
}

impl ChangeEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ChangeEvent::ProcurementOrdersChanged { .. } => EventKind::ProcurementOrdersChanged,
            ChangeEvent::ReceiptsChanged { .. } => EventKind::ReceiptsChanged,
            ChangeEvent::IndentsChanged { .. } => EventKind::IndentsChanged,
        }
    }
}

pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;
type Listener = dyn Fn(&ChangeEvent) -> Result<(), ListenerError> + Send + Sync;

/// 一次发布的投递情况
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    listeners: RwLock<IndexMap<u64, (EventKind, Arc<Listener>)>>,
}

#[derive(Clone, Default)]
pub struct ChangePropagator {
    inner: Arc<Registry>,
}

impl fmt::Debug for ChangePropagator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangePropagator")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// 订阅句柄; 调用 `unsubscribe` 取消, 丢弃句柄不会取消
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut listeners = registry.listeners.write().unwrap_or_else(|e| e.into_inner());
            listeners.shift_remove(&self.id);
        }
    }
}

impl ChangePropagator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&ChangeEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let listener: Arc<Listener> = Arc::new(listener);
        let mut listeners = self.inner.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.insert(id, (kind, listener));
        Subscription {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// 同步分发; 先取监听者快照再逐个调用, 监听者内部可以再订阅或发布
    pub fn publish(&self, event: &ChangeEvent) -> Delivery {
        let kind = event.kind();
        let targets: Vec<Arc<Listener>> = {
            let listeners = self.inner.listeners.read().unwrap_or_else(|e| e.into_inner());
            listeners
                .values()
                .filter(|(k, _)| *k == kind)
                .map(|(_, l)| Arc::clone(l))
                .collect()
        };

        let mut delivery = Delivery::default();
        for listener in targets {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => delivery.delivered += 1,
                Ok(Err(e)) => {
                    tracing::warn!("listener for {} failed: {}", kind, e);
                    delivery.failed += 1;
                }
                Err(_) => {
                    tracing::error!("listener for {} panicked", kind);
                    delivery.failed += 1;
                }
            }
        }
        tracing::debug!("published {}: {:?}", kind, delivery);
        delivery
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().map(|l| l.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn receipts_event() -> ChangeEvent {
        ChangeEvent::ReceiptsChanged {
            receipts: Arc::new(Vec::new()),
        }
    }

    #[test]
    fn failing_listener_does_not_block_others() {
        let bus = ChangePropagator::new();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.subscribe(EventKind::ReceiptsChanged, |_| Err("boom".into()));
        bus.subscribe(EventKind::ReceiptsChanged, |_| panic!("listener bug"));
        let h = Arc::clone(&hits);
        bus.subscribe(EventKind::ReceiptsChanged, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let delivery = bus.publish(&receipts_event());
        assert_eq!(delivery, Delivery { delivered: 1, failed: 2 });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn late_subscriber_gets_no_replay_and_kinds_are_filtered() {
        let bus = ChangePropagator::new();
        bus.publish(&receipts_event());

        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        bus.subscribe(EventKind::ReceiptsChanged, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        bus.publish(&ChangeEvent::ProcurementOrdersChanged {
            records: Arc::new(Vec::new()),
        });
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsubscribed_listener_is_not_called() {
        let bus = ChangePropagator::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let sub = bus.subscribe(EventKind::IndentsChanged, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        sub.unsubscribe();

        let delivery = bus.publish(&ChangeEvent::IndentsChanged {
            open: Arc::new(Vec::new()),
            closed: Arc::new(Vec::new()),
        });
        assert_eq!(delivery.delivered, 0);
        assert_eq!(bus.listener_count(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
