pub mod actuals;
pub mod batch_code;
pub mod dedupe;
pub mod engine;
pub mod events;
pub mod import;
pub mod indent_import;
pub mod keys;
pub mod live_stock;
pub mod orphans;
pub mod repair;
pub mod resolver;
pub mod sync;

pub use batch_code::BatchCodeAllocator;
pub use engine::{Reactions, ReconciliationEngine};
pub use events::{ChangeEvent, ChangePropagator, EventKind, Subscription};
pub use live_stock::LiveStockMap;
pub use resolver::MatchResolver;
