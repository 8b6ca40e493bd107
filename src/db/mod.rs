pub mod memory;
pub mod pool;
pub mod queries;
pub mod store;

pub use memory::MemoryStore;
pub use pool::create_pool;
pub use queries::PgStore;
pub use store::{Collection, Document, DocumentStore, Snapshot};
