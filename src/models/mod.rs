pub mod loose;
pub mod procurement;
pub mod receipt;
pub mod result;
pub mod source;
pub mod stock;

pub use procurement::{IndentStatus, ProcurementRecord};
pub use receipt::{InspectionRecord, ReceiptLine, ReceiptRecord};
pub use result::{
    ImportSummary, IndentImportSummary, LiveStock, MatchDetails, MatchStep, OrphanRef, OrphanSweep,
    PurchaseActual, RepairOutcome,
};
pub use source::{Indent, IndentItem, IndentLine, SourceEntry};
pub use stock::{ItemMasterEntry, StockRecord};
