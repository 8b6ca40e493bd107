use thiserror::Error;

/// 文档库错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Backend(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("store operation timed out after {0}s")]
    Timeout(u64),
}

/// 对账引擎错误
///
/// 前四种是前置条件失败, 在访问文档库之前就被拒绝, 调用方可以逐一区分。
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("no document store attached")]
    NoStore,

    #[error("no authenticated tenant")]
    NotAuthenticated,

    #[error("record has no id")]
    MissingId,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// 批量写入是尽力而为: 已写入的记录不会回滚
    #[error("bulk write partially failed: {written} written, {failed} failed")]
    PartialBatch { written: usize, failed: usize },
}

impl ReconcileError {
    /// 前置条件失败 (未触达文档库)
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            ReconcileError::NoStore
                | ReconcileError::NotAuthenticated
                | ReconcileError::MissingId
                | ReconcileError::Validation(_)
        )
    }
}

pub type Result<T, E = ReconcileError> = std::result::Result<T, E>;
