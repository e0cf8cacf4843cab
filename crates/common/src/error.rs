use thiserror::Error;

/// The error taxonomy shared by every crate in the workspace (spec.md §7).
/// Names are kept close to the specification's conceptual names rather than
/// to any one backend's internal error type, since multiple backends must
/// surface the same `ReplayError` variant for the same caller-visible
/// failure (§8 boundary behaviors).
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("backend cannot honor the requested implementation/variant tags: {0}")]
    UnsupportedConfiguration(String),

    #[error("operation called in the wrong lifecycle state: {0}")]
    InvalidLifecycle(String),

    #[error("snapshot handle {0} is unknown or already invalidated")]
    InvalidSnapshot(u64),

    #[error("mutation attempted on a read-only archive view")]
    ReadOnlyView,

    #[error("backend has no archive support")]
    ArchiveUnavailable,

    #[error("trace stream is corrupt: {0}")]
    CorruptTrace(String),

    #[error("trace stream ended mid-operation")]
    TruncatedTrace,

    #[error("trace stream references unknown opcode {0}")]
    UnknownOp(u8),

    #[error("backend I/O failure: {0}")]
    BackendIo(String),

    #[error("run was cancelled")]
    Cancelled,

    #[error("run exceeded its deadline")]
    Deadline,

    #[error("delta-minimization target succeeds on first execution")]
    InputDoesNotFail,

    #[error("balance underflow: address has insufficient balance to subtract {amount}")]
    BalanceUnderflow { amount: String },

    #[error("refund underflow: counter is smaller than the amount to subtract")]
    RefundUnderflow,
}

pub type ReplayResult<T> = Result<T, ReplayError>;

impl From<std::io::Error> for ReplayError {
    fn from(e: std::io::Error) -> Self {
        ReplayError::BackendIo(e.to_string())
    }
}

#[cfg(feature = "rocksdb-errors")]
impl From<rocksdb::Error> for ReplayError {
    fn from(e: rocksdb::Error) -> Self {
        ReplayError::BackendIo(e.to_string())
    }
}
