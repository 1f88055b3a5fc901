use thiserror::Error;

use crate::chain::OutPoint;

#[derive(Error, Debug)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("wire decoding error: {0}")]
    Wire(String),

    #[error("rocksdb error: {0}")]
    Rocks(#[from] rocksdb::Error),

    #[error("previous block required")]
    NeedsPreviousBlock,

    #[error("missing previous outpoint {0:?}")]
    MissingPrevInput(OutPoint),

    #[error("unknown db type: {0}")]
    UnknownDbType(String),

    #[error("not connected to the underlying dcrd node")]
    DcrdUnconnected,

    #[error("connected dcrd node is unsuitable: {0}")]
    DcrdUnsuitable(String),

    #[error("signature count does not match input count")]
    IncorrectSigCount,

    #[error("unsupported signature type: {0}")]
    UnsupportedSignatureType(String),

    #[error("unsupported curve type: {0}")]
    UnsupportedCurveType(String),

    #[error("unable to decode script: {0}")]
    ScriptDecodeError(String),

    #[error("store tip mismatch: expected {expected:?}, got {got:?}")]
    StoreConflict {
        expected: Option<(u64, String)>,
        got: (u64, String),
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("dcrd rpc error: {0}")]
    Rpc(String),

    #[error("{0}")]
    Custom(String),
}

impl Error {
    pub fn wire(error: impl ToString) -> Error {
        Error::Wire(error.to_string())
    }

    pub fn rpc(error: impl ToString) -> Error {
        Error::Rpc(error.to_string())
    }

    pub fn custom(error: impl ToString) -> Error {
        Error::Custom(error.to_string())
    }

    /// Whether the indexer should treat this error as transient and retry
    /// the upstream call that produced it.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Rpc(_) | Error::DcrdUnconnected)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Rpc(err.to_string())
    }
}
