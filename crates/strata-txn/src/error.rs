use strata_log::LogError;
use strata_merge::MergeError;
use strata_store::StoreError;
use strata_types::TypeError;
use thiserror::Error;

use crate::transaction::{TransactionId, TransactionState};

#[derive(Debug, Error)]
pub enum TxnError {
    #[error("transaction {id} is {state}, not active")]
    NotActive {
        id: TransactionId,
        state: TransactionState,
    },

    #[error("no transaction in progress")]
    NoTransaction,

    #[error("merge error: {0}")]
    Merge(#[from] MergeError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("log error: {0}")]
    Log(#[from] LogError),

    #[error("type error: {0}")]
    Type(#[from] TypeError),
}

pub type TxnResult<T> = Result<T, TxnError>;
