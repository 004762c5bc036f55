use super::account::Account;
use rust_decimal::Decimal;
use std::fmt;

/// What an outflow was trying to do when the balance ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outflow {
    Disposal,
    Transfer,
}

impl fmt::Display for Outflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outflow::Disposal => f.write_str("cover out transaction"),
            Outflow::Transfer => f.write_str("send funds"),
        }
    }
}

/// Errors raised while allocating lots. All of them abort the run for the asset.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LotError {
    #[error("{asset}: insufficient balance on {account} to {outflow} (transaction {event_id}): short by {shortfall}")]
    InsufficientBalance {
        asset: String,
        account: Account,
        event_id: String,
        outflow: Outflow,
        shortfall: Decimal,
    },
    #[error("{asset}: entry already added: {entry}")]
    DuplicateEntry { asset: String, entry: String },
    #[error("{asset}: lot amount exceeded on {account}: lot {lot_id} holds {amount}, {drawn} drawn")]
    ExhaustedLot {
        asset: String,
        account: Account,
        lot_id: String,
        amount: Decimal,
        drawn: Decimal,
    },
    #[error("{asset}: taxable amount exceeded on {account}: transaction {event_id} is {amount}, {drawn} drawn")]
    ExhaustedTaxableEvent {
        asset: String,
        account: Account,
        event_id: String,
        amount: Decimal,
        drawn: Decimal,
    },
    #[error("{asset}: timestamp of lot {lot_id} on {account} incompatible with ancestor {ancestor_id}")]
    InconsistentTimestamp {
        asset: String,
        account: Account,
        lot_id: String,
        ancestor_id: String,
    },
    #[error("{asset}: internal error{}: {message}", .account.as_ref().map(|a| format!(" on {a}")).unwrap_or_default())]
    InternalInvariant {
        asset: String,
        account: Option<Account>,
        message: String,
    },
}

impl LotError {
    pub fn internal(asset: &str, account: Option<&Account>, message: impl Into<String>) -> Self {
        LotError::InternalInvariant {
            asset: asset.to_string(),
            account: account.cloned(),
            message: message.into(),
        }
    }
}
