pub mod account;
pub mod engine;
pub mod error;
pub mod events;
pub mod gain_loss;
pub mod method;
pub mod pool;
pub mod resolver;

// Flat public surface for domain types and functions.
pub use account::Account;
pub use engine::{compute_all, compute_asset, AssetReport, EngineConfig};
pub use error::{LotError, Outflow};
pub use events::{
    AcquisitionEvent, AcquisitionKind, AssetEvents, DisposalEvent, LotArena, LotArenaBuilder,
    LotId, TransferEvent,
};
pub use gain_loss::{AccountGainLoss, GainLossRecord, GainLossSet, TaxableKind, Term};
pub use method::AccountingMethod;
pub use pool::LotPool;
pub use resolver::{Resolution, TransferGraphResolver};
