//! Tax lot allocation for crypto assets held across several accounts.
//!
//! [`core`](crate::core) resolves transfers between accounts into synthetic lots that keep
//! their original cost basis, then matches disposals and transfer fees against
//! lots with FIFO, LIFO, HIFO or LOFO. [`ledger`] reads the transactions.

pub mod core;
pub mod ledger;
