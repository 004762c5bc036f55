use super::account::Account;
use super::error::LotError;
use super::events::{AcquisitionEvent, LotId};
use super::method::AccountingMethod;
use chrono::{DateTime, FixedOffset};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};

/// Bookkeeping for one lot inside a pool
#[derive(Debug, Clone)]
pub(crate) struct PoolEntry {
    pub(crate) lot: LotId,
    pub(crate) event_id: String,
    pub(crate) timestamp: DateTime<FixedOffset>,
    pub(crate) unit_price: Decimal,
    pub(crate) total: Decimal,
    pub(crate) remaining: Decimal,
    /// Insertion order, the last resort tie-break
    pub(crate) seq: usize,
}

/// A slice of a lot consumed by an outflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fraction {
    pub lot: LotId,
    pub amount: Decimal,
    /// What was left on the lot before this draw
    pub remaining: Decimal,
}

/// Result of drawing an amount from a pool. `shortfall` is zero when fully covered.
#[derive(Debug, Clone, Default)]
pub struct Take {
    pub fractions: Vec<Fraction>,
    pub shortfall: Decimal,
}

impl Take {
    pub fn is_covered(&self) -> bool {
        self.shortfall.is_zero()
    }
}

/// Remaining-amount bookkeeping for the lots of one account.
#[derive(Debug, Clone)]
pub struct LotPool {
    account: Account,
    asset: String,
    method: AccountingMethod,
    entries: Vec<PoolEntry>,
    positions: HashMap<LotId, usize>,
}

impl LotPool {
    pub(crate) fn new(account: Account, asset: String, method: AccountingMethod) -> Self {
        LotPool {
            account,
            asset,
            method,
            entries: Vec::new(),
            positions: HashMap::new(),
        }
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn asset(&self) -> &str {
        &self.asset
    }

    /// Register a lot with its full amount available.
    pub fn add_lot(&mut self, id: LotId, lot: &AcquisitionEvent) -> Result<(), LotError> {
        if lot.account != self.account || lot.asset != self.asset {
            return Err(self.internal(format!(
                "lot {} belongs to {} {}",
                lot.id, lot.account, lot.asset
            )));
        }
        if self.positions.contains_key(&id) {
            return Err(LotError::DuplicateEntry {
                asset: self.asset.clone(),
                entry: format!("lot {} in pool {}", lot.id, self.account),
            });
        }
        let seq = self.entries.len();
        self.entries.push(PoolEntry {
            lot: id,
            event_id: lot.id.clone(),
            timestamp: lot.timestamp,
            unit_price: lot.unit_price,
            total: lot.amount,
            remaining: lot.amount,
            seq,
        });
        self.positions.insert(id, seq);
        log::debug!(
            "Pool {} {} ADD: lot={} amount={} price={}",
            self.account,
            self.asset,
            lot.id,
            lot.amount,
            lot.unit_price
        );
        Ok(())
    }

    pub fn get_partial_amount(&self, id: LotId) -> Result<Decimal, LotError> {
        Ok(self.entry(id)?.remaining)
    }

    pub fn set_partial_amount(&mut self, id: LotId, amount: Decimal) -> Result<(), LotError> {
        let entry = self.entry(id)?;
        if amount < Decimal::ZERO || amount > entry.total {
            return Err(self.internal(format!(
                "partial amount {amount} out of range [0, {}] for lot {}",
                entry.total, entry.event_id
            )));
        }
        let pos = self.positions[&id];
        self.entries[pos].remaining = amount;
        Ok(())
    }

    pub fn clear_partial_amount(&mut self, id: LotId) -> Result<(), LotError> {
        self.set_partial_amount(id, Decimal::ZERO)
    }

    /// Overwrite remaining amounts in bulk. Only cycle correction does this.
    pub fn reset_partial_amounts(
        &mut self,
        method: AccountingMethod,
        amounts: &BTreeMap<LotId, Decimal>,
    ) -> Result<(), LotError> {
        if method != self.method {
            return Err(self.internal(format!(
                "pool built for {} reset under {}",
                self.method, method
            )));
        }
        for (id, amount) in amounts {
            self.set_partial_amount(*id, *amount)?;
            log::debug!(
                "Pool {} {} RESET: lot={} remaining={}",
                self.account,
                self.asset,
                self.entries[self.positions[id]].event_id,
                amount
            );
        }
        Ok(())
    }

    /// Put `amount` back on a lot whose coins came home through a transfer cycle.
    pub fn restore(&mut self, id: LotId, amount: Decimal) -> Result<(), LotError> {
        let entry = self.entry(id)?;
        let restored = entry.remaining + amount;
        if restored > entry.total {
            return Err(self.internal(format!(
                "returning {amount} to lot {} would exceed its total {}",
                entry.event_id, entry.total
            )));
        }
        self.reset_partial_amounts(self.method, &BTreeMap::from([(id, restored)]))
    }

    /// Total remaining across all lots
    pub fn available(&self) -> Decimal {
        self.entries.iter().map(|e| e.remaining).sum()
    }

    pub fn remaining_amounts(&self) -> impl Iterator<Item = (LotId, Decimal)> + '_ {
        self.entries.iter().map(|e| (e.lot, e.remaining))
    }

    pub(crate) fn entries(&self) -> &[PoolEntry] {
        &self.entries
    }

    /// Draw `amount` lot by lot in the pool's accounting order.
    pub fn take(&mut self, amount: Decimal) -> Result<Take, LotError> {
        let mut take = Take::default();
        let mut outstanding = amount;
        while outstanding > Decimal::ZERO {
            let Some((lot, remaining)) = self.method.seek_non_exhausted_lot(self, outstanding)
            else {
                take.shortfall = outstanding;
                break;
            };
            let drawn = outstanding.min(remaining);
            self.set_partial_amount(lot, remaining - drawn)?;
            outstanding -= drawn;
            take.fractions.push(Fraction {
                lot,
                amount: drawn,
                remaining,
            });
        }
        Ok(take)
    }

    fn entry(&self, id: LotId) -> Result<&PoolEntry, LotError> {
        self.positions
            .get(&id)
            .map(|pos| &self.entries[*pos])
            .ok_or_else(|| self.internal(format!("lot {id} is not in this pool")))
    }

    fn internal(&self, message: String) -> LotError {
        LotError::internal(&self.asset, Some(&self.account), message)
    }
}
