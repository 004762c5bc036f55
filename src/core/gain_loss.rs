use super::account::Account;
use super::error::{LotError, Outflow};
use super::events::{
    AcquisitionEvent, DisposalEvent, EventKey, LotArena, LotId, TransferEvent,
};
use super::method::AccountingMethod;
use super::pool::LotPool;
use super::resolver::{AccountEvents, LotReturn};
use chrono::{DateTime, Duration, FixedOffset};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// What realized the gain or loss
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum TaxableKind {
    Disposal,
    /// The fee portion of a transfer
    TransferFee,
    /// Crypto received as income (mining, staking, interest, ...)
    Income,
}

impl fmt::Display for TaxableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaxableKind::Disposal => f.write_str("Disposal"),
            TaxableKind::TransferFee => f.write_str("TransferFee"),
            TaxableKind::Income => f.write_str("Income"),
        }
    }
}

/// The taxable event a record draws against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxableRef {
    pub kind: TaxableKind,
    pub event_id: String,
    pub timestamp: DateTime<FixedOffset>,
    /// Full crypto amount that has to be matched
    pub amount: Decimal,
    pub unit_price: Decimal,
}

impl TaxableRef {
    fn disposal(event: &DisposalEvent) -> Self {
        TaxableRef {
            kind: TaxableKind::Disposal,
            event_id: event.id.clone(),
            timestamp: event.timestamp,
            amount: event.amount_with_fee(),
            unit_price: event.unit_price,
        }
    }

    fn transfer_fee(event: &TransferEvent) -> Self {
        TaxableRef {
            kind: TaxableKind::TransferFee,
            event_id: event.id.clone(),
            timestamp: event.timestamp,
            amount: event.fee(),
            unit_price: event.unit_price,
        }
    }

    fn income(lot: &AcquisitionEvent) -> Self {
        TaxableRef {
            kind: TaxableKind::Income,
            event_id: lot.id.clone(),
            timestamp: lot.timestamp,
            amount: lot.amount,
            unit_price: lot.unit_price,
        }
    }

    fn outflow(&self) -> Outflow {
        match self.kind {
            TaxableKind::TransferFee => Outflow::Transfer,
            TaxableKind::Disposal | TaxableKind::Income => Outflow::Disposal,
        }
    }
}

/// Holding period classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Term {
    ShortTerm,
    LongTerm,
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::ShortTerm => f.write_str("Short"),
            Term::LongTerm => f.write_str("Long"),
        }
    }
}

/// The acquired lot a record consumed part of
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LotFraction {
    pub lot: LotId,
    pub event_id: String,
    /// Full amount of the lot
    pub lot_amount: Decimal,
    pub unit_price: Decimal,
    pub cost_basis_timestamp: DateTime<FixedOffset>,
    pub synthetic: bool,
}

/// One matched slice: a taxable event against at most one lot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GainLossRecord {
    pub account: Account,
    pub asset: String,
    pub taxable: TaxableRef,
    pub lot: Option<LotFraction>,
    pub crypto_amount: Decimal,
    pub fiat_proceeds: Decimal,
    pub fiat_cost_basis: Decimal,
    pub fiat_gain: Decimal,
    /// Absent for income, which has no holding period
    pub term: Option<Term>,
}

impl GainLossRecord {
    fn with_lot(
        account: &Account,
        taxable: &TaxableRef,
        id: LotId,
        lot: &AcquisitionEvent,
        amount: Decimal,
        remaining: Decimal,
        long_term: Duration,
    ) -> Self {
        let fiat_proceeds = amount * taxable.unit_price;
        let fiat_cost_basis = lot.fiat_cost_basis(amount, remaining);
        let term = if taxable.timestamp - lot.cost_basis_timestamp >= long_term {
            Term::LongTerm
        } else {
            Term::ShortTerm
        };
        GainLossRecord {
            account: account.clone(),
            asset: lot.asset.clone(),
            taxable: taxable.clone(),
            lot: Some(LotFraction {
                lot: id,
                event_id: lot.id.clone(),
                lot_amount: lot.amount,
                unit_price: lot.unit_price,
                cost_basis_timestamp: lot.cost_basis_timestamp,
                synthetic: lot.is_synthetic(),
            }),
            crypto_amount: amount,
            fiat_proceeds,
            fiat_cost_basis,
            fiat_gain: fiat_proceeds - fiat_cost_basis,
            term: Some(term),
        }
    }

    fn income(lot: &AcquisitionEvent) -> Self {
        let fiat_proceeds = lot.amount * lot.unit_price;
        GainLossRecord {
            account: lot.account.clone(),
            asset: lot.asset.clone(),
            taxable: TaxableRef::income(lot),
            lot: None,
            crypto_amount: lot.amount,
            fiat_proceeds,
            fiat_cost_basis: Decimal::ZERO,
            fiat_gain: fiat_proceeds,
            term: None,
        }
    }
}

/// Records of one account, with the conservation checks applied on insert.
#[derive(Debug, Clone)]
pub struct GainLossSet {
    account: Account,
    asset: String,
    records: Vec<GainLossRecord>,
    keys: HashSet<(TaxableKind, String, Option<LotId>)>,
    taxable_drawn: HashMap<(TaxableKind, String), Decimal>,
    lot_drawn: HashMap<LotId, Decimal>,
}

impl GainLossSet {
    pub fn new(account: Account, asset: impl Into<String>) -> Self {
        GainLossSet {
            account,
            asset: asset.into(),
            records: Vec::new(),
            keys: HashSet::new(),
            taxable_drawn: HashMap::new(),
            lot_drawn: HashMap::new(),
        }
    }

    pub fn add(&mut self, record: GainLossRecord) -> Result<(), LotError> {
        let lot_id = record.lot.as_ref().map(|l| l.lot);
        let key = (record.taxable.kind, record.taxable.event_id.clone(), lot_id);
        if self.keys.contains(&key) {
            return Err(LotError::DuplicateEntry {
                asset: self.asset.clone(),
                entry: format!(
                    "{} {} against lot {}",
                    record.taxable.kind,
                    record.taxable.event_id,
                    record.lot.as_ref().map_or("-", |l| l.event_id.as_str())
                ),
            });
        }

        let taxable_key = (record.taxable.kind, record.taxable.event_id.clone());
        let taxable_total =
            self.taxable_drawn.get(&taxable_key).copied().unwrap_or_default() + record.crypto_amount;
        if taxable_total > record.taxable.amount {
            return Err(LotError::ExhaustedTaxableEvent {
                asset: self.asset.clone(),
                account: self.account.clone(),
                event_id: record.taxable.event_id.clone(),
                amount: record.taxable.amount,
                drawn: taxable_total,
            });
        }

        if let Some(fraction) = &record.lot {
            let lot_total =
                self.lot_drawn.get(&fraction.lot).copied().unwrap_or_default() + record.crypto_amount;
            if lot_total > fraction.lot_amount {
                return Err(LotError::ExhaustedLot {
                    asset: self.asset.clone(),
                    account: self.account.clone(),
                    lot_id: fraction.event_id.clone(),
                    amount: fraction.lot_amount,
                    drawn: lot_total,
                });
            }
            self.lot_drawn.insert(fraction.lot, lot_total);
        }

        self.taxable_drawn.insert(taxable_key, taxable_total);
        self.keys.insert(key);
        self.records.push(record);
        Ok(())
    }

    pub fn records(&self) -> &[GainLossRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Crypto matched so far against one taxable event
    pub fn taxable_matched(&self, kind: TaxableKind, event_id: &str) -> Decimal {
        self.taxable_drawn
            .get(&(kind, event_id.to_string()))
            .copied()
            .unwrap_or_default()
    }

    /// Crypto drawn from a lot by taxable events
    pub fn lot_matched(&self, lot: LotId) -> Decimal {
        self.lot_drawn.get(&lot).copied().unwrap_or_default()
    }

    pub fn total_gain(&self) -> Decimal {
        self.records.iter().map(|r| r.fiat_gain).sum()
    }

    pub fn total_gain_for(&self, term: Option<Term>) -> Decimal {
        self.records
            .iter()
            .filter(|r| r.term == term)
            .map(|r| r.fiat_gain)
            .sum()
    }
}

/// Matching progress of one taxable event
#[derive(Debug, Clone, Copy)]
enum MatchState {
    CollectingFraction { outstanding: Decimal },
    EventSatisfied,
}

/// Outcome of matching one account
#[derive(Debug, Clone)]
pub struct AccountGainLoss {
    pub account: Account,
    pub asset: String,
    pub records: GainLossSet,
    /// Pool state after the replay
    pub pool: LotPool,
}

enum Step<'e> {
    Arrive(LotId),
    Return(&'e LotReturn),
    Dispose(&'e DisposalEvent),
    Send(&'e TransferEvent),
}

/// Matches the taxable events of one account against its lots.
pub struct GainLossMatcher<'a> {
    lots: &'a LotArena,
    method: AccountingMethod,
    long_term: Duration,
}

impl<'a> GainLossMatcher<'a> {
    pub fn new(lots: &'a LotArena, method: AccountingMethod, long_term: Duration) -> Self {
        GainLossMatcher {
            lots,
            method,
            long_term,
        }
    }

    /// Replay the account's events in order, producing one record per lot fraction.
    pub fn match_account(&self, events: &AccountEvents) -> Result<AccountGainLoss, LotError> {
        let mut steps: Vec<(EventKey, Step<'_>)> = Vec::new();
        for id in &events.acquisitions {
            let lot = self.lot(*id, events)?;
            if lot.account != events.account {
                return Err(LotError::internal(
                    &events.asset,
                    Some(&events.account),
                    format!("lot {} belongs to {}", lot.id, lot.account),
                ));
            }
            steps.push((lot.order_key(), Step::Arrive(*id)));
        }
        steps.extend(events.returns.iter().map(|r| (r.key.clone(), Step::Return(r))));
        steps.extend(events.disposals.iter().map(|d| (d.order_key(), Step::Dispose(d))));
        steps.extend(events.transfers.iter().map(|t| (t.order_key(), Step::Send(t))));
        steps.sort_by(|a, b| a.0.cmp(&b.0));

        let mut pool = self.method.create_lot_pool(
            events.account.clone(),
            &events.asset,
            Vec::<(LotId, &AcquisitionEvent)>::new(),
        )?;
        let mut records = GainLossSet::new(events.account.clone(), events.asset.clone());

        for (_, step) in steps {
            match step {
                Step::Arrive(id) => {
                    let lot = &self.lots[id];
                    pool.add_lot(id, lot)?;
                    if lot.kind.is_income() && !lot.is_synthetic() {
                        records.add(GainLossRecord::income(lot))?;
                    }
                }
                Step::Return(ret) => pool.restore(ret.lot, ret.amount)?,
                Step::Dispose(disposal) => {
                    let taxable = TaxableRef::disposal(disposal);
                    self.match_taxable(&mut pool, &mut records, &taxable)?;
                }
                Step::Send(transfer) => {
                    self.send(&mut pool, &mut records, transfer)?;
                }
            }
        }

        log::debug!(
            "Matched {} {}: {} records, gain {}",
            events.account,
            events.asset,
            records.records().len(),
            records.total_gain()
        );

        Ok(AccountGainLoss {
            account: events.account.clone(),
            asset: events.asset.clone(),
            records,
            pool,
        })
    }

    /// Moves the received portion out without realizing anything, then matches the fee.
    fn send(
        &self,
        pool: &mut LotPool,
        records: &mut GainLossSet,
        transfer: &TransferEvent,
    ) -> Result<(), LotError> {
        let available = pool.available();
        if available < transfer.sent {
            return Err(LotError::InsufficientBalance {
                asset: pool.asset().to_string(),
                account: pool.account().clone(),
                event_id: transfer.id.clone(),
                outflow: Outflow::Transfer,
                shortfall: transfer.sent - available,
            });
        }
        if !transfer.is_self_transfer() {
            pool.take(transfer.received)?;
        }
        self.match_taxable(pool, records, &TaxableRef::transfer_fee(transfer))
    }

    fn match_taxable(
        &self,
        pool: &mut LotPool,
        records: &mut GainLossSet,
        taxable: &TaxableRef,
    ) -> Result<(), LotError> {
        let mut state = if taxable.amount > Decimal::ZERO {
            MatchState::CollectingFraction {
                outstanding: taxable.amount,
            }
        } else {
            MatchState::EventSatisfied
        };

        while let MatchState::CollectingFraction { outstanding } = state {
            let Some((id, remaining)) = self.method.seek_non_exhausted_lot(pool, outstanding)
            else {
                return Err(LotError::InsufficientBalance {
                    asset: pool.asset().to_string(),
                    account: pool.account().clone(),
                    event_id: taxable.event_id.clone(),
                    outflow: taxable.outflow(),
                    shortfall: outstanding,
                });
            };
            self.check_ancestry(id)?;

            let drawn = outstanding.min(remaining);
            pool.set_partial_amount(id, remaining - drawn)?;
            records.add(GainLossRecord::with_lot(
                pool.account(),
                taxable,
                id,
                &self.lots[id],
                drawn,
                remaining,
                self.long_term,
            ))?;

            let outstanding = outstanding - drawn;
            state = if outstanding.is_zero() {
                MatchState::EventSatisfied
            } else {
                MatchState::CollectingFraction { outstanding }
            };
        }
        Ok(())
    }

    /// Each synthetic lot must carry a cost-basis timestamp no later than the lot it came from.
    fn check_ancestry(&self, id: LotId) -> Result<(), LotError> {
        if !self.method.requires_monotonic_cost_basis() {
            return Ok(());
        }
        let mut current = &self.lots[id];
        while let Some(parent_id) = current.originating_lot() {
            let parent = &self.lots[parent_id];
            if current.cost_basis_timestamp > parent.cost_basis_timestamp {
                return Err(LotError::InconsistentTimestamp {
                    asset: current.asset.clone(),
                    account: current.account.clone(),
                    lot_id: current.id.clone(),
                    ancestor_id: parent.id.clone(),
                });
            }
            current = parent;
        }
        Ok(())
    }

    fn lot(&self, id: LotId, events: &AccountEvents) -> Result<&'a AcquisitionEvent, LotError> {
        self.lots.get(id).ok_or_else(|| {
            LotError::internal(
                &events.asset,
                Some(&events.account),
                format!("unknown lot {id}"),
            )
        })
    }
}
