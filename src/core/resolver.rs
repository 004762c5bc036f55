//! Transfer graph resolution.
//!
//! Replays every event of one asset across all accounts in [`EventKey`] order.
//! Each transfer moves lot fractions from the sender's pool to the receiver,
//! either as a new synthetic lot that keeps the ancestor's cost basis, or, when
//! the coins already passed through the receiver, by putting them back on the
//! ancestor lot they left from. The output is one self-contained bundle per
//! account that [`GainLossMatcher`](super::gain_loss::GainLossMatcher) can
//! process on its own.

use super::account::Account;
use super::error::{LotError, Outflow};
use super::events::{
    AcquisitionEvent, AssetEvents, DisposalEvent, EventKey, LotArena, LotId, SyntheticOrigin,
    TransferEvent,
};
use super::method::AccountingMethod;
use super::pool::{Fraction, LotPool};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};

/// Coins put back on an ancestor lot when a transfer closes a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct LotReturn {
    pub lot: LotId,
    pub amount: Decimal,
    pub transfer_id: String,
    /// Replay position of the returning transfer
    pub key: EventKey,
}

/// Everything one account needs for independent gain/loss matching.
#[derive(Debug, Clone)]
pub struct AccountEvents {
    pub account: Account,
    pub asset: String,
    /// Genuine and synthetic lots held by this account, in arrival order
    pub acquisitions: Vec<LotId>,
    pub disposals: Vec<DisposalEvent>,
    /// Transfers sent from this account
    pub transfers: Vec<TransferEvent>,
    pub returns: Vec<LotReturn>,
}

impl AccountEvents {
    fn new(account: Account, asset: &str) -> Self {
        AccountEvents {
            account,
            asset: asset.to_string(),
            acquisitions: Vec::new(),
            disposals: Vec::new(),
            transfers: Vec::new(),
            returns: Vec::new(),
        }
    }
}

/// Output of [`TransferGraphResolver::resolve`]
#[derive(Debug, Clone)]
pub struct Resolution {
    pub asset: String,
    pub method: AccountingMethod,
    pub lots: LotArena,
    pub accounts: BTreeMap<Account, AccountEvents>,
    /// Pool state once every event has been applied
    pub pools: BTreeMap<Account, LotPool>,
}

impl Resolution {
    /// Remaining amount of a lot after all events
    pub fn remaining(&self, id: LotId) -> Decimal {
        self.lots
            .get(id)
            .and_then(|lot| self.pools.get(&lot.account))
            .and_then(|pool| pool.get_partial_amount(id).ok())
            .unwrap_or_default()
    }

    pub fn balance(&self, account: &Account) -> Decimal {
        self.pools
            .get(account)
            .map(LotPool::available)
            .unwrap_or_default()
    }

    /// Lots held by `account`, in arrival order
    pub fn lots_on<'a>(
        &'a self,
        account: &Account,
    ) -> impl Iterator<Item = (LotId, &'a AcquisitionEvent)> + 'a {
        self.accounts
            .get(account)
            .into_iter()
            .flat_map(|events| events.acquisitions.iter())
            .map(move |id| (*id, &self.lots[*id]))
    }
}

enum Step {
    Acquire(LotId),
    Dispose(usize),
    Transfer(usize),
}

/// Splits the universal event set of one asset into per-account bundles.
pub struct TransferGraphResolver {
    asset: String,
    method: AccountingMethod,
    lots: LotArena,
    pools: BTreeMap<Account, LotPool>,
    returns: BTreeMap<Account, Vec<LotReturn>>,
}

impl TransferGraphResolver {
    pub fn resolve(events: AssetEvents, method: AccountingMethod) -> Result<Resolution, LotError> {
        let AssetEvents {
            asset,
            acquisitions,
            disposals,
            transfers,
        } = events;

        let mut resolver = TransferGraphResolver {
            asset,
            method,
            lots: LotArena::default(),
            pools: BTreeMap::new(),
            returns: BTreeMap::new(),
        };
        resolver.check_ids(&acquisitions, &disposals, &transfers)?;

        let mut steps: Vec<(EventKey, Step)> = Vec::new();
        for lot in acquisitions {
            if lot.is_synthetic() {
                return Err(resolver.internal(
                    Some(&lot.account),
                    format!("input lot {} is already linked to another lot", lot.id),
                ));
            }
            let key = lot.order_key();
            steps.push((key, Step::Acquire(resolver.lots.push(lot))));
        }
        steps.extend(
            disposals
                .iter()
                .enumerate()
                .map(|(i, d)| (d.order_key(), Step::Dispose(i))),
        );
        steps.extend(
            transfers
                .iter()
                .enumerate()
                .map(|(i, t)| (t.order_key(), Step::Transfer(i))),
        );
        steps.sort_by(|a, b| a.0.cmp(&b.0));

        for (_, step) in steps {
            match step {
                Step::Acquire(id) => resolver.acquire(id)?,
                Step::Dispose(i) => resolver.dispose(&disposals[i])?,
                Step::Transfer(i) => resolver.transfer(&transfers[i])?,
            }
        }

        Ok(resolver.finish(disposals, transfers))
    }

    fn check_ids(
        &self,
        acquisitions: &[AcquisitionEvent],
        disposals: &[DisposalEvent],
        transfers: &[TransferEvent],
    ) -> Result<(), LotError> {
        let mut seen = HashSet::new();
        let events = acquisitions
            .iter()
            .map(|a| (a.id.as_str(), a.asset.as_str()))
            .chain(disposals.iter().map(|d| (d.id.as_str(), d.asset.as_str())))
            .chain(transfers.iter().map(|t| (t.id.as_str(), t.asset.as_str())));
        for (id, asset) in events {
            if asset != self.asset {
                return Err(self.internal(
                    None,
                    format!("transaction {id} is for {asset}, not {}", self.asset),
                ));
            }
            if !seen.insert(id) {
                return Err(LotError::DuplicateEntry {
                    asset: self.asset.clone(),
                    entry: format!("transaction {id}"),
                });
            }
        }
        Ok(())
    }

    fn acquire(&mut self, id: LotId) -> Result<(), LotError> {
        let lot = &self.lots[id];
        self.pools
            .entry(lot.account.clone())
            .or_insert_with(|| LotPool::new(lot.account.clone(), self.asset.clone(), self.method))
            .add_lot(id, lot)
    }

    fn dispose(&mut self, disposal: &DisposalEvent) -> Result<(), LotError> {
        let pool = self.pools.get_mut(&disposal.account).ok_or_else(|| {
            LotError::internal(
                &self.asset,
                Some(&disposal.account),
                format!(
                    "disposal {} on an account with no prior acquisition",
                    disposal.id
                ),
            )
        })?;

        let take = pool.take(disposal.amount_with_fee())?;
        if !take.is_covered() {
            return Err(LotError::InsufficientBalance {
                asset: self.asset.clone(),
                account: disposal.account.clone(),
                event_id: disposal.id.clone(),
                outflow: Outflow::Disposal,
                shortfall: take.shortfall,
            });
        }
        log::debug!(
            "Disposal {} on {}: {} drawn from {} lot(s)",
            disposal.id,
            disposal.account,
            disposal.amount_with_fee(),
            take.fractions.len()
        );
        Ok(())
    }

    fn transfer(&mut self, transfer: &TransferEvent) -> Result<(), LotError> {
        if !self.pools.contains_key(&transfer.from) {
            return Err(LotError::internal(
                &self.asset,
                Some(&transfer.from),
                format!(
                    "transfer {} from an account with no prior acquisition",
                    transfer.id
                ),
            ));
        }
        let (asset, method) = (self.asset.clone(), self.method);
        self.pools
            .entry(transfer.to.clone())
            .or_insert_with(|| LotPool::new(transfer.to.clone(), asset, method));

        let pool = self.pools.get_mut(&transfer.from).ok_or_else(|| {
            LotError::internal(&self.asset, Some(&transfer.from), "missing sending pool")
        })?;

        let available = pool.available();
        if available < transfer.sent {
            return Err(LotError::InsufficientBalance {
                asset: self.asset.clone(),
                account: transfer.from.clone(),
                event_id: transfer.id.clone(),
                outflow: Outflow::Transfer,
                shortfall: transfer.sent - available,
            });
        }

        if transfer.is_self_transfer() {
            // coins stay on their lots; only the fee leaves
            pool.take(transfer.fee())?;
            log::debug!("Self-transfer {} on {}", transfer.id, transfer.from);
            return Ok(());
        }

        let moved = pool.take(transfer.received)?;
        pool.take(transfer.fee())?;

        for (n, fraction) in moved.fractions.into_iter().enumerate() {
            self.route(transfer, n, fraction)?;
        }
        Ok(())
    }

    /// Land one drawn fraction on the receiving account.
    fn route(
        &mut self,
        transfer: &TransferEvent,
        n: usize,
        fraction: Fraction,
    ) -> Result<(), LotError> {
        let drawn = &self.lots[fraction.lot];

        if let Some(&ancestor) = drawn.originates_from.get(&transfer.to) {
            let pool = self.pools.get_mut(&transfer.to).ok_or_else(|| {
                LotError::internal(&self.asset, Some(&transfer.to), "missing receiving pool")
            })?;
            pool.restore(ancestor, fraction.amount)?;
            log::debug!(
                "Transfer {} closes a cycle: {} back on lot {} at {}",
                transfer.id,
                fraction.amount,
                self.lots[ancestor].id,
                transfer.to
            );
            self.returns
                .entry(transfer.to.clone())
                .or_default()
                .push(LotReturn {
                    lot: ancestor,
                    amount: fraction.amount,
                    transfer_id: transfer.id.clone(),
                    key: transfer.order_key(),
                });
            return Ok(());
        }

        let root = &self.lots[self.lots.root_of(fraction.lot)];
        let mut originates_from = drawn.originates_from.clone();
        originates_from.insert(transfer.from.clone(), fraction.lot);
        let synthetic = AcquisitionEvent {
            id: format!("{}#{}", transfer.id, n + 1),
            account: transfer.to.clone(),
            asset: self.asset.clone(),
            timestamp: transfer.timestamp,
            amount: fraction.amount,
            unit_price: root.unit_price,
            fee: drawn.fee_for_draw(fraction.amount, fraction.remaining),
            kind: drawn.kind,
            cost_basis_timestamp: root.cost_basis_timestamp,
            origin: Some(SyntheticOrigin {
                transfer_id: transfer.id.clone(),
                originating_lot: fraction.lot,
            }),
            originates_from,
            to_lots: BTreeMap::new(),
        };

        let ancestors: Vec<LotId> = synthetic.originates_from.values().copied().collect();
        let id = self.lots.push(synthetic);
        for ancestor in ancestors {
            self.lots[ancestor]
                .to_lots
                .entry(transfer.to.clone())
                .or_default()
                .push(id);
        }

        let lot = &self.lots[id];
        log::debug!(
            "Transfer {}: synthetic lot {} on {} amount={} price={} cost basis {}",
            transfer.id,
            lot.id,
            lot.account,
            lot.amount,
            lot.unit_price,
            lot.cost_basis_timestamp
        );
        self.pools
            .get_mut(&transfer.to)
            .ok_or_else(|| {
                LotError::internal(&self.asset, Some(&transfer.to), "missing receiving pool")
            })?
            .add_lot(id, lot)
    }

    fn finish(self, disposals: Vec<DisposalEvent>, transfers: Vec<TransferEvent>) -> Resolution {
        let TransferGraphResolver {
            asset,
            method,
            lots,
            pools,
            mut returns,
        } = self;

        let mut accounts: BTreeMap<Account, AccountEvents> = pools
            .keys()
            .map(|account| (account.clone(), AccountEvents::new(account.clone(), &asset)))
            .collect();

        let mut held: Vec<(EventKey, LotId)> =
            lots.iter().map(|(id, lot)| (lot.order_key(), id)).collect();
        held.sort();
        for (_, id) in held {
            if let Some(events) = accounts.get_mut(&lots[id].account) {
                events.acquisitions.push(id);
            }
        }
        for disposal in disposals {
            if let Some(events) = accounts.get_mut(&disposal.account) {
                events.disposals.push(disposal);
            }
        }
        for transfer in transfers {
            if let Some(events) = accounts.get_mut(&transfer.from) {
                events.transfers.push(transfer);
            }
        }
        for (account, events) in accounts.iter_mut() {
            events.returns = returns.remove(account).unwrap_or_default();
        }

        log::info!(
            "Resolved {}: {} account(s), {} lot(s) ({} synthetic)",
            asset,
            accounts.len(),
            lots.len(),
            lots.iter().filter(|(_, l)| l.is_synthetic()).count()
        );

        Resolution {
            asset,
            method,
            lots,
            accounts,
            pools,
        }
    }

    fn internal(&self, account: Option<&Account>, message: String) -> LotError {
        LotError::internal(&self.asset, account, message)
    }
}
