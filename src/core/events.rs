use super::account::Account;
use super::error::LotError;
use chrono::{DateTime, FixedOffset};
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::{Index, IndexMut};

/// Stable handle of a lot inside a [`LotArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LotId(pub usize);

impl fmt::Display for LotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How an acquisition came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum AcquisitionKind {
    /// Bought with fiat or another asset
    #[default]
    Buy,
    Mining,
    Staking,
    Interest,
    Airdrop,
    /// Any other income paid in crypto
    Income,
}

impl AcquisitionKind {
    /// Income kinds are taxed at market value when received.
    pub fn is_income(self) -> bool {
        !matches!(self, AcquisitionKind::Buy)
    }
}

impl fmt::Display for AcquisitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AcquisitionKind::Buy => "Buy",
            AcquisitionKind::Mining => "Mining",
            AcquisitionKind::Staking => "Staking",
            AcquisitionKind::Interest => "Interest",
            AcquisitionKind::Airdrop => "Airdrop",
            AcquisitionKind::Income => "Income",
        };
        f.write_str(s)
    }
}

/// Processing rank of events sharing a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Rank {
    Acquisition,
    Transfer,
    Disposal,
}

/// Total order used to replay events: timestamp, then rank, then id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventKey {
    pub timestamp: DateTime<FixedOffset>,
    pub rank: Rank,
    pub id: String,
}

impl EventKey {
    pub fn new(timestamp: DateTime<FixedOffset>, rank: Rank, id: &str) -> Self {
        EventKey {
            timestamp,
            rank,
            id: id.to_string(),
        }
    }
}

/// Back-reference of a lot created on the receiving side of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticOrigin {
    pub transfer_id: String,
    pub originating_lot: LotId,
}

/// An acquired lot, either read from the ledger or created by the transfer resolver.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionEvent {
    pub id: String,
    pub account: Account,
    pub asset: String,
    /// When the lot became available on `account`
    pub timestamp: DateTime<FixedOffset>,
    pub amount: Decimal,
    pub unit_price: Decimal,
    /// Fiat fee paid on acquisition
    pub fee: Decimal,
    pub kind: AcquisitionKind,
    /// Timestamp of the earliest ancestor, used for holding periods
    pub cost_basis_timestamp: DateTime<FixedOffset>,
    pub origin: Option<SyntheticOrigin>,
    /// Every account these coins visited, mapped to the ancestor lot held there
    pub originates_from: BTreeMap<Account, LotId>,
    /// Synthetic descendants created on other accounts
    pub to_lots: BTreeMap<Account, Vec<LotId>>,
}

impl AcquisitionEvent {
    pub fn new(
        id: impl Into<String>,
        account: Account,
        asset: impl Into<String>,
        timestamp: DateTime<FixedOffset>,
        amount: Decimal,
        unit_price: Decimal,
    ) -> Self {
        AcquisitionEvent {
            id: id.into(),
            account,
            asset: asset.into(),
            timestamp,
            amount,
            unit_price,
            fee: Decimal::ZERO,
            kind: AcquisitionKind::Buy,
            cost_basis_timestamp: timestamp,
            origin: None,
            originates_from: BTreeMap::new(),
            to_lots: BTreeMap::new(),
        }
    }

    pub fn with_fee(mut self, fee: Decimal) -> Self {
        self.fee = fee;
        self
    }

    pub fn with_kind(mut self, kind: AcquisitionKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn is_synthetic(&self) -> bool {
        self.origin.is_some()
    }

    pub fn originating_lot(&self) -> Option<LotId> {
        self.origin.as_ref().map(|o| o.originating_lot)
    }

    /// Position of this lot in the replay order. Synthetic lots arrive with their transfer.
    pub fn order_key(&self) -> EventKey {
        match &self.origin {
            Some(origin) => EventKey::new(self.timestamp, Rank::Transfer, &origin.transfer_id),
            None => EventKey::new(self.timestamp, Rank::Acquisition, &self.id),
        }
    }

    /// Fiat fee attributable to `amount` units of this lot.
    pub fn prorated_fee(&self, amount: Decimal) -> Decimal {
        if self.amount.is_zero() {
            Decimal::ZERO
        } else {
            self.fee * amount / self.amount
        }
    }

    /// Fee share of drawing `amount` units while `remaining` are left on the lot.
    ///
    /// Shares are differences of the cumulative prorated fee, so the draw that
    /// empties the lot picks up whatever rounding the earlier draws left behind.
    pub fn fee_for_draw(&self, amount: Decimal, remaining: Decimal) -> Decimal {
        let consumed = self.amount - remaining;
        self.prorated_fee(consumed + amount) - self.prorated_fee(consumed)
    }

    /// Fiat cost of drawing `amount` units while `remaining` are left, fee included.
    pub fn fiat_cost_basis(&self, amount: Decimal, remaining: Decimal) -> Decimal {
        amount * self.unit_price + self.fee_for_draw(amount, remaining)
    }
}

/// Sale or other disposal of crypto from one account.
#[derive(Debug, Clone, PartialEq)]
pub struct DisposalEvent {
    pub id: String,
    pub account: Account,
    pub asset: String,
    pub timestamp: DateTime<FixedOffset>,
    /// Amount disposed, fee excluded
    pub amount: Decimal,
    /// Crypto fee paid on top of `amount`
    pub fee: Decimal,
    pub unit_price: Decimal,
}

impl DisposalEvent {
    pub fn amount_with_fee(&self) -> Decimal {
        self.amount + self.fee
    }

    pub fn order_key(&self) -> EventKey {
        EventKey::new(self.timestamp, Rank::Disposal, &self.id)
    }
}

/// Movement of crypto between two accounts of the same asset.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferEvent {
    pub id: String,
    pub from: Account,
    pub to: Account,
    pub asset: String,
    pub timestamp: DateTime<FixedOffset>,
    pub sent: Decimal,
    pub received: Decimal,
    /// Spot price used to value the fee
    pub unit_price: Decimal,
}

impl TransferEvent {
    pub fn fee(&self) -> Decimal {
        self.sent - self.received
    }

    pub fn is_self_transfer(&self) -> bool {
        self.from == self.to
    }

    pub fn order_key(&self) -> EventKey {
        EventKey::new(self.timestamp, Rank::Transfer, &self.id)
    }
}

/// All events of one asset across every account.
#[derive(Debug, Clone, Default)]
pub struct AssetEvents {
    pub asset: String,
    pub acquisitions: Vec<AcquisitionEvent>,
    pub disposals: Vec<DisposalEvent>,
    pub transfers: Vec<TransferEvent>,
}

impl AssetEvents {
    pub fn new(asset: impl Into<String>) -> Self {
        AssetEvents {
            asset: asset.into(),
            ..Default::default()
        }
    }
}

/// Flat owner of every lot of one asset. Cross references between lots are `LotId`s.
#[derive(Debug, Clone, Default)]
pub struct LotArena {
    lots: Vec<AcquisitionEvent>,
}

impl LotArena {
    pub fn push(&mut self, lot: AcquisitionEvent) -> LotId {
        self.lots.push(lot);
        LotId(self.lots.len() - 1)
    }

    pub fn get(&self, id: LotId) -> Option<&AcquisitionEvent> {
        self.lots.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.lots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (LotId, &AcquisitionEvent)> {
        self.lots.iter().enumerate().map(|(i, lot)| (LotId(i), lot))
    }

    pub fn find(&self, event_id: &str) -> Option<LotId> {
        self.lots
            .iter()
            .position(|lot| lot.id == event_id)
            .map(LotId)
    }

    /// Follow `originating_lot` links back to the genuine acquisition.
    pub fn root_of(&self, id: LotId) -> LotId {
        let mut current = id;
        // chains are acyclic: the resolver links to earlier lots, the builder checks
        while let Some(parent) = self.lots.get(current.0).and_then(|l| l.originating_lot()) {
            current = parent;
        }
        current
    }
}

impl Index<LotId> for LotArena {
    type Output = AcquisitionEvent;

    fn index(&self, id: LotId) -> &AcquisitionEvent {
        &self.lots[id.0]
    }
}

impl IndexMut<LotId> for LotArena {
    fn index_mut(&mut self, id: LotId) -> &mut AcquisitionEvent {
        &mut self.lots[id.0]
    }
}

/// Builds an arena from lots that name their originating lot by event id,
/// in any order. Links are resolved once every id is known.
#[derive(Debug, Default)]
pub struct LotArenaBuilder {
    lots: Vec<(AcquisitionEvent, Option<(String, String)>)>,
}

impl LotArenaBuilder {
    pub fn genuine(mut self, lot: AcquisitionEvent) -> Self {
        self.lots.push((lot, None));
        self
    }

    /// A lot received through `transfer_id`, descending from the lot with id `originating_id`.
    pub fn synthetic(
        mut self,
        lot: AcquisitionEvent,
        transfer_id: impl Into<String>,
        originating_id: impl Into<String>,
    ) -> Self {
        self.lots
            .push((lot, Some((transfer_id.into(), originating_id.into()))));
        self
    }

    pub fn build(self) -> Result<LotArena, LotError> {
        let mut ids: HashMap<String, LotId> = HashMap::new();
        for (i, (lot, _)) in self.lots.iter().enumerate() {
            if ids.insert(lot.id.clone(), LotId(i)).is_some() {
                return Err(LotError::DuplicateEntry {
                    asset: lot.asset.clone(),
                    entry: format!("lot {}", lot.id),
                });
            }
        }

        let mut arena = LotArena::default();
        let mut links = Vec::new();
        for (lot, link) in self.lots {
            let id = arena.push(lot);
            if let Some(link) = link {
                links.push((id, link));
            }
        }

        for (id, (transfer_id, originating_id)) in links {
            let parent = *ids.get(&originating_id).ok_or_else(|| {
                LotError::internal(
                    &arena[id].asset,
                    Some(&arena[id].account),
                    format!("lot {} references unknown lot {originating_id}", arena[id].id),
                )
            })?;
            let parent_account = arena[parent].account.clone();
            let mut originates_from = arena[parent].originates_from.clone();
            originates_from.insert(parent_account, parent);
            let to_account = arena[id].account.clone();
            for ancestor in originates_from.values() {
                arena[*ancestor]
                    .to_lots
                    .entry(to_account.clone())
                    .or_default()
                    .push(id);
            }
            let lot = &mut arena[id];
            lot.origin = Some(SyntheticOrigin {
                transfer_id,
                originating_lot: parent,
            });
            lot.originates_from = originates_from;
        }

        ensure_acyclic(&arena)?;
        Ok(arena)
    }
}

fn ensure_acyclic(arena: &LotArena) -> Result<(), LotError> {
    for (id, lot) in arena.iter() {
        let mut current = id;
        let mut steps = 0;
        while let Some(parent) = arena[current].originating_lot() {
            steps += 1;
            if steps > arena.len() {
                return Err(LotError::internal(
                    &lot.asset,
                    Some(&lot.account),
                    format!("lot {} has a cyclic originating chain", lot.id),
                ));
            }
            current = parent;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn dt(date: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(&format!("{date}T00:00:00+00:00")).unwrap()
    }

    fn lot(id: &str, account: &Account, date: &str, amount: Decimal) -> AcquisitionEvent {
        AcquisitionEvent::new(id, account.clone(), "BTC", dt(date), amount, dec!(100))
    }

    #[test]
    fn same_timestamp_orders_acquisitions_before_transfers_before_disposals() {
        let t = dt("2024-01-01");
        let mut keys = vec![
            EventKey::new(t, Rank::Disposal, "a"),
            EventKey::new(t, Rank::Transfer, "b"),
            EventKey::new(t, Rank::Acquisition, "c"),
        ];
        keys.sort();
        let ranks: Vec<_> = keys.iter().map(|k| k.rank).collect();
        assert_eq!(ranks, vec![Rank::Acquisition, Rank::Transfer, Rank::Disposal]);
    }

    #[test]
    fn prorated_fee_scales_with_amount() {
        let account = Account::new("Coinbase", "Bob");
        let lot = lot("a1", &account, "2024-01-01", dec!(10)).with_fee(dec!(20));
        assert_eq!(lot.prorated_fee(dec!(2.5)), dec!(5));
        assert_eq!(lot.fiat_cost_basis(dec!(2.5), dec!(10)), dec!(255));
    }

    #[test]
    fn fee_shares_add_up_to_the_lot_fee() {
        let account = Account::new("Coinbase", "Bob");
        let lot = lot("a1", &account, "2024-01-01", dec!(3)).with_fee(dec!(10));
        let shares: Vec<Decimal> = [dec!(3), dec!(2), dec!(1)]
            .into_iter()
            .map(|remaining| lot.fee_for_draw(dec!(1), remaining))
            .collect();
        assert_ne!(lot.prorated_fee(dec!(1)) * dec!(3), dec!(10));
        assert_eq!(shares.iter().sum::<Decimal>(), dec!(10));
    }

    #[test]
    fn builder_links_forward_references() {
        let a = Account::new("Coinbase", "Bob");
        let b = Account::new("Kraken", "Bob");
        // synthetic lot listed before the lot it descends from
        let arena = LotArenaBuilder::default()
            .synthetic(lot("s1", &b, "2024-01-02", dec!(4)), "t1", "a1")
            .genuine(lot("a1", &a, "2024-01-01", dec!(10)))
            .build()
            .unwrap();

        let s1 = arena.find("s1").unwrap();
        let a1 = arena.find("a1").unwrap();
        assert_eq!(arena[s1].originating_lot(), Some(a1));
        assert_eq!(arena[s1].originates_from.get(&a), Some(&a1));
        assert_eq!(arena[a1].to_lots.get(&b), Some(&vec![s1]));
        assert_eq!(arena.root_of(s1), a1);
    }

    #[test]
    fn builder_rejects_unknown_originating_lot() {
        let b = Account::new("Kraken", "Bob");
        let err = LotArenaBuilder::default()
            .synthetic(lot("s1", &b, "2024-01-02", dec!(4)), "t1", "missing")
            .build()
            .unwrap_err();
        assert!(matches!(err, LotError::InternalInvariant { .. }));
    }

    #[test]
    fn builder_rejects_duplicate_ids() {
        let a = Account::new("Coinbase", "Bob");
        let err = LotArenaBuilder::default()
            .genuine(lot("a1", &a, "2024-01-01", dec!(1)))
            .genuine(lot("a1", &a, "2024-01-02", dec!(1)))
            .build()
            .unwrap_err();
        assert!(matches!(err, LotError::DuplicateEntry { .. }));
    }
}
