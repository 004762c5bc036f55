use super::account::Account;
use super::error::LotError;
use super::events::{AcquisitionEvent, LotId};
use super::pool::{LotPool, PoolEntry};
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::fmt;

/// Order in which lots are consumed by outflows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AccountingMethod {
    /// Earliest acquisition first
    #[default]
    Fifo,
    /// Latest acquisition first
    Lifo,
    /// Highest unit price first, earliest on ties
    Hifo,
    /// Lowest unit price first, earliest on ties
    Lofo,
}

impl AccountingMethod {
    pub const ALL: [AccountingMethod; 4] = [
        AccountingMethod::Fifo,
        AccountingMethod::Lifo,
        AccountingMethod::Hifo,
        AccountingMethod::Lofo,
    ];

    pub fn create_lot_pool<'a>(
        self,
        account: Account,
        asset: &str,
        lots: impl IntoIterator<Item = (LotId, &'a AcquisitionEvent)>,
    ) -> Result<LotPool, LotError> {
        let mut pool = LotPool::new(account, asset.to_string(), self);
        for (id, lot) in lots {
            pool.add_lot(id, lot)?;
        }
        Ok(pool)
    }

    /// Next lot with something left, and how much is left on it.
    ///
    /// `None` means the pool is exhausted; callers treat that as insufficient balance.
    pub fn seek_non_exhausted_lot(
        self,
        pool: &LotPool,
        requested_amount: Decimal,
    ) -> Option<(LotId, Decimal)> {
        let entry = pool
            .entries()
            .iter()
            .filter(|e| e.remaining > Decimal::ZERO)
            .min_by(|a, b| self.compare(a, b))?;
        log::debug!(
            "{self} seek on {} for {requested_amount}: lot={} remaining={}",
            pool.account(),
            entry.event_id,
            entry.remaining
        );
        Some((entry.lot, entry.remaining))
    }

    /// FIFO and LIFO order lots by time, so a lot's cost basis may never postdate its ancestor's.
    pub fn requires_monotonic_cost_basis(self) -> bool {
        matches!(self, AccountingMethod::Fifo | AccountingMethod::Lifo)
    }

    fn compare(self, a: &PoolEntry, b: &PoolEntry) -> Ordering {
        let by_time = a.timestamp.cmp(&b.timestamp);
        let primary = match self {
            AccountingMethod::Fifo => by_time,
            AccountingMethod::Lifo => by_time.reverse(),
            AccountingMethod::Hifo => b.unit_price.cmp(&a.unit_price).then(by_time),
            AccountingMethod::Lofo => a.unit_price.cmp(&b.unit_price).then(by_time),
        };
        primary.then(a.seq.cmp(&b.seq))
    }
}

impl fmt::Display for AccountingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccountingMethod::Fifo => "FIFO",
            AccountingMethod::Lifo => "LIFO",
            AccountingMethod::Hifo => "HIFO",
            AccountingMethod::Lofo => "LOFO",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, FixedOffset};
    use rust_decimal_macros::dec;

    fn dt(date: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(&format!("{date}T00:00:00+00:00")).unwrap()
    }

    /// Lots with distinct (timestamp, price) pairs plus a price tie on 01-02/01-04.
    fn lots() -> Vec<AcquisitionEvent> {
        let account = Account::new("Coinbase", "Bob");
        [
            ("a1", "2024-01-03", dec!(120)),
            ("a2", "2024-01-01", dec!(150)),
            ("a3", "2024-01-04", dec!(130)),
            ("a4", "2024-01-02", dec!(130)),
            ("a5", "2024-01-05", dec!(90)),
        ]
        .into_iter()
        .map(|(id, date, price)| {
            AcquisitionEvent::new(id, account.clone(), "BTC", dt(date), dec!(1), price)
        })
        .collect()
    }

    /// Drain the pool one whole lot at a time and record which lot came out.
    fn draw_order(method: AccountingMethod) -> Vec<String> {
        let lots = lots();
        let mut pool = method
            .create_lot_pool(
                Account::new("Coinbase", "Bob"),
                "BTC",
                lots.iter().enumerate().map(|(i, l)| (LotId(i), l)),
            )
            .unwrap();
        let mut order = Vec::new();
        while let Some((lot, remaining)) = method.seek_non_exhausted_lot(&pool, dec!(1)) {
            assert_eq!(remaining, dec!(1));
            pool.clear_partial_amount(lot).unwrap();
            order.push(lots[lot.0].id.clone());
        }
        order
    }

    #[test]
    fn fifo_draws_earliest_first() {
        assert_eq!(draw_order(AccountingMethod::Fifo), ["a2", "a4", "a1", "a3", "a5"]);
    }

    #[test]
    fn lifo_draws_latest_first() {
        assert_eq!(draw_order(AccountingMethod::Lifo), ["a5", "a3", "a1", "a4", "a2"]);
    }

    #[test]
    fn hifo_draws_highest_price_first_earliest_on_tie() {
        assert_eq!(draw_order(AccountingMethod::Hifo), ["a2", "a4", "a3", "a1", "a5"]);
    }

    #[test]
    fn lofo_draws_lowest_price_first_earliest_on_tie() {
        assert_eq!(draw_order(AccountingMethod::Lofo), ["a5", "a1", "a4", "a3", "a2"]);
    }

    #[test]
    fn exhausted_lots_are_skipped() {
        let lots = lots();
        let mut pool = AccountingMethod::Fifo
            .create_lot_pool(
                Account::new("Coinbase", "Bob"),
                "BTC",
                lots.iter().enumerate().map(|(i, l)| (LotId(i), l)),
            )
            .unwrap();
        pool.clear_partial_amount(LotId(1)).unwrap();
        let (lot, _) = AccountingMethod::Fifo
            .seek_non_exhausted_lot(&pool, dec!(1))
            .unwrap();
        assert_eq!(lot, LotId(3));
    }

    #[test]
    fn empty_pool_has_nothing_to_seek() {
        let pool = AccountingMethod::Lofo
            .create_lot_pool(
                Account::new("Coinbase", "Bob"),
                "BTC",
                Vec::<(LotId, &AcquisitionEvent)>::new(),
            )
            .unwrap();
        assert_eq!(
            AccountingMethod::Lofo.seek_non_exhausted_lot(&pool, dec!(1)),
            None
        );
    }
}
