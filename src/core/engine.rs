use super::account::Account;
use super::error::LotError;
use super::events::{AssetEvents, LotId};
use super::gain_loss::{AccountGainLoss, GainLossMatcher, GainLossRecord};
use super::method::AccountingMethod;
use super::resolver::{Resolution, TransferGraphResolver};
use chrono::Duration;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

#[cfg(feature = "parallel")]
use rayon::iter::{IntoParallelIterator, ParallelIterator};

/// Per-run settings. Built fresh for every run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub method: AccountingMethod,
    /// Minimum holding period for a long-term gain
    pub long_term: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            method: AccountingMethod::Fifo,
            long_term: Duration::days(365),
        }
    }
}

/// Everything computed for one asset
#[derive(Debug, Clone)]
pub struct AssetReport {
    pub resolution: Resolution,
    pub accounts: BTreeMap<Account, AccountGainLoss>,
}

impl AssetReport {
    pub fn asset(&self) -> &str {
        &self.resolution.asset
    }

    /// All records, account by account in replay order
    pub fn records(&self) -> impl Iterator<Item = &GainLossRecord> {
        self.accounts
            .values()
            .flat_map(|account| account.records.records())
    }

    pub fn total_gain(&self) -> Decimal {
        self.accounts
            .values()
            .map(|account| account.records.total_gain())
            .sum()
    }
}

/// Resolve transfers for one asset, then match every account independently.
pub fn compute_asset(events: AssetEvents, config: &EngineConfig) -> Result<AssetReport, LotError> {
    let resolution = TransferGraphResolver::resolve(events, config.method)?;
    let matcher = GainLossMatcher::new(&resolution.lots, config.method, config.long_term);

    let mut accounts = BTreeMap::new();
    for (account, bundle) in &resolution.accounts {
        let matched = matcher.match_account(bundle)?;
        ensure_same_remaining(&resolution, &matched)?;
        accounts.insert(account.clone(), matched);
    }

    let report = AssetReport {
        resolution,
        accounts,
    };
    log::info!(
        "{} ({}): {} gain/loss record(s), total gain {}",
        report.asset(),
        config.method,
        report.records().count(),
        report.total_gain()
    );
    Ok(report)
}

/// Run every asset. Assets share nothing, so they run in parallel when the
/// `parallel` feature is enabled. Reports come back sorted by asset, and on
/// failure the error of the first failing asset in that order is returned.
pub fn compute_all(
    mut assets: Vec<AssetEvents>,
    config: &EngineConfig,
) -> Result<Vec<AssetReport>, LotError> {
    assets.sort_by(|a, b| a.asset.cmp(&b.asset));

    #[cfg(feature = "parallel")]
    let results: Vec<Result<AssetReport, LotError>> = assets
        .into_par_iter()
        .map(|events| compute_asset(events, config))
        .collect();
    #[cfg(not(feature = "parallel"))]
    let results: Vec<Result<AssetReport, LotError>> = assets
        .into_iter()
        .map(|events| compute_asset(events, config))
        .collect();

    results.into_iter().collect()
}

/// The matcher's replay must leave every lot exactly where the resolver did.
fn ensure_same_remaining(resolution: &Resolution, matched: &AccountGainLoss) -> Result<(), LotError> {
    let replayed: BTreeMap<LotId, Decimal> = matched.pool.remaining_amounts().collect();
    let resolved: BTreeMap<LotId, Decimal> = resolution
        .pools
        .get(&matched.account)
        .map(|pool| pool.remaining_amounts().collect())
        .unwrap_or_default();
    if replayed != resolved {
        return Err(LotError::internal(
            &matched.asset,
            Some(&matched.account),
            format!("replayed lots {replayed:?} differ from resolved lots {resolved:?}"),
        ));
    }
    Ok(())
}
