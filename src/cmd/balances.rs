//! Balances command - what is left on each account

use super::{format_fiat, format_quantity, LedgerArgs, OutputArgs};
use clap::Args;
use rust_decimal::Decimal;
use serde::Serialize;
use tabled::Tabled;
use taxlots::core::AssetReport;

#[derive(Args, Debug)]
pub struct BalancesCommand {
    #[command(flatten)]
    ledger: LedgerArgs,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Debug, Serialize, Tabled)]
struct BalanceRow {
    #[tabled(rename = "Asset")]
    asset: String,
    #[tabled(rename = "Account")]
    account: String,
    #[tabled(rename = "Open Lots")]
    open_lots: usize,
    #[tabled(rename = "Balance")]
    balance: String,
    #[tabled(rename = "Cost Basis")]
    cost_basis: String,
}

fn balance_rows(report: &AssetReport) -> Vec<BalanceRow> {
    let resolution = &report.resolution;
    resolution
        .accounts
        .keys()
        .map(|account| {
            let (open_lots, cost_basis) = resolution
                .lots_on(account)
                .map(|(id, lot)| (resolution.remaining(id), lot))
                .filter(|(remaining, _)| !remaining.is_zero())
                .fold((0, Decimal::ZERO), |(count, cost), (remaining, lot)| {
                    (count + 1, cost + lot.fiat_cost_basis(remaining, remaining))
                });
            BalanceRow {
                asset: resolution.asset.clone(),
                account: account.to_string(),
                open_lots,
                balance: format_quantity(resolution.balance(account)),
                cost_basis: format_fiat(cost_basis),
            }
        })
        .collect()
}

impl BalancesCommand {
    pub fn exec(&self) -> anyhow::Result<()> {
        let reports = self.ledger.compute()?;
        let rows: Vec<BalanceRow> = reports.iter().flat_map(balance_rows).collect();
        self.output.print("Balances", &rows)
    }
}
