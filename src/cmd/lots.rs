//! Lots command - every lot after allocation, with its provenance

use super::{format_fiat, format_quantity, LedgerArgs, OutputArgs};
use clap::Args;
use serde::Serialize;
use tabled::Tabled;
use taxlots::core::AssetReport;

#[derive(Args, Debug)]
pub struct LotsCommand {
    #[command(flatten)]
    ledger: LedgerArgs,

    /// Hide lots with nothing left
    #[arg(long)]
    open: bool,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Debug, Serialize, Tabled)]
struct LotRow {
    #[tabled(rename = "Asset")]
    asset: String,
    #[tabled(rename = "Account")]
    account: String,
    #[tabled(rename = "Lot")]
    lot: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Arrived")]
    arrived: String,
    #[tabled(rename = "Acquired")]
    acquired: String,
    #[tabled(rename = "Amount")]
    amount: String,
    #[tabled(rename = "Remaining")]
    remaining: String,
    #[tabled(rename = "Unit Price")]
    unit_price: String,
    #[tabled(rename = "From")]
    from: String,
}

fn lot_rows(report: &AssetReport, open_only: bool) -> Vec<LotRow> {
    let resolution = &report.resolution;
    resolution
        .accounts
        .keys()
        .flat_map(|account| resolution.lots_on(account))
        .filter(|(id, _)| !open_only || !resolution.remaining(*id).is_zero())
        .map(|(id, lot)| LotRow {
            asset: lot.asset.clone(),
            account: lot.account.to_string(),
            lot: lot.id.clone(),
            kind: lot.kind.to_string(),
            arrived: lot.timestamp.format("%Y-%m-%d").to_string(),
            acquired: lot.cost_basis_timestamp.format("%Y-%m-%d").to_string(),
            amount: format_quantity(lot.amount),
            remaining: format_quantity(resolution.remaining(id)),
            unit_price: format_fiat(lot.unit_price),
            from: lot.originating_lot().map_or_else(
                || "-".to_string(),
                |parent| {
                    let parent = &resolution.lots[parent];
                    format!("{} ({})", parent.id, parent.account)
                },
            ),
        })
        .collect()
}

impl LotsCommand {
    pub fn exec(&self) -> anyhow::Result<()> {
        let reports = self.ledger.compute()?;
        let rows: Vec<LotRow> = reports
            .iter()
            .flat_map(|report| lot_rows(report, self.open))
            .collect();
        self.output.print("Lots", &rows)
    }
}
