//! Gains command - realized gain/loss per lot fraction

use super::{format_fiat, format_quantity, LedgerArgs, OutputArgs};
use clap::Args;
use rust_decimal::Decimal;
use serde::Serialize;
use tabled::Tabled;
use taxlots::core::{AssetReport, GainLossRecord, Term};

#[derive(Args, Debug)]
pub struct GainsCommand {
    #[command(flatten)]
    ledger: LedgerArgs,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Debug, Serialize, Tabled)]
struct GainRow {
    #[tabled(rename = "Asset")]
    asset: String,
    #[tabled(rename = "Account")]
    account: String,
    #[tabled(rename = "Type")]
    #[serde(rename = "type")]
    kind: String,
    #[tabled(rename = "Transaction")]
    transaction: String,
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Lot")]
    lot: String,
    #[tabled(rename = "Acquired")]
    acquired: String,
    #[tabled(rename = "Amount")]
    amount: String,
    #[tabled(rename = "Proceeds")]
    proceeds: String,
    #[tabled(rename = "Cost Basis")]
    cost_basis: String,
    #[tabled(rename = "Gain/Loss")]
    gain: String,
    #[tabled(rename = "Term")]
    term: String,
}

impl From<&GainLossRecord> for GainRow {
    fn from(record: &GainLossRecord) -> Self {
        let lot = record.lot.as_ref();
        GainRow {
            asset: record.asset.clone(),
            account: record.account.to_string(),
            kind: record.taxable.kind.to_string(),
            transaction: record.taxable.event_id.clone(),
            date: record.taxable.timestamp.format("%Y-%m-%d").to_string(),
            lot: lot.map_or_else(|| "-".to_string(), |l| l.event_id.clone()),
            acquired: lot.map_or_else(
                || "-".to_string(),
                |l| l.cost_basis_timestamp.format("%Y-%m-%d").to_string(),
            ),
            amount: format_quantity(record.crypto_amount),
            proceeds: format_fiat(record.fiat_proceeds),
            cost_basis: format_fiat(record.fiat_cost_basis),
            gain: format_fiat(record.fiat_gain),
            term: record.term.map_or_else(|| "-".to_string(), |t| t.to_string()),
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
struct TotalRow {
    #[tabled(rename = "Asset")]
    asset: String,
    #[tabled(rename = "Short Term")]
    short_term: String,
    #[tabled(rename = "Long Term")]
    long_term: String,
    #[tabled(rename = "Income")]
    income: String,
    #[tabled(rename = "Total")]
    total: String,
}

impl From<&AssetReport> for TotalRow {
    fn from(report: &AssetReport) -> Self {
        let sum = |term: Option<Term>| -> Decimal {
            report
                .accounts
                .values()
                .map(|account| account.records.total_gain_for(term))
                .sum()
        };
        TotalRow {
            asset: report.asset().to_string(),
            short_term: format_fiat(sum(Some(Term::ShortTerm))),
            long_term: format_fiat(sum(Some(Term::LongTerm))),
            income: format_fiat(sum(None)),
            total: format_fiat(report.total_gain()),
        }
    }
}

impl GainsCommand {
    pub fn exec(&self) -> anyhow::Result<()> {
        let reports = self.ledger.compute()?;
        let rows: Vec<GainRow> = reports
            .iter()
            .flat_map(AssetReport::records)
            .map(GainRow::from)
            .collect();
        self.output.print("Gains", &rows)?;

        if self.output.is_table() && !rows.is_empty() {
            let totals: Vec<TotalRow> = reports.iter().map(TotalRow::from).collect();
            self.output.print("Totals", &totals)?;
        }
        Ok(())
    }
}
