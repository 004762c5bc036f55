pub mod balances;
pub mod gains;
pub mod lots;
pub mod schema;

use chrono::{Duration, NaiveDate};
use clap::{Args, ValueEnum};
use rust_decimal::Decimal;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};
use taxlots::core::{compute_all, AccountingMethod, AssetReport, EngineConfig};
use taxlots::ledger::{self, ConversionOptions, LedgerInput};

/// Input and engine options shared by the reporting commands
#[derive(Args, Debug)]
pub struct LedgerArgs {
    /// Ledger file (JSON, or CSV with a .csv extension). Reads JSON from stdin if not specified.
    #[arg(default_value = "-")]
    file: PathBuf,

    /// Order in which lots are consumed
    #[arg(short, long, value_enum, default_value = "fifo")]
    method: MethodArg,

    /// Filter by asset (e.g., BTC, ETH)
    #[arg(short, long)]
    asset: Option<String>,

    /// Ignore transactions before this date (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,

    /// Ignore transactions after this date (YYYY-MM-DD)
    #[arg(long)]
    to: Option<NaiveDate>,

    /// Holding period in days for a gain to count as long-term
    #[arg(long, default_value_t = 365)]
    long_term_days: i64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum MethodArg {
    Fifo,
    Lifo,
    Hifo,
    Lofo,
}

impl From<MethodArg> for AccountingMethod {
    fn from(arg: MethodArg) -> Self {
        match arg {
            MethodArg::Fifo => AccountingMethod::Fifo,
            MethodArg::Lifo => AccountingMethod::Lifo,
            MethodArg::Hifo => AccountingMethod::Hifo,
            MethodArg::Lofo => AccountingMethod::Lofo,
        }
    }
}

impl LedgerArgs {
    pub fn config(&self) -> anyhow::Result<EngineConfig> {
        if self.long_term_days < 0 {
            anyhow::bail!("--long-term-days must not be negative");
        }
        Ok(EngineConfig {
            method: self.method.into(),
            long_term: Duration::days(self.long_term_days),
        })
    }

    pub fn options(&self) -> ConversionOptions {
        ConversionOptions {
            from: self.from,
            to: self.to,
            asset: self.asset.clone(),
        }
    }

    /// Read the ledger and run the engine over every asset.
    pub fn compute(&self) -> anyhow::Result<Vec<AssetReport>> {
        let config = self.config()?;
        let input = read_ledger(&self.file)?;
        let assets = ledger::ledger_to_events(input, &self.options())?;
        Ok(compute_all(assets, &config)?)
    }
}

/// Read a ledger file, or JSON from stdin with "-"
pub fn read_ledger(path: &Path) -> anyhow::Result<LedgerInput> {
    if path.as_os_str() == "-" {
        return read_from_stdin();
    }
    let reader = BufReader::new(File::open(path)?);
    let is_csv = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if is_csv {
        ledger::read_ledger_csv(reader)
    } else {
        ledger::read_ledger_json(reader)
    }
}

fn read_from_stdin() -> anyhow::Result<LedgerInput> {
    let stdin = io::stdin();
    let mut reader = BufReader::new(stdin.lock());

    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer)?;

    if buffer.is_empty() {
        anyhow::bail!("No input received. Provide a file or pipe data to stdin.");
    }

    ledger::read_ledger_json(io::Cursor::new(buffer))
}

/// Output format flags shared by the reporting commands
#[derive(Args, Debug)]
pub struct OutputArgs {
    /// Output as CSV instead of formatted table
    #[arg(long, conflicts_with = "json")]
    csv: bool,

    /// Output as JSON instead of formatted table
    #[arg(long)]
    json: bool,
}

impl OutputArgs {
    /// Print `rows` as a table, CSV or JSON.
    pub fn print<T>(&self, title: &str, rows: &[T]) -> anyhow::Result<()>
    where
        T: Tabled + serde::Serialize,
    {
        if self.json {
            println!("{}", serde_json::to_string_pretty(rows)?);
        } else if self.csv {
            let mut wtr = csv::Writer::from_writer(io::stdout());
            for row in rows {
                wtr.serialize(row)?;
            }
            wtr.flush()?;
        } else if rows.is_empty() {
            println!("No {} found matching filters", title.to_lowercase());
        } else {
            println!();
            println!("{}", title.to_uppercase());
            println!();
            let table = Table::new(rows)
                .with(Style::rounded())
                .with(Modify::new(Rows::new(1..)).with(Alignment::right()))
                .to_string();
            println!("{}", table);
        }
        Ok(())
    }

    pub fn is_table(&self) -> bool {
        !self.csv && !self.json
    }
}

pub(crate) fn format_quantity(d: Decimal) -> String {
    d.normalize().to_string()
}

pub(crate) fn format_fiat(d: Decimal) -> String {
    format!("{:.2}", d.round_dp(2))
}
