//! Ledger input: reads transactions from JSON or CSV, validates them and
//! groups them per asset for the engine.

use crate::core::{
    AcquisitionEvent, AcquisitionKind, Account, AssetEvents, DisposalEvent, TransferEvent,
};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use taxlots_derive::CsvSchema;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("duplicate transaction id: {0}")]
    DuplicateTransactionId(String),
    #[error("{field} must be positive: {id}")]
    NonPositiveAmount { id: String, field: &'static str },
    #[error("{field} must not be negative: {id}")]
    NegativeValue { id: String, field: &'static str },
    #[error("received amount exceeds sent amount: {id}")]
    ReceivedExceedsSent { id: String },
    #[error("unit_price required to value the transfer fee: {id}")]
    MissingFeePrice { id: String },
    #[error("account {account} is not in the accounts list: {id}")]
    UnknownAccount { id: String, account: Account },
    #[error("unknown transaction type '{kind}': {id}")]
    UnknownType { id: String, kind: String },
    #[error("column '{field}' required for {kind}: {id}")]
    MissingField {
        id: String,
        kind: String,
        field: &'static str,
    },
    #[error("invalid datetime: {0}")]
    InvalidDatetime(String),
}

/// Input root for ledger JSON
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct LedgerInput {
    /// Known accounts. When present, every transaction must use one of them.
    #[serde(default)]
    pub accounts: Option<Vec<Account>>,
    pub transactions: Vec<Transaction>,
}

/// Transaction record with common fields + type-specific data
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Transaction {
    /// Unique identifier for this transaction
    pub id: String,
    /// When the transaction occurred (RFC3339 with offset; naive or date-only assumes UTC)
    #[serde(deserialize_with = "deserialize_datetime")]
    #[schemars(with = "String")]
    pub datetime: DateTime<FixedOffset>,
    /// Asset symbol (e.g. BTC)
    pub asset: String,
    /// Exchange or wallet holding the asset
    pub exchange: String,
    /// Owner of the account
    pub holder: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub details: TransactionType,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type")]
pub enum TransactionType {
    /// Crypto coming into the account: a purchase or an income
    Acquisition {
        #[schemars(with = "f64")]
        amount: Decimal,
        /// Fiat value of one unit at acquisition
        #[schemars(with = "f64")]
        unit_price: Decimal,
        /// Fiat fee paid on top of the purchase
        #[serde(default)]
        #[schemars(with = "Option<f64>")]
        fee: Option<Decimal>,
        #[serde(default)]
        kind: AcquisitionKind,
    },

    /// Crypto leaving the account for fiat or goods
    Disposal {
        #[schemars(with = "f64")]
        amount: Decimal,
        /// Crypto fee paid on top of `amount`
        #[serde(default)]
        #[schemars(with = "Option<f64>")]
        fee: Option<Decimal>,
        #[schemars(with = "f64")]
        unit_price: Decimal,
    },

    /// Move between two accounts; `sent - received` is the fee
    Transfer {
        to_exchange: String,
        to_holder: String,
        #[schemars(with = "f64")]
        sent: Decimal,
        #[schemars(with = "f64")]
        received: Decimal,
        /// Fiat value of one unit, required when a fee is paid
        #[serde(default)]
        #[schemars(with = "Option<f64>")]
        unit_price: Option<Decimal>,
    },
}

impl Transaction {
    pub fn account(&self) -> Account {
        Account::new(self.exchange.clone(), self.holder.clone())
    }

    pub fn type_name(&self) -> &'static str {
        match self.details {
            TransactionType::Acquisition { .. } => "Acquisition",
            TransactionType::Disposal { .. } => "Disposal",
            TransactionType::Transfer { .. } => "Transfer",
        }
    }

    fn validate(&self) -> Result<(), LedgerError> {
        let positive = |value: Decimal, field: &'static str| {
            if value > Decimal::ZERO {
                Ok(())
            } else {
                Err(LedgerError::NonPositiveAmount {
                    id: self.id.clone(),
                    field,
                })
            }
        };
        let non_negative = |value: Option<Decimal>, field: &'static str| match value {
            Some(v) if v < Decimal::ZERO => Err(LedgerError::NegativeValue {
                id: self.id.clone(),
                field,
            }),
            _ => Ok(()),
        };

        match &self.details {
            TransactionType::Acquisition {
                amount,
                unit_price,
                fee,
                ..
            } => {
                positive(*amount, "amount")?;
                non_negative(Some(*unit_price), "unit_price")?;
                non_negative(*fee, "fee")
            }
            TransactionType::Disposal {
                amount,
                fee,
                unit_price,
            } => {
                positive(*amount, "amount")?;
                non_negative(Some(*unit_price), "unit_price")?;
                non_negative(*fee, "fee")
            }
            TransactionType::Transfer {
                sent,
                received,
                unit_price,
                ..
            } => {
                positive(*sent, "sent")?;
                positive(*received, "received")?;
                non_negative(*unit_price, "unit_price")?;
                if received > sent {
                    return Err(LedgerError::ReceivedExceedsSent {
                        id: self.id.clone(),
                    });
                }
                if received < sent && unit_price.is_none() {
                    return Err(LedgerError::MissingFeePrice {
                        id: self.id.clone(),
                    });
                }
                Ok(())
            }
        }
    }

    fn accounts(&self) -> Vec<Account> {
        let mut accounts = vec![self.account()];
        if let TransactionType::Transfer {
            to_exchange,
            to_holder,
            ..
        } = &self.details
        {
            accounts.push(Account::new(to_exchange.clone(), to_holder.clone()));
        }
        accounts
    }

    fn add_to(self, events: &mut AssetEvents) {
        let account = self.account();
        match self.details {
            TransactionType::Acquisition {
                amount,
                unit_price,
                fee,
                kind,
            } => events.acquisitions.push(
                AcquisitionEvent::new(self.id, account, self.asset, self.datetime, amount, unit_price)
                    .with_fee(fee.unwrap_or_default())
                    .with_kind(kind),
            ),
            TransactionType::Disposal {
                amount,
                fee,
                unit_price,
            } => events.disposals.push(DisposalEvent {
                id: self.id,
                account,
                asset: self.asset,
                timestamp: self.datetime,
                amount,
                fee: fee.unwrap_or_default(),
                unit_price,
            }),
            TransactionType::Transfer {
                to_exchange,
                to_holder,
                sent,
                received,
                unit_price,
            } => events.transfers.push(TransferEvent {
                id: self.id,
                from: account,
                to: Account::new(to_exchange, to_holder),
                asset: self.asset,
                timestamp: self.datetime,
                sent,
                received,
                unit_price: unit_price.unwrap_or_default(),
            }),
        }
    }
}

/// Column description generated by `#[derive(CsvSchema)]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvColumn {
    pub name: &'static str,
    pub required: bool,
    pub description: &'static str,
}

/// Flat CSV row. Columns that don't apply to a row's type are left empty.
#[derive(Debug, Clone, Deserialize, CsvSchema)]
pub struct CsvRow {
    /// Unique transaction identifier
    pub id: String,
    /// RFC3339, YYYY-MM-DD hh:mm:ss or YYYY-MM-DD (naive values are UTC)
    pub datetime: String,
    /// Acquisition, Disposal or Transfer
    #[serde(rename = "type")]
    pub kind: String,
    /// Asset symbol (e.g. BTC)
    pub asset: String,
    /// Exchange or wallet of the account
    pub exchange: String,
    /// Owner of the account
    pub holder: String,
    /// Amount acquired or disposed (Acquisition, Disposal)
    pub amount: Option<Decimal>,
    /// Fiat value of one unit (required for Acquisition and Disposal)
    pub unit_price: Option<Decimal>,
    /// Acquisition: fiat fee. Disposal: crypto fee on top of amount
    pub fee: Option<Decimal>,
    /// Buy, Mining, Staking, Interest, Airdrop or Income (Acquisition, default Buy)
    pub acquisition_kind: Option<AcquisitionKind>,
    /// Receiving exchange (Transfer)
    pub to_exchange: Option<String>,
    /// Receiving holder (Transfer)
    pub to_holder: Option<String>,
    /// Amount leaving the sending account (Transfer)
    pub sent: Option<Decimal>,
    /// Amount arriving on the receiving account (Transfer)
    pub received: Option<Decimal>,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
}

impl TryFrom<CsvRow> for Transaction {
    type Error = LedgerError;

    fn try_from(row: CsvRow) -> Result<Self, Self::Error> {
        fn required<T>(value: Option<T>, row: &CsvRow, field: &'static str) -> Result<T, LedgerError> {
            value.ok_or_else(|| LedgerError::MissingField {
                id: row.id.clone(),
                kind: row.kind.clone(),
                field,
            })
        }

        let details = match row.kind.trim().to_ascii_lowercase().as_str() {
            "acquisition" => TransactionType::Acquisition {
                amount: required(row.amount, &row, "amount")?,
                unit_price: required(row.unit_price, &row, "unit_price")?,
                fee: row.fee,
                kind: row.acquisition_kind.unwrap_or_default(),
            },
            "disposal" => TransactionType::Disposal {
                amount: required(row.amount, &row, "amount")?,
                fee: row.fee,
                unit_price: required(row.unit_price, &row, "unit_price")?,
            },
            "transfer" => TransactionType::Transfer {
                to_exchange: required(row.to_exchange.clone(), &row, "to_exchange")?,
                to_holder: required(row.to_holder.clone(), &row, "to_holder")?,
                sent: required(row.sent, &row, "sent")?,
                received: required(row.received, &row, "received")?,
                unit_price: row.unit_price,
            },
            _ => {
                return Err(LedgerError::UnknownType {
                    id: row.id,
                    kind: row.kind,
                })
            }
        };

        Ok(Transaction {
            datetime: parse_datetime(&row.datetime)?,
            id: row.id,
            asset: row.asset,
            exchange: row.exchange,
            holder: row.holder,
            description: row.description,
            details,
        })
    }
}

/// Filters applied while converting a ledger into engine events
#[derive(Debug, Clone, Default)]
pub struct ConversionOptions {
    /// First day included (inclusive)
    pub from: Option<NaiveDate>,
    /// Last day included (inclusive)
    pub to: Option<NaiveDate>,
    /// Only this asset
    pub asset: Option<String>,
}

impl ConversionOptions {
    fn includes(&self, tx: &Transaction) -> bool {
        let date = tx.datetime.date_naive();
        self.from.map_or(true, |from| date >= from)
            && self.to.map_or(true, |to| date <= to)
            && self
                .asset
                .as_deref()
                .map_or(true, |asset| normalize_asset(asset) == tx.asset)
    }
}

/// Read a ledger from JSON
pub fn read_ledger_json<R: Read>(reader: R) -> anyhow::Result<LedgerInput> {
    let mut input: LedgerInput = serde_json::from_reader(reader)?;
    normalize_transactions(&mut input.transactions);
    Ok(input)
}

/// Read a ledger from flat CSV rows. CSV ledgers carry no accounts list.
pub fn read_ledger_csv<R: Read>(reader: R) -> anyhow::Result<LedgerInput> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut transactions = Vec::new();
    for row in rdr.deserialize() {
        let row: CsvRow = row?;
        transactions.push(Transaction::try_from(row)?);
    }
    normalize_transactions(&mut transactions);
    Ok(LedgerInput {
        accounts: None,
        transactions,
    })
}

/// Validate a ledger and split it into per-asset event sets, sorted by asset.
pub fn ledger_to_events(
    input: LedgerInput,
    options: &ConversionOptions,
) -> Result<Vec<AssetEvents>, LedgerError> {
    validate(&input)?;

    let mut assets: BTreeMap<String, AssetEvents> = BTreeMap::new();
    let mut skipped = 0;
    for tx in input.transactions {
        if !options.includes(&tx) {
            log::debug!("Skipping {} {} ({})", tx.type_name(), tx.id, tx.datetime);
            skipped += 1;
            continue;
        }
        let events = assets
            .entry(tx.asset.clone())
            .or_insert_with(|| AssetEvents::new(tx.asset.clone()));
        tx.add_to(events);
    }

    log::info!(
        "Ledger: {} asset(s), {} transaction(s) outside filters",
        assets.len(),
        skipped
    );
    Ok(assets.into_values().collect())
}

fn validate(input: &LedgerInput) -> Result<(), LedgerError> {
    let known: Option<HashSet<&Account>> = input.accounts.as_ref().map(|a| a.iter().collect());
    let mut ids = HashSet::new();
    for tx in &input.transactions {
        if !ids.insert(tx.id.as_str()) {
            return Err(LedgerError::DuplicateTransactionId(tx.id.clone()));
        }
        tx.validate()?;
        if let Some(known) = &known {
            if let Some(account) = tx.accounts().into_iter().find(|a| !known.contains(a)) {
                return Err(LedgerError::UnknownAccount {
                    id: tx.id.clone(),
                    account,
                });
            }
        }
    }
    Ok(())
}

fn normalize_transactions(transactions: &mut [Transaction]) {
    for tx in transactions.iter_mut() {
        tx.asset = normalize_asset(&tx.asset);
    }
    transactions.sort_by_key(|t| t.datetime);
}

fn normalize_asset(s: &str) -> String {
    s.trim().to_uppercase()
}

fn parse_datetime(s: &str) -> Result<DateTime<FixedOffset>, LedgerError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt);
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(dt.and_utc().fixed_offset());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN).and_utc().fixed_offset());
    }
    Err(LedgerError::InvalidDatetime(s.to_string()))
}

fn deserialize_datetime<'de, D>(deserializer: D) -> Result<DateTime<FixedOffset>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    parse_datetime(&s).map_err(|err| serde::de::Error::custom(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn dt(s: &str) -> DateTime<FixedOffset> {
        parse_datetime(s).unwrap()
    }

    const LEDGER: &str = r#"{
        "accounts": [
            { "exchange": "Coinbase", "holder": "Bob" },
            { "exchange": "Kraken", "holder": "Bob" }
        ],
        "transactions": [
            {
                "id": "t1", "datetime": "2024-02-01", "asset": "btc",
                "exchange": "Coinbase", "holder": "Bob",
                "type": "Transfer", "to_exchange": "Kraken", "to_holder": "Bob",
                "sent": "1", "received": "0.99", "unit_price": "40000"
            },
            {
                "id": "a1", "datetime": "2024-01-01T10:00:00Z", "asset": "BTC",
                "exchange": "Coinbase", "holder": "Bob",
                "type": "Acquisition", "amount": 2, "unit_price": 30000, "fee": 15
            },
            {
                "id": "s1", "datetime": "2024-01-15 08:00:00", "asset": "ETH",
                "exchange": "Kraken", "holder": "Bob",
                "type": "Acquisition", "amount": "0.1", "unit_price": 2000, "kind": "Staking"
            },
            {
                "id": "d1", "datetime": "2024-03-01", "asset": "BTC",
                "exchange": "Kraken", "holder": "Bob",
                "type": "Disposal", "amount": "0.5", "fee": "0.01", "unit_price": 50000
            }
        ]
    }"#;

    fn read(json: &str) -> LedgerInput {
        read_ledger_json(json.as_bytes()).unwrap()
    }

    #[test]
    fn parse_datetime_formats() {
        assert_eq!(dt("2024-01-01"), dt("2024-01-01T00:00:00+00:00"));
        assert_eq!(dt("2024-01-01 12:30:00"), dt("2024-01-01T12:30:00Z"));
        assert_eq!(dt("2024-01-01T12:30:00.5"), dt("2024-01-01T12:30:00.5Z"));
        assert_eq!(dt("2024-01-01T12:30:00+02:00").offset().local_minus_utc(), 7200);
        assert_eq!(
            parse_datetime("01/01/2024"),
            Err(LedgerError::InvalidDatetime("01/01/2024".to_string()))
        );
    }

    #[test]
    fn json_ledger_is_sorted_and_grouped_by_asset() {
        let input = read(LEDGER);
        let ids: Vec<_> = input.transactions.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "s1", "t1", "d1"]);

        let assets = ledger_to_events(input, &ConversionOptions::default()).unwrap();
        assert_eq!(assets.len(), 2);

        let btc = &assets[0];
        assert_eq!(btc.asset, "BTC");
        assert_eq!(btc.acquisitions.len(), 1);
        assert_eq!(btc.acquisitions[0].fee, dec!(15));
        assert_eq!(btc.disposals[0].amount_with_fee(), dec!(0.51));
        assert_eq!(btc.transfers[0].fee(), dec!(0.01));
        assert_eq!(btc.transfers[0].to, Account::new("Kraken", "Bob"));

        let eth = &assets[1];
        assert_eq!(eth.acquisitions[0].kind, AcquisitionKind::Staking);
    }

    #[test]
    fn date_and_asset_filters() {
        let options = ConversionOptions {
            from: NaiveDate::from_ymd_opt(2024, 1, 10),
            to: NaiveDate::from_ymd_opt(2024, 2, 1),
            asset: None,
        };
        let assets = ledger_to_events(read(LEDGER), &options).unwrap();
        let ids: Vec<_> = assets
            .iter()
            .flat_map(|a| {
                a.acquisitions
                    .iter()
                    .map(|e| e.id.clone())
                    .chain(a.transfers.iter().map(|e| e.id.clone()))
                    .chain(a.disposals.iter().map(|e| e.id.clone()))
            })
            .collect();
        assert_eq!(ids, vec!["t1", "s1"]);

        let options = ConversionOptions {
            asset: Some("eth".to_string()),
            ..ConversionOptions::default()
        };
        let assets = ledger_to_events(read(LEDGER), &options).unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].asset, "ETH");
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let json = LEDGER.replace("\"id\": \"d1\"", "\"id\": \"a1\"");
        assert_eq!(
            ledger_to_events(read(&json), &ConversionOptions::default()).unwrap_err(),
            LedgerError::DuplicateTransactionId("a1".to_string())
        );
    }

    #[test]
    fn unknown_account_is_rejected() {
        let json = LEDGER.replace("\"to_exchange\": \"Kraken\"", "\"to_exchange\": \"Binance\"");
        let err = ledger_to_events(read(&json), &ConversionOptions::default()).unwrap_err();
        assert_eq!(
            err,
            LedgerError::UnknownAccount {
                id: "t1".to_string(),
                account: Account::new("Binance", "Bob"),
            }
        );
    }

    #[test]
    fn accounts_list_is_optional() {
        let mut input = read(LEDGER);
        input.accounts = None;
        input.transactions[0].exchange = "Anywhere".to_string();
        assert!(ledger_to_events(input, &ConversionOptions::default()).is_ok());
    }

    #[test]
    fn transfer_validation() {
        let received_too_much = LEDGER.replace("\"received\": \"0.99\"", "\"received\": \"1.5\"");
        assert_eq!(
            ledger_to_events(read(&received_too_much), &ConversionOptions::default()).unwrap_err(),
            LedgerError::ReceivedExceedsSent { id: "t1".to_string() }
        );

        let no_price = LEDGER.replace(", \"unit_price\": \"40000\"", "");
        assert_eq!(
            ledger_to_events(read(&no_price), &ConversionOptions::default()).unwrap_err(),
            LedgerError::MissingFeePrice { id: "t1".to_string() }
        );
    }

    #[test]
    fn non_positive_amount_is_rejected() {
        let json = LEDGER.replace("\"amount\": \"0.5\"", "\"amount\": \"0\"");
        assert_eq!(
            ledger_to_events(read(&json), &ConversionOptions::default()).unwrap_err(),
            LedgerError::NonPositiveAmount {
                id: "d1".to_string(),
                field: "amount"
            }
        );
    }

    #[test]
    fn invalid_datetime_fails_to_read() {
        let json = LEDGER.replace("2024-03-01", "March 1st");
        assert!(read_ledger_json(json.as_bytes()).is_err());
    }

    const CSV: &str = "\
id,datetime,type,asset,exchange,holder,amount,unit_price,fee,acquisition_kind,to_exchange,to_holder,sent,received,description
a1,2024-01-01,Acquisition,btc,Coinbase,Bob,2,30000,,,,,,,first buy
m1,2024-01-02,Acquisition,BTC,Coinbase,Bob,0.01,31000,,Mining,,,,,
t1,2024-02-01,Transfer,BTC,Coinbase,Bob,,40000,,,Kraken,Bob,1,0.99,
d1,2024-03-01,disposal,BTC,Kraken,Bob,0.5,50000,0.01,,,,,,
";

    #[test]
    fn csv_rows_become_transactions() {
        let input = read_ledger_csv(CSV.as_bytes()).unwrap();
        assert!(input.accounts.is_none());
        assert_eq!(input.transactions.len(), 4);
        assert_eq!(input.transactions[0].asset, "BTC");
        assert!(matches!(
            input.transactions[1].details,
            TransactionType::Acquisition {
                kind: AcquisitionKind::Mining,
                ..
            }
        ));
        assert!(matches!(
            input.transactions[2].details,
            TransactionType::Transfer { unit_price: Some(p), .. } if p == dec!(40000)
        ));

        let assets = ledger_to_events(input, &ConversionOptions::default()).unwrap();
        assert_eq!(assets[0].disposals[0].fee, dec!(0.01));
    }

    #[test]
    fn csv_row_missing_column_for_type() {
        let csv = CSV.replace("Kraken,Bob,1,0.99", "Kraken,Bob,,0.99");
        let err = read_ledger_csv(csv.as_bytes()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<LedgerError>(),
            Some(&LedgerError::MissingField {
                id: "t1".to_string(),
                kind: "Transfer".to_string(),
                field: "sent",
            })
        );
    }

    #[test]
    fn csv_row_with_unknown_type() {
        let csv = CSV.replace("d1,2024-03-01,disposal", "d1,2024-03-01,Swap");
        let err = read_ledger_csv(csv.as_bytes()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LedgerError>(),
            Some(LedgerError::UnknownType { .. })
        ));
    }

    #[test]
    fn csv_schema_lists_every_column() {
        let header = CsvRow::csv_header();
        assert_eq!(header[2], "type");
        assert_eq!(header.len(), 15);

        let required: Vec<_> = CsvRow::CSV_COLUMNS
            .iter()
            .filter(|c| c.required)
            .map(|c| c.name)
            .collect();
        assert_eq!(
            required,
            vec!["id", "datetime", "type", "asset", "exchange", "holder"]
        );
        assert!(CsvRow::CSV_COLUMNS[2].description.contains("Transfer"));
    }
}
