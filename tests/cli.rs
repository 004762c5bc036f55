//! E2E tests for the gains, lots, balances and schema commands

use std::process::{Command, Output};

fn taxlots(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_taxlots"))
        .args(args)
        .output()
        .expect("Failed to execute command")
}

fn stdout_of(args: &[&str]) -> String {
    let output = taxlots(args);
    assert!(output.status.success(), "Command failed: {:?}", output);
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn json_of(args: &[&str]) -> Vec<serde_json::Value> {
    let stdout = stdout_of(args);
    serde_json::from_str(&stdout).expect("Output is not a JSON array")
}

/// Gains table shows synthetic lots on the receiving account and per-asset totals
#[test]
fn gains_table() {
    let stdout = stdout_of(&["gains", "tests/data/ledger.json"]);

    assert!(stdout.contains("GAINS"));
    assert!(stdout.contains("Kraken/Bob"));
    assert!(stdout.contains("t1#1"));
    assert!(stdout.contains("t2#1"));
    assert!(stdout.contains("Income"));
    assert!(stdout.contains("TOTALS"));
    assert!(stdout.contains("450.00"));
    assert!(stdout.contains("2000.00"));
}

/// Gains CSV output has a header and one line per record
#[test]
fn gains_csv() {
    let stdout = stdout_of(&["gains", "tests/data/ledger.json", "--csv"]);
    let lines: Vec<_> = stdout.lines().collect();

    assert_eq!(
        lines[0],
        "asset,account,type,transaction,date,lot,acquired,amount,proceeds,cost_basis,gain,term"
    );
    assert_eq!(lines.len(), 4);
    assert!(lines[1..].iter().any(|l| l.starts_with("BTC,Kraken/Bob,Disposal,d1")));
}

/// FIFO consumes the earliest arrival on Kraken first
#[test]
fn gains_json_fifo() {
    let rows = json_of(&["gains", "tests/data/ledger.json", "--json", "--asset", "btc"]);

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["lot"], "t1#1");
    assert_eq!(rows[0]["amount"], "4");
    assert_eq!(rows[0]["gain"], "360.00");
    assert_eq!(rows[0]["acquired"], "2024-01-01");
    assert_eq!(rows[1]["lot"], "t2#1");
    assert_eq!(rows[1]["amount"], "1");
}

/// HIFO takes the 130 lot before the 110 lots
#[test]
fn gains_json_hifo() {
    let rows = json_of(&[
        "gains",
        "tests/data/ledger.json",
        "--json",
        "--asset",
        "BTC",
        "--method",
        "hifo",
    ]);

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["lot"], "t2#2");
    assert_eq!(rows[0]["gain"], "280.00");
    assert_eq!(rows[1]["lot"], "t1#1");
    assert_eq!(rows[1]["gain"], "90.00");
}

/// Date filter drops the disposal, leaving only the staking income
#[test]
fn gains_date_filter() {
    let rows = json_of(&["gains", "tests/data/ledger.json", "--json", "--to", "2024-01-31"]);

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["type"], "Income");
    assert_eq!(rows[0]["asset"], "ETH");
    assert_eq!(rows[0]["term"], "-");
}

/// CSV ledger gives the same gains as the JSON one
#[test]
fn gains_from_csv_ledger() {
    let from_json = json_of(&["gains", "tests/data/ledger.json", "--json"]);
    let from_csv = json_of(&["gains", "tests/data/ledger.csv", "--json"]);
    assert_eq!(from_json, from_csv);
}

/// Lots lists synthetic lots with their originating lot
#[test]
fn lots_table() {
    let stdout = stdout_of(&["lots", "tests/data/ledger.json", "--asset", "BTC"]);

    assert!(stdout.contains("LOTS"));
    assert!(stdout.contains("t2#2"));
    assert!(stdout.contains("a2 (Coinbase/Bob)"));
}

/// Open lots only: the exhausted Coinbase lots and t1#1 are hidden
#[test]
fn lots_open_only() {
    let rows = json_of(&["lots", "tests/data/ledger.json", "--json", "--asset", "BTC", "--open"]);
    let lots: Vec<_> = rows.iter().map(|r| r["lot"].as_str().unwrap_or_default()).collect();
    assert_eq!(lots, vec!["t2#1", "t2#2"]);
    assert_eq!(rows[0]["remaining"], "5");
}

#[test]
fn balances_json() {
    let rows = json_of(&["balances", "tests/data/ledger.json", "--json"]);

    let balance = |asset: &str, account: &str| {
        rows.iter()
            .find(|r| r["asset"] == asset && r["account"] == account)
            .map(|r| r["balance"].clone())
    };
    assert_eq!(balance("BTC", "Coinbase/Bob"), Some("0".into()));
    assert_eq!(balance("BTC", "Kraken/Bob"), Some("9".into()));
    assert_eq!(balance("ETH", "Kraken/Bob"), Some("1".into()));
}

/// Spending more than arrived fails and names the account and transaction
#[test]
fn insufficient_balance_fails() {
    let output = taxlots(&["gains", "tests/data/insufficient.json"]);
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("insufficient balance on Kraken/Bob to cover out transaction (transaction d1): short by 0.1"),
        "unexpected error: {stderr}"
    );
}

#[test]
fn schema_csv_header() {
    let stdout = stdout_of(&["schema", "csv-header"]);
    assert_eq!(
        stdout.trim(),
        "id,datetime,type,asset,exchange,holder,amount,unit_price,fee,acquisition_kind,to_exchange,to_holder,sent,received,description"
    );
}

#[test]
fn schema_json() {
    let stdout = stdout_of(&["schema"]);
    let schema: serde_json::Value = serde_json::from_str(&stdout).expect("Schema is not JSON");
    assert_eq!(schema["title"], "LedgerInput");
    assert!(stdout.contains("Transfer"));
}
