use clap::{Parser, Subcommand};

mod cmd;

use cmd::{
    balances::BalancesCommand, gains::GainsCommand, lots::LotsCommand, schema::SchemaCommand,
};

#[derive(Parser, Debug)]
#[command(name = "taxlots", version, about = "Allocate crypto tax lots across accounts and transfers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Realized gains and losses, one row per lot fraction
    Gains(GainsCommand),
    /// Every lot after allocation, with remaining amount and provenance
    Lots(LotsCommand),
    /// Remaining balance per asset and account
    Balances(BalancesCommand),
    /// Print the expected input formats
    Schema(SchemaCommand),
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Command::Gains(cmd) => cmd.exec(),
        Command::Lots(cmd) => cmd.exec(),
        Command::Balances(cmd) => cmd.exec(),
        Command::Schema(cmd) => cmd.exec(),
    }
}
