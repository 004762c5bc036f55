use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A wallet: an exchange (or chain) together with the holder who owns it.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub struct Account {
    pub exchange: String,
    pub holder: String,
}

impl Account {
    pub fn new(exchange: impl Into<String>, holder: impl Into<String>) -> Self {
        Account {
            exchange: exchange.into(),
            holder: holder.into(),
        }
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.exchange, self.holder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_exchange_and_holder() {
        assert_eq!(Account::new("Coinbase", "Bob").to_string(), "Coinbase/Bob");
    }

    #[test]
    fn ordering_is_exchange_then_holder() {
        let mut accounts = vec![
            Account::new("Kraken", "Alice"),
            Account::new("Coinbase", "Bob"),
            Account::new("Coinbase", "Alice"),
        ];
        accounts.sort();
        assert_eq!(
            accounts,
            vec![
                Account::new("Coinbase", "Alice"),
                Account::new("Coinbase", "Bob"),
                Account::new("Kraken", "Alice"),
            ]
        );
    }
}
