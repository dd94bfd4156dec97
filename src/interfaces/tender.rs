//! Parses the `--pay` tender syntax used by the command line.
//!
//! ```text
//! card:<amount>:<brand>:<last4>
//! cash:<amount>[:<tendered>]
//! wallet:<amount>:<provider>
//! gift:<amount>:<number>
//! check:<amount>:<number>
//! ```

use crate::domain::money::{Amount, Money};
use crate::domain::payment::{CardBrand, PaymentLine, PaymentMethod};
use crate::error::{PosError, Result};
use rust_decimal::Decimal;
use std::str::FromStr;

pub fn parse_tender(input: &str) -> Result<PaymentLine> {
    let parts: Vec<&str> = input.split(':').map(str::trim).collect();
    let kind = parts[0].to_ascii_lowercase();
    let amount = Amount::new(decimal(parts.get(1).copied(), "amount")?)?;

    let method = match (kind.as_str(), &parts[2..]) {
        ("card", [brand, last4]) => PaymentMethod::Card {
            brand: card_brand(brand),
            last4: last4.to_string(),
        },
        ("cash", []) => PaymentMethod::Cash { tendered: None },
        ("cash", [tendered]) => PaymentMethod::Cash {
            tendered: Some(Money::new(decimal(Some(tendered), "tendered")?)),
        },
        ("wallet", [provider]) => PaymentMethod::DigitalWallet {
            provider: provider.to_string(),
        },
        ("gift", [number]) => PaymentMethod::GiftCard {
            card_number: number.to_string(),
        },
        ("check", [number]) => PaymentMethod::Check {
            check_number: number.to_string(),
            bank: None,
        },
        _ => {
            return Err(PosError::validation(
                "tender",
                format!("Unrecognised tender '{input}'"),
            ));
        }
    };

    let line = PaymentLine::new(amount, method);
    line.method.validate("tender", line.amount)?;
    Ok(line)
}

/// Adapter for `clap`'s `value_parser`.
pub fn tender_arg(input: &str) -> std::result::Result<PaymentLine, String> {
    parse_tender(input).map_err(|e| e.to_string())
}

fn decimal(value: Option<&str>, field: &str) -> Result<Decimal> {
    let raw = value.ok_or_else(|| PosError::validation(field, "Missing value"))?;
    Decimal::from_str(raw)
        .map_err(|_| PosError::validation(field, format!("'{raw}' is not a valid amount")))
}

fn card_brand(raw: &str) -> CardBrand {
    match raw.to_ascii_lowercase().as_str() {
        "visa" => CardBrand::Visa,
        "mastercard" | "mc" => CardBrand::Mastercard,
        "amex" => CardBrand::Amex,
        "discover" => CardBrand::Discover,
        _ => CardBrand::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_card_tender() {
        let line = parse_tender("card:60.00:visa:4242").unwrap();
        assert_eq!(line.amount.value(), dec!(60.00));
        assert_eq!(
            line.method,
            PaymentMethod::Card {
                brand: CardBrand::Visa,
                last4: "4242".into()
            }
        );
    }

    #[test]
    fn test_cash_with_tendered_gives_change() {
        let line = parse_tender("cash:40:50").unwrap();
        assert_eq!(line.change_due(), Some(Money::new(dec!(10))));

        let exact = parse_tender("cash:40").unwrap();
        assert_eq!(exact.change_due(), None);
    }

    #[test]
    fn test_other_tenders() {
        assert!(matches!(
            parse_tender("wallet:10:apple_pay").unwrap().method,
            PaymentMethod::DigitalWallet { .. }
        ));
        assert!(matches!(
            parse_tender("gift:10:GC-1001").unwrap().method,
            PaymentMethod::GiftCard { .. }
        ));
        assert!(matches!(
            parse_tender("check:10:1042").unwrap().method,
            PaymentMethod::Check { .. }
        ));
    }

    #[test]
    fn test_rejects_malformed_tenders() {
        for bad in [
            "card:60:visa",
            "card:60:visa:42",
            "cash:-5",
            "cash:abc",
            "cash:40:20",
            "crypto:10:btc",
            "cash",
        ] {
            assert!(parse_tender(bad).is_err(), "{bad} should be rejected");
        }
    }
}
