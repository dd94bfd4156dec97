use super::money::Money;
use crate::error::{PosError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: String,
    pub name: String,
    pub unit_price: Money,
    pub quantity: u32,
    pub category: String,
    #[serde(default)]
    pub requires_shipping: bool,
}

impl LineItem {
    pub fn line_total(&self) -> Money {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Immutable snapshot of the priced cart, taken when checkout starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    items: Vec<LineItem>,
}

impl Cart {
    pub fn new(items: Vec<LineItem>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn requires_shipping(&self) -> bool {
        self.items.iter().any(|item| item.requires_shipping)
    }

    pub fn subtotal(&self) -> Money {
        self.items.iter().map(LineItem::line_total).sum()
    }

    /// Rejects carts the orchestrator must never try to charge.
    pub fn validate(&self) -> Result<()> {
        if self.items.is_empty() {
            return Err(PosError::validation("cart", "Cart has no items"));
        }
        for (index, item) in self.items.iter().enumerate() {
            if item.quantity == 0 {
                return Err(PosError::validation(
                    format!("cart[{index}].quantity"),
                    format!("Quantity for '{}' must be positive", item.name),
                ));
            }
            if item.unit_price.value() < Decimal::ZERO {
                return Err(PosError::validation(
                    format!("cart[{index}].unit_price"),
                    format!("Price for '{}' cannot be negative", item.name),
                ));
            }
        }
        Ok(())
    }

    pub fn totals(&self, tax_rate: Decimal, discount: Money) -> Totals {
        let subtotal = self.subtotal().round_cents();
        let discount = discount.min(subtotal).round_cents();
        let tax = ((subtotal - discount) * tax_rate).round_cents();
        Totals {
            subtotal,
            discount,
            tax,
            grand_total: subtotal - discount + tax,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: Money,
    pub discount: Money,
    pub tax: Money,
    pub grand_total: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub line1: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
}

impl Address {
    pub fn is_complete(&self) -> bool {
        [&self.line1, &self.city, &self.postal_code, &self.country]
            .iter()
            .all(|part| !part.trim().is_empty())
    }
}

/// Customer reference handed over by the customer directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub loyalty_points: u64,
    pub address: Option<Address>,
}

impl Customer {
    pub fn has_complete_address(&self) -> bool {
        self.address.as_ref().is_some_and(Address::is_complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn item(price: Decimal, quantity: u32, shipping: bool) -> LineItem {
        LineItem {
            id: "sku-1".into(),
            name: "Widget".into(),
            unit_price: Money::new(price),
            quantity,
            category: "general".into(),
            requires_shipping: shipping,
        }
    }

    #[test]
    fn test_totals_apply_discount_then_tax() {
        let cart = Cart::new(vec![item(dec!(10.00), 3, false), item(dec!(5.00), 2, false)]);
        let totals = cart.totals(dec!(0.10), Money::new(dec!(5.00)));

        assert_eq!(totals.subtotal, Money::new(dec!(40.00)));
        assert_eq!(totals.discount, Money::new(dec!(5.00)));
        assert_eq!(totals.tax, Money::new(dec!(3.50)));
        assert_eq!(totals.grand_total, Money::new(dec!(38.50)));
    }

    #[test]
    fn test_discount_never_exceeds_subtotal() {
        let cart = Cart::new(vec![item(dec!(10.00), 1, false)]);
        let totals = cart.totals(Decimal::ZERO, Money::new(dec!(50.00)));
        assert_eq!(totals.grand_total, Money::ZERO);
    }

    #[test]
    fn test_validate_rejects_empty_and_zero_quantity() {
        assert!(Cart::new(vec![]).validate().is_err());

        let err = Cart::new(vec![item(dec!(1.00), 0, false)])
            .validate()
            .unwrap_err();
        assert_eq!(err.field(), Some("cart[0].quantity"));
    }

    #[test]
    fn test_requires_shipping() {
        let cart = Cart::new(vec![item(dec!(1.00), 1, false), item(dec!(2.00), 1, true)]);
        assert!(cart.requires_shipping());
    }

    #[test]
    fn test_customer_address_completeness() {
        let mut customer = Customer {
            id: "c-1".into(),
            name: "Ada".into(),
            email: None,
            phone: None,
            loyalty_points: 0,
            address: Some(Address {
                line1: "1 Main St".into(),
                city: "Springfield".into(),
                postal_code: "12345".into(),
                country: "US".into(),
            }),
        };
        assert!(customer.has_complete_address());

        if let Some(address) = customer.address.as_mut() {
            address.city = " ".into();
        }
        assert!(!customer.has_complete_address());
    }
}
