use super::money::{Amount, Money};
use crate::error::{PosError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardBrand {
    Visa,
    Mastercard,
    Amex,
    Discover,
    Other,
}

/// Payment method with the fields each method requires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum PaymentMethod {
    Card { brand: CardBrand, last4: String },
    Cash { tendered: Option<Money> },
    DigitalWallet { provider: String },
    GiftCard { card_number: String },
    Check { check_number: String, bank: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    Card,
    Cash,
    DigitalWallet,
    GiftCard,
    Check,
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MethodKind::Card => "card",
            MethodKind::Cash => "cash",
            MethodKind::DigitalWallet => "digital_wallet",
            MethodKind::GiftCard => "gift_card",
            MethodKind::Check => "check",
        };
        f.write_str(name)
    }
}

impl PaymentMethod {
    pub fn kind(&self) -> MethodKind {
        match self {
            PaymentMethod::Card { .. } => MethodKind::Card,
            PaymentMethod::Cash { .. } => MethodKind::Cash,
            PaymentMethod::DigitalWallet { .. } => MethodKind::DigitalWallet,
            PaymentMethod::GiftCard { .. } => MethodKind::GiftCard,
            PaymentMethod::Check { .. } => MethodKind::Check,
        }
    }

    /// Whether the line has to be authorized by a live gateway.
    pub fn requires_authorization(&self) -> bool {
        matches!(
            self,
            PaymentMethod::Card { .. }
                | PaymentMethod::DigitalWallet { .. }
                | PaymentMethod::GiftCard { .. }
        )
    }

    /// Checks the method's own required fields against the allocated amount.
    pub fn validate(&self, field: &str, amount: Amount) -> Result<()> {
        match self {
            PaymentMethod::Card { last4, .. } => {
                if last4.len() != 4 || !last4.chars().all(|c| c.is_ascii_digit()) {
                    return Err(PosError::validation(
                        format!("{field}.last4"),
                        "Card last4 must be exactly four digits",
                    ));
                }
            }
            PaymentMethod::Cash {
                tendered: Some(tendered),
            } => {
                if *tendered < Money::from(amount) {
                    return Err(PosError::validation(
                        format!("{field}.tendered"),
                        format!("Cash tendered {tendered} does not cover {amount}"),
                    ));
                }
            }
            PaymentMethod::Cash { tendered: None } => {}
            PaymentMethod::DigitalWallet { provider } => {
                if provider.trim().is_empty() {
                    return Err(PosError::validation(
                        format!("{field}.provider"),
                        "Digital wallet provider is required",
                    ));
                }
            }
            PaymentMethod::GiftCard { card_number } => {
                if card_number.trim().is_empty() {
                    return Err(PosError::validation(
                        format!("{field}.card_number"),
                        "Gift card number is required",
                    ));
                }
            }
            PaymentMethod::Check { check_number, .. } => {
                if check_number.trim().is_empty() {
                    return Err(PosError::validation(
                        format!("{field}.check_number"),
                        "Check number is required",
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One allocation of the sale total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentLine {
    pub amount: Amount,
    pub method: PaymentMethod,
    #[serde(default)]
    pub status: ProcessingStatus,
    pub reference_number: Option<String>,
    pub gateway_id: Option<String>,
    pub error_message: Option<String>,
}

impl PaymentLine {
    pub fn new(amount: Amount, method: PaymentMethod) -> Self {
        Self {
            amount,
            method,
            status: ProcessingStatus::Pending,
            reference_number: None,
            gateway_id: None,
            error_message: None,
        }
    }

    pub fn card(amount: Amount, brand: CardBrand, last4: &str) -> Self {
        Self::new(
            amount,
            PaymentMethod::Card {
                brand,
                last4: last4.to_string(),
            },
        )
    }

    pub fn cash(amount: Amount) -> Self {
        Self::new(amount, PaymentMethod::Cash { tendered: None })
    }

    pub fn is_completed(&self) -> bool {
        self.status == ProcessingStatus::Completed
    }

    /// Change owed back to the customer on a cash line.
    pub fn change_due(&self) -> Option<Money> {
        match &self.method {
            PaymentMethod::Cash {
                tendered: Some(tendered),
            } => Some(*tendered - Money::from(self.amount)),
            _ => None,
        }
    }

    pub fn apply(&mut self, result: &PaymentResult) {
        self.gateway_id = result.gateway_id.clone();
        if result.success {
            self.status = ProcessingStatus::Completed;
            self.reference_number = result.reference_number.clone();
            self.error_message = None;
        } else {
            self.status = ProcessingStatus::Failed;
            self.error_message = result.error_message.clone();
        }
    }
}

/// Normalized outcome of a single payment attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentResult {
    pub success: bool,
    pub reference_number: Option<String>,
    pub gateway_id: Option<String>,
    pub error_message: Option<String>,
    pub retryable: bool,
}

impl PaymentResult {
    pub fn approved(reference_number: String, gateway_id: Option<String>) -> Self {
        Self {
            success: true,
            reference_number: Some(reference_number),
            gateway_id,
            error_message: None,
            retryable: false,
        }
    }

    pub fn failed(message: impl Into<String>, gateway_id: Option<String>, retryable: bool) -> Self {
        Self {
            success: false,
            reference_number: None,
            gateway_id,
            error_message: Some(message.into()),
            retryable,
        }
    }
}

/// What a processor receives for one line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthorizationRequest {
    pub transaction_id: String,
    pub line_index: usize,
    pub amount: Amount,
    pub method: PaymentMethod,
}

/// What a processor answers; declines are answers, outages are errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessorResponse {
    Approved { authorization_code: String },
    Declined { reason: String },
}
