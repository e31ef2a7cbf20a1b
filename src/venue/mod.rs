//! Venue collaborators
//!
//! Opaque interfaces the engine and reconciler depend on: order submission
//! and fill queries, collateral balance, order signing, and the on-chain
//! condition/payout oracle. Each has one production implementation in this
//! module tree; tests substitute their own.

mod clob;
mod onchain;
mod signer;

pub use clob::{ClobClient, ClobConfig};
pub use onchain::{CtfOracle, OnchainConfig, DEFAULT_CTF_ADDRESS};
pub use signer::{Eip712OrderSigner, DEFAULT_CHAIN_ID, DEFAULT_EXCHANGE};

use crate::account::Credentials;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side. Cycle triggers only ever buy, but the signer is side-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Wire discriminant used inside the signed order struct.
    pub fn as_u8(self) -> u8 {
        match self {
            Side::Buy => 0,
            Side::Sell => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// Parameters for one order to be signed.
#[derive(Debug, Clone)]
pub struct OrderArgs {
    pub token_id: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub fee_rate_bps: Decimal,
}

/// A fully signed order in the venue's wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedOrder {
    pub salt: String,
    pub maker: String,
    pub signer: String,
    pub taker: String,
    pub token_id: String,
    pub maker_amount: String,
    pub taker_amount: String,
    pub expiration: String,
    pub nonce: String,
    pub fee_rate_bps: String,
    pub side: String,
    pub signature_type: u8,
    pub signature: String,
}

/// Venue response to an order submission.
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub success: bool,
    pub order_id: Option<String>,
    pub error_msg: Option<String>,
}

/// Actual execution of an order, from the venue's order-by-id query.
#[derive(Debug, Clone, Copy)]
pub struct OrderFill {
    pub price: Decimal,
    pub size_matched: Decimal,
}

impl OrderFill {
    /// A fill the P&L computation can trust.
    pub fn is_usable(&self) -> bool {
        self.price > Decimal::ZERO && self.size_matched > Decimal::ZERO
    }
}

/// Order submission and query against the trading venue.
#[async_trait]
pub trait OrderClient: Send + Sync {
    /// Submit a signed order. Transport failures are `Err`; venue-level
    /// rejections come back as an unsuccessful [`OrderAck`].
    async fn submit(&self, creds: &Credentials, order: &SignedOrder) -> anyhow::Result<OrderAck>;

    /// Query an order's fill. `Ok(None)` when the order is unknown or has no
    /// fill data yet.
    async fn order_fill(
        &self,
        creds: &Credentials,
        order_id: &str,
    ) -> anyhow::Result<Option<OrderFill>>;

    /// Maker fee rate for a token, in basis points.
    async fn fee_rate_bps(&self, token_id: &str) -> anyhow::Result<Decimal>;
}

/// Available collateral balance for ratio-mode sizing.
#[async_trait]
pub trait BalanceClient: Send + Sync {
    async fn available_balance(&self, creds: &Credentials) -> anyhow::Result<Decimal>;
}

/// Opaque signing capability: build and sign one order.
#[async_trait]
pub trait OrderSigner: Send + Sync {
    async fn sign(&self, creds: &Credentials, args: &OrderArgs) -> anyhow::Result<SignedOrder>;
}

/// On-chain condition resolution lookup.
#[async_trait]
pub trait ConditionOracle: Send + Sync {
    /// Payout fraction per outcome once the condition resolved on-chain
    /// (`[1, 0]` means outcome 0 won); `Ok(None)` while unresolved.
    async fn payouts(&self, condition_id: &str) -> anyhow::Result<Option<Vec<Decimal>>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_wire_forms() {
        assert_eq!(Side::Buy.as_u8(), 0);
        assert_eq!(Side::Sell.as_u8(), 1);
        assert_eq!(Side::Buy.as_str(), "BUY");
    }

    #[test]
    fn test_signed_order_wire_keys() {
        let order = SignedOrder {
            salt: "1".to_string(),
            maker: "0xmaker".to_string(),
            signer: "0xsigner".to_string(),
            taker: "0x0000000000000000000000000000000000000000".to_string(),
            token_id: "123".to_string(),
            maker_amount: "10000000".to_string(),
            taker_amount: "10101010".to_string(),
            expiration: "0".to_string(),
            nonce: "0".to_string(),
            fee_rate_bps: "0".to_string(),
            side: "BUY".to_string(),
            signature_type: 2,
            signature: "0xsig".to_string(),
        };
        let json = serde_json::to_string(&order).unwrap();
        assert!(json.contains("\"tokenId\""));
        assert!(json.contains("\"makerAmount\""));
        assert!(json.contains("\"feeRateBps\""));
        assert!(json.contains("\"signatureType\":2"));
    }

    #[test]
    fn test_order_fill_usability() {
        assert!(OrderFill {
            price: dec!(0.99),
            size_matched: dec!(10.11)
        }
        .is_usable());
        assert!(!OrderFill {
            price: dec!(0),
            size_matched: dec!(10)
        }
        .is_usable());
        assert!(!OrderFill {
            price: dec!(0.5),
            size_matched: dec!(0)
        }
        .is_usable());
    }
}
