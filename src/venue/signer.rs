//! EIP-712 order signing
//!
//! Builds the venue's exchange order struct and signs its typed-data hash
//! with the account's key. Kept behind [`OrderSigner`] so the execution
//! engine never touches signing internals.

use super::{OrderArgs, OrderSigner, SignedOrder};
use crate::account::Credentials;
use alloy::primitives::{Address, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use alloy::sol;
use alloy::sol_types::{Eip712Domain, SolStruct};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// Default exchange contract (Polygon mainnet CTF exchange).
pub const DEFAULT_EXCHANGE: &str = "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E";
/// Default chain id (Polygon mainnet).
pub const DEFAULT_CHAIN_ID: u64 = 137;

/// Token amounts are wire-encoded with six decimals.
const AMOUNT_SCALE: u32 = 6;

sol! {
    /// Exchange order struct as hashed by the venue's contract.
    struct Order {
        uint256 salt;
        address maker;
        address signer;
        address taker;
        uint256 tokenId;
        uint256 makerAmount;
        uint256 takerAmount;
        uint256 expiration;
        uint256 nonce;
        uint256 feeRateBps;
        uint8 side;
        uint8 signatureType;
    }
}

/// Signs exchange orders with a locally held key.
pub struct Eip712OrderSigner {
    domain: Eip712Domain,
}

impl Eip712OrderSigner {
    pub fn new(chain_id: u64, exchange: &str) -> anyhow::Result<Self> {
        let verifying_contract = Address::from_str(exchange)
            .map_err(|e| anyhow::anyhow!("invalid exchange address {}: {}", exchange, e))?;
        let domain = Eip712Domain::new(
            Some("Polymarket CTF Exchange".into()),
            Some("1".into()),
            Some(U256::from(chain_id)),
            Some(verifying_contract),
            None,
        );
        Ok(Self { domain })
    }
}

#[async_trait]
impl OrderSigner for Eip712OrderSigner {
    async fn sign(&self, creds: &Credentials, args: &OrderArgs) -> anyhow::Result<SignedOrder> {
        let key = PrivateKeySigner::from_str(creds.private_key.trim_start_matches("0x"))
            .map_err(|e| anyhow::anyhow!("invalid signing key: {}", e))?;

        let maker = Address::from_str(creds.maker_address())
            .map_err(|e| anyhow::anyhow!("invalid maker address: {}", e))?;
        let signer_address = Address::from_str(&creds.address)
            .map_err(|e| anyhow::anyhow!("invalid signer address: {}", e))?;
        let token_id = U256::from_str_radix(&args.token_id, 10)
            .map_err(|e| anyhow::anyhow!("invalid token id {}: {}", args.token_id, e))?;

        let (maker_amount, taker_amount) = wire_amounts(args)?;
        let fee_rate_bps = to_units(args.fee_rate_bps, 0)?;
        let salt: u64 = rand::random();

        let order = Order {
            salt: U256::from(salt),
            maker,
            signer: signer_address,
            taker: Address::ZERO,
            tokenId: token_id,
            makerAmount: maker_amount,
            takerAmount: taker_amount,
            expiration: U256::ZERO,
            nonce: U256::ZERO,
            feeRateBps: fee_rate_bps,
            side: args.side.as_u8(),
            signatureType: creds.signature_type(),
        };

        let hash = order.eip712_signing_hash(&self.domain);
        let signature = key
            .sign_hash_sync(&hash)
            .map_err(|e| anyhow::anyhow!("signing failed: {}", e))?;

        Ok(SignedOrder {
            salt: salt.to_string(),
            maker: format!("{:#x}", maker),
            signer: format!("{:#x}", signer_address),
            taker: format!("{:#x}", Address::ZERO),
            token_id: args.token_id.clone(),
            maker_amount: maker_amount.to_string(),
            taker_amount: taker_amount.to_string(),
            expiration: "0".to_string(),
            nonce: "0".to_string(),
            fee_rate_bps: fee_rate_bps.to_string(),
            side: args.side.as_str().to_string(),
            signature_type: creds.signature_type(),
            signature: format!("0x{}", hex::encode(signature.as_bytes())),
        })
    }
}

/// Maker/taker amounts for the order. Buying spends collateral
/// (`size * price`) for `size` outcome tokens; selling is the inverse.
fn wire_amounts(args: &OrderArgs) -> anyhow::Result<(U256, U256)> {
    let collateral = args.size * args.price;
    match args.side {
        super::Side::Buy => Ok((
            to_units(collateral, AMOUNT_SCALE)?,
            to_units(args.size, AMOUNT_SCALE)?,
        )),
        super::Side::Sell => Ok((
            to_units(args.size, AMOUNT_SCALE)?,
            to_units(collateral, AMOUNT_SCALE)?,
        )),
    }
}

/// Scale a decimal into an integer wire amount with `scale` decimals.
fn to_units(value: Decimal, scale: u32) -> anyhow::Result<U256> {
    let scaled = (value * Decimal::from(10u64.pow(scale)))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    let raw = scaled
        .to_u128()
        .ok_or_else(|| anyhow::anyhow!("amount out of range: {}", value))?;
    Ok(U256::from(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::test_credentials;
    use crate::venue::Side;
    use rust_decimal_macros::dec;

    fn buy_args() -> OrderArgs {
        OrderArgs {
            token_id: "71321045679252212594626385532706912750332728571942532289631379312455583992563"
                .to_string(),
            side: Side::Buy,
            price: dec!(0.99),
            size: dec!(10.11),
            fee_rate_bps: dec!(0),
        }
    }

    #[test]
    fn test_wire_amounts_buy() {
        let (maker, taker) = wire_amounts(&buy_args()).unwrap();
        // 10.11 * 0.99 = 10.0089 USDC -> 10008900 units
        assert_eq!(maker, U256::from(10_008_900u64));
        assert_eq!(taker, U256::from(10_110_000u64));
    }

    #[test]
    fn test_to_units_rounding() {
        assert_eq!(to_units(dec!(1), 6).unwrap(), U256::from(1_000_000u64));
        assert_eq!(to_units(dec!(0.0000005), 6).unwrap(), U256::from(1u64));
        assert!(to_units(dec!(12.5), 0).unwrap() == U256::from(13u64));
    }

    #[tokio::test]
    async fn test_sign_produces_wire_order() {
        let signer = Eip712OrderSigner::new(DEFAULT_CHAIN_ID, DEFAULT_EXCHANGE).unwrap();
        let creds = test_credentials(1);
        let order = signer.sign(&creds, &buy_args()).await.unwrap();

        assert_eq!(order.side, "BUY");
        assert_eq!(order.signature_type, 2);
        assert_eq!(order.maker, creds.proxy_address.unwrap().to_lowercase());
        assert_eq!(order.signer, creds.address.to_lowercase());
        // 0x + 65 bytes of signature
        assert_eq!(order.signature.len(), 2 + 130);
        assert_eq!(order.maker_amount, "10008900");
        assert_eq!(order.taker_amount, "10110000");
        assert_eq!(order.expiration, "0");
        assert_eq!(order.nonce, "0");
    }

    #[tokio::test]
    async fn test_sign_rejects_bad_key() {
        let signer = Eip712OrderSigner::new(DEFAULT_CHAIN_ID, DEFAULT_EXCHANGE).unwrap();
        let mut creds = test_credentials(1);
        creds.private_key = "garbage".to_string();
        assert!(signer.sign(&creds, &buy_args()).await.is_err());
    }

    #[test]
    fn test_rejects_bad_exchange_address() {
        assert!(Eip712OrderSigner::new(137, "not-an-address").is_err());
    }
}
