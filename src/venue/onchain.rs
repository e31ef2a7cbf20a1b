//! On-chain condition/payout lookup
//!
//! Reads the conditional-tokens contract over JSON-RPC `eth_call`. A
//! condition is resolved once its payout denominator is non-zero; the payout
//! vector then says which outcome redeemed at 1.

use super::ConditionOracle;
use alloy::primitives::{B256, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;

/// Conditional tokens contract on Polygon mainnet.
pub const DEFAULT_CTF_ADDRESS: &str = "0x4D97DCd97eC945f40cF65F87097ACe5EA0476045";

sol! {
    function payoutDenominator(bytes32 conditionId) external view returns (uint256);
    function payoutNumerators(bytes32 conditionId, uint256 index) external view returns (uint256);
    function getOutcomeSlotCount(bytes32 conditionId) external view returns (uint256);
}

#[derive(Debug, Clone)]
pub struct OnchainConfig {
    pub rpc_url: String,
    pub ctf_address: String,
    pub timeout: Duration,
}

impl Default for OnchainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://polygon-rpc.com".to_string(),
            ctf_address: DEFAULT_CTF_ADDRESS.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Payout oracle backed by the conditional-tokens contract.
pub struct CtfOracle {
    config: OnchainConfig,
    client: Client,
}

impl CtfOracle {
    pub fn new(config: OnchainConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    /// `eth_call` with the given calldata, decoding a single uint256 return.
    async fn call_u256(&self, calldata: Vec<u8>) -> anyhow::Result<U256> {
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_call",
            "params": [
                {
                    "to": self.config.ctf_address,
                    "data": format!("0x{}", hex::encode(calldata)),
                },
                "latest"
            ],
        });

        let response = self
            .client
            .post(&self.config.rpc_url)
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("rpc call failed: HTTP {}", response.status());
        }

        let body: serde_json::Value = response.json().await?;
        if let Some(error) = body.get("error") {
            anyhow::bail!("rpc error: {}", error);
        }
        let result = body
            .get("result")
            .and_then(|r| r.as_str())
            .ok_or_else(|| anyhow::anyhow!("rpc response missing result"))?;

        decode_u256(result)
    }
}

#[async_trait]
impl ConditionOracle for CtfOracle {
    async fn payouts(&self, condition_id: &str) -> anyhow::Result<Option<Vec<Decimal>>> {
        let cid = B256::from_str(condition_id)
            .map_err(|e| anyhow::anyhow!("invalid condition id {}: {}", condition_id, e))?;

        let denominator = self
            .call_u256(payoutDenominatorCall { conditionId: cid }.abi_encode())
            .await?;
        if denominator.is_zero() {
            return Ok(None);
        }
        let denominator = to_u64(denominator)?;

        let slots = to_u64(
            self.call_u256(getOutcomeSlotCountCall { conditionId: cid }.abi_encode())
                .await?,
        )?;

        let mut payouts = Vec::with_capacity(slots as usize);
        for index in 0..slots {
            let numerator = to_u64(
                self.call_u256(
                    payoutNumeratorsCall {
                        conditionId: cid,
                        index: U256::from(index),
                    }
                    .abi_encode(),
                )
                .await?,
            )?;
            payouts.push(Decimal::from(numerator) / Decimal::from(denominator));
        }

        Ok(Some(payouts))
    }
}

/// Decode a 32-byte hex word into a U256.
fn decode_u256(result: &str) -> anyhow::Result<U256> {
    let raw = hex::decode(result.trim_start_matches("0x"))
        .map_err(|e| anyhow::anyhow!("unparseable rpc result: {}", e))?;
    if raw.len() < 32 {
        anyhow::bail!("rpc result too short: {} bytes", raw.len());
    }
    Ok(U256::from_be_slice(&raw[..32]))
}

fn to_u64(value: U256) -> anyhow::Result<u64> {
    u64::try_from(value).map_err(|_| anyhow::anyhow!("on-chain value out of range: {}", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CID: &str = "0x00000000000000000000000000000000000000000000000000000000000000c1";

    #[test]
    fn test_calldata_carries_condition_id() {
        let cid = B256::from_str(CID).unwrap();
        let data = payoutDenominatorCall { conditionId: cid }.abi_encode();
        // 4-byte selector + one 32-byte word
        assert_eq!(data.len(), 36);
        assert_eq!(&data[4..], cid.as_slice());
    }

    #[test]
    fn test_numerator_calldata_carries_index() {
        let cid = B256::from_str(CID).unwrap();
        let data = payoutNumeratorsCall {
            conditionId: cid,
            index: U256::from(1u64),
        }
        .abi_encode();
        assert_eq!(data.len(), 68);
        assert_eq!(data[67], 1);
    }

    #[test]
    fn test_decode_u256() {
        let one = format!("0x{}{}", "0".repeat(63), "1");
        assert_eq!(decode_u256(&one).unwrap(), U256::from(1u64));
        assert!(decode_u256("0x12").is_err());
        assert!(decode_u256("nonsense").is_err());
    }

    #[test]
    fn test_invalid_condition_id_is_error() {
        let config = OnchainConfig::default();
        let oracle = CtfOracle::new(config).unwrap();
        let result = tokio_test::block_on(oracle.payouts("0xshort"));
        assert!(result.is_err());
    }
}
