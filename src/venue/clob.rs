//! CLOB HTTP client
//!
//! Order submission, order-fill queries, fee rates and collateral balance
//! against the venue's CLOB REST API. Authenticated endpoints carry the
//! venue's L2 headers: an HMAC-SHA256 of `timestamp + method + path + body`
//! keyed by the account's API secret.

use super::{BalanceClient, OrderAck, OrderClient, OrderFill, SignedOrder};
use crate::account::Credentials;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::str::FromStr;
use std::time::Duration;

/// CLOB REST base URL
pub const CLOB_API_URL: &str = "https://clob.polymarket.com";

/// USDC carries six decimals on the wire.
const COLLATERAL_SCALE: u32 = 6;

#[derive(Debug, Clone)]
pub struct ClobConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for ClobConfig {
    fn default() -> Self {
        Self {
            base_url: CLOB_API_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

pub struct ClobClient {
    config: ClobConfig,
    client: Client,
}

impl ClobClient {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_config(ClobConfig::default())
    }

    pub fn with_config(config: ClobConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Attach the venue's L2 auth headers to a request.
    fn authed(
        &self,
        request: reqwest::RequestBuilder,
        creds: &Credentials,
        method: &str,
        path: &str,
        body: &str,
    ) -> anyhow::Result<reqwest::RequestBuilder> {
        let timestamp = Utc::now().timestamp().to_string();
        let signature = l2_signature(&creds.api_secret, &timestamp, method, path, body)?;
        Ok(request
            .header("POLY_ADDRESS", &creds.address)
            .header("POLY_SIGNATURE", signature)
            .header("POLY_TIMESTAMP", timestamp)
            .header("POLY_API_KEY", &creds.api_key)
            .header("POLY_PASSPHRASE", &creds.api_passphrase))
    }
}

/// HMAC-SHA256 over `timestamp + method + path + body`, keys and digest in
/// url-safe base64.
fn l2_signature(
    api_secret: &str,
    timestamp: &str,
    method: &str,
    path: &str,
    body: &str,
) -> anyhow::Result<String> {
    let key = URL_SAFE
        .decode(api_secret)
        .map_err(|e| anyhow::anyhow!("invalid api secret encoding: {}", e))?;
    let mut mac = Hmac::<Sha256>::new_from_slice(&key)
        .map_err(|e| anyhow::anyhow!("invalid hmac key: {}", e))?;
    mac.update(timestamp.as_bytes());
    mac.update(method.as_bytes());
    mac.update(path.as_bytes());
    mac.update(body.as_bytes());
    Ok(URL_SAFE.encode(mac.finalize().into_bytes()))
}

#[derive(Debug, Serialize)]
struct NewOrderRequest<'a> {
    order: &'a SignedOrder,
    owner: &'a str,
    #[serde(rename = "orderType")]
    order_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct NewOrderResponse {
    #[serde(default)]
    success: bool,
    #[serde(rename = "orderID", alias = "orderId", default)]
    order_id: Option<String>,
    #[serde(rename = "errorMsg", default)]
    error_msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenOrderResponse {
    #[serde(default)]
    price: Option<String>,
    #[serde(default)]
    size_matched: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: String,
}

#[derive(Debug, Deserialize)]
struct FeeRateResponse {
    #[serde(rename = "feeRateBps", alias = "fee_rate_bps", default)]
    fee_rate_bps: Option<serde_json::Value>,
}

#[async_trait]
impl OrderClient for ClobClient {
    async fn submit(&self, creds: &Credentials, order: &SignedOrder) -> anyhow::Result<OrderAck> {
        let path = "/order";
        let request = NewOrderRequest {
            order,
            owner: &creds.api_key,
            // fill-and-kill: take whatever rests at or under the cap, never rest
            order_type: "FAK",
        };
        let body = serde_json::to_string(&request)?;

        let response = self
            .authed(
                self.client.post(self.url(path)),
                creds,
                "POST",
                path,
                &body,
            )?
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Ok(OrderAck {
                success: false,
                order_id: None,
                error_msg: Some(format!("HTTP {} {}", status, text)),
            });
        }

        let ack: NewOrderResponse = response.json().await?;
        Ok(OrderAck {
            success: ack.success && ack.order_id.is_some(),
            order_id: ack.order_id,
            error_msg: ack.error_msg,
        })
    }

    async fn order_fill(
        &self,
        creds: &Credentials,
        order_id: &str,
    ) -> anyhow::Result<Option<OrderFill>> {
        let path = format!("/data/order/{}", order_id);

        let response = self
            .authed(self.client.get(self.url(&path)), creds, "GET", &path, "")?
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            anyhow::bail!("order query failed: HTTP {}", response.status());
        }

        let order: OpenOrderResponse = response.json().await?;
        let (Some(price), Some(size)) = (order.price, order.size_matched) else {
            return Ok(None);
        };
        let (Ok(price), Ok(size_matched)) = (Decimal::from_str(&price), Decimal::from_str(&size))
        else {
            return Ok(None);
        };
        Ok(Some(OrderFill {
            price,
            size_matched,
        }))
    }

    async fn fee_rate_bps(&self, token_id: &str) -> anyhow::Result<Decimal> {
        let response = self
            .client
            .get(self.url("/fee-rate"))
            .query(&[("token_id", token_id)])
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("fee rate query failed: HTTP {}", response.status());
        }

        let parsed: FeeRateResponse = response.json().await?;
        Ok(parse_fee_rate(parsed.fee_rate_bps))
    }
}

#[async_trait]
impl BalanceClient for ClobClient {
    async fn available_balance(&self, creds: &Credentials) -> anyhow::Result<Decimal> {
        let path = "/balance-allowance";
        let response = self
            .authed(self.client.get(self.url(path)), creds, "GET", path, "")?
            .query(&[
                ("asset_type", "COLLATERAL"),
                ("signature_type", &creds.signature_type().to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("balance query failed: HTTP {}", response.status());
        }

        let parsed: BalanceResponse = response.json().await?;
        let raw = Decimal::from_str(&parsed.balance)
            .map_err(|e| anyhow::anyhow!("unparseable balance {:?}: {}", parsed.balance, e))?;
        Ok(raw / Decimal::from(10u64.pow(COLLATERAL_SCALE)))
    }
}

/// The fee-rate field arrives as a number or a numeric string.
fn parse_fee_rate(value: Option<serde_json::Value>) -> Decimal {
    match value {
        Some(serde_json::Value::String(s)) => Decimal::from_str(&s).unwrap_or_default(),
        Some(serde_json::Value::Number(n)) => {
            Decimal::from_str(&n.to_string()).unwrap_or_default()
        }
        _ => Decimal::ZERO,
    }
}
