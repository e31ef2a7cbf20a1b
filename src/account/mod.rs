//! Trading account credentials
//!
//! Credential storage and decryption live upstream; the core receives
//! already-decrypted material through [`AccountProvider`] and never persists
//! it. The wallet type decides the signature-type discriminant the venue
//! expects on signed orders.

use serde::Deserialize;
use std::collections::HashMap;

/// Wallet custody type, mapped to the venue's signature type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletType {
    /// Externally owned account signing for itself.
    Eoa,
    /// Email/magic-link wallet (venue signature type 1).
    Email,
    /// Browser proxy wallet (venue signature type 2).
    #[default]
    Proxy,
}

impl WalletType {
    pub fn signature_type(self) -> u8 {
        match self {
            WalletType::Eoa => 0,
            WalletType::Email => 1,
            WalletType::Proxy => 2,
        }
    }
}

/// Decrypted credential bundle for one trading account.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub id: i64,
    /// EOA address that signs orders.
    pub address: String,
    /// Funder address orders are placed for (proxy wallet), if different.
    #[serde(default)]
    pub proxy_address: Option<String>,
    pub api_key: String,
    pub api_secret: String,
    pub api_passphrase: String,
    /// Hex-encoded signing key.
    pub private_key: String,
    #[serde(default)]
    pub wallet_type: WalletType,
}

impl Credentials {
    /// Address orders are placed on behalf of.
    pub fn maker_address(&self) -> &str {
        self.proxy_address.as_deref().unwrap_or(&self.address)
    }

    pub fn signature_type(&self) -> u8 {
        self.wallet_type.signature_type()
    }
}

/// Source of decrypted account credentials.
pub trait AccountProvider: Send + Sync {
    fn credentials(&self, account_id: i64) -> Option<Credentials>;
}

/// Accounts supplied by the operator's config file.
pub struct ConfigAccounts {
    accounts: HashMap<i64, Credentials>,
}

impl ConfigAccounts {
    pub fn new(accounts: Vec<Credentials>) -> Self {
        Self {
            accounts: accounts.into_iter().map(|a| (a.id, a)).collect(),
        }
    }
}

impl AccountProvider for ConfigAccounts {
    fn credentials(&self, account_id: i64) -> Option<Credentials> {
        self.accounts.get(&account_id).cloned()
    }
}

#[cfg(test)]
pub fn test_credentials(id: i64) -> Credentials {
    Credentials {
        id,
        address: "0x00000000000000000000000000000000000000a1".to_string(),
        proxy_address: Some("0x00000000000000000000000000000000000000b2".to_string()),
        api_key: "key".to_string(),
        api_secret: "c2VjcmV0".to_string(),
        api_passphrase: "pass".to_string(),
        private_key: "0x0000000000000000000000000000000000000000000000000000000000000001"
            .to_string(),
        wallet_type: WalletType::Proxy,
    }
}
