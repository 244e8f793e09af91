//! Solana toolkit for the conversational agent.
//!
//! Read-only tools (`wallet_address`, `sol_balance`) talk to a JSON-RPC
//! node directly. Tools that need a signature are forwarded to a signing
//! bridge and are only advertised when `SOLANA_TOOLKIT_URL` is set.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::config::SolanaConfig;
use crate::error::AgentError;
use crate::services::agent::{ToolSpec, Toolkit};
use crate::services::{Capability, CapabilitySet, WalletRecord};

const LAMPORTS_PER_SOL: Decimal = dec!(1_000_000_000);

const DEFAULT_TOKEN_DECIMALS: u64 = 9;
const DEFAULT_TOKEN_SUPPLY: u64 = 1_000_000;

static BASE58_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[1-9A-HJ-NP-Za-km-z]{32,44}$").expect("valid base-58 address pattern")
});

/// Base-58 alphabet (no `0`, `O`, `I`, `l`) and 32 to 44 characters.
pub fn is_valid_address(candidate: &str) -> bool {
    BASE58_ADDRESS.is_match(candidate)
}

/// Lamports to SOL, exact.
pub fn lamports_to_sol(lamports: u64) -> Decimal {
    (Decimal::from(lamports) / LAMPORTS_PER_SOL).normalize()
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct BalanceResult {
    value: u64,
}

pub struct SolanaToolkit {
    client: reqwest::Client,
    rpc_url: String,
    bridge_url: Option<String>,
}

impl SolanaToolkit {
    pub fn new(config: &SolanaConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            rpc_url: config.rpc_url.clone(),
            bridge_url: config.toolkit_url.clone(),
        }
    }

    fn tool_failed(name: &str, reason: impl Into<String>) -> AgentError {
        AgentError::ToolFailed {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    fn address_arg(name: &str, args: &Value, key: &str) -> Result<String, AgentError> {
        let value = args
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| Self::tool_failed(name, format!("missing '{key}'")))?;
        if !is_valid_address(value) {
            return Err(Self::tool_failed(
                name,
                format!("'{key}' is not a valid Solana address"),
            ));
        }
        Ok(value.to_string())
    }

    fn string_arg(name: &str, args: &Value, key: &str) -> Result<String, AgentError> {
        args.get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| Self::tool_failed(name, format!("missing '{key}'")))
    }

    async fn balance(&self, address: &str) -> Result<u64, AgentError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getBalance",
            "params": [address],
        });
        let response: RpcResponse<BalanceResult> = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(Self::tool_failed("sol_balance", error.message));
        }
        response
            .result
            .map(|r| r.value)
            .ok_or_else(|| Self::tool_failed("sol_balance", "RPC returned no result"))
    }

    async fn bridge(&self, name: &str, path: &str, body: Value) -> Result<Value, AgentError> {
        let Some(base) = &self.bridge_url else {
            return Err(AgentError::Unsupported {
                capability: name.to_string(),
            });
        };

        let response = self
            .client
            .post(format!("{base}/{path}"))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Self::tool_failed(
                name,
                format!(
                    "signing bridge HTTP {status}: {}",
                    text.chars().take(300).collect::<String>()
                ),
            ));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl Toolkit for SolanaToolkit {
    fn capabilities(&self) -> CapabilitySet {
        let caps = CapabilitySet::new()
            .with(Capability::WalletAddress)
            .with(Capability::SolBalance);
        if self.bridge_url.is_some() {
            caps.with(Capability::CreateCollection)
                .with(Capability::MintNft)
                .with(Capability::Transfer)
                .with(Capability::DeployToken)
        } else {
            caps
        }
    }

    fn tools(&self) -> Vec<ToolSpec> {
        let mut tools = vec![
            ToolSpec {
                name: Capability::WalletAddress.to_string(),
                description: "Get the user's Solana wallet address.".to_string(),
                parameters: json!({ "type": "object", "properties": {} }),
            },
            ToolSpec {
                name: Capability::SolBalance.to_string(),
                description: "Get the SOL balance of the user's wallet or of another address."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "address": { "type": "string", "description": "Defaults to the user's wallet" }
                    },
                }),
            },
        ];

        if self.bridge_url.is_some() {
            tools.push(ToolSpec {
                name: Capability::CreateCollection.to_string(),
                description: "Create an NFT collection from a metadata URI.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "uri": { "type": "string", "description": "Metadata JSON URI" },
                        "symbol": { "type": "string" },
                        "royalty_basis_points": { "type": "integer", "minimum": 0, "maximum": 10000 }
                    },
                    "required": ["name", "uri"],
                }),
            });
            tools.push(ToolSpec {
                name: Capability::MintNft.to_string(),
                description: "Mint an NFT into an existing collection.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "collection": { "type": "string", "description": "Collection address" },
                        "name": { "type": "string" },
                        "uri": { "type": "string", "description": "Image or metadata URI" }
                    },
                    "required": ["collection", "uri"],
                }),
            });
            tools.push(ToolSpec {
                name: Capability::Transfer.to_string(),
                description: "Transfer SOL, or an SPL token when `mint` is given.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "to": { "type": "string" },
                        "amount": { "type": "number", "exclusiveMinimum": 0 },
                        "mint": { "type": "string" }
                    },
                    "required": ["to", "amount"],
                }),
            });
            tools.push(ToolSpec {
                name: Capability::DeployToken.to_string(),
                description: "Launch a new SPL token with the user's wallet as mint authority."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "symbol": { "type": "string" },
                        "uri": { "type": "string", "description": "Token image or metadata URI" },
                        "decimals": { "type": "integer", "minimum": 0, "maximum": 9 },
                        "initial_supply": { "type": "integer", "minimum": 1 }
                    },
                    "required": ["name", "symbol", "uri"],
                }),
            });
        }

        tools
    }

    async fn call(
        &self,
        wallet: &WalletRecord,
        name: &str,
        args: Value,
    ) -> Result<Value, AgentError> {
        let signer = json!({ "wallet_id": wallet.wallet_id, "address": wallet.address });

        match name {
            "wallet_address" => Ok(json!({ "address": wallet.address })),
            "sol_balance" => {
                let address = match args.get("address") {
                    Some(_) => Self::address_arg(name, &args, "address")?,
                    None => wallet.address.clone(),
                };
                let lamports = self.balance(&address).await?;
                Ok(json!({
                    "address": address,
                    "lamports": lamports,
                    "sol": lamports_to_sol(lamports).to_string(),
                }))
            }
            "create_collection" => {
                let body = json!({
                    "signer": signer,
                    "name": Self::string_arg(name, &args, "name")?,
                    "uri": Self::string_arg(name, &args, "uri")?,
                    "symbol": args.get("symbol").cloned().unwrap_or(Value::Null),
                    "royalty_basis_points": args.get("royalty_basis_points").cloned().unwrap_or(json!(0)),
                });
                self.bridge(name, "collections", body).await
            }
            "mint_nft" => {
                let body = json!({
                    "signer": signer,
                    "collection": Self::address_arg(name, &args, "collection")?,
                    "name": args.get("name").cloned().unwrap_or(Value::Null),
                    "uri": Self::string_arg(name, &args, "uri")?,
                });
                self.bridge(name, "nfts", body).await
            }
            "transfer" => {
                let amount = args
                    .get("amount")
                    .and_then(Value::as_f64)
                    .filter(|a| *a > 0.0)
                    .ok_or_else(|| Self::tool_failed(name, "'amount' must be positive"))?;
                let mint = match args.get("mint") {
                    Some(_) => Some(Self::address_arg(name, &args, "mint")?),
                    None => None,
                };
                let body = json!({
                    "signer": signer,
                    "to": Self::address_arg(name, &args, "to")?,
                    "amount": amount,
                    "mint": mint,
                });
                self.bridge(name, "transfers", body).await
            }
            "deploy_token" => {
                let decimals = match args.get("decimals") {
                    Some(value) => value
                        .as_u64()
                        .filter(|d| *d <= 9)
                        .ok_or_else(|| Self::tool_failed(name, "'decimals' must be 0 to 9"))?,
                    None => DEFAULT_TOKEN_DECIMALS,
                };
                let initial_supply = match args.get("initial_supply") {
                    Some(value) => value.as_u64().filter(|s| *s > 0).ok_or_else(|| {
                        Self::tool_failed(name, "'initial_supply' must be a positive integer")
                    })?,
                    None => DEFAULT_TOKEN_SUPPLY,
                };
                let body = json!({
                    "signer": signer,
                    "name": Self::string_arg(name, &args, "name")?,
                    "symbol": Self::string_arg(name, &args, "symbol")?,
                    "uri": Self::string_arg(name, &args, "uri")?,
                    "decimals": decimals,
                    "initial_supply": initial_supply,
                });
                self.bridge(name, "tokens", body).await
            }
            other => Err(AgentError::Unsupported {
                capability: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn toolkit(bridge: Option<&str>) -> SolanaToolkit {
        SolanaToolkit::new(&SolanaConfig {
            rpc_url: "http://127.0.0.1:1".to_string(),
            toolkit_url: bridge.map(str::to_string),
        })
    }

    fn wallet() -> WalletRecord {
        WalletRecord {
            user_id: "42".to_string(),
            address: "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin".to_string(),
            wallet_id: "w-1".to_string(),
            is_delegated: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn address_validation() {
        assert!(is_valid_address("9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin"));
        assert!(is_valid_address("11111111111111111111111111111111"));
        // 0, O, I and l are outside the alphabet.
        assert!(!is_valid_address("0xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin"));
        assert!(!is_valid_address("OxQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin"));
        assert!(!is_valid_address("short"));
        assert!(!is_valid_address(&"1".repeat(45)));
        assert!(!is_valid_address(" 9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin"));
    }

    #[test]
    fn lamports_convert_exactly() {
        assert_eq!(lamports_to_sol(1_500_000_000).to_string(), "1.5");
        assert_eq!(lamports_to_sol(1).to_string(), "0.000000001");
        assert_eq!(lamports_to_sol(0).to_string(), "0");
    }

    #[test]
    fn capabilities_depend_on_bridge() {
        let read_only = toolkit(None);
        assert!(read_only.capabilities().supports(Capability::SolBalance));
        assert!(!read_only.capabilities().supports(Capability::MintNft));
        assert_eq!(read_only.tools().len(), 2);

        let signing = toolkit(Some("http://127.0.0.1:9"));
        assert!(signing.capabilities().supports(Capability::CreateCollection));
        assert!(signing.capabilities().supports(Capability::Transfer));
        assert!(signing.capabilities().supports(Capability::DeployToken));
        assert_eq!(signing.tools().len(), 6);
        assert!(!read_only.capabilities().supports(Capability::DeployToken));
    }

    #[tokio::test]
    async fn wallet_address_tool_is_local() {
        let result = toolkit(None)
            .call(&wallet(), "wallet_address", json!({}))
            .await
            .unwrap();
        assert_eq!(result["address"], wallet().address);
    }

    #[tokio::test]
    async fn signing_tools_unsupported_without_bridge() {
        let err = toolkit(None)
            .call(
                &wallet(),
                "mint_nft",
                json!({ "collection": wallet().address, "uri": "https://x" }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn deploy_token_validates_before_bridge() {
        let signing = toolkit(Some("http://127.0.0.1:9"));
        let err = signing
            .call(
                &wallet(),
                "deploy_token",
                json!({ "name": "Fox", "symbol": "FOX", "uri": "https://x", "decimals": 12 }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolFailed { .. }));

        let err = signing
            .call(&wallet(), "deploy_token", json!({ "name": "Fox", "uri": "https://x" }))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolFailed { .. }));

        let err = toolkit(None)
            .call(
                &wallet(),
                "deploy_token",
                json!({ "name": "Fox", "symbol": "FOX", "uri": "https://x" }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn transfer_rejects_bad_recipient() {
        let err = toolkit(Some("http://127.0.0.1:9"))
            .call(&wallet(), "transfer", json!({ "to": "nope", "amount": 1.0 }))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolFailed { .. }));
    }
}
