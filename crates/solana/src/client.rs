//! Solana JSON-RPC client implementing the chain source port.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_client::rpc_response::RpcConfirmedTransactionStatusWithSignature;
use solana_sdk::commitment_config::{CommitmentConfig, CommitmentLevel};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_transaction_status::option_serializer::OptionSerializer;
use solana_transaction_status::{
    EncodedConfirmedTransactionWithStatusMeta, UiLoadedAddresses, UiTransactionEncoding,
};
use tracing::{debug, instrument, trace};

use blipscan_core::error::{ChainError, ChainResult};
use blipscan_core::models::Address;
use blipscan_core::ports::{
    ChainAccount, ChainSource, ChainTransaction, SignatureInfo, SignatureQuery,
};

/// Configuration for the Solana client.
#[derive(Debug, Clone)]
pub struct SolanaClientConfig {
    /// HTTP JSON-RPC endpoint.
    pub rpc_url: String,
    /// Timeout of every request.
    pub timeout: Duration,
    /// Commitment used for reads. Signature listing needs at least `confirmed`.
    pub commitment: CommitmentLevel,
}

impl Default for SolanaClientConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.devnet.solana.com".to_string(),
            timeout: Duration::from_secs(30),
            commitment: CommitmentLevel::Confirmed,
        }
    }
}

/// Solana client adapter implementing the ChainSource port.
pub struct SolanaRpcClient {
    client: RpcClient,
    commitment: CommitmentConfig,
    timeout: Duration,
}

impl SolanaRpcClient {
    /// Create a client for the configured endpoint.
    ///
    /// No request is made here; reachability is checked by the first call.
    #[instrument(skip_all, fields(url = %config.rpc_url))]
    pub fn connect(config: SolanaClientConfig) -> ChainResult<Self> {
        if config.commitment == CommitmentLevel::Processed {
            return Err(ChainError::ConnectionFailed(
                "signature listing requires at least 'confirmed' commitment".into(),
            ));
        }

        let commitment = CommitmentConfig {
            commitment: config.commitment,
        };
        let client = RpcClient::new_with_timeout_and_commitment(
            config.rpc_url,
            config.timeout,
            commitment,
        );
        debug!("RPC client created");

        Ok(Self {
            client,
            commitment,
            timeout: config.timeout,
        })
    }

    fn map_error(&self, err: ClientError) -> ChainError {
        match err.kind() {
            ClientErrorKind::Io(e) => ChainError::ConnectionFailed(e.to_string()),
            ClientErrorKind::Reqwest(e) if e.is_timeout() => ChainError::Timeout(self.timeout),
            ClientErrorKind::Reqwest(e) if e.is_connect() => {
                ChainError::ConnectionFailed(e.to_string())
            }
            _ => ChainError::RpcError(err.to_string()),
        }
    }
}

#[async_trait]
impl ChainSource for SolanaRpcClient {
    async fn current_slot(&self) -> ChainResult<u64> {
        self.client
            .get_slot_with_commitment(self.commitment)
            .await
            .map_err(|e| self.map_error(e))
    }

    async fn list_signatures(
        &self,
        program: &Address,
        query: &SignatureQuery,
    ) -> ChainResult<Vec<SignatureInfo>> {
        let config = GetConfirmedSignaturesForAddress2Config {
            before: query.before.as_deref().map(parse_signature).transpose()?,
            until: query.until.as_deref().map(parse_signature).transpose()?,
            limit: Some(query.limit),
            commitment: Some(self.commitment),
        };

        let statuses = self
            .client
            .get_signatures_for_address_with_config(&to_pubkey(program), config)
            .await
            .map_err(|e| self.map_error(e))?;

        trace!(count = statuses.len(), "Signatures listed");
        Ok(statuses.into_iter().map(signature_info).collect())
    }

    async fn get_transaction(&self, signature: &str) -> ChainResult<Option<ChainTransaction>> {
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            commitment: Some(self.commitment),
            max_supported_transaction_version: Some(0),
        };

        match self
            .client
            .get_transaction_with_config(&parse_signature(signature)?, config)
            .await
        {
            Ok(tx) => into_chain_transaction(signature, tx).map(Some),
            // The node answers `null` for transactions it does not have.
            Err(e) if matches!(e.kind(), ClientErrorKind::SerdeJson(_)) => {
                trace!(signature, "Transaction not available");
                Ok(None)
            }
            Err(e) => Err(self.map_error(e)),
        }
    }

    async fn get_account(&self, address: &Address) -> ChainResult<Option<ChainAccount>> {
        let response = self
            .client
            .get_account_with_commitment(&to_pubkey(address), self.commitment)
            .await
            .map_err(|e| self.map_error(e))?;

        Ok(response.value.map(|account| ChainAccount {
            owner: to_address(&account.owner),
            data: account.data,
        }))
    }
}

// =============================================================================
// Conversion helpers
// =============================================================================

fn to_pubkey(address: &Address) -> Pubkey {
    Pubkey::new_from_array(address.0)
}

fn to_address(pubkey: &Pubkey) -> Address {
    Address(pubkey.to_bytes())
}

fn parse_signature(value: &str) -> ChainResult<Signature> {
    Signature::from_str(value)
        .map_err(|e| ChainError::InvalidData(format!("invalid signature '{value}': {e}")))
}

fn parse_address(value: &str) -> ChainResult<Address> {
    value
        .parse()
        .map_err(|e| ChainError::InvalidData(format!("invalid account key '{value}': {e}")))
}

fn signature_info(status: RpcConfirmedTransactionStatusWithSignature) -> SignatureInfo {
    SignatureInfo {
        signature: status.signature,
        slot: status.slot,
        block_time: status.block_time,
        failed: status.err.is_some(),
    }
}

/// Static keys first, then lookup-table addresses (writable before readonly),
/// which is the runtime's account index order.
fn account_keys(
    static_keys: &[Pubkey],
    loaded: Option<&UiLoadedAddresses>,
) -> ChainResult<Vec<Address>> {
    let mut keys: Vec<Address> = static_keys.iter().map(to_address).collect();
    if let Some(loaded) = loaded {
        for key in loaded.writable.iter().chain(&loaded.readonly) {
            keys.push(parse_address(key)?);
        }
    }
    Ok(keys)
}

fn into_chain_transaction(
    signature: &str,
    tx: EncodedConfirmedTransactionWithStatusMeta,
) -> ChainResult<ChainTransaction> {
    let decoded = tx.transaction.transaction.decode().ok_or_else(|| {
        ChainError::InvalidData(format!("transaction {signature} could not be decoded"))
    })?;

    let (failed, log_messages, loaded) = match tx.transaction.meta {
        Some(meta) => {
            let logs = match meta.log_messages {
                OptionSerializer::Some(logs) => logs,
                _ => Vec::new(),
            };
            let loaded = match meta.loaded_addresses {
                OptionSerializer::Some(loaded) => Some(loaded),
                _ => None,
            };
            (meta.err.is_some(), logs, loaded)
        }
        None => (false, Vec::new(), None),
    };

    Ok(ChainTransaction {
        signature: signature.to_string(),
        slot: tx.slot,
        block_time: tx.block_time,
        log_messages,
        account_keys: account_keys(decoded.message.static_account_keys(), loaded.as_ref())?,
        failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn status(err: serde_json::Value) -> RpcConfirmedTransactionStatusWithSignature {
        serde_json::from_value(json!({
            "signature": "sig",
            "slot": 77,
            "err": err,
            "memo": null,
            "blockTime": 1_700_000_000,
            "confirmationStatus": "confirmed",
        }))
        .unwrap()
    }

    #[test]
    fn pubkey_roundtrip() {
        let address = Address([9; 32]);
        let pubkey = to_pubkey(&address);
        assert_eq!(pubkey.to_string(), address.to_string());
        assert_eq!(to_address(&pubkey), address);
    }

    #[test]
    fn failed_status_is_flagged() {
        let ok = signature_info(status(json!(null)));
        assert_eq!(ok.slot, 77);
        assert_eq!(ok.block_time, Some(1_700_000_000));
        assert!(!ok.failed);

        let failed = status(json!({ "InstructionError": [0, { "Custom": 6001 }] }));
        assert!(signature_info(failed).failed);
    }

    #[test]
    fn loaded_addresses_follow_static_keys() {
        let static_keys = [Pubkey::new_from_array([1; 32]), Pubkey::new_from_array([2; 32])];
        let loaded = UiLoadedAddresses {
            writable: vec![Address([3; 32]).to_string()],
            readonly: vec![Address([4; 32]).to_string()],
        };

        let keys = account_keys(&static_keys, Some(&loaded)).unwrap();
        assert_eq!(
            keys,
            vec![
                Address([1; 32]),
                Address([2; 32]),
                Address([3; 32]),
                Address([4; 32])
            ]
        );
        assert_eq!(account_keys(&static_keys, None).unwrap().len(), 2);
    }

    #[test]
    fn malformed_inputs_are_invalid_data() {
        assert!(matches!(
            parse_signature("not a signature"),
            Err(ChainError::InvalidData(_))
        ));

        let loaded = UiLoadedAddresses {
            writable: vec!["???".into()],
            readonly: vec![],
        };
        assert!(matches!(
            account_keys(&[], Some(&loaded)),
            Err(ChainError::InvalidData(_))
        ));
    }

    #[test]
    fn processed_commitment_is_refused() {
        let config = SolanaClientConfig {
            commitment: CommitmentLevel::Processed,
            ..Default::default()
        };
        assert!(SolanaRpcClient::connect(config).is_err());
        assert!(SolanaRpcClient::connect(SolanaClientConfig::default()).is_ok());
    }
}
