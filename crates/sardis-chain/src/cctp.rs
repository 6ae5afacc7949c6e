//! Cross-chain USDC bridging via Circle's CCTP.
//!
//! Flow: approve the TokenMessenger, `depositForBurn` on the source chain,
//! await Circle's attestation of the burn message, then `receiveMessage` on
//! the destination chain. Every transition is recorded on the
//! [`BridgeTransfer`] so reconciliation can resume an interrupted bridge.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use sardis_types::{AmountMinor, WalletId};

use crate::config::usdc_address;
use crate::error::ChainError;

/// CCTP domain ids assigned by Circle.
pub fn cctp_domain(chain: &str) -> Result<u32, ChainError> {
    match chain {
        "ethereum" => Ok(0),
        "optimism" => Ok(2),
        "arbitrum" => Ok(3),
        "base" => Ok(6),
        "polygon" => Ok(7),
        _ => Err(ChainError::UnsupportedChain(format!("{chain} is not CCTP-enabled"))),
    }
}

/// TokenMessenger contract per chain (mainnet).
pub fn token_messenger(chain: &str) -> Result<&'static str, ChainError> {
    match chain {
        "ethereum" => Ok("0xBd3fa81B58Ba92a82136038B25aDec7066af3155"),
        "optimism" => Ok("0x2B4069517957735bE00ceE0fadAE88a26365528f"),
        "arbitrum" => Ok("0x19330d10D9Cc8751218eaf51E8885D058642E08A"),
        "base" => Ok("0x1682Ae6375C4E4A97e4B583BC394c861A46D8962"),
        "polygon" => Ok("0x9daF8c91AEFAE50b9c0E69629D3F6Ca40cA3B3FE"),
        _ => Err(ChainError::UnsupportedChain(format!("{chain} is not CCTP-enabled"))),
    }
}

/// MessageTransmitter contract per chain (mainnet).
pub fn message_transmitter(chain: &str) -> Result<&'static str, ChainError> {
    match chain {
        "ethereum" => Ok("0x0a992d191DEeC32aFe36203Ad87D7d289a738F81"),
        "optimism" => Ok("0x4D41f22c5a0e5c74090899E5a8Fb597a8842b3e8"),
        "arbitrum" => Ok("0xC30362313FBBA5cf9163F0bb16a0e01f01A896ca"),
        "base" => Ok("0xAD09780d193884d503182aD4F75D8d59B696c4D7"),
        "polygon" => Ok("0xF3be9355363857F3e001be68856A2f96b4C39bA9"),
        _ => Err(ChainError::UnsupportedChain(format!("{chain} is not CCTP-enabled"))),
    }
}

pub const CIRCLE_ATTESTATION_API_URL: &str = "https://iris-api.circle.com/attestations";
pub const CIRCLE_ATTESTATION_API_SANDBOX_URL: &str =
    "https://iris-api-sandbox.circle.com/attestations";

/// Bridge time estimate, driven by source-chain finality.
pub fn bridge_estimate_secs(from_chain: &str, to_chain: &str) -> u64 {
    fn per_chain(chain: &str) -> u64 {
        match chain {
            "ethereum" => 1_200,
            "optimism" | "arbitrum" | "base" => 780,
            _ => 900,
        }
    }
    per_chain(from_chain).max(per_chain(to_chain))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeStatus {
    Initiated,
    DepositSubmitted,
    AwaitingAttestation,
    AttestationReceived,
    Completing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeTransfer {
    pub transfer_id: String,
    pub wallet_id: WalletId,
    pub from_chain: String,
    pub to_chain: String,
    pub amount_minor: AmountMinor,
    pub sender: String,
    pub recipient: String,
    pub status: BridgeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub burn_tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mint_tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Status transition log: `(status, at)` in order.
    pub history: Vec<(BridgeStatus, DateTime<Utc>)>,
    pub created_at: DateTime<Utc>,
}

impl BridgeTransfer {
    fn transition(&mut self, status: BridgeStatus) {
        self.status = status;
        self.history.push((status, Utc::now()));
    }
}

/// Submits contract calls on a chain. The live implementation signs via the
/// MPC signer and submits over JSON-RPC; the simulated one fabricates
/// deterministic hashes.
#[async_trait]
pub trait ContractCaller: Send + Sync {
    async fn call(
        &self,
        wallet_id: &WalletId,
        chain: &str,
        contract: &str,
        calldata: &[u8],
    ) -> Result<String, ChainError>;

    /// The CCTP message hash emitted by a burn transaction.
    async fn burn_message_hash(&self, chain: &str, tx_hash: &str) -> Result<String, ChainError>;
}

/// Fetches Circle attestations.
#[async_trait]
pub trait AttestationClient: Send + Sync {
    /// `Ok(Some(attestation))` once complete, `Ok(None)` while pending.
    async fn fetch(&self, message_hash: &str) -> Result<Option<String>, ChainError>;
}

/// Circle Iris API client.
pub struct CircleAttestationClient {
    base_url: String,
    client: reqwest::Client,
}

impl CircleAttestationClient {
    pub fn new(sandbox: bool) -> Self {
        Self {
            base_url: if sandbox {
                CIRCLE_ATTESTATION_API_SANDBOX_URL.to_string()
            } else {
                CIRCLE_ATTESTATION_API_URL.to_string()
            },
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AttestationClient for CircleAttestationClient {
    async fn fetch(&self, message_hash: &str) -> Result<Option<String>, ChainError> {
        let url = format!("{}/{message_hash}", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| ChainError::Attestation(e.to_string()))?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ChainError::Attestation(format!("http {}", response.status())));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChainError::Attestation(e.to_string()))?;
        match body.get("status").and_then(|s| s.as_str()) {
            Some("complete") => Ok(body
                .get("attestation")
                .and_then(|a| a.as_str())
                .map(str::to_string)),
            _ => Ok(None),
        }
    }
}

/// Simulated chain-side of CCTP for tests and simulated deployments.
#[derive(Default)]
pub struct SimulatedCctpChain {
    calls: DashMap<String, Vec<String>>,
    /// Attestations become available after `delay_polls` fetches.
    pending_polls: DashMap<String, u32>,
    pub delay_polls: u32,
}

impl SimulatedCctpChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attestation_delay(mut self, polls: u32) -> Self {
        self.delay_polls = polls;
        self
    }

    pub fn calls_on(&self, chain: &str) -> Vec<String> {
        self.calls.get(chain).map(|c| c.clone()).unwrap_or_default()
    }

    fn tx_hash(prefix: &str, calldata: &[u8]) -> String {
        format!("0x{prefix}{}", &hex::encode(Sha256::digest(calldata))[..48])
    }
}

#[async_trait]
impl ContractCaller for SimulatedCctpChain {
    async fn call(
        &self,
        _wallet_id: &WalletId,
        chain: &str,
        contract: &str,
        calldata: &[u8],
    ) -> Result<String, ChainError> {
        let selector = hex::encode(&calldata[..4.min(calldata.len())]);
        self.calls
            .entry(chain.to_string())
            .or_default()
            .push(format!("{contract}:{selector}"));
        Ok(Self::tx_hash("cc", calldata))
    }

    async fn burn_message_hash(&self, _chain: &str, tx_hash: &str) -> Result<String, ChainError> {
        Ok(format!("0x{}", hex::encode(Sha256::digest(tx_hash.as_bytes()))))
    }
}

#[async_trait]
impl AttestationClient for SimulatedCctpChain {
    async fn fetch(&self, message_hash: &str) -> Result<Option<String>, ChainError> {
        let mut remaining = self
            .pending_polls
            .entry(message_hash.to_string())
            .or_insert(self.delay_polls);
        if *remaining > 0 {
            *remaining -= 1;
            return Ok(None);
        }
        Ok(Some(format!("0xatt{}", &message_hash[2..18.min(message_hash.len())])))
    }
}

/// ERC-20 `approve(address,uint256)` selector.
const APPROVE_SELECTOR: [u8; 4] = [0x09, 0x5e, 0xa7, 0xb3];
/// `depositForBurn(uint256,uint32,bytes32,address)` selector.
const DEPOSIT_FOR_BURN_SELECTOR: [u8; 4] = [0x6f, 0xd3, 0x50, 0x4e];
/// `receiveMessage(bytes,bytes)` selector.
const RECEIVE_MESSAGE_SELECTOR: [u8; 4] = [0x57, 0xec, 0xfd, 0x28];

fn pad_address(address: &str) -> Result<[u8; 32], ChainError> {
    let parsed: alloy_primitives::Address = address
        .parse()
        .map_err(|_| ChainError::InvalidAddress(address.to_string()))?;
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(parsed.as_slice());
    Ok(word)
}

fn pad_u64(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

fn encode_approve(spender: &str, amount: u64) -> Result<Vec<u8>, ChainError> {
    let mut data = Vec::with_capacity(68);
    data.extend_from_slice(&APPROVE_SELECTOR);
    data.extend_from_slice(&pad_address(spender)?);
    data.extend_from_slice(&pad_u64(amount));
    Ok(data)
}

fn encode_deposit_for_burn(
    amount: u64,
    destination_domain: u32,
    mint_recipient: &str,
    burn_token: &str,
) -> Result<Vec<u8>, ChainError> {
    let mut data = Vec::with_capacity(4 + 32 * 4);
    data.extend_from_slice(&DEPOSIT_FOR_BURN_SELECTOR);
    data.extend_from_slice(&pad_u64(amount));
    data.extend_from_slice(&pad_u64(destination_domain as u64));
    data.extend_from_slice(&pad_address(mint_recipient)?);
    data.extend_from_slice(&pad_address(burn_token)?);
    Ok(data)
}

fn encode_receive_message(message: &[u8], attestation: &[u8]) -> Vec<u8> {
    fn encode_dynamic(bytes: &[u8]) -> Vec<u8> {
        let mut out = pad_u64(bytes.len() as u64).to_vec();
        out.extend_from_slice(bytes);
        let padding = (32 - bytes.len() % 32) % 32;
        out.resize(out.len() + padding, 0);
        out
    }

    let message_tail = encode_dynamic(message);
    let mut data = Vec::new();
    data.extend_from_slice(&RECEIVE_MESSAGE_SELECTOR);
    // Two dynamic args: offsets from the start of the argument block.
    data.extend_from_slice(&pad_u64(0x40));
    data.extend_from_slice(&pad_u64(0x40 + message_tail.len() as u64));
    data.extend_from_slice(&message_tail);
    data.extend_from_slice(&encode_dynamic(attestation));
    data
}

/// Drives a USDC bridge between two CCTP-enabled chains.
pub struct CctpBridge {
    caller: Arc<dyn ContractCaller>,
    attestations: Arc<dyn AttestationClient>,
    /// Attestation poll interval.
    poll_interval: Duration,
    /// Maximum attestation polls before the bridge fails.
    max_polls: u32,
}

impl CctpBridge {
    pub fn new(caller: Arc<dyn ContractCaller>, attestations: Arc<dyn AttestationClient>) -> Self {
        Self {
            caller,
            attestations,
            poll_interval: Duration::from_secs(15),
            max_polls: 120,
        }
    }

    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    /// Bridge `amount_minor` USDC. Runs the full flow to completion or
    /// failure; the returned transfer carries the transition history.
    pub async fn bridge_usdc(
        &self,
        wallet_id: &WalletId,
        from_chain: &str,
        to_chain: &str,
        sender: &str,
        recipient: &str,
        amount_minor: AmountMinor,
    ) -> Result<BridgeTransfer, ChainError> {
        let destination_domain = cctp_domain(to_chain)?;
        cctp_domain(from_chain)?;
        let source_usdc = usdc_address(from_chain)
            .ok_or_else(|| ChainError::UnsupportedChain(from_chain.to_string()))?;
        let messenger = token_messenger(from_chain)?;

        let mut transfer = BridgeTransfer {
            transfer_id: format!("bridge_{}", uuid::Uuid::new_v4().simple()),
            wallet_id: wallet_id.clone(),
            from_chain: from_chain.to_string(),
            to_chain: to_chain.to_string(),
            amount_minor,
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            status: BridgeStatus::Initiated,
            burn_tx_hash: None,
            message_hash: None,
            attestation: None,
            mint_tx_hash: None,
            error: None,
            history: vec![(BridgeStatus::Initiated, Utc::now())],
            created_at: Utc::now(),
        };

        match self
            .drive(&mut transfer, wallet_id, source_usdc, messenger, destination_domain)
            .await
        {
            Ok(()) => Ok(transfer),
            Err(e) => {
                transfer.error = Some(e.to_string());
                transfer.transition(BridgeStatus::Failed);
                tracing::error!(
                    transfer_id = %transfer.transfer_id,
                    error = %e,
                    "cctp bridge failed"
                );
                Ok(transfer)
            }
        }
    }

    async fn drive(
        &self,
        transfer: &mut BridgeTransfer,
        wallet_id: &WalletId,
        source_usdc: &str,
        messenger: &str,
        destination_domain: u32,
    ) -> Result<(), ChainError> {
        // Approve the messenger to burn.
        let approve = encode_approve(messenger, transfer.amount_minor)?;
        self.caller
            .call(wallet_id, &transfer.from_chain, source_usdc, &approve)
            .await?;

        // Burn on the source chain.
        let deposit = encode_deposit_for_burn(
            transfer.amount_minor,
            destination_domain,
            &transfer.recipient,
            source_usdc,
        )?;
        let burn_tx = self
            .caller
            .call(wallet_id, &transfer.from_chain, messenger, &deposit)
            .await?;
        transfer.burn_tx_hash = Some(burn_tx.clone());
        transfer.transition(BridgeStatus::DepositSubmitted);

        // Await Circle's attestation.
        let message_hash = self
            .caller
            .burn_message_hash(&transfer.from_chain, &burn_tx)
            .await?;
        transfer.message_hash = Some(message_hash.clone());
        transfer.transition(BridgeStatus::AwaitingAttestation);

        let mut attestation = None;
        for _ in 0..self.max_polls {
            if let Some(a) = self.attestations.fetch(&message_hash).await? {
                attestation = Some(a);
                break;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        let attestation = attestation.ok_or_else(|| {
            ChainError::Attestation(format!("attestation timed out for {message_hash}"))
        })?;
        transfer.attestation = Some(attestation.clone());
        transfer.transition(BridgeStatus::AttestationReceived);

        // Mint on the destination chain.
        transfer.transition(BridgeStatus::Completing);
        let transmitter = message_transmitter(&transfer.to_chain)?;
        let receive = encode_receive_message(
            message_hash.as_bytes(),
            attestation.as_bytes(),
        );
        let mint_tx = self
            .caller
            .call(wallet_id, &transfer.to_chain, transmitter, &receive)
            .await?;
        transfer.mint_tx_hash = Some(mint_tx);
        transfer.transition(BridgeStatus::Completed);

        tracing::info!(
            transfer_id = %transfer.transfer_id,
            from = %transfer.from_chain,
            to = %transfer.to_chain,
            amount = transfer.amount_minor,
            "cctp bridge completed"
        );
        Ok(())
    }
}

/// Reverse lookup: Circle domain id to chain name.
pub fn domain_to_chain(domain: u32) -> Option<&'static str> {
    match domain {
        0 => Some("ethereum"),
        2 => Some("optimism"),
        3 => Some("arbitrum"),
        6 => Some("base"),
        7 => Some("polygon"),
        _ => None,
    }
}
