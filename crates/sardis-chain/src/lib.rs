//! Settlement rails for the Sardis payment core.
//!
//! Every rail implements the uniform [`RailAdapter`] contract: EVM chains
//! over JSON-RPC ([`evm`]), Solana SPL transfers with a gasless path
//! ([`solana`]), cross-chain USDC via Circle CCTP ([`cctp`]), card issuing
//! behind a primary/fallback router ([`cards`]), and fiat funding with
//! ordered failover ([`funding`]). Signing goes through the [`signer`] MPC
//! seam; simulated mode fabricates deterministic results without touching
//! any endpoint.

pub mod cards;
pub mod cctp;
pub mod config;
pub mod error;
pub mod evm;
pub mod funding;
pub mod rpc;
pub mod signer;
pub mod solana;
pub mod types;

pub use cards::{
    Card, CardLimitUpdate, CardProvider, CardProviderRouter, CardStatus, CardTransaction,
    CardType, InMemoryCardProvider,
};
pub use cctp::{
    bridge_estimate_secs, cctp_domain, AttestationClient, BridgeStatus, BridgeTransfer,
    CctpBridge, CircleAttestationClient, ContractCaller, SimulatedCctpChain,
};
pub use config::{
    evm_chain, evm_chains, solana_mint, stablecoin_address, usdc_address, ChainMode,
    EvmChainConfig,
};
pub use error::ChainError;
pub use evm::{encode_erc20_transfer, EvmRailAdapter, NonceManager, TRANSFER_SELECTOR};
pub use funding::{
    execute_funding_with_failover, FundingAdapter, FundingAttempt, FundingRequest, FundingResult,
    FundingStatus, ScriptedFundingAdapter,
};
pub use rpc::{JsonRpcClient, RpcConfig};
pub use signer::{canonical_tx_bytes, MpcSigner, SignedTransaction, SimulatedMpcSigner};
pub use solana::{FeePayerService, SolanaRailAdapter};
pub use types::{
    GasEstimate, Rail, RailAdapter, RailReceipt, SubmittedTx, TransactionRequest, TxStatus,
};
