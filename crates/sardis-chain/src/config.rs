//! Chain configurations and stablecoin address tables.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::ChainError;

/// Execution mode: simulated rails fabricate deterministic results without
/// touching any RPC endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainMode {
    Simulated,
    Live,
}

impl ChainMode {
    pub fn parse(s: &str) -> Self {
        match s {
            "live" => ChainMode::Live,
            _ => ChainMode::Simulated,
        }
    }
}

/// Static configuration for one EVM chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmChainConfig {
    pub name: &'static str,
    pub chain_id: u64,
    pub rpc_url: &'static str,
    pub native_token: &'static str,
    /// Target block time in seconds.
    pub block_time: u64,
    /// Confirmations required before a payment is treated as final.
    pub finality_confirmations: u64,
    pub is_testnet: bool,
}

/// Supported EVM chains, mainnets and testnets.
pub fn evm_chains() -> &'static BTreeMap<&'static str, EvmChainConfig> {
    static CHAINS: OnceLock<BTreeMap<&'static str, EvmChainConfig>> = OnceLock::new();
    CHAINS.get_or_init(|| {
        let mut m = BTreeMap::new();
        let mut add = |c: EvmChainConfig| {
            m.insert(c.name, c);
        };
        add(EvmChainConfig {
            name: "ethereum",
            chain_id: 1,
            rpc_url: "https://eth.llamarpc.com",
            native_token: "ETH",
            block_time: 12,
            finality_confirmations: 3,
            is_testnet: false,
        });
        add(EvmChainConfig {
            name: "ethereum_sepolia",
            chain_id: 11155111,
            rpc_url: "https://rpc.sepolia.org",
            native_token: "ETH",
            block_time: 12,
            finality_confirmations: 1,
            is_testnet: true,
        });
        add(EvmChainConfig {
            name: "base",
            chain_id: 8453,
            rpc_url: "https://mainnet.base.org",
            native_token: "ETH",
            block_time: 2,
            finality_confirmations: 3,
            is_testnet: false,
        });
        add(EvmChainConfig {
            name: "base_sepolia",
            chain_id: 84532,
            rpc_url: "https://sepolia.base.org",
            native_token: "ETH",
            block_time: 2,
            finality_confirmations: 1,
            is_testnet: true,
        });
        add(EvmChainConfig {
            name: "polygon",
            chain_id: 137,
            rpc_url: "https://polygon-rpc.com",
            native_token: "MATIC",
            block_time: 2,
            finality_confirmations: 5,
            is_testnet: false,
        });
        add(EvmChainConfig {
            name: "arbitrum",
            chain_id: 42161,
            rpc_url: "https://arb1.arbitrum.io/rpc",
            native_token: "ETH",
            block_time: 1,
            finality_confirmations: 3,
            is_testnet: false,
        });
        add(EvmChainConfig {
            name: "arbitrum_sepolia",
            chain_id: 421614,
            rpc_url: "https://sepolia-rollup.arbitrum.io/rpc",
            native_token: "ETH",
            block_time: 1,
            finality_confirmations: 1,
            is_testnet: true,
        });
        add(EvmChainConfig {
            name: "optimism",
            chain_id: 10,
            rpc_url: "https://mainnet.optimism.io",
            native_token: "ETH",
            block_time: 2,
            finality_confirmations: 3,
            is_testnet: false,
        });
        add(EvmChainConfig {
            name: "optimism_sepolia",
            chain_id: 11155420,
            rpc_url: "https://sepolia.optimism.io",
            native_token: "ETH",
            block_time: 2,
            finality_confirmations: 1,
            is_testnet: true,
        });
        m
    })
}

pub fn evm_chain(name: &str) -> Result<&'static EvmChainConfig, ChainError> {
    evm_chains()
        .get(name)
        .ok_or_else(|| ChainError::UnsupportedChain(name.to_string()))
}

/// Mainnet USDC contract addresses (also used by CCTP).
pub fn usdc_address(chain: &str) -> Option<&'static str> {
    match chain {
        "ethereum" => Some("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
        "optimism" => Some("0x0b2C639c533813f4Aa9D7837CAf62653d097Ff85"),
        "arbitrum" => Some("0xaf88d065e77c8cC2239327C5EDb3A432268e5831"),
        "base" => Some("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
        "polygon" => Some("0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359"),
        "base_sepolia" => Some("0x036CbD53842c5426634e7929541eC2318f3dCF7e"),
        "ethereum_sepolia" => Some("0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238"),
        "arbitrum_sepolia" => Some("0x75faf114eafb1BDbe2F0316DF893fd58CE46AA4d"),
        "optimism_sepolia" => Some("0x5fd84259d66Cd46123540766Be93DFE6D43130D7"),
        _ => None,
    }
}

/// Stablecoin contract address for `(chain, token)`.
pub fn stablecoin_address(chain: &str, token: &str) -> Result<&'static str, ChainError> {
    let addr = match token.to_ascii_uppercase().as_str() {
        "USDC" => usdc_address(chain),
        "USDT" => match chain {
            "ethereum" => Some("0xdAC17F958D2ee523a2206206994597C13D831ec7"),
            "arbitrum" => Some("0xFd086bC7CD5C481DCC9C85ebE478A1C0b69FCbb9"),
            "optimism" => Some("0x94b008aA00579c1307B0EF2c499aD98a8ce58e58"),
            "polygon" => Some("0xc2132D05D31c914a87C6611C10748AEb04B58e8F"),
            _ => None,
        },
        _ => None,
    };
    addr.ok_or_else(|| ChainError::UnsupportedToken {
        chain: chain.to_string(),
        token: token.to_string(),
    })
}

/// Solana token mint addresses (mainnet).
pub const SOLANA_USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
pub const SOLANA_USDT_MINT: &str = "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB";
pub const SOLANA_PYUSD_MINT: &str = "2b1kV6DkPAnxd5ixfnxCpjxmKwqjjaYmCZfHsFu24GXo";

pub fn solana_mint(token: &str) -> Option<&'static str> {
    match token.to_ascii_uppercase().as_str() {
        "USDC" => Some(SOLANA_USDC_MINT),
        "USDT" => Some(SOLANA_USDT_MINT),
        "PYUSD" => Some(SOLANA_PYUSD_MINT),
        _ => None,
    }
}
