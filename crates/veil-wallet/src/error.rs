//! Wallet error types.

use thiserror::Error;
use veil_rpc::RpcError;
use veil_tx::TxError;
use veil_types::constants::UnknownNetwork;
use veil_types::mnemonic::MnemonicError;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("daemon connection error: {0}")]
    Connection(String),

    #[error("chain reorganized inside a fetched range at height {height}")]
    ReorgDetected { height: u64 },

    #[error("insufficient funds: need {need}, have {have}")]
    InsufficientFunds { need: u64, have: u64 },

    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    #[error("destination amount {amount} is below the dust threshold {threshold}")]
    DustOutput { amount: u64, threshold: u64 },

    #[error("invalid seed: {0}")]
    InvalidSeed(String),

    #[error("unsupported network: {0}")]
    UnsupportedNetwork(String),

    #[error("transaction rejected by daemon: {reason}")]
    RelayRejected { reason: String },

    #[error("wallet is view-only, cannot {0}")]
    ViewOnly(String),

    #[error("transaction would need more than {max} inputs")]
    TooManyInputs { max: usize },

    #[error("transaction error: {0}")]
    Tx(#[from] TxError),

    #[error("crypto error: {0}")]
    Crypto(#[from] veil_crypto::CryptoError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("decryption failed (wrong password or corrupted data)")]
    DecryptionFailed,

    #[error("invalid wallet file: {0}")]
    InvalidFile(String),

    #[error("{0}")]
    Other(String),
}

impl From<RpcError> for WalletError {
    fn from(e: RpcError) -> Self {
        match e {
            RpcError::Rejected { reason } => WalletError::RelayRejected { reason },
            other => WalletError::Connection(other.to_string()),
        }
    }
}

impl From<MnemonicError> for WalletError {
    fn from(e: MnemonicError) -> Self {
        WalletError::InvalidSeed(e.to_string())
    }
}

impl From<UnknownNetwork> for WalletError {
    fn from(e: UnknownNetwork) -> Self {
        WalletError::UnsupportedNetwork(e.0)
    }
}

impl From<std::io::Error> for WalletError {
    fn from(e: std::io::Error) -> Self {
        WalletError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_errors_map_to_connection() {
        let e: WalletError = RpcError::Connection("refused".into()).into();
        assert!(matches!(e, WalletError::Connection(_)));
        let e: WalletError = RpcError::Busy { context: "get_block".into() }.into();
        assert!(matches!(e, WalletError::Connection(_)));
    }

    #[test]
    fn test_rejection_maps_to_relay_rejected() {
        let e: WalletError = RpcError::Rejected { reason: "double spend".into() }.into();
        match e {
            WalletError::RelayRejected { reason } => assert_eq!(reason, "double spend"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_network_maps() {
        let e: WalletError = "regtest".parse::<veil_types::Network>().unwrap_err().into();
        assert!(matches!(e, WalletError::UnsupportedNetwork(n) if n == "regtest"));
    }
}
