//! Wallet key management.
//!
//! Derives the CryptoNote key pair from a 32-byte seed:
//!   spend_secret = sc_reduce32(seed)
//!   view_secret  = sc_reduce32(keccak256(spend_secret))
//! and answers every key question the rest of the wallet asks: addresses,
//! per-output one-time secrets and key images. Supports full and view-only
//! wallets.

use curve25519_dalek::scalar::Scalar;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Mutex;

use veil_crypto::derivation::{derive_secret_key, generate_key_derivation};
use veil_crypto::subaddress::{subaddress_keys, subaddress_secret_key};
use veil_crypto::{decompress, key_image, keccak256, public_key, sc_reduce};
use veil_types::mnemonic::{parse_seed, seed_to_mnemonic};
use veil_types::{Address, AddressKind, Network};

use crate::error::WalletError;
use crate::output::{OutputId, SubaddressIndex};

/// Wallet capability level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletType {
    /// Full wallet: can scan and spend.
    Full,
    /// View-only: can scan outputs but cannot spend or see spends.
    ViewOnly,
}

/// Key material plus memo caches for derived addresses and key images.
pub struct KeyManager {
    network: Network,
    seed: Option<[u8; 32]>,
    spend_secret: Option<Scalar>,
    spend_public: [u8; 32],
    view_secret: Scalar,
    view_public: [u8; 32],
    addresses: Mutex<HashMap<SubaddressIndex, Address>>,
    key_images: Mutex<HashMap<OutputId, [u8; 32]>>,
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("network", &self.network)
            .field("wallet_type", &self.wallet_type())
            .field("spend_public", &hex::encode(self.spend_public))
            .finish_non_exhaustive()
    }
}

fn view_secret_from_spend(spend_secret: &Scalar) -> Scalar {
    sc_reduce(&keccak256(spend_secret.as_bytes()))
}

fn canonical_scalar(bytes: [u8; 32], what: &str) -> Result<Scalar, WalletError> {
    Option::from(Scalar::from_canonical_bytes(bytes))
        .ok_or_else(|| WalletError::InvalidSeed(format!("{} is not a canonical scalar", what)))
}

impl KeyManager {
    fn build(
        network: Network,
        seed: Option<[u8; 32]>,
        spend_secret: Option<Scalar>,
        spend_public: [u8; 32],
        view_secret: Scalar,
    ) -> Self {
        Self {
            network,
            seed,
            spend_secret,
            spend_public,
            view_public: public_key(&view_secret),
            view_secret,
            addresses: Mutex::new(HashMap::new()),
            key_images: Mutex::new(HashMap::new()),
        }
    }

    /// Create a full wallet from a 32-byte seed.
    pub fn from_seed(seed: [u8; 32], network: Network) -> Self {
        let spend_secret = sc_reduce(&seed);
        let view_secret = view_secret_from_spend(&spend_secret);
        Self::build(network, Some(seed), Some(spend_secret), public_key(&spend_secret), view_secret)
    }

    /// Create a full wallet from a 24-word mnemonic.
    pub fn from_mnemonic(words: &str, network: Network) -> Result<Self, WalletError> {
        let seed = veil_types::mnemonic::mnemonic_to_seed(words)?;
        Ok(Self::from_seed(seed, network))
    }

    /// Create a full wallet from a mnemonic or a 64-character hex seed.
    pub fn from_seed_str(input: &str, network: Network) -> Result<Self, WalletError> {
        Ok(Self::from_seed(parse_seed(input)?, network))
    }

    /// Create a full wallet from raw secret keys. When the view key is the
    /// one the spend key would derive, the spend key doubles as the seed.
    pub fn from_keys(
        spend_secret: [u8; 32],
        view_secret: [u8; 32],
        network: Network,
    ) -> Result<Self, WalletError> {
        let spend = canonical_scalar(spend_secret, "spend key")?;
        let view = canonical_scalar(view_secret, "view key")?;
        let seed = (view_secret_from_spend(&spend) == view).then_some(spend_secret);
        Ok(Self::build(network, seed, Some(spend), public_key(&spend), view))
    }

    /// Create a view-only wallet.
    pub fn view_only(
        view_secret: [u8; 32],
        spend_public: [u8; 32],
        network: Network,
    ) -> Result<Self, WalletError> {
        let view = canonical_scalar(view_secret, "view key")?;
        decompress(&spend_public)
            .map_err(|_| WalletError::InvalidSeed("spend public key is not a valid point".into()))?;
        Ok(Self::build(network, None, None, spend_public, view))
    }

    /// Fresh random seed material.
    pub fn random_seed() -> [u8; 32] {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        seed
    }

    pub fn to_mnemonic(&self) -> Result<String, WalletError> {
        let seed = match (&self.seed, self.can_spend()) {
            (Some(seed), _) => seed,
            (None, false) => return Err(WalletError::ViewOnly("export a mnemonic".into())),
            (None, true) => {
                return Err(WalletError::InvalidSeed("keys were not derived from a seed".into()))
            }
        };
        Ok(seed_to_mnemonic(seed)?)
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn wallet_type(&self) -> WalletType {
        if self.spend_secret.is_some() {
            WalletType::Full
        } else {
            WalletType::ViewOnly
        }
    }

    pub fn can_spend(&self) -> bool {
        self.spend_secret.is_some()
    }

    pub fn spend_public(&self) -> &[u8; 32] {
        &self.spend_public
    }

    pub fn view_public(&self) -> &[u8; 32] {
        &self.view_public
    }

    pub(crate) fn view_secret(&self) -> &Scalar {
        &self.view_secret
    }

    pub fn primary_address(&self) -> Address {
        Address::new(self.network, AddressKind::Standard, self.spend_public, self.view_public)
    }

    /// Address for a subaddress index, memoized.
    pub fn subaddress(&self, index: SubaddressIndex) -> Result<Address, WalletError> {
        if index.is_primary() {
            return Ok(self.primary_address());
        }
        let mut cache = self.addresses.lock().map_err(|e| WalletError::Storage(e.to_string()))?;
        if let Some(addr) = cache.get(&index) {
            return Ok(*addr);
        }
        let (spend, view) =
            subaddress_keys(&self.spend_public, &self.view_secret, index.major, index.minor)?;
        let addr = Address::new(self.network, AddressKind::Subaddress, spend, view);
        cache.insert(index, addr);
        Ok(addr)
    }

    pub fn address(&self, major: u32, minor: u32) -> Result<Address, WalletError> {
        self.subaddress(SubaddressIndex::new(major, minor))
    }

    /// Receiver-side derivation `a·R`.
    pub fn derivation(&self, tx_pub_key: &[u8; 32]) -> Result<[u8; 32], WalletError> {
        Ok(generate_key_derivation(tx_pub_key, &self.view_secret)?)
    }

    /// One-time secret `x = H_s(a·R || i) + b + m` of an owned output.
    pub fn output_secret_key(
        &self,
        tx_pub_key: &[u8; 32],
        output_index: u64,
        subaddress: SubaddressIndex,
    ) -> Result<Scalar, WalletError> {
        let spend = self
            .spend_secret
            .ok_or_else(|| WalletError::ViewOnly("derive output secret keys".into()))?;
        let m = subaddress_secret_key(&self.view_secret, subaddress.major, subaddress.minor);
        let derivation = self.derivation(tx_pub_key)?;
        Ok(derive_secret_key(&derivation, output_index, &(spend + m)))
    }

    /// Key image `x·H_p(Ko)` of an owned output, memoized by `id`.
    pub fn key_image(
        &self,
        id: &OutputId,
        tx_pub_key: &[u8; 32],
        subaddress: SubaddressIndex,
        output_key: &[u8; 32],
    ) -> Result<[u8; 32], WalletError> {
        if let Some(ki) = self
            .key_images
            .lock()
            .map_err(|e| WalletError::Storage(e.to_string()))?
            .get(id)
        {
            return Ok(*ki);
        }
        let x = self.output_secret_key(tx_pub_key, id.output_index as u64, subaddress)?;
        let ki = key_image(&x, output_key);
        self.key_images
            .lock()
            .map_err(|e| WalletError::Storage(e.to_string()))?
            .insert(*id, ki);
        Ok(ki)
    }
}
