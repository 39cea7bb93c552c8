//! ECDSA key management
//!
//! Key pair generation, WIF import/export and transaction signing on the
//! secp256k1 curve.

use bitcoin::{PrivateKey, PubkeyHash, PublicKey};
use rand::rngs::OsRng;
use secp256k1::{Message, Secp256k1, SecretKey};
use thiserror::Error;

use crate::core::chain::Network;

/// Errors that can occur during key operations
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid WIF: {0}")]
    InvalidWif(String),
    #[error("Secp256k1 error: {0}")]
    Secp256k1Error(#[from] secp256k1::Error),
}

/// A key pair consisting of a private key and its corresponding public key
#[derive(Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    /// Carries whether it serializes to 33 or 65 bytes
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair (compressed)
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, _) = secp.generate_keypair(&mut OsRng);
        Self::from_secret_key(secret_key, true)
    }

    /// Create a key pair from an existing secret key
    pub fn from_secret_key(secret_key: SecretKey, compressed: bool) -> Self {
        let secp = Secp256k1::new();
        let public_key = PublicKey {
            compressed,
            inner: secp256k1::PublicKey::from_secret_key(&secp, &secret_key),
        };
        Self {
            secret_key,
            public_key,
        }
    }

    /// Decode a Wallet Import Format string, returning the key and the
    /// network its version byte belongs to
    pub fn from_wif(wif: &str) -> Result<(Self, Network), KeyError> {
        let private_key =
            PrivateKey::from_wif(wif.trim()).map_err(|e| KeyError::InvalidWif(e.to_string()))?;
        Ok((
            Self::from_secret_key(private_key.inner, private_key.compressed),
            Network::from_kind(private_key.network),
        ))
    }

    /// Encode the private key as WIF for the given network
    pub fn to_wif(&self, network: Network) -> String {
        PrivateKey {
            compressed: self.public_key.compressed,
            network: network.network_kind(),
            inner: self.secret_key,
        }
        .to_wif()
    }

    pub fn is_compressed(&self) -> bool {
        self.public_key.compressed
    }

    /// Serialized public key (33 bytes compressed, 65 bytes otherwise)
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public_key.to_bytes()
    }

    /// Get the public key as a hex string
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key_bytes())
    }

    /// HASH160 of the serialized public key
    pub fn public_key_hash(&self) -> PubkeyHash {
        self.public_key.pubkey_hash()
    }

    /// Sign a 32-byte digest, returning the DER encoded signature
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Vec<u8> {
        sign_digest(&self.secret_key, digest)
    }
}

/// Sign a 32-byte digest with a secret key (RFC 6979, low-S), DER encoded
pub fn sign_digest(secret_key: &SecretKey, digest: &[u8; 32]) -> Vec<u8> {
    let secp = Secp256k1::new();
    let message = Message::from_digest(*digest);
    secp.sign_ecdsa(&message, secret_key).serialize_der().to_vec()
}

/// Verify a DER signature over a 32-byte digest
pub fn verify_digest(
    public_key: &PublicKey,
    digest: &[u8; 32],
    der_signature: &[u8],
) -> Result<bool, KeyError> {
    let secp = Secp256k1::new();
    let message = Message::from_digest(*digest);
    let sig = secp256k1::ecdsa::Signature::from_der(der_signature)?;

    match secp.verify_ecdsa(&message, &sig, &public_key.inner) {
        Ok(()) => Ok(true),
        Err(_) => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::sha256;

    #[test]
    fn test_key_pair_generation() {
        let kp = KeyPair::generate();
        assert!(kp.is_compressed());
        assert_eq!(kp.public_key_bytes().len(), 33);
        assert_eq!(kp.public_key_hex().len(), 66);
    }

    #[test]
    fn test_wif_round_trip() {
        let kp = KeyPair::generate();
        for network in [Network::Mainnet, Network::Testnet] {
            let wif = kp.to_wif(network);
            let (decoded, decoded_network) = KeyPair::from_wif(&wif).unwrap();
            assert_eq!(decoded_network, network);
            assert_eq!(decoded.public_key_hex(), kp.public_key_hex());
            assert!(decoded.is_compressed());
        }
    }

    #[test]
    fn test_wif_prefixes() {
        let kp = KeyPair::generate();
        // Compressed mainnet keys start with K or L, testnet with c
        let main = kp.to_wif(Network::Mainnet);
        assert!(main.starts_with('K') || main.starts_with('L'));
        assert!(kp.to_wif(Network::Testnet).starts_with('c'));
    }

    #[test]
    fn test_known_wif() {
        // Secret key 1, compressed, mainnet
        let (kp, network) =
            KeyPair::from_wif("KwDiBf89QgGbjEhKnhXJuH7LrciVrZi3qYjgd9M7rFU73sVHnoWn").unwrap();
        assert_eq!(network, Network::Mainnet);
        assert_eq!(
            kp.public_key_hex(),
            "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
        );
        assert_eq!(
            kp.public_key_hash().to_string(),
            "751e76e8199196d454941c45d1b3a323f1433bd6"
        );
    }

    #[test]
    fn test_uncompressed_key() {
        let kp = KeyPair::generate();
        let uncompressed = KeyPair::from_secret_key(kp.secret_key, false);
        assert_eq!(uncompressed.public_key_bytes().len(), 65);
        let wif = uncompressed.to_wif(Network::Mainnet);
        assert!(wif.starts_with('5'));
        let (decoded, _) = KeyPair::from_wif(&wif).unwrap();
        assert!(!decoded.is_compressed());
    }

    #[test]
    fn test_invalid_wif() {
        assert!(KeyPair::from_wif("not a key").is_err());
        assert!(KeyPair::from_wif("").is_err());
    }

    #[test]
    fn test_sign_and_verify() {
        let kp = KeyPair::generate();
        let digest = sha256(b"Hello, timelock!");
        let signature = kp.sign_digest(&digest);
        assert!(verify_digest(&kp.public_key, &digest, &signature).unwrap());

        let other = sha256(b"something else");
        assert!(!verify_digest(&kp.public_key, &other, &signature).unwrap());
    }

    #[test]
    fn test_signing_is_deterministic() {
        let kp = KeyPair::generate();
        let digest = sha256(b"same message");
        assert_eq!(kp.sign_digest(&digest), kp.sign_digest(&digest));
    }
}
