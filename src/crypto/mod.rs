//! Cryptographic utilities
//!
//! This module provides:
//! - SHA-256 and double SHA-256 digests
//! - ECDSA key management (secp256k1) with WIF encoding

pub mod hash;
pub mod keys;

pub use hash::{double_sha256, sha256};
pub use keys::{sign_digest, verify_digest, KeyError, KeyPair};
