//! Cryptographic primitives for meshnode.
//!
//! Wraps RSA-PSS signing, RSA-OAEP key wrapping, AES-256-GCM payload
//! encryption, PBKDF2 key derivation and SHA-256 hashing behind a small
//! surface shared by every other crate.
//!
//! All signatures in the mesh use RSA-PSS over SHA-256 with salt length 0.
//! A zero-length salt makes the signature deterministic, which the wire
//! format depends on: two nodes signing the same canonical bytes must
//! produce the same signature string.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{Oaep, Pss, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;

use crate::error::CoreError;

/// RSA modulus size for all mesh keys.
pub const RSA_KEY_BITS: usize = 2048;

/// PBKDF2 iteration count for recovery-phrase derivation.
pub const PBKDF2_ROUNDS: u32 = 100_000;

/// AES-256-GCM nonce length in bytes.
pub const GCM_NONCE_LEN: usize = 12;

/// A 32-byte SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sha256Hash(pub [u8; 32]);

impl Sha256Hash {
    /// Compute the SHA-256 hash of the given data.
    pub fn hash(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        Self(digest.into())
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to lowercase hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha256({})", &self.to_hex()[..16])
    }
}

impl AsRef<[u8]> for Sha256Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// An RSA keypair used by admins, access points, privileged users and
/// mobile terminals alike.
///
/// Wraps rsa's RsaPrivateKey.
#[derive(Clone)]
pub struct Keypair {
    private: RsaPrivateKey,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Result<Self, CoreError> {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
            .map_err(|e| CoreError::KeyGeneration(e.to_string()))?;
        Ok(Self { private })
    }

    /// Derive a keypair deterministically from a 32-byte seed.
    ///
    /// The same seed always yields the same keypair. Recovery uses this to
    /// rebuild a user's signing key from their recovery phrase.
    pub fn from_seed(seed: &[u8; 32]) -> Result<Self, CoreError> {
        let mut rng = StdRng::from_seed(*seed);
        let private = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
            .map_err(|e| CoreError::KeyGeneration(e.to_string()))?;
        Ok(Self { private })
    }

    /// Load from a PKCS#8 PEM string.
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self, CoreError> {
        let private =
            RsaPrivateKey::from_pkcs8_pem(pem).map_err(|_| CoreError::InvalidPrivateKey)?;
        Ok(Self { private })
    }

    /// Serialize to a PKCS#8 PEM string.
    pub fn to_pkcs8_pem(&self) -> Result<String, CoreError> {
        self.private
            .to_pkcs8_pem(LineEnding::LF)
            .map(|pem| pem.to_string())
            .map_err(|e| CoreError::EncodingError(e.to_string()))
    }

    /// Get the public key.
    pub fn public_key(&self) -> RsaPublicKey {
        self.private.to_public_key()
    }

    /// Get the public key as an SPKI PEM string (the wire representation).
    pub fn public_key_pem(&self) -> String {
        // Encoding a freshly derived public key cannot fail.
        self.private
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .expect("public key PEM encoding failed")
    }

    /// Sign a message with RSA-PSS/SHA-256, salt length 0.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CoreError> {
        let digest = Sha256::digest(message);
        let mut rng = rand::thread_rng();
        self.private
            .sign_with_rng(&mut rng, Pss::new_with_salt::<Sha256>(0), &digest)
            .map_err(|e| CoreError::Signing(e.to_string()))
    }

    /// Decrypt an RSA-OAEP/SHA-256 ciphertext.
    pub fn oaep_decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CoreError> {
        self.private
            .decrypt(Oaep::new::<Sha256>(), ciphertext)
            .map_err(|e| CoreError::Decryption(e.to_string()))
    }

    /// Access the inner private key.
    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair({})", key_fingerprint(&self.public_key()))
    }
}

/// Verify an RSA-PSS/SHA-256 signature with salt length 0.
///
/// Returns false on any mismatch; never errors.
pub fn pss_verify(public: &RsaPublicKey, message: &[u8], signature: &[u8]) -> bool {
    let digest = Sha256::digest(message);
    public
        .verify(Pss::new_with_salt::<Sha256>(0), &digest, signature)
        .is_ok()
}

/// Encrypt a small payload with RSA-OAEP/SHA-256.
///
/// Limited to the modulus size minus padding (190 bytes for 2048-bit keys);
/// anything larger goes through the hybrid envelope.
pub fn oaep_encrypt(public: &RsaPublicKey, data: &[u8]) -> Result<Vec<u8>, CoreError> {
    let mut rng = rand::thread_rng();
    public
        .encrypt(&mut rng, Oaep::new::<Sha256>(), data)
        .map_err(|e| CoreError::Encryption(e.to_string()))
}

/// Encrypt with AES-256-GCM. The returned ciphertext includes the tag.
pub fn aes_gcm_encrypt(
    key: &[u8; 32],
    nonce: &[u8; GCM_NONCE_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>, CoreError> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| CoreError::Encryption("invalid AES key length".into()))?;
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| CoreError::Encryption("AES-GCM encryption failed".into()))
}

/// Decrypt with AES-256-GCM.
pub fn aes_gcm_decrypt(
    key: &[u8; 32],
    nonce: &[u8; GCM_NONCE_LEN],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CoreError> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| CoreError::Decryption("invalid AES key length".into()))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CoreError::Decryption("AES-GCM decryption failed".into()))
}

/// PBKDF2-HMAC-SHA512 derivation.
pub fn pbkdf2_sha512(password: &[u8], salt: &[u8], rounds: u32, out_len: usize) -> Vec<u8> {
    let mut out = vec![0u8; out_len];
    pbkdf2::pbkdf2_hmac::<Sha512>(password, salt, rounds, &mut out);
    out
}

/// Parse an SPKI PEM public key.
pub fn parse_public_key_pem(pem: &str) -> Result<RsaPublicKey, CoreError> {
    RsaPublicKey::from_public_key_pem(pem).map_err(|_| CoreError::InvalidPublicKey)
}

/// Encode a public key as an SPKI PEM string.
pub fn public_key_to_pem(public: &RsaPublicKey) -> Result<String, CoreError> {
    public
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| CoreError::EncodingError(e.to_string()))
}

/// Short hex fingerprint of a public key, for logs and Debug impls.
pub fn key_fingerprint(public: &RsaPublicKey) -> String {
    let pem = public
        .to_public_key_pem(LineEnding::LF)
        .unwrap_or_default();
    Sha256Hash::hash(pem.as_bytes()).to_hex()[..16].to_string()
}

/// Fill a fixed-size buffer with random bytes.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}
