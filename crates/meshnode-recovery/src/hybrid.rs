//! Hybrid encryption envelopes for cross-AP recovery payloads.
//!
//! RSA-OAEP can only seal a couple hundred bytes under a 2048-bit key, so
//! anything bigger rides under a fresh AES-256-GCM data key that is itself
//! OAEP-wrapped for the recipient.
//!
//! Two wire formats must decrypt:
//! - the hybrid envelope `{encryptedAESKey, encryptedData, iv}`
//! - the legacy direct-OAEP form (plain base64 ciphertext)
//!
//! Detection is structural, not tagged: base64-decode the outer payload and
//! try to parse it as a JSON envelope carrying the three keys; anything
//! else is treated as legacy ciphertext. The probing order matters — a
//! legacy payload must not be misread as corrupt hybrid data.

use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};

use meshnode_core::crypto::{
    aes_gcm_decrypt, aes_gcm_encrypt, oaep_encrypt, random_bytes, Keypair, GCM_NONCE_LEN,
};
use meshnode_core::{b64, CoreError};

/// The hybrid wire envelope. All three fields are base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HybridEnvelope {
    /// AES-256 data key, RSA-OAEP-SHA256 wrapped for the recipient.
    #[serde(rename = "encryptedAESKey")]
    pub encrypted_aes_key: String,

    /// AES-256-GCM ciphertext (tag included).
    #[serde(rename = "encryptedData")]
    pub encrypted_data: String,

    /// GCM nonce.
    pub iv: String,
}

/// Encrypt a payload of any size for the recipient.
///
/// Returns the base64 of the JSON envelope.
pub fn hybrid_encrypt(data: &[u8], recipient: &RsaPublicKey) -> Result<String, CoreError> {
    let data_key = random_bytes::<32>();
    let iv = random_bytes::<GCM_NONCE_LEN>();

    let encrypted_data = aes_gcm_encrypt(&data_key, &iv, data)?;
    let encrypted_aes_key = oaep_encrypt(recipient, &data_key)?;

    let envelope = HybridEnvelope {
        encrypted_aes_key: b64::encode(encrypted_aes_key),
        encrypted_data: b64::encode(encrypted_data),
        iv: b64::encode(iv),
    };
    let json = serde_json::to_vec(&envelope).expect("JSON serialization failed");
    Ok(b64::encode(json))
}

/// Decrypt a payload in either wire format.
pub fn hybrid_decrypt(payload: &str, recipient: &Keypair) -> Result<Vec<u8>, CoreError> {
    let outer = b64::decode(payload.trim())?;

    // Structural probe: a hybrid payload decodes to a JSON object with the
    // three envelope keys. Only when that parse succeeds do we commit to
    // the hybrid path; everything else is legacy direct-OAEP ciphertext.
    if let Ok(envelope) = serde_json::from_slice::<HybridEnvelope>(&outer) {
        return decrypt_envelope(&envelope, recipient);
    }

    recipient.oaep_decrypt(&outer)
}

fn decrypt_envelope(envelope: &HybridEnvelope, recipient: &Keypair) -> Result<Vec<u8>, CoreError> {
    let wrapped_key = b64::decode(&envelope.encrypted_aes_key)?;
    let ciphertext = b64::decode(&envelope.encrypted_data)?;
    let iv_bytes = b64::decode(&envelope.iv)?;

    let key_bytes = recipient.oaep_decrypt(&wrapped_key)?;
    let data_key: [u8; 32] = key_bytes
        .try_into()
        .map_err(|_| CoreError::Decryption("wrapped key has wrong length".into()))?;
    let iv: [u8; GCM_NONCE_LEN] = iv_bytes
        .try_into()
        .map_err(|_| CoreError::Decryption("iv has wrong length".into()))?;

    aes_gcm_decrypt(&data_key, &iv, &ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient() -> Keypair {
        Keypair::from_seed(&[0x21; 32]).unwrap()
    }

    #[test]
    fn test_roundtrip_small() {
        let recipient = recipient();
        let data = b"a few bytes";
        let payload = hybrid_encrypt(data, &recipient.public_key()).unwrap();
        let decrypted = hybrid_decrypt(&payload, &recipient).unwrap();
        assert_eq!(decrypted, data);
    }

    #[test]
    fn test_roundtrip_large() {
        // Well past RSA's direct-encryption limit; exercises the AES path.
        let recipient = recipient();
        let data: Vec<u8> = (0..150_000u32).map(|i| (i % 251) as u8).collect();
        let payload = hybrid_encrypt(&data, &recipient.public_key()).unwrap();
        let decrypted = hybrid_decrypt(&payload, &recipient).unwrap();
        assert_eq!(decrypted, data);
    }

    #[test]
    fn test_legacy_direct_oaep_payload() {
        let recipient = recipient();
        // A legacy sender OAEP-encrypts directly and base64s the result.
        let ciphertext = oaep_encrypt(&recipient.public_key(), b"legacy secret").unwrap();
        let payload = b64::encode(ciphertext);

        let decrypted = hybrid_decrypt(&payload, &recipient).unwrap();
        assert_eq!(decrypted, b"legacy secret");
    }

    #[test]
    fn test_wrong_recipient_fails() {
        let recipient = recipient();
        let other = Keypair::from_seed(&[0x22; 32]).unwrap();
        let payload = hybrid_encrypt(b"secret", &recipient.public_key()).unwrap();
        assert!(hybrid_decrypt(&payload, &other).is_err());
    }

    #[test]
    fn test_garbage_payload_fails_cleanly() {
        let recipient = recipient();
        assert!(hybrid_decrypt("!!! not base64 !!!", &recipient).is_err());
        assert!(hybrid_decrypt(&b64::encode(b"not an envelope"), &recipient).is_err());
    }

    #[test]
    fn test_envelope_wire_keys() {
        // The envelope keys are part of the wire contract.
        let recipient = recipient();
        let payload = hybrid_encrypt(b"x", &recipient.public_key()).unwrap();
        let json = String::from_utf8(b64::decode(&payload).unwrap()).unwrap();
        assert!(json.contains("\"encryptedAESKey\""));
        assert!(json.contains("\"encryptedData\""));
        assert!(json.contains("\"iv\""));
    }
}
