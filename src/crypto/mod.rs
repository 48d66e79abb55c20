use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    Message, PublicKey, Secp256k1, SecretKey,
};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("invalid message digest: {0}")]
    InvalidDigest(String),

    #[error("public key recovery failed: {0}")]
    RecoveryFailed(String),
}

/// SHA-256 of `data`, rendered as 64 lowercase hex chars
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Account address: SHA-256 of the compressed public key hex string
pub fn address_of(public_key_hex: &str) -> String {
    sha256_hex(public_key_hex.as_bytes())
}

/// A secp256k1 keypair. Signatures are recoverable, so transactions do not
/// carry the sender public key on the wire.
#[derive(Debug, Clone)]
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a keypair from OS randomness
    pub fn generate() -> KeyPair {
        use rand::RngCore;

        let secp = Secp256k1::new();
        let mut rng = rand::rng();
        loop {
            let mut seed = [0u8; 32];
            rng.fill_bytes(&mut seed);
            // from_slice rejects 0 and >= group order; retry on the
            // astronomically unlikely miss
            if let Ok(secret) = SecretKey::from_slice(&seed) {
                let public = PublicKey::from_secret_key(&secp, &secret);
                return KeyPair { secret, public };
            }
        }
    }

    pub fn from_private_hex(private_hex: &str) -> Result<KeyPair, CryptoError> {
        let bytes = hex::decode(private_hex.trim_start_matches("0x"))
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        let secret = SecretKey::from_slice(&bytes)
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        let secp = Secp256k1::new();
        let public = PublicKey::from_secret_key(&secp, &secret);
        Ok(KeyPair { secret, public })
    }

    pub fn private_hex(&self) -> String {
        hex::encode(self.secret.secret_bytes())
    }

    /// Compressed public key, 66 hex chars
    pub fn public_hex(&self) -> String {
        hex::encode(self.public.serialize())
    }

    pub fn address(&self) -> String {
        address_of(&self.public_hex())
    }

    /// Sign a 32-byte hex digest; returns r ‖ s ‖ recovery id as 130 hex chars
    pub fn sign_hash(&self, hash_hex: &str) -> Result<String, CryptoError> {
        let secp = Secp256k1::new();
        let message = digest_message(hash_hex)?;
        let signature = secp.sign_ecdsa_recoverable(&message, &self.secret);
        let (recovery_id, compact) = signature.serialize_compact();

        let mut bytes = [0u8; 65];
        bytes[..64].copy_from_slice(&compact);
        bytes[64] = recovery_id.to_i32() as u8;
        Ok(hex::encode(bytes))
    }
}

/// Recover the compressed public key (hex) that produced `signature_hex`
/// over `hash_hex`
pub fn recover_public_hex(hash_hex: &str, signature_hex: &str) -> Result<String, CryptoError> {
    let secp = Secp256k1::new();
    let message = digest_message(hash_hex)?;

    let bytes =
        hex::decode(signature_hex).map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
    if bytes.len() != 65 {
        return Err(CryptoError::InvalidSignature(format!(
            "expected 65 bytes, got {}",
            bytes.len()
        )));
    }
    let recovery_id = RecoveryId::from_i32(bytes[64] as i32)
        .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
    let signature = RecoverableSignature::from_compact(&bytes[..64], recovery_id)
        .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;

    let public = secp
        .recover_ecdsa(&message, &signature)
        .map_err(|e| CryptoError::RecoveryFailed(e.to_string()))?;
    Ok(hex::encode(public.serialize()))
}

/// Check that `signature_hex` over `hash_hex` was produced by `public_hex`
pub fn verify(hash_hex: &str, public_hex: &str, signature_hex: &str) -> bool {
    match recover_public_hex(hash_hex, signature_hex) {
        Ok(recovered) => recovered == public_hex,
        Err(_) => false,
    }
}

fn digest_message(hash_hex: &str) -> Result<Message, CryptoError> {
    let digest = hex::decode(hash_hex).map_err(|e| CryptoError::InvalidDigest(e.to_string()))?;
    Message::from_digest_slice(&digest).map_err(|e| CryptoError::InvalidDigest(e.to_string()))
}
