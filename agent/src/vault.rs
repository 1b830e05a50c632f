//! Per-agent encrypted credential store
//!
//! Each credential is serialized to JSON, sealed with AES-256-GCM under a key
//! derived from the agent's master secret, and kept as base64 of
//! `nonce || ciphertext || tag`. Plaintext is never stored or logged.

use std::collections::HashMap;
use std::sync::RwLock;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::errors::FleetError;

const NONCE_SIZE: usize = 12;

pub struct CredentialVault {
    cipher: Aes256Gcm,
    entries: RwLock<HashMap<String, String>>,
}

impl CredentialVault {
    /// Build a vault whose key is SHA-256 of the master secret
    pub fn new(master_secret: &SecretString) -> Self {
        let key: [u8; 32] = Sha256::digest(master_secret.expose_secret().as_bytes()).into();
        Self {
            cipher: Aes256Gcm::new((&key).into()),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Encrypt and store a credential, replacing any previous entry for the provider
    pub fn store<T: Serialize + ?Sized>(
        &self,
        provider: &str,
        credential: &T,
    ) -> Result<(), FleetError> {
        let plaintext = serde_json::to_vec(credential)?;
        let sealed = self.encrypt(&plaintext)?;

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(provider.to_string(), sealed);
        drop(entries);

        info!("Credential stored for provider {}", provider);
        Ok(())
    }

    /// Decrypt and deserialize the credential stored for a provider
    pub fn get<T: DeserializeOwned>(&self, provider: &str) -> Result<T, FleetError> {
        let sealed = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            entries.get(provider).cloned()
        }
        .ok_or_else(|| FleetError::NotFound(format!("credential for provider {}", provider)))?;

        let plaintext = self.decrypt(&sealed)?;
        debug!("Credential decrypted for provider {}", provider);
        serde_json::from_slice(&plaintext)
            .map_err(|e| FleetError::DecryptionFailed(format!("invalid credential payload: {}", e)))
    }

    /// Untyped view of a stored credential
    pub fn get_value(&self, provider: &str) -> Result<serde_json::Value, FleetError> {
        self.get(provider)
    }

    pub fn contains(&self, provider: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.contains_key(provider)
    }

    pub fn providers(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut providers: Vec<String> = entries.keys().cloned().collect();
        providers.sort();
        providers
    }

    /// The stored base64 blob for a provider
    pub fn sealed_entry(&self, provider: &str) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(provider).cloned()
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<String, FleetError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| FleetError::EncryptionFailed(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    fn decrypt(&self, sealed: &str) -> Result<Vec<u8>, FleetError> {
        let bytes = STANDARD
            .decode(sealed)
            .map_err(|e| FleetError::DecryptionFailed(format!("invalid base64: {}", e)))?;

        if bytes.len() < NONCE_SIZE {
            return Err(FleetError::DecryptionFailed(
                "ciphertext too short".to_string(),
            ));
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| FleetError::DecryptionFailed("authentication failed".to_string()))
    }

    /// Install a previously sealed entry, e.g. one read back from disk.
    /// The blob is only checked when it is read.
    pub fn restore_entry(&self, provider: &str, sealed: String) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(provider.to_string(), sealed);
    }
}

/// Generate a fresh random master secret (base64 of 32 random bytes)
pub fn generate_master_secret() -> SecretString {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    SecretString::from(STANDARD.encode(bytes))
}
