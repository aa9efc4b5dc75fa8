// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// CryptoBox — AES-256-GCM (via `ring`) for encrypting and decrypting byte
// buffers with a locally managed key.
//
// Blob layout:  nonce (12 B) ‖ ciphertext ‖ tag (16 B)
//
// Key material and salt (32 random bytes each) live in the platform secret
// store. The working key is the first 32 bytes of SHA-256 applied
// `kdf_iterations` times to `material ‖ salt`. The material is XOR-ed with a
// fixed repeating pad and base64-encoded before it is written. That pad is
// obfuscation against casual inspection, nothing more, and both it and the
// derivation must stay bit-for-bit stable or previously stored data becomes
// unreadable.

use std::sync::{Arc, Mutex};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ring::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use warden_bridge::SecretStore;
use warden_core::config::CryptoConfig;
use warden_core::error::EncryptionError;
use warden_core::{Severity, metadata};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::audit::AuditTrail;
use crate::integrity::hash_bytes;

/// Length of the AES-GCM authentication tag appended to every ciphertext.
pub const TAG_LEN: usize = 16;

/// Shortest blob that can possibly decrypt (empty plaintext).
pub const MIN_BLOB_LEN: usize = NONCE_LEN + TAG_LEN;

/// Secret-store entry holding the obfuscated, base64-encoded key material.
pub const KEY_MATERIAL_ENTRY: &str = "warden.crypto.key_material";

/// Secret-store entry holding the raw salt bytes.
pub const SALT_ENTRY: &str = "warden.crypto.salt";

/// Repeating XOR pad applied to key material at rest.
pub const OBFUSCATION_PAD: &[u8; 16] = b"W4rd3n/l0c4l-p4d";

const KEY_LEN: usize = 32;
const SALT_LEN: usize = 32;
const SELF_TEST_PLAINTEXT: &str = "warden crypto self-test";

type CryptoResult<T> = Result<T, EncryptionError>;

/// Derive the AES-256 key from key material and salt.
///
/// Pure and deterministic: identical inputs always yield the same key. An
/// iteration count of zero is treated as one.
pub fn derive_key(material: &[u8], salt: &[u8], iterations: u32) -> [u8; KEY_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(material);
    hasher.update(salt);
    let mut digest = hasher.finalize();
    for _ in 1..iterations.max(1) {
        digest = Sha256::digest(digest.as_slice());
    }
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&digest[..KEY_LEN]);
    key
}

/// XOR `bytes` with [`OBFUSCATION_PAD`]. Applying it twice is the identity.
pub fn obfuscate(bytes: &[u8]) -> Vec<u8> {
    bytes
        .iter()
        .zip(OBFUSCATION_PAD.iter().cycle())
        .map(|(b, p)| b ^ p)
        .collect()
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct KeyMaterial {
    material: [u8; KEY_LEN],
    salt: [u8; SALT_LEN],
}

struct LoadedKey {
    key: LessSafeKey,
    /// Short non-secret identifier derived from the salt, for audit records.
    key_id: String,
}

/// Authenticated-encryption primitive with lazily loaded key material.
pub struct CryptoBox {
    secrets: Arc<dyn SecretStore>,
    kdf_iterations: u32,
    rng: SystemRandom,
    key: Mutex<Option<LoadedKey>>,
    audit: Option<Arc<AuditTrail>>,
}

impl CryptoBox {
    /// Create a box over `secrets`. No key is touched until first use.
    pub fn new(secrets: Arc<dyn SecretStore>, config: &CryptoConfig) -> Self {
        Self {
            secrets,
            kdf_iterations: config.kdf_iterations,
            rng: SystemRandom::new(),
            key: Mutex::new(None),
            audit: None,
        }
    }

    /// Record key lifecycle events (rotation) in `audit`.
    pub fn with_audit(mut self, audit: Arc<AuditTrail>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Whether a key is currently loaded in memory.
    pub fn has_key(&self) -> bool {
        self.key.lock().expect("crypto key lock poisoned").is_some()
    }

    /// Identifier of the loaded key, if any.
    pub fn key_id(&self) -> Option<String> {
        self.key
            .lock()
            .expect("crypto key lock poisoned")
            .as_ref()
            .map(|k| k.key_id.clone())
    }

    /// Encrypt `plaintext` and return `nonce ‖ ciphertext ‖ tag`.
    #[instrument(skip_all, fields(plaintext_len = plaintext.len()))]
    pub fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| EncryptionError::EncryptionFailed("nonce generation failed".into()))?;

        let sealed = self.with_key(|key| {
            let mut in_out = plaintext.to_vec();
            key.seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| EncryptionError::EncryptionFailed("AEAD seal failed".into()))?;
            Ok(in_out)
        })?;

        let mut blob = Vec::with_capacity(NONCE_LEN + sealed.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&sealed);

        debug!(blob_len = blob.len(), "encryption complete");
        Ok(blob)
    }

    /// Decrypt a blob produced by [`CryptoBox::encrypt`].
    #[instrument(skip_all, fields(blob_len = blob.len()))]
    pub fn decrypt(&self, blob: &[u8]) -> CryptoResult<Vec<u8>> {
        if blob.len() < MIN_BLOB_LEN {
            return Err(EncryptionError::InvalidData(format!(
                "blob is {} bytes, need at least {MIN_BLOB_LEN}",
                blob.len()
            )));
        }
        let (nonce_bytes, sealed) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| EncryptionError::InvalidData("malformed nonce".into()))?;

        let plaintext = self.with_key(|key| {
            let mut in_out = sealed.to_vec();
            let plain = key
                .open_in_place(nonce, Aad::empty(), &mut in_out)
                .map_err(|_| EncryptionError::DecryptionFailed)?;
            Ok(plain.to_vec())
        })?;

        debug!(plaintext_len = plaintext.len(), "decryption complete");
        Ok(plaintext)
    }

    /// Encrypt UTF-8 text and return the blob as base64.
    pub fn encrypt_string(&self, plaintext: &str) -> CryptoResult<String> {
        Ok(STANDARD.encode(self.encrypt(plaintext.as_bytes())?))
    }

    /// Reverse of [`CryptoBox::encrypt_string`].
    pub fn decrypt_string(&self, encoded: &str) -> CryptoResult<String> {
        let blob = STANDARD
            .decode(encoded.trim())
            .map_err(|e| EncryptionError::InvalidData(format!("base64: {e}")))?;
        String::from_utf8(self.decrypt(&blob)?)
            .map_err(|e| EncryptionError::InvalidData(format!("utf-8: {e}")))
    }

    /// Serialize `value` as JSON, then encrypt it.
    pub fn encrypt_structured<T: Serialize + ?Sized>(&self, value: &T) -> CryptoResult<Vec<u8>> {
        let json = serde_json::to_vec(value)
            .map_err(|e| EncryptionError::InvalidData(format!("not serializable: {e}")))?;
        self.encrypt(&json)
    }

    /// Decrypt a blob and parse the JSON it contains.
    pub fn decrypt_structured<T: DeserializeOwned>(&self, blob: &[u8]) -> CryptoResult<T> {
        let json = self.decrypt(blob)?;
        serde_json::from_slice(&json)
            .map_err(|e| EncryptionError::InvalidData(format!("not valid JSON: {e}")))
    }

    /// SHA-256 hex fingerprint of `data`.
    pub fn hash(&self, data: &[u8]) -> String {
        hash_bytes(data)
    }

    /// Round-trip a fixed string. Used as the encryption health check.
    pub fn self_test(&self) -> bool {
        match self
            .encrypt_string(SELF_TEST_PLAINTEXT)
            .and_then(|ct| self.decrypt_string(&ct))
        {
            Ok(back) => back == SELF_TEST_PLAINTEXT,
            Err(e) => {
                warn!(error = %e, "crypto self-test failed");
                false
            }
        }
    }

    /// Replace the key with freshly generated material.
    ///
    /// Blobs encrypted under the previous key are NOT re-encrypted and will
    /// fail to decrypt afterwards. Callers that need old data must decrypt it
    /// before rotating and re-encrypt it afterwards.
    #[instrument(skip_all)]
    pub fn rotate_key(&self) -> CryptoResult<()> {
        let previous = {
            let mut slot = self.key.lock().expect("crypto key lock poisoned");
            let previous = slot.take().map(|k| k.key_id);
            let fresh = self.generate_and_persist()?;
            let key_id = fresh.key_id.clone();
            *slot = Some(fresh);
            info!(%key_id, "encryption key rotated");
            previous
        };

        if let Some(audit) = &self.audit {
            let mut meta = metadata! {
                "key_id" => self.key_id().unwrap_or_default(),
                "reencrypted_existing" => false,
            };
            if let Some(prev) = previous {
                meta.insert("previous_key_id".into(), prev.into());
            }
            audit.record_alert("encryption key rotated", Severity::Warning, Some(meta));
        }
        Ok(())
    }

    fn with_key<T>(&self, f: impl FnOnce(&LessSafeKey) -> CryptoResult<T>) -> CryptoResult<T> {
        let mut slot = self.key.lock().expect("crypto key lock poisoned");
        if slot.is_none() {
            *slot = Some(self.load_or_create()?);
        }
        match slot.as_ref() {
            Some(loaded) => f(&loaded.key),
            None => Err(EncryptionError::KeyUnavailable),
        }
    }

    fn load_or_create(&self) -> CryptoResult<LoadedKey> {
        let stored = self
            .secrets
            .load_secret(KEY_MATERIAL_ENTRY)
            .and_then(|m| Ok((m, self.secrets.load_secret(SALT_ENTRY)?)))
            .map_err(|e| {
                warn!(error = %e, "secret store unreadable");
                EncryptionError::KeyUnavailable
            })?;

        match stored {
            (Some(encoded), Some(salt)) => {
                let material = decode_material(&encoded, &salt)?;
                debug!("key material loaded from secret store");
                self.activate(&material)
            }
            (None, None) => {
                info!("no key material found, generating");
                self.generate_and_persist()
            }
            _ => {
                warn!("incomplete key material in secret store, regenerating");
                self.generate_and_persist()
            }
        }
    }

    fn generate_and_persist(&self) -> CryptoResult<LoadedKey> {
        let mut material = KeyMaterial {
            material: [0u8; KEY_LEN],
            salt: [0u8; SALT_LEN],
        };
        self.rng
            .fill(&mut material.material)
            .and_then(|_| self.rng.fill(&mut material.salt))
            .map_err(|_| EncryptionError::KeyUnavailable)?;

        let encoded = STANDARD.encode(obfuscate(&material.material));
        self.secrets
            .store_secret(KEY_MATERIAL_ENTRY, encoded.as_bytes())
            .and_then(|_| self.secrets.store_secret(SALT_ENTRY, &material.salt))
            .map_err(|e| {
                warn!(error = %e, "failed to persist key material");
                EncryptionError::KeyUnavailable
            })?;

        self.activate(&material)
    }

    fn activate(&self, material: &KeyMaterial) -> CryptoResult<LoadedKey> {
        let mut raw = derive_key(&material.material, &material.salt, self.kdf_iterations);
        let unbound = UnboundKey::new(&AES_256_GCM, &raw).map_err(|_| EncryptionError::KeyUnavailable);
        raw.zeroize();
        let key_id = hash_bytes(&material.salt)[..16].to_owned();
        Ok(LoadedKey {
            key: LessSafeKey::new(unbound?),
            key_id,
        })
    }
}

fn decode_material(encoded: &[u8], salt: &[u8]) -> CryptoResult<KeyMaterial> {
    let obfuscated = STANDARD.decode(encoded).map_err(|e| {
        warn!(error = %e, "stored key material is not base64");
        EncryptionError::KeyUnavailable
    })?;
    let plain = obfuscate(&obfuscated);
    if plain.len() != KEY_LEN || salt.len() != SALT_LEN {
        warn!(
            material_len = plain.len(),
            salt_len = salt.len(),
            "stored key material has the wrong length"
        );
        return Err(EncryptionError::KeyUnavailable);
    }
    let mut material = KeyMaterial {
        material: [0u8; KEY_LEN],
        salt: [0u8; SALT_LEN],
    };
    material.material.copy_from_slice(&plain);
    material.salt.copy_from_slice(salt);
    Ok(material)
}
