//! Process-wide ephemeral RSA keypair source.
//!
//! Every instance connection re-uses the same process-wide keypair, since
//! the control plane signs a short-lived certificate around a caller-
//! supplied public key rather than this crate signing anything itself —
//! generating a fresh pair per instance buys no security margin and would
//! multiply the cost of `rsa::RsaPrivateKey::new`'s modulus search for
//! nothing. Lazy initialization and the `OnceLock`-backed singleton follow
//! the same shape as `Registry::global()` elsewhere in this codebase.

use std::fmt;
use std::sync::OnceLock;

use base64::Engine;
use rand::rngs::OsRng;
use rsa::pkcs1::EncodeRsaPublicKey;
use rsa::{RsaPrivateKey, RsaPublicKey};
use zeroize::{Zeroize, ZeroizeOnDrop};
use thiserror::Error;

/// Errors produced while generating or encoding the process keypair.
#[derive(Debug, Error)]
pub enum KeyPairError {
    #[error("RSA key generation failed: {0}")]
    Generation(rsa::Error),
    #[error("RSA public key encoding failed: {0}")]
    Encoding(rsa::pkcs1::Error),
}

/// An RSA private key wrapped so its bytes are wiped on drop.
///
/// Generalizes the `ZeroizingKey` pattern used elsewhere in this codebase
/// (a fixed-size AES key array with `Zeroize`/`ZeroizeOnDrop`) to an RSA
/// private key, where the sensitive material is the DER encoding rather
/// than a byte array.
#[derive(Clone, ZeroizeOnDrop)]
struct ZeroizingPrivateKey {
    #[zeroize(skip)]
    inner: RsaPrivateKey,
    der: Vec<u8>,
}

impl Zeroize for ZeroizingPrivateKey {
    fn zeroize(&mut self) {
        self.der.zeroize();
    }
}

impl fmt::Debug for ZeroizingPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZeroizingPrivateKey").finish_non_exhaustive()
    }
}

/// A generated RSA keypair: a zeroizing private key plus the corresponding
/// public key, which is not secret.
pub struct KeyPair {
    private: ZeroizingPrivateKey,
    public: RsaPublicKey,
}

impl KeyPair {
    fn generate(bits: usize) -> Result<Self, KeyPairError> {
        let private = RsaPrivateKey::new(&mut OsRng, bits).map_err(KeyPairError::Generation)?;
        let public = RsaPublicKey::from(&private);
        let der = private
            .to_pkcs1_der()
            .map_err(KeyPairError::Encoding)?
            .as_bytes()
            .to_vec();
        Ok(KeyPair {
            private: ZeroizingPrivateKey { inner: private, der },
            public,
        })
    }

    /// The private key, for signing the TLS client identity.
    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private.inner
    }

    /// The public key, in PKCS#1 DER form wrapped as a PEM block, for
    /// inclusion in the ephemeral certificate request (see §6 wire format:
    /// `-----BEGIN RSA PUBLIC KEY-----`, base64 DER hard-wrapped at 64
    /// characters, `-----END RSA PUBLIC KEY-----`).
    pub fn public_key_pem(&self) -> Result<String, KeyPairError> {
        let der = self
            .public
            .to_pkcs1_der()
            .map_err(KeyPairError::Encoding)?;
        Ok(encode_pkcs1_public_pem(der.as_bytes()))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair").finish_non_exhaustive()
    }
}

fn encode_pkcs1_public_pem(der: &[u8]) -> String {
    let b64 = base64::engine::general_purpose::STANDARD.encode(der);
    let mut out = String::from("-----BEGIN RSA PUBLIC KEY-----\n");
    for chunk in b64.as_bytes().chunks(64) {
        out.push_str(std::str::from_utf8(chunk).expect("base64 output is ASCII"));
        out.push('\n');
    }
    out.push_str("-----END RSA PUBLIC KEY-----\n");
    out
}

/// Lazily generates and caches the process-wide keypair used for every
/// instance's ephemeral certificate requests.
///
/// Mirrors `Registry::global()`'s `OnceLock<Arc<RwLock<...>>>` pattern, but
/// since the keypair is never mutated after generation an `OnceLock<Arc<KeyPair>>`
/// suffices — no interior mutability needed.
pub struct KeyPairSource {
    bits: usize,
}

static KEY_PAIR: OnceLock<std::sync::Arc<KeyPair>> = OnceLock::new();

impl KeyPairSource {
    pub fn new(bits: usize) -> Self {
        KeyPairSource { bits }
    }

    /// Returns the process-wide keypair, generating it on first call.
    ///
    /// Generation can take noticeable wall-clock time for large moduli; the
    /// first caller (typically the first `InstanceRefresher`'s initial
    /// refresh) pays that cost, and every subsequent caller reuses it.
    pub fn get_or_init(&self) -> Result<std::sync::Arc<KeyPair>, KeyPairError> {
        if let Some(existing) = KEY_PAIR.get() {
            return Ok(existing.clone());
        }
        let generated = std::sync::Arc::new(KeyPair::generate(self.bits)?);
        Ok(KEY_PAIR.get_or_init(|| generated).clone())
    }
}
