//! The RSA/SHA-1/base64 "collaborator" library that §6 of the spec treats as
//! an external dependency. Nothing outside this crate provides it, so it is
//! implemented here as a small wrapper, grounded in `tor-llcrypto`'s
//! `pk::rsa` and `d` modules: a thin newtype over the `rsa` crate exposing
//! exactly the operations the token scanner and descriptor/directory
//! parsers need (PEM read/write, keypair equality, sign, verify, digest).

use digest::Digest;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPublicKey, LineEnding};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};

use crate::error::{Error, ErrorKind};

/// Number of bytes in a 1024-bit RSA signature, per §4.A/§6.
pub const SIGNATURE_LEN: usize = 128;
/// Number of bytes in a SHA-1 digest.
pub const DIGEST_LEN: usize = 20;

/// An RSA public key, as found in `onion-key`/`link-key`/`signing-key`
/// blocks.
#[derive(Clone, Debug)]
pub struct PublicKey(RsaPublicKey);

/// An RSA private key, used only by the self-descriptor builder to sign
/// this relay's own descriptor.
#[derive(Clone)]
pub struct PrivateKey(RsaPrivateKey);

impl PublicKey {
    /// Parse a `-----BEGIN RSA PUBLIC KEY-----` PEM block, as handed to us
    /// by the token scanner once it has located the matching END marker.
    pub fn from_pem(pem: &str) -> Result<Self, Error> {
        RsaPublicKey::from_pkcs1_pem(pem)
            .map(PublicKey)
            .map_err(|e| ErrorKind::Crypto(format!("couldn't parse public key: {e}")).into())
    }

    /// Serialize back to a PEM block, for the self-descriptor builder.
    pub fn to_pem(&self) -> Result<String, Error> {
        self.0
            .to_pkcs1_pem(LineEnding::LF)
            .map(|s| s.to_string())
            .map_err(|e| ErrorKind::Crypto(format!("couldn't encode public key: {e}")).into())
    }

    /// Verify a signature as used in the Tor directory protocol: RSA-PKCS#1
    /// v1.5 with no digest-algorithm prefix, over a raw SHA-1 digest. On
    /// success the decrypted block equaled `expected_digest` exactly.
    pub fn verify(&self, expected_digest: &[u8], sig: &[u8]) -> bool {
        if sig.len() != SIGNATURE_LEN || expected_digest.len() != DIGEST_LEN {
            return false;
        }
        let padding = Pkcs1v15Sign::new_unprefixed();
        self.0.verify(padding, expected_digest, sig).is_ok()
    }

    /// Keypair equality, by comparing DER encodings (as `tor-llcrypto` does
    /// via `crypto_pk_cmp_keys` in the original).
    pub fn key_eq(&self, other: &PublicKey) -> bool {
        self.0 == other.0
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.key_eq(other)
    }
}

impl PrivateKey {
    /// Parse a PKCS#1 DER-encoded RSA private key.
    pub fn from_der(der: &[u8]) -> Result<Self, Error> {
        RsaPrivateKey::from_pkcs1_der(der)
            .map(PrivateKey)
            .map_err(|e| ErrorKind::Crypto(format!("couldn't parse private key: {e}")).into())
    }

    /// The public half of this keypair.
    pub fn to_public_key(&self) -> PublicKey {
        PublicKey(self.0.to_public_key())
    }

    /// Sign a 20-byte SHA-1 digest the way `router-signature`/
    /// `directory-signature` blocks are produced: unprefixed PKCS#1 v1.5.
    pub fn sign(&self, digest: &[u8]) -> Result<Vec<u8>, Error> {
        let padding = Pkcs1v15Sign::new_unprefixed();
        Ok(self.0.sign_with_rng(&mut rand::thread_rng(), padding, digest)?)
    }
}

/// Generates a fresh 1024-bit RSA keypair, for provisioning a relay's
/// onion/link/identity keys on first run.
pub fn generate_keypair() -> Result<PrivateKey, Error> {
    RsaPrivateKey::new(&mut rand::thread_rng(), 1024)
        .map(PrivateKey)
        .map_err(|e| ErrorKind::Crypto(format!("couldn't generate keypair: {e}")).into())
}

/// SHA-1 digest of `data`.
pub fn sha1_digest(data: &[u8]) -> [u8; DIGEST_LEN] {
    sha1::Sha1::digest(data).into()
}

/// Decode a base64 signature body, requiring exactly [`SIGNATURE_LEN`]
/// decoded bytes (§4.A step 3: "require exactly 128 decoded bytes").
pub fn decode_signature(b64: &str) -> Result<[u8; SIGNATURE_LEN], Error> {
    let bytes = base64::decode(b64.trim())
        .map_err(|e| Error::Dir(ErrorKind::Crypto(format!("bad base64 signature: {e}"))))?;
    if bytes.len() != SIGNATURE_LEN {
        return Err(ErrorKind::Crypto(format!(
            "bad length on decoded signature: {} bytes",
            bytes.len()
        ))
        .into());
    }
    let mut out = [0u8; SIGNATURE_LEN];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Base64-encode a signature body for serialization, matching the original
/// descriptor format's line-wrapped base64.
pub fn encode_signature(sig: &[u8]) -> String {
    base64::encode(sig)
}
