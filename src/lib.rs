//! Router directory subsystem for an onion-routing relay.
//!
//! Parses signed directory documents and router descriptors, maintains an
//! in-memory view of known routers and their liveness, matches addresses
//! against exit policies, and builds/signs this relay's own descriptor.

pub mod config;
pub mod crypto;
pub mod directory;
pub mod dns;
pub mod error;
pub mod exit_policy;
pub mod router_info;
pub mod self_descriptor;
pub mod token;

pub use config::Configuration;
pub use directory::{Directory, DirectoryStore};
pub use error::{Error, ErrorKind};
pub use exit_policy::{ExitPolicyRule, Verdict};
pub use router_info::RouterInfo;

/// This relay's own software version: the `<version>` in its `platform`
/// line, and the token compared against a directory's
/// `recommended-software` list.
pub const RELAY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared fixture helpers for the `#[cfg(test)]` modules scattered across
/// this crate: fresh RSA keypairs are cheap to generate per-test and keep
/// fixtures self-contained instead of depending on checked-in PEM vectors.
#[cfg(test)]
pub(crate) mod test_support {
    use crate::crypto;

    pub fn generate_keypair() -> crypto::PrivateKey {
        crypto::generate_keypair().expect("keypair generation should succeed")
    }

    /// Appends a `router-signature` block signing `body`, which must already
    /// end with the `router-signature\n` line.
    pub fn sign_descriptor(body: &str, identity: &crypto::PrivateKey) -> String {
        let digest = crypto::sha1_digest(body.as_bytes());
        let sig = identity.sign(&digest).expect("signing should succeed");
        format!(
            "{body}-----BEGIN SIGNATURE-----\n{}\n-----END SIGNATURE-----\n",
            crypto::encode_signature(&sig)
        )
    }
}
