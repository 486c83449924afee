//! §4.F: assembles this relay's own [`RouterInfo`], serializes it to the
//! canonical text form, signs it, and round-trips it through the descriptor
//! parser as a self-check. Grounded in `routers.c`'s
//! `router_rebuild_descriptor`/`router_dump_router_to_string`.

use std::net::Ipv4Addr;

use chrono::NaiveDateTime;

use crate::config::Configuration;
use crate::crypto::{self, PrivateKey, PublicKey};
use crate::dns;
use crate::error::{Error, ErrorKind};
use crate::exit_policy::{self, ExitPolicyRule, RuleKind};
use crate::router_info::RouterInfo;
use crate::token::Scanner;

/// Fixed serialization buffer size (§4.F); overflow is a hard failure.
const MAX_DESCRIPTOR_LEN: usize = 8192;

/// The onion/link/identity keypairs this relay holds. Provisioning and
/// persisting them is a key-management concern outside this subsystem;
/// the builder only duplicates their public halves into the descriptor and
/// signs with the identity key.
pub struct RelayKeys {
    pub onion_pkey: PublicKey,
    pub link_pkey: PublicKey,
    pub identity: PrivateKey,
}

/// The built descriptor: the structured form plus its exact serialized
/// text (the text is what gets handed to directory-upload collaborators).
#[derive(Debug, Clone)]
pub struct SelfDescriptor {
    pub router_info: RouterInfo,
    pub text: String,
}

fn format_utc(ts: i64) -> Result<String, Error> {
    let dt = NaiveDateTime::from_timestamp_opt(ts, 0)
        .ok_or_else(|| ErrorKind::Semantic(format!("timestamp out of range: {ts}")))?;
    Ok(dt.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Renders one exit-policy rule the way `router_dump_router_to_string`
/// does: the mask is always emitted unless it equals `0xFFFFFFFF`, even for
/// a wildcard address (whose default mask is 0), so this round-trips
/// through the parser exactly.
fn render_rule(rule: &ExitPolicyRule) -> String {
    let keyword = match rule.kind {
        RuleKind::Accept => "accept",
        RuleKind::Reject => "reject",
    };
    let addr_str = if rule.mask == 0 {
        "*".to_string()
    } else {
        Ipv4Addr::from(rule.addr).to_string()
    };
    let mut line = format!("{keyword} {addr_str}");
    if rule.mask != 0xFFFF_FFFF {
        line.push('/');
        line.push_str(&Ipv4Addr::from(rule.mask).to_string());
    }
    if rule.port != 0 {
        line.push(':');
        line.push_str(&rule.port.to_string());
    } else {
        line.push_str(":*");
    }
    line.push('\n');
    line
}

/// Builds, serializes, signs, and self-verifies a fresh descriptor for
/// `config`/`keys`. A failure here must leave any previously built
/// descriptor untouched; this function has no side effects on failure.
pub fn build(config: &Configuration, keys: &RelayKeys) -> Result<SelfDescriptor, Error> {
    let address = if !config.address.is_empty() {
        config.address.clone()
    } else {
        dns::local_fqdn()?
    };

    let exit_policy = exit_policy::parse_policy_csv(&config.exit_policy);
    let published_on = chrono::Utc::now().timestamp();

    let mut text = String::new();
    text.push_str(&format!(
        "router {} {} {} {} {} {}\n",
        config.nickname, address, config.or_port, config.socks_port, config.dir_port, config.total_bandwidth
    ));
    text.push_str(&format!(
        "platform Tor {} on {}\n",
        crate::RELAY_VERSION,
        std::env::consts::OS
    ));
    text.push_str(&format!("published {}\n", format_utc(published_on)?));
    text.push_str("onion-key\n");
    text.push_str(&keys.onion_pkey.to_pem()?);
    text.push_str("link-key\n");
    text.push_str(&keys.link_pkey.to_pem()?);
    text.push_str("signing-key\n");
    text.push_str(&keys.identity.to_public_key().to_pem()?);
    for rule in &exit_policy {
        text.push_str(&render_rule(rule));
    }
    text.push_str("router-signature\n");

    if text.len() > MAX_DESCRIPTOR_LEN {
        return Err(ErrorKind::Resource("descriptor exceeds 8192 bytes before signing".into()).into());
    }

    let digest = crypto::sha1_digest(text.as_bytes());
    let sig = keys.identity.sign(&digest)?;
    text.push_str("-----BEGIN SIGNATURE-----\n");
    text.push_str(&crypto::encode_signature(&sig));
    text.push('\n');
    text.push_str("-----END SIGNATURE-----\n");
    text.push('\n');

    if text.len() > MAX_DESCRIPTOR_LEN {
        return Err(ErrorKind::Resource("descriptor exceeds 8192 bytes after signing".into()).into());
    }

    let mut scanner = Scanner::new(&text);
    let router_info = RouterInfo::parse(&mut scanner)?;

    Ok(SelfDescriptor { router_info, text })
}

/// The self-descriptor singleton (§3 "Self-descriptor state"): built
/// lazily, rebuilt on demand, with the previous instance released only once
/// a new one has successfully been built.
#[derive(Default)]
pub struct SelfDescriptorState {
    current: Option<SelfDescriptor>,
}

impl SelfDescriptorState {
    pub fn new() -> Self {
        SelfDescriptorState { current: None }
    }

    pub fn current(&self) -> Option<&SelfDescriptor> {
        self.current.as_ref()
    }

    /// Builds on first call; returns the existing descriptor on later calls
    /// without rebuilding.
    pub fn get_or_build(&mut self, config: &Configuration, keys: &RelayKeys) -> Result<&SelfDescriptor, Error> {
        if self.current.is_none() {
            self.current = Some(build(config, keys)?);
        }
        Ok(self.current.as_ref().expect("just built"))
    }

    /// Forces a rebuild. On failure the previous descriptor, if any, is
    /// left in place and the error is returned to the caller.
    pub fn rebuild(&mut self, config: &Configuration, keys: &RelayKeys) -> Result<&SelfDescriptor, Error> {
        let fresh = build(config, keys)?;
        self.current = Some(fresh);
        Ok(self.current.as_ref().expect("just built"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::generate_keypair;

    fn sample_keys() -> RelayKeys {
        RelayKeys {
            onion_pkey: generate_keypair().to_public_key(),
            link_pkey: generate_keypair().to_public_key(),
            identity: generate_keypair(),
        }
    }

    #[test]
    fn round_trips_through_the_descriptor_parser() {
        let config = Configuration {
            nickname: "alice".into(),
            address: "alice.example.com".into(),
            or_port: 9001,
            socks_port: 0,
            dir_port: 9030,
            total_bandwidth: 1_000_000,
            exit_policy: "accept *:80,reject *:*".into(),
            ignore_version: true,
        };
        let keys = sample_keys();
        let built = build(&config, &keys).expect("should build");

        assert_eq!(built.router_info.nickname, "alice");
        assert_eq!(built.router_info.address, "alice.example.com");
        assert_eq!(built.router_info.or_port, 9001);
        assert_eq!(built.router_info.dir_port, 9030);
        assert_eq!(built.router_info.exit_policy.len(), 2);
        assert_eq!(built.router_info.exit_policy[0].kind, RuleKind::Accept);
        assert_eq!(built.router_info.exit_policy[1].kind, RuleKind::Reject);
    }

    #[test]
    fn state_keeps_previous_descriptor_on_failed_rebuild() {
        let good_config = Configuration {
            nickname: "bob".into(),
            address: "bob.example.com".into(),
            or_port: 9001,
            socks_port: 0,
            dir_port: 0,
            total_bandwidth: 1000,
            exit_policy: String::new(),
            ignore_version: true,
        };
        let keys = sample_keys();
        let mut state = SelfDescriptorState::new();
        state.get_or_build(&good_config, &keys).expect("should build");
        let first_text = state.current().unwrap().text.clone();

        let bad_config = Configuration {
            nickname: "".into(),
            ..good_config
        };
        assert!(state.rebuild(&bad_config, &keys).is_err());
        assert_eq!(state.current().unwrap().text, first_text);
    }

    #[test]
    fn lazily_builds_once() {
        let config = Configuration {
            nickname: "carol".into(),
            address: "carol.example.com".into(),
            or_port: 9001,
            socks_port: 0,
            dir_port: 0,
            total_bandwidth: 1000,
            exit_policy: String::new(),
            ignore_version: true,
        };
        let keys = sample_keys();
        let mut state = SelfDescriptorState::new();
        let first = state.get_or_build(&config, &keys).unwrap().text.clone();
        let second = state.get_or_build(&config, &keys).unwrap().text.clone();
        assert_eq!(first, second);
    }
}
