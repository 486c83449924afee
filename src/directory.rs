//! §4.C directory parser and §4.D directory store, grounded in
//! `routers.c`'s `router_get_dir_from_string_impl`,
//! `router_get_list_from_string_impl`, `router_resolve_directory`, and
//! `router_pick_directory_server`.

use std::path::Path;

use crate::config::Configuration;
use crate::crypto::PublicKey;
use crate::dns;
use crate::error::{Error, ErrorKind};
use crate::router_info::RouterInfo;
use crate::token::{Scanner, Token};

/// Cap on routers kept from a single directory (§4.C, §9 Open Question 1).
const MAX_ROUTERS: usize = 1024;

/// A signed directory: publication time, recommended-versions list, and the
/// router descriptors it carries, in source order.
#[derive(Debug, Clone)]
pub struct Directory {
    pub routers: Vec<RouterInfo>,
    pub software_versions: Option<String>,
    pub published_on: i64,
}

fn expect_keyword(tok: Token, expected: &str) -> Result<Vec<String>, Error> {
    match tok {
        Token::Keyword { name, args } if name == expected => Ok(args),
        Token::Keyword { name, .. } => {
            Err(ErrorKind::Syntax(format!("expected '{expected}', found '{name}'")).into())
        }
        Token::PublicKey(_) => {
            Err(ErrorKind::Syntax(format!("expected '{expected}', found a public key")).into())
        }
        Token::Signature(_) => {
            Err(ErrorKind::Syntax(format!("expected '{expected}', found a signature")).into())
        }
        Token::Eof => Err(ErrorKind::Syntax(format!("expected '{expected}', found EOF")).into()),
        Token::Error(reason) => Err(ErrorKind::Syntax(reason).into()),
    }
}

fn parse_utc_datetime(date: &str, time: &str) -> Result<i64, Error> {
    let combined = format!("{date} {time}");
    Ok(chrono::NaiveDateTime::parse_from_str(&combined, "%Y-%m-%d %H:%M:%S")?.timestamp())
}

/// Parses a full signed directory. If `authority_key` is supplied, the
/// directory-wide signature is verified against it. Returns the directory
/// plus the number of router blocks dropped past [`MAX_ROUTERS`].
pub fn parse(input: &str, authority_key: Option<&PublicKey>) -> Result<(Directory, usize), Error> {
    let mut scanner = Scanner::new(input);
    let start = scanner.pos();

    expect_keyword(scanner.next_token(), "signed-directory")?;

    let published_args = expect_keyword(scanner.next_token(), "published")?;
    if published_args.len() != 2 {
        return Err(ErrorKind::Syntax("'published' line wants 2 arguments".into()).into());
    }
    let published_on = parse_utc_datetime(&published_args[0], &published_args[1])?;

    let software_args = expect_keyword(scanner.next_token(), "recommended-software")?;
    let software_versions = software_args.first().cloned();

    let running_args = expect_keyword(scanner.next_token(), "running-routers")?;
    let running: Vec<String> = running_args.iter().map(|n| n.to_lowercase()).collect();

    let mut routers = Vec::new();
    let mut dropped = 0usize;
    loop {
        let mark = scanner.pos();
        match scanner.next_token() {
            Token::Keyword { name, .. } if name == "router" => {
                scanner.reset(mark);
                let mut router = RouterInfo::parse(&mut scanner)?;
                router.is_running = running.contains(&router.nickname.to_lowercase());
                if routers.len() < MAX_ROUTERS {
                    routers.push(router);
                } else {
                    dropped += 1;
                    tracing::warn!(
                        "dropping router {:?}: directory exceeds {} routers",
                        router.nickname,
                        MAX_ROUTERS
                    );
                }
            }
            _ => {
                scanner.reset(mark);
                break;
            }
        }
    }

    expect_keyword(scanner.next_token(), "directory-signature")?;
    let end = scanner.pos();
    let digest = crate::crypto::sha1_digest(scanner.slice(start, end).as_bytes());

    let sig = match scanner.next_token() {
        Token::Signature(sig) => sig,
        Token::Error(reason) => return Err(ErrorKind::Crypto(reason).into()),
        _ => return Err(ErrorKind::Syntax("expected a signature block".into()).into()),
    };

    if let Some(key) = authority_key {
        if !key.verify(&digest, &sig) {
            return Err(ErrorKind::Crypto("directory signature does not verify".into()).into());
        }
    }

    match scanner.next_token() {
        Token::Eof => {}
        _ => return Err(ErrorKind::Syntax("trailing data after directory-signature".into()).into()),
    }

    Ok((
        Directory {
            routers,
            software_versions,
            published_on,
        },
        dropped,
    ))
}

/// Loads a directory document from disk and parses it, as
/// `router_get_list_from_file` does: read the whole file, then hand the
/// contents to [`parse`]. A missing or unreadable file surfaces as
/// [`Error::Io`] rather than a parse error.
pub fn parse_from_file(path: &Path, authority_key: Option<&PublicKey>) -> Result<(Directory, usize), Error> {
    let text = std::fs::read_to_string(path)?;
    parse(&text, authority_key)
}

/// Checks the running version against a directory's `recommended-software`
/// CSV (exact, comma-separated token match — `compare_recommended_versions`
/// in the original). Returns an error when the version is unrecognized and
/// `config.ignore_version` is false; the caller decides whether that error
/// is fatal.
pub fn check_recommended_version(directory: &Directory, config: &Configuration) -> Result<(), Error> {
    let Some(csv) = &directory.software_versions else {
        return Ok(());
    };
    let recommended = csv.split(',').any(|v| v.trim() == crate::RELAY_VERSION);
    if recommended {
        return Ok(());
    }
    tracing::warn!(
        "running version {:?} is not in the recommended-software list {:?}",
        crate::RELAY_VERSION,
        csv
    );
    if config.ignore_version {
        Ok(())
    } else {
        Err(ErrorKind::Semantic(format!(
            "version {:?} is not recommended and IgnoreVersion is false",
            crate::RELAY_VERSION
        ))
        .into())
    }
}

/// The single process-wide slot holding the current [`Directory`] plus the
/// derived lookups of §4.D. Modeled as an explicit owned object rather than
/// a true global, per the design note on global mutable state.
#[derive(Debug, Default)]
pub struct DirectoryStore {
    current: Option<Directory>,
}

impl DirectoryStore {
    pub fn new() -> Self {
        DirectoryStore { current: None }
    }

    /// Installs a freshly parsed directory, replacing (and freeing) any
    /// previous one.
    pub fn install(&mut self, directory: Directory) {
        self.current = Some(directory);
    }

    pub fn current(&self) -> Option<&Directory> {
        self.current.as_ref()
    }

    /// Read-only iteration over the current directory's routers, for
    /// collaborators that drive per-router work (connection retry, descriptor
    /// upload) this crate does not itself perform. Empty if no directory has
    /// been installed.
    pub fn routers(&self) -> impl Iterator<Item = &RouterInfo> {
        self.current.iter().flat_map(|d| d.routers.iter())
    }

    pub fn get_by_addr_port(&self, addr: u32, port: u16) -> Option<&RouterInfo> {
        self.current
            .as_ref()?
            .routers
            .iter()
            .find(|r| r.addr == addr && r.or_port == port)
    }

    pub fn get_by_link_pk(&self, pk: &PublicKey) -> Option<&RouterInfo> {
        self.current
            .as_ref()?
            .routers
            .iter()
            .find(|r| r.link_pkey.key_eq(pk))
    }

    pub fn get_by_nickname(&self, name: &str) -> Option<&RouterInfo> {
        self.current
            .as_ref()?
            .routers
            .iter()
            .find(|r| r.nickname == name)
    }

    /// No-op if `nickname` is unknown.
    pub fn mark_down(&mut self, nickname: &str) {
        if let Some(directory) = self.current.as_mut() {
            if let Some(r) = directory.routers.iter_mut().find(|r| r.nickname == nickname) {
                r.is_running = false;
            }
        }
    }

    /// Returns the first running directory server; if all are down,
    /// resurrects every directory-capable router and returns the last one,
    /// guaranteeing eventual progress (§8 scenario 3).
    pub fn pick_directory_server(&mut self) -> Option<&RouterInfo> {
        let directory = self.current.as_mut()?;
        if let Some(idx) = directory
            .routers
            .iter()
            .position(|r| r.dir_port > 0 && r.is_running)
        {
            return directory.routers.get(idx);
        }

        let mut last_idx = None;
        for (i, r) in directory.routers.iter_mut().enumerate() {
            if r.dir_port > 0 {
                r.is_running = true;
                last_idx = Some(i);
            }
        }
        last_idx.and_then(|i| directory.routers.get(i))
    }

    /// Resolves every router's `address` to an IPv4 address, dropping
    /// routers that fail to resolve or whose nickname matches
    /// `self_nickname` (self-exclusion). Drops by swap-remove, so order is
    /// not preserved. Returns the number of routers dropped.
    pub fn resolve_all(&mut self, self_nickname: &str) -> usize {
        let Some(directory) = self.current.as_mut() else {
            return 0;
        };
        let mut dropped = 0;
        let mut i = 0;
        while i < directory.routers.len() {
            let is_self = directory.routers[i].nickname == self_nickname;
            let resolved = if is_self {
                None
            } else {
                dns::resolve_ipv4(&directory.routers[i].address).ok()
            };
            match resolved {
                Some(addr) => {
                    directory.routers[i].addr = addr;
                    i += 1;
                }
                None => {
                    tracing::debug!(
                        "dropping router {:?}: unresolvable or self",
                        directory.routers[i].nickname
                    );
                    directory.routers.swap_remove(i);
                    dropped += 1;
                }
            }
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{generate_keypair, sign_descriptor};

    fn router_block(nickname: &str, dir_port: u16) -> (String, crate::crypto::PrivateKey) {
        let identity = generate_keypair();
        let onion = generate_keypair();
        let link = generate_keypair();
        let body = format!(
            "router {nickname} 198.51.100.7 9001 0 {dir_port} 1000000\n\
             published 2024-01-01 00:00:00\n\
             onion-key\n{}\
             link-key\n{}\
             signing-key\n{}\
             router-signature\n",
            onion.to_public_key().to_pem().unwrap(),
            link.to_public_key().to_pem().unwrap(),
            identity.to_public_key().to_pem().unwrap(),
        );
        (sign_descriptor(&body, &identity), identity)
    }

    fn sample_directory(nicknames_and_dirports: &[(&str, u16)], running: &str) -> String {
        let mut text = String::from("signed-directory\npublished 2024-01-01 00:00:00\nrecommended-software 0.0.1,0.0.2\n");
        text.push_str(&format!("running-routers {running}\n"));
        for (nick, dp) in nicknames_and_dirports {
            let (block, _) = router_block(nick, *dp);
            text.push_str(&block);
        }
        text.push_str("directory-signature\n");
        let sig_dummy = base64::encode([0u8; 128]);
        text.push_str(&format!(
            "-----BEGIN SIGNATURE-----\n{sig_dummy}\n-----END SIGNATURE-----\n"
        ));
        text
    }

    #[test]
    fn running_routers_filter_marks_liveness() {
        let text = sample_directory(&[("r1", 0), ("r2", 0), ("r3", 0)], "r1 r3");
        let (directory, dropped) = parse(&text, None).expect("should parse");
        assert_eq!(dropped, 0);
        assert_eq!(directory.routers.len(), 3);
        let by_name = |n: &str| directory.routers.iter().find(|r| r.nickname == n).unwrap();
        assert!(by_name("r1").is_running);
        assert!(!by_name("r2").is_running);
        assert!(by_name("r3").is_running);
    }

    #[test]
    fn pick_directory_server_resurrects_when_all_down() {
        let text = sample_directory(&[("r1", 9030), ("r2", 9030)], "");
        let (directory, _) = parse(&text, None).expect("should parse");
        let mut store = DirectoryStore::new();
        store.install(directory);
        let picked = store.pick_directory_server().expect("should resurrect and pick one");
        assert_eq!(picked.nickname, "r2");
        assert!(store.current().unwrap().routers.iter().all(|r| r.is_running));
    }

    #[test]
    fn mark_down_unknown_nickname_is_noop() {
        let text = sample_directory(&[("r1", 0)], "r1");
        let (directory, _) = parse(&text, None).expect("should parse");
        let mut store = DirectoryStore::new();
        store.install(directory);
        store.mark_down("does-not-exist");
        assert!(store.get_by_nickname("r1").unwrap().is_running);
    }

    #[test]
    fn routers_iterates_current_directory_and_is_empty_when_unset() {
        let store = DirectoryStore::new();
        assert_eq!(store.routers().count(), 0);

        let text = sample_directory(&[("r1", 0), ("r2", 0)], "r1 r2");
        let (directory, _) = parse(&text, None).expect("should parse");
        let mut store = DirectoryStore::new();
        store.install(directory);
        let names: Vec<&str> = store.routers().map(|r| r.nickname.as_str()).collect();
        assert_eq!(names, vec!["r1", "r2"]);
    }

    #[test]
    fn parse_from_file_reads_and_parses() {
        let text = sample_directory(&[("r1", 0)], "r1");
        let path = std::env::temp_dir().join(format!("tordir-test-{}.txt", std::process::id()));
        std::fs::write(&path, &text).expect("should write temp file");
        let (directory, _) = parse_from_file(&path, None).expect("should parse from file");
        std::fs::remove_file(&path).ok();
        assert_eq!(directory.routers.len(), 1);
        assert_eq!(directory.routers[0].nickname, "r1");
    }

    #[test]
    fn parse_from_file_surfaces_io_error_for_missing_file() {
        let path = std::env::temp_dir().join("tordir-test-does-not-exist.txt");
        assert!(matches!(parse_from_file(&path, None), Err(Error::Io(_))));
    }

    #[test]
    fn version_mismatch_respects_ignore_flag() {
        // sample_directory's recommended-software CSV never names this
        // crate's actual version, so this always exercises the mismatch path.
        let text = sample_directory(&[], "");
        let (directory, _) = parse(&text, None).expect("should parse");
        let mut config = Configuration {
            ignore_version: false,
            ..Configuration::default()
        };
        assert!(check_recommended_version(&directory, &config).is_err());
        config.ignore_version = true;
        assert!(check_recommended_version(&directory, &config).is_ok());
    }
}
