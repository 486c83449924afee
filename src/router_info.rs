//! §3 `RouterInfo` data model and §4.B descriptor parser, grounded in
//! `routers.c`'s `router_get_entry_from_string`.

use chrono::NaiveDateTime;

use crate::crypto::{self, PublicKey};
use crate::error::{Error, ErrorKind};
use crate::exit_policy::ExitPolicyRule;
use crate::token::{Scanner, Token};

/// One relay, as parsed from a `router` block or built by the
/// self-descriptor builder.
#[derive(Debug, Clone)]
pub struct RouterInfo {
    pub nickname: String,
    pub address: String,
    /// Resolved IPv4 address, host byte order; 0 if unresolved.
    pub addr: u32,
    pub or_port: u16,
    pub socks_port: u16,
    pub dir_port: u16,
    pub bandwidth: u32,
    pub published_on: i64,
    pub onion_pkey: PublicKey,
    pub link_pkey: PublicKey,
    pub identity_pkey: PublicKey,
    pub exit_policy: Vec<ExitPolicyRule>,
    pub is_running: bool,
}

/// Maximum nickname length (§3, §8).
const MAX_NICKNAME_LEN: usize = 19;

fn validate_nickname(nickname: &str) -> Result<(), Error> {
    if nickname.is_empty()
        || nickname.len() > MAX_NICKNAME_LEN
        || !nickname.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(ErrorKind::Semantic(format!("invalid nickname: {nickname:?}")).into());
    }
    Ok(())
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

fn expect_public_key(tok: Token) -> Result<PublicKey, Error> {
    match tok {
        Token::PublicKey(pk) => Ok(pk),
        Token::Error(reason) => Err(ErrorKind::Crypto(reason).into()),
        _ => Err(ErrorKind::Syntax("expected a public key block".into()).into()),
    }
}

fn parse_utc_datetime(date: &str, time: &str) -> Result<i64, Error> {
    let combined = format!("{date} {time}");
    let dt = NaiveDateTime::parse_from_str(&combined, "%Y-%m-%d %H:%M:%S")?;
    Ok(dt.timestamp())
}

impl RouterInfo {
    /// Parses one `router` block starting at the scanner's current
    /// position. Strict field order, per §4.B.
    pub fn parse(scanner: &mut Scanner) -> Result<RouterInfo, Error> {
        let start = scanner.pos();

        let args = expect_keyword(scanner.next_token(), "router")?;
        if args.len() != 6 {
            return Err(ErrorKind::Syntax(format!(
                "'router' line wants 6 arguments, got {}",
                args.len()
            ))
            .into());
        }
        let nickname = args[0].clone();
        validate_nickname(&nickname)?;
        let address = args[1].clone();
        let or_port: u16 = args[2].parse()?;
        let socks_port: u16 = args[3].parse()?;
        let dir_port: u16 = args[4].parse()?;
        let bandwidth: u32 = args[5].parse()?;
        if or_port == 0 {
            return Err(ErrorKind::Semantic("or_port must be nonzero".into()).into());
        }
        if bandwidth == 0 {
            return Err(ErrorKind::Semantic("bandwidth must be nonzero".into()).into());
        }

        let mark = scanner.pos();
        match scanner.next_token() {
            Token::Keyword { name, .. } if name == "platform" => {}
            _ => scanner.reset(mark),
        }

        let published_args = expect_keyword(scanner.next_token(), "published")?;
        if published_args.len() != 2 {
            return Err(ErrorKind::Syntax("'published' line wants 2 arguments".into()).into());
        }
        let published_on = parse_utc_datetime(&published_args[0], &published_args[1])?;

        expect_keyword(scanner.next_token(), "onion-key")?;
        let onion_pkey = expect_public_key(scanner.next_token())?;
        expect_keyword(scanner.next_token(), "link-key")?;
        let link_pkey = expect_public_key(scanner.next_token())?;
        expect_keyword(scanner.next_token(), "signing-key")?;
        let identity_pkey = expect_public_key(scanner.next_token())?;

        let mut exit_policy = Vec::new();
        loop {
            let mark = scanner.pos();
            match scanner.next_token() {
                Token::Keyword { name, args } if name == "accept" || name == "reject" => {
                    if args.len() != 1 {
                        return Err(ErrorKind::Syntax(format!(
                            "'{name}' line wants exactly 1 argument"
                        ))
                        .into());
                    }
                    exit_policy.push(ExitPolicyRule::parse(&name, &args[0])?);
                }
                _ => {
                    scanner.reset(mark);
                    break;
                }
            }
        }

        expect_keyword(scanner.next_token(), "router-signature")?;
        let end = scanner.pos();
        let digest = crypto::sha1_digest(scanner.slice(start, end).as_bytes());

        let sig = match scanner.next_token() {
            Token::Signature(sig) => sig,
            Token::Error(reason) => return Err(ErrorKind::Crypto(reason).into()),
            _ => return Err(ErrorKind::Syntax("expected a signature block".into()).into()),
        };

        if !identity_pkey.verify(&digest, &sig) {
            return Err(ErrorKind::Crypto("descriptor signature does not verify".into()).into());
        }

        Ok(RouterInfo {
            nickname,
            address,
            addr: 0,
            or_port,
            socks_port,
            dir_port,
            bandwidth,
            published_on,
            onion_pkey,
            link_pkey,
            identity_pkey,
            exit_policy,
            is_running: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{generate_keypair, sign_descriptor};

    fn sample_descriptor() -> (String, crypto::PrivateKey) {
        let identity = generate_keypair();
        let onion = generate_keypair();
        let link = generate_keypair();
        let body = format!(
            "router testrelay 198.51.100.7 9001 0 9030 1000000\n\
             platform Tor 0.0.9 on Linux\n\
             published 2024-01-01 00:00:00\n\
             onion-key\n{}\
             link-key\n{}\
             signing-key\n{}\
             accept *:80\n\
             reject *:*\n\
             router-signature\n",
            onion.to_public_key().to_pem().unwrap(),
            link.to_public_key().to_pem().unwrap(),
            identity.to_public_key().to_pem().unwrap(),
        );
        let signed = sign_descriptor(&body, &identity);
        (signed, identity)
    }

    #[test]
    fn parses_and_verifies_well_formed_descriptor() {
        let (text, _identity) = sample_descriptor();
        let mut scanner = Scanner::new(&text);
        let router = RouterInfo::parse(&mut scanner).expect("should parse");
        assert_eq!(router.nickname, "testrelay");
        assert_eq!(router.or_port, 9001);
        assert_eq!(router.bandwidth, 1_000_000);
        assert_eq!(router.exit_policy.len(), 2);
    }

    #[test]
    fn rejects_tampered_body() {
        let (text, _identity) = sample_descriptor();
        let mut bytes = text.into_bytes();
        let idx = bytes
            .iter()
            .position(|&b| b == b'9')
            .expect("should contain a digit to flip");
        bytes[idx] = b'8';
        let tampered = String::from_utf8(bytes).unwrap();
        let mut scanner = Scanner::new(&tampered);
        let err = RouterInfo::parse(&mut scanner).unwrap_err();
        assert!(matches!(err, Error::Dir(ErrorKind::Crypto(_))));
    }

    #[test]
    fn nickname_of_length_20_is_rejected() {
        assert!(validate_nickname("a".repeat(19).as_str()).is_ok());
        assert!(validate_nickname("a".repeat(20).as_str()).is_err());
    }
}
