//! §4.A: splits descriptor/directory text into typed tokens. Grounded in
//! `routers.c`'s `_router_get_next_token`, but reworked into non-destructive
//! scanning over owned substrings (per the design note on destructive
//! tokenization) instead of in-place NUL insertion. The surrounding
//! keyword-line logic is hand-rolled, since the token grammar here is
//! strictly sequential rather than something `nom`'s combinators compose
//! cleanly; PEM/signature block scanning reuses the teacher's
//! `nom_combinators::cert` shape (`tag` the BEGIN marker, `take_until` the
//! END marker) instead.

use nom::bytes::complete::{tag, take_until};
use nom::IResult;

use crate::crypto;

const KEYWORDS: &[&str] = &[
    "accept",
    "reject",
    "router",
    "signed-directory",
    "recommended-software",
    "running-routers",
    "directory-signature",
    "signing-key",
    "onion-key",
    "link-key",
    "router-signature",
    "published",
    "platform",
];

/// Hard cap on arguments per keyword line (§7: `ResourceError` on
/// ">1024 rule arguments").
pub const MAX_ARGS: usize = 1024;

const PUBKEY_BEGIN: &str = "-----BEGIN RSA PUBLIC KEY-----";
const PUBKEY_END: &str = "-----END RSA PUBLIC KEY-----";
const SIG_BEGIN: &str = "-----BEGIN SIGNATURE-----";
const SIG_END: &str = "-----END SIGNATURE-----";

/// Takes a whole `-----BEGIN ...-----\n ... -----END ...-----` block,
/// returning it (with both markers) as one slice. Shaped like the teacher's
/// `nom_combinators::cert`.
fn pem_block<'a>(
    input: &'a str,
    begin_marker: &'static str,
    end_marker: &'static str,
) -> IResult<&'a str, &'a str> {
    let start_len = input.len();
    let (i, _) = tag(begin_marker)(input)?;
    let (i, _) = tag("\n")(i)?;
    let (i, _body) = take_until(end_marker)(i)?;
    let (i, _) = tag(end_marker)(i)?;
    let len = start_len - i.len();
    Ok((i, &input[..len]))
}

/// Takes everything up to and including `end_marker`, returning the text
/// before the marker.
fn take_until_marker<'a>(input: &'a str, end_marker: &'static str) -> IResult<&'a str, &'a str> {
    let (i, body) = take_until(end_marker)(input)?;
    let (i, _) = tag(end_marker)(i)?;
    Ok((i, body))
}

/// One scanned unit of descriptor/directory text.
#[derive(Debug)]
pub enum Token {
    Keyword { name: String, args: Vec<String> },
    PublicKey(crypto::PublicKey),
    Signature([u8; crypto::SIGNATURE_LEN]),
    Eof,
    Error(String),
}

/// A cursor into a text buffer, advancing one token at a time.
pub struct Scanner<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(input: &'a str) -> Self {
        Scanner { input, pos: 0 }
    }

    /// Current byte offset into the original buffer.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Rewind to a previously observed offset, for one-token lookahead.
    pub fn reset(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Byte range `[start, end)` of the original buffer, for signed-region
    /// digests.
    pub fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.input[start..end]
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        let skip = rest
            .find(|c: char| !c.is_ascii_whitespace())
            .unwrap_or(rest.len());
        self.pos += skip;
    }

    fn consume_newline(&mut self) {
        if self.rest().starts_with('\n') {
            self.pos += 1;
        }
    }

    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace();
        if self.pos >= self.input.len() {
            return Token::Eof;
        }
        if self.rest().starts_with('-') {
            self.scan_dashed_line()
        } else {
            self.scan_keyword_line()
        }
    }

    fn scan_dashed_line(&mut self) -> Token {
        let rest = self.rest();
        let line_end = rest.find('\n').unwrap_or(rest.len());
        let line = &rest[..line_end];

        if line == PUBKEY_BEGIN {
            match self.scan_pem_block(PUBKEY_END) {
                Ok(block) => match crypto::PublicKey::from_pem(block) {
                    Ok(pk) => Token::PublicKey(pk),
                    Err(e) => Token::Error(format!("couldn't parse public key: {e}")),
                },
                Err(e) => Token::Error(e),
            }
        } else if line == SIG_BEGIN {
            self.pos += line_end;
            self.consume_newline();
            match self.scan_to_marker(SIG_END) {
                Ok(body) => {
                    let joined: String = body.split_whitespace().collect();
                    match crypto::decode_signature(&joined) {
                        Ok(sig) => Token::Signature(sig),
                        Err(e) => Token::Error(format!("bad signature: {e}")),
                    }
                }
                Err(e) => Token::Error(e),
            }
        } else {
            Token::Error(format!("unrecognized dashed line: {line}"))
        }
    }

    /// Scans a `-----BEGIN ...-----` block whose body is handed whole (with
    /// markers) to the public-key parser, advancing past the newline that
    /// follows the END marker.
    fn scan_pem_block(&mut self, end_marker: &'static str) -> Result<&'a str, String> {
        let start = self.pos;
        let input = self.rest();
        let (rest, block) = pem_block(input, PUBKEY_BEGIN, end_marker)
            .map_err(|_| "malformed public-key PEM block".to_string())?;
        let nl = usize::from(rest.starts_with('\n'));
        self.pos = start + block.len() + nl;
        Ok(&self.input[start..start + block.len() + nl])
    }

    /// Scans up to `end_marker`, returning the enclosed body and advancing
    /// past the newline that follows the marker.
    fn scan_to_marker(&mut self, end_marker: &'static str) -> Result<&'a str, String> {
        let input = self.rest();
        let (rest, body) = take_until_marker(input, end_marker)
            .map_err(|_| "missing END marker for signature".to_string())?;
        let consumed = input.len() - rest.len();
        let nl = usize::from(rest.starts_with('\n'));
        self.pos += consumed + nl;
        Ok(body)
    }

    fn scan_keyword_line(&mut self) -> Token {
        let rest = self.rest();
        let line_end = rest.find('\n').unwrap_or(rest.len());
        let line = &rest[..line_end];

        let mut parts = line.splitn(2, |c: char| c.is_ascii_whitespace());
        let word = parts.next().unwrap_or("");
        if !KEYWORDS.contains(&word) {
            self.pos += line_end;
            self.consume_newline();
            return Token::Error(format!("unknown keyword: {word}"));
        }

        let remainder = parts.next().unwrap_or("");
        let args: Vec<String> = remainder.split_whitespace().map(String::from).collect();

        self.pos += line_end;
        self.consume_newline();

        if args.len() > MAX_ARGS {
            return Token::Error(format!("too many arguments: {}", args.len()));
        }

        Token::Keyword {
            name: word.to_string(),
            args,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_whitespace_and_reads_keyword() {
        let mut s = Scanner::new("\n\n  published 2024-01-01 00:00:00\n");
        match s.next_token() {
            Token::Keyword { name, args } => {
                assert_eq!(name, "published");
                assert_eq!(args, vec!["2024-01-01", "00:00:00"]);
            }
            other => panic!("unexpected token: {other:?}"),
        }
        assert!(matches!(s.next_token(), Token::Eof));
    }

    #[test]
    fn unknown_keyword_is_error() {
        let mut s = Scanner::new("bogus a b c\n");
        assert!(matches!(s.next_token(), Token::Error(_)));
    }

    #[test]
    fn signature_requires_exactly_128_bytes() {
        let short_sig = base64::encode([0u8; 127]);
        let text = format!("-----BEGIN SIGNATURE-----\n{short_sig}\n-----END SIGNATURE-----\n");
        let mut s = Scanner::new(&text);
        assert!(matches!(s.next_token(), Token::Error(_)));

        let good_sig = base64::encode([0u8; 128]);
        let text = format!("-----BEGIN SIGNATURE-----\n{good_sig}\n-----END SIGNATURE-----\n");
        let mut s = Scanner::new(&text);
        assert!(matches!(s.next_token(), Token::Signature(_)));
    }

    #[test]
    fn too_many_arguments_is_resource_error() {
        let args = vec!["x"; MAX_ARGS + 1].join(" ");
        let text = format!("platform {args}\n");
        let mut s = Scanner::new(&text);
        assert!(matches!(s.next_token(), Token::Error(_)));
    }
}
