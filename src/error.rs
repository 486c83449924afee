use std::{io, num};

use thiserror::Error;

/// Error type of this crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("directory error: {0}")]
    Dir(#[from] ErrorKind),
    #[error("integer parse error: {0}")]
    ParseInt(#[from] num::ParseIntError),
    #[error("address parse error: {0}")]
    ParseAddr(#[from] std::net::AddrParseError),
    #[error("date parse error: {0}")]
    ParseDate(#[from] chrono::ParseError),
    #[error("RSA error: {0}")]
    Rsa(#[from] rsa::Error),
    #[error("signature error: {0}")]
    Signature(#[from] signature::Error),
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// The non-IO error kinds described in the subsystem's error handling
/// design: `SyntaxError`, `CryptoError`, `SemanticError`, `ResourceError`.
#[derive(Debug, Clone)]
pub enum ErrorKind {
    Syntax(String),
    Crypto(String),
    Semantic(String),
    Resource(String),
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use ErrorKind::*;
        match self {
            Syntax(msg) => write!(f, "syntax error: {msg}"),
            Crypto(msg) => write!(f, "crypto error: {msg}"),
            Semantic(msg) => write!(f, "semantic error: {msg}"),
            Resource(msg) => write!(f, "resource error: {msg}"),
        }
    }
}

impl std::error::Error for ErrorKind {}

impl<T: std::fmt::Debug> From<nom::Err<T>> for Error {
    fn from(e: nom::Err<T>) -> Self {
        Error::Dir(ErrorKind::Syntax(format!("nom: {e:?}")))
    }
}
