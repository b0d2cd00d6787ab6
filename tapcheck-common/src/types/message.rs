// Message and argument types
//
// A message is an address plus a positional argument list. The type signature
// is derived from the arguments, one character per argument, and is compared
// against the signature a method was bound with before delivery.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while building addresses or type signatures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MessageError {
    #[error("Invalid type code '{0}' in signature")]
    InvalidTypeCode(char),
    #[error("Invalid address '{0}': expected /<service>/<path>")]
    InvalidAddress(String),
    #[error("Argument {index} is not {expected}")]
    ArgumentType { index: usize, expected: &'static str },
    #[error("Expected {expected} arguments, got {actual}")]
    ArgumentCount { expected: usize, actual: usize },
}

/// One positional message argument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Arg {
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    String(String),
    Symbol(String),
}

impl Arg {
    /// Type code of this argument in a signature string
    pub fn type_code(&self) -> char {
        match self {
            Arg::Int32(_) => 'i',
            Arg::Int64(_) => 'h',
            Arg::Float(_) => 'f',
            Arg::Double(_) => 'd',
            Arg::String(_) => 's',
            Arg::Symbol(_) => 'S',
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Arg::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Arg::Symbol(s) => Some(s),
            _ => None,
        }
    }
}

/// A validated type signature such as `"sSi"`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeSignature(String);

impl TypeSignature {
    const VALID_CODES: [char; 6] = ['i', 'h', 'f', 'd', 's', 'S'];

    pub fn parse(types: &str) -> Result<Self, MessageError> {
        if let Some(bad) = types.chars().find(|c| !Self::VALID_CODES.contains(c)) {
            return Err(MessageError::InvalidTypeCode(bad));
        }
        Ok(Self(types.to_string()))
    }

    pub fn of_args(args: &[Arg]) -> Self {
        Self(args.iter().map(Arg::type_code).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn arity(&self) -> usize {
        self.0.chars().count()
    }

    pub fn accepts(&self, args: &[Arg]) -> bool {
        args.len() == self.arity()
            && self
                .0
                .chars()
                .zip(args.iter())
                .all(|(code, arg)| code == arg.type_code())
    }
}

impl fmt::Display for TypeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Split `/service/rest/of/path` into the service name and the method suffix.
///
/// The service name is everything between the leading slash and the next one;
/// both parts are returned as written, without normalization.
pub fn split_address(address: &str) -> Result<(&str, &str), MessageError> {
    let body = address
        .strip_prefix('/')
        .ok_or_else(|| MessageError::InvalidAddress(address.to_string()))?;
    match body.split_once('/') {
        Some((service, suffix)) if !service.is_empty() && !suffix.is_empty() => {
            Ok((service, suffix))
        }
        _ => Err(MessageError::InvalidAddress(address.to_string())),
    }
}

/// A delivered or queued message
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub address: String,
    pub args: Vec<Arg>,
}

impl Message {
    pub fn new(address: impl Into<String>, args: Vec<Arg>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }

    pub fn types(&self) -> TypeSignature {
        TypeSignature::of_args(&self.args)
    }

    /// Service part of the address
    pub fn service(&self) -> Result<&str, MessageError> {
        split_address(&self.address).map(|(service, _)| service)
    }

    /// Copy of this message re-addressed to another service with the same suffix
    pub fn readdressed(&self, service: &str) -> Result<Message, MessageError> {
        let (_, suffix) = split_address(&self.address)?;
        Ok(Message {
            address: format!("/{service}/{suffix}"),
            args: self.args.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_matches_args() {
        let sig = TypeSignature::parse("sSi").unwrap();
        let args = vec![
            Arg::String("unistr".into()),
            Arg::Symbol("unistr".into()),
            Arg::Int32(7),
        ];
        assert!(sig.accepts(&args));
        assert_eq!(TypeSignature::of_args(&args), sig);

        let wrong = vec![
            Arg::String("unistr".into()),
            Arg::String("unistr".into()),
            Arg::Int32(7),
        ];
        assert!(!sig.accepts(&wrong));
        assert!(!sig.accepts(&args[..2]));
    }

    #[test]
    fn test_invalid_type_code_rejected() {
        assert_eq!(
            TypeSignature::parse("sSx"),
            Err(MessageError::InvalidTypeCode('x'))
        );
    }

    #[test]
    fn test_split_address_keeps_unicode() {
        assert_eq!(
            split_address("/pubunistr0/äta").unwrap(),
            ("pubunistr0", "äta")
        );
        assert_eq!(split_address("/svc/a/b").unwrap(), ("svc", "a/b"));
        assert!(split_address("pubunistr0/äta").is_err());
        assert!(split_address("/pubunistr0").is_err());
        assert!(split_address("//äta").is_err());
    }

    #[test]
    fn test_readdressed_copy() {
        let msg = Message::new("/pubunistr0/äta", vec![Arg::Int32(4)]);
        let copy = msg.readdressed("subunistr0").unwrap();
        assert_eq!(copy.address, "/subunistr0/äta");
        assert_eq!(copy.args, msg.args);
    }
}
