//! Frame validation
//!
//! Decoded frames are checked in a fixed order, stopping at the first
//! failure:
//!
//! 1. type byte is printable ASCII
//! 2. terminator is zero
//! 3. type is in the deployment's allowed set
//! 4. value is not the extraction failure sentinel
//! 5. origin id is within 1..=99
//!
//! The first two checks together detect a frame deciphered with the wrong
//! key or corrupted in flight; garbage rarely passes both.

use super::frame::{Frame, MsgType, FAILURE_VALUE};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Coarse rejection class, as reported in status lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectClass {
    /// Decrypt failure or transport garbage
    DecryptOrGarbage,
    /// Well-formed but semantically invalid
    ValidationReject,
}

/// Why a decoded frame was rejected
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum RejectReason {
    /// Type byte outside printable ASCII
    #[error("type byte {0} is not printable ASCII")]
    NonPrintableType(u8),

    /// Terminator byte not zero
    #[error("terminator byte is {0}, expected 0")]
    BadTerminator(u8),

    /// Type not in the allowed set
    #[error("message type '{0}' is not allowed")]
    UnexpectedType(char),

    /// Value is the failure sentinel
    #[error("value is the failure sentinel -999")]
    FailureValue,

    /// Origin byte outside 1..=99
    #[error("origin id {0} outside 1..=99")]
    InvalidOrigin(u8),
}

impl RejectReason {
    /// Classification of this reason
    pub fn class(&self) -> RejectClass {
        match self {
            RejectReason::NonPrintableType(_) | RejectReason::BadTerminator(_) => {
                RejectClass::DecryptOrGarbage
            }
            RejectReason::UnexpectedType(_)
            | RejectReason::FailureValue
            | RejectReason::InvalidOrigin(_) => RejectClass::ValidationReject,
        }
    }
}

/// Set of message types a deployment accepts
///
/// Kept as an ordered list; duplicates are harmless.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AllowedTypes(Vec<u8>);

impl AllowedTypes {
    /// The full deployed set `{t,h,c,v,n,a,b,d,e}`
    pub const DEFAULT_SET: &'static str = "thcvnabde";

    /// Parse from a string of type characters
    pub fn parse(types: &str) -> Result<Self, ConfigError> {
        if types.is_empty() {
            return Err(ConfigError::AllowedTypes("set is empty".to_string()));
        }
        let mut set = Vec::with_capacity(types.len());
        for c in types.chars() {
            match MsgType::from_char(c) {
                Some(t) if t.is_printable() => set.push(t.as_byte()),
                _ => {
                    return Err(ConfigError::AllowedTypes(format!(
                        "{:?} is not printable ASCII",
                        c
                    )))
                }
            }
        }
        Ok(AllowedTypes(set))
    }

    /// Check membership
    pub fn contains(&self, msg_type: MsgType) -> bool {
        self.0.contains(&msg_type.as_byte())
    }
}

impl Default for AllowedTypes {
    fn default() -> Self {
        AllowedTypes(Self::DEFAULT_SET.as_bytes().to_vec())
    }
}

impl TryFrom<String> for AllowedTypes {
    type Error = ConfigError;

    fn try_from(types: String) -> Result<Self, Self::Error> {
        Self::parse(&types)
    }
}

impl From<AllowedTypes> for String {
    fn from(types: AllowedTypes) -> Self {
        types.0.iter().map(|&b| char::from(b)).collect()
    }
}

impl fmt::Debug for AllowedTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s: String = self.0.iter().map(|&b| char::from(b)).collect();
        write!(f, "AllowedTypes({:?})", s)
    }
}

/// Validator for decoded frames
#[derive(Debug, Clone, Default)]
pub struct FrameValidator {
    allowed: AllowedTypes,
}

impl FrameValidator {
    /// Create a validator accepting `allowed` types
    pub fn new(allowed: AllowedTypes) -> Self {
        Self { allowed }
    }

    /// Check a decoded frame
    pub fn validate(&self, frame: &Frame) -> Result<(), RejectReason> {
        let msg_type = frame.msg_type();
        if !msg_type.is_printable() {
            return Err(RejectReason::NonPrintableType(msg_type.as_byte()));
        }
        if frame.terminator() != 0 {
            return Err(RejectReason::BadTerminator(frame.terminator()));
        }
        if !self.allowed.contains(msg_type) {
            return Err(RejectReason::UnexpectedType(msg_type.as_char()));
        }
        if frame.value() == FAILURE_VALUE {
            return Err(RejectReason::FailureValue);
        }
        if frame.origin_id().is_unknown() {
            return Err(RejectReason::InvalidOrigin(frame.raw_origin()));
        }
        Ok(())
    }
}
