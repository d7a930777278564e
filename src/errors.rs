use crate::alert::AlertDescription;
use crate::cipher::CipherSuiteID;
use crate::handshake::HandshakeType;
use crate::state::HandshakePhase;
use crate::version::ProtocolVersion;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TLSError {
    #[error("truncated input: needed {needed} bytes, {available} available")]
    TruncatedError { needed: usize, available: usize },
    #[error("length {declared} exceeds the field maximum of {max}")]
    LengthOverflowError { declared: usize, max: usize },
    #[error("invalid length")]
    InvalidLengthError,
    #[error("Invalid handshake type: {}", _0)]
    InvalidHandshakeTypeError(u8),
    #[error("decode error: {}", _0)]
    DecodeError(&'static str),
    #[error("trailing data after {:?} message", _0)]
    TrailingDataError(HandshakeType),

    #[error("illegal parameter: {}", _0)]
    IllegalParameter(&'static str),
    #[error("handshake failure: {}", _0)]
    HandshakeFailure(&'static str),
    #[error("peer selected disabled protocol version {:?}", _0)]
    ProtocolVersionError(ProtocolVersion),
    #[error("{:?} not expected in phase {:?}", received, phase)]
    OutOfOrderMessage { received: HandshakeType, phase: HandshakePhase },
    #[error("extension {:#06x} appears more than once", _0)]
    DuplicateExtension(u16),
    #[error("extension {:#06x} was not requested", _0)]
    UnsupportedExtension(u16),
    #[error("bad certificate: {}", _0)]
    BadCertificate(String),
    #[error("decrypt error: {}", _0)]
    DecryptError(&'static str),
    #[error("insufficient security: {}", _0)]
    InsufficientSecurity(&'static str),
    #[error("Cipher not supported: {:x?}", _0)]
    CipherNotSupportedError(CipherSuiteID),
    #[error("crypto operation not supported: {}", _0)]
    UnsupportedAlgorithm(&'static str),

    #[error("Unspecified ring error")]
    UnspecifiedRingError,
    #[error("Some session fields were None")]
    SessionError,
    #[error("allocation failure")]
    AllocationFailure,
    #[error("internal error: {}", _0)]
    InternalError(&'static str),

    #[error("{}", _0)]
    TryFromIntError(#[from] std::num::TryFromIntError),
    #[error("{}", _0)]
    SystemTimeError(#[from] std::time::SystemTimeError),
}

impl TLSError {
    /// The alert sent to the peer when this error ends a handshake.
    pub fn alert_description(&self) -> AlertDescription {
        match self {
            TLSError::TruncatedError { .. }
            | TLSError::LengthOverflowError { .. }
            | TLSError::InvalidLengthError
            | TLSError::DecodeError(_)
            | TLSError::DuplicateExtension(_) => AlertDescription::DecodeError,
            TLSError::InvalidHandshakeTypeError(_) | TLSError::OutOfOrderMessage { .. } => AlertDescription::UnexpectedMessage,
            TLSError::TrailingDataError(_) | TLSError::IllegalParameter(_) | TLSError::CipherNotSupportedError(_) => {
                AlertDescription::IllegalParameter
            }
            TLSError::HandshakeFailure(_) | TLSError::UnsupportedAlgorithm(_) => AlertDescription::HandshakeFailure,
            TLSError::ProtocolVersionError(_) => AlertDescription::ProtocolVersion,
            TLSError::UnsupportedExtension(_) => AlertDescription::UnsupportedExtension,
            TLSError::BadCertificate(_) => AlertDescription::BadCertificate,
            TLSError::DecryptError(_) => AlertDescription::DecryptError,
            TLSError::InsufficientSecurity(_) => AlertDescription::InsufficientSecurity,
            TLSError::UnspecifiedRingError
            | TLSError::SessionError
            | TLSError::AllocationFailure
            | TLSError::InternalError(_)
            | TLSError::TryFromIntError(_)
            | TLSError::SystemTimeError(_) => AlertDescription::InternalError,
        }
    }
}
