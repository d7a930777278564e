use crate::errors;
use crate::pack::{self, Pack};

use num_traits::FromPrimitive;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Primitive)]
#[repr(u8)]
pub enum AlertLevel {
    Warning = 1,
    Fatal = 2,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Primitive)]
#[repr(u8)]
pub enum AlertDescription {
    CloseNotify = 0,
    UnexpectedMessage = 10,
    BadRecordMac = 20,
    DecryptionFailedRESERVED = 21,
    RecordOverflow = 22,
    DecompressionFailure = 30,
    HandshakeFailure = 40,
    NoCertificateRESERVED = 41,
    BadCertificate = 42,
    UnsupportedCertificate = 43,
    CertificateRevoked = 44,
    CertificateExpired = 45,
    CertificateUnknown = 46,
    IllegalParameter = 47,
    UnknownCa = 48,
    AccessDenied = 49,
    DecodeError = 50,
    DecryptError = 51,
    ExportRestrictionRESERVED = 60,
    ProtocolVersion = 70,
    InsufficientSecurity = 71,
    InternalError = 80,
    UserCanceled = 90,
    NoRenegotiation = 100,
    UnsupportedExtension = 110,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Alert {
    pub level: AlertLevel,
    pub description: AlertDescription,
}

impl Alert {
    pub fn fatal(description: AlertDescription) -> Self {
        Self {
            level: AlertLevel::Fatal,
            description,
        }
    }

    pub fn warning(description: AlertDescription) -> Self {
        Self {
            level: AlertLevel::Warning,
            description,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.level == AlertLevel::Fatal
    }
}

impl Pack for Alert {
    fn empty() -> Self {
        Self::warning(AlertDescription::CloseNotify)
    }

    fn pack(&self) -> Vec<u8> {
        vec![self.level as u8, self.description as u8]
    }

    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        let rest = pack::take_front(v, 2)?;
        self.level = AlertLevel::from_u8(v[0]).ok_or(errors::TLSError::DecodeError("unknown alert level"))?;
        self.description = AlertDescription::from_u8(v[1]).ok_or(errors::TLSError::DecodeError("unknown alert description"))?;
        Ok(rest)
    }
}

#[cfg(test)]
mod tests {
    use crate::alert::{Alert, AlertDescription, AlertLevel};
    use crate::pack::Pack;
    use crate::pack_unpack_inverse_test;

    pack_unpack_inverse_test!(alert_pack_unpack_inverse_test, Alert::fatal(AlertDescription::HandshakeFailure));

    #[test]
    fn wire_form() {
        assert_eq!(Alert::fatal(AlertDescription::IllegalParameter).pack(), vec![2, 47]);
        assert_eq!(Alert::warning(AlertDescription::InsufficientSecurity).pack(), vec![1, 71]);
    }

    #[test]
    fn unknown_level_is_rejected() {
        let mut alert = Alert::empty();
        assert!(alert.unpack(&mut vec![3, 40]).is_err());
        assert_eq!(alert.level, AlertLevel::Warning);
    }
}
