use crate::errors;
use crate::pack::{self, Pack};

use std::cmp::Ordering;
use std::fmt;

/// A (major, minor) protocol version. Ordering is lexicographic on (major, minor).
#[derive(Clone, Copy, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct ProtocolVersion {
    major: u8,
    minor: u8,
}

pub const SSL_2_0: ProtocolVersion = ProtocolVersion { major: 2, minor: 0 };
pub const SSL_3_0: ProtocolVersion = ProtocolVersion { major: 3, minor: 0 };
pub const TLS_1_0: ProtocolVersion = ProtocolVersion { major: 3, minor: 1 };
pub const TLS_1_1: ProtocolVersion = ProtocolVersion { major: 3, minor: 2 };
pub const TLS_1_2: ProtocolVersion = ProtocolVersion { major: 3, minor: 3 };

impl ProtocolVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    pub fn major(&self) -> u8 {
        self.major
    }

    pub fn minor(&self) -> u8 {
        self.minor
    }

    pub fn compare(&self, other: &ProtocolVersion) -> Ordering {
        self.cmp(other)
    }

    pub fn is_set(&self) -> bool {
        self.major != 0
    }

    /// TLS 1.2 adds explicit signature/hash pairs to signed handshake fields.
    pub fn uses_signature_algorithms(&self) -> bool {
        *self >= TLS_1_2
    }

    pub fn is_sslv2(&self) -> bool {
        self.major == 2
    }
}

impl fmt::Debug for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            SSL_2_0 => write!(f, "SSLv2"),
            SSL_3_0 => write!(f, "SSLv3"),
            TLS_1_0 => write!(f, "TLSv1.0"),
            TLS_1_1 => write!(f, "TLSv1.1"),
            TLS_1_2 => write!(f, "TLSv1.2"),
            _ => write!(f, "ProtocolVersion({}, {})", self.major, self.minor),
        }
    }
}

impl Pack for ProtocolVersion {
    fn empty() -> Self {
        Self { major: 0, minor: 0 }
    }

    fn pack(&self) -> Vec<u8> {
        vec![self.major, self.minor]
    }

    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        let rest = pack::take_front(v, 2)?;
        if v[0] == 0 {
            return Err(errors::TLSError::DecodeError("protocol major version is zero"));
        }
        self.major = v[0];
        self.minor = v[1];
        Ok(rest)
    }
}

#[cfg(test)]
mod tests {
    use crate::pack::Pack;
    use crate::version::{self, ProtocolVersion};

    use std::cmp::Ordering;

    #[test]
    fn compare_is_a_total_order_consistent_with_fields() {
        let samples = [0u8, 1, 2, 3, 4, 254, 255];
        for &maj1 in &samples {
            for &min1 in &samples {
                for &maj2 in &samples {
                    for &min2 in &samples {
                        let a = ProtocolVersion::new(maj1, min1);
                        let b = ProtocolVersion::new(maj2, min2);
                        let holds = [a < b, a == b, a > b].iter().filter(|x| **x).count();
                        assert_eq!(holds, 1);
                        let expected = (a.major(), a.minor()).cmp(&(b.major(), b.minor()));
                        assert_eq!(a.compare(&b), expected);
                    }
                }
            }
        }
    }

    #[test]
    fn known_versions_are_ordered() {
        assert!(version::SSL_3_0 < version::TLS_1_0);
        assert!(version::TLS_1_0 < version::TLS_1_1);
        assert!(version::TLS_1_1 < version::TLS_1_2);
        assert_eq!(version::TLS_1_2.compare(&version::TLS_1_2), Ordering::Equal);
    }

    #[test]
    fn zero_major_is_rejected() {
        let mut v = ProtocolVersion::empty();
        assert!(v.unpack(&mut vec![0, 3]).is_err());
        assert!(!v.is_set());
        let rest = v.unpack(&mut vec![3, 3, 7]).expect("unpack failed");
        assert_eq!(v, version::TLS_1_2);
        assert_eq!(rest, vec![7]);
    }
}
