use crate::errors;
use crate::pack::{self, Pack};
use crate::version::{self, ProtocolVersion};

use std::fmt;
use std::sync::Arc;

/// Two-byte cipher suite identifier, compared byte-wise.
#[derive(Clone, Copy, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct CipherSuiteID(pub [u8; 2]);

impl fmt::Debug for CipherSuiteID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{0x{:02X}, 0x{:02X}}}", self.0[0], self.0[1])
    }
}

impl Pack for CipherSuiteID {
    fn empty() -> Self {
        CipherSuiteID([0, 0])
    }

    fn pack(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        let rest = pack::take_front(v, 2)?;
        self.0 = [v[0], v[1]];
        Ok(rest)
    }
}

pub const TLS_RSA_WITH_RC4_128_MD5: CipherSuiteID = CipherSuiteID([0x00, 0x04]);
pub const TLS_RSA_WITH_RC4_128_SHA: CipherSuiteID = CipherSuiteID([0x00, 0x05]);
pub const TLS_RSA_WITH_3DES_EDE_CBC_SHA: CipherSuiteID = CipherSuiteID([0x00, 0x0a]);
pub const TLS_DHE_RSA_WITH_3DES_EDE_CBC_SHA: CipherSuiteID = CipherSuiteID([0x00, 0x16]);
pub const TLS_RSA_WITH_AES_128_CBC_SHA: CipherSuiteID = CipherSuiteID([0x00, 0x2f]);
pub const TLS_DH_DSS_WITH_AES_128_CBC_SHA: CipherSuiteID = CipherSuiteID([0x00, 0x30]);
pub const TLS_DH_RSA_WITH_AES_128_CBC_SHA: CipherSuiteID = CipherSuiteID([0x00, 0x31]);
pub const TLS_DHE_DSS_WITH_AES_128_CBC_SHA: CipherSuiteID = CipherSuiteID([0x00, 0x32]);
pub const TLS_DHE_RSA_WITH_AES_128_CBC_SHA: CipherSuiteID = CipherSuiteID([0x00, 0x33]);
pub const TLS_DH_ANON_WITH_AES_128_CBC_SHA: CipherSuiteID = CipherSuiteID([0x00, 0x34]);
pub const TLS_RSA_WITH_AES_256_CBC_SHA: CipherSuiteID = CipherSuiteID([0x00, 0x35]);
pub const TLS_DHE_DSS_WITH_AES_256_CBC_SHA: CipherSuiteID = CipherSuiteID([0x00, 0x38]);
pub const TLS_DHE_RSA_WITH_AES_256_CBC_SHA: CipherSuiteID = CipherSuiteID([0x00, 0x39]);
pub const TLS_RSA_WITH_AES_128_CBC_SHA256: CipherSuiteID = CipherSuiteID([0x00, 0x3c]);
pub const TLS_RSA_WITH_AES_256_CBC_SHA256: CipherSuiteID = CipherSuiteID([0x00, 0x3d]);
pub const TLS_DHE_RSA_WITH_AES_128_CBC_SHA256: CipherSuiteID = CipherSuiteID([0x00, 0x67]);
pub const TLS_DHE_RSA_WITH_AES_256_CBC_SHA256: CipherSuiteID = CipherSuiteID([0x00, 0x6b]);
pub const TLS_RSA_WITH_AES_128_GCM_SHA256: CipherSuiteID = CipherSuiteID([0x00, 0x9c]);
pub const TLS_RSA_WITH_AES_256_GCM_SHA384: CipherSuiteID = CipherSuiteID([0x00, 0x9d]);
pub const TLS_DHE_RSA_WITH_AES_128_GCM_SHA256: CipherSuiteID = CipherSuiteID([0x00, 0x9e]);
pub const TLS_DHE_RSA_WITH_AES_256_GCM_SHA384: CipherSuiteID = CipherSuiteID([0x00, 0x9f]);
pub const TLS_EMPTY_RENEGOTIATION_INFO_SCSV: CipherSuiteID = CipherSuiteID([0x00, 0xff]);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PRFAlgorithm {
    /// MD5/SHA-1 construction of SSL 3.0 through TLS 1.1.
    Legacy,
    TlsPrfSha256,
    TlsPrfSha384,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BulkCipherAlgorithm {
    Null,
    Rc4,
    TripleDes,
    Aes,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CipherType {
    Stream,
    Block,
    Aead,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MACAlgorithm {
    Null,
    HmacMd5,
    HmacSha1,
    HmacSha256,
    HmacSha384,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyExchangeAlgorithm {
    Rsa,
    DheRsa,
    DheDss,
    DhRsa,
    DhDss,
    DhAnon,
}

impl KeyExchangeAlgorithm {
    pub fn is_ephemeral_dh(&self) -> bool {
        matches!(self, KeyExchangeAlgorithm::DheRsa | KeyExchangeAlgorithm::DheDss)
    }

    pub fn is_diffie_hellman(&self) -> bool {
        !matches!(self, KeyExchangeAlgorithm::Rsa)
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, KeyExchangeAlgorithm::DhAnon)
    }

    /// Whether a ServerKeyExchange message is part of the flight.
    pub fn expects_server_key_exchange(&self) -> bool {
        matches!(
            self,
            KeyExchangeAlgorithm::DheRsa | KeyExchangeAlgorithm::DheDss | KeyExchangeAlgorithm::DhAnon
        )
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignatureKind {
    Anonymous,
    Rsa,
    Dsa,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum SecurityRating {
    Insecure,
    Low,
    Medium,
    High,
}

/// One entry of the cipher catalog.
#[derive(Clone, Debug)]
pub struct CipherDescription {
    pub id: CipherSuiteID,
    pub name: &'static str,
    pub bulk_cipher_algorithm: BulkCipherAlgorithm,
    pub cipher_type: CipherType,
    pub mac_algorithm: MACAlgorithm,
    pub key_exchange: KeyExchangeAlgorithm,
    pub signature: SignatureKind,
    pub enc_key_length: u8,
    pub fixed_iv_length: u8,
    pub record_iv_length: u8,
    pub mac_key_length: u8,
    pub security_rating: SecurityRating,
    pub min_version: ProtocolVersion,
    pub prf_algorithm: PRFAlgorithm,
}

impl CipherDescription {
    /// PRF used at `version`: the suite's hash from TLS 1.2, the legacy construction before.
    pub fn prf_for(&self, version: ProtocolVersion) -> PRFAlgorithm {
        if version >= version::TLS_1_2 {
            self.prf_algorithm
        } else {
            PRFAlgorithm::Legacy
        }
    }

    /// IV bytes taken from the key block at `version`. CBC suites carry an explicit
    /// per-record IV from TLS 1.1 on and derive none.
    pub fn fixed_iv_length_for(&self, version: ProtocolVersion) -> usize {
        match self.cipher_type {
            CipherType::Block if version >= version::TLS_1_1 => 0,
            _ => self.fixed_iv_length as usize,
        }
    }

    pub fn key_block_length(&self, version: ProtocolVersion) -> usize {
        2 * (self.mac_key_length as usize + self.enc_key_length as usize + self.fixed_iv_length_for(version))
    }

    /// Whether the suite may go into a ClientHello offering `max_version`.
    pub fn is_offerable(&self, max_version: ProtocolVersion, allow_dhe: bool, allow_anonymous: bool) -> bool {
        let exchange = self.key_exchange;
        self.min_version <= max_version
            && (allow_dhe || !exchange.is_diffie_hellman() || exchange.is_anonymous())
            && (allow_anonymous || !exchange.is_anonymous())
    }
}

struct Parameters {
    bulk: BulkCipherAlgorithm,
    cipher_type: CipherType,
    enc_key_length: u8,
    fixed_iv_length: u8,
    record_iv_length: u8,
    mac: MACAlgorithm,
    mac_key_length: u8,
}

const AES_128_CBC_SHA: Parameters = Parameters {
    bulk: BulkCipherAlgorithm::Aes,
    cipher_type: CipherType::Block,
    enc_key_length: 16,
    fixed_iv_length: 16, // implicit IV, SSL 3.0 and TLS 1.0 only
    record_iv_length: 16,
    mac: MACAlgorithm::HmacSha1,
    mac_key_length: 20,
};
const AES_256_CBC_SHA: Parameters = Parameters {
    enc_key_length: 32,
    ..AES_128_CBC_SHA
};
const AES_128_CBC_SHA256: Parameters = Parameters {
    mac: MACAlgorithm::HmacSha256,
    mac_key_length: 32,
    ..AES_128_CBC_SHA
};
const AES_256_CBC_SHA256: Parameters = Parameters {
    enc_key_length: 32,
    ..AES_128_CBC_SHA256
};
const AES_128_GCM: Parameters = Parameters {
    bulk: BulkCipherAlgorithm::Aes,
    cipher_type: CipherType::Aead,
    enc_key_length: 16,
    fixed_iv_length: 4,
    record_iv_length: 8,
    mac: MACAlgorithm::Null,
    mac_key_length: 0,
};
const AES_256_GCM: Parameters = Parameters {
    enc_key_length: 32,
    ..AES_128_GCM
};
const TRIPLE_DES_CBC_SHA: Parameters = Parameters {
    bulk: BulkCipherAlgorithm::TripleDes,
    cipher_type: CipherType::Block,
    enc_key_length: 24,
    fixed_iv_length: 8, // implicit IV, SSL 3.0 and TLS 1.0 only
    record_iv_length: 8,
    mac: MACAlgorithm::HmacSha1,
    mac_key_length: 20,
};
const RC4_128_SHA: Parameters = Parameters {
    bulk: BulkCipherAlgorithm::Rc4,
    cipher_type: CipherType::Stream,
    enc_key_length: 16,
    fixed_iv_length: 0,
    record_iv_length: 0,
    mac: MACAlgorithm::HmacSha1,
    mac_key_length: 20,
};
const RC4_128_MD5: Parameters = Parameters {
    mac: MACAlgorithm::HmacMd5,
    mac_key_length: 16,
    ..RC4_128_SHA
};

fn describe(
    id: CipherSuiteID,
    name: &'static str,
    key_exchange: KeyExchangeAlgorithm,
    parameters: Parameters,
    security_rating: SecurityRating,
    min_version: ProtocolVersion,
    prf_algorithm: PRFAlgorithm,
) -> CipherDescription {
    let signature = match key_exchange {
        KeyExchangeAlgorithm::Rsa | KeyExchangeAlgorithm::DheRsa | KeyExchangeAlgorithm::DhRsa => SignatureKind::Rsa,
        KeyExchangeAlgorithm::DheDss | KeyExchangeAlgorithm::DhDss => SignatureKind::Dsa,
        KeyExchangeAlgorithm::DhAnon => SignatureKind::Anonymous,
    };
    CipherDescription {
        id,
        name,
        bulk_cipher_algorithm: parameters.bulk,
        cipher_type: parameters.cipher_type,
        mac_algorithm: parameters.mac,
        key_exchange,
        signature,
        enc_key_length: parameters.enc_key_length,
        fixed_iv_length: parameters.fixed_iv_length,
        record_iv_length: parameters.record_iv_length,
        mac_key_length: parameters.mac_key_length,
        security_rating,
        min_version,
        prf_algorithm,
    }
}

/// Immutable, shared catalog of the suites this client knows, in preference order.
#[derive(Debug, Default)]
pub struct CipherRegistry {
    ciphers: Vec<Arc<CipherDescription>>,
}

impl CipherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        use KeyExchangeAlgorithm::*;
        use SecurityRating::*;

        let sha256 = PRFAlgorithm::TlsPrfSha256;
        let sha384 = PRFAlgorithm::TlsPrfSha384;
        let tls12 = version::TLS_1_2;
        let ssl3 = version::SSL_3_0;

        let mut registry = Self::new();
        for description in vec![
            describe(TLS_DHE_RSA_WITH_AES_256_GCM_SHA384, "TLS_DHE_RSA_WITH_AES_256_GCM_SHA384", DheRsa, AES_256_GCM, High, tls12, sha384),
            describe(TLS_DHE_RSA_WITH_AES_128_GCM_SHA256, "TLS_DHE_RSA_WITH_AES_128_GCM_SHA256", DheRsa, AES_128_GCM, High, tls12, sha256),
            describe(TLS_RSA_WITH_AES_256_GCM_SHA384, "TLS_RSA_WITH_AES_256_GCM_SHA384", Rsa, AES_256_GCM, High, tls12, sha384),
            describe(TLS_RSA_WITH_AES_128_GCM_SHA256, "TLS_RSA_WITH_AES_128_GCM_SHA256", Rsa, AES_128_GCM, High, tls12, sha256),
            describe(TLS_DHE_RSA_WITH_AES_256_CBC_SHA256, "TLS_DHE_RSA_WITH_AES_256_CBC_SHA256", DheRsa, AES_256_CBC_SHA256, High, tls12, sha256),
            describe(TLS_DHE_RSA_WITH_AES_128_CBC_SHA256, "TLS_DHE_RSA_WITH_AES_128_CBC_SHA256", DheRsa, AES_128_CBC_SHA256, High, tls12, sha256),
            describe(TLS_RSA_WITH_AES_256_CBC_SHA256, "TLS_RSA_WITH_AES_256_CBC_SHA256", Rsa, AES_256_CBC_SHA256, High, tls12, sha256),
            describe(TLS_RSA_WITH_AES_128_CBC_SHA256, "TLS_RSA_WITH_AES_128_CBC_SHA256", Rsa, AES_128_CBC_SHA256, High, tls12, sha256),
            describe(TLS_DHE_RSA_WITH_AES_256_CBC_SHA, "TLS_DHE_RSA_WITH_AES_256_CBC_SHA", DheRsa, AES_256_CBC_SHA, High, ssl3, sha256),
            describe(TLS_DHE_DSS_WITH_AES_256_CBC_SHA, "TLS_DHE_DSS_WITH_AES_256_CBC_SHA", DheDss, AES_256_CBC_SHA, High, ssl3, sha256),
            describe(TLS_RSA_WITH_AES_256_CBC_SHA, "TLS_RSA_WITH_AES_256_CBC_SHA", Rsa, AES_256_CBC_SHA, High, ssl3, sha256),
            describe(TLS_DHE_RSA_WITH_AES_128_CBC_SHA, "TLS_DHE_RSA_WITH_AES_128_CBC_SHA", DheRsa, AES_128_CBC_SHA, High, ssl3, sha256),
            describe(TLS_DHE_DSS_WITH_AES_128_CBC_SHA, "TLS_DHE_DSS_WITH_AES_128_CBC_SHA", DheDss, AES_128_CBC_SHA, High, ssl3, sha256),
            describe(TLS_RSA_WITH_AES_128_CBC_SHA, "TLS_RSA_WITH_AES_128_CBC_SHA", Rsa, AES_128_CBC_SHA, High, ssl3, sha256),
            describe(TLS_DH_RSA_WITH_AES_128_CBC_SHA, "TLS_DH_RSA_WITH_AES_128_CBC_SHA", DhRsa, AES_128_CBC_SHA, High, ssl3, sha256),
            describe(TLS_DH_DSS_WITH_AES_128_CBC_SHA, "TLS_DH_DSS_WITH_AES_128_CBC_SHA", DhDss, AES_128_CBC_SHA, High, ssl3, sha256),
            describe(TLS_DHE_RSA_WITH_3DES_EDE_CBC_SHA, "TLS_DHE_RSA_WITH_3DES_EDE_CBC_SHA", DheRsa, TRIPLE_DES_CBC_SHA, Medium, ssl3, sha256),
            describe(TLS_RSA_WITH_3DES_EDE_CBC_SHA, "TLS_RSA_WITH_3DES_EDE_CBC_SHA", Rsa, TRIPLE_DES_CBC_SHA, Medium, ssl3, sha256),
            describe(TLS_RSA_WITH_RC4_128_SHA, "TLS_RSA_WITH_RC4_128_SHA", Rsa, RC4_128_SHA, Low, ssl3, sha256),
            describe(TLS_RSA_WITH_RC4_128_MD5, "TLS_RSA_WITH_RC4_128_MD5", Rsa, RC4_128_MD5, Low, ssl3, sha256),
            describe(TLS_DH_ANON_WITH_AES_128_CBC_SHA, "TLS_DH_anon_WITH_AES_128_CBC_SHA", DhAnon, AES_128_CBC_SHA, Insecure, ssl3, sha256),
        ] {
            registry.register(description);
        }
        registry
    }

    /// Adds a suite at the lowest preference; a suite already present is replaced in place.
    pub fn register(&mut self, description: CipherDescription) {
        let description = Arc::new(description);
        match self.ciphers.iter_mut().find(|c| c.id == description.id) {
            Some(existing) => *existing = description,
            None => self.ciphers.push(description),
        }
    }

    pub fn lookup(&self, id: CipherSuiteID) -> Option<Arc<CipherDescription>> {
        self.ciphers.iter().find(|c| c.id == id).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<CipherDescription>> {
        self.ciphers.iter()
    }

    /// Suites usable when offering `max_version`, in preference order.
    pub fn offerable(&self, max_version: ProtocolVersion, allow_dhe: bool, allow_anonymous: bool) -> Vec<Arc<CipherDescription>> {
        self.ciphers
            .iter()
            .filter(|c| c.is_offerable(max_version, allow_dhe, allow_anonymous))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::cipher::{self, CipherRegistry, KeyExchangeAlgorithm, PRFAlgorithm};
    use crate::version;

    #[test]
    fn scsv_is_byte_identified() {
        assert_eq!(cipher::TLS_EMPTY_RENEGOTIATION_INFO_SCSV.0, [0x00, 0xff]);
        let registry = CipherRegistry::with_defaults();
        assert!(registry.lookup(cipher::TLS_EMPTY_RENEGOTIATION_INFO_SCSV).is_none());
    }

    #[test]
    fn tls12_suites_are_not_offered_below_tls12() {
        let registry = CipherRegistry::with_defaults();
        let offered = registry.offerable(version::TLS_1_0, true, false);
        assert!(!offered.is_empty());
        assert!(offered.iter().all(|c| c.min_version <= version::TLS_1_0));
        assert!(offered.iter().all(|c| c.id != cipher::TLS_RSA_WITH_AES_128_CBC_SHA256));
    }

    #[test]
    fn reduced_dhe_drops_diffie_hellman_suites() {
        let registry = CipherRegistry::with_defaults();
        let offered = registry.offerable(version::TLS_1_2, false, false);
        assert!(offered.iter().all(|c| c.key_exchange == KeyExchangeAlgorithm::Rsa));
    }

    #[test]
    fn anonymous_suites_need_permission() {
        let registry = CipherRegistry::with_defaults();
        assert!(registry
            .offerable(version::TLS_1_2, true, false)
            .iter()
            .all(|c| !c.key_exchange.is_anonymous()));
        assert!(registry
            .offerable(version::TLS_1_2, true, true)
            .iter()
            .any(|c| c.id == cipher::TLS_DH_ANON_WITH_AES_128_CBC_SHA));
    }

    #[test]
    fn prf_depends_on_version() {
        let registry = CipherRegistry::with_defaults();
        let suite = registry.lookup(cipher::TLS_DHE_RSA_WITH_AES_256_GCM_SHA384).expect("suite missing");
        assert_eq!(suite.prf_for(version::TLS_1_2), PRFAlgorithm::TlsPrfSha384);
        let suite = registry.lookup(cipher::TLS_RSA_WITH_AES_128_CBC_SHA).expect("suite missing");
        assert_eq!(suite.prf_for(version::TLS_1_0), PRFAlgorithm::Legacy);
    }

    #[test]
    fn cbc_iv_is_derived_only_before_tls11() {
        let registry = CipherRegistry::with_defaults();
        let suite = registry.lookup(cipher::TLS_RSA_WITH_AES_128_CBC_SHA).expect("suite missing");
        assert_eq!(suite.fixed_iv_length_for(version::SSL_3_0), 16);
        assert_eq!(suite.key_block_length(version::TLS_1_0), 2 * (20 + 16 + 16));
        assert_eq!(suite.fixed_iv_length_for(version::TLS_1_1), 0);
        assert_eq!(suite.key_block_length(version::TLS_1_2), 2 * (20 + 16));

        let suite = registry.lookup(cipher::TLS_RSA_WITH_AES_128_GCM_SHA256).expect("suite missing");
        assert_eq!(suite.key_block_length(version::TLS_1_2), 2 * (16 + 4));

        let suite = registry.lookup(cipher::TLS_RSA_WITH_RC4_128_SHA).expect("suite missing");
        assert_eq!(suite.key_block_length(version::TLS_1_0), 2 * (20 + 16));
    }

    #[test]
    fn offer_predicate_matches_registry_filter() {
        let registry = CipherRegistry::with_defaults();
        let dh_rsa = registry.lookup(cipher::TLS_DH_RSA_WITH_AES_128_CBC_SHA).expect("suite missing");
        assert!(dh_rsa.is_offerable(version::TLS_1_2, true, false));
        assert!(!dh_rsa.is_offerable(version::TLS_1_2, false, false));
        for allow_dhe in &[true, false] {
            let offered = registry.offerable(version::TLS_1_2, *allow_dhe, false);
            let filtered: Vec<_> = registry.iter().filter(|c| c.is_offerable(version::TLS_1_2, *allow_dhe, false)).collect();
            assert_eq!(offered.len(), filtered.len());
        }
    }

    #[test]
    fn register_replaces_existing_entry() {
        let mut registry = CipherRegistry::with_defaults();
        let count = registry.iter().count();
        let mut description = (*registry.lookup(cipher::TLS_RSA_WITH_AES_128_CBC_SHA).expect("suite missing")).clone();
        description.name = "renamed";
        registry.register(description);
        assert_eq!(registry.iter().count(), count);
        assert_eq!(registry.lookup(cipher::TLS_RSA_WITH_AES_128_CBC_SHA).expect("suite missing").name, "renamed");
    }
}
