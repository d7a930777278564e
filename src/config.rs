use crate::cipher::{CipherRegistry, CipherSuiteID};
use crate::extensions::{self, SignatureAndHash};
use crate::crypto::{CertificateHandler, CryptoProvider};
use crate::session::SessionCache;
use crate::version::{self, ProtocolVersion};

use std::sync::Arc;
use std::time::Duration;

/// Client policy. These values are read by the handshake, never computed by it.
#[derive(Clone, Debug)]
pub struct HandshakeConfig {
    pub max_version: ProtocolVersion,
    pub min_version: ProtocolVersion,
    pub enable_ssl3: bool,
    pub require_renegotiation_extension: bool,
    pub allow_reduced_dhe_retry: bool,
    pub enable_ocsp_stapling: bool,
    pub ocsp_request_extensions: Vec<u8>,
    pub next_protocols: Vec<Vec<u8>>,
    pub signature_algorithms: Vec<SignatureAndHash>,
    pub allow_anonymous_dh: bool,
    pub min_dh_prime_bits: usize,
    pub send_gmt_unix_time: bool,
    pub session_lifetime: Duration,
    pub max_sessions_per_server: usize,
    pub cipher_preference: Option<Vec<CipherSuiteID>>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            max_version: version::TLS_1_2,
            min_version: version::TLS_1_0,
            enable_ssl3: false,
            require_renegotiation_extension: false,
            allow_reduced_dhe_retry: true,
            enable_ocsp_stapling: true,
            ocsp_request_extensions: Vec::new(),
            next_protocols: Vec::new(),
            signature_algorithms: vec![
                SignatureAndHash::new(extensions::HASH_SHA256, extensions::SIGNATURE_RSA),
                SignatureAndHash::new(extensions::HASH_SHA384, extensions::SIGNATURE_RSA),
                SignatureAndHash::new(extensions::HASH_SHA512, extensions::SIGNATURE_RSA),
                SignatureAndHash::new(extensions::HASH_SHA256, extensions::SIGNATURE_ECDSA),
                SignatureAndHash::new(extensions::HASH_SHA384, extensions::SIGNATURE_ECDSA),
                SignatureAndHash::new(extensions::HASH_SHA1, extensions::SIGNATURE_RSA),
                SignatureAndHash::new(extensions::HASH_SHA1, extensions::SIGNATURE_DSA),
            ],
            allow_anonymous_dh: false,
            min_dh_prime_bits: 1024,
            send_gmt_unix_time: true,
            session_lifetime: Duration::from_secs(60 * 60),
            max_sessions_per_server: 4,
            cipher_preference: None,
        }
    }
}

impl HandshakeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_version(mut self, version: ProtocolVersion) -> Self {
        self.max_version = version;
        self
    }

    pub fn with_ssl3(mut self, enabled: bool) -> Self {
        self.enable_ssl3 = enabled;
        self
    }

    pub fn with_required_renegotiation_extension(mut self, required: bool) -> Self {
        self.require_renegotiation_extension = required;
        self
    }

    pub fn with_reduced_dhe_retry(mut self, allowed: bool) -> Self {
        self.allow_reduced_dhe_retry = allowed;
        self
    }

    pub fn with_ocsp_stapling(mut self, enabled: bool) -> Self {
        self.enable_ocsp_stapling = enabled;
        self
    }

    pub fn with_next_protocols(mut self, protocols: Vec<Vec<u8>>) -> Self {
        self.next_protocols = protocols;
        self
    }

    pub fn with_anonymous_dh(mut self, allowed: bool) -> Self {
        self.allow_anonymous_dh = allowed;
        self
    }

    pub fn with_min_dh_prime_bits(mut self, bits: usize) -> Self {
        self.min_dh_prime_bits = bits;
        self
    }

    pub fn with_session_lifetime(mut self, lifetime: Duration) -> Self {
        self.session_lifetime = lifetime;
        self
    }

    pub fn with_cipher_preference(mut self, ciphers: Vec<CipherSuiteID>) -> Self {
        self.cipher_preference = Some(ciphers);
        self
    }

    /// Lowest version the client accepts from a server.
    pub fn effective_min_version(&self) -> ProtocolVersion {
        if self.enable_ssl3 {
            version::SSL_3_0
        } else {
            std::cmp::max(self.min_version, version::TLS_1_0)
        }
    }

    pub fn is_version_enabled(&self, version: ProtocolVersion) -> bool {
        version >= self.effective_min_version() && version <= self.max_version
    }
}

/// Everything a connection shares with its siblings: policy, cipher catalog,
/// session cache and the crypto/certificate collaborators.
pub struct HandshakeContext {
    pub config: HandshakeConfig,
    pub ciphers: Arc<CipherRegistry>,
    pub sessions: Arc<SessionCache>,
    pub crypto: Arc<dyn CryptoProvider>,
    pub certificates: Arc<dyn CertificateHandler>,
}

impl HandshakeContext {
    pub fn new(
        config: HandshakeConfig,
        ciphers: Arc<CipherRegistry>,
        crypto: Arc<dyn CryptoProvider>,
        certificates: Arc<dyn CertificateHandler>,
    ) -> Self {
        let sessions = Arc::new(SessionCache::new(config.session_lifetime, config.max_sessions_per_server));
        Self {
            config,
            ciphers,
            sessions,
            crypto,
            certificates,
        }
    }

    pub fn with_session_cache(mut self, sessions: Arc<SessionCache>) -> Self {
        self.sessions = sessions;
        self
    }
}

#[cfg(test)]
mod tests {
    use crate::config::HandshakeConfig;
    use crate::version;

    #[test]
    fn ssl3_is_disabled_by_default() {
        let config = HandshakeConfig::default();
        assert!(!config.is_version_enabled(version::SSL_3_0));
        assert!(config.is_version_enabled(version::TLS_1_0));
        assert!(config.is_version_enabled(version::TLS_1_2));
    }

    #[test]
    fn enabling_ssl3_lowers_the_floor() {
        let config = HandshakeConfig::default().with_ssl3(true);
        assert_eq!(config.effective_min_version(), version::SSL_3_0);
        assert!(config.is_version_enabled(version::SSL_3_0));
    }

    #[test]
    fn max_version_caps_the_range() {
        let config = HandshakeConfig::default().with_max_version(version::TLS_1_0);
        assert!(!config.is_version_enabled(version::TLS_1_1));
    }
}
