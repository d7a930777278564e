use crate::cipher::KeyExchangeAlgorithm;
use crate::config::HandshakeConfig;
use crate::crypto::{self, ClientCertificate, CryptoProvider, DhParams, PeerPublicKey};
use crate::errors;
use crate::exchange::ServerKeyExchange;
use crate::extensions::{self, SignatureAndHash};
use crate::version::ProtocolVersion;

use log::debug;
use zeroize::Zeroizing;

/// Key material the server supplied, per key exchange family.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerKeys {
    None,
    Rsa(PeerPublicKey),
    Dh(DhParams),
}

/// Negotiation state of one handshake's key exchange.
///
/// Created when ServerHello fixes the cipher, fed by Certificate, ServerKeyExchange and
/// CertificateRequest, and drained by ClientKeyExchange and CertificateVerify.
pub struct KeyExchange {
    algorithm: KeyExchangeAlgorithm,
    peer_key: Option<PeerPublicKey>,
    server_keys: ServerKeys,
    pre_master_secret: Option<Zeroizing<Vec<u8>>>,
    encrypted_pre_master_secret: Option<Vec<u8>>,
    client_certificates: Vec<ClientCertificate>,
    selected_certificate: Option<usize>,
    offered_signatures: Vec<SignatureAndHash>,
    certificate_signature: Option<SignatureAndHash>,
}

impl KeyExchange {
    pub fn new(algorithm: KeyExchangeAlgorithm) -> Self {
        Self {
            algorithm,
            peer_key: None,
            server_keys: ServerKeys::None,
            pre_master_secret: None,
            encrypted_pre_master_secret: None,
            client_certificates: Vec::new(),
            selected_certificate: None,
            offered_signatures: Vec::new(),
            certificate_signature: None,
        }
    }

    pub fn algorithm(&self) -> KeyExchangeAlgorithm {
        self.algorithm
    }

    pub fn server_keys(&self) -> &ServerKeys {
        &self.server_keys
    }

    pub fn peer_key(&self) -> Option<&PeerPublicKey> {
        self.peer_key.as_ref()
    }

    /// Takes the public key from the validated server certificate.
    pub fn received_certificate(&mut self, key: PeerPublicKey) -> Result<(), errors::TLSError> {
        match (self.algorithm, &key) {
            (KeyExchangeAlgorithm::Rsa, PeerPublicKey::Rsa { .. }) => {
                self.server_keys = ServerKeys::Rsa(key.clone());
            }
            (KeyExchangeAlgorithm::DhRsa, PeerPublicKey::Dh(params))
            | (KeyExchangeAlgorithm::DhDss, PeerPublicKey::Dh(params)) => {
                self.server_keys = ServerKeys::Dh(params.clone());
            }
            (KeyExchangeAlgorithm::DheRsa, PeerPublicKey::Rsa { .. })
            | (KeyExchangeAlgorithm::DheDss, PeerPublicKey::Dsa { .. }) => {}
            (KeyExchangeAlgorithm::DhAnon, _) => {
                return Err(errors::TLSError::IllegalParameter("certificate sent for an anonymous suite"));
            }
            _ => {
                return Err(errors::TLSError::BadCertificate(format!(
                    "certificate key does not fit {:?} key exchange",
                    self.algorithm
                )))
            }
        }
        self.peer_key = Some(key);
        Ok(())
    }

    /// Checks the ServerKeyExchange signature and parameters and keeps the DH values.
    pub fn received_server_keys(
        &mut self,
        message: &ServerKeyExchange,
        client_random: &[u8],
        server_random: &[u8],
        config: &HandshakeConfig,
        crypto_provider: &dyn CryptoProvider,
    ) -> Result<(), errors::TLSError> {
        if !self.algorithm.expects_server_key_exchange() {
            return Err(errors::TLSError::HandshakeFailure("ServerKeyExchange not used by this key exchange"));
        }
        if !self.algorithm.is_anonymous() {
            let key = self
                .peer_key
                .as_ref()
                .ok_or(errors::TLSError::HandshakeFailure("ServerKeyExchange before server certificate"))?;
            message.verify(client_random, server_random, key, &config.signature_algorithms, crypto_provider)?;
        }
        let params = message
            .dh_params()
            .ok_or(errors::TLSError::IllegalParameter("expected Diffie-Hellman parameters"))?;
        params.check(config.min_dh_prime_bits)?;
        debug!("server DH group has a {} bit prime", params.prime_bits());
        self.server_keys = ServerKeys::Dh(params);
        Ok(())
    }

    /// Whether the server has sent everything needed to build the premaster secret.
    pub fn has_server_keys(&self) -> bool {
        match (&self.server_keys, self.algorithm) {
            (ServerKeys::Rsa(_), KeyExchangeAlgorithm::Rsa) => true,
            (ServerKeys::Dh(_), a) => a.is_diffie_hellman(),
            _ => false,
        }
    }

    pub fn received_certificate_request(&mut self, candidates: Vec<ClientCertificate>, offered: &[SignatureAndHash]) {
        self.selected_certificate = None;
        self.client_certificates = candidates;
        self.certificate_signature = None;
        self.offered_signatures = offered.to_vec();
    }

    pub fn client_certificates(&self) -> &[ClientCertificate] {
        &self.client_certificates
    }

    pub fn select_client_certificate(&mut self, index: Option<usize>) -> Result<Option<&ClientCertificate>, errors::TLSError> {
        match index {
            None => {
                self.selected_certificate = None;
                Ok(None)
            }
            Some(i) if i < self.client_certificates.len() => {
                self.selected_certificate = Some(i);
                let certificate = &self.client_certificates[i];
                self.certificate_signature = self
                    .offered_signatures
                    .iter()
                    .find(|s| s.signature == certificate.signature_algorithm && s.hash == extensions::HASH_SHA256)
                    .or_else(|| self.offered_signatures.iter().find(|s| s.signature == certificate.signature_algorithm))
                    .copied();
                Ok(Some(certificate))
            }
            Some(_) => Err(errors::TLSError::InternalError("client certificate index out of range")),
        }
    }

    pub fn selected_certificate(&self) -> Option<&ClientCertificate> {
        self.selected_certificate.and_then(|i| self.client_certificates.get(i))
    }

    /// TLS 1.2 algorithm for CertificateVerify, picked from the server's list.
    pub fn certificate_signature(&self) -> Option<SignatureAndHash> {
        self.certificate_signature
    }

    /// Builds the premaster secret and what ClientKeyExchange carries.
    pub fn prepare_premaster(&mut self, client_version: ProtocolVersion, crypto_provider: &dyn CryptoProvider) -> Result<(), errors::TLSError> {
        match &self.server_keys {
            ServerKeys::Rsa(key) => {
                let mut secret = Zeroizing::new(vec![0; crypto::PRE_MASTER_SECRET_LEN]);
                crypto_provider.fill_random(&mut secret[2..])?;
                secret[0] = client_version.major();
                secret[1] = client_version.minor();
                let encrypted = crypto_provider.rsa_encrypt(key, &secret)?;
                self.pre_master_secret = Some(secret);
                self.encrypted_pre_master_secret = Some(encrypted);
            }
            ServerKeys::Dh(params) => {
                let (private, public) = crypto::dh_key_pair(params, crypto_provider)?;
                let shared = crypto::dh_shared_secret(params, &private)?;
                self.pre_master_secret = Some(shared);
                self.encrypted_pre_master_secret = Some(public);
            }
            ServerKeys::None => return Err(errors::TLSError::HandshakeFailure("no server key to exchange with")),
        }
        Ok(())
    }

    pub fn pre_master_secret(&self) -> Result<&[u8], errors::TLSError> {
        self.pre_master_secret
            .as_ref()
            .map(|s| &s[..])
            .ok_or(errors::TLSError::InternalError("premaster secret not prepared"))
    }

    /// RSA-encrypted premaster, or the client's DH public value.
    pub fn encrypted_pre_master_secret(&self) -> Result<&[u8], errors::TLSError> {
        self.encrypted_pre_master_secret
            .as_deref()
            .ok_or(errors::TLSError::InternalError("premaster secret not prepared"))
    }
}

#[cfg(test)]
mod tests {
    use crate::cipher::KeyExchangeAlgorithm;
    use crate::crypto::{self, DhParams, PeerPublicKey};
    use crate::errors::TLSError;
    use crate::key_exchange::{KeyExchange, ServerKeys};
    use crate::test::{test_certificate, TestProvider};
    use crate::version;

    fn small_group() -> DhParams {
        DhParams {
            p: vec![227],
            g: vec![2],
            ys: vec![0x2b],
        }
    }

    #[test]
    fn rsa_premaster_starts_with_client_version() {
        let provider = TestProvider::new();
        let mut exchange = KeyExchange::new(KeyExchangeAlgorithm::Rsa);
        let key = PeerPublicKey::Rsa {
            modulus: vec![0xff; 64],
            exponent: vec![1],
        };
        exchange.received_certificate(key).expect("RSA key rejected");
        assert!(exchange.has_server_keys());

        exchange.prepare_premaster(version::TLS_1_2, &provider).expect("premaster failed");
        let secret = exchange.pre_master_secret().expect("no premaster");
        assert_eq!(secret.len(), crypto::PRE_MASTER_SECRET_LEN);
        assert_eq!(&secret[..2], &[3, 3]);
        assert_eq!(exchange.encrypted_pre_master_secret().expect("no ciphertext").len(), 64);
    }

    #[test]
    fn static_dh_takes_params_from_certificate() {
        let provider = TestProvider::new();
        let mut exchange = KeyExchange::new(KeyExchangeAlgorithm::DhRsa);
        exchange.received_certificate(PeerPublicKey::Dh(small_group())).expect("DH key rejected");
        assert_eq!(exchange.server_keys(), &ServerKeys::Dh(small_group()));
        exchange.prepare_premaster(version::TLS_1_2, &provider).expect("premaster failed");
        assert!(!exchange.encrypted_pre_master_secret().expect("no public value").is_empty());
    }

    #[test]
    fn premaster_needs_server_keys() {
        let provider = TestProvider::new();
        let mut exchange = KeyExchange::new(KeyExchangeAlgorithm::DheRsa);
        assert!(!exchange.has_server_keys());
        assert!(matches!(
            exchange.prepare_premaster(version::TLS_1_2, &provider),
            Err(TLSError::HandshakeFailure(_))
        ));
        assert!(exchange.pre_master_secret().is_err());
    }

    #[test]
    fn mismatched_certificate_key_is_rejected() {
        let mut exchange = KeyExchange::new(KeyExchangeAlgorithm::Rsa);
        let err = exchange
            .received_certificate(PeerPublicKey::Ecdsa { point: vec![4; 65] })
            .expect_err("ECDSA key accepted for RSA key exchange");
        assert!(matches!(err, TLSError::BadCertificate(_)));

        let mut exchange = KeyExchange::new(KeyExchangeAlgorithm::DheRsa);
        let err = exchange
            .received_certificate(PeerPublicKey::Ecdsa { point: vec![4; 65] })
            .expect_err("ECDSA key accepted for DHE_RSA key exchange");
        assert!(matches!(err, TLSError::BadCertificate(_)));
        assert!(exchange.peer_key().is_none());

        let mut exchange = KeyExchange::new(KeyExchangeAlgorithm::DheRsa);
        exchange
            .received_certificate(PeerPublicKey::Rsa {
                modulus: vec![0xff; 64],
                exponent: vec![1],
            })
            .expect("RSA key refused for DHE_RSA key exchange");
        assert!(exchange.peer_key().is_some());
    }

    #[test]
    fn certificate_selection_picks_matching_signature() {
        use crate::extensions::{self, SignatureAndHash};

        let mut exchange = KeyExchange::new(KeyExchangeAlgorithm::Rsa);
        let offered = vec![
            SignatureAndHash::new(extensions::HASH_SHA1, extensions::SIGNATURE_RSA),
            SignatureAndHash::new(extensions::HASH_SHA256, extensions::SIGNATURE_RSA),
        ];
        exchange.received_certificate_request(vec![test_certificate("first")], &offered);
        assert!(exchange.select_client_certificate(Some(3)).is_err());
        let chosen = exchange.select_client_certificate(Some(0)).expect("selection failed");
        assert_eq!(chosen.map(|c| c.label.as_str()), Some("first"));
        assert_eq!(
            exchange.certificate_signature(),
            Some(SignatureAndHash::new(extensions::HASH_SHA256, extensions::SIGNATURE_RSA))
        );
    }
}
