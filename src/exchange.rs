use crate::alert::AlertDescription;
use crate::cipher::KeyExchangeAlgorithm;
use crate::crypto::{self, CryptoProvider, DhParams, PeerPublicKey, SignatureScheme};
use crate::errors;
use crate::extensions::SignatureAndHash;
use crate::fields;
use crate::handshake::{HandshakeType, KeaAction, MessageHandler};
use crate::pack::{self, Pack};
use crate::state::{ConnectionState, HandshakePhase};
use crate::version::{self, ProtocolVersion};

use log::{debug, warn};

pub type Opaque16 = fields::VarOpaque<2, 0xffff>;

//
// Signed parameters
//

/// A signature, preceded by its hash/signature pair from TLS 1.2 on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DigitallySigned {
    pub algorithm: Option<SignatureAndHash>,
    pub signature: Opaque16,
    explicit_algorithm: bool,
}

impl DigitallySigned {
    pub fn new(algorithm: Option<SignatureAndHash>, signature: Vec<u8>) -> Result<Self, errors::TLSError> {
        Ok(Self {
            explicit_algorithm: algorithm.is_some(),
            algorithm,
            signature: Opaque16::new(signature)?,
        })
    }

    pub fn bind(&mut self, version: ProtocolVersion) {
        self.explicit_algorithm = version.uses_signature_algorithms();
    }
}

impl Pack for DigitallySigned {
    fn empty() -> Self {
        Self::default()
    }

    fn pack(&self) -> Vec<u8> {
        let mut v = Vec::new();
        if self.explicit_algorithm {
            v.extend_from_slice(&self.algorithm.unwrap_or_else(SignatureAndHash::empty).pack());
        }
        v.extend_from_slice(&self.signature.pack());
        v
    }

    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        let mut v = if self.explicit_algorithm {
            let mut algorithm = SignatureAndHash::empty();
            let rest = algorithm.unpack(v)?;
            self.algorithm = Some(algorithm);
            rest
        } else {
            self.algorithm = None;
            std::mem::take(v)
        };
        self.signature.unpack(&mut v)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerKeyParams {
    /// Temporary RSA key of the export suites.
    Rsa { modulus: Opaque16, exponent: Opaque16 },
    Dh { p: Opaque16, g: Opaque16, ys: Opaque16 },
}

impl ServerKeyParams {
    fn pack(&self) -> Vec<u8> {
        let mut v = Vec::new();
        match self {
            ServerKeyParams::Rsa { modulus, exponent } => {
                v.extend_from_slice(&modulus.pack());
                v.extend_from_slice(&exponent.pack());
            }
            ServerKeyParams::Dh { p, g, ys } => {
                v.extend_from_slice(&p.pack());
                v.extend_from_slice(&g.pack());
                v.extend_from_slice(&ys.pack());
            }
        }
        v
    }
}

/// ServerKeyExchange. The layout depends on the negotiated key exchange, so
/// `bind` must run before `unpack`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerKeyExchange {
    algorithm: Option<KeyExchangeAlgorithm>,
    pub params: ServerKeyParams,
    pub signature: Option<DigitallySigned>,
}

impl ServerKeyExchange {
    pub fn new_dh(params: &DhParams, signature: Option<DigitallySigned>) -> Result<Self, errors::TLSError> {
        Ok(Self {
            algorithm: None,
            params: ServerKeyParams::Dh {
                p: Opaque16::new(params.p.clone())?,
                g: Opaque16::new(params.g.clone())?,
                ys: Opaque16::new(params.ys.clone())?,
            },
            signature,
        })
    }

    pub fn bind(&mut self, algorithm: Option<KeyExchangeAlgorithm>, version: ProtocolVersion) {
        self.algorithm = algorithm;
        match algorithm {
            Some(a) if a.is_anonymous() => self.signature = None,
            Some(_) => self.signature.get_or_insert_with(DigitallySigned::empty).bind(version),
            None => {}
        }
    }

    /// The signed portion, as it appears on the wire.
    pub fn params_bytes(&self) -> Vec<u8> {
        self.params.pack()
    }

    pub fn dh_params(&self) -> Option<DhParams> {
        match &self.params {
            ServerKeyParams::Dh { p, g, ys } => Some(DhParams {
                p: p.as_slice().to_vec(),
                g: g.as_slice().to_vec(),
                ys: ys.as_slice().to_vec(),
            }),
            ServerKeyParams::Rsa { .. } => None,
        }
    }

    /// Checks the signature over `client_random ‖ server_random ‖ params`.
    pub fn verify(
        &self,
        client_random: &[u8],
        server_random: &[u8],
        key: &PeerPublicKey,
        offered: &[SignatureAndHash],
        crypto_provider: &dyn CryptoProvider,
    ) -> Result<(), errors::TLSError> {
        let signed = self
            .signature
            .as_ref()
            .ok_or(errors::TLSError::DecodeError("ServerKeyExchange is not signed"))?;
        let scheme = match signed.algorithm {
            Some(pair) => {
                if !offered.contains(&pair) {
                    return Err(errors::TLSError::IllegalParameter("server used a signature algorithm that was not offered"));
                }
                SignatureScheme::Tls12(pair)
            }
            None => match key {
                PeerPublicKey::Rsa { .. } => SignatureScheme::RsaPkcs1Md5Sha1,
                PeerPublicKey::Dsa { .. } => SignatureScheme::DsaSha1,
                PeerPublicKey::Ecdsa { .. } => SignatureScheme::EcdsaSha1,
                PeerPublicKey::Dh(_) => return Err(errors::TLSError::IllegalParameter("DH certificate cannot sign")),
            },
        };
        if key.signature_algorithm() != Some(scheme.signature_algorithm()) {
            return Err(errors::TLSError::IllegalParameter("signature algorithm does not match the certificate key"));
        }

        let mut message = Vec::with_capacity(client_random.len() + server_random.len() + self.params.pack().len());
        message.extend_from_slice(client_random);
        message.extend_from_slice(server_random);
        message.extend_from_slice(&self.params_bytes());
        if !crypto_provider.verify_signature(key, scheme, &message, signed.signature.as_slice())? {
            return Err(errors::TLSError::DecryptError("ServerKeyExchange signature does not verify"));
        }
        Ok(())
    }
}

impl Pack for ServerKeyExchange {
    fn empty() -> Self {
        Self {
            algorithm: None,
            params: ServerKeyParams::Dh {
                p: Opaque16::empty(),
                g: Opaque16::empty(),
                ys: Opaque16::empty(),
            },
            signature: None,
        }
    }

    fn pack(&self) -> Vec<u8> {
        let mut v = self.params.pack();
        if let Some(signature) = &self.signature {
            v.extend_from_slice(&signature.pack());
        }
        v
    }

    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        let algorithm = self
            .algorithm
            .ok_or(errors::TLSError::InternalError("ServerKeyExchange decoded before the cipher is known"))?;
        let mut v = match algorithm {
            KeyExchangeAlgorithm::Rsa => {
                let mut modulus = Opaque16::empty();
                let mut exponent = Opaque16::empty();
                let mut v = modulus.unpack(v)?;
                let v = exponent.unpack(&mut v)?;
                self.params = ServerKeyParams::Rsa { modulus, exponent };
                v
            }
            _ => {
                let mut p = Opaque16::empty();
                let mut g = Opaque16::empty();
                let mut ys = Opaque16::empty();
                let mut v = p.unpack(v)?;
                let mut v = g.unpack(&mut v)?;
                let v = ys.unpack(&mut v)?;
                self.params = ServerKeyParams::Dh { p, g, ys };
                v
            }
        };
        match self.signature.as_mut() {
            Some(signature) => signature.unpack(&mut v),
            None => Ok(v),
        }
    }
}

impl MessageHandler for ServerKeyExchange {
    fn process_message(&mut self, state: &mut ConnectionState) -> Result<KeaAction, errors::TLSError> {
        let anonymous = state.anonymous_connection;
        let allowed: &[HandshakePhase] = if anonymous {
            &[HandshakePhase::ServerHelloReceived]
        } else {
            &[HandshakePhase::ServerCertificateReceived, HandshakePhase::CertificateStatusReceived]
        };
        state.expect_phase(HandshakeType::ServerKeyExchange, allowed)?;
        let algorithm = state.key_exchange_mut()?.algorithm();
        if !algorithm.expects_server_key_exchange() {
            // Temporary RSA keys belong to the export suites, which are never offered.
            return Err(errors::TLSError::OutOfOrderMessage {
                received: HandshakeType::ServerKeyExchange,
                phase: state.phase(),
            });
        }

        let context = state.context.clone();
        let client_random = state.client_random.pack();
        let server_random = state.server_random.pack();
        let result = state.key_exchange_mut()?.received_server_keys(
            self,
            &client_random,
            &server_random,
            &context.config,
            context.crypto.as_ref(),
        );
        if let Err(err) = result {
            let features = state.server_features();
            let retry = algorithm.is_diffie_hellman()
                && context.config.allow_reduced_dhe_retry
                && !features.reduced_dhe
                && matches!(
                    err,
                    errors::TLSError::InsufficientSecurity(_) | errors::TLSError::IllegalParameter(_) | errors::TLSError::DecryptError(_)
                );
            if !retry {
                return Err(err);
            }
            warn!("DHE key exchange with {}:{} failed ({}), retrying without DHE", state.server.host, state.server.port, err);
            context.sessions.update_server_features(&state.server, |f| f.reduced_dhe = true);
            state.raise_warning(AlertDescription::InsufficientSecurity);
            return Ok(KeaAction::FullConnectionRestart);
        }

        state.set_phase(HandshakePhase::ServerKeyExchangeReceived);
        Ok(KeaAction::NoAction)
    }
}

//
// Client key exchange
//

/// ClientKeyExchange: the RSA-encrypted premaster or the client DH public value.
/// SSL 3.0 sends the RSA ciphertext without a length prefix.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientKeyExchange {
    pub exchange_keys: Vec<u8>,
    raw: bool,
}

impl ClientKeyExchange {
    pub fn new(exchange_keys: Vec<u8>) -> Self {
        Self { exchange_keys, raw: false }
    }

    pub fn bind(&mut self, algorithm: Option<KeyExchangeAlgorithm>, version: ProtocolVersion) {
        self.raw = version == version::SSL_3_0 && algorithm == Some(KeyExchangeAlgorithm::Rsa);
    }
}

impl Pack for ClientKeyExchange {
    fn empty() -> Self {
        Self::default()
    }

    fn pack(&self) -> Vec<u8> {
        if self.raw {
            return self.exchange_keys.clone();
        }
        let mut v = Vec::with_capacity(2 + self.exchange_keys.len());
        pack::write_length(&mut v, 2, self.exchange_keys.len());
        v.extend_from_slice(&self.exchange_keys);
        v
    }

    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        if self.raw {
            self.exchange_keys = std::mem::take(v);
            return Ok(Vec::new());
        }
        let (keys, rest) = pack::read_prefixed(v, 2, 0xffff)?;
        self.exchange_keys = keys;
        Ok(rest)
    }
}

impl MessageHandler for ClientKeyExchange {
    fn set_up_message(&mut self, state: &mut ConnectionState) -> Result<(), errors::TLSError> {
        state.expect_phase(HandshakeType::ClientKeyExchange, &[HandshakePhase::ServerHelloDoneReceived])?;
        if state.pending_certificate_choice().is_some() {
            return Err(errors::TLSError::InternalError("client certificate choice is still pending"));
        }
        let version = state.version;
        let key_exchange = state.key_exchange_mut()?;
        self.exchange_keys = key_exchange.encrypted_pre_master_secret()?.to_vec();
        let algorithm = key_exchange.algorithm();
        self.bind(Some(algorithm), version);
        state.set_phase(HandshakePhase::ClientKeyExchangeSent);
        Ok(())
    }
}

//
// Flight delimiters and Finished
//

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerHelloDone;

impl Pack for ServerHelloDone {
    fn empty() -> Self {
        ServerHelloDone {}
    }

    fn pack(&self) -> Vec<u8> {
        Vec::new()
    }

    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        if !v.is_empty() {
            return Err(errors::TLSError::DecodeError("ServerHelloDone has a body"));
        }
        Ok(Vec::new())
    }
}

impl MessageHandler for ServerHelloDone {
    fn process_message(&mut self, state: &mut ConnectionState) -> Result<KeaAction, errors::TLSError> {
        state.expect_phase(
            HandshakeType::ServerHelloDone,
            &[
                HandshakePhase::ServerCertificateReceived,
                HandshakePhase::CertificateStatusReceived,
                HandshakePhase::ServerKeyExchangeReceived,
                HandshakePhase::CertificateRequestReceived,
            ],
        )?;
        if !state.key_exchange_mut()?.has_server_keys() {
            return Err(errors::TLSError::OutOfOrderMessage {
                received: HandshakeType::ServerHelloDone,
                phase: state.phase(),
            });
        }
        state.set_phase(HandshakePhase::ServerHelloDoneReceived);
        Ok(KeaAction::PreparePremaster)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HelloRequest;

impl Pack for HelloRequest {
    fn empty() -> Self {
        HelloRequest {}
    }

    fn pack(&self) -> Vec<u8> {
        Vec::new()
    }

    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        if !v.is_empty() {
            return Err(errors::TLSError::DecodeError("HelloRequest has a body"));
        }
        Ok(Vec::new())
    }
}

impl MessageHandler for HelloRequest {
    fn process_message(&mut self, state: &mut ConnectionState) -> Result<KeaAction, errors::TLSError> {
        // Ignored while a handshake is already running.
        if state.is_complete() {
            debug!("{}:{} requested renegotiation", state.server.host, state.server.port);
            state.renegotiation_requested = true;
        }
        Ok(KeaAction::NoAction)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Finished {
    pub verify_data: Vec<u8>,
}

impl Finished {
    pub fn new(verify_data: Vec<u8>) -> Self {
        Self { verify_data }
    }
}

impl Pack for Finished {
    fn empty() -> Self {
        Self::default()
    }

    fn pack(&self) -> Vec<u8> {
        self.verify_data.clone()
    }

    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        self.verify_data = std::mem::take(v);
        Ok(Vec::new())
    }
}

impl MessageHandler for Finished {
    fn set_up_message(&mut self, state: &mut ConnectionState) -> Result<(), errors::TLSError> {
        let resumed = state.session.resumed;
        let allowed = if resumed {
            HandshakePhase::ServerFinishedReceived
        } else {
            HandshakePhase::ClientKeyExchangeSent
        };
        state.expect_phase(HandshakeType::Finished, &[allowed])?;
        self.verify_data = state.finished_verify_data(true)?;
        state.last_client_finished = self.verify_data.clone();
        if resumed {
            state.complete_handshake();
        } else {
            state.set_phase(HandshakePhase::ClientFinishedSent);
        }
        Ok(())
    }

    fn process_message(&mut self, state: &mut ConnectionState) -> Result<KeaAction, errors::TLSError> {
        let resumed = state.session.resumed;
        let allowed = if resumed {
            HandshakePhase::ServerHelloReceived
        } else {
            HandshakePhase::ClientFinishedSent
        };
        state.expect_phase(HandshakeType::Finished, &[allowed])?;
        let expected = state.finished_verify_data(false)?;
        if !crypto::constant_time_eq(&expected, &self.verify_data) {
            return Err(errors::TLSError::DecryptError("server Finished does not verify"));
        }
        state.last_server_finished = expected;
        if resumed {
            state.set_phase(HandshakePhase::ServerFinishedReceived);
        } else {
            state.complete_handshake();
        }
        Ok(KeaAction::NoAction)
    }
}

//
// Next protocol negotiation
//

pub type SelectedProtocol = fields::VarOpaque<1, 255>;

/// NextProtocol. Padding brings `2 + protocol + padding` to a multiple of 32.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NextProtocol {
    pub selected_protocol: SelectedProtocol,
    padding: fields::VarOpaque<1, 255>,
}

impl NextProtocol {
    pub fn new(protocol: Vec<u8>) -> Result<Self, errors::TLSError> {
        let selected_protocol = SelectedProtocol::new(protocol)?;
        let padding = Self::padding_for(selected_protocol.payload_len());
        Ok(Self {
            selected_protocol,
            padding,
        })
    }

    fn padding_for(protocol_len: usize) -> fields::VarOpaque<1, 255> {
        let padding_len = 32 - ((protocol_len + 2) % 32);
        let mut padding = fields::VarOpaque::empty();
        padding.set_unchecked(vec![0; padding_len]);
        padding
    }

    pub fn padding_len(&self) -> usize {
        self.padding.payload_len()
    }
}

impl Pack for NextProtocol {
    fn empty() -> Self {
        Self::default()
    }

    fn pack(&self) -> Vec<u8> {
        let mut v = self.selected_protocol.pack();
        v.extend_from_slice(&self.padding.pack());
        v
    }

    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        let mut v = self.selected_protocol.unpack(v)?;
        self.padding.unpack(&mut v)
    }
}

impl MessageHandler for NextProtocol {
    fn set_up_message(&mut self, state: &mut ConnectionState) -> Result<(), errors::TLSError> {
        state.expect_phase(
            HandshakeType::NextProtocol,
            &[HandshakePhase::ClientKeyExchangeSent, HandshakePhase::ServerFinishedReceived],
        )?;
        let server_protocols = state
            .next_protocol
            .server_protocols
            .clone()
            .ok_or(errors::TLSError::InternalError("server did not offer next protocol negotiation"))?;
        let configured = &state.context.config.next_protocols;
        let chosen = configured
            .iter()
            .find(|p| server_protocols.contains(p))
            .or_else(|| configured.first())
            .cloned()
            .ok_or(errors::TLSError::InternalError("no next protocol configured"))?;
        *self = NextProtocol::new(chosen.clone())?;
        state.next_protocol.selected = Some(chosen);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::cipher::KeyExchangeAlgorithm;
    use crate::crypto::DhParams;
    use crate::errors::TLSError;
    use crate::exchange::{ClientKeyExchange, DigitallySigned, NextProtocol, ServerHelloDone, ServerKeyExchange};
    use crate::extensions::{self, SignatureAndHash};
    use crate::pack::Pack;
    use crate::pack_unpack_inverse_test;
    use crate::version;

    pack_unpack_inverse_test!(
        next_protocol_pack_unpack_inverse_test,
        NextProtocol::new(b"http/1.1".to_vec()).expect("building NextProtocol failed")
    );

    fn group() -> DhParams {
        DhParams {
            p: vec![0xe3],
            g: vec![0x02],
            ys: vec![0x2b],
        }
    }

    #[test]
    fn next_protocol_is_padded_to_32_bytes() {
        for protocol in &[b"h2".to_vec(), b"spdy/3.1".to_vec(), vec![b'x'; 30], vec![b'x'; 31]] {
            let message = NextProtocol::new(protocol.clone()).expect("building NextProtocol failed");
            assert_eq!((2 + protocol.len() + message.padding_len()) % 32, 0);
            assert_eq!(message.pack().len() % 32, 0);
        }
    }

    #[test]
    fn tls12_server_key_exchange_carries_algorithm() {
        let pair = SignatureAndHash::new(extensions::HASH_SHA256, extensions::SIGNATURE_RSA);
        let signed = DigitallySigned::new(Some(pair), vec![9; 4]).expect("building signature failed");
        let mut message = ServerKeyExchange::new_dh(&group(), Some(signed)).expect("building message failed");
        message.bind(Some(KeyExchangeAlgorithm::DheRsa), version::TLS_1_2);
        let packed = message.pack();
        assert_eq!(
            packed,
            vec![0x00, 0x01, 0xe3, 0x00, 0x01, 0x02, 0x00, 0x01, 0x2b, 0x04, 0x01, 0x00, 0x04, 9, 9, 9, 9]
        );

        let mut decoded = ServerKeyExchange::empty();
        decoded.bind(Some(KeyExchangeAlgorithm::DheRsa), version::TLS_1_2);
        let rest = decoded.unpack(&mut packed.clone()).expect("unpack failed");
        assert!(rest.is_empty());
        assert_eq!(decoded.dh_params(), Some(group()));
        assert_eq!(decoded.signature.and_then(|s| s.algorithm), Some(pair));
    }

    #[test]
    fn tls10_signature_has_no_algorithm() {
        let mut decoded = ServerKeyExchange::empty();
        decoded.bind(Some(KeyExchangeAlgorithm::DheRsa), version::TLS_1_0);
        let mut bytes = vec![0x00, 0x01, 0xe3, 0x00, 0x01, 0x02, 0x00, 0x01, 0x2b, 0x00, 0x02, 7, 7];
        let rest = decoded.unpack(&mut bytes).expect("unpack failed");
        assert!(rest.is_empty());
        let signature = decoded.signature.expect("signature missing");
        assert_eq!(signature.algorithm, None);
        assert_eq!(signature.signature.as_slice(), &[7, 7]);
    }

    #[test]
    fn anonymous_params_are_unsigned() {
        let mut decoded = ServerKeyExchange::empty();
        decoded.bind(Some(KeyExchangeAlgorithm::DhAnon), version::TLS_1_2);
        let mut bytes = vec![0x00, 0x01, 0xe3, 0x00, 0x01, 0x02, 0x00, 0x01, 0x2b];
        decoded.unpack(&mut bytes).expect("unpack failed");
        assert!(decoded.signature.is_none());
    }

    #[test]
    fn unbound_server_key_exchange_cannot_decode() {
        let mut bytes = vec![0x00, 0x01, 0xe3];
        assert!(matches!(
            ServerKeyExchange::empty().unpack(&mut bytes),
            Err(TLSError::InternalError(_))
        ));
    }

    #[test]
    fn ssl3_rsa_key_exchange_is_unprefixed() {
        let mut message = ClientKeyExchange::new(vec![1, 2, 3]);
        message.bind(Some(KeyExchangeAlgorithm::Rsa), version::SSL_3_0);
        assert_eq!(message.pack(), vec![1, 2, 3]);
        message.bind(Some(KeyExchangeAlgorithm::Rsa), version::TLS_1_0);
        assert_eq!(message.pack(), vec![0, 3, 1, 2, 3]);
        message.bind(Some(KeyExchangeAlgorithm::DheRsa), version::SSL_3_0);
        assert_eq!(message.pack(), vec![0, 3, 1, 2, 3]);
    }

    #[test]
    fn server_hello_done_must_be_empty() {
        assert!(ServerHelloDone::empty().unpack(&mut Vec::new()).is_ok());
        assert!(matches!(
            ServerHelloDone::empty().unpack(&mut vec![0]),
            Err(TLSError::DecodeError(_))
        ));
    }
}
