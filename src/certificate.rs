use crate::cipher::SecurityRating;
use crate::crypto::{CertificateRequestInfo, SignatureScheme};
use crate::errors;
use crate::exchange::DigitallySigned;
use crate::extensions::{self, SignatureAlgorithmList, SignatureAndHash};
use crate::fields;
use crate::handshake::{HandshakeType, KeaAction, MessageHandler};
use crate::pack::Pack;
use crate::session::LowSecurityReason;
use crate::state::{ConnectionState, HandshakePhase, PendingCertificateChoice};
use crate::version::ProtocolVersion;

use log::debug;

pub type ASN1Cert = fields::VarOpaque<3, 0xff_ffff>;
pub type CertificateList = fields::VarList<ASN1Cert, 3, 0xff_ffff>;
pub type DistinguishedName = fields::VarOpaque<2, 0xffff>;

pub const RSA_SIGN: u8 = 1;
pub const DSS_SIGN: u8 = 2;
pub const RSA_FIXED_DH: u8 = 3;
pub const DSS_FIXED_DH: u8 = 4;
pub const ECDSA_SIGN: u8 = 64;

/// Certificate: a chain of DER certificates, sender's own first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Certificate {
    pub certificate_list: CertificateList,
}

impl Certificate {
    pub fn new(chain: Vec<Vec<u8>>) -> Result<Self, errors::TLSError> {
        let certificates = chain.into_iter().map(ASN1Cert::new).collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            certificate_list: CertificateList::new(certificates)?,
        })
    }

    pub fn chain(&self) -> Vec<Vec<u8>> {
        self.certificate_list.items().iter().map(|c| c.as_slice().to_vec()).collect()
    }
}

impl Pack for Certificate {
    fn empty() -> Self {
        Self::default()
    }

    fn pack(&self) -> Vec<u8> {
        self.certificate_list.pack()
    }

    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        self.certificate_list.unpack(v)
    }
}

impl MessageHandler for Certificate {
    fn set_up_message(&mut self, state: &mut ConnectionState) -> Result<(), errors::TLSError> {
        state.expect_phase(HandshakeType::Certificate, &[HandshakePhase::ServerHelloDoneReceived])?;
        if !state.certificate_requested {
            return Err(errors::TLSError::InternalError("server did not request a client certificate"));
        }
        if state.pending_certificate_choice().is_some() {
            return Err(errors::TLSError::InternalError("client certificate choice is still pending"));
        }
        let chain = state
            .key_exchange_mut()?
            .selected_certificate()
            .map(|c| c.chain.clone())
            .unwrap_or_default();
        *self = Certificate::new(chain)?;
        Ok(())
    }

    fn process_message(&mut self, state: &mut ConnectionState) -> Result<KeaAction, errors::TLSError> {
        state.expect_phase(HandshakeType::Certificate, &[HandshakePhase::ServerHelloReceived])?;
        if state.anonymous_connection || state.session.resumed {
            return Err(errors::TLSError::OutOfOrderMessage {
                received: HandshakeType::Certificate,
                phase: state.phase(),
            });
        }
        let chain = self.chain();
        if chain.is_empty() {
            return Err(errors::TLSError::BadCertificate("server sent an empty certificate chain".to_string()));
        }

        let context = state.context.clone();
        let verdict = context.certificates.validate_chain(&state.server.host, &chain)?;
        debug!(
            "server chain of {} certificates validated, rating {:?}",
            chain.len(),
            verdict.security_rating
        );
        state.session.site_certificate_chain = chain;
        state.session.validated_certificate_chain = verdict.validated_chain;
        state.lower_security(verdict.security_rating, verdict.low_security_reason);
        state.key_exchange_mut()?.received_certificate(verdict.peer_key)?;
        state.set_phase(HandshakePhase::ServerCertificateReceived);
        Ok(KeaAction::NoAction)
    }
}

/// CertificateRequest. The signature algorithm list is present from TLS 1.2 on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CertificateRequest {
    pub certificate_types: fields::VarOpaque<1, 255>,
    pub supported_signature_algorithms: Option<SignatureAlgorithmList>,
    pub certificate_authorities: fields::VarList<DistinguishedName, 2, 0xffff>,
}

impl CertificateRequest {
    pub fn bind(&mut self, version: ProtocolVersion) {
        if version.uses_signature_algorithms() {
            self.supported_signature_algorithms.get_or_insert_with(SignatureAlgorithmList::empty);
        } else {
            self.supported_signature_algorithms = None;
        }
    }

    pub fn info(&self) -> CertificateRequestInfo {
        CertificateRequestInfo {
            certificate_types: self.certificate_types.as_slice().to_vec(),
            signature_algorithms: self
                .supported_signature_algorithms
                .as_ref()
                .map(|l| l.items().to_vec())
                .unwrap_or_default(),
            authorities: self
                .certificate_authorities
                .items()
                .iter()
                .map(|dn| dn.as_slice().to_vec())
                .collect(),
        }
    }
}

impl Pack for CertificateRequest {
    fn empty() -> Self {
        Self::default()
    }

    fn pack(&self) -> Vec<u8> {
        let mut v = self.certificate_types.pack();
        if let Some(algorithms) = &self.supported_signature_algorithms {
            v.extend_from_slice(&algorithms.pack());
        }
        v.extend_from_slice(&self.certificate_authorities.pack());
        v
    }

    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        let mut v = self.certificate_types.unpack(v)?;
        if let Some(algorithms) = self.supported_signature_algorithms.as_mut() {
            v = algorithms.unpack(&mut v)?;
        }
        self.certificate_authorities.unpack(&mut v)
    }
}

fn signature_for_certificate_type(certificate_type: u8) -> Option<u8> {
    match certificate_type {
        RSA_SIGN => Some(extensions::SIGNATURE_RSA),
        DSS_SIGN => Some(extensions::SIGNATURE_DSA),
        ECDSA_SIGN => Some(extensions::SIGNATURE_ECDSA),
        _ => None,
    }
}

impl MessageHandler for CertificateRequest {
    fn process_message(&mut self, state: &mut ConnectionState) -> Result<KeaAction, errors::TLSError> {
        state.expect_phase(
            HandshakeType::CertificateRequest,
            &[
                HandshakePhase::ServerCertificateReceived,
                HandshakePhase::CertificateStatusReceived,
                HandshakePhase::ServerKeyExchangeReceived,
            ],
        )?;
        if state.anonymous_connection {
            return Err(errors::TLSError::HandshakeFailure("anonymous server requested a client certificate"));
        }

        let info = self.info();
        let usable: Vec<u8> = info
            .certificate_types
            .iter()
            .filter_map(|t| signature_for_certificate_type(*t))
            .collect();
        let candidates: Vec<_> = state
            .context
            .certificates
            .client_certificate_candidates(&info)
            .into_iter()
            .filter(|c| usable.contains(&c.signature_algorithm))
            .collect();
        debug!("{} client certificates match the request", candidates.len());

        let choice = PendingCertificateChoice {
            request: info.clone(),
            candidate_labels: candidates.iter().map(|c| c.label.clone()).collect(),
        };
        state
            .key_exchange_mut()?
            .received_certificate_request(candidates, &info.signature_algorithms);
        state.certificate_requested = true;
        state.park_certificate_choice(choice);
        state.set_phase(HandshakePhase::CertificateRequestReceived);
        Ok(KeaAction::NoAction)
    }
}

/// CertificateVerify: the client's signature over the handshake messages so far.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CertificateVerify {
    pub signed: DigitallySigned,
}

impl Pack for CertificateVerify {
    fn empty() -> Self {
        Self::default()
    }

    fn pack(&self) -> Vec<u8> {
        self.signed.pack()
    }

    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        self.signed.unpack(v)
    }
}

impl MessageHandler for CertificateVerify {
    fn set_up_message(&mut self, state: &mut ConnectionState) -> Result<(), errors::TLSError> {
        state.expect_phase(HandshakeType::CertificateVerify, &[HandshakePhase::ClientKeyExchangeSent])?;
        let version = state.version;
        let transcript = state.transcript().to_vec();
        let crypto_provider = state.context.crypto.clone();
        let key_exchange = state.key_exchange_mut()?;
        let certificate = key_exchange
            .selected_certificate()
            .ok_or(errors::TLSError::InternalError("no client certificate to sign with"))?;

        let (scheme, algorithm) = if version.uses_signature_algorithms() {
            let pair = key_exchange
                .certificate_signature()
                .unwrap_or_else(|| SignatureAndHash::new(extensions::HASH_SHA256, certificate.signature_algorithm));
            (SignatureScheme::Tls12(pair), Some(pair))
        } else {
            let scheme = match certificate.signature_algorithm {
                extensions::SIGNATURE_RSA => SignatureScheme::RsaPkcs1Md5Sha1,
                extensions::SIGNATURE_DSA => SignatureScheme::DsaSha1,
                extensions::SIGNATURE_ECDSA => SignatureScheme::EcdsaSha1,
                _ => return Err(errors::TLSError::UnsupportedAlgorithm("client certificate key type")),
            };
            (scheme, None)
        };
        let signature = crypto_provider.sign(certificate, scheme, &transcript)?;
        self.signed = DigitallySigned::new(algorithm, signature)?;
        Ok(())
    }
}

/// CertificateStatus: a stapled OCSP response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateStatus {
    pub status_type: fields::Uint8,
    pub response: fields::VarOpaque<3, 0xff_ffff>,
}

impl Pack for CertificateStatus {
    fn empty() -> Self {
        Self {
            status_type: fields::Uint8(extensions::STATUS_TYPE_OCSP),
            response: fields::VarOpaque::empty(),
        }
    }

    fn pack(&self) -> Vec<u8> {
        let mut v = self.status_type.pack();
        v.extend_from_slice(&self.response.pack());
        v
    }

    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        let mut v = self.status_type.unpack(v)?;
        self.response.unpack(&mut v)
    }
}

impl MessageHandler for CertificateStatus {
    fn process_message(&mut self, state: &mut ConnectionState) -> Result<KeaAction, errors::TLSError> {
        state.expect_phase(HandshakeType::CertificateStatus, &[HandshakePhase::ServerCertificateReceived])?;
        if !state.ocsp_expected {
            return Err(errors::TLSError::OutOfOrderMessage {
                received: HandshakeType::CertificateStatus,
                phase: state.phase(),
            });
        }
        if self.status_type.0 != extensions::STATUS_TYPE_OCSP {
            return Err(errors::TLSError::IllegalParameter("unknown certificate status type"));
        }
        if self.response.is_empty() {
            state.lower_security(SecurityRating::Medium, LowSecurityReason::OCSP_FAILED);
        }
        state.session.ocsp_response = self.response.as_slice().to_vec();
        state.set_phase(HandshakePhase::CertificateStatusReceived);
        Ok(KeaAction::NoAction)
    }
}

#[cfg(test)]
mod tests {
    use crate::certificate::{self, Certificate, CertificateRequest, CertificateStatus};
    use crate::extensions::{self, SignatureAndHash};
    use crate::fields;
    use crate::pack::Pack;
    use crate::pack_unpack_inverse_test;
    use crate::version;

    pack_unpack_inverse_test!(
        certificate_pack_unpack_inverse_test,
        Certificate::new(vec![vec![0x30, 0x82, 0x01], vec![0x30, 0x03]]).expect("building Certificate failed")
    );

    #[test]
    fn certificate_list_uses_three_byte_lengths() {
        let message = Certificate::new(vec![vec![0xaa, 0xbb]]).expect("building Certificate failed");
        assert_eq!(message.pack(), vec![0, 0, 5, 0, 0, 2, 0xaa, 0xbb]);
        assert_eq!(message.chain(), vec![vec![0xaa, 0xbb]]);
    }

    #[test]
    fn tls12_request_has_signature_algorithms() {
        let mut bytes = vec![
            0x02, certificate::RSA_SIGN, certificate::ECDSA_SIGN, // types
            0x00, 0x02, 0x04, 0x01, // sha256/rsa
            0x00, 0x05, 0x00, 0x03, 0x31, 0x32, 0x33, // one DN
        ];
        let mut request = CertificateRequest::empty();
        request.bind(version::TLS_1_2);
        let rest = request.unpack(&mut bytes).expect("unpack failed");
        assert!(rest.is_empty());

        let info = request.info();
        assert_eq!(info.certificate_types, vec![certificate::RSA_SIGN, certificate::ECDSA_SIGN]);
        assert_eq!(
            info.signature_algorithms,
            vec![SignatureAndHash::new(extensions::HASH_SHA256, extensions::SIGNATURE_RSA)]
        );
        assert_eq!(info.authorities, vec![b"123".to_vec()]);
    }

    #[test]
    fn tls10_request_has_no_signature_algorithms() {
        let mut bytes = vec![0x01, certificate::RSA_SIGN, 0x00, 0x00];
        let mut request = CertificateRequest::empty();
        request.bind(version::TLS_1_0);
        request.unpack(&mut bytes).expect("unpack failed");
        assert!(request.supported_signature_algorithms.is_none());
        assert!(request.info().authorities.is_empty());
    }

    #[test]
    fn certificate_status_layout() {
        let status = CertificateStatus {
            status_type: fields::Uint8(extensions::STATUS_TYPE_OCSP),
            response: fields::VarOpaque::new(vec![1, 2, 3]).expect("building response failed"),
        };
        assert_eq!(status.pack(), vec![1, 0, 0, 3, 1, 2, 3]);
    }
}
