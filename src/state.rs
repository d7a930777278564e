use crate::alert::{Alert, AlertDescription};
use crate::cipher::{CipherDescription, CipherSuiteID, PRFAlgorithm, SecurityRating};
use crate::config::HandshakeContext;
use crate::crypto::{self, CertificateRequestInfo, KeyBlock};
use crate::errors;
use crate::extensions::ExtensionType;
use crate::handshake::HandshakeType;
use crate::hello::Random;
use crate::key_exchange::KeyExchange;
use crate::pack::Pack;
use crate::session::{LowSecurityReason, ServerFeatures, ServerKey, Session, VersionProbe};
use crate::version::{self, ProtocolVersion};

use log::{debug, warn};
use std::sync::Arc;
use zeroize::Zeroizing;

/// Where the client is in the handshake. Each message declares the phases it is legal in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HandshakePhase {
    Idle,
    ClientHelloSent,
    ServerHelloReceived,
    ServerCertificateReceived,
    CertificateStatusReceived,
    ServerKeyExchangeReceived,
    CertificateRequestReceived,
    ServerHelloDoneReceived,
    ClientKeyExchangeSent,
    ClientFinishedSent,
    ServerFinishedReceived,
    Complete,
}

/// One direction of record protection.
#[derive(Default)]
pub struct CipherSpec {
    pub cipher: Option<Arc<CipherDescription>>,
    pub compression: u8,
    pub mac_key: Zeroizing<Vec<u8>>,
    pub key: Zeroizing<Vec<u8>>,
    pub iv: Vec<u8>,
    pub sequence_number: u64,
}

impl CipherSpec {
    pub fn is_null(&self) -> bool {
        self.cipher.is_none()
    }
}

#[derive(Default)]
pub struct CipherSpecPair {
    pub read: CipherSpec,
    pub write: CipherSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NextProtocolState {
    pub server_protocols: Option<Vec<Vec<u8>>>,
    pub selected: Option<Vec<u8>>,
}

/// Handshake suspended until the user picks a client certificate.
#[derive(Clone, Debug)]
pub struct PendingCertificateChoice {
    pub request: CertificateRequestInfo,
    pub candidate_labels: Vec<String>,
}

/// Per-connection handshake state.
pub struct ConnectionState {
    pub context: Arc<HandshakeContext>,
    pub server: ServerKey,

    pub sent_version: ProtocolVersion,
    pub version: ProtocolVersion,
    pub client_random: Random,
    pub server_random: Random,

    pub pending: CipherSpecPair,
    pub current: CipherSpecPair,
    pub cipher: Option<Arc<CipherDescription>>,

    pub session: Session,
    pub resume_candidate: Option<Arc<Session>>,
    pub key_exchange: Option<KeyExchange>,
    pub anonymous_connection: bool,

    pub last_client_finished: Vec<u8>,
    pub last_server_finished: Vec<u8>,
    pub renegotiation_extension_supported: bool,
    pub renegotiating: bool,
    pub renegotiation_requested: bool,

    pub next_protocol: NextProtocolState,
    pub offered_ciphers: Vec<CipherSuiteID>,
    pub offered_compression: Vec<u8>,
    pub sent_extensions: Vec<ExtensionType>,
    pub ocsp_expected: bool,
    pub certificate_requested: bool,

    pending_certificate_choice: Option<PendingCertificateChoice>,
    phase: HandshakePhase,
    alerts: Vec<Alert>,
    transcript: Vec<u8>,
}

impl ConnectionState {
    pub fn new(context: Arc<HandshakeContext>, host: &str, port: u16) -> Self {
        Self {
            context,
            server: ServerKey::new(host, port),
            sent_version: ProtocolVersion::empty(),
            version: ProtocolVersion::empty(),
            client_random: Random::empty(),
            server_random: Random::empty(),
            pending: CipherSpecPair::default(),
            current: CipherSpecPair::default(),
            cipher: None,
            session: Session::new(),
            resume_candidate: None,
            key_exchange: None,
            anonymous_connection: false,
            last_client_finished: Vec::new(),
            last_server_finished: Vec::new(),
            renegotiation_extension_supported: false,
            renegotiating: false,
            renegotiation_requested: false,
            next_protocol: NextProtocolState::default(),
            offered_ciphers: Vec::new(),
            offered_compression: Vec::new(),
            sent_extensions: Vec::new(),
            ocsp_expected: false,
            certificate_requested: false,
            pending_certificate_choice: None,
            phase: HandshakePhase::Idle,
            alerts: Vec::new(),
            transcript: Vec::new(),
        }
    }

    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: HandshakePhase) {
        log::trace!("phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    pub fn is_complete(&self) -> bool {
        self.phase == HandshakePhase::Complete
    }

    /// `OutOfOrderMessage` unless the current phase is one of `allowed`.
    pub fn expect_phase(&self, message: HandshakeType, allowed: &[HandshakePhase]) -> Result<(), errors::TLSError> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(errors::TLSError::OutOfOrderMessage {
                received: message,
                phase: self.phase,
            })
        }
    }

    //
    // Alerts
    //

    /// Queues the fatal alert for `err` and returns it.
    pub fn raise_alert(&mut self, err: &errors::TLSError) -> Alert {
        let alert = Alert::fatal(err.alert_description());
        warn!("handshake with {}:{} failed: {} ({:?})", self.server.host, self.server.port, err, alert.description);
        self.alerts.push(alert);
        alert
    }

    pub fn raise_warning(&mut self, description: AlertDescription) {
        debug!("queueing warning alert {:?}", description);
        self.alerts.push(Alert::warning(description));
    }

    pub fn pending_alerts(&self) -> &[Alert] {
        &self.alerts
    }

    pub fn take_alerts(&mut self) -> Vec<Alert> {
        std::mem::take(&mut self.alerts)
    }

    pub fn has_fatal_alert(&self) -> bool {
        self.alerts.iter().any(|a| a.is_fatal())
    }

    //
    // Transcript
    //

    pub fn transcript(&self) -> &[u8] {
        &self.transcript
    }

    pub(crate) fn append_transcript(&mut self, message: &[u8]) -> Result<(), errors::TLSError> {
        self.transcript
            .try_reserve(message.len())
            .map_err(|_| errors::TLSError::AllocationFailure)?;
        self.transcript.extend_from_slice(message);
        Ok(())
    }

    //
    // Negotiated parameters
    //

    pub fn server_features(&self) -> ServerFeatures {
        self.context.sessions.server_features(&self.server)
    }

    pub fn negotiated_cipher(&self) -> Result<Arc<CipherDescription>, errors::TLSError> {
        self.cipher.clone().ok_or(errors::TLSError::SessionError)
    }

    pub fn prf_algorithm(&self) -> Result<PRFAlgorithm, errors::TLSError> {
        Ok(self.negotiated_cipher()?.prf_for(self.version))
    }

    pub fn key_exchange_mut(&mut self) -> Result<&mut KeyExchange, errors::TLSError> {
        self.key_exchange.as_mut().ok_or(errors::TLSError::SessionError)
    }

    /// Lowers the session rating; it never goes up.
    pub fn lower_security(&mut self, rating: SecurityRating, reason: LowSecurityReason) {
        if rating < self.session.security_rating {
            self.session.security_rating = rating;
        }
        self.session.low_security_reason = self.session.low_security_reason | reason;
    }

    /// Checks the server's renegotiation_info against the last Finished digests.
    pub fn check_renegotiation_info(&mut self, value: Option<&[u8]>) -> Result<(), errors::TLSError> {
        match value {
            Some(value) => {
                let expected = [&self.last_client_finished[..], &self.last_server_finished[..]].concat();
                if !crypto::constant_time_eq(value, &expected) {
                    return Err(errors::TLSError::HandshakeFailure("renegotiation_info does not match the previous handshake"));
                }
                self.renegotiation_extension_supported = true;
                self.context
                    .sessions
                    .update_server_features(&self.server, |f| f.renegotiation_info_supported = true);
                Ok(())
            }
            None => {
                if self.renegotiating && self.renegotiation_extension_supported {
                    return Err(errors::TLSError::HandshakeFailure("renegotiation_info missing on renegotiation"));
                }
                if self.context.config.require_renegotiation_extension {
                    return Err(errors::TLSError::HandshakeFailure("server does not support secure renegotiation"));
                }
                if self.renegotiating {
                    return Err(errors::TLSError::HandshakeFailure("insecure renegotiation refused"));
                }
                warn!("{}:{} does not support secure renegotiation", self.server.host, self.server.port);
                self.renegotiation_extension_supported = false;
                Ok(())
            }
        }
    }

    pub(crate) fn apply_connection_rating(&mut self) {
        let cipher_rating = self.cipher.as_ref().map(|c| c.security_rating);
        if let Some(rating) = cipher_rating {
            let reason = if rating < SecurityRating::High {
                LowSecurityReason::WEAK_CIPHER
            } else {
                LowSecurityReason::NONE
            };
            self.lower_security(rating, reason);
        }
        if !self.renegotiation_extension_supported {
            self.lower_security(SecurityRating::Medium, LowSecurityReason::RENEGOTIATION_UNSAFE);
        }
        if self.anonymous_connection {
            self.lower_security(SecurityRating::Insecure, LowSecurityReason::ANONYMOUS);
        }
    }

    //
    // Keys
    //

    /// Runs the key exchange, then derives the master secret and the pending cipher specs.
    pub fn prepare_premaster(&mut self) -> Result<(), errors::TLSError> {
        self.expect_phase(HandshakeType::ClientKeyExchange, &[HandshakePhase::ServerHelloDoneReceived])?;
        if self.pending_certificate_choice.is_some() {
            return Err(errors::TLSError::InternalError("client certificate choice is still pending"));
        }
        let prf = self.prf_algorithm()?;
        let crypto_provider = self.context.crypto.clone();
        let key_exchange = self.key_exchange.as_mut().ok_or(errors::TLSError::SessionError)?;
        key_exchange.prepare_premaster(self.sent_version, crypto_provider.as_ref())?;
        let master_secret = crypto::master_secret(
            prf,
            self.version,
            crypto_provider.as_ref(),
            key_exchange.pre_master_secret()?,
            &self.client_random.pack(),
            &self.server_random.pack(),
        )?;
        self.session.set_master_secret(master_secret);
        self.derive_keys()
    }

    pub(crate) fn derive_keys(&mut self) -> Result<(), errors::TLSError> {
        let cipher = self.negotiated_cipher()?;
        let block = KeyBlock::derive(
            &cipher,
            self.version,
            self.context.crypto.as_ref(),
            self.session.master_secret(),
            &self.client_random.pack(),
            &self.server_random.pack(),
        )?;
        let compression = self.session.compression();
        self.pending.write = CipherSpec {
            cipher: Some(cipher.clone()),
            compression,
            mac_key: block.client_write_mac_key,
            key: block.client_write_key,
            iv: block.client_write_iv,
            sequence_number: 0,
        };
        self.pending.read = CipherSpec {
            cipher: Some(cipher),
            compression,
            mac_key: block.server_write_mac_key,
            key: block.server_write_key,
            iv: block.server_write_iv,
            sequence_number: 0,
        };
        Ok(())
    }

    pub fn finished_verify_data(&self, client: bool) -> Result<Vec<u8>, errors::TLSError> {
        let label: &[u8] = if client {
            crypto::CLIENT_FINISHED_LABEL
        } else {
            crypto::SERVER_FINISHED_LABEL
        };
        crypto::verify_data(
            self.prf_algorithm()?,
            self.version,
            self.context.crypto.as_ref(),
            self.session.master_secret(),
            label,
            &self.transcript,
        )
    }

    /// The outer driver calls these when ChangeCipherSpec is sent or received.
    pub fn change_write_cipher_spec(&mut self) -> Result<(), errors::TLSError> {
        if self.pending.write.is_null() {
            return Err(errors::TLSError::InternalError("no pending write cipher"));
        }
        self.current.write = std::mem::take(&mut self.pending.write);
        Ok(())
    }

    pub fn change_read_cipher_spec(&mut self) -> Result<(), errors::TLSError> {
        if self.pending.read.is_null() {
            return Err(errors::TLSError::InternalError("no pending read cipher"));
        }
        self.current.read = std::mem::take(&mut self.pending.read);
        Ok(())
    }

    //
    // Client certificates
    //

    pub fn pending_certificate_choice(&self) -> Option<&PendingCertificateChoice> {
        self.pending_certificate_choice.as_ref()
    }

    pub(crate) fn park_certificate_choice(&mut self, choice: PendingCertificateChoice) {
        self.pending_certificate_choice = Some(choice);
    }

    /// Resumes a handshake parked on CertificateRequest. `None` continues without a certificate.
    pub fn select_client_certificate(&mut self, index: Option<usize>) -> Result<(), errors::TLSError> {
        if self.pending_certificate_choice.is_none() {
            return Err(errors::TLSError::InternalError("no client certificate choice pending"));
        }
        let key_exchange = self.key_exchange.as_mut().ok_or(errors::TLSError::SessionError)?;
        let chain = key_exchange.select_client_certificate(index)?.map(|c| c.chain.clone());
        self.session.client_certificate_chain = chain.unwrap_or_default();
        self.pending_certificate_choice = None;
        Ok(())
    }

    //
    // Completion and renegotiation
    //

    pub(crate) fn complete_handshake(&mut self) {
        self.set_phase(HandshakePhase::Complete);
        self.renegotiating = false;
        self.session.renegotiation_extension_supported = self.renegotiation_extension_supported;
        self.session.next_protocol = self.next_protocol.selected.clone();
        self.key_exchange = None;

        let version = self.version;
        self.context.sessions.update_server_features(&self.server, |f| {
            if f.version_probe == VersionProbe::Untested {
                f.version_probe = VersionProbe::Confirmed(version);
            }
        });
        if !self.session.resumed && self.session.is_resumable() {
            self.context.sessions.add_session_record(&self.server, Arc::new(self.session.clone()));
        }
        debug!(
            "handshake with {}:{} complete: {:?} {:?} resumed={} rating={:?}",
            self.server.host,
            self.server.port,
            self.version,
            self.session.cipher(),
            self.session.resumed,
            self.session.security_rating
        );
    }

    /// Resets per-handshake state so a new ClientHello can be sent on this connection.
    pub fn start_renegotiation(&mut self) -> Result<(), errors::TLSError> {
        if self.phase != HandshakePhase::Complete {
            return Err(errors::TLSError::InternalError("renegotiation before the handshake completed"));
        }
        if !self.renegotiation_extension_supported {
            return Err(errors::TLSError::HandshakeFailure("server does not support secure renegotiation"));
        }
        self.renegotiating = true;
        self.renegotiation_requested = false;
        self.resume_candidate = None;
        self.key_exchange = None;
        self.cipher = None;
        self.anonymous_connection = false;
        self.next_protocol = NextProtocolState::default();
        self.offered_ciphers.clear();
        self.offered_compression.clear();
        self.sent_extensions.clear();
        self.ocsp_expected = false;
        self.certificate_requested = false;
        self.pending_certificate_choice = None;
        self.transcript.clear();
        self.set_phase(HandshakePhase::Idle);
        Ok(())
    }

    /// Version the ClientHello offers to this server.
    pub fn hello_version(&self) -> ProtocolVersion {
        self.server_features().hello_version(self.context.config.max_version)
    }

    pub fn offers_extensions(&self) -> bool {
        self.sent_version >= version::TLS_1_0
    }
}
