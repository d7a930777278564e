use crate::cipher::{self, CipherSuiteID};
use crate::crypto::CryptoProvider;
use crate::errors;
use crate::extensions::{self, Extension, ExtensionList, ExtensionType, ServerExtensions};
use crate::fields;
use crate::handshake::{HandshakeType, KeaAction, MessageHandler};
use crate::key_exchange::KeyExchange;
use crate::pack::Pack;
use crate::session::{Session, VersionProbe};
use crate::state::{ConnectionState, HandshakePhase};
use crate::version::{self, ProtocolVersion};

use log::{debug, info, warn};
use std::convert::TryFrom;
use std::sync::Arc;
use std::time::SystemTime;

/// The 32-byte hello random: optional gmt_unix_time followed by 28 random bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Random {
    gmt_unix_time: fields::Uint32,
    random_bytes: fields::FixedOpaque<28>,
}

impl Random {
    pub fn new(provider: &dyn CryptoProvider, include_time: bool) -> Result<Random, errors::TLSError> {
        let mut bytes = [0u8; 32];
        provider.fill_random(&mut bytes)?;
        let mut gmt_unix_time = fields::Uint32(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]));
        if include_time {
            let now = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH)?;
            gmt_unix_time = fields::Uint32(u32::try_from(now.as_secs())?);
        }
        let mut random_bytes = [0u8; 28];
        random_bytes.copy_from_slice(&bytes[4..]);
        Ok(Random {
            gmt_unix_time,
            random_bytes: fields::FixedOpaque(random_bytes),
        })
    }

    pub fn gmt_unix_time(&self) -> u32 {
        self.gmt_unix_time.0
    }
}

impl Pack for Random {
    fn empty() -> Self {
        Self {
            gmt_unix_time: fields::Uint32::empty(),
            random_bytes: fields::FixedOpaque::empty(),
        }
    }

    fn pack(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(32);
        v.extend_from_slice(&self.gmt_unix_time.pack());
        v.extend_from_slice(&self.random_bytes.pack());
        v
    }

    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        let mut v = self.gmt_unix_time.unpack(v)?;
        self.random_bytes.unpack(&mut v)
    }
}

pub type SessionID = fields::VarOpaque<1, 32>;
pub type CipherSuites = fields::VarList<CipherSuiteID, 2, 0xfffe>;
pub type CompressionMethods = fields::VarOpaque<1, 255>;

pub const COMPRESSION_NULL: u8 = 0;

//
// ClientHello
//

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientHello {
    pub client_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionID,
    pub cipher_suites: CipherSuites,
    pub compression_methods: CompressionMethods,
    pub extensions: ExtensionList,
}

impl Pack for ClientHello {
    fn empty() -> Self {
        Self {
            client_version: ProtocolVersion::empty(),
            random: Random::empty(),
            session_id: SessionID::empty(),
            cipher_suites: CipherSuites::empty(),
            compression_methods: CompressionMethods::empty(),
            extensions: ExtensionList::absent(),
        }
    }

    fn pack(&self) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&self.client_version.pack());
        v.extend_from_slice(&self.random.pack());
        v.extend_from_slice(&self.session_id.pack());
        v.extend_from_slice(&self.cipher_suites.pack());
        v.extend_from_slice(&self.compression_methods.pack());
        v.extend_from_slice(&self.extensions.pack());
        v
    }

    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        let mut v = self.client_version.unpack(v)?;
        let mut v = self.random.unpack(&mut v)?;
        let mut v = self.session_id.unpack(&mut v)?;
        let mut v = self.cipher_suites.unpack(&mut v)?;
        if self.cipher_suites.count() == 0 {
            return Err(errors::TLSError::DecodeError("ClientHello offers no cipher suites"));
        }
        let mut v = self.compression_methods.unpack(&mut v)?;
        if self.compression_methods.is_empty() {
            return Err(errors::TLSError::DecodeError("ClientHello offers no compression methods"));
        }
        self.extensions.unpack(&mut v)
    }
}

impl ClientHello {
    fn cipher_list(state: &ConnectionState, version: ProtocolVersion, candidate: Option<&Session>) -> Vec<CipherSuiteID> {
        let context = &state.context;
        let features = state.server_features();
        let offerable: Vec<CipherSuiteID> = match &context.config.cipher_preference {
            Some(preference) => preference
                .iter()
                .filter_map(|id| context.ciphers.lookup(*id))
                .filter(|c| c.is_offerable(version, !features.reduced_dhe, context.config.allow_anonymous_dh))
                .map(|c| c.id)
                .collect(),
            None => context
                .ciphers
                .offerable(version, !features.reduced_dhe, context.config.allow_anonymous_dh)
                .iter()
                .map(|c| c.id)
                .collect(),
        };

        let mut ids = Vec::with_capacity(offerable.len() + 2);
        if !features.renegotiation_info_supported && !state.renegotiating {
            ids.push(cipher::TLS_EMPTY_RENEGOTIATION_INFO_SCSV);
        }
        if let Some(session) = candidate {
            if offerable.contains(&session.cipher()) {
                ids.push(session.cipher());
            }
        }
        for id in offerable {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    fn extension_list(state: &mut ConnectionState, version: ProtocolVersion) -> Result<ExtensionList, errors::TLSError> {
        state.sent_extensions.clear();
        if version < version::TLS_1_0 {
            return Ok(ExtensionList::absent());
        }
        let config = &state.context.config;
        let mut list: Vec<Extension> = Vec::new();
        let mut sent: Vec<ExtensionType> = Vec::new();
        let mut ocsp_request = None;

        if !extensions::is_literal_address(&state.server.host) {
            list.push(extensions::server_name(&state.server.host)?);
            sent.push(ExtensionType::ServerName);
        }
        list.push(extensions::renegotiation_info(&state.last_client_finished)?);
        sent.push(ExtensionType::RenegotiationInfo);
        if config.enable_ocsp_stapling {
            let request = extensions::status_request(&config.ocsp_request_extensions)?;
            ocsp_request = Some(request.extension_data.as_slice().to_vec());
            list.push(request);
            sent.push(ExtensionType::StatusRequest);
        }
        if version.uses_signature_algorithms() {
            list.push(extensions::signature_algorithms(&config.signature_algorithms)?);
            sent.push(ExtensionType::SignatureAlgorithms);
        }
        if !config.next_protocols.is_empty() && !state.renegotiating {
            list.push(extensions::next_protocol_negotiation()?);
            sent.push(ExtensionType::NextProtocolNegotiation);
        }

        if let Some(request) = ocsp_request {
            state.session.ocsp_request = request;
        }
        state.sent_extensions = sent;
        ExtensionList::new(list)
    }
}

impl MessageHandler for ClientHello {
    fn set_up_message(&mut self, state: &mut ConnectionState) -> Result<(), errors::TLSError> {
        state.expect_phase(HandshakeType::ClientHello, &[HandshakePhase::Idle])?;
        let context = state.context.clone();
        let version = state.hello_version();
        if !context.config.is_version_enabled(version) {
            return Err(errors::TLSError::ProtocolVersionError(version));
        }

        let candidate = context
            .sessions
            .find_session_record(&state.server)
            .filter(|s| s.version() <= version && context.config.is_version_enabled(s.version()))
            .filter(|s| context.ciphers.lookup(s.cipher()).is_some());

        let ciphers = Self::cipher_list(state, version, candidate.as_deref());
        if ciphers.iter().all(|c| *c == cipher::TLS_EMPTY_RENEGOTIATION_INFO_SCSV) {
            return Err(errors::TLSError::HandshakeFailure("no cipher suites to offer"));
        }

        state.session = Session::new();
        state.sent_version = version;
        state.client_random = Random::new(context.crypto.as_ref(), context.config.send_gmt_unix_time)?;
        self.client_version = version;
        self.random = state.client_random;
        self.session_id = SessionID::new(candidate.as_ref().map(|s| s.session_id().to_vec()).unwrap_or_default())?;
        self.cipher_suites = CipherSuites::new(ciphers.clone())?;
        self.compression_methods = CompressionMethods::new(vec![COMPRESSION_NULL])?;
        self.extensions = Self::extension_list(state, version)?;

        debug!(
            "ClientHello to {}:{} offering {:?} with {} cipher suites{}",
            state.server.host,
            state.server.port,
            version,
            ciphers.len(),
            if candidate.is_some() { ", resuming" } else { "" }
        );
        state.offered_ciphers = ciphers;
        state.offered_compression = vec![COMPRESSION_NULL];
        state.resume_candidate = candidate;
        state.set_phase(HandshakePhase::ClientHelloSent);
        Ok(())
    }
}

//
// ServerHello
//

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerHello {
    pub server_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionID,
    pub cipher_suite: CipherSuiteID,
    pub compression_method: fields::Uint8,
    pub extensions: ExtensionList,
}

impl Pack for ServerHello {
    fn empty() -> Self {
        Self {
            server_version: ProtocolVersion::empty(),
            random: Random::empty(),
            session_id: SessionID::empty(),
            cipher_suite: CipherSuiteID::empty(),
            compression_method: fields::Uint8::empty(),
            extensions: ExtensionList::absent(),
        }
    }

    fn pack(&self) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&self.server_version.pack());
        v.extend_from_slice(&self.random.pack());
        v.extend_from_slice(&self.session_id.pack());
        v.extend_from_slice(&self.cipher_suite.pack());
        v.extend_from_slice(&self.compression_method.pack());
        v.extend_from_slice(&self.extensions.pack());
        v
    }

    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        let mut v = self.server_version.unpack(v)?;
        let mut v = self.random.unpack(&mut v)?;
        let mut v = self.session_id.unpack(&mut v)?;
        let mut v = self.cipher_suite.unpack(&mut v)?;
        let mut v = self.compression_method.unpack(&mut v)?;
        self.extensions.unpack(&mut v)
    }
}

impl ServerHello {
    /// Checks the server's version against what was offered. `Ok(false)` means the
    /// connection must restart with the version the server asked for.
    fn negotiate_version(&self, state: &mut ConnectionState) -> Result<bool, errors::TLSError> {
        let config = &state.context.config;
        let version = self.server_version;
        if version > state.sent_version {
            return Err(errors::TLSError::ProtocolVersionError(version));
        }
        if version == version::SSL_3_0 && state.sent_version >= version::TLS_1_0 && state.server_features().is_probing() {
            if !config.enable_ssl3 || !state.context.crypto.supports_legacy_versions() {
                return Err(errors::TLSError::ProtocolVersionError(version));
            }
            warn!("{}:{} answered with SSL 3.0, retrying", state.server.host, state.server.port);
            state
                .context
                .sessions
                .update_server_features(&state.server, |f| f.version_probe = VersionProbe::Downgraded(version::SSL_3_0));
            return Ok(false);
        }
        if !config.is_version_enabled(version) {
            return Err(errors::TLSError::ProtocolVersionError(version));
        }
        if !version.uses_signature_algorithms() && !state.context.crypto.supports_legacy_versions() {
            warn!("crypto provider has no MD5/SHA-1 support for {:?}", version);
            return Err(errors::TLSError::ProtocolVersionError(version));
        }
        Ok(true)
    }

    fn negotiate_extensions(&self, state: &mut ConnectionState) -> Result<(), errors::TLSError> {
        let mut sent = state.sent_extensions.clone();
        // A server may answer the SCSV with renegotiation_info.
        if state.offered_ciphers.contains(&cipher::TLS_EMPTY_RENEGOTIATION_INFO_SCSV) && !sent.contains(&ExtensionType::RenegotiationInfo) {
            sent.push(ExtensionType::RenegotiationInfo);
        }
        let server_extensions = ServerExtensions::parse(&self.extensions, &sent)?;
        state.check_renegotiation_info(server_extensions.renegotiation_info.as_deref())?;
        state.ocsp_expected = server_extensions.status_request_acknowledged;
        state.next_protocol.server_protocols = server_extensions.next_protocols;
        Ok(())
    }
}

impl MessageHandler for ServerHello {
    fn process_message(&mut self, state: &mut ConnectionState) -> Result<KeaAction, errors::TLSError> {
        state.expect_phase(HandshakeType::ServerHello, &[HandshakePhase::ClientHelloSent])?;
        if !self.negotiate_version(state)? {
            return Ok(KeaAction::FullConnectionRestart);
        }
        let version = self.server_version;
        let context = state.context.clone();

        let cipher_id = self.cipher_suite;
        if cipher_id == cipher::TLS_EMPTY_RENEGOTIATION_INFO_SCSV || !state.offered_ciphers.contains(&cipher_id) {
            return Err(errors::TLSError::IllegalParameter("server selected a cipher suite that was not offered"));
        }
        let description = context
            .ciphers
            .lookup(cipher_id)
            .ok_or(errors::TLSError::CipherNotSupportedError(cipher_id))?;
        if description.min_version > version {
            return Err(errors::TLSError::IllegalParameter("cipher suite not allowed at the negotiated version"));
        }
        let compression = self.compression_method.0;
        if !state.offered_compression.contains(&compression) {
            return Err(errors::TLSError::IllegalParameter("server selected a compression method that was not offered"));
        }

        state.version = version;
        state.server_random = self.random;
        self.negotiate_extensions(state)?;

        let session_id = self.session_id.as_slice();
        match state.resume_candidate.take() {
            Some(candidate) if !session_id.is_empty() && candidate.session_id() == session_id => {
                candidate.check_resumption(session_id, version, cipher_id, compression)?;
                let mut session = candidate.resumption_copy();
                session.resumed = true;
                state.session = session;
                state.anonymous_connection = description.key_exchange.is_anonymous();
                state.cipher = Some(description);
                state.derive_keys()?;
                state.apply_connection_rating();
                info!("resuming session with {}:{}", state.server.host, state.server.port);
                state.set_phase(HandshakePhase::ServerHelloReceived);
                return Ok(KeaAction::ResumeSession);
            }
            Some(candidate) => {
                debug!("{}:{} declined to resume, dropping the cached session", state.server.host, state.server.port);
                context.sessions.remove_session_record(&state.server, candidate.session_id());
            }
            None => {}
        }

        let mut session = Session::new();
        session.negotiate(session_id, version, cipher_id, compression)?;
        session.ocsp_request = std::mem::take(&mut state.session.ocsp_request);
        state.session = session;
        state.anonymous_connection = description.key_exchange.is_anonymous();
        state.key_exchange = Some(KeyExchange::new(description.key_exchange));
        state.cipher = Some(Arc::clone(&description));
        state.apply_connection_rating();
        debug!("negotiated {} at {:?}", description.name, version);
        state.set_phase(HandshakePhase::ServerHelloReceived);
        Ok(KeaAction::NoAction)
    }
}

pub fn is_compression_null(methods: &CompressionMethods) -> bool {
    methods.as_slice() == [COMPRESSION_NULL]
}
