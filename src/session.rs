use crate::cipher::{CipherSuiteID, SecurityRating};
use crate::errors;
use crate::version::{self, ProtocolVersion};

use std::collections::HashMap;
use std::fmt;
use std::ops::BitOr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use zeroize::Zeroizing;

pub const MAX_SESSION_ID_LEN: usize = 32;

/// Bit set explaining why a connection's rating was lowered.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct LowSecurityReason(pub u32);

impl LowSecurityReason {
    pub const NONE: LowSecurityReason = LowSecurityReason(0);
    pub const WEAK_CIPHER: LowSecurityReason = LowSecurityReason(1);
    pub const WEAK_KEY_EXCHANGE: LowSecurityReason = LowSecurityReason(1 << 1);
    pub const CERTIFICATE: LowSecurityReason = LowSecurityReason(1 << 2);
    pub const RENEGOTIATION_UNSAFE: LowSecurityReason = LowSecurityReason(1 << 3);
    pub const ANONYMOUS: LowSecurityReason = LowSecurityReason(1 << 4);
    pub const OCSP_FAILED: LowSecurityReason = LowSecurityReason(1 << 5);

    pub fn contains(&self, other: LowSecurityReason) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for LowSecurityReason {
    type Output = LowSecurityReason;

    fn bitor(self, rhs: LowSecurityReason) -> LowSecurityReason {
        LowSecurityReason(self.0 | rhs.0)
    }
}

/// One negotiated (or being negotiated) TLS session.
///
/// The id, version, cipher and compression are fixed by `negotiate`; after that any
/// different value is an `IllegalParameter`.
#[derive(Clone)]
pub struct Session {
    session_id: Vec<u8>,
    version: ProtocolVersion,
    cipher: CipherSuiteID,
    compression: u8,
    negotiated: bool,
    master_secret: Zeroizing<Vec<u8>>,

    pub site_certificate_chain: Vec<Vec<u8>>,
    pub validated_certificate_chain: Vec<Vec<u8>>,
    pub client_certificate_chain: Vec<Vec<u8>>,
    pub resumed: bool,
    pub ocsp_request: Vec<u8>,
    pub ocsp_response: Vec<u8>,
    pub renegotiation_extension_supported: bool,
    pub security_rating: SecurityRating,
    pub low_security_reason: LowSecurityReason,
    pub next_protocol: Option<Vec<u8>>,
    created: Instant,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("version", &self.version)
            .field("cipher", &self.cipher)
            .field("compression", &self.compression)
            .field("negotiated", &self.negotiated)
            .field("resumed", &self.resumed)
            .field("security_rating", &self.security_rating)
            .field("low_security_reason", &self.low_security_reason)
            .finish()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            session_id: Vec::new(),
            version: ProtocolVersion::new(0, 0),
            cipher: CipherSuiteID([0, 0]),
            compression: 0,
            negotiated: false,
            master_secret: Zeroizing::new(Vec::new()),
            site_certificate_chain: Vec::new(),
            validated_certificate_chain: Vec::new(),
            client_certificate_chain: Vec::new(),
            resumed: false,
            ocsp_request: Vec::new(),
            ocsp_response: Vec::new(),
            renegotiation_extension_supported: false,
            security_rating: SecurityRating::High,
            low_security_reason: LowSecurityReason::NONE,
            next_protocol: None,
            created: Instant::now(),
        }
    }

    /// Fixes the session parameters chosen by the server.
    pub fn negotiate(
        &mut self,
        session_id: &[u8],
        version: ProtocolVersion,
        cipher: CipherSuiteID,
        compression: u8,
    ) -> Result<(), errors::TLSError> {
        if session_id.len() > MAX_SESSION_ID_LEN {
            return Err(errors::TLSError::LengthOverflowError {
                declared: session_id.len(),
                max: MAX_SESSION_ID_LEN,
            });
        }
        if self.negotiated {
            return self.check_resumption(session_id, version, cipher, compression);
        }
        self.session_id = session_id.to_vec();
        self.version = version;
        self.cipher = cipher;
        self.compression = compression;
        self.negotiated = true;
        Ok(())
    }

    /// A resumed session must come back with exactly the stored parameters.
    pub fn check_resumption(
        &self,
        session_id: &[u8],
        version: ProtocolVersion,
        cipher: CipherSuiteID,
        compression: u8,
    ) -> Result<(), errors::TLSError> {
        if self.session_id != session_id {
            return Err(errors::TLSError::IllegalParameter("session id changed"));
        }
        if self.cipher != cipher {
            return Err(errors::TLSError::IllegalParameter("resumed session with a different cipher"));
        }
        if self.compression != compression {
            return Err(errors::TLSError::IllegalParameter("resumed session with a different compression"));
        }
        if self.version != version {
            return Err(errors::TLSError::IllegalParameter("resumed session with a different version"));
        }
        Ok(())
    }

    pub fn session_id(&self) -> &[u8] {
        &self.session_id
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn cipher(&self) -> CipherSuiteID {
        self.cipher
    }

    pub fn compression(&self) -> u8 {
        self.compression
    }

    pub fn is_negotiated(&self) -> bool {
        self.negotiated
    }

    pub fn master_secret(&self) -> &[u8] {
        &self.master_secret
    }

    pub fn set_master_secret(&mut self, secret: Zeroizing<Vec<u8>>) {
        self.master_secret = secret;
    }

    /// An empty session id means the server will not resume this session.
    pub fn is_resumable(&self) -> bool {
        self.negotiated && !self.session_id.is_empty() && !self.master_secret.is_empty()
    }

    pub fn is_expired(&self, lifetime: Duration) -> bool {
        self.created.elapsed() > lifetime
    }

    /// Copy handed to a connection that resumes this session.
    pub fn resumption_copy(&self) -> Session {
        let mut session = self.clone();
        session.resumed = true;
        session
    }
}

/// Who the cache is keyed by.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ServerKey {
    pub host: String,
    pub port: u16,
}

impl ServerKey {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_ascii_lowercase(),
            port,
        }
    }
}

/// Result of probing which protocol versions a server tolerates.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VersionProbe {
    Untested,
    /// The server completed a handshake at this version.
    Confirmed(ProtocolVersion),
    /// The server answered a TLS hello with SSL 3.0; offer this version from now on.
    Downgraded(ProtocolVersion),
}

impl Default for VersionProbe {
    fn default() -> Self {
        VersionProbe::Untested
    }
}

/// Interop knowledge about one server, kept across connections.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ServerFeatures {
    pub version_probe: VersionProbe,
    pub reduced_dhe: bool,
    pub renegotiation_info_supported: bool,
}

impl ServerFeatures {
    /// Version to put in the next ClientHello to this server.
    pub fn hello_version(&self, max_version: ProtocolVersion) -> ProtocolVersion {
        match self.version_probe {
            VersionProbe::Downgraded(version) if version < max_version => version,
            _ => max_version,
        }
    }

    pub fn is_probing(&self) -> bool {
        self.version_probe == VersionProbe::Untested
    }

    pub fn known_ssl3_only(&self) -> bool {
        self.version_probe == VersionProbe::Downgraded(version::SSL_3_0)
    }
}

/// Sessions and interop features for one `(host, port)`.
#[derive(Debug, Default)]
pub struct SessionRecordHead {
    sessions: Vec<Arc<Session>>,
    pub features: ServerFeatures,
}

impl SessionRecordHead {
    /// Newest usable session, if any. Expired sessions are dropped on the way.
    pub fn find_session_record(&mut self, lifetime: Duration) -> Option<Arc<Session>> {
        self.sessions.retain(|s| !s.is_expired(lifetime));
        self.sessions.iter().rev().find(|s| s.is_resumable()).cloned()
    }

    pub fn add_session_record(&mut self, session: Arc<Session>, max_sessions: usize) {
        self.remove_session_record(session.session_id());
        self.sessions.push(session);
        while max_sessions > 0 && self.sessions.len() > max_sessions {
            self.sessions.remove(0);
        }
    }

    /// Unlinks the session; connections holding an `Arc` keep their copy alive.
    pub fn remove_session_record(&mut self, session_id: &[u8]) -> bool {
        let before = self.sessions.len();
        self.sessions.retain(|s| s.session_id() != session_id);
        before != self.sessions.len()
    }

    pub fn invalidate_session_cache(&mut self, on_shutdown: bool) {
        self.sessions.clear();
        if on_shutdown {
            self.features = ServerFeatures::default();
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Shared per-server session cache.
///
/// Every operation takes the one lock for its whole duration, so concurrent connections
/// to the same server see add/remove/lookup as atomic steps.
#[derive(Debug)]
pub struct SessionCache {
    servers: Mutex<HashMap<ServerKey, SessionRecordHead>>,
    lifetime: Duration,
    max_sessions_per_server: usize,
}

impl SessionCache {
    pub fn new(lifetime: Duration, max_sessions_per_server: usize) -> Self {
        Self {
            servers: Mutex::new(HashMap::new()),
            lifetime,
            max_sessions_per_server,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ServerKey, SessionRecordHead>> {
        // every mutation is a single call, so a poisoned map is still consistent
        match self.servers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn find_session_record(&self, server: &ServerKey) -> Option<Arc<Session>> {
        let mut servers = self.lock();
        let lifetime = self.lifetime;
        servers.get_mut(server).and_then(|head| head.find_session_record(lifetime))
    }

    pub fn add_session_record(&self, server: &ServerKey, session: Arc<Session>) {
        if !session.is_resumable() {
            return;
        }
        let max_sessions = self.max_sessions_per_server;
        log::debug!("caching session {:02x?} for {}:{}", session.session_id(), server.host, server.port);
        self.lock()
            .entry(server.clone())
            .or_default()
            .add_session_record(session, max_sessions);
    }

    pub fn remove_session_record(&self, server: &ServerKey, session_id: &[u8]) -> bool {
        self.lock()
            .get_mut(server)
            .map(|head| head.remove_session_record(session_id))
            .unwrap_or(false)
    }

    pub fn server_features(&self, server: &ServerKey) -> ServerFeatures {
        self.lock().get(server).map(|head| head.features).unwrap_or_default()
    }

    pub fn update_server_features<F>(&self, server: &ServerKey, update: F) -> ServerFeatures
    where
        F: FnOnce(&mut ServerFeatures),
    {
        let mut servers = self.lock();
        let head = servers.entry(server.clone()).or_default();
        update(&mut head.features);
        head.features
    }

    /// Drops every cached session. On shutdown the learned server features go too.
    pub fn invalidate_session_cache(&self, on_shutdown: bool) {
        let mut servers = self.lock();
        if on_shutdown {
            servers.clear();
            return;
        }
        for head in servers.values_mut() {
            head.invalidate_session_cache(false);
        }
    }

    pub fn session_count(&self, server: &ServerKey) -> usize {
        self.lock().get(server).map(|head| head.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use crate::cipher;
    use crate::errors::TLSError;
    use crate::session::{ServerKey, Session, SessionCache, VersionProbe};
    use crate::version;

    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use zeroize::Zeroizing;

    fn resumable(id: u8) -> Session {
        let mut session = Session::new();
        session
            .negotiate(&[id; 32], version::TLS_1_2, cipher::TLS_RSA_WITH_AES_128_CBC_SHA, 0)
            .expect("negotiate failed");
        session.set_master_secret(Zeroizing::new(vec![id; 48]));
        session
    }

    #[test]
    fn negotiated_parameters_are_immutable() {
        let mut session = resumable(1);
        let err = session
            .negotiate(&[1; 32], version::TLS_1_2, cipher::TLS_RSA_WITH_AES_256_CBC_SHA, 0)
            .expect_err("cipher change accepted");
        assert!(matches!(err, TLSError::IllegalParameter(_)));
        assert_eq!(session.cipher(), cipher::TLS_RSA_WITH_AES_128_CBC_SHA);
        assert!(session
            .negotiate(&[1; 32], version::TLS_1_2, cipher::TLS_RSA_WITH_AES_128_CBC_SHA, 0)
            .is_ok());
    }

    #[test]
    fn oversized_session_id_is_rejected() {
        let mut session = Session::new();
        assert!(session.negotiate(&[0; 33], version::TLS_1_2, cipher::TLS_RSA_WITH_AES_128_CBC_SHA, 0).is_err());
        assert!(!session.is_negotiated());
    }

    #[test]
    fn empty_session_id_is_not_resumable() {
        let mut session = Session::new();
        session
            .negotiate(&[], version::TLS_1_2, cipher::TLS_RSA_WITH_AES_128_CBC_SHA, 0)
            .expect("negotiate failed");
        session.set_master_secret(Zeroizing::new(vec![0; 48]));
        assert!(!session.is_resumable());

        let cache = SessionCache::new(Duration::from_secs(60), 4);
        let server = ServerKey::new("example.com", 443);
        cache.add_session_record(&server, Arc::new(session));
        assert!(cache.find_session_record(&server).is_none());
    }

    #[test]
    fn find_has_no_side_effect_and_remove_unlinks() {
        let cache = SessionCache::new(Duration::from_secs(60), 4);
        let server = ServerKey::new("Example.com", 443);
        assert!(cache.find_session_record(&server).is_none());
        assert_eq!(cache.session_count(&server), 0);

        let session = Arc::new(resumable(7));
        cache.add_session_record(&server, session.clone());
        let found = cache.find_session_record(&ServerKey::new("example.com", 443)).expect("session not found");
        assert!(Arc::ptr_eq(&found, &session));

        assert!(cache.remove_session_record(&server, &[7; 32]));
        assert!(cache.find_session_record(&server).is_none());
        // Connections still holding the session keep it alive.
        assert_eq!(found.session_id(), &[7; 32]);
    }

    #[test]
    fn expired_sessions_are_never_returned() {
        let cache = SessionCache::new(Duration::from_millis(0), 4);
        let server = ServerKey::new("example.com", 443);
        cache.add_session_record(&server, Arc::new(resumable(3)));
        thread::sleep(Duration::from_millis(5));
        assert!(cache.find_session_record(&server).is_none());
        assert_eq!(cache.session_count(&server), 0);
    }

    #[test]
    fn per_server_limit_evicts_oldest() {
        let cache = SessionCache::new(Duration::from_secs(60), 2);
        let server = ServerKey::new("example.com", 443);
        for id in 1..=3 {
            cache.add_session_record(&server, Arc::new(resumable(id)));
        }
        assert_eq!(cache.session_count(&server), 2);
        let newest = cache.find_session_record(&server).expect("session not found");
        assert_eq!(newest.session_id(), &[3; 32]);
    }

    #[test]
    fn invalidate_keeps_features_unless_shutting_down() {
        let cache = SessionCache::new(Duration::from_secs(60), 4);
        let server = ServerKey::new("example.com", 443);
        cache.add_session_record(&server, Arc::new(resumable(1)));
        cache.update_server_features(&server, |f| f.reduced_dhe = true);

        cache.invalidate_session_cache(false);
        assert_eq!(cache.session_count(&server), 0);
        assert!(cache.server_features(&server).reduced_dhe);

        cache.invalidate_session_cache(true);
        assert!(!cache.server_features(&server).reduced_dhe);
        assert_eq!(cache.server_features(&server).version_probe, VersionProbe::Untested);
    }

    #[test]
    fn concurrent_add_and_remove_stay_consistent() {
        let cache = Arc::new(SessionCache::new(Duration::from_secs(60), 1000));
        let server = ServerKey::new("example.com", 443);

        let handles: Vec<_> = (0..8u8)
            .map(|t| {
                let cache = cache.clone();
                let server = server.clone();
                thread::spawn(move || {
                    for round in 0..50u8 {
                        let mut id = vec![0; 32];
                        id[0] = t;
                        id[1] = round;
                        let mut session = Session::new();
                        session
                            .negotiate(&id, version::TLS_1_2, cipher::TLS_RSA_WITH_AES_128_CBC_SHA, 0)
                            .expect("negotiate failed");
                        session.set_master_secret(Zeroizing::new(vec![1; 48]));
                        cache.add_session_record(&server, Arc::new(session));
                        if round % 2 == 0 {
                            assert!(cache.remove_session_record(&server, &id));
                        }
                        cache.find_session_record(&server);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker panicked");
        }
        // Odd rounds survive: 8 threads x 25 sessions.
        assert_eq!(cache.session_count(&server), 200);
    }
}
