use crate::certificate::{Certificate, CertificateRequest, CertificateStatus, CertificateVerify};
use crate::cipher::KeyExchangeAlgorithm;
use crate::errors;
use crate::exchange::{ClientKeyExchange, Finished, HelloRequest, NextProtocol, ServerHelloDone, ServerKeyExchange};
use crate::fields;
use crate::hello::{ClientHello, ServerHello};
use crate::pack::{self, Pack};
use crate::state::ConnectionState;
use crate::version::ProtocolVersion;

use log::trace;
use num_traits::FromPrimitive;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Primitive)]
#[repr(u8)]
pub enum HandshakeType {
    HelloRequest = 0,
    ClientHello = 1,
    ServerHello = 2,
    Certificate = 11,
    ServerKeyExchange = 12,
    CertificateRequest = 13,
    ServerHelloDone = 14,
    CertificateVerify = 15,
    ClientKeyExchange = 16,
    Finished = 20,
    CertificateStatus = 22,
    NextProtocol = 67,
}

impl HandshakeType {
    /// SSL 2.0 compatible hellos use their own one-byte codes.
    pub fn from_sslv2(tag: u8) -> Option<HandshakeType> {
        match tag {
            1 => Some(HandshakeType::ClientHello),
            4 => Some(HandshakeType::ServerHello),
            _ => None,
        }
    }

    pub fn to_sslv2(self) -> Option<u8> {
        match self {
            HandshakeType::ClientHello => Some(1),
            HandshakeType::ServerHello => Some(4),
            _ => None,
        }
    }
}

impl Pack for HandshakeType {
    fn empty() -> Self {
        HandshakeType::HelloRequest
    }

    fn pack(&self) -> Vec<u8> {
        vec![*self as u8]
    }

    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        let rest = pack::take_front(v, 1)?;
        *self = Self::from_u8(v[0]).ok_or(errors::TLSError::InvalidHandshakeTypeError(v[0]))?;
        Ok(rest)
    }
}

/// What the outer driver must do after a message was processed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeaAction {
    NoAction,
    /// Fatal alerts are queued on the connection; send them and close.
    HandleErrors,
    /// The server resumed: expect ChangeCipherSpec and Finished next.
    ResumeSession,
    /// Drop the transport and reconnect; the server's features were updated.
    FullConnectionRestart,
    /// ServerHelloDone arrived: call `prepare_premaster` and send the client flight.
    PreparePremaster,
}

pub trait ValidMessage {
    fn into_handshake_type() -> HandshakeType;
}
macro_rules! new_handshake_trait {
    ($name: ident) => {
        impl ValidMessage for $name {
            fn into_handshake_type() -> HandshakeType {
                HandshakeType::$name
            }
        }
    };
}
new_handshake_trait!(HelloRequest);
new_handshake_trait!(ClientHello);
new_handshake_trait!(ServerHello);
new_handshake_trait!(Certificate);
new_handshake_trait!(ServerKeyExchange);
new_handshake_trait!(CertificateRequest);
new_handshake_trait!(ServerHelloDone);
new_handshake_trait!(CertificateVerify);
new_handshake_trait!(ClientKeyExchange);
new_handshake_trait!(Finished);
new_handshake_trait!(CertificateStatus);
new_handshake_trait!(NextProtocol);

/// Client-side behaviour of one message kind. The defaults reject messages the
/// client never sends or never receives.
pub trait MessageHandler: ValidMessage {
    fn set_up_message(&mut self, _state: &mut ConnectionState) -> Result<(), errors::TLSError> {
        Err(errors::TLSError::InternalError("the client never sends this message"))
    }

    fn process_message(&mut self, state: &mut ConnectionState) -> Result<KeaAction, errors::TLSError> {
        Err(errors::TLSError::OutOfOrderMessage {
            received: Self::into_handshake_type(),
            phase: state.phase(),
        })
    }
}

/// A decoded or to-be-encoded handshake body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandshakeBody {
    HelloRequest(HelloRequest),
    ClientHello(ClientHello),
    ServerHello(ServerHello),
    Certificate(Certificate),
    ServerKeyExchange(ServerKeyExchange),
    CertificateRequest(CertificateRequest),
    ServerHelloDone(ServerHelloDone),
    CertificateVerify(CertificateVerify),
    ClientKeyExchange(ClientKeyExchange),
    Finished(Finished),
    CertificateStatus(CertificateStatus),
    NextProtocol(NextProtocol),
}

macro_rules! dispatch {
    ($body:expr, $m:ident => $e:expr) => {
        match $body {
            HandshakeBody::HelloRequest($m) => $e,
            HandshakeBody::ClientHello($m) => $e,
            HandshakeBody::ServerHello($m) => $e,
            HandshakeBody::Certificate($m) => $e,
            HandshakeBody::ServerKeyExchange($m) => $e,
            HandshakeBody::CertificateRequest($m) => $e,
            HandshakeBody::ServerHelloDone($m) => $e,
            HandshakeBody::CertificateVerify($m) => $e,
            HandshakeBody::ClientKeyExchange($m) => $e,
            HandshakeBody::Finished($m) => $e,
            HandshakeBody::CertificateStatus($m) => $e,
            HandshakeBody::NextProtocol($m) => $e,
        }
    };
}

impl HandshakeBody {
    pub fn new(msg_type: HandshakeType) -> Self {
        match msg_type {
            HandshakeType::HelloRequest => HandshakeBody::HelloRequest(HelloRequest::empty()),
            HandshakeType::ClientHello => HandshakeBody::ClientHello(ClientHello::empty()),
            HandshakeType::ServerHello => HandshakeBody::ServerHello(ServerHello::empty()),
            HandshakeType::Certificate => HandshakeBody::Certificate(Certificate::empty()),
            HandshakeType::ServerKeyExchange => HandshakeBody::ServerKeyExchange(ServerKeyExchange::empty()),
            HandshakeType::CertificateRequest => HandshakeBody::CertificateRequest(CertificateRequest::empty()),
            HandshakeType::ServerHelloDone => HandshakeBody::ServerHelloDone(ServerHelloDone::empty()),
            HandshakeType::CertificateVerify => HandshakeBody::CertificateVerify(CertificateVerify::empty()),
            HandshakeType::ClientKeyExchange => HandshakeBody::ClientKeyExchange(ClientKeyExchange::empty()),
            HandshakeType::Finished => HandshakeBody::Finished(Finished::empty()),
            HandshakeType::CertificateStatus => HandshakeBody::CertificateStatus(CertificateStatus::empty()),
            HandshakeType::NextProtocol => HandshakeBody::NextProtocol(NextProtocol::empty()),
        }
    }

    pub fn msg_type(&self) -> HandshakeType {
        match self {
            HandshakeBody::HelloRequest(_) => HandshakeType::HelloRequest,
            HandshakeBody::ClientHello(_) => HandshakeType::ClientHello,
            HandshakeBody::ServerHello(_) => HandshakeType::ServerHello,
            HandshakeBody::Certificate(_) => HandshakeType::Certificate,
            HandshakeBody::ServerKeyExchange(_) => HandshakeType::ServerKeyExchange,
            HandshakeBody::CertificateRequest(_) => HandshakeType::CertificateRequest,
            HandshakeBody::ServerHelloDone(_) => HandshakeType::ServerHelloDone,
            HandshakeBody::CertificateVerify(_) => HandshakeType::CertificateVerify,
            HandshakeBody::ClientKeyExchange(_) => HandshakeType::ClientKeyExchange,
            HandshakeBody::Finished(_) => HandshakeType::Finished,
            HandshakeBody::CertificateStatus(_) => HandshakeType::CertificateStatus,
            HandshakeBody::NextProtocol(_) => HandshakeType::NextProtocol,
        }
    }

    /// Passes the negotiated version and key exchange to bodies whose layout depends on them.
    pub fn bind(&mut self, version: ProtocolVersion, algorithm: Option<KeyExchangeAlgorithm>) {
        match self {
            HandshakeBody::ServerKeyExchange(m) => m.bind(algorithm, version),
            HandshakeBody::CertificateRequest(m) => m.bind(version),
            HandshakeBody::CertificateVerify(m) => m.signed.bind(version),
            HandshakeBody::ClientKeyExchange(m) => m.bind(algorithm, version),
            _ => {}
        }
    }

    pub fn set_up_message(&mut self, state: &mut ConnectionState) -> Result<(), errors::TLSError> {
        dispatch!(self, m => m.set_up_message(state))
    }

    pub fn process_message(&mut self, state: &mut ConnectionState) -> Result<KeaAction, errors::TLSError> {
        dispatch!(self, m => m.process_message(state))
    }
}

impl Pack for HandshakeBody {
    fn empty() -> Self {
        HandshakeBody::HelloRequest(HelloRequest::empty())
    }

    fn pack(&self) -> Vec<u8> {
        dispatch!(self, m => m.pack())
    }

    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        dispatch!(self, m => m.unpack(v))
    }
}

pub type Length = fields::Uint24;
pub const MAX_BODY_LENGTH: usize = 0x00ff_ffff;

/// The handshake envelope: `msg_type`, a 24-bit length and one body.
///
/// SSL 2.0 compatible framing drops the length and uses the 2.0 type codes.
/// The body is replaced only when the tag changes, so repeated `set_message`
/// calls for the same type keep the same allocation.
#[derive(Debug, Default)]
pub struct HandshakeMessage {
    version: Option<ProtocolVersion>,
    algorithm: Option<KeyExchangeAlgorithm>,
    body: Option<Box<HandshakeBody>>,
}

impl HandshakeMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn msg_type(&self) -> Option<HandshakeType> {
        self.body.as_ref().map(|b| b.msg_type())
    }

    pub fn body(&self) -> Option<&HandshakeBody> {
        self.body.as_deref()
    }

    pub fn body_mut(&mut self) -> Option<&mut HandshakeBody> {
        self.body.as_deref_mut()
    }

    /// Sets the negotiated version and key exchange used to frame and decode bodies.
    pub fn bind(&mut self, version: ProtocolVersion, algorithm: Option<KeyExchangeAlgorithm>) {
        self.version = Some(version);
        self.algorithm = algorithm;
        if let Some(body) = self.body.as_mut() {
            body.bind(version, algorithm);
        }
    }

    pub fn bind_to(&mut self, state: &ConnectionState) {
        let version = if state.version.is_set() {
            state.version
        } else {
            state.sent_version
        };
        let algorithm = state.cipher.as_ref().map(|c| c.key_exchange);
        self.bind(version, algorithm);
    }

    pub fn set_message(&mut self, msg_type: HandshakeType) {
        if self.msg_type() == Some(msg_type) {
            return;
        }
        let mut body = Box::new(HandshakeBody::new(msg_type));
        if let Some(version) = self.version {
            body.bind(version, self.algorithm);
        }
        self.body = Some(body);
    }

    fn is_sslv2(&self) -> bool {
        self.version.map_or(false, |v| v.is_sslv2())
    }

    /// Decodes one message from `bytes`, which must hold exactly one message.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<(), errors::TLSError> {
        let mut v: Vec<u8> = Vec::new();
        v.try_reserve(bytes.len()).map_err(|_| errors::TLSError::AllocationFailure)?;
        v.extend_from_slice(bytes);
        let rest = self.unpack(&mut v)?;
        if !rest.is_empty() {
            return Err(errors::TLSError::DecodeError("bytes after handshake message"));
        }
        Ok(())
    }

    /// Decodes and processes a received message. Any error becomes a queued fatal
    /// alert and `HandleErrors`.
    pub fn receive(&mut self, state: &mut ConnectionState, bytes: &[u8]) -> KeaAction {
        match self.try_receive(state, bytes) {
            Ok(action) => action,
            Err(err) => {
                state.raise_alert(&err);
                KeaAction::HandleErrors
            }
        }
    }

    fn try_receive(&mut self, state: &mut ConnectionState, bytes: &[u8]) -> Result<KeaAction, errors::TLSError> {
        self.bind_to(state);
        self.decode(bytes)?;
        let body = self.body.as_mut().ok_or(errors::TLSError::InternalError("no message body"))?;
        let msg_type = body.msg_type();
        trace!("received {:?} in {:?}", msg_type, state.phase());
        let action = body.process_message(state)?;
        if msg_type != HandshakeType::HelloRequest && action != KeaAction::FullConnectionRestart {
            state.append_transcript(bytes)?;
        }
        Ok(action)
    }

    /// Sets up a message of type `msg_type` from the connection state and encodes it.
    pub fn send(&mut self, state: &mut ConnectionState, msg_type: HandshakeType) -> Result<Vec<u8>, errors::TLSError> {
        self.set_message(msg_type);
        self.bind_to(state);
        let body = self.body.as_mut().ok_or(errors::TLSError::InternalError("no message body"))?;
        body.set_up_message(state)?;
        self.bind_to(state);
        if let Some(body) = self.body.as_ref() {
            let length = body.len();
            if length > MAX_BODY_LENGTH {
                return Err(errors::TLSError::LengthOverflowError {
                    declared: length,
                    max: MAX_BODY_LENGTH,
                });
            }
        }
        let bytes = self.pack();
        trace!("sending {:?} ({} bytes)", msg_type, bytes.len());
        if msg_type != HandshakeType::HelloRequest {
            state.append_transcript(&bytes)?;
        }
        Ok(bytes)
    }
}

impl Pack for HandshakeMessage {
    fn empty() -> Self {
        Self::new()
    }

    fn pack(&self) -> Vec<u8> {
        let body = match self.body.as_ref() {
            Some(body) => body,
            None => return Vec::new(),
        };
        let msg_type = body.msg_type();
        let payload = body.pack();
        let mut v = Vec::with_capacity(4 + payload.len());
        if self.is_sslv2() {
            v.push(msg_type.to_sslv2().unwrap_or(msg_type as u8));
        } else {
            v.push(msg_type as u8);
            pack::write_length(&mut v, 3, payload.len());
        }
        v.extend_from_slice(&payload);
        v
    }

    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        let mut body_bytes = pack::take_front(v, 1)?;
        let tag = v[0];
        let msg_type = if self.is_sslv2() {
            HandshakeType::from_sslv2(tag).ok_or(errors::TLSError::InvalidHandshakeTypeError(tag))?
        } else {
            HandshakeType::from_u8(tag).ok_or(errors::TLSError::InvalidHandshakeTypeError(tag))?
        };
        self.set_message(msg_type);

        let rest = if self.is_sslv2() {
            Vec::new()
        } else {
            let (length, mut field) = pack::read_length(&mut body_bytes, 3)?;
            let rest = pack::take_front(&mut field, length)?;
            body_bytes = field;
            rest
        };

        let body = self.body.as_mut().ok_or(errors::TLSError::InternalError("no message body"))?;
        let trailing = body.unpack(&mut body_bytes)?;
        if !trailing.is_empty() && msg_type != HandshakeType::ClientHello {
            return Err(errors::TLSError::TrailingDataError(msg_type));
        }
        Ok(rest)
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::TLSError;
    use crate::exchange::{Finished, ServerHelloDone};
    use crate::handshake::{HandshakeBody, HandshakeMessage, HandshakeType};
    use crate::pack::Pack;
    use crate::version;

    #[test]
    fn handshake_type_codes() {
        assert_eq!(HandshakeType::Certificate.pack(), vec![11]);
        assert_eq!(HandshakeType::CertificateStatus.pack(), vec![22]);
        assert_eq!(HandshakeType::NextProtocol.pack(), vec![67]);
        let mut tag = HandshakeType::empty();
        assert!(matches!(tag.unpack(&mut vec![3]), Err(TLSError::InvalidHandshakeTypeError(3))));
    }

    #[test]
    fn set_message_keeps_body_for_same_tag() {
        let mut message = HandshakeMessage::new();
        message.set_message(HandshakeType::Finished);
        let first = message.body().expect("no body") as *const HandshakeBody;
        message.set_message(HandshakeType::Finished);
        let second = message.body().expect("no body") as *const HandshakeBody;
        assert!(std::ptr::eq(first, second));

        message.set_message(HandshakeType::ServerHelloDone);
        assert_eq!(message.msg_type(), Some(HandshakeType::ServerHelloDone));
        assert_eq!(message.body(), Some(&HandshakeBody::ServerHelloDone(ServerHelloDone)));
    }

    #[test]
    fn envelope_has_tag_and_u24_length() {
        let mut message = HandshakeMessage::new();
        message.set_message(HandshakeType::Finished);
        if let Some(HandshakeBody::Finished(finished)) = message.body_mut() {
            *finished = Finished::new(vec![0xab; 12]);
        }
        let packed = message.pack();
        assert_eq!(&packed[..4], &[20, 0, 0, 12]);
        assert_eq!(packed.len(), 16);

        let mut decoded = HandshakeMessage::new();
        decoded.decode(&packed).expect("decode failed");
        assert_eq!(decoded.body(), Some(&HandshakeBody::Finished(Finished::new(vec![0xab; 12]))));
    }

    #[test]
    fn truncated_body_is_rejected() {
        let mut message = HandshakeMessage::new();
        let err = message.decode(&[20, 0, 0, 12, 1, 2, 3]).expect_err("short body decoded");
        assert!(matches!(err, TLSError::TruncatedError { needed: 12, available: 3 }));
    }

    #[test]
    fn trailing_bytes_after_server_hello_are_rejected() {
        let mut body = vec![3, 3];
        body.extend_from_slice(&[0x22; 32]);
        body.extend_from_slice(&[0, 0x00, 0x2f, 0]);
        body.extend_from_slice(&[0, 0]); // empty extension block
        body.push(0x99);
        let mut bytes = vec![2, 0, 0, body.len() as u8];
        bytes.extend_from_slice(&body);

        let err = HandshakeMessage::new().decode(&bytes).expect_err("trailing data accepted");
        assert!(matches!(err, TLSError::TrailingDataError(HandshakeType::ServerHello)));
    }

    #[test]
    fn trailing_bytes_after_client_hello_are_tolerated() {
        let mut body = vec![3, 3];
        body.extend_from_slice(&[0x22; 32]);
        body.extend_from_slice(&[0, 0, 2, 0x00, 0x2f, 1, 0]);
        body.extend_from_slice(&[0, 0]);
        body.extend_from_slice(&[0xde, 0xad]);
        let mut bytes = vec![1, 0, 0, body.len() as u8];
        bytes.extend_from_slice(&body);

        let mut message = HandshakeMessage::new();
        message.decode(&bytes).expect("ClientHello with trailing bytes rejected");
        assert_eq!(message.msg_type(), Some(HandshakeType::ClientHello));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = HandshakeMessage::new().decode(&[3, 0, 0, 0]).expect_err("HelloVerifyRequest decoded");
        assert!(matches!(err, TLSError::InvalidHandshakeTypeError(3)));
    }

    #[test]
    fn sslv2_framing_has_no_length() {
        let mut body = vec![3, 1];
        body.extend_from_slice(&[0x33; 32]);
        body.extend_from_slice(&[0, 0, 2, 0x00, 0x2f, 1, 0]);
        let mut bytes = vec![1];
        bytes.extend_from_slice(&body);

        let mut message = HandshakeMessage::new();
        message.bind(version::SSL_2_0, None);
        message.decode(&bytes).expect("SSLv2 framed hello rejected");
        assert_eq!(message.msg_type(), Some(HandshakeType::ClientHello));
        assert_eq!(message.pack(), bytes);

        let err = message.decode(&[2]).expect_err("SSLv2 tag 2 decoded");
        assert!(matches!(err, TLSError::InvalidHandshakeTypeError(2)));
    }
}
