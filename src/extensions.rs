use crate::errors;
use crate::fields;
use crate::pack::{self, Pack};

use num_traits::FromPrimitive;
use std::net::Ipv6Addr;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Primitive)]
#[repr(u16)]
pub enum ExtensionType {
    ServerName = 0,
    StatusRequest = 5,
    SignatureAlgorithms = 13,
    NextProtocolNegotiation = 13172,
    RenegotiationInfo = 0xff01,
}

pub type ExtensionData = fields::VarOpaque<2, 0xffff>;

/// One `(type, opaque data)` entry. Unknown types are kept as raw numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub extension_type: fields::Uint16,
    pub extension_data: ExtensionData,
}

impl Extension {
    pub fn new(extension_type: ExtensionType, data: Vec<u8>) -> Result<Self, errors::TLSError> {
        Ok(Self {
            extension_type: fields::Uint16(extension_type as u16),
            extension_data: ExtensionData::new(data)?,
        })
    }

    pub fn kind(&self) -> Option<ExtensionType> {
        ExtensionType::from_u16(self.extension_type.0)
    }
}

impl Pack for Extension {
    fn empty() -> Self {
        Self {
            extension_type: fields::Uint16::empty(),
            extension_data: ExtensionData::empty(),
        }
    }

    fn pack(&self) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&self.extension_type.pack());
        v.extend_from_slice(&self.extension_data.pack());
        v
    }

    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        let mut v = self.extension_type.unpack(v)?;
        self.extension_data.unpack(&mut v)
    }
}

/// The optional extension block of the hello messages.
/// An absent block and an empty block are different on the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtensionList {
    pub present: bool,
    extensions: fields::VarList<Extension, 2, 0xffff>,
}

impl ExtensionList {
    pub fn new(extensions: Vec<Extension>) -> Result<Self, errors::TLSError> {
        Ok(Self {
            present: true,
            extensions: fields::VarList::new(extensions)?,
        })
    }

    pub fn absent() -> Self {
        Self::default()
    }

    pub fn extensions(&self) -> &[Extension] {
        self.extensions.items()
    }

    pub fn find(&self, kind: ExtensionType) -> Option<&Extension> {
        self.extensions().iter().find(|e| e.extension_type.0 == kind as u16)
    }
}

impl Pack for ExtensionList {
    fn empty() -> Self {
        Self::absent()
    }

    fn pack(&self) -> Vec<u8> {
        if self.present {
            self.extensions.pack()
        } else {
            Vec::new()
        }
    }

    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        if v.is_empty() {
            *self = Self::absent();
            return Ok(Vec::new());
        }
        self.present = true;
        self.extensions.unpack(v)
    }
}

//
// Typed extension payloads
//

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SignatureAndHash {
    pub hash: u8,
    pub signature: u8,
}

pub const HASH_MD5: u8 = 1;
pub const HASH_SHA1: u8 = 2;
pub const HASH_SHA256: u8 = 4;
pub const HASH_SHA384: u8 = 5;
pub const HASH_SHA512: u8 = 6;

pub const SIGNATURE_ANONYMOUS: u8 = 0;
pub const SIGNATURE_RSA: u8 = 1;
pub const SIGNATURE_DSA: u8 = 2;
pub const SIGNATURE_ECDSA: u8 = 3;

impl SignatureAndHash {
    pub const fn new(hash: u8, signature: u8) -> Self {
        Self { hash, signature }
    }
}

impl Pack for SignatureAndHash {
    fn empty() -> Self {
        Self::new(0, 0)
    }

    fn pack(&self) -> Vec<u8> {
        vec![self.hash, self.signature]
    }

    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        let rest = pack::take_front(v, 2)?;
        self.hash = v[0];
        self.signature = v[1];
        Ok(rest)
    }
}

pub type SignatureAlgorithmList = fields::VarList<SignatureAndHash, 2, 0xfffe>;

pub const NAME_TYPE_HOST_NAME: u8 = 0;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerName {
    pub name_type: fields::Uint8,
    pub host_name: fields::VarOpaque<2, 0xffff>,
}

impl Pack for ServerName {
    fn empty() -> Self {
        Self {
            name_type: fields::Uint8(NAME_TYPE_HOST_NAME),
            host_name: fields::VarOpaque::empty(),
        }
    }

    fn pack(&self) -> Vec<u8> {
        let mut v = self.name_type.pack();
        v.extend_from_slice(&self.host_name.pack());
        v
    }

    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        let mut v = self.name_type.unpack(v)?;
        self.host_name.unpack(&mut v)
    }
}

pub type ServerNameList = fields::VarList<ServerName, 2, 0xffff>;

/// Literal addresses never go into SNI: `[v6]`, dotted IPv4 and bare v6 forms.
pub fn is_literal_address(host: &str) -> bool {
    if host.starts_with('[') {
        return true;
    }
    if host.parse::<Ipv6Addr>().is_ok() {
        return true;
    }
    !host.is_empty() && host.chars().all(|c| c.is_ascii_digit() || c == '.')
}

pub fn server_name(host: &str) -> Result<Extension, errors::TLSError> {
    let name = ServerName {
        name_type: fields::Uint8(NAME_TYPE_HOST_NAME),
        host_name: fields::VarOpaque::new(host.trim_end_matches('.').as_bytes().to_vec())?,
    };
    let list = ServerNameList::new(vec![name])?;
    Extension::new(ExtensionType::ServerName, list.pack())
}

pub type RenegotiatedConnection = fields::VarOpaque<1, 255>;

pub fn renegotiation_info(renegotiated_connection: &[u8]) -> Result<Extension, errors::TLSError> {
    let value = RenegotiatedConnection::new(renegotiated_connection.to_vec())?;
    Extension::new(ExtensionType::RenegotiationInfo, value.pack())
}

pub const STATUS_TYPE_OCSP: u8 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateStatusRequest {
    pub status_type: fields::Uint8,
    pub responder_id_list: fields::VarOpaque<2, 0xffff>,
    pub request_extensions: fields::VarOpaque<2, 0xffff>,
}

impl Pack for CertificateStatusRequest {
    fn empty() -> Self {
        Self {
            status_type: fields::Uint8(STATUS_TYPE_OCSP),
            responder_id_list: fields::VarOpaque::empty(),
            request_extensions: fields::VarOpaque::empty(),
        }
    }

    fn pack(&self) -> Vec<u8> {
        let mut v = self.status_type.pack();
        v.extend_from_slice(&self.responder_id_list.pack());
        v.extend_from_slice(&self.request_extensions.pack());
        v
    }

    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        let mut v = self.status_type.unpack(v)?;
        let mut v = self.responder_id_list.unpack(&mut v)?;
        self.request_extensions.unpack(&mut v)
    }
}

pub fn status_request(request_extensions: &[u8]) -> Result<Extension, errors::TLSError> {
    let request = CertificateStatusRequest {
        status_type: fields::Uint8(STATUS_TYPE_OCSP),
        responder_id_list: fields::VarOpaque::empty(),
        request_extensions: fields::VarOpaque::new(request_extensions.to_vec())?,
    };
    Extension::new(ExtensionType::StatusRequest, request.pack())
}

pub fn signature_algorithms(algorithms: &[SignatureAndHash]) -> Result<Extension, errors::TLSError> {
    let list = SignatureAlgorithmList::new(algorithms.to_vec())?;
    Extension::new(ExtensionType::SignatureAlgorithms, list.pack())
}

/// The client announces NPN with an empty payload.
pub fn next_protocol_negotiation() -> Result<Extension, errors::TLSError> {
    Extension::new(ExtensionType::NextProtocolNegotiation, Vec::new())
}

pub type ProtocolName = fields::VarOpaque<1, 255>;

/// What the server said back, one slot per extension type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerExtensions {
    pub server_name_acknowledged: bool,
    pub renegotiation_info: Option<Vec<u8>>,
    pub status_request_acknowledged: bool,
    pub next_protocols: Option<Vec<Vec<u8>>>,
}

impl ServerExtensions {
    /// Parses a ServerHello extension block against the types the client sent.
    /// Unknown types and duplicates are decode errors; known but unrequested types are unsupported.
    pub fn parse(list: &ExtensionList, sent: &[ExtensionType]) -> Result<Self, errors::TLSError> {
        let mut parsed = Self::default();
        let mut seen: Vec<u16> = Vec::new();

        for extension in list.extensions() {
            let id = extension.extension_type.0;
            if seen.contains(&id) {
                return Err(errors::TLSError::DuplicateExtension(id));
            }
            seen.push(id);

            let kind = extension
                .kind()
                .ok_or(errors::TLSError::DecodeError("unknown extension in server response"))?;
            if !sent.contains(&kind) {
                return Err(errors::TLSError::UnsupportedExtension(id));
            }

            let data = extension.extension_data.as_slice();
            match kind {
                ExtensionType::ServerName => {
                    if !data.is_empty() {
                        return Err(errors::TLSError::DecodeError("server_name acknowledgement must be empty"));
                    }
                    parsed.server_name_acknowledged = true;
                }
                ExtensionType::StatusRequest => {
                    if !data.is_empty() {
                        return Err(errors::TLSError::DecodeError("status_request acknowledgement must be empty"));
                    }
                    parsed.status_request_acknowledged = true;
                }
                ExtensionType::RenegotiationInfo => {
                    let mut value = RenegotiatedConnection::empty();
                    let rest = value.unpack(&mut data.to_vec())?;
                    if !rest.is_empty() {
                        return Err(errors::TLSError::DecodeError("trailing bytes in renegotiation_info"));
                    }
                    parsed.renegotiation_info = Some(value.into_inner());
                }
                ExtensionType::NextProtocolNegotiation => {
                    let mut protocols: fields::NetVec<ProtocolName> = fields::NetVec::empty();
                    protocols.unpack(&mut data.to_vec())?;
                    parsed.next_protocols = Some(protocols.into_iter().map(|p| p.into_inner()).collect());
                }
                ExtensionType::SignatureAlgorithms => {
                    return Err(errors::TLSError::UnsupportedExtension(id));
                }
            }
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::TLSError;
    use crate::extensions::{self, Extension, ExtensionList, ExtensionType, ServerExtensions, SignatureAndHash};
    use crate::fields;
    use crate::pack::Pack;
    use crate::pack_unpack_inverse_test;

    const SENT: &[ExtensionType] = &[
        ExtensionType::ServerName,
        ExtensionType::RenegotiationInfo,
        ExtensionType::StatusRequest,
        ExtensionType::SignatureAlgorithms,
        ExtensionType::NextProtocolNegotiation,
    ];

    pack_unpack_inverse_test!(
        extension_list_pack_unpack_inverse_test,
        ExtensionList::new(vec![
            extensions::server_name("www.opera.com").expect("server_name failed"),
            extensions::renegotiation_info(&[]).expect("renegotiation_info failed"),
        ])
        .expect("building ExtensionList failed")
    );

    #[test]
    fn server_name_wire_form() {
        let extension = extensions::server_name("a.b").expect("server_name failed");
        assert_eq!(hex::encode(extension.pack()), "000000080006000003612e62");
    }

    #[test]
    fn literal_addresses_are_detected() {
        assert!(extensions::is_literal_address("[::1]"));
        assert!(extensions::is_literal_address("::1"));
        assert!(extensions::is_literal_address("192.168.0.1"));
        assert!(!extensions::is_literal_address("example.com"));
        assert!(!extensions::is_literal_address("1.example"));
    }

    #[test]
    fn unknown_extension_is_passed_through_on_decode() {
        let mut bytes = hex::decode("0009abcd0000ff01000100").expect("hex decode failed");
        let mut list = ExtensionList::empty();
        list.unpack(&mut bytes).expect("unpack failed");
        assert_eq!(list.extensions().len(), 2);
        assert_eq!(list.extensions()[0].kind(), None);
        assert_eq!(list.extensions()[0].extension_type, fields::Uint16(0xabcd));
    }

    #[test]
    fn unknown_extension_in_server_response_is_a_decode_error() {
        let list = ExtensionList::new(vec![Extension {
            extension_type: fields::Uint16(0xabcd),
            extension_data: extensions::ExtensionData::empty(),
        }])
        .expect("building list failed");
        let err = ServerExtensions::parse(&list, SENT).expect_err("unknown extension accepted");
        assert!(matches!(err, TLSError::DecodeError(_)));
    }

    #[test]
    fn duplicate_extension_is_a_decode_error() {
        let list = ExtensionList::new(vec![
            extensions::renegotiation_info(&[]).expect("renegotiation_info failed"),
            extensions::renegotiation_info(&[]).expect("renegotiation_info failed"),
        ])
        .expect("building list failed");
        let err = ServerExtensions::parse(&list, SENT).expect_err("duplicate accepted");
        assert!(matches!(err, TLSError::DuplicateExtension(0xff01)));
        assert_eq!(err.alert_description(), crate::alert::AlertDescription::DecodeError);
    }

    #[test]
    fn unrequested_extension_is_unsupported() {
        let list = ExtensionList::new(vec![extensions::next_protocol_negotiation().expect("npn failed")]).expect("building list failed");
        let err = ServerExtensions::parse(&list, &[ExtensionType::RenegotiationInfo]).expect_err("unrequested accepted");
        assert!(matches!(err, TLSError::UnsupportedExtension(13172)));
    }

    #[test]
    fn status_request_ack_must_be_empty() {
        let list = ExtensionList::new(vec![Extension::new(ExtensionType::StatusRequest, vec![1]).expect("extension failed")])
            .expect("building list failed");
        assert!(ServerExtensions::parse(&list, SENT).is_err());

        let list = ExtensionList::new(vec![Extension::new(ExtensionType::StatusRequest, vec![]).expect("extension failed")])
            .expect("building list failed");
        let parsed = ServerExtensions::parse(&list, SENT).expect("parse failed");
        assert!(parsed.status_request_acknowledged);
    }

    #[test]
    fn server_protocols_are_parsed() {
        let list = ExtensionList::new(vec![Extension::new(
            ExtensionType::NextProtocolNegotiation,
            b"\x08http/1.1\x06spdy/2".to_vec(),
        )
        .expect("extension failed")])
        .expect("building list failed");
        let parsed = ServerExtensions::parse(&list, SENT).expect("parse failed");
        assert_eq!(parsed.next_protocols, Some(vec![b"http/1.1".to_vec(), b"spdy/2".to_vec()]));
    }

    #[test]
    fn absent_block_packs_to_nothing() {
        assert!(ExtensionList::absent().pack().is_empty());
        let empty = ExtensionList::new(Vec::new()).expect("building list failed");
        assert_eq!(empty.pack(), vec![0, 0]);
    }

    #[test]
    fn signature_algorithms_payload() {
        let extension = extensions::signature_algorithms(&[SignatureAndHash::new(extensions::HASH_SHA256, extensions::SIGNATURE_RSA)])
            .expect("signature_algorithms failed");
        assert_eq!(extension.extension_data.as_slice(), &[0x00, 0x02, 0x04, 0x01]);
    }
}
