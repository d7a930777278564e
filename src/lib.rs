//!# TLS handshake
//! The client half of the SSL 3.0 / TLS 1.0-1.2 handshake.
//!
//! This crate encodes and decodes handshake messages, drives the client state
//! machine from ClientHello to Finished and keeps a shared session cache for
//! resumption. Record protection, the transport and certificate path validation
//! live outside; the handshake reaches them through `CryptoProvider` and
//! `CertificateHandler`.
//!
//! A connection is driven by feeding received handshake messages to
//! `HandshakeMessage::receive` and sending what `HandshakeMessage::send` produces,
//! acting on the returned `KeaAction` and the alerts queued on the `ConnectionState`.
//!

#[macro_use]
extern crate enum_primitive_derive;
extern crate num_traits;

pub mod alert;
pub mod certificate;
pub mod cipher;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod exchange;
pub mod extensions;
pub mod fields;
pub mod handshake;
pub mod hello;
pub mod key_exchange;
pub mod pack;
pub mod session;
pub mod state;
pub mod version;

pub use crate::config::{HandshakeConfig, HandshakeContext};
pub use crate::errors::TLSError;
pub use crate::handshake::{HandshakeMessage, HandshakeType, KeaAction};
pub use crate::state::{ConnectionState, HandshakePhase};
