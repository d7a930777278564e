use crate::cipher::{CipherDescription, PRFAlgorithm, SecurityRating};
use crate::errors;
use crate::extensions::{self, SignatureAndHash};
use crate::session::LowSecurityReason;
use crate::version::ProtocolVersion;

use num_bigint_dig::BigUint;
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use ring::signature;
use sha2::{Digest, Sha256, Sha384};
use std::fmt;
use zeroize::Zeroizing;

pub const VERIFY_DATA_LENGTH: usize = 12;
pub const MASTER_SECRET_STR: &[u8; 13] = b"master secret";
pub const MASTER_SECRET_LEN: usize = 48;
pub const KEY_BLOCK_STR: &[u8; 13] = b"key expansion";
pub const CLIENT_FINISHED_LABEL: &[u8; 15] = b"client finished";
pub const SERVER_FINISHED_LABEL: &[u8; 15] = b"server finished";

pub const PRE_MASTER_SECRET_LEN: usize = 48;

//
// PRF and key derivation
//

fn concat_sign(key: &hmac::Key, a: &[u8], b: &[u8]) -> hmac::Tag {
    let mut ctx = hmac::Context::with_key(key);
    ctx.update(a);
    ctx.update(b);
    ctx.sign()
}

/// P_hash from RFC 5246 section 5 over `label ‖ seed`.
pub fn p_hash(algorithm: hmac::Algorithm, output_length: usize, secret: &[u8], label: &[u8], seed: &[u8]) -> Vec<u8> {
    // A(0) = seed
    // A(i) = HMAC_hash(secret, A(i-1))
    let a_0 = &[label, seed].concat();
    let key = hmac::Key::new(algorithm, secret);
    let mut a_prev = hmac::sign(&key, a_0);

    let mut result = Vec::with_capacity(output_length);
    while result.len() < output_length {
        // HMAC_hash(secret, A(n) + seed)
        let p_hash = concat_sign(&key, a_prev.as_ref(), a_0);
        result.extend_from_slice(p_hash.as_ref());
        a_prev = hmac::sign(&key, a_prev.as_ref());
    }
    result.truncate(output_length);
    result
}

pub fn prf(
    algorithm: PRFAlgorithm,
    version: ProtocolVersion,
    provider: &dyn CryptoProvider,
    secret: &[u8],
    label: &[u8],
    seed: &[u8],
    output_length: usize,
) -> Result<Vec<u8>, errors::TLSError> {
    match algorithm {
        PRFAlgorithm::TlsPrfSha256 => Ok(p_hash(hmac::HMAC_SHA256, output_length, secret, label, seed)),
        PRFAlgorithm::TlsPrfSha384 => Ok(p_hash(hmac::HMAC_SHA384, output_length, secret, label, seed)),
        PRFAlgorithm::Legacy => provider.legacy_prf(version, secret, label, seed, output_length),
    }
}

//master_secret = PRF(pre_master_secret, "master secret", ClientHello.random + ServerHello.random)[0..47];
pub fn master_secret(
    algorithm: PRFAlgorithm,
    version: ProtocolVersion,
    provider: &dyn CryptoProvider,
    pre_master_secret: &[u8],
    client_random: &[u8],
    server_random: &[u8],
) -> Result<Zeroizing<Vec<u8>>, errors::TLSError> {
    let seed = [client_random, server_random].concat();
    let secret = prf(algorithm, version, provider, pre_master_secret, MASTER_SECRET_STR, &seed, MASTER_SECRET_LEN)?;
    if secret.len() != MASTER_SECRET_LEN {
        return Err(errors::TLSError::InternalError("PRF returned a short master secret"));
    }
    Ok(Zeroizing::new(secret))
}

/// Handshake hash for the suite PRF. Only defined for the TLS 1.2 PRFs.
pub fn transcript_hash(algorithm: PRFAlgorithm, transcript: &[u8]) -> Result<Vec<u8>, errors::TLSError> {
    match algorithm {
        PRFAlgorithm::TlsPrfSha256 => {
            let mut hash = Sha256::new();
            hash.input(transcript);
            Ok(hash.result().to_vec())
        }
        PRFAlgorithm::TlsPrfSha384 => {
            let mut hash = Sha384::new();
            hash.input(transcript);
            Ok(hash.result().to_vec())
        }
        PRFAlgorithm::Legacy => Err(errors::TLSError::UnsupportedAlgorithm("legacy handshake hash")),
    }
}

pub fn verify_data(
    algorithm: PRFAlgorithm,
    version: ProtocolVersion,
    provider: &dyn CryptoProvider,
    master_secret: &[u8],
    finished_label: &[u8],
    transcript: &[u8],
) -> Result<Vec<u8>, errors::TLSError> {
    match algorithm {
        PRFAlgorithm::Legacy => provider.legacy_finished(version, master_secret, finished_label, transcript),
        _ => {
            let handshake_hash = transcript_hash(algorithm, transcript)?;
            prf(algorithm, version, provider, master_secret, finished_label, &handshake_hash, VERIFY_DATA_LENGTH)
        }
    }
}

pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    ring::constant_time::verify_slices_are_equal(a, b).is_ok()
}

pub struct KeyBlock {
    pub client_write_mac_key: Zeroizing<Vec<u8>>,
    pub server_write_mac_key: Zeroizing<Vec<u8>>,
    pub client_write_key: Zeroizing<Vec<u8>>,
    pub server_write_key: Zeroizing<Vec<u8>>,
    pub client_write_iv: Vec<u8>,
    pub server_write_iv: Vec<u8>,
}

impl KeyBlock {
    pub fn derive(
        cipher: &CipherDescription,
        version: ProtocolVersion,
        provider: &dyn CryptoProvider,
        master_secret: &[u8],
        client_random: &[u8],
        server_random: &[u8],
    ) -> Result<Self, errors::TLSError> {
        let mac_key_length = cipher.mac_key_length as usize;
        let write_key_length = cipher.enc_key_length as usize;
        let write_iv_length = cipher.fixed_iv_length_for(version);
        let total_length = cipher.key_block_length(version);

        let seed = [server_random, client_random].concat();
        let unparsed_block = Zeroizing::new(prf(
            cipher.prf_for(version),
            version,
            provider,
            master_secret,
            KEY_BLOCK_STR,
            &seed,
            total_length,
        )?);
        if unparsed_block.len() < total_length {
            return Err(errors::TLSError::InternalError("PRF returned a short key block"));
        }

        let mut i = 0;
        let mut next = |n: usize| {
            let part = unparsed_block[i..i + n].to_vec();
            i += n;
            part
        };
        Ok(Self {
            client_write_mac_key: Zeroizing::new(next(mac_key_length)),
            server_write_mac_key: Zeroizing::new(next(mac_key_length)),
            client_write_key: Zeroizing::new(next(write_key_length)),
            server_write_key: Zeroizing::new(next(write_key_length)),
            client_write_iv: next(write_iv_length),
            server_write_iv: next(write_iv_length),
        })
    }
}

//
// Finite field Diffie-Hellman
//

/// Server DH parameters: prime, generator and the server public value Ys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DhParams {
    pub p: Vec<u8>,
    pub g: Vec<u8>,
    pub ys: Vec<u8>,
}

impl DhParams {
    pub fn prime_bits(&self) -> usize {
        BigUint::from_bytes_be(&self.p).bits()
    }

    /// Rejects short primes and generator/public values outside (1, p-1).
    pub fn check(&self, min_prime_bits: usize) -> Result<(), errors::TLSError> {
        let p = BigUint::from_bytes_be(&self.p);
        if p.bits() < min_prime_bits {
            return Err(errors::TLSError::InsufficientSecurity("DH prime is too short"));
        }
        let one = BigUint::from(1u32);
        if p <= one {
            return Err(errors::TLSError::IllegalParameter("DH prime too small"));
        }
        let p_minus_one = &p - &one;
        for value in &[&self.g, &self.ys] {
            let value = BigUint::from_bytes_be(value);
            if value <= one || value >= p_minus_one {
                return Err(errors::TLSError::IllegalParameter("DH value outside (1, p-1)"));
            }
        }
        Ok(())
    }
}

/// Returns the private exponent and Yc = g^x mod p. Call `check` first.
pub fn dh_key_pair(params: &DhParams, provider: &dyn CryptoProvider) -> Result<(Zeroizing<Vec<u8>>, Vec<u8>), errors::TLSError> {
    let p = BigUint::from_bytes_be(&params.p);
    let two = BigUint::from(2u32);
    if p <= BigUint::from(4u32) {
        return Err(errors::TLSError::IllegalParameter("DH prime too small"));
    }
    let mut random = Zeroizing::new(vec![0; params.p.len()]);
    provider.fill_random(&mut random)?;
    // x in [2, p-2]
    let x = BigUint::from_bytes_be(&random) % (&p - &BigUint::from(3u32)) + &two;
    let public = BigUint::from_bytes_be(&params.g).modpow(&x, &p);
    Ok((Zeroizing::new(x.to_bytes_be()), public.to_bytes_be()))
}

/// Z = Ys^x mod p, leading zero bytes stripped.
pub fn dh_shared_secret(params: &DhParams, private: &[u8]) -> Result<Zeroizing<Vec<u8>>, errors::TLSError> {
    let p = BigUint::from_bytes_be(&params.p);
    if p <= BigUint::from(1u32) {
        return Err(errors::TLSError::IllegalParameter("DH prime too small"));
    }
    let z = BigUint::from_bytes_be(&params.ys).modpow(&BigUint::from_bytes_be(private), &p);
    Ok(Zeroizing::new(z.to_bytes_be()))
}

//
// Collaborator boundary
//

/// How a signed handshake field is hashed and signed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignatureScheme {
    /// MD5 ‖ SHA-1 digest, PKCS#1 type 1 without DigestInfo (before TLS 1.2).
    RsaPkcs1Md5Sha1,
    DsaSha1,
    EcdsaSha1,
    Tls12(SignatureAndHash),
}

impl SignatureScheme {
    pub fn signature_algorithm(&self) -> u8 {
        match self {
            SignatureScheme::RsaPkcs1Md5Sha1 => extensions::SIGNATURE_RSA,
            SignatureScheme::DsaSha1 => extensions::SIGNATURE_DSA,
            SignatureScheme::EcdsaSha1 => extensions::SIGNATURE_ECDSA,
            SignatureScheme::Tls12(pair) => pair.signature,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PeerPublicKey {
    Rsa { modulus: Vec<u8>, exponent: Vec<u8> },
    Dsa { der: Vec<u8> },
    /// Uncompressed point on P-256 or P-384.
    Ecdsa { point: Vec<u8> },
    Dh(DhParams),
}

impl PeerPublicKey {
    pub fn signature_algorithm(&self) -> Option<u8> {
        match self {
            PeerPublicKey::Rsa { .. } => Some(extensions::SIGNATURE_RSA),
            PeerPublicKey::Dsa { .. } => Some(extensions::SIGNATURE_DSA),
            PeerPublicKey::Ecdsa { .. } => Some(extensions::SIGNATURE_ECDSA),
            PeerPublicKey::Dh(_) => None,
        }
    }
}

/// A certificate chain the user may present, with its private key.
#[derive(Clone)]
pub struct ClientCertificate {
    pub label: String,
    pub chain: Vec<Vec<u8>>,
    /// One of the `extensions::SIGNATURE_*` values.
    pub signature_algorithm: u8,
    pub private_key_pkcs8: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for ClientCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCertificate")
            .field("label", &self.label)
            .field("chain_length", &self.chain.len())
            .field("signature_algorithm", &self.signature_algorithm)
            .finish()
    }
}

/// What the server asked for in CertificateRequest.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CertificateRequestInfo {
    pub certificate_types: Vec<u8>,
    pub signature_algorithms: Vec<SignatureAndHash>,
    pub authorities: Vec<Vec<u8>>,
}

#[derive(Clone, Debug)]
pub struct CertificateVerdict {
    pub validated_chain: Vec<Vec<u8>>,
    pub security_rating: SecurityRating,
    pub low_security_reason: LowSecurityReason,
    pub peer_key: PeerPublicKey,
}

/// Cryptographic primitives the handshake calls into.
pub trait CryptoProvider: Send + Sync {
    fn fill_random(&self, buf: &mut [u8]) -> Result<(), errors::TLSError>;

    fn verify_signature(
        &self,
        key: &PeerPublicKey,
        scheme: SignatureScheme,
        message: &[u8],
        signature: &[u8],
    ) -> Result<bool, errors::TLSError>;

    fn sign(&self, certificate: &ClientCertificate, scheme: SignatureScheme, message: &[u8]) -> Result<Vec<u8>, errors::TLSError>;

    fn rsa_encrypt(&self, key: &PeerPublicKey, plaintext: &[u8]) -> Result<Vec<u8>, errors::TLSError>;

    /// Whether `legacy_prf`, `legacy_finished` and the MD5/SHA-1 signature schemes are
    /// implemented. Without them the handshake refuses anything below TLS 1.2.
    fn supports_legacy_versions(&self) -> bool {
        false
    }

    /// MD5/SHA-1 PRF of TLS 1.0 and 1.1, or the SSL 3.0 key derivation.
    fn legacy_prf(
        &self,
        _version: ProtocolVersion,
        _secret: &[u8],
        _label: &[u8],
        _seed: &[u8],
        _output_length: usize,
    ) -> Result<Vec<u8>, errors::TLSError> {
        Err(errors::TLSError::UnsupportedAlgorithm("legacy PRF"))
    }

    fn legacy_finished(
        &self,
        _version: ProtocolVersion,
        _master_secret: &[u8],
        _label: &[u8],
        _transcript: &[u8],
    ) -> Result<Vec<u8>, errors::TLSError> {
        Err(errors::TLSError::UnsupportedAlgorithm("legacy Finished"))
    }
}

/// Chain validation and client certificate lookup.
pub trait CertificateHandler: Send + Sync {
    fn validate_chain(&self, server_name: &str, chain: &[Vec<u8>]) -> Result<CertificateVerdict, errors::TLSError>;

    fn client_certificate_candidates(&self, request: &CertificateRequestInfo) -> Vec<ClientCertificate>;
}

/// `CryptoProvider` backed by ring, with RSA encryption on num-bigint-dig.
pub struct RingProvider {
    rng: SystemRandom,
}

impl RingProvider {
    pub fn new() -> Self {
        Self { rng: SystemRandom::new() }
    }
}

impl Default for RingProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn strip_leading_zeros(v: &[u8]) -> &[u8] {
    let start = v.iter().position(|b| *b != 0).unwrap_or(v.len());
    &v[start..]
}

fn rsa_verification_parameters(hash: u8) -> Option<&'static signature::RsaParameters> {
    match hash {
        extensions::HASH_SHA1 => Some(&signature::RSA_PKCS1_2048_8192_SHA1_FOR_LEGACY_USE_ONLY),
        extensions::HASH_SHA256 => Some(&signature::RSA_PKCS1_2048_8192_SHA256),
        extensions::HASH_SHA384 => Some(&signature::RSA_PKCS1_2048_8192_SHA384),
        extensions::HASH_SHA512 => Some(&signature::RSA_PKCS1_2048_8192_SHA512),
        _ => None,
    }
}

fn ecdsa_verification_algorithm(hash: u8) -> Option<&'static signature::EcdsaVerificationAlgorithm> {
    match hash {
        extensions::HASH_SHA256 => Some(&signature::ECDSA_P256_SHA256_ASN1),
        extensions::HASH_SHA384 => Some(&signature::ECDSA_P384_SHA384_ASN1),
        _ => None,
    }
}

impl CryptoProvider for RingProvider {
    fn fill_random(&self, buf: &mut [u8]) -> Result<(), errors::TLSError> {
        self.rng.fill(buf).map_err(|_| errors::TLSError::UnspecifiedRingError)
    }

    fn verify_signature(
        &self,
        key: &PeerPublicKey,
        scheme: SignatureScheme,
        message: &[u8],
        signature: &[u8],
    ) -> Result<bool, errors::TLSError> {
        let pair = match scheme {
            SignatureScheme::Tls12(pair) => pair,
            _ => return Err(errors::TLSError::UnsupportedAlgorithm("pre-TLS 1.2 signature")),
        };
        match key {
            PeerPublicKey::Rsa { modulus, exponent } if pair.signature == extensions::SIGNATURE_RSA => {
                let parameters = rsa_verification_parameters(pair.hash).ok_or(errors::TLSError::UnsupportedAlgorithm("RSA hash"))?;
                let components = signature::RsaPublicKeyComponents {
                    n: strip_leading_zeros(modulus),
                    e: strip_leading_zeros(exponent),
                };
                Ok(components.verify(parameters, message, signature).is_ok())
            }
            PeerPublicKey::Ecdsa { point } if pair.signature == extensions::SIGNATURE_ECDSA => {
                let algorithm = ecdsa_verification_algorithm(pair.hash).ok_or(errors::TLSError::UnsupportedAlgorithm("ECDSA hash"))?;
                let key = signature::UnparsedPublicKey::new(algorithm, point);
                Ok(key.verify(message, signature).is_ok())
            }
            _ => Err(errors::TLSError::UnsupportedAlgorithm("signature/key combination")),
        }
    }

    fn sign(&self, certificate: &ClientCertificate, scheme: SignatureScheme, message: &[u8]) -> Result<Vec<u8>, errors::TLSError> {
        let pair = match scheme {
            SignatureScheme::Tls12(pair) => pair,
            _ => return Err(errors::TLSError::UnsupportedAlgorithm("pre-TLS 1.2 signature")),
        };
        match (pair.signature, certificate.signature_algorithm) {
            (extensions::SIGNATURE_RSA, extensions::SIGNATURE_RSA) => {
                let encoding: &'static dyn signature::RsaEncoding = match pair.hash {
                    extensions::HASH_SHA256 => &signature::RSA_PKCS1_SHA256,
                    extensions::HASH_SHA384 => &signature::RSA_PKCS1_SHA384,
                    extensions::HASH_SHA512 => &signature::RSA_PKCS1_SHA512,
                    _ => return Err(errors::TLSError::UnsupportedAlgorithm("RSA signing hash")),
                };
                let key_pair = signature::RsaKeyPair::from_pkcs8(&certificate.private_key_pkcs8)
                    .map_err(|_| errors::TLSError::BadCertificate("client key rejected".to_string()))?;
                let mut signature = vec![0; key_pair.public_modulus_len()];
                key_pair
                    .sign(encoding, &self.rng, message, &mut signature)
                    .map_err(|_| errors::TLSError::UnspecifiedRingError)?;
                Ok(signature)
            }
            (extensions::SIGNATURE_ECDSA, extensions::SIGNATURE_ECDSA) => {
                let algorithm = match pair.hash {
                    extensions::HASH_SHA256 => &signature::ECDSA_P256_SHA256_ASN1_SIGNING,
                    extensions::HASH_SHA384 => &signature::ECDSA_P384_SHA384_ASN1_SIGNING,
                    _ => return Err(errors::TLSError::UnsupportedAlgorithm("ECDSA signing hash")),
                };
                let key_pair = signature::EcdsaKeyPair::from_pkcs8(algorithm, &certificate.private_key_pkcs8)
                    .map_err(|_| errors::TLSError::BadCertificate("client key rejected".to_string()))?;
                let signature = key_pair.sign(&self.rng, message).map_err(|_| errors::TLSError::UnspecifiedRingError)?;
                Ok(signature.as_ref().to_vec())
            }
            _ => Err(errors::TLSError::UnsupportedAlgorithm("client key type")),
        }
    }

    // PKCS#1 v1.5 type 2: 0x00 ‖ 0x02 ‖ nonzero padding ‖ 0x00 ‖ message
    fn rsa_encrypt(&self, key: &PeerPublicKey, plaintext: &[u8]) -> Result<Vec<u8>, errors::TLSError> {
        let (modulus, exponent) = match key {
            PeerPublicKey::Rsa { modulus, exponent } => (modulus, exponent),
            _ => return Err(errors::TLSError::UnsupportedAlgorithm("RSA encryption needs an RSA key")),
        };
        let n = BigUint::from_bytes_be(modulus);
        let e = BigUint::from_bytes_be(exponent);
        let k = (n.bits() + 7) / 8;
        if plaintext.len() + 11 > k {
            return Err(errors::TLSError::InsufficientSecurity("RSA modulus too small for the premaster secret"));
        }

        let mut encoded = Zeroizing::new(vec![0; k]);
        encoded[1] = 0x02;
        let padding_end = k - plaintext.len() - 1;
        self.fill_random(&mut encoded[2..padding_end])?;
        for byte in encoded[2..padding_end].iter_mut() {
            while *byte == 0 {
                let mut replacement = [0u8; 1];
                self.fill_random(&mut replacement)?;
                *byte = replacement[0];
            }
        }
        encoded[k - plaintext.len()..].copy_from_slice(plaintext);

        let c = BigUint::from_bytes_be(&encoded).modpow(&e, &n).to_bytes_be();
        let mut ciphertext = vec![0; k - c.len()];
        ciphertext.extend_from_slice(&c);
        Ok(ciphertext)
    }
}
