//! Crypto session - per-connection packet sealing
//!
//! Both peers hold the same out-of-band session secret. The secret is never
//! used as a key directly: every handshake draws two random nonces (the
//! initiator's in Ping, the responder's in Pong) and HKDF-SHA256 mixes them
//! into the salt. Keys therefore change with every handshake, even when the
//! secret does not, and sequence numbers may restart at zero.
//!
//! Three key sets exist per handshake:
//! - Ping: salt bound to the initiator nonce
//! - Pong: salt bound to both nonces
//! - Established: salt bound to both nonces, used for everything afterwards
//!
//! Each set has one key and nonce prefix per direction, so the two sides may
//! use the same sequence numbers. The AEAD nonce itself is never sent; it is
//! rebuilt from the sequence number in the packet header.

use std::fmt;

use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;

use murmur_core::{VoiceError, VoiceResult};
use murmur_wire::{
    assemble_datagram, split_datagram, split_handshake, HandshakeNonce, PacketHeader, PacketType,
    HANDSHAKE_NONCE_SIZE, HEADER_SIZE, TAG_SIZE,
};

use crate::{derive_nonce, AeadCipher, KEY_SIZE, NONCE_PREFIX_SIZE};

const KDF_SALT: &[u8] = b"murmur-voice-session-v2";

/// Fresh random nonce for one side of a handshake
pub fn handshake_nonce() -> HandshakeNonce {
    let mut nonce = [0u8; HANDSHAKE_NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Shared secret provisioned by the host application's own channel
#[derive(Clone, PartialEq, Eq)]
pub struct SessionSecret([u8; KEY_SIZE]);

impl SessionSecret {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        SessionSecret(bytes)
    }

    /// Fresh random secret (for the side that provisions it)
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        SessionSecret(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionSecret(..)")
    }
}

/// Which end of the handshake this session belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Sends the first Ping
    Initiator,
    /// Answers with Pong
    Responder,
}

impl Role {
    fn send_label(self) -> &'static [u8] {
        match self {
            Role::Initiator => b"initiator->responder",
            Role::Responder => b"responder->initiator",
        }
    }

    fn recv_label(self) -> &'static [u8] {
        match self {
            Role::Initiator => b"responder->initiator",
            Role::Responder => b"initiator->responder",
        }
    }
}

/// Key material for one direction
#[derive(Clone)]
struct DirectionKeys {
    cipher: AeadCipher,
    nonce_prefix: [u8; NONCE_PREFIX_SIZE],
}

impl DirectionKeys {
    fn derive(secret: &SessionSecret, salt: &[u8], label: &[u8]) -> VoiceResult<Self> {
        let hkdf = Hkdf::<Sha256>::new(Some(salt), secret.as_bytes());

        let mut key = [0u8; KEY_SIZE];
        let mut info = label.to_vec();
        info.extend_from_slice(b" key");
        hkdf.expand(&info, &mut key)
            .map_err(|_| VoiceError::InvalidConfig("hkdf key expansion failed".into()))?;

        let mut nonce_prefix = [0u8; NONCE_PREFIX_SIZE];
        let mut info = label.to_vec();
        info.extend_from_slice(b" nonce");
        hkdf.expand(&info, &mut nonce_prefix)
            .map_err(|_| VoiceError::InvalidConfig("hkdf nonce expansion failed".into()))?;

        Ok(DirectionKeys {
            cipher: AeadCipher::new(&key),
            nonce_prefix,
        })
    }
}

/// Per-connection symmetric encryption and integrity tagging
#[derive(Clone)]
pub struct CryptoSession {
    role: Role,
    send: DirectionKeys,
    recv: DirectionKeys,
}

impl CryptoSession {
    /// Keys sealing the initiator's Ping
    pub fn for_ping(secret: &SessionSecret, role: Role, initiator: &HandshakeNonce) -> VoiceResult<Self> {
        Self::derive(secret, role, b"ping", &[initiator])
    }

    /// Keys sealing the responder's Pong
    pub fn for_pong(
        secret: &SessionSecret,
        role: Role,
        initiator: &HandshakeNonce,
        responder: &HandshakeNonce,
    ) -> VoiceResult<Self> {
        Self::derive(secret, role, b"pong", &[initiator, responder])
    }

    /// Keys for every packet after the handshake
    pub fn established(
        secret: &SessionSecret,
        role: Role,
        initiator: &HandshakeNonce,
        responder: &HandshakeNonce,
    ) -> VoiceResult<Self> {
        Self::derive(secret, role, b"session", &[initiator, responder])
    }

    fn derive(secret: &SessionSecret, role: Role, stage: &[u8], nonces: &[&HandshakeNonce]) -> VoiceResult<Self> {
        let mut salt = KDF_SALT.to_vec();
        salt.extend_from_slice(stage);
        for nonce in nonces {
            salt.extend_from_slice(&nonce[..]);
        }
        Ok(CryptoSession {
            role,
            send: DirectionKeys::derive(secret, &salt, role.send_label())?,
            recv: DirectionKeys::derive(secret, &salt, role.recv_label())?,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Encrypt and tag a plaintext for the outbound direction
    pub fn seal(&self, sequence: u32, aad: &[u8], plaintext: &[u8]) -> VoiceResult<Vec<u8>> {
        let nonce = derive_nonce(&self.send.nonce_prefix, sequence);
        self.send.cipher.encrypt(&nonce, aad, plaintext)
    }

    /// Verify and decrypt an inbound ciphertext+tag
    ///
    /// Fails closed: any malformed input or tag mismatch is `AuthError`.
    pub fn open(&self, sequence: u32, aad: &[u8], sealed: &[u8]) -> VoiceResult<Vec<u8>> {
        if sealed.len() < TAG_SIZE {
            return Err(VoiceError::AuthError);
        }
        let nonce = derive_nonce(&self.recv.nonce_prefix, sequence);
        self.recv.cipher.decrypt(&nonce, aad, sealed)
    }

    /// Build a complete datagram: header in the clear, body sealed with the
    /// header as associated data
    pub fn seal_datagram(
        &self,
        packet_type: PacketType,
        sequence: u32,
        plaintext: &[u8],
        mtu: usize,
    ) -> VoiceResult<Vec<u8>> {
        let header = PacketHeader::new(packet_type, sequence);
        let sealed = self.seal(sequence, &header.to_bytes(), plaintext)?;
        assemble_datagram(&header, &sealed, mtu)
    }

    /// Parse and open a complete datagram
    ///
    /// Framing errors are reported as `AuthError` as well: nothing about an
    /// unauthenticated datagram is trusted.
    pub fn open_datagram(&self, datagram: &[u8]) -> VoiceResult<(PacketHeader, Vec<u8>)> {
        let (header, sealed) = split_datagram(datagram).map_err(|_| VoiceError::AuthError)?;
        let plaintext = self.open(header.sequence, &header.to_bytes(), sealed)?;
        Ok((header, plaintext))
    }

    /// Build a Ping or Pong: header and the sender's handshake nonce in the
    /// clear, both bound to the sealed body
    pub fn seal_handshake(
        &self,
        packet_type: PacketType,
        sequence: u32,
        nonce: &HandshakeNonce,
        plaintext: &[u8],
        mtu: usize,
    ) -> VoiceResult<Vec<u8>> {
        let header = PacketHeader::new(packet_type, sequence);
        let sealed = self.seal(sequence, &handshake_aad(&header, nonce), plaintext)?;
        let mut body = Vec::with_capacity(HANDSHAKE_NONCE_SIZE + sealed.len());
        body.extend_from_slice(nonce);
        body.extend_from_slice(&sealed);
        assemble_datagram(&header, &body, mtu)
    }

    /// Parse and open a Ping or Pong
    pub fn open_handshake(&self, datagram: &[u8]) -> VoiceResult<(PacketHeader, HandshakeNonce, Vec<u8>)> {
        let (header, nonce, sealed) = split_handshake(datagram).map_err(|_| VoiceError::AuthError)?;
        let plaintext = self.open(header.sequence, &handshake_aad(&header, &nonce), sealed)?;
        Ok((header, nonce, plaintext))
    }
}

fn handshake_aad(header: &PacketHeader, nonce: &HandshakeNonce) -> [u8; HEADER_SIZE + HANDSHAKE_NONCE_SIZE] {
    let mut aad = [0u8; HEADER_SIZE + HANDSHAKE_NONCE_SIZE];
    aad[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
    aad[HEADER_SIZE..].copy_from_slice(nonce);
    aad
}

impl fmt::Debug for CryptoSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoSession")
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}
