//! Murmur Codec Adapter
//!
//! Compresses and decompresses fixed-length PCM frames. Frame size is a
//! connection constant: every codec instance is built for one frame size and
//! rejects frames of any other length.
//!
//! Codecs may carry inter-frame state, so one instance serves one direction
//! of one source.

pub mod adpcm;
pub mod mulaw;
pub mod pcm;

pub use adpcm::*;
pub use mulaw::*;
pub use pcm::*;

use murmur_core::{CodecKind, PcmFrame, VoiceError, VoiceResult};

/// A speech codec operating on fixed-length frames
pub trait VoiceCodec: Send {
    fn kind(&self) -> CodecKind;

    /// Samples per frame
    fn frame_size(&self) -> usize;

    fn encode(&mut self, frame: &PcmFrame) -> VoiceResult<Vec<u8>>;

    /// Fails with `DecodeError` on a malformed payload
    fn decode(&mut self, payload: &[u8]) -> VoiceResult<PcmFrame>;
}

/// Build a codec instance for one direction of one source
pub fn create_codec(kind: CodecKind, frame_size: usize) -> Box<dyn VoiceCodec> {
    match kind {
        CodecKind::Pcm => Box::new(PcmCodec::new(frame_size)),
        CodecKind::MuLaw => Box::new(MuLawCodec::new(frame_size)),
        CodecKind::Adpcm => Box::new(AdpcmCodec::new(frame_size)),
    }
}

/// Codec wrapper used by the pipelines
pub struct CodecAdapter {
    codec: Box<dyn VoiceCodec>,
}

impl CodecAdapter {
    pub fn new(kind: CodecKind, frame_size: usize) -> Self {
        CodecAdapter {
            codec: create_codec(kind, frame_size),
        }
    }

    pub fn kind(&self) -> CodecKind {
        self.codec.kind()
    }

    pub fn frame_size(&self) -> usize {
        self.codec.frame_size()
    }

    pub fn encode(&mut self, frame: &PcmFrame) -> VoiceResult<Vec<u8>> {
        check_frame_len(frame, self.codec.frame_size())?;
        self.codec.encode(frame)
    }

    pub fn decode(&mut self, payload: &[u8]) -> VoiceResult<PcmFrame> {
        self.codec.decode(payload)
    }

    /// Decode, substituting a silence frame of the negotiated length when
    /// the payload is malformed. The error is returned alongside so the
    /// caller can count it.
    pub fn decode_or_silence(&mut self, payload: &[u8]) -> (PcmFrame, Option<VoiceError>) {
        match self.codec.decode(payload) {
            Ok(frame) => (frame, None),
            Err(e) => {
                tracing::debug!(codec = ?self.codec.kind(), error = %e, "decode failed, substituting silence");
                (PcmFrame::silence(self.codec.frame_size()), Some(e))
            }
        }
    }
}

impl std::fmt::Debug for CodecAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecAdapter")
            .field("kind", &self.codec.kind())
            .field("frame_size", &self.codec.frame_size())
            .finish()
    }
}

pub(crate) fn check_frame_len(frame: &PcmFrame, frame_size: usize) -> VoiceResult<()> {
    if frame.len() != frame_size {
        return Err(VoiceError::InvalidConfig(format!(
            "frame has {} samples, codec expects {}",
            frame.len(),
            frame_size
        )));
    }
    Ok(())
}
