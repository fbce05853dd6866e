//! Audio formats handled by the client: base64 transport encoding, PCM sample
//! conversions, the minimal WAV container and G.711 µ-law.

use crate::error::ProtocolError;
use base64::Engine;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Raw PCM delivered inside signaling messages is 16-bit mono at this rate.
pub const MESSAGE_AUDIO_SAMPLE_RATE: u32 = 16_000;
pub const MESSAGE_AUDIO_CHANNELS: u16 = 1;
/// G.711 runs at a fixed 8 kHz.
pub const PCMU_SAMPLE_RATE: u32 = 8_000;

pub const WAV_HEADER_LEN: usize = 44;

/// Container of an encoded audio clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Mp3,
    Wav,
}

impl AudioFormat {
    pub fn name(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
        }
    }
}

/// A complete encoded audio payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub format: AudioFormat,
    pub bytes: Bytes,
}

impl AudioClip {
    pub fn new(format: AudioFormat, bytes: impl Into<Bytes>) -> Self {
        Self {
            format,
            bytes: bytes.into(),
        }
    }
}

/// A live remote media track, delivered as mono f32 frames.
#[derive(Debug)]
pub struct RemoteAudio {
    pub track_id: String,
    pub sample_rate: u32,
    pub frames: mpsc::Receiver<Vec<f32>>,
}

/// Decodes a base64 payload into raw bytes.
pub fn decode_base64_audio(base64_fragment: &str) -> Result<Bytes, ProtocolError> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(base64_fragment.trim())?;
    Ok(Bytes::from(bytes))
}

pub fn encode_base64_audio(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Converts a slice of f32 samples to a vector of i16 samples.
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Converts a slice of i16 samples to a vector of f32 samples.
pub fn convert_i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}

/// Interprets little-endian bytes as i16 samples; a trailing odd byte is dropped.
pub fn pcm16_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

/// Format fields read back from a WAV header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

/// Wraps raw PCM16 little-endian bytes in a canonical 44-byte WAV header.
pub fn wrap_pcm16_wav(pcm: &[u8], sample_rate: u32, channels: u16) -> Vec<u8> {
    let bits_per_sample: u16 = 16;
    let block_align = channels * bits_per_sample / 8;
    let byte_rate = sample_rate * u32::from(block_align);
    let data_len = pcm.len() as u32;

    let mut wav = Vec::with_capacity(WAV_HEADER_LEN + pcm.len());
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&bits_per_sample.to_le_bytes());

    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend_from_slice(pcm);
    wav
}

/// Reads back a buffer produced by [`wrap_pcm16_wav`].
///
/// Only the canonical layout is understood: `fmt ` at offset 12 and `data`
/// at offset 36. Returns `None` for anything else.
pub fn unwrap_pcm16_wav(wav: &[u8]) -> Option<(WavFormat, &[u8])> {
    let header = wav.get(..WAV_HEADER_LEN)?;
    if &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" {
        return None;
    }
    if &header[12..16] != b"fmt " || &header[36..40] != b"data" {
        return None;
    }
    let u16_at = |at: usize| u16::from_le_bytes([header[at], header[at + 1]]);
    let u32_at =
        |at: usize| u32::from_le_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]]);

    let format = WavFormat {
        channels: u16_at(22),
        sample_rate: u32_at(24),
        bits_per_sample: u16_at(34),
    };
    let data_len = u32_at(40) as usize;
    let data = wav.get(WAV_HEADER_LEN..WAV_HEADER_LEN.checked_add(data_len)?)?;
    Some((format, data))
}

const MULAW_BIAS: i32 = 0x84;
const MULAW_CLIP: i32 = 32_635;

/// Encodes one PCM16 sample as G.711 µ-law.
pub fn mulaw_encode(sample: i16) -> u8 {
    let mut pcm = i32::from(sample);
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0x00
    };
    pcm = pcm.min(MULAW_CLIP) + MULAW_BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && pcm & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (pcm >> (exponent + 3)) & 0x0F;
    !((sign | (exponent << 4) | mantissa) as u8)
}

/// Decodes one G.711 µ-law byte into a PCM16 sample.
pub fn mulaw_decode(byte: u8) -> i16 {
    let value = !byte;
    let sign = value & 0x80;
    let exponent = i32::from((value >> 4) & 0x07);
    let mantissa = i32::from(value & 0x0F);
    let magnitude = (((mantissa << 3) + MULAW_BIAS) << exponent) - MULAW_BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}
