//! RIFF/WAVE container header parsing.
//!
//! A single chunk-walking parser locates the `fmt ` record and the `data`
//! payload inside an arbitrary chunk sequence. Chunks carry a 4-byte id and a
//! little-endian u32 declared size; declared sizes are authoritative for
//! skipping (the walk never scans for magic bytes) and chunk order is not
//! assumed — vendor metadata chunks routinely precede or follow the ones we
//! care about.

use std::io::{Read, Seek, SeekFrom};

use crate::error::ParseError;

/// Payload encoding tag from the `fmt ` chunk, raw code preserved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaveFormat {
    Pcm,
    IeeeFloat,
    ALaw,
    MuLaw,
    ItuG723Adpcm,
    YamahaAdpcm,
    Extensible,
    Other(u16),
}

impl WaveFormat {
    pub fn from_code(code: u16) -> Self {
        match code {
            0x0001 => WaveFormat::Pcm,
            0x0003 => WaveFormat::IeeeFloat,
            0x0006 => WaveFormat::ALaw,
            0x0007 => WaveFormat::MuLaw,
            0x0014 => WaveFormat::ItuG723Adpcm,
            0x0020 => WaveFormat::YamahaAdpcm,
            0xfffe => WaveFormat::Extensible,
            other => WaveFormat::Other(other),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            WaveFormat::Pcm => 0x0001,
            WaveFormat::IeeeFloat => 0x0003,
            WaveFormat::ALaw => 0x0006,
            WaveFormat::MuLaw => 0x0007,
            WaveFormat::ItuG723Adpcm => 0x0014,
            WaveFormat::YamahaAdpcm => 0x0020,
            WaveFormat::Extensible => 0xfffe,
            WaveFormat::Other(code) => *code,
        }
    }
}

/// Where the payload lives and how it is encoded.
///
/// Computed once at parse time and never recomputed for the lifetime of a
/// stream: loop and stop operations rewind a cursor, not these fields.
#[derive(Clone, Debug)]
pub struct ContainerInfo {
    pub format: WaveFormat,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    /// Byte offset of the payload start within the source.
    pub data_offset: u64,
    /// Payload byte length as declared by the container.
    pub data_length: u64,
}

/// Fixed portion of the `fmt ` chunk body.
const FMT_RECORD_LEN: u32 = 16;

/// Walk the container's chunks and locate the payload.
///
/// The `fmt ` chunk may appear before or after arbitrary metadata chunks; a
/// declared `fmt ` size larger than the fixed 16-byte record (18- and 40-byte
/// extensible variants) is tolerated by skipping the surplus. The walk stops
/// at the `data` chunk: the current position becomes `data_offset` and the
/// declared size `data_length`.
pub fn parse<R: Read + Seek>(reader: &mut R) -> Result<ContainerInfo, ParseError> {
    let mut preamble = [0u8; 12];
    reader.seek(SeekFrom::Start(0))?;
    if read_or_eof(reader, &mut preamble)?.is_none() {
        return Err(ParseError::BadMagic);
    }
    if &preamble[0..4] != b"RIFF" || &preamble[8..12] != b"WAVE" {
        return Err(ParseError::BadMagic);
    }

    let mut fmt: Option<(WaveFormat, u16, u32, u16)> = None;
    loop {
        let mut header = [0u8; 8];
        if read_or_eof(reader, &mut header)?.is_none() {
            return Err(ParseError::NoDataChunk);
        }
        let id = &header[0..4];
        let declared = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        if id == b"fmt " && declared >= FMT_RECORD_LEN {
            let mut record = [0u8; FMT_RECORD_LEN as usize];
            if read_or_eof(reader, &mut record)?.is_none() {
                return Err(ParseError::NoDataChunk);
            }
            let format = WaveFormat::from_code(u16::from_le_bytes([record[0], record[1]]));
            let channels = u16::from_le_bytes([record[2], record[3]]);
            let sample_rate =
                u32::from_le_bytes([record[4], record[5], record[6], record[7]]);
            let bits_per_sample = u16::from_le_bytes([record[14], record[15]]);
            fmt = Some((format, channels, sample_rate, bits_per_sample));
            reader.seek(SeekFrom::Current(i64::from(declared - FMT_RECORD_LEN)))?;
        } else if id == b"data" {
            let (format, channels, sample_rate, bits_per_sample) =
                fmt.ok_or(ParseError::NoFormatChunk)?;
            let data_offset = reader.stream_position()?;
            return Ok(ContainerInfo {
                format,
                channels,
                sample_rate,
                bits_per_sample,
                data_offset,
                data_length: u64::from(declared),
            });
        } else {
            // Unknown chunk, or a fmt chunk too short to hold the record.
            reader.seek(SeekFrom::Current(i64::from(declared)))?;
        }
    }
}

/// Synthesized info for a raw CDDA sidecar (`.raw`): headerless 16-bit stereo
/// PCM at 44.1 kHz, payload spanning the whole source.
pub fn cdda_info(data_length: u64) -> ContainerInfo {
    ContainerInfo {
        format: WaveFormat::Pcm,
        channels: 2,
        sample_rate: 44_100,
        bits_per_sample: 16,
        data_offset: 0,
        data_length,
    }
}

/// `read_exact` that maps a clean end-of-source to `None` instead of an error.
fn read_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<Option<()>, ParseError> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(Some(())),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(ParseError::Io(e)),
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    /// Build a WAV byte image out of raw chunk triples appended after the
    /// RIFF/WAVE preamble.
    pub(crate) fn container(chunks: &[(&[u8; 4], &[u8])]) -> Vec<u8> {
        let body_len: usize = chunks.iter().map(|(_, body)| 8 + body.len()).sum();
        let mut out = Vec::with_capacity(12 + body_len);
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&((4 + body_len) as u32).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        for (id, body) in chunks {
            out.extend_from_slice(*id);
            out.extend_from_slice(&(body.len() as u32).to_le_bytes());
            out.extend_from_slice(body);
        }
        out
    }

    /// A 16-byte `fmt ` record body.
    pub(crate) fn fmt_record(
        format: u16,
        channels: u16,
        sample_rate: u32,
        bits_per_sample: u16,
    ) -> Vec<u8> {
        let block_align = channels * bits_per_sample / 8;
        let byte_rate = sample_rate * u32::from(block_align);
        let mut out = Vec::with_capacity(16);
        out.extend_from_slice(&format.to_le_bytes());
        out.extend_from_slice(&channels.to_le_bytes());
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&byte_rate.to_le_bytes());
        out.extend_from_slice(&block_align.to_le_bytes());
        out.extend_from_slice(&bits_per_sample.to_le_bytes());
        out
    }
}
