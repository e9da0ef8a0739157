//! WAV capture sink for live audio
//!
//! One 16-bit mono PCM file per streaming submission. The header is written
//! as a placeholder on open and rewritten with the real RIFF/data sizes when
//! the sink is finalized, so a crash mid-stream leaves a recognizable but
//! truncated file.

use crate::error::{Error, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Bytes per sample frame: mono, 16-bit
const BYTES_PER_FRAME: u64 = 2;

/// Append-only PCM sink owned by the active stream session
pub struct WavSink {
    writer: WavWriter<BufWriter<File>>,
    path: PathBuf,
    sample_rate: u32,
    bytes_written: u64,
    /// Dangling byte from an odd-length append, waiting for its pair
    pending: Option<u8>,
}

impl WavSink {
    /// Create the sink and write the placeholder header
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(&path, spec)
            .map_err(|e| Error::io(format!("cannot create {}: {}", path.display(), e)))?;

        debug!("Opened WAV sink {} at {}Hz", path.display(), sample_rate);
        Ok(Self {
            writer,
            path,
            sample_rate,
            bytes_written: 0,
            pending: None,
        })
    }

    /// Append raw little-endian 16-bit PCM bytes
    pub fn append_pcm(&mut self, data: &[u8]) -> Result<()> {
        self.bytes_written += data.len() as u64;

        let mut iter = data.iter().copied();
        if let Some(low) = self.pending.take() {
            match iter.next() {
                Some(high) => self.write_sample(i16::from_le_bytes([low, high]))?,
                None => {
                    self.pending = Some(low);
                    return Ok(());
                }
            }
        }

        loop {
            match (iter.next(), iter.next()) {
                (Some(low), Some(high)) => self.write_sample(i16::from_le_bytes([low, high]))?,
                (Some(low), None) => {
                    self.pending = Some(low);
                    break;
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn write_sample(&mut self, sample: i16) -> Result<()> {
        self.writer
            .write_sample(sample)
            .map_err(|e| Error::io(format!("write to {} failed: {}", self.path.display(), e)))
    }

    /// Cumulative PCM bytes received, including any unpaired trailing byte
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Capture duration implied by the byte count (mono 16-bit)
    pub fn duration_seconds(&self) -> f64 {
        self.bytes_written as f64 / (self.sample_rate as f64 * BYTES_PER_FRAME as f64)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and rewrite the header with the final sizes.
    ///
    /// Returns the cumulative byte count and the implied duration.
    pub fn finalize(self) -> Result<(u64, f64)> {
        let bytes = self.bytes_written;
        let duration = self.duration_seconds();
        self.writer
            .finalize()
            .map_err(|e| Error::io(format!("finalize WAV failed: {}", e)))?;
        debug!("Finalized WAV sink: {} bytes, {:.2}s", bytes, duration);
        Ok((bytes, duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read_u32_le(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    #[test]
    fn test_empty_sink_header_sizes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.wav");
        let sink = WavSink::create(&path, 16_000).unwrap();
        let (bytes, duration) = sink.finalize().unwrap();
        assert_eq!(bytes, 0);
        assert_eq!(duration, 0.0);

        let contents = std::fs::read(&path).unwrap();
        assert_eq!(contents.len(), 44);
        assert_eq!(&contents[0..4], b"RIFF");
        assert_eq!(read_u32_le(&contents, 4), 36); // RIFF size for zero data
        assert_eq!(&contents[8..12], b"WAVE");
        assert_eq!(read_u32_le(&contents, 40), 0); // data size
    }

    #[test]
    fn test_header_declares_pcm_mono_16k() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fmt.wav");
        WavSink::create(&path, 16_000).unwrap().finalize().unwrap();

        let contents = std::fs::read(&path).unwrap();
        let format_code = u16::from_le_bytes(contents[20..22].try_into().unwrap());
        let channels = u16::from_le_bytes(contents[22..24].try_into().unwrap());
        let sample_rate = read_u32_le(&contents, 24);
        let bits = u16::from_le_bytes(contents[34..36].try_into().unwrap());
        assert_eq!(format_code, 1); // PCM
        assert_eq!(channels, 1);
        assert_eq!(sample_rate, 16_000);
        assert_eq!(bits, 16);
    }

    #[test]
    fn test_append_and_final_sizes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("one_second.wav");
        let mut sink = WavSink::create(&path, 16_000).unwrap();

        // One second of silence: 16000 frames * 2 bytes
        sink.append_pcm(&vec![0u8; 32_000]).unwrap();
        assert_eq!(sink.bytes_written(), 32_000);
        assert!((sink.duration_seconds() - 1.0).abs() < f64::EPSILON);

        let (bytes, duration) = sink.finalize().unwrap();
        assert_eq!(bytes, 32_000);
        assert!((duration - 1.0).abs() < f64::EPSILON);

        let contents = std::fs::read(&path).unwrap();
        assert_eq!(read_u32_le(&contents, 4), 36 + 32_000);
        assert_eq!(read_u32_le(&contents, 40), 32_000);
    }

    #[test]
    fn test_odd_length_appends_pair_across_calls() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("odd.wav");
        let mut sink = WavSink::create(&path, 16_000).unwrap();

        sink.append_pcm(&[0x01]).unwrap();
        sink.append_pcm(&[0x02, 0x03, 0x04]).unwrap();
        assert_eq!(sink.bytes_written(), 4);

        let (_, _) = sink.finalize().unwrap();
        let contents = std::fs::read(&path).unwrap();
        // Two complete frames landed in the data chunk
        assert_eq!(read_u32_le(&contents, 40), 4);
        assert_eq!(&contents[44..48], &[0x01, 0x02, 0x03, 0x04]);
    }
}
