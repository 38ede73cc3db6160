//! Captured fragments and the finalized recording

use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::error::{AudioError, AudioResult};

/// Container format of a finalized recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    /// RIFF/WAVE, 16-bit signed little-endian PCM
    Wav,
}

impl AudioFormat {
    /// Tag sent to the interpretation service
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fixed-interval block of 16-bit mono samples, in capture order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFragment {
    /// Position in the recording, starting at 0
    pub sequence: u32,
    pub samples: Vec<i16>,
}

/// A finalized recording
///
/// Built once from the fragments of a capture and never mutated afterwards.
#[derive(Clone, PartialEq, Eq)]
pub struct RawPayload {
    bytes: Vec<u8>,
    format: AudioFormat,
    sample_rate: u32,
    sample_count: usize,
}

impl RawPayload {
    /// Concatenate fragments in sequence order into a WAV recording
    ///
    /// # Errors
    /// `AudioError::EmptyRecording` when the fragments hold no samples.
    pub fn from_fragments(fragments: &[AudioFragment], sample_rate: u32) -> AudioResult<Self> {
        let mut ordered: Vec<&AudioFragment> = fragments.iter().collect();
        ordered.sort_by_key(|f| f.sequence);

        let sample_count: usize = ordered.iter().map(|f| f.samples.len()).sum();
        if sample_count == 0 {
            return Err(AudioError::EmptyRecording);
        }

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::with_capacity(44 + sample_count * 2));
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
            for fragment in ordered {
                for &sample in &fragment.samples {
                    writer.write_sample(sample)?;
                }
            }
            writer.finalize()?;
        }

        Ok(Self {
            bytes: cursor.into_inner(),
            format: AudioFormat::Wav,
            sample_rate,
            sample_count,
        })
    }

    /// Rebuild a payload from container bytes, validating the header
    pub fn from_wav_bytes(bytes: Vec<u8>) -> AudioResult<Self> {
        let reader = hound::WavReader::new(Cursor::new(bytes.as_slice()))?;
        let spec = reader.spec();
        if spec.channels != 1 || spec.bits_per_sample != 16 {
            return Err(AudioError::EncodingFailed(format!(
                "expected 16-bit mono WAV, got {} channels at {} bits",
                spec.channels, spec.bits_per_sample
            )));
        }
        let sample_count = reader.len() as usize;

        Ok(Self {
            bytes,
            format: AudioFormat::Wav,
            sample_rate: spec.sample_rate,
            sample_count,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.sample_count as f64 / f64::from(self.sample_rate.max(1)))
    }

    /// Decode the PCM samples back out of the container
    pub fn samples(&self) -> AudioResult<Vec<i16>> {
        let mut reader = hound::WavReader::new(Cursor::new(self.bytes.as_slice()))?;
        reader
            .samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(AudioError::from)
    }

    /// Write the recording to disk for playback
    pub fn write_to(&self, path: &Path) -> AudioResult<()> {
        std::fs::write(path, &self.bytes).map_err(|e| AudioError::Wav(hound::Error::IoError(e)))
    }
}

// Keep audio bytes out of logs
impl fmt::Debug for RawPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawPayload")
            .field("format", &self.format)
            .field("sample_rate", &self.sample_rate)
            .field("sample_count", &self.sample_count)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}
