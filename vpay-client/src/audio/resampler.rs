use crate::audio::error::{AudioError, AudioResult};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

/// Converts device audio to the capture rate
///
/// Uses Sinc interpolation when the device rate differs from the target
/// rate and a plain copy when they match. Input of any length is accepted;
/// samples that do not fill a whole chunk are held until the next call.
pub struct AudioResampler {
    /// None in passthrough mode
    resampler: Option<SincFixedIn<f32>>,
    input_buffer: Vec<Vec<f32>>,
    output_buffer: Vec<Vec<f32>>,
    /// Samples waiting for a full chunk
    pending: Vec<f32>,
    input_rate: u32,
    output_rate: u32,
    chunk_size: usize,
}

impl AudioResampler {
    /// Create a new audio resampler
    ///
    /// # Errors
    /// Returns `AudioError::ResampleFailed` if the resampler cannot be created.
    ///
    /// # Example
    /// ```
    /// use vpay_lib::audio::resampler::AudioResampler;
    ///
    /// let resampler = AudioResampler::new(48000, 16000).unwrap();
    /// assert!(!resampler.is_passthrough());
    /// ```
    pub fn new(input_rate: u32, output_rate: u32) -> AudioResult<Self> {
        if input_rate == 0 || output_rate == 0 {
            return Err(AudioError::ResampleFailed(format!(
                "invalid rates {input_rate} Hz -> {output_rate} Hz"
            )));
        }

        // 10ms of input per chunk
        let chunk_size = (input_rate / 100).max(1) as usize;

        if input_rate == output_rate {
            debug!(rate = input_rate, "Resampler in passthrough mode");
            return Ok(Self {
                resampler: None,
                input_buffer: Vec::new(),
                output_buffer: Vec::new(),
                pending: Vec::new(),
                input_rate,
                output_rate,
                chunk_size,
            });
        }

        let ratio = f64::from(output_rate) / f64::from(input_rate);

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };

        let resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, chunk_size, 1)
            .map_err(|e| AudioError::ResampleFailed(format!("Failed to create resampler: {}", e)))?;

        let input_buffer = resampler.input_buffer_allocate(true);
        let output_buffer = resampler.output_buffer_allocate(true);

        debug!(
            input_rate,
            output_rate,
            chunk_size,
            "Resampler created"
        );

        Ok(Self {
            resampler: Some(resampler),
            input_buffer,
            output_buffer,
            pending: Vec::new(),
            input_rate,
            output_rate,
            chunk_size,
        })
    }

    /// Resample mono samples of any length
    ///
    /// May return fewer samples than expected (or none) while input is
    /// buffered up to a whole chunk.
    pub fn process(&mut self, input: &[f32]) -> AudioResult<Vec<f32>> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(input.to_vec());
        };

        self.pending.extend_from_slice(input);

        let mut output = Vec::new();
        while self.pending.len() >= self.chunk_size {
            self.input_buffer[0].clear();
            self.input_buffer[0].extend(self.pending.drain(..self.chunk_size));

            let (_, generated) = resampler
                .process_into_buffer(&self.input_buffer, &mut self.output_buffer, None)
                .map_err(|e| AudioError::ResampleFailed(format!("Resampling failed: {}", e)))?;

            output.extend_from_slice(&self.output_buffer[0][..generated]);
        }

        Ok(output)
    }

    /// Drain the samples still waiting for a full chunk
    ///
    /// The partial chunk is zero-padded through the filter and the output is
    /// cut to the length the real input accounts for. The resampler is reset
    /// afterwards, ready for the next recording.
    pub fn flush(&mut self) -> AudioResult<Vec<f32>> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(Vec::new());
        };

        if self.pending.is_empty() {
            self.reset();
            return Ok(Vec::new());
        }

        let expected = (self.pending.len() as f64 * f64::from(self.output_rate)
            / f64::from(self.input_rate))
        .ceil() as usize;

        let tail = [std::mem::take(&mut self.pending)];
        let (_, generated) = resampler
            .process_partial_into_buffer(Some(&tail[..]), &mut self.output_buffer, None)
            .map_err(|e| AudioError::ResampleFailed(format!("Resampling failed: {}", e)))?;

        let output = self.output_buffer[0][..generated.min(expected)].to_vec();
        self.reset();
        Ok(output)
    }

    /// Clear internal state between recordings
    pub fn reset(&mut self) {
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
        self.pending.clear();
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Number of input samples consumed per internal chunk
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

/// Average interleaved frames down to a single channel
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 | 1 => samples.to_vec(),
        n => {
            let n = usize::from(n);
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}
