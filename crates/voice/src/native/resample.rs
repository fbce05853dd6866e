use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Creates a mono resampler between two sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> Result<FastFixedIn<f32>, rubato::ResamplerConstructionError> {
    FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )
}

/// Feeds arbitrarily sized frames through a fixed-input resampler, keeping
/// the remainder for the next call.
pub struct StreamResampler {
    inner: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    /// Equal rates pass samples through untouched.
    pub fn new(
        in_rate: u32,
        out_rate: u32,
        chunk_size: usize,
    ) -> Result<Self, rubato::ResamplerConstructionError> {
        let inner = if in_rate == out_rate {
            None
        } else {
            Some(create_resampler(
                f64::from(in_rate),
                f64::from(out_rate),
                chunk_size,
            )?)
        };
        Ok(Self {
            inner,
            pending: Vec::new(),
        })
    }

    pub fn push(&mut self, frame: &[f32]) -> Vec<f32> {
        let Some(resampler) = self.inner.as_mut() else {
            return frame.to_vec();
        };
        self.pending.extend_from_slice(frame);

        let mut out = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            match resampler.process(&[chunk], None) {
                Ok(mut res) => out.append(&mut res[0]),
                Err(e) => {
                    tracing::debug!(error = %e, "Dropping audio chunk that failed to resample");
                }
            }
        }
        out
    }
}
