//! Rational resampling on rubato's FFT resampler
//!
//! The `up / down` ratio is exact, so the synchronous FFT resampler applies
//! the anti-alias filter. The filter delay is trimmed and the tail flushed,
//! so output sample `m` lines up with input time `m * down / up`.

use rubato::{FftFixedIn, Resampler};
use tracing::debug;

use crate::error::{HubError, Result};

/// Smallest FFT input block; longer blocks give a sharper anti-alias filter
const MIN_FFT_INPUT: usize = 2048;

pub fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Reduced (up, down) pair converting `input_rate` into `output_rate`
pub fn rational_ratio(input_rate: u32, output_rate: u32) -> Result<(usize, usize)> {
    if input_rate == 0 || output_rate == 0 {
        return Err(HubError::InvalidParams("sample rates must be non-zero".into()));
    }
    let g = gcd(input_rate as u64, output_rate as u64);
    Ok(((output_rate as u64 / g) as usize, (input_rate as u64 / g) as usize))
}

/// Resampler for a fixed `up / down` ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RationalResampler {
    up: usize,
    down: usize,
}

impl RationalResampler {
    pub fn new(up: usize, down: usize) -> Result<Self> {
        if up == 0 || down == 0 {
            return Err(HubError::InvalidParams("resampling factors must be non-zero".into()));
        }
        Ok(Self { up, down })
    }

    /// Resampler converting `input_rate` to `output_rate`
    pub fn for_rates(input_rate: u32, output_rate: u32) -> Result<Self> {
        let (up, down) = rational_ratio(input_rate, output_rate)?;
        Self::new(up, down)
    }

    pub fn ratio(&self) -> (usize, usize) {
        (self.up, self.down)
    }

    /// `ceil(input_len * up / down)`
    pub fn output_len(&self, input_len: usize) -> usize {
        (input_len * self.up).div_ceil(self.down)
    }

    pub fn process(&self, input: &[f64]) -> Result<Vec<f64>> {
        if self.up == 1 && self.down == 1 {
            return Ok(input.to_vec());
        }
        let wanted = self.output_len(input.len());
        if wanted == 0 {
            return Ok(Vec::new());
        }

        // rubato takes rates; the reduced pair is an exact stand-in
        let chunk = self.down * MIN_FFT_INPUT.div_ceil(self.down);
        let mut resampler = FftFixedIn::<f64>::new(self.down, self.up, chunk, 1, 1)
            .map_err(|e| HubError::InvalidParams(format!("resampler setup failed: {}", e)))?;
        let chunk = resampler.input_frames_next();
        let delay = resampler.output_delay();
        debug!(
            "Resampling {} samples by {}/{} (block {}, delay {})",
            input.len(),
            self.up,
            self.down,
            chunk,
            delay
        );

        let mut out = Vec::with_capacity(wanted + delay + resampler.output_frames_max());
        for block in input.chunks(chunk) {
            let produced = if block.len() == chunk {
                resampler.process(std::slice::from_ref(&block), None)
            } else {
                resampler.process_partial(Some(std::slice::from_ref(&block)), None)
            }
            .map_err(resample_error)?;
            out.extend_from_slice(&produced[0]);
        }
        while out.len() < wanted + delay {
            let produced = resampler
                .process_partial(None::<&[&[f64]]>, None)
                .map_err(resample_error)?;
            out.extend_from_slice(&produced[0]);
        }

        out.drain(..delay);
        out.truncate(wanted);
        Ok(out)
    }
}

fn resample_error(e: rubato::ResampleError) -> HubError {
    HubError::InvalidParams(format!("resampling failed: {}", e))
}
