//! Conversion of raw RTL-SDR bytes to complex samples
//!
//! RTL-SDR outputs 8-bit unsigned IQ samples (I, Q pairs) centred on 127.5.

use num_complex::Complex32;

/// Pre-computed lookup table for fast u8 → normalized f32 conversion
pub struct SampleTable {
    table: [f32; 256],
}

impl SampleTable {
    /// Maps 0..=255 onto -1.0..=1.0
    pub fn new() -> Self {
        let mut table = [0.0f32; 256];
        for (i, v) in table.iter_mut().enumerate() {
            *v = (i as f32 - 127.5) / 127.5;
        }
        Self { table }
    }

    #[inline(always)]
    pub fn sample(&self, i: u8, q: u8) -> Complex32 {
        Complex32::new(self.table[i as usize], self.table[q as usize])
    }

    /// Convert interleaved IQ bytes, appending to `output`.
    /// A trailing odd byte is ignored.
    pub fn extend_from_bytes(&self, iq_data: &[u8], output: &mut Vec<Complex32>) {
        output.reserve(iq_data.len() / 2);
        output.extend(
            iq_data
                .chunks_exact(2)
                .map(|pair| self.sample(pair[0], pair[1])),
        );
    }
}

impl Default for SampleTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_table_range() {
        let table = SampleTable::new();

        let low = table.sample(0, 0);
        assert!((low.re + 1.0).abs() < 1e-6);
        assert!((low.im + 1.0).abs() < 1e-6);

        let high = table.sample(255, 255);
        assert!((high.re - 1.0).abs() < 1e-6);

        // Centre bytes are near zero
        let mid = table.sample(127, 128);
        assert!(mid.re.abs() < 0.01 && mid.im.abs() < 0.01);
    }

    #[test]
    fn test_extend_ignores_odd_byte() {
        let table = SampleTable::new();
        let mut out = Vec::new();
        table.extend_from_bytes(&[255, 0, 128, 127, 9], &mut out);
        assert_eq!(out.len(), 2);
        assert!(out[0].re > 0.99 && out[0].im < -0.99);
    }
}
