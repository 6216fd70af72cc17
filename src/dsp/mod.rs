//! Signal processing on captured IQ samples

mod demod;
mod filter;
mod resample;
mod spectrum;

pub use demod::{
    am_envelope, demodulate, demodulate_tag, fm_discriminator, normalize_peak, AudioStats,
    Modulation,
};
pub use filter::{deemphasis, Butterworth, DEEMPHASIS_TAU_US};
pub use resample::{gcd, rational_ratio, RationalResampler};
pub use spectrum::{compute_spectrum, hann_window, Spectrum, SpectrumSummary};
