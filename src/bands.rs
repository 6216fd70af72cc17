//! Band presets and frequency-based decoder suggestions

use serde::Serialize;

/// A named frequency preset
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Band {
    pub name: &'static str,
    pub freq_hz: u64,
    pub mode: &'static str,
    pub bandwidth_hz: u64,
    pub description: &'static str,
}

const fn band(
    name: &'static str,
    freq_hz: u64,
    mode: &'static str,
    bandwidth_hz: u64,
    description: &'static str,
) -> Band {
    Band {
        name,
        freq_hz,
        mode,
        bandwidth_hz,
        description,
    }
}

pub const BANDS: &[Band] = &[
    band("fm_low", 88_100_000, "wfm", 200_000, "FM broadcast band start"),
    band("fm_high", 107_900_000, "wfm", 200_000, "FM broadcast band end"),
    band("aviation_low", 118_000_000, "am", 25_000, "Aviation voice band start"),
    band("aviation_high", 137_000_000, "am", 25_000, "Aviation voice band end"),
    band("atis", 127_850_000, "am", 25_000, "Common ATIS frequency"),
    band("noaa_1", 162_400_000, "nfm", 25_000, "NOAA Weather 1"),
    band("noaa_2", 162_425_000, "nfm", 25_000, "NOAA Weather 2"),
    band("noaa_3", 162_450_000, "nfm", 25_000, "NOAA Weather 3"),
    band("noaa_4", 162_475_000, "nfm", 25_000, "NOAA Weather 4"),
    band("noaa_5", 162_500_000, "nfm", 25_000, "NOAA Weather 5"),
    band("noaa_6", 162_525_000, "nfm", 25_000, "NOAA Weather 6"),
    band("noaa_7", 162_550_000, "nfm", 25_000, "NOAA Weather 7"),
    band("marine_ch16", 156_800_000, "nfm", 25_000, "Marine distress/calling"),
    band("marine_ch13", 156_650_000, "nfm", 25_000, "Marine bridge-to-bridge"),
    band("public_safety_low", 148_000_000, "nfm", 12_500, "VHF public safety"),
    band("public_safety_high", 174_000_000, "nfm", 12_500, "VHF public safety"),
    band("adsb", 1_090_000_000, "adsb", 2_000_000, "ADS-B aircraft tracking"),
    band("aprs", 144_390_000, "nfm", 12_500, "APRS packet radio (144.390 MHz)"),
    band("ism_433", 433_920_000, "nfm", 200_000, "ISM band 433.92 MHz (weather stations, sensors)"),
];

pub fn find_band(name: &str) -> Option<&'static Band> {
    BANDS.iter().find(|b| b.name == name)
}

/// Presets whose name starts with `prefix`
pub fn bands_with_prefix(prefix: &str) -> Vec<&'static Band> {
    BANDS.iter().filter(|b| b.name.starts_with(prefix)).collect()
}

/// Sweep covering a group of presets: 100 kHz either side, stepped by the
/// first preset's bandwidth
pub fn scan_plan(bands: &[&Band]) -> Option<(u64, u64, u64)> {
    let first = bands.first()?;
    let lo = bands.iter().map(|b| b.freq_hz).min()?;
    let hi = bands.iter().map(|b| b.freq_hz).max()?;
    Some((lo.saturating_sub(100_000), hi + 100_000, first.bandwidth_hz))
}

/// Decoder suggestion for a frequency
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Suggestion {
    pub freq_hz: u64,
    /// Pipeline family: aircraft, aprs, ism, voice
    pub pipeline: &'static str,
    pub mode: &'static str,
    pub description: &'static str,
    pub band_match: bool,
}

/// (min_hz, max_hz, pipeline, mode, description); narrow ranges come first
const BAND_RULES: &[(u64, u64, &str, &str, &str)] = &[
    (144_385_000, 144_395_000, "aprs", "nfm", "APRS"),
    (156_000_000, 157_000_000, "voice", "nfm", "Marine VHF"),
    (162_395_000, 162_555_000, "voice", "nfm", "NOAA Weather"),
    (433_900_000, 433_940_000, "ism", "nfm", "ISM 433 MHz"),
    (1_089_500_000, 1_090_500_000, "aircraft", "adsb", "ADS-B aircraft"),
    (88_000_000, 108_000_000, "voice", "wfm", "FM broadcast"),
    (118_000_000, 137_000_000, "voice", "am", "Aviation"),
    (148_000_000, 174_000_000, "voice", "auto", "VHF public safety"),
    (400_000_000, 470_000_000, "voice", "auto", "UHF land mobile"),
    (800_000_000, 900_000_000, "voice", "auto", "800 MHz public safety"),
];

/// Guess a decoder from the band plan; unknown frequencies get digital
/// voice auto-detection
pub fn suggest_decoder(freq_hz: u64) -> Suggestion {
    BAND_RULES
        .iter()
        .find(|(lo, hi, ..)| (*lo..=*hi).contains(&freq_hz))
        .map(|&(_, _, pipeline, mode, description)| Suggestion {
            freq_hz,
            pipeline,
            mode,
            description,
            band_match: true,
        })
        .unwrap_or(Suggestion {
            freq_hz,
            pipeline: "voice",
            mode: "auto",
            description: "Unknown frequency, trying auto-detect",
            band_match: false,
        })
}
