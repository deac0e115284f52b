//! # 5.8 GHz Band/Channel Tables
//!
//! The conventional five-band, eight-channel frequency plan shared by both
//! vendor protocols. Index 0 in the name tables is the "undefined" slot so
//! that 1-origin band/channel values index directly.

/// Number of selectable bands
pub const VTX_BAND_COUNT: u8 = 5;

/// Number of channels per band
pub const VTX_CHANNEL_COUNT: u8 = 8;

/// Band names, index 0 = undefined
pub const BAND_NAMES: [&str; VTX_BAND_COUNT as usize + 1] = [
    "--------", "BOSCAM A", "BOSCAM B", "BOSCAM E", "FATSHARK", "RACEBAND",
];

/// One letter per band, index 0 = undefined
pub const BAND_LETTERS: [char; VTX_BAND_COUNT as usize + 1] = ['-', 'A', 'B', 'E', 'F', 'R'];

/// Channel names, index 0 = undefined
pub const CHANNEL_NAMES: [&str; VTX_CHANNEL_COUNT as usize + 1] =
    ["-", "1", "2", "3", "4", "5", "6", "7", "8"];

/// Frequency in MHz for each band/channel (0-origin rows/columns)
const FREQUENCY_TABLE: [[u16; VTX_CHANNEL_COUNT as usize]; VTX_BAND_COUNT as usize] = [
    [5865, 5845, 5825, 5805, 5785, 5765, 5745, 5725], // Boscam A
    [5733, 5752, 5771, 5790, 5809, 5828, 5847, 5866], // Boscam B
    [5705, 5685, 5665, 5645, 5885, 5905, 5925, 5945], // Boscam E
    [5740, 5760, 5780, 5800, 5820, 5840, 5860, 5880], // FatShark
    [5658, 5695, 5732, 5769, 5806, 5843, 5880, 5917], // RaceBand
];

/// Look up the frequency for a 1-origin band/channel pair.
///
/// Returns `None` for out-of-range values (band 0 means "direct frequency"
/// and has no table entry).
pub fn band_channel_to_freq(band: u8, channel: u8) -> Option<u16> {
    if band == 0 || band > VTX_BAND_COUNT || channel == 0 || channel > VTX_CHANNEL_COUNT {
        return None;
    }
    Some(FREQUENCY_TABLE[band as usize - 1][channel as usize - 1])
}

/// Reverse lookup: find the 1-origin band/channel pair for a frequency.
///
/// Some frequencies appear in more than one band (e.g. 5880 MHz); the first
/// match in band order wins.
pub fn freq_to_band_channel(freq_mhz: u16) -> Option<(u8, u8)> {
    for (band_idx, band) in FREQUENCY_TABLE.iter().enumerate() {
        for (chan_idx, &f) in band.iter().enumerate() {
            if f == freq_mhz {
                return Some((band_idx as u8 + 1, chan_idx as u8 + 1));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_frequencies() {
        // FatShark 1 (F1) and RaceBand 8 (R8) are common reference points
        assert_eq!(band_channel_to_freq(4, 1), Some(5740));
        assert_eq!(band_channel_to_freq(5, 8), Some(5917));
        assert_eq!(band_channel_to_freq(1, 1), Some(5865));
    }

    #[test]
    fn test_out_of_range_band_channel() {
        assert_eq!(band_channel_to_freq(0, 1), None);
        assert_eq!(band_channel_to_freq(6, 1), None);
        assert_eq!(band_channel_to_freq(4, 0), None);
        assert_eq!(band_channel_to_freq(4, 9), None);
    }

    #[test]
    fn test_reverse_lookup() {
        assert_eq!(freq_to_band_channel(5740), Some((4, 1)));
        assert_eq!(freq_to_band_channel(5658), Some((5, 1)));
        assert_eq!(freq_to_band_channel(1234), None);
    }

    #[test]
    fn test_reverse_lookup_prefers_first_band() {
        // 5880 exists in both FatShark (F8) and RaceBand (R7)
        assert_eq!(freq_to_band_channel(5880), Some((4, 8)));
    }

    #[test]
    fn test_name_tables_align_with_counts() {
        assert_eq!(BAND_NAMES.len(), VTX_BAND_COUNT as usize + 1);
        assert_eq!(CHANNEL_NAMES.len(), VTX_CHANNEL_COUNT as usize + 1);
        assert_eq!(BAND_LETTERS[5], 'R');
    }
}
