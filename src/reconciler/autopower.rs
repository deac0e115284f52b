//! # Automatic Power Selection
//!
//! Picks a power level from the distance to home, on the model that usable
//! range grows with the square root of transmit power. The reference level
//! is 25 mW; the configured reference distance says how far that level is
//! trusted to reach, and every other level scales from it.

/// Power level all range projections are anchored to
pub const AUTO_POWER_REFERENCE_MW: u16 = 25;

/// Width of the dead band straddling each level boundary
const AUTO_POWER_DEADBAND_M: u32 = 20;

/// Hysteresis state for the level selection.
///
/// Each [`evaluate`](AutoPower::evaluate) call moves the selection by at
/// most one step, so a sudden distance jump walks up level by level instead
/// of leaping to maximum power.
#[derive(Debug, Default)]
pub struct AutoPower {
    valid_from_m: u32,
    valid_until_m: u32,
}

impl AutoPower {
    pub fn new() -> Self {
        Self::default()
    }

    /// Projected usable range of `mw` given the reference distance
    fn range_m(mw: u16, reference_distance_m: u32) -> u32 {
        let scale = (f32::from(mw) / f32::from(AUTO_POWER_REFERENCE_MW)).sqrt();
        (reference_distance_m as f32 * scale) as u32
    }

    /// Pick the power index for `distance_m`, starting from `current_index`.
    ///
    /// `table_mw` is the device's power table in index order; the returned
    /// index is 1-origin into it and differs from `current_index` by at most
    /// one step.
    pub fn evaluate(
        &mut self,
        distance_m: u32,
        current_index: u8,
        table_mw: &[u16],
        reference_distance_m: u32,
    ) -> u8 {
        if table_mw.is_empty() {
            return current_index.max(1);
        }

        let count = table_mw.len() as u8;
        let index = current_index.clamp(1, count);

        let until = Self::range_m(table_mw[index as usize - 1], reference_distance_m);
        let from = if index == 1 {
            0
        } else {
            Self::range_m(table_mw[index as usize - 2], reference_distance_m)
        };

        // No dead band above the lowest level: the first step up must not
        // lag behind a quad flying straight out
        self.valid_until_m = if index == 1 {
            until
        } else {
            until + AUTO_POWER_DEADBAND_M / 2
        };
        self.valid_from_m = from.saturating_sub(AUTO_POWER_DEADBAND_M / 2);

        if distance_m > self.valid_until_m && index < count {
            index + 1
        } else if distance_m < self.valid_from_m {
            index - 1
        } else {
            index
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 25 mW reaches 300 m; 200 mW ~848 m; 500 mW ~1341 m; 800 mW ~1697 m
    const TABLE: [u16; 4] = [25, 200, 500, 800];
    const REF_M: u32 = 300;

    #[test]
    fn test_stays_at_lowest_within_reference_distance() {
        let mut ap = AutoPower::new();
        assert_eq!(ap.evaluate(0, 1, &TABLE, REF_M), 1);
        assert_eq!(ap.evaluate(300, 1, &TABLE, REF_M), 1);
    }

    #[test]
    fn test_steps_up_immediately_past_reference_distance() {
        let mut ap = AutoPower::new();
        // No dead band at the lowest level
        assert_eq!(ap.evaluate(301, 1, &TABLE, REF_M), 2);
    }

    #[test]
    fn test_dead_band_holds_level_near_boundary() {
        let mut ap = AutoPower::new();
        // At level 2 the window is [290, 858]; hovering just below the
        // level-1 boundary must not flap back down
        assert_eq!(ap.evaluate(295, 2, &TABLE, REF_M), 2);
        assert_eq!(ap.evaluate(858, 2, &TABLE, REF_M), 2);
        assert_eq!(ap.evaluate(289, 2, &TABLE, REF_M), 1);
        assert_eq!(ap.evaluate(859, 2, &TABLE, REF_M), 3);
    }

    #[test]
    fn test_one_step_per_evaluation() {
        let mut ap = AutoPower::new();
        // Distance far beyond level 4 range still walks up one at a time
        let mut index = 1;
        index = ap.evaluate(5000, index, &TABLE, REF_M);
        assert_eq!(index, 2);
        index = ap.evaluate(5000, index, &TABLE, REF_M);
        assert_eq!(index, 3);
        index = ap.evaluate(5000, index, &TABLE, REF_M);
        assert_eq!(index, 4);
        // Pinned at the top
        assert_eq!(ap.evaluate(5000, 4, &TABLE, REF_M), 4);
    }

    #[test]
    fn test_returns_home_steps_down() {
        let mut ap = AutoPower::new();
        let mut index = 4;
        index = ap.evaluate(10, index, &TABLE, REF_M);
        assert_eq!(index, 3);
        index = ap.evaluate(10, index, &TABLE, REF_M);
        assert_eq!(index, 2);
        index = ap.evaluate(10, index, &TABLE, REF_M);
        assert_eq!(index, 1);
        assert_eq!(ap.evaluate(10, 1, &TABLE, REF_M), 1);
    }

    #[test]
    fn test_unknown_current_index_clamped() {
        let mut ap = AutoPower::new();
        assert_eq!(ap.evaluate(0, 0, &TABLE, REF_M), 1);
        assert_eq!(ap.evaluate(0, 9, &TABLE, REF_M), 3); // clamped to 4, steps down
    }

    #[test]
    fn test_empty_table() {
        let mut ap = AutoPower::new();
        assert_eq!(ap.evaluate(1000, 0, &[], REF_M), 1);
    }

    #[test]
    fn test_two_level_table() {
        let mut ap = AutoPower::new();
        let table = [25, 100]; // 100 mW ~600 m
        assert_eq!(ap.evaluate(301, 1, &table, REF_M), 2);
        assert_eq!(ap.evaluate(2000, 2, &table, REF_M), 2);
        assert_eq!(ap.evaluate(280, 2, &table, REF_M), 1);
    }
}
