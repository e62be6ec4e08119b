//! # Frequency Hopping
//!
//! Both ends walk the same pseudo-random channel list, one step per frame.
//! The list is derived from the bind seed, so only bound ends agree on it.

/// 2.4 GHz ISM band, 1 MHz raster
pub const FHSS_BAND_START_HZ: u32 = 2_400_400_000;
pub const FHSS_CHANNEL_SPACING_HZ: u32 = 1_000_000;
pub const FHSS_BAND_CHANNELS: usize = 80;

/// Upper bound of hop channels in use
pub const FHSS_MAX_NUM: usize = 64;

/// Sequence of frequencies to hop through
pub trait FrequencyHopper {
    fn hop_to_next(&mut self);

    fn curr_freq(&self) -> u32;

    /// Position in the hop list
    fn curr_i(&self) -> u8;

    /// Number of hop channels
    fn cnt(&self) -> u8;
}

/// Seeded hop list
#[derive(Debug, Clone)]
pub struct Fhss {
    freq_list: Vec<u32>,
    curr_i: usize,
}

impl Fhss {
    /// Build a list of `num` distinct channels from `seed`
    ///
    /// `num` is clamped to 1..=[`FHSS_MAX_NUM`].
    pub fn new(num: usize, seed: u32) -> Self {
        let num = num.clamp(1, FHSS_MAX_NUM);

        let mut used = [false; FHSS_BAND_CHANNELS];
        let mut freq_list = Vec::with_capacity(num);
        let mut prng = seed;

        while freq_list.len() < num {
            prng = prng.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let ch = ((prng >> 16) as usize) % FHSS_BAND_CHANNELS;
            if used[ch] {
                continue;
            }
            used[ch] = true;
            freq_list.push(FHSS_BAND_START_HZ + ch as u32 * FHSS_CHANNEL_SPACING_HZ);
        }

        Self { freq_list, curr_i: 0 }
    }

    /// Rewind to the start of the list
    pub fn start_tx(&mut self) {
        self.curr_i = 0;
    }

    pub fn freq_list(&self) -> &[u32] {
        &self.freq_list
    }
}

impl FrequencyHopper for Fhss {
    fn hop_to_next(&mut self) {
        self.curr_i = (self.curr_i + 1) % self.freq_list.len();
    }

    fn curr_freq(&self) -> u32 {
        self.freq_list[self.curr_i]
    }

    fn curr_i(&self) -> u8 {
        self.curr_i as u8
    }

    fn cnt(&self) -> u8 {
        self.freq_list.len() as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channels_distinct_and_in_band() {
        let fhss = Fhss::new(24, 0xC0FFEE);
        let list = fhss.freq_list();
        assert_eq!(list.len(), 24);

        let mut sorted = list.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 24);

        let band_end = FHSS_BAND_START_HZ + (FHSS_BAND_CHANNELS as u32 - 1) * FHSS_CHANNEL_SPACING_HZ;
        assert!(list.iter().all(|&f| (FHSS_BAND_START_HZ..=band_end).contains(&f)));
    }

    #[test]
    fn test_same_seed_same_list() {
        assert_eq!(Fhss::new(12, 42).freq_list(), Fhss::new(12, 42).freq_list());
        assert_ne!(Fhss::new(12, 42).freq_list(), Fhss::new(12, 43).freq_list());
    }

    #[test]
    fn test_hop_wraps() {
        let mut fhss = Fhss::new(3, 1);
        let first = fhss.curr_freq();
        fhss.hop_to_next();
        fhss.hop_to_next();
        assert_eq!(fhss.curr_i(), 2);
        fhss.hop_to_next();
        assert_eq!(fhss.curr_i(), 0);
        assert_eq!(fhss.curr_freq(), first);
        assert_eq!(fhss.cnt(), 3);
    }

    #[test]
    fn test_num_clamped() {
        assert_eq!(Fhss::new(0, 7).cnt(), 1);
        assert_eq!(Fhss::new(500, 7).cnt() as usize, FHSS_MAX_NUM);
    }
}
