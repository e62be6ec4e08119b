//! # Antenna Diversity
//!
//! Picks the authoritative antenna for a cycle from the per-antenna receive
//! outcomes.

use serde::Deserialize;

/// Receive antenna / radio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Antenna {
    Antenna1,
    Antenna2,
}

impl Antenna {
    pub const ALL: [Antenna; 2] = [Antenna::Antenna1, Antenna::Antenna2];

    /// Slot index, also the wire value
    pub fn index(self) -> usize {
        match self {
            Self::Antenna1 => 0,
            Self::Antenna2 => 1,
        }
    }

    pub fn as_u8(self) -> u8 {
        self.index() as u8
    }
}

/// Outcome of one antenna's receive window, ordered None < Invalid < Valid
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum AntennaOutcome {
    /// Nothing arrived
    #[default]
    None,
    /// Something arrived but failed validation
    Invalid,
    Valid,
}

/// Which radios are in use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AntennaConfig {
    Antenna1,
    Antenna2,
    #[default]
    Diversity,
}

impl AntennaConfig {
    pub fn uses(self, antenna: Antenna) -> bool {
        match self {
            Self::Antenna1 => antenna == Antenna::Antenna1,
            Self::Antenna2 => antenna == Antenna::Antenna2,
            Self::Diversity => true,
        }
    }

    /// Active antennas
    pub fn antennas(self) -> impl Iterator<Item = Antenna> {
        Antenna::ALL.into_iter().filter(move |&a| self.uses(a))
    }

    /// Wire value: 0 = diversity, 1 = antenna 1, 2 = antenna 2
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Diversity => 0,
            Self::Antenna1 => 1,
            Self::Antenna2 => 2,
        }
    }
}

/// Result of a cycle's antenna arbitration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    /// Some active antenna got a frame, valid or not
    pub frame_received: bool,
    /// Some active antenna got a valid frame
    pub valid_frame_received: bool,
    /// Antenna to take the frame and RSSI from, `None` if nothing arrived
    pub antenna: Option<Antenna>,
}

/// Per-cycle antenna arbitration
#[derive(Debug, Clone, Copy)]
pub struct DiversitySelector {
    config: AntennaConfig,
}

impl DiversitySelector {
    pub fn new(config: AntennaConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> AntennaConfig {
        self.config
    }

    /// Choose the antenna for this cycle
    ///
    /// # Arguments
    ///
    /// * `outcomes` - Receive outcome per antenna, indexed by [`Antenna::index`]
    /// * `rssi` - Last RSSI per antenna
    ///
    /// # Returns
    ///
    /// * `Selection` - Aggregate receive flags and the chosen antenna
    pub fn select(&self, outcomes: [AntennaOutcome; 2], rssi: [i8; 2]) -> Selection {
        let best = self
            .config
            .antennas()
            .map(|a| outcomes[a.index()])
            .max()
            .unwrap_or_default();

        let frame_received = best > AntennaOutcome::None;
        if !frame_received {
            return Selection {
                frame_received,
                valid_frame_received: false,
                antenna: None,
            };
        }

        let antenna = match self.config {
            AntennaConfig::Antenna1 => Antenna::Antenna1,
            AntennaConfig::Antenna2 => Antenna::Antenna2,
            AntennaConfig::Diversity => {
                let [rx1, rx2] = outcomes;
                if rx1 != rx2 {
                    if rx1 > rx2 { Antenna::Antenna1 } else { Antenna::Antenna2 }
                } else if rssi[0] > rssi[1] {
                    Antenna::Antenna1
                } else {
                    Antenna::Antenna2
                }
            }
        };

        Selection {
            frame_received,
            valid_frame_received: best == AntennaOutcome::Valid,
            antenna: Some(antenna),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AntennaOutcome::*;

    fn diversity() -> DiversitySelector {
        DiversitySelector::new(AntennaConfig::Diversity)
    }

    #[test]
    fn test_both_valid_higher_rssi_wins() {
        let sel = diversity().select([Valid, Valid], [-60, -70]);
        assert_eq!(sel.antenna, Some(Antenna::Antenna1));
        assert!(sel.valid_frame_received);

        let sel = diversity().select([Valid, Valid], [-80, -70]);
        assert_eq!(sel.antenna, Some(Antenna::Antenna2));
    }

    #[test]
    fn test_valid_beats_invalid_regardless_of_rssi() {
        let sel = diversity().select([Valid, Invalid], [-110, -30]);
        assert_eq!(sel.antenna, Some(Antenna::Antenna1));

        let sel = diversity().select([Invalid, Valid], [-30, -110]);
        assert_eq!(sel.antenna, Some(Antenna::Antenna2));
    }

    #[test]
    fn test_invalid_beats_none() {
        let sel = diversity().select([None, Invalid], [-20, -100]);
        assert_eq!(sel.antenna, Some(Antenna::Antenna2));
        assert!(sel.frame_received);
        assert!(!sel.valid_frame_received);
    }

    #[test]
    fn test_nothing_received() {
        let sel = diversity().select([None, None], [-50, -60]);
        assert_eq!(sel, Selection { frame_received: false, valid_frame_received: false, antenna: Option::None });
    }

    #[test]
    fn test_equal_rssi_picks_antenna2() {
        let sel = diversity().select([Invalid, Invalid], [-90, -90]);
        assert_eq!(sel.antenna, Some(Antenna::Antenna2));
    }

    #[test]
    fn test_single_antenna_always_selected() {
        let sel = DiversitySelector::new(AntennaConfig::Antenna2).select([Valid, Invalid], [-40, -100]);
        assert_eq!(sel.antenna, Some(Antenna::Antenna2));
        assert!(!sel.valid_frame_received, "inactive antenna must not count");

        let sel = DiversitySelector::new(AntennaConfig::Antenna1).select([None, Valid], [0, 0]);
        assert!(!sel.frame_received);
    }

    #[test]
    fn test_non_selected_antenna_counts_as_received() {
        let sel = diversity().select([Valid, Invalid], [-100, -50]);
        assert!(sel.frame_received);
        assert!(sel.valid_frame_received);
    }
}
