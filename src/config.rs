//! Station and per-track configuration.
//!
//! Uses `heapless::String` for `no_std` compatibility while remaining
//! ergonomic to use on desktop with `std`.
//!
//! # Example
//!
//! ```rust
//! use rs_dcc::config::{StationConfig, TrackConfig};
//!
//! // Use defaults
//! let config = StationConfig::default();
//! assert_eq!(config.main.num_devices, 50);
//!
//! // Or customize
//! let config = StationConfig::default()
//!     .with_main(TrackConfig::main().with_num_devices(12))
//!     .with_prog(TrackConfig::programming().with_ack_threshold_ma(45));
//! ```

use heapless::String as HString;

/// Maximum length for short config strings (track names)
pub const MAX_SHORT_STRING: usize = 16;

/// Type alias for short config strings
pub type ShortString = HString<MAX_SHORT_STRING>;

/// Current rise over baseline that counts as a decoder ack (NMRA S-9.2.3).
pub const DEFAULT_ACK_THRESHOLD_MA: u32 = 60;

/// Queue headroom a byte or bit write needs before it starts.
pub const DEFAULT_WRITE_HEADROOM: usize = 8;

/// Queue headroom a byte read needs before it starts.
pub const DEFAULT_READ_HEADROOM: usize = 25;

/// Create a ShortString from a &str, truncating if too long
pub fn short_string(s: &str) -> ShortString {
    let mut hs = ShortString::new();
    let take = s.len().min(MAX_SHORT_STRING);
    // Find valid UTF-8 boundary
    let valid_end = s
        .char_indices()
        .take_while(|(i, _)| *i < take)
        .filter(|(i, c)| i + c.len_utf8() <= take)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    let _ = hs.push_str(&s[..valid_end]);
    hs
}

// ============================================================================
// Station Config
// ============================================================================

/// Configuration for both tracks of a command station.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StationConfig {
    /// Operations (main) track
    pub main: TrackConfig,
    /// Programming (service) track
    pub prog: TrackConfig,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            main: TrackConfig::main(),
            prog: TrackConfig::programming(),
        }
    }
}

impl StationConfig {
    /// Set main track configuration
    pub fn with_main(mut self, main: TrackConfig) -> Self {
        self.main = main;
        self
    }

    /// Set programming track configuration
    pub fn with_prog(mut self, prog: TrackConfig) -> Self {
        self.prog = prog;
        self
    }
}

// ============================================================================
// Track Config
// ============================================================================

/// Configuration for one track and its packet engine.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackConfig {
    /// Track name used in logs ("A", "B", ...)
    pub name: ShortString,
    /// Number of throttle slots in the speed table
    pub num_devices: u16,
    /// Current rise (mA) over baseline that counts as an ack
    pub ack_threshold_ma: u32,
    /// Free queue slots required before a CV write starts
    pub write_headroom: usize,
    /// Free queue slots required before a CV read starts
    pub read_headroom: usize,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self::main()
    }
}

impl TrackConfig {
    /// Defaults for the operations track.
    pub fn main() -> Self {
        Self {
            name: short_string("A"),
            num_devices: 50,
            ack_threshold_ma: DEFAULT_ACK_THRESHOLD_MA,
            write_headroom: DEFAULT_WRITE_HEADROOM,
            read_headroom: DEFAULT_READ_HEADROOM,
        }
    }

    /// Defaults for the programming track.
    pub fn programming() -> Self {
        Self {
            name: short_string("B"),
            num_devices: 2,
            ..Self::main()
        }
    }

    /// Set the track name
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = short_string(name);
        self
    }

    /// Set the number of speed-table slots
    pub fn with_num_devices(mut self, num_devices: u16) -> Self {
        self.num_devices = num_devices;
        self
    }

    /// Set the ack threshold
    pub fn with_ack_threshold_ma(mut self, ma: u32) -> Self {
        self.ack_threshold_ma = ma;
        self
    }

    /// Set the queue headroom required by CV writes and reads
    pub fn with_headroom(mut self, write: usize, read: usize) -> Self {
        self.write_headroom = write;
        self.read_headroom = read;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn station_defaults() {
        let config = StationConfig::default();
        assert_eq!(config.main.name.as_str(), "A");
        assert_eq!(config.prog.name.as_str(), "B");
        assert_eq!(config.main.num_devices, 50);
        assert_eq!(config.prog.num_devices, 2);
        assert_eq!(config.prog.ack_threshold_ma, 60);
        assert_eq!(config.prog.write_headroom, 8);
        assert_eq!(config.prog.read_headroom, 25);
    }

    #[test]
    fn track_builder_chain() {
        let track = TrackConfig::programming()
            .with_name("prog")
            .with_num_devices(0)
            .with_ack_threshold_ma(45)
            .with_headroom(10, 40);
        assert_eq!(track.name.as_str(), "prog");
        assert_eq!(track.num_devices, 0);
        assert_eq!(track.ack_threshold_ma, 45);
        assert_eq!(track.write_headroom, 10);
        assert_eq!(track.read_headroom, 40);
    }

    #[test]
    fn station_builder_replaces_tracks() {
        let config = StationConfig::default()
            .with_main(TrackConfig::main().with_num_devices(4))
            .with_prog(TrackConfig::programming().with_name("P"));
        assert_eq!(config.main.num_devices, 4);
        assert_eq!(config.prog.name.as_str(), "P");
    }

    #[test]
    fn short_string_truncates() {
        let s = short_string("a-very-long-track-name-indeed");
        assert_eq!(s.len(), MAX_SHORT_STRING);
        assert_eq!(s.as_str(), "a-very-long-trac");
    }

    #[test]
    fn short_string_respects_utf8_boundary() {
        // 15 ASCII bytes then a 2-byte char straddling the limit
        let s = short_string("abcdefghijklmnoé");
        assert_eq!(s.as_str(), "abcdefghijklmno");
    }
}
