//! Hardware seams consumed by the track controller.
//!
//! The core never touches pins or ADCs itself. It needs three things from
//! the board:
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`CurrentSense`] | Instantaneous track current and a baseline for ack detection |
//! | [`RailcomResponder`] | Where programming-on-main answers are delivered |
//! | [`TrackHardware`] | Both of the above, what [`TrackController`] is generic over |
//!
//! For tests and desktop development use [`crate::hal::MockTrackHardware`].
//!
//! # Example
//!
//! ```rust
//! use rs_dcc::traits::CurrentSense;
//! use rs_dcc::hal::MockTrackHardware;
//!
//! let mut hw = MockTrackHardware::new().with_current(12);
//! hw.set_base_current();
//! hw.current_ma = 80;
//! assert_eq!(hw.read_current_ma() - hw.base_current_ma(), 68);
//! ```
//!
//! [`TrackController`]: crate::TrackController

extern crate alloc;

use alloc::boxed::Box;

/// Direction of travel encoded in bit 7 of the 128-step speed byte.
///
/// # Default
///
/// Defaults to [`Forward`](Self::Forward), which is what a decoder assumes
/// after power-up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Direction {
    /// Locomotive runs forward (direction bit set).
    #[default]
    Forward,
    /// Locomotive runs in reverse (direction bit clear).
    Reverse,
}

impl Direction {
    /// The direction bit as it appears in the speed byte.
    #[inline]
    pub const fn bit(self) -> u8 {
        match self {
            Direction::Forward => 0x80,
            Direction::Reverse => 0x00,
        }
    }

    /// Direction from the command protocol's `1` (forward) / `0` (reverse) flag.
    #[inline]
    pub const fn from_forward(forward: bool) -> Self {
        if forward {
            Direction::Forward
        } else {
            Direction::Reverse
        }
    }

    /// Returns true for [`Direction::Forward`].
    #[inline]
    pub const fn is_forward(self) -> bool {
        matches!(self, Direction::Forward)
    }

    /// Returns the direction as a lowercase string.
    ///
    /// ```
    /// use rs_dcc::traits::Direction;
    ///
    /// assert_eq!(Direction::Forward.as_str(), "forward");
    /// assert_eq!(Direction::Reverse.as_str(), "reverse");
    /// ```
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Reverse => "reverse",
        }
    }
}

/// Track current sensing used to detect service-mode acknowledgments.
///
/// A decoder acknowledges by drawing roughly 60 mA extra for about 6 ms.
/// The controller calls [`set_base_current`](Self::set_base_current) when a
/// programming operation starts and afterwards compares each reading
/// against that baseline.
///
/// # Implementation Notes
///
/// - `read_current_ma` is called once per tick while a verification is
///   pending, so it should be a single ADC conversion, not an average over
///   many milliseconds
/// - The baseline should be taken with the decoder powered but idle
pub trait CurrentSense {
    /// Instantaneous track current in milliamps.
    fn read_current_ma(&mut self) -> u32;

    /// Latch the present current as the idle baseline.
    fn set_base_current(&mut self);

    /// The latched baseline in milliamps.
    fn base_current_ma(&self) -> u32;

    /// Current above baseline, saturating at zero.
    fn current_rise_ma(&mut self) -> u32 {
        let base = self.base_current_ma();
        self.read_current_ma().saturating_sub(base)
    }
}

/// A programming-on-main answer received over RailCom.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PomResponse {
    /// Sequence id of the POM packet being answered.
    pub transaction_id: u16,
    /// Decoded RailCom data (CV value for reads and writes).
    pub data: u32,
}

/// Callback invoked by the RailCom demodulator with a POM answer.
pub type PomCallback = Box<dyn FnMut(PomResponse) + Send>;

/// RailCom back-channel registration.
///
/// The demodulator itself lives in the board support code; the core only
/// tells it where to deliver the next programming-on-main answer.
pub trait RailcomResponder {
    /// Replace the callback that receives POM answers.
    fn set_pom_callback(&mut self, callback: PomCallback);
}

/// Everything the track controller needs from the board.
pub trait TrackHardware: CurrentSense + RailcomResponder {}

impl<T: CurrentSense + RailcomResponder> TrackHardware for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_default_is_forward() {
        assert_eq!(Direction::default(), Direction::Forward);
    }

    #[test]
    fn direction_bit() {
        assert_eq!(Direction::Forward.bit(), 0x80);
        assert_eq!(Direction::Reverse.bit(), 0x00);
    }

    #[test]
    fn direction_from_forward_flag() {
        assert_eq!(Direction::from_forward(true), Direction::Forward);
        assert_eq!(Direction::from_forward(false), Direction::Reverse);
        assert!(Direction::from_forward(true).is_forward());
        assert!(!Direction::Reverse.is_forward());
    }

    struct TestSense {
        now: u32,
        base: u32,
    }

    impl CurrentSense for TestSense {
        fn read_current_ma(&mut self) -> u32 {
            self.now
        }

        fn set_base_current(&mut self) {
            self.base = self.now;
        }

        fn base_current_ma(&self) -> u32 {
            self.base
        }
    }

    #[test]
    fn current_rise_default_impl() {
        let mut sense = TestSense { now: 40, base: 0 };
        sense.set_base_current();
        assert_eq!(sense.current_rise_ma(), 0);

        sense.now = 110;
        assert_eq!(sense.current_rise_ma(), 70);

        // Below baseline saturates instead of wrapping
        sense.now = 10;
        assert_eq!(sense.current_rise_ma(), 0);
    }
}
