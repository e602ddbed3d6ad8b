//! Trait definitions for the hardware the core depends on.
//!
//! This module defines the abstractions that let the DCC core:
//! - Run on any command-station board (the board support crate implements them)
//! - Be tested on the desktop with [`crate::hal`] mocks
//!
//! # Hardware Abstraction
//!
//! - [`CurrentSense`]: Track current for acknowledgment detection
//! - [`RailcomResponder`]: Delivery of programming-on-main answers
//! - [`TrackHardware`]: The combination the track controller is generic over

pub mod hardware;

pub use hardware::*;
