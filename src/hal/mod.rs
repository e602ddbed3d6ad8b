//! Hardware Abstraction Layer implementations.
//!
//! This module contains concrete implementations of the traits
//! defined in [`crate::traits`].
//!
//! # Available Implementations
//!
//! - `mock`: Test implementations for desktop development and the simulator
//!
//! Board support (H-bridge, ADC, RailCom UART) lives in the firmware crate
//! that embeds this one.

pub mod mock;

pub use mock::*;
