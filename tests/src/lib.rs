//! Host-side integration tests for the voice recorder
//!
//! `rig` wires the recorder to simulated flash and DMA; the test modules
//! drive whole record / playback sessions through it.

pub mod rig;

#[cfg(test)]
mod recorder_tests;
#[cfg(test)]
mod journal_tests;
