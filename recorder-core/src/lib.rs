#![cfg_attr(not(any(test, feature = "std")), no_std)]

//! # Recorder Core
//!
//! Voice recorder core logic for embedded systems: pages microphone audio
//! into external NOR flash behind the capture DMA, keeps a journal of the
//! last recording in a reserved index sector, and streams it back to the
//! playback DMA.

pub mod types;
pub mod hal;
pub mod storage;
pub mod ring;
pub mod journal;
pub mod notify;
pub mod recorder;
pub mod events;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;


pub use types::*;
pub use hal::*;
pub use storage::*;
pub use ring::*;
pub use journal::*;
pub use notify::*;
pub use recorder::*;
pub use events::*;

/// Recorder library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Product configuration: 64 sectors of 256 KiB, 32 sector recordings
pub fn default_config() -> RecorderConfig {
    RecorderConfig::default()
}
