//! Interrupt to task notifications
//!
//! DMA completion handlers only bump a counter, set a bit and wake the
//! recorder task. All page accounting happens in the task.

use core::future::poll_fn;
use core::task::Poll;

use embassy_sync::waitqueue::AtomicWaker;
use portable_atomic::{AtomicU32, AtomicU8, Ordering};

use crate::types::RecorderState;

/// A playback DMA page finished
pub const PLAYBACK_FLAG: u32 = 0x01;
/// A capture DMA page finished
pub const CAPTURE_FLAG: u32 = 0x02;
/// Captured pages are still waiting to be written to flash
pub const RECORD_FLAG: u32 = 0x04;

/// Everything that happened since the previous take
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Notification {
    /// Capture pages completed
    pub captured: u32,
    /// Playback pages completed
    pub played: u32,
    /// Raw flag bits
    pub flags: u32,
}

impl Notification {
    pub fn record_pending(&self) -> bool {
        self.flags & RECORD_FLAG != 0
    }
}

/// Notification bits shared between the DMA interrupts and the recorder task
pub struct DmaNotifier {
    flags: AtomicU32,
    captured: AtomicU32,
    played: AtomicU32,
    waker: AtomicWaker,
}

impl DmaNotifier {
    pub const fn new() -> Self {
        Self {
            flags: AtomicU32::new(0),
            captured: AtomicU32::new(0),
            played: AtomicU32::new(0),
            waker: AtomicWaker::new(),
        }
    }

    /// Capture DMA interrupt: one more page is ready
    pub fn capture_complete(&self) {
        self.captured.fetch_add(1, Ordering::AcqRel);
        self.raise(CAPTURE_FLAG);
    }

    /// Playback DMA interrupt: one more page went out
    pub fn playback_complete(&self) {
        self.played.fetch_add(1, Ordering::AcqRel);
        self.raise(PLAYBACK_FLAG);
    }

    /// Set flag bits and wake the waiting task
    pub fn raise(&self, flags: u32) {
        self.flags.fetch_or(flags, Ordering::AcqRel);
        self.waker.wake();
    }

    /// Consume pending notifications without waiting
    pub fn try_take(&self) -> Option<Notification> {
        let flags = self.flags.swap(0, Ordering::AcqRel);
        if flags == 0 {
            return None;
        }
        // Counters are bumped before the flag, so a swap here can only see
        // more completions than the flags announce, never fewer.
        Some(Notification {
            captured: self.captured.swap(0, Ordering::AcqRel),
            played: self.played.swap(0, Ordering::AcqRel),
            flags,
        })
    }

    /// Wait for any notification bit
    pub async fn wait(&self) -> Notification {
        poll_fn(|cx| {
            self.waker.register(cx.waker());
            match self.try_take() {
                Some(notification) => Poll::Ready(notification),
                None => Poll::Pending,
            }
        })
        .await
    }

    /// Drop everything pending
    pub fn clear(&self) {
        self.flags.store(0, Ordering::Release);
        self.captured.store(0, Ordering::Release);
        self.played.store(0, Ordering::Release);
    }
}

impl Default for DmaNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Recorder state published for readers outside the recorder task
///
/// Also counts the commands the recorder has finished, so a command source
/// can wait until the state it reads reflects everything it sent.
pub struct StateCell {
    raw: AtomicU8,
    handled: AtomicU32,
    waker: AtomicWaker,
}

impl StateCell {
    pub const fn new() -> Self {
        Self {
            raw: AtomicU8::new(RecorderState::Idle.as_u8()),
            handled: AtomicU32::new(0),
            waker: AtomicWaker::new(),
        }
    }

    pub fn load(&self) -> RecorderState {
        RecorderState::from_u8(self.raw.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: RecorderState) {
        self.raw.store(state.as_u8(), Ordering::Release);
    }

    /// Commands executed so far (wrapping)
    pub fn commands_handled(&self) -> u32 {
        self.handled.load(Ordering::Acquire)
    }

    /// Recorder side: one more command is done, its state is published
    pub(crate) fn acknowledge(&self) {
        self.handled.fetch_add(1, Ordering::AcqRel);
        self.waker.wake();
    }

    /// Wait until `count` commands have been executed
    pub async fn wait_handled(&self, count: u32) {
        poll_fn(|cx| {
            self.waker.register(cx.waker());
            // Wrapping distance, so the counter may overflow
            if self.commands_handled().wrapping_sub(count) as i32 >= 0 {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
        .await
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Statics shared by the interrupt handlers, the recorder and the UI
pub struct RecorderSignals {
    pub notifier: DmaNotifier,
    pub state: StateCell,
}

impl RecorderSignals {
    pub const fn new() -> Self {
        Self {
            notifier: DmaNotifier::new(),
            state: StateCell::new(),
        }
    }
}

impl Default for RecorderSignals {
    fn default() -> Self {
        Self::new()
    }
}
