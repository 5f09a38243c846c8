//! Fixed-capacity page rings between the DMA engines and the flash

use crate::types::{Page, PAGE_SIZE, RX_RING_PAGES, TX_RING_PAGES};

/// Ring errors
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RingError {
    /// No free slot for another page
    Overflow,
    /// No page to consume
    Underflow,
}

#[cfg(feature = "std")]
impl core::fmt::Display for RingError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RingError::Overflow => write!(f, "Page ring overflow"),
            RingError::Underflow => write!(f, "Page ring underflow"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RingError {}

/// Ring of `N` pages with monotonic producer / consumer counters
///
/// `produced - consumed` is the fill level and never exceeds `N`; the
/// counters are reduced modulo `N` only to pick a slot.
pub struct PageRing<const N: usize> {
    pages: [Page; N],
    produced: u32,
    consumed: u32,
}

impl<const N: usize> PageRing<N> {
    pub const fn new() -> Self {
        Self {
            pages: [[0; PAGE_SIZE]; N],
            produced: 0,
            consumed: 0,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn len(&self) -> usize {
        self.produced.wrapping_sub(self.consumed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.produced == self.consumed
    }

    pub fn is_full(&self) -> bool {
        self.len() >= N
    }

    /// Pages pushed since the last reset
    pub fn produced(&self) -> u32 {
        self.produced
    }

    /// Pages consumed since the last reset
    pub fn consumed(&self) -> u32 {
        self.consumed
    }

    fn slot(counter: u32) -> usize {
        counter as usize % N
    }

    /// Copy a page in
    pub fn push(&mut self, page: &Page) -> Result<(), RingError> {
        let slot = self.vacant()?;
        slot.copy_from_slice(page);
        self.produced = self.produced.wrapping_add(1);
        Ok(())
    }

    /// Slot the next page will occupy, published by `commit`
    pub fn vacant(&mut self) -> Result<&mut Page, RingError> {
        if self.is_full() {
            return Err(RingError::Overflow);
        }
        Ok(&mut self.pages[Self::slot(self.produced)])
    }

    /// Publish the page written through `vacant`
    pub fn commit(&mut self) -> Result<(), RingError> {
        if self.is_full() {
            return Err(RingError::Overflow);
        }
        self.produced = self.produced.wrapping_add(1);
        Ok(())
    }

    /// Oldest page, left in place
    pub fn front(&self) -> Result<&Page, RingError> {
        if self.is_empty() {
            return Err(RingError::Underflow);
        }
        Ok(&self.pages[Self::slot(self.consumed)])
    }

    /// Release the oldest page
    pub fn pop(&mut self) -> Result<(), RingError> {
        if self.is_empty() {
            return Err(RingError::Underflow);
        }
        self.consumed = self.consumed.wrapping_add(1);
        Ok(())
    }

    /// Copy the oldest page out and release it
    pub fn pop_into(&mut self, out: &mut Page) -> Result<(), RingError> {
        out.copy_from_slice(self.front()?);
        self.pop()
    }

    /// Drop every page and restart both counters
    pub fn reset(&mut self) {
        self.produced = 0;
        self.consumed = 0;
    }
}

impl<const N: usize> Default for PageRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Capture (TX) and playback (RX) rings
pub struct AudioBuffers {
    /// Filled from the capture DMA, drained into flash
    pub tx: PageRing<TX_RING_PAGES>,
    /// Filled from flash, drained into the playback DMA
    pub rx: PageRing<RX_RING_PAGES>,
}

impl AudioBuffers {
    pub const fn new() -> Self {
        Self {
            tx: PageRing::new(),
            rx: PageRing::new(),
        }
    }
}

impl Default for AudioBuffers {
    fn default() -> Self {
        Self::new()
    }
}
