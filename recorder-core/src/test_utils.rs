//! Simulated hardware for host tests
//!
//! Every fake is a cheap handle around shared state, so a test keeps a
//! clone to drive and inspect the device while the recorder owns another.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::hal::{
    CaptureDma, Codec, EventSink, FaultHandler, FlashDevice, FlashError, HalError, PlaybackDma,
    RecorderHal, StorageFault, StorageOp,
};
use crate::notify::DmaNotifier;
use crate::types::{FlashGeometry, Page, PAGE_SIZE};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Page filled with a pattern derived from `seed`
pub fn pattern_page(seed: u32) -> Page {
    let mut page = [0u8; PAGE_SIZE];
    for (i, byte) in page.iter_mut().enumerate() {
        *byte = (seed.wrapping_mul(31).wrapping_add(i as u32 * 7) % 251) as u8;
    }
    page
}

/// Fault hook that turns a storage fault into a test panic
#[derive(Clone, Copy, Debug, Default)]
pub struct PanicOnFault;

impl FaultHandler for PanicOnFault {
    fn halt(&mut self, fault: StorageFault) -> ! {
        panic!("storage fault: {:?}", fault)
    }
}

struct SimFlashState {
    geometry: FlashGeometry,
    data: Vec<u8>,
    busy_polls: u32,
    busy_remaining: u32,
    reject: Option<StorageOp>,
    erases: Vec<u32>,
    programs: u32,
}

/// RAM NOR flash: erase sets bytes to 0xFF, programming may only clear bits
///
/// Programming a byte whose erased state was lost is reported as
/// `NotErased` so tests catch a missing erase.
#[derive(Clone)]
pub struct SimFlash {
    state: Arc<Mutex<SimFlashState>>,
}

impl SimFlash {
    pub fn new(geometry: FlashGeometry) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimFlashState {
                geometry,
                data: vec![0xFF; geometry.capacity() as usize],
                busy_polls: 0,
                busy_remaining: 0,
                reject: None,
                erases: Vec::new(),
                programs: 0,
            })),
        }
    }

    /// Report busy this many times after every erase or program
    pub fn set_busy_polls(&self, polls: u32) {
        locked(&self.state).busy_polls = polls;
    }

    /// Reject the next command of kind `op`
    pub fn reject_next(&self, op: StorageOp) {
        locked(&self.state).reject = Some(op);
    }

    /// Copy of `len` bytes at `address`
    pub fn bytes(&self, address: u32, len: usize) -> Vec<u8> {
        let state = locked(&self.state);
        let start = address as usize;
        state.data[start..start + len].to_vec()
    }

    /// Page `page` of a recording starting at `start_sector`
    pub fn recorded_page(&self, start_sector: u32, page: u32) -> Vec<u8> {
        let address = locked(&self.state).geometry.page_address(start_sector, page);
        self.bytes(address, PAGE_SIZE)
    }

    /// Overwrite bytes directly, ignoring NOR rules
    pub fn poke(&self, address: u32, bytes: &[u8]) {
        let mut state = locked(&self.state);
        let start = address as usize;
        state.data[start..start + bytes.len()].copy_from_slice(bytes);
    }

    /// Sectors erased so far, in order
    pub fn erase_log(&self) -> Vec<u32> {
        locked(&self.state).erases.clone()
    }

    pub fn erase_count(&self, sector: u32) -> usize {
        locked(&self.state)
            .erases
            .iter()
            .filter(|&&erased| erased == sector)
            .count()
    }

    /// Successful program commands so far
    pub fn program_count(&self) -> u32 {
        locked(&self.state).programs
    }

    pub fn is_sector_blank(&self, sector: u32) -> bool {
        let state = locked(&self.state);
        let size = state.geometry.sector_size() as usize;
        let start = sector as usize * size;
        state.data[start..start + size].iter().all(|&b| b == 0xFF)
    }
}

impl SimFlashState {
    fn take_reject(&mut self, op: StorageOp) -> Result<(), FlashError> {
        if self.reject == Some(op) {
            self.reject = None;
            return Err(FlashError::CommandRejected);
        }
        Ok(())
    }

    fn range(&self, address: u32, len: usize) -> Result<core::ops::Range<usize>, FlashError> {
        let start = address as usize;
        let end = start + len;
        if end > self.data.len() {
            return Err(FlashError::OutOfRange);
        }
        Ok(start..end)
    }
}

impl FlashDevice for SimFlash {
    fn erase_sector(&mut self, address: u32, size: u32) -> Result<(), FlashError> {
        let mut state = locked(&self.state);
        state.take_reject(StorageOp::Erase)?;
        if size != state.geometry.sector_size() || address % size != 0 {
            return Err(FlashError::Misaligned);
        }
        let range = state.range(address, size as usize)?;
        state.data[range].fill(0xFF);
        let sector = state.geometry.sector_of(address);
        state.erases.push(sector);
        state.busy_remaining = state.busy_polls;
        Ok(())
    }

    fn program(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        let mut state = locked(&self.state);
        state.take_reject(StorageOp::Write)?;
        let range = state.range(address, data.len())?;
        let target = &mut state.data[range];
        if target.iter().zip(data).any(|(&old, &new)| old & new != new) {
            return Err(FlashError::NotErased);
        }
        for (cell, &byte) in target.iter_mut().zip(data) {
            *cell &= byte;
        }
        state.programs += 1;
        state.busy_remaining = state.busy_polls;
        Ok(())
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let mut state = locked(&self.state);
        state.take_reject(StorageOp::Read)?;
        let range = state.range(address, buf.len())?;
        buf.copy_from_slice(&state.data[range]);
        Ok(())
    }

    fn is_busy(&mut self) -> Result<bool, FlashError> {
        let mut state = locked(&self.state);
        state.take_reject(StorageOp::Status)?;
        if state.busy_remaining > 0 {
            state.busy_remaining -= 1;
            return Ok(true);
        }
        Ok(false)
    }
}

#[derive(Default)]
struct CaptureState {
    enabled: bool,
    fifo: VecDeque<Page>,
    fifo_clears: u32,
}

/// Capture DMA fed by the test
#[derive(Clone, Default)]
pub struct FakeCapture {
    state: Arc<Mutex<CaptureState>>,
}

impl FakeCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Complete one DMA page, like the capture interrupt would
    ///
    /// Nothing happens while the channel is disabled.
    pub fn deliver(&self, page: Page, notifier: &DmaNotifier) -> bool {
        {
            let mut state = locked(&self.state);
            if !state.enabled {
                return false;
            }
            state.fifo.push_back(page);
        }
        notifier.capture_complete();
        true
    }

    pub fn enabled(&self) -> bool {
        locked(&self.state).enabled
    }

    /// Completed pages not yet taken by the recorder
    pub fn pending(&self) -> usize {
        locked(&self.state).fifo.len()
    }

    pub fn fifo_clears(&self) -> u32 {
        locked(&self.state).fifo_clears
    }
}

impl CaptureDma for FakeCapture {
    fn enable(&mut self) {
        locked(&self.state).enabled = true;
    }

    fn disable(&mut self) {
        locked(&self.state).enabled = false;
    }

    fn is_enabled(&self) -> bool {
        self.enabled()
    }

    fn clear_fifo(&mut self) {
        let mut state = locked(&self.state);
        state.fifo.clear();
        state.fifo_clears += 1;
    }

    fn take_page(&mut self, page: &mut Page) -> bool {
        match locked(&self.state).fifo.pop_front() {
            Some(captured) => {
                page.copy_from_slice(&captured);
                true
            }
            None => false,
        }
    }
}

/// DMA buffers the fake playback channel owns, like a two descriptor chain
pub const PLAYBACK_SLOTS: usize = 2;

#[derive(Default)]
struct PlaybackState {
    enabled: bool,
    clock: bool,
    queued: VecDeque<Page>,
    played: Vec<Page>,
    descriptor_resets: u32,
}

/// Playback DMA drained by the test
#[derive(Clone, Default)]
pub struct FakePlayback {
    state: Arc<Mutex<PlaybackState>>,
}

impl FakePlayback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finish the oldest queued page, like the playback interrupt would
    ///
    /// Only a running channel (clock on, DMA enabled) makes progress.
    pub fn complete_page(&self, notifier: &DmaNotifier) -> bool {
        {
            let mut state = locked(&self.state);
            if !(state.enabled && state.clock) {
                return false;
            }
            match state.queued.pop_front() {
                Some(page) => state.played.push(page),
                None => return false,
            }
        }
        notifier.playback_complete();
        true
    }

    /// Pages that reached the speaker
    pub fn played(&self) -> Vec<Page> {
        locked(&self.state).played.clone()
    }

    pub fn queued(&self) -> usize {
        locked(&self.state).queued.len()
    }

    pub fn enabled(&self) -> bool {
        locked(&self.state).enabled
    }

    pub fn clock_running(&self) -> bool {
        locked(&self.state).clock
    }

    pub fn descriptor_resets(&self) -> u32 {
        locked(&self.state).descriptor_resets
    }
}

impl PlaybackDma for FakePlayback {
    fn start_clock(&mut self) {
        locked(&self.state).clock = true;
    }

    fn stop_clock(&mut self) {
        locked(&self.state).clock = false;
    }

    fn enable(&mut self) {
        locked(&self.state).enabled = true;
    }

    fn disable(&mut self) {
        locked(&self.state).enabled = false;
    }

    fn is_enabled(&self) -> bool {
        self.enabled()
    }

    fn reset_descriptors(&mut self) {
        let mut state = locked(&self.state);
        state.queued.clear();
        state.descriptor_resets += 1;
    }

    fn load_page(&mut self, page: &Page) -> bool {
        let mut state = locked(&self.state);
        if state.queued.len() >= PLAYBACK_SLOTS {
            return false;
        }
        state.queued.push_back(*page);
        true
    }
}

/// Fake audio peripherals
#[derive(Clone, Default)]
pub struct FakeHal {
    pub capture: FakeCapture,
    pub playback: FakePlayback,
}

impl FakeHal {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecorderHal for FakeHal {
    type Capture = FakeCapture;
    type Playback = FakePlayback;

    fn capture(&mut self) -> &mut FakeCapture {
        &mut self.capture
    }

    fn playback(&mut self) -> &mut FakePlayback {
        &mut self.playback
    }
}

/// Shared event recorder usable as any `EventSink`
#[derive(Clone)]
pub struct EventLog<E> {
    events: Arc<Mutex<Vec<E>>>,
    capacity: Option<usize>,
}

impl<E: Clone> EventLog<E> {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: None,
        }
    }

    /// Log that drops events once `capacity` are held, like a full queue
    pub fn bounded(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: Some(capacity),
        }
    }

    pub fn events(&self) -> Vec<E> {
        locked(&self.events).clone()
    }

    /// Remove and return everything logged so far
    pub fn take(&self) -> Vec<E> {
        core::mem::take(&mut *locked(&self.events))
    }
}

impl<E: Clone> Default for EventLog<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E, T: Into<E>> EventSink<T> for EventLog<E> {
    fn post(&mut self, event: T) -> bool {
        let mut events = locked(&self.events);
        if self.capacity.is_some_and(|capacity| events.len() >= capacity) {
            return false;
        }
        events.push(event.into());
        true
    }
}

#[derive(Default)]
struct CodecState {
    initialized: bool,
    active: bool,
    attenuation: Option<u8>,
    failures: u32,
    writes: u32,
}

/// Codec whose register writes can be made to fail
#[derive(Clone, Default)]
pub struct FakeCodec {
    state: Arc<Mutex<CodecState>>,
}

impl FakeCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` volume writes
    pub fn fail_volume_writes(&self, count: u32) {
        locked(&self.state).failures = count;
    }

    /// Last attenuation the codec accepted
    pub fn attenuation(&self) -> Option<u8> {
        locked(&self.state).attenuation
    }

    /// Volume writes attempted, failed ones included
    pub fn volume_writes(&self) -> u32 {
        locked(&self.state).writes
    }

    pub fn is_active(&self) -> bool {
        let state = locked(&self.state);
        state.initialized && state.active
    }
}

impl Codec for FakeCodec {
    type Error = HalError;

    fn init(&mut self) -> Result<(), HalError> {
        locked(&self.state).initialized = true;
        Ok(())
    }

    fn activate(&mut self) -> Result<(), HalError> {
        let mut state = locked(&self.state);
        if !state.initialized {
            return Err(HalError::NotInitialized);
        }
        state.active = true;
        Ok(())
    }

    fn set_headphone_volume(&mut self, attenuation: u8) -> Result<(), HalError> {
        let mut state = locked(&self.state);
        state.writes += 1;
        if state.failures > 0 {
            state.failures -= 1;
            return Err(HalError::BusError);
        }
        state.attenuation = Some(attenuation);
        Ok(())
    }
}
