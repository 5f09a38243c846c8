#![no_std]

//! Firmware library: board glue, mock hardware and embassy tasks

pub use embassy_executor::Spawner;
pub use embassy_time::Duration;
pub use static_cell::{ConstStaticCell, StaticCell};

pub use recorder_core::*;

pub use crate::board::*;
pub use crate::mock_hardware::*;
pub use crate::tasks::*;

/// Board level resources and interrupt glue
pub mod board {
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use embassy_sync::channel::Channel;
    use recorder_core::{
        AppEvent, DisplayEvent, FaultHandler, NorFlashDevice, RecorderCommand, RecorderSignals,
        SharedStorage, StorageFault, EVENT_QUEUE_SIZE,
    };

    use crate::mock_hardware::MockFlash;

    /// CM4 core clock
    pub const CORE_CLOCK_HZ: u32 = 100_000_000;

    pub type BoardMutex = CriticalSectionRawMutex;
    pub type BoardStorage =
        SharedStorage<BoardMutex, NorFlashDevice<MockFlash>, embassy_time::Delay, HaltOnFault>;

    /// Notification bits and published state, shared with the DMA interrupts
    pub static SIGNALS: RecorderSignals = RecorderSignals::new();

    /// Touch input and recorder lifecycle events for the events task
    pub static APP_EVENTS: Channel<BoardMutex, AppEvent, EVENT_QUEUE_SIZE> = Channel::new();

    /// Requests for the display task
    pub static DISPLAY_EVENTS: Channel<BoardMutex, DisplayEvent, EVENT_QUEUE_SIZE> =
        Channel::new();

    /// Commands from the events task to the recorder task
    pub static COMMANDS: Channel<BoardMutex, RecorderCommand, EVENT_QUEUE_SIZE> = Channel::new();

    /// Capture (PDM) DMA completion interrupt
    pub fn capture_dma_interrupt() {
        SIGNALS.notifier.capture_complete();
    }

    /// Playback (I2S) DMA completion interrupt
    pub fn playback_dma_interrupt() {
        SIGNALS.notifier.playback_complete();
    }

    /// Storage fault hook: mask interrupts and stop for the debugger
    pub struct HaltOnFault;

    impl FaultHandler for HaltOnFault {
        fn halt(&mut self, fault: StorageFault) -> ! {
            cortex_m::interrupt::disable();

            #[cfg(feature = "defmt")]
            defmt::error!("💥 Flash fault, halting: {:?}", fault);
            #[cfg(not(feature = "defmt"))]
            let _ = fault;

            loop {
                cortex_m::asm::bkpt();
            }
        }
    }
}

/// Mock hardware module
///
/// Stands in for the PSoC 6 peripherals until a HAL crate exists: a RAM
/// flash, DMA channels paced by a timer task, and a scripted touch panel.
pub mod mock_hardware {
    use embedded_storage::nor_flash::{
        ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
    };
    use portable_atomic::{AtomicBool, AtomicU8, Ordering};
    use recorder_core::{
        CaptureDma, Codec, FlashGeometry, HalError, InputEvent, Page, PlaybackDma, RecorderHal,
    };

    use crate::board::{capture_dma_interrupt, playback_dma_interrupt};

    /// Layout of the RAM flash: 8 sectors of 4 pages
    pub const MOCK_GEOMETRY: FlashGeometry = FlashGeometry::new(4, 8);
    const MOCK_FLASH_SIZE: usize = 8 * 4 * recorder_core::PAGE_SIZE;
    const MOCK_SECTOR_SIZE: usize = 4 * recorder_core::PAGE_SIZE;

    /// Pages the mock playback DMA can hold, like a two descriptor chain
    const PLAYBACK_SLOTS: u8 = 2;

    static CAPTURE_ENABLED: AtomicBool = AtomicBool::new(false);
    static CAPTURE_READY: AtomicU8 = AtomicU8::new(0);
    static PLAYBACK_RUNNING: AtomicBool = AtomicBool::new(false);
    static PLAYBACK_CLOCK: AtomicBool = AtomicBool::new(false);
    static PLAYBACK_QUEUED: AtomicU8 = AtomicU8::new(0);

    /// RAM backed NOR flash
    pub struct MockFlash {
        data: [u8; MOCK_FLASH_SIZE],
    }

    impl MockFlash {
        pub const fn new() -> Self {
            Self {
                data: [0xFF; MOCK_FLASH_SIZE],
            }
        }
    }

    #[derive(Debug, Copy, Clone)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub enum MockFlashError {
        NotAligned,
        OutOfBounds,
    }

    impl NorFlashError for MockFlashError {
        fn kind(&self) -> NorFlashErrorKind {
            match self {
                MockFlashError::NotAligned => NorFlashErrorKind::NotAligned,
                MockFlashError::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            }
        }
    }

    impl ErrorType for MockFlash {
        type Error = MockFlashError;
    }

    impl ReadNorFlash for MockFlash {
        const READ_SIZE: usize = 1;

        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
            let start = offset as usize;
            let source = self
                .data
                .get(start..start + bytes.len())
                .ok_or(MockFlashError::OutOfBounds)?;
            bytes.copy_from_slice(source);
            Ok(())
        }

        fn capacity(&self) -> usize {
            MOCK_FLASH_SIZE
        }
    }

    impl NorFlash for MockFlash {
        const WRITE_SIZE: usize = 1;
        const ERASE_SIZE: usize = MOCK_SECTOR_SIZE;

        fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
            let (from, to) = (from as usize, to as usize);
            if from % MOCK_SECTOR_SIZE != 0 || to % MOCK_SECTOR_SIZE != 0 {
                return Err(MockFlashError::NotAligned);
            }
            self.data
                .get_mut(from..to)
                .ok_or(MockFlashError::OutOfBounds)?
                .fill(0xFF);
            Ok(())
        }

        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
            let start = offset as usize;
            let target = self
                .data
                .get_mut(start..start + bytes.len())
                .ok_or(MockFlashError::OutOfBounds)?;
            for (cell, byte) in target.iter_mut().zip(bytes) {
                *cell &= *byte;
            }
            Ok(())
        }
    }

    /// Capture channel producing a test tone
    pub struct MockCapture {
        phase: u8,
    }

    impl MockCapture {
        pub fn new() -> Self {
            Self { phase: 0 }
        }
    }

    impl CaptureDma for MockCapture {
        fn enable(&mut self) {
            CAPTURE_ENABLED.store(true, Ordering::Release);
        }

        fn disable(&mut self) {
            CAPTURE_ENABLED.store(false, Ordering::Release);
        }

        fn is_enabled(&self) -> bool {
            CAPTURE_ENABLED.load(Ordering::Acquire)
        }

        fn clear_fifo(&mut self) {
            CAPTURE_READY.store(0, Ordering::Release);
        }

        fn take_page(&mut self, page: &mut Page) -> bool {
            let taken = CAPTURE_READY.fetch_update(Ordering::AcqRel, Ordering::Acquire, |ready| {
                ready.checked_sub(1)
            });
            if taken.is_err() {
                return false;
            }
            for byte in page.iter_mut() {
                *byte = self.phase;
                self.phase = self.phase.wrapping_add(3);
            }
            true
        }
    }

    /// Playback channel that discards the audio
    pub struct MockPlayback;

    impl PlaybackDma for MockPlayback {
        fn start_clock(&mut self) {
            PLAYBACK_CLOCK.store(true, Ordering::Release);
        }

        fn stop_clock(&mut self) {
            PLAYBACK_CLOCK.store(false, Ordering::Release);
        }

        fn enable(&mut self) {
            PLAYBACK_RUNNING.store(true, Ordering::Release);
        }

        fn disable(&mut self) {
            PLAYBACK_RUNNING.store(false, Ordering::Release);
        }

        fn is_enabled(&self) -> bool {
            PLAYBACK_RUNNING.load(Ordering::Acquire)
        }

        fn reset_descriptors(&mut self) {
            PLAYBACK_QUEUED.store(0, Ordering::Release);
        }

        fn load_page(&mut self, _page: &Page) -> bool {
            PLAYBACK_QUEUED
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |queued| {
                    (queued < PLAYBACK_SLOTS).then_some(queued + 1)
                })
                .is_ok()
        }
    }

    /// Mock audio peripherals
    pub struct MockRecorderHal {
        pub capture: MockCapture,
        pub playback: MockPlayback,
    }

    impl MockRecorderHal {
        pub fn new() -> Self {
            #[cfg(feature = "defmt")]
            defmt::info!("🧪 Using mock hardware (for testing)");
            Self {
                capture: MockCapture::new(),
                playback: MockPlayback,
            }
        }
    }

    impl RecorderHal for MockRecorderHal {
        type Capture = MockCapture;
        type Playback = MockPlayback;

        fn capture(&mut self) -> &mut MockCapture {
            &mut self.capture
        }

        fn playback(&mut self) -> &mut MockPlayback {
            &mut self.playback
        }
    }

    /// One DMA period: complete a page on every running channel
    pub fn advance_dma() {
        if CAPTURE_ENABLED.load(Ordering::Acquire) {
            let _ = CAPTURE_READY.fetch_update(Ordering::AcqRel, Ordering::Acquire, |ready| {
                Some(ready.saturating_add(1))
            });
            capture_dma_interrupt();
        }

        let running =
            PLAYBACK_RUNNING.load(Ordering::Acquire) && PLAYBACK_CLOCK.load(Ordering::Acquire);
        if running {
            let played = PLAYBACK_QUEUED.fetch_update(Ordering::AcqRel, Ordering::Acquire, |queued| {
                queued.checked_sub(1)
            });
            if played.is_ok() {
                playback_dma_interrupt();
            }
        }
    }

    /// Codec that accepts every register write
    pub struct MockCodec {
        attenuation: u8,
    }

    impl MockCodec {
        pub fn new() -> Self {
            Self { attenuation: 0 }
        }
    }

    impl Codec for MockCodec {
        type Error = HalError;

        fn init(&mut self) -> Result<(), HalError> {
            Ok(())
        }

        fn activate(&mut self) -> Result<(), HalError> {
            Ok(())
        }

        fn set_headphone_volume(&mut self, attenuation: u8) -> Result<(), HalError> {
            self.attenuation = attenuation;
            #[cfg(feature = "defmt")]
            defmt::debug!("🔊 Codec attenuation 0x{:02X}", self.attenuation);
            Ok(())
        }
    }

    /// Touch panel replaying a fixed demo: record, play, swipe, stop
    pub struct MockTouch {
        polls: u32,
        step: usize,
    }

    const TOUCH_SCRIPT: [(u32, InputEvent); 5] = [
        (100, InputEvent::PrimaryButton),
        (300, InputEvent::SecondaryButton),
        (350, InputEvent::GestureRight),
        (400, InputEvent::SecondaryButton),
        (450, InputEvent::PrimaryButton),
    ];

    impl MockTouch {
        pub fn new() -> Self {
            Self { polls: 0, step: 0 }
        }

        /// Scan once, reporting at most one input
        pub fn poll(&mut self) -> Option<InputEvent> {
            self.polls += 1;
            let (at, event) = *TOUCH_SCRIPT.get(self.step)?;
            if self.polls < at {
                return None;
            }
            self.step += 1;
            Some(event)
        }
    }
}

/// Embassy tasks module
pub mod tasks {
    use embassy_time::{Duration, Ticker};
    use recorder_core::{
        dispatch_events, Dispatcher, DisplayEvent, EventSink, Recorder, RecorderConfig,
        PAGES_PER_SECOND,
    };

    use crate::board::{BoardStorage, APP_EVENTS, COMMANDS, DISPLAY_EVENTS, SIGNALS};
    use crate::mock_hardware::{advance_dma, MockCodec, MockRecorderHal, MockTouch};

    /// Touch scan period
    const TOUCH_POLL_MS: u64 = 10;

    /// Recorder task: owns the state machine and every flash access
    #[embassy_executor::task]
    pub async fn recorder_task(
        storage: &'static BoardStorage,
        buffers: &'static mut recorder_core::AudioBuffers,
        hal: MockRecorderHal,
        config: RecorderConfig,
    ) {
        #[cfg(feature = "defmt")]
        defmt::info!("🎙️ Recorder task started");

        let mut recorder = Recorder::new(
            config,
            storage,
            &SIGNALS,
            buffers,
            hal,
            APP_EVENTS.sender(),
            DISPLAY_EVENTS.sender(),
        );
        recorder.init().await;
        recorder.run(COMMANDS.receiver()).await;
    }

    /// Events task: input and recorder events to commands and display updates
    #[embassy_executor::task]
    pub async fn events_task(codec: MockCodec) {
        #[cfg(feature = "defmt")]
        defmt::info!("🧭 Events task started");

        let mut dispatcher = Dispatcher::new(codec);
        let mut display = DISPLAY_EVENTS.sender();
        let mut delay = embassy_time::Delay;
        dispatcher.startup(&mut display, &mut delay);

        dispatch_events(
            &mut dispatcher,
            APP_EVENTS.receiver(),
            COMMANDS.sender(),
            &SIGNALS.state,
            &mut display,
        )
        .await;
    }

    /// Display task: stands in for the GUI renderer
    #[embassy_executor::task]
    pub async fn display_task() {
        #[cfg(feature = "defmt")]
        defmt::info!("🖥️ Display task started");

        let receiver = DISPLAY_EVENTS.receiver();
        loop {
            let event = receiver.receive().await;
            match event {
                DisplayEvent::ShowTime(_seconds) => {
                    #[cfg(feature = "defmt")]
                    defmt::debug!("⏱️ {}s", _seconds);
                }
                _ => {
                    #[cfg(feature = "defmt")]
                    defmt::info!("🖥️ {:?}", event);
                }
            }
        }
    }

    /// Input task: scans the touch panel and queues what it finds
    #[embassy_executor::task]
    pub async fn input_task(mut touch: MockTouch) {
        #[cfg(feature = "defmt")]
        defmt::info!("👆 Input task started");

        let mut events = APP_EVENTS.sender();
        let mut ticker = Ticker::every(Duration::from_millis(TOUCH_POLL_MS));
        loop {
            if let Some(input) = touch.poll() {
                if !events.post(input) {
                    #[cfg(feature = "defmt")]
                    defmt::warn!("⚠️ Event queue full, dropped {:?}", input);
                }
            }
            ticker.next().await;
        }
    }

    /// Paces the mock DMA channels at the audio page rate
    #[embassy_executor::task]
    pub async fn dma_task() {
        let period = Duration::from_micros(1_000_000 / PAGES_PER_SECOND as u64);
        let mut ticker = Ticker::every(period);
        loop {
            ticker.next().await;
            advance_dma();
        }
    }
}

// Time driver for embassy
pub mod time_driver;
