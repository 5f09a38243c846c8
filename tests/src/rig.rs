//! Test rig: a recorder on simulated hardware

use core::ops::Range;

use embassy_futures::yield_now;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embedded_hal_mock::eh1::delay::NoopDelay;
use recorder_core::test_utils::{pattern_page, EventLog, FakeHal, PanicOnFault, SimFlash};
use recorder_core::{
    AppEvent, AudioBuffers, BlockStorage, DisplayEvent, FlashGeometry, Page, Recorder,
    RecorderConfig, RecorderEvent, RecorderSignals, SharedStorage,
};

pub type RigStorage = SharedStorage<NoopRawMutex, SimFlash, NoopDelay, PanicOnFault>;
pub type RigRecorder<'a> =
    Recorder<'a, RigStorage, FakeHal, EventLog<AppEvent>, EventLog<DisplayEvent>>;

/// Simulated flash, DMA and event queues shared by one or more recorders
pub struct Rig {
    pub config: RecorderConfig,
    pub flash: SimFlash,
    pub storage: RigStorage,
    pub signals: RecorderSignals,
    pub hal: FakeHal,
    pub events: EventLog<AppEvent>,
    pub display: EventLog<DisplayEvent>,
}

impl Rig {
    pub fn new(config: RecorderConfig) -> Self {
        Self::with_flash(config, SimFlash::new(config.geometry))
    }

    /// Rig on an existing flash image, as after a reboot
    pub fn with_flash(config: RecorderConfig, flash: SimFlash) -> Self {
        let driver = BlockStorage::new(flash.clone(), NoopDelay::new(), PanicOnFault, config.geometry);
        Self {
            config,
            flash,
            storage: SharedStorage::new(driver),
            signals: RecorderSignals::new(),
            hal: FakeHal::new(),
            events: EventLog::new(),
            display: EventLog::new(),
        }
    }

    /// 6 sectors of 4 pages, recordings up to 2 sectors, 4 pages per second
    pub fn small() -> Self {
        Self::new(small_config())
    }

    pub fn recorder<'a>(&'a self, buffers: &'a mut AudioBuffers) -> RigRecorder<'a> {
        Recorder::new(
            self.config,
            &self.storage,
            &self.signals,
            buffers,
            self.hal.clone(),
            self.events.clone(),
            self.display.clone(),
        )
    }

    /// Complete one capture DMA page per seed, returns how many were accepted
    pub fn capture(&self, seeds: Range<u32>) -> usize {
        seeds
            .filter(|&seed| self.hal.capture.deliver(pattern_page(seed), &self.signals.notifier))
            .count()
    }

    /// Start, capture `seeds`, stop
    pub async fn record(&self, recorder: &mut RigRecorder<'_>, seeds: Range<u32>) {
        recorder.start().await;
        for seed in seeds {
            self.capture(seed..seed + 1);
            recorder.service_pending().await;
        }
        recorder.stop().await;
    }

    /// Let the playback DMA run until it stops, returns what it played
    pub async fn play_out(&self, recorder: &mut RigRecorder<'_>) -> Vec<Page> {
        while self.hal.playback.complete_page(&self.signals.notifier) {
            recorder.service_pending().await;
        }
        self.hal.playback.played()
    }

    /// Recorder events logged so far
    pub fn recorder_events(&self) -> Vec<RecorderEvent> {
        self.events
            .events()
            .into_iter()
            .filter_map(|event| match event {
                AppEvent::Recorder(event) => Some(event),
                AppEvent::Input(_) => None,
            })
            .collect()
    }
}

pub fn small_config() -> RecorderConfig {
    config(4, 6, 2, 4)
}

pub fn config(
    pages_per_sector: u32,
    sector_count: u32,
    max_record_sectors: u32,
    pages_per_second: u32,
) -> RecorderConfig {
    let geometry = FlashGeometry::new(pages_per_sector, sector_count);
    match RecorderConfig::new(geometry, max_record_sectors, pages_per_second) {
        Ok(config) => config,
        Err(reason) => panic!("bad test layout: {}", reason),
    }
}

/// Pages a test expects for `seeds`
pub fn pages(seeds: Range<u32>) -> Vec<Page> {
    seeds.map(pattern_page).collect()
}

/// Give concurrently polled tasks a chance to run
pub async fn settle() {
    for _ in 0..4 {
        yield_now().await;
    }
}
