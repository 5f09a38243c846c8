//! Recording / playback state machine
//!
//! The recorder owns every flash access. Capture pages are buffered in the
//! TX ring and written behind the DMA one page per service pass; playback
//! pages are read ahead into the RX ring and handed to the playback DMA.

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Receiver;

use crate::hal::{CaptureDma, EventSink, PlaybackDma, RecorderHal};
use crate::journal::Journal;
use crate::notify::{Notification, RecorderSignals, RECORD_FLAG};
use crate::ring::AudioBuffers;
use crate::storage::PageStorage;
use crate::types::{
    DisplayEvent, RecorderCommand, RecorderConfig, RecorderEvent, RecorderState,
    SectorIndexRecord, PAGE_SIZE,
};

/// Recording and playback coordinator
pub struct Recorder<'a, S, H, E, V> {
    config: RecorderConfig,
    storage: &'a S,
    signals: &'a RecorderSignals,
    buffers: &'a mut AudioBuffers,
    hal: H,
    events: E,
    display: V,
    journal: Journal,
    /// Journal record as accepted for this layout, what a reset falls back to
    journaled: SectorIndexRecord,
    state: RecorderState,
    /// First sector of the current (or last journaled) recording
    start_sector: u32,
    /// Sector holding the last page written so far
    end_sector: u32,
    /// Length of the playable recording
    pages_recorded: u32,
    /// Capture pages accepted during the running recording
    pages_captured: u32,
    /// Capture pages already written to flash
    pages_flushed: u32,
    /// Playback pages read from flash
    pages_fetched: u32,
    /// Playback pages the DMA reported done
    pages_played: u32,
    /// Sector at `next_recording_sector(end_sector)` is blank
    next_sector_erased: bool,
    overruns: u32,
    shown_seconds: Option<u32>,
}

impl<'a, S, H, E, V> Recorder<'a, S, H, E, V>
where
    S: PageStorage,
    H: RecorderHal,
    E: EventSink<RecorderEvent>,
    V: EventSink<DisplayEvent>,
{
    pub fn new(
        config: RecorderConfig,
        storage: &'a S,
        signals: &'a RecorderSignals,
        buffers: &'a mut AudioBuffers,
        hal: H,
        events: E,
        display: V,
    ) -> Self {
        Self {
            config,
            storage,
            signals,
            buffers,
            hal,
            events,
            display,
            journal: Journal::new(),
            journaled: SectorIndexRecord::EMPTY,
            state: RecorderState::Idle,
            start_sector: SectorIndexRecord::EMPTY.start_sector,
            end_sector: SectorIndexRecord::EMPTY.start_sector,
            pages_recorded: 0,
            pages_captured: 0,
            pages_flushed: 0,
            pages_fetched: 0,
            pages_played: 0,
            next_sector_erased: false,
            overruns: 0,
            shown_seconds: None,
        }
    }

    /// Current state
    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Length in pages of the recording `play` would replay
    pub fn pages_recorded(&self) -> u32 {
        self.pages_recorded
    }

    /// Pages accepted by the running recording
    pub fn pages_captured(&self) -> u32 {
        self.pages_captured
    }

    /// Pages played since the last `play`
    pub fn pages_played(&self) -> u32 {
        self.pages_played
    }

    pub fn start_sector(&self) -> u32 {
        self.start_sector
    }

    pub fn end_sector(&self) -> u32 {
        self.end_sector
    }

    /// Capture pages dropped because the TX ring was full
    pub fn overruns(&self) -> u32 {
        self.overruns
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn hal(&mut self) -> &mut H {
        &mut self.hal
    }

    /// Load the journal and prepare the sector the next recording starts in
    pub async fn init(&mut self) {
        self.journal = Journal::load_latest(self.storage).await;

        let mut record = self.journal.latest();
        if !record.fits(&self.config) {
            #[cfg(feature = "defmt")]
            defmt::warn!("⚠️ Journal record does not fit the flash layout, ignoring it");
            record = SectorIndexRecord::EMPTY;
        }

        self.journaled = record;
        self.restore(record);
        self.prepare_next_sector().await;
        self.set_state(RecorderState::Idle);

        #[cfg(feature = "defmt")]
        defmt::info!(
            "🎙️ Recorder ready: last recording sector {} pages {}",
            self.start_sector,
            self.pages_recorded
        );
    }

    /// Begin a new recording right after the last journaled one
    pub async fn start(&mut self) {
        match self.state {
            RecorderState::Recording => self.abandon_recording(),
            RecorderState::Playing | RecorderState::Paused => self.stop_playback(),
            RecorderState::Idle => {}
        }

        self.start_sector = self.config.geometry.next_recording_sector(self.end_sector);
        if !self.next_sector_erased {
            // A reset recording left data behind in this sector
            self.storage.erase(self.start_sector).await;
        }
        self.next_sector_erased = false;
        self.end_sector = self.start_sector;
        self.pages_captured = 0;
        self.pages_flushed = 0;
        self.overruns = 0;
        self.buffers.tx.reset();

        let capture = self.hal.capture();
        capture.clear_fifo();
        capture.enable();

        self.set_state(RecorderState::Recording);

        #[cfg(feature = "defmt")]
        defmt::info!("🔴 Recording from sector {}", self.start_sector);

        self.update_elapsed();
    }

    /// Finish the recording and journal it
    pub async fn stop(&mut self) {
        if self.state != RecorderState::Recording {
            return;
        }
        self.finalize().await;
    }

    /// Replay the most recent recording
    pub async fn play(&mut self) {
        if self.state != RecorderState::Idle {
            return;
        }

        if self.pages_recorded == 0 {
            #[cfg(feature = "defmt")]
            defmt::info!("▶️ Nothing recorded, playback done");
            self.emit(RecorderEvent::PlaybackCompleted);
            return;
        }

        self.buffers.rx.reset();
        self.pages_fetched = 0;
        self.pages_played = 0;
        while self.pages_fetched < self.pages_recorded && !self.buffers.rx.is_full() {
            self.fetch_page().await;
        }

        let playback = self.hal.playback();
        playback.reset_descriptors();
        playback.start_clock();
        self.feed_playback();
        self.hal.playback().enable();

        self.set_state(RecorderState::Playing);

        #[cfg(feature = "defmt")]
        defmt::info!(
            "▶️ Playing {} pages from sector {}",
            self.pages_recorded,
            self.start_sector
        );

        self.update_elapsed();
    }

    /// Halt the playback DMA, keeping the position
    pub fn pause(&mut self) {
        if self.state != RecorderState::Playing {
            return;
        }
        self.hal.playback().disable();
        self.set_state(RecorderState::Paused);
    }

    /// Continue a paused playback
    pub fn resume(&mut self) {
        if self.state != RecorderState::Paused {
            return;
        }
        self.hal.playback().enable();
        self.set_state(RecorderState::Playing);
    }

    /// Abandon the current activity without touching the journal
    pub fn reset(&mut self) {
        match self.state {
            RecorderState::Recording => self.abandon_recording(),
            RecorderState::Playing | RecorderState::Paused => self.stop_playback(),
            RecorderState::Idle => return,
        }
        self.set_state(RecorderState::Idle);

        #[cfg(feature = "defmt")]
        defmt::info!("⏹️ Reset to idle");
    }

    /// Run one command from the UI and acknowledge it on the state cell
    pub async fn execute(&mut self, command: RecorderCommand) {
        #[cfg(feature = "defmt")]
        defmt::debug!("Command {:?} in {:?}", command, self.state);

        match command {
            RecorderCommand::Start => self.start().await,
            RecorderCommand::Stop => self.stop().await,
            RecorderCommand::Play => self.play().await,
            RecorderCommand::StopAndPlay => {
                self.stop().await;
                self.play().await;
            }
            RecorderCommand::Pause => self.pause(),
            RecorderCommand::Resume => self.resume(),
            RecorderCommand::Reset => self.reset(),
        }
        self.signals.state.acknowledge();
    }

    /// React to DMA completions
    ///
    /// Capture pages are taken first, then at most one page is written to
    /// flash, then playback completions are handled.
    pub async fn service(&mut self, notification: Notification) {
        for _ in 0..notification.captured {
            if self.state != RecorderState::Recording {
                break;
            }
            self.accept_capture();
            if self.pages_captured >= self.config.max_record_pages {
                #[cfg(feature = "defmt")]
                defmt::info!("🛑 Recording limit reached");
                self.finalize().await;
                self.emit(RecorderEvent::LimitReached);
                break;
            }
        }

        if self.state == RecorderState::Recording && !self.buffers.tx.is_empty() {
            self.flush_page().await;
            if !self.buffers.tx.is_empty() {
                self.signals.notifier.raise(RECORD_FLAG);
            }
        }

        for _ in 0..notification.played {
            if !self.state.is_playback() {
                break;
            }
            self.page_played().await;
        }

        self.update_elapsed();
    }

    /// Service until no notification is pending
    pub async fn service_pending(&mut self) {
        while let Some(notification) = self.signals.notifier.try_take() {
            self.service(notification).await;
        }
    }

    /// Recorder task body: wait for DMA notifications or UI commands
    pub async fn run<M: RawMutex, const N: usize>(
        &mut self,
        commands: Receiver<'_, M, RecorderCommand, N>,
    ) {
        let signals = self.signals;
        loop {
            match select(signals.notifier.wait(), commands.receive()).await {
                Either::First(notification) => self.service(notification).await,
                Either::Second(command) => self.execute(command).await,
            }
        }
    }

    fn set_state(&mut self, state: RecorderState) {
        self.state = state;
        self.signals.state.store(state);
    }

    fn emit(&mut self, event: RecorderEvent) {
        if !self.events.post(event) {
            #[cfg(feature = "defmt")]
            defmt::warn!("⚠️ Event queue full, dropped {:?}", event);
        }
    }

    fn show(&mut self, event: DisplayEvent) {
        if !self.display.post(event) {
            #[cfg(feature = "defmt")]
            defmt::warn!("⚠️ Display queue full, dropped {:?}", event);
        }
    }

    /// Publish the elapsed time when the shown second changes
    fn update_elapsed(&mut self) {
        let counter = match self.state {
            RecorderState::Recording => self.pages_captured,
            RecorderState::Playing | RecorderState::Paused => self.pages_played,
            RecorderState::Idle => return,
        };
        let seconds = self.config.elapsed_seconds(counter);
        if self.shown_seconds != Some(seconds) {
            self.shown_seconds = Some(seconds);
            self.show(DisplayEvent::ShowTime(seconds));
        }
    }

    fn restore(&mut self, record: SectorIndexRecord) {
        let geometry = self.config.geometry;
        self.start_sector = record.start_sector;
        self.pages_recorded = record.pages_recorded;
        self.end_sector = geometry.last_sector(record.start_sector, record.pages_recorded);
    }

    /// Erase the sector the next recording will start in
    async fn prepare_next_sector(&mut self) {
        let next = self.config.geometry.next_recording_sector(self.end_sector);
        self.storage.erase(next).await;
        self.next_sector_erased = true;
    }

    fn accept_capture(&mut self) {
        let tx = &mut self.buffers.tx;
        let slot = match tx.vacant() {
            Ok(slot) => slot,
            Err(_) => {
                // Flash fell behind, the DMA page is lost
                let mut scratch = [0u8; PAGE_SIZE];
                self.hal.capture().take_page(&mut scratch);
                self.overruns += 1;

                #[cfg(feature = "defmt")]
                defmt::warn!("⚠️ TX ring full, dropped capture page ({} total)", self.overruns);
                return;
            }
        };

        if self.hal.capture().take_page(slot) && tx.commit().is_ok() {
            self.pages_captured += 1;
        }
    }

    /// Write the oldest buffered page behind the capture DMA
    async fn flush_page(&mut self) {
        let geometry = self.config.geometry;
        let index = self.pages_flushed;

        if index > 0 && index % geometry.pages_per_sector == 0 {
            let sector = geometry.page_sector(self.start_sector, index);
            self.storage.erase(sector).await;
            self.end_sector = sector;
        }

        let address = geometry.page_address(self.start_sector, index);
        let page = match self.buffers.tx.front() {
            Ok(page) => page,
            Err(_) => return,
        };
        self.storage.write(page, address).await;
        let _ = self.buffers.tx.pop();
        self.pages_flushed += 1;

        #[cfg(feature = "defmt")]
        defmt::trace!("💾 Page {} -> 0x{:08X}", index, address);
    }

    async fn finalize(&mut self) {
        self.hal.capture().disable();
        while !self.buffers.tx.is_empty() {
            self.flush_page().await;
        }

        let record = SectorIndexRecord {
            start_sector: self.start_sector,
            pages_recorded: self.pages_flushed,
        };
        self.journal.append(self.storage, record).await;
        self.journaled = record;
        self.restore(record);
        self.prepare_next_sector().await;
        self.set_state(RecorderState::Idle);

        #[cfg(feature = "defmt")]
        defmt::info!(
            "⏹️ Recorded {} pages in sectors {}..={}",
            self.pages_recorded,
            self.start_sector,
            self.end_sector
        );
    }

    fn abandon_recording(&mut self) {
        self.hal.capture().disable();
        self.buffers.tx.reset();
        // Pages already in flash are lost, the journal still names the
        // previous recording
        self.restore(self.journaled);
        self.next_sector_erased = false;
    }

    fn stop_playback(&mut self) {
        let playback = self.hal.playback();
        playback.disable();
        playback.stop_clock();
        playback.reset_descriptors();
        self.buffers.rx.reset();
    }

    /// Read the next recording page into the RX ring
    async fn fetch_page(&mut self) {
        let address = self
            .config
            .geometry
            .page_address(self.start_sector, self.pages_fetched);
        let slot = match self.buffers.rx.vacant() {
            Ok(slot) => slot,
            Err(_) => return,
        };
        self.storage.read(slot, address).await;
        if self.buffers.rx.commit().is_ok() {
            self.pages_fetched += 1;
        }

        #[cfg(feature = "defmt")]
        defmt::trace!("📖 Prefetched page {}", self.pages_fetched);
    }

    /// Move prefetched pages into the playback DMA while it has room
    fn feed_playback(&mut self) {
        while let Ok(page) = self.buffers.rx.front() {
            if !self.hal.playback().load_page(page) {
                break;
            }
            let _ = self.buffers.rx.pop();
        }
    }

    async fn page_played(&mut self) {
        self.pages_played += 1;

        if self.pages_played >= self.pages_recorded {
            self.stop_playback();
            self.set_state(RecorderState::Idle);
            self.emit(RecorderEvent::PlaybackCompleted);

            #[cfg(feature = "defmt")]
            defmt::info!("✅ Playback completed");
            return;
        }

        if self.pages_fetched < self.pages_recorded && !self.buffers.rx.is_full() {
            self.fetch_page().await;
        }
        self.feed_playback();
    }
}
