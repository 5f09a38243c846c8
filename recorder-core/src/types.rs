//! Core data types for the voice recorder

/// Size of one flash page, one DMA transfer chunk and one journal slot
pub const PAGE_SIZE: usize = 512;

/// One page of audio (or one journal slot)
pub type Page = [u8; PAGE_SIZE];

/// Validity marker of a journal slot (erased flash reads as all ones)
pub const SIGNATURE: u32 = 0xDEAD_BEEF;

/// Sector reserved for the recording journal
pub const INDEX_SECTOR: u32 = 0;

/// First sector that may hold audio
pub const FIRST_RECORD_SECTOR: u32 = 1;

/// Pages per erase sector on the product flash part
pub const PAGES_PER_SECTOR: u32 = 128;

/// Erase sectors on the product flash part (256 KiB each)
pub const SECTOR_COUNT: u32 = 64;

/// Longest recording, in sectors
pub const MAX_RECORD_SECTORS: u32 = 32;

/// Pages buffered between the capture DMA and the flash writer
pub const TX_RING_PAGES: usize = 32;

/// Pages buffered between the flash reader and the playback DMA
pub const RX_RING_PAGES: usize = 2;

/// Pages of audio per second of elapsed time
pub const PAGES_PER_SECOND: u32 = 32;

/// Depth of the event and display queues
pub const EVENT_QUEUE_SIZE: usize = 8;

/// Recorder states
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum RecorderState {
    /// Nothing in progress
    Idle = 0,
    /// Capturing microphone pages into flash
    Recording = 1,
    /// Streaming the last recording to the speaker
    Playing = 2,
    /// Playback DMA halted, position kept
    Paused = 3,
}

impl RecorderState {
    /// Raw value used by the atomic state cell
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode a raw state value, unknown values map to Idle
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => RecorderState::Recording,
            2 => RecorderState::Playing,
            3 => RecorderState::Paused,
            _ => RecorderState::Idle,
        }
    }

    /// True while the playback peripheral owns the audio path
    pub const fn is_playback(&self) -> bool {
        matches!(self, RecorderState::Playing | RecorderState::Paused)
    }
}

/// Operations the dispatcher asks the recorder task to perform
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecorderCommand {
    Start,
    Stop,
    Play,
    /// Finalize the running recording, then play it back
    StopAndPlay,
    Pause,
    Resume,
    Reset,
}

/// Touch input tokens delivered by the input collaborator
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InputEvent {
    /// Record button
    PrimaryButton,
    /// Play / pause button
    SecondaryButton,
    /// Slider swipe to the left (volume down)
    GestureLeft,
    /// Slider swipe to the right (volume up)
    GestureRight,
}

impl InputEvent {
    pub const fn to_token(self) -> u32 {
        match self {
            InputEvent::PrimaryButton => 0x1000_0001,
            InputEvent::SecondaryButton => 0x1000_0002,
            InputEvent::GestureLeft => 0x1000_0003,
            InputEvent::GestureRight => 0x1000_0004,
        }
    }

    pub const fn from_token(token: u32) -> Option<Self> {
        match token {
            0x1000_0001 => Some(InputEvent::PrimaryButton),
            0x1000_0002 => Some(InputEvent::SecondaryButton),
            0x1000_0003 => Some(InputEvent::GestureLeft),
            0x1000_0004 => Some(InputEvent::GestureRight),
            _ => None,
        }
    }
}

/// Lifecycle notices emitted by the recorder
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecorderEvent {
    /// The whole recording was played back
    PlaybackCompleted,
    /// Recording stopped because the maximum length was reached
    LimitReached,
}

impl RecorderEvent {
    pub const fn to_token(self) -> u32 {
        match self {
            RecorderEvent::PlaybackCompleted => 0x2000_0001,
            RecorderEvent::LimitReached => 0x2000_0002,
        }
    }

    pub const fn from_token(token: u32) -> Option<Self> {
        match token {
            0x2000_0001 => Some(RecorderEvent::PlaybackCompleted),
            0x2000_0002 => Some(RecorderEvent::LimitReached),
            _ => None,
        }
    }
}

/// Everything the events task consumes from its single queue
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AppEvent {
    Input(InputEvent),
    Recorder(RecorderEvent),
}

impl AppEvent {
    pub const fn to_token(self) -> u32 {
        match self {
            AppEvent::Input(event) => event.to_token(),
            AppEvent::Recorder(event) => event.to_token(),
        }
    }

    pub const fn from_token(token: u32) -> Option<Self> {
        if let Some(event) = InputEvent::from_token(token) {
            return Some(AppEvent::Input(event));
        }
        match RecorderEvent::from_token(token) {
            Some(event) => Some(AppEvent::Recorder(event)),
            None => None,
        }
    }
}

impl From<InputEvent> for AppEvent {
    fn from(event: InputEvent) -> Self {
        AppEvent::Input(event)
    }
}

impl From<RecorderEvent> for AppEvent {
    fn from(event: RecorderEvent) -> Self {
        AppEvent::Recorder(event)
    }
}

/// Requests for the display renderer
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DisplayEvent {
    ShowRecording,
    ShowPlaying,
    ShowPaused,
    ShowStopped,
    /// Memory limit warning banner
    ShowWarning,
    ClearWarning,
    ShowVolumeLabel,
    /// Headphone volume in percent
    ShowVolume(u8),
    /// Elapsed time in seconds
    ShowTime(u32),
}

const DISPLAY_KIND_MASK: u32 = 0xFFFF_0000;
const DISPLAY_VALUE_MASK: u32 = 0x0000_FFFF;
const DISPLAY_VOLUME: u32 = 0x3001_0000;
const DISPLAY_TIME: u32 = 0x3002_0000;

impl DisplayEvent {
    pub const fn to_token(self) -> u32 {
        match self {
            DisplayEvent::ShowRecording => 0x3000_0001,
            DisplayEvent::ShowPlaying => 0x3000_0002,
            DisplayEvent::ShowPaused => 0x3000_0003,
            DisplayEvent::ShowStopped => 0x3000_0004,
            DisplayEvent::ShowWarning => 0x3000_0005,
            DisplayEvent::ClearWarning => 0x3000_0006,
            DisplayEvent::ShowVolumeLabel => 0x3000_0007,
            DisplayEvent::ShowVolume(percent) => DISPLAY_VOLUME | percent as u32,
            DisplayEvent::ShowTime(seconds) => DISPLAY_TIME | (seconds & DISPLAY_VALUE_MASK),
        }
    }

    pub const fn from_token(token: u32) -> Option<Self> {
        match token & DISPLAY_KIND_MASK {
            DISPLAY_VOLUME => {
                let value = token & DISPLAY_VALUE_MASK;
                if value > u8::MAX as u32 {
                    return None;
                }
                Some(DisplayEvent::ShowVolume(value as u8))
            }
            DISPLAY_TIME => Some(DisplayEvent::ShowTime(token & DISPLAY_VALUE_MASK)),
            _ => match token {
                0x3000_0001 => Some(DisplayEvent::ShowRecording),
                0x3000_0002 => Some(DisplayEvent::ShowPlaying),
                0x3000_0003 => Some(DisplayEvent::ShowPaused),
                0x3000_0004 => Some(DisplayEvent::ShowStopped),
                0x3000_0005 => Some(DisplayEvent::ShowWarning),
                0x3000_0006 => Some(DisplayEvent::ClearWarning),
                0x3000_0007 => Some(DisplayEvent::ShowVolumeLabel),
                _ => None,
            },
        }
    }
}

/// Layout of the external flash: sector 0 is the journal, the rest hold audio
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashGeometry {
    /// Pages per erase sector
    pub pages_per_sector: u32,
    /// Total sectors, including the index sector
    pub sector_count: u32,
}

impl FlashGeometry {
    pub const fn new(pages_per_sector: u32, sector_count: u32) -> Self {
        Self {
            pages_per_sector,
            sector_count,
        }
    }

    /// Bytes per erase sector
    pub const fn sector_size(&self) -> u32 {
        self.pages_per_sector * PAGE_SIZE as u32
    }

    /// Bytes in the whole device
    pub const fn capacity(&self) -> u32 {
        self.sector_size() * self.sector_count
    }

    /// Sectors available for audio
    pub const fn recording_sectors(&self) -> u32 {
        self.sector_count - FIRST_RECORD_SECTOR
    }

    /// Journal slots in the index sector
    pub const fn index_slots(&self) -> u32 {
        self.pages_per_sector
    }

    pub const fn sector_address(&self, sector: u32) -> u32 {
        sector * self.sector_size()
    }

    pub const fn sector_of(&self, address: u32) -> u32 {
        address / self.sector_size()
    }

    /// True for recording sectors, never for the index sector
    pub const fn is_recording_sector(&self, sector: u32) -> bool {
        sector >= FIRST_RECORD_SECTOR && sector < self.sector_count
    }

    /// Recording sector after `sector`, wrapping past the end to the first one
    pub const fn next_recording_sector(&self, sector: u32) -> u32 {
        let next = sector + 1;
        if next >= self.sector_count || next < FIRST_RECORD_SECTOR {
            FIRST_RECORD_SECTOR
        } else {
            next
        }
    }

    /// Sector holding page `page` of a recording that begins at `start_sector`
    pub const fn page_sector(&self, start_sector: u32, page: u32) -> u32 {
        let offset = (start_sector - FIRST_RECORD_SECTOR) + page / self.pages_per_sector;
        FIRST_RECORD_SECTOR + offset % self.recording_sectors()
    }

    /// Byte address of page `page` of a recording that begins at `start_sector`
    pub const fn page_address(&self, start_sector: u32, page: u32) -> u32 {
        self.sector_address(self.page_sector(start_sector, page))
            + (page % self.pages_per_sector) * PAGE_SIZE as u32
    }

    /// Sector holding the last page of a `pages` long recording
    pub const fn last_sector(&self, start_sector: u32, pages: u32) -> u32 {
        if pages == 0 {
            start_sector
        } else {
            self.page_sector(start_sector, pages - 1)
        }
    }
}

impl Default for FlashGeometry {
    fn default() -> Self {
        Self::new(PAGES_PER_SECTOR, SECTOR_COUNT)
    }
}

/// Recorder configuration parameters
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RecorderConfig {
    /// Flash layout
    pub geometry: FlashGeometry,
    /// Recording stops by itself after this many pages
    pub max_record_pages: u32,
    /// Divisor turning page counters into elapsed seconds
    pub pages_per_second: u32,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            geometry: FlashGeometry::default(),
            max_record_pages: MAX_RECORD_SECTORS * PAGES_PER_SECTOR,
            pages_per_second: PAGES_PER_SECOND,
        }
    }
}

impl RecorderConfig {
    /// Create a new configuration with validation
    pub fn new(
        geometry: FlashGeometry,
        max_record_sectors: u32,
        pages_per_second: u32,
    ) -> Result<Self, &'static str> {
        if geometry.pages_per_sector == 0 {
            return Err("Sectors must hold at least one page");
        }
        if geometry.sector_count < 3 {
            return Err("Flash needs an index sector and two recording sectors");
        }
        if geometry.sector_count.checked_mul(geometry.sector_size()).is_none() {
            return Err("Flash capacity must fit a 32-bit address");
        }
        // One sector stays free for the pre-erase ahead of the write position
        if max_record_sectors == 0 || max_record_sectors >= geometry.recording_sectors() {
            return Err("Max recording must be shorter than the recording area");
        }
        if pages_per_second == 0 {
            return Err("Pages per second must be at least 1");
        }

        Ok(Self {
            geometry,
            max_record_pages: max_record_sectors * geometry.pages_per_sector,
            pages_per_second,
        })
    }

    /// Elapsed seconds represented by a page counter
    pub fn elapsed_seconds(&self, pages: u32) -> u32 {
        pages / self.pages_per_second
    }

    /// Recording length in seconds at the configured maximum
    pub fn max_record_seconds(&self) -> u32 {
        self.elapsed_seconds(self.max_record_pages)
    }
}

/// Journal entry describing the most recent recording
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SectorIndexRecord {
    /// Sector where the recording begins
    pub start_sector: u32,
    /// Pages written by the recording
    pub pages_recorded: u32,
}

impl SectorIndexRecord {
    /// Record written on a blank device
    pub const EMPTY: Self = Self {
        start_sector: FIRST_RECORD_SECTOR,
        pages_recorded: 0,
    };

    /// Encode into a full slot: signature, start sector, page count, erased padding
    pub fn encode(&self) -> Page {
        let mut slot = [0xFF; PAGE_SIZE];
        slot[0..4].copy_from_slice(&SIGNATURE.to_le_bytes());
        slot[4..8].copy_from_slice(&self.start_sector.to_le_bytes());
        slot[8..12].copy_from_slice(&self.pages_recorded.to_le_bytes());
        slot
    }

    /// Decode a slot, `None` unless the signature matches
    pub fn decode(slot: &[u8]) -> Option<Self> {
        let word = |at: usize| -> Option<u32> {
            let bytes = slot.get(at..at + 4)?;
            Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        };

        if word(0)? != SIGNATURE {
            return None;
        }
        Some(Self {
            start_sector: word(4)?,
            pages_recorded: word(8)?,
        })
    }

    /// True when the record can be replayed on this layout
    pub fn fits(&self, config: &RecorderConfig) -> bool {
        config.geometry.is_recording_sector(self.start_sector)
            && self.pages_recorded <= config.max_record_pages
    }
}

impl Default for SectorIndexRecord {
    fn default() -> Self {
        Self::EMPTY
    }
}
