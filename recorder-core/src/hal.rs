//! Hardware Abstraction Layer for the voice recorder

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Sender;
use embedded_storage::nor_flash::{NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash};

use crate::types::Page;

/// Error types for peripheral operations
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HalError {
    /// Control bus transaction failed (I2C to the codec, for instance)
    BusError,
    /// DMA channel could not be configured
    DmaError,
    /// Hardware not initialized
    NotInitialized,
    /// Invalid configuration
    InvalidConfig,
}

#[cfg(feature = "std")]
impl core::fmt::Display for HalError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            HalError::BusError => write!(f, "Control bus transaction failed"),
            HalError::DmaError => write!(f, "DMA configuration failed"),
            HalError::NotInitialized => write!(f, "Hardware not initialized"),
            HalError::InvalidConfig => write!(f, "Invalid configuration"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for HalError {}

/// Device level flash failures
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    /// The device refused the command
    CommandRejected,
    /// Address or length outside the device
    OutOfRange,
    /// Address not aligned to what the device requires
    Misaligned,
    /// Programming over bits that were not erased
    NotErased,
    /// Transfer longer than one page
    InvalidLength,
}

#[cfg(feature = "std")]
impl core::fmt::Display for FlashError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FlashError::CommandRejected => write!(f, "Flash command rejected"),
            FlashError::OutOfRange => write!(f, "Flash address out of range"),
            FlashError::Misaligned => write!(f, "Flash address misaligned"),
            FlashError::NotErased => write!(f, "Flash page programmed without erase"),
            FlashError::InvalidLength => write!(f, "Flash transfer longer than a page"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FlashError {}

/// Storage operation that was running when a fault happened
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageOp {
    Erase,
    Write,
    Read,
    Status,
}

/// Unrecoverable storage failure handed to the fault hook
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StorageFault {
    pub op: StorageOp,
    pub address: u32,
    pub error: FlashError,
}

#[cfg(feature = "std")]
impl core::fmt::Display for StorageFault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?} at 0x{:08X}: {}", self.op, self.address, self.error)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for StorageFault {}

/// Raw command interface of the external NOR flash
///
/// Commands may return before the device has finished, completion is
/// observed through `is_busy`.
pub trait FlashDevice {
    /// Start erasing the `size` byte sector at `address`
    fn erase_sector(&mut self, address: u32, size: u32) -> Result<(), FlashError>;

    /// Start programming `data` at `address`
    fn program(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError>;

    /// Read `buf.len()` bytes at `address`
    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FlashError>;

    /// Poll the device status register
    fn is_busy(&mut self) -> Result<bool, FlashError>;
}

/// Adapter for any `embedded-storage` NOR flash
///
/// Those drivers complete every operation before returning, so the device
/// never reports busy.
pub struct NorFlashDevice<F> {
    flash: F,
}

impl<F: NorFlash> NorFlashDevice<F> {
    pub fn new(flash: F) -> Self {
        Self { flash }
    }

    pub fn inner(&mut self) -> &mut F {
        &mut self.flash
    }

    pub fn release(self) -> F {
        self.flash
    }
}

fn map_nor_error<E: NorFlashError>(error: E) -> FlashError {
    match error.kind() {
        NorFlashErrorKind::NotAligned => FlashError::Misaligned,
        NorFlashErrorKind::OutOfBounds => FlashError::OutOfRange,
        _ => FlashError::CommandRejected,
    }
}

impl<F: NorFlash> FlashDevice for NorFlashDevice<F> {
    fn erase_sector(&mut self, address: u32, size: u32) -> Result<(), FlashError> {
        let end = address.checked_add(size).ok_or(FlashError::OutOfRange)?;
        self.flash.erase(address, end).map_err(map_nor_error)
    }

    fn program(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        self.flash.write(address, data).map_err(map_nor_error)
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        self.flash.read(address, buf).map_err(map_nor_error)
    }

    fn is_busy(&mut self) -> Result<bool, FlashError> {
        Ok(false)
    }
}

/// Fatal error hook of the block storage driver
///
/// Firmware implementations mask interrupts, light the error LED and
/// never return.
pub trait FaultHandler {
    fn halt(&mut self, fault: StorageFault) -> !;
}

/// Microphone capture path (PDM/PCM peripheral plus its DMA channel)
pub trait CaptureDma {
    /// Start moving samples, one completion notification per page
    fn enable(&mut self);

    /// Stop the DMA channel
    fn disable(&mut self);

    fn is_enabled(&self) -> bool;

    /// Drop whatever the peripheral FIFO still holds
    fn clear_fifo(&mut self);

    /// Copy the oldest completed page into `page`, false if none is ready
    fn take_page(&mut self, page: &mut Page) -> bool;
}

/// Speaker path (I2S peripheral plus its DMA channel)
pub trait PlaybackDma {
    /// Start the I2S clock domain
    fn start_clock(&mut self);

    fn stop_clock(&mut self);

    /// Let the DMA channel run
    fn enable(&mut self);

    /// Halt the DMA channel, queued pages stay queued
    fn disable(&mut self);

    fn is_enabled(&self) -> bool;

    /// Rewind the descriptor chain and drop queued pages
    fn reset_descriptors(&mut self);

    /// Queue a page for output, false when no DMA buffer is free
    fn load_page(&mut self, page: &Page) -> bool;
}

/// Audio codec control interface
pub trait Codec {
    type Error: From<HalError>;

    /// Configure the codec registers
    fn init(&mut self) -> Result<(), Self::Error>;

    /// Power up the signal path
    fn activate(&mut self) -> Result<(), Self::Error>;

    /// Write the headphone attenuation register
    fn set_headphone_volume(&mut self, attenuation: u8) -> Result<(), Self::Error>;
}

/// Non-blocking, best-effort event output
pub trait EventSink<E> {
    /// Post an event, false if it had to be dropped
    fn post(&mut self, event: E) -> bool;
}

impl<E, S: EventSink<E> + ?Sized> EventSink<E> for &mut S {
    fn post(&mut self, event: E) -> bool {
        (**self).post(event)
    }
}

impl<'ch, M, T, E, const N: usize> EventSink<E> for Sender<'ch, M, T, N>
where
    M: RawMutex,
    E: Into<T>,
{
    fn post(&mut self, event: E) -> bool {
        self.try_send(event.into()).is_ok()
    }
}

impl<'q, T, E, const N: usize> EventSink<E> for heapless::spsc::Producer<'q, T, N>
where
    E: Into<T>,
{
    fn post(&mut self, event: E) -> bool {
        self.enqueue(event.into()).is_ok()
    }
}

impl<T, E, const N: usize> EventSink<E> for heapless::Vec<T, N>
where
    E: Into<T>,
{
    fn post(&mut self, event: E) -> bool {
        self.push(event.into()).is_ok()
    }
}

/// Audio peripherals owned by the recorder
pub trait RecorderHal {
    type Capture: CaptureDma;
    type Playback: PlaybackDma;

    /// Access to the capture path
    fn capture(&mut self) -> &mut Self::Capture;

    /// Access to the playback path
    fn playback(&mut self) -> &mut Self::Playback;
}

/// Mock implementations for testing
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use embedded_hal::delay::DelayNs;
    use embedded_storage::nor_flash::ErrorType;

    /// RAM backed `embedded-storage` flash with NOR bit semantics
    pub struct RamNorFlash<const SIZE: usize, const ERASE: usize> {
        pub data: [u8; SIZE],
        pub erase_calls: u32,
    }

    impl<const SIZE: usize, const ERASE: usize> RamNorFlash<SIZE, ERASE> {
        pub fn new() -> Self {
            Self {
                data: [0xFF; SIZE],
                erase_calls: 0,
            }
        }
    }

    impl<const SIZE: usize, const ERASE: usize> Default for RamNorFlash<SIZE, ERASE> {
        fn default() -> Self {
            Self::new()
        }
    }

    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum RamNorFlashError {
        NotAligned,
        OutOfBounds,
    }

    impl NorFlashError for RamNorFlashError {
        fn kind(&self) -> NorFlashErrorKind {
            match self {
                RamNorFlashError::NotAligned => NorFlashErrorKind::NotAligned,
                RamNorFlashError::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            }
        }
    }

    impl<const SIZE: usize, const ERASE: usize> ErrorType for RamNorFlash<SIZE, ERASE> {
        type Error = RamNorFlashError;
    }

    impl<const SIZE: usize, const ERASE: usize> ReadNorFlash for RamNorFlash<SIZE, ERASE> {
        const READ_SIZE: usize = 1;

        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
            let start = offset as usize;
            let end = start + bytes.len();
            let source = self
                .data
                .get(start..end)
                .ok_or(RamNorFlashError::OutOfBounds)?;
            bytes.copy_from_slice(source);
            Ok(())
        }

        fn capacity(&self) -> usize {
            SIZE
        }
    }

    impl<const SIZE: usize, const ERASE: usize> NorFlash for RamNorFlash<SIZE, ERASE> {
        const WRITE_SIZE: usize = 1;
        const ERASE_SIZE: usize = ERASE;

        fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
            let (from, to) = (from as usize, to as usize);
            if from % ERASE != 0 || to % ERASE != 0 {
                return Err(RamNorFlashError::NotAligned);
            }
            let region = self
                .data
                .get_mut(from..to)
                .ok_or(RamNorFlashError::OutOfBounds)?;
            region.fill(0xFF);
            self.erase_calls += 1;
            Ok(())
        }

        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
            let start = offset as usize;
            let end = start + bytes.len();
            let region = self
                .data
                .get_mut(start..end)
                .ok_or(RamNorFlashError::OutOfBounds)?;
            for (cell, byte) in region.iter_mut().zip(bytes) {
                *cell &= *byte;
            }
            Ok(())
        }
    }

    /// Delay provider that only counts how long it was asked to wait
    #[derive(Default)]
    pub struct CountingDelay {
        pub total_ns: u64,
        pub calls: u32,
    }

    impl DelayNs for CountingDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.total_ns += ns as u64;
            self.calls += 1;
        }
    }
}
