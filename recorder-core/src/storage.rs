//! Block storage driver for the external flash

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use embedded_hal::delay::DelayNs;

use crate::hal::{FaultHandler, FlashDevice, FlashError, StorageFault, StorageOp};
use crate::types::{FlashGeometry, PAGE_SIZE};

/// Interval between status polls while the device is busy
const BUSY_POLL_MS: u32 = 1;

/// Erase / write / read of page sized blocks with busy-wait completion
///
/// A device error is never returned to the caller: it is passed to the
/// fault handler, which does not return.
pub struct BlockStorage<F, D, H> {
    device: F,
    delay: D,
    fault: H,
    geometry: FlashGeometry,
}

impl<F, D, H> BlockStorage<F, D, H>
where
    F: FlashDevice,
    D: DelayNs,
    H: FaultHandler,
{
    pub fn new(device: F, delay: D, fault: H, geometry: FlashGeometry) -> Self {
        Self {
            device,
            delay,
            fault,
            geometry,
        }
    }

    pub fn geometry(&self) -> FlashGeometry {
        self.geometry
    }

    /// Erase one full sector and wait until the device is ready again
    pub fn erase(&mut self, sector: u32) {
        let address = self.geometry.sector_address(sector);
        if sector >= self.geometry.sector_count {
            self.fail(StorageOp::Erase, address, FlashError::OutOfRange);
        }

        #[cfg(feature = "defmt")]
        defmt::debug!("🧹 Erase sector {} @ 0x{:08X}", sector, address);

        let size = self.geometry.sector_size();
        if let Err(error) = self.device.erase_sector(address, size) {
            self.fail(StorageOp::Erase, address, error);
        }
        self.wait_ready(address);
    }

    /// Program up to one page at `address`, the sector must be erased
    pub fn write(&mut self, data: &[u8], address: u32) {
        if data.len() > PAGE_SIZE {
            self.fail(StorageOp::Write, address, FlashError::InvalidLength);
        }
        self.check_range(StorageOp::Write, address, data.len());

        if let Err(error) = self.device.program(address, data) {
            self.fail(StorageOp::Write, address, error);
        }
        self.wait_ready(address);
    }

    /// Read `buf.len()` bytes at `address`
    pub fn read(&mut self, buf: &mut [u8], address: u32) {
        self.check_range(StorageOp::Read, address, buf.len());

        if let Err(error) = self.device.read(address, buf) {
            self.fail(StorageOp::Read, address, error);
        }
    }

    /// Access to the underlying device
    pub fn device(&mut self) -> &mut F {
        &mut self.device
    }

    fn check_range(&mut self, op: StorageOp, address: u32, len: usize) {
        let end = address as u64 + len as u64;
        if end > self.geometry.capacity() as u64 {
            self.fail(op, address, FlashError::OutOfRange);
        }
    }

    fn wait_ready(&mut self, address: u32) {
        loop {
            match self.device.is_busy() {
                Ok(false) => return,
                Ok(true) => self.delay.delay_ms(BUSY_POLL_MS),
                Err(error) => self.fail(StorageOp::Status, address, error),
            }
        }
    }

    fn fail(&mut self, op: StorageOp, address: u32, error: FlashError) -> ! {
        let fault = StorageFault { op, address, error };

        #[cfg(feature = "defmt")]
        defmt::error!("💥 Storage fault: {:?}", fault);

        self.fault.halt(fault)
    }
}

/// Page level storage shared between tasks
///
/// Each call holds the storage lock for exactly one device operation.
#[allow(async_fn_in_trait)]
pub trait PageStorage {
    fn geometry(&self) -> FlashGeometry;

    async fn erase(&self, sector: u32);

    async fn write(&self, data: &[u8], address: u32);

    async fn read(&self, buf: &mut [u8], address: u32);
}

/// Block storage behind an async mutex
pub struct SharedStorage<M: RawMutex, F, D, H> {
    geometry: FlashGeometry,
    driver: Mutex<M, BlockStorage<F, D, H>>,
}

impl<M, F, D, H> SharedStorage<M, F, D, H>
where
    M: RawMutex,
    F: FlashDevice,
    D: DelayNs,
    H: FaultHandler,
{
    pub fn new(driver: BlockStorage<F, D, H>) -> Self {
        Self {
            geometry: driver.geometry(),
            driver: Mutex::new(driver),
        }
    }

    /// Hold the storage lock across several operations
    pub async fn lock(&self) -> MutexGuard<'_, M, BlockStorage<F, D, H>> {
        self.driver.lock().await
    }
}

impl<M, F, D, H> PageStorage for SharedStorage<M, F, D, H>
where
    M: RawMutex,
    F: FlashDevice,
    D: DelayNs,
    H: FaultHandler,
{
    fn geometry(&self) -> FlashGeometry {
        self.geometry
    }

    async fn erase(&self, sector: u32) {
        self.driver.lock().await.erase(sector);
    }

    async fn write(&self, data: &[u8], address: u32) {
        self.driver.lock().await.write(data, address);
    }

    async fn read(&self, buf: &mut [u8], address: u32) {
        self.driver.lock().await.read(buf, address);
    }
}
