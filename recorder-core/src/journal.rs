//! Sector index journal
//!
//! The index sector is a sequence of page sized slots. Slots are appended
//! in order and the last slot carrying the signature describes the most
//! recent recording. When no slot is left the sector is erased and the
//! journal restarts at slot 0.

use crate::storage::PageStorage;
use crate::types::{SectorIndexRecord, INDEX_SECTOR, PAGE_SIZE};

/// Bytes of a slot that carry data, the rest stays erased
const HEADER_SIZE: usize = 12;

/// Position and content of the authoritative journal slot
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Journal {
    slot: u32,
    latest: SectorIndexRecord,
}

impl Journal {
    /// Journal of a freshly wiped index sector
    pub const fn new() -> Self {
        Self {
            slot: 0,
            latest: SectorIndexRecord::EMPTY,
        }
    }

    /// Slot holding the authoritative record
    pub fn slot(&self) -> u32 {
        self.slot
    }

    /// Authoritative record
    pub fn latest(&self) -> SectorIndexRecord {
        self.latest
    }

    /// Byte address of a slot
    pub fn slot_address<S: PageStorage>(storage: &S, slot: u32) -> u32 {
        storage.geometry().sector_address(INDEX_SECTOR) + slot * PAGE_SIZE as u32
    }

    /// Read one slot, `None` when it carries no signature
    pub async fn read_slot<S: PageStorage>(storage: &S, slot: u32) -> Option<SectorIndexRecord> {
        let mut header = [0u8; HEADER_SIZE];
        storage.read(&mut header, Self::slot_address(storage, slot)).await;
        SectorIndexRecord::decode(&header)
    }

    /// Scan the index sector for the last valid record
    ///
    /// An invalid slot 0 or a sector with every slot valid both mean there
    /// is nothing usable: the sector is wiped and an empty record written.
    pub async fn load_latest<S: PageStorage>(storage: &S) -> Self {
        let slots = storage.geometry().index_slots();
        let mut found: Option<Self> = None;

        for slot in 0..slots {
            match Self::read_slot(storage, slot).await {
                Some(record) => found = Some(Self { slot, latest: record }),
                None => break,
            }
        }

        match found {
            Some(journal) if journal.slot + 1 < slots => {
                #[cfg(feature = "defmt")]
                defmt::debug!(
                    "📒 Journal slot {}: start {} pages {}",
                    journal.slot,
                    journal.latest.start_sector,
                    journal.latest.pages_recorded
                );
                journal
            }
            _ => {
                #[cfg(feature = "defmt")]
                defmt::info!("📒 Journal empty or full, resetting index sector");
                Self::reset(storage).await
            }
        }
    }

    /// Append a record in the slot after the current one
    pub async fn append<S: PageStorage>(&mut self, storage: &S, record: SectorIndexRecord) {
        let slots = storage.geometry().index_slots();
        let mut next = self.slot + 1;
        if next >= slots {
            #[cfg(feature = "defmt")]
            defmt::info!("📒 Journal wrapped, erasing index sector");
            storage.erase(INDEX_SECTOR).await;
            next = 0;
        }

        storage.write(&record.encode(), Self::slot_address(storage, next)).await;

        #[cfg(feature = "defmt")]
        defmt::debug!(
            "📒 Journal slot {}: start {} pages {}",
            next,
            record.start_sector,
            record.pages_recorded
        );

        self.slot = next;
        self.latest = record;
    }

    async fn reset<S: PageStorage>(storage: &S) -> Self {
        storage.erase(INDEX_SECTOR).await;
        let journal = Self::new();
        storage
            .write(&journal.latest.encode(), Self::slot_address(storage, 0))
            .await;
        journal
    }
}

impl Default for Journal {
    fn default() -> Self {
        Self::new()
    }
}
