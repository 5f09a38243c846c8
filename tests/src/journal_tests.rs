//! Index sector journal across many recordings and damaged images

use proptest::prelude::*;
use recorder_core::test_utils::SimFlash;
use recorder_core::*;
use tokio_test::block_on;

use crate::rig::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_journal_slot_matches_last_stop(lengths in prop::collection::vec(1u32..=8, 1..12)) {
        let rig = Rig::small();
        let slots = rig.config.geometry.index_slots();
        let mut buffers = AudioBuffers::new();
        let mut recorder = rig.recorder(&mut buffers);

        block_on(recorder.init());

        let mut first = 0;
        for &length in &lengths {
            block_on(rig.record(&mut recorder, first..first + length));
            first += length;

            let journal = *recorder.journal();
            prop_assert_eq!(journal.latest().pages_recorded, length);
            prop_assert_eq!(
                block_on(Journal::read_slot(&rig.storage, journal.slot())),
                Some(journal.latest())
            );
            // Nothing was written past the current slot
            if journal.slot() + 1 < slots {
                prop_assert_eq!(block_on(Journal::read_slot(&rig.storage, journal.slot() + 1)), None);
            }
        }

        let wipes = rig.flash.erase_count(INDEX_SECTOR);
        prop_assert_eq!(wipes, 1 + lengths.len() / slots as usize);
    }

    #[test]
    fn prop_reboot_restores_last_recording(lengths in prop::collection::vec(1u32..=8, 1..6)) {
        let rig = Rig::small();
        let mut buffers = AudioBuffers::new();
        let mut recorder = rig.recorder(&mut buffers);
        block_on(recorder.init());

        let mut first = 0;
        for &length in &lengths {
            block_on(rig.record(&mut recorder, first..first + length));
            first += length;
        }
        let journal = *recorder.journal();
        let slots = rig.config.geometry.index_slots();

        let rebooted = Rig::with_flash(rig.config, rig.flash.clone());
        let mut buffers = AudioBuffers::new();
        let mut recorder = rebooted.recorder(&mut buffers);
        block_on(recorder.init());

        if journal.slot() + 1 == slots {
            // The last slot was in use, so the sector was wiped on load
            prop_assert_eq!(*recorder.journal(), Journal::new());
        } else {
            prop_assert_eq!(*recorder.journal(), journal);
            prop_assert_eq!(recorder.pages_recorded(), journal.latest().pages_recorded);
        }
    }
}

fn slot_address(slot: u32) -> u32 {
    slot * PAGE_SIZE as u32
}

#[test]
fn test_blank_flash_gets_empty_record() {
    let rig = Rig::small();
    let mut buffers = AudioBuffers::new();
    let mut recorder = rig.recorder(&mut buffers);

    block_on(recorder.init());

    assert_eq!(recorder.journal().slot(), 0);
    assert_eq!(
        block_on(Journal::read_slot(&rig.storage, 0)),
        Some(SectorIndexRecord::EMPTY)
    );
    assert_eq!(rig.flash.bytes(0, 4), SIGNATURE.to_le_bytes().to_vec());
}

#[test]
fn test_garbage_first_slot_wipes_index() {
    let flash = SimFlash::new(small_config().geometry);
    flash.poke(slot_address(0), &[0x12, 0x34, 0x56, 0x78]);
    let valid = SectorIndexRecord {
        start_sector: 3,
        pages_recorded: 4,
    };
    flash.poke(slot_address(1), &valid.encode());

    let rig = Rig::with_flash(small_config(), flash);
    let mut buffers = AudioBuffers::new();
    let mut recorder = rig.recorder(&mut buffers);
    block_on(recorder.init());

    assert_eq!(recorder.journal().latest(), SectorIndexRecord::EMPTY);
    assert_eq!(rig.flash.erase_log()[0], INDEX_SECTOR);
    assert_eq!(block_on(Journal::read_slot(&rig.storage, 1)), None);
}

#[test]
fn test_full_index_is_wiped_on_load() {
    let config = small_config();
    let flash = SimFlash::new(config.geometry);
    for slot in 0..config.geometry.index_slots() {
        let record = SectorIndexRecord {
            start_sector: 1 + slot,
            pages_recorded: 2,
        };
        flash.poke(slot_address(slot), &record.encode());
    }

    let rig = Rig::with_flash(config, flash);
    let mut buffers = AudioBuffers::new();
    let mut recorder = rig.recorder(&mut buffers);
    block_on(recorder.init());

    assert_eq!(recorder.journal().slot(), 0);
    assert_eq!(recorder.journal().latest(), SectorIndexRecord::EMPTY);
    assert_eq!(rig.flash.erase_count(INDEX_SECTOR), 1);
}

#[test]
fn test_last_valid_slot_wins() {
    let config = small_config();
    let flash = SimFlash::new(config.geometry);
    flash.poke(slot_address(0), &SectorIndexRecord::EMPTY.encode());
    let latest = SectorIndexRecord {
        start_sector: 4,
        pages_recorded: 6,
    };
    flash.poke(
        slot_address(1),
        &SectorIndexRecord {
            start_sector: 2,
            pages_recorded: 3,
        }
        .encode(),
    );
    flash.poke(slot_address(2), &latest.encode());

    let rig = Rig::with_flash(config, flash);
    let mut buffers = AudioBuffers::new();
    let mut recorder = rig.recorder(&mut buffers);
    block_on(recorder.init());

    assert_eq!(recorder.journal().slot(), 2);
    assert_eq!(recorder.journal().latest(), latest);
    assert_eq!(recorder.start_sector(), 4);
    assert_eq!(recorder.end_sector(), 5);
    // Only the sector after the recording was touched
    assert_eq!(rig.flash.erase_log(), vec![1]);
}

#[test]
fn test_record_outside_layout_is_ignored() {
    let config = small_config();
    let flash = SimFlash::new(config.geometry);
    flash.poke(slot_address(0), &SectorIndexRecord::EMPTY.encode());
    flash.poke(
        slot_address(1),
        &SectorIndexRecord {
            start_sector: 99,
            pages_recorded: 3,
        }
        .encode(),
    );

    let rig = Rig::with_flash(config, flash);
    let mut buffers = AudioBuffers::new();
    let mut recorder = rig.recorder(&mut buffers);
    block_on(recorder.init());

    assert_eq!(recorder.start_sector(), FIRST_RECORD_SECTOR);
    assert_eq!(recorder.pages_recorded(), 0);

    block_on(recorder.play());
    assert_eq!(rig.recorder_events(), vec![RecorderEvent::PlaybackCompleted]);
}
