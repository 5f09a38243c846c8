//! Recording and playback sessions on simulated flash and DMA

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::channel::Channel;
use recorder_core::test_utils::pattern_page;
use recorder_core::*;
use rstest::rstest;

use crate::rig::*;

#[tokio::test]
async fn test_record_then_play_round_trip() {
    println!("🎙️ Testing record / play round trip...");

    let rig = Rig::small();
    let mut buffers = AudioBuffers::new();
    let mut recorder = rig.recorder(&mut buffers);

    recorder.init().await;
    rig.record(&mut recorder, 0..5).await;
    assert_eq!(recorder.pages_recorded(), 5);

    recorder.play().await;
    assert_eq!(recorder.state(), RecorderState::Playing);
    assert!(rig.hal.playback.clock_running());

    let played = rig.play_out(&mut recorder).await;

    assert_eq!(played, pages(0..5));
    assert_eq!(recorder.pages_played(), 5);
    assert_eq!(recorder.state(), RecorderState::Idle);
    assert_eq!(rig.signals.state.load(), RecorderState::Idle);
    assert!(!rig.hal.playback.enabled());
    assert!(!rig.hal.playback.clock_running());
    assert_eq!(rig.recorder_events(), vec![RecorderEvent::PlaybackCompleted]);

    println!("  ✅ {} pages came back in order", played.len());
}

#[tokio::test]
async fn test_journal_follows_each_recording() {
    println!("📒 Testing journal after each recording...");

    let rig = Rig::small();
    let mut buffers = AudioBuffers::new();
    let mut recorder = rig.recorder(&mut buffers);
    recorder.init().await;

    let mut first = 0;
    for length in [3u32, 6, 1] {
        rig.record(&mut recorder, first..first + length).await;

        let slot = recorder.journal().slot();
        let stored = Journal::read_slot(&rig.storage, slot).await;
        assert_eq!(stored, Some(recorder.journal().latest()));
        assert_eq!(recorder.journal().latest().pages_recorded, length);
        assert_eq!(recorder.start_sector(), recorder.journal().latest().start_sector);

        for page in 0..length {
            assert_eq!(
                rig.flash.recorded_page(recorder.start_sector(), page),
                pattern_page(first + page).to_vec()
            );
        }
        println!(
            "  📝 slot {}: sector {} pages {}",
            slot,
            recorder.start_sector(),
            length
        );
        first += length;
    }

    println!("  ✅ Journal tracks every stop");
}

#[tokio::test]
async fn test_limit_reached_once() {
    println!("🛑 Testing recording limit...");

    let rig = Rig::small();
    let mut buffers = AudioBuffers::new();
    let mut recorder = rig.recorder(&mut buffers);
    recorder.init().await;

    recorder.start().await;
    let mut accepted = 0;
    for seed in 0..11 {
        accepted += rig.capture(seed..seed + 1);
        recorder.service_pending().await;
    }

    let limit = rig.config.max_record_pages;
    assert_eq!(accepted as u32, limit);
    assert_eq!(recorder.state(), RecorderState::Idle);
    assert!(!rig.hal.capture.enabled());
    assert_eq!(rig.recorder_events(), vec![RecorderEvent::LimitReached]);
    assert_eq!(recorder.journal().latest().pages_recorded, limit);

    // Stop after the limit changes nothing
    recorder.stop().await;
    assert_eq!(rig.recorder_events().len(), 1);

    recorder.play().await;
    assert_eq!(rig.play_out(&mut recorder).await, pages(0..limit));

    println!("  ✅ Recording capped at {} pages", limit);
}

#[rstest]
#[case::two_sector_takes(4, 6, 2, 6)]
#[case::straddles_the_end(4, 6, 2, 5)]
#[case::tiny_sectors(2, 5, 3, 5)]
#[case::three_recording_sectors(8, 4, 2, 9)]
#[tokio::test]
async fn test_recordings_wrap_around_flash(
    #[case] pages_per_sector: u32,
    #[case] sector_count: u32,
    #[case] max_record_sectors: u32,
    #[case] length: u32,
) {
    println!(
        "🔁 Testing wraparound: {} sectors of {} pages, {} page takes",
        sector_count, pages_per_sector, length
    );

    let rig = Rig::new(config(pages_per_sector, sector_count, max_record_sectors, 4));
    let geometry = rig.config.geometry;
    let mut buffers = AudioBuffers::new();
    let mut recorder = rig.recorder(&mut buffers);
    recorder.init().await;

    let takes = 10u32;
    let mut previous = recorder.journal().latest();
    let mut wrapped = false;

    for take in 0..takes {
        let first = take * 100;
        rig.record(&mut recorder, first..first + length).await;

        let latest = recorder.journal().latest();
        let previous_end = geometry.last_sector(previous.start_sector, previous.pages_recorded);
        assert_eq!(latest.start_sector, geometry.next_recording_sector(previous_end));
        assert_eq!(latest.pages_recorded, length);
        assert!(geometry.is_recording_sector(latest.start_sector));

        for page in 0..length {
            assert_eq!(
                rig.flash.recorded_page(latest.start_sector, page),
                pattern_page(first + page).to_vec()
            );
        }

        wrapped |= latest.start_sector < previous.start_sector;
        previous = latest;
    }

    assert!(wrapped, "no recording went past the last sector");
    // One wipe at init, then one each time the slots run out
    let slots = geometry.index_slots();
    assert_eq!(rig.flash.erase_count(INDEX_SECTOR), 1 + (takes / slots) as usize);

    recorder.play().await;
    let played = rig.play_out(&mut recorder).await;
    let first = (takes - 1) * 100;
    assert_eq!(played, pages(first..first + length));

    println!("  ✅ {} takes recorded and the last one replays", takes);
}

#[tokio::test]
async fn test_pause_and_resume() {
    println!("⏸️ Testing pause / resume...");

    let rig = Rig::small();
    let mut buffers = AudioBuffers::new();
    let mut recorder = rig.recorder(&mut buffers);
    recorder.init().await;
    rig.record(&mut recorder, 0..5).await;

    recorder.play().await;
    assert!(rig.hal.playback.complete_page(&rig.signals.notifier));
    recorder.service_pending().await;

    recorder.pause();
    recorder.pause();
    assert_eq!(recorder.state(), RecorderState::Paused);
    assert_eq!(rig.signals.state.load(), RecorderState::Paused);
    assert!(!rig.hal.playback.enabled());
    // A paused channel makes no progress
    assert!(!rig.hal.playback.complete_page(&rig.signals.notifier));

    recorder.resume();
    recorder.resume();
    assert_eq!(recorder.state(), RecorderState::Playing);
    assert!(rig.hal.playback.enabled());

    let played = rig.play_out(&mut recorder).await;
    assert_eq!(played, pages(0..5));
    assert_eq!(rig.recorder_events(), vec![RecorderEvent::PlaybackCompleted]);

    // Pause and resume outside playback are ignored
    recorder.pause();
    recorder.resume();
    assert_eq!(recorder.state(), RecorderState::Idle);

    println!("  ✅ Pause kept the position");
}

#[tokio::test]
async fn test_reset_during_playback() {
    println!("⏹️ Testing reset during playback...");

    let rig = Rig::small();
    let mut buffers = AudioBuffers::new();
    let mut recorder = rig.recorder(&mut buffers);
    recorder.init().await;
    rig.record(&mut recorder, 0..5).await;
    let journal = *recorder.journal();

    recorder.play().await;
    for _ in 0..2 {
        assert!(rig.hal.playback.complete_page(&rig.signals.notifier));
        recorder.service_pending().await;
    }

    recorder.reset();

    assert_eq!(recorder.state(), RecorderState::Idle);
    assert!(!rig.hal.playback.enabled());
    assert!(!rig.hal.playback.clock_running());
    assert_eq!(rig.hal.playback.queued(), 0);
    assert!(rig.recorder_events().is_empty());
    assert_eq!(*recorder.journal(), journal);

    // Playing again starts from the first page
    recorder.play().await;
    let played = rig.play_out(&mut recorder).await;
    assert_eq!(played[2..], pages(0..5)[..]);

    println!("  ✅ Reset stopped playback and kept the recording");
}

#[tokio::test]
async fn test_start_during_playback() {
    println!("🔴 Testing start during playback...");

    let rig = Rig::small();
    let mut buffers = AudioBuffers::new();
    let mut recorder = rig.recorder(&mut buffers);
    recorder.init().await;
    rig.record(&mut recorder, 0..3).await;
    let old = recorder.journal().latest();

    recorder.play().await;
    assert!(rig.hal.playback.complete_page(&rig.signals.notifier));
    recorder.service_pending().await;

    recorder.start().await;
    assert_eq!(recorder.state(), RecorderState::Recording);
    assert!(!rig.hal.playback.enabled());
    assert!(!rig.hal.playback.clock_running());
    assert!(rig.hal.capture.enabled());

    for seed in 10..13 {
        rig.capture(seed..seed + 1);
        recorder.service_pending().await;
    }
    recorder.stop().await;

    let latest = recorder.journal().latest();
    assert_eq!(latest.pages_recorded, 3);
    assert_eq!(
        latest.start_sector,
        rig.config.geometry.next_recording_sector(old.start_sector)
    );
    assert!(rig.recorder_events().is_empty());

    println!("  ✅ New recording in sector {}", latest.start_sector);
}

#[tokio::test]
async fn test_recording_survives_reboot() {
    println!("🔌 Testing recording across a reboot...");

    let flash = {
        let rig = Rig::small();
        let mut buffers = AudioBuffers::new();
        let mut recorder = rig.recorder(&mut buffers);
        recorder.init().await;
        rig.record(&mut recorder, 0..4).await;
        rig.record(&mut recorder, 40..47).await;
        rig.flash.clone()
    };

    let rig = Rig::with_flash(small_config(), flash);
    let mut buffers = AudioBuffers::new();
    let mut recorder = rig.recorder(&mut buffers);
    recorder.init().await;

    assert_eq!(recorder.pages_recorded(), 7);
    assert_eq!(recorder.journal().slot(), 2);

    recorder.play().await;
    assert_eq!(rig.play_out(&mut recorder).await, pages(40..47));

    // The next recording goes after the restored one
    let previous_end = recorder.end_sector();
    rig.record(&mut recorder, 70..72).await;
    assert_eq!(
        recorder.start_sector(),
        rig.config.geometry.next_recording_sector(previous_end)
    );

    println!("  ✅ Last recording restored from the journal");
}

#[tokio::test]
async fn test_reset_recording_keeps_previous_take() {
    println!("🗑️ Testing reset while recording...");

    let rig = Rig::small();
    let mut buffers = AudioBuffers::new();
    let mut recorder = rig.recorder(&mut buffers);
    recorder.init().await;
    rig.record(&mut recorder, 0..4).await;

    recorder.start().await;
    for seed in 50..56 {
        rig.capture(seed..seed + 1);
        recorder.service_pending().await;
    }
    recorder.reset();
    assert!(!rig.hal.capture.enabled());
    assert_eq!(recorder.journal().latest().pages_recorded, 4);

    recorder.play().await;
    assert_eq!(rig.play_out(&mut recorder).await, pages(0..4));

    // Dirty sectors left by the abandoned take are erased before reuse
    rig.record(&mut recorder, 60..66).await;
    recorder.play().await;
    let played = rig.play_out(&mut recorder).await;
    assert_eq!(played[4..], pages(60..66)[..]);

    println!("  ✅ Abandoned take never reached the journal");
}

#[tokio::test]
async fn test_empty_play_completes_immediately() {
    let rig = Rig::small();
    let mut buffers = AudioBuffers::new();
    let mut recorder = rig.recorder(&mut buffers);
    recorder.init().await;

    recorder.execute(RecorderCommand::Play).await;

    assert_eq!(recorder.state(), RecorderState::Idle);
    assert_eq!(rig.recorder_events(), vec![RecorderEvent::PlaybackCompleted]);
    assert_eq!(rig.hal.playback.descriptor_resets(), 0);
}

#[tokio::test]
async fn test_busy_flash_is_polled() {
    let rig = Rig::small();
    rig.flash.set_busy_polls(3);
    let mut buffers = AudioBuffers::new();
    let mut recorder = rig.recorder(&mut buffers);
    recorder.init().await;

    rig.record(&mut recorder, 0..2).await;
    recorder.play().await;

    assert_eq!(rig.play_out(&mut recorder).await, pages(0..2));
}

#[test]
#[should_panic(expected = "CommandRejected")]
fn test_rejected_write_is_fatal() {
    let rig = Rig::small();
    let mut buffers = AudioBuffers::new();
    let mut recorder = rig.recorder(&mut buffers);

    tokio_test::block_on(async {
        recorder.init().await;
        recorder.start().await;
        rig.flash.reject_next(StorageOp::Write);
        rig.capture(0..1);
        recorder.service_pending().await;
    });
}

#[tokio::test]
async fn test_run_loop_serves_commands_and_dma() {
    println!("🔄 Testing recorder task loop...");

    let rig = Rig::small();
    let commands: Channel<NoopRawMutex, RecorderCommand, 4> = Channel::new();
    let mut buffers = AudioBuffers::new();
    let mut recorder = rig.recorder(&mut buffers);
    recorder.init().await;

    let script = async {
        commands.send(RecorderCommand::Start).await;
        settle().await;
        assert_eq!(rig.signals.state.load(), RecorderState::Recording);

        for seed in 0..6 {
            rig.capture(seed..seed + 1);
            settle().await;
        }

        commands.send(RecorderCommand::StopAndPlay).await;
        settle().await;
        assert_eq!(rig.signals.state.load(), RecorderState::Playing);

        while rig.hal.playback.complete_page(&rig.signals.notifier) {
            settle().await;
        }
        rig.hal.playback.played()
    };

    let played = match select(recorder.run(commands.receiver()), script).await {
        Either::First(()) => unreachable!(),
        Either::Second(played) => played,
    };

    assert_eq!(played, pages(0..6));
    assert_eq!(recorder.state(), RecorderState::Idle);
    assert_eq!(rig.recorder_events(), vec![RecorderEvent::PlaybackCompleted]);

    println!("  ✅ Task loop recorded and replayed 6 pages");
}

#[rstest]
#[case::index_sector(SectorIndexRecord { start_sector: 0, pages_recorded: 3 })]
#[case::past_the_limit(SectorIndexRecord { start_sector: 2, pages_recorded: 1000 })]
#[tokio::test]
async fn test_reset_never_restores_rejected_record(#[case] bad: SectorIndexRecord) {
    println!("🧯 Testing reset after a rejected journal record {:?}...", bad);

    let config = small_config();
    let flash = recorder_core::test_utils::SimFlash::new(config.geometry);
    flash.poke(0, &bad.encode());

    let rig = Rig::with_flash(config, flash);
    let mut buffers = AudioBuffers::new();
    let mut recorder = rig.recorder(&mut buffers);
    recorder.init().await;
    assert_eq!(recorder.start_sector(), FIRST_RECORD_SECTOR);
    assert_eq!(recorder.pages_recorded(), 0);

    recorder.start().await;
    rig.capture(0..2);
    recorder.service_pending().await;
    recorder.reset();

    assert_eq!(recorder.start_sector(), FIRST_RECORD_SECTOR);
    assert_eq!(recorder.pages_recorded(), 0);

    recorder.play().await;
    assert!(rig.hal.playback.played().is_empty());
    assert_eq!(rig.recorder_events(), vec![RecorderEvent::PlaybackCompleted]);

    // Restarting a take goes through the same fallback
    recorder.start().await;
    rig.capture(5..6);
    recorder.service_pending().await;
    recorder.start().await;
    for seed in 10..13 {
        rig.capture(seed..seed + 1);
        recorder.service_pending().await;
    }
    recorder.stop().await;

    recorder.play().await;
    assert_eq!(rig.play_out(&mut recorder).await, pages(10..13));

    println!("  ✅ Rejected record stayed rejected");
}

#[tokio::test]
async fn test_limit_reached_once_with_burst() {
    println!("🛑 Testing recording limit with a burst of completions...");

    let rig = Rig::small();
    let mut buffers = AudioBuffers::new();
    let mut recorder = rig.recorder(&mut buffers);
    recorder.init().await;

    let limit = rig.config.max_record_pages;
    recorder.start().await;
    // All completions land before the recorder gets to run
    assert_eq!(rig.capture(0..limit + 3), (limit + 3) as usize);
    recorder.service_pending().await;

    assert_eq!(recorder.state(), RecorderState::Idle);
    assert!(!rig.hal.capture.enabled());
    assert_eq!(rig.recorder_events(), vec![RecorderEvent::LimitReached]);
    assert_eq!(recorder.journal().latest().pages_recorded, limit);
    assert_eq!(rig.hal.capture.pending(), 3);

    recorder.service_pending().await;
    assert_eq!(rig.recorder_events().len(), 1);

    recorder.play().await;
    assert_eq!(rig.play_out(&mut recorder).await, pages(0..limit));

    println!("  ✅ {} extra pages ignored after the limit", 3);
}
