#![no_std]
#![no_main]

#[cfg(feature = "defmt")]
use defmt_rtt as _;

// Cortex-M runtime
use cortex_m_rt as _;

// Panic handler
#[cfg(feature = "defmt")]
use panic_probe as _;
#[cfg(not(feature = "defmt"))]
use panic_halt as _;

use embassy_executor::Spawner;
use embassy_time::Duration;
use static_cell::{ConstStaticCell, StaticCell};

use recorder_core::*;
use voice_recorder_firmware::*;

// Static resources
static STORAGE: StaticCell<BoardStorage> = StaticCell::new();
static BUFFERS: ConstStaticCell<AudioBuffers> = ConstStaticCell::new(AudioBuffers::new());

/// Main firmware entry point
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    #[cfg(feature = "defmt")]
    defmt::info!("🔧 Voice Recorder Firmware Starting...");

    if let Some(core) = cortex_m::Peripherals::take() {
        time_driver::init(core.SYST, CORE_CLOCK_HZ);
    }

    let config = match RecorderConfig::new(MOCK_GEOMETRY, 3, 4) {
        Ok(config) => config,
        Err(_reason) => {
            #[cfg(feature = "defmt")]
            defmt::error!("Invalid recorder config: {}", _reason);
            default_config()
        }
    };
    #[cfg(feature = "defmt")]
    defmt::info!(
        "⚙️ Recorder config: {} sectors, max {}s",
        config.geometry.sector_count,
        config.max_record_seconds()
    );

    let storage = STORAGE.init(init_storage(config.geometry));
    let buffers = BUFFERS.take();

    #[cfg(feature = "defmt")]
    defmt::info!("🚀 Spawning recorder tasks...");

    spawner.must_spawn(recorder_task(storage, buffers, MockRecorderHal::new(), config));
    spawner.must_spawn(events_task(MockCodec::new()));
    spawner.must_spawn(display_task());
    spawner.must_spawn(input_task(MockTouch::new()));
    spawner.must_spawn(dma_task());

    #[cfg(feature = "defmt")]
    defmt::info!("✨ Voice recorder ready!");

    // Main supervision loop
    loop {
        embassy_time::Timer::after(Duration::from_secs(1)).await;
        #[cfg(feature = "defmt")]
        defmt::trace!("💓 Heartbeat, state {:?}", SIGNALS.state.load());
    }
}

/// Bring up the flash driver behind its mutex
fn init_storage(geometry: FlashGeometry) -> BoardStorage {
    #[cfg(feature = "defmt")]
    defmt::info!("🔌 Initializing flash...");

    // Mock RAM flash until the SMIF driver is wired up
    let device = NorFlashDevice::new(MockFlash::new());
    SharedStorage::new(BlockStorage::new(
        device,
        embassy_time::Delay,
        HaltOnFault,
        geometry,
    ))
}
