//! Embassy time driver on the Cortex-M SysTick

use core::cell::Cell;

use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::SYST;
use cortex_m_rt::exception;
use critical_section::Mutex;
use embassy_time_driver::{AlarmHandle, Driver};
use portable_atomic::{AtomicBool, AtomicU32, Ordering};

/// SysTick interrupts per second, matches the embassy-time tick rate
pub const TICK_HZ: u32 = 1_000;

#[derive(Copy, Clone)]
struct Alarm {
    timestamp: u64,
    callback: Option<fn(*mut ())>,
    ctx: usize,
}

/// Millisecond tick counter with a single alarm
pub struct SysTickDriver {
    tick_count: AtomicU32,
    alarm_taken: AtomicBool,
    alarm: Mutex<Cell<Alarm>>,
}

impl SysTickDriver {
    const fn new() -> Self {
        Self {
            tick_count: AtomicU32::new(0),
            alarm_taken: AtomicBool::new(false),
            alarm: Mutex::new(Cell::new(Alarm {
                timestamp: u64::MAX,
                callback: None,
                ctx: 0,
            })),
        }
    }

    /// Advance time and fire the alarm when due (SysTick handler)
    fn tick(&self) {
        let now = self.tick_count.fetch_add(1, Ordering::Relaxed) as u64 + 1;

        critical_section::with(|cs| {
            let cell = self.alarm.borrow(cs);
            let mut alarm = cell.get();
            if now < alarm.timestamp {
                return;
            }
            alarm.timestamp = u64::MAX;
            cell.set(alarm);
            if let Some(callback) = alarm.callback {
                callback(alarm.ctx as *mut ());
            }
        });
    }
}

impl Driver for SysTickDriver {
    fn now(&self) -> u64 {
        self.tick_count.load(Ordering::Relaxed) as u64
    }

    unsafe fn allocate_alarm(&self) -> Option<AlarmHandle> {
        if self.alarm_taken.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(AlarmHandle::new(0))
    }

    fn set_alarm_callback(&self, _alarm: AlarmHandle, callback: fn(*mut ()), ctx: *mut ()) {
        critical_section::with(|cs| {
            let cell = self.alarm.borrow(cs);
            let mut alarm = cell.get();
            alarm.callback = Some(callback);
            alarm.ctx = ctx as usize;
            cell.set(alarm);
        });
    }

    fn set_alarm(&self, _alarm: AlarmHandle, timestamp: u64) -> bool {
        critical_section::with(|cs| {
            // Already due: the caller handles it right away
            if timestamp <= self.now() {
                return false;
            }
            let cell = self.alarm.borrow(cs);
            let mut alarm = cell.get();
            alarm.timestamp = timestamp;
            cell.set(alarm);
            true
        })
    }
}

embassy_time_driver::time_driver_impl!(static DRIVER: SysTickDriver = SysTickDriver::new());

/// Start SysTick at `TICK_HZ` from the core clock
pub fn init(mut syst: SYST, core_clock_hz: u32) {
    syst.set_clock_source(SystClkSource::Core);
    syst.set_reload(core_clock_hz / TICK_HZ - 1);
    syst.clear_current();
    syst.enable_interrupt();
    syst.enable_counter();
}

#[exception]
fn SysTick() {
    DRIVER.tick();
}
