//! Event dispatch between the touch input, the recorder and the display

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::{Receiver, Sender};
use embedded_hal::delay::DelayNs;

use crate::hal::{Codec, EventSink};
use crate::notify::StateCell;
use crate::types::{
    AppEvent, DisplayEvent, InputEvent, RecorderCommand, RecorderEvent, RecorderState,
};

/// Headphone attenuation at power up (0 dB)
pub const VOLUME_DEFAULT: u8 = 0x0C;
/// Loudest setting (+6 dB)
pub const VOLUME_MAX: u8 = 0x00;
/// Attenuation that mutes the output
pub const VOLUME_MUTE: u8 = 0x90;
/// Attenuation change per swipe
pub const VOLUME_STEP: u8 = 0x0C;

/// Pause between attempts to set the power-up volume
const CODEC_RETRY_MS: u32 = 10;

/// Attenuation register value as a 0-100 volume figure
pub const fn volume_percent(attenuation: u8) -> u8 {
    let attenuation = if attenuation > VOLUME_MUTE {
        VOLUME_MUTE
    } else {
        attenuation
    };
    ((VOLUME_MUTE - attenuation) as u32 * 100 / VOLUME_MUTE as u32) as u8
}

/// Turns input and recorder events into recorder commands and display updates
pub struct Dispatcher<C> {
    codec: C,
    attenuation: u8,
}

impl<C: Codec> Dispatcher<C> {
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            attenuation: VOLUME_DEFAULT,
        }
    }

    /// Current headphone attenuation
    pub fn attenuation(&self) -> u8 {
        self.attenuation
    }

    pub fn codec(&mut self) -> &mut C {
        &mut self.codec
    }

    /// Draw the idle screen and bring up the codec
    ///
    /// The power-up volume is retried until the codec accepts it.
    pub fn startup<V, D>(&mut self, display: &mut V, delay: &mut D)
    where
        V: EventSink<DisplayEvent>,
        D: DelayNs,
    {
        show(display, DisplayEvent::ShowStopped);
        show(display, DisplayEvent::ShowVolumeLabel);
        show(display, DisplayEvent::ShowVolume(volume_percent(self.attenuation)));
        show(display, DisplayEvent::ShowTime(0));

        if self.codec.init().is_err() {
            #[cfg(feature = "defmt")]
            defmt::warn!("⚠️ Codec init failed");
        }
        if self.codec.activate().is_err() {
            #[cfg(feature = "defmt")]
            defmt::warn!("⚠️ Codec activate failed");
        }

        while self.codec.set_headphone_volume(self.attenuation).is_err() {
            delay.delay_ms(CODEC_RETRY_MS);
        }

        #[cfg(feature = "defmt")]
        defmt::info!("🔊 Codec ready, attenuation 0x{:02X}", self.attenuation);
    }

    /// Handle one event given the recorder state it was observed in
    pub fn handle<V>(
        &mut self,
        event: AppEvent,
        state: RecorderState,
        display: &mut V,
    ) -> Option<RecorderCommand>
    where
        V: EventSink<DisplayEvent>,
    {
        match event {
            AppEvent::Input(InputEvent::PrimaryButton) => match state {
                RecorderState::Recording => {
                    show(display, DisplayEvent::ShowStopped);
                    Some(RecorderCommand::Stop)
                }
                RecorderState::Playing | RecorderState::Paused => {
                    show(display, DisplayEvent::ShowStopped);
                    Some(RecorderCommand::Reset)
                }
                RecorderState::Idle => {
                    show(display, DisplayEvent::ShowRecording);
                    show(display, DisplayEvent::ClearWarning);
                    Some(RecorderCommand::Start)
                }
            },
            AppEvent::Input(InputEvent::SecondaryButton) => {
                show(display, DisplayEvent::ClearWarning);
                match state {
                    RecorderState::Recording => {
                        show(display, DisplayEvent::ShowPlaying);
                        Some(RecorderCommand::StopAndPlay)
                    }
                    RecorderState::Playing => {
                        show(display, DisplayEvent::ShowPaused);
                        Some(RecorderCommand::Pause)
                    }
                    RecorderState::Paused => {
                        show(display, DisplayEvent::ShowPlaying);
                        Some(RecorderCommand::Resume)
                    }
                    RecorderState::Idle => {
                        show(display, DisplayEvent::ShowPlaying);
                        Some(RecorderCommand::Play)
                    }
                }
            }
            AppEvent::Input(InputEvent::GestureLeft) => {
                let quieter = self.attenuation.saturating_add(VOLUME_STEP).min(VOLUME_MUTE);
                self.set_volume(quieter, display);
                None
            }
            AppEvent::Input(InputEvent::GestureRight) => {
                let louder = self.attenuation.saturating_sub(VOLUME_STEP).max(VOLUME_MAX);
                self.set_volume(louder, display);
                None
            }
            AppEvent::Recorder(RecorderEvent::PlaybackCompleted) => {
                show(display, DisplayEvent::ShowStopped);
                None
            }
            AppEvent::Recorder(RecorderEvent::LimitReached) => {
                show(display, DisplayEvent::ShowStopped);
                show(display, DisplayEvent::ShowWarning);
                None
            }
        }
    }

    fn set_volume<V: EventSink<DisplayEvent>>(&mut self, attenuation: u8, display: &mut V) {
        self.attenuation = attenuation;
        // Runtime volume changes are best effort
        if self.codec.set_headphone_volume(attenuation).is_err() {
            #[cfg(feature = "defmt")]
            defmt::warn!("⚠️ Codec rejected attenuation 0x{:02X}", attenuation);
        }
        show(display, DisplayEvent::ShowVolume(volume_percent(attenuation)));
    }
}

fn show<V: EventSink<DisplayEvent>>(display: &mut V, event: DisplayEvent) {
    if !display.post(event) {
        #[cfg(feature = "defmt")]
        defmt::warn!("⚠️ Display queue full, dropped {:?}", event);
    }
}

/// Events task body: one event in, at most one recorder command out
///
/// The recorder runs commands on its own task. After sending one, this waits
/// until the recorder has executed it, so the next event is mapped against
/// the state that command produced rather than a stale one.
pub async fn dispatch_events<C, M, V, const N: usize, const K: usize>(
    dispatcher: &mut Dispatcher<C>,
    events: Receiver<'_, M, AppEvent, N>,
    commands: Sender<'_, M, RecorderCommand, K>,
    state: &StateCell,
    display: &mut V,
) where
    C: Codec,
    M: RawMutex,
    V: EventSink<DisplayEvent>,
{
    let mut sent = state.commands_handled();
    loop {
        let event = events.receive().await;

        #[cfg(feature = "defmt")]
        defmt::debug!("Event {:?}", event);

        if let Some(command) = dispatcher.handle(event, state.load(), display) {
            commands.send(command).await;
            sent = sent.wrapping_add(1);
            state.wait_handled(sent).await;
        }
    }
}
