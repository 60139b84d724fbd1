//! Start/stop button.
//!
//! A long press toggles acquisition: hold past the threshold and release to
//! start, do it again to stop. Short presses are ignored so a bump in the car
//! cannot end a recording.

use std::time::{Duration, Instant};

/// Command produced by a completed long press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonCommand {
    /// Begin a session.
    Start,
    /// End the session.
    Stop,
}

/// Edge-driven hold detector.
#[derive(Debug, Clone)]
pub struct HoldToggle {
    hold: Duration,
    pressed_at: Option<Instant>,
    engaged: bool,
}

impl HoldToggle {
    /// Presses must last longer than `hold` to count.
    pub fn new(hold: Duration) -> Self {
        Self {
            hold,
            pressed_at: None,
            engaged: false,
        }
    }

    /// Button went down.
    pub fn on_press(&mut self, at: Instant) {
        self.pressed_at = Some(at);
    }

    /// Button came up. Returns a command when the press was held long enough.
    pub fn on_release(&mut self, at: Instant) -> Option<ButtonCommand> {
        let pressed_at = self.pressed_at.take()?;
        if at.saturating_duration_since(pressed_at) <= self.hold {
            return None;
        }
        self.engaged = !self.engaged;
        Some(if self.engaged {
            ButtonCommand::Start
        } else {
            ButtonCommand::Stop
        })
    }
}

#[cfg(feature = "hardware")]
pub use watcher::ButtonWatcher;

#[cfg(feature = "hardware")]
mod watcher {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread::{self, JoinHandle};
    use std::time::{Duration, Instant};

    use rppal::gpio::{Gpio, Trigger};
    use tokio::sync::mpsc::UnboundedSender;
    use tracing::{debug, error, info};

    use super::{ButtonCommand, HoldToggle};
    use crate::error::{AppResult, DaqError};

    const POLL_TIMEOUT: Duration = Duration::from_millis(200);
    const DEBOUNCE: Duration = Duration::from_millis(20);

    /// Feeds edges from a pulled-up, active-low button pin into a
    /// [`HoldToggle`] and forwards the resulting commands.
    pub struct ButtonWatcher {
        running: Arc<AtomicBool>,
        handle: Option<JoinHandle<()>>,
    }

    impl ButtonWatcher {
        /// Claim `pin_number` and start the watcher thread.
        pub fn spawn(
            pin_number: u8,
            hold: Duration,
            commands: UnboundedSender<ButtonCommand>,
        ) -> AppResult<Self> {
            let gpio_err = |e: rppal::gpio::Error| {
                DaqError::Configuration(format!("Button pin {}: {}", pin_number, e))
            };
            let mut pin = Gpio::new()
                .map_err(gpio_err)?
                .get(pin_number)
                .map_err(gpio_err)?
                .into_input_pullup();
            pin.set_interrupt(Trigger::Both, Some(DEBOUNCE))
                .map_err(gpio_err)?;

            let running = Arc::new(AtomicBool::new(true));
            let thread_running = Arc::clone(&running);
            let handle = thread::Builder::new()
                .name("daq-button".to_string())
                .spawn(move || {
                    let mut toggle = HoldToggle::new(hold);
                    while thread_running.load(Ordering::SeqCst) {
                        match pin.poll_interrupt(true, Some(POLL_TIMEOUT)) {
                            Ok(Some(_)) => {
                                let now = Instant::now();
                                if pin.is_low() {
                                    toggle.on_press(now);
                                } else if let Some(command) = toggle.on_release(now) {
                                    debug!(?command, "Button held");
                                    if commands.send(command).is_err() {
                                        break;
                                    }
                                }
                            }
                            Ok(None) => {}
                            Err(e) => {
                                error!(pin = pin_number, error = %e, "Button interrupt failed");
                                break;
                            }
                        }
                    }
                    let _ = pin.clear_interrupt();
                })?;

            info!(pin = pin_number, hold_s = hold.as_secs_f64(), "Watching DAQ button");
            Ok(Self {
                running,
                handle: Some(handle),
            })
        }
    }

    impl Drop for ButtonWatcher {
        fn drop(&mut self) {
            self.running.store(false, Ordering::SeqCst);
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOLD: Duration = Duration::from_secs(3);

    #[test]
    fn test_long_presses_alternate() {
        let mut toggle = HoldToggle::new(HOLD);
        let t0 = Instant::now();

        toggle.on_press(t0);
        assert_eq!(
            toggle.on_release(t0 + Duration::from_millis(3500)),
            Some(ButtonCommand::Start)
        );

        let t1 = t0 + Duration::from_secs(60);
        toggle.on_press(t1);
        assert_eq!(
            toggle.on_release(t1 + Duration::from_secs(4)),
            Some(ButtonCommand::Stop)
        );
    }

    #[test]
    fn test_short_press_ignored() {
        let mut toggle = HoldToggle::new(HOLD);
        let t0 = Instant::now();
        toggle.on_press(t0);
        assert_eq!(toggle.on_release(t0 + Duration::from_secs(1)), None);
        // Exactly the threshold is not long enough.
        toggle.on_press(t0);
        assert_eq!(toggle.on_release(t0 + HOLD), None);
    }

    #[test]
    fn test_release_without_press() {
        let mut toggle = HoldToggle::new(HOLD);
        assert_eq!(toggle.on_release(Instant::now()), None);
    }
}
