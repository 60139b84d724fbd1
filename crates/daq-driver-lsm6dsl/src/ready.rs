//! Data-ready line.
//!
//! The sensor raises its INT2 pin while the FIFO holds unread data. The
//! acquisition loop either busy-polls [`ReadyGate::is_ready`] or, where edge
//! interrupts exist, parks in [`ReadyGate::wait_ready`].

use std::time::{Duration, Instant};

use crate::error::Result;

/// Capability: a readable "data ready" condition.
pub trait ReadyGate: Send {
    /// Single non-blocking read of the line. Logical high means ready.
    fn is_ready(&mut self) -> Result<bool>;

    /// Block until the line is high or `timeout` elapses.
    ///
    /// Returns `Ok(false)` on timeout. The default implementation spins on
    /// [`ReadyGate::is_ready`].
    fn wait_ready(&mut self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_ready()? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::hint::spin_loop();
        }
    }

    /// Release the underlying line. Idempotent.
    fn release(&mut self) {}
}

impl<G: ReadyGate + ?Sized> ReadyGate for Box<G> {
    fn is_ready(&mut self) -> Result<bool> {
        (**self).is_ready()
    }

    fn wait_ready(&mut self, timeout: Duration) -> Result<bool> {
        (**self).wait_ready(timeout)
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// Ready line on a Raspberry Pi GPIO pin.
#[cfg(feature = "hardware")]
pub struct GpioReadyLine {
    pin_number: u8,
    pin: Option<rppal::gpio::InputPin>,
    interrupt_armed: bool,
}

#[cfg(feature = "hardware")]
impl GpioReadyLine {
    /// Claim BCM pin `pin_number` as a pulled-down input.
    pub fn open(pin_number: u8) -> Result<Self> {
        Ok(Self {
            pin_number,
            pin: Some(Self::claim(pin_number)?),
            interrupt_armed: false,
        })
    }

    fn claim(pin_number: u8) -> Result<rppal::gpio::InputPin> {
        use rppal::gpio::Gpio;

        let to_err = |e: rppal::gpio::Error| crate::error::DriverError::ReadyLine {
            pin: pin_number,
            message: e.to_string(),
        };

        Ok(Gpio::new()
            .map_err(to_err)?
            .get(pin_number)
            .map_err(to_err)?
            .into_input_pulldown())
    }

    /// The claimed pin, re-claiming it after a `release`.
    fn pin(&mut self) -> Result<&mut rppal::gpio::InputPin> {
        if self.pin.is_none() {
            self.pin = Some(Self::claim(self.pin_number)?);
            self.interrupt_armed = false;
        }
        let pin_number = self.pin_number;
        self.pin
            .as_mut()
            .ok_or_else(|| crate::error::DriverError::ReadyLine {
                pin: pin_number,
                message: "line released".to_string(),
            })
    }
}

#[cfg(feature = "hardware")]
impl ReadyGate for GpioReadyLine {
    fn is_ready(&mut self) -> Result<bool> {
        Ok(self.pin()?.is_high())
    }

    fn wait_ready(&mut self, timeout: Duration) -> Result<bool> {
        use rppal::gpio::Trigger;

        let pin_number = self.pin_number;
        let to_err = |e: rppal::gpio::Error| crate::error::DriverError::ReadyLine {
            pin: pin_number,
            message: e.to_string(),
        };

        if !self.interrupt_armed {
            self.pin()?
                .set_interrupt(Trigger::RisingEdge, None)
                .map_err(to_err)?;
            self.interrupt_armed = true;
        }

        // A line that is already high will not produce another edge.
        if self.pin()?.is_high() {
            return Ok(true);
        }
        let event = self
            .pin()?
            .poll_interrupt(true, Some(timeout))
            .map_err(to_err)?;
        Ok(event.is_some())
    }

    fn release(&mut self) {
        if let Some(mut pin) = self.pin.take() {
            if self.interrupt_armed {
                let _ = pin.clear_interrupt();
            }
            tracing::debug!(pin = self.pin_number, "Released ready line");
        }
    }
}
