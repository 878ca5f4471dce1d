//! ALERT pin plumbing.
//!
//! The device raises ALERT whenever a SYS_STAT bit sets. The interrupt handler
//! must not touch the bus, so it only latches an [`AlertFlag`]; the control loop
//! later calls [`crate::Bq769x0::poll_alert`] to read SYS_STAT.

use core::sync::atomic::{AtomicBool, Ordering};

/// Latched "ALERT fired" flag shared between an interrupt handler and the driver.
///
/// Usually placed in a `static` so it can be handed to both sides.
#[derive(Debug, Default)]
pub struct AlertFlag(AtomicBool);

impl AlertFlag {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Called from the ALERT rising-edge interrupt.
    pub fn signal(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_pending(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Returns whether the flag was set and clears it.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AlertAttachError;

/// Board-specific hookup of the ALERT pin to an [`AlertFlag`].
pub trait AlertLine {
    /// Arms a rising-edge interrupt that calls `flag.signal()`.
    fn attach(&mut self, flag: &'static AlertFlag) -> Result<(), AlertAttachError>;
}

/// For boards that leave ALERT unconnected. Attaching always fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAlertLine;

impl AlertLine for NoAlertLine {
    fn attach(&mut self, _flag: &'static AlertFlag) -> Result<(), AlertAttachError> {
        Err(AlertAttachError)
    }
}
