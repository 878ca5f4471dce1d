use core::fmt;

use crate::calibration::Calibration;
use crate::registers::{
    Register, SysCtrl1Flags, SysStatFlags, CC_CFG_RECOMMENDED, CELL_VOLTAGE_REGISTERS,
    OV_TRIP_FIXED_BITS, UV_TRIP_FIXED_BITS,
};
use crate::units::ElectricPotential;
use uom::si::electric_potential::{millivolt, volt};

/// A series cell position, 1 (bottom of the stack) to 15.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CellIndex(u8);

impl CellIndex {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 15;

    pub const fn new(cell: u8) -> Option<Self> {
        if cell >= Self::MIN && cell <= Self::MAX {
            Some(Self(cell))
        } else {
            None
        }
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    /// VCx_HI register of this cell.
    pub fn voltage_register(self) -> Register {
        CELL_VOLTAGE_REGISTERS[(self.0 - 1) as usize]
    }
}

/// Temperature category selected by SYS_CTRL1[TEMP_SEL].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TempSource {
    /// TEMP_SEL = 0: TS1 carries the die temperature.
    InternalDie,
    /// TEMP_SEL = 1: TS1..TS3 carry external thermistor voltages.
    ExternalThermistor,
}

impl TempSource {
    pub fn from_sys_ctrl1(sys_ctrl1: u8) -> Self {
        if SysCtrl1Flags::from_bits_retain(sys_ctrl1).contains(SysCtrl1Flags::TEMP_SEL) {
            TempSource::ExternalThermistor
        } else {
            TempSource::InternalDie
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ThermistorChannel {
    Internal,
    External1,
    External2,
    External3,
}

impl ThermistorChannel {
    pub fn source(self) -> TempSource {
        match self {
            ThermistorChannel::Internal => TempSource::InternalDie,
            _ => TempSource::ExternalThermistor,
        }
    }

    pub fn register(self) -> Register {
        match self {
            ThermistorChannel::Internal | ThermistorChannel::External1 => Register::Ts1Hi,
            ThermistorChannel::External2 => Register::Ts2Hi,
            ThermistorChannel::External3 => Register::Ts3Hi,
        }
    }
}

/// Which of the two hardware voltage trips a threshold belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TripKind {
    Overvoltage,
    Undervoltage,
}

impl TripKind {
    pub fn register(self) -> Register {
        match self {
            TripKind::Overvoltage => Register::OvTrip,
            TripKind::Undervoltage => Register::UvTrip,
        }
    }

    /// Bits the device forces into the 14-bit comparison value.
    pub fn fixed_bits(self) -> u16 {
        match self {
            TripKind::Overvoltage => OV_TRIP_FIXED_BITS,
            TripKind::Undervoltage => UV_TRIP_FIXED_BITS,
        }
    }

    /// Top two bits (13:12) every representable threshold must carry.
    pub fn prefix(self) -> u16 {
        self.fixed_bits() >> 12
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceMode {
    Uninitialized,
    Normal,
    /// Terminal. The device is powered down and only wakes on a TS1 boot signal.
    Ship,
}

/// Decoded SYS_STAT register.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SystemStatus {
    pub cc_ready: bool,
    pub device_xready: bool,
    pub ovrd_alert: bool,
    pub uv: bool,
    pub ov: bool,
    pub scd: bool,
    pub ocd: bool,
}

impl SystemStatus {
    pub fn new(status_byte: u8) -> Self {
        let flags = SysStatFlags::from_bits_truncate(status_byte);
        Self {
            cc_ready: flags.contains(SysStatFlags::CC_READY),
            device_xready: flags.contains(SysStatFlags::DEVICE_XREADY),
            ovrd_alert: flags.contains(SysStatFlags::OVRD_ALERT),
            uv: flags.contains(SysStatFlags::UV),
            ov: flags.contains(SysStatFlags::OV),
            scd: flags.contains(SysStatFlags::SCD),
            ocd: flags.contains(SysStatFlags::OCD),
        }
    }

    /// Flags in the form `clear_status_flags` expects.
    pub fn flags(&self) -> SysStatFlags {
        let mut flags = SysStatFlags::empty();
        flags.set(SysStatFlags::CC_READY, self.cc_ready);
        flags.set(SysStatFlags::DEVICE_XREADY, self.device_xready);
        flags.set(SysStatFlags::OVRD_ALERT, self.ovrd_alert);
        flags.set(SysStatFlags::UV, self.uv);
        flags.set(SysStatFlags::OV, self.ov);
        flags.set(SysStatFlags::SCD, self.scd);
        flags.set(SysStatFlags::OCD, self.ocd);
        flags
    }

    /// Any protection or device fault, as opposed to the CC_READY notification.
    pub fn has_fault(&self) -> bool {
        self.device_xready || self.ovrd_alert || self.uv || self.ov || self.scd || self.ocd
    }
}

/// Calibrated voltages of the first `N` cells.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CellVoltages<const N: usize> {
    pub voltages: [ElectricPotential; N],
}

impl<const N: usize> Default for CellVoltages<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> CellVoltages<N> {
    pub fn new() -> Self {
        Self {
            voltages: [ElectricPotential::new::<millivolt>(0.0); N],
        }
    }

    /// Voltage of a 1-based cell number, if it is within `N`.
    pub fn get(&self, cell: u8) -> Option<ElectricPotential> {
        (cell as usize)
            .checked_sub(1)
            .and_then(|i| self.voltages.get(i))
            .copied()
    }

    pub fn min(&self) -> Option<ElectricPotential> {
        self.voltages.iter().copied().reduce(|a, b| if b < a { b } else { a })
    }

    pub fn max(&self) -> Option<ElectricPotential> {
        self.voltages.iter().copied().reduce(|a, b| if b > a { b } else { a })
    }
}

/// Five cells per line, e.g. `[1]3.70 [2]3.71 [3]3.69 [4]3.70 [5]3.72`.
impl<const N: usize> fmt::Display for CellVoltages<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.voltages.iter().enumerate() {
            if i > 0 {
                if i % 5 == 0 {
                    writeln!(f)?;
                } else {
                    write!(f, " ")?;
                }
            }
            write!(f, "[{}]{:.2}", i + 1, v.get::<volt>())?;
        }
        Ok(())
    }
}

/// Startup parameters for [`crate::Bq769x0::init`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InitConfig {
    pub undervoltage_target: ElectricPotential,
    pub overvoltage_target: ElectricPotential,
    pub cc_cfg: u8,
    /// How many times ADCGAIN2 is probed before giving up.
    pub readiness_attempts: u8,
    pub readiness_interval_ms: u32,
    /// Wait between clearing DEVICE_XREADY and checking it again.
    pub xready_retry_delay_ms: u32,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            undervoltage_target: ElectricPotential::new::<millivolt>(3320.0),
            overvoltage_target: ElectricPotential::new::<millivolt>(4270.0),
            cc_cfg: CC_CFG_RECOMMENDED,
            readiness_attempts: 10,
            readiness_interval_ms: 100,
            xready_retry_delay_ms: 500,
        }
    }
}

/// Result of the DEVICE_XREADY check during startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceReadyFault {
    /// The flag was not set.
    Clear,
    /// The flag was set and cleared on the first attempt.
    Cleared,
    /// The flag was still set after the retry delay.
    Unresolved,
}

/// What startup did to one trip register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TripOutcome {
    /// The register already decoded to within one step of the target.
    AlreadySet(u8),
    /// The encoded target was written and read back.
    Written(u8),
    /// The target cannot be represented under this calibration; nothing was written.
    Unreachable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InitReport {
    pub calibration: Calibration,
    /// ADC_EN was already set before startup touched SYS_CTRL1.
    pub adc_already_enabled: bool,
    pub alert_attached: bool,
    pub device_ready_fault: DeviceReadyFault,
    pub undervoltage: TripOutcome,
    pub overvoltage: TripOutcome,
}
