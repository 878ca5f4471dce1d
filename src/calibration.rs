//! Factory ADC calibration and every conversion that depends on it.
//!
//! The BQ769x0 reports cell voltages as raw 14-bit ADC counts. Each part carries
//! its own gain and offset trim, which must be applied to turn counts into
//! millivolts and, in reverse, to program the OV/UV comparators.

use crate::data_types::TripKind;
use crate::registers::ADCGAIN1_TRIM_MASK;
use crate::units::ElectricPotential;
use uom::si::electric_potential::{microvolt, millivolt};

/// Gain with a zero trim, in µV/LSB.
pub const BASE_GAIN_UV: u16 = 365;

/// Coulomb counter resolution, in µV/LSB.
pub const CC_LSB_UV: f32 = 8.44;

/// Added before truncating so that a value decoded from a register byte
/// encodes back to the same byte despite float rounding.
const TRUNCATION_GUARD_LSB: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Calibration {
    gain_uv: u16,
    offset_mv: i8,
}

impl Calibration {
    pub const fn new(gain_uv: u16, offset_mv: i8) -> Self {
        Self { gain_uv, offset_mv }
    }

    /// Builds the calibration from ADCGAIN1, ADCGAIN2 and ADCOFFSET.
    ///
    /// ADCGAIN<4:3> sit in ADCGAIN1 bits 3-2, ADCGAIN<2:0> in ADCGAIN2 bits 7-5.
    pub fn from_registers(adc_gain1: u8, adc_gain2: u8, adc_offset: u8) -> Self {
        let trim = ((adc_gain1 & ADCGAIN1_TRIM_MASK) << 1) | (adc_gain2 >> 5);
        Self {
            gain_uv: BASE_GAIN_UV + trim as u16,
            offset_mv: adc_offset as i8,
        }
    }

    pub fn gain_uv(&self) -> u16 {
        self.gain_uv
    }

    pub fn offset_mv(&self) -> i8 {
        self.offset_mv
    }

    /// Voltage of one ADC count.
    pub fn gain(&self) -> ElectricPotential {
        ElectricPotential::new::<microvolt>(self.gain_uv as f32)
    }

    pub fn offset(&self) -> ElectricPotential {
        ElectricPotential::new::<millivolt>(self.offset_mv as f32)
    }

    fn counts_to_mv(&self, counts: f64) -> f64 {
        counts * self.gain_uv as f64 / 1000.0 + self.offset_mv as f64
    }

    /// Converts a raw 14-bit cell reading.
    ///
    /// A zero reading means the tap is unpopulated or not yet converted and
    /// maps to exactly 0 V rather than to the offset.
    pub fn cell_voltage(&self, raw: u16) -> ElectricPotential {
        if raw == 0 {
            return ElectricPotential::new::<millivolt>(0.0);
        }
        ElectricPotential::new::<millivolt>(self.counts_to_mv(raw as f64) as f32)
    }

    /// Converts the BAT register. The pack ADC runs at four times the cell gain
    /// and the offset applies once per series cell.
    pub fn pack_voltage(&self, raw: u16, cells: usize) -> ElectricPotential {
        let mv = 4.0 * self.gain_uv as f64 / 1000.0 * raw as f64
            + cells as f64 * self.offset_mv as f64;
        ElectricPotential::new::<millivolt>(mv as f32)
    }

    /// Smallest threshold change a trip register can express (16 counts).
    pub fn trip_step(&self) -> ElectricPotential {
        ElectricPotential::new::<microvolt>(16.0 * self.gain_uv as f32)
    }

    /// Threshold programmed by a trip register byte.
    pub fn decode_trip(&self, kind: TripKind, byte: u8) -> ElectricPotential {
        let raw = ((byte as u16) << 4) | kind.fixed_bits();
        ElectricPotential::new::<millivolt>(self.counts_to_mv(raw as f64) as f32)
    }

    /// Register byte for a trip threshold, truncating toward the next lower step.
    ///
    /// Returns `None` when the threshold lies outside the window the fixed
    /// prefix bits of this trip kind allow under the current calibration.
    pub fn encode_trip(&self, kind: TripKind, target: ElectricPotential) -> Option<u8> {
        let target_mv = target.get::<millivolt>() as f64;
        let counts = (target_mv - self.offset_mv as f64) * 1000.0 / self.gain_uv as f64;
        if counts.is_nan() || counts < 0.0 {
            return None;
        }
        let raw = (counts + TRUNCATION_GUARD_LSB) as u32;
        if raw >> 12 != kind.prefix() as u32 {
            return None;
        }
        Some(((raw >> 4) & 0xFF) as u8)
    }

    /// Whether a trip byte already programs `target` to within one step.
    pub fn trip_matches(&self, kind: TripKind, byte: u8, target: ElectricPotential) -> bool {
        let programmed = self.decode_trip(kind, byte).get::<millivolt>();
        let target = target.get::<millivolt>();
        let step = self.trip_step().get::<millivolt>();
        programmed <= target + step && programmed >= target - step
    }
}

/// Sense resistor voltage of a signed coulomb counter reading.
pub fn coulomb_counter_voltage(raw: i16) -> ElectricPotential {
    ElectricPotential::new::<microvolt>(raw as f32 * CC_LSB_UV)
}
