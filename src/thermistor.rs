//! TS1..TS3 conversions and the TEMP_SEL settling state.

use crate::data_types::TempSource;
use crate::units::{ElectricPotential, ElectricalResistance, ThermodynamicTemperature};
use uom::si::{
    electric_potential::{microvolt, volt},
    electrical_resistance::{kiloohm, ohm},
    thermodynamic_temperature::degree_celsius,
};

/// TS ADC resolution, in µV/LSB.
pub const TS_LSB_UV: f32 = 382.0;
/// Divider pull-up to the regulator rail.
pub const PULLUP_OHMS: f32 = 10_000.0;
pub const RAIL_VOLTS: f32 = 3.3;

/// Die sensor output at 25 °C and its slope.
const DIE_V25: f32 = 1.2;
const DIE_VOLTS_PER_DEGREE: f32 = 0.0042;

/// Time the ADC needs after TEMP_SEL changes before TSx readings are valid.
pub const SETTLE_TIME_MS: u32 = 2000;

/// 103AT NTC resistance (kΩ) against temperature, coldest first.
const NTC_TABLE: [(f32, i8); 17] = [
    (329.5, -50),
    (247.7, -45),
    (188.5, -40),
    (144.1, -35),
    (111.3, -30),
    (86.43, -25),
    (67.77, -20),
    (53.41, -15),
    (42.47, -10),
    (33.90, -5),
    (27.28, 0),
    (22.05, 5),
    (17.96, 10),
    (14.69, 15),
    (12.09, 20),
    (10.00, 25),
    (8.313, 30),
];

/// Voltage at a TS pin for a raw 14-bit reading.
pub fn ts_voltage(raw: u16) -> ElectricPotential {
    ElectricPotential::new::<microvolt>(raw as f32 * TS_LSB_UV)
}

/// Thermistor resistance from the divider voltage. `None` at or above the rail.
pub fn thermistor_resistance(v: ElectricPotential) -> Option<ElectricalResistance> {
    let v = v.get::<volt>();
    if v >= RAIL_VOLTS || v < 0.0 {
        return None;
    }
    Some(ElectricalResistance::new::<ohm>(
        PULLUP_OHMS * v / (RAIL_VOLTS - v),
    ))
}

/// Temperature bucket for a thermistor resistance: the first table entry whose
/// resistance the input exceeds. `None` at or below the 30 °C entry.
///
/// The table is scanned coldest first and stops at the first match. Checking
/// every row in turn and keeping the last match would report 30 °C for any
/// resistance above 8.313 kΩ, which breaks the ordering of the table.
pub fn thermistor_lookup(r: ElectricalResistance) -> Option<i8> {
    let kohm = r.get::<kiloohm>();
    NTC_TABLE
        .iter()
        .find(|(threshold, _)| kohm > *threshold)
        .map(|&(_, celsius)| celsius)
}

/// Die temperature from the TS1 voltage when TEMP_SEL = 0.
pub fn die_temperature(v: ElectricPotential) -> ThermodynamicTemperature {
    let celsius = 25.0 - (v.get::<volt>() - DIE_V25) / DIE_VOLTS_PER_DEGREE;
    ThermodynamicTemperature::new::<degree_celsius>(celsius)
}

/// External thermistor temperature from a raw TSx reading when TEMP_SEL = 1.
pub fn external_temperature(raw: u16) -> Result<ThermodynamicTemperature, &'static str> {
    let r = thermistor_resistance(ts_voltage(raw)).ok_or("thermistor voltage at or above rail")?;
    let celsius = thermistor_lookup(r).ok_or("thermistor resistance outside lookup table")?;
    Ok(ThermodynamicTemperature::new::<degree_celsius>(celsius as f32))
}

/// Tracks the TEMP_SEL category and when readings on it become valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TempSourceState {
    selected: Option<TempSource>,
    valid_after_ms: Option<u64>,
}

impl TempSourceState {
    pub const fn new() -> Self {
        Self {
            selected: None,
            valid_after_ms: None,
        }
    }

    /// Category last seen on or written to the device, if known.
    pub fn selected(&self) -> Option<TempSource> {
        self.selected
    }

    /// Records a category read back from the device; no settling needed.
    pub fn adopt(&mut self, source: TempSource) {
        self.selected = Some(source);
        self.valid_after_ms = None;
    }

    /// Records a category change written at `now_ms`.
    pub fn switched(&mut self, source: TempSource, now_ms: u64) {
        self.selected = Some(source);
        self.valid_after_ms = Some(now_ms.saturating_add(SETTLE_TIME_MS as u64));
    }

    pub fn is_settling(&self) -> bool {
        self.valid_after_ms.is_some()
    }

    /// Milliseconds left before readings are valid, 0 once settled.
    pub fn remaining_ms(&self, now_ms: u64) -> u32 {
        self.valid_after_ms
            .map(|deadline| deadline.saturating_sub(now_ms).min(SETTLE_TIME_MS as u64) as u32)
            .unwrap_or(0)
    }

    pub fn mark_settled(&mut self) {
        self.valid_after_ms = None;
    }

    /// Forget the category, e.g. after the device lost power.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
