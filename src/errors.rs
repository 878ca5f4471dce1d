#[cfg(feature = "defmt")]
use defmt::Format;

use crate::data_types::TripKind;
use crate::registers::Register;

/// Errors returned by the BQ769x0 driver.
#[derive(Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum Error<E> {
    /// An error occurred during I2C communication.
    I2c(E),
    /// Invalid data received from the chip.
    InvalidData,
    /// CRC validation failed.
    Crc,
    /// A written register did not read back with the value that was written.
    ConfigVerificationFailed {
        register: Register,
        expected: u8,
        actual: u8,
    },
    /// The thermistor reading falls outside the lookup table or the divider range.
    TemperatureConversion(&'static str),
    /// ADCGAIN2 never read back non-zero while probing at startup.
    DeviceNotReady,
    /// A conversion needs the ADC calibration, but `init` has not completed.
    NotInitialized,
    /// The device was put into ship mode and no longer answers on the bus.
    ShipMode,
    /// Cell numbers run from 1 to 15.
    InvalidCell(u8),
    /// The requested threshold cannot be expressed with the fixed prefix bits of
    /// the trip register under the current calibration.
    TripThresholdOutOfRange { kind: TripKind, requested_mv: f32 },
    /// The temperature source was switched recently and the ADC has not settled yet.
    Settling { remaining_ms: u32 },
}

