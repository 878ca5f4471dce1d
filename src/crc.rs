/// Selects whether register traffic carries the BQ769x0 CRC-8 byte.
pub trait CrcMode {}

/// Plain register traffic, for parts without the CRC option.
pub struct Disabled;
impl CrcMode for Disabled {}

/// Every data byte is followed by a CRC-8 byte.
pub struct Enabled;
impl CrcMode for Enabled {}

const POLYNOMIAL: u8 = 0x07;

/// CRC-8, polynomial x^8 + x^2 + x + 1, initial value 0, no reflection.
pub fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |crc, &byte| {
        (0..8).fold(crc ^ byte, |crc, _| {
            if crc & 0x80 != 0 {
                (crc << 1) ^ POLYNOMIAL
            } else {
                crc << 1
            }
        })
    })
}

/// CRC the device appends after a data byte it returns.
///
/// The first byte of a read is covered together with the slave read address;
/// every following byte is covered alone.
pub fn read_crc(address: u8, data: u8, first: bool) -> u8 {
    if first {
        crc8(&[(address << 1) | 1, data])
    } else {
        crc8(&[data])
    }
}

/// CRC the host appends to a single register write.
pub fn write_crc(address: u8, register: u8, data: u8) -> u8 {
    crc8(&[address << 1, register, data])
}
