#![allow(dead_code)]
#![cfg(not(feature = "async"))]

use bq769x0_afe_rs::{
    registers::Register, AlertAttachError, AlertFlag, AlertLine, Bq769x0, Disabled, Enabled,
    InitConfig, InitReport,
};
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, Operation};
use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTransaction};
use std::cell::RefCell;
use std::rc::Rc;

pub const BQ76920_ADDR: u8 = 0x08;

/// ADCGAIN1, ADCGAIN2, ADCOFFSET giving 370 uV/LSB and +56 mV.
pub const TYPICAL_CAL: (u8, u8, u8) = (0x00, 0xA0, 0x38);
/// ADCGAIN1, ADCGAIN2, ADCOFFSET giving 396 uV/LSB and +127 mV.
pub const TRIMMED_CAL: (u8, u8, u8) = (0x0C, 0xE0, 0x7F);

/// Scripted I2C mock shared between the driver and the test.
#[derive(Clone)]
pub struct MockI2c {
    mock: Rc<RefCell<I2cMock>>,
}

impl MockI2c {
    pub fn new(transactions: &[I2cTransaction]) -> Self {
        Self {
            mock: Rc::new(RefCell::new(I2cMock::new(transactions))),
        }
    }

    /// Verifies that every expected transaction occurred.
    pub fn done(self) {
        self.mock.borrow_mut().done();
    }
}

impl ErrorType for MockI2c {
    type Error = ErrorKind;
}

impl I2c for MockI2c {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), Self::Error> {
        self.mock.borrow_mut().write(address, bytes)
    }

    fn read(&mut self, address: u8, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.mock.borrow_mut().read(address, bytes)
    }

    fn write_read(
        &mut self,
        address: u8,
        bytes: &[u8],
        buffer: &mut [u8],
    ) -> Result<(), Self::Error> {
        self.mock.borrow_mut().write_read(address, bytes, buffer)
    }

    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.mock.borrow_mut().transaction(address, operations)
    }
}

pub fn create_driver_disabled_crc<const N: usize>(
    transactions: &[I2cTransaction],
) -> (Bq769x0<MockI2c, Disabled, N>, MockI2c) {
    let i2c = MockI2c::new(transactions);
    let driver = Bq769x0::new_without_crc(i2c.clone(), BQ76920_ADDR);
    (driver, i2c)
}

pub fn create_driver_enabled_crc<const N: usize>(
    transactions: &[I2cTransaction],
) -> (Bq769x0<MockI2c, Enabled, N>, MockI2c) {
    let i2c = MockI2c::new(transactions);
    let driver = Bq769x0::new(i2c.clone(), BQ76920_ADDR);
    (driver, i2c)
}

pub fn read(reg: Register, value: u8) -> I2cTransaction {
    I2cTransaction::write_read(BQ76920_ADDR, vec![reg.addr()], vec![value])
}

pub fn read_pair(reg: Register, raw: u16) -> I2cTransaction {
    I2cTransaction::write_read(BQ76920_ADDR, vec![reg.addr()], raw.to_be_bytes().to_vec())
}

pub fn write(reg: Register, value: u8) -> I2cTransaction {
    I2cTransaction::write(BQ76920_ADDR, vec![reg.addr(), value])
}

/// `init` traffic up to and including a clean SYS_STAT check.
pub fn init_prologue(cal: (u8, u8, u8), sys_ctrl1: u8) -> Vec<I2cTransaction> {
    let (gain1, gain2, offset) = cal;
    vec![
        read(Register::AdcGain2, gain2),
        write(Register::CcCfg, 0x19),
        read(Register::SysCtrl1, sys_ctrl1),
        write(Register::SysCtrl1, sys_ctrl1 | 0x10),
        read(Register::SysCtrl2, 0x00),
        write(Register::SysCtrl2, 0x40),
        read(Register::AdcGain1, gain1),
        read(Register::AdcGain2, gain2),
        read(Register::AdcOffset, offset),
        read(Register::SysStat, 0x00),
    ]
}

/// Full `init` traffic with the typical calibration: UV 3.32 V is out of
/// reach and OV already holds 0xC7 (4.27 V), so no trip is written.
pub fn typical_init() -> Vec<I2cTransaction> {
    let mut transactions = init_prologue(TYPICAL_CAL, 0x00);
    transactions.push(read(Register::UvTrip, 0x00));
    transactions.push(read(Register::OvTrip, 0xC7));
    transactions
}

pub fn run_init<I2C, M, const N: usize>(driver: &mut Bq769x0<I2C, M, N>) -> InitReport
where
    I2C: I2c<Error = ErrorKind>,
    M: bq769x0_afe_rs::CrcMode,
    Bq769x0<I2C, M, N>: bq769x0_afe_rs::RegisterAccess<ErrorKind>,
{
    driver
        .init(
            &InitConfig::default(),
            &mut CountingDelay::default(),
            &mut FakeAlertLine::default(),
        )
        .expect("init")
}

/// Records every delay instead of sleeping.
#[derive(Debug, Default)]
pub struct CountingDelay {
    pub ms_calls: Vec<u32>,
    pub total_ns: u64,
}

impl CountingDelay {
    pub fn total_ms(&self) -> u64 {
        self.total_ns / 1_000_000
    }
}

impl DelayNs for CountingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += ns as u64;
    }

    fn delay_ms(&mut self, ms: u32) {
        self.ms_calls.push(ms);
        self.total_ns += ms as u64 * 1_000_000;
    }
}

/// ALERT hookup that remembers the flag it was given.
#[derive(Debug, Default)]
pub struct FakeAlertLine {
    pub attached: Option<&'static AlertFlag>,
    pub refuse: bool,
}

impl FakeAlertLine {
    /// Stands in for the rising-edge interrupt.
    pub fn fire(&self) {
        if let Some(flag) = self.attached {
            flag.signal();
        }
    }
}

impl AlertLine for FakeAlertLine {
    fn attach(&mut self, flag: &'static AlertFlag) -> Result<(), AlertAttachError> {
        if self.refuse {
            return Err(AlertAttachError);
        }
        self.attached = Some(flag);
        Ok(())
    }
}

/// Register-file model of the device for tests that loop over many values.
///
/// Reads and writes auto-increment like the real part; writing SYS_STAT clears
/// the bits that are written as 1.
#[derive(Clone)]
pub struct FakeBq769x0 {
    regs: Rc<RefCell<[u8; 0x60]>>,
}

impl FakeBq769x0 {
    pub fn new() -> Self {
        Self {
            regs: Rc::new(RefCell::new([0; 0x60])),
        }
    }

    /// A booted part with the given calibration.
    pub fn with_calibration(cal: (u8, u8, u8)) -> Self {
        let fake = Self::new();
        fake.set(Register::AdcGain1, cal.0);
        fake.set(Register::AdcGain2, cal.1);
        fake.set(Register::AdcOffset, cal.2);
        fake
    }

    pub fn get(&self, reg: Register) -> u8 {
        self.regs.borrow()[reg.addr() as usize]
    }

    pub fn set(&self, reg: Register, value: u8) {
        self.regs.borrow_mut()[reg.addr() as usize] = value;
    }

    pub fn set_pair(&self, reg: Register, raw: u16) {
        let [hi, lo] = raw.to_be_bytes();
        let mut regs = self.regs.borrow_mut();
        regs[reg.addr() as usize] = hi;
        regs[reg.addr() as usize + 1] = lo;
    }
}

impl ErrorType for FakeBq769x0 {
    type Error = ErrorKind;
}

impl I2c for FakeBq769x0 {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if address != BQ76920_ADDR {
            return Err(ErrorKind::Other);
        }
        let mut regs = self.regs.borrow_mut();
        let mut pointer = 0usize;
        for operation in operations {
            match operation {
                Operation::Write(bytes) => {
                    let Some((&reg, data)) = bytes.split_first() else {
                        continue;
                    };
                    pointer = reg as usize;
                    for &byte in data {
                        let slot = regs.get_mut(pointer).ok_or(ErrorKind::Other)?;
                        if pointer == Register::SysStat.addr() as usize {
                            *slot &= !byte;
                        } else {
                            *slot = byte;
                        }
                        pointer += 1;
                    }
                }
                Operation::Read(buffer) => {
                    for byte in buffer.iter_mut() {
                        *byte = *regs.get(pointer).ok_or(ErrorKind::Other)?;
                        pointer += 1;
                    }
                }
            }
        }
        Ok(())
    }
}
