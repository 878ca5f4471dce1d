#![cfg(feature = "async")]

use approx::assert_relative_eq;
use bq769x0_afe_rs::{
    registers::Register, Bq769x0, Disabled, Error, InitConfig, NoAlertLine, ThermistorChannel,
    TripOutcome,
};
use embedded_hal_async::delay::DelayNs;
use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTransaction};
use uom::si::{electric_potential::millivolt, thermodynamic_temperature::degree_celsius};

const ADDR: u8 = 0x08;

#[derive(Default)]
struct RecordingDelay {
    ms_calls: Vec<u32>,
}

impl DelayNs for RecordingDelay {
    async fn delay_ns(&mut self, _ns: u32) {}

    async fn delay_ms(&mut self, ms: u32) {
        self.ms_calls.push(ms);
    }
}

fn read(reg: Register, value: u8) -> I2cTransaction {
    I2cTransaction::write_read(ADDR, vec![reg.addr()], vec![value])
}

fn read_pair(reg: Register, raw: u16) -> I2cTransaction {
    I2cTransaction::write_read(ADDR, vec![reg.addr()], raw.to_be_bytes().to_vec())
}

fn write(reg: Register, value: u8) -> I2cTransaction {
    I2cTransaction::write(ADDR, vec![reg.addr(), value])
}

#[tokio::test]
async fn test_async_init_measure_and_switch_temperature() {
    let expectations = [
        read(Register::AdcGain2, 0xA0),
        write(Register::CcCfg, 0x19),
        read(Register::SysCtrl1, 0x00),
        write(Register::SysCtrl1, 0x10),
        read(Register::SysCtrl2, 0x00),
        write(Register::SysCtrl2, 0x40),
        read(Register::AdcGain1, 0x00),
        read(Register::AdcGain2, 0xA0),
        read(Register::AdcOffset, 0x38),
        read(Register::SysStat, 0x00),
        read(Register::UvTrip, 0x00),
        read(Register::OvTrip, 0xC7),
        read_pair(Register::Vc1Hi, 6144),
        read(Register::SysCtrl1, 0x10),
        write(Register::SysCtrl1, 0x18),
        read_pair(Register::Ts1Hi, 4320),
    ];
    let mut i2c = I2cMock::new(&expectations);
    let mut driver: Bq769x0<_, Disabled, 5> = Bq769x0::new_without_crc(i2c.clone(), ADDR);
    let mut delay = RecordingDelay::default();

    let report = driver
        .init(&InitConfig::default(), &mut delay, &mut NoAlertLine)
        .await
        .unwrap();
    assert!(!report.alert_attached);
    assert_eq!(report.undervoltage, TripOutcome::Unreachable);
    assert_eq!(report.overvoltage, TripOutcome::AlreadySet(0xC7));

    let v = driver.read_cell_voltage(1).await.unwrap();
    assert_relative_eq!(v.get::<millivolt>(), 2329.28, epsilon = 0.01);
    assert_eq!(driver.read_cell_voltage(0).await, Err(Error::InvalidCell(0)));

    let t = driver
        .read_temperature(ThermistorChannel::External1, &mut delay)
        .await
        .unwrap();
    assert_relative_eq!(t.get::<degree_celsius>(), 25.0, epsilon = 1e-3);
    assert_eq!(delay.ms_calls, vec![2000]);

    i2c.done();
}
