#![no_std]
//! Driver for the TI BQ769x0 battery monitor AFE.
//!
//! Covers the measurement side of the part: factory ADC calibration, cell and
//! pack voltages, OV/UV trip thresholds, the coulomb counter, die and
//! thermistor temperatures, passive cell balancing and the ship-mode shutdown.
//! The blocking API is the default; enable the `async` feature for the same API
//! on top of `embedded-hal-async`.

#[macro_use]
extern crate uom;

#[cfg(feature = "defmt")]
extern crate defmt;

use core::marker::PhantomData;
use core::ops::Deref;

#[cfg(not(feature = "async"))]
use embedded_hal::{delay::DelayNs, i2c::I2c};
#[cfg(feature = "async")]
use embedded_hal_async::{delay::DelayNs, i2c::I2c};

pub mod alert;
pub mod calibration;
pub mod crc;
pub mod data_types;
pub mod errors;
pub mod registers;
pub mod thermistor;
pub mod units;

pub use alert::{AlertAttachError, AlertFlag, AlertLine, NoAlertLine};
pub use calibration::Calibration;
pub use crc::{CrcMode, Disabled, Enabled};
pub use data_types::{
    CellIndex, CellVoltages, DeviceMode, DeviceReadyFault, InitConfig, InitReport, SystemStatus,
    TempSource, ThermistorChannel, TripKind, TripOutcome,
};
pub use errors::Error;

use registers::{
    balance_slot, Register, SysCtrl1Flags, SysCtrl2Flags, SysStatFlags, RAW14_MASK,
};
use thermistor::{TempSourceState, SETTLE_TIME_MS};
use units::{ElectricPotential, ThermodynamicTemperature};
use uom::si::electric_potential::millivolt;

/// BQ769x0 driver for a stack of `N` series cells.
pub struct Bq769x0<I2C, M: CrcMode, const N: usize> {
    address: u8,
    i2c: I2C,
    mode: DeviceMode,
    calibration: Option<Calibration>,
    temp_source: TempSourceState,
    alert: Option<&'static AlertFlag>,
    _crc_mode: PhantomData<M>,
}

#[maybe_async_cfg::maybe(
    sync(cfg(not(feature = "async")), self = "RegisterAccess",),
    async(feature = "async", keep_self)
)]
#[allow(async_fn_in_trait)]
/// Raw register access, with or without CRC framing.
pub trait RegisterAccess<E>
where
    Self: Sized,
{
    type ReadBuffer: Deref<Target = [u8]>;

    async fn read_register(&mut self, reg: Register) -> Result<u8, Error<E>>;

    /// Reads `len` consecutive registers in one bus transaction.
    async fn read_registers(
        &mut self,
        reg: Register,
        len: usize,
    ) -> Result<Self::ReadBuffer, Error<E>>;

    async fn write_register(&mut self, reg: Register, value: u8) -> Result<(), Error<E>>;
}

impl<I2C, const N: usize> Bq769x0<I2C, Disabled, N> {
    /// Creates a driver for parts without the CRC option (e.g. BQ7692000).
    pub fn new_without_crc(i2c: I2C, address: u8) -> Self {
        Self::from_parts(i2c, address)
    }
}

impl<I2C, const N: usize> Bq769x0<I2C, Enabled, N> {
    /// Creates a driver for parts that frame every byte with a CRC (e.g. BQ7692003).
    pub fn new(i2c: I2C, address: u8) -> Self {
        Self::from_parts(i2c, address)
    }
}

impl<I2C, M: CrcMode, const N: usize> Bq769x0<I2C, M, N> {
    fn from_parts(i2c: I2C, address: u8) -> Self {
        Self {
            address,
            i2c,
            mode: DeviceMode::Uninitialized,
            calibration: None,
            temp_source: TempSourceState::new(),
            alert: None,
            _crc_mode: PhantomData,
        }
    }

    /// Flag that the board's ALERT interrupt sets; attached during `init`.
    pub fn with_alert_flag(mut self, flag: &'static AlertFlag) -> Self {
        self.alert = Some(flag);
        self
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn mode(&self) -> DeviceMode {
        self.mode
    }

    /// Calibration read by the last successful `init`.
    pub fn calibration(&self) -> Option<Calibration> {
        self.calibration
    }

    /// Temperature category last seen on the device, if known.
    pub fn temperature_source(&self) -> Option<TempSource> {
        self.temp_source.selected()
    }

    /// Gives the bus back.
    pub fn release(self) -> I2C {
        self.i2c
    }
}

#[maybe_async_cfg::maybe(
    sync(cfg(not(feature = "async")), self = "Bq769x0",),
    async(feature = "async", keep_self)
)]
impl<I2C, E, const N: usize> RegisterAccess<E> for Bq769x0<I2C, Disabled, N>
where
    I2C: I2c<Error = E>,
{
    type ReadBuffer = heapless::Vec<u8, 30>;

    async fn read_register(&mut self, reg: Register) -> Result<u8, Error<E>> {
        let mut data = [0u8; 1];
        self.i2c
            .write_read(self.address, &[reg.addr()], &mut data)
            .await
            .map_err(Error::I2c)?;
        Ok(data[0])
    }

    async fn read_registers(
        &mut self,
        reg: Register,
        len: usize,
    ) -> Result<Self::ReadBuffer, Error<E>> {
        let mut data: heapless::Vec<u8, 30> = heapless::Vec::new();
        data.resize(len, 0).map_err(|_| Error::InvalidData)?;
        self.i2c
            .write_read(self.address, &[reg.addr()], &mut data)
            .await
            .map_err(Error::I2c)?;
        Ok(data)
    }

    async fn write_register(&mut self, reg: Register, value: u8) -> Result<(), Error<E>> {
        self.i2c
            .write(self.address, &[reg.addr(), value])
            .await
            .map_err(Error::I2c)
    }
}

#[maybe_async_cfg::maybe(
    sync(cfg(not(feature = "async")), self = "Bq769x0",),
    async(feature = "async", keep_self)
)]
impl<I2C, E, const N: usize> RegisterAccess<E> for Bq769x0<I2C, Enabled, N>
where
    I2C: I2c<Error = E>,
{
    type ReadBuffer = heapless::Vec<u8, 30>;

    async fn read_register(&mut self, reg: Register) -> Result<u8, Error<E>> {
        let mut data = [0u8; 2];
        self.i2c
            .write_read(self.address, &[reg.addr()], &mut data)
            .await
            .map_err(Error::I2c)?;

        let expected = crc::read_crc(self.address, data[0], true);
        if expected != data[1] {
            #[cfg(feature = "defmt")]
            defmt::error!(
                "CRC mismatch reading {}: received {:02x}, calculated {:02x}",
                reg,
                data[1],
                expected
            );
            return Err(Error::Crc);
        }
        Ok(data[0])
    }

    async fn read_registers(
        &mut self,
        reg: Register,
        len: usize,
    ) -> Result<Self::ReadBuffer, Error<E>> {
        if len == 0 || len > 30 {
            return Err(Error::InvalidData);
        }

        let mut framed: heapless::Vec<u8, 60> = heapless::Vec::new();
        framed.resize(len * 2, 0).map_err(|_| Error::InvalidData)?;
        self.i2c
            .write_read(self.address, &[reg.addr()], &mut framed)
            .await
            .map_err(Error::I2c)?;

        let mut data: heapless::Vec<u8, 30> = heapless::Vec::new();
        for (i, pair) in framed.chunks_exact(2).enumerate() {
            let expected = crc::read_crc(self.address, pair[0], i == 0);
            if expected != pair[1] {
                #[cfg(feature = "defmt")]
                defmt::error!(
                    "CRC mismatch in block read of {} at byte {}: received {:02x}, calculated {:02x}",
                    reg,
                    i,
                    pair[1],
                    expected
                );
                return Err(Error::Crc);
            }
            data.push(pair[0]).map_err(|_| Error::InvalidData)?;
        }
        Ok(data)
    }

    async fn write_register(&mut self, reg: Register, value: u8) -> Result<(), Error<E>> {
        let crc = crc::write_crc(self.address, reg.addr(), value);
        self.i2c
            .write(self.address, &[reg.addr(), value, crc])
            .await
            .map_err(Error::I2c)
    }
}

#[maybe_async_cfg::maybe(
    sync(cfg(not(feature = "async")), self = "Bq769x0",),
    async(feature = "async", keep_self)
)]
impl<I2C, M, E, const N: usize> Bq769x0<I2C, M, N>
where
    I2C: I2c<Error = E>,
    M: CrcMode,
    Self: RegisterAccess<E>,
{
    fn ensure_awake(&self) -> Result<(), Error<E>> {
        match self.mode {
            DeviceMode::Ship => Err(Error::ShipMode),
            _ => Ok(()),
        }
    }

    fn require_calibration(&self) -> Result<Calibration, Error<E>> {
        self.ensure_awake()?;
        self.calibration.ok_or(Error::NotInitialized)
    }

    /// Reads a high/low register pair in a single transaction.
    pub async fn read_pair(&mut self, reg: Register) -> Result<u16, Error<E>> {
        let data = self.read_registers(reg, 2).await?;
        Ok(u16::from_be_bytes([data[0], data[1]]))
    }

    /// Read-modify-write. Returns the value read before the update.
    async fn modify_register(&mut self, reg: Register, set: u8, clear: u8) -> Result<u8, Error<E>> {
        let current = self.read_register(reg).await?;
        self.write_register(reg, (current & !clear) | set).await?;
        Ok(current)
    }

    /// Reads the factory gain and offset trim.
    pub async fn read_calibration(&mut self) -> Result<Calibration, Error<E>> {
        self.ensure_awake()?;
        let gain1 = self.read_register(Register::AdcGain1).await?;
        let gain2 = self.read_register(Register::AdcGain2).await?;
        let offset = self.read_register(Register::AdcOffset).await?;
        Ok(Calibration::from_registers(gain1, gain2, offset))
    }

    /// Brings the device from power-up to a calibrated, measuring state.
    ///
    /// Waits for the device to answer, enables the ADC and coulomb counter,
    /// hooks up ALERT, loads the calibration, clears a pending DEVICE_XREADY
    /// and converges the UV/OV trips on the configured targets. Running it
    /// again against a configured device leaves the trip registers untouched.
    pub async fn init<D: DelayNs, A: AlertLine>(
        &mut self,
        config: &InitConfig,
        delay: &mut D,
        alert_line: &mut A,
    ) -> Result<InitReport, Error<E>> {
        self.ensure_awake()?;
        self.wait_until_ready(config, delay).await?;

        self.write_register(Register::CcCfg, config.cc_cfg).await?;

        let sys_ctrl1 = self
            .modify_register(Register::SysCtrl1, SysCtrl1Flags::ADC_EN.bits(), 0)
            .await?;
        let adc_already_enabled =
            SysCtrl1Flags::from_bits_retain(sys_ctrl1).contains(SysCtrl1Flags::ADC_EN);
        #[cfg(feature = "defmt")]
        if adc_already_enabled {
            defmt::info!("ADC already enabled");
        }
        let device_source = TempSource::from_sys_ctrl1(sys_ctrl1);
        if self.temp_source.selected() != Some(device_source) {
            self.temp_source.adopt(device_source);
        }

        self.modify_register(Register::SysCtrl2, SysCtrl2Flags::CC_EN.bits(), 0)
            .await?;

        let alert_attached = match self.alert {
            Some(flag) => alert_line.attach(flag).is_ok(),
            None => false,
        };
        #[cfg(feature = "defmt")]
        if !alert_attached {
            defmt::warn!("ALERT interrupt not attached");
        }

        let calibration = self.read_calibration().await?;
        #[cfg(feature = "defmt")]
        defmt::info!(
            "calibration: gain {} uV/LSB, offset {} mV",
            calibration.gain_uv(),
            calibration.offset_mv()
        );

        let device_ready_fault = self.recover_device_ready(config, delay).await?;

        let undervoltage = self
            .converge_trip(calibration, TripKind::Undervoltage, config.undervoltage_target)
            .await?;
        let overvoltage = self
            .converge_trip(calibration, TripKind::Overvoltage, config.overvoltage_target)
            .await?;

        self.calibration = Some(calibration);
        self.mode = DeviceMode::Normal;
        Ok(InitReport {
            calibration,
            adc_already_enabled,
            alert_attached,
            device_ready_fault,
            undervoltage,
            overvoltage,
        })
    }

    /// ADCGAIN2 reads as zero (or NAKs) until the device has finished booting.
    async fn wait_until_ready<D: DelayNs>(
        &mut self,
        config: &InitConfig,
        delay: &mut D,
    ) -> Result<(), Error<E>> {
        for attempt in 1..=config.readiness_attempts {
            if let Ok(value) = self.read_register(Register::AdcGain2).await {
                if value != 0 {
                    return Ok(());
                }
            }
            #[cfg(feature = "defmt")]
            defmt::debug!("device not ready (attempt {})", attempt);
            if attempt < config.readiness_attempts {
                delay.delay_ms(config.readiness_interval_ms).await;
            }
        }
        #[cfg(feature = "defmt")]
        defmt::error!("device did not become ready");
        Err(Error::DeviceNotReady)
    }

    async fn recover_device_ready<D: DelayNs>(
        &mut self,
        config: &InitConfig,
        delay: &mut D,
    ) -> Result<DeviceReadyFault, Error<E>> {
        let status = self.read_register(Register::SysStat).await?;
        if !SysStatFlags::from_bits_retain(status).contains(SysStatFlags::DEVICE_XREADY) {
            return Ok(DeviceReadyFault::Clear);
        }

        #[cfg(feature = "defmt")]
        defmt::warn!("DEVICE_XREADY set, clearing");
        self.write_register(Register::SysStat, SysStatFlags::DEVICE_XREADY.bits())
            .await?;
        delay.delay_ms(config.xready_retry_delay_ms).await;

        let status = self.read_register(Register::SysStat).await?;
        if SysStatFlags::from_bits_retain(status).contains(SysStatFlags::DEVICE_XREADY) {
            #[cfg(feature = "defmt")]
            defmt::error!("DEVICE_XREADY still set after retry");
            Ok(DeviceReadyFault::Unresolved)
        } else {
            Ok(DeviceReadyFault::Cleared)
        }
    }

    /// Programs a trip register only if it is not already within one step of
    /// `target`, then reads it back.
    async fn converge_trip(
        &mut self,
        calibration: Calibration,
        kind: TripKind,
        target: ElectricPotential,
    ) -> Result<TripOutcome, Error<E>> {
        let reg = kind.register();

        let current = self.read_register(reg).await?;
        if calibration.trip_matches(kind, current, target) {
            return Ok(TripOutcome::AlreadySet(current));
        }

        let Some(encoded) = calibration.encode_trip(kind, target) else {
            #[cfg(feature = "defmt")]
            defmt::warn!(
                "{} trip of {} mV not reachable with this calibration",
                kind,
                target.get::<millivolt>()
            );
            return Ok(TripOutcome::Unreachable);
        };

        self.write_register(reg, encoded).await?;
        let actual = self.read_register(reg).await?;
        if actual != encoded {
            return Err(Error::ConfigVerificationFailed {
                register: reg,
                expected: encoded,
                actual,
            });
        }
        Ok(TripOutcome::Written(encoded))
    }

    async fn read_trip(&mut self, kind: TripKind) -> Result<ElectricPotential, Error<E>> {
        let calibration = self.require_calibration()?;
        let byte = self.read_register(kind.register()).await?;
        Ok(calibration.decode_trip(kind, byte))
    }

    async fn write_trip(
        &mut self,
        kind: TripKind,
        target: ElectricPotential,
    ) -> Result<(), Error<E>> {
        let calibration = self.require_calibration()?;
        let byte = calibration
            .encode_trip(kind, target)
            .ok_or(Error::TripThresholdOutOfRange {
                kind,
                requested_mv: target.get::<millivolt>(),
            })?;
        self.write_register(kind.register(), byte).await
    }

    /// Overvoltage threshold currently programmed.
    pub async fn read_ov_trip(&mut self) -> Result<ElectricPotential, Error<E>> {
        self.read_trip(TripKind::Overvoltage).await
    }

    /// Undervoltage threshold currently programmed.
    pub async fn read_uv_trip(&mut self) -> Result<ElectricPotential, Error<E>> {
        self.read_trip(TripKind::Undervoltage).await
    }

    /// Programs the overvoltage threshold, rounded down to the register resolution.
    pub async fn write_ov_trip(&mut self, target: ElectricPotential) -> Result<(), Error<E>> {
        self.write_trip(TripKind::Overvoltage, target).await
    }

    /// Programs the undervoltage threshold, rounded down to the register resolution.
    pub async fn write_uv_trip(&mut self, target: ElectricPotential) -> Result<(), Error<E>> {
        self.write_trip(TripKind::Undervoltage, target).await
    }

    pub async fn read_cell_voltage(&mut self, cell: u8) -> Result<ElectricPotential, Error<E>> {
        let index = CellIndex::new(cell).ok_or(Error::InvalidCell(cell))?;
        let calibration = self.require_calibration()?;
        let raw = self.read_pair(index.voltage_register()).await? & RAW14_MASK;
        Ok(calibration.cell_voltage(raw))
    }

    /// Reads VC1..VCN in one block transfer.
    pub async fn read_cell_voltages(&mut self) -> Result<CellVoltages<N>, Error<E>> {
        let calibration = self.require_calibration()?;
        let data = self.read_registers(Register::Vc1Hi, N * 2).await?;

        let mut cells = CellVoltages::<N>::new();
        for (voltage, pair) in cells.voltages.iter_mut().zip(data.chunks_exact(2)) {
            let raw = u16::from_be_bytes([pair[0], pair[1]]) & RAW14_MASK;
            *voltage = calibration.cell_voltage(raw);
        }
        Ok(cells)
    }

    pub async fn read_pack_voltage(&mut self) -> Result<ElectricPotential, Error<E>> {
        let calibration = self.require_calibration()?;
        let raw = self.read_pair(Register::BatHi).await?;
        Ok(calibration.pack_voltage(raw, N))
    }

    /// Voltage across the sense resistor, averaged over the last CC period.
    pub async fn read_coulomb_counter(&mut self) -> Result<ElectricPotential, Error<E>> {
        self.ensure_awake()?;
        let raw = self.read_pair(Register::CcHi).await? as i16;
        Ok(calibration::coulomb_counter_voltage(raw))
    }

    /// Makes TEMP_SEL match `source`. Returns whether it had to be changed.
    async fn apply_temp_source(&mut self, source: TempSource, now_ms: u64) -> Result<bool, Error<E>> {
        let (selected, sys_ctrl1) = match self.temp_source.selected() {
            Some(selected) => (selected, None),
            None => {
                let sys_ctrl1 = self.read_register(Register::SysCtrl1).await?;
                let selected = TempSource::from_sys_ctrl1(sys_ctrl1);
                self.temp_source.adopt(selected);
                (selected, Some(sys_ctrl1))
            }
        };
        if selected == source {
            return Ok(false);
        }

        let current = match sys_ctrl1 {
            Some(value) => value,
            None => self.read_register(Register::SysCtrl1).await?,
        };
        let mut flags = SysCtrl1Flags::from_bits_retain(current);
        flags.set(
            SysCtrl1Flags::TEMP_SEL,
            source == TempSource::ExternalThermistor,
        );
        self.write_register(Register::SysCtrl1, flags.bits()).await?;
        self.temp_source.switched(source, now_ms);
        #[cfg(feature = "defmt")]
        defmt::debug!("temperature source switched to {}", source);
        Ok(true)
    }

    async fn convert_temperature(
        &mut self,
        channel: ThermistorChannel,
    ) -> Result<ThermodynamicTemperature, Error<E>> {
        let raw = self.read_pair(channel.register()).await? & RAW14_MASK;
        match channel.source() {
            TempSource::InternalDie => Ok(thermistor::die_temperature(thermistor::ts_voltage(raw))),
            TempSource::ExternalThermistor => {
                thermistor::external_temperature(raw).map_err(Error::TemperatureConversion)
            }
        }
    }

    /// Reads a temperature channel, blocking for the settle time if the
    /// internal/external category has to change first.
    ///
    /// A settle still pending from [`Self::select_temperature_source`] is
    /// waited out in full, since there is no clock here to know how much of it
    /// has already passed.
    pub async fn read_temperature<D: DelayNs>(
        &mut self,
        channel: ThermistorChannel,
        delay: &mut D,
    ) -> Result<ThermodynamicTemperature, Error<E>> {
        self.ensure_awake()?;
        self.apply_temp_source(channel.source(), 0).await?;
        if self.temp_source.is_settling() {
            delay.delay_ms(SETTLE_TIME_MS).await;
            self.temp_source.mark_settled();
        }
        self.convert_temperature(channel).await
    }

    /// Switches the temperature category for `channel` if needed and returns
    /// the milliseconds left until its readings are valid.
    pub async fn select_temperature_source(
        &mut self,
        channel: ThermistorChannel,
        now_ms: u64,
    ) -> Result<u32, Error<E>> {
        self.ensure_awake()?;
        self.apply_temp_source(channel.source(), now_ms).await?;
        Ok(self.temp_source.remaining_ms(now_ms))
    }

    /// Non-blocking temperature read. Fails with [`Error::Settling`] until the
    /// settle time after a category change has passed at `now_ms`.
    pub async fn read_temperature_at(
        &mut self,
        channel: ThermistorChannel,
        now_ms: u64,
    ) -> Result<ThermodynamicTemperature, Error<E>> {
        let remaining_ms = self.select_temperature_source(channel, now_ms).await?;
        if remaining_ms > 0 {
            return Err(Error::Settling { remaining_ms });
        }
        self.temp_source.mark_settled();
        self.convert_temperature(channel).await
    }

    /// Turns the balancing FET of one cell on or off, leaving the others alone.
    pub async fn set_balancing(&mut self, cell: u8, enabled: bool) -> Result<(), Error<E>> {
        let index = CellIndex::new(cell).ok_or(Error::InvalidCell(cell))?;
        self.ensure_awake()?;
        let (reg, mask) = balance_slot(index);
        if enabled {
            self.modify_register(reg, mask, 0).await?;
        } else {
            self.modify_register(reg, 0, mask).await?;
        }
        Ok(())
    }

    pub async fn is_balancing(&mut self, cell: u8) -> Result<bool, Error<E>> {
        let index = CellIndex::new(cell).ok_or(Error::InvalidCell(cell))?;
        self.ensure_awake()?;
        let (reg, mask) = balance_slot(index);
        Ok(self.read_register(reg).await? & mask != 0)
    }

    pub async fn read_status(&mut self) -> Result<SystemStatus, Error<E>> {
        self.ensure_awake()?;
        let status = self.read_register(Register::SysStat).await?;
        Ok(SystemStatus::new(status))
    }

    /// Clears the given SYS_STAT flags (write 1 to clear).
    pub async fn clear_status_flags(&mut self, flags: SysStatFlags) -> Result<(), Error<E>> {
        self.ensure_awake()?;
        self.write_register(Register::SysStat, flags.bits()).await
    }

    /// Reads SYS_STAT if the ALERT interrupt fired since the last call.
    pub async fn poll_alert(&mut self) -> Result<Option<SystemStatus>, Error<E>> {
        let Some(flag) = self.alert else {
            return Ok(None);
        };
        if !flag.take() {
            return Ok(None);
        }
        self.read_status().await.map(Some)
    }

    /// Puts the device into ship mode (lowest power, all functions off).
    ///
    /// SHUT_A/SHUT_B are written 00, 11, 01, 10 back to back from a single
    /// read of SYS_CTRL1. The device stops answering afterwards and every
    /// further call fails with [`Error::ShipMode`].
    pub async fn enter_ship_mode(&mut self) -> Result<(), Error<E>> {
        self.ensure_awake()?;
        let shut = SysCtrl1Flags::SHUT_A | SysCtrl1Flags::SHUT_B;
        let base = self.read_register(Register::SysCtrl1).await? & !shut.bits();

        for pattern in [
            SysCtrl1Flags::empty(),
            shut,
            SysCtrl1Flags::SHUT_B,
            SysCtrl1Flags::SHUT_A,
        ] {
            self.write_register(Register::SysCtrl1, base | pattern.bits())
                .await?;
        }

        self.mode = DeviceMode::Ship;
        self.calibration = None;
        self.temp_source.reset();
        #[cfg(feature = "defmt")]
        defmt::info!("entered ship mode");
        Ok(())
    }
}
