use bitflags::bitflags;

use crate::data_types::CellIndex;

/// Register map of the BQ769x0 family.
///
/// Only the high byte of each two-byte measurement is listed; the low byte
/// always follows at the next address and is fetched by the same pair read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Register {
    /// System Status Register (write 1 to clear)
    SysStat = 0x00,
    /// Cell Balance 1 Register (Cells 1-5)
    CellBal1 = 0x01,
    /// Cell Balance 2 Register (Cells 6-10)
    CellBal2 = 0x02,
    /// Cell Balance 3 Register (Cells 11-15)
    CellBal3 = 0x03,
    /// System Control 1 Register
    SysCtrl1 = 0x04,
    /// System Control 2 Register
    SysCtrl2 = 0x05,
    /// Overvoltage Trip Register
    OvTrip = 0x09,
    /// Undervoltage Trip Register
    UvTrip = 0x0A,
    /// Coulomb Counter Configuration Register
    CcCfg = 0x0B,
    Vc1Hi = 0x0C,
    Vc2Hi = 0x0E,
    Vc3Hi = 0x10,
    Vc4Hi = 0x12,
    Vc5Hi = 0x14,
    Vc6Hi = 0x16,
    Vc7Hi = 0x18,
    Vc8Hi = 0x1A,
    Vc9Hi = 0x1C,
    Vc10Hi = 0x1E,
    Vc11Hi = 0x20,
    Vc12Hi = 0x22,
    Vc13Hi = 0x24,
    Vc14Hi = 0x26,
    Vc15Hi = 0x28,
    /// Battery (pack) Voltage High Byte
    BatHi = 0x2A,
    /// Temperature Sensor 1 High Byte (die temperature when TEMP_SEL = 0)
    Ts1Hi = 0x2C,
    /// Temperature Sensor 2 High Byte
    Ts2Hi = 0x2E,
    /// Temperature Sensor 3 High Byte
    Ts3Hi = 0x30,
    /// Coulomb Counter High Byte
    CcHi = 0x32,
    /// ADC Gain 1 Register (ADCGAIN<4:3> in bits 3-2)
    AdcGain1 = 0x50,
    /// ADC Offset Register (signed, mV)
    AdcOffset = 0x51,
    /// ADC Gain 2 Register (ADCGAIN<2:0> in bits 7-5)
    AdcGain2 = 0x59,
}

impl Register {
    /// Bus address of this register.
    pub const fn addr(self) -> u8 {
        self as u8
    }
}

/// High-byte registers of the fifteen cell taps, cell 1 first.
pub const CELL_VOLTAGE_REGISTERS: [Register; 15] = [
    Register::Vc1Hi,
    Register::Vc2Hi,
    Register::Vc3Hi,
    Register::Vc4Hi,
    Register::Vc5Hi,
    Register::Vc6Hi,
    Register::Vc7Hi,
    Register::Vc8Hi,
    Register::Vc9Hi,
    Register::Vc10Hi,
    Register::Vc11Hi,
    Register::Vc12Hi,
    Register::Vc13Hi,
    Register::Vc14Hi,
    Register::Vc15Hi,
];

bitflags! {
    /// SYS_STAT flags. Writing a 1 back clears the flag.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SysStatFlags: u8 {
        const CC_READY = 1 << 7;
        const DEVICE_XREADY = 1 << 5;
        const OVRD_ALERT = 1 << 4;
        const UV = 1 << 3;
        const OV = 1 << 2;
        const SCD = 1 << 1;
        const OCD = 1 << 0;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SysCtrl1Flags: u8 {
        const LOAD_PRESENT = 1 << 7;
        const ADC_EN = 1 << 4;
        const TEMP_SEL = 1 << 3;
        const SHUT_A = 1 << 1;
        const SHUT_B = 1 << 0;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SysCtrl2Flags: u8 {
        const DELAY_DIS = 1 << 7;
        const CC_EN = 1 << 6;
        const CC_ONESHOT = 1 << 5;
        const DSG_ON = 1 << 1;
        const CHG_ON = 1 << 0;
    }
}

/// "For optimal performance, CC_CFG should be programmed to 0x19 upon device startup."
pub const CC_CFG_RECOMMENDED: u8 = 0x19;

/// ADCGAIN<4:3> live in bits 3-2 of ADCGAIN1; the rest of the register is reserved.
pub const ADCGAIN1_TRIM_MASK: u8 = 0b0000_1100;

/// Fixed bits of the 14-bit OV_TRIP field: `10-XXXX-XXXX-1000`.
pub const OV_TRIP_FIXED_BITS: u16 = 0x2008;
/// Fixed bits of the 14-bit UV_TRIP field: `01-XXXX-XXXX-0000`.
pub const UV_TRIP_FIXED_BITS: u16 = 0x1000;

/// Cell voltage and TS readings carry 14 significant bits.
pub const RAW14_MASK: u16 = 0x3FFF;

/// One of the three CELLBALx registers and the cell numbering it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceBank {
    pub register: Register,
    pub first_cell: u8,
    pub last_cell: u8,
    /// Subtracted from the cell number to get the bit position.
    pub base: u8,
}

/// Cell number to balancing register mapping.
///
/// CELLBAL1 is numbered from 0, so cell 1 lands on bit 1.
pub const BALANCE_BANKS: [BalanceBank; 3] = [
    BalanceBank {
        register: Register::CellBal1,
        first_cell: 1,
        last_cell: 5,
        base: 0,
    },
    BalanceBank {
        register: Register::CellBal2,
        first_cell: 6,
        last_cell: 10,
        base: 6,
    },
    BalanceBank {
        register: Register::CellBal3,
        first_cell: 11,
        last_cell: 15,
        base: 11,
    },
];

/// Returns the balancing register and the single-bit mask controlling `cell`.
pub fn balance_slot(cell: CellIndex) -> (Register, u8) {
    let n = cell.get();
    // CellIndex guarantees 1..=15, so exactly one bank matches.
    let bank = BALANCE_BANKS
        .iter()
        .find(|bank| (bank.first_cell..=bank.last_cell).contains(&n))
        .unwrap_or(&BALANCE_BANKS[2]);
    (bank.register, 1 << (n - bank.base))
}
