//! sdmmc-card - Constants from the SD/MMC/SDIO specifications
//!
//! Command indices, register offsets and bit definitions shared by the
//! MMC, eMMC and SDIO paths. Nothing in here depends on a host controller.

use bitflags::bitflags;

//==============================================================================

// MMC/eMMC commands

/// GO_IDLE_STATE - init card in idle state
pub const CMD0: u8 = 0x00;
/// SEND_OP_COND - negotiate voltage window and sector addressing
pub const CMD1: u8 = 0x01;
/// ALL_SEND_CID - ask the card for its identification register
pub const CMD2: u8 = 0x02;
/// SET_RELATIVE_ADDR - assign (MMC) or publish (SD/SDIO) the RCA
pub const CMD3: u8 = 0x03;
/// SLEEP_AWAKE on MMC, IO_SEND_OP_COND on SDIO
pub const CMD5: u8 = 0x05;
/// SWITCH - write a byte of the EXT_CSD
pub const CMD6: u8 = 0x06;
/// SELECT/DESELECT_CARD
pub const CMD7: u8 = 0x07;
/// SEND_EXT_CSD on MMC, SEND_IF_COND on SD/SDIO
pub const CMD8: u8 = 0x08;
/// SEND_CSD - read the Card Specific Data (CSD register)
pub const CMD9: u8 = 0x09;
/// SEND_STATUS - read the card status register
pub const CMD13: u8 = 0x0D;
/// READ_SINGLE_BLOCK - read a single data block from the card
pub const CMD17: u8 = 0x11;
/// READ_MULTIPLE_BLOCK - read multiple data blocks from the card
pub const CMD18: u8 = 0x12;
/// WRITE_BLOCK - write a single data block to the card
pub const CMD24: u8 = 0x18;
/// WRITE_MULTIPLE_BLOCK - write blocks of data until a STOP_TRANSMISSION
pub const CMD25: u8 = 0x19;
/// ERASE_GROUP_START - first address of the erase range
pub const CMD35: u8 = 0x23;
/// ERASE_GROUP_END - last address of the erase range
pub const CMD36: u8 = 0x24;
/// ERASE - erase, trim or discard the selected range
pub const CMD38: u8 = 0x26;
/// IO_RW_DIRECT - read or write a single SDIO register byte
pub const CMD52: u8 = 0x34;
/// IO_RW_EXTENDED - read or write SDIO bytes or blocks
pub const CMD53: u8 = 0x35;
/// GEN_CMD - vendor specific data block transfer
pub const CMD56: u8 = 0x38;

//==============================================================================

// OCR

/// Sector (block) addressing mode in the CMD1 argument, shifted by 28.
pub const OCR_SECTOR_MODE: u32 = 0x4 << 28;
/// Card has finished power up.
pub const OCR_CARD_READY: u32 = 1 << 31;
/// 1.7 V - 1.8 V window.
pub const OCR_VDD_17_18: u32 = 1 << 5;
/// 1.8 V - 1.9 V window.
pub const OCR_VDD_18_19: u32 = 1 << 6;
/// Bits an SDIO host may put into the CMD5 argument.
pub const SDIO_OCR_MASK: u32 = 0x01FF_FF00;
/// Number of I/O functions in the CMD5 response, after shifting.
pub const SDIO_OCR_FUNCTION_SHIFT: u32 = 28;

/// Check pattern echoed back by CMD8 (SEND_IF_COND).
pub const IF_COND_CHECK_PATTERN: u32 = 0xAA;

//==============================================================================

// Card status (R1)

bitflags! {
    /// The R1 card status word returned by CMD13.
    pub struct CardStatus: u32 {
        const APP_CMD = 1 << 5;
        const SWITCH_ERROR = 1 << 7;
        const READY_FOR_DATA = 1 << 8;
        const ERASE_RESET = 1 << 13;
        const WP_ERASE_SKIP = 1 << 15;
        const CID_CSD_OVERWRITE = 1 << 16;
        const ERROR = 1 << 19;
        const CC_ERROR = 1 << 20;
        const CARD_ECC_FAILED = 1 << 21;
        const ILLEGAL_COMMAND = 1 << 22;
        const COM_CRC_ERROR = 1 << 23;
        const LOCK_UNLOCK_FAILED = 1 << 24;
        const CARD_IS_LOCKED = 1 << 25;
        const WP_VIOLATION = 1 << 26;
        const ERASE_PARAM = 1 << 27;
        const ERASE_SEQ_ERROR = 1 << 28;
        const BLOCK_LEN_ERROR = 1 << 29;
        const ADDRESS_MISALIGN = 1 << 30;
        const ADDRESS_OUT_OF_RANGE = 1 << 31;
    }
}

impl CardStatus {
    const CURRENT_STATE_SHIFT: u32 = 9;
    const CURRENT_STATE_MASK: u32 = 0xF;

    /// The CURRENT_STATE field (bits 12:9).
    pub fn current_state(raw: u32) -> u32 {
        (raw >> Self::CURRENT_STATE_SHIFT) & Self::CURRENT_STATE_MASK
    }
}

//==============================================================================

// EXT_CSD

/// Size of the EXT_CSD register.
pub const EXT_CSD_LEN: usize = 512;

pub const EXT_CSD_CACHE_CTRL: u8 = 33;
pub const EXT_CSD_POWER_OFF_NOTIFICATION: u8 = 34;
pub const EXT_CSD_DATA_SECTOR_SIZE: u16 = 61;
pub const EXT_CSD_USE_NATIVE_SECTOR: u16 = 62;
pub const EXT_CSD_NATIVE_SECTOR_SIZE: u16 = 63;
pub const EXT_CSD_BUS_WIDTH: u8 = 183;
pub const EXT_CSD_HS_TIMING: u8 = 185;
pub const EXT_CSD_REV: u16 = 192;
pub const EXT_CSD_DEVICE_TYPE: u16 = 196;
pub const EXT_CSD_SEC_COUNT: u16 = 212;
pub const EXT_CSD_SLEEP_NOTIFICATION_TIME: u16 = 216;
pub const EXT_CSD_SEC_FEATURE_SUPPORT: u16 = 231;
pub const EXT_CSD_POWER_OFF_LONG_TIME: u16 = 247;
pub const EXT_CSD_GENERIC_CMD6_TIME: u16 = 248;
pub const EXT_CSD_CACHE_SIZE: u16 = 249;

/// BUS_WIDTH values.
pub const EXT_CSD_BUS_WIDTH_1: u8 = 0;
pub const EXT_CSD_BUS_WIDTH_4: u8 = 1;
pub const EXT_CSD_BUS_WIDTH_8: u8 = 2;
pub const EXT_CSD_BUS_WIDTH_4_DDR: u8 = 5;
pub const EXT_CSD_BUS_WIDTH_8_DDR: u8 = 6;

/// HS_TIMING values.
pub const EXT_CSD_TIMING_HS: u8 = 1;
pub const EXT_CSD_TIMING_HS200: u8 = 2;

/// The revision from which the power-off notification and the timeout
/// bytes exist.
pub const EXT_CSD_REV_1_6: u8 = 6;

/// CSD C_SIZE value marking a card whose size lives in the EXT_CSD.
pub const CSD_C_SIZE_HIGH_CAPACITY: u32 = 0xFFF;

bitflags! {
    /// DEVICE_TYPE.
    pub struct DeviceType: u8 {
        const HS_26MHZ = 1 << 0;
        const HS_52MHZ = 1 << 1;
        const HS_DDR_52MHZ_18_3V = 1 << 2;
        const HS_DDR_52MHZ_12V = 1 << 3;
        const HS200_18V = 1 << 4;
        const HS200_12V = 1 << 5;
    }
}

bitflags! {
    /// SEC_FEATURE_SUPPORT.
    pub struct SecureFeatures: u8 {
        /// Secure purge operations are supported.
        const SEC_ER_EN = 1 << 0;
        /// Secure and insecure trim are supported.
        const SEC_GB_CL_EN = 1 << 4;
        const SEC_SANITIZE = 1 << 6;
    }
}

/// Access modes in bits 25:24 of the CMD6 argument.
#[derive(Debug, Copy, Clone, PartialEq)]
#[repr(u8)]
pub enum SwitchAccess {
    CommandSet = 0,
    SetBits = 1,
    ClearBits = 2,
    WriteByte = 3,
}

/// Build a CMD6 argument.
pub const fn switch_arg(access: SwitchAccess, index: u8, value: u8) -> u32 {
    ((access as u32) << 24) | ((index as u32) << 16) | ((value as u32) << 8)
}

/// Fallback CMD6 timeout for cards that don't publish GENERIC_CMD6_TIME.
pub const DEFAULT_CMD6_TIMEOUT_MS: u32 = 500;

//==============================================================================

// Bus speeds

/// Highest legacy MMC clock.
pub const MMC_LEGACY_HS: u32 = 26_000_000;
/// Highest clock accepted in non-UHS and HS200 modes.
pub const MMC_HS200_MAX_SPEED_LIMIT: u32 = 96_000_000;
/// Highest clock accepted in DDR mode, and the boundary above which SDR104
/// requests use HS200 timing.
pub const MMC_HS_MAX_SPEED_LIMIT: u32 = 48_000_000;

/// Highest SDIO clock.
pub const SDIO_CARD_MAX_SPEED_LIMIT: u32 = 50_000_000;
/// Highest SDIO clock without high speed mode.
pub const SDIO_CARD_FULL_SPEED_LIMIT: u32 = 25_000_000;

//==============================================================================

// SDIO CCCR

pub const SDIO_CCCR_CCCR_REV: u32 = 0x00;
pub const SDIO_CCCR_SD_REV: u32 = 0x01;
pub const SDIO_CCCR_IO_ENABLE: u32 = 0x02;
pub const SDIO_CCCR_IO_READY: u32 = 0x03;
pub const SDIO_CCCR_INT_ENABLE: u32 = 0x04;
pub const SDIO_CCCR_BUS_CONTROL: u32 = 0x07;
pub const SDIO_CCCR_CARD_CAPABILITY: u32 = 0x08;
pub const SDIO_CCCR_CIS_PTR: u32 = 0x09;
pub const SDIO_CCCR_POWER_CONTROL: u32 = 0x12;
pub const SDIO_CCCR_BUS_SPEED_SELECT: u32 = 0x13;

/// Low byte of a function's block size, within its FBR.
pub const SDIO_FBR_BLOCK_SIZE_LOW: u32 = 0x10;
/// High byte of a function's block size, within its FBR.
pub const SDIO_FBR_BLOCK_SIZE_HIGH: u32 = 0x11;
/// FBR n lives at n * 0x100.
pub const SDIO_FBR_SHIFT: u32 = 8;

/// BUS_CONTROL bus width values.
pub const SDIO_BUS_WIDTH_1: u8 = 0x0;
pub const SDIO_BUS_WIDTH_4: u8 = 0x2;

/// INT_ENABLE master enable bit.
pub const SDIO_INT_ENABLE_MASTER: u8 = 0x1;

bitflags! {
    /// CARD_CAPABILITY.
    pub struct CccrCapability: u8 {
        const SDC = 1 << 0;
        /// Supports multi-block CMD53.
        const SMB = 1 << 1;
        const SRW = 1 << 2;
        const SBS = 1 << 3;
        const S4MI = 1 << 4;
        const E4MI = 1 << 5;
        /// Low-speed card.
        const LSC = 1 << 6;
        /// 4-bit support for a low-speed card.
        const S4BLS = 1 << 7;
    }
}

/// POWER_CONTROL: supports master power control.
pub const SDIO_POWER_SMPC: u8 = 1 << 0;

/// BUS_SPEED_SELECT: supports high speed.
pub const SDIO_SPEED_SHS: u8 = 1 << 0;
/// BUS_SPEED_SELECT: high speed enabled.
pub const SDIO_SPEED_EHS: u8 = 1 << 1;

// CIS tuples

pub const SDIO_CIS_TPL_NULL: u8 = 0x00;
pub const SDIO_CIS_TPL_MANFID: u8 = 0x20;
pub const SDIO_CIS_TPL_FUNCE: u8 = 0x22;
pub const SDIO_CIS_TPL_END: u8 = 0xFF;

/// Upper bound on tuples walked before giving up on a CIS chain.
pub const SDIO_CIS_MAX_TUPLES: u32 = 512;

// CMD52 / CMD53 argument bits

pub const SDIO_ARG_WRITE: u32 = 1 << 31;
pub const SDIO_ARG_FUNCTION_SHIFT: u32 = 28;
pub const SDIO_ARG_BLOCK_MODE: u32 = 1 << 27;
pub const SDIO_ARG_INCREMENT_ADDRESS: u32 = 1 << 26;
pub const SDIO_ARG_ADDRESS_SHIFT: u32 = 9;

/// Highest function number a CMD52/CMD53 argument can carry.
pub const SDIO_MAX_FUNCTION: u8 = 7;
/// Highest register address a CMD52/CMD53 argument can carry.
pub const SDIO_MAX_ADDRESS: u32 = 0x1_FFFF;
/// Widest CMD53 block or byte count field.
pub const SDIO_MAX_COUNT: u32 = 0x1FF;

fn io_rw_arg(function: u8, address: u32) -> u32 {
    (u32::from(function & SDIO_MAX_FUNCTION) << SDIO_ARG_FUNCTION_SHIFT)
        | ((address & SDIO_MAX_ADDRESS) << SDIO_ARG_ADDRESS_SHIFT)
}

/// Build a CMD52 argument. Fields too wide for the argument are truncated.
pub fn io_rw_direct_arg(function: u8, address: u32, write: Option<u8>) -> u32 {
    let arg = io_rw_arg(function, address);
    match write {
        Some(data) => arg | SDIO_ARG_WRITE | u32::from(data),
        None => arg,
    }
}

/// Build a CMD53 argument. A `block_count` of zero with a `block_size` of at
/// most 512 selects byte mode, where a count of 512 is encoded as 0. Fields
/// too wide for the argument are truncated.
pub fn io_rw_extended_arg(
    function: u8,
    address: u32,
    block_count: u32,
    block_size: u32,
    increment: bool,
    write: bool,
) -> u32 {
    let mut arg = io_rw_arg(function, address);
    if write {
        arg |= SDIO_ARG_WRITE;
    }
    if increment {
        arg |= SDIO_ARG_INCREMENT_ADDRESS;
    }
    if block_count == 0 && block_size <= 512 {
        arg |= block_size & SDIO_MAX_COUNT;
    } else {
        arg |= SDIO_ARG_BLOCK_MODE | (block_count & SDIO_MAX_COUNT);
    }
    arg
}
