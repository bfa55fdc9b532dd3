//! sdmmc-card - Card registers
//!
//! Raw copies of the CID, CSD and EXT_CSD as they came off the bus, with
//! accessors for the fields the card layer cares about. Anything else can be
//! pulled out with `field`.

use core::convert::TryInto;

use crate::sdmmc_proto::*;

/// Extract `size` bits starting at bit `start` of a 128-bit register stored
/// as four words, least significant word first.
pub fn unstuff_bits(words: &[u32; 4], start: u16, size: u8) -> u32 {
    let mask = if size < 32 {
        (1u32 << size) - 1
    } else {
        u32::MAX
    };
    let off = usize::from(start / 32);
    let shift = u32::from(start % 32);
    if off >= words.len() {
        return 0;
    }
    let mut result = words[off] >> shift;
    if shift != 0 && u32::from(size) + shift > 32 && off + 1 < words.len() {
        result |= words[off + 1] << (32 - shift);
    }
    result & mask
}

/// Extract a little-endian field of up to four bytes from a byte register.
pub fn unstuff_bytes(bytes: &[u8], offset: u16, size: u8) -> u32 {
    let start = usize::from(offset);
    let size = usize::from(size.min(4));
    bytes
        .iter()
        .skip(start)
        .take(size)
        .enumerate()
        .fold(0u32, |acc, (i, b)| acc | (u32::from(*b) << (8 * i)))
}

fn words_from_be_bytes(bytes: &[u8; 16]) -> [u32; 4] {
    let mut words = [0u32; 4];
    for (idx, chunk) in bytes.chunks(4).enumerate() {
        words[3 - idx] = u32::from_be_bytes(chunk.try_into().expect("Infallible"));
    }
    words
}

/// The Card Identification register.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct Cid {
    words: [u32; 4],
}

impl Cid {
    /// Wrap the four words of an R2 response.
    pub fn from_words(words: [u32; 4]) -> Self {
        Cid { words }
    }

    /// Wrap the register as sent on the wire, most significant byte first.
    pub fn from_be_bytes(bytes: &[u8; 16]) -> Self {
        Cid {
            words: words_from_be_bytes(bytes),
        }
    }

    pub fn words(&self) -> &[u32; 4] {
        &self.words
    }

    /// Any bit field of the register.
    pub fn field(&self, start: u16, size: u8) -> u32 {
        unstuff_bits(&self.words, start, size)
    }

    define_field!(manufacturer_id, u8, bits, 120, 8);
    define_field!(device_type, u8, bits, 112, 2);
    define_field!(oem_id, u8, bits, 104, 8);
    define_field!(product_revision, u8, bits, 48, 8);
    define_field!(serial_number, u32, bits, 16, 32);
    define_field!(manufacturing_date, u8, bits, 8, 8);

    /// The six character product name.
    pub fn product_name(&self) -> [u8; 6] {
        let high = self.field(88, 16);
        let low = self.field(56, 32);
        let mut name = [0u8; 6];
        name[..2].copy_from_slice(&(high as u16).to_be_bytes());
        name[2..].copy_from_slice(&low.to_be_bytes());
        name
    }
}

/// The Card Specific Data register, in its MMC layout.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct Csd {
    words: [u32; 4],
}

impl Csd {
    /// Wrap the four words of an R2 response.
    pub fn from_words(words: [u32; 4]) -> Self {
        Csd { words }
    }

    /// Wrap the register as sent on the wire, most significant byte first.
    pub fn from_be_bytes(bytes: &[u8; 16]) -> Self {
        Csd {
            words: words_from_be_bytes(bytes),
        }
    }

    pub fn words(&self) -> &[u32; 4] {
        &self.words
    }

    /// Any bit field of the register.
    pub fn field(&self, start: u16, size: u8) -> u32 {
        unstuff_bits(&self.words, start, size)
    }

    define_field!(csd_structure, u8, bits, 126, 2);
    define_field!(spec_version, u8, bits, 122, 4);
    define_field!(taac, u8, bits, 112, 8);
    define_field!(nsac, u8, bits, 104, 8);
    define_field!(transfer_speed, u8, bits, 96, 8);
    define_field!(command_classes, u16, bits, 84, 12);
    define_field!(read_block_len, u8, bits, 80, 4);
    define_field!(read_block_partial, bool, bits, 79);
    define_field!(device_size, u32, bits, 62, 12);
    define_field!(device_size_multiplier, u8, bits, 47, 3);
    define_field!(erase_group_size, u8, bits, 42, 5);
    define_field!(erase_group_multiplier, u8, bits, 37, 5);
    define_field!(write_block_len, u8, bits, 22, 4);
    define_field!(permanent_write_protect, bool, bits, 13);
    define_field!(temporary_write_protect, bool, bits, 12);

    /// Block count of a standard capacity card.
    pub fn block_count(&self) -> u32 {
        (self.device_size() + 1) << (self.device_size_multiplier() + 2)
    }

    /// Block size of a standard capacity card.
    pub fn block_len(&self) -> u32 {
        1 << self.read_block_len()
    }

    /// Returns the card capacity in bytes
    pub fn card_capacity_bytes(&self) -> u64 {
        u64::from(self.block_count()) * u64::from(self.block_len())
    }
}

/// The 512 byte Extended CSD.
#[derive(Clone)]
pub struct ExtCsd {
    bytes: [u8; EXT_CSD_LEN],
}

impl Default for ExtCsd {
    fn default() -> Self {
        ExtCsd {
            bytes: [0u8; EXT_CSD_LEN],
        }
    }
}

impl core::fmt::Debug for ExtCsd {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExtCsd")
            .field("rev", &self.rev())
            .field("sec_count", &self.sec_count())
            .field("device_type", &self.device_type())
            .field("hs_timing", &self.hs_timing())
            .field("bus_width", &self.bus_width())
            .finish()
    }
}

impl ExtCsd {
    pub fn from_bytes(bytes: [u8; EXT_CSD_LEN]) -> Self {
        ExtCsd { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; EXT_CSD_LEN] {
        &self.bytes
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8; EXT_CSD_LEN] {
        &mut self.bytes
    }

    /// A little-endian field of up to four bytes.
    pub fn field(&self, offset: u16, size: u8) -> u32 {
        unstuff_bytes(&self.bytes, offset, size)
    }

    define_field!(cache_ctrl, u8, bytes, EXT_CSD_CACHE_CTRL, 1);
    define_field!(power_off_notification, u8, bytes, EXT_CSD_POWER_OFF_NOTIFICATION, 1);
    define_field!(data_sector_size, u8, bytes, EXT_CSD_DATA_SECTOR_SIZE, 1);
    define_field!(use_native_sector, u8, bytes, EXT_CSD_USE_NATIVE_SECTOR, 1);
    define_field!(native_sector_size, u8, bytes, EXT_CSD_NATIVE_SECTOR_SIZE, 1);
    define_field!(bus_width, u8, bytes, EXT_CSD_BUS_WIDTH, 1);
    define_field!(hs_timing, u8, bytes, EXT_CSD_HS_TIMING, 1);
    define_field!(rev, u8, bytes, EXT_CSD_REV, 1);
    define_field!(device_type, u8, bytes, EXT_CSD_DEVICE_TYPE, 1);
    define_field!(sec_count, u32, bytes, EXT_CSD_SEC_COUNT, 4);
    define_field!(sleep_notification_time, u8, bytes, EXT_CSD_SLEEP_NOTIFICATION_TIME, 1);
    define_field!(sec_feature_support, u8, bytes, EXT_CSD_SEC_FEATURE_SUPPORT, 1);
    define_field!(power_off_long_time, u8, bytes, EXT_CSD_POWER_OFF_LONG_TIME, 1);
    define_field!(generic_cmd6_time, u8, bytes, EXT_CSD_GENERIC_CMD6_TIME, 1);
    define_field!(cache_size, u32, bytes, EXT_CSD_CACHE_SIZE, 4);
}

/// What the SDIO Card Common Control Registers say about the card.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct Cccr {
    pub cccr_rev: u8,
    pub sd_rev: u8,
    pub multi_block: bool,
    pub low_speed: bool,
    pub wide_bus: bool,
    pub high_power: bool,
    pub high_speed: bool,
}

/// The parts of the SDIO common Card Information Structure we parse.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct Cis {
    pub vendor: u16,
    pub device: u16,
    pub block_size: u16,
    pub max_speed: u8,
}
