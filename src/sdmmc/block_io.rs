//! sdmmc-card - Block I/O
//!
//! Reading, writing and erasing blocks once the card is in the transfer
//! state. Block numbers and counts are in units of the card's own block
//! size.

use embedded_hal::blocking::delay::DelayMs;

use super::{Card, CardState, Error};
use crate::block_device::{Block, BlockCount, BlockDevice, BlockIdx};
use crate::host::{Command, DataTransfer, Host, ResponseType, TransferMode};
use crate::sdmmc_proto::*;

#[cfg(feature = "log")]
use log::{debug, trace};

#[cfg(feature = "defmt-log")]
use defmt::{debug, trace};

/// Most blocks one command can move.
pub const MAX_BLOCK_COUNT: u32 = 0xFFFF;

/// Size of a GEN_CMD data block.
const CMD56_BLOCK_LEN: u32 = 512;

/// The CMD38 argument for each kind of erase.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum EraseType {
    Erase = 0x0000_0000,
    Trim = 0x0000_0001,
    Discard = 0x0000_0003,
    SecureErase = 0x8000_0000,
    SecureTrim1 = 0x8000_0001,
    SecureTrim2 = 0x8000_8000,
}

impl EraseType {
    fn is_secure(self) -> bool {
        matches!(
            self,
            EraseType::SecureErase | EraseType::SecureTrim1 | EraseType::SecureTrim2
        )
    }

    fn is_trim(self) -> bool {
        matches!(
            self,
            EraseType::Trim | EraseType::SecureTrim1 | EraseType::SecureTrim2
        )
    }
}

impl<H, D> Card<H, D>
where
    H: Host,
    D: DelayMs<u32>,
{
    /// Read `count` blocks from `start` into `buf`. Returns the number of
    /// blocks actually read, which the host's ADMA limit may make smaller
    /// than `count`.
    pub fn block_read_sync(
        &mut self,
        start: u32,
        count: u32,
        buf: &mut [u8],
    ) -> Result<u32, Error> {
        let count = self.check_block_rw(start, count, buf.len())?;
        let cmd = self.block_rw_command(start, count, true);
        let data = DataTransfer::read(buf, count, self.props.block_size);
        self.send(cmd, Some(data))?;
        Ok(count)
    }

    /// Write `count` blocks from `buf` at `start`. Returns the number of
    /// blocks actually written.
    pub fn block_write_sync(&mut self, start: u32, count: u32, buf: &[u8]) -> Result<u32, Error> {
        let count = self.check_block_rw(start, count, buf.len())?;
        let cmd = self.block_rw_command(start, count, false);
        let data = DataTransfer::write(buf, count, self.props.block_size);
        self.send(cmd, Some(data))?;
        Ok(count)
    }

    /// Start reading blocks. Returns the number of blocks the transfer
    /// covers; completion is reported through the event callback.
    pub fn block_read_async(
        &mut self,
        start: u32,
        count: u32,
        buf: &'static mut [u8],
    ) -> Result<u32, Error> {
        let count = self.check_block_rw(start, count, buf.len())?;
        let cmd = self.block_rw_command(start, count, true).with_async(true);
        let data = DataTransfer::read(buf, count, self.props.block_size);
        self.send_async(cmd, Some(data))?;
        Ok(count)
    }

    /// Start writing blocks. Returns the number of blocks the transfer
    /// covers; completion is reported through the event callback.
    pub fn block_write_async(
        &mut self,
        start: u32,
        count: u32,
        buf: &'static [u8],
    ) -> Result<u32, Error> {
        let count = self.check_block_rw(start, count, buf.len())?;
        let cmd = self.block_rw_command(start, count, false).with_async(true);
        let data = DataTransfer::write(buf, count, self.props.block_size);
        self.send_async(cmd, Some(data))?;
        Ok(count)
    }

    /// Validate a transfer and clamp it to what the host can do in one go.
    fn check_block_rw(&self, start: u32, count: u32, buf_len: usize) -> Result<u32, Error> {
        if self.props.state != CardState::Transfer {
            return Err(Error::InvalidOperation);
        }
        self.check_block_range(start, count)?;
        if count > MAX_BLOCK_COUNT {
            return Err(Error::OutOfRange);
        }

        let needed = u64::from(count) * u64::from(self.props.block_size);
        if (buf_len as u64) < needed {
            return Err(Error::InvalidArg);
        }

        let settings = self.host.settings();
        let count = if settings.transfer_mode == TransferMode::Adma
            && count > settings.max_adma2_blocks
        {
            trace!("Clamping {} blocks to {}", count, settings.max_adma2_blocks);
            settings.max_adma2_blocks
        } else {
            count
        };
        if count == 0 {
            return Err(Error::InvalidArg);
        }
        Ok(count)
    }

    fn check_block_range(&self, start: u32, count: u32) -> Result<(), Error> {
        let max = self.props.max_blocks;
        if start >= max || u64::from(start) + u64::from(count) > u64::from(max) {
            debug!("Blocks {}+{} out of range ({})", start, count, max);
            return Err(Error::OutOfRange);
        }
        Ok(())
    }

    /// High capacity cards are block addressed, the rest byte addressed.
    fn block_address(&self, block: u32) -> u32 {
        if self.props.high_capacity {
            block
        } else {
            block * self.props.block_size
        }
    }

    fn block_rw_command(&self, start: u32, count: u32, read: bool) -> Command {
        let index = match (read, count > 1) {
            (true, false) => CMD17,
            (true, true) => CMD18,
            (false, false) => CMD24,
            (false, true) => CMD25,
        };
        Command::new(index, self.block_address(start), ResponseType::R1).with_auto_cmd23(count > 1)
    }

    /// Erase, trim or discard `count` blocks from `start`, then wait up to
    /// `timeout_ms` for the card to finish.
    pub fn block_erase(
        &mut self,
        start: u32,
        count: u32,
        erase_type: EraseType,
        timeout_ms: u32,
    ) -> Result<(), Error> {
        if self.props.state != CardState::Transfer {
            return Err(Error::InvalidOperation);
        }
        self.check_block_range(start, count)?;
        if count == 0 {
            return Err(Error::InvalidArg);
        }

        if erase_type.is_secure() && !self.props.secure_erase.contains(SecureFeatures::SEC_ER_EN) {
            debug!("This device does not support secure erase or trim");
            return Err(Error::InvalidArg);
        }
        if erase_type.is_trim() && !self.props.secure_erase.contains(SecureFeatures::SEC_GB_CL_EN) {
            debug!("This device does not support trim");
            return Err(Error::InvalidArg);
        }

        let first = self.block_address(start);
        let last = self.block_address(start + count - 1);
        self.send(Command::new(CMD35, first, ResponseType::R1), None)?;
        self.send(Command::new(CMD36, last, ResponseType::R1), None)?;
        self.send(
            Command::new(CMD38, erase_type as u32, ResponseType::R1b).with_busy_check(),
            None,
        )?;
        self.host.card_busy(timeout_ms)?;
        debug!("{:?} of blocks {}+{} done", erase_type, start, count);
        Ok(())
    }

    /// Read a 512 byte GEN_CMD block.
    pub fn cmd56_read_sync(&mut self, arg: u32, buf: &mut [u8]) -> Result<(), Error> {
        self.check_cmd56(buf.len())?;
        let data = DataTransfer::read(buf, 1, CMD56_BLOCK_LEN);
        self.send(Command::new(CMD56, arg, ResponseType::R1), Some(data))?;
        Ok(())
    }

    /// Start reading a 512 byte GEN_CMD block.
    pub fn cmd56_read_async(&mut self, arg: u32, buf: &'static mut [u8]) -> Result<(), Error> {
        self.check_cmd56(buf.len())?;
        let data = DataTransfer::read(buf, 1, CMD56_BLOCK_LEN);
        self.send_async(
            Command::new(CMD56, arg, ResponseType::R1).with_async(true),
            Some(data),
        )
    }

    fn check_cmd56(&self, buf_len: usize) -> Result<(), Error> {
        if self.props.state != CardState::Transfer {
            return Err(Error::InvalidOperation);
        }
        if buf_len < CMD56_BLOCK_LEN as usize {
            return Err(Error::InvalidArg);
        }
        Ok(())
    }

    /// `Block` is always 512 bytes, which a 4 KiB sector card can't serve.
    fn check_block_device(&self) -> Result<(), Error> {
        if self.props.block_size as usize != Block::LEN {
            debug!("Block size {} is not usable as a block device", self.props.block_size);
            return Err(Error::NotSupported);
        }
        Ok(())
    }
}

impl<H, D> BlockDevice for Card<H, D>
where
    H: Host,
    D: DelayMs<u32>,
{
    type Error = Error;

    /// Read one or more blocks, starting at the given block index.
    fn read(
        &mut self,
        blocks: &mut [Block],
        start_block_idx: BlockIdx,
        _reason: &str,
    ) -> Result<(), Self::Error> {
        self.check_block_device()?;
        let mut done = 0;
        while done < blocks.len() {
            let count = (blocks.len() - done).min(MAX_BLOCK_COUNT as usize);
            let chunk = &mut blocks[done..done + count];
            let issued = self.block_read_sync(
                start_block_idx.0 + done as u32,
                count as u32,
                Block::slice_as_bytes_mut(chunk),
            )?;
            done += issued as usize;
        }
        Ok(())
    }

    /// Write one or more blocks, starting at the given block index.
    fn write(&mut self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
        self.check_block_device()?;
        let mut done = 0;
        while done < blocks.len() {
            let count = (blocks.len() - done).min(MAX_BLOCK_COUNT as usize);
            let chunk = &blocks[done..done + count];
            let issued = self.block_write_sync(
                start_block_idx.0 + done as u32,
                count as u32,
                Block::slice_as_bytes(chunk),
            )?;
            done += issued as usize;
        }
        Ok(())
    }

    /// Determine how many blocks this device can hold.
    fn num_blocks(&mut self) -> Result<BlockCount, Self::Error> {
        self.check_block_device()?;
        Ok(BlockCount(self.props.max_blocks))
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
