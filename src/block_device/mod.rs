//! sdmmc-card - Block Device support
//!
//! Generic code for handling block devices. An initialized [`Card`] is one,
//! and so is a slice of memory, which is what the simulated hosts in the
//! tests keep their card contents in.
//!
//! [`Card`]: crate::sdmmc::Card

#[cfg(feature = "refcell-blockdevice")]
mod refcell;

mod block;
pub use block::*;

/// Represents a block device - a device which can read and write blocks (or
/// sectors). Only supports devices which are <= 2 TiB in size.
pub trait BlockDevice {
    /// The errors that the `BlockDevice` can return. Must be debug formattable.
    type Error: core::fmt::Debug;
    /// Read one or more blocks, starting at the given block index.
    fn read(
        &mut self,
        blocks: &mut [Block],
        start_block_idx: BlockIdx,
        reason: &str,
    ) -> Result<(), Self::Error>;
    /// Write one or more blocks, starting at the given block index.
    fn write(&mut self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Self::Error>;
    /// Determine how many blocks this device can hold.
    fn num_blocks(&mut self) -> Result<BlockCount, Self::Error>;

    /// Read exactly one block.
    fn read_block(&mut self, block_idx: BlockIdx) -> Result<Block, Self::Error> {
        let mut blocks = [Block::new()];
        self.read(&mut blocks, block_idx, "")?;
        let [block] = blocks;
        Ok(block)
    }
}

impl<T> BlockDevice for &mut T
where
    T: BlockDevice,
{
    type Error = T::Error;

    fn read(
        &mut self,
        blocks: &mut [Block],
        start_block_idx: BlockIdx,
        reason: &str,
    ) -> Result<(), Self::Error> {
        (*self).read(blocks, start_block_idx, reason)
    }

    fn write(&mut self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
        (*self).write(blocks, start_block_idx)
    }

    fn num_blocks(&mut self) -> Result<BlockCount, Self::Error> {
        (*self).num_blocks()
    }
}

/// The ways a [`MemoryBlockDevice`] access can fail.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum MemoryError {
    /// The access runs past the end of the backing memory.
    OutOfRange,
}

/// A block device over a plain byte slice. Any trailing partial block is
/// ignored.
#[derive(Debug)]
pub struct MemoryBlockDevice<'a> {
    memory: &'a mut [u8],
}

impl<'a> MemoryBlockDevice<'a> {
    pub fn new(memory: &'a mut [u8]) -> Self {
        Self { memory }
    }

    fn block_range(&self, block_idx: usize) -> Result<core::ops::Range<usize>, MemoryError> {
        let start = block_idx * Block::LEN;
        let end = start + Block::LEN;
        if end > self.memory.len() {
            return Err(MemoryError::OutOfRange);
        }
        Ok(start..end)
    }

    /// Copy `buf.len()` bytes out of the device, starting at the given block.
    /// `buf` must be a whole number of blocks long.
    pub fn read_bytes(
        &mut self,
        start_block_idx: BlockIdx,
        buf: &mut [u8],
    ) -> Result<(), MemoryError> {
        for (idx, chunk) in buf.chunks_mut(Block::LEN).enumerate() {
            let range = self.block_range(start_block_idx.0 as usize + idx)?;
            chunk.copy_from_slice(&self.memory[range.start..range.start + chunk.len()]);
        }
        Ok(())
    }

    /// Copy `buf` into the device, starting at the given block.
    pub fn write_bytes(
        &mut self,
        start_block_idx: BlockIdx,
        buf: &[u8],
    ) -> Result<(), MemoryError> {
        for (idx, chunk) in buf.chunks(Block::LEN).enumerate() {
            let range = self.block_range(start_block_idx.0 as usize + idx)?;
            self.memory[range.start..range.start + chunk.len()].copy_from_slice(chunk);
        }
        Ok(())
    }

    /// Overwrite whole blocks with a fill byte.
    pub fn fill(
        &mut self,
        start_block_idx: BlockIdx,
        count: BlockCount,
        value: u8,
    ) -> Result<(), MemoryError> {
        for idx in 0..count.0 {
            let range = self.block_range((start_block_idx.0 + idx) as usize)?;
            for b in self.memory[range].iter_mut() {
                *b = value;
            }
        }
        Ok(())
    }
}

impl<'a> BlockDevice for MemoryBlockDevice<'a> {
    type Error = MemoryError;

    fn read(
        &mut self,
        blocks: &mut [Block],
        start_block_idx: BlockIdx,
        _reason: &str,
    ) -> Result<(), Self::Error> {
        for (idx, block) in blocks.iter_mut().enumerate() {
            let range = self.block_range(start_block_idx.0 as usize + idx)?;
            block.contents.copy_from_slice(&self.memory[range])
        }

        Ok(())
    }

    fn write(&mut self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
        for (idx, block) in blocks.iter().enumerate() {
            let range = self.block_range(start_block_idx.0 as usize + idx)?;
            self.memory[range].copy_from_slice(&block.contents);
        }
        Ok(())
    }

    fn num_blocks(&mut self) -> Result<BlockCount, Self::Error> {
        Ok(BlockCount((self.memory.len() / Block::LEN) as u32))
    }
}
