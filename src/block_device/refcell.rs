//! Lets a card sit behind a `RefCell` so several owners can share it.

use core::cell::RefCell;

use super::{Block, BlockCount, BlockDevice, BlockIdx};

macro_rules! forward_through_refcell {
    ($ty:ty) => {
        impl<T> BlockDevice for $ty
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
                self.borrow_mut().read(blocks, start_block_idx, reason)
            }

            fn write(
                &mut self,
                blocks: &[Block],
                start_block_idx: BlockIdx,
            ) -> Result<(), Self::Error> {
                self.borrow_mut().write(blocks, start_block_idx)
            }

            fn num_blocks(&mut self) -> Result<BlockCount, Self::Error> {
                self.borrow_mut().num_blocks()
            }
        }
    };
}

forward_through_refcell!(RefCell<T>);
forward_through_refcell!(&RefCell<T>);
