//! sdmmc-card - Useful macros for parsing SD/MMC structures.
//!
//! CID and CSD are 128-bit registers addressed by bit number, the EXT_CSD is
//! 512 bytes addressed by byte. Types using these macros provide a
//! `field(start, size)` method in the matching addressing scheme.

macro_rules! define_field {
    ($name:ident, bool, bits, $start:expr) => {
        doc_comment::doc_comment! {
            concat!(
                "Get the value of the ", stringify!($name), " bit (bit ", stringify!($start), ")"
            ),
            pub fn $name(&self) -> bool {
                self.field($start, 1) != 0
            }
        }
    };
    ($name:ident, $type:ty, bits, $start:expr, $size:expr) => {
        doc_comment::doc_comment! {
            concat!(
                "Get the value of the ", stringify!($name), " field (",
                stringify!($size), " bits from bit ", stringify!($start), ")"
            ),
            pub fn $name(&self) -> $type {
                self.field($start, $size) as $type
            }
        }
    };
    ($name:ident, $type:ty, bytes, $offset:expr, $size:expr) => {
        doc_comment::doc_comment! {
            concat!(
                "Get the value of the ", stringify!($name), " field (",
                stringify!($size), " bytes at offset ", stringify!($offset), ")"
            ),
            pub fn $name(&self) -> $type {
                self.field(u16::from($offset), $size) as $type
            }
        }
    };
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
