//! # sdmmc-card
//!
//! > A SD/MMC/SDIO card layer written in Embedded Rust
//!
//! This crate brings up and drives eMMC devices and SDIO cards sitting behind
//! some SD host controller. It knows the command sequences, the card
//! registers and the bus configuration rules; the controller itself is
//! hidden behind the [`Host`](host::Host) trait, which your controller
//! driver implements. It is `#![no_std]` and does not use `alloc`.
//!
//! ## Using the crate
//!
//! You will need something that implements [`Host`](host::Host) and something
//! that implements `embedded_hal::blocking::delay::DelayMs<u32>`. The
//! resulting [`Card`](sdmmc::Card) implements [`BlockDevice`], so once it is
//! configured it can be handed to anything that reads and writes 512 byte
//! blocks.
//!
//! ```rust,ignore
//! use sdmmc_card::host::{BusVoltage, BusWidth, UhsMode};
//! use sdmmc_card::{Card, CardPowerPolicy, CardType};
//!
//! let mut card = Card::new(sdhc, delay);
//! card.find_card()?;
//! card.init(CardType::Emmc, None, CardPowerPolicy::SdhcOffAndCardSleep)?;
//! card.cfg_set(
//!     CardType::Emmc,
//!     BusWidth::Eight,
//!     48_000_000,
//!     BusVoltage::V1_8,
//!     UhsMode::Sdr50,
//! )?;
//! writeln!(uart, "Card: {:?}", card.get_info()).unwrap();
//!
//! let mut buf = [0u8; 1024];
//! card.block_read_sync(0, 2, &mut buf)?;
//!
//! // Before the system goes to sleep
//! card.pwrctrl_sleep()?;
//! // ...and after it comes back
//! card.pwrctrl_wakeup()?;
//! ```
//!
//! ## Features
//!
//! * `defmt-log`: By turning off the default features and enabling the `defmt-log` feature you can
//! configure this crate to log messages over defmt instead.
//! * `refcell-blockdevice`: `BlockDevice` implementations for `RefCell`s of block devices.
//!
//! Make sure that either the `log` feature or the `defmt-log` feature is enabled.

#![cfg_attr(not(test), no_std)]

// ****************************************************************************
//
// Imports
//
// ****************************************************************************

#[macro_use]
mod structure;

pub mod block_device;
pub mod calibrate;
pub mod host;
pub mod registers;
pub mod sdmmc;
pub mod sdmmc_proto;

pub use crate::block_device::{Block, BlockCount, BlockDevice, BlockIdx, MemoryBlockDevice};
pub use crate::calibrate::{emmc_calibrate, CalibrationParams};
pub use crate::host::{Host, HostError};
pub use crate::sdmmc::{
    Card, CardConfig, CardInfo, CardPower, CardPowerPolicy, CardState, CardType, EraseType,
    Error, PowerControlFn, PowerNotification,
};

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
