//! sdmmc-card - SDIO
//!
//! SDIO bring-up, the common register area (CCCR and CIS) and the per
//! function controls. Function 0 is the common I/O area; functions
//! `1..=function_count` are the card's own.

use embedded_hal::blocking::delay::DelayMs;

use super::commands::POWER_UP_ATTEMPTS;
use super::{Card, Error};
use crate::host::{BusWidth, DataTransfer, Host};
use crate::registers::{Cccr, Cis};
use crate::sdmmc_proto::*;

#[cfg(feature = "log")]
use log::{debug, trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, trace, warn};

/// The common I/O area.
const FUNCTION_0: u8 = 0;

impl<H, D> Card<H, D>
where
    H: Host,
    D: DelayMs<u32>,
{
    pub(crate) fn sdio_init(&mut self) -> Result<(), Error> {
        self.cmd0_go_idle()?;

        if let Err(e) = self.sdio_cmd8_send_if_cond(OCR_VDD_18_19 | OCR_VDD_17_18) {
            warn!("SDIO CMD8 failed, carrying on: {:?}", e);
        }

        let ocr = self.sdio_cmd5_send_op_cond(0)?;
        self.sdio_cmd5_send_op_cond(ocr)?;
        self.cmd3_set_rca(0)?;
        self.cmd7_select()?;

        self.sdio_read_cccr()?;
        self.sdio_read_cis()?;

        debug!(
            "SDIO ready: {} functions, vendor {:x} device {:x}",
            self.props.function_count, self.props.cis.vendor, self.props.cis.device
        );
        Ok(())
    }

    fn sdio_read_cccr(&mut self) -> Result<(), Error> {
        let cccr_rev = self.cmd52_io_rw_direct(FUNCTION_0, SDIO_CCCR_CCCR_REV, None)?;
        let sd_rev = self.cmd52_io_rw_direct(FUNCTION_0, SDIO_CCCR_SD_REV, None)?;
        let capability = CccrCapability::from_bits_truncate(self.cmd52_io_rw_direct(
            FUNCTION_0,
            SDIO_CCCR_CARD_CAPABILITY,
            None,
        )?);
        let power = self.cmd52_io_rw_direct(FUNCTION_0, SDIO_CCCR_POWER_CONTROL, None)?;
        let speed = self.cmd52_io_rw_direct(FUNCTION_0, SDIO_CCCR_BUS_SPEED_SELECT, None)?;

        let cccr = Cccr {
            cccr_rev: cccr_rev & 0x0F,
            sd_rev: sd_rev & 0x0F,
            multi_block: capability.contains(CccrCapability::SMB),
            low_speed: capability.contains(CccrCapability::LSC),
            wide_bus: capability.contains(CccrCapability::S4BLS),
            high_power: power & SDIO_POWER_SMPC != 0,
            high_speed: speed & SDIO_SPEED_SHS != 0,
        };
        debug!("SDIO CCCR: {:?}", cccr);
        self.props.cccr = cccr;
        Ok(())
    }

    /// Walk the common CIS for the manufacturer and function extension
    /// tuples.
    fn sdio_read_cis(&mut self) -> Result<(), Error> {
        let mut addr = 0u32;
        for i in 0..3 {
            let byte = self.cmd52_io_rw_direct(FUNCTION_0, SDIO_CCCR_CIS_PTR + i, None)?;
            addr |= u32::from(byte) << (i * 8);
        }
        trace!("CIS at {:x}", addr);

        let mut cis = Cis::default();
        for _ in 0..SDIO_CIS_MAX_TUPLES {
            let code = self.cmd52_io_rw_direct(FUNCTION_0, addr, None)?;
            if code == SDIO_CIS_TPL_NULL || code == SDIO_CIS_TPL_END {
                debug!("SDIO CIS: {:?}", cis);
                self.props.cis = cis;
                return Ok(());
            }

            addr += 1;
            let link = self.cmd52_io_rw_direct(FUNCTION_0, addr, None)?;
            let body = addr;

            match code {
                SDIO_CIS_TPL_MANFID => {
                    let mut data = [0u8; 4];
                    self.sdio_read_bytes(FUNCTION_0, body + 1, &mut data)?;
                    cis.vendor = u16::from_le_bytes([data[0], data[1]]);
                    cis.device = u16::from_le_bytes([data[2], data[3]]);
                }
                SDIO_CIS_TPL_FUNCE => {
                    // Skip TPLFE_TYPE
                    let mut data = [0u8; 3];
                    self.sdio_read_bytes(FUNCTION_0, body + 2, &mut data)?;
                    cis.block_size = u16::from_le_bytes([data[0], data[1]]);
                    cis.max_speed = data[2];
                }
                _ => {
                    trace!("Skipping CIS tuple {:x}", code);
                }
            }

            addr = body + u32::from(link) + 1;
        }

        debug!("SDIO CIS chain didn't end");
        self.props.cis = cis;
        Err(Error::CisTooLong)
    }

    fn sdio_read_bytes(&mut self, function: u8, addr: u32, data: &mut [u8]) -> Result<(), Error> {
        for (offset, byte) in (0u32..).zip(data.iter_mut()) {
            *byte = self.cmd52_io_rw_direct(function, addr + offset, None)?;
        }
        Ok(())
    }

    pub(crate) fn sdio_set_bus_width(&mut self, width: BusWidth) -> Result<(), Error> {
        let value = match width {
            BusWidth::One => SDIO_BUS_WIDTH_1,
            BusWidth::Four => SDIO_BUS_WIDTH_4,
            BusWidth::Eight => {
                debug!("8 bit width is not supported for SDIO");
                return Err(Error::InvalidOperation);
            }
        };
        self.cmd52_io_rw_direct(FUNCTION_0, SDIO_CCCR_BUS_CONTROL, Some(value))?;
        self.host.set_bus_width(width)?;
        debug!("SDIO bus width set to {:?}", width);
        Ok(())
    }

    pub(crate) fn sdio_set_speed(&mut self, clock: u32) -> Result<(), Error> {
        if clock > SDIO_CARD_MAX_SPEED_LIMIT {
            debug!("SDIO clock {} out of range", clock);
            return Err(Error::OutOfRange);
        }

        if clock > SDIO_CARD_FULL_SPEED_LIMIT {
            let speed = self.cmd52_io_rw_direct(FUNCTION_0, SDIO_CCCR_BUS_SPEED_SELECT, None)?;
            if speed & SDIO_SPEED_SHS == 0 {
                debug!("This SDIO card does not support high speed");
                return Err(Error::InvalidOperation);
            }
            self.cmd52_io_rw_direct(FUNCTION_0, SDIO_CCCR_BUS_SPEED_SELECT, Some(SDIO_SPEED_EHS))?;
            let speed = self.cmd52_io_rw_direct(FUNCTION_0, SDIO_CCCR_BUS_SPEED_SELECT, None)?;
            if speed & SDIO_SPEED_EHS == 0 {
                debug!("SDIO high speed check failed");
                return Err(Error::SwitchFailed);
            }
        } else {
            self.cmd52_io_rw_direct(FUNCTION_0, SDIO_CCCR_BUS_SPEED_SELECT, Some(0))?;
            let speed = self.cmd52_io_rw_direct(FUNCTION_0, SDIO_CCCR_BUS_SPEED_SELECT, None)?;
            if speed & SDIO_SPEED_EHS != 0 {
                debug!("SDIO full speed check failed");
                return Err(Error::SwitchFailed);
            }
        }

        self.host.set_bus_clock(clock)?;
        debug!("SDIO bus clock set to {}", clock);
        Ok(())
    }

    /// Check `function` is one of the card's I/O functions.
    fn sdio_check_function(&self, function: u8) -> Result<(), Error> {
        if function == 0 || function > self.props.function_count {
            return Err(Error::InvalidArg);
        }
        Ok(())
    }

    /// Read one byte of a function's register space with CMD52.
    pub fn sdio_byte_read(&mut self, function: u8, addr: u32) -> Result<u8, Error> {
        check_target(function, addr)?;
        self.cmd52_io_rw_direct(function, addr, None)
    }

    /// Write one byte of a function's register space with CMD52.
    pub fn sdio_byte_write(&mut self, function: u8, addr: u32, data: u8) -> Result<(), Error> {
        check_target(function, addr)?;
        self.cmd52_io_rw_direct(function, addr, Some(data))?;
        Ok(())
    }

    /// Read with CMD53. A `block_count` of zero reads `block_size` bytes in
    /// byte mode.
    pub fn sdio_multi_bytes_read_sync(
        &mut self,
        function: u8,
        addr: u32,
        buf: &mut [u8],
        block_count: u32,
        block_size: u32,
        increment: bool,
    ) -> Result<(), Error> {
        check_target(function, addr)?;
        check_buffer(buf.len(), block_count, block_size)?;
        let data = DataTransfer::read(buf, block_count.max(1), block_size);
        self.cmd53_io_rw_extended(function, addr, increment, block_count, data)
    }

    /// Write with CMD53. A `block_count` of zero writes `block_size` bytes
    /// in byte mode.
    pub fn sdio_multi_bytes_write_sync(
        &mut self,
        function: u8,
        addr: u32,
        buf: &[u8],
        block_count: u32,
        block_size: u32,
        increment: bool,
    ) -> Result<(), Error> {
        check_target(function, addr)?;
        check_buffer(buf.len(), block_count, block_size)?;
        let data = DataTransfer::write(buf, block_count.max(1), block_size);
        self.cmd53_io_rw_extended(function, addr, increment, block_count, data)
    }

    /// Start a CMD53 read. Completion is reported through the event
    /// callback.
    pub fn sdio_multi_bytes_read_async(
        &mut self,
        function: u8,
        addr: u32,
        buf: &'static mut [u8],
        block_count: u32,
        block_size: u32,
        increment: bool,
    ) -> Result<(), Error> {
        check_target(function, addr)?;
        check_buffer(buf.len(), block_count, block_size)?;
        let data = DataTransfer::read(buf, block_count.max(1), block_size);
        self.cmd53_io_rw_extended_async(function, addr, increment, block_count, data)
    }

    /// Start a CMD53 write. Completion is reported through the event
    /// callback.
    pub fn sdio_multi_bytes_write_async(
        &mut self,
        function: u8,
        addr: u32,
        buf: &'static [u8],
        block_count: u32,
        block_size: u32,
        increment: bool,
    ) -> Result<(), Error> {
        check_target(function, addr)?;
        check_buffer(buf.len(), block_count, block_size)?;
        let data = DataTransfer::write(buf, block_count.max(1), block_size);
        self.cmd53_io_rw_extended_async(function, addr, increment, block_count, data)
    }

    /// Enable an I/O function and wait for it to report ready.
    pub fn sdio_func_enable(&mut self, function: u8) -> Result<(), Error> {
        self.sdio_check_function(function)?;

        let bit = 1u8 << function;
        let enabled = self.cmd52_io_rw_direct(FUNCTION_0, SDIO_CCCR_IO_ENABLE, None)?;
        self.cmd52_io_rw_direct(FUNCTION_0, SDIO_CCCR_IO_ENABLE, Some(enabled | bit))?;

        for attempt in 0..POWER_UP_ATTEMPTS {
            let ready = self.cmd52_io_rw_direct(FUNCTION_0, SDIO_CCCR_IO_READY, None)?;
            if ready & bit != 0 {
                debug!("SDIO function {} enabled", function);
                return Ok(());
            }
            self.retry_delay(attempt);
        }

        debug!("SDIO function {} never became ready", function);
        Err(Error::Timeout)
    }

    pub fn sdio_func_disable(&mut self, function: u8) -> Result<(), Error> {
        self.sdio_check_function(function)?;
        let enabled = self.cmd52_io_rw_direct(FUNCTION_0, SDIO_CCCR_IO_ENABLE, None)?;
        self.cmd52_io_rw_direct(
            FUNCTION_0,
            SDIO_CCCR_IO_ENABLE,
            Some(enabled & !(1u8 << function)),
        )?;
        Ok(())
    }

    /// Let a function interrupt the host. Also sets the master enable.
    pub fn sdio_func_interrupt_enable(&mut self, function: u8) -> Result<(), Error> {
        self.sdio_check_function(function)?;
        let enabled = self.cmd52_io_rw_direct(FUNCTION_0, SDIO_CCCR_INT_ENABLE, None)?;
        self.cmd52_io_rw_direct(
            FUNCTION_0,
            SDIO_CCCR_INT_ENABLE,
            Some(enabled | (1u8 << function) | SDIO_INT_ENABLE_MASTER),
        )?;
        Ok(())
    }

    pub fn sdio_func_interrupt_disable(&mut self, function: u8) -> Result<(), Error> {
        self.sdio_check_function(function)?;
        let enabled = self.cmd52_io_rw_direct(FUNCTION_0, SDIO_CCCR_INT_ENABLE, None)?;
        self.cmd52_io_rw_direct(
            FUNCTION_0,
            SDIO_CCCR_INT_ENABLE,
            Some(enabled & !(1u8 << function)),
        )?;
        Ok(())
    }

    /// The CMD53 block size of a function, from its FBR. Function 0 is
    /// allowed.
    pub fn sdio_get_block_size(&mut self, function: u8) -> Result<u16, Error> {
        if function > self.props.function_count {
            return Err(Error::InvalidArg);
        }
        let fbr = u32::from(function) << SDIO_FBR_SHIFT;
        let low = self.cmd52_io_rw_direct(FUNCTION_0, fbr + SDIO_FBR_BLOCK_SIZE_LOW, None)?;
        let high = self.cmd52_io_rw_direct(FUNCTION_0, fbr + SDIO_FBR_BLOCK_SIZE_HIGH, None)?;
        Ok(u16::from_le_bytes([low, high]))
    }

    pub fn sdio_set_block_size(&mut self, function: u8, block_size: u16) -> Result<(), Error> {
        if function > self.props.function_count {
            return Err(Error::InvalidArg);
        }
        let fbr = u32::from(function) << SDIO_FBR_SHIFT;
        let [low, high] = block_size.to_le_bytes();
        self.cmd52_io_rw_direct(FUNCTION_0, fbr + SDIO_FBR_BLOCK_SIZE_LOW, Some(low))?;
        self.cmd52_io_rw_direct(FUNCTION_0, fbr + SDIO_FBR_BLOCK_SIZE_HIGH, Some(high))?;
        debug!("SDIO function {} block size {}", function, block_size);
        Ok(())
    }
}

/// `function` and `addr` must fit their CMD52/CMD53 argument fields.
fn check_target(function: u8, addr: u32) -> Result<(), Error> {
    if function > SDIO_MAX_FUNCTION || addr > SDIO_MAX_ADDRESS {
        return Err(Error::InvalidArg);
    }
    Ok(())
}

/// The count must fit the CMD53 argument and the buffer must hold the whole
/// transfer. Byte mode moves at most 512 bytes.
fn check_buffer(len: usize, block_count: u32, block_size: u32) -> Result<(), Error> {
    if block_count > SDIO_MAX_COUNT || (block_count == 0 && block_size > 512) {
        return Err(Error::InvalidArg);
    }
    let needed = u64::from(block_count.max(1)) * u64::from(block_size);
    if (len as u64) < needed {
        return Err(Error::InvalidArg);
    }
    Ok(())
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
