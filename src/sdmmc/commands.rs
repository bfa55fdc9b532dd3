//! sdmmc-card - Command builders
//!
//! One method per bus command. Each builds the argument, picks the response
//! type and records whatever the card tells us.

use embedded_hal::blocking::delay::DelayMs;

use super::{Card, CardState, Error};
use crate::host::{Command, DataDirection, DataTransfer, Host, Response, ResponseType};
use crate::registers::{Cid, Csd};
use crate::sdmmc_proto::*;

#[cfg(feature = "log")]
use log::{debug, trace};

#[cfg(feature = "defmt-log")]
use defmt::{debug, trace};

/// How many times the power-up commands are repeated.
pub(crate) const POWER_UP_ATTEMPTS: u32 = 100;

/// Run a command on the host, tagging any failure with the command index.
pub(crate) fn execute<H>(
    host: &mut H,
    cmd: &Command,
    data: Option<DataTransfer<'_>>,
) -> Result<Response, Error>
where
    H: Host,
{
    trace!("CMD{} arg {:x}", cmd.index, cmd.arg);
    host.execute_command(cmd, data).map_err(|e| {
        debug!("CMD{} failed: {:?}", cmd.index, e);
        Error::Command(cmd.index, e)
    })
}

impl<H, D> Card<H, D>
where
    H: Host,
    D: DelayMs<u32>,
{
    pub(crate) fn send(
        &mut self,
        cmd: Command,
        data: Option<DataTransfer<'_>>,
    ) -> Result<Response, Error> {
        execute(&mut self.host, &cmd, data)
    }

    /// Start a command whose completion arrives as a host event.
    pub(crate) fn send_async(
        &mut self,
        cmd: Command,
        data: Option<DataTransfer<'static>>,
    ) -> Result<(), Error> {
        trace!("CMD{} arg {:x} (async)", cmd.index, cmd.arg);
        self.host.start_command(&cmd, data).map_err(|e| {
            debug!("CMD{} failed to start: {:?}", cmd.index, e);
            Error::Command(cmd.index, e)
        })
    }

    /// GO_IDLE_STATE
    pub(crate) fn cmd0_go_idle(&mut self) -> Result<(), Error> {
        self.send(Command::new(CMD0, 0, ResponseType::None), None)?;
        self.props.state = CardState::Idle;
        Ok(())
    }

    /// SEND_OP_COND, repeated until the card reports power up is done.
    pub(crate) fn cmd1_send_op_cond(&mut self) -> Result<(), Error> {
        let mut arg = OCR_SECTOR_MODE;
        for attempt in 0..POWER_UP_ATTEMPTS {
            if let Ok(resp) = self.send(Command::new(CMD1, arg, ResponseType::R3), None) {
                let ocr = resp.word(0);
                arg |= ocr;
                if ocr & OCR_CARD_READY != 0 {
                    self.props.ocr = ocr;
                    self.props.state = CardState::Ready;
                    return Ok(());
                }
            }
            self.retry_delay(attempt);
        }
        debug!("CMD1 timed out");
        Err(Error::Timeout)
    }

    /// ALL_SEND_CID
    pub(crate) fn cmd2_send_cid(&mut self) -> Result<(), Error> {
        let resp = self.send(Command::new(CMD2, 0, ResponseType::R2), None)?;
        self.props.cid = Cid::from_words(resp.0);
        self.props.cid_valid = true;
        self.props.state = CardState::Ident;
        Ok(())
    }

    /// SET_RELATIVE_ADDR. An MMC takes the address we give it, SD and SDIO
    /// cards publish their own.
    pub(crate) fn cmd3_set_rca(&mut self, rca: u16) -> Result<(), Error> {
        let is_mmc = self.props.card_type.is_mmc();
        let (arg, response) = if is_mmc {
            (u32::from(rca) << 16, ResponseType::R1)
        } else {
            (0, ResponseType::R6)
        };
        let resp = self.send(Command::new(CMD3, arg, response), None)?;
        self.props.rca = if is_mmc {
            rca
        } else {
            (resp.word(0) >> 16) as u16
        };
        self.props.state = CardState::Standby;
        debug!("RCA is {:x}", self.props.rca);
        Ok(())
    }

    /// SLEEP_AWAKE. The card must be deselected first.
    pub(crate) fn cmd5_sleep_awake(&mut self, sleep: bool) -> Result<(), Error> {
        let arg = (u32::from(self.props.rca) << 16) | (u32::from(sleep) << 15);
        self.send(
            Command::new(CMD5, arg, ResponseType::R1b).with_busy_check(),
            None,
        )?;
        self.props.state = if sleep {
            CardState::Sleep
        } else {
            CardState::Standby
        };
        self.host.card_busy(20)?;
        Ok(())
    }

    /// SWITCH. Busy signalling only happens on MMC.
    pub(crate) fn cmd6_switch(&mut self, arg: u32, busy: bool) -> Result<(), Error> {
        let cmd = if busy {
            Command::new(CMD6, arg, ResponseType::R1b).with_busy_check()
        } else {
            Command::new(CMD6, arg, ResponseType::R1)
        };
        self.send(cmd, None)?;
        Ok(())
    }

    /// SELECT_CARD with our RCA.
    pub(crate) fn cmd7_select(&mut self) -> Result<(), Error> {
        self.cmd7_card_select(self.props.rca)
    }

    /// DESELECT_CARD, by selecting RCA 0.
    pub(crate) fn cmd7_deselect(&mut self) -> Result<(), Error> {
        self.cmd7_card_select(0)
    }

    fn cmd7_card_select(&mut self, rca: u16) -> Result<(), Error> {
        let response = if rca == 0 {
            ResponseType::None
        } else {
            ResponseType::R1
        };
        self.send(Command::new(CMD7, u32::from(rca) << 16, response), None)?;
        self.props.state = if rca == 0 {
            CardState::Standby
        } else {
            CardState::Transfer
        };
        Ok(())
    }

    /// SEND_EXT_CSD, into our cached copy.
    pub(crate) fn cmd8_send_ext_csd(&mut self) -> Result<(), Error> {
        let cmd = Command::new(CMD8, u32::from(self.props.rca) << 16, ResponseType::R1);
        execute(
            &mut self.host,
            &cmd,
            Some(DataTransfer::read(
                self.props.ext_csd.as_mut_bytes(),
                1,
                EXT_CSD_LEN as u32,
            )),
        )?;
        self.props.ext_csd_valid = true;
        Ok(())
    }

    /// SEND_CSD
    pub(crate) fn cmd9_send_csd(&mut self) -> Result<(), Error> {
        let arg = u32::from(self.props.rca) << 16;
        let resp = self.send(Command::new(CMD9, arg, ResponseType::R2), None)?;
        self.props.csd = Csd::from_words(resp.0);
        self.props.csd_valid = true;
        Ok(())
    }

    /// SEND_STATUS
    pub(crate) fn cmd13_send_status(&mut self) -> Result<u32, Error> {
        let arg = u32::from(self.props.rca) << 16;
        let resp = self.send(Command::new(CMD13, arg, ResponseType::R1), None)?;
        Ok(resp.word(0))
    }

    /// IO_SEND_OP_COND, repeated until the card reports it is ready.
    pub(crate) fn sdio_cmd5_send_op_cond(&mut self, ocr: u32) -> Result<u32, Error> {
        let arg = ocr & SDIO_OCR_MASK;
        for attempt in 0..POWER_UP_ATTEMPTS {
            if let Ok(resp) = self.send(Command::new(CMD5, arg, ResponseType::R4), None) {
                let ocr = resp.word(0);
                if ocr & OCR_CARD_READY != 0 {
                    self.props.ocr = ocr;
                    self.props.function_count = ((ocr >> SDIO_OCR_FUNCTION_SHIFT) & 0x7) as u8;
                    return Ok(ocr);
                }
            }
            self.retry_delay(attempt);
        }
        debug!("SDIO CMD5 timed out");
        Err(Error::Timeout)
    }

    /// SEND_IF_COND. The card must echo the check pattern back.
    pub(crate) fn sdio_cmd8_send_if_cond(&mut self, ocr: u32) -> Result<(), Error> {
        let high_voltage = u32::from(ocr & 0x00FF_8000 != 0);
        let arg = (high_voltage << 8) | IF_COND_CHECK_PATTERN;
        let resp = self.send(Command::new(CMD8, arg, ResponseType::R7), None)?;
        if resp.word(0) & 0xFF != IF_COND_CHECK_PATTERN {
            debug!("CMD8 check pattern mismatch: {:x}", resp.word(0));
            return Err(Error::InvalidResponse);
        }
        Ok(())
    }

    /// IO_RW_DIRECT. Returns the register contents; after a write that is
    /// the value read back.
    pub(crate) fn cmd52_io_rw_direct(
        &mut self,
        function: u8,
        address: u32,
        write: Option<u8>,
    ) -> Result<u8, Error> {
        let arg = io_rw_direct_arg(function, address, write);
        let resp = self.send(Command::new(CMD52, arg, ResponseType::R5), None)?;
        Ok((resp.word(0) & 0xFF) as u8)
    }

    /// IO_RW_EXTENDED, waiting for completion. A `block_count` of zero
    /// moves `block_size` bytes in byte mode.
    pub(crate) fn cmd53_io_rw_extended(
        &mut self,
        function: u8,
        address: u32,
        increment: bool,
        block_count: u32,
        data: DataTransfer<'_>,
    ) -> Result<(), Error> {
        let cmd = cmd53_command(function, address, increment, block_count, &data);
        self.send(cmd, Some(data))?;
        Ok(())
    }

    /// IO_RW_EXTENDED, returning once the transfer has started.
    pub(crate) fn cmd53_io_rw_extended_async(
        &mut self,
        function: u8,
        address: u32,
        increment: bool,
        block_count: u32,
        data: DataTransfer<'static>,
    ) -> Result<(), Error> {
        let cmd = cmd53_command(function, address, increment, block_count, &data);
        self.send_async(cmd.with_async(true), Some(data))
    }
}

fn cmd53_command(
    function: u8,
    address: u32,
    increment: bool,
    block_count: u32,
    data: &DataTransfer<'_>,
) -> Command {
    let arg = io_rw_extended_arg(
        function,
        address,
        block_count,
        data.block_size,
        increment,
        data.direction() == DataDirection::Write,
    );
    Command::new(CMD53, arg, ResponseType::R5)
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
