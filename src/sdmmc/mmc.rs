//! sdmmc-card - MMC and eMMC
//!
//! Bring-up and bus configuration for MMC-class devices. Everything past
//! the identification phase goes through CMD6 writes of the EXT_CSD.

use embedded_hal::blocking::delay::DelayMs;

use super::{Card, Error, PowerNotification};
use crate::host::{BusWidth, Host, UhsMode};
use crate::sdmmc_proto::*;

#[cfg(feature = "log")]
use log::{debug, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, warn};

/// The RCA we assign to an MMC.
const MMC_RCA: u16 = 1;

impl<H, D> Card<H, D>
where
    H: Host,
    D: DelayMs<u32>,
{
    pub(crate) fn mmc_init(&mut self) -> Result<(), Error> {
        self.cmd0_go_idle()?;
        self.cmd1_send_op_cond()?;
        self.cmd2_send_cid()?;
        self.cmd3_set_rca(MMC_RCA)?;
        self.cmd9_send_csd()?;
        self.cmd7_select()?;
        self.cmd8_send_ext_csd()?;

        self.parse_registers();

        if let Err(e) = self.cache_on() {
            debug!("Cache not enabled: {:?}", e);
        }

        self.props.power_off_notification = PowerNotification::NoNotification;
        if let Err(e) = self.power_notification(PowerNotification::PoweredOn) {
            debug!("Power off notification not enabled: {:?}", e);
        }

        debug!(
            "MMC ready: {} blocks of {} bytes, high capacity {}",
            self.props.max_blocks, self.props.block_size, self.props.high_capacity
        );
        Ok(())
    }

    /// Work out the card geometry and feature set from the CSD and EXT_CSD.
    fn parse_registers(&mut self) {
        let csd = self.props.csd;
        let p = &mut self.props;

        p.high_capacity = csd.device_size() == CSD_C_SIZE_HIGH_CAPACITY;
        p.cmd_class = csd.command_classes();
        p.spec_version = csd.spec_version();

        let ext_csd = &p.ext_csd;
        p.ext_csd_rev = ext_csd.rev();
        p.device_type = DeviceType::from_bits_truncate(ext_csd.device_type());
        p.cache_size = ext_csd.cache_size();
        p.secure_erase = SecureFeatures::from_bits_truncate(ext_csd.sec_feature_support());
        p.generic_cmd6_timeout_ms = DEFAULT_CMD6_TIMEOUT_MS;
        if p.ext_csd_rev >= EXT_CSD_REV_1_6 {
            p.sleep_notification_timeout_ms = u32::from(ext_csd.sleep_notification_time()) * 10;
            p.power_off_long_timeout_ms = u32::from(ext_csd.power_off_long_time()) * 10;
            p.generic_cmd6_timeout_ms = u32::from(ext_csd.generic_cmd6_time()) * 10;
        }

        if p.high_capacity {
            p.block_size = if ext_csd.data_sector_size() != 0 {
                4096
            } else {
                512
            };
            p.use_block_emulation = ext_csd.use_native_sector() == 0;
            p.native_block_size = if ext_csd.native_sector_size() != 0 {
                4096
            } else {
                512
            };
            p.max_blocks = ext_csd.sec_count();
        } else {
            p.block_size = csd.block_len();
            p.native_block_size = p.block_size;
            p.use_block_emulation = false;
            p.max_blocks = csd.block_count();
        }
        p.capacity = u64::from(p.max_blocks) * u64::from(p.block_size);
    }

    fn cache_ctrl(&mut self, enable: bool) -> Result<(), Error> {
        if self.props.cache_size == 0 {
            return Err(Error::InvalidOperation);
        }
        let arg = switch_arg(SwitchAccess::WriteByte, EXT_CSD_CACHE_CTRL, u8::from(enable));
        self.mode_switch(arg, DEFAULT_CMD6_TIMEOUT_MS)
    }

    pub(crate) fn cache_on(&mut self) -> Result<(), Error> {
        self.cache_ctrl(true)
    }

    pub(crate) fn cache_off(&mut self) -> Result<(), Error> {
        self.cache_ctrl(false)
    }

    /// Tell the card what is about to happen to its supply.
    pub(crate) fn power_notification(&mut self, kind: PowerNotification) -> Result<(), Error> {
        if self.props.ext_csd_rev < EXT_CSD_REV_1_6 {
            debug!("EXT_CSD rev {} has no power notification", self.props.ext_csd_rev);
            return Err(Error::InvalidOperation);
        }

        let timeout_ms = match kind {
            PowerNotification::PowerOffLong => self.props.power_off_long_timeout_ms,
            PowerNotification::SleepNotification => self.props.sleep_notification_timeout_ms,
            PowerNotification::PoweredOn => DEFAULT_CMD6_TIMEOUT_MS,
            _ => {
                debug!("Unknown notification type {:?}", kind);
                return Err(Error::InvalidArg);
            }
        };

        let arg = switch_arg(
            SwitchAccess::WriteByte,
            EXT_CSD_POWER_OFF_NOTIFICATION,
            kind as u8,
        );
        self.mode_switch(arg, timeout_ms)?;
        self.props.power_off_notification = kind;
        Ok(())
    }

    pub(crate) fn mmc_set_bus_width(&mut self, width: BusWidth) -> Result<(), Error> {
        let settings = self.host.settings();
        if width == settings.bus_width && settings.uhs_mode == self.props.cfg.uhs_mode {
            return Ok(());
        }

        let ddr = self.props.cfg.uhs_mode == UhsMode::Ddr50;
        let value = match (width, ddr) {
            (BusWidth::One, _) => EXT_CSD_BUS_WIDTH_1,
            (BusWidth::Four, false) => EXT_CSD_BUS_WIDTH_4,
            (BusWidth::Four, true) => EXT_CSD_BUS_WIDTH_4_DDR,
            (BusWidth::Eight, false) => EXT_CSD_BUS_WIDTH_8,
            (BusWidth::Eight, true) => EXT_CSD_BUS_WIDTH_8_DDR,
        };

        let arg = switch_arg(SwitchAccess::WriteByte, EXT_CSD_BUS_WIDTH, value);
        self.mode_switch(arg, DEFAULT_CMD6_TIMEOUT_MS)?;
        self.host.set_bus_width(width)?;
        debug!("Bus width set to {:?}", width);
        Ok(())
    }

    pub(crate) fn mmc_set_speed(&mut self, clock: u32) -> Result<(), Error> {
        let timing = if self.props.cfg.uhs_mode == UhsMode::Sdr104
            && clock > MMC_HS_MAX_SPEED_LIMIT
            && clock <= MMC_HS200_MAX_SPEED_LIMIT
        {
            EXT_CSD_TIMING_HS200
        } else {
            EXT_CSD_TIMING_HS
        };

        if self.props.spec_version >= 4
            && clock >= MMC_LEGACY_HS
            && self.props.ext_csd.hs_timing() != timing
        {
            let arg = switch_arg(SwitchAccess::WriteByte, EXT_CSD_HS_TIMING, timing);
            self.mode_switch(arg, DEFAULT_CMD6_TIMEOUT_MS)?;

            // Read it back to be sure the card took it
            self.cmd8_send_ext_csd()?;
            if self.props.ext_csd.hs_timing() != timing {
                warn!("Failed to switch to HS_TIMING {}", timing);
                return Err(Error::SwitchFailed);
            }
        }

        self.host.set_bus_clock(clock)?;
        debug!("Bus clock set to {}", clock);
        Ok(())
    }

    pub(crate) fn mmc_set_uhs_mode(&mut self, mode: UhsMode) -> Result<(), Error> {
        if self.host.settings().uhs_mode == mode {
            return Ok(());
        }

        let is_mmc = self.props.card_type.is_mmc();
        let mode = match (mode, is_mmc) {
            (UhsMode::Ddr50, true) => {
                if !self
                    .props
                    .device_type
                    .contains(DeviceType::HS_DDR_52MHZ_18_3V)
                {
                    debug!("Card does not support DDR52");
                    return Err(Error::NotSupported);
                }
                UhsMode::Ddr50
            }
            (_, true) => UhsMode::None,
            (mode, false) => mode,
        };

        self.host.set_uhs_mode(mode)?;
        Ok(())
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
