//! sdmmc-card - Card layer
//!
//! Implements the SD/MMC/SDIO card state machine on top of some generic
//! [`Host`] controller.
//!
//! This is currently optimised for readability and debugability, not
//! performance.

mod block_io;
mod commands;
mod mmc;
mod sdio;

pub use block_io::EraseType;

use embedded_hal::blocking::delay::DelayMs;

use crate::host::{BusVoltage, BusWidth, EventCallback, Host, HostError, UhsMode};
use crate::registers::{Cccr, Cid, Cis, Csd, ExtCsd};
use crate::sdmmc_proto::*;

#[cfg(feature = "log")]
use log::{debug, trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, trace, warn};

/// The possible errors the card layer can generate.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Error {
    /// The host failed a request that wasn't a command
    Host(HostError),
    /// The host failed this command
    Command(u8, HostError),
    /// A parameter is out of the range this card or host accepts
    InvalidArg,
    /// Can't perform this operation with the card in this state
    InvalidOperation,
    /// The block range runs past the end of the card
    OutOfRange,
    /// The card didn't become ready in time
    Timeout,
    /// Couldn't find the card
    CardNotFound,
    /// This card type is not supported
    NotSupported,
    /// The card answered with something unexpected
    InvalidResponse,
    /// The card refused a CMD6 switch
    SwitchFailed,
    /// The SDIO CIS tuple chain never ended
    CisTooLong,
    /// No TX/RX delay setting worked reliably
    CalibrationFailed,
}

impl From<HostError> for Error {
    fn from(e: HostError) -> Self {
        Error::Host(e)
    }
}

/// The different types of card we know about.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum CardType {
    Unknown,
    Mmc,
    Emmc,
    Sdio,
    Sdsc,
    Sdhc,
    Combo,
}

impl CardType {
    fn is_mmc(self) -> bool {
        matches!(self, CardType::Mmc | CardType::Emmc)
    }
}

/// Where the card is in its life. `Idle` through `Sleep` are the card's own
/// CURRENT_STATE values (offset by two), the rest are tracked by us.
///
/// The order matters: a status query is allowed from `Standby` onwards.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, PartialOrd)]
pub enum CardState {
    NotPresent,
    Present,
    Idle,
    Ready,
    Ident,
    Standby,
    Transfer,
    Data,
    Receive,
    Program,
    Disconnect,
    BusTest,
    Sleep,
    Error,
    PowerOn,
    PowerOff,
}

impl CardState {
    /// Map the CURRENT_STATE field of a status word.
    fn from_current_state(value: u32) -> Option<CardState> {
        let state = match value {
            0 => CardState::Idle,
            1 => CardState::Ready,
            2 => CardState::Ident,
            3 => CardState::Standby,
            4 => CardState::Transfer,
            5 => CardState::Data,
            6 => CardState::Receive,
            7 => CardState::Program,
            8 => CardState::Disconnect,
            9 => CardState::BusTest,
            10 => CardState::Sleep,
            _ => return None,
        };
        Some(state)
    }
}

/// What the card power supply should do.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum CardPower {
    On,
    Off,
}

/// Switches the card's supply rail.
pub type PowerControlFn = fn(CardPower);

/// What `pwrctrl_sleep` and `pwrctrl_wakeup` do.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum CardPowerPolicy {
    /// Nothing.
    None,
    /// Put the card to sleep, cut its supply and shut the host down. Wakeup
    /// brings everything up from scratch.
    SdhcAndCardOff,
    /// Put the card to sleep and gate the host.
    SdhcOffAndCardSleep,
    /// Only gate the host.
    SdhcOff,
}

/// eMMC power notification levels (POWER_OFF_NOTIFICATION values).
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum PowerNotification {
    NoNotification = 0,
    PoweredOn = 1,
    PowerOffShort = 2,
    PowerOffLong = 3,
    SleepNotification = 4,
}

/// The bus setup requested for a card.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CardConfig {
    /// Data lines in use
    pub bus_width: BusWidth,
    /// Bus clock in Hz
    pub clock: u32,
    /// Signalling voltage
    pub io_voltage: BusVoltage,
    /// Timing mode, `UhsMode::None` for legacy and high speed timing
    pub uhs_mode: UhsMode,
}

impl Default for CardConfig {
    fn default() -> Self {
        CardConfig {
            bus_width: BusWidth::One,
            clock: 0,
            io_voltage: BusVoltage::V3_3,
            uhs_mode: UhsMode::None,
        }
    }
}

/// A summary of the card geometry.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CardInfo {
    pub card_type: CardType,
    /// Supported command classes, from the CSD
    pub cmd_class: u16,
    /// Relative card address
    pub rca: u16,
    /// The card size in `block_size` blocks.
    pub max_blocks: u32,
    /// Size in bytes of the blocks `block_*` calls address.
    pub block_size: u32,
    /// The card size in `logical_block_size` blocks.
    pub logical_max_blocks: u32,
    /// 512, unless the card works in native 4 KiB sectors.
    pub logical_block_size: u32,
}

/// Everything we know about the card. Reset to the default by `deinit`.
#[derive(Debug, Clone)]
struct Properties {
    card_type: CardType,
    state: CardState,
    rca: u16,
    ocr: u32,

    cid: Cid,
    cid_valid: bool,
    csd: Csd,
    csd_valid: bool,
    ext_csd: ExtCsd,
    ext_csd_valid: bool,

    high_capacity: bool,
    block_size: u32,
    native_block_size: u32,
    use_block_emulation: bool,
    max_blocks: u32,
    capacity: u64,
    cmd_class: u16,
    spec_version: u8,
    ext_csd_rev: u8,
    device_type: DeviceType,
    cache_size: u32,
    secure_erase: SecureFeatures,
    generic_cmd6_timeout_ms: u32,
    sleep_notification_timeout_ms: u32,
    power_off_long_timeout_ms: u32,
    power_off_notification: PowerNotification,

    function_count: u8,
    cccr: Cccr,
    cis: Cis,

    cfg: CardConfig,
    power_policy: CardPowerPolicy,
    power_fn: Option<PowerControlFn>,
}

impl Default for Properties {
    fn default() -> Self {
        Properties {
            card_type: CardType::Unknown,
            state: CardState::NotPresent,
            rca: 0,
            ocr: 0,
            cid: Cid::default(),
            cid_valid: false,
            csd: Csd::default(),
            csd_valid: false,
            ext_csd: ExtCsd::default(),
            ext_csd_valid: false,
            high_capacity: false,
            block_size: 0,
            native_block_size: 0,
            use_block_emulation: false,
            max_blocks: 0,
            capacity: 0,
            cmd_class: 0,
            spec_version: 0,
            ext_csd_rev: 0,
            device_type: DeviceType::empty(),
            cache_size: 0,
            secure_erase: SecureFeatures::empty(),
            generic_cmd6_timeout_ms: DEFAULT_CMD6_TIMEOUT_MS,
            sleep_notification_timeout_ms: 0,
            power_off_long_timeout_ms: 0,
            power_off_notification: PowerNotification::NoNotification,
            function_count: 0,
            cccr: Cccr::default(),
            cis: Cis::default(),
            cfg: CardConfig::default(),
            power_policy: CardPowerPolicy::None,
            power_fn: None,
        }
    }
}

/// One physical card (or soldered-down device) behind a host controller.
///
/// Built from the host and something that can wait in milliseconds, which
/// the retry loops of the initialisation sequence need.
pub struct Card<H, D>
where
    H: Host,
    D: DelayMs<u32>,
{
    host: H,
    delay: D,
    props: Properties,
}

impl<H, D> Card<H, D>
where
    H: Host,
    D: DelayMs<u32>,
{
    /// Create a card handle in the not-present state.
    pub fn new(host: H, delay: D) -> Self {
        Card {
            host,
            delay,
            props: Properties::default(),
        }
    }

    /// Give back the host and delay provider.
    pub fn release(self) -> (H, D) {
        (self.host, self.delay)
    }

    /// Access the host underneath.
    pub fn host(&mut self) -> &mut H {
        &mut self.host
    }

    /// Check the slot and take the host's current bus settings as the
    /// starting configuration.
    pub fn find_card(&mut self) -> Result<(), Error> {
        let settings = self.host.settings();
        if settings.card_in_slot || self.host.card_detect() {
            self.props.state = CardState::Present;
            self.props.cfg = CardConfig {
                bus_width: settings.bus_width,
                clock: settings.min_clock,
                io_voltage: settings.bus_voltage,
                uhs_mode: settings.uhs_mode,
            };
            self.props.state = CardState::PowerOff;
            debug!("Card found, host config: {:?}", self.props.cfg);
            Ok(())
        } else {
            self.props.state = CardState::NotPresent;
            debug!("No card present");
            Err(Error::CardNotFound)
        }
    }

    /// Bring the card from power-off to the transfer state.
    pub fn init(
        &mut self,
        card_type: CardType,
        power_fn: Option<PowerControlFn>,
        policy: CardPowerPolicy,
    ) -> Result<(), Error> {
        if self.props.state == CardState::PowerOff {
            if let Some(f) = power_fn {
                debug!("Turn on the card power supply");
                f(CardPower::On);
            }
        }

        self.props.power_fn = power_fn;
        self.props.state = CardState::PowerOn;
        self.props.power_policy = policy;
        self.props.card_type = card_type;

        debug!("Init card of type {:?}", card_type);
        match card_type {
            CardType::Unknown => self.type_detect(),
            CardType::Mmc | CardType::Emmc => self.mmc_init(),
            CardType::Sdio => self.sdio_init(),
            CardType::Sdsc | CardType::Sdhc | CardType::Combo => self.sd_init(),
        }
    }

    /// Forget everything about the card.
    pub fn deinit(&mut self) {
        self.props = Properties::default();
    }

    fn sd_init(&mut self) -> Result<(), Error> {
        warn!("Card type {:?} is not supported yet", self.props.card_type);
        Err(Error::NotSupported)
    }

    fn type_detect(&mut self) -> Result<(), Error> {
        warn!("Card type detection is not supported yet");
        Err(Error::NotSupported)
    }

    /// Set bus voltage, width, clock and UHS mode. The card must be in the
    /// transfer state.
    pub fn cfg_set(
        &mut self,
        card_type: CardType,
        bus_width: BusWidth,
        clock: u32,
        io_voltage: BusVoltage,
        uhs_mode: UhsMode,
    ) -> Result<(), Error> {
        if self.props.state != CardState::Transfer {
            return Err(Error::InvalidOperation);
        }

        self.props.card_type = card_type;
        self.props.cfg = CardConfig {
            bus_width,
            clock,
            io_voltage,
            uhs_mode,
        };

        self.set_voltage(io_voltage).map_err(|e| {
            debug!("Failed to change bus voltage: {:?}", e);
            e
        })?;

        let settings = self.host.settings();
        let outside_host_range = clock > settings.max_clock || clock < settings.min_clock;
        let ddr_too_fast = uhs_mode == UhsMode::Ddr50 && clock > MMC_HS_MAX_SPEED_LIMIT;

        match card_type {
            CardType::Emmc => {
                if outside_host_range
                    || ddr_too_fast
                    || (uhs_mode == UhsMode::None && clock > MMC_HS200_MAX_SPEED_LIMIT)
                    || (clock > MMC_LEGACY_HS && self.props.spec_version < 4)
                {
                    return Err(Error::InvalidArg);
                }

                if uhs_mode == UhsMode::Sdr104 {
                    self.mmc_set_bus_width(bus_width)?;
                    self.mmc_set_speed(clock)?;
                } else {
                    self.mmc_set_speed(clock)?;
                    self.mmc_set_bus_width(bus_width)?;
                }

                self.mmc_set_uhs_mode(uhs_mode).map_err(|e| {
                    debug!("Failed to change UHS mode: {:?}", e);
                    e
                })
            }
            CardType::Sdio => {
                if outside_host_range || ddr_too_fast || clock > MMC_HS200_MAX_SPEED_LIMIT {
                    return Err(Error::InvalidArg);
                }

                self.sdio_set_speed(clock)?;
                self.sdio_set_bus_width(bus_width)
            }
            _ => {
                debug!("Card type {:?} can't be configured", card_type);
                Err(Error::NotSupported)
            }
        }
    }

    fn set_voltage(&mut self, voltage: BusVoltage) -> Result<(), Error> {
        if voltage != self.host.settings().bus_voltage {
            self.host.set_bus_voltage(voltage)?;
        }
        Ok(())
    }

    /// Put the card and host into the low power state the power policy
    /// asks for.
    pub fn pwrctrl_sleep(&mut self) -> Result<(), Error> {
        match self.props.power_policy {
            CardPowerPolicy::SdhcAndCardOff => {
                self.prepare_for_sleep(PowerNotification::PowerOffLong)?;
                self.cmd7_deselect()?;
                self.cmd5_sleep_awake(true)?;

                if let Some(f) = self.props.power_fn {
                    f(CardPower::Off);
                }
                self.props.state = CardState::PowerOff;

                self.host.deinit()?;
            }
            CardPowerPolicy::SdhcOffAndCardSleep => {
                self.prepare_for_sleep(PowerNotification::SleepNotification)?;
                self.cmd7_deselect()?;
                self.cmd5_sleep_awake(true)?;
                self.host.power_control(false)?;
            }
            CardPowerPolicy::SdhcOff => {
                self.host.power_control(false)?;
            }
            CardPowerPolicy::None => {}
        }
        Ok(())
    }

    /// Flush the cache and warn the card, where it supports either.
    fn prepare_for_sleep(&mut self, notification: PowerNotification) -> Result<(), Error> {
        if self.props.cache_size > 0 {
            self.cache_off()?;
        }
        if self.props.ext_csd_rev >= EXT_CSD_REV_1_6 {
            self.power_notification(notification)?;
        }
        Ok(())
    }

    /// Undo `pwrctrl_sleep`.
    pub fn pwrctrl_wakeup(&mut self) -> Result<(), Error> {
        match self.props.power_policy {
            CardPowerPolicy::SdhcAndCardOff => {
                self.host.init()?;

                let (card_type, power_fn, policy) = (
                    self.props.card_type,
                    self.props.power_fn,
                    self.props.power_policy,
                );
                self.init(card_type, power_fn, policy).map_err(|e| {
                    debug!("Wakeup: card re-init failed: {:?}", e);
                    e
                })?;

                let cfg = self.props.cfg;
                self.cfg_set(
                    card_type,
                    cfg.bus_width,
                    cfg.clock,
                    cfg.io_voltage,
                    cfg.uhs_mode,
                )
                .map_err(|e| {
                    debug!("Wakeup: card reconfiguration failed: {:?}", e);
                    e
                })?;
            }
            CardPowerPolicy::SdhcOffAndCardSleep => {
                self.host.power_control(true)?;
                self.cmd5_sleep_awake(false)?;
                self.cmd7_select()?;
            }
            CardPowerPolicy::SdhcOff => {
                self.host.power_control(true)?;
            }
            CardPowerPolicy::None => {}
        }
        Ok(())
    }

    /// Read the card status word (CMD13).
    pub fn status(&mut self) -> Result<u32, Error> {
        if self.props.state < CardState::Standby {
            return Err(Error::InvalidOperation);
        }
        self.cmd13_send_status()
    }

    /// Ask the card which state it is in. Anything that can't be mapped,
    /// including a failed query, comes back as `CardState::Error`.
    pub fn state(&mut self) -> CardState {
        match self.status() {
            Ok(status) => match CardState::from_current_state(CardStatus::current_state(status)) {
                Some(state) => {
                    self.props.state = state;
                    state
                }
                None => CardState::Error,
            },
            Err(_) => CardState::Error,
        }
    }

    /// The state we last recorded, without talking to the card.
    pub fn cached_state(&self) -> CardState {
        self.props.state
    }

    /// Write an EXT_CSD byte with CMD6 and wait for the card to accept it.
    pub fn mode_switch(&mut self, arg: u32, timeout_ms: u32) -> Result<(), Error> {
        if self.props.state != CardState::Transfer {
            return Err(Error::InvalidOperation);
        }

        self.props.ext_csd_valid = false;

        let is_mmc = self.props.card_type.is_mmc();
        self.cmd6_switch(arg, is_mmc)?;
        if is_mmc {
            self.host.card_busy(10)?;
        }

        for _ in 0..=timeout_ms {
            if let Ok(raw) = self.cmd13_send_status() {
                let status = CardStatus::from_bits_truncate(raw);
                if status.contains(CardStatus::SWITCH_ERROR) {
                    debug!("Switch failed - arg is {:x}", arg);
                    return Err(Error::SwitchFailed);
                }
                if status.contains(CardStatus::READY_FOR_DATA) {
                    debug!("Switch succeeded - arg is {:x}", arg);
                    return Ok(());
                }
            }
            self.delay.delay_ms(1);
        }

        debug!("Switch timed out - arg is {:x}", arg);
        Err(Error::Timeout)
    }

    /// Route host events (transfer complete, errors, card insertion) to
    /// `callback`.
    pub fn register_event_callback(&mut self, callback: EventCallback) {
        self.host.register_event_callback(callback);
    }

    /// A bit field of the CID, if it has been read.
    pub fn get_cid_field(&self, offset: u16, size: u8) -> Option<u32> {
        if self.props.cid_valid {
            Some(self.props.cid.field(offset, size))
        } else {
            None
        }
    }

    /// A bit field of the CSD, if it has been read.
    pub fn get_csd_field(&self, offset: u16, size: u8) -> Option<u32> {
        if self.props.csd_valid {
            Some(self.props.csd.field(offset, size))
        } else {
            None
        }
    }

    /// A byte field of the EXT_CSD, reading it from the card again if our
    /// copy went stale.
    pub fn get_ext_csd_field(&mut self, offset: u16, size: u8) -> Result<u32, Error> {
        if !self.props.ext_csd_valid {
            self.cmd8_send_ext_csd()?;
        }
        Ok(self.props.ext_csd.field(offset, size))
    }

    /// Geometry and identity of the initialised card.
    pub fn get_info(&self) -> CardInfo {
        let p = &self.props;
        let (logical_max_blocks, logical_block_size) = if p.high_capacity {
            (p.max_blocks, p.block_size)
        } else {
            (p.max_blocks * (p.block_size / 512), 512)
        };
        CardInfo {
            card_type: p.card_type,
            cmd_class: p.cmd_class,
            rca: p.rca,
            max_blocks: p.max_blocks,
            block_size: p.block_size,
            logical_max_blocks,
            logical_block_size,
        }
    }

    pub fn card_type(&self) -> CardType {
        self.props.card_type
    }

    /// Relative card address assigned during init.
    pub fn rca(&self) -> u16 {
        self.props.rca
    }

    /// The last OCR (or SDIO OCR) the card answered with.
    pub fn ocr(&self) -> u32 {
        self.props.ocr
    }

    /// The bus setup last asked for.
    pub fn config(&self) -> CardConfig {
        self.props.cfg
    }

    /// The CID, if it has been read.
    pub fn cid(&self) -> Option<&Cid> {
        if self.props.cid_valid {
            Some(&self.props.cid)
        } else {
            None
        }
    }

    /// The CSD, if it has been read.
    pub fn csd(&self) -> Option<&Csd> {
        if self.props.csd_valid {
            Some(&self.props.csd)
        } else {
            None
        }
    }

    /// Our copy of the EXT_CSD. `None` after a CMD6 switch until it is
    /// read again.
    pub fn ext_csd(&self) -> Option<&ExtCsd> {
        if self.props.ext_csd_valid {
            Some(&self.props.ext_csd)
        } else {
            None
        }
    }

    /// High capacity cards are block addressed, others byte addressed.
    pub fn is_high_capacity(&self) -> bool {
        self.props.high_capacity
    }

    /// Capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.props.capacity
    }

    /// Sector size of the device in bytes, 512 or 4096.
    pub fn native_block_size(&self) -> u32 {
        self.props.native_block_size
    }

    /// Whether a 4 KiB sector device is presenting 512 byte blocks.
    pub fn uses_block_emulation(&self) -> bool {
        self.props.use_block_emulation
    }

    /// SPEC_VERS from the CSD.
    pub fn spec_version(&self) -> u8 {
        self.props.spec_version
    }

    /// EXT_CSD_REV, zero on cards without an EXT_CSD.
    pub fn ext_csd_rev(&self) -> u8 {
        self.props.ext_csd_rev
    }

    /// Volatile cache size in KiB. Zero if there is none.
    pub fn cache_size(&self) -> u32 {
        self.props.cache_size
    }

    /// Which secure erase and trim variants the card supports.
    pub fn secure_features(&self) -> SecureFeatures {
        self.props.secure_erase
    }

    /// The POWER_OFF_NOTIFICATION value last written.
    pub fn power_notification_state(&self) -> PowerNotification {
        self.props.power_off_notification
    }

    /// Switch timeout published by the card, or the default if it didn't.
    pub fn generic_cmd6_timeout_ms(&self) -> u32 {
        self.props.generic_cmd6_timeout_ms
    }

    /// Number of SDIO I/O functions, not counting function 0.
    pub fn sdio_function_count(&self) -> u8 {
        self.props.function_count
    }

    /// What the CCCR said at init.
    pub fn sdio_cccr(&self) -> &Cccr {
        &self.props.cccr
    }

    /// What the common CIS said at init.
    pub fn sdio_cis(&self) -> &Cis {
        &self.props.cis
    }

    fn retry_delay(&mut self, attempt: u32) {
        trace!("Retrying, attempt {}", attempt);
        self.delay.delay_ms(10);
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
