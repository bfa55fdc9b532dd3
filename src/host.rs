//! sdmmc-card - Host controller interface
//!
//! The card layer never touches a controller register. Everything it needs
//! from the SDHC/eMMC controller underneath goes through the [`Host`] trait,
//! which a controller driver implements.

/// The ways a host controller can fail a request.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum HostError {
    /// The card did not answer within the command timeout.
    Timeout,
    /// A response was expected but none arrived.
    NoResponse,
    /// The response CRC didn't match.
    Crc,
    /// The response carried the wrong command index.
    Index,
    /// The response end bit was not set.
    EndBit,
    /// The data phase failed (CRC, timeout or end bit).
    Data,
    /// The card kept DAT0 low for longer than allowed.
    Busy,
    /// The host cannot do what was asked.
    Unsupported,
    /// Any other controller failure.
    Failed,
}

/// Response formats from the SD/MMC/SDIO specifications.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ResponseType {
    None,
    R1,
    /// R1 followed by a busy signal on DAT0.
    R1b,
    /// 136-bit CID/CSD.
    R2,
    /// OCR, no CRC.
    R3,
    /// SDIO OCR.
    R4,
    /// SDIO register data.
    R5,
    /// Published RCA.
    R6,
    /// Interface condition.
    R7,
}

/// One command for the host to put on the bus.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Command {
    pub index: u8,
    pub arg: u32,
    pub response: ResponseType,
    /// Start the command and return; completion is reported as a
    /// [`HostEvent`].
    pub asynchronous: bool,
    /// Wait for the card to release DAT0 before completing.
    pub check_busy: bool,
    /// Let the controller issue CMD23 ahead of a multi-block transfer.
    pub auto_cmd23: bool,
}

impl Command {
    pub fn new(index: u8, arg: u32, response: ResponseType) -> Self {
        Command {
            index,
            arg,
            response,
            asynchronous: false,
            check_busy: false,
            auto_cmd23: false,
        }
    }

    pub fn with_busy_check(mut self) -> Self {
        self.check_busy = true;
        self
    }

    pub fn with_async(mut self, asynchronous: bool) -> Self {
        self.asynchronous = asynchronous;
        self
    }

    pub fn with_auto_cmd23(mut self, auto_cmd23: bool) -> Self {
        self.auto_cmd23 = auto_cmd23;
        self
    }
}

/// Direction of a data phase.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum DataDirection {
    Read,
    Write,
}

/// Where the data phase of a command goes to, or comes from.
#[derive(Debug)]
pub enum DataBuffer<'a> {
    Read(&'a mut [u8]),
    Write(&'a [u8]),
}

/// The data phase of a command.
#[derive(Debug)]
pub struct DataTransfer<'a> {
    pub buffer: DataBuffer<'a>,
    pub block_count: u32,
    pub block_size: u32,
}

impl<'a> DataTransfer<'a> {
    pub fn read(buffer: &'a mut [u8], block_count: u32, block_size: u32) -> Self {
        DataTransfer {
            buffer: DataBuffer::Read(buffer),
            block_count,
            block_size,
        }
    }

    pub fn write(buffer: &'a [u8], block_count: u32, block_size: u32) -> Self {
        DataTransfer {
            buffer: DataBuffer::Write(buffer),
            block_count,
            block_size,
        }
    }

    pub fn direction(&self) -> DataDirection {
        match self.buffer {
            DataBuffer::Read(_) => DataDirection::Read,
            DataBuffer::Write(_) => DataDirection::Write,
        }
    }
}

/// The response words of a completed command. Word 0 holds bits 31:0; for
/// R2 the four words hold the 128-bit register.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct Response(pub [u32; 4]);

impl Response {
    pub fn short(word: u32) -> Self {
        Response([word, 0, 0, 0])
    }

    pub fn word(&self, idx: usize) -> u32 {
        self.0[idx]
    }
}

/// Data bus width.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum BusWidth {
    One,
    Four,
    Eight,
}

/// Signalling voltage.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum BusVoltage {
    V1_8,
    V3_0,
    V3_3,
}

/// Ultra high speed bus modes.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum UhsMode {
    None,
    Sdr12,
    Sdr25,
    Sdr50,
    Sdr104,
    Ddr50,
}

/// How the host moves data.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum TransferMode {
    Pio,
    Sdma,
    Adma,
}

/// Output and input tap delays used to centre the sampling point.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct TxRxDelay {
    pub tx: u8,
    pub rx: u8,
}

/// What the host is currently set up to do.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct HostSettings {
    pub bus_width: BusWidth,
    pub bus_voltage: BusVoltage,
    pub clock: u32,
    pub min_clock: u32,
    pub max_clock: u32,
    pub uhs_mode: UhsMode,
    pub transfer_mode: TransferMode,
    /// Largest block count a single ADMA2 descriptor chain can move.
    pub max_adma2_blocks: u32,
    /// The card is soldered down, so card detect is meaningless.
    pub card_in_slot: bool,
}

/// Things the host reports outside of a synchronous call.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum HostEventKind {
    CardNotPresent,
    CardPresent,
    /// An asynchronous transfer finished.
    TransferComplete,
    /// An SDMA boundary was crossed.
    SdmaDone,
    DataError,
    CommandError,
    /// An SDIO function raised its interrupt.
    SdioInterrupt,
}

#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct HostEvent {
    pub kind: HostEventKind,
    /// Blocks moved by the transfer this event is about.
    pub block_count: u32,
    pub direction: Option<DataDirection>,
}

/// Called by the host, possibly from interrupt context.
pub type EventCallback = fn(&HostEvent);

/// A SD/MMC/SDIO host controller.
///
/// `execute_command` is the only way commands reach the card. A host must
/// hold off a command while the card is busy after an R1b response, either in
/// hardware or by polling.
pub trait Host {
    /// (Re-)initialise the controller.
    fn init(&mut self) -> Result<(), HostError>;
    /// Shut the controller down.
    fn deinit(&mut self) -> Result<(), HostError>;
    /// Gate the controller's power and clocks.
    fn power_control(&mut self, on: bool) -> Result<(), HostError>;

    /// Issue a command, run its data phase and wait for completion.
    fn execute_command(
        &mut self,
        cmd: &Command,
        data: Option<DataTransfer<'_>>,
    ) -> Result<Response, HostError>;

    /// Start a command and return once it is on its way. The outcome is
    /// reported through the registered event callback.
    fn start_command(
        &mut self,
        _cmd: &Command,
        _data: Option<DataTransfer<'static>>,
    ) -> Result<(), HostError> {
        Err(HostError::Unsupported)
    }

    /// Wait until the card releases DAT0.
    fn card_busy(&mut self, timeout_ms: u32) -> Result<(), HostError>;
    /// Is a card in the slot?
    fn card_detect(&mut self) -> bool;

    fn set_bus_width(&mut self, width: BusWidth) -> Result<(), HostError>;
    fn set_bus_voltage(&mut self, voltage: BusVoltage) -> Result<(), HostError>;
    fn set_bus_clock(&mut self, clock: u32) -> Result<(), HostError>;

    /// Hosts without UHS support can leave this alone.
    fn set_uhs_mode(&mut self, _mode: UhsMode) -> Result<(), HostError> {
        Ok(())
    }

    /// Apply tap delays. Only needed for calibration.
    fn set_txrx_delay(&mut self, _delay: TxRxDelay) -> Result<(), HostError> {
        Err(HostError::Unsupported)
    }

    fn register_event_callback(&mut self, callback: EventCallback);

    fn settings(&self) -> HostSettings;
}

impl<T> Host for &mut T
where
    T: Host,
{
    fn init(&mut self) -> Result<(), HostError> {
        (*self).init()
    }

    fn deinit(&mut self) -> Result<(), HostError> {
        (*self).deinit()
    }

    fn power_control(&mut self, on: bool) -> Result<(), HostError> {
        (*self).power_control(on)
    }

    fn execute_command(
        &mut self,
        cmd: &Command,
        data: Option<DataTransfer<'_>>,
    ) -> Result<Response, HostError> {
        (*self).execute_command(cmd, data)
    }

    fn start_command(
        &mut self,
        cmd: &Command,
        data: Option<DataTransfer<'static>>,
    ) -> Result<(), HostError> {
        (*self).start_command(cmd, data)
    }

    fn card_busy(&mut self, timeout_ms: u32) -> Result<(), HostError> {
        (*self).card_busy(timeout_ms)
    }

    fn card_detect(&mut self) -> bool {
        (*self).card_detect()
    }

    fn set_bus_width(&mut self, width: BusWidth) -> Result<(), HostError> {
        (*self).set_bus_width(width)
    }

    fn set_bus_voltage(&mut self, voltage: BusVoltage) -> Result<(), HostError> {
        (*self).set_bus_voltage(voltage)
    }

    fn set_bus_clock(&mut self, clock: u32) -> Result<(), HostError> {
        (*self).set_bus_clock(clock)
    }

    fn set_uhs_mode(&mut self, mode: UhsMode) -> Result<(), HostError> {
        (*self).set_uhs_mode(mode)
    }

    fn set_txrx_delay(&mut self, delay: TxRxDelay) -> Result<(), HostError> {
        (*self).set_txrx_delay(delay)
    }

    fn register_event_callback(&mut self, callback: EventCallback) {
        (*self).register_event_callback(callback)
    }

    fn settings(&self) -> HostSettings {
        (**self).settings()
    }
}
