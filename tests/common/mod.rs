//! A simulated SD host controller with an eMMC or an SDIO card behind it.

#![allow(dead_code)]

use std::collections::HashMap;

use embedded_hal::blocking::delay::DelayMs;
use hex_literal::hex;
use sdmmc_card::host::{
    BusVoltage, BusWidth, Command, DataBuffer, DataTransfer, EventCallback, Host, HostError,
    HostEvent, HostEventKind, HostSettings, Response, TransferMode, TxRxDelay, UhsMode,
};
use sdmmc_card::registers::{Cid, Csd};
use sdmmc_card::sdmmc_proto::*;
use sdmmc_card::{BlockCount, BlockIdx, MemoryBlockDevice};

/// A Samsung-style 8 GB eMMC CSD: SPEC_VERS 4, C_SIZE 0xFFF.
pub const EMMC_CSD: [u8; 16] = hex!("D0 27 01 32 0F 59 03 FF F6 DB FF EF 8E 40 40 00");
pub const EMMC_CID: [u8; 16] = hex!("15 01 00 38 47 4E 44 33 52 01 12 34 56 78 A5 00");

/// SEC_COUNT of the simulated eMMC.
pub const EMMC_BLOCKS: u32 = 4096;

/// Where the simulated SDIO card keeps its common CIS.
pub const SDIO_CIS_ADDR: u32 = 0x1000;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Default)]
pub struct CountingDelay {
    pub calls: u32,
    pub total_ms: u32,
}

impl DelayMs<u32> for CountingDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.calls += 1;
        self.total_ms += ms;
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum SimKind {
    Emmc,
    Sdio,
}

pub struct SimHost {
    pub kind: SimKind,
    pub settings: HostSettings,
    pub present: bool,
    pub powered: bool,
    pub init_count: u32,
    pub deinit_count: u32,
    pub commands: Vec<Command>,
    pub async_commands: Vec<Command>,
    pub busy_waits: Vec<u32>,
    pub callback: Option<EventCallback>,
    pub fail_command: Option<(u8, HostError)>,
    pub txrx_delay: Option<TxRxDelay>,
    /// When set, reads return corrupted data unless this accepts the
    /// current tap delays.
    pub good_delay: Option<fn(TxRxDelay) -> bool>,

    pub state: u32,
    pub rca: u16,
    pub polls_until_ready: u32,
    pub polls: u32,
    pub cid: [u32; 4],
    pub csd: [u32; 4],
    pub ext_csd: [u8; 512],
    pub storage: Vec<u8>,
    pub high_capacity: bool,
    pub reject_switch_index: Option<u8>,
    pub never_ready_for_data: bool,
    pub pending_switch_error: bool,
    pub erase_range: (u32, u32),

    pub sdio_regs: HashMap<(u8, u32), u8>,
    pub sdio_functions: u8,
    pub sdio_if_cond_echo: bool,
    pub sdio_never_ready: bool,
}

fn default_settings() -> HostSettings {
    HostSettings {
        bus_width: BusWidth::One,
        bus_voltage: BusVoltage::V3_3,
        clock: 400_000,
        min_clock: 400_000,
        max_clock: 96_000_000,
        uhs_mode: UhsMode::None,
        transfer_mode: TransferMode::Sdma,
        max_adma2_blocks: 64,
        card_in_slot: true,
    }
}

fn emmc_ext_csd() -> [u8; 512] {
    let mut ext_csd = [0u8; 512];
    ext_csd[EXT_CSD_REV as usize] = 8;
    ext_csd[EXT_CSD_DEVICE_TYPE as usize] = 0x57;
    ext_csd[EXT_CSD_SEC_COUNT as usize..EXT_CSD_SEC_COUNT as usize + 4]
        .copy_from_slice(&EMMC_BLOCKS.to_le_bytes());
    ext_csd[EXT_CSD_SLEEP_NOTIFICATION_TIME as usize] = 0x0A;
    ext_csd[EXT_CSD_SEC_FEATURE_SUPPORT as usize] = 0x15;
    ext_csd[EXT_CSD_POWER_OFF_LONG_TIME as usize] = 0x3C;
    ext_csd[EXT_CSD_GENERIC_CMD6_TIME as usize] = 0x19;
    ext_csd[EXT_CSD_CACHE_SIZE as usize..EXT_CSD_CACHE_SIZE as usize + 4]
        .copy_from_slice(&0x100u32.to_le_bytes());
    ext_csd
}

/// Set a bit field in a register held as four words, least significant
/// first.
pub fn set_bits(words: &mut [u32; 4], start: u32, size: u32, value: u32) {
    for bit in 0..size {
        let pos = start + bit;
        let word = &mut words[(pos / 32) as usize];
        if value & (1 << bit) != 0 {
            *word |= 1 << (pos % 32);
        } else {
            *word &= !(1 << (pos % 32));
        }
    }
}

impl SimHost {
    fn new(kind: SimKind) -> Self {
        SimHost {
            kind,
            settings: default_settings(),
            present: true,
            powered: true,
            init_count: 0,
            deinit_count: 0,
            commands: Vec::new(),
            async_commands: Vec::new(),
            busy_waits: Vec::new(),
            callback: None,
            fail_command: None,
            txrx_delay: None,
            good_delay: None,
            state: 0,
            rca: 0,
            polls_until_ready: 2,
            polls: 0,
            cid: [0; 4],
            csd: [0; 4],
            ext_csd: [0; 512],
            storage: Vec::new(),
            high_capacity: false,
            reject_switch_index: None,
            never_ready_for_data: false,
            pending_switch_error: false,
            erase_range: (0, 0),
            sdio_regs: HashMap::new(),
            sdio_functions: 0,
            sdio_if_cond_echo: true,
            sdio_never_ready: false,
        }
    }

    /// A high capacity eMMC with a cache and power off notification.
    pub fn emmc() -> Self {
        let mut host = SimHost::new(SimKind::Emmc);
        host.cid = *Cid::from_be_bytes(&EMMC_CID).words();
        host.csd = *Csd::from_be_bytes(&EMMC_CSD).words();
        host.ext_csd = emmc_ext_csd();
        host.storage = vec![0u8; EMMC_BLOCKS as usize * 512];
        host.high_capacity = true;
        host
    }

    /// A small byte addressed MMC with 1 KiB blocks and an old EXT_CSD.
    pub fn mmc_standard_capacity() -> Self {
        let mut host = SimHost::new(SimKind::Emmc);
        host.cid = *Cid::from_be_bytes(&EMMC_CID).words();
        let mut csd = [0u32; 4];
        set_bits(&mut csd, 126, 2, 2);
        set_bits(&mut csd, 122, 4, 3);
        set_bits(&mut csd, 84, 12, 0x0F5);
        set_bits(&mut csd, 80, 4, 10);
        set_bits(&mut csd, 62, 12, 0xFF);
        set_bits(&mut csd, 47, 3, 0);
        host.csd = csd;
        host.storage = vec![0u8; 1024 * 1024];
        host
    }

    /// An SDIO card with two functions.
    pub fn sdio() -> Self {
        let mut host = SimHost::new(SimKind::Sdio);
        host.sdio_functions = 2;

        let regs = &mut host.sdio_regs;
        regs.insert((0, SDIO_CCCR_CCCR_REV), 0x32);
        regs.insert((0, SDIO_CCCR_SD_REV), 0x02);
        regs.insert((0, SDIO_CCCR_CARD_CAPABILITY), 0x82);
        regs.insert((0, SDIO_CCCR_POWER_CONTROL), SDIO_POWER_SMPC);
        regs.insert((0, SDIO_CCCR_BUS_SPEED_SELECT), SDIO_SPEED_SHS);
        regs.insert((0, SDIO_CCCR_CIS_PTR), 0x00);
        regs.insert((0, SDIO_CCCR_CIS_PTR + 1), 0x10);
        regs.insert((0, SDIO_CCCR_CIS_PTR + 2), 0x00);

        let cis: [u8; 17] = [
            // FUNCID, skipped
            0x21, 0x02, 0x0C, 0x00,
            // MANFID
            0x20, 0x04, 0x71, 0x02, 0x01, 0x43,
            // FUNCE: type, block size, max speed
            0x22, 0x04, 0x00, 0x00, 0x02, 0x32,
            0xFF,
        ];
        host.load_cis(&cis);
        host
    }

    pub fn load_cis(&mut self, cis: &[u8]) {
        for (offset, byte) in cis.iter().enumerate() {
            self.sdio_regs
                .insert((0, SDIO_CIS_ADDR + offset as u32), *byte);
        }
    }

    /// Indices of every command issued, in order.
    pub fn command_indices(&self) -> Vec<u8> {
        self.commands.iter().map(|c| c.index).collect()
    }

    /// Arguments of every CMD6 issued, in order.
    pub fn switch_args(&self) -> Vec<u32> {
        self.commands
            .iter()
            .filter(|c| c.index == CMD6)
            .map(|c| c.arg)
            .collect()
    }

    pub fn count(&self, index: u8) -> usize {
        self.commands.iter().filter(|c| c.index == index).count()
    }

    pub fn clear_log(&mut self) {
        self.commands.clear();
        self.async_commands.clear();
        self.busy_waits.clear();
    }

    pub fn sdio_reg(&self, function: u8, addr: u32) -> u8 {
        self.sdio_regs.get(&(function, addr)).copied().unwrap_or(0)
    }

    fn r1(&self) -> Response {
        Response::short((self.state << 9) | CardStatus::READY_FOR_DATA.bits())
    }

    fn status(&mut self) -> u32 {
        let mut status = self.state << 9;
        if !self.never_ready_for_data {
            status |= CardStatus::READY_FOR_DATA.bits();
        }
        if self.pending_switch_error {
            status |= CardStatus::SWITCH_ERROR.bits();
            self.pending_switch_error = false;
        }
        status
    }

    fn delay_is_bad(&self) -> bool {
        match (self.good_delay, self.txrx_delay) {
            (Some(good), Some(delay)) => !good(delay),
            (Some(_), None) => true,
            _ => false,
        }
    }

    fn storage_block(&self, arg: u32) -> BlockIdx {
        if self.high_capacity {
            BlockIdx(arg)
        } else {
            BlockIdx(arg / 512)
        }
    }

    fn emmc_transfer(
        &mut self,
        cmd: &Command,
        data: Option<DataTransfer<'_>>,
    ) -> Result<Response, HostError> {
        let data = data.ok_or(HostError::Data)?;
        let len = (data.block_count * data.block_size) as usize;
        let start = self.storage_block(cmd.arg);
        let corrupt = self.delay_is_bad();
        let mut memory = MemoryBlockDevice::new(&mut self.storage);
        match data.buffer {
            DataBuffer::Read(buf) => {
                memory
                    .read_bytes(start, &mut buf[..len])
                    .map_err(|_| HostError::Data)?;
                if corrupt {
                    buf[0] ^= 0xFF;
                }
            }
            DataBuffer::Write(buf) => {
                memory
                    .write_bytes(start, &buf[..len])
                    .map_err(|_| HostError::Data)?;
            }
        }
        Ok(self.r1())
    }

    fn emmc_command(
        &mut self,
        cmd: &Command,
        data: Option<DataTransfer<'_>>,
    ) -> Result<Response, HostError> {
        match cmd.index {
            CMD0 => {
                self.state = 0;
                self.polls = 0;
                Ok(Response::default())
            }
            CMD1 => {
                self.polls += 1;
                let mut ocr = 0x40FF_8080;
                if self.polls > self.polls_until_ready {
                    ocr |= OCR_CARD_READY;
                    self.state = 1;
                }
                Ok(Response::short(ocr))
            }
            CMD2 => {
                self.state = 2;
                Ok(Response(self.cid))
            }
            CMD3 => {
                self.rca = (cmd.arg >> 16) as u16;
                self.state = 3;
                Ok(self.r1())
            }
            CMD5 => {
                self.state = if cmd.arg & (1 << 15) != 0 { 10 } else { 3 };
                Ok(self.r1())
            }
            CMD6 => {
                let index = ((cmd.arg >> 16) & 0xFF) as u8;
                let value = ((cmd.arg >> 8) & 0xFF) as u8;
                if self.reject_switch_index == Some(index) {
                    self.pending_switch_error = true;
                } else {
                    self.ext_csd[usize::from(index)] = value;
                }
                Ok(self.r1())
            }
            CMD7 => {
                let rca = (cmd.arg >> 16) as u16;
                self.state = if rca != 0 && rca == self.rca { 4 } else { 3 };
                Ok(self.r1())
            }
            CMD8 => {
                let data = data.ok_or(HostError::Data)?;
                match data.buffer {
                    DataBuffer::Read(buf) => buf[..512].copy_from_slice(&self.ext_csd),
                    DataBuffer::Write(_) => return Err(HostError::Data),
                }
                Ok(self.r1())
            }
            CMD9 => Ok(Response(self.csd)),
            CMD13 => Ok(Response::short(self.status())),
            CMD17 | CMD18 | CMD24 | CMD25 => self.emmc_transfer(cmd, data),
            CMD35 => {
                self.erase_range.0 = cmd.arg;
                Ok(self.r1())
            }
            CMD36 => {
                self.erase_range.1 = cmd.arg;
                Ok(self.r1())
            }
            CMD38 => {
                let start = self.storage_block(self.erase_range.0);
                let end = self.storage_block(self.erase_range.1);
                MemoryBlockDevice::new(&mut self.storage)
                    .fill(start, BlockCount(end.0 - start.0 + 1), 0)
                    .map_err(|_| HostError::Failed)?;
                Ok(self.r1())
            }
            CMD56 => {
                let data = data.ok_or(HostError::Data)?;
                if let DataBuffer::Read(buf) = data.buffer {
                    for b in buf[..512].iter_mut() {
                        *b = cmd.arg as u8;
                    }
                }
                Ok(self.r1())
            }
            _ => Err(HostError::NoResponse),
        }
    }

    fn sdio_read(&self, function: u8, addr: u32) -> u8 {
        if function == 0 && addr == SDIO_CCCR_IO_READY {
            if self.sdio_never_ready {
                return 0;
            }
            return self.sdio_reg(0, SDIO_CCCR_IO_ENABLE);
        }
        self.sdio_reg(function, addr)
    }

    fn sdio_write(&mut self, function: u8, addr: u32, value: u8) {
        if function == 0 && addr == SDIO_CCCR_BUS_SPEED_SELECT {
            let supported = self.sdio_reg(0, addr) & SDIO_SPEED_SHS;
            let enabled = if supported != 0 { value & SDIO_SPEED_EHS } else { 0 };
            self.sdio_regs.insert((0, addr), supported | enabled);
            return;
        }
        self.sdio_regs.insert((function, addr), value);
    }

    fn sdio_command(
        &mut self,
        cmd: &Command,
        data: Option<DataTransfer<'_>>,
    ) -> Result<Response, HostError> {
        match cmd.index {
            CMD0 => {
                self.state = 0;
                self.polls = 0;
                Ok(Response::default())
            }
            CMD8 => {
                let echo = if self.sdio_if_cond_echo {
                    cmd.arg & 0xFFF
                } else {
                    0x155
                };
                Ok(Response::short(echo))
            }
            CMD5 => {
                self.polls += 1;
                let mut ocr = (u32::from(self.sdio_functions) << 28) | 0x00FF_8000;
                if self.polls > self.polls_until_ready {
                    ocr |= OCR_CARD_READY;
                }
                Ok(Response::short(ocr))
            }
            CMD3 => {
                self.rca = 1;
                self.state = 3;
                Ok(Response::short(0x0001_0000))
            }
            CMD7 => {
                let rca = (cmd.arg >> 16) as u16;
                self.state = if rca != 0 && rca == self.rca { 4 } else { 3 };
                Ok(self.r1())
            }
            CMD13 => Ok(Response::short(self.status())),
            CMD52 => {
                let function = ((cmd.arg >> 28) & 0x7) as u8;
                let addr = (cmd.arg >> 9) & 0x1_FFFF;
                if cmd.arg & SDIO_ARG_WRITE != 0 {
                    self.sdio_write(function, addr, cmd.arg as u8);
                }
                Ok(Response::short(0x1000 | u32::from(self.sdio_read(function, addr))))
            }
            CMD53 => {
                let data = data.ok_or(HostError::Data)?;
                let function = ((cmd.arg >> 28) & 0x7) as u8;
                let addr = (cmd.arg >> 9) & 0x1_FFFF;
                let increment = cmd.arg & SDIO_ARG_INCREMENT_ADDRESS != 0;
                let len = (data.block_count * data.block_size) as usize;
                let offset = |i: usize| if increment { i as u32 } else { 0 };
                match data.buffer {
                    DataBuffer::Read(buf) => {
                        for (i, b) in buf[..len].iter_mut().enumerate() {
                            *b = self.sdio_read(function, addr + offset(i));
                        }
                    }
                    DataBuffer::Write(buf) => {
                        for (i, b) in buf[..len].iter().enumerate() {
                            self.sdio_write(function, addr + offset(i), *b);
                        }
                    }
                }
                Ok(Response::short(0x1000))
            }
            _ => Err(HostError::NoResponse),
        }
    }
}

impl Host for SimHost {
    fn init(&mut self) -> Result<(), HostError> {
        self.init_count += 1;
        self.powered = true;
        let defaults = default_settings();
        self.settings.bus_width = defaults.bus_width;
        self.settings.bus_voltage = defaults.bus_voltage;
        self.settings.clock = defaults.clock;
        self.settings.uhs_mode = defaults.uhs_mode;
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), HostError> {
        self.deinit_count += 1;
        self.powered = false;
        Ok(())
    }

    fn power_control(&mut self, on: bool) -> Result<(), HostError> {
        self.powered = on;
        Ok(())
    }

    fn execute_command(
        &mut self,
        cmd: &Command,
        data: Option<DataTransfer<'_>>,
    ) -> Result<Response, HostError> {
        self.commands.push(*cmd);
        if let Some((index, e)) = self.fail_command {
            if index == cmd.index {
                return Err(e);
            }
        }
        if !self.powered {
            return Err(HostError::Failed);
        }
        match self.kind {
            SimKind::Emmc => self.emmc_command(cmd, data),
            SimKind::Sdio => self.sdio_command(cmd, data),
        }
    }

    fn start_command(
        &mut self,
        cmd: &Command,
        data: Option<DataTransfer<'static>>,
    ) -> Result<(), HostError> {
        self.async_commands.push(*cmd);
        let block_count = data.as_ref().map(|d| d.block_count).unwrap_or(0);
        let direction = data.as_ref().map(|d| d.direction());
        self.execute_command(cmd, data)?;
        if let Some(callback) = self.callback {
            callback(&HostEvent {
                kind: HostEventKind::TransferComplete,
                block_count,
                direction,
            });
        }
        Ok(())
    }

    fn card_busy(&mut self, timeout_ms: u32) -> Result<(), HostError> {
        self.busy_waits.push(timeout_ms);
        Ok(())
    }

    fn card_detect(&mut self) -> bool {
        self.present
    }

    fn set_bus_width(&mut self, width: BusWidth) -> Result<(), HostError> {
        self.settings.bus_width = width;
        Ok(())
    }

    fn set_bus_voltage(&mut self, voltage: BusVoltage) -> Result<(), HostError> {
        self.settings.bus_voltage = voltage;
        Ok(())
    }

    fn set_bus_clock(&mut self, clock: u32) -> Result<(), HostError> {
        self.settings.clock = clock;
        Ok(())
    }

    fn set_uhs_mode(&mut self, mode: UhsMode) -> Result<(), HostError> {
        self.settings.uhs_mode = mode;
        Ok(())
    }

    fn set_txrx_delay(&mut self, delay: TxRxDelay) -> Result<(), HostError> {
        self.txrx_delay = Some(delay);
        Ok(())
    }

    fn register_event_callback(&mut self, callback: EventCallback) {
        self.callback = Some(callback);
    }

    fn settings(&self) -> HostSettings {
        self.settings
    }
}
