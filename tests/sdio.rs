mod common;

use std::sync::atomic::{AtomicU32, Ordering};

use common::{init_logging, CountingDelay, SimHost};
use sdmmc_card::host::{BusVoltage, BusWidth, HostEvent, HostEventKind, UhsMode};
use sdmmc_card::registers::{Cccr, Cis};
use sdmmc_card::sdmmc_proto::*;
use sdmmc_card::{Card, CardPowerPolicy, CardState, CardType, Error};

fn sdio_card(host: SimHost) -> Card<SimHost, CountingDelay> {
    init_logging();
    let mut card = Card::new(host, CountingDelay::default());
    card.find_card().unwrap();
    card.init(CardType::Sdio, None, CardPowerPolicy::None).unwrap();
    card.host().clear_log();
    card
}

fn configure(
    card: &mut Card<SimHost, CountingDelay>,
    width: BusWidth,
    clock: u32,
) -> Result<(), Error> {
    card.cfg_set(CardType::Sdio, width, clock, BusVoltage::V3_3, UhsMode::None)
}

#[test]
fn init_reads_cccr_and_cis() {
    init_logging();
    let mut card = Card::new(SimHost::sdio(), CountingDelay::default());
    card.find_card().unwrap();
    card.init(CardType::Sdio, None, CardPowerPolicy::None).unwrap();

    assert_eq!(card.cached_state(), CardState::Transfer);
    assert_eq!(card.card_type(), CardType::Sdio);
    assert_eq!(card.rca(), 1);
    assert_eq!(card.sdio_function_count(), 2);
    assert_eq!(
        *card.sdio_cccr(),
        Cccr {
            cccr_rev: 2,
            sd_rev: 2,
            multi_block: true,
            low_speed: false,
            wide_bus: true,
            high_power: true,
            high_speed: true,
        }
    );
    assert_eq!(
        *card.sdio_cis(),
        Cis {
            vendor: 0x0271,
            device: 0x4301,
            block_size: 512,
            max_speed: 0x32,
        }
    );

    let (host, delay) = card.release();
    assert_eq!(
        &host.command_indices()[..7],
        &[CMD0, CMD8, CMD5, CMD5, CMD5, CMD5, CMD3]
    );
    // The second CMD5 carries the voltage window from the first
    let op_conds: Vec<u32> = host
        .commands
        .iter()
        .filter(|c| c.index == CMD5)
        .map(|c| c.arg)
        .collect();
    assert_eq!(op_conds, vec![0, 0, 0, 0x00FF_8000]);
    assert_eq!(delay.calls, 2);
}

#[test]
fn if_cond_mismatch_is_not_fatal() {
    let mut host = SimHost::sdio();
    host.sdio_if_cond_echo = false;
    let card = sdio_card(host);
    assert_eq!(card.cached_state(), CardState::Transfer);
}

#[test]
fn endless_cis() {
    init_logging();
    let mut host = SimHost::sdio();
    let chain: Vec<u8> = [0x80u8, 0x00].iter().cycle().take(1200).copied().collect();
    host.load_cis(&chain);
    let mut card = Card::new(host, CountingDelay::default());
    card.find_card().unwrap();
    assert_eq!(
        card.init(CardType::Sdio, None, CardPowerPolicy::None),
        Err(Error::CisTooLong)
    );
}

#[test]
fn high_speed_4_bit() {
    let mut card = sdio_card(SimHost::sdio());
    configure(&mut card, BusWidth::Four, 50_000_000).unwrap();
    let (host, _) = card.release();
    assert_eq!(
        host.sdio_reg(0, SDIO_CCCR_BUS_SPEED_SELECT),
        SDIO_SPEED_SHS | SDIO_SPEED_EHS
    );
    assert_eq!(host.sdio_reg(0, SDIO_CCCR_BUS_CONTROL), SDIO_BUS_WIDTH_4);
    assert_eq!(host.settings.clock, 50_000_000);
    assert_eq!(host.settings.bus_width, BusWidth::Four);
}

#[test]
fn back_to_full_speed() {
    let mut card = sdio_card(SimHost::sdio());
    configure(&mut card, BusWidth::Four, 50_000_000).unwrap();
    configure(&mut card, BusWidth::One, 25_000_000).unwrap();
    let (host, _) = card.release();
    assert_eq!(host.sdio_reg(0, SDIO_CCCR_BUS_SPEED_SELECT), SDIO_SPEED_SHS);
    assert_eq!(host.sdio_reg(0, SDIO_CCCR_BUS_CONTROL), SDIO_BUS_WIDTH_1);
    assert_eq!(host.settings.clock, 25_000_000);
}

#[test]
fn bad_configurations() {
    let mut card = sdio_card(SimHost::sdio());
    assert_eq!(configure(&mut card, BusWidth::Four, 52_000_000), Err(Error::OutOfRange));
    assert_eq!(configure(&mut card, BusWidth::Four, 100_000_000), Err(Error::InvalidArg));
    assert_eq!(
        card.cfg_set(CardType::Sdio, BusWidth::Four, 50_000_000, BusVoltage::V1_8, UhsMode::Ddr50),
        Err(Error::InvalidArg)
    );
    assert_eq!(
        configure(&mut card, BusWidth::Eight, 25_000_000),
        Err(Error::InvalidOperation)
    );
}

#[test]
fn no_high_speed_support() {
    let mut host = SimHost::sdio();
    host.sdio_regs.insert((0, SDIO_CCCR_BUS_SPEED_SELECT), 0);
    let mut card = sdio_card(host);
    assert!(!card.sdio_cccr().high_speed);
    assert_eq!(
        configure(&mut card, BusWidth::Four, 50_000_000),
        Err(Error::InvalidOperation)
    );
    assert_eq!(configure(&mut card, BusWidth::Four, 25_000_000), Ok(()));
}

#[test]
fn enable_and_disable_functions() {
    let mut card = sdio_card(SimHost::sdio());
    card.sdio_func_enable(1).unwrap();
    card.sdio_func_enable(2).unwrap();
    assert_eq!(card.host().sdio_reg(0, SDIO_CCCR_IO_ENABLE), 0b110);

    card.sdio_func_disable(1).unwrap();
    assert_eq!(card.host().sdio_reg(0, SDIO_CCCR_IO_ENABLE), 0b100);

    assert_eq!(card.sdio_func_enable(0), Err(Error::InvalidArg));
    assert_eq!(card.sdio_func_enable(3), Err(Error::InvalidArg));
    assert_eq!(card.sdio_func_disable(3), Err(Error::InvalidArg));
}

#[test]
fn function_never_ready() {
    let mut host = SimHost::sdio();
    host.sdio_never_ready = true;
    let mut card = sdio_card(host);
    assert_eq!(card.sdio_func_enable(1), Err(Error::Timeout));
    let (_, delay) = card.release();
    // Two CMD5 retries at init, then the ready polls
    assert_eq!(delay.calls, 2 + 100);
}

#[test]
fn function_interrupts() {
    let mut card = sdio_card(SimHost::sdio());
    card.sdio_func_interrupt_enable(2).unwrap();
    assert_eq!(card.host().sdio_reg(0, SDIO_CCCR_INT_ENABLE), 0b101);
    card.sdio_func_interrupt_enable(1).unwrap();
    assert_eq!(card.host().sdio_reg(0, SDIO_CCCR_INT_ENABLE), 0b111);
    card.sdio_func_interrupt_disable(2).unwrap();
    assert_eq!(card.host().sdio_reg(0, SDIO_CCCR_INT_ENABLE), 0b011);
    assert_eq!(card.sdio_func_interrupt_enable(0), Err(Error::InvalidArg));
}

#[test]
fn function_block_size() {
    let mut card = sdio_card(SimHost::sdio());
    card.sdio_set_block_size(1, 256).unwrap();
    assert_eq!(card.host().sdio_reg(0, 0x110), 0x00);
    assert_eq!(card.host().sdio_reg(0, 0x111), 0x01);
    assert_eq!(card.sdio_get_block_size(1), Ok(256));

    card.sdio_set_block_size(0, 64).unwrap();
    assert_eq!(card.sdio_get_block_size(0), Ok(64));
    assert_eq!(card.sdio_get_block_size(2), Ok(0));

    assert_eq!(card.sdio_set_block_size(3, 64), Err(Error::InvalidArg));
    assert_eq!(card.sdio_get_block_size(3), Err(Error::InvalidArg));
}

#[test]
fn single_bytes() {
    let mut card = sdio_card(SimHost::sdio());
    card.sdio_byte_write(1, 0x40, 0x99).unwrap();
    assert_eq!(card.host().sdio_reg(1, 0x40), 0x99);
    assert_eq!(card.sdio_byte_read(1, 0x40), Ok(0x99));
    assert_eq!(card.sdio_byte_read(0, SDIO_CCCR_CCCR_REV), Ok(0x32));

    let cmd = card.host().commands[0];
    assert_eq!(cmd.index, CMD52);
    assert_eq!(cmd.arg, io_rw_direct_arg(1, 0x40, Some(0x99)));
}

#[test]
fn byte_mode_transfers() {
    let mut card = sdio_card(SimHost::sdio());
    let data: Vec<u8> = (0..64).collect();
    card.sdio_multi_bytes_write_sync(1, 0x200, &data, 0, 64, true)
        .unwrap();
    assert_eq!(card.host().sdio_reg(1, 0x200 + 63), 63);

    let mut buf = [0u8; 64];
    card.sdio_multi_bytes_read_sync(1, 0x200, &mut buf, 0, 64, true)
        .unwrap();
    assert_eq!(buf[..], data[..]);

    let cmds = card.host().commands.clone();
    assert_eq!(cmds[0].index, CMD53);
    assert_eq!(cmds[0].arg, 0x9400_0000 | (0x200 << 9) | 64);
    assert_eq!(cmds[1].arg, 0x1400_0000 | (0x200 << 9) | 64);
}

#[test]
fn block_mode_transfers() {
    let mut card = sdio_card(SimHost::sdio());
    let data = [0x42u8; 64];
    card.sdio_multi_bytes_write_sync(2, 0x1000, &data, 2, 32, true)
        .unwrap();
    let cmd = card.host().commands[0];
    assert_eq!(cmd.arg & SDIO_ARG_BLOCK_MODE, SDIO_ARG_BLOCK_MODE);
    assert_eq!(cmd.arg & 0x1FF, 2);
    assert_eq!(card.host().sdio_reg(2, 0x1000 + 63), 0x42);

    let mut short = [0u8; 48];
    assert_eq!(
        card.sdio_multi_bytes_read_sync(2, 0x1000, &mut short, 2, 32, true),
        Err(Error::InvalidArg)
    );
}

#[test]
fn out_of_range_targets() {
    let mut card = sdio_card(SimHost::sdio());
    assert_eq!(card.sdio_byte_read(8, SDIO_CCCR_IO_ENABLE), Err(Error::InvalidArg));
    assert_eq!(card.sdio_byte_read(1, 0x2_0000), Err(Error::InvalidArg));
    assert_eq!(card.sdio_byte_write(8, 0x40, 1), Err(Error::InvalidArg));
    assert_eq!(card.sdio_byte_write(1, 0x40_0000, 1), Err(Error::InvalidArg));

    let mut buf = [0u8; 64];
    assert_eq!(
        card.sdio_multi_bytes_read_sync(9, 0x200, &mut buf, 0, 64, true),
        Err(Error::InvalidArg)
    );
    assert_eq!(
        card.sdio_multi_bytes_write_sync(1, 0x2_0000, &buf, 0, 64, true),
        Err(Error::InvalidArg)
    );
    // Nothing reached the card
    assert!(card.host().commands.is_empty());
    assert_eq!(card.host().sdio_reg(0, SDIO_CCCR_IO_ENABLE), 0);

    // The top of the register space is still reachable
    card.sdio_byte_write(1, SDIO_MAX_ADDRESS, 0x5A).unwrap();
    assert_eq!(card.sdio_byte_read(1, SDIO_MAX_ADDRESS), Ok(0x5A));
}

#[test]
fn transfer_counts_must_fit() {
    let mut card = sdio_card(SimHost::sdio());
    let mut big = vec![0u8; 512 * 4];
    assert_eq!(
        card.sdio_multi_bytes_read_sync(1, 0x10, &mut big, 512, 4, true),
        Err(Error::InvalidArg)
    );
    // Byte mode tops out at 512 bytes
    assert_eq!(
        card.sdio_multi_bytes_read_sync(1, 0x10, &mut big, 0, 1024, true),
        Err(Error::InvalidArg)
    );
    assert_eq!(
        card.sdio_multi_bytes_write_sync(1, 0x10, &big, 0, 1024, true),
        Err(Error::InvalidArg)
    );
    assert!(card.host().commands.is_empty());

    card.sdio_multi_bytes_read_sync(1, 0x10, &mut big, 0, 512, true)
        .unwrap();
    card.sdio_multi_bytes_read_sync(1, 0x10, &mut big, 511, 4, true)
        .unwrap();
    assert_eq!(card.host().commands.len(), 2);
}

#[test]
fn fifo_transfers() {
    let mut card = sdio_card(SimHost::sdio());
    card.sdio_multi_bytes_write_sync(1, 0x300, &[1, 2, 3, 4], 0, 4, false)
        .unwrap();
    // Every byte went to the same register
    assert_eq!(card.host().sdio_reg(1, 0x300), 4);
    assert_eq!(card.host().sdio_reg(1, 0x301), 0);
}

static SDIO_TRANSFERS: AtomicU32 = AtomicU32::new(0);

fn count_transfers(event: &HostEvent) {
    if event.kind == HostEventKind::TransferComplete {
        SDIO_TRANSFERS.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn async_transfers() {
    let mut card = sdio_card(SimHost::sdio());
    card.register_event_callback(count_transfers);

    let data: &'static [u8] = Box::leak(vec![0x77u8; 128].into_boxed_slice());
    card.sdio_multi_bytes_write_async(1, 0x800, data, 0, 128, true)
        .unwrap();
    let buf: &'static mut [u8] = Box::leak(vec![0u8; 128].into_boxed_slice());
    card.sdio_multi_bytes_read_async(1, 0x800, buf, 0, 128, true)
        .unwrap();

    assert_eq!(SDIO_TRANSFERS.load(Ordering::SeqCst), 2);
    let cmds = card.host().async_commands.clone();
    assert_eq!(cmds.len(), 2);
    assert!(cmds.iter().all(|c| c.index == CMD53 && c.asynchronous));
    assert_eq!(card.host().sdio_reg(1, 0x800 + 127), 0x77);
}
