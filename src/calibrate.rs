//! sdmmc-card - eMMC timing calibration
//!
//! Sweeps the host's output and input tap delays, bringing an eMMC up at
//! every setting and checking a write/read pattern survives. The chosen
//! setting sits in the middle of the widest window that works.

use embedded_hal::blocking::delay::DelayMs;

use crate::host::{BusVoltage, BusWidth, Host, TxRxDelay, UhsMode};
use crate::sdmmc::{Card, CardPowerPolicy, CardType, Error};

#[cfg(feature = "log")]
use log::debug;

#[cfg(feature = "defmt-log")]
use defmt::debug;

/// Number of TX delay taps swept.
pub const TX_DELAY_STEPS: u8 = 16;
/// Number of RX delay taps swept.
pub const RX_DELAY_STEPS: u8 = 32;
/// A window must be at least this many taps wide.
pub const MIN_ACCEPTANCE_LENGTH: u32 = 2;

/// The bus setup to calibrate for, and where on the card the test pattern
/// may be written.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CalibrationParams {
    /// UHS mode to run the pattern in
    pub uhs_mode: UhsMode,
    /// Bus clock in Hz
    pub clock: u32,
    pub bus_width: BusWidth,
    /// First block the pattern is written to
    pub start_block: u32,
    /// Pattern length in 512 byte blocks
    pub block_count: u32,
}

/// Lets a card borrow the caller's delay for one sweep step.
struct DelayRef<'a, D>(&'a mut D);

impl<'a, D> DelayMs<u32> for DelayRef<'a, D>
where
    D: DelayMs<u32>,
{
    fn delay_ms(&mut self, ms: u32) {
        self.0.delay_ms(ms)
    }
}

/// Length of the longest run of set bits in `value`.
pub fn count_consecutive_ones(value: u32) -> u32 {
    let mut data = value;
    let mut count = 0;
    while data != 0 {
        data &= data << 1;
        count += 1;
    }
    count
}

/// Bit index in the middle of the longest run of set bits in `value`. The
/// first of several equally long runs wins. Zero if no bit is set.
pub fn find_mid_point(value: u32) -> u32 {
    let mut run_len = 0;
    let mut max_len = 0;
    let mut pick = 0;
    for i in 0..=32 {
        if i < 32 && value & (1 << i) != 0 {
            run_len += 1;
        } else if run_len > 0 {
            if run_len > max_len {
                max_len = run_len;
                pick = i - 1 - run_len / 2;
            }
            run_len = 0;
        }
    }
    pick
}

/// Passing RX delays as a bit mask, one per TX delay.
pub type RxWindows = [u32; TX_DELAY_STEPS as usize];

/// Pick the TX/RX delay pair from the per-TX-delay windows of passing RX
/// delays.
pub fn select_delays(rx_windows: &RxWindows) -> Result<TxRxDelay, Error> {
    let tx_window = rx_windows
        .iter()
        .enumerate()
        .filter(|(_, window)| count_consecutive_ones(**window) >= MIN_ACCEPTANCE_LENGTH)
        .fold(0u32, |acc, (tx, _)| acc | (1 << tx));

    if tx_window == 0 || count_consecutive_ones(tx_window) < MIN_ACCEPTANCE_LENGTH {
        debug!("No acceptable TX window in {:x}", tx_window);
        return Err(Error::CalibrationFailed);
    }

    let tx = find_mid_point(tx_window);
    let rx = find_mid_point(rx_windows[tx as usize]);
    debug!(
        "Found RX window {:x} at TX delay {}",
        rx_windows[tx as usize], tx
    );
    Ok(TxRxDelay {
        tx: tx as u8,
        rx: rx as u8,
    })
}

/// Find the TX/RX delay pair that works best for `params`, leave the host
/// initialised with it and return it.
///
/// `buf` holds the test pattern and must cover `params.block_count` blocks
/// of 512 bytes. The blocks it is written to are overwritten.
pub fn emmc_calibrate<H, D>(
    host: &mut H,
    delay: &mut D,
    params: &CalibrationParams,
    buf: &mut [u8],
) -> Result<TxRxDelay, Error>
where
    H: Host,
    D: DelayMs<u32>,
{
    let len = params.block_count as usize * 512;
    if params.block_count == 0 || buf.len() < len {
        return Err(Error::InvalidArg);
    }
    let buf = &mut buf[..len];

    debug!(
        "eMMC timing scan for {:?} at {} Hz, {:?}",
        params.uhs_mode, params.clock, params.bus_width
    );

    let mut rx_windows: RxWindows = [0; TX_DELAY_STEPS as usize];
    for tx in 0..TX_DELAY_STEPS {
        for rx in 0..RX_DELAY_STEPS {
            host.init()?;
            host.set_txrx_delay(TxRxDelay { tx, rx })?;

            let mut card = Card::new(&mut *host, DelayRef(&mut *delay));
            if pattern_test(&mut card, params, buf)? {
                rx_windows[usize::from(tx)] |= 1 << rx;
                debug!("TX delay {} RX delay {} works", tx, rx);
            } else {
                debug!("TX delay {} RX delay {} doesn't work", tx, rx);
            }
        }
    }

    for (tx, window) in rx_windows.iter().enumerate() {
        debug!("TX delay {}: RX window {:x}", tx, window);
    }

    let delays = select_delays(&rx_windows)?;
    debug!("Using TX delay {} and RX delay {}", delays.tx, delays.rx);

    host.init()?;
    host.set_txrx_delay(delays)?;
    Ok(delays)
}

/// Bring the card up and check a pattern survives a write and read back.
/// A card that can't be found or initialised aborts the sweep; one that
/// can't be configured just fails this setting.
fn pattern_test<H, D>(
    card: &mut Card<H, D>,
    params: &CalibrationParams,
    buf: &mut [u8],
) -> Result<bool, Error>
where
    H: Host,
    D: DelayMs<u32>,
{
    card.find_card()?;
    card.init(CardType::Emmc, None, CardPowerPolicy::None)?;

    if let Err(e) = card.cfg_set(
        CardType::Emmc,
        params.bus_width,
        params.clock,
        BusVoltage::V1_8,
        params.uhs_mode,
    ) {
        debug!("Card config failed: {:?}", e);
        return Ok(false);
    }

    for (i, b) in buf.iter_mut().enumerate() {
        *b = i as u8;
    }
    if let Err(e) = card.block_write_sync(params.start_block, params.block_count, buf) {
        debug!("Pattern write failed: {:?}", e);
    }

    for b in buf.iter_mut() {
        *b = 0;
    }
    if let Err(e) = card.block_read_sync(params.start_block, params.block_count, buf) {
        debug!("Pattern read failed: {:?}", e);
    }

    Ok(buf.iter().enumerate().all(|(i, b)| *b == i as u8))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_run() {
        assert_eq!(count_consecutive_ones(0), 0);
        assert_eq!(count_consecutive_ones(0b1011_0111), 3);
        assert_eq!(count_consecutive_ones(0xFFFF_FFFF), 32);
        assert_eq!(count_consecutive_ones(0x8000_0001), 1);
    }

    #[test]
    fn mid_point_of_longest_run() {
        // Runs at 1..=2 and 5..=9, the second is longer
        assert_eq!(find_mid_point(0b11_1110_0110), 7);
        // Equal runs: the first one wins
        assert_eq!(find_mid_point(0b1100_0011), 0);
        assert_eq!(find_mid_point(0), 0);
    }

    #[test]
    fn mid_point_of_run_reaching_top_bit() {
        assert_eq!(find_mid_point(0xFFFF_0000), 23);
        assert_eq!(find_mid_point(0xFFFF_FFFF), 15);
    }

    #[test]
    fn delays_from_windows() {
        let mut windows = [0u32; 16];
        windows[3] = 0b1111_0000;
        windows[4] = 0b0111_1111_0000;
        windows[5] = 0b0011_1000_0000;
        windows[9] = 0b1;
        let delays = select_delays(&windows).unwrap();
        // TX 3..=5 pass, middle is 4, whose window 4..=10 has middle 7
        assert_eq!(delays, TxRxDelay { tx: 4, rx: 7 });
    }

    #[test]
    fn single_tx_row_is_not_enough() {
        let mut windows = [0u32; 16];
        windows[7] = 0xFF;
        assert_eq!(select_delays(&windows), Err(Error::CalibrationFailed));
        assert_eq!(select_delays(&[0u32; 16]), Err(Error::CalibrationFailed));
    }

    #[test]
    fn last_tx_rows() {
        let mut windows: RxWindows = [0; TX_DELAY_STEPS as usize];
        windows[14] = 0xC000_0000;
        windows[15] = 0xF000_0000;
        assert_eq!(select_delays(&windows), Ok(TxRxDelay { tx: 14, rx: 30 }));
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
