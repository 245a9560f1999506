//! EMAC3 and FIFO control: reset, defaults, link programming, receive
//! filtering and the MII management port.
//!
//! Everything here is plain register sequencing through a [`Bus`]. Callers
//! decide which lock, if any, to hold.

use crate::config::Config;
use crate::error::MiiError;
use crate::regs::{
    BD_MODE, Bus, FIFO_RESET, INTR_CLR, INTR_ENABLE, Intr, MacIntr, RXFIFO_CTRL, TXFIFO_CTRL,
    emac3, emac3_read, emac3_write,
};
use crate::{Duplex, LinkState, Speed};

/// How much of the device [`reset`] reprograms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResetKind {
    /// Reset and load every default, including the station address.
    Full,
    /// Reset only; used on the way out.
    Only,
}

/// Receive address filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxFilter<'a> {
    /// Our own address and broadcast.
    Normal,
    /// Every frame on the wire.
    Promiscuous,
    /// Every multicast frame.
    AllMulticast,
    /// The listed multicast groups, through the group hash table.
    /// Entries without the group bit are skipped.
    Multicast(&'a [[u8; 6]]),
}

/// Ack every pending interrupt, in the SMAP block and in the MAC.
pub(crate) fn clear_interrupts<B: Bus + ?Sized>(bus: &B) {
    bus.write16(INTR_CLR, Intr::all().bits());
    emac3_write(bus, emac3::INTR_STAT, MacIntr::all().bits());
}

pub(crate) fn enable_interrupts<B: Bus + ?Sized>(bus: &B, enable: bool) {
    let ena = bus.read16(INTR_ENABLE);
    if enable {
        bus.write16(INTR_ENABLE, ena | Intr::all().bits());
        emac3_write(bus, emac3::INTR_ENABLE, MacIntr::all().bits());
    } else {
        bus.write16(INTR_ENABLE, ena & !Intr::all().bits());
        emac3_write(bus, emac3::INTR_ENABLE, 0);
    }
}

/// Set or clear one SMAP interrupt enable bit.
pub(crate) fn mask_interrupt<B: Bus + ?Sized>(bus: &B, bit: Intr, enable: bool) {
    let ena = bus.read16(INTR_ENABLE);
    if enable {
        bus.write16(INTR_ENABLE, ena | bit.bits());
    } else {
        bus.write16(INTR_ENABLE, ena & !bit.bits());
    }
}

/// Start or stop the MAC data paths.
///
/// Stopping waits, boundedly, for both paths to go idle.
pub(crate) fn set_txrx<B: Bus + ?Sized>(bus: &B, enable: bool, config: &Config) {
    if enable {
        emac3_write(bus, emac3::MODE0, emac3::TXMAC_ENABLE | emac3::RXMAC_ENABLE);
        return;
    }

    let mode0 = emac3_read(bus, emac3::MODE0);
    emac3_write(
        bus,
        emac3::MODE0,
        mode0 & !(emac3::TXMAC_ENABLE | emac3::RXMAC_ENABLE),
    );

    const IDLE: u32 = emac3::RXMAC_IDLE | emac3::TXMAC_IDLE;
    let mut mode0 = 0;
    for _ in 0..config.loop_count {
        mode0 = emac3_read(bus, emac3::MODE0);
        if mode0 & IDLE == IDLE {
            return;
        }
    }
    warn!("emac3 is still running ({:#x})", mode0);
}

/// Reset both FIFOs. Returns `false` if either is still resetting.
pub(crate) fn fifo_reset<B: Bus + ?Sized>(bus: &B, config: &Config) -> bool {
    bus.write8(TXFIFO_CTRL, FIFO_RESET);
    bus.write8(RXFIFO_CTRL, FIFO_RESET);

    let mut done = true;
    for (reg, name) in [(TXFIFO_CTRL, "TX"), (RXFIFO_CTRL, "RX")] {
        let settled = (0..config.loop_count).any(|_| bus.read8(reg) & FIFO_RESET == 0);
        if !settled {
            warn!("{} FIFO reset is in progress", name);
            done = false;
        }
    }
    done
}

/// Soft reset the MAC. Returns `false` if the reset bit never cleared.
pub(crate) fn soft_reset<B: Bus + ?Sized>(bus: &B, config: &Config) -> bool {
    emac3_write(bus, emac3::MODE0, emac3::SOFT_RESET);
    let settled =
        (0..config.loop_count).any(|_| emac3_read(bus, emac3::MODE0) & emac3::SOFT_RESET == 0);
    if !settled {
        warn!("emac3 reset is in progress");
    }
    settled
}

/// Load the station address and the fixed operating parameters.
fn set_defaults<B: Bus + ?Sized>(bus: &B, mac: &[u8; 6]) {
    let hi = u32::from(mac[0]) << 8 | u32::from(mac[1]);
    let lo = u32::from_be_bytes([mac[2], mac[3], mac[4], mac[5]]);
    emac3_write(bus, emac3::ADDR_HI, hi);
    emac3_write(bus, emac3::ADDR_LO, lo);

    emac3_write(bus, emac3::INTER_FRAME_GAP, 4);

    emac3_write(
        bus,
        emac3::RX_MODE,
        emac3::RX_STRIP_PAD | emac3::RX_STRIP_FCS | emac3::RX_INDIVID_ADDR | emac3::RX_BCAST,
    );

    // Request priorities in 8 byte units: low = 56, urgent = 120.
    emac3_write(
        bus,
        emac3::TX_MODE1,
        7 << emac3::TX_LOW_REQ_SHIFT | 15 << emac3::TX_URG_REQ_SHIFT,
    );

    // (12 + 1) * 64 = 832 bytes.
    emac3_write(
        bus,
        emac3::TX_THRESHOLD,
        (12 & emac3::TX_THRESHOLD_MASK) << emac3::TX_THRESHOLD_SHIFT,
    );

    // In 8 byte units: low = 128, high = 1024.
    emac3_write(
        bus,
        emac3::RX_WATERMARK,
        (16 & emac3::RX_LO_WATER_MASK) << emac3::RX_LO_WATER_SHIFT
            | (128 & emac3::RX_HI_WATER_MASK) << emac3::RX_HI_WATER_SHIFT,
    );
}

/// Bring the block to a known state.
///
/// Interrupts are left disabled and cleared; the MAC data paths are stopped.
pub(crate) fn reset<B: Bus + ?Sized>(bus: &B, config: &Config, mac: &[u8; 6], kind: ResetKind) {
    enable_interrupts(bus, false);
    clear_interrupts(bus);
    bus.write8(BD_MODE, 0);
    fifo_reset(bus, config);

    soft_reset(bus, config);
    emac3_write(bus, emac3::MODE1, emac3::MODE1_DEFAULT);
    if kind == ResetKind::Only {
        return;
    }

    clear_interrupts(bus);
    enable_interrupts(bus, false);
    set_defaults(bus, mac);
}

/// Reset the MAC and restore `mode1`, the value chosen for the current link.
pub(crate) fn reinit<B: Bus + ?Sized>(bus: &B, config: &Config, mac: &[u8; 6], mode1: u32) {
    soft_reset(bus, config);
    emac3_write(bus, emac3::MODE1, mode1);
    set_defaults(bus, mac);
}

/// MODE1 for `link`, starting from the current register value.
pub(crate) fn link_mode1(current: u32, link: &LinkState) -> u32 {
    const FDX: u32 = emac3::FDX_ENABLE | emac3::FLOWCTRL_ENABLE | emac3::ALLOW_PF;

    let mut mode1 = current | emac3::IGNORE_SQE;
    match link.duplex {
        Duplex::Full => mode1 |= FDX,
        Duplex::Half => {
            mode1 &= !FDX;
            if link.speed == Speed::Mbps10 {
                mode1 &= !emac3::IGNORE_SQE;
            }
        }
    }
    mode1 &= !emac3::MEDIA_MASK;
    mode1 |= match link.speed {
        Speed::Mbps100 => emac3::MEDIA_100M,
        Speed::Mbps10 => emac3::MEDIA_10M,
    };
    mode1
}

/// Ethernet CRC-32 of an address, computed MSB first over bit-reversed bytes.
fn address_crc(addr: &[u8; 6]) -> u32 {
    const POLY: u32 = 0x04C1_1DB7;

    let mut crc = u32::MAX;
    for byte in addr {
        crc ^= u32::from(byte.reverse_bits()) << 24;
        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 {
                crc << 1 ^ POLY
            } else {
                crc << 1
            };
        }
    }
    crc ^ u32::MAX
}

/// Group hash table for `groups`, or `None` if no entry is a group address.
pub(crate) fn group_hash(groups: &[[u8; 6]]) -> Option<[u32; 4]> {
    let mut table = [0u32; 4];
    let mut any = false;
    for addr in groups.iter().filter(|addr| addr[0] & 1 != 0) {
        let index = (address_crc(addr) >> 26) & 0x3F;
        let reg = (index / 16) as usize;
        let bit = 15 - index % 16;
        table[reg] |= 1 << bit;
        any = true;
    }
    any.then_some(table)
}

/// Program the receive filter. The MAC is stopped around the update.
pub(crate) fn set_rx_filter<B: Bus + ?Sized>(bus: &B, config: &Config, filter: RxFilter<'_>) {
    set_txrx(bus, false, config);

    let mut mode = emac3_read(bus, emac3::RX_MODE);
    mode &= !(emac3::RX_PROMISC
        | emac3::RX_PROMISC_MCAST
        | emac3::RX_INDIVID_HASH
        | emac3::RX_MCAST);
    emac3_write(bus, emac3::RX_MODE, mode);

    match filter {
        RxFilter::Normal => {}
        RxFilter::Promiscuous => mode |= emac3::RX_PROMISC,
        RxFilter::AllMulticast => mode |= emac3::RX_PROMISC_MCAST,
        RxFilter::Multicast(groups) => {
            for reg in emac3::GROUP_HASH {
                emac3_write(bus, reg, 0);
            }
            if let Some(table) = group_hash(groups) {
                for (reg, value) in emac3::GROUP_HASH.into_iter().zip(table) {
                    emac3_write(bus, reg, value);
                }
                mode |= emac3::RX_MCAST;
            }
        }
    }
    emac3_write(bus, emac3::RX_MODE, mode);

    set_txrx(bus, true, config);
}

/// Wait for the STA port to finish an operation.
fn mii_wait<B: Bus + ?Sized>(bus: &B, config: &Config) -> Result<u32, MiiError> {
    for _ in 0..config.loop_count {
        let sta = emac3_read(bus, emac3::STA_CTRL);
        if sta & emac3::PHY_OP_COMPLETE != 0 {
            return Ok(sta);
        }
    }
    Err(MiiError::Timeout)
}

fn mii_address(phy: u8, reg: u8) -> u32 {
    (u32::from(phy) & 0x1F) << emac3::PHY_ADDR_SHIFT | u32::from(reg) & emac3::PHY_REG_MASK
}

pub(crate) fn mii_read<B: Bus + ?Sized>(
    bus: &B,
    config: &Config,
    phy: u8,
    reg: u8,
) -> Result<u16, MiiError> {
    mii_wait(bus, config)?;
    emac3_write(bus, emac3::STA_CTRL, emac3::PHY_READ | mii_address(phy, reg));
    let sta = mii_wait(bus, config)?;
    if sta & emac3::PHY_READ_ERROR != 0 {
        return Err(MiiError::ReadFailed);
    }
    Ok((sta >> emac3::PHY_DATA_SHIFT) as u16)
}

pub(crate) fn mii_write<B: Bus + ?Sized>(
    bus: &B,
    config: &Config,
    phy: u8,
    reg: u8,
    data: u16,
) -> Result<(), MiiError> {
    mii_wait(bus, config)?;
    emac3_write(
        bus,
        emac3::STA_CTRL,
        u32::from(data) << emac3::PHY_DATA_SHIFT | emac3::PHY_WRITE | mii_address(phy, reg),
    );
    mii_wait(bus, config).map(|_| ())
}
