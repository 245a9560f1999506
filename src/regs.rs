//! SMAP register map and the register-level bus.
//!
//! Offsets are relative to the SMAP register window. EMAC3 registers are
//! 32 bits wide and live at [`EMAC3_BASE`]; everything else is 8 or 16 bits
//! unless noted.

use bitflags::bitflags;

/// Register-level access to the SMAP block, plus the interrupt line.
///
/// Implementations take care of the bus width and byte order of each access.
/// All methods take `&self`: the interrupt dispatcher and the worker touch
/// registers concurrently, and the driver's own lock decides who may.
pub trait Bus: Send + Sync {
    fn read8(&self, offset: u32) -> u8;
    fn read16(&self, offset: u32) -> u16;
    fn read32(&self, offset: u32) -> u32;
    fn write8(&self, offset: u32, value: u8);
    fn write16(&self, offset: u32, value: u16);
    fn write32(&self, offset: u32, value: u32);

    /// Route the device interrupt line to [`Smap::handle_interrupt`](crate::Smap::handle_interrupt).
    fn request_irq(&self) -> Result<(), IrqError>;
    /// Undo [`request_irq`](Bus::request_irq).
    fn free_irq(&self);
}

/// The platform refused to route the interrupt line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[error("interrupt line unavailable ({0})")]
pub struct IrqError(pub i32);

// Interrupt controller (16 bit).
pub const INTR_STAT: u32 = 0x0028;
pub const INTR_ENABLE: u32 = 0x002A;
pub const INTR_CLR: u32 = 0x1128;

pub const BD_MODE: u32 = 0x1102;

// TX FIFO.
pub const TXFIFO_CTRL: u32 = 0x1000;
pub const TXFIFO_WR_PTR: u32 = 0x1004;
pub const TXFIFO_FRAME_CNT: u32 = 0x100C;
pub const TXFIFO_FRAME_INC: u32 = 0x1010;
/// 32 bit.
pub const TXFIFO_DATA: u32 = 0x1100;

// RX FIFO.
pub const RXFIFO_CTRL: u32 = 0x1030;
pub const RXFIFO_RD_PTR: u32 = 0x1034;
pub const RXFIFO_FRAME_CNT: u32 = 0x103C;
pub const RXFIFO_FRAME_DEC: u32 = 0x1040;
/// 32 bit.
pub const RXFIFO_DATA: u32 = 0x1200;

pub const FIFO_RESET: u8 = 1 << 0;

// Descriptor rings.
pub const BD_BASE_TX: u32 = 0x3000;
pub const BD_BASE_RX: u32 = 0x3200;

// Device-side packet buffers.
pub const TX_BUF_BASE: u16 = 0x1000;
pub const TX_BUF_SIZE: usize = 4096;
pub const RX_BUF_BASE: u16 = 0x4000;
pub const RX_BUF_SIZE: usize = 16384;

bitflags! {
    /// Bits of [`INTR_STAT`], [`INTR_ENABLE`] and [`INTR_CLR`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Intr: u16 {
        const EMAC3 = 1 << 6;
        const RXEND = 1 << 5;
        const TXEND = 1 << 4;
        /// RX descriptor not valid.
        const RXDNV = 1 << 3;
        /// TX descriptor not valid.
        const TXDNV = 1 << 2;
    }
}

pub const EMAC3_BASE: u32 = 0x2000;

/// EMAC3 register offsets (32 bit), relative to [`EMAC3_BASE`].
pub mod emac3 {
    pub const MODE0: u32 = 0x00;
    pub const MODE1: u32 = 0x04;
    pub const TX_MODE0: u32 = 0x08;
    pub const TX_MODE1: u32 = 0x0C;
    pub const RX_MODE: u32 = 0x10;
    pub const INTR_STAT: u32 = 0x14;
    pub const INTR_ENABLE: u32 = 0x18;
    pub const ADDR_HI: u32 = 0x1C;
    pub const ADDR_LO: u32 = 0x20;
    pub const GROUP_HASH: [u32; 4] = [0x40, 0x44, 0x48, 0x4C];
    pub const INTER_FRAME_GAP: u32 = 0x58;
    pub const STA_CTRL: u32 = 0x5C;
    pub const TX_THRESHOLD: u32 = 0x60;
    pub const RX_WATERMARK: u32 = 0x64;

    // MODE0
    pub const RXMAC_IDLE: u32 = 1 << 31;
    pub const TXMAC_IDLE: u32 = 1 << 30;
    pub const SOFT_RESET: u32 = 1 << 29;
    pub const TXMAC_ENABLE: u32 = 1 << 28;
    pub const RXMAC_ENABLE: u32 = 1 << 27;

    // MODE1
    pub const FDX_ENABLE: u32 = 1 << 31;
    pub const FLOWCTRL_ENABLE: u32 = 1 << 28;
    pub const ALLOW_PF: u32 = 1 << 27;
    pub const IGNORE_SQE: u32 = 1 << 24;
    pub const MEDIA_MASK: u32 = 3 << 22;
    pub const MEDIA_10M: u32 = 0 << 22;
    pub const MEDIA_100M: u32 = 1 << 22;
    pub const RXFIFO_2K: u32 = 2 << 20;
    pub const TXFIFO_1K: u32 = 1 << 18;
    pub const TXREQ0_MULTI: u32 = 2 << 14;
    pub const TXREQ1_SINGLE: u32 = 0 << 12;
    pub const MODE1_DEFAULT: u32 = RXFIFO_2K | TXFIFO_1K | TXREQ0_MULTI | TXREQ1_SINGLE;

    // TxMODE0
    /// Get new packet, channel 0.
    pub const TX_GNP_0: u32 = 1 << 31;

    // TxMODE1
    pub const TX_LOW_REQ_SHIFT: u32 = 27;
    pub const TX_URG_REQ_SHIFT: u32 = 16;

    // RxMODE
    pub const RX_STRIP_PAD: u32 = 1 << 31;
    pub const RX_STRIP_FCS: u32 = 1 << 30;
    pub const RX_PROMISC: u32 = 1 << 22;
    pub const RX_PROMISC_MCAST: u32 = 1 << 21;
    pub const RX_INDIVID_ADDR: u32 = 1 << 20;
    pub const RX_INDIVID_HASH: u32 = 1 << 19;
    pub const RX_BCAST: u32 = 1 << 18;
    pub const RX_MCAST: u32 = 1 << 17;

    // TX threshold and RX watermark
    pub const TX_THRESHOLD_MASK: u32 = 0x1F;
    pub const TX_THRESHOLD_SHIFT: u32 = 27;
    pub const RX_LO_WATER_MASK: u32 = 0x1FF;
    pub const RX_LO_WATER_SHIFT: u32 = 16;
    pub const RX_HI_WATER_MASK: u32 = 0x1FF;
    pub const RX_HI_WATER_SHIFT: u32 = 0;

    // STA control (MII management)
    pub const PHY_OP_COMPLETE: u32 = 1 << 15;
    pub const PHY_READ_ERROR: u32 = 1 << 14;
    pub const PHY_WRITE: u32 = 1 << 13;
    pub const PHY_READ: u32 = 1 << 12;
    pub const PHY_ADDR_SHIFT: u32 = 5;
    pub const PHY_REG_MASK: u32 = 0x1F;
    pub const PHY_DATA_SHIFT: u32 = 16;
}

bitflags! {
    /// EMAC3 interrupt status and enable bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MacIntr: u32 {
        const OVERRUN = 1 << 25;
        const PAUSE_FRAME = 1 << 24;
        const BAD_FRAME = 1 << 23;
        const RUNT_FRAME = 1 << 22;
        const SHORT_EVENT = 1 << 21;
        const ALIGN_ERR = 1 << 20;
        const BAD_FCS = 1 << 19;
        const TOO_LONG = 1 << 18;
        const OUT_RANGE_ERR = 1 << 17;
        const IN_RANGE_ERR = 1 << 16;
        const DEAD_DEPEND = 1 << 9;
        const DEAD_0 = 1 << 8;
        const SQE_ERR_0 = 1 << 7;
        const TX_ERR_0 = 1 << 6;
        const DEAD_1 = 1 << 5;
        const SQE_ERR_1 = 1 << 4;
        const TX_ERR_1 = 1 << 3;
        const MMAOP_SUCCESS = 1 << 1;
        const MMAOP_FAIL = 1 << 0;

        const DEAD_ALL = Self::DEAD_DEPEND.bits() | Self::DEAD_0.bits() | Self::DEAD_1.bits();
    }
}

/// Read an EMAC3 register.
#[inline]
pub(crate) fn emac3_read<B: Bus + ?Sized>(bus: &B, reg: u32) -> u32 {
    bus.read32(EMAC3_BASE + reg)
}

/// Write an EMAC3 register.
#[inline]
pub(crate) fn emac3_write<B: Bus + ?Sized>(bus: &B, reg: u32, value: u32) {
    bus.write32(EMAC3_BASE + reg, value)
}
