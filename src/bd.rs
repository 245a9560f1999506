//! Buffer descriptors and descriptor rings.
//!
//! The SMAP block keeps two rings of [`RING_LEN`] descriptors in its own
//! register space, one for each direction. A descriptor is four 16-bit words
//! at a fixed stride. We never overlay a struct on that memory; descriptors are
//! loaded into and stored from a plain [`Descriptor`] value through the
//! [`Bus`].
//!
//! Ownership is a single bit in the status word. Software hands a TX
//! descriptor to hardware by setting `READY`; hardware hands an RX descriptor
//! back to software by clearing `EMPTY`. The status word is always written
//! last so that hardware never sees a half-armed descriptor.

pub(crate) mod rxbd;
pub(crate) mod txbd;

use core::marker::PhantomData;

use crate::regs::Bus;

/// Number of descriptors in each ring.
pub const RING_LEN: usize = 64;

/// Descriptors kept free in the TX ring so that a full ring can be told apart
/// from an empty one.
pub const RING_HEADROOM: usize = 2;

const BD_SIZE: u32 = 8;

// Field offsets within one descriptor.
const STATUS: u32 = 0x0;
const RESERVED: u32 = 0x2;
const LENGTH: u32 = 0x4;
const POINTER: u32 = 0x6;

/// A copy of one hardware descriptor.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Descriptor {
    /// Ownership and error bits.
    pub status: u16,
    /// Must be zero.
    pub reserved: u16,
    /// Frame length in bytes.
    pub length: u16,
    /// Device buffer address of the frame.
    pub pointer: u16,
}

impl Descriptor {
    fn load<B: Bus + ?Sized>(bus: &B, addr: u32) -> Self {
        Self {
            status: bus.read16(addr + STATUS),
            reserved: bus.read16(addr + RESERVED),
            length: bus.read16(addr + LENGTH),
            pointer: bus.read16(addr + POINTER),
        }
    }
}

/// Ring direction.
pub(crate) trait Kind {
    /// Register offset of descriptor zero.
    const BASE: u32;
    /// Status word written by [`Ring::init`].
    const INIT_STATUS: u16;
}

/// Cursors over one descriptor ring.
///
/// `post` is the next descriptor software arms; `reap` is the next
/// descriptor software expects hardware to finish. The ring owns no frame
/// memory.
pub(crate) struct Ring<D> {
    post: usize,
    reap: usize,
    _kind: PhantomData<D>,
}

impl<D: Kind> Ring<D> {
    pub(crate) const fn new() -> Self {
        Self {
            post: 0,
            reap: 0,
            _kind: PhantomData,
        }
    }

    #[inline]
    fn addr(index: usize) -> u32 {
        D::BASE + (index % RING_LEN) as u32 * BD_SIZE
    }

    #[inline]
    pub(crate) fn next(index: usize) -> usize {
        (index + 1) % RING_LEN
    }

    /// Put every descriptor in its idle state and rewind both cursors.
    pub(crate) fn init<B: Bus + ?Sized>(&mut self, bus: &B) {
        for index in 0..RING_LEN {
            let addr = Self::addr(index);
            bus.write16(addr + STATUS, D::INIT_STATUS);
            bus.write16(addr + RESERVED, 0);
            bus.write16(addr + LENGTH, 0);
            bus.write16(addr + POINTER, 0);
        }
        self.post = 0;
        self.reap = 0;
    }

    /// Descriptors posted and not yet reaped.
    #[inline]
    pub(crate) fn outstanding(&self) -> usize {
        (self.post + RING_LEN - self.reap) % RING_LEN
    }

    #[cfg(test)]
    pub(crate) fn reap_index(&self) -> usize {
        self.reap
    }

    /// Read the descriptor `ahead` slots past the reap cursor.
    pub(crate) fn peek<B: Bus + ?Sized>(&self, bus: &B, ahead: usize) -> Descriptor {
        Descriptor::load(bus, Self::addr(self.reap + ahead))
    }
}
