//! Receive buffer descriptor fields.

use bitflags::bitflags;

use super::{Descriptor, Kind, Ring, STATUS};
use crate::regs::{BD_BASE_RX, Bus};

/// Descriptor is empty; hardware may fill it.
pub const FLAGS_EMPTY: u16 = 1 << 15;

/// Shortest frame we accept: an Ethernet header.
pub const MIN_FRAME_LEN: u16 = 14;
/// Longest frame we accept: a VLAN-tagged frame without FCS.
pub const MAX_FRAME_LEN: u16 = 1518;

bitflags! {
    /// Error bits hardware sets in a filled RX descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RxStatus: u16 {
        const OVERRUN = 1 << 9;
        const PAUSE_FRAME = 1 << 8;
        const BAD_FRAME = 1 << 7;
        const RUNT_FRAME = 1 << 6;
        const SHORT_EVENT = 1 << 5;
        const ALIGN_ERROR = 1 << 4;
        const BAD_FCS = 1 << 3;
        const FRAME_TOO_LONG = 1 << 2;
        const OUT_OF_RANGE = 1 << 1;
        const IN_RANGE = 1 << 0;
    }
}

impl RxStatus {
    pub fn from_descriptor(bd: &Descriptor) -> Self {
        Self::from_bits_truncate(bd.status)
    }
}

/// How one scanned RX descriptor is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    /// Still owned by hardware; scanning stops here.
    Empty,
    /// Hardware flagged an error.
    Errored(RxStatus),
    /// Clean status but the length is out of bounds.
    BadLength(u16),
    /// Deliverable frame.
    Valid { length: u16, offset: u16 },
}

impl Verdict {
    pub(crate) fn of(bd: &Descriptor) -> Self {
        if bd.status & FLAGS_EMPTY != 0 {
            return Verdict::Empty;
        }
        let errors = RxStatus::from_descriptor(bd);
        if !errors.is_empty() {
            return Verdict::Errored(errors);
        }
        if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&bd.length) {
            return Verdict::BadLength(bd.length);
        }
        Verdict::Valid {
            length: bd.length,
            // Word aligned offset into the 16 KiB RX buffer.
            offset: bd.pointer & 0x3FFC,
        }
    }
}

pub(crate) struct RxBd;

impl Kind for RxBd {
    const BASE: u32 = BD_BASE_RX;
    const INIT_STATUS: u16 = FLAGS_EMPTY;
}

impl Ring<RxBd> {
    /// Give the descriptor at the reap cursor back to hardware and advance.
    pub(crate) fn recycle<B: Bus + ?Sized>(&mut self, bus: &B) {
        bus.write16(Self::addr(self.reap) + STATUS, FLAGS_EMPTY);
        self.reap = Self::next(self.reap);
        self.post = self.reap;
    }
}
