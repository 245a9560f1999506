//! Transmit buffer descriptor fields.

use bitflags::bitflags;

use super::{Descriptor, Kind, LENGTH, POINTER, RESERVED, Ring, STATUS};
use crate::regs::{BD_BASE_TX, Bus};

/// Hardware owns the descriptor.
pub const FLAGS_READY: u16 = 1 << 15;
/// Append the frame check sequence.
pub const FLAGS_GENFCS: u16 = 1 << 9;
/// Pad short frames to the minimum length.
pub const FLAGS_GENPAD: u16 = 1 << 8;

bitflags! {
    /// Completion status hardware writes back into a TX descriptor.
    ///
    /// These share bit positions with the control flags above; the meaning
    /// depends on whether software or hardware wrote the word last.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TxStatus: u16 {
        const BAD_FCS = 1 << 9;
        const BAD_PACKET = 1 << 8;
        const LOSS_OF_CARRIER = 1 << 7;
        const EXCESSIVE_DEFERRAL = 1 << 6;
        const EXCESSIVE_COLLISION = 1 << 5;
        const LATE_COLLISION = 1 << 4;
        const MULTIPLE_COLLISION = 1 << 3;
        const SINGLE_COLLISION = 1 << 2;
        const UNDERRUN = 1 << 1;
        const SQE_TEST_FAILED = 1 << 0;
    }
}

impl TxStatus {
    /// Bits that mean the frame was not sent. Single and multiple collisions
    /// are retried by the MAC and only count as collisions.
    pub const ERRORS: Self = Self::all()
        .difference(Self::MULTIPLE_COLLISION)
        .difference(Self::SINGLE_COLLISION);

    pub fn from_descriptor(bd: &Descriptor) -> Self {
        Self::from_bits_truncate(bd.status)
    }
}

pub(crate) struct TxBd;

impl Kind for TxBd {
    const BASE: u32 = BD_BASE_TX;
    const INIT_STATUS: u16 = 0;
}

impl Ring<TxBd> {
    /// Arm the descriptor at the post cursor and hand it to hardware.
    ///
    /// Returns the armed slot.
    pub(crate) fn arm<B: Bus + ?Sized>(
        &mut self,
        bus: &B,
        length: u16,
        pointer: u16,
        flags: u16,
    ) -> usize {
        let slot = self.post;
        let addr = Self::addr(slot);
        bus.write16(addr + LENGTH, length);
        bus.write16(addr + POINTER, pointer);
        bus.write16(addr + RESERVED, 0);
        // Hardware may start on the descriptor as soon as READY lands.
        bus.write16(addr + STATUS, flags | FLAGS_READY);
        self.post = Self::next(slot);
        slot
    }

    /// Take the oldest posted descriptor if hardware is done with it.
    pub(crate) fn reap<B: Bus + ?Sized>(&mut self, bus: &B) -> Option<Descriptor> {
        if self.outstanding() == 0 {
            return None;
        }
        let bd = self.peek(bus, 0);
        if bd.status & FLAGS_READY != 0 {
            return None;
        }
        self.reap = Self::next(self.reap);
        Some(bd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::Sim;

    #[test]
    fn arm_writes_status_last() {
        let sim = Sim::new();
        let mut ring = Ring::<TxBd>::new();
        ring.init(&sim);
        sim.clear_write_log();

        let slot = ring.arm(&sim, 60, 0x1000, FLAGS_GENFCS | FLAGS_GENPAD);
        assert_eq!(slot, 0);
        let writes = sim.write_log();
        assert_eq!(writes.len(), 4);
        let (last_addr, last_value) = *writes.last().unwrap();
        assert_eq!(last_addr, BD_BASE_TX);
        assert_eq!(last_value, (FLAGS_READY | FLAGS_GENFCS | FLAGS_GENPAD) as u32);
    }

    #[test]
    fn reap_waits_for_hardware_and_keeps_order() {
        let sim = Sim::new();
        let mut ring = Ring::<TxBd>::new();
        ring.init(&sim);

        for len in [60u16, 61, 62] {
            ring.arm(&sim, len, 0x1000, 0);
        }
        assert_eq!(ring.outstanding(), 3);
        assert!(ring.reap(&sim).is_none());

        // Hardware finishes the first two.
        for slot in 0..2u32 {
            sim.write16(BD_BASE_TX + slot * 8, 0);
        }
        assert_eq!(ring.reap(&sim).map(|bd| bd.length), Some(60));
        assert_eq!(ring.reap(&sim).map(|bd| bd.length), Some(61));
        assert!(ring.reap(&sim).is_none());
        assert_eq!(ring.outstanding(), 1);
    }

    #[test]
    fn reap_ignores_idle_ring() {
        let sim = Sim::new();
        let mut ring = Ring::<TxBd>::new();
        ring.init(&sim);
        assert!(ring.reap(&sim).is_none());
    }

    #[test]
    fn collisions_are_not_errors() {
        let bd = Descriptor {
            status: (TxStatus::SINGLE_COLLISION | TxStatus::MULTIPLE_COLLISION).bits(),
            ..Default::default()
        };
        assert!(!TxStatus::from_descriptor(&bd).intersects(TxStatus::ERRORS));
        let bd = Descriptor {
            status: TxStatus::UNDERRUN.bits(),
            ..Default::default()
        };
        assert!(TxStatus::from_descriptor(&bd).intersects(TxStatus::ERRORS));
    }
}
