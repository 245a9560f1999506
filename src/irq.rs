//! Interrupt dispatch.
//!
//! The dispatcher never moves data. It acknowledges the device, turns
//! events into pending-work counters, and wakes the worker.

use crate::channel::{self, Channel, Flags, Shared};
use crate::emac;
use crate::regs::{Bus, INTR_CLR, INTR_ENABLE, INTR_STAT, Intr, MacIntr, emac3, emac3_read, emac3_write};
use crate::rpc::Iop;

/// Whether an interrupt belonged to this device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IrqReturn {
    /// Not ours, or nothing enabled was pending.
    None,
    Handled,
}

impl<B: Bus, I: Iop> Shared<B, I> {
    pub(crate) fn dispatch(&self) -> IrqReturn {
        let mut chan = self.lock();
        if !chan.flags.contains(Flags::IRQ_INSTALLED) {
            return IrqReturn::None;
        }

        let stat = Intr::from_bits_truncate(self.bus.read16(INTR_STAT))
            & Intr::from_bits_truncate(self.bus.read16(INTR_ENABLE));
        if stat.is_empty() {
            return IrqReturn::None;
        }
        self.bus.write16(INTR_CLR, stat.bits());

        let before = (chan.tx_pending, chan.rx_pending);
        if stat.contains(Intr::TXDNV) {
            emac::mask_interrupt(&self.bus, Intr::TXDNV, false);
            chan.flags.insert(Flags::TXDNV_DISABLED);
            chan.tx_pending += 1;
            emac3_write(&self.bus, emac3::INTR_STAT, MacIntr::DEAD_ALL.bits());
        }
        if stat.contains(Intr::RXDNV) {
            emac::mask_interrupt(&self.bus, Intr::RXDNV, false);
            chan.flags.insert(Flags::RXDNV_DISABLED);
            if self.config.verbose {
                debug!("intr: RX desc not valid");
            }
            chan.rx_pending += 1;
        }
        // TXEND and RXEND can race each other in hardware; either one means
        // both directions may have finished work.
        for end in [Intr::TXEND, Intr::RXEND] {
            if stat.contains(end) {
                chan.tx_pending += 1;
                chan.rx_pending += 1;
            }
        }
        if stat.contains(Intr::EMAC3) {
            self.mac_interrupt(&mut chan);
        }

        if (chan.tx_pending, chan.rx_pending) != before {
            channel::wake(&mut chan, &self.wake);
        }
        IrqReturn::Handled
    }

    /// Ack and account MAC error causes.
    fn mac_interrupt(&self, chan: &mut Channel) {
        let stat = emac3_read(&self.bus, emac3::INTR_STAT);
        let ena = emac3_read(&self.bus, emac3::INTR_ENABLE);
        emac3_write(&self.bus, emac3::INTR_STAT, stat);

        let mut causes = MacIntr::from_bits_truncate(stat)
            & (MacIntr::from_bits_truncate(ena) | MacIntr::DEAD_ALL);
        causes.remove(MacIntr::MMAOP_SUCCESS);
        if causes.is_empty() {
            return;
        }
        chan.stats.mac_errors += 1;
        if self.config.verbose {
            for (name, _) in causes.iter_names() {
                warn!("emac3 intr: {}", name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::regs::EMAC3_BASE;
    use crate::sim;

    #[test]
    fn not_installed_is_not_ours() {
        let (smap, _worker, sim, _rx) = sim::attached(Config::default());
        sim.raise(Intr::TXEND);
        assert_eq!(smap.handle_interrupt(), IrqReturn::None);
    }

    #[test]
    fn masked_bits_are_ignored() {
        let (smap, sim, _rx) = sim::opened(Config::default());
        sim.write16(INTR_ENABLE, 0);
        sim.raise(Intr::TXEND);
        assert_eq!(smap.handle_interrupt(), IrqReturn::None);
        let chan = smap.shared.lock();
        assert_eq!((chan.tx_pending, chan.rx_pending), (0, 0));
    }

    #[test]
    fn end_events_bump_both_directions() {
        let (smap, sim, _rx) = sim::opened(Config::default());
        sim.raise(Intr::TXEND);
        assert_eq!(smap.handle_interrupt(), IrqReturn::Handled);
        {
            let chan = smap.shared.lock();
            assert_eq!((chan.tx_pending, chan.rx_pending), (1, 1));
        }
        assert_eq!(sim.read16(INTR_STAT) & Intr::TXEND.bits(), 0);

        sim.raise(Intr::TXEND | Intr::RXEND);
        smap.handle_interrupt();
        let chan = smap.shared.lock();
        assert_eq!((chan.tx_pending, chan.rx_pending), (3, 3));
    }

    #[test]
    fn descriptor_not_valid_masks_itself() {
        let (smap, sim, _rx) = sim::opened(Config::default());
        sim.raise(Intr::TXDNV);
        smap.handle_interrupt();
        assert_eq!(sim.read16(INTR_ENABLE) & Intr::TXDNV.bits(), 0);
        {
            let chan = smap.shared.lock();
            assert!(chan.flags.contains(Flags::TXDNV_DISABLED));
            assert_eq!((chan.tx_pending, chan.rx_pending), (1, 0));
        }

        // The next post turns it back on.
        smap.transmit(vec![0; 60]).unwrap();
        smap.poll();
        assert_ne!(sim.read16(INTR_ENABLE) & Intr::TXDNV.bits(), 0);
        assert!(!smap.shared.lock().flags.contains(Flags::TXDNV_DISABLED));
    }

    #[test]
    fn mac_errors_are_counted_not_processed() {
        let (smap, sim, _rx) = sim::opened(Config {
            verbose: true,
            ..Config::default()
        });
        sim.raise_mac((MacIntr::BAD_FCS | MacIntr::TOO_LONG).bits());
        assert_eq!(smap.handle_interrupt(), IrqReturn::Handled);

        let chan = smap.shared.lock();
        assert_eq!(chan.stats.mac_errors, 1);
        assert_eq!((chan.tx_pending, chan.rx_pending), (0, 0));
        assert_eq!(sim.read32(EMAC3_BASE + emac3::INTR_STAT), 0);
    }
}
