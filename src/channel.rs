//! Per-device state shared by the interrupt dispatcher and the worker.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use bitflags::bitflags;

use crate::arena::Arena;
use crate::bd::{RING_LEN, Ring, rxbd::RxBd, txbd::TxBd};
use crate::config::Config;
use crate::netif::NetStack;
use crate::regs::{Bus, TX_BUF_SIZE};
use crate::rpc::{Completion, DmaChannels, Iop};
use crate::stats::Stats;
use crate::{DeviceState, LinkState};

bitflags! {
    /// Operating flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct Flags: u32 {
        const INIT_DONE = 1 << 0;
        const OPENED = 1 << 1;
        const LINK_VALID = 1 << 2;
        const DMA_TX = 1 << 3;
        const DMA_RX = 1 << 4;
        /// TXDNV was masked by the dispatcher; the next post re-arms it.
        const TXDNV_DISABLED = 1 << 5;
        /// RXDNV was masked by the dispatcher; the next receive re-arms it.
        const RXDNV_DISABLED = 1 << 6;
        const IRQ_INSTALLED = 1 << 7;
        /// A sender was refused; wake the stack after the next reclaim.
        const QUEUE_STOPPED = 1 << 8;
        /// The last TX DMA failed; move the next batch with PIO.
        const FORCE_PIO = 1 << 9;
        /// The worker should exit.
        const STOP = 1 << 10;
    }
}

/// Everything the single device lock protects.
pub(crate) struct Channel {
    pub(crate) state: DeviceState,
    pub(crate) flags: Flags,
    /// Outbound frames not yet moved into the FIFO.
    pub(crate) queue: VecDeque<Vec<u8>>,
    pub(crate) tx_ring: Ring<TxBd>,
    pub(crate) rx_ring: Ring<RxBd>,
    pub(crate) tx_arena: Arena,
    pub(crate) tx_pending: u32,
    pub(crate) rx_pending: u32,
    pub(crate) stats: Stats,
    /// Last link reported by the PHY.
    pub(crate) link: Option<LinkState>,
    /// MODE1 value for the current link; restored on every MAC re-init.
    pub(crate) mode1: u32,
    /// Signaled by the worker once a closing device has drained.
    pub(crate) close_done: Option<Completion>,
    /// Bumped on every wakeup so that the worker never misses one.
    pub(crate) wakeups: u64,
}

impl Channel {
    pub(crate) fn new(mode1: u32) -> Self {
        Self {
            state: DeviceState::Uninit,
            flags: Flags::empty(),
            queue: VecDeque::with_capacity(RING_LEN),
            tx_ring: Ring::new(),
            rx_ring: Ring::new(),
            tx_arena: Arena::new(TX_BUF_SIZE),
            tx_pending: 0,
            rx_pending: 0,
            stats: Stats::default(),
            link: None,
            mode1,
            close_done: None,
            wakeups: 0,
        }
    }

    /// Frames the queue may hold before senders are pushed back.
    pub(crate) fn high_water(&self) -> usize {
        if self.flags.contains(Flags::DMA_TX) {
            RING_LEN / 2
        } else {
            0
        }
    }

    pub(crate) fn is_quiescent(&self) -> bool {
        self.queue.is_empty() && self.tx_pending == 0 && self.rx_pending == 0
    }
}

/// The device aggregate behind every [`Smap`](crate::Smap) handle.
pub(crate) struct Shared<B, I> {
    pub(crate) bus: B,
    pub(crate) iop: I,
    pub(crate) config: Config,
    pub(crate) mac: [u8; 6],
    pub(crate) dma: DmaChannels,
    chan: Mutex<Channel>,
    /// Held for a whole worker cycle, and by the lifecycle operations that
    /// rebuild rings underneath it.
    drain: Mutex<()>,
    /// Held across MAC and STA register sequences that poll for completion.
    /// Taken before `chan`, never while holding it.
    mac_regs: Mutex<()>,
    /// Worker wait condition, paired with `chan`.
    pub(crate) wake: Condvar,
    /// Exclusive hold of the TX FIFO write pointer, with the PIO bounce buffer.
    pub(crate) tx_fifo: Mutex<Vec<u8>>,
    /// Exclusive hold of the RX FIFO read pointer, with the PIO bounce buffer.
    pub(crate) rx_fifo: Mutex<Vec<u8>>,
    stack: Mutex<Box<dyn NetStack>>,
}

impl<B, I> Shared<B, I> {
    /// Take the device lock.
    ///
    /// Critical sections never panic while holding it, but a poisoned lock
    /// is still usable: the protected state is plain counters and cursors.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Channel> {
        self.chan.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the worker exit at its next wakeup.
    pub(crate) fn stop_worker(&self) {
        let mut chan = self.lock();
        if !chan.flags.contains(Flags::STOP) {
            chan.flags.insert(Flags::STOP);
            wake(&mut chan, &self.wake);
        }
    }
}

impl<B: Bus, I: Iop> Shared<B, I> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        bus: B,
        iop: I,
        config: Config,
        mac: [u8; 6],
        dma: DmaChannels,
        chan: Channel,
        tx_bounce: Vec<u8>,
        rx_bounce: Vec<u8>,
        stack: Box<dyn NetStack>,
    ) -> Self {
        Self {
            bus,
            iop,
            config,
            mac,
            dma,
            chan: Mutex::new(chan),
            drain: Mutex::new(()),
            mac_regs: Mutex::new(()),
            wake: Condvar::new(),
            tx_fifo: Mutex::new(tx_bounce),
            rx_fifo: Mutex::new(rx_bounce),
            stack: Mutex::new(stack),
        }
    }


    /// Exclude worker cycles.
    pub(crate) fn hold_drain(&self) -> MutexGuard<'_, ()> {
        self.drain.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclude other MAC and STA register sequences.
    pub(crate) fn hold_mac(&self) -> MutexGuard<'_, ()> {
        self.mac_regs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the upward collaborator. Never call with the device
    /// lock held.
    pub(crate) fn with_stack<R>(&self, f: impl FnOnce(&mut dyn NetStack) -> R) -> R {
        let mut stack = self.stack.lock().unwrap_or_else(PoisonError::into_inner);
        f(stack.as_mut())
    }

    /// Hold the TX FIFO for a PIO transfer.
    pub(crate) fn hold_tx_fifo(&self) -> MutexGuard<'_, Vec<u8>> {
        self.tx_fifo.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hold the RX FIFO for a PIO transfer.
    pub(crate) fn hold_rx_fifo(&self) -> MutexGuard<'_, Vec<u8>> {
        self.rx_fifo.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Record a wakeup and rouse the worker.
pub(crate) fn wake(chan: &mut Channel, cond: &Condvar) {
    chan.wakeups = chan.wakeups.wrapping_add(1);
    cond.notify_all();
}
