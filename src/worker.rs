//! The per-device worker.
//!
//! All data movement happens here, one cycle at a time. A cycle runs until
//! there is nothing left to do, then the worker sleeps until the next
//! wakeup: an enqueue, an interrupt, a link change, close or detach.

use std::sync::{Arc, PoisonError};
use std::thread::{self, JoinHandle};

use crate::DeviceState;
use crate::bd::RING_LEN;
use crate::channel::{Flags, Shared};
use crate::regs::Bus;
use crate::rpc::Iop;
use crate::tx::TxPass;

/// Drives transfers for one device. Obtained from [`Smap::attach`](crate::Smap::attach).
pub struct Worker<B, I> {
    pub(crate) shared: Arc<Shared<B, I>>,
}

impl<B: Bus + 'static, I: Iop + 'static> Worker<B, I> {
    /// Run on a dedicated thread.
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("smap".into())
            .spawn(move || self.run())
    }
}

impl<B: Bus, I: Iop> Worker<B, I> {
    /// Run cycles until the device is detached or its last [`Smap`](crate::Smap)
    /// handle is dropped.
    pub fn run(self) {
        let shared = &self.shared;
        let mut seen = shared.lock().wakeups;
        loop {
            shared.run_cycle();

            let mut chan = shared.lock();
            while chan.wakeups == seen && !chan.flags.contains(Flags::STOP) {
                chan = shared
                    .wake
                    .wait(chan)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            if chan.flags.contains(Flags::STOP) {
                debug!("worker stopped");
                return;
            }
            seen = chan.wakeups;
        }
    }
}

impl<B: Bus, I: Iop> Shared<B, I> {
    /// Do all outstanding work.
    pub(crate) fn run_cycle(&self) {
        let _drain = self.hold_drain();

        let (flags, state) = {
            let chan = self.lock();
            (chan.flags, chan.state)
        };
        if !flags.contains(Flags::INIT_DONE) {
            return;
        }
        if state == DeviceState::Closing {
            self.drain_for_close();
            return;
        }
        if !flags.contains(Flags::LINK_VALID | Flags::OPENED) {
            return;
        }

        loop {
            let (queued, tx_pending, rx_pending) = {
                let chan = self.lock();
                (!chan.queue.is_empty(), chan.tx_pending, chan.rx_pending)
            };

            let mut blocked = false;
            if queued {
                blocked = self.transmit_pass() == TxPass::Blocked;
            }
            if tx_pending > 0 {
                self.reclaim_pass();
            }
            if rx_pending > 0 {
                self.receive_pass();
            }

            let chan = self.lock();
            if chan.is_quiescent() {
                break;
            }
            if blocked && chan.tx_pending == 0 && chan.rx_pending == 0 {
                // The next TX completion resumes us.
                break;
            }
            if !chan.flags.contains(Flags::LINK_VALID | Flags::OPENED) {
                break;
            }
        }
    }

    /// Flush the queue of a closing device, then signal the closer.
    fn drain_for_close(&self) {
        loop {
            let (link, queued) = {
                let mut chan = self.lock();
                let link = chan.flags.contains(Flags::LINK_VALID);
                if !link && !chan.queue.is_empty() {
                    let dropped = chan.queue.len();
                    warn!("close: link down, dropping {} queued frames", dropped);
                    chan.stats.tx_dropped += dropped as u64;
                    chan.queue.clear();
                }
                (link, !chan.queue.is_empty())
            };
            if !link || !queued {
                break;
            }
            if self.transmit_pass() == TxPass::Blocked && self.reclaim_pass() == 0 {
                thread::yield_now();
            }
        }

        // Let what was posted finish before the rings are torn down.
        for _ in 0..self.config.loop_count {
            let outstanding = self.lock().tx_ring.outstanding();
            if outstanding == 0 {
                break;
            }
            if self.reclaim_pass() == 0 {
                thread::yield_now();
            }
        }
        for _ in 0..RING_LEN {
            let rx_pending = self.lock().rx_pending;
            if rx_pending == 0 {
                break;
            }
            self.receive_pass();
        }

        let done = {
            let mut chan = self.lock();
            chan.tx_pending = 0;
            chan.rx_pending = 0;
            chan.close_done.take()
        };
        if let Some(done) = done {
            done.complete(0);
        }
    }
}
