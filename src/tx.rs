//! Transmit path: queue to FIFO, FIFO to descriptor, descriptor back to
//! free space.

use crate::arena::round4;
use crate::bd::txbd::{FLAGS_GENFCS, FLAGS_GENPAD, TxStatus};
use crate::bd::{RING_HEADROOM, RING_LEN};
use crate::channel::{Flags, Shared};
use crate::emac;
use crate::regs::{
    Bus, INTR_CLR, Intr, TX_BUF_BASE, TXFIFO_DATA, TXFIFO_FRAME_INC, TXFIFO_WR_PTR, emac3,
    emac3_write,
};
use crate::rpc::{self, DMA_ENTRIES, DmaEntry, DmaRequest, Endpoint, Iop};

/// Outcome of one transmit pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxPass {
    /// Nothing queued.
    Idle,
    /// Frames were handed to hardware.
    Sent(usize),
    /// The ring or the FIFO is full; a completion will make room.
    Blocked,
    /// The coprocessor failed the transfer. The batch is back on the queue.
    Aborted,
}

/// One frame staged for a transfer.
struct Staged {
    frame: Vec<u8>,
    /// Offset in the coprocessor's scratch buffer.
    local: usize,
    /// Offset in the device TX buffer.
    offset: usize,
    /// Rounded size.
    size: usize,
}

impl<B: Bus, I: Iop> Shared<B, I> {
    /// Move up to one batch of queued frames into the FIFO and post them.
    pub(crate) fn transmit_pass(&self) -> TxPass {
        let (batch, blocked, mut dma) = self.stage_tx();
        if batch.is_empty() {
            return if blocked { TxPass::Blocked } else { TxPass::Idle };
        }

        if dma {
            match self.dma_write(&batch) {
                Ok(()) => {}
                Err(Some(status)) => {
                    warn!("xmit: dma break ({})", status);
                    let mut chan = self.lock();
                    for staged in batch.into_iter().rev() {
                        chan.queue.push_front(staged.frame);
                    }
                    chan.stats.tx_dma_errors += 1;
                    chan.flags.insert(Flags::FORCE_PIO);
                    return TxPass::Aborted;
                }
                Err(None) => {
                    if self.config.verbose {
                        debug!("xmit: rpc failed, PIO for {} frames", batch.len());
                    }
                    dma = false;
                }
            }
        }
        if !dma {
            for staged in &batch {
                self.pio_write(staged);
            }
        }

        if self.config.trace_frames {
            for staged in &batch {
                trace!(
                    "xmit: mem->fifo done, len={}, {}, ptr={:#x}",
                    staged.frame.len(),
                    staged.size,
                    staged.offset
                );
            }
        }

        self.post_tx(&batch);
        TxPass::Sent(batch.len())
    }

    /// Pop what fits into one batch. Returns the batch, whether a frame had
    /// to wait for room, and whether to use DMA.
    fn stage_tx(&self) -> (Vec<Staged>, bool, bool) {
        let mut chan = self.lock();
        let dma = chan.flags.contains(Flags::DMA_TX)
            && !chan.flags.contains(Flags::FORCE_PIO)
            && self.dma.tx.is_some();
        chan.flags.remove(Flags::FORCE_PIO);
        let limit = if dma { DMA_ENTRIES } else { 1 };

        let mut batch = Vec::with_capacity(limit);
        let mut offset = chan.tx_arena.cursor();
        let mut bytes = 0;
        let mut blocked = false;
        while batch.len() < limit {
            let Some(frame) = chan.queue.pop_front() else {
                break;
            };
            let size = round4(frame.len());
            if chan.tx_ring.outstanding() + batch.len() >= RING_LEN - RING_HEADROOM
                || bytes + size > chan.tx_arena.free()
            {
                chan.queue.push_front(frame);
                blocked = true;
                break;
            }
            batch.push(Staged {
                frame,
                local: bytes,
                offset,
                size,
            });
            offset = chan.tx_arena.advance(offset, size);
            bytes += size;
        }
        (batch, blocked, dma)
    }

    /// Copy the batch into scratch and have the coprocessor move it.
    ///
    /// `Err(None)` means the request never started and nothing moved;
    /// `Err(Some(status))` means the coprocessor gave up.
    fn dma_write(&self, batch: &[Staged]) -> Result<(), Option<u32>> {
        let scratch = self.dma.tx.as_ref().ok_or(None)?;
        for staged in batch {
            if !scratch.write_padded(staged.local, &staged.frame, staged.size) {
                return Err(None);
            }
        }

        let entries: Vec<DmaEntry> = batch
            .iter()
            .enumerate()
            .map(|(tag, staged)| DmaEntry {
                local_addr: staged.local as u32,
                device_offset: staged.offset as u32,
                size: staged.size as u32,
                tag: tag as u32,
            })
            .collect();
        let request = DmaRequest {
            command: entries[0].device_offset,
            devctrl: 0,
            count: entries.len() as u32,
            entries,
        };
        match rpc::transfer(&self.iop, Endpoint::TxDmaBegin, request) {
            Ok(0) => Ok(()),
            Ok(status) => Err(Some(status)),
            Err(_) => Err(None),
        }
    }

    /// Write one frame into the FIFO a word at a time.
    fn pio_write(&self, staged: &Staged) {
        let mut bounce = self.hold_tx_fifo();
        let words = &mut bounce[..staged.size];
        let (head, pad) = words.split_at_mut(staged.frame.len());
        head.copy_from_slice(&staged.frame);
        pad.fill(0);

        self.bus.write16(TXFIFO_WR_PTR, staged.offset as u16);
        for word in words.chunks_exact(4) {
            self.bus.write32(
                TXFIFO_DATA,
                u32::from_le_bytes([word[0], word[1], word[2], word[3]]),
            );
        }
    }

    /// Hand transferred frames to the MAC.
    fn post_tx(&self, batch: &[Staged]) {
        let mut chan = self.lock();
        for staged in batch {
            let Some(offset) = chan.tx_arena.alloc(staged.size) else {
                // Only a concurrent ring rebuild can get here.
                chan.stats.tx_dropped += 1;
                continue;
            };
            debug_assert_eq!(offset, staged.offset);
            self.bus.write8(TXFIFO_FRAME_INC, 1);
            chan.tx_ring.arm(
                &self.bus,
                staged.frame.len() as u16,
                TX_BUF_BASE + offset as u16,
                FLAGS_GENFCS | FLAGS_GENPAD,
            );
        }

        emac3_write(&self.bus, emac3::TX_MODE0, emac3::TX_GNP_0);
        if chan.flags.contains(Flags::TXDNV_DISABLED) {
            chan.flags.remove(Flags::TXDNV_DISABLED);
            emac::mask_interrupt(&self.bus, Intr::TXDNV, true);
            self.bus.write16(INTR_CLR, Intr::TXDNV.bits());
        }
    }

    /// Reap completed descriptors and give their space back.
    ///
    /// Returns the number of descriptors reaped.
    pub(crate) fn reclaim_pass(&self) -> usize {
        let mut reaped = 0;
        let wake_senders = {
            let mut chan = self.lock();
            while let Some(bd) = chan.tx_ring.reap(&self.bus) {
                chan.tx_arena.release(round4(usize::from(bd.length)));
                let status = TxStatus::from_descriptor(&bd);
                if !chan.stats.record_tx(status, bd.length) && self.config.verbose {
                    warn!(
                        "tx intr: errors {:#x}, len={}",
                        (status & TxStatus::ERRORS).bits(),
                        bd.length
                    );
                }
                if self.config.trace_frames {
                    trace!("tx intr: stat={:#x}, len={}, ptr={:#x}", bd.status, bd.length, bd.pointer);
                }
                reaped += 1;
            }
            chan.tx_pending = chan.tx_pending.saturating_sub(1);

            let wake = chan.flags.contains(Flags::OPENED | Flags::QUEUE_STOPPED);
            if wake {
                chan.flags.remove(Flags::QUEUE_STOPPED);
            }
            wake
        };
        if wake_senders {
            self.with_stack(|stack| stack.wake_queue());
        }
        reaped
    }
}
