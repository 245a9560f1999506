//! Receive path: filled descriptors to frames, frames to the stack.

use crate::arena::round4;
use crate::bd::rxbd::{RxStatus, Verdict};
use crate::channel::{Flags, Shared};
use crate::emac;
use crate::regs::{
    Bus, INTR_CLR, Intr, RX_BUF_SIZE, RXFIFO_DATA, RXFIFO_FRAME_DEC, RXFIFO_RD_PTR,
};
use crate::rpc::{self, DMA_ENTRIES, DmaEntry, DmaRequest, Endpoint, Iop};

/// One deliverable frame found by the scan.
#[derive(Debug, Clone, Copy)]
struct Slot {
    length: u16,
    /// Offset in the device RX buffer.
    offset: u16,
    /// Offset in the coprocessor's scratch buffer.
    local: usize,
    size: usize,
}

/// A descriptor that ended the scan without data worth reading.
#[derive(Debug, Clone, Copy)]
enum Reject {
    Status(RxStatus),
    Length(u16),
}

struct Scan {
    slots: Vec<Slot>,
    reject: Option<Reject>,
    /// The scan stopped on a descriptor hardware still owns.
    drained: bool,
    dma: bool,
}

impl<B: Bus, I: Iop> Shared<B, I> {
    /// Read one batch of received frames and hand them upward.
    ///
    /// Returns the number of descriptors given back to hardware.
    pub(crate) fn receive_pass(&self) -> usize {
        let scan = self.scan_rx();
        let mut dma_failed = false;

        let frames = if scan.slots.is_empty() {
            Vec::new()
        } else {
            let frames = if scan.dma { self.dma_read(&scan.slots) } else { None };
            match frames {
                Some(frames) => frames,
                None => {
                    dma_failed = scan.dma;
                    scan.slots.iter().map(|slot| self.pio_read(slot)).collect()
                }
            }
        };

        if self.config.trace_frames {
            for slot in &scan.slots {
                trace!("rx: fifo->mem done, len={}, ptr={:#x}", slot.length, slot.offset);
            }
        }

        if !frames.is_empty() {
            self.with_stack(|stack| {
                for frame in &frames {
                    stack.deliver(frame);
                }
            });
        }

        self.recycle_rx(&scan, dma_failed)
    }

    /// Walk filled descriptors from the reap cursor.
    fn scan_rx(&self) -> Scan {
        let chan = self.lock();
        let scratch = self.dma.rx.as_ref().filter(|_| chan.flags.contains(Flags::DMA_RX));
        let mut dma = scratch.is_some();
        let capacity = scratch.map_or(RX_BUF_SIZE, |s| s.len().min(RX_BUF_SIZE));
        let limit = if dma { DMA_ENTRIES } else { 1 };

        let mut scan = Scan {
            slots: Vec::with_capacity(limit),
            reject: None,
            drained: false,
            dma,
        };
        let mut total = 0;
        for ahead in 0..limit {
            let bd = chan.rx_ring.peek(&self.bus, ahead);
            match Verdict::of(&bd) {
                Verdict::Empty => {
                    scan.drained = true;
                    break;
                }
                Verdict::Errored(status) => {
                    if self.config.verbose {
                        warn!("rx intr({}): status {:#x}", ahead, status.bits());
                    }
                    scan.reject = Some(Reject::Status(status));
                    break;
                }
                Verdict::BadLength(length) => {
                    if self.config.verbose {
                        warn!("rx intr({}): packet length error ({})", ahead, length);
                    }
                    scan.reject = Some(Reject::Length(length));
                    break;
                }
                Verdict::Valid { length, offset } => {
                    let size = round4(usize::from(length));
                    if total + size > capacity {
                        if scan.slots.is_empty() {
                            // Too big for scratch; read this one by hand.
                            dma = false;
                            scan.slots.push(Slot {
                                length,
                                offset,
                                local: 0,
                                size,
                            });
                        }
                        break;
                    }
                    scan.slots.push(Slot {
                        length,
                        offset,
                        local: total,
                        size,
                    });
                    total += size;
                }
            }
        }
        scan.dma = dma;
        scan
    }

    /// Have the coprocessor copy the batch into scratch, then copy it out.
    fn dma_read(&self, slots: &[Slot]) -> Option<Vec<Vec<u8>>> {
        let scratch = self.dma.rx.as_ref()?;
        let entries: Vec<DmaEntry> = slots
            .iter()
            .enumerate()
            .map(|(tag, slot)| DmaEntry {
                local_addr: slot.local as u32,
                device_offset: u32::from(slot.offset),
                size: slot.size as u32,
                tag: tag as u32,
            })
            .collect();
        let request = DmaRequest {
            command: entries[0].device_offset,
            devctrl: 0,
            count: entries.len() as u32,
            entries,
        };
        match rpc::transfer(&self.iop, Endpoint::RxDmaBegin, request) {
            Ok(0) => {}
            Ok(status) => {
                warn!("recv: dma break ({})", status);
                return None;
            }
            Err(err) => {
                if self.config.verbose {
                    debug!("recv: rpc failed ({:?}), PIO", err);
                }
                return None;
            }
        }
        slots
            .iter()
            .map(|slot| scratch.read(slot.local, usize::from(slot.length)))
            .collect()
    }

    /// Read one frame out of the FIFO a word at a time.
    fn pio_read(&self, slot: &Slot) -> Vec<u8> {
        let mut bounce = self.hold_rx_fifo();
        let words = &mut bounce[..slot.size];
        self.bus.write16(RXFIFO_RD_PTR, slot.offset);
        for word in words.chunks_exact_mut(4) {
            word.copy_from_slice(&self.bus.read32(RXFIFO_DATA).to_le_bytes());
        }
        words[..usize::from(slot.length)].to_vec()
    }

    /// Give every scanned descriptor back to hardware, exactly once.
    fn recycle_rx(&self, scan: &Scan, dma_failed: bool) -> usize {
        let mut chan = self.lock();
        for slot in &scan.slots {
            self.bus.write8(RXFIFO_FRAME_DEC, 1);
            chan.stats.rx_packets += 1;
            chan.stats.rx_bytes += u64::from(slot.length);
            chan.rx_ring.recycle(&self.bus);
        }
        if let Some(reject) = scan.reject {
            self.bus.write8(RXFIFO_FRAME_DEC, 1);
            match reject {
                Reject::Status(status) => chan.stats.record_rx_error(status),
                Reject::Length(_) => {
                    chan.stats.rx_errors += 1;
                    chan.stats.rx_length_errors += 1;
                }
            }
            chan.rx_ring.recycle(&self.bus);
        }
        if dma_failed {
            chan.stats.rx_dma_errors += 1;
        }

        let recycled = scan.slots.len() + usize::from(scan.reject.is_some());
        if recycled > 0 && chan.flags.contains(Flags::RXDNV_DISABLED) {
            chan.flags.remove(Flags::RXDNV_DISABLED);
            emac::mask_interrupt(&self.bus, Intr::RXDNV, true);
            self.bus.write16(INTR_CLR, Intr::RXDNV.bits());
        }
        if scan.drained {
            chan.rx_pending = chan.rx_pending.saturating_sub(1);
        }
        recycled
    }
}
