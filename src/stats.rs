//! Device statistics.

use crate::bd::{rxbd::RxStatus, txbd::TxStatus};

/// Counters kept by the packet engine.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub tx_errors: u64,
    /// Frames discarded without reaching the wire.
    pub tx_dropped: u64,
    pub tx_carrier_errors: u64,
    pub tx_fifo_errors: u64,
    pub tx_aborted_errors: u64,
    pub tx_window_errors: u64,
    pub collisions: u64,
    /// Coprocessor TX DMA completions with a failure status.
    pub tx_dma_errors: u64,

    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub rx_errors: u64,
    pub rx_length_errors: u64,
    pub rx_crc_errors: u64,
    pub rx_frame_errors: u64,
    pub rx_over_errors: u64,
    /// Coprocessor RX DMA failures (the batch was re-read with PIO).
    pub rx_dma_errors: u64,

    /// EMAC3 error interrupts.
    pub mac_errors: u64,
}

impl Stats {
    /// Account one reaped TX descriptor. Returns `true` if it was sent.
    pub(crate) fn record_tx(&mut self, status: TxStatus, length: u16) -> bool {
        if status.intersects(TxStatus::SINGLE_COLLISION) {
            self.collisions += 1;
        }
        if status.intersects(TxStatus::MULTIPLE_COLLISION) {
            self.collisions += 1;
        }
        if !status.intersects(TxStatus::ERRORS) {
            self.tx_packets += 1;
            self.tx_bytes += u64::from(length);
            return true;
        }
        self.tx_errors += 1;
        if status.contains(TxStatus::LOSS_OF_CARRIER) {
            self.tx_carrier_errors += 1;
        }
        if status.contains(TxStatus::UNDERRUN) {
            self.tx_fifo_errors += 1;
        }
        if status.contains(TxStatus::EXCESSIVE_COLLISION) {
            self.tx_aborted_errors += 1;
        }
        if status.contains(TxStatus::LATE_COLLISION) {
            self.tx_window_errors += 1;
        }
        false
    }

    /// Account one RX descriptor that hardware flagged.
    pub(crate) fn record_rx_error(&mut self, status: RxStatus) {
        self.rx_errors += 1;
        if status.contains(RxStatus::BAD_FCS) {
            self.rx_crc_errors += 1;
        }
        if status.intersects(RxStatus::ALIGN_ERROR | RxStatus::BAD_FRAME) {
            self.rx_frame_errors += 1;
        }
        if status.contains(RxStatus::OVERRUN) {
            self.rx_over_errors += 1;
        }
        if status.intersects(
            RxStatus::RUNT_FRAME
                | RxStatus::FRAME_TOO_LONG
                | RxStatus::OUT_OF_RANGE
                | RxStatus::IN_RANGE,
        ) {
            self.rx_length_errors += 1;
        }
    }
}
