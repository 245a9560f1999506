//! Packet engine for the PlayStation 2 SMAP Ethernet block.
//!
//! The SMAP block couples an EMAC3 MAC to a pair of on-device FIFOs. Frames
//! move between host memory and those FIFOs either by programmed I/O or by
//! asking the I/O coprocessor (IOP) to DMA them, and each FIFO is described
//! to the MAC through a ring of buffer descriptors.
//!
//! [`Smap::attach`] brings the block up and returns the device handle with
//! its [`Worker`]. Run the worker on its own thread, or call [`Smap::poll`]
//! from your own loop. Route the device interrupt to
//! [`Smap::handle_interrupt`], and report PHY link changes through
//! [`Smap::link_changed`].
//!
//! The MII management port is always available. To use it, see [`MiimRead`]
//! and [`MiimWrite`]. For a [`smoltcp`] device, see [`Interface`].

#![forbid(unsafe_code)]

#[macro_use]
mod fmt;

mod arena;
mod bd;
mod channel;
mod config;
mod emac;
mod error;
mod irq;
mod netif;
pub mod regs;
mod rpc;
mod rx;
mod stats;
mod tx;
mod worker;

#[cfg(test)]
mod sim;

use std::sync::Arc;

use arena::round4;
use bd::rxbd::MAX_FRAME_LEN;
use channel::{Channel, Flags, Shared};
use emac::ResetKind;
use regs::{emac3, emac3_read, emac3_write};

pub use bd::{RING_HEADROOM, RING_LEN};
pub use config::Config;
pub use emac::RxFilter;
pub use error::{AttachError, CloseError, MiiError, OpenError, TransmitError};
pub use irq::IrqReturn;
pub use netif::{FrameQueue, Interface, NetStack};
pub use regs::{Bus, IrqError};
pub use rpc::{
    Completion, DMA_ENTRIES, Direction, DmaBuffer, DmaEntry, DmaRequest, Endpoint, Iop, RpcError,
};
pub use stats::Stats;
pub use worker::Worker;

pub use mdio::miim::{Read as MiimRead, Write as MiimWrite};
pub use smoltcp;

/// Allows independent transmit and receive functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Duplex {
    /// Transmit and receive functions cannot overlap.
    ///
    /// The MAC honors carrier sense and collisions, and at 10 Mbit/s also
    /// runs the SQE test.
    Half,
    /// The MAC can transmit and receive simultaneously.
    ///
    /// Flow control is enabled and the MAC acts on pause frames.
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Speed {
    Mbps10,
    Mbps100,
}

/// What the PHY negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkState {
    pub up: bool,
    pub speed: Speed,
    pub duplex: Duplex,
}

/// Device lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceState {
    Uninit,
    /// Registers are being brought to a known state.
    Reset,
    /// Attached and idle.
    Configured,
    Open,
    /// Closing; the worker is draining the transmit queue.
    Closing,
    Closed,
    /// Detached. Nothing more can happen.
    TornDown,
}

/// An SMAP device.
///
/// Handles are cheap to clone and may be used from any thread. Every clone
/// refers to the same device. Dropping the last handle stops the
/// [`Worker`]; call [`detach`](Smap::detach) to also reset the block.
pub struct Smap<B, I> {
    pub(crate) shared: Arc<Shared<B, I>>,
    lifeline: Arc<Lifeline<B, I>>,
}

impl<B, I> Clone for Smap<B, I> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            lifeline: Arc::clone(&self.lifeline),
        }
    }
}

/// Shared by every [`Smap`] handle, but not by the [`Worker`].
struct Lifeline<B, I>(Arc<Shared<B, I>>);

impl<B, I> Drop for Lifeline<B, I> {
    fn drop(&mut self) {
        self.0.stop_worker();
    }
}

/// Allocate a PIO bounce buffer.
fn bounce(len: usize) -> Result<Vec<u8>, AttachError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| AttachError::OutOfMemory(len))?;
    buffer.resize(len, 0);
    Ok(buffer)
}

impl<B: Bus, I: Iop> Smap<B, I> {
    /// Reset the block, bind the coprocessor and prepare the device.
    ///
    /// `mac` is the station address; it must be a unicast, non-zero
    /// address. Received frames and queue wakeups go to `stack`.
    ///
    /// If the coprocessor can't be bound, the device uses PIO for its whole
    /// life. That is not an error.
    pub fn attach(
        bus: B,
        iop: I,
        mac: [u8; 6],
        config: Config,
        stack: impl NetStack + 'static,
    ) -> Result<(Self, Worker<B, I>), AttachError> {
        if mac == [0; 6] || mac[0] & 1 != 0 {
            return Err(AttachError::InvalidAddress);
        }

        let frame_buffer = round4(usize::from(MAX_FRAME_LEN));
        let tx_bounce = bounce(frame_buffer)?;
        let rx_bounce = bounce(frame_buffer)?;

        let mut chan = Channel::new(emac3::MODE1_DEFAULT);
        chan.state = DeviceState::Reset;
        emac::reset(&bus, &config, &mac, ResetKind::Full);

        let dma = rpc::setup(&iop, &config);
        for scratch in [&dma.tx, &dma.rx].into_iter().flatten() {
            if scratch.len() < frame_buffer {
                return Err(AttachError::ScratchTooSmall(scratch.len()));
            }
        }

        chan.flags.insert(Flags::INIT_DONE);
        chan.flags.set(Flags::DMA_TX, dma.tx.is_some());
        chan.flags.set(Flags::DMA_RX, dma.rx.is_some());
        chan.state = DeviceState::Configured;
        info!(
            "smap attached, tx {}, rx {}",
            if dma.tx.is_some() { "DMA" } else { "PIO" },
            if dma.rx.is_some() { "DMA" } else { "PIO" }
        );

        let shared = Arc::new(Shared::new(
            bus,
            iop,
            config,
            mac,
            dma,
            chan,
            tx_bounce,
            rx_bounce,
            Box::new(stack),
        ));
        let worker = Worker {
            shared: Arc::clone(&shared),
        };
        let lifeline = Arc::new(Lifeline(Arc::clone(&shared)));
        Ok((Self { shared, lifeline }, worker))
    }

    /// Bring the interface up.
    ///
    /// Resets the FIFOs and the MAC, rebuilds both rings, installs the
    /// interrupt and starts the MAC data paths.
    pub fn open(&self) -> Result<(), OpenError> {
        let shared = &*self.shared;
        let _drain = shared.hold_drain();

        let mode1 = {
            let chan = shared.lock();
            match chan.state {
                DeviceState::TornDown | DeviceState::Uninit => return Err(OpenError::Detached),
                DeviceState::Open | DeviceState::Closing => return Err(OpenError::AlreadyOpen),
                _ => {}
            }
            chan.mode1
        };

        {
            let _mac = shared.hold_mac();
            emac::fifo_reset(&shared.bus, &shared.config);
            emac::reinit(&shared.bus, &shared.config, &shared.mac, mode1);
        }
        {
            let mut chan = shared.lock();
            chan.tx_ring.init(&shared.bus);
            chan.rx_ring.init(&shared.bus);
            chan.tx_arena.reset();
        }

        if let Err(err) = shared.bus.request_irq() {
            warn!("request_irq failed ({:?}), retrying", err);
            shared.bus.request_irq()?;
        }

        let carrier = {
            let mut chan = shared.lock();
            chan.queue.clear();
            chan.tx_pending = 0;
            chan.rx_pending = 0;
            chan.flags.remove(
                Flags::TXDNV_DISABLED
                    | Flags::RXDNV_DISABLED
                    | Flags::QUEUE_STOPPED
                    | Flags::FORCE_PIO,
            );
            chan.flags.insert(Flags::IRQ_INSTALLED);

            emac::clear_interrupts(&shared.bus);
            emac::enable_interrupts(&shared.bus, true);
            emac::set_txrx(&shared.bus, true, &shared.config);

            chan.flags.insert(Flags::OPENED);
            chan.state = DeviceState::Open;
            channel::wake(&mut chan, &shared.wake);
            chan.flags.contains(Flags::LINK_VALID)
        };
        info!("smap open");

        if carrier {
            shared.with_stack(|stack| stack.carrier_changed(true));
        }
        Ok(())
    }

    /// Bring the interface down.
    ///
    /// Frames already queued are transmitted first, unless the link is down,
    /// in which case they are dropped. No new frames are accepted once this
    /// is called. Blocks until the queue has drained.
    pub fn close(&self) -> Result<(), CloseError> {
        let shared = &*self.shared;

        let done = {
            let mut chan = shared.lock();
            if chan.state != DeviceState::Open {
                return Err(CloseError::NotOpen);
            }
            chan.flags.remove(Flags::OPENED);
            chan.state = DeviceState::Closing;
            let done = Completion::new();
            chan.close_done = Some(done.clone());
            channel::wake(&mut chan, &shared.wake);
            done
        };
        // Cycles are serialized, so this drain starts only after any pass
        // already in progress has sent or requeued its batch. A running
        // worker may get to the drain first.
        shared.run_cycle();
        done.wait();

        let _drain = shared.hold_drain();
        shared.reclaim_pass();
        self.break_dma();
        {
            let _mac = shared.hold_mac();
            emac::set_txrx(&shared.bus, false, &shared.config);
        }

        {
            let mut chan = shared.lock();
            let leftovers = chan.queue.len();
            if leftovers > 0 {
                chan.stats.tx_dropped += leftovers as u64;
                chan.queue.clear();
            }

            emac::enable_interrupts(&shared.bus, false);
            emac::clear_interrupts(&shared.bus);

            chan.tx_pending = 0;
            chan.rx_pending = 0;
            chan.close_done = None;
            chan.flags.remove(
                Flags::IRQ_INSTALLED
                    | Flags::QUEUE_STOPPED
                    | Flags::TXDNV_DISABLED
                    | Flags::RXDNV_DISABLED
                    | Flags::FORCE_PIO,
            );
            chan.state = DeviceState::Closed;
        }
        shared.bus.free_irq();
        info!("smap closed");

        shared.with_stack(|stack| stack.carrier_changed(false));
        Ok(())
    }

    /// Ask the coprocessor to abandon DMA in each direction that uses it.
    fn break_dma(&self) {
        let shared = &*self.shared;
        let flags = shared.lock().flags;
        if flags.contains(Flags::DMA_TX) {
            rpc::force_break(&shared.iop, Endpoint::TxDmaEnd, &shared.config);
        }
        if flags.contains(Flags::DMA_RX) {
            rpc::force_break(&shared.iop, Endpoint::RxDmaEnd, &shared.config);
        }
    }

    /// Queue one frame, without FCS, for transmission.
    ///
    /// On error the frame is handed back. After [`TransmitError::Backpressure`]
    /// the stack's [`NetStack::wake_queue`] is called once there is room.
    pub fn transmit(&self, frame: Vec<u8>) -> Result<(), TransmitError> {
        let shared = &*self.shared;
        let mut chan = shared.lock();
        if !chan.flags.contains(Flags::OPENED) {
            return Err(TransmitError::NotOpen(frame));
        }
        if !chan.flags.contains(Flags::LINK_VALID) {
            return Err(TransmitError::LinkDown(frame));
        }
        if frame.is_empty() || frame.len() > usize::from(MAX_FRAME_LEN) {
            return Err(TransmitError::InvalidLength(frame));
        }
        if chan.queue.len() > chan.high_water() {
            chan.flags.insert(Flags::QUEUE_STOPPED);
            return Err(TransmitError::Backpressure(frame));
        }

        chan.queue.push_back(frame);
        channel::wake(&mut chan, &shared.wake);
        Ok(())
    }

    /// Whether [`transmit`](Smap::transmit) would take a frame right now.
    pub fn can_transmit(&self) -> bool {
        let chan = self.shared.lock();
        chan.flags.contains(Flags::OPENED | Flags::LINK_VALID)
            && chan.queue.len() <= chan.high_water()
    }

    /// Service the device interrupt.
    ///
    /// Short and non-blocking beyond the device lock. All data movement is
    /// left to the worker.
    pub fn handle_interrupt(&self) -> IrqReturn {
        self.shared.dispatch()
    }

    /// Report the PHY's view of the link.
    ///
    /// Only a change does anything. Bringing the link up programs duplex and
    /// speed into the MAC.
    pub fn link_changed(&self, link: LinkState) {
        let shared = &*self.shared;
        let opened = {
            let _mac = shared.hold_mac();
            let mut chan = shared.lock();
            if chan.link == Some(link) {
                return;
            }
            chan.link = Some(link);

            if link.up {
                let current = emac3_read(&shared.bus, emac3::MODE1);
                let mode1 = emac::link_mode1(current, &link);
                emac3_write(&shared.bus, emac3::MODE1, mode1);
                chan.mode1 = mode1;
                chan.flags.insert(Flags::LINK_VALID);
                info!("link up, {:?}, {:?} duplex", link.speed, link.duplex);
            } else {
                chan.flags.remove(Flags::LINK_VALID);
                info!("link down");
            }
            channel::wake(&mut chan, &shared.wake);
            chan.flags.contains(Flags::OPENED)
        };

        if opened {
            shared.with_stack(|stack| stack.carrier_changed(link.up));
        }
    }

    /// Program receive address filtering.
    ///
    /// The MAC data paths are briefly stopped around the update.
    pub fn set_rx_filter(&self, filter: RxFilter<'_>) {
        let _mac = self.shared.hold_mac();
        emac::set_rx_filter(&self.shared.bus, &self.shared.config, filter);
    }

    /// Reset the block after a transmit timeout.
    ///
    /// Frames posted to hardware are lost and counted as dropped; queued
    /// frames are kept and go out once the worker runs again.
    pub fn recover(&self) {
        let shared = &*self.shared;
        let _drain = shared.hold_drain();

        let mode1 = {
            let chan = shared.lock();
            if !chan.flags.contains(Flags::INIT_DONE) {
                return;
            }
            chan.mode1
        };
        warn!("transmit timed out, resetting");

        self.break_dma();
        {
            let _mac = shared.hold_mac();
            emac::reset(&shared.bus, &shared.config, &shared.mac, ResetKind::Full);
            emac::set_txrx(&shared.bus, false, &shared.config);
            emac3_write(&shared.bus, emac3::MODE1, mode1);
        }

        {
            let mut chan = shared.lock();
            let lost = chan.tx_ring.outstanding();
            chan.stats.tx_dropped += lost as u64;
            chan.stats.tx_errors += 1;
            chan.tx_ring.init(&shared.bus);
            chan.rx_ring.init(&shared.bus);
            chan.tx_arena.reset();
            chan.tx_pending = 0;
            chan.rx_pending = 0;
            chan.flags.remove(
                Flags::TXDNV_DISABLED
                    | Flags::RXDNV_DISABLED
                    | Flags::QUEUE_STOPPED
                    | Flags::FORCE_PIO,
            );

            emac::clear_interrupts(&shared.bus);
            if chan.flags.contains(Flags::IRQ_INSTALLED) {
                emac::enable_interrupts(&shared.bus, true);
            }
            if chan.flags.contains(Flags::OPENED) {
                emac::set_txrx(&shared.bus, true, &shared.config);
            }
            channel::wake(&mut chan, &shared.wake);
        }

        shared.with_stack(|stack| stack.wake_queue());
    }

    /// Run one worker cycle on the calling thread.
    ///
    /// For hosts that don't spawn the [`Worker`]. Safe to call alongside a
    /// running worker; the two never run a cycle at the same time.
    pub fn poll(&self) {
        self.shared.run_cycle();
    }

    pub fn stats(&self) -> Stats {
        self.shared.lock().stats
    }

    pub fn state(&self) -> DeviceState {
        self.shared.lock().state
    }

    /// The last link reported through [`link_changed`](Smap::link_changed).
    pub fn link(&self) -> Option<LinkState> {
        self.shared.lock().link
    }

    pub fn mac_address(&self) -> [u8; 6] {
        self.shared.mac
    }

    /// Whether `direction` moves frames with the coprocessor.
    pub fn is_dma_enabled(&self, direction: Direction) -> bool {
        let flags = self.shared.lock().flags;
        match direction {
            Direction::Tx => flags.contains(Flags::DMA_TX),
            Direction::Rx => flags.contains(Flags::DMA_RX),
        }
    }

    /// Close the device if needed, stop the worker and reset the block.
    ///
    /// Other handles stay valid but every operation on them fails.
    pub fn detach(self) {
        if self.state() == DeviceState::Open {
            if let Err(err) = self.close() {
                debug!("detach: {:?}", err);
            }
        }

        let shared = &*self.shared;
        let _drain = shared.hold_drain();
        {
            let mut chan = shared.lock();
            chan.flags.remove(Flags::INIT_DONE | Flags::OPENED);
            chan.state = DeviceState::TornDown;
        }
        shared.stop_worker();
        let _mac = shared.hold_mac();
        emac::reset(&shared.bus, &shared.config, &shared.mac, ResetKind::Only);
        info!("smap detached");
    }
}

impl<B: Bus, I: Iop> mdio::Read for Smap<B, I> {
    type Error = MiiError;

    #[inline]
    fn read(&mut self, ctrl_bits: u16) -> Result<u16, Self::Error> {
        let (phy, reg) = mii_target(ctrl_bits);
        let _mac = self.shared.hold_mac();
        emac::mii_read(&self.shared.bus, &self.shared.config, phy, reg)
    }
}

impl<B: Bus, I: Iop> mdio::Write for Smap<B, I> {
    type Error = MiiError;

    #[inline]
    fn write(&mut self, ctrl_bits: u16, data_bits: u16) -> Result<(), Self::Error> {
        let (phy, reg) = mii_target(ctrl_bits);
        let _mac = self.shared.hold_mac();
        emac::mii_write(&self.shared.bus, &self.shared.config, phy, reg, data_bits)
    }
}

/// PHY and register address from clause 22 control bits.
fn mii_target(ctrl_bits: u16) -> (u8, u8) {
    (((ctrl_bits >> 7) & 0x1F) as u8, ((ctrl_bits >> 2) & 0x1F) as u8)
}
