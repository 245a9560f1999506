//! The upward interface, and a [`smoltcp`] binding built on it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::Smap;
use crate::bd::rxbd::MAX_FRAME_LEN;
use crate::regs::Bus;
use crate::rpc::Iop;

/// The host network stack, as the driver sees it.
///
/// Calls never happen with the device lock held, so implementations may
/// call back into [`Smap`].
pub trait NetStack: Send {
    /// A validated frame, without FCS, in ring order.
    fn deliver(&mut self, frame: &[u8]);

    /// Room was made after [`Smap::transmit`] pushed back.
    fn wake_queue(&mut self) {}

    /// Carrier came up or went down.
    fn carrier_changed(&mut self, up: bool) {
        let _ = up;
    }
}

#[derive(Debug, Default)]
struct Inbox {
    frames: VecDeque<Vec<u8>>,
    capacity: usize,
    overflows: u64,
    wakeups: u64,
    carrier: bool,
}

/// A bounded queue of received frames.
///
/// Clones share one queue: hand one to [`Smap::attach`] and read from
/// another. When full, new frames are dropped and counted.
#[derive(Debug, Clone)]
pub struct FrameQueue(Arc<Mutex<Inbox>>);

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self(Arc::new(Mutex::new(Inbox {
            frames: VecDeque::with_capacity(capacity),
            capacity,
            ..Inbox::default()
        })))
    }

    fn lock(&self) -> MutexGuard<'_, Inbox> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pop(&self) -> Option<Vec<u8>> {
        self.lock().frames.pop_front()
    }

    /// Take everything queued.
    pub fn drain(&self) -> Vec<Vec<u8>> {
        self.lock().frames.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames dropped because the queue was full.
    pub fn overflows(&self) -> u64 {
        self.lock().overflows
    }

    /// Times the driver reported room after pushing back.
    pub fn wakeups(&self) -> u64 {
        self.lock().wakeups
    }

    pub fn carrier(&self) -> bool {
        self.lock().carrier
    }
}

impl NetStack for FrameQueue {
    fn deliver(&mut self, frame: &[u8]) {
        let mut inbox = self.lock();
        if inbox.frames.len() >= inbox.capacity {
            inbox.overflows += 1;
            return;
        }
        inbox.frames.push_back(frame.to_vec());
    }

    fn wake_queue(&mut self) {
        self.lock().wakeups += 1;
    }

    fn carrier_changed(&mut self, up: bool) {
        self.lock().carrier = up;
    }
}

/// A [`smoltcp`] device over an opened [`Smap`].
///
/// Received frames come from the [`FrameQueue`] given to
/// [`Smap::attach`]; transmitted frames go through [`Smap::transmit`].
pub struct Interface<B: Bus, I: Iop> {
    smap: Smap<B, I>,
    rx: FrameQueue,
}

impl<B: Bus, I: Iop> Interface<B, I> {
    pub fn new(smap: Smap<B, I>, rx: FrameQueue) -> Self {
        Self { smap, rx }
    }

    pub fn smap(&self) -> &Smap<B, I> {
        &self.smap
    }
}

#[doc(hidden)]
pub struct RxToken {
    frame: Vec<u8>,
}

impl smoltcp::phy::RxToken for RxToken {
    fn consume<R, F>(self, f: F) -> R
    where
        F: FnOnce(&[u8]) -> R,
    {
        f(&self.frame)
    }
}

#[doc(hidden)]
pub struct TxToken<'a, B: Bus, I: Iop> {
    smap: &'a Smap<B, I>,
}

impl<B: Bus, I: Iop> smoltcp::phy::TxToken for TxToken<'_, B, I> {
    fn consume<R, F>(self, len: usize, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        let mut frame = vec![0; len];
        let result = f(&mut frame);
        // smoltcp has no way to hear about a refusal; its protocols
        // retransmit or drop as they see fit.
        if self.smap.transmit(frame).is_err() {
            debug!("smoltcp frame of {} bytes not sent", len);
        }
        result
    }
}

impl<B: Bus, I: Iop> smoltcp::phy::Device for Interface<B, I> {
    type RxToken<'a>
        = RxToken
    where
        Self: 'a;
    type TxToken<'a>
        = TxToken<'a, B, I>
    where
        Self: 'a;

    fn receive(
        &mut self,
        _: smoltcp::time::Instant,
    ) -> Option<(Self::RxToken<'_>, Self::TxToken<'_>)> {
        // Received frames keep flowing while transmit is pushed back; a
        // reply sent through the paired token is then refused and dropped.
        let frame = self.rx.pop()?;
        Some((RxToken { frame }, TxToken { smap: &self.smap }))
    }

    fn transmit(&mut self, _: smoltcp::time::Instant) -> Option<Self::TxToken<'_>> {
        self.smap
            .can_transmit()
            .then_some(TxToken { smap: &self.smap })
    }

    fn capabilities(&self) -> smoltcp::phy::DeviceCapabilities {
        let mtu = usize::from(MAX_FRAME_LEN) - 4;

        let mut caps = smoltcp::phy::DeviceCapabilities::default();
        caps.medium = smoltcp::phy::Medium::Ethernet;
        caps.max_transmission_unit = mtu;
        caps.max_burst_size = Some(crate::rpc::DMA_ENTRIES);
        caps
    }
}
