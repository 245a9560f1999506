//! Coprocessor RPC and DMA coordination.
//!
//! The IOP performs FIFO DMA on our behalf. Calls are asynchronous: the
//! transport accepts a request and later signals a [`Completion`] with a
//! status word. The driver only ever waits for a completion from the worker,
//! never from the interrupt dispatcher.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::config::Config;

/// Most frames moved by one DMA request.
pub const DMA_ENTRIES: usize = 8;

/// RPC endpoints served by the coprocessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Endpoint {
    TxDmaBegin,
    TxDmaEnd,
    RxDmaBegin,
    RxDmaEnd,
}

impl Endpoint {
    pub const ALL: [Endpoint; 4] = [
        Endpoint::TxDmaBegin,
        Endpoint::TxDmaEnd,
        Endpoint::RxDmaBegin,
        Endpoint::RxDmaEnd,
    ];
}

/// Transfer direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Tx,
    Rx,
}

/// One slice of a DMA request.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DmaEntry {
    /// Offset into the direction's scratch [`DmaBuffer`].
    pub local_addr: u32,
    /// Offset into the device FIFO.
    pub device_offset: u32,
    /// Byte count, a multiple of four.
    pub size: u32,
    /// Opaque to the coprocessor; the batch index of the frame.
    pub tag: u32,
}

/// Payload of a DMA begin call. End calls carry an empty request.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DmaRequest {
    pub command: u32,
    pub devctrl: u32,
    pub count: u32,
    pub entries: Vec<DmaEntry>,
}

/// Errors issuing an RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RpcError {
    /// The channel is momentarily busy sending another packet; retry.
    #[error("rpc channel busy")]
    Busy,
    /// The endpoint has no server.
    #[error("rpc endpoint not bound")]
    Unbound,
    /// Any other transport failure.
    #[error("rpc failed ({0})")]
    Failed(i32),
}

/// A one-shot result slot shared between the caller and the transport.
#[derive(Debug, Clone, Default)]
pub struct Completion(Arc<CompletionInner>);

#[derive(Debug, Default)]
struct CompletionInner {
    result: Mutex<Option<u32>>,
    done: Condvar,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the call's result and wake the waiter.
    pub fn complete(&self, status: u32) {
        let mut result = self.0.result.lock().unwrap_or_else(PoisonError::into_inner);
        *result = Some(status);
        self.0.done.notify_all();
    }

    /// Block until [`complete`](Completion::complete) is called.
    pub fn wait(&self) -> u32 {
        let mut result = self.0.result.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(status) = *result {
                return status;
            }
            result = self
                .0
                .done
                .wait(result)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Scratch memory the coprocessor DMAs to or from.
///
/// Cloning shares the same bytes.
#[derive(Debug, Clone)]
pub struct DmaBuffer(Arc<Mutex<Box<[u8]>>>);

impl DmaBuffer {
    /// Allocate `len` zeroed bytes, reporting allocation failure.
    pub fn try_new(len: usize) -> Option<Self> {
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(len).ok()?;
        bytes.resize(len, 0);
        Some(Self(Arc::new(Mutex::new(bytes.into_boxed_slice()))))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `data` in at `offset`, zero-filling up to `size` bytes.
    ///
    /// Returns `false` if the range doesn't fit.
    pub fn write_padded(&self, offset: usize, data: &[u8], size: usize) -> bool {
        let mut bytes = self.lock();
        let Some(dst) = bytes.get_mut(offset..offset + size) else {
            return false;
        };
        let (head, tail) = dst.split_at_mut(data.len().min(size));
        head.copy_from_slice(&data[..head.len()]);
        tail.fill(0);
        true
    }

    /// Copy `len` bytes out from `offset`.
    pub fn read(&self, offset: usize, len: usize) -> Option<Vec<u8>> {
        self.lock().get(offset..offset + len).map(<[u8]>::to_vec)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Box<[u8]>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The coprocessor's RPC transport.
pub trait Iop: Send + Sync {
    /// Bind `endpoint` to its server. May fail transiently.
    fn bind(&self, endpoint: Endpoint) -> Result<(), RpcError>;

    /// Fetch the coprocessor's scratch buffer for one direction.
    fn buffer(&self, direction: Direction) -> Result<DmaBuffer, RpcError>;

    /// Issue `request` to `endpoint` without waiting.
    ///
    /// On `Ok`, the transport must eventually call `reply.complete(status)`
    /// exactly once, with zero meaning success. On `Err`, it must not.
    fn call(&self, endpoint: Endpoint, request: DmaRequest, reply: Completion)
    -> Result<(), RpcError>;
}

/// DMA resources obtained at attach.
#[derive(Debug, Default, Clone)]
pub(crate) struct DmaChannels {
    pub(crate) tx: Option<DmaBuffer>,
    pub(crate) rx: Option<DmaBuffer>,
}

/// Bind one endpoint, retrying with a fixed backoff.
fn bind_with_retry<I: Iop + ?Sized>(iop: &I, endpoint: Endpoint, config: &Config) -> bool {
    for attempt in 0..config.bind_retries {
        match iop.bind(endpoint) {
            Ok(()) => {
                if attempt > 0 {
                    debug!("bound {:?} after {} retries", endpoint, attempt);
                }
                return true;
            }
            Err(_) => std::thread::sleep(config.bind_backoff),
        }
    }
    false
}

/// Bind all four endpoints and fetch the scratch buffers.
///
/// Any failure leaves the affected direction (and everything after it) in
/// PIO mode for the lifetime of the device; nothing here is retried later.
pub(crate) fn setup<I: Iop + ?Sized>(iop: &I, config: &Config) -> DmaChannels {
    let mut channels = DmaChannels::default();
    if !config.dma {
        return channels;
    }

    for (n, endpoint) in Endpoint::ALL.into_iter().enumerate() {
        if !bind_with_retry(iop, endpoint, config) {
            warn!("dma setup: bind error {}, use PIO", n + 1);
            return channels;
        }
    }

    match iop.buffer(Direction::Tx) {
        Ok(buffer) if !buffer.is_empty() => channels.tx = Some(buffer),
        _ => {
            warn!("dma setup: no TX buffer, use PIO");
            return channels;
        }
    }
    match iop.buffer(Direction::Rx) {
        Ok(buffer) if !buffer.is_empty() => channels.rx = Some(buffer),
        _ => warn!("dma setup: no RX buffer, use PIO for RX"),
    }
    channels
}

/// Issue a DMA begin call and wait for its status.
///
/// `Err` means the request never left; `Ok(status)` carries the
/// coprocessor's result, zero on success.
pub(crate) fn transfer<I: Iop + ?Sized>(
    iop: &I,
    endpoint: Endpoint,
    request: DmaRequest,
) -> Result<u32, RpcError> {
    let reply = Completion::new();
    iop.call(endpoint, request, reply.clone())?;
    Ok(reply.wait())
}

/// Ask the coprocessor to abandon any DMA on `endpoint`.
///
/// The RPC channel can be busy; retry a bounded number of times.
pub(crate) fn force_break<I: Iop + ?Sized>(iop: &I, endpoint: Endpoint, config: &Config) {
    for _ in 1..config.break_retries {
        let reply = Completion::new();
        match iop.call(endpoint, DmaRequest::default(), reply.clone()) {
            Ok(()) => {
                reply.wait();
                return;
            }
            Err(RpcError::Busy) => {
                std::thread::sleep(Duration::from_micros(10));
                continue;
            }
            Err(err) => {
                warn!("{:?} stop call failed: {:?}", endpoint, err);
                return;
            }
        }
    }
    warn!("{:?} stop call failed: channel busy", endpoint);
}
