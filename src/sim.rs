//! A register-level model of the SMAP block and its coprocessor, for tests.
//!
//! The model keeps descriptor memory, both FIFOs with their frame counters,
//! the interrupt controller, the EMAC3 reset and idle bits, the STA port and
//! coprocessor DMA. Writing GNP to TxMODE0 transmits every ready descriptor
//! on the spot unless transmission is held.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::arena::round4;
use crate::bd::RING_LEN;
use crate::bd::rxbd::FLAGS_EMPTY;
use crate::bd::txbd::FLAGS_READY;
use crate::config::Config;
use crate::netif::FrameQueue;
use crate::regs::*;
use crate::rpc::{Completion, Direction, DmaBuffer, DmaRequest, Endpoint, Iop, RpcError};
use crate::{Duplex, LinkState, Smap, Speed, Worker};

pub(crate) const MAC: [u8; 6] = [0x00, 0x04, 0x1F, 0x00, 0x00, 0x01];

pub(crate) const LINK_100_FULL: LinkState = LinkState {
    up: true,
    speed: Speed::Mbps100,
    duplex: Duplex::Full,
};

pub(crate) const LINK_DOWN: LinkState = LinkState {
    up: false,
    speed: Speed::Mbps100,
    duplex: Duplex::Full,
};

/// A frame the model put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SentFrame {
    /// Descriptor pointer, in device address space.
    pub(crate) pointer: u16,
    pub(crate) length: u16,
    pub(crate) data: Vec<u8>,
}

struct State {
    regs: HashMap<u32, u32>,
    write_log: Vec<(u32, u32)>,

    tx_mem: Vec<u8>,
    tx_wr_ptr: usize,
    tx_frames: u8,
    tx_cursor: usize,
    hold_tx: bool,
    tx_status_once: Option<u16>,
    fifo_word_writes: usize,
    sent: Vec<SentFrame>,

    rx_mem: Vec<u8>,
    rx_rd_ptr: usize,
    rx_frames: u8,
    rx_cursor: usize,
    rx_write: usize,

    mac_stat: u32,
    stall_soft_reset: bool,

    sta: u32,
    phy: HashMap<(u32, u32), u16>,
    fail_mii_reads: bool,
    stall_mii: bool,
    sta_reads: usize,

    irq_requested: bool,
    fail_irq_requests: usize,

    bind_attempts: usize,
    fail_binds: usize,
    busy_calls: usize,
    calls: HashMap<Endpoint, usize>,
    fail_dma: HashMap<Endpoint, u32>,
    park: Option<Endpoint>,
    parked: Option<Completion>,
    tx_scratch: DmaBuffer,
    rx_scratch: DmaBuffer,
}

fn scratch(len: usize) -> DmaBuffer {
    DmaBuffer::try_new(len).expect("scratch buffer")
}

impl State {
    fn new() -> Self {
        Self {
            regs: HashMap::new(),
            write_log: Vec::new(),
            tx_mem: vec![0; TX_BUF_SIZE],
            tx_wr_ptr: 0,
            tx_frames: 0,
            tx_cursor: 0,
            hold_tx: false,
            tx_status_once: None,
            fifo_word_writes: 0,
            sent: Vec::new(),
            rx_mem: vec![0; RX_BUF_SIZE],
            rx_rd_ptr: 0,
            rx_frames: 0,
            rx_cursor: 0,
            rx_write: 0,
            mac_stat: 0,
            stall_soft_reset: false,
            sta: emac3::PHY_OP_COMPLETE,
            phy: HashMap::new(),
            fail_mii_reads: false,
            stall_mii: false,
            sta_reads: 0,
            irq_requested: false,
            fail_irq_requests: 0,
            bind_attempts: 0,
            fail_binds: 0,
            busy_calls: 0,
            calls: HashMap::new(),
            fail_dma: HashMap::new(),
            park: None,
            parked: None,
            tx_scratch: scratch(RX_BUF_SIZE),
            rx_scratch: scratch(RX_BUF_SIZE),
        }
    }

    fn get(&self, offset: u32) -> u32 {
        self.regs.get(&offset).copied().unwrap_or(0)
    }

    fn set(&mut self, offset: u32, value: u32) {
        self.regs.insert(offset, value);
    }

    fn raise(&mut self, bits: Intr) {
        let stat = self.get(INTR_STAT) as u16 | bits.bits();
        self.set(INTR_STAT, u32::from(stat));
    }

    fn read(&self, offset: u32) -> u32 {
        match offset {
            TXFIFO_FRAME_CNT => u32::from(self.tx_frames),
            RXFIFO_FRAME_CNT => u32::from(self.rx_frames),
            o if o == EMAC3_BASE + emac3::MODE0 => {
                let mode0 = self.get(o);
                if mode0 & (emac3::TXMAC_ENABLE | emac3::RXMAC_ENABLE) == 0 {
                    mode0 | emac3::TXMAC_IDLE | emac3::RXMAC_IDLE
                } else {
                    mode0
                }
            }
            o if o == EMAC3_BASE + emac3::INTR_STAT => self.mac_stat,
            o if o == EMAC3_BASE + emac3::STA_CTRL => {
                if self.stall_mii {
                    0
                } else {
                    self.sta
                }
            }
            o => self.get(o),
        }
    }

    fn read_rx_word(&mut self) -> u32 {
        let mut word = [0; 4];
        for byte in &mut word {
            *byte = self.rx_mem[self.rx_rd_ptr];
            self.rx_rd_ptr = (self.rx_rd_ptr + 1) % RX_BUF_SIZE;
        }
        u32::from_le_bytes(word)
    }

    fn write(&mut self, offset: u32, value: u32) {
        self.write_log.push((offset, value));
        match offset {
            INTR_CLR => {
                let stat = self.get(INTR_STAT) & !value;
                self.set(INTR_STAT, stat);
            }
            TXFIFO_CTRL | RXFIFO_CTRL => {
                if value & u32::from(FIFO_RESET) != 0 {
                    if offset == TXFIFO_CTRL {
                        self.tx_wr_ptr = 0;
                        self.tx_frames = 0;
                        self.tx_cursor = 0;
                    } else {
                        self.rx_rd_ptr = 0;
                        self.rx_frames = 0;
                        self.rx_cursor = 0;
                        self.rx_write = 0;
                    }
                }
                self.set(offset, value & !u32::from(FIFO_RESET));
            }
            TXFIFO_WR_PTR => self.tx_wr_ptr = value as usize % TX_BUF_SIZE,
            TXFIFO_DATA => {
                for byte in value.to_le_bytes() {
                    self.tx_mem[self.tx_wr_ptr] = byte;
                    self.tx_wr_ptr = (self.tx_wr_ptr + 1) % TX_BUF_SIZE;
                }
                self.fifo_word_writes += 1;
            }
            TXFIFO_FRAME_INC => self.tx_frames = self.tx_frames.wrapping_add(1),
            RXFIFO_RD_PTR => self.rx_rd_ptr = value as usize % RX_BUF_SIZE,
            RXFIFO_FRAME_DEC => self.rx_frames = self.rx_frames.saturating_sub(1),
            o if o == EMAC3_BASE + emac3::MODE0 => {
                let settled = if self.stall_soft_reset {
                    value
                } else {
                    value & !emac3::SOFT_RESET
                };
                self.set(o, settled);
            }
            o if o == EMAC3_BASE + emac3::INTR_STAT => self.mac_stat &= !value,
            o if o == EMAC3_BASE + emac3::TX_MODE0 => {
                if value & emac3::TX_GNP_0 != 0 && !self.hold_tx {
                    self.transmit_ready();
                }
            }
            o if o == EMAC3_BASE + emac3::STA_CTRL => self.sta_command(value),
            o => self.set(o, value),
        }
    }

    fn sta_command(&mut self, value: u32) {
        let phy = (value >> emac3::PHY_ADDR_SHIFT) & 0x1F;
        let reg = value & emac3::PHY_REG_MASK;
        let mut sta = emac3::PHY_OP_COMPLETE | (value & 0x3FF);
        if value & emac3::PHY_WRITE != 0 {
            self.phy
                .insert((phy, reg), (value >> emac3::PHY_DATA_SHIFT) as u16);
        } else if value & emac3::PHY_READ != 0 {
            let data = self.phy.get(&(phy, reg)).copied().unwrap_or(0);
            sta |= u32::from(data) << emac3::PHY_DATA_SHIFT;
            if self.fail_mii_reads {
                sta |= emac3::PHY_READ_ERROR;
            }
        }
        self.sta = sta;
    }

    /// Send every ready descriptor from the hardware cursor onward.
    fn transmit_ready(&mut self) {
        loop {
            let addr = BD_BASE_TX + (self.tx_cursor * 8) as u32;
            if self.get(addr) as u16 & FLAGS_READY == 0 {
                break;
            }
            let length = self.get(addr + 4) as u16;
            let pointer = self.get(addr + 6) as u16;
            let start = usize::from(pointer.wrapping_sub(TX_BUF_BASE)) % TX_BUF_SIZE;
            let data = (0..usize::from(length))
                .map(|i| self.tx_mem[(start + i) % TX_BUF_SIZE])
                .collect();
            self.sent.push(SentFrame {
                pointer,
                length,
                data,
            });

            let status = self.tx_status_once.take().unwrap_or(0);
            self.set(addr, u32::from(status));
            self.tx_frames = self.tx_frames.saturating_sub(1);
            self.tx_cursor = (self.tx_cursor + 1) % RING_LEN;
            self.raise(Intr::TXEND);
        }
    }
}

/// The simulated device. Clones share one model.
#[derive(Clone)]
pub(crate) struct Sim(Arc<Mutex<State>>);

impl Sim {
    pub(crate) fn new() -> Self {
        Self(Arc::new(Mutex::new(State::new())))
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn read8(&self, offset: u32) -> u8 {
        self.state().read(offset) as u8
    }

    pub(crate) fn read16(&self, offset: u32) -> u16 {
        self.state().read(offset) as u16
    }

    pub(crate) fn read32(&self, offset: u32) -> u32 {
        let mut state = self.state();
        if offset == RXFIFO_DATA {
            return state.read_rx_word();
        }
        if offset == EMAC3_BASE + emac3::STA_CTRL {
            state.sta_reads += 1;
        }
        state.read(offset)
    }

    pub(crate) fn write8(&self, offset: u32, value: u8) {
        self.state().write(offset, u32::from(value));
    }

    pub(crate) fn write16(&self, offset: u32, value: u16) {
        self.state().write(offset, u32::from(value));
    }

    pub(crate) fn write32(&self, offset: u32, value: u32) {
        self.state().write(offset, value);
    }

    /// Every register write since the last clear, oldest first.
    pub(crate) fn write_log(&self) -> Vec<(u32, u32)> {
        self.state().write_log.clone()
    }

    pub(crate) fn clear_write_log(&self) {
        self.state().write_log.clear();
    }

    pub(crate) fn raise(&self, bits: Intr) {
        self.state().raise(bits);
    }

    /// Latch MAC interrupt causes and signal them through the SMAP block.
    pub(crate) fn raise_mac(&self, bits: u32) {
        let mut state = self.state();
        state.mac_stat |= bits;
        state.raise(Intr::EMAC3);
    }

    pub(crate) fn irq_asserted(&self) -> bool {
        let state = self.state();
        state.irq_requested && state.get(INTR_STAT) & state.get(INTR_ENABLE) != 0
    }

    pub(crate) fn irq_requested(&self) -> bool {
        self.state().irq_requested
    }

    pub(crate) fn fail_irq_requests(&self, count: usize) {
        self.state().fail_irq_requests = count;
    }

    pub(crate) fn stall_soft_reset(&self, stall: bool) {
        self.state().stall_soft_reset = stall;
    }

    pub(crate) fn fail_mii_reads(&self, fail: bool) {
        self.state().fail_mii_reads = fail;
    }

    pub(crate) fn stall_mii(&self, stall: bool) {
        self.state().stall_mii = stall;
    }

    /// Polls of the STA control register so far.
    pub(crate) fn sta_reads(&self) -> usize {
        self.state().sta_reads
    }

    /// Stop (or resume) acting on GNP writes.
    pub(crate) fn hold_tx(&self, hold: bool) {
        self.state().hold_tx = hold;
    }

    /// Send whatever is ready, as a GNP write would.
    pub(crate) fn kick_tx(&self) {
        self.state().transmit_ready();
    }

    /// Complete the next transmitted frame with `status`.
    pub(crate) fn tx_status_once(&self, status: u16) {
        self.state().tx_status_once = Some(status);
    }

    pub(crate) fn fifo_word_writes(&self) -> usize {
        self.state().fifo_word_writes
    }

    pub(crate) fn sent(&self) -> Vec<SentFrame> {
        self.state().sent.clone()
    }

    /// Receive `frame` into the next RX descriptor, with error `status`.
    pub(crate) fn inject_rx(&self, frame: &[u8], status: u16) {
        let mut state = self.state();
        let addr = BD_BASE_RX + (state.rx_cursor * 8) as u32;
        assert_ne!(
            state.get(addr) as u16 & FLAGS_EMPTY,
            0,
            "rx descriptor {} still full",
            state.rx_cursor
        );

        let offset = state.rx_write;
        for (i, &byte) in frame.iter().enumerate() {
            state.rx_mem[(offset + i) % RX_BUF_SIZE] = byte;
        }
        state.rx_write = (offset + round4(frame.len())) % RX_BUF_SIZE;

        state.set(addr + 4, frame.len() as u32);
        state.set(addr + 6, u32::from(RX_BUF_BASE) + offset as u32);
        state.set(addr, u32::from(status));
        state.rx_cursor = (state.rx_cursor + 1) % RING_LEN;
        state.rx_frames = state.rx_frames.wrapping_add(1);
        state.raise(Intr::RXEND);
    }

    pub(crate) fn bind_attempts(&self) -> usize {
        self.state().bind_attempts
    }

    /// Fail the next `count` bind attempts.
    pub(crate) fn fail_binds(&self, count: usize) {
        self.state().fail_binds = count;
    }

    /// Refuse the next `count` calls as busy.
    pub(crate) fn busy_calls(&self, count: usize) {
        self.state().busy_calls = count;
    }

    /// Calls the transport accepted on `endpoint`.
    pub(crate) fn calls(&self, endpoint: Endpoint) -> usize {
        self.state().calls.get(&endpoint).copied().unwrap_or(0)
    }

    /// Complete the next call on `endpoint` with `status`, moving nothing.
    pub(crate) fn fail_next_dma(&self, endpoint: Endpoint, status: u32) {
        self.state().fail_dma.insert(endpoint, status);
    }

    /// Accept the next call on `endpoint` but leave it pending, moving
    /// nothing, until the test completes [`parked_call`](Sim::parked_call).
    pub(crate) fn park_next_call(&self, endpoint: Endpoint) {
        self.state().park = Some(endpoint);
    }

    pub(crate) fn parked_call(&self) -> Option<Completion> {
        self.state().parked.clone()
    }

    /// Hand out scratch buffers of `len` bytes.
    pub(crate) fn scratch_len(&self, len: usize) {
        let mut state = self.state();
        state.tx_scratch = scratch(len);
        state.rx_scratch = scratch(len);
    }
}

impl Bus for Sim {
    fn read8(&self, offset: u32) -> u8 {
        Sim::read8(self, offset)
    }

    fn read16(&self, offset: u32) -> u16 {
        Sim::read16(self, offset)
    }

    fn read32(&self, offset: u32) -> u32 {
        Sim::read32(self, offset)
    }

    fn write8(&self, offset: u32, value: u8) {
        Sim::write8(self, offset, value)
    }

    fn write16(&self, offset: u32, value: u16) {
        Sim::write16(self, offset, value)
    }

    fn write32(&self, offset: u32, value: u32) {
        Sim::write32(self, offset, value)
    }

    fn request_irq(&self) -> Result<(), IrqError> {
        let mut state = self.state();
        if state.fail_irq_requests > 0 {
            state.fail_irq_requests -= 1;
            return Err(IrqError(-16));
        }
        state.irq_requested = true;
        Ok(())
    }

    fn free_irq(&self) {
        self.state().irq_requested = false;
    }
}

impl Iop for Sim {
    fn bind(&self, _: Endpoint) -> Result<(), RpcError> {
        let mut state = self.state();
        state.bind_attempts += 1;
        if state.fail_binds > 0 {
            state.fail_binds -= 1;
            return Err(RpcError::Unbound);
        }
        Ok(())
    }

    fn buffer(&self, direction: Direction) -> Result<DmaBuffer, RpcError> {
        let state = self.state();
        Ok(match direction {
            Direction::Tx => state.tx_scratch.clone(),
            Direction::Rx => state.rx_scratch.clone(),
        })
    }

    fn call(
        &self,
        endpoint: Endpoint,
        request: DmaRequest,
        reply: Completion,
    ) -> Result<(), RpcError> {
        let mut state = self.state();
        if state.busy_calls > 0 {
            state.busy_calls -= 1;
            return Err(RpcError::Busy);
        }
        *state.calls.entry(endpoint).or_default() += 1;

        if state.park == Some(endpoint) {
            state.park = None;
            state.parked = Some(reply);
            return Ok(());
        }
        if let Some(status) = state.fail_dma.remove(&endpoint) {
            reply.complete(status);
            return Ok(());
        }

        for entry in &request.entries {
            let local = entry.local_addr as usize;
            let device = entry.device_offset as usize;
            let size = entry.size as usize;
            match endpoint {
                Endpoint::TxDmaBegin => {
                    let bytes = state.tx_scratch.read(local, size).expect("tx scratch range");
                    for (i, byte) in bytes.into_iter().enumerate() {
                        state.tx_mem[(device + i) % TX_BUF_SIZE] = byte;
                    }
                }
                Endpoint::RxDmaBegin => {
                    let bytes: Vec<u8> = (0..size)
                        .map(|i| state.rx_mem[(device + i) % RX_BUF_SIZE])
                        .collect();
                    assert!(state.rx_scratch.write_padded(local, &bytes, size));
                }
                Endpoint::TxDmaEnd | Endpoint::RxDmaEnd => {}
            }
        }
        reply.complete(0);
        Ok(())
    }
}

/// A device attached to a fresh model, not yet open.
pub(crate) fn attached(config: Config) -> (Smap<Sim, Sim>, Worker<Sim, Sim>, Sim, FrameQueue) {
    let sim = Sim::new();
    let rx = FrameQueue::new(256);
    let (smap, worker) = Smap::attach(sim.clone(), sim.clone(), MAC, config, rx.clone())
        .expect("attach");
    (smap, worker, sim, rx)
}

/// An open device with a 100 Mbit/s full duplex link, driven by
/// [`Smap::poll`] rather than a worker thread.
pub(crate) fn opened(config: Config) -> (Smap<Sim, Sim>, Sim, FrameQueue) {
    let (smap, _worker, sim, rx) = attached(config);
    smap.open().expect("open");
    smap.link_changed(LINK_100_FULL);
    (smap, sim, rx)
}

/// Spin until `done` holds, or fail the test.
pub(crate) fn wait_until(done: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done() {
        assert!(Instant::now() < deadline, "timed out");
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Delivers the simulated interrupt line to the device from a thread.
pub(crate) struct IrqPump {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl IrqPump {
    pub(crate) fn start(smap: &Smap<Sim, Sim>, sim: &Sim) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = Arc::clone(&stop);
            let smap = smap.clone();
            let sim = sim.clone();
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    if sim.irq_asserted() {
                        smap.handle_interrupt();
                    } else {
                        std::thread::sleep(Duration::from_micros(20));
                    }
                }
            })
        };
        Self { stop, handle }
    }

    pub(crate) fn stop(self) {
        self.stop.store(true, Ordering::Relaxed);
        self.handle.join().expect("irq pump");
    }
}
