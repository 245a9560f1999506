//! Error types.

use crate::regs::IrqError;

/// Device bring-up failed; the device is unusable.
#[derive(Debug, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AttachError {
    #[error("cannot allocate {0} byte transfer buffer")]
    OutOfMemory(usize),
    #[error("invalid MAC address")]
    InvalidAddress,
    /// A coprocessor scratch buffer can't hold one full frame.
    #[error("coprocessor scratch buffer too small ({0} bytes)")]
    ScratchTooSmall(usize),
}

#[derive(Debug, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OpenError {
    #[error("device already open")]
    AlreadyOpen,
    #[error("device was detached")]
    Detached,
    #[error(transparent)]
    Irq(#[from] IrqError),
}

#[derive(Debug, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CloseError {
    #[error("device not open")]
    NotOpen,
}

/// A frame the device did not take. Every variant hands the frame back.
#[derive(Debug, thiserror::Error)]
pub enum TransmitError {
    /// Queue above its high-water mark; retry after the stack is woken.
    #[error("transmit queue full")]
    Backpressure(Vec<u8>),
    #[error("link not valid")]
    LinkDown(Vec<u8>),
    #[error("device not open")]
    NotOpen(Vec<u8>),
    #[error("frame length out of range")]
    InvalidLength(Vec<u8>),
}

impl TransmitError {
    /// Recover the rejected frame.
    pub fn into_frame(self) -> Vec<u8> {
        match self {
            TransmitError::Backpressure(frame)
            | TransmitError::LinkDown(frame)
            | TransmitError::NotOpen(frame)
            | TransmitError::InvalidLength(frame) => frame,
        }
    }
}

/// An error during an MII management transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MiiError {
    #[error("MII operation did not complete")]
    Timeout,
    #[error("PHY reported a read error")]
    ReadFailed,
}
