//! Bus handshake progress and the inbound and outbound buffers.

use crate::bitmap::ClientBitmap;
use crate::header::MessageHeader;
use crate::transaction::TxQueue;

/// Bytes of the host bus message receive buffer.
pub(crate) const RX_BUFFER_SIZE: usize = 512;

/// Progress of the host bus handshake. Ordered by handshake step.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum BusState {
    Idle,
    Starting,
    SetupCapabilities,
    SetupDmaRing,
    EnumerateClients,
    RequestingClientProps,
    Started,
    Stopped,
}

pub(crate) struct Bus {
    pub(crate) state: BusState,
    /// Header of a message whose body has not fully arrived yet.
    pub(crate) rx_header: Option<MessageHeader>,
    pub(crate) rx_buffer: [u8; RX_BUFFER_SIZE],
    pub(crate) valid_addresses: ClientBitmap,
    pub(crate) tx_queue: TxQueue,
    pub(crate) tx_buffer_ready: bool,
}

impl Bus {
    pub(crate) const fn new() -> Self {
        Self {
            state: BusState::Idle,
            rx_header: None,
            rx_buffer: [0; RX_BUFFER_SIZE],
            valid_addresses: ClientBitmap::from_bytes([0; ClientBitmap::BYTES]),
            tx_queue: TxQueue::new(),
            tx_buffer_ready: false,
        }
    }
}
