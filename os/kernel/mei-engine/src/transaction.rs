//! Outbound client messages: the transaction queue and the write rules.

use crate::device::DeviceState;
use crate::engine::{Engine, WaitOutcome};
use crate::error::{SendError, TransportError};
use crate::header::MessageHeader;
use crate::platform::Platform;
use crate::power::{PowerGatingEvent, PowerGatingState};
use crate::transport::Transport;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;
use log::{debug, error, trace, warn};
use mei_registers::{RegisterWindow, SLOT_SIZE, slots_to_bytes};

/// Largest header plus payload a single write may carry.
const MAX_WRITE_BYTES: usize = 512;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct TxId(u64);

/// One outbound client message.
#[derive(Debug)]
pub(crate) struct Transaction {
    id: TxId,
    me_addr: u8,
    data: Vec<u8>,
    /// Bytes already written.
    offset: usize,
    blocking: bool,
}

impl Transaction {
    fn remaining(&self) -> &[u8] {
        &self.data[self.offset..]
    }
}

/// What a single write attempt achieved.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Submission {
    /// The last fragment was written.
    Completed,
    /// A fragment was written; more remain.
    Partial,
    /// Nothing was written; try again after the next interrupt.
    Deferred,
    /// The write failed; the transaction is dropped.
    Failed(TransportError),
}

/// Writes as much of `tx` as the host buffer allows.
///
/// The whole remainder is written if it fits. Otherwise a fragment is only
/// written into a completely empty buffer, so the ME never sees a partial
/// message interleaved with its own progress.
pub(crate) fn write_transaction<W>(
    transport: &Transport<'_, W>,
    depth: u8,
    tx: &mut Transaction,
) -> Submission
where
    W: RegisterWindow + ?Sized,
{
    let free = match transport.free_slots(depth) {
        Ok(free) => free,
        Err(err) => return Submission::Failed(err),
    };
    let free_bytes = slots_to_bytes(usize::from(free)).min(MAX_WRITE_BYTES);
    let remaining = tx.remaining();

    let (length, complete) = if SLOT_SIZE + remaining.len() <= free_bytes {
        (remaining.len(), true)
    } else if free == depth && free_bytes > SLOT_SIZE {
        (free_bytes - SLOT_SIZE, false)
    } else {
        return Submission::Deferred;
    };

    let header = MessageHeader::client(
        tx.me_addr,
        u16::try_from(length).unwrap_or(u16::MAX),
        complete,
    );
    trace!(
        "writing {length} of {} remaining bytes to client {}",
        remaining.len(),
        tx.me_addr
    );
    if let Err(err) = transport.write_message(header, &remaining[..length], depth) {
        return Submission::Failed(err);
    }

    if complete {
        Submission::Completed
    } else {
        tx.offset += length;
        Submission::Partial
    }
}

/// FIFO of transactions plus the outcomes of finished blocking sends.
#[derive(Debug)]
pub(crate) struct TxQueue {
    queue: VecDeque<Transaction>,
    next_id: u64,
    finished: BTreeMap<TxId, Result<(), SendError>>,
}

impl TxQueue {
    pub(crate) const fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            next_id: 0,
            finished: BTreeMap::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn create(&mut self, me_addr: u8, data: &[u8], blocking: bool) -> Transaction {
        let id = TxId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        Transaction {
            id,
            me_addr,
            data: data.to_vec(),
            offset: 0,
            blocking,
        }
    }

    /// Records the outcome of a transaction that left the queue.
    fn finish(&mut self, tx: &Transaction, outcome: Result<(), SendError>) {
        if tx.blocking {
            self.finished.insert(tx.id, outcome);
        } else if let Err(err) = outcome {
            debug!("dropping queued message for client {}: {err}", tx.me_addr);
        }
    }

    fn remove(&mut self, id: TxId) -> bool {
        let before = self.queue.len();
        self.queue.retain(|tx| tx.id != id);
        self.queue.len() != before
    }
}

impl<P: Platform> Engine<P> {
    /// Claims the single write slot if writes are currently allowed.
    pub(crate) const fn acquire_write_buffer(&mut self) -> bool {
        if matches!(self.device.pg_state, PowerGatingState::On)
            || matches!(
                self.device.pg_event,
                PowerGatingEvent::Wait | PowerGatingEvent::Received | PowerGatingEvent::InterruptWait
            )
            || !self.bus.tx_buffer_ready
        {
            return false;
        }
        self.bus.tx_buffer_ready = false;
        true
    }

    /// Writes queued transactions, oldest first, until one cannot be
    /// written to completion. A transport fault fails the transaction at
    /// the head and schedules a reset.
    pub(crate) fn handle_write(&mut self) {
        if !self.acquire_write_buffer() {
            return;
        }

        let transport = Transport::new(self.platform.window());
        let depth = self.device.tx_buffer_depth;
        let queue = &mut self.bus.tx_queue;
        let mut fault = None;
        while let Some(tx) = queue.queue.front_mut() {
            let outcome = match write_transaction(&transport, depth, tx) {
                Submission::Completed => Ok(()),
                Submission::Failed(err) => {
                    fault = Some(err);
                    Err(SendError::Transport(err))
                }
                Submission::Partial | Submission::Deferred => break,
            };
            if let Some(tx) = queue.queue.pop_front() {
                queue.finish(&tx, outcome);
            }
            if fault.is_some() {
                break;
            }
        }

        if let Some(err) = fault {
            error!("failed to write client message: {err}");
            self.schedule_reset_on_error();
        }
    }

    /// Fails every queued transaction.
    pub(crate) fn flush_transactions(&mut self) {
        let queue = &mut self.bus.tx_queue;
        while let Some(tx) = queue.queue.pop_front() {
            queue.finish(&tx, Err(SendError::Aborted));
        }
    }

    /// Sends `data` to the active client.
    pub(crate) fn send_client_message(&mut self, data: &[u8], blocking: bool) -> Result<(), SendError> {
        let (me_addr, max) = match self.client.as_ref() {
            Some(client) if client.active && self.device.state == DeviceState::Enabled => {
                (client.address, client.max_message_length())
            }
            _ => return Err(SendError::NoDevice),
        };
        if data.len() > max {
            return Err(SendError::MessageTooLarge {
                length: data.len(),
                max,
            });
        }

        if self.device.pg_state == PowerGatingState::On {
            if let Err(err) = self.exit_power_gating_sync() {
                warn!("failed to leave power gating before sending: {err}");
                return Err(SendError::Aborted);
            }
        }

        let tx = self.bus.tx_queue.create(me_addr, data, blocking);
        let result = self.submit(tx);
        self.arm_idle_timer();
        result
    }

    /// Writes `tx` right away if nothing is queued ahead of it, otherwise
    /// queues it. Blocking transactions then wait for their completion.
    fn submit(&mut self, mut tx: Transaction) -> Result<(), SendError> {
        if self.bus.tx_queue.is_empty() && self.acquire_write_buffer() {
            let transport = Transport::new(self.platform.window());
            match write_transaction(&transport, self.device.tx_buffer_depth, &mut tx) {
                Submission::Completed => return Ok(()),
                Submission::Failed(err) => {
                    error!("failed to write client message: {err}");
                    self.schedule_reset_on_error();
                    return Err(err.into());
                }
                Submission::Partial | Submission::Deferred => {}
            }
        }

        let (id, blocking) = (tx.id, tx.blocking);
        self.bus.tx_queue.queue.push_back(tx);
        if !blocking {
            return Ok(());
        }

        let outcome = self.wait_until(self.config.timeouts.client_send, |e| {
            e.bus.tx_queue.finished.contains_key(&id)
        });
        match self.bus.tx_queue.finished.remove(&id) {
            Some(result) => result,
            None => {
                debug_assert_eq!(outcome, WaitOutcome::TimedOut);
                self.bus.tx_queue.remove(id);
                warn!("blocking send timed out");
                Err(SendError::Timeout)
            }
        }
    }
}
