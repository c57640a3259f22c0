//! # Synchronization primitives for the MEI engine
//!
//! The engine state is owned by a single serialized context. These types
//! are the two places where that context meets the outside world: a set of
//! coalesced signals for deferred work and a fair lock for handing the
//! engine between a worker and its consumers.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod signal_set;
mod ticket_lock;

pub use signal_set::{Signal, SignalSet};
pub use ticket_lock::{TicketLock, TicketLockGuard};
