#![cfg_attr(not(test), no_std)]

//! Flow extraction shared by the TC classifier and the userspace agent.
//!
//! The eBPF program supplies a packet-pointer [`Frame`], a kernel clock and a
//! RingBuf [`EventSink`]; everything between the hook and the ring buffer
//! lives here so it can be exercised on the host.

pub mod classify;
pub mod frame;
pub mod link;
pub mod network;
pub mod record;
pub mod transport;

#[cfg(test)]
mod testutil;

pub use classify::{extract, Classifier, Clock, EmitError, EventSink, Outcome, Skip};
pub use frame::{Frame, Truncated};
pub use link::LinkClass;
pub use record::{FlowRecord, FLOW_RECORD_LEN, IPPROTO_TCP, IPPROTO_UDP};
