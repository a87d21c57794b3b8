//! The per-frame decision pipeline: frame gate, network layer, transport
//! layer, emitter.

use network_types::eth::EthHdr;

use crate::frame::{Frame, Truncated};
use crate::link::LinkClass;
use crate::network::{parse_network, NetworkHeader};
use crate::record::FlowRecord;
use crate::transport::{parse_segment, Ports, Segment, TRANSPORT_HDR_MIN};

/// Why a frame produced no record. Every variant means "let it pass".
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Skip {
    #[error(transparent)]
    Truncated(#[from] Truncated),
    #[error("broadcast or multicast frame")]
    NotUnicast,
    #[error("unsupported ethertype {0:#06x}")]
    EtherType(u16),
    #[error("unsupported transport protocol {0}")]
    Protocol(u8),
    #[error("tcp segment without SYN")]
    NotSyn,
}

/// The event channel refused a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EmitError {
    #[error("event channel full")]
    Full,
    #[error("event channel closed")]
    Closed,
}

/// Monotonic nanosecond clock used to stamp records.
pub trait Clock {
    fn now_ns(&self) -> u64;
}

/// Producer side of the event channel. Implementations must not block.
pub trait EventSink {
    fn try_emit(&self, record: &FlowRecord) -> Result<(), EmitError>;
}

impl<T: EventSink + ?Sized> EventSink for &T {
    #[inline(always)]
    fn try_emit(&self, record: &FlowRecord) -> Result<(), EmitError> {
        (**self).try_emit(record)
    }
}

impl<T: Clock + ?Sized> Clock for &T {
    #[inline(always)]
    fn now_ns(&self) -> u64 {
        (**self).now_ns()
    }
}

/// What happened to one frame. The frame itself always proceeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Emitted,
    Skipped(Skip),
    /// A record was built but the event channel dropped it.
    Lost(EmitError),
}

impl FlowRecord {
    #[inline(always)]
    fn fill_network(&mut self, net: &NetworkHeader) {
        self.src_ip = net.src;
        self.dst_ip = net.dst;
        self.protocol = net.transport.number();
        self.ttl = net.ttl;
    }

    /// Fields shared by TCP and UDP.
    #[inline(always)]
    fn fill_transport(&mut self, ports: Ports, ts: u64) {
        self.src_port = u16::from_ne_bytes(ports.src);
        self.dst_port = u16::from_ne_bytes(ports.dst);
        self.ts = ts;
    }
}

/// Run the parsers over one frame and build its flow record.
///
/// The record is only constructed once every layer has been accepted, so a
/// skipped frame never leaves a partially filled record behind.
#[inline(always)]
pub fn extract<F, C>(frame: &F, link: LinkClass, clock: &C) -> Result<FlowRecord, Skip>
where
    F: Frame + ?Sized,
    C: Clock + ?Sized,
{
    // -- Frame gate --------------------------------------------------------
    frame.ensure(0, EthHdr::LEN)?;
    if !link.is_unicast() {
        return Err(Skip::NotUnicast);
    }

    // -- Network layer -----------------------------------------------------
    let net = parse_network(frame)?;

    // -- Transport layer ---------------------------------------------------
    frame.ensure(net.transport_offset, TRANSPORT_HDR_MIN)?;
    let segment = parse_segment(frame, net.transport_offset, net.transport)?;

    let mut record = FlowRecord::default();
    record.fill_network(&net);
    match segment {
        Segment::Tcp { ports, flags } => {
            record.fill_transport(ports, clock.now_ns());
            record.syn = flags.syn() as u8;
            record.ack = flags.ack() as u8;
        }
        Segment::Udp { ports } => {
            record.fill_transport(ports, clock.now_ns());
        }
    }
    Ok(record)
}

/// Classifier bound to one event channel handle for the lifetime of an
/// attachment.
///
/// Holds no mutable state, so one instance may serve any number of
/// concurrent invocations.
pub struct Classifier<S, C> {
    sink: S,
    clock: C,
}

impl<S: EventSink, C: Clock> Classifier<S, C> {
    pub const fn new(sink: S, clock: C) -> Self {
        Self { sink, clock }
    }

    /// Classify one frame and push its record, if any. Emission failures
    /// are reported in the outcome and otherwise ignored.
    #[inline(always)]
    pub fn classify<F: Frame + ?Sized>(&self, frame: &F, link: LinkClass) -> Outcome {
        match extract(frame, link, &self.clock) {
            Ok(record) => match self.sink.try_emit(&record) {
                Ok(()) => Outcome::Emitted,
                Err(e) => Outcome::Lost(e),
            },
            Err(skip) => Outcome::Skipped(skip),
        }
    }
}
