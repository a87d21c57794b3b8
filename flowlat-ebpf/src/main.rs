#![no_std]
#![no_main]

use aya_ebpf::{
    bindings::TC_ACT_OK,
    helpers::bpf_ktime_get_ns,
    macros::{classifier, map},
    maps::RingBuf,
    programs::TcContext,
};
use core::ptr;
use flowlat_common::{
    Classifier, Clock, EmitError, EventSink, FlowRecord, Frame, LinkClass, Truncated,
};

#[no_mangle]
#[link_section = "license"]
pub static _license: [u8; 13] = *b"Dual MIT/GPL\0";

/// Ring buffer size in bytes; 256 KiB holds roughly 5K flow records.
const RING_BUF_SIZE: u32 = 256 * 1024;

#[map]
static EVENTS: RingBuf = RingBuf::with_byte_size(RING_BUF_SIZE, 0);

/// Packet data between `skb->data` and `skb->data_end`.
///
/// Every load compares the end of the requested range against `end` right
/// before dereferencing, which is the shape the verifier needs to accept
/// direct packet access.
struct SkbFrame {
    start: usize,
    end: usize,
}

impl Frame for SkbFrame {
    #[inline(always)]
    fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline(always)]
    fn load<const N: usize>(&self, offset: usize) -> Result<[u8; N], Truncated> {
        let at = self.start + offset;
        if at + N > self.end {
            return Err(Truncated { offset, needed: N });
        }
        Ok(unsafe { ptr::read_unaligned(at as *const [u8; N]) })
    }
}

struct KernelClock;

impl Clock for KernelClock {
    #[inline(always)]
    fn now_ns(&self) -> u64 {
        unsafe { bpf_ktime_get_ns() }
    }
}

struct RingBufSink(&'static RingBuf);

impl EventSink for RingBufSink {
    /// Fields are written one by one into the reserved slot. A whole-struct
    /// write generates a `memcpy` call into `.text`, and aya 0.13.x cannot
    /// resolve cross-section call relocations for `classifier` programs.
    #[inline(always)]
    fn try_emit(&self, record: &FlowRecord) -> Result<(), EmitError> {
        let Some(mut buf) = self.0.reserve::<FlowRecord>(0) else {
            return Err(EmitError::Full);
        };
        let p = buf.as_mut_ptr() as *mut FlowRecord;
        unsafe {
            ptr::write(ptr::addr_of_mut!((*p).src_ip), record.src_ip);
            ptr::write(ptr::addr_of_mut!((*p).dst_ip), record.dst_ip);
            ptr::write(ptr::addr_of_mut!((*p).src_port), record.src_port);
            ptr::write(ptr::addr_of_mut!((*p).dst_port), record.dst_port);
            ptr::write(ptr::addr_of_mut!((*p).protocol), record.protocol);
            ptr::write(ptr::addr_of_mut!((*p).ttl), record.ttl);
            ptr::write(ptr::addr_of_mut!((*p).syn), record.syn);
            ptr::write(ptr::addr_of_mut!((*p).ack), record.ack);
            ptr::write(ptr::addr_of_mut!((*p).ts), record.ts);
        }
        buf.submit(0);
        Ok(())
    }
}

/// TC classifier entry point, attached on ingress and egress.
///
/// Extracts a flow record from the first SYN/SYN-ACK of a TCP connection
/// and from every UDP datagram. The frame is always let through.
#[classifier]
pub fn flowlat(ctx: TcContext) -> i32 {
    if ctx.pull_data(0).is_err() {
        return TC_ACT_OK;
    }

    let link = LinkClass::from_pkt_type(unsafe { (*ctx.skb.skb).pkt_type });

    let frame = SkbFrame {
        start: ctx.data(),
        end: ctx.data_end(),
    };

    let classifier = Classifier::new(RingBufSink(&EVENTS), KernelClock);
    // Skips and ring buffer overruns are both silent here.
    let _ = classifier.classify(&frame, link);

    TC_ACT_OK
}

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
