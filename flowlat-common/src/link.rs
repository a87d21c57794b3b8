/// Link-layer destination class of a frame.
///
/// In the kernel this comes from `skb->pkt_type`; for frames handled outside
/// the kernel it is derived from the destination MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkClass {
    Host,
    Broadcast,
    Multicast,
    OtherHost,
    Outgoing,
    Unknown(u32),
}

// linux/if_packet.h
const PACKET_HOST: u32 = 0;
const PACKET_BROADCAST: u32 = 1;
const PACKET_MULTICAST: u32 = 2;
const PACKET_OTHERHOST: u32 = 3;
const PACKET_OUTGOING: u32 = 4;

impl LinkClass {
    #[inline(always)]
    pub fn from_pkt_type(pkt_type: u32) -> Self {
        match pkt_type {
            PACKET_HOST => LinkClass::Host,
            PACKET_BROADCAST => LinkClass::Broadcast,
            PACKET_MULTICAST => LinkClass::Multicast,
            PACKET_OTHERHOST => LinkClass::OtherHost,
            PACKET_OUTGOING => LinkClass::Outgoing,
            other => LinkClass::Unknown(other),
        }
    }

    /// Classify by destination MAC: all-ones is broadcast, the group bit
    /// marks multicast, anything else is unicast to this host.
    pub fn from_dst_mac(mac: &[u8; 6]) -> Self {
        if mac.iter().all(|b| *b == 0xff) {
            LinkClass::Broadcast
        } else if mac[0] & 0x01 != 0 {
            LinkClass::Multicast
        } else {
            LinkClass::Host
        }
    }

    /// Everything except broadcast and multicast counts as unicast.
    #[inline(always)]
    pub fn is_unicast(&self) -> bool {
        !matches!(self, LinkClass::Broadcast | LinkClass::Multicast)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_pkt_type() {
        assert_eq!(LinkClass::from_pkt_type(0), LinkClass::Host);
        assert_eq!(LinkClass::from_pkt_type(1), LinkClass::Broadcast);
        assert_eq!(LinkClass::from_pkt_type(2), LinkClass::Multicast);
        assert_eq!(LinkClass::from_pkt_type(4), LinkClass::Outgoing);
        assert_eq!(LinkClass::from_pkt_type(7), LinkClass::Unknown(7));
    }

    #[test]
    fn test_from_dst_mac() {
        assert_eq!(LinkClass::from_dst_mac(&[0xff; 6]), LinkClass::Broadcast);
        assert_eq!(
            LinkClass::from_dst_mac(&[0x01, 0x00, 0x5e, 0x00, 0x00, 0xfb]),
            LinkClass::Multicast
        );
        assert_eq!(
            LinkClass::from_dst_mac(&[0x33, 0x33, 0x00, 0x00, 0x00, 0x01]),
            LinkClass::Multicast
        );
        assert_eq!(
            LinkClass::from_dst_mac(&[0x02, 0x42, 0xac, 0x11, 0x00, 0x02]),
            LinkClass::Host
        );
    }

    #[test]
    fn test_unicast() {
        assert!(LinkClass::Host.is_unicast());
        assert!(LinkClass::Outgoing.is_unicast());
        assert!(LinkClass::OtherHost.is_unicast());
        assert!(!LinkClass::Broadcast.is_unicast());
        assert!(!LinkClass::Multicast.is_unicast());
    }
}
