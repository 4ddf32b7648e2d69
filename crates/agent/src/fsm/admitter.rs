//! Message admitter (§4.2): the single predicate gating inbound frames by handshake state.
use crate::events::InboundFrame;

/// Whether `frame` should be processed given the handshake flags observed so far.
///
/// All inbound handlers for non-handshake message kinds must consult this first. The
/// predicate never mutates state; callers are responsible for dropping (with a warning) a
/// frame this returns `false` for.
pub fn admit(frame: &InboundFrame, version_received: bool, verack_received: bool) -> bool {
    match frame {
        InboundFrame::Version { .. } => true,
        InboundFrame::Close => true,
        _ if !version_received => false,
        InboundFrame::Verack { .. } => true,
        _ if !verack_received => false,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Locator, PeerAddress, Protocol, Services};

    fn addr_frame() -> InboundFrame {
        InboundFrame::Addr(vec![PeerAddress {
            protocol: Protocol::WebSocket,
            locator: Locator::Socket("1.2.3.4:9000".parse().unwrap()),
            services: Services::NONE,
            distance: 0,
            timestamp: 0,
            public_key: vec![],
            signature: vec![],
            peer_id: [0; 20],
            seed: false,
        }])
    }

    #[test]
    fn non_version_frames_are_dropped_before_version_received() {
        assert!(!admit(&addr_frame(), false, false));
        assert!(!admit(&InboundFrame::Ping(1), false, false));
    }

    #[test]
    fn version_is_always_admitted() {
        let frame = InboundFrame::Version {
            peer_address: match addr_frame() {
                InboundFrame::Addr(mut v) => v.remove(0),
                _ => unreachable!(),
            },
            protocol_version: 1,
            genesis_hash: [0; 32],
            head_hash: [0; 32],
            challenge_nonce: [0; 32],
        };
        assert!(admit(&frame, false, false));
        assert!(admit(&frame, true, false));
        assert!(admit(&frame, true, true));
    }

    #[test]
    fn non_verack_frames_are_dropped_after_version_before_verack() {
        assert!(!admit(&addr_frame(), true, false));
    }

    #[test]
    fn everything_is_admitted_once_handshaken() {
        assert!(admit(&addr_frame(), true, true));
        assert!(admit(&InboundFrame::Ping(1), true, true));
    }
}
