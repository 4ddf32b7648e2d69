//! A process-local [`AddressBook`] backed by a mutex-guarded map. Good enough for a single
//! node process talking to a handful of peers; a deployment that needs to share known
//! addresses across processes should implement [`AddressBook`] against real storage instead.
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::address::{PeerAddress, Services};
use crate::crypto::PeerId;
use crate::traits::{AddressBook, ProtocolMask};

#[derive(Default)]
pub struct InMemoryAddressBook {
    addresses: Mutex<HashMap<[u8; 20], PeerAddress>>,
}

impl InMemoryAddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the book with bootstrap addresses known ahead of any handshake.
    pub fn seed(&self, addresses: impl IntoIterator<Item = PeerAddress>) {
        let mut map = self.addresses.lock().unwrap();
        for address in addresses {
            map.insert(address.peer_id, address);
        }
    }
}

#[async_trait]
impl AddressBook for InMemoryAddressBook {
    async fn get(&self, peer_id: &PeerId) -> Option<PeerAddress> {
        self.addresses.lock().unwrap().get(&peer_id.0).cloned()
    }

    async fn query(&self, protocols: ProtocolMask, services: Services, max: usize) -> Vec<PeerAddress> {
        self.addresses
            .lock()
            .unwrap()
            .values()
            .filter(|address| protocols.contains(address.protocol) && address.services.contains(services))
            .take(max)
            .cloned()
            .collect()
    }

    async fn add(&self, _source: PeerId, addresses: Vec<PeerAddress>) {
        let mut map = self.addresses.lock().unwrap();
        for address in addresses {
            map.insert(address.peer_id, address);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Locator, Protocol};

    fn addr(port: u16) -> PeerAddress {
        PeerAddress {
            protocol: Protocol::WebSocket,
            locator: Locator::Socket(format!("127.0.0.1:{port}").parse().unwrap()),
            services: Services::NONE,
            distance: 0,
            timestamp: 0,
            public_key: vec![],
            signature: vec![],
            peer_id: [port as u8; 20],
            seed: false,
        }
    }

    #[tokio::test]
    async fn added_addresses_are_queryable() {
        let book = InMemoryAddressBook::new();
        book.add(PeerId([0; 20]), vec![addr(9000)]).await;

        let found = book.query(ProtocolMask::ALL, Services::NONE, 10).await;
        assert_eq!(found.len(), 1);
        assert!(book.get(&PeerId([9000u16 as u8; 20])).await.is_some());
    }
}
