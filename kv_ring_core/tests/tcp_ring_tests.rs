use std::sync::Arc;
use std::time::Duration;

use kv_ring_core::{
    LeaveOutcome, MemoryNodeStore, NodeSettings, NodeState, PeerClient, RingNode, TcpTransport,
};

fn free_address() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().to_string()
}

fn tcp_node(id: u64, address: &str) -> Arc<RingNode> {
    RingNode::new(
        NodeSettings::new(id, address)
            .with_quorum(2, 1, 2)
            .with_timeout(Duration::from_secs(1)),
        Arc::new(TcpTransport::new()),
        Arc::new(MemoryNodeStore::new()),
    )
}

#[tokio::test]
async fn test_two_node_ring_over_tcp() {
    let first_address = free_address();
    let second_address = free_address();
    let first = tcp_node(10, &first_address);
    let second = tcp_node(20, &second_address);

    first.join_first().await.unwrap();
    first.put(15, "before join".to_string()).await.unwrap();
    second.join(&first_address).await.unwrap();

    assert_eq!(first.view().await.peers.len(), 2);
    assert!(second.view().await.owned_items.contains_key(&15));

    let item = first.put(15, "after join".to_string()).await.unwrap();
    assert_eq!(item.version, 2);
    assert_eq!(second.get(15).await.unwrap(), Some("after join".to_string()));

    let client = PeerClient::new(Arc::new(TcpTransport::new()), Duration::from_secs(1));
    assert_eq!(client.get_node(&second_address).await.unwrap().id, 20);
    assert_eq!(
        client.client_get(&first_address, 15).await.unwrap(),
        Some("after join".to_string())
    );

    match second.leave().await.unwrap() {
        LeaveOutcome::Departed { successor, handed_off, .. } => {
            assert_eq!(successor, 10);
            assert_eq!(handed_off, 1);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(second.state().await, NodeState::Left);
    assert_eq!(first.view().await.owned_items[&15].version, 2);
    assert!(client.get_node(&second_address).await.is_err());
}
