mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{address, replica_version, ring, wait_for_view, TIMEOUT};
use kv_ring_core::{Item, LocalNetwork, PeerClient, RingError};

#[tokio::test]
async fn test_read_returns_highest_version() {
    let network = Arc::new(LocalNetwork::new());
    let nodes = ring(&network, &[10, 20, 30], 3, 2, 2).await;
    nodes[0].put(15, "a".to_string()).await.unwrap();
    nodes[0].put(15, "b".to_string()).await.unwrap();
    assert!(wait_for_view(&nodes[2], |view| replica_version(view, 15) == Some(2)).await);
    assert!(wait_for_view(&nodes[0], |view| replica_version(view, 15) == Some(2)).await);

    let read = nodes[0].quorum().read(15).await.unwrap();
    assert_eq!(read.owner, 20);
    assert_eq!(read.required, 2);
    assert_eq!(read.observations.len(), 2);
    assert_eq!(read.latest(), Some(&Item::with_version(15, "b".to_string(), 2)));

    for node in &nodes {
        assert_eq!(node.get(15).await.unwrap(), Some("b".to_string()));
    }
}

#[tokio::test]
async fn test_read_of_absent_key_is_not_found() {
    let network = Arc::new(LocalNetwork::new());
    let nodes = ring(&network, &[10, 20, 30], 3, 2, 2).await;

    assert_eq!(nodes[2].get(17).await.unwrap(), None);
}

#[tokio::test]
async fn test_read_fails_fast_when_replica_times_out() {
    let network = Arc::new(LocalNetwork::new());
    let nodes = ring(&network, &[10, 20], 2, 1, 2).await;
    nodes[1].put(15, "a".to_string()).await.unwrap();
    assert!(wait_for_view(&nodes[0], |view| replica_version(view, 15) == Some(1)).await);

    network.set_delay(&address(10), Some(Duration::from_secs(2))).await;
    let start = Instant::now();
    let result = nodes[1].get(15).await;

    match result {
        Err(RingError::QuorumNotReached {
            required,
            received,
            partial,
        }) => {
            assert_eq!(required, 2);
            assert_eq!(received, 1);
            assert_eq!(partial, vec![Item::new(15, "a".to_string())]);
        }
        other => panic!("expected a quorum failure, got {other:?}"),
    }
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_read_fails_when_replica_unreachable() {
    let network = Arc::new(LocalNetwork::new());
    let nodes = ring(&network, &[10, 20], 2, 1, 2).await;
    nodes[1].put(15, "a".to_string()).await.unwrap();
    network.set_unreachable(&address(10), true).await;

    assert!(matches!(
        nodes[1].get(15).await,
        Err(RingError::QuorumNotReached { required: 2, .. })
    ));
    assert_eq!(nodes[1].status().await.presumed_crashed, vec![10]);
}

#[tokio::test]
async fn test_read_returns_once_quorum_is_reached() {
    let network = Arc::new(LocalNetwork::new());
    let nodes = ring(&network, &[10, 20], 2, 2, 1).await;
    nodes[1].put(15, "a".to_string()).await.unwrap();
    network.set_delay(&address(10), Some(Duration::from_secs(2))).await;

    let start = Instant::now();
    assert_eq!(nodes[1].get(15).await.unwrap(), Some("a".to_string()));
    assert!(start.elapsed() < TIMEOUT);
}

#[tokio::test]
async fn test_read_quorum_is_capped_by_ring_size() {
    let network = Arc::new(LocalNetwork::new());
    let nodes = ring(&network, &[10], 3, 2, 2).await;
    nodes[0].put(15, "a".to_string()).await.unwrap();

    let read = nodes[0].quorum().read(15).await.unwrap();
    assert_eq!(read.required, 1);
    assert_eq!(read.observations, vec![(10, Some(Item::new(15, "a".to_string())))]);
}

#[tokio::test]
async fn test_write_to_unreachable_owner_is_a_quorum_failure() {
    let network = Arc::new(LocalNetwork::new());
    let nodes = ring(&network, &[10, 20, 30], 3, 2, 2).await;
    network.set_unreachable(&address(20), true).await;

    match nodes[0].put(15, "a".to_string()).await {
        Err(RingError::QuorumNotReached {
            required,
            received,
            partial,
        }) => {
            assert_eq!((required, received), (1, 0));
            assert!(partial.is_empty());
        }
        other => panic!("expected a quorum failure, got {other:?}"),
    }
    assert!(nodes[0].status().await.presumed_crashed.contains(&20));
}

#[tokio::test]
async fn test_remote_client_requests_are_coordinated_by_receiver() {
    let network = Arc::new(LocalNetwork::new());
    let nodes = ring(&network, &[10, 20, 30], 3, 2, 2).await;
    let client = PeerClient::new(network.clone(), TIMEOUT);

    let item = client.client_put(&address(30), 15, "a".to_string()).await.unwrap();
    assert_eq!(item, Item::new(15, "a".to_string()));
    assert!(wait_for_view(&nodes[2], |view| replica_version(view, 15) == Some(1)).await);
    assert!(wait_for_view(&nodes[0], |view| replica_version(view, 15) == Some(1)).await);
    assert_eq!(
        client.client_get(&address(10), 15).await.unwrap(),
        Some("a".to_string())
    );

    assert!(client.client_delete(&address(20), 15).await.unwrap());
    assert!(wait_for_view(&nodes[2], |view| replica_version(view, 15).is_none()).await);
    assert!(wait_for_view(&nodes[0], |view| replica_version(view, 15).is_none()).await);
    assert_eq!(client.client_get(&address(30), 15).await.unwrap(), None);
}

#[tokio::test]
async fn test_quorum_failure_survives_remote_coordinator() {
    let network = Arc::new(LocalNetwork::new());
    let _nodes = ring(&network, &[10, 20], 2, 1, 2).await;
    let client = PeerClient::new(network.clone(), Duration::from_secs(1));
    client.client_put(&address(20), 15, "a".to_string()).await.unwrap();
    network.set_unreachable(&address(10), true).await;

    assert!(matches!(
        client.client_get(&address(20), 15).await,
        Err(RingError::QuorumNotReached { required: 2, .. })
    ));
}
