//! Live-cluster integration tests over localhost TCP.
//!
//! Each test stands up real nodes (RPC server, peer clients, timers, WAL)
//! and drives them through the client. Timing assertions are generous:
//! elections need at most a couple of timeout windows.

use consort_bft::{BftConfig, BftState};
use consort_cft::{CftConfig, CftState};
use consort_node::{ClusterClient, NodeHandle, NodeRunner, RuntimeConfig};
use consort_types::{ClusterConfig, Command, NodeId, Peer, Role};
use consort_wal::Wal;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

/// Reserve `n` distinct localhost ports by binding and dropping.
fn reserve_ports(n: usize) -> Vec<u16> {
    let listeners: Vec<std::net::TcpListener> = (0..n)
        .map(|_| std::net::TcpListener::bind("127.0.0.1:0").unwrap())
        .collect();
    listeners
        .iter()
        .map(|l| l.local_addr().unwrap().port())
        .collect()
}

fn make_cluster(ports: &[u16]) -> ClusterConfig {
    ClusterConfig::new(
        ports
            .iter()
            .enumerate()
            .map(|(i, &port)| Peer {
                id: NodeId(i as u64 + 1),
                host: "127.0.0.1".to_string(),
                port,
            })
            .collect(),
    )
    .unwrap()
}

async fn start_cft_node(cluster: &ClusterConfig, id: u64, data_dir: &Path) -> NodeHandle {
    let node_id = NodeId(id);
    let wal = Wal::open(data_dir, id).unwrap();
    let recovered = wal.load().unwrap();
    let state = CftState::new(
        node_id,
        cluster.clone(),
        CftConfig::default(),
        recovered,
        id.wrapping_mul(0x9e3779b97f4a7c15),
    );
    NodeRunner::start(RuntimeConfig::new(node_id, cluster.clone()), state, Some(wal))
        .await
        .unwrap()
}

async fn start_bft_node(cluster: &ClusterConfig, id: u64, byzantine: bool) -> NodeHandle {
    let node_id = NodeId(id);
    let state = BftState::new(
        node_id,
        cluster.clone(),
        BftConfig {
            byzantine,
            ..BftConfig::default()
        },
    )
    .unwrap();
    NodeRunner::start(RuntimeConfig::new(node_id, cluster.clone()), state, None)
        .await
        .unwrap()
}

/// Poll until exactly one live node reports Leader; panics after `wait`.
async fn await_single_leader(handles: &[NodeHandle], wait: Duration) -> NodeId {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let leaders: Vec<NodeId> = handles
            .iter()
            .filter(|h| h.status().role == Role::Leader)
            .map(|h| h.id())
            .collect();
        if leaders.len() == 1 {
            return leaders[0];
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "no single leader within {wait:?} (saw {leaders:?})"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

async fn await_value(
    client: &ClusterClient,
    addr: &str,
    key: &str,
    expected: &str,
    wait: Duration,
) {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        if let Ok(Some(value)) = client.get(addr, key).await {
            if value == expected {
                return;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "{addr} never served {key}={expected}"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn cft_cluster_elects_a_single_leader() {
    let dir = TempDir::new().unwrap();
    let cluster = make_cluster(&reserve_ports(3));

    let mut handles = Vec::new();
    for id in 1..=3 {
        handles.push(start_cft_node(&cluster, id, dir.path()).await);
    }

    let leader = await_single_leader(&handles, Duration::from_secs(2)).await;

    // All nodes agree on the leader's term.
    let leader_term = handles
        .iter()
        .find(|h| h.id() == leader)
        .unwrap()
        .status()
        .term;
    tokio::time::sleep(Duration::from_millis(200)).await;
    for handle in &handles {
        assert_eq!(handle.status().term, leader_term, "{}", handle.id());
    }

    for handle in handles {
        handle.stop().await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn cft_cluster_replicates_to_every_node() {
    let dir = TempDir::new().unwrap();
    let cluster = make_cluster(&reserve_ports(3));

    let mut handles = Vec::new();
    for id in 1..=3 {
        handles.push(start_cft_node(&cluster, id, dir.path()).await);
    }
    let leader = await_single_leader(&handles, Duration::from_secs(2)).await;
    let leader_addr = handles
        .iter()
        .find(|h| h.id() == leader)
        .unwrap()
        .addr_string();

    let client = ClusterClient::new();
    let reply = client
        .submit(&leader_addr, Command::set("x", "1"))
        .await
        .unwrap();
    assert!(reply.ok, "submit failed: {reply:?}");

    for handle in &handles {
        await_value(
            &client,
            &handle.addr_string(),
            "x",
            "1",
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(handle.status().log_length, 1);
    }

    for handle in handles {
        handle.stop().await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn cft_submit_to_follower_redirects_via_hint() {
    let dir = TempDir::new().unwrap();
    let cluster = make_cluster(&reserve_ports(3));

    let mut handles = Vec::new();
    for id in 1..=3 {
        handles.push(start_cft_node(&cluster, id, dir.path()).await);
    }
    let leader = await_single_leader(&handles, Duration::from_secs(2)).await;
    let follower = handles.iter().find(|h| h.id() != leader).unwrap();

    let client = ClusterClient::new();
    let resolve = {
        let cluster = cluster.clone();
        move |id: NodeId| cluster.peer(id).map(|p| p.addr())
    };
    let reply = client
        .submit_with_redirect(&follower.addr_string(), Command::set("y", "2"), resolve)
        .await
        .unwrap();
    assert!(reply.ok, "redirected submit failed: {reply:?}");

    for handle in handles {
        handle.stop().await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn cft_leader_failover_elects_higher_term() {
    let dir = TempDir::new().unwrap();
    let cluster = make_cluster(&reserve_ports(5));

    let mut handles = Vec::new();
    for id in 1..=5 {
        handles.push(start_cft_node(&cluster, id, dir.path()).await);
    }
    let first_leader = await_single_leader(&handles, Duration::from_secs(2)).await;
    let old_term = handles
        .iter()
        .find(|h| h.id() == first_leader)
        .unwrap()
        .status()
        .term;

    // Kill the leader.
    let pos = handles
        .iter()
        .position(|h| h.id() == first_leader)
        .unwrap();
    handles.remove(pos).stop().await;

    // The remaining four elect a replacement with a strictly higher term.
    let new_leader = await_single_leader(&handles, Duration::from_secs(2)).await;
    assert_ne!(new_leader, first_leader);
    let new_term = handles
        .iter()
        .find(|h| h.id() == new_leader)
        .unwrap()
        .status()
        .term;
    assert!(new_term > old_term);

    // The new leader serves writes.
    let client = ClusterClient::new();
    let leader_addr = handles
        .iter()
        .find(|h| h.id() == new_leader)
        .unwrap()
        .addr_string();
    let reply = client
        .submit(&leader_addr, Command::set("z", "after-failover"))
        .await
        .unwrap();
    assert!(reply.ok);

    for handle in &handles {
        await_value(
            &client,
            &handle.addr_string(),
            "z",
            "after-failover",
            Duration::from_secs(1),
        )
        .await;
    }

    for handle in handles {
        handle.stop().await;
    }
}

/// Single-node variant binding port 0: with no peers to dial, the
/// cluster-file port is irrelevant and restarts cannot collide with a
/// lingering socket.
async fn start_lone_cft_node(cluster: &ClusterConfig, data_dir: &Path) -> NodeHandle {
    let node_id = NodeId(1);
    let wal = Wal::open(data_dir, 1).unwrap();
    let recovered = wal.load().unwrap();
    let state = CftState::new(node_id, cluster.clone(), CftConfig::default(), recovered, 1);
    let mut runtime = RuntimeConfig::new(node_id, cluster.clone());
    runtime.listen_addr = Some("127.0.0.1:0".to_string());
    NodeRunner::start(runtime, state, Some(wal)).await.unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn cft_log_survives_restart() {
    let dir = TempDir::new().unwrap();
    let cluster = make_cluster(&reserve_ports(1));
    let client = ClusterClient::new();

    {
        let handle = start_lone_cft_node(&cluster, dir.path()).await;
        await_single_leader(std::slice::from_ref(&handle), Duration::from_secs(2)).await;
        let reply = client
            .submit(&handle.addr_string(), Command::set("x", "1"))
            .await
            .unwrap();
        assert!(reply.ok);
        handle.stop().await;
    }

    // Restart from the same WAL: the log is back, and a fresh entry from
    // the new term lets the recovered entry re-commit and re-apply.
    let handle = start_lone_cft_node(&cluster, dir.path()).await;
    assert_eq!(handle.status().log_length, 1, "recovered log");
    await_single_leader(std::slice::from_ref(&handle), Duration::from_secs(2)).await;
    let reply = client
        .submit(&handle.addr_string(), Command::Noop)
        .await
        .unwrap();
    assert!(reply.ok);
    await_value(
        &client,
        &handle.addr_string(),
        "x",
        "1",
        Duration::from_secs(1),
    )
    .await;

    handle.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn control_surface_ping_status_partition() {
    let dir = TempDir::new().unwrap();
    let cluster = make_cluster(&reserve_ports(3));

    let mut handles = Vec::new();
    for id in 1..=3 {
        handles.push(start_cft_node(&cluster, id, dir.path()).await);
    }
    let client = ClusterClient::new();
    let addr = handles[0].addr_string();

    assert_eq!(client.ping(&addr).await.unwrap(), NodeId(1));

    let status = client.status(&addr).await.unwrap();
    assert_eq!(status.node_id, NodeId(1));

    client
        .set_partition(&addr, vec![NodeId(2), NodeId(3)])
        .await
        .unwrap();
    assert_eq!(
        handles[0].partition().snapshot(),
        vec![NodeId(2), NodeId(3)]
    );

    client.set_partition(&addr, vec![]).await.unwrap();
    assert!(handles[0].partition().snapshot().is_empty());

    for handle in handles {
        handle.stop().await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn bft_cluster_commits_on_all_replicas() {
    let cluster = make_cluster(&reserve_ports(4));

    let mut handles = Vec::new();
    for id in 1..=4 {
        handles.push(start_bft_node(&cluster, id, false).await);
    }
    let client = ClusterClient::new();

    // View 0: node 1 is primary.
    let primary_addr = handles[0].addr_string();
    let reply = client
        .submit(&primary_addr, Command::set("k", "v"))
        .await
        .unwrap();
    assert!(reply.ok, "bft submit failed: {reply:?}");

    for handle in &handles {
        await_value(
            &client,
            &handle.addr_string(),
            "k",
            "v",
            Duration::from_secs(2),
        )
        .await;
    }

    for handle in handles {
        handle.stop().await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn bft_tolerates_one_byzantine_replica() {
    let cluster = make_cluster(&reserve_ports(4));

    // Node 4 tampers digests, equivocates prepares, withholds commits.
    let mut handles = Vec::new();
    for id in 1..=4 {
        handles.push(start_bft_node(&cluster, id, id == 4).await);
    }
    let client = ClusterClient::new();

    let reply = client
        .submit(&handles[0].addr_string(), Command::set("k", "v"))
        .await
        .unwrap();
    assert!(reply.ok, "agreement must survive one faulty node: {reply:?}");

    for handle in handles.iter().take(3) {
        await_value(
            &client,
            &handle.addr_string(),
            "k",
            "v",
            Duration::from_secs(2),
        )
        .await;
    }

    for handle in handles {
        handle.stop().await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn bft_backup_refuses_submission_with_hint() {
    let cluster = make_cluster(&reserve_ports(4));

    let mut handles = Vec::new();
    for id in 1..=4 {
        handles.push(start_bft_node(&cluster, id, false).await);
    }
    let client = ClusterClient::new();

    let reply = client
        .submit(&handles[1].addr_string(), Command::set("k", "v"))
        .await
        .unwrap();
    assert!(!reply.ok);
    assert_eq!(reply.leader_hint, Some(NodeId(1)));

    for handle in handles {
        handle.stop().await;
    }
}
