//! Worker Module Tests
//!
//! Exercises the event-loop handlers against the seed scenarios: single-node
//! round trips through the live loop (including the first-touch replication
//! deferral), ownership redirects, merge safety, join redistribution,
//! replication changes, cache invalidation targeting and telemetry resets.
//!
//! Each test uses its own port base so the bound endpoints never collide.

#[cfg(test)]
mod tests {
    use crate::config::{NodeSettings, TierMeta};
    use crate::lattice::{LatticeType, LatticeValue, LwwValue, SetValue};
    use crate::protocol::{
        CacheKeysReport, CacheNodeList, ClusterMembership, KeyRequest, KeyResponse, KeyTuple,
        ReplicationFactor, ReplicationFactorUpdate, RequestType, ResponseError,
    };
    use crate::topology::types::{cache_update_addr, Tier};
    use crate::worker::ServerWorker;
    use std::collections::{HashMap, HashSet};
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::UdpSocket;

    const NODE_A: &str = "127.0.0.1";
    const NODE_B: &str = "127.0.0.2";

    fn settings(port_base: u16, memory_threads: u32, memory_replication: u32) -> Arc<NodeSettings> {
        let mut tiers = HashMap::new();
        tiers.insert(
            Tier::Memory,
            TierMeta {
                threads: memory_threads,
                default_replication: memory_replication,
                node_capacity_bytes: 1_000_000,
            },
        );
        tiers.insert(
            Tier::Disk,
            TierMeta {
                threads: 1,
                default_replication: 1,
                node_capacity_bytes: 1_000_000,
            },
        );
        Arc::new(NodeSettings {
            self_tier: Tier::Memory,
            tiers,
            default_local_replication: 1,
            public_ip: NODE_A.to_string(),
            private_ip: NODE_A.to_string(),
            seed_ip: NODE_A.to_string(),
            mgmt_ip: None,
            routing_ips: Vec::new(),
            monitoring_ips: Vec::new(),
            port_base,
            data_dir: PathBuf::from("latticekv-data"),
        })
    }

    /// A worker with populated rings, as if bootstrap had answered with an
    /// otherwise empty cluster.
    async fn worker(
        port_base: u16,
        memory_threads: u32,
        memory_replication: u32,
        tid: u32,
    ) -> ServerWorker {
        let mut worker = ServerWorker::new(settings(port_base, memory_threads, memory_replication), tid)
            .await
            .expect("worker endpoints should bind");
        worker.install_membership(&ClusterMembership::default(), 0);
        worker
    }

    fn lww_bytes(timestamp: u64, value: &[u8]) -> Vec<u8> {
        bincode::serialize(&LatticeValue::Lww(LwwValue::new(timestamp, value.to_vec()))).unwrap()
    }

    fn set_bytes(elements: &[&str]) -> Vec<u8> {
        let value = SetValue {
            elements: elements.iter().map(|e| e.as_bytes().to_vec()).collect(),
        };
        bincode::serialize(&LatticeValue::Set(value)).unwrap()
    }

    fn put_request(id: &str, reply: Option<String>, key: &str, kind: LatticeType, payload: Vec<u8>) -> KeyRequest {
        KeyRequest {
            request_id: id.to_string(),
            response_address: reply,
            request_type: RequestType::Put,
            tuples: vec![KeyTuple::put(key.to_string(), kind, payload)],
        }
    }

    fn get_request(id: &str, reply: Option<String>, key: &str) -> KeyRequest {
        KeyRequest {
            request_id: id.to_string(),
            response_address: reply,
            request_type: RequestType::Get,
            tuples: vec![KeyTuple::get(key.to_string())],
        }
    }

    async fn send(socket: &UdpSocket, addr: &str, request: &KeyRequest) {
        socket
            .send_to(&bincode::serialize(request).unwrap(), addr)
            .await
            .unwrap();
    }

    async fn recv_response(socket: &UdpSocket) -> KeyResponse {
        let mut buf = vec![0u8; 64 * 1024];
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
            .await
            .expect("timed out waiting for a response")
            .unwrap();
        bincode::deserialize(&buf[..len]).unwrap()
    }

    async fn recv_request(socket: &UdpSocket) -> KeyRequest {
        let mut buf = vec![0u8; 64 * 1024];
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
            .await
            .expect("timed out waiting for a request")
            .unwrap();
        bincode::deserialize(&buf[..len]).unwrap()
    }

    // ============================================================
    // SCENARIO 1: SINGLE-NODE PUT/GET THROUGH THE LIVE LOOP
    // ============================================================

    #[tokio::test]
    async fn test_single_node_put_get_round_trip() {
        let worker = worker(15000, 1, 1, 0).await;
        let request_addr = worker.wt.request_addr();
        tokio::spawn(worker.run());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let reply = Some(client.local_addr().unwrap().to_string());

        // First touch: the key's replication is unknown, so the PUT defers,
        // the worker looks the record up against itself, installs defaults
        // and only then answers.
        send(
            &client,
            &request_addr,
            &put_request("put-1", reply.clone(), "a", LatticeType::Lww, lww_bytes(5, b"x")),
        )
        .await;
        let response = recv_response(&client).await;
        assert_eq!(response.response_id, "put-1");
        assert!(response.tuples[0].error.is_none());

        // A lower timestamp loses the merge.
        send(
            &client,
            &request_addr,
            &put_request("put-2", reply.clone(), "a", LatticeType::Lww, lww_bytes(3, b"y")),
        )
        .await;
        let response = recv_response(&client).await;
        assert!(response.tuples[0].error.is_none());

        send(&client, &request_addr, &get_request("get-1", reply, "a")).await;
        let response = recv_response(&client).await;
        assert_eq!(response.response_id, "get-1");
        let tuple = &response.tuples[0];
        assert!(tuple.error.is_none());
        match bincode::deserialize(tuple.payload.as_deref().unwrap()).unwrap() {
            LatticeValue::Lww(value) => assert_eq!(value, LwwValue::new(5, b"x".to_vec())),
            other => panic!("expected an LWW state, got {:?}", other.kind()),
        }
    }

    // ============================================================
    // SCENARIO 2: WRONG-THREAD REDIRECT
    // ============================================================

    #[tokio::test]
    async fn test_wrong_thread_redirect() {
        let mut worker_zero = worker(16000, 2, 1, 0).await;
        let mut worker_one = worker(16000, 2, 1, 1).await;

        // Find a key whose single responsible thread is tid 1.
        let mut target = None;
        for i in 0..200 {
            let key = format!("key_{i}");
            worker_zero.install_default_replication(&key);
            worker_one.install_default_replication(&key);
            let threads = worker_zero.resolve(&key).unwrap();
            if threads.len() == 1 && threads[0].tid == 1 {
                target = Some(key);
                break;
            }
        }
        let key = target.expect("some key should hash to thread 1");

        let addr_zero = worker_zero.wt.request_addr();
        let addr_one = worker_one.wt.request_addr();
        tokio::spawn(worker_zero.run());
        tokio::spawn(worker_one.run());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let reply = Some(client.local_addr().unwrap().to_string());

        send(
            &client,
            &addr_zero,
            &put_request("put-1", reply.clone(), &key, LatticeType::Lww, lww_bytes(1, b"v")),
        )
        .await;
        let response = recv_response(&client).await;
        let tuple = &response.tuples[0];
        assert_eq!(tuple.error, Some(ResponseError::WrongThread));
        assert_eq!(tuple.responsible, vec![addr_one.clone()]);

        // Retrying against the advertised owner succeeds.
        send(
            &client,
            &addr_one,
            &put_request("put-2", reply, &key, LatticeType::Lww, lww_bytes(1, b"v")),
        )
        .await;
        let response = recv_response(&client).await;
        assert!(response.tuples[0].error.is_none());
    }

    // ============================================================
    // SCENARIO 3: LATTICE MISMATCH
    // ============================================================

    #[tokio::test]
    async fn test_lattice_mismatch_rejected_and_state_kept() {
        let mut worker = worker(17000, 1, 1, 0).await;
        worker.install_default_replication(&"s".to_string());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let reply = Some(client.local_addr().unwrap().to_string());

        worker
            .process_request(put_request(
                "put-set",
                reply.clone(),
                "s",
                LatticeType::Set,
                set_bytes(&["a", "b"]),
            ))
            .await;
        assert!(recv_response(&client).await.tuples[0].error.is_none());

        worker
            .process_request(put_request(
                "put-lww",
                reply,
                "s",
                LatticeType::Lww,
                lww_bytes(1, b"z"),
            ))
            .await;
        let response = recv_response(&client).await;
        assert_eq!(
            response.tuples[0].error,
            Some(ResponseError::LatticeMismatch)
        );

        // The stored set is untouched.
        let (kind, payload) = worker.read_value(&"s".to_string()).unwrap();
        assert_eq!(kind, LatticeType::Set);
        match bincode::deserialize(&payload).unwrap() {
            LatticeValue::Set(value) => assert_eq!(value.elements.len(), 2),
            other => panic!("expected a set state, got {:?}", other.kind()),
        }
    }

    // ============================================================
    // SCENARIO 4: NODE-JOIN REDISTRIBUTION
    // ============================================================

    #[tokio::test]
    async fn test_node_join_redistributes_and_removes_moved_keys() {
        let mut worker = worker(18000, 1, 1, 0).await;

        let keys: Vec<String> = (0..100).map(|i| format!("key_{i}")).collect();
        for key in &keys {
            worker.install_default_replication(key);
            worker.write_tuple(key.clone(), LatticeType::Lww, &lww_bytes(1, b"v"));
        }
        assert_eq!(worker.stored_key_map.len(), 100);

        worker
            .handle_node_join(format!("memory:{NODE_B}:{NODE_B}:0"))
            .await;

        let moved: Vec<String> = keys
            .iter()
            .filter(|key| !worker.resolve(key).unwrap().contains(&worker.wt))
            .cloned()
            .collect();
        assert!(!moved.is_empty(), "the hash split should move some keys");
        assert!(moved.len() < keys.len(), "and keep some keys");
        assert_eq!(
            worker.join_remove_set,
            moved.iter().cloned().collect::<HashSet<String>>(),
            "exactly the moved keys are marked for removal"
        );

        let mut rounds = 0;
        while !worker.join_gossip_map.is_empty() {
            worker.redistribute_tick().await;
            rounds += 1;
            assert!(rounds < 20, "the backlog drains in bounded rounds");
        }

        for key in &moved {
            assert!(!worker.stored_key_map.contains_key(key));
        }
        for key in keys.iter().filter(|key| !moved.contains(key)) {
            assert!(worker.stored_key_map.contains_key(key));
        }
        // Nothing left in the store belongs elsewhere.
        for key in worker.stored_key_map.keys() {
            assert!(worker.resolve(key).unwrap().contains(&worker.wt));
        }
    }

    // ============================================================
    // SCENARIO 5: REPLICATION CHANGE
    // ============================================================

    #[tokio::test]
    async fn test_replication_change_ships_and_drops_lost_keys() {
        // Default replication of two: every key lives on both nodes.
        let mut worker = worker(19000, 1, 2, 0).await;
        worker
            .handle_node_join(format!("memory:{NODE_B}:{NODE_B}:0"))
            .await;

        // Pick a key whose first replica is the peer, store it here.
        let key = (0..200)
            .map(|i| format!("key_{i}"))
            .find(|key| {
                worker.install_default_replication(key);
                worker.resolve(key).unwrap()[0].private_ip == NODE_B
            })
            .expect("some key should lead on the peer node");
        worker.write_tuple(key.clone(), LatticeType::Lww, &lww_bytes(1, b"v"));
        assert!(worker.stored_key_map.contains_key(&key));

        // Shrinking the key to a single replica leaves only the peer.
        let update = ReplicationFactorUpdate {
            updates: vec![ReplicationFactor {
                key: key.clone(),
                global: vec![crate::protocol::ReplicationValue {
                    tier: Tier::Memory,
                    value: 1,
                }],
                local: vec![crate::protocol::ReplicationValue {
                    tier: Tier::Memory,
                    value: 1,
                }],
            }],
        };
        worker
            .handle_replication_change(bincode::serialize(&update).unwrap())
            .await;

        assert!(!worker.stored_key_map.contains_key(&key));
        assert_eq!(
            worker.key_replication_map[&key].global[&Tier::Memory],
            1,
            "the new factors are installed"
        );
    }

    // ============================================================
    // DEFERRED GOSSIP
    // ============================================================

    #[tokio::test]
    async fn test_deferred_gossip_applies_after_replication_lookup() {
        let mut worker = worker(20000, 1, 1, 0).await;
        let key = "g".to_string();

        let gossip = put_request("gossip-1", None, &key, LatticeType::Lww, lww_bytes(4, b"v"));
        worker
            .handle_gossip(bincode::serialize(&gossip).unwrap())
            .await;
        assert!(!worker.stored_key_map.contains_key(&key));
        assert_eq!(worker.pending_gossip[&key].len(), 1);

        // The lookup comes back empty-handed, which installs tier defaults
        // and re-drives the parked gossip.
        let lookup_answer = KeyResponse {
            response_id: "lookup-1".to_string(),
            tuples: vec![crate::protocol::ResponseTuple::error(
                crate::protocol::replication_metadata_key(&key),
                ResponseError::KeyDoesNotExist,
            )],
        };
        worker
            .handle_replication_response(bincode::serialize(&lookup_answer).unwrap())
            .await;

        assert!(worker.pending_gossip.is_empty());
        let (kind, payload) = worker.read_value(&key).unwrap();
        assert_eq!(kind, LatticeType::Lww);
        match bincode::deserialize(&payload).unwrap() {
            LatticeValue::Lww(value) => assert_eq!(value.timestamp, 4),
            other => panic!("expected an LWW state, got {:?}", other.kind()),
        }
    }

    // ============================================================
    // SCENARIO 6: CACHE INVALIDATION
    // ============================================================

    #[tokio::test]
    async fn test_cache_invalidation_targets_current_holders() {
        let mut worker = worker(21000, 1, 1, 0).await;
        let cache_socket = UdpSocket::bind(cache_update_addr(NODE_A, 21000))
            .await
            .unwrap();

        let report = CacheKeysReport {
            cache_ip: NODE_A.to_string(),
            keys: vec!["k1".to_string(), "k2".to_string()],
        };
        worker.handle_cache_keys(bincode::serialize(&report).unwrap());
        assert!(worker.key_to_cache_ips["k1"].contains(NODE_A));
        assert!(worker.key_to_cache_ips["k2"].contains(NODE_A));

        // A write to k1 reaches the cache on the next gossip round.
        worker.install_default_replication(&"k1".to_string());
        worker.write_tuple("k1".to_string(), LatticeType::Lww, &lww_bytes(1, b"v"));
        worker.gossip_tick().await;
        let update = recv_request(&cache_socket).await;
        assert_eq!(update.request_type, RequestType::Put);
        assert_eq!(update.tuples[0].key, "k1");

        // The cache narrows to k2; both maps stay inverses of each other and
        // k1 writes stop targeting it.
        let report = CacheKeysReport {
            cache_ip: NODE_A.to_string(),
            keys: vec!["k2".to_string()],
        };
        worker.handle_cache_keys(bincode::serialize(&report).unwrap());
        assert!(!worker.key_to_cache_ips.contains_key("k1"));
        for (cache_ip, keys) in &worker.cache_ip_to_keys {
            for key in keys {
                assert!(worker.key_to_cache_ips[key].contains(cache_ip));
            }
        }
        for (key, cache_ips) in &worker.key_to_cache_ips {
            for cache_ip in cache_ips {
                assert!(worker.cache_ip_to_keys[cache_ip].contains(key));
            }
        }

        worker.write_tuple("k1".to_string(), LatticeType::Lww, &lww_bytes(2, b"w"));
        worker.gossip_tick().await;
        let mut buf = [0u8; 1024];
        let silent =
            tokio::time::timeout(Duration::from_millis(300), cache_socket.recv_from(&mut buf))
                .await
                .is_err();
        assert!(silent, "the cache no longer holds k1");
    }

    // ============================================================
    // CACHE LIST RECONCILIATION
    // ============================================================

    #[tokio::test]
    async fn test_management_response_reconciles_caches() {
        let mut worker = worker(22000, 1, 1, 0).await;

        let list = CacheNodeList {
            ips: vec![NODE_B.to_string()],
        };
        worker
            .handle_management_nodes(bincode::serialize(&list).unwrap())
            .await;
        assert!(worker.extant_caches.contains(NODE_B));
        assert_eq!(worker.rid, 1, "a fresh cache triggers one enumerate query");

        let report = CacheKeysReport {
            cache_ip: NODE_B.to_string(),
            keys: vec!["k1".to_string()],
        };
        worker.handle_cache_keys(bincode::serialize(&report).unwrap());
        assert!(worker.key_to_cache_ips.contains_key("k1"));

        // The cache drops off the live list and takes its mappings along.
        worker
            .handle_management_nodes(bincode::serialize(&CacheNodeList::default()).unwrap())
            .await;
        assert!(worker.extant_caches.is_empty());
        assert!(worker.cache_ip_to_keys.is_empty());
        assert!(worker.key_to_cache_ips.is_empty());
    }

    // ============================================================
    // SCENARIO 5 (TELEMETRY): EPOCH COUNTERS
    // ============================================================

    #[tokio::test]
    async fn test_report_tick_advances_epoch_and_resets_counters() {
        let mut worker = worker(23000, 1, 1, 0).await;
        worker.install_default_replication(&"a".to_string());
        worker
            .process_request(put_request(
                "put-1",
                None,
                "a",
                LatticeType::Lww,
                lww_bytes(1, b"x"),
            ))
            .await;
        assert_eq!(worker.access_count, 1);

        worker.report_tick().await;
        assert_eq!(worker.epoch, 1);
        assert_eq!(worker.access_count, 0);
        assert_eq!(worker.working_time, 0);
        assert!(worker.working_time_map.iter().all(|time| *time == 0));

        worker.report_tick().await;
        assert_eq!(worker.epoch, 2);
    }
}
