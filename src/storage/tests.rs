#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::error::StoreError;
    use crate::node::StoreNode;
    use crate::storage::types::{now_secs, Action, NodeValue, TTL_SNAPSHOT_KEY};
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        Config {
            http_server_addr: "127.0.0.1:0".to_string(),
            raft_server_addr: "127.0.0.1:0".to_string(),
            raft_dir: dir.path().to_string_lossy().into_owned(),
            run_in_single_server_mode: true,
            // Keep the timer-driven eviction out of the way; tests drive
            // ticks explicitly.
            ttl_tick_ms: 3_600_000,
            ..Config::default()
        }
    }

    async fn wait_for(timeout_ms: u64, mut cond: impl FnMut() -> bool) -> bool {
        let mut waited = 0;
        while waited < timeout_ms {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
            waited += 25;
        }
        cond()
    }

    async fn start_leader() -> (StoreNode, TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let node = StoreNode::start(test_config(&dir)).await.expect("node start");
        assert!(
            wait_for(5_000, || node.is_leader()).await,
            "node did not become leader"
        );
        (node, dir)
    }

    async fn start_follower(leader: &StoreNode) -> (StoreNode, TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = test_config(&dir);
        config.run_in_single_server_mode = false;
        config.join_address = Some(leader.http_addr().to_string());
        let node = StoreNode::start(config).await.expect("follower start");
        assert!(
            wait_for(10_000, || node.store().leader_address().is_some()).await,
            "follower never learned the leader"
        );
        (node, dir)
    }

    // ============================================================
    // RECORD CODEC
    // ============================================================

    #[test]
    fn codec_round_trip_preserves_all_fields() {
        let mut node = NodeValue::new("some-key", "some opaque value", 30);
        node.calculate_expiry();
        let encoded = node.encode_for_storage().expect("encode");
        let decoded = NodeValue::decode_from_storage(&encoded).expect("decode");
        assert_eq!(node, decoded);
    }

    #[test]
    fn zero_ttl_never_expires() {
        let mut node = NodeValue::new("k", "v", 0);
        node.calculate_expiry();
        assert_eq!(node.expiration, 0);
        assert!(!node.is_expired(now_secs() + 1_000_000));
    }

    #[test]
    fn positive_ttl_expires_after_deadline() {
        let mut node = NodeValue::new("k", "v", 10);
        node.calculate_expiry();
        assert_eq!(node.expiration, node.created + 10);
        assert!(!node.is_expired(node.created + 10));
        assert!(node.is_expired(node.created + 11));
    }

    #[test]
    fn garbage_decodes_as_encoding_error() {
        let result = NodeValue::decode_from_storage(b"definitely not msgpack");
        assert!(matches!(result, Err(StoreError::Encoding(_))));
    }

    // ============================================================
    // STORAGE API POLICY
    // ============================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn create_and_read_back() {
        let (node, _dir) = start_leader().await;
        let api = node.storage();

        let envelope = api.create_key("create-test-1", "foo", 999).await.expect("create");
        assert_eq!(envelope.action, Action::Created);
        assert_eq!(envelope.node.value, "foo");
        assert_eq!(envelope.node.ttl, 999);

        let read = api.get_key("create-test-1", false).expect("get");
        assert_eq!(read.action, Action::Get);
        assert_eq!(read.node.value, "foo");

        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn duplicate_create_conflicts() {
        let (node, _dir) = start_leader().await;
        let api = node.storage();

        api.create_key("k", "foo", 999).await.expect("create");
        let second = api.create_key("k", "bar", 10).await;
        assert!(matches!(second, Err(StoreError::KeyExists)));

        // The original value is untouched.
        let read = api.get_key("k", false).expect("get");
        assert_eq!(read.node.value, "foo");

        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn update_overwrites_value_and_ttl() {
        let (node, _dir) = start_leader().await;
        let api = node.storage();

        api.create_key("k", "foo", 999).await.expect("create");
        let updated = api.update_key("k", "bar", 666).await.expect("update");
        assert_eq!(updated.action, Action::Updated);
        assert_eq!(updated.node.value, "bar");

        let read = api.get_key("k", false).expect("get");
        assert_eq!(read.node.value, "bar");
        assert_eq!(read.node.ttl, 666);

        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn delete_then_read_not_found() {
        let (node, _dir) = start_leader().await;
        let api = node.storage();

        api.create_key("k", "foo", 999).await.expect("create");
        let deleted = api.delete_key("k").await.expect("delete");
        assert_eq!(deleted.action, Action::Deleted);

        assert!(matches!(api.get_key("k", false), Err(StoreError::NotFound)));

        // Deleting again still succeeds; the replicated delete is idempotent.
        api.delete_key("k").await.expect("repeat delete");

        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn expired_key_hidden_before_eviction_runs() {
        let (node, _dir) = start_leader().await;
        let api = node.storage();

        api.create_key("e", "x", 1).await.expect("create");
        tokio::time::sleep(Duration::from_secs(2)).await;

        // No eviction tick has run, but the default read policy already
        // hides the record.
        assert!(matches!(api.get_key("e", false), Err(StoreError::NotFound)));
        let raw = api.get_key("e", true).expect("expired read-through");
        assert_eq!(raw.node.value, "x");

        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn create_succeeds_on_expired_slot() {
        let (node, _dir) = start_leader().await;
        let api = node.storage();

        api.create_key("slot", "old", 1).await.expect("create");
        tokio::time::sleep(Duration::from_secs(2)).await;

        let envelope = api.create_key("slot", "new", 0).await.expect("recreate");
        assert_eq!(envelope.action, Action::Created);
        assert_eq!(api.get_key("slot", false).expect("get").node.value, "new");

        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn empty_key_is_rejected_before_the_store() {
        let (node, _dir) = start_leader().await;
        let api = node.storage();

        assert!(matches!(
            api.create_key("", "v", 0).await,
            Err(StoreError::InvalidKey(_))
        ));
        assert!(matches!(api.get_key("", false), Err(StoreError::InvalidKey(_))));
        assert!(matches!(
            api.delete_key("").await,
            Err(StoreError::InvalidKey(_))
        ));

        node.shutdown().await;
    }

    // ============================================================
    // TTL INDEX AND EVICTION
    // ============================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn only_positive_ttls_are_tracked() {
        let (node, _dir) = start_leader().await;
        let api = node.storage();

        api.create_key("forever", "v", 0).await.expect("create");
        assert!(api.ttl_index().is_empty());

        api.create_key("mortal", "v", 600).await.expect("create");
        assert_eq!(api.ttl_index().len(), 1);
        assert_eq!(api.ttl_index().queued_keys(), vec!["mortal".to_string()]);

        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reserved_snapshot_key_is_never_tracked() {
        let (node, _dir) = start_leader().await;
        let api = node.storage();

        let record = NodeValue::new(TTL_SNAPSHOT_KEY, "{}", 60);
        api.set_key(TTL_SNAPSHOT_KEY, record, true).await.expect("set");
        assert!(api.ttl_index().is_empty());

        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn snapshot_round_trip_rebuilds_the_queue() {
        let (node, _dir) = start_leader().await;
        let api = node.storage();

        for key in ["a", "b", "c"] {
            api.create_key(key, "v", 600).await.expect("create");
        }
        api.process_ttl_tick().await;

        let mirror = api.ttl_index().snapshot_copy().expect("mirror");
        assert_eq!(mirror.len(), 3);

        // Leadership bounce: the in-memory index is discarded, then
        // reconstructed from the snapshot stored in the map.
        api.ttl_index().clear();
        assert!(api.ttl_index().mirror_is_absent());
        api.process_ttl_tick().await;

        let mut queued = api.ttl_index().queued_keys();
        queued.sort();
        assert_eq!(queued, vec!["a", "b", "c"]);
        let mirror = api.ttl_index().snapshot_copy().expect("mirror");
        let mut mirrored: Vec<_> = mirror.keys().cloned().collect();
        mirrored.sort();
        assert_eq!(mirrored, queued);

        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn overwritten_ttl_is_not_evicted_early() {
        let (node, _dir) = start_leader().await;
        let api = node.storage();

        api.create_key("k", "v", 1).await.expect("create");
        api.update_key("k", "v", 600).await.expect("update");
        tokio::time::sleep(Duration::from_secs(2)).await;

        // The stale element (expires_at from the first write) is dropped
        // because the record's expiration moved; the key survives.
        api.process_ttl_tick().await;
        assert_eq!(api.get_key("k", false).expect("get").node.ttl, 600);

        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn refreshed_ttl_keeps_its_mirror_entry() {
        let (node, _dir) = start_leader().await;
        let api = node.storage();

        api.create_key("r", "v", 1).await.expect("create");
        api.update_key("r", "v", 600).await.expect("update");

        // Draining the superseded first enqueue must not knock the live
        // enqueue's slot out of the mirror; a successor rebuilding from
        // the snapshot would otherwise never evict this key.
        api.process_ttl_tick().await;

        let mirror = api.ttl_index().snapshot_copy().expect("mirror");
        assert!(
            mirror.contains_key("r"),
            "refreshed key dropped from the snapshot mirror"
        );
        assert!(api.ttl_index().queued_keys().contains(&"r".to_string()));

        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn eviction_deletes_expired_keys() {
        let (node, _dir) = start_leader().await;
        let api = node.storage();

        api.create_key("e", "x", 1).await.expect("create");
        api.process_ttl_tick().await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        api.process_ttl_tick().await;

        assert!(node.store().get("e").is_none(), "record not removed from the map");
        assert!(matches!(api.get_key("e", true), Err(StoreError::NotFound)));
        assert!(api.ttl_index().is_empty());

        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn followers_discard_the_index_and_never_evict() {
        let (leader, _d1) = start_leader().await;
        let (follower, _d2) = start_follower(&leader).await;

        leader.storage().create_key("f", "x", 600).await.expect("create");
        assert!(
            wait_for(5_000, || follower.store().get("f").is_some()).await,
            "write never replicated"
        );

        // Even with a stale element in its queue, a follower tick only
        // drops state; the delete must come from the leader.
        follower.storage().ttl_index().track("f", 1);
        follower.storage().process_ttl_tick().await;
        assert!(follower.storage().ttl_index().is_empty());
        assert!(follower.storage().ttl_index().mirror_is_absent());
        assert!(follower.store().get("f").is_some());

        follower.shutdown().await;
        leader.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn eviction_resumes_after_leadership_moves() {
        let (n1, _d1) = start_leader().await;
        let (n2, _d2) = start_follower(&n1).await;
        let (n3, _d3) = start_follower(&n1).await;
        assert!(
            wait_for(10_000, || {
                n2.store().peers().len() == 3 && n3.store().peers().len() == 3
            })
            .await,
            "cluster never reached three members"
        );

        for i in 0..5 {
            n1.storage()
                .create_key(&format!("exp-{}", i), "x", 2)
                .await
                .expect("create");
        }
        // Persist the pending set through consensus so a successor can
        // pick it up.
        n1.storage().process_ttl_tick().await;
        assert!(
            wait_for(5_000, || n2.store().get(TTL_SNAPSHOT_KEY).is_some()).await,
            "TTL snapshot never replicated"
        );

        n1.shutdown().await;
        assert!(
            wait_for(15_000, || n2.is_leader() || n3.is_leader()).await,
            "no successor elected"
        );
        let successor = if n2.is_leader() { &n2 } else { &n3 };

        tokio::time::sleep(Duration::from_secs(3)).await;
        successor.storage().process_ttl_tick().await; // rebuild
        successor.storage().process_ttl_tick().await; // evict

        for i in 0..5 {
            let key = format!("exp-{}", i);
            assert!(
                matches!(
                    successor.storage().get_key(&key, false),
                    Err(StoreError::NotFound)
                ),
                "{} still visible",
                key
            );
            assert!(successor.store().get(&key).is_none(), "{} still stored", key);
        }

        n2.shutdown().await;
        n3.shutdown().await;
    }
}
