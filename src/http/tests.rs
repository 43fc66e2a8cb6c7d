#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::http::protocol::{ErrorResponse, LeaderResponse};
    use crate::node::StoreNode;
    use crate::storage::types::{Action, KeyValueAPIObject, TTL_SNAPSHOT_KEY};
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        Config {
            http_server_addr: "127.0.0.1:0".to_string(),
            raft_server_addr: "127.0.0.1:0".to_string(),
            raft_dir: dir.path().to_string_lossy().into_owned(),
            run_in_single_server_mode: true,
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

    fn url(node: &StoreNode, path: &str) -> String {
        format!("http://{}{}", node.http_addr(), path)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn leader_endpoint_reports_identity() {
        let (node, _dir) = start_leader().await;
        let client = reqwest::Client::new();

        let response = client
            .get(url(&node, "/leader"))
            .send()
            .await
            .expect("request");
        assert_eq!(response.status(), 200);
        let body: LeaderResponse = response.json().await.expect("json");
        assert!(body.is_leader);
        assert_eq!(body.leader_is, node.raft_addr().to_string());

        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn create_read_update_delete_flow() {
        let (node, _dir) = start_leader().await;
        let client = reqwest::Client::new();
        let key_url = url(&node, "/key/crud-test");

        // Create
        let response = client
            .post(&key_url)
            .json(&serde_json::json!({"value": "foo", "ttl": 999}))
            .send()
            .await
            .expect("create");
        assert_eq!(response.status(), 201);
        let body: KeyValueAPIObject = response.json().await.expect("json");
        assert_eq!(body.action, Action::Created);
        assert_eq!(body.node.key, "/crud-test");
        assert_eq!(body.node.value, "foo");

        // Read
        let response = client.get(&key_url).send().await.expect("read");
        assert_eq!(response.status(), 200);
        let body: KeyValueAPIObject = response.json().await.expect("json");
        assert_eq!(body.action, Action::Get);
        assert_eq!(body.node.value, "foo");

        // Duplicate create conflicts
        let response = client
            .post(&key_url)
            .json(&serde_json::json!({"value": "bar", "ttl": 10}))
            .send()
            .await
            .expect("conflict");
        assert_eq!(response.status(), 409);

        // Update
        let response = client
            .put(&key_url)
            .json(&serde_json::json!({"value": "bar", "ttl": 666}))
            .send()
            .await
            .expect("update");
        assert_eq!(response.status(), 200);
        let body: KeyValueAPIObject = response.json().await.expect("json");
        assert_eq!(body.action, Action::Updated);
        assert_eq!(body.node.value, "bar");
        assert_eq!(body.node.ttl, 666);

        // Delete, then read back a 404
        let response = client.delete(&key_url).send().await.expect("delete");
        assert_eq!(response.status(), 200);
        let response = client.get(&key_url).send().await.expect("read gone");
        assert_eq!(response.status(), 404);
        let body: ErrorResponse = response.json().await.expect("json");
        assert_eq!(body.cause, "/crud-test");

        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn write_body_ttl_defaults_to_zero() {
        let (node, _dir) = start_leader().await;
        let client = reqwest::Client::new();

        let response = client
            .post(url(&node, "/key/no-ttl"))
            .json(&serde_json::json!({"value": "x"}))
            .send()
            .await
            .expect("create");
        assert_eq!(response.status(), 201);
        let body: KeyValueAPIObject = response.json().await.expect("json");
        assert_eq!(body.node.ttl, 0);

        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reserved_snapshot_key_is_not_exposed() {
        let (node, _dir) = start_leader().await;
        let client = reqwest::Client::new();
        let reserved_url = url(&node, &format!("/key/{}", TTL_SNAPSHOT_KEY));

        let response = client.get(&reserved_url).send().await.expect("get");
        assert_eq!(response.status(), 400);

        let response = client
            .post(&reserved_url)
            .json(&serde_json::json!({"value": "x", "ttl": 0}))
            .send()
            .await
            .expect("post");
        assert_eq!(response.status(), 400);

        let response = client.delete(&reserved_url).send().await.expect("delete");
        assert_eq!(response.status(), 400);

        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn follower_forwards_writes_to_the_leader() {
        let (leader, _d1) = start_leader().await;

        let dir2 = tempfile::tempdir().expect("tempdir");
        let mut config = test_config(&dir2);
        config.run_in_single_server_mode = false;
        config.join_address = Some(leader.http_addr().to_string());
        let follower = StoreNode::start(config).await.expect("follower start");
        assert!(
            wait_for(10_000, || follower.store().leader_address().is_some()).await,
            "follower never learned the leader"
        );

        let client = reqwest::Client::new();

        // Write lands on the follower, commits on the leader.
        let response = client
            .post(url(&follower, "/key/forwarded"))
            .json(&serde_json::json!({"value": "via-follower", "ttl": 0}))
            .send()
            .await
            .expect("forwarded create");
        assert_eq!(response.status(), 201);
        let body: KeyValueAPIObject = response.json().await.expect("json");
        assert_eq!(body.action, Action::Created);

        // Visible on the leader immediately, on the follower eventually.
        let response = client
            .get(url(&leader, "/key/forwarded"))
            .send()
            .await
            .expect("leader read");
        assert_eq!(response.status(), 200);

        assert!(
            wait_for(5_000, || follower.store().get("forwarded").is_some()).await,
            "write never replicated back to the follower"
        );

        follower.shutdown().await;
        leader.shutdown().await;
    }
}
