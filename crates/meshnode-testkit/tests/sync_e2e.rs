//! Two-node sync convergence scenarios.

use meshnode_core::BlacklistedPu;
use meshnode_store::Store;
use meshnode_testkit::MeshFixture;

const NOW: i64 = 1_736_870_400_000;

#[tokio::test]
async fn two_nodes_converge_on_messages_and_channels() {
    let mesh = MeshFixture::new();
    let ap_a = mesh.ap(0x02, "ap-a");
    let ap_b = mesh.ap(0x03, "ap-b");
    let node_a = mesh.node(&ap_a);
    let node_b = mesh.node(&ap_b);

    // Disjoint starting states.
    node_a
        .store()
        .upsert_channel_if_newer(&ap_a.make_channel("general", true, NOW))
        .await
        .unwrap();
    node_b
        .store()
        .upsert_channel_if_newer(&ap_b.make_channel("random", true, NOW))
        .await
        .unwrap();

    let from_a = ap_a.make_message("hello from a", "alice", "general", NOW + 1);
    let from_b = ap_b.make_message("hello from b", "bob", "random", NOW + 2);
    node_a.store().insert_message(&from_a).await.unwrap();
    node_b.store().insert_message(&from_b).await.unwrap();

    // A calls B, then ingests B's answer.
    let request = node_a.build_sync_request(NOW + 10).await.unwrap();
    let (response, report_b) = node_b
        .sync(&ap_a.issue_node_token(NOW + 10), request, NOW + 10)
        .await
        .unwrap();
    assert_eq!(report_b.messages_ingested, 1);
    assert_eq!(report_b.channels_ingested, 1);

    let report_a = node_a
        .ingest_sync_response(&response, NOW + 11)
        .await
        .unwrap();
    assert_eq!(report_a.messages_ingested, 1);
    assert_eq!(report_a.channels_ingested, 1);

    // Both nodes now hold both messages and both channels.
    for node in [&node_a, &node_b] {
        assert!(node.store().has_message(&from_a.hash_key).await.unwrap());
        assert!(node.store().has_message(&from_b.hash_key).await.unwrap());
        assert!(node.store().find_channel("general").await.unwrap().is_some());
        assert!(node.store().find_channel("random").await.unwrap().is_some());
    }

    // A second identical round is a no-op.
    let request = node_a.build_sync_request(NOW + 20).await.unwrap();
    let (response, report_b) = node_b
        .sync(&ap_a.issue_node_token(NOW + 20), request, NOW + 20)
        .await
        .unwrap();
    assert_eq!(report_b.messages_ingested, 0);
    let report_a = node_a
        .ingest_sync_response(&response, NOW + 21)
        .await
        .unwrap();
    assert_eq!(report_a.messages_ingested, 0);
}

#[tokio::test]
async fn blacklist_propagates_between_nodes() {
    let mesh = MeshFixture::new();
    let ap_a = mesh.ap(0x02, "ap-a");
    let ap_b = mesh.ap(0x03, "ap-b");
    let node_a = mesh.node(&ap_a);
    let node_b = mesh.node(&ap_b);

    node_a
        .store()
        .insert_blacklisted_pu(&BlacklistedPu {
            pub_key: "REVOKED-PU-PEM".into(),
            tod: NOW,
        })
        .await
        .unwrap();

    let request = node_a.build_sync_request(NOW + 10).await.unwrap();
    let (_, report) = node_b
        .sync(&ap_a.issue_node_token(NOW + 10), request, NOW + 10)
        .await
        .unwrap();
    assert_eq!(report.blacklist_ingested, 1);

    let blacklist = node_b.store().list_blacklist().await.unwrap();
    assert_eq!(blacklist.len(), 1);
    assert_eq!(blacklist[0].pub_key, "REVOKED-PU-PEM");
}

#[tokio::test]
async fn emergency_sync_bootstraps_fresh_node() {
    let mesh = MeshFixture::new();
    let ap_a = mesh.ap(0x02, "ap-a");
    let ap_b = mesh.ap(0x03, "ap-b");
    let node_a = mesh.node(&ap_a);
    let fresh = mesh.node(&ap_b);

    node_a
        .store()
        .upsert_channel_if_newer(&ap_a.make_channel("general", true, NOW))
        .await
        .unwrap();
    node_a
        .store()
        .insert_message(&ap_a.make_message("pre-existing", "alice", "general", NOW))
        .await
        .unwrap();

    // Bootstrap carries channels and blacklist only.
    let snapshot = node_a.emergency_sync(NOW + 5).await.unwrap();
    assert_eq!(snapshot.channels.len(), 1);
    assert!(snapshot.messages.is_empty());

    fresh.ingest_sync_response(&snapshot, NOW + 6).await.unwrap();
    assert!(fresh.store().find_channel("general").await.unwrap().is_some());

    // With the channel known, a full sync then pulls the messages.
    let request = fresh.build_sync_request(NOW + 10).await.unwrap();
    let (response, _) = node_a
        .sync(&ap_b.issue_node_token(NOW + 10), request, NOW + 10)
        .await
        .unwrap();
    let report = fresh
        .ingest_sync_response(&response, NOW + 11)
        .await
        .unwrap();
    assert_eq!(report.messages_ingested, 1);
}

#[tokio::test]
async fn sync_rejects_bad_token_and_stale_clock() {
    let mesh = MeshFixture::new();
    let ap_a = mesh.ap(0x02, "ap-a");
    let ap_b = mesh.ap(0x03, "ap-b");
    let node_b = mesh.node(&ap_b);

    // Stale tod.
    let mut request = mesh.node(&ap_a).build_sync_request(NOW).await.unwrap();
    request.tod = NOW - 10 * 60 * 1000;
    let result = node_b
        .sync(&ap_a.issue_node_token(NOW), request.clone(), NOW)
        .await;
    assert!(matches!(result, Err(meshnode::NodeError::Timeout)));

    // Garbage token.
    request.tod = NOW;
    let result = node_b.sync("not-a-token", request, NOW).await;
    assert!(matches!(result, Err(meshnode::NodeError::AuthInvalid(_))));
}
