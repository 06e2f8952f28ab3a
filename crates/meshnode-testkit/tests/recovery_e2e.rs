//! End-to-end identity recovery scenarios across two access points.

use meshnode::{NodeError, RecoverIdentityRequest, RecoveryOutcome, RecoveryStatus};
use meshnode_core::crypto::Keypair;
use meshnode_core::MtToken;
use meshnode_recovery::keypair_from_phrase;
use meshnode_store::Store;
use meshnode_testkit::{fixed_phrase, MeshFixture};

const NOW: i64 = 1_736_870_400_000;

fn recover_request(username: &str, ap: &str, words: Vec<String>, tod: i64) -> RecoverIdentityRequest {
    RecoverIdentityRequest {
        username: username.to_string(),
        ap_identifier: ap.to_string(),
        recovery_words: words,
        tod,
    }
}

#[tokio::test]
async fn local_recovery_roundtrip() {
    let mesh = MeshFixture::new();
    let ap = mesh.ap(0x02, "ap-a");
    let node = mesh.node(&ap);

    let words = fixed_phrase();
    let mt = Keypair::from_seed(&[0x10; 32]).unwrap();
    node.register_user("alice", &mt.public_key_pem(), &words, NOW)
        .await
        .unwrap();

    let outcome = node
        .recover_identity(recover_request("alice", "ap-a", words.clone(), NOW), NOW)
        .await
        .unwrap();

    let token = match outcome {
        RecoveryOutcome::Recovered { username, token } => {
            assert_eq!(username, "alice");
            token
        }
        other => panic!("expected terminal recovery, got {:?}", other),
    };

    // The replacement token binds alice to the phrase-derived key and
    // verifies through the full chain.
    let parsed = MtToken::parse(&token).unwrap();
    assert_eq!(parsed.token_data.mt_username, "alice");
    assert_eq!(parsed.token_data.ap_reg, "ap-a");
    assert_eq!(
        parsed.token_data.mt_pub_key,
        keypair_from_phrase(&words).unwrap().public_key_pem()
    );
    assert!(node.verifier().verify_token(&token, true).token_valid);
}

#[tokio::test]
async fn local_recovery_wrong_phrase_rejected() {
    let mesh = MeshFixture::new();
    let ap = mesh.ap(0x02, "ap-a");
    let node = mesh.node(&ap);

    node.register_user("alice", "MT-PEM", &fixed_phrase(), NOW)
        .await
        .unwrap();

    let mut wrong = fixed_phrase();
    wrong[0] = "acorn".into();
    let result = node
        .recover_identity(recover_request("alice", "ap-a", wrong, NOW), NOW)
        .await;
    assert!(matches!(result, Err(NodeError::AuthInvalid(_))));
}

// The §8-style scenario: alice lives on node B, asks node A for recovery,
// and the answer travels back over ordinary sync traffic.
#[tokio::test]
async fn cross_ap_recovery_roundtrip() {
    let mesh = MeshFixture::new();
    let ap_a = mesh.ap(0x02, "ap-a");
    let ap_b = mesh.ap(0x03, "ap-b");
    let node_a = mesh.node(&ap_a);
    let node_b = mesh.node(&ap_b);

    let words = fixed_phrase();
    node_b
        .register_user("alice", "OLD-MT-PEM", &words, NOW)
        .await
        .unwrap();

    // Node A has no record of alice; the attempt goes cross-AP.
    let outcome = node_a
        .recover_identity(recover_request("alice", "ap-b", words.clone(), NOW), NOW)
        .await
        .unwrap();
    let (temp_user_id, temp_token) = match outcome {
        RecoveryOutcome::CrossApInitiated {
            temp_user_id,
            temp_token,
        } => (temp_user_id, temp_token),
        other => panic!("expected cross-AP initiation, got {:?}", other),
    };

    // The temp token keeps alice on the network via node A meanwhile.
    assert!(node_a.verifier().verify_token(&temp_token, true).token_valid);

    let status = node_a
        .check_cross_ap_recovery_status(&temp_user_id, NOW)
        .await
        .unwrap();
    assert_eq!(status.status, RecoveryStatus::Pending);

    // One sync round-trip: A calls B, B ingests the request, answers it,
    // and the response rides the same sync response back.
    let request = node_a.build_sync_request(NOW + 1000).await.unwrap();
    assert_eq!(request.cross_ap_requests.len(), 1);
    // Sensitive fields never travel in the clear.
    assert!(request.cross_ap_requests[0].recovery_hash.is_none());
    assert!(request.cross_ap_requests[0].real_user_id.is_none());

    let (response, _) = node_b
        .sync(&ap_a.issue_node_token(NOW + 1000), request, NOW + 1000)
        .await
        .unwrap();
    assert!(response
        .cross_ap_responses
        .iter()
        .any(|r| r.temp_user_id == temp_user_id));

    node_a
        .ingest_sync_response(&response, NOW + 2000)
        .await
        .unwrap();

    // pending -> completed, observable from the polling surface.
    let status = node_a
        .check_cross_ap_recovery_status(&temp_user_id, NOW + 2000)
        .await
        .unwrap();
    assert_eq!(status.status, RecoveryStatus::Completed);

    // The recovered token decrypts only with the requester's ephemeral
    // key, and names the real identity on its home AP.
    let completed = node_a
        .get_cross_ap_recovery_response(&temp_user_id)
        .await
        .unwrap();
    let parsed = MtToken::parse(&completed.token).unwrap();
    assert_eq!(parsed.token_data.mt_username, "alice");
    assert_eq!(parsed.token_data.ap_reg, "ap-b");
    assert!(node_a
        .verifier()
        .verify_token(&completed.token, true)
        .token_valid);

    // Home AP rotated alice's key to the phrase-derived one.
    let alice = node_b.store().find_user("alice").await.unwrap().unwrap();
    assert_eq!(
        alice.mt_pub_key,
        Some(keypair_from_phrase(&words).unwrap().public_key_pem())
    );
}

#[tokio::test]
async fn cross_ap_request_expires_and_is_retained_then_purged() {
    let mesh = MeshFixture::new();
    let ap_a = mesh.ap(0x02, "ap-a");
    let _ap_b = mesh.ap(0x03, "ap-b");
    let node_a = mesh.node(&ap_a);

    let outcome = node_a
        .recover_identity(
            recover_request("nobody", "ap-b", fixed_phrase(), NOW),
            NOW,
        )
        .await
        .unwrap();
    let temp_user_id = match outcome {
        RecoveryOutcome::CrossApInitiated { temp_user_id, .. } => temp_user_id,
        other => panic!("expected cross-AP initiation, got {:?}", other),
    };

    let ttl = meshnode_core::CROSS_AP_REQUEST_TTL_MS;
    let retention = meshnode_core::EXPIRED_RETENTION_MS;

    // 48h pass without a response.
    let after_expiry = NOW + ttl + 1;
    let report = node_a.run_cleanup(after_expiry).await.unwrap();
    assert_eq!(report.swept_expired, 1);

    // The sweep fires exactly once.
    let report = node_a.run_cleanup(after_expiry).await.unwrap();
    assert_eq!(report.swept_expired, 0);
    assert_eq!(report.purged_requests, 0);

    let status = node_a
        .check_cross_ap_recovery_status(&temp_user_id, after_expiry)
        .await
        .unwrap();
    assert_eq!(status.status, RecoveryStatus::Expired);

    // Still on disk through the retention window.
    let report = node_a.run_cleanup(NOW + ttl + retention).await.unwrap();
    assert_eq!(report.purged_requests, 0);

    // Hard-deleted only after retention elapses.
    let report = node_a.run_cleanup(NOW + ttl + retention + 2).await.unwrap();
    assert_eq!(report.purged_requests, 1);

    let result = node_a
        .check_cross_ap_recovery_status(&temp_user_id, NOW + ttl + retention + 2)
        .await;
    assert!(matches!(result, Err(NodeError::NotFound(_))));
}

#[tokio::test]
async fn stale_recovery_request_times_out() {
    let mesh = MeshFixture::new();
    let ap = mesh.ap(0x02, "ap-a");
    let node = mesh.node(&ap);

    let stale_tod = NOW - 6 * 60 * 1000;
    let result = node
        .recover_identity(
            recover_request("alice", "ap-a", fixed_phrase(), stale_tod),
            NOW,
        )
        .await;
    assert!(matches!(result, Err(NodeError::Timeout)));
}
