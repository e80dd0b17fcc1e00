//! End-to-end dead-man's-switch scenarios over the in-memory store.

mod common;

use chrono::{Duration, Utc};
use common::{Harness, Identity, CRON_SECRET};
use vigil::auth::signature::actions;
use vigil::dms::records::keys;
use vigil::dms::service::{
    CancelRequest, CheckinRequest, CreateSwitchRequest, ReleaseRecord,
};
use vigil::kv::KvStore;
use vigil::types::VigilError;

fn create_request(sender: &Identity, recipient: &str, interval_hours: u32) -> CreateSwitchRequest {
    let (signature, timestamp) = sender.sign(actions::DMS_CREATE, &[recipient]);
    CreateSwitchRequest {
        recipient_username: recipient.to_string(),
        encrypted_message: "c2VhbGVkLWJveA==".to_string(),
        check_in_interval_hours: interval_hours,
        sender_pubkey: sender.pubkey.clone(),
        signature,
        timestamp,
    }
}

fn checkin_request(sender: &Identity) -> CheckinRequest {
    let (signature, timestamp) = sender.sign(actions::DMS_CHECKIN, &[]);
    CheckinRequest {
        sender_pubkey: sender.pubkey.clone(),
        signature,
        timestamp,
    }
}

fn cancel_request(sender: &Identity, switch_id: &str) -> CancelRequest {
    let (signature, timestamp) = sender.sign(actions::DMS_CANCEL, &[switch_id]);
    CancelRequest {
        sender_pubkey: sender.pubkey.clone(),
        signature,
        timestamp,
    }
}

#[tokio::test]
async fn create_and_list_metadata_only() {
    let harness = Harness::new(&[("alice", "alice-pubkey")]);
    let sender = Identity::generate();

    let created = harness.dms.create(create_request(&sender, "alice", 24)).await.unwrap();
    assert!(created.success);

    let listing = harness.dms.list(&sender.pubkey).await.unwrap();
    assert_eq!(listing.switches.len(), 1);
    let summary = &listing.switches[0];
    assert_eq!(summary.switch_id, created.switch_id);
    assert_eq!(summary.recipient_username, "alice");
    assert_eq!(summary.interval_hours, 24);
    assert_eq!(summary.status, "active");
    assert!(summary.triggered_at.is_none());

    // The listing never carries the ciphertext or its handle
    let json = serde_json::to_string(&listing).unwrap();
    assert!(!json.contains("c2VhbGVkLWJveA=="));
    assert!(!json.contains("payloadHandle"));
}

#[tokio::test]
async fn unknown_recipient_is_not_found() {
    let harness = Harness::new(&[("alice", "alice-pubkey")]);
    let sender = Identity::generate();

    let result = harness.dms.create(create_request(&sender, "nobody", 24)).await;
    assert!(matches!(result, Err(VigilError::NotFound(_))));
}

#[tokio::test]
async fn interval_bounds() {
    let harness = Harness::new(&[("alice", "alice-pubkey")]);
    let sender = Identity::generate();

    for bad in [0u32, 8761] {
        let result = harness.dms.create(create_request(&sender, "alice", bad)).await;
        assert!(matches!(result, Err(VigilError::Validation(_))), "interval {bad} accepted");
    }

    for good in [1u32, 8760] {
        harness.dms.create(create_request(&sender, "alice", good)).await.unwrap();
    }

    // A negative interval dies at deserialization, before the service
    let negative = serde_json::from_str::<CreateSwitchRequest>(
        r#"{"recipientUsername":"alice","encryptedMessage":"x","checkInIntervalHours":-1,"senderPubkey":"k"}"#,
    );
    assert!(negative.is_err());
}

#[tokio::test]
async fn checkin_bumps_every_active_switch_by_its_own_interval() {
    let harness = Harness::new(&[("alice", "a"), ("bob", "b")]);
    let sender = Identity::generate();
    let t0 = Utc::now();

    let short = harness
        .dms
        .create_at(t0, create_request(&sender, "alice", 1))
        .await
        .unwrap();
    let long = harness
        .dms
        .create_at(t0, create_request(&sender, "bob", 48))
        .await
        .unwrap();

    // Fifty minutes in, the owner checks in
    let t1 = t0 + Duration::minutes(50);
    let checkin = harness.dms.checkin_at(t1, checkin_request(&sender)).await.unwrap();
    assert_eq!(checkin.switch_count, 2);
    // Latest bumped deadline belongs to the 48-hour switch
    assert_eq!(checkin.next_deadline, Some((t1 + Duration::hours(48)).to_rfc3339()));

    let listing = harness.dms.list(&sender.pubkey).await.unwrap();
    for summary in &listing.switches {
        let expected = if summary.switch_id == short.switch_id {
            t1 + Duration::hours(1)
        } else {
            assert_eq!(summary.switch_id, long.switch_id);
            t1 + Duration::hours(48)
        };
        assert_eq!(summary.next_deadline, expected.to_rfc3339());
    }

    // A sweep fifteen minutes past the original 1h deadline finds nothing
    let sweep = harness
        .dms
        .process_at(t0 + Duration::minutes(65), Some(CRON_SECRET))
        .await
        .unwrap();
    assert_eq!(sweep.processed, 0);
    assert_eq!(sweep.total, 2);
}

#[tokio::test]
async fn checkin_with_no_switches_succeeds() {
    let harness = Harness::new(&[]);
    let sender = Identity::generate();

    let checkin = harness.dms.checkin(checkin_request(&sender)).await.unwrap();
    assert!(checkin.success);
    assert_eq!(checkin.switch_count, 0);
    assert!(checkin.next_deadline.is_none());
}

#[tokio::test]
async fn overdue_switch_triggers_and_releases() {
    let harness = Harness::new(&[("alice", "alice-pubkey")]);
    let sender = Identity::generate();
    let t0 = Utc::now();

    let created = harness
        .dms
        .create_at(t0, create_request(&sender, "alice", 1))
        .await
        .unwrap();

    // Two hours later the deadline (t0+1h) has passed
    let sweep = harness
        .dms
        .process_at(t0 + Duration::hours(2), Some(CRON_SECRET))
        .await
        .unwrap();
    assert_eq!(sweep.processed, 1);
    assert_eq!(sweep.total, 1);
    assert!(sweep.errors.is_empty());

    // Release record is pullable and complete
    let raw = harness.dms.release_record(&created.switch_id).await.unwrap();
    let record: ReleaseRecord = serde_json::from_str(&raw).unwrap();
    assert_eq!(record.record_type, "dms_release");
    assert_eq!(record.switch_id, created.switch_id);
    assert_eq!(record.sender_pubkey, sender.pubkey);
    assert_eq!(record.recipient_username, "alice");
    assert_eq!(record.encrypted_message, "c2VhbGVkLWJveA==");

    // Switch is triggered, out of the active set, still in history
    let listing = harness.dms.list(&sender.pubkey).await.unwrap();
    assert_eq!(listing.switches[0].status, "triggered");
    assert!(listing.switches[0].triggered_at.is_some());
    assert!(harness.kv.set_members(&keys::active_index()).await.unwrap().is_empty());

    // A second sweep finds nothing left
    let again = harness
        .dms
        .process_at(t0 + Duration::hours(3), Some(CRON_SECRET))
        .await
        .unwrap();
    assert_eq!(again.processed, 0);
    assert_eq!(again.total, 0);
}

#[tokio::test]
async fn blob_outage_falls_back_to_local_payload() {
    let harness = Harness::with_failing_blobs(&[("alice", "alice-pubkey")]);
    let sender = Identity::generate();
    let t0 = Utc::now();

    let created = harness
        .dms
        .create_at(t0, create_request(&sender, "alice", 1))
        .await
        .unwrap();

    // The stored handle marks the payload as locally parked
    let switch = harness
        .kv
        .hash_get_all(&keys::switch(&created.switch_id))
        .await
        .unwrap()
        .unwrap();
    assert!(switch.get("payloadHandle").unwrap().starts_with("local:"));

    // The trigger path reads the fallback and releases identically
    let sweep = harness
        .dms
        .process_at(t0 + Duration::hours(2), Some(CRON_SECRET))
        .await
        .unwrap();
    assert_eq!(sweep.processed, 1);

    let raw = harness.dms.release_record(&created.switch_id).await.unwrap();
    let record: ReleaseRecord = serde_json::from_str(&raw).unwrap();
    assert_eq!(record.encrypted_message, "c2VhbGVkLWJveA==");
}

#[tokio::test]
async fn cancel_removes_from_indices_but_keeps_history() {
    let harness = Harness::new(&[("alice", "alice-pubkey")]);
    let sender = Identity::generate();

    let created = harness.dms.create(create_request(&sender, "alice", 24)).await.unwrap();
    harness
        .dms
        .cancel(&created.switch_id, cancel_request(&sender, &created.switch_id))
        .await
        .unwrap();

    assert!(harness.kv.set_members(&keys::active_index()).await.unwrap().is_empty());
    assert!(harness
        .kv
        .set_members(&keys::user_index(&sender.pubkey))
        .await
        .unwrap()
        .is_empty());

    // The record itself survives as history
    let switch = harness
        .kv
        .hash_get_all(&keys::switch(&created.switch_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(switch.get("status").unwrap(), "cancelled");

    // A later sweep has nothing to do
    let sweep = harness
        .dms
        .process_at(Utc::now() + Duration::hours(48), Some(CRON_SECRET))
        .await
        .unwrap();
    assert_eq!(sweep.processed, 0);
}

#[tokio::test]
async fn cancel_collapses_missing_and_foreign_switches() {
    let harness = Harness::new(&[("alice", "alice-pubkey")]);
    let owner = Identity::generate();
    let stranger = Identity::generate();

    let created = harness.dms.create(create_request(&owner, "alice", 24)).await.unwrap();

    // Someone else's switch and a nonexistent one answer identically
    let foreign = harness
        .dms
        .cancel(&created.switch_id, cancel_request(&stranger, &created.switch_id))
        .await;
    let missing = harness
        .dms
        .cancel("no-such-switch", cancel_request(&stranger, "no-such-switch"))
        .await;
    for result in [foreign, missing] {
        match result {
            Err(VigilError::NotFound(message)) => assert_eq!(message, "Switch not found"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn sweep_requires_the_cron_secret() {
    let harness = Harness::new(&[]);

    let missing = harness.dms.process(None).await;
    assert!(matches!(missing, Err(VigilError::AuthMissing(_))));

    let wrong = harness.dms.process(Some("not-the-secret")).await;
    assert!(matches!(wrong, Err(VigilError::AuthInvalid(_))));

    let ok = harness.dms.process(Some(CRON_SECRET)).await.unwrap();
    assert_eq!(ok.total, 0);
}

#[tokio::test]
async fn sweep_garbage_collects_stale_index_entries() {
    let harness = Harness::new(&[("alice", "alice-pubkey")]);
    let sender = Identity::generate();

    let created = harness.dms.create(create_request(&sender, "alice", 24)).await.unwrap();

    // Simulate a crash that deleted the record but not the index entry,
    // plus an id that never existed
    harness.kv.delete(&keys::switch(&created.switch_id)).await.unwrap();
    harness.kv.set_add(&keys::active_index(), "ghost-id").await.unwrap();

    let sweep = harness.dms.process(Some(CRON_SECRET)).await.unwrap();
    assert_eq!(sweep.processed, 0);
    assert!(sweep.errors.is_empty());
    assert!(harness.kv.set_members(&keys::active_index()).await.unwrap().is_empty());
}

#[tokio::test]
async fn unresolvable_recipient_is_recorded_and_switch_stays_armed() {
    // Registered at create time, gone by sweep time
    let harness = Harness::new(&[("alice", "alice-pubkey")]);
    let sender = Identity::generate();
    let t0 = Utc::now();
    let created = harness
        .dms
        .create_at(t0, create_request(&sender, "alice", 1))
        .await
        .unwrap();

    // Rebuild the services over the same store with an empty registry
    let harness_empty = harness.with_identities(&[]);
    let sweep = harness_empty
        .dms
        .process_at(t0 + Duration::hours(2), Some(CRON_SECRET))
        .await
        .unwrap();
    assert_eq!(sweep.processed, 0);
    assert_eq!(sweep.errors.len(), 1);
    assert!(sweep.errors[0].contains(&created.switch_id));

    // The switch remains active for the next sweep to retry
    let listing = harness_empty.dms.list(&sender.pubkey).await.unwrap();
    assert_eq!(listing.switches[0].status, "active");
}
