// tests/integration/enrollment_tests.rs
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use fingerprint_auth::{
    core::{AutoPlacement, CancelToken, Placement, PlacementPrompt},
    device::{codes, SimulatedDevice},
    storage::StorageError,
    utils::error::{AcquisitionFailure, EngineError},
};

use crate::common::TestContext;

#[derive(Default)]
struct CountingPrompt {
    calls: AtomicU32,
}

#[async_trait]
impl PlacementPrompt for CountingPrompt {
    async fn request_placement(&self, _name: &str, sample: u32, total: u32) -> Placement {
        assert!(sample >= 1 && sample <= total);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Placement::Ready
    }
}

#[test_log::test(tokio::test)]
async fn test_enroll_alice_with_consistent_samples() {
    let ctx = TestContext::with_device(SimulatedDevice::new().with_scores(75, 10)).await;
    let captured = ctx.push_samples(1, 3);
    let prompt = CountingPrompt::default();

    let receipt = ctx
        .engine
        .register("alice", None, false, &prompt, &CancelToken::new())
        .await
        .expect("Failed to enroll alice");

    assert_eq!(receipt.samples, 3);
    assert_eq!(receipt.min_consistency_score, Some(75));
    assert_eq!(prompt.calls.load(Ordering::SeqCst), 3);

    let stored = ctx.engine.store().get("alice").await.expect("Failed to read templates");
    let bytes: Vec<Vec<u8>> = stored.iter().map(|t| t.data.clone()).collect();
    assert_eq!(bytes, captured);
    assert!(stored.iter().all(|t| t.identity_id == receipt.identity.id));
}

#[test_log::test(tokio::test)]
async fn test_enroll_bob_with_inconsistent_sample_is_rejected() {
    let ctx = TestContext::new().await;
    let first = SimulatedDevice::template(2, 1, 600);
    let second = SimulatedDevice::template(2, 2, 600);
    ctx.device.push_capture(first.clone());
    ctx.device.push_capture(second.clone());
    ctx.device.push_capture(SimulatedDevice::template(2, 3, 600));
    ctx.device.set_pair_score(&first, &second, 20);

    let err = ctx
        .engine
        .register("bob", Some(3), false, &AutoPlacement, &CancelToken::new())
        .await
        .expect_err("Inconsistent enrollment should fail");

    assert!(matches!(
        err,
        EngineError::InconsistentSamples { sample: 2, score: 20, threshold: 60 }
    ));
    let names: Vec<String> = ctx
        .engine
        .list_identities()
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.name)
        .collect();
    assert!(!names.contains(&"bob".to_string()));
    assert!(matches!(
        ctx.engine.store().get("bob").await,
        Err(StorageError::NotFound(_))
    ));
}

#[test_log::test(tokio::test)]
async fn test_enrollment_is_all_or_nothing_on_acquisition_failure() {
    let ctx = TestContext::new().await;
    ctx.push_samples(4, 2);
    for _ in 0..3 {
        ctx.device.push_error(codes::CAPTURE);
    }

    let err = ctx
        .engine
        .register("carol", Some(3), false, &AutoPlacement, &CancelToken::new())
        .await
        .expect_err("Enrollment should fail");

    assert!(matches!(
        err,
        EngineError::AcquisitionFailed { reason: AcquisitionFailure::ImageCaptureFailed }
    ));
    assert_eq!(ctx.engine.count_identities().await.unwrap(), 0);
    assert!(matches!(
        ctx.engine.store().get("carol").await,
        Err(StorageError::NotFound(_))
    ));
}

#[test_log::test(tokio::test)]
async fn test_empty_sensor_times_out_enrollment() {
    let ctx = TestContext::new().await;
    ctx.push_samples(4, 1);

    let err = ctx
        .engine
        .register("dana", Some(2), false, &AutoPlacement, &CancelToken::new())
        .await
        .expect_err("Enrollment should time out");

    assert!(matches!(
        err,
        EngineError::AcquisitionFailed { reason: AcquisitionFailure::Timeout }
    ));
    assert_eq!(ctx.engine.count_identities().await.unwrap(), 0);
}

#[test_log::test(tokio::test)]
async fn test_duplicate_and_overwrite() {
    let ctx = TestContext::new().await;
    ctx.push_samples(1, 3);
    let original = ctx
        .engine
        .register("alice", None, false, &AutoPlacement, &CancelToken::new())
        .await
        .expect("Failed to enroll alice");

    let err = ctx
        .engine
        .register("alice", None, false, &AutoPlacement, &CancelToken::new())
        .await
        .expect_err("Duplicate should be rejected");
    assert!(matches!(err, EngineError::DuplicateIdentity(_)));

    let replacement = ctx.push_samples(6, 3);
    let receipt = ctx
        .engine
        .register("alice", None, true, &AutoPlacement, &CancelToken::new())
        .await
        .expect("Overwrite should succeed");

    assert_ne!(receipt.identity.id, original.identity.id);
    let bytes: Vec<Vec<u8>> = ctx
        .engine
        .store()
        .get("alice")
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.data)
        .collect();
    assert_eq!(bytes, replacement);
    assert_eq!(ctx.engine.count_identities().await.unwrap(), 1);
}

#[test_log::test(tokio::test)]
async fn test_configured_sample_count_is_used_by_default() {
    let ctx = TestContext::new().await;
    ctx.engine.set_sample_count(2).expect("Sample count in range");
    assert!(ctx.engine.set_sample_count(0).is_err());
    ctx.push_samples(8, 2);

    let receipt = ctx
        .engine
        .register("erin", None, false, &AutoPlacement, &CancelToken::new())
        .await
        .expect("Failed to enroll");

    assert_eq!(receipt.samples, 2);
    assert_eq!(ctx.device.pending_script(), 0);
}
