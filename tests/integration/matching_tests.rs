// tests/integration/matching_tests.rs
use std::sync::Arc;
use std::time::Duration;

use fingerprint_auth::{
    core::{AcquisitionParams, AutoPlacement, CancelToken},
    device::SimulatedDevice,
    utils::error::EngineError,
};

use crate::common::TestContext;

async fn enroll(ctx: &TestContext, name: &str, finger: u16) -> Vec<Vec<u8>> {
    let samples = ctx.push_samples(finger, 3);
    ctx.engine
        .register(name, Some(3), false, &AutoPlacement, &CancelToken::new())
        .await
        .expect("Failed to enroll");
    samples
}

#[test_log::test(tokio::test)]
async fn test_verify_alice_accepts_own_finger_and_rejects_others() {
    let ctx = TestContext::with_device(SimulatedDevice::new().with_scores(75, 10)).await;
    enroll(&ctx, "alice", 1).await;

    ctx.device.push_capture(SimulatedDevice::template(1, 4, 700));
    let result = ctx
        .engine
        .verify("alice", &CancelToken::new())
        .await
        .expect("Verification failed");
    assert!(result.matched);
    assert_eq!(result.score, 75);

    ctx.device.push_capture(SimulatedDevice::template(42, 1, 700));
    let result = ctx
        .engine
        .verify("alice", &CancelToken::new())
        .await
        .expect("Verification failed");
    assert!(!result.matched);
    assert_eq!(result.score, 10);
    assert!(result.identity.is_none());
}

#[test_log::test(tokio::test)]
async fn test_verify_unknown_identity_does_not_capture() {
    let ctx = TestContext::new().await;
    ctx.device.push_capture(SimulatedDevice::template(1, 1, 500));

    let err = ctx
        .engine
        .verify("mallory", &CancelToken::new())
        .await
        .expect_err("Unknown identity should fail");

    assert!(matches!(err, EngineError::UnknownIdentity(_)));
    assert_eq!(ctx.device.acquire_calls(), 0);
}

#[test_log::test(tokio::test)]
async fn test_identify_finds_the_right_identity() {
    let ctx = TestContext::new().await;
    enroll(&ctx, "alice", 1).await;
    enroll(&ctx, "bob", 2).await;
    enroll(&ctx, "carol", 3).await;

    ctx.device.push_capture(SimulatedDevice::template(2, 9, 1500));
    let result = ctx
        .engine
        .identify(&CancelToken::new())
        .await
        .expect("Identification failed");

    assert!(result.matched);
    assert_eq!(result.identity.expect("identity").name, "bob");
    assert_eq!(result.score, 80);
}

#[test_log::test(tokio::test)]
async fn test_identify_tie_break_is_deterministic() {
    let ctx = TestContext::new().await;
    let alice = enroll(&ctx, "alice", 1).await;
    let bob = enroll(&ctx, "bob", 2).await;

    let probe = SimulatedDevice::template(77, 1, 800);
    for template in alice.iter().chain(bob.iter()) {
        ctx.device.set_pair_score(&probe, template, 66);
    }

    for _ in 0..10 {
        let result = ctx
            .engine
            .identify_template(&probe)
            .await
            .expect("Identification failed");
        assert_eq!(result.identity.expect("identity").name, "alice");
        assert_eq!(result.score, 66);
    }
}

#[test_log::test(tokio::test)]
async fn test_identify_reports_no_match_below_threshold() {
    let ctx = TestContext::new().await;
    enroll(&ctx, "alice", 1).await;

    let result = ctx
        .engine
        .identify_template(&SimulatedDevice::template(9, 1, 300))
        .await
        .expect("Identification failed");

    assert!(!result.matched);
    assert!(result.identity.is_none());
    assert_eq!(result.score, 10);
}

#[test_log::test(tokio::test)]
async fn test_verify_is_monotonic_across_thresholds() {
    let ctx = TestContext::new().await;
    let stored = enroll(&ctx, "alice", 1).await;
    let probe = SimulatedDevice::template(50, 1, 900);
    ctx.device.set_pair_score(&probe, &stored[0], 40);
    ctx.device.set_pair_score(&probe, &stored[1], 71);
    ctx.device.set_pair_score(&probe, &stored[2], 55);

    let mut last_matched = true;
    for t in 0..=100 {
        ctx.engine.set_threshold(t).expect("Threshold in range");
        let matched = ctx.engine.verify_template("alice", &probe).await.unwrap().matched;
        assert!(!matched || last_matched, "matched at {} after failing below it", t);
        assert_eq!(matched, t <= 71);
        last_matched = matched;
    }
}

#[test_log::test(tokio::test)]
async fn test_threshold_is_fixed_when_verification_starts() {
    let ctx = Arc::new(TestContext::new().await);
    enroll(&ctx, "alice", 1).await;
    let params = AcquisitionParams::from_millis(3, 20, 0, 50, 10_000).unwrap();
    ctx.engine.set_acquisition_parameters(params).unwrap();
    ctx.device.push_no_finger(5);
    ctx.device.push_capture(SimulatedDevice::template(1, 9, 700));

    let task = {
        let ctx = ctx.clone();
        tokio::spawn(async move { ctx.engine.verify("alice", &CancelToken::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    ctx.engine.set_threshold(95).expect("Threshold in range");

    let result = task.await.unwrap().expect("Verification failed");
    assert!(result.matched);
    assert_eq!(result.score, 80);
    assert_eq!(result.threshold, 60);

    let later = ctx
        .engine
        .verify_template("alice", &SimulatedDevice::template(1, 9, 700))
        .await
        .unwrap();
    assert!(!later.matched);
    assert_eq!(later.threshold, 95);
}
