// tests/integration/engine_tests.rs
use std::sync::Arc;
use std::time::Duration;

use fingerprint_auth::{
    core::{AcquisitionParams, AutoPlacement, CancelToken},
    device::{ParamCode, SimulatedDevice},
    storage::StorageError,
    utils::error::{AcquisitionFailure, EngineError},
    FingerprintEngine,
};

use crate::common::{test_config, TestContext};

#[test_log::test(tokio::test)]
async fn test_delete_removes_identity_and_templates() {
    let ctx = TestContext::new().await;
    ctx.push_samples(1, 3);
    ctx.engine
        .register("alice", None, false, &AutoPlacement, &CancelToken::new())
        .await
        .expect("Failed to enroll alice");

    let removed = ctx.engine.delete_identity("alice").await.expect("Failed to delete");
    assert_eq!(removed.name, "alice");

    assert!(matches!(
        ctx.engine.store().get("alice").await,
        Err(StorageError::NotFound(_))
    ));
    assert!(matches!(
        ctx.engine.verify_template("alice", &SimulatedDevice::template(1, 1, 512)).await,
        Err(EngineError::UnknownIdentity(_))
    ));
    assert!(matches!(
        ctx.engine.delete_identity("alice").await,
        Err(EngineError::NotFound(_))
    ));
    assert_eq!(ctx.engine.count_identities().await.unwrap(), 0);
}

#[test_log::test(tokio::test)]
async fn test_threshold_updates_are_validated_and_pushed_to_device() {
    let ctx = TestContext::new().await;

    ctx.engine.set_threshold(72).expect("Threshold in range");
    assert_eq!(ctx.engine.settings().threshold().value(), 72);
    assert_eq!(ctx.device.parameter(ParamCode::VERIFY_THRESHOLD), Some(72));

    for bad in [-1, 101, 1000] {
        assert!(matches!(
            ctx.engine.set_threshold(bad),
            Err(EngineError::InvalidThreshold(v)) if v == bad
        ));
    }
    assert_eq!(ctx.engine.settings().threshold().value(), 72);
    assert_eq!(ctx.device.parameter(ParamCode::VERIFY_THRESHOLD), Some(72));
}

#[test_log::test(tokio::test)]
async fn test_acquisition_parameters_apply_to_later_captures() {
    let ctx = TestContext::new().await;
    let params = AcquisitionParams::from_millis(1, 0, 0, 2, 1_000).unwrap();
    ctx.engine.set_acquisition_parameters(params).expect("Valid parameters");

    let err = ctx
        .engine
        .acquire(&CancelToken::new())
        .await
        .expect_err("Empty sensor should time out");
    assert!(matches!(
        err,
        EngineError::AcquisitionFailed { reason: AcquisitionFailure::Timeout }
    ));
    assert_eq!(ctx.device.acquire_calls(), 2);

    assert!(AcquisitionParams::from_millis(1, -1, 0, 2, 1_000).is_err());
}

#[test_log::test(tokio::test)]
async fn test_cancelled_acquire_leaves_device_usable() {
    let ctx = Arc::new(TestContext::new().await);
    let params = AcquisitionParams::from_millis(3, 5, 5, 10_000, 60_000).unwrap();
    ctx.engine.set_acquisition_parameters(params).unwrap();

    let cancel = CancelToken::new();
    let task = {
        let ctx = ctx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { ctx.engine.acquire(&cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    cancel.cancel();

    let err = task.await.unwrap().expect_err("Capture should be cancelled");
    assert!(matches!(
        err,
        EngineError::AcquisitionFailed { reason: AcquisitionFailure::Cancelled }
    ));
    assert!(ctx.device.abort_calls() >= 1);

    ctx.device.push_capture(vec![0xAB; 256]);
    let capture = ctx.engine.acquire(&CancelToken::new()).await.expect("Capture failed");
    assert_eq!(capture.template, vec![0xAB; 256]);
}

#[test_log::test(tokio::test)]
async fn test_settings_calls_do_not_wait_for_a_running_capture() {
    let ctx = Arc::new(TestContext::new().await);
    let params = AcquisitionParams::from_millis(3, 5, 5, 10_000, 60_000).unwrap();
    ctx.engine.set_acquisition_parameters(params).unwrap();

    let cancel = CancelToken::new();
    let task = {
        let ctx = ctx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { ctx.engine.acquire(&cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    ctx.engine.set_threshold(85).expect("Threshold in range");
    let info = tokio::time::timeout(Duration::from_millis(500), ctx.engine.info())
        .await
        .expect("info should not wait for the capture")
        .expect("Failed to read info");
    assert_eq!(info.threshold, 85);
    assert_eq!(info.image_width, 300);
    assert!(!task.is_finished());

    cancel.cancel();
    task.await.unwrap().expect_err("Capture should be cancelled");
    assert_eq!(ctx.device.parameter(ParamCode::VERIFY_THRESHOLD), Some(85));
}

#[test_log::test(tokio::test)]
async fn test_info_reports_device_and_store() {
    let ctx = TestContext::new().await;
    ctx.push_samples(1, 3);
    ctx.engine
        .register("alice", None, false, &AutoPlacement, &CancelToken::new())
        .await
        .unwrap();

    let info = ctx.engine.info().await.expect("Failed to read info");
    assert_eq!(info.device_count, 1);
    assert_eq!(info.image_width, 300);
    assert_eq!(info.image_height, 400);
    assert_eq!(info.image_dpi, Some(500));
    assert_eq!(info.identity_count, 1);
    assert_eq!(info.threshold, 60);
    assert_eq!(info.sample_count, 3);
    assert!(info.store_path.ends_with("fingerprints.db"));
}

#[test_log::test(tokio::test)]
async fn test_engine_fails_without_device() {
    let dir = tempfile::tempdir().unwrap();
    let device = Arc::new(SimulatedDevice::with_device_count(0));

    let result = FingerprintEngine::new(test_config(&dir), device).await;
    assert!(matches!(result, Err(EngineError::Device(_))));
}

#[test_log::test(tokio::test)]
async fn test_shutdown_is_idempotent_and_closes_device() {
    let ctx = TestContext::new().await;
    ctx.engine.shutdown().await.expect("First shutdown");
    ctx.engine.shutdown().await.expect("Second shutdown");
    assert!(!ctx.device.is_open());

    let err = ctx
        .engine
        .acquire(&CancelToken::new())
        .await
        .expect_err("Closed device cannot capture");
    assert!(matches!(
        err,
        EngineError::AcquisitionFailed { reason: AcquisitionFailure::NoDevice }
    ));
}

#[test_log::test(tokio::test)]
async fn test_enrollments_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let captured = {
        let device = Arc::new(SimulatedDevice::new());
        let engine = FingerprintEngine::new(test_config(&dir), device.clone())
            .await
            .expect("Failed to open engine");
        let template = SimulatedDevice::template(1, 1, 2048);
        device.push_capture(template.clone());
        engine
            .register("alice", Some(1), false, &AutoPlacement, &CancelToken::new())
            .await
            .expect("Failed to enroll");
        engine.shutdown().await.unwrap();
        template
    };

    let device = Arc::new(SimulatedDevice::new());
    let engine = FingerprintEngine::new(test_config(&dir), device)
        .await
        .expect("Failed to reopen engine");
    let stored = engine.store().get("alice").await.expect("alice should persist");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].data, captured);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_matching_runs_alongside_writes() {
    let ctx = Arc::new(TestContext::new().await);
    ctx.push_samples(1, 3);
    ctx.engine
        .register("alice", None, false, &AutoPlacement, &CancelToken::new())
        .await
        .unwrap();
    let probe = SimulatedDevice::template(1, 99, 640);

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let ctx = ctx.clone();
            let probe = probe.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    let result = ctx.engine.identify_template(&probe).await.expect("identify");
                    if let Some(identity) = result.identity {
                        assert_eq!(identity.name, "alice");
                        assert_eq!(result.score, 80);
                    } else {
                        assert!(!result.matched);
                    }
                }
            })
        })
        .collect();

    let writer = {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            ctx.engine.delete_identity("alice").await.expect("delete");
        })
    };

    for reader in readers {
        reader.await.unwrap();
    }
    writer.await.unwrap();
    assert_eq!(ctx.engine.count_identities().await.unwrap(), 0);
}
