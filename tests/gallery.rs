mod common;

use std::io::Cursor;

use bytes::Bytes;
use image::{ImageFormat, Rgb, RgbImage};
use nutrivision::engine::SyntheticEngine;
use nutrivision::error::{EngineError, InvalidImageError};
use nutrivision::pipeline::SessionOptions;
use nutrivision::{Detector, Error, Labels, PipelineSettings};

use common::*;

fn detector() -> Detector {
    Detector::new(PipelineSettings::default(), SessionOptions::default()).unwrap()
}

async fn ready_detector() -> Detector {
    let detector = detector();
    detector
        .initialize(Bytes::from_static(b"weights"), labels(), |_| {
            Ok(SyntheticEngine::new(640, 2, 16).with_box(centered_box(0, 0.8)))
        })
        .await
        .unwrap();
    detector
}

fn hd_image() -> RgbImage {
    RgbImage::from_pixel(1280, 720, Rgb([200, 120, 40]))
}

#[tokio::test]
async fn detection_before_initialize_is_rejected() {
    let detector = detector();
    let err = detector.detect_from_image(hd_image()).await.unwrap_err();
    assert!(matches!(err, Error::Engine(EngineError::NotReady)));
    assert!(matches!(
        detector.start_live_detection(eager(1), |_: nutrivision::DetectionBatch| {}),
        Err(Error::Engine(EngineError::NotReady))
    ));
    assert!(matches!(
        detector.dispose(),
        Err(Error::Engine(EngineError::NotReady))
    ));
}

#[tokio::test]
async fn boxes_come_back_in_original_coordinates() {
    let detector = ready_detector().await;
    let detections = detector.detect_from_image(hd_image()).await.unwrap();

    assert_eq!(detections.len(), 1);
    let d = &detections[0];
    assert_eq!(&*d.label, "apple");
    assert_eq!(d.confidence, 0.8);
    // model box 256..384 on both axes; scale 0.5, pad_top 140
    assert_eq!([d.x1, d.y1, d.x2, d.y2], [512.0, 232.0, 768.0, 488.0]);
}

#[tokio::test]
async fn encoded_images_decode_before_detection() {
    let detector = ready_detector().await;

    let mut png = Vec::new();
    hd_image()
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .unwrap();
    let detections = detector.detect_from_encoded(Bytes::from(png)).await.unwrap();
    assert_eq!(detections.len(), 1);

    let err = detector
        .detect_from_encoded(Bytes::from_static(b"not a jpeg"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Image(InvalidImageError::Decode(_))));
}

#[tokio::test]
async fn images_load_from_disk() {
    let detector = ready_detector().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plate.png");
    hd_image().save(&path).unwrap();

    let detections = detector.detect_from_path(&path).await.unwrap();
    assert_eq!(detections.len(), 1);

    let missing = detector.detect_from_path(dir.path().join("missing.png")).await;
    assert!(matches!(missing, Err(Error::Image(_))));
}

#[tokio::test]
async fn zero_area_images_are_invalid() {
    let detector = ready_detector().await;
    let err = detector
        .detect_from_image(RgbImage::new(0, 0))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Image(InvalidImageError::ZeroArea { .. })
    ));
}

#[tokio::test]
async fn threshold_updates_apply_to_later_calls() {
    let detector = ready_detector().await;
    assert_eq!(detector.detect_from_image(hd_image()).await.unwrap().len(), 1);

    let strict = PipelineSettings {
        confidence_threshold: 0.9,
        ..PipelineSettings::default()
    };
    detector.update_settings(strict).unwrap();
    assert!(detector.detect_from_image(hd_image()).await.unwrap().is_empty());

    let bad = PipelineSettings {
        iou_threshold: 1.5,
        ..PipelineSettings::default()
    };
    assert!(matches!(detector.update_settings(bad), Err(Error::Settings(_))));
    assert_eq!(detector.settings().confidence_threshold, 0.9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn gallery_calls_wait_for_a_running_live_frame() {
    let detector = detector();
    let (engine, gate) = gated_engine();
    detector
        .initialize(Bytes::new(), labels(), move |_| Ok(engine))
        .await
        .unwrap();
    let (tx, rx) = flume::unbounded();
    let session = detector
        .start_live_detection(eager(1), nutrivision::pipeline::channel_sink(tx))
        .unwrap();

    session.push_frame(nutrivision::capture::synthetic::render_frame(64, 48, 1));
    assert_eq!(gate.wait_entered(), 1);

    let still = tokio::spawn(async move { detector.detect_from_image(hd_image()).await });
    assert!(gate
        .entered
        .recv_timeout(std::time::Duration::from_millis(200))
        .is_err());

    gate.open_once();
    assert_eq!(rx.recv_async().await.unwrap().frame_sequence, 1);
    assert_eq!(gate.wait_entered(), 2);
    gate.open_once();
    assert_eq!(still.await.unwrap().unwrap().len(), 1);
    session.stop().unwrap();
}

#[tokio::test]
async fn double_initialize_is_rejected() {
    let detector = ready_detector().await;
    let err = detector
        .initialize(Bytes::new(), labels(), |_| Ok(scripted_engine()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Engine(EngineError::AlreadyInitialized)));
    assert!(detector.is_ready());
}

#[tokio::test]
async fn label_mismatch_fails_fast_and_leaves_detector_usable() {
    let detector = detector();
    let err = detector
        .initialize(Bytes::new(), Labels::new(["only-one"]), |_| {
            Ok(scripted_engine())
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Engine(EngineError::ShapeMismatch {
            model_classes: 2,
            labels: 1
        })
    ));
    assert!(!detector.is_ready());

    detector
        .initialize(Bytes::new(), labels(), |_| Ok(scripted_engine()))
        .await
        .unwrap();
    assert!(detector.is_ready());
}

#[tokio::test]
async fn loader_errors_propagate() {
    let detector = detector();
    let err = detector
        .initialize(Bytes::new(), labels(), |_| {
            Err::<SyntheticEngine, _>(EngineError::Backend("corrupt model".into()))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Engine(EngineError::Backend(_))));
}

#[tokio::test]
async fn disposed_detector_rejects_everything() {
    let detector = ready_detector().await;
    detector.dispose().unwrap();

    assert!(matches!(
        detector.detect_from_image(hd_image()).await,
        Err(Error::Engine(EngineError::Disposed))
    ));
    assert!(matches!(
        detector.dispose(),
        Err(Error::Engine(EngineError::Disposed))
    ));
    assert!(matches!(
        detector
            .initialize(Bytes::new(), labels(), |_| Ok(scripted_engine()))
            .await,
        Err(Error::Engine(EngineError::Disposed))
    ));
}

#[tokio::test]
async fn live_sessions_outliving_the_engine_report_failures() {
    let detector = ready_detector().await;
    let (tx, rx) = flume::unbounded();
    let session = detector
        .start_live_detection(eager(1), nutrivision::pipeline::channel_sink(tx))
        .unwrap();
    detector.dispose().unwrap();

    let frame = nutrivision::capture::synthetic::render_frame(32, 32, 1);
    session.push_frame(frame);
    let batch = rx.recv_async().await.unwrap();
    assert!(batch.failed);
    session.stop().unwrap();
}
