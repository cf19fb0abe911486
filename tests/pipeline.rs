//! Organize, train, reload and evaluate on a tiny synthetic collection

use std::path::Path;

use image::{ImageBuffer, Rgb};
use pneumonia_cnn::backend::{DefaultBackend, TrainingBackend};
use pneumonia_cnn::dataset::{check_structure, organize, ClassLabel, Split};
use pneumonia_cnn::inference::Predictor;
use pneumonia_cnn::model::artifact::ArtifactMetadata;
use pneumonia_cnn::training::{run_training, TrainingConfig, TrainingHistory};
use tempfile::tempdir;

fn write_xrays(dir: &Path, prefix: &str, count: usize, shade: u8) {
    std::fs::create_dir_all(dir).unwrap();
    for i in 0..count {
        let img = ImageBuffer::from_fn(40, 32, |x, y| {
            Rgb([shade, shade.wrapping_add((x % 16) as u8), (y * 3 % 256) as u8])
        });
        img.save(dir.join(format!("{}_{:03}.jpeg", prefix, i))).unwrap();
    }
}

#[test]
fn organize_train_and_predict() {
    let dir = tempdir().unwrap();
    let raw = dir.path().join("raw");
    write_xrays(&raw.join("NORMAL"), "normal", 6, 20);
    write_xrays(&raw.join("PNEUMONIA"), "virus", 10, 220);

    let data = dir.path().join("data");
    let report = organize(&raw, &data, 0.6, 42).unwrap();
    assert_eq!(report.total_copied(), 16);
    assert_eq!(report.copied(ClassLabel::Normal, Split::Train), 3);
    assert_eq!(report.copied(ClassLabel::Pneumonia, Split::Train), 6);
    assert!(check_structure(&data).is_usable());

    let output = dir.path().join("models/pneumonia_model");
    let config = TrainingConfig {
        data_dir: data.clone(),
        output: output.clone(),
        epochs: 2,
        batch_size: 2,
        image_size: 96,
        ..Default::default()
    };

    let outcome = run_training::<TrainingBackend>(&config, Default::default()).unwrap();
    assert_eq!(outcome.history.epochs_run(), 2);
    assert!(outcome.layout.is_pre_split());

    let weights = outcome.class_weights.expect("both classes present");
    assert!((weights.to_vec()[0] - 2.0).abs() < 1e-6);
    assert!((weights.to_vec()[1] - 1.0).abs() < 1e-6);

    let history = TrainingHistory::load(&config.history_path()).unwrap();
    assert_eq!(history.epochs.len(), 2);
    let metadata = ArtifactMetadata::load(&config.sidecar_path()).unwrap();
    assert_eq!(metadata.class_names, vec!["NORMAL", "PNEUMONIA"]);

    let predictor = Predictor::<DefaultBackend>::load(&output, Default::default()).unwrap();
    assert_eq!(predictor.image_size(), 96);

    let sample = data.join("test/PNEUMONIA");
    let first = std::fs::read_dir(&sample).unwrap().next().unwrap().unwrap().path();
    let prediction = predictor.predict_image(&first).unwrap();
    assert!((0.0..=1.0).contains(&prediction.probability));

    let evaluation = predictor.evaluate(&data.join("test"), 4).unwrap();
    assert_eq!(evaluation.confusion.total(), 4);
    assert_eq!(evaluation.skipped, 0);
}
