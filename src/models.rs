//! Model asset manifest and the all-or-nothing startup load.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::error::{Error, Result};

/// Default SeetaFace frontal detector weights.
pub const DEFAULT_DETECTOR_MODEL: &str = "seeta_fd_frontal_v1.0.bin";

/// Default dlib 68-point landmark model, as published in dlib-models.
pub const DEFAULT_LANDMARK_MODEL: &str = "shape_predictor_68_face_landmarks.dat.bz2";

/// A single model file to be loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelAsset {
    pub name: String,
    pub path: PathBuf,
}

/// The set of model files that must all load before the monitor is ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelManifest {
    /// Directory holding the model files.
    pub root: PathBuf,
    /// File names relative to `root`.
    pub files: Vec<String>,
}

impl ModelManifest {
    pub fn new<P: Into<PathBuf>>(root: P, files: Vec<String>) -> Self {
        Self {
            root: root.into(),
            files,
        }
    }

    pub fn assets(&self) -> Vec<ModelAsset> {
        self.files
            .iter()
            .map(|name| ModelAsset {
                name: name.clone(),
                path: self.root.join(name),
            })
            .collect()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self::new(
            "models",
            vec![
                DEFAULT_DETECTOR_MODEL.to_string(),
                DEFAULT_LANDMARK_MODEL.to_string(),
            ],
        )
    }
}

/// Loads model assets into whatever detector consumes them.
///
/// Each call is independent; loads run concurrently on the blocking pool.
pub trait ModelLoader: Send + Sync + 'static {
    fn load(&self, asset: &ModelAsset) -> Result<()>;
}

/// Load every asset in the manifest concurrently.
///
/// Succeeds only when all loads succeed. The first failure aborts the loads
/// that have not started yet and is returned as-is.
pub async fn load_all(loader: Arc<dyn ModelLoader>, manifest: &ModelManifest) -> Result<usize> {
    let mut tasks = JoinSet::new();
    for asset in manifest.assets() {
        let loader = Arc::clone(&loader);
        tasks.spawn_blocking(move || loader.load(&asset).map(|()| asset.name));
    }

    let mut loaded = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(name)) => {
                log::info!("Loaded model asset {}", name);
                loaded += 1;
            }
            Ok(Err(e)) => {
                tasks.abort_all();
                return Err(e);
            }
            Err(e) => {
                tasks.abort_all();
                return Err(Error::model_load("<loader task>", e.to_string()));
            }
        }
    }
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingLoader {
        seen: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    impl ModelLoader for RecordingLoader {
        fn load(&self, asset: &ModelAsset) -> Result<()> {
            self.seen.lock().push(asset.name.clone());
            if self.fail_on == Some(asset.name.as_str()) {
                return Err(Error::model_load(&asset.name, "corrupt weights"));
            }
            Ok(())
        }
    }

    fn manifest() -> ModelManifest {
        ModelManifest::new(
            "/models",
            vec!["detector.bin".into(), "landmarks.bin".into(), "expressions.bin".into()],
        )
    }

    #[test]
    fn assets_resolve_against_root() {
        let assets = manifest().assets();
        assert_eq!(assets.len(), 3);
        assert_eq!(assets[1].path, PathBuf::from("/models/landmarks.bin"));
    }

    #[test]
    fn default_manifest_has_detector_and_landmarks() {
        let assets = ModelManifest::default().assets();
        let names: Vec<_> = assets.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec![DEFAULT_DETECTOR_MODEL, DEFAULT_LANDMARK_MODEL]);
        assert_eq!(
            assets[1].path,
            PathBuf::from("models/shape_predictor_68_face_landmarks.dat.bz2")
        );
    }

    #[tokio::test]
    async fn loads_every_asset() {
        let loader = Arc::new(RecordingLoader {
            seen: Mutex::new(Vec::new()),
            fail_on: None,
        });
        let n = load_all(loader.clone(), &manifest()).await.unwrap();
        assert_eq!(n, 3);
        let mut seen = loader.seen.lock().clone();
        seen.sort();
        assert_eq!(seen, vec!["detector.bin", "expressions.bin", "landmarks.bin"]);
    }

    #[tokio::test]
    async fn one_failure_fails_the_join() {
        let loader = Arc::new(RecordingLoader {
            seen: Mutex::new(Vec::new()),
            fail_on: Some("landmarks.bin"),
        });
        let err = load_all(loader, &manifest()).await.unwrap_err();
        assert!(matches!(err, Error::ModelLoad { ref asset, .. } if asset == "landmarks.bin"));
    }

    #[tokio::test]
    async fn empty_manifest_is_ready_immediately() {
        let loader = Arc::new(RecordingLoader {
            seen: Mutex::new(Vec::new()),
            fail_on: None,
        });
        let n = load_all(loader, &ModelManifest::new("/models", vec![]))
            .await
            .unwrap();
        assert_eq!(n, 0);
    }
}
