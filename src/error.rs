use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Config parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to load model asset '{asset}': {reason}")]
    ModelLoad { asset: String, reason: String },

    #[error("Invalid model format: {0}")]
    InvalidModel(String),

    #[error("Models are still loading")]
    ModelsNotReady,

    #[error("Camera acquisition failed: {0}")]
    CameraAcquisition(String),

    #[error("Capture stream error: {0}")]
    Stream(String),

    #[error("Detection failed: {0}")]
    Detection(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn model_load<A: Into<String>, R: Into<String>>(asset: A, reason: R) -> Self {
        Self::ModelLoad {
            asset: asset.into(),
            reason: reason.into(),
        }
    }

    pub fn camera<S: Into<String>>(msg: S) -> Self {
        Self::CameraAcquisition(msg.into())
    }

    pub fn detection<S: Into<String>>(msg: S) -> Self {
        Self::Detection(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
