//! One upload attempt against the remote endpoint.
//!
//! The client reports the HTTP status it got back and leaves the meaning of
//! that status to the dispatcher. It never retries.

mod http;

pub use http::HttpUploader;

use async_trait::async_trait;
use thiserror::Error;

use crate::{db::ImageRecord, pictures::PictureError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResponse {
    pub status: u16,
    pub body: String,
}

impl TransferResponse {
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_str(&self.body).ok()
    }
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("upload is not configured: missing {0}")]
    NotConfigured(&'static str),
    #[error(transparent)]
    Picture(#[from] PictureError),
    #[error("upload request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, record: &ImageRecord) -> Result<TransferResponse, TransferError>;
}
