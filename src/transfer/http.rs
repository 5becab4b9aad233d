use std::{path::Path, sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use log::warn;
use reqwest::{
    multipart::{Form, Part},
    Client,
};

use crate::{db::ImageRecord, pictures::PictureStore, session::AuthState};

use super::{TransferError, TransferResponse, Uploader};

const PICTURE_FIELD: &str = "picture";

/// Multipart POST to `<server><endpoint>` authenticated with the stored
/// session token.
pub struct HttpUploader {
    client: Client,
    auth: Arc<dyn AuthState>,
    pictures: Arc<dyn PictureStore>,
    endpoint: String,
}

impl HttpUploader {
    pub fn new(
        auth: Arc<dyn AuthState>,
        pictures: Arc<dyn PictureStore>,
        endpoint: impl Into<String>,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build upload client")?;

        Ok(Self {
            client,
            auth,
            pictures,
            endpoint: endpoint.into(),
        })
    }

    fn upload_url(&self, server: &str) -> String {
        format!("{}{}", server.trim_end_matches('/'), self.endpoint)
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, record: &ImageRecord) -> Result<TransferResponse, TransferError> {
        let server = self
            .auth
            .server_url()
            .ok_or(TransferError::NotConfigured("server url"))?;
        let token = self
            .auth
            .session_token()
            .ok_or(TransferError::NotConfigured("session token"))?;

        let bytes = self.pictures.read_bytes(&record.name).await?;
        let part = Part::bytes(bytes)
            .file_name(record.name.clone())
            .mime_str(mime_for(&record.name))?;
        let form = Form::new().part(PICTURE_FIELD, part);

        let response = self
            .client
            .post(self.upload_url(&server))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?;

        let status = response.status().as_u16();
        // The status alone decides the outcome.
        let body = response.text().await.unwrap_or_else(|err| {
            warn!(
                "Upload of {} got status {} but the body could not be read: {}",
                record.name, status, err
            );
            String::new()
        });
        Ok(TransferResponse { status, body })
    }
}

fn mime_for(name: &str) -> &'static str {
    let is_png = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("png"))
        .unwrap_or(false);
    if is_png {
        "image/png"
    } else {
        "image/jpeg"
    }
}
