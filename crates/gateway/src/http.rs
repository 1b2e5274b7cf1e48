//! [`Gateway`] over the gateway's HTTP API.

use std::time::Duration;

use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::Response;
use serde::Deserialize;
use tracing::{debug, instrument};

use dpip_core::{ImageId, ImageKind, Workload, WorkloadId};

use crate::error::GatewayError;
use crate::traits::{FetchedImage, Gateway};

/// Header naming the workload an image belongs to.
pub const WORKLOAD_ID_HEADER: &str = "x-workload-id";
/// Header carrying `original` or `filtered`.
pub const IMAGE_KIND_HEADER: &str = "x-image-kind";

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    message: String,
    #[serde(default)]
    token: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    message: String,
    #[serde(alias = "id")]
    image_id: ImageId,
}

/// Shared HTTP client bound to one gateway base URL.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    base_url: String,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

/// Turn a non-2xx response into [`GatewayError::Status`].
async fn check_status(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::Status {
        status: status.as_u16(),
        body,
    })
}

fn header<'a>(response: &'a Response, name: &str) -> Result<&'a str, GatewayError> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| GatewayError::Decode(format!("missing {name} header")))
}

#[async_trait::async_trait]
impl Gateway for HttpGateway {
    #[instrument(skip(self, secret), fields(base_url = %self.base_url))]
    async fn issue_credential(&self, username: &str, secret: &str) -> Result<String, GatewayError> {
        let response = self
            .client
            .post(self.url("/login"))
            .basic_auth(username, Some(secret))
            .send()
            .await?;
        let body: LoginResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::Decode(format!("login response: {e}")))?;
        if body.token.is_empty() {
            return Err(GatewayError::Decode(format!(
                "login response carried no token ({})",
                body.message
            )));
        }
        debug!(username, "credential issued");
        Ok(body.token)
    }

    #[instrument(skip(self, token), fields(base_url = %self.base_url))]
    async fn fetch_image(&self, image_id: ImageId, token: &str) -> Result<FetchedImage, GatewayError> {
        let response = self
            .client
            .get(self.url(&format!("/images/{image_id}")))
            .bearer_auth(token)
            .send()
            .await?;
        let response = check_status(response).await?;

        let workload_id = header(&response, WORKLOAD_ID_HEADER)?
            .parse::<WorkloadId>()
            .map_err(|e| GatewayError::Decode(format!("{WORKLOAD_ID_HEADER}: {e}")))?;
        let kind = header(&response, IMAGE_KIND_HEADER)?
            .parse::<ImageKind>()
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        let bytes = response.bytes().await?;
        debug!(image_id, workload_id, size = bytes.len(), "image fetched");

        Ok(FetchedImage {
            bytes,
            kind,
            workload_id,
        })
    }

    #[instrument(skip(self, bytes, token), fields(base_url = %self.base_url, size = bytes.len()))]
    async fn upload_image(
        &self,
        workload_id: WorkloadId,
        kind: ImageKind,
        bytes: Bytes,
        token: &str,
    ) -> Result<ImageId, GatewayError> {
        let part = Part::bytes(bytes.to_vec())
            .file_name("image.png")
            .mime_str("image/png")?;
        let form = Form::new()
            .part("data", part)
            .text("workload_id", workload_id.to_string())
            .text("type", kind.as_str());

        let response = self
            .client
            .post(self.url("/images"))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?;
        let body: UploadResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::Decode(format!("upload response: {e}")))?;
        debug!(workload_id, image_id = body.image_id, message = %body.message, "image uploaded");
        Ok(body.image_id)
    }

    #[instrument(skip(self, token), fields(base_url = %self.base_url))]
    async fn get_workload(&self, workload_id: WorkloadId, token: &str) -> Result<Workload, GatewayError> {
        let response = self
            .client
            .get(self.url(&format!("/workloads/{workload_id}")))
            .bearer_auth(token)
            .send()
            .await?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(format!("workload response: {e}")))
    }
}
