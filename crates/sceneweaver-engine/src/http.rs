use std::error::Error as _;

use anyhow::Context;
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response as HttpResponse};
use reqwest::Method;
use sceneweaver_contracts::errors::{truncate_text, ApiError};
use sceneweaver_contracts::images::{ImageId, ImageRecord, Resolution};
use sceneweaver_contracts::storyboards::{validate_storyboard_name, StoryboardSummary};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::backend::{RegenerateRequest, StoryboardBackend, StoryboardCatalog};
use crate::config::ClientConfig;

/// JSON-over-HTTP backend with bearer-token auth.
pub struct HttpBackend {
    api_base: String,
    token: Option<String>,
    http: HttpClient,
}

impl HttpBackend {
    pub fn new(config: &ClientConfig) -> anyhow::Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed building HTTP client")?;
        Ok(Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            http,
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, format!("{}{}", self.api_base, path));
        match self.token.as_deref() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn send(&self, label: &str, builder: RequestBuilder) -> Result<HttpResponse, ApiError> {
        let response = builder
            .send()
            .map_err(|err| transport_error(&format!("{label} request failed"), &err))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(ApiError::from_response(status.as_u16(), &body))
    }

    fn send_json<T: DeserializeOwned>(
        &self,
        label: &str,
        builder: RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = self.send(label, builder)?;
        let body = response
            .text()
            .map_err(|err| transport_error(&format!("{label} response body read failed"), &err))?;
        serde_json::from_str(&body).map_err(|err| {
            ApiError::transport(format!(
                "{label} returned an unreadable payload ({err}): {}",
                truncate_text(&body, 200)
            ))
        })
    }
}

impl StoryboardBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    fn list_images(&self, storyboard_id: i64) -> Result<Vec<ImageRecord>, ApiError> {
        self.send_json(
            "Image list",
            self.request(Method::GET, &format!("/storyboards/{storyboard_id}/images")),
        )
    }

    fn generate(
        &self,
        storyboard_id: i64,
        story: &str,
        resolution: Resolution,
    ) -> Result<(), ApiError> {
        let builder = self
            .request(
                Method::POST,
                &format!("/storyboards/{storyboard_id}/generate"),
            )
            .json(&json!({
                "story": story,
                "resolution": resolution,
            }));
        self.send("Generate", builder).map(|_| ())
    }

    fn update_caption(&self, image_id: ImageId, caption: &str) -> Result<ImageRecord, ApiError> {
        let builder = self
            .request(Method::PATCH, &format!("/images/{image_id}/caption"))
            .json(&json!({ "caption": caption }));
        self.send_json("Caption update", builder)
    }

    fn regenerate(
        &self,
        image_id: ImageId,
        request: &RegenerateRequest,
    ) -> Result<ImageRecord, ApiError> {
        let mut form = MultipartForm::new()
            .text("prompt", request.prompt.clone())
            .text("resolution", request.resolution.as_str().to_string())
            .text("use_openpose", request.use_openpose.to_string());
        if let Some(seed) = request.seed {
            form = form.text("seed", seed.to_string());
        }
        if let Some(pose) = request.pose_image.as_ref() {
            let part = MultipartPart::bytes(pose.bytes.clone())
                .file_name(pose.file_name.clone())
                .mime_str(&pose.mime_type)
                .map_err(|err| {
                    ApiError::validation(format!(
                        "Pose image type '{}' is not usable: {err}",
                        pose.mime_type
                    ))
                })?;
            form = form.part("pose_image", part);
        }
        let builder = self
            .request(Method::POST, &format!("/images/{image_id}/regenerate"))
            .multipart(form);
        self.send_json("Regenerate", builder)
    }

    fn delete_image(&self, image_id: ImageId) -> Result<(), ApiError> {
        self.send(
            "Delete",
            self.request(Method::DELETE, &format!("/images/{image_id}")),
        )
        .map(|_| ())
    }
}

impl StoryboardCatalog for HttpBackend {
    fn list_storyboards(&self) -> Result<Vec<StoryboardSummary>, ApiError> {
        self.send_json("Storyboard list", self.request(Method::GET, "/home"))
    }

    fn create_storyboard(&self, name: &str) -> Result<StoryboardSummary, ApiError> {
        let name = validate_storyboard_name(name)?;
        let builder = self
            .request(Method::POST, "/home/")
            .json(&json!({ "name": name }));
        self.send_json("Storyboard create", builder)
    }

    fn rename_storyboard(&self, id: i64, name: &str) -> Result<StoryboardSummary, ApiError> {
        let name = validate_storyboard_name(name)?;
        let builder = self
            .request(Method::PATCH, &format!("/home/{id}"))
            .json(&json!({ "name": name }));
        self.send_json("Storyboard rename", builder)
    }

    fn delete_storyboard(&self, id: i64) -> Result<(), ApiError> {
        self.send(
            "Storyboard delete",
            self.request(Method::DELETE, &format!("/home/{id}")),
        )
        .map(|_| ())
    }
}

fn transport_error(context: &str, err: &reqwest::Error) -> ApiError {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if parts.last().map(|last| last != &text).unwrap_or(true) {
            parts.push(text);
        }
        source = cause.source();
    }
    let detail = if err.is_timeout() {
        format!("timed out: {}", parts.join(" | caused by: "))
    } else {
        parts.join(" | caused by: ")
    };
    ApiError::transport(truncate_text(&format!("{context}: {detail}"), 512))
}
