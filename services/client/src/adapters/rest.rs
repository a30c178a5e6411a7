//! services/client/src/adapters/rest.rs
//!
//! This module contains the HTTP adapter for the REST fallback surface.
//! It implements the `ThreadApiService` port from the `core` crate on top of
//! reqwest.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tutor_chat_core::domain::{OcrExtraction, OcrMethod, Thread, ThreadSummary};
use tutor_chat_core::ports::{PortError, PortResult, ThreadApiService};
use uuid::Uuid;

use crate::sync::protocol::WireMessage;

/// Default timeout for the catalogue endpoints.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// Extended timeout for the synchronous OCR extraction call.
const OCR_EXTRACT_TIMEOUT: Duration = Duration::from_secs(180);

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `ThreadApiService` port against the
/// tutoring service's REST API.
#[derive(Clone)]
pub struct RestApiAdapter {
    http: reqwest::Client,
    base_url: String,
}

impl RestApiAdapter {
    /// Creates a new `RestApiAdapter` for the given http(s) base URL.
    pub fn new(base_url: &str) -> PortResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| PortError::Unexpected(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn request_error(e: reqwest::Error) -> PortError {
    if e.is_timeout() {
        PortError::Timeout(e.to_string())
    } else {
        PortError::Transport(e.to_string())
    }
}

fn status_error(status: reqwest::StatusCode, context: &str) -> PortError {
    if status == reqwest::StatusCode::NOT_FOUND {
        PortError::NotFound(context.to_string())
    } else {
        PortError::Unexpected(format!("{}: API error ({})", context, status))
    }
}

//=========================================================================================
// Wire DTOs
//=========================================================================================

#[derive(Deserialize, Debug)]
struct ThreadSummaryDto {
    id: Uuid,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    last_message_preview: Option<String>,
}

impl ThreadSummaryDto {
    fn into_domain(self) -> ThreadSummary {
        ThreadSummary {
            id: self.id,
            title: self.title.unwrap_or_else(|| "Untitled Thread".to_string()),
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_message_preview: self.last_message_preview,
        }
    }
}

#[derive(Deserialize, Debug)]
struct ThreadDto {
    id: Uuid,
    #[serde(default)]
    title: Option<String>,
    messages: Vec<WireMessage>,
}

impl ThreadDto {
    fn into_domain(self) -> Thread {
        Thread {
            id: self.id,
            title: self.title.unwrap_or_else(|| "Untitled Thread".to_string()),
            messages: self
                .messages
                .into_iter()
                .map(WireMessage::into_domain)
                .collect(),
        }
    }
}

#[derive(Serialize, Debug)]
struct OcrExtractRequest<'a> {
    image_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<&'a str>,
    method: &'a str,
}

#[derive(Deserialize, Debug)]
struct OcrExtractDto {
    success: bool,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    latex: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    method_used: Option<String>,
    #[serde(default)]
    math_detected: bool,
    #[serde(default)]
    error: Option<String>,
}

impl OcrExtractDto {
    fn into_domain(self) -> PortResult<OcrExtraction> {
        if !self.success {
            return Err(PortError::Unexpected(
                self.error
                    .unwrap_or_else(|| "OCR processing failed".to_string()),
            ));
        }
        Ok(OcrExtraction {
            text: self.text.unwrap_or_default(),
            latex: self.latex,
            confidence: self.confidence.unwrap_or(0.0),
            method_used: self.method_used,
            math_detected: self.math_detected,
        })
    }
}

//=========================================================================================
// `ThreadApiService` Trait Implementation
//=========================================================================================

#[async_trait]
impl ThreadApiService for RestApiAdapter {
    async fn list_threads(&self, limit: usize) -> PortResult<Vec<ThreadSummary>> {
        let response = self
            .http
            .get(self.url("/api/threads"))
            .query(&[("limit", limit)])
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, "list threads"));
        }
        let threads: Vec<ThreadSummaryDto> = response
            .json()
            .await
            .map_err(|e| PortError::Unexpected(format!("failed to parse thread list: {}", e)))?;
        Ok(threads.into_iter().map(ThreadSummaryDto::into_domain).collect())
    }

    async fn get_thread(&self, thread_id: Uuid) -> PortResult<Thread> {
        let response = self
            .http
            .get(self.url(&format!("/api/threads/{}", thread_id)))
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, &format!("thread {}", thread_id)));
        }
        let thread: ThreadDto = response
            .json()
            .await
            .map_err(|e| PortError::Unexpected(format!("failed to parse thread: {}", e)))?;
        Ok(thread.into_domain())
    }

    async fn delete_thread(&self, thread_id: Uuid) -> PortResult<()> {
        let response = self
            .http
            .delete(self.url(&format!("/api/threads/{}", thread_id)))
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, &format!("thread {}", thread_id)));
        }
        Ok(())
    }

    async fn extract_text(
        &self,
        image_id: &str,
        subject: Option<&str>,
        method: OcrMethod,
    ) -> PortResult<OcrExtraction> {
        let request = OcrExtractRequest {
            image_id,
            subject,
            method: method.as_str(),
        };
        let response = self
            .http
            .post(self.url("/api/images/ocr/extract"))
            .timeout(OCR_EXTRACT_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status();
        if !status.is_success() && status != reqwest::StatusCode::INTERNAL_SERVER_ERROR {
            return Err(status_error(status, &format!("ocr extract {}", image_id)));
        }
        // The service reports extraction failures as a body with success=false.
        let dto: OcrExtractDto = response
            .json()
            .await
            .map_err(|e| PortError::Unexpected(format!("failed to parse OCR result: {}", e)))?;
        dto.into_domain()
    }
}
