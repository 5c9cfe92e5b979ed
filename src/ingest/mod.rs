//! Context ingestion
//!
//! Normalizes pasted text, uploaded files, and URL fetches into rule
//! context rows. Every successful session-scoped ingest invalidates that
//! session's retrieval index and requests an asynchronous rebuild.
//! Failures are typed and never mutate the store.
//!
//! URL fetches are hardened: http/https only, at most three redirects, a
//! HEAD preflight that rejects oversized or non-text resources before the
//! body is read, a hard streamed byte cap, and bounded connect/read
//! timeouts.

pub mod extract;

pub use extract::{PlainTextExtractor, TextExtractor};

use crate::config::IngestLimits;
use crate::error::{CampfireError, Result};
use crate::index::RetrievalIndex;
use crate::store::{ContextRow, ContextSource, Store};
use futures::StreamExt;
use std::sync::Arc;
use url::Url;

/// MIME types a URL fetch may return
const URL_MIME_ALLOWLIST: &[&str] = &["application/xhtml+xml", "application/json", "application/xml"];

/// Ingests heterogeneous context into rule context rows
pub struct ContextIngestor {
    store: Store,
    index: Arc<RetrievalIndex>,
    extractor: Arc<dyn TextExtractor>,
    client: reqwest::Client,
    limits: IngestLimits,
}

impl ContextIngestor {
    pub fn new(
        store: Store,
        index: Arc<RetrievalIndex>,
        extractor: Arc<dyn TextExtractor>,
        limits: IngestLimits,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(limits.max_redirects))
            .connect_timeout(limits.url_timeout)
            .timeout(limits.url_timeout)
            .build()
            .map_err(|e| CampfireError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            store,
            index,
            extractor,
            client,
            limits,
        })
    }

    /// Store pasted text verbatim (trimmed).
    pub fn add_text(&self, text: &str, session_id: Option<&str>) -> Result<ContextRow> {
        let cleaned = text.trim();
        if cleaned.is_empty() {
            return Err(CampfireError::Validation("text must not be empty".into()).into());
        }
        let row = self
            .store
            .insert_context(ContextSource::Text, cleaned, None, session_id)?;
        self.invalidate(session_id);
        Ok(row)
    }

    /// Validate, extract, and store an uploaded file.
    pub fn add_file(
        &self,
        filename: &str,
        bytes: &[u8],
        session_id: Option<&str>,
    ) -> Result<ContextRow> {
        if bytes.len() as u64 > self.limits.max_upload_bytes {
            return Err(CampfireError::Oversize(format!(
                "file '{}' exceeds {} byte limit",
                filename, self.limits.max_upload_bytes
            ))
            .into());
        }
        let mime = extract::mime_for_extension(filename).ok_or_else(|| {
            CampfireError::UnsupportedMime(format!("extension of '{}' is not allowed", filename))
        })?;
        if !extract::sniff_matches(bytes, mime) {
            return Err(CampfireError::UnsupportedMime(format!(
                "content of '{}' does not match its extension",
                filename
            ))
            .into());
        }

        let text = self.extractor.extract(bytes, mime)?;
        let row = self.store.insert_context(
            ContextSource::File,
            text.trim(),
            Some(filename),
            session_id,
        )?;
        self.invalidate(session_id);
        Ok(row)
    }

    /// Fetch a URL under the safety rules and store its text.
    pub async fn add_url(&self, raw_url: &str, session_id: Option<&str>) -> Result<ContextRow> {
        let text = self.fetch_url(raw_url).await?;
        let row = self.store.insert_context(
            ContextSource::Url,
            text.trim(),
            Some(raw_url),
            session_id,
        )?;
        self.invalidate(session_id);
        Ok(row)
    }

    /// Fetch the text body of a URL without touching the store.
    pub async fn fetch_url(&self, raw_url: &str) -> Result<String> {
        let url = Url::parse(raw_url)
            .map_err(|e| CampfireError::Validation(format!("invalid URL: {}", e)))?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(CampfireError::Validation(format!(
                    "URL scheme '{}' is not allowed",
                    other
                ))
                .into())
            }
        }

        // Preflight: reject by size and type before reading any body.
        let head = self
            .client
            .head(url.clone())
            .send()
            .await
            .map_err(map_fetch_error)?;
        if !head.status().is_success() {
            return Err(CampfireError::Upstream(format!(
                "HEAD {} returned {}",
                url,
                head.status()
            ))
            .into());
        }
        let declared_len = head
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        match declared_len {
            Some(len) if len <= self.limits.max_url_bytes => {}
            Some(len) => {
                return Err(CampfireError::Oversize(format!(
                    "resource declares {} bytes, cap is {}",
                    len, self.limits.max_url_bytes
                ))
                .into())
            }
            None => {
                return Err(CampfireError::Oversize(
                    "resource did not declare a content length".into(),
                )
                .into())
            }
        }
        let content_type = head
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase())
            .unwrap_or_default();
        if !mime_allowed(&content_type) {
            return Err(CampfireError::UnsupportedMime(format!(
                "content type '{}' is not in the allowlist",
                content_type
            ))
            .into());
        }

        // Body: stream with a hard cap; never buffer unbounded.
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(map_fetch_error)?;
        if !response.status().is_success() {
            return Err(CampfireError::Upstream(format!(
                "GET {} returned {}",
                url,
                response.status()
            ))
            .into());
        }

        let mut body: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_fetch_error)?;
            if body.len() as u64 + chunk.len() as u64 > self.limits.max_url_bytes {
                return Err(CampfireError::Oversize(format!(
                    "body exceeded {} byte cap",
                    self.limits.max_url_bytes
                ))
                .into());
            }
            body.extend_from_slice(&chunk);
        }

        match String::from_utf8(body) {
            Ok(text) => Ok(text),
            Err(_) => {
                Err(CampfireError::Validation("response body is not valid UTF-8".into()).into())
            }
        }
    }

    fn invalidate(&self, session_id: Option<&str>) {
        self.index.request_rebuild(session_id);
    }
}

fn mime_allowed(content_type: &str) -> bool {
    content_type.starts_with("text/") || URL_MIME_ALLOWLIST.contains(&content_type)
}

fn map_fetch_error(err: reqwest::Error) -> anyhow::Error {
    if err.is_timeout() {
        CampfireError::Timeout(format!("fetch timed out: {}", err)).into()
    } else if err.is_redirect() {
        CampfireError::TooManyRedirects(err.to_string()).into()
    } else if err.is_connect() {
        CampfireError::Upstream(format!("connection failed: {}", err)).into()
    } else {
        CampfireError::Upstream(err.to_string()).into()
    }
}
