//!
//! Image attachment preparation for chat requests.
//!
//! Callers reference images either as plain URLs or as `data:image/...`
//! URIs. Both are resolved to bytes, content-addressed by SHA-256, and
//! uploaded to the vendor through its two-step prepare/PUT flow. Uploads
//! are cached for the process lifetime so repeated references to the same
//! image cost nothing.
//!
//! Individual upload failures are logged and skipped - a broken image must
//! not take the whole chat request down.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

use crate::converter::openai_to_highlight::AttachedImage;
use crate::error::{HighlightError, Result};
use crate::upstream::UpstreamClient;

/* --- types ----------------------------------------------------------------------------------- */

///
/// Content-addressed image upload service.
pub struct ImageUploader {
    /** vendor HTTP client */
    upstream: Arc<UpstreamClient>,
    /** sha256 hex → uploaded file, process-lifetime cache */
    cache: Mutex<HashMap<String, AttachedImage>>,
    /** bounds concurrent uploads for one request batch */
    upload_slots: Arc<Semaphore>,
}

/* --- constants ------------------------------------------------------------------------------ */

/** at most this many image uploads run concurrently */
const MAX_CONCURRENT_UPLOADS: usize = 5;

/* --- start of code -------------------------------------------------------------------------- */

impl ImageUploader {
    ///
    /// Create the uploader with an empty cache.
    pub fn new(upstream: Arc<UpstreamClient>) -> Self {
        Self {
            upstream,
            cache: Mutex::new(HashMap::new()),
            upload_slots: Arc::new(Semaphore::new(MAX_CONCURRENT_UPLOADS)),
        }
    }

    ///
    /// Resolve and upload every image reference of one request.
    ///
    /// Failures are logged per image and the image is dropped from the
    /// result; the surviving attachments are returned newest-first, the
    /// order the desktop client sends them in.
    ///
    /// # Arguments
    ///  * `urls` - image URLs / data URIs in message order
    ///  * `access_token` - bearer token for the upload calls
    ///  * `proxy` - optional per-account proxy URL
    ///
    /// # Returns
    ///  * Attachments ready for `attachedContext`
    pub async fn prepare_attachments(
        &self,
        urls: &[String],
        access_token: &str,
        proxy: Option<&str>,
    ) -> Vec<AttachedImage> {
        if urls.is_empty() {
            return Vec::new();
        }

        let uploads = urls.iter().map(|url| async move {
            let _slot = self.upload_slots.acquire().await.ok()?;
            match self.upload_single(url, access_token, proxy).await {
                Ok(attached) => Some(attached),
                Err(e) => {
                    warn!(error = %e, "image upload failed, skipping attachment");
                    None
                }
            }
        });

        let mut results: Vec<AttachedImage> =
            futures::future::join_all(uploads).await.into_iter().flatten().collect();
        results.reverse();
        results
    }

    ///
    /// Upload one image, via the cache.
    async fn upload_single(
        &self,
        url: &str,
        access_token: &str,
        proxy: Option<&str>,
    ) -> Result<AttachedImage> {
        let bytes = match decode_data_uri(url) {
            Some(decoded) => decoded,
            None => self.upstream.download(url, proxy).await?.to_vec(),
        };

        let digest = sha256_hex(&bytes);
        {
            let cache = self.cache.lock().await;
            if let Some(cached) = cache.get(&digest) {
                debug!(digest = %digest, "image upload cache hit");
                return Ok(cached.clone());
            }
        }

        let (mime_type, extension) = detect_image_kind(&bytes).ok_or_else(|| {
            HighlightError::CallerInput("Unsupported or unrecognized image format".to_string())
        })?;
        let file_name = format!("image.{}", extension);

        let prepared = self
            .upstream
            .prepare_upload(access_token, &file_name, mime_type, bytes.len(), proxy)
            .await?;
        self.upstream.upload_bytes(&prepared.upload_url, bytes, access_token).await?;

        let attached = AttachedImage { file_id: prepared.id, file_name };
        self.cache.lock().await.insert(digest, attached.clone());
        Ok(attached)
    }
}

///
/// Decode a `data:image/...;base64,` URI to raw bytes.
///
/// Returns `None` for anything that is not a base64 image data URI, in
/// which case the input is treated as a downloadable URL.
fn decode_data_uri(data: &str) -> Option<Vec<u8>> {
    if !data.starts_with("data:image/") {
        return None;
    }
    let (_, payload) = data.split_once(',')?;
    STANDARD.decode(payload.as_bytes()).ok()
}

///
/// Sniff the image kind from its magic bytes.
///
/// # Returns
///  * `(mime type, file extension)` for png/jpeg/gif/webp
///  * `None` for anything else
fn detect_image_kind(bytes: &[u8]) -> Option<(&'static str, &'static str)> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]) {
        return Some(("image/png", "png"));
    }
    if bytes.starts_with(&[0xff, 0xd8, 0xff]) {
        return Some(("image/jpeg", "jpg"));
    }
    if bytes.starts_with(b"GIF8") {
        return Some(("image/gif", "gif"));
    }
    if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
        return Some(("image/webp", "webp"));
    }
    None
}

///
/// Lowercase hex SHA-256 of the given bytes.
fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect()
}
