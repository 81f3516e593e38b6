// sync/embedded.rs - Harvesting CDN-hosted files referenced from issue text
//
// Issue descriptions and comment bodies reference uploaded binaries by URL.
// Each unique URL becomes an embedded-file row keyed by a stable hash, so the
// filesystem layer can expose and lazily download them.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::time::Duration;

use crate::db::Store;
use crate::models::EmbeddedFile;

/// Source tag for files referenced from an issue description.
pub const SOURCE_DESCRIPTION: &str = "description";

/// Source tag for files referenced from a comment body.
pub fn comment_source(comment_id: &str) -> String {
    format!("comment:{}", comment_id)
}

/// Markdown image/link form: `![alt](url)` or `[text](url)`.
static MARKDOWN_UPLOAD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"!?\[([^\]]*)\]\((https://uploads\.linear\.app/[^\s\)]+)\)").unwrap()
});

/// Bare occurrences outside markdown syntax.
static BARE_UPLOAD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https://uploads\.linear\.app/[^\s\)\]"'<>]+"#).unwrap());

/// A unique upload URL found in a text body, with its markdown display text
/// when it had one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRef {
    pub url: String,
    pub label: Option<String>,
}

/// Extract every unique upload URL from `body`. Markdown matches come first
/// (they carry display text); bare matches fill in whatever the markdown
/// pass missed.
pub fn extract_upload_refs(body: &str) -> Vec<UploadRef> {
    let mut seen = HashSet::new();
    let mut refs = Vec::new();

    for captures in MARKDOWN_UPLOAD_RE.captures_iter(body) {
        let label = captures[1].trim();
        let url = captures[2].to_string();
        if seen.insert(url.clone()) {
            refs.push(UploadRef {
                url,
                label: (!label.is_empty()).then(|| label.to_string()),
            });
        }
    }

    for m in BARE_UPLOAD_RE.find_iter(body) {
        let url = m
            .as_str()
            .trim_end_matches(['.', ',', ';', ':', '!', '?'])
            .to_string();
        if seen.insert(url.clone()) {
            refs.push(UploadRef { url, label: None });
        }
    }

    refs
}

/// Stable id for an upload URL: first 16 bytes of SHA-256, lowercase hex.
pub fn embedded_file_id(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    hex::encode(&digest[..16])
}

/// Pick a filename: markdown display text when present, otherwise the last
/// path segment with the query stripped. CDN segments are UUID-prefixed
/// (`<uuid>-<original name>`); when the segment looks like that, keep only
/// the original name.
pub fn filename_for(url: &str, label: Option<&str>) -> String {
    if let Some(label) = label {
        if !label.is_empty() {
            return label.to_string();
        }
    }

    let path = url.split('?').next().unwrap_or(url);
    let segment = path.rsplit('/').next().unwrap_or("");

    if segment.len() > 40 && segment.matches('-').count() >= 4 {
        if let Some(suffix) = segment.rsplit('-').next() {
            if suffix.contains('.') {
                return suffix.to_string();
            }
        }
    }

    if segment.is_empty() {
        "file".to_string()
    } else {
        segment.to_string()
    }
}

/// MIME type from the filename extension, case-insensitive.
pub fn mime_type_for(filename: &str) -> &'static str {
    let extension = filename
        .rsplit('.')
        .next()
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "zip" => "application/zip",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

/// Scans text bodies for upload URLs and catalogues them in the store.
pub struct EmbeddedFileScanner {
    http: reqwest::Client,
    auth_header: String,
}

impl EmbeddedFileScanner {
    /// `auth_header` is attached to size probes; when it is empty the probe
    /// is skipped entirely (the CDN rejects unauthenticated requests anyway).
    pub fn new(auth_header: String) -> crate::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| crate::Error::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { http, auth_header })
    }

    /// Extract and upsert every upload referenced in `body`. Returns how
    /// many rows were written; row-level failures are logged and skipped.
    pub async fn harvest(&self, store: &Store, issue_id: &str, body: &str, source: &str) -> usize {
        let mut written = 0;
        for upload in extract_upload_refs(body) {
            let id = embedded_file_id(&upload.url);
            let filename = filename_for(&upload.url, upload.label.as_deref());
            let mime_type = mime_type_for(&filename).to_string();
            let file_size = self.probe_size(&upload.url).await;
            let now = Utc::now();

            let file = EmbeddedFile {
                id,
                issue_id: issue_id.to_string(),
                url: upload.url,
                filename,
                mime_type,
                file_size,
                cache_path: None,
                source: source.to_string(),
                created_at: now,
                updated_at: now,
                synced_at: now,
            };
            match store.upsert_embedded_file(&file).await {
                Ok(()) => written += 1,
                Err(e) => tracing::warn!("Failed to record embedded file {}: {}", file.url, e),
            }
        }
        written
    }

    /// Best-effort authenticated HEAD for the remote size. Zero on any
    /// failure.
    async fn probe_size(&self, url: &str) -> i64 {
        if self.auth_header.is_empty() {
            return 0;
        }
        let response = match self
            .http
            .head(url)
            .header(AUTHORIZATION, self.auth_header.as_str())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("Size probe failed for {}: {}", url, e);
                return 0;
            }
        };
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_markdown_and_bare() {
        let body = "Here's ![bug.png](https://uploads.linear.app/w/i/bug.png) \
                    and https://uploads.linear.app/w/i/spec.pdf";
        let refs = extract_upload_refs(body);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].url, "https://uploads.linear.app/w/i/bug.png");
        assert_eq!(refs[0].label.as_deref(), Some("bug.png"));
        assert_eq!(refs[1].url, "https://uploads.linear.app/w/i/spec.pdf");
        assert_eq!(refs[1].label, None);
    }

    #[test]
    fn test_extract_dedupes_markdown_over_bare() {
        // The markdown pass wins, so the bare re-match of the same URL is
        // dropped and the label survives.
        let body = "[report](https://uploads.linear.app/w/i/report.pdf) \
                    https://uploads.linear.app/w/i/report.pdf";
        let refs = extract_upload_refs(body);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].label.as_deref(), Some("report"));
    }

    #[test]
    fn test_extract_ignores_other_hosts() {
        let body = "see https://example.com/file.png and \
                    ![x](https://cdn.other.app/y.png)";
        assert!(extract_upload_refs(body).is_empty());
    }

    #[test]
    fn test_bare_url_trailing_punctuation_stripped() {
        let body = "Uploaded to https://uploads.linear.app/w/i/log.zip.";
        let refs = extract_upload_refs(body);
        assert_eq!(refs[0].url, "https://uploads.linear.app/w/i/log.zip");
    }

    #[test]
    fn test_embedded_file_id_is_stable_sha256_prefix() {
        let url = "https://uploads.linear.app/w/i/bug.png";
        let id = embedded_file_id(url);
        assert_eq!(id.len(), 32); // 16 bytes hex-encoded
        assert_eq!(id, embedded_file_id(url));
        assert_eq!(id, id.to_lowercase());

        let digest = Sha256::digest(url.as_bytes());
        assert_eq!(id, hex::encode(&digest[..16]));
        assert_ne!(id, embedded_file_id("https://uploads.linear.app/w/i/other.png"));
    }

    #[test]
    fn test_filename_prefers_label() {
        assert_eq!(
            filename_for("https://uploads.linear.app/w/i/abc.png", Some("screenshot.png")),
            "screenshot.png"
        );
    }

    #[test]
    fn test_filename_from_path_segment() {
        assert_eq!(
            filename_for("https://uploads.linear.app/w/i/bug.png?signature=xyz", None),
            "bug.png"
        );
    }

    #[test]
    fn test_filename_strips_uuid_prefix() {
        let url = "https://uploads.linear.app/ws/550e8400-e29b-41d4-a716-446655440000-crash log.txt";
        assert_eq!(filename_for(url, None), "crash log.txt");

        // A long dashed segment without a dotted suffix stays whole.
        let url = "https://uploads.linear.app/ws/550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(filename_for(url, None), "550e8400-e29b-41d4-a716-446655440000");
    }

    #[test]
    fn test_mime_table() {
        assert_eq!(mime_type_for("a.png"), "image/png");
        assert_eq!(mime_type_for("a.PNG"), "image/png");
        assert_eq!(mime_type_for("a.jpeg"), "image/jpeg");
        assert_eq!(mime_type_for("a.pdf"), "application/pdf");
        assert_eq!(
            mime_type_for("a.docx"),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        );
        assert_eq!(mime_type_for("a.mov"), "video/quicktime");
        assert_eq!(mime_type_for("a.unknown"), "application/octet-stream");
        assert_eq!(mime_type_for("no-extension"), "application/octet-stream");
    }

    #[test]
    fn test_comment_source_tag() {
        assert_eq!(comment_source("c-9"), "comment:c-9");
    }

    #[tokio::test]
    async fn test_harvest_writes_rows_without_probe() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("cache.db")).await.unwrap();
        store
            .upsert_issue(&crate::db::issues::tests::make_issue(
                "i1",
                "t1",
                Utc::now(),
            ))
            .await
            .unwrap();

        let scanner = EmbeddedFileScanner::new(String::new()).unwrap();
        let body = "Here's ![bug.png](https://uploads.linear.app/w/i/bug.png) \
                    and https://uploads.linear.app/w/i/spec.pdf";
        let written = scanner.harvest(&store, "i1", body, SOURCE_DESCRIPTION).await;
        assert_eq!(written, 2);

        let files = store.list_issue_embedded_files("i1").await.unwrap();
        assert_eq!(files.len(), 2);
        let bug = files.iter().find(|f| f.filename == "bug.png").unwrap();
        assert_eq!(bug.mime_type, "image/png");
        assert_eq!(bug.source, "description");
        assert_eq!(bug.file_size, 0);
        assert_eq!(bug.id, embedded_file_id(&bug.url));
        let spec = files.iter().find(|f| f.filename == "spec.pdf").unwrap();
        assert_eq!(spec.mime_type, "application/pdf");
    }
}
