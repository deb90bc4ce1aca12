use std::path::Path;

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use hlsbridge_core::error::ApiError;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncSeekExt;

use crate::error::AppError;

/// Parse an HTTP Range header per RFC 7233.
/// Only supports single byte ranges: `bytes=start-end`, `bytes=start-` or `bytes=-suffix`.
pub struct ByteRange {
    pub start: u64,
    pub end_inclusive: u64,
}

pub fn parse_range_header(range_str: &str, file_size: u64) -> Result<ByteRange, ApiError> {
    let range_str = range_str.trim();
    let Some(spec) = range_str.strip_prefix("bytes=") else {
        return Err(ApiError::BadRequest("only bytes ranges supported".into()));
    };

    // Reject multi-range
    if spec.contains(',') {
        return Err(ApiError::BadRequest("multi-range not supported".into()));
    }

    if file_size == 0 {
        return Err(ApiError::BadRequest("range on empty file".into()));
    }

    let (start_s, end_s) = spec.split_once('-').unwrap_or((spec, ""));

    if start_s.is_empty() {
        // Suffix range: bytes=-500 means last 500 bytes
        let suffix: u64 = end_s
            .parse()
            .map_err(|_| ApiError::BadRequest("bad range suffix".into()))?;
        if suffix == 0 {
            return Err(ApiError::BadRequest("empty suffix range".into()));
        }
        return Ok(ByteRange {
            start: file_size.saturating_sub(suffix),
            end_inclusive: file_size - 1,
        });
    }

    let start: u64 = start_s
        .parse()
        .map_err(|_| ApiError::BadRequest("bad range start".into()))?;

    let end: u64 = if end_s.is_empty() {
        file_size - 1
    } else {
        end_s
            .parse()
            .map_err(|_| ApiError::BadRequest("bad range end".into()))?
    };

    if start >= file_size {
        return Err(ApiError::BadRequest(format!(
            "range start {start} >= file size {file_size}"
        )));
    }

    let end = end.min(file_size - 1);

    if start > end {
        return Err(ApiError::BadRequest("range start > end".into()));
    }

    Ok(ByteRange {
        start,
        end_inclusive: end,
    })
}

fn build(builder: axum::http::response::Builder, body: Body) -> Result<Response, AppError> {
    builder
        .body(body)
        .map_err(|e| ApiError::Internal(format!("response build error: {e}")).into())
}

/// Stream a file from disk with HTTP Range support.
pub async fn serve_file(
    path: &Path,
    content_type: &str,
    cache_control: &str,
    headers: &HeaderMap,
) -> Result<Response, AppError> {
    let meta = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => meta,
        // ffmpeg may have rotated the segment out between listing and request
        _ => return Err(ApiError::NotFound(path_label(path)).into()),
    };
    let file_size = meta.len();

    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| ApiError::Internal(format!("file open error: {e}")))?;

    let base = Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, cache_control)
        .header(header::ACCEPT_RANGES, "bytes");

    if let Some(range_header) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        let range = match parse_range_header(range_header, file_size) {
            Ok(r) => r,
            Err(_) => {
                // 416 Range Not Satisfiable
                return build(
                    Response::builder()
                        .status(StatusCode::RANGE_NOT_SATISFIABLE)
                        .header(header::CONTENT_RANGE, format!("bytes */{file_size}")),
                    Body::empty(),
                );
            }
        };

        let content_length = range.end_inclusive - range.start + 1;
        file.seek(std::io::SeekFrom::Start(range.start))
            .await
            .map_err(|e| ApiError::Internal(format!("seek error: {e}")))?;
        let stream = tokio_util::io::ReaderStream::new(file.take(content_length));

        return build(
            base.status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_LENGTH, content_length.to_string())
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", range.start, range.end_inclusive, file_size),
                ),
            Body::from_stream(stream),
        );
    }

    let stream = tokio_util::io::ReaderStream::new(file.take(file_size));
    build(
        base.status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, file_size.to_string()),
        Body::from_stream(stream),
    )
}

fn path_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_range_basic() {
        let r = parse_range_header("bytes=0-999", 5000).unwrap();
        assert_eq!(r.start, 0);
        assert_eq!(r.end_inclusive, 999);
    }

    #[test]
    fn parse_range_open_end() {
        let r = parse_range_header("bytes=1000-", 5000).unwrap();
        assert_eq!(r.start, 1000);
        assert_eq!(r.end_inclusive, 4999);
    }

    #[test]
    fn parse_range_suffix() {
        let r = parse_range_header("bytes=-500", 5000).unwrap();
        assert_eq!(r.start, 4500);
        assert_eq!(r.end_inclusive, 4999);
    }

    #[test]
    fn parse_range_clamps_end() {
        let r = parse_range_header("bytes=0-99999", 5000).unwrap();
        assert_eq!(r.end_inclusive, 4999);
    }

    #[test]
    fn parse_range_rejects() {
        assert!(parse_range_header("bytes=5000-", 5000).is_err());
        assert!(parse_range_header("bytes=0-100, 200-300", 5000).is_err());
        assert!(parse_range_header("items=0-1", 5000).is_err());
        assert!(parse_range_header("bytes=0-", 0).is_err());
        assert!(parse_range_header("bytes=-0", 10).is_err());
    }

    #[tokio::test]
    async fn serves_partial_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream0.ts");
        std::fs::write(&path, b"0123456789").unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, "bytes=2-5".parse().unwrap());
        let resp = serve_file(&path, "video/MP2T", "max-age=3600", &headers)
            .await
            .ok()
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(resp.headers()[header::CONTENT_RANGE], "bytes 2-5/10");
        assert_eq!(resp.headers()[header::CONTENT_LENGTH], "4");

        let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"2345");
    }

    #[tokio::test]
    async fn unsatisfiable_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream0.ts");
        std::fs::write(&path, b"0123").unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, "bytes=10-".parse().unwrap());
        let resp = serve_file(&path, "video/MP2T", "max-age=3600", &headers)
            .await
            .ok()
            .unwrap();
        assert_eq!(resp.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(resp.headers()[header::CONTENT_RANGE], "bytes */4");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let result = serve_file(
            &dir.path().join("gone.ts"),
            "video/MP2T",
            "max-age=3600",
            &HeaderMap::new(),
        )
        .await;
        assert!(matches!(result, Err(AppError(ApiError::NotFound(_)))));
    }
}
