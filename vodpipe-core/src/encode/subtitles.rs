use std::path::Path;

use tracing::info;

use super::{EncodeError, EncodeResult};

/// Decoder hint for subtitle files that are not valid UTF-8.
pub const LEGACY_SUBTITLE_CHARSET: &str = "Windows-1252";

/// `None` when the file is strict UTF-8, otherwise the legacy charset the
/// encoder should decode it with.
pub async fn detect_subtitle_charset(path: &Path) -> EncodeResult<Option<&'static str>> {
    let bytes = tokio::fs::read(path).await.map_err(|source| EncodeError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    if std::str::from_utf8(&bytes).is_ok() {
        return Ok(None);
    }
    info!(path = %path.display(), charset = LEGACY_SUBTITLE_CHARSET, "subtitle is not UTF-8");
    Ok(Some(LEGACY_SUBTITLE_CHARSET))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn detects_legacy_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let utf8 = dir.path().join("pt.srt");
        std::fs::write(&utf8, "1\n00:00:01,000 --> 00:00:02,000\nAção\n").unwrap();
        assert_eq!(detect_subtitle_charset(&utf8).await.unwrap(), None);

        let latin1 = dir.path().join("pt-ansi.srt");
        std::fs::write(&latin1, b"1\n00:00:01,000 --> 00:00:02,000\nA\xe7\xe3o\n").unwrap();
        assert_eq!(
            detect_subtitle_charset(&latin1).await.unwrap(),
            Some(LEGACY_SUBTITLE_CHARSET)
        );
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let err = detect_subtitle_charset(Path::new("/missing/sub.srt"))
            .await
            .unwrap_err();
        assert!(matches!(err, EncodeError::Io { .. }));
    }
}
