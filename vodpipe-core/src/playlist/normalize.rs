use std::path::{Path, MAIN_SEPARATOR};

use tracing::debug;

use super::{PlaylistError, PlaylistResult};

/// Strips every absolute reference to `dir` so segment URIs become
/// relative to the playlist. Applying it twice is a no-op.
pub fn normalize_playlist_text(text: &str, dir: &Path) -> String {
    let dir = dir.to_string_lossy();
    let dir = dir.trim_end_matches(['/', '\\']);
    if dir.is_empty() {
        return text.to_string();
    }

    let mut prefixes = vec![
        format!("{}/", dir.replace('\\', "/")),
        format!("{}\\", dir.replace('/', "\\")),
        format!("{dir}{MAIN_SEPARATOR}"),
    ];
    prefixes.sort();
    prefixes.dedup();

    let mut out = text.to_string();
    loop {
        let before = out.len();
        for prefix in &prefixes {
            out = out.replace(prefix.as_str(), "");
        }
        if out.len() == before {
            return out;
        }
    }
}

pub async fn normalize_in_place(playlist: &Path) -> PlaylistResult<()> {
    let dir = playlist.parent().unwrap_or_else(|| Path::new(""));
    let text = tokio::fs::read_to_string(playlist)
        .await
        .map_err(PlaylistError::io(playlist))?;
    let normalized = normalize_playlist_text(&text, dir);
    if normalized != text {
        tokio::fs::write(playlist, normalized)
            .await
            .map_err(PlaylistError::io(playlist))?;
        debug!(path = %playlist.display(), "playlist normalized");
    }
    Ok(())
}
