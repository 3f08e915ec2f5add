use std::path::Path;

use super::{PlaylistError, PlaylistResult};

/// One cue per `interval` seconds covering `ceil(duration / interval)` cues.
pub fn render_thumbnail_vtt(duration: f64, interval: u32) -> String {
    let mut content = String::from("WEBVTT\n\n");
    if interval == 0 || !duration.is_finite() || duration <= 0.0 {
        return content;
    }
    let count = (duration / f64::from(interval)).ceil() as u64;
    let interval = u64::from(interval);
    for i in 0..count {
        content.push_str(&format!(
            "{} --> {}\nthumb_{:05}.jpg\n\n",
            timestamp(i * interval),
            timestamp((i + 1) * interval),
            i + 1
        ));
    }
    content
}

pub async fn write_thumbnail_vtt(path: &Path, duration: f64, interval: u32) -> PlaylistResult<()> {
    tokio::fs::write(path, render_thumbnail_vtt(duration, interval))
        .await
        .map_err(PlaylistError::io(path))
}

fn timestamp(seconds: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}.000",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}
