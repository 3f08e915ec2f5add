use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ladder::RenditionSpec;

use super::{PlaylistError, PlaylistResult};

/// H.264 Main + AAC-LC.
pub const DEFAULT_CODECS: &str = "avc1.4d401f,mp4a.40.2";

const SEGMENT_OVERHEAD: f64 = 1.07;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleEntry {
    pub lang: String,
    pub name: String,
    pub uri: String,
    #[serde(default)]
    pub default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioEntry {
    pub lang: String,
    pub name: String,
}

impl AudioEntry {
    pub fn uri(&self) -> String {
        format!("audio-{}/index.m3u8", self.lang)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestOptions {
    pub max_height: Option<u32>,
    pub frame_rate: Option<f64>,
    pub codecs: Option<String>,
}

impl ManifestOptions {
    pub fn capped(max_height: u32) -> Self {
        Self {
            max_height: Some(max_height),
            ..Self::default()
        }
    }
}

pub fn render_master(
    renditions: &[RenditionSpec],
    audios: &[AudioEntry],
    subtitles: &[SubtitleEntry],
    options: &ManifestOptions,
) -> String {
    let mut lines = vec![
        "#EXTM3U".to_string(),
        "#EXT-X-VERSION:7".to_string(),
        "#EXT-X-INDEPENDENT-SEGMENTS".to_string(),
    ];

    // At most one subtitle rendition in the group may be DEFAULT.
    let mut default_taken = false;
    for sub in subtitles {
        let default = sub.default && !default_taken;
        default_taken |= default;
        lines.push(format!(
            "#EXT-X-MEDIA:TYPE=SUBTITLES,GROUP-ID=\"subs\",NAME=\"{}\",DEFAULT={},AUTOSELECT=YES,LANGUAGE=\"{}\",URI=\"{}\"",
            quoted(&sub.name),
            yes_no(default),
            quoted(&sub.lang),
            quoted(&sub.uri)
        ));
    }
    for (index, audio) in audios.iter().enumerate() {
        lines.push(format!(
            "#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"audio\",NAME=\"{}\",DEFAULT={},AUTOSELECT=YES,LANGUAGE=\"{}\",URI=\"{}\"",
            quoted(&audio.name),
            yes_no(index == 0),
            quoted(&audio.lang),
            quoted(&audio.uri())
        ));
    }

    let codecs = options.codecs.as_deref().unwrap_or(DEFAULT_CODECS);
    for rendition in renditions {
        if options.max_height.is_some_and(|cap| rendition.height > cap) {
            continue;
        }
        let kbps = f64::from(rendition.bitrate_kbps);
        let mut line = format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},AVERAGE-BANDWIDTH={},RESOLUTION={}x{},CODECS=\"{}\"",
            (kbps * 1000.0 * SEGMENT_OVERHEAD).round() as u64,
            (kbps * 1000.0).round() as u64,
            rendition.width,
            rendition.height,
            codecs
        );
        if let Some(fps) = options.frame_rate.filter(|fps| fps.is_finite() && *fps > 0.0) {
            line.push_str(&format!(",FRAME-RATE={fps:.3}"));
        }
        if !audios.is_empty() {
            line.push_str(",AUDIO=\"audio\"");
        }
        if !subtitles.is_empty() {
            line.push_str(",SUBTITLES=\"subs\"");
        }
        if rendition.height >= 2160 {
            line.push_str(",VIDEO-RANGE=SDR");
        }
        lines.push(line);
        lines.push(format!("video/{}/index.m3u8", rendition.key));
    }

    lines.join("\n")
}

pub async fn write_master(
    path: &Path,
    renditions: &[RenditionSpec],
    audios: &[AudioEntry],
    subtitles: &[SubtitleEntry],
    options: &ManifestOptions,
) -> PlaylistResult<()> {
    let content = render_master(renditions, audios, subtitles, options);
    tokio::fs::write(path, content)
        .await
        .map_err(PlaylistError::io(path))?;
    info!(path = %path.display(), max_height = ?options.max_height, "master playlist written");
    Ok(())
}

/// Quoted-string attribute values cannot carry `"`, CR or LF.
fn quoted(value: &str) -> String {
    value
        .chars()
        .filter(|c| *c != '\r' && *c != '\n')
        .map(|c| if c == '"' { '\'' } else { c })
        .collect()
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "YES"
    } else {
        "NO"
    }
}
