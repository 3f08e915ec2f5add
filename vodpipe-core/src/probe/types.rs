use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const DEFAULT_FRAME_RATE: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamInfo {
    pub index: u32,
    pub kind: StreamKind,
    pub codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate_expr: Option<String>,
    pub language: Option<String>,
    pub duration_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub container_format: Option<String>,
    pub duration_seconds: Option<f64>,
    pub streams: Vec<StreamInfo>,
}

impl ProbeResult {
    /// First video stream, else the first stream of any kind.
    pub fn primary_video(&self) -> Option<&StreamInfo> {
        self.streams
            .iter()
            .find(|stream| stream.kind == StreamKind::Video)
            .or_else(|| self.streams.first())
    }

    pub fn width(&self) -> u32 {
        self.primary_video().and_then(|s| s.width).unwrap_or(0)
    }

    pub fn height(&self) -> u32 {
        self.primary_video().and_then(|s| s.height).unwrap_or(0)
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration_seconds
            .or_else(|| self.primary_video().and_then(|s| s.duration_seconds))
            .or_else(|| self.streams.first().and_then(|s| s.duration_seconds))
    }

    pub fn frame_rate(&self) -> f64 {
        parse_frame_rate(self.primary_video().and_then(|s| s.frame_rate_expr.as_deref()))
    }

    pub fn streams_of(&self, kind: StreamKind) -> impl Iterator<Item = &StreamInfo> {
        self.streams.iter().filter(move |stream| stream.kind == kind)
    }
}

/// Accepts `N/D` or a plain number. Anything unusable becomes 30.
pub fn parse_frame_rate(expr: Option<&str>) -> f64 {
    expr.and_then(rate_value).unwrap_or(DEFAULT_FRAME_RATE)
}

fn rate_value(expr: &str) -> Option<f64> {
    let expr = expr.trim();
    let value = match expr.split_once('/') {
        Some((num, den)) => {
            let den = den.trim().parse::<f64>().ok().filter(|d| *d != 0.0)?;
            num.trim().parse::<f64>().ok()? / den
        }
        None => expr.parse::<f64>().ok()?,
    };
    Some(value).filter(|v| v.is_finite() && *v > 0.0)
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawProbe {
    #[serde(default)]
    format: Option<RawFormat>,
    #[serde(default)]
    streams: Vec<RawStream>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    format_name: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawStream {
    #[serde(default)]
    index: u32,
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

fn positive_seconds(value: Option<&str>) -> Option<f64> {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v > 0.0)
}

fn usable_rate(expr: &Option<String>) -> Option<String> {
    expr.as_ref().filter(|e| rate_value(e).is_some()).cloned()
}

impl From<RawProbe> for ProbeResult {
    fn from(raw: RawProbe) -> Self {
        let (container_format, duration_seconds) = match raw.format {
            Some(format) => (format.format_name, positive_seconds(format.duration.as_deref())),
            None => (None, None),
        };
        let streams = raw
            .streams
            .into_iter()
            .map(|stream| StreamInfo {
                index: stream.index,
                kind: match stream.codec_type.as_deref() {
                    Some("video") => StreamKind::Video,
                    Some("audio") => StreamKind::Audio,
                    Some("subtitle") => StreamKind::Subtitle,
                    _ => StreamKind::Other,
                },
                codec: stream.codec_name,
                width: stream.width,
                height: stream.height,
                frame_rate_expr: usable_rate(&stream.avg_frame_rate)
                    .or_else(|| usable_rate(&stream.r_frame_rate)),
                language: stream
                    .tags
                    .get("language")
                    .map(|lang| lang.trim().to_string())
                    .filter(|lang| !lang.is_empty()),
                duration_seconds: positive_seconds(stream.duration.as_deref()),
            })
            .collect();
        ProbeResult {
            container_format,
            duration_seconds,
            streams,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rate_parsing() {
        assert!((parse_frame_rate(Some("24000/1001")) - 23.976).abs() < 0.001);
        assert_eq!(parse_frame_rate(Some("25")), 25.0);
        assert_eq!(parse_frame_rate(Some("0/0")), 30.0);
        assert_eq!(parse_frame_rate(Some("abc")), 30.0);
        assert_eq!(parse_frame_rate(None), 30.0);
    }

    #[test]
    fn converts_raw_probe() {
        let raw: RawProbe = serde_json::from_str(
            r#"{
                "streams": [
                    {"index": 0, "codec_type": "video", "codec_name": "h264", "width": 1920,
                     "height": 1080, "avg_frame_rate": "0/0", "r_frame_rate": "24/1"},
                    {"index": 1, "codec_type": "audio", "codec_name": "aac",
                     "tags": {"language": "por"}},
                    {"index": 2, "codec_type": "subtitle", "codec_name": "subrip",
                     "tags": {"language": "eng"}}
                ],
                "format": {"format_name": "matroska,webm", "duration": "5400.5"}
            }"#,
        )
        .unwrap();
        let result = ProbeResult::from(raw);
        assert_eq!(result.container_format.as_deref(), Some("matroska,webm"));
        assert_eq!(result.width(), 1920);
        assert_eq!(result.frame_rate(), 24.0);
        assert_eq!(result.duration(), Some(5400.5));
        let audio: Vec<_> = result.streams_of(StreamKind::Audio).collect();
        assert_eq!(audio[0].language.as_deref(), Some("por"));
        assert_eq!(result.streams_of(StreamKind::Subtitle).count(), 1);
    }

    #[test]
    fn duration_falls_back_to_stream() {
        let raw: RawProbe = serde_json::from_str(
            r#"{"streams": [{"index": 0, "codec_type": "video", "duration": "60.0"}],
                "format": {"duration": "N/A"}}"#,
        )
        .unwrap();
        assert_eq!(ProbeResult::from(raw).duration(), Some(60.0));
    }
}
