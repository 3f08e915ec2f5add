use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::EncoderSection;
use crate::ladder::RenditionSpec;
use crate::paths::{variant_files, OutputTree};
use crate::playlist::{AudioEntry, SubtitleEntry};

use super::{EncodeError, EncodeResult};

pub const GOP_MIN: u32 = 24;
pub const GOP_MAX: u32 = 600;

/// Sources faster than this are encoded at 30 fps.
const MAX_NATIVE_FPS: f64 = 31.0;
const WORKING_FPS: u32 = 30;
const THUMBNAIL_WIDTH: u32 = 320;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSelection {
    pub stream_index: u32,
    pub lang: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum SubtitleSource {
    Internal {
        stream_index: u32,
    },
    External {
        path: PathBuf,
        #[serde(default)]
        charset: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleSelection {
    #[serde(flatten)]
    pub source: SubtitleSource,
    pub lang: String,
    pub name: String,
    #[serde(default)]
    pub default: bool,
}

impl SubtitleSelection {
    pub fn is_external(&self) -> bool {
        matches!(self.source, SubtitleSource::External { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodeJobSpec {
    pub renditions: Vec<RenditionSpec>,
    pub audio_tracks: Vec<AudioSelection>,
    pub subtitle_tracks: Vec<SubtitleSelection>,
    pub segment_duration_seconds: u32,
    pub thumbnail_interval_seconds: u32,
    pub source_frame_rate: f64,
    pub working_frame_rate: Option<u32>,
}

impl EncodeJobSpec {
    /// Every audio language and every subtitle language/origin pair owns
    /// its own output directory or playlist, so neither may repeat.
    pub fn validate(&self) -> EncodeResult<()> {
        let mut audio = HashSet::new();
        for track in &self.audio_tracks {
            if !audio.insert(track.lang.as_str()) {
                return Err(EncodeError::DuplicateTrack {
                    kind: "audio",
                    lang: track.lang.clone(),
                });
            }
        }
        let mut subtitles = HashSet::new();
        for track in &self.subtitle_tracks {
            if !subtitles.insert((track.lang.as_str(), track.is_external())) {
                return Err(EncodeError::DuplicateTrack {
                    kind: if track.is_external() {
                        "external subtitle"
                    } else {
                        "internal subtitle"
                    },
                    lang: track.lang.clone(),
                });
            }
        }
        Ok(())
    }

    /// Frame rate the GOP is derived from.
    pub fn effective_frame_rate(&self) -> f64 {
        self.working_frame_rate
            .map(f64::from)
            .unwrap_or(self.source_frame_rate)
    }
}

/// Codec settings that do not vary per job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderProfile {
    pub video_codec: String,
    pub video_codec_args: Vec<String>,
    pub audio_bitrate_kbps: u32,
    pub subtitle_segment_seconds: u32,
}

impl From<&EncoderSection> for EncoderProfile {
    fn from(section: &EncoderSection) -> Self {
        Self {
            video_codec: section.video_codec.clone(),
            video_codec_args: section.video_codec_args.clone(),
            audio_bitrate_kbps: section.audio_bitrate_kbps,
            subtitle_segment_seconds: section.subtitle_segment_seconds,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodeCommand {
    pub args: Vec<String>,
    /// Child playlists the encoder writes, for normalization afterwards.
    pub child_playlists: Vec<PathBuf>,
    pub audio_entries: Vec<AudioEntry>,
    pub subtitle_entries: Vec<SubtitleEntry>,
}

pub fn working_frame_rate(source_fps: f64) -> Option<u32> {
    (source_fps > MAX_NATIVE_FPS).then_some(WORKING_FPS)
}

pub fn gop_length(frame_rate: f64, segment_seconds: u32) -> u32 {
    let frames = (frame_rate * f64::from(segment_seconds)).round();
    if !frames.is_finite() || frames < f64::from(GOP_MIN) {
        return GOP_MIN;
    }
    if frames > f64::from(GOP_MAX) {
        return GOP_MAX;
    }
    frames as u32
}

/// `split` the decoded video into one branch per rendition plus a
/// thumbnail branch.
pub fn filter_graph(
    renditions: &[RenditionSpec],
    thumbnail_interval: u32,
    working_fps: Option<u32>,
) -> String {
    let labels: String = (0..renditions.len()).map(|i| format!("[v{i}]")).collect();
    let fps = working_fps.map(|fps| format!(",fps={fps}")).unwrap_or_default();
    let mut parts = vec![format!(
        "[0:v]format=yuv420p,setpts=PTS-STARTPTS{fps},split={}{labels}[vthumb]",
        renditions.len() + 1
    )];
    for (i, rendition) in renditions.iter().enumerate() {
        parts.push(format!(
            "[v{i}]scale={}:-2:flags=bilinear[vs{i}]",
            rendition.width
        ));
    }
    parts.push(format!(
        "[vthumb]fps=1/{thumbnail_interval},scale={THUMBNAIL_WIDTH}:-1:flags=lanczos[thumbs]"
    ));
    parts.join(";")
}

#[derive(Debug, Clone)]
pub struct EncodeJobBuilder {
    profile: EncoderProfile,
}

impl EncodeJobBuilder {
    pub fn new(profile: EncoderProfile) -> Self {
        Self { profile }
    }

    pub fn build(&self, spec: &EncodeJobSpec, tree: &OutputTree) -> EncodeResult<EncodeCommand> {
        spec.validate()?;
        let mut args = strings(&["-y", "-i", "pipe:0"]);

        let mut external_inputs = Vec::new();
        let mut next_input = 1;
        for selection in &spec.subtitle_tracks {
            if let SubtitleSource::External { path, charset } = &selection.source {
                if let Some(charset) = charset {
                    args.extend(strings(&["-sub_charenc", charset]));
                }
                args.push("-i".into());
                args.push(path_arg(path));
                external_inputs.push(next_input);
                next_input += 1;
            }
        }

        args.push("-filter_complex".into());
        args.push(filter_graph(
            &spec.renditions,
            spec.thumbnail_interval_seconds,
            spec.working_frame_rate,
        ));

        let gop = gop_length(spec.effective_frame_rate(), spec.segment_duration_seconds).to_string();
        let force_keyframes = format!("expr:gte(t,n_forced*{})", spec.segment_duration_seconds);
        let mut child_playlists = Vec::new();

        for (i, rendition) in spec.renditions.iter().enumerate() {
            let dir = tree.video_dir(&rendition.key);
            let maxrate = (f64::from(rendition.bitrate_kbps) * 1.5).round() as u64;
            let bufsize = maxrate * 2;
            args.extend(strings(&["-map", &format!("[vs{i}]"), "-an", "-sn"]));
            args.extend(strings(&["-c:v", &self.profile.video_codec]));
            args.extend(self.profile.video_codec_args.iter().cloned());
            args.extend(strings(&[
                "-bf",
                "0",
                "-b:v",
                &format!("{}k", rendition.bitrate_kbps),
                "-maxrate",
                &format!("{maxrate}k"),
                "-bufsize",
                &format!("{bufsize}k"),
                "-pix_fmt",
                "yuv420p",
                "-g",
                &gop,
                "-keyint_min",
                &gop,
                "-sc_threshold",
                "0",
                "-force_key_frames",
                &force_keyframes,
                "-max_muxing_queue_size",
                "9999",
            ]));
            child_playlists.push(self.push_hls_output(&mut args, &dir, spec.segment_duration_seconds));
        }

        let mut audio_entries = Vec::new();
        let audio_bitrate = format!("{}k", self.profile.audio_bitrate_kbps);
        for audio in &spec.audio_tracks {
            let dir = tree.audio_dir(&audio.lang);
            args.extend(strings(&[
                "-map",
                &format!("0:{}", audio.stream_index),
                "-vn",
                "-sn",
                "-dn",
                "-c:a",
                "aac",
                "-b:a",
                &audio_bitrate,
                "-ac",
                "2",
            ]));
            child_playlists.push(self.push_hls_output(&mut args, &dir, spec.segment_duration_seconds));
            audio_entries.push(AudioEntry {
                lang: audio.lang.clone(),
                name: audio.name.clone(),
            });
        }

        let mut subtitle_entries = Vec::new();
        let mut external_iter = external_inputs.into_iter();
        let ordered = spec
            .subtitle_tracks
            .iter()
            .filter(|s| !s.is_external())
            .chain(spec.subtitle_tracks.iter().filter(|s| s.is_external()));
        for selection in ordered {
            let map = match &selection.source {
                SubtitleSource::Internal { stream_index } => format!("0:{stream_index}"),
                SubtitleSource::External { .. } => match external_iter.next() {
                    Some(input) => format!("{input}:0"),
                    None => continue,
                },
            };
            let external = selection.is_external();
            let playlist = tree.subtitle_playlist(&selection.lang, external);
            args.extend(strings(&[
                "-map",
                &map,
                "-c:s",
                "webvtt",
                "-f",
                "segment",
                "-segment_time",
                &self.profile.subtitle_segment_seconds.to_string(),
                "-segment_list",
                &path_arg(&playlist),
                "-segment_list_type",
                "m3u8",
                "-segment_format",
                "webvtt",
                &path_arg(&tree.subtitle_segment_pattern(&selection.lang, external)),
            ]));
            subtitle_entries.push(SubtitleEntry {
                lang: selection.lang.clone(),
                name: selection.name.clone(),
                uri: format!("subs/{}.m3u8", OutputTree::subtitle_stem(&selection.lang, external)),
                default: selection.default,
            });
            child_playlists.push(playlist);
        }

        args.extend(strings(&["-map", "[thumbs]", "-q:v", "3"]));
        args.push(path_arg(&tree.thumbnail_pattern()));

        Ok(EncodeCommand {
            args,
            child_playlists,
            audio_entries,
            subtitle_entries,
        })
    }

    fn push_hls_output(&self, args: &mut Vec<String>, dir: &Path, segment_seconds: u32) -> PathBuf {
        let (playlist, init, segments) = variant_files(dir);
        args.extend(strings(&[
            "-f",
            "hls",
            "-hls_time",
            &segment_seconds.to_string(),
            "-hls_playlist_type",
            "vod",
            "-hls_flags",
            "independent_segments",
            "-hls_segment_type",
            "fmp4",
            "-hls_fmp4_init_filename",
            &path_arg(&init),
            "-hls_segment_filename",
            &path_arg(&segments),
            &path_arg(&playlist),
        ]));
        playlist
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ladder::plan;

    fn profile() -> EncoderProfile {
        EncoderProfile {
            video_codec: "libx264".into(),
            video_codec_args: vec!["-preset".into(), "veryfast".into()],
            audio_bitrate_kbps: 128,
            subtitle_segment_seconds: 600,
        }
    }

    fn spec(width: u32, fps: f64) -> EncodeJobSpec {
        EncodeJobSpec {
            renditions: plan(width).renditions,
            audio_tracks: vec![AudioSelection {
                stream_index: 1,
                lang: "por".into(),
                name: "Portugues".into(),
            }],
            subtitle_tracks: vec![
                SubtitleSelection {
                    source: SubtitleSource::External {
                        path: "/uploads/en.srt".into(),
                        charset: Some("Windows-1252".into()),
                    },
                    lang: "en".into(),
                    name: "Ingles (Ext)".into(),
                    default: false,
                },
                SubtitleSelection {
                    source: SubtitleSource::Internal { stream_index: 3 },
                    lang: "por".into(),
                    name: "Portugues".into(),
                    default: true,
                },
            ],
            segment_duration_seconds: 15,
            thumbnail_interval_seconds: 10,
            source_frame_rate: fps,
            working_frame_rate: working_frame_rate(fps),
        }
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Vec<&'a str> {
        args.windows(2)
            .filter(|pair| pair[0] == flag)
            .map(|pair| pair[1].as_str())
            .collect()
    }

    #[test]
    fn gop_derivation() {
        assert_eq!(gop_length(24.0, 15), 360);
        assert_eq!(gop_length(0.1, 15), 24);
        assert_eq!(gop_length(1000.0, 15), 600);
        assert_eq!(gop_length(f64::NAN, 15), 24);
        assert_eq!(gop_length(29.97, 15), 450);
    }

    #[test]
    fn high_frame_rates_are_normalized() {
        assert_eq!(working_frame_rate(59.94), Some(30));
        assert_eq!(working_frame_rate(31.0), None);
        assert_eq!(working_frame_rate(24.0), None);
    }

    #[test]
    fn filter_graph_branches() {
        assert_eq!(
            filter_graph(&plan(3840).renditions, 10, Some(30)),
            "[0:v]format=yuv420p,setpts=PTS-STARTPTS,fps=30,split=3[v0][v1][vthumb];\
             [v0]scale=1920:-2:flags=bilinear[vs0];\
             [v1]scale=3840:-2:flags=bilinear[vs1];\
             [vthumb]fps=1/10,scale=320:-1:flags=lanczos[thumbs]"
        );
        assert!(filter_graph(&plan(1920).renditions, 10, None)
            .starts_with("[0:v]format=yuv420p,setpts=PTS-STARTPTS,split=2[v0][vthumb];"));
    }

    #[test]
    fn rate_control_and_keyframes() {
        let tree = OutputTree::new("/out");
        let command = EncodeJobBuilder::new(profile()).build(&spec(3840, 60.0), &tree).unwrap();
        let args = &command.args;
        assert_eq!(&args[..3], ["-y", "-i", "pipe:0"]);
        assert_eq!(value_after(args, "-b:v"), ["8000k", "15000k"]);
        assert_eq!(value_after(args, "-maxrate"), ["12000k", "22500k"]);
        assert_eq!(value_after(args, "-bufsize"), ["24000k", "45000k"]);
        // 60 fps source is encoded at 30, so 30 * 15
        assert_eq!(value_after(args, "-g"), ["450", "450"]);
        assert_eq!(value_after(args, "-bf"), ["0", "0"]);
        assert_eq!(
            value_after(args, "-force_key_frames"),
            ["expr:gte(t,n_forced*15)", "expr:gte(t,n_forced*15)"]
        );
        assert_eq!(value_after(args, "-preset"), ["veryfast", "veryfast"]);
        assert_eq!(value_after(args, "-b:a"), ["128k"]);
        assert!(args.contains(&"/out/video/2160p/chunk_%05d.m4s".to_string()));
        assert!(args.contains(&"/out/audio-por/index.m3u8".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("/out/thumbs/thumb_%05d.jpg"));
    }

    #[test]
    fn subtitle_inputs_and_outputs() {
        let tree = OutputTree::new("/out");
        let command = EncodeJobBuilder::new(profile()).build(&spec(1920, 24.0), &tree).unwrap();
        let args = &command.args;
        assert_eq!(
            &args[3..7],
            ["-sub_charenc", "Windows-1252", "-i", "/uploads/en.srt"]
        );
        let maps = value_after(args, "-map");
        assert_eq!(maps, ["[vs0]", "0:1", "0:3", "1:0", "[thumbs]"]);
        assert_eq!(value_after(args, "-segment_time"), ["600", "600"]);
        assert_eq!(
            value_after(args, "-segment_list"),
            ["/out/subs/subs-por-int.m3u8", "/out/subs/subs-en-ext.m3u8"]
        );
        let uris: Vec<_> = command.subtitle_entries.iter().map(|s| s.uri.as_str()).collect();
        assert_eq!(uris, ["subs/subs-por-int.m3u8", "subs/subs-en-ext.m3u8"]);
        assert!(command.subtitle_entries[0].default);
        assert_eq!(command.child_playlists.len(), 4);
        assert_eq!(command.audio_entries[0].lang, "por");
    }

    #[test]
    fn repeated_audio_language_is_rejected() {
        let mut spec = spec(1920, 24.0);
        spec.audio_tracks.push(AudioSelection {
            stream_index: 2,
            lang: "por".into(),
            name: "Portugues (Comentario)".into(),
        });
        let err = EncodeJobBuilder::new(profile())
            .build(&spec, &OutputTree::new("/out"))
            .unwrap_err();
        match err {
            EncodeError::DuplicateTrack { kind, lang } => {
                assert_eq!(kind, "audio");
                assert_eq!(lang, "por");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn subtitle_language_may_repeat_across_origins_only() {
        let mut spec = spec(1920, 24.0);
        // "por" already exists as an internal track
        spec.subtitle_tracks.push(SubtitleSelection {
            source: SubtitleSource::External {
                path: "/uploads/pt.srt".into(),
                charset: None,
            },
            lang: "por".into(),
            name: "Portugues (Ext)".into(),
            default: false,
        });
        let tree = OutputTree::new("/out");
        let builder = EncodeJobBuilder::new(profile());
        assert!(builder.build(&spec, &tree).is_ok());

        spec.subtitle_tracks.push(SubtitleSelection {
            source: SubtitleSource::Internal { stream_index: 4 },
            lang: "por".into(),
            name: "Portugues (Forcada)".into(),
            default: false,
        });
        let err = builder.build(&spec, &tree).unwrap_err();
        assert!(matches!(
            err,
            EncodeError::DuplicateTrack { kind: "internal subtitle", ref lang } if lang == "por"
        ));
    }
}
