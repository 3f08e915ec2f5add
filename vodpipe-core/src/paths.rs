use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ladder::RenditionSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Series,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaMeta {
    pub genre: String,
    pub kind: MediaKind,
    pub title: String,
    #[serde(default)]
    pub season: Option<u32>,
    #[serde(default)]
    pub episode: Option<u32>,
    #[serde(default)]
    pub episode_name: Option<String>,
}

impl MediaMeta {
    /// Local working directory for this title under `base`.
    pub fn output_root(&self, base: &Path) -> PathBuf {
        let mut root = base
            .join(sanitize_segment(&self.genre))
            .join(match self.kind {
                MediaKind::Movie => "Filmes",
                MediaKind::Series => "Series",
            })
            .join(sanitize_segment(&self.title));
        if self.kind == MediaKind::Series {
            root.push(format!("Temporada {:02}", self.season.unwrap_or(1)));
            let episode = self
                .episode_name
                .as_deref()
                .map(sanitize_segment)
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| format!("E{:02}", self.episode.unwrap_or(0)));
            root.push(episode);
        }
        root
    }

    /// Destination prefix in object storage, without trailing slash.
    pub fn remote_prefix(&self) -> String {
        let kind = match self.kind {
            MediaKind::Movie => "Filmes",
            MediaKind::Series => "Séries",
        };
        let mut prefix = format!("{}/{}/{}", self.genre.trim(), kind, self.title.trim());
        if self.kind == MediaKind::Series {
            prefix.push_str(&format!(
                "/Temporada {:02}/Episodio {:02}",
                self.season.unwrap_or(1),
                self.episode.unwrap_or(1)
            ));
        }
        prefix
    }
}

/// Folds accents, replaces characters illegal in file names with `_` and
/// collapses whitespace.
pub fn sanitize_segment(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => out.push('_'),
            _ => match fold_diacritic(ch) {
                Some(folded) => out.push(folded),
                None if ('\u{0300}'..='\u{036f}').contains(&ch) => {}
                None => out.push(ch),
            },
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn fold_diacritic(ch: char) -> Option<char> {
    let folded = match ch {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => 'A',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'È' | 'É' | 'Ê' | 'Ë' => 'E',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'Ì' | 'Í' | 'Î' | 'Ï' => 'I',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' => 'O',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'Ù' | 'Ú' | 'Û' | 'Ü' => 'U',
        'ç' => 'c',
        'Ç' => 'C',
        'ñ' => 'n',
        'Ñ' => 'N',
        'ý' | 'ÿ' => 'y',
        'Ý' => 'Y',
        _ => return None,
    };
    Some(folded)
}

/// On-disk layout of one job's encoder output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTree {
    root: PathBuf,
}

impl OutputTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn video_dir(&self, key: &str) -> PathBuf {
        self.root.join("video").join(key)
    }

    pub fn audio_dir(&self, lang: &str) -> PathBuf {
        self.root.join(format!("audio-{lang}"))
    }

    pub fn subs_dir(&self) -> PathBuf {
        self.root.join("subs")
    }

    pub fn thumbs_dir(&self) -> PathBuf {
        self.root.join("thumbs")
    }

    pub fn subtitle_stem(lang: &str, external: bool) -> String {
        format!("subs-{lang}-{}", if external { "ext" } else { "int" })
    }

    pub fn subtitle_playlist(&self, lang: &str, external: bool) -> PathBuf {
        self.subs_dir()
            .join(format!("{}.m3u8", Self::subtitle_stem(lang, external)))
    }

    pub fn subtitle_segment_pattern(&self, lang: &str, external: bool) -> PathBuf {
        self.subs_dir()
            .join(format!("{}_%03d.vtt", Self::subtitle_stem(lang, external)))
    }

    pub fn thumbnail_pattern(&self) -> PathBuf {
        self.thumbs_dir().join("thumb_%05d.jpg")
    }

    pub fn thumbnail_vtt(&self) -> PathBuf {
        self.thumbs_dir().join("thumbnails.vtt")
    }

    pub fn master(&self) -> PathBuf {
        self.root.join("master.m3u8")
    }

    pub fn master_hd(&self) -> PathBuf {
        self.root.join("master-hd.m3u8")
    }

    pub async fn create(
        &self,
        renditions: &[RenditionSpec],
        audio_langs: &[String],
    ) -> std::io::Result<()> {
        let mut dirs = vec![self.root.clone(), self.subs_dir(), self.thumbs_dir()];
        dirs.extend(renditions.iter().map(|r| self.video_dir(&r.key)));
        dirs.extend(audio_langs.iter().map(|lang| self.audio_dir(lang)));
        for dir in dirs {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }

    pub async fn remove(&self) -> std::io::Result<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// Media playlist, init segment and segment pattern inside one variant dir.
pub fn variant_files(dir: &Path) -> (PathBuf, PathBuf, PathBuf) {
    (
        dir.join("index.m3u8"),
        dir.join("init.mp4"),
        dir.join("chunk_%05d.m4s"),
    )
}
