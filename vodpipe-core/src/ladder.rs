use serde::Serialize;

/// Sources at least this wide get a 2160p rendition.
pub const TRUE_4K_MIN_WIDTH: u32 = 3000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenditionSpec {
    pub key: String,
    pub width: u32,
    pub height: u32,
    pub bitrate_kbps: u32,
}

impl RenditionSpec {
    fn new(key: &str, width: u32, height: u32, bitrate_kbps: u32) -> Self {
        Self {
            key: key.to_string(),
            width,
            height,
            bitrate_kbps,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenditionLadder {
    pub renditions: Vec<RenditionSpec>,
    pub is_source_true_4k: bool,
}

/// Always 1080p; 2160p only when the source really is 4K.
pub fn plan(source_width: u32) -> RenditionLadder {
    let is_source_true_4k = source_width >= TRUE_4K_MIN_WIDTH;
    let mut renditions = vec![RenditionSpec::new("1080p", 1920, 1080, 8_000)];
    if is_source_true_4k {
        renditions.push(RenditionSpec::new("2160p", 3840, 2160, 15_000));
    }
    RenditionLadder {
        renditions,
        is_source_true_4k,
    }
}
