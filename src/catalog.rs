use std::collections::HashMap;

use crate::extractor::{StreamDescriptor, StreamKind};

/// Container the synthesized audio conversion options target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioTarget {
    Mp3,
    Aac,
}

impl AudioTarget {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioTarget::Mp3 => "mp3",
            AudioTarget::Aac => "aac",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AudioTarget::Mp3 => "mp3",
            AudioTarget::Aac => "aac",
        }
    }
}

/// A transcode not yet performed: a menu entry promising to convert
/// `source` into `target` after download. Size and bitrate are inherited
/// from the source stream as an approximation.
#[derive(Debug, Clone)]
pub struct VirtualAudioOption {
    pub source: StreamDescriptor,
    pub target: AudioTarget,
    pub bitrate_label: String,
    pub filesize: u64,
}

/// One selectable menu entry, matched exhaustively wherever a selection
/// is consumed.
#[derive(Debug, Clone)]
pub enum SelectableOption {
    Direct(StreamDescriptor),
    Virtual(VirtualAudioOption),
}

impl SelectableOption {
    pub fn filesize(&self) -> u64 {
        match self {
            SelectableOption::Direct(d) => d.filesize,
            SelectableOption::Virtual(v) => v.filesize,
        }
    }
}

/// Ranked, deduplicated menu of selectable options. The user-facing
/// index is 1-based over the concatenation of `video` and `audio`, and
/// stable for the lifetime of a session.
#[derive(Debug, Clone, Default)]
pub struct StreamMenu {
    pub video: Vec<SelectableOption>,
    pub audio: Vec<SelectableOption>,
    /// Highest-bitrate audio-only stream, used as the merge track for
    /// adaptive video selections. First seen wins on ties.
    pub best_audio: Option<StreamDescriptor>,
}

impl StreamMenu {
    pub fn len(&self) -> usize {
        self.video.len() + self.audio.len()
    }

    pub fn is_empty(&self) -> bool {
        self.video.is_empty() && self.audio.is_empty()
    }

    /// Look up a 1-based menu index.
    pub fn get(&self, index: usize) -> Option<&SelectableOption> {
        let i = index.checked_sub(1)?;
        if i < self.video.len() {
            self.video.get(i)
        } else {
            self.audio.get(i - self.video.len())
        }
    }

    /// Quality label for the video option at 0-based `pos`. The first
    /// menu entry gets a "+" suffix when it is the primary 1080p variant.
    pub fn video_quality_label(&self, pos: usize) -> String {
        match self.video.get(pos) {
            Some(SelectableOption::Direct(d)) => {
                if pos == 0 && d.quality == "1080p" {
                    format!("{}+", d.quality)
                } else {
                    d.quality.clone()
                }
            }
            _ => String::new(),
        }
    }

    /// Quality label for the audio option at 0-based `pos` within the
    /// audio section. Raw streams with no reported bitrate display the
    /// extractor's usual default.
    pub fn audio_quality_label(&self, pos: usize) -> String {
        match self.audio.get(pos) {
            Some(SelectableOption::Direct(d)) => {
                if d.quality.is_empty() {
                    "128kbps".to_string()
                } else {
                    d.quality.clone()
                }
            }
            Some(SelectableOption::Virtual(v)) => v.bitrate_label.clone(),
            None => String::new(),
        }
    }
}

const PRIMARY_1080P_KEY: &str = "1080p_hd";
const SECONDARY_1080P_KEY: &str = "1080p";

/// Normalizes the raw descriptor list into a ranked, deduplicated menu.
///
/// Video streams keep one entry per resolution (first encountered),
/// except 1080p which keeps up to two: the first seen as the primary
/// "+" variant and a later, smaller-file alternative as the secondary.
/// Audio streams are bucketed by rounded bitrate (smallest file wins a
/// bucket) and each retained bucket spawns virtual MP3 and AAC
/// conversion entries. With `include_lower_codecs` false, webm video is
/// dropped and the audio section collapses to the two conversion
/// entries of the best bucket; with it true, raw audio entries stay
/// individually selectable and conversions are appended after them.
pub fn build_menu(streams: &[StreamDescriptor], include_lower_codecs: bool) -> StreamMenu {
    let mut video_by_key: HashMap<String, StreamDescriptor> = HashMap::new();
    let mut raw_audio: Vec<StreamDescriptor> = Vec::new();
    let mut best_audio: Option<StreamDescriptor> = None;

    for stream in streams {
        match stream.kind {
            StreamKind::Video => {
                if !include_lower_codecs && stream.container == "webm" {
                    continue;
                }
                if stream.quality == SECONDARY_1080P_KEY {
                    match video_by_key.get(PRIMARY_1080P_KEY) {
                        None => {
                            video_by_key.insert(PRIMARY_1080P_KEY.to_string(), stream.clone());
                        }
                        Some(primary) if stream.filesize < primary.filesize => {
                            video_by_key.insert(SECONDARY_1080P_KEY.to_string(), stream.clone());
                        }
                        Some(_) => {}
                    }
                } else if !video_by_key.contains_key(&stream.quality) {
                    video_by_key.insert(stream.quality.clone(), stream.clone());
                }
            }
            StreamKind::Audio => {
                let is_better = match (&best_audio, stream.bitrate()) {
                    (None, _) => true,
                    (Some(best), Some(bitrate)) => {
                        best.bitrate().map_or(false, |current| bitrate > current)
                    }
                    _ => false,
                };
                if is_better {
                    best_audio = Some(stream.clone());
                }
                raw_audio.push(stream.clone());
            }
        }
    }

    // Numeric resolution descending; the primary 1080p key sorts before
    // the plain one.
    let mut video_keys: Vec<String> = video_by_key.keys().cloned().collect();
    video_keys.sort_by_key(|key| {
        (
            crate::utils::digit_value(key).unwrap_or(0),
            key.contains("hd"),
        )
    });
    video_keys.reverse();
    let video: Vec<SelectableOption> = video_keys
        .iter()
        .filter_map(|key| video_by_key.remove(key))
        .map(SelectableOption::Direct)
        .collect();

    // Bucket audio by rounded bitrate, smallest file per bucket.
    let mut buckets: HashMap<u64, StreamDescriptor> = HashMap::new();
    for stream in &raw_audio {
        let bitrate = stream.bitrate().unwrap_or(128);
        match buckets.get(&bitrate) {
            Some(kept) if stream.filesize >= kept.filesize => {}
            _ => {
                buckets.insert(bitrate, stream.clone());
            }
        }
    }
    let mut bitrates: Vec<u64> = buckets.keys().copied().collect();
    bitrates.sort_unstable_by(|a, b| b.cmp(a));
    let ranked_audio: Vec<StreamDescriptor> = bitrates
        .iter()
        .filter_map(|bitrate| buckets.remove(bitrate))
        .collect();

    let mut audio: Vec<SelectableOption> = Vec::new();
    if best_audio.is_some() {
        let mut conversions = Vec::new();
        for source in &ranked_audio {
            let bitrate_label = if source.quality.is_empty() {
                "160kbps".to_string()
            } else {
                source.quality.clone()
            };
            for target in [AudioTarget::Mp3, AudioTarget::Aac] {
                conversions.push(SelectableOption::Virtual(VirtualAudioOption {
                    source: source.clone(),
                    target,
                    bitrate_label: bitrate_label.clone(),
                    filesize: source.filesize,
                }));
            }
        }
        if include_lower_codecs {
            audio.extend(ranked_audio.into_iter().map(SelectableOption::Direct));
            audio.extend(conversions);
        } else {
            // Only the best bucket's mp3 + aac pair.
            conversions.truncate(2);
            audio = conversions;
        }
    }

    StreamMenu {
        video,
        audio,
        best_audio,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{audio_desc, video_desc};

    const MB: u64 = 1024 * 1024;

    #[test]
    fn keeps_two_1080p_entries_primary_first() {
        // Scenario: two adaptive 1080p files plus a 720p one.
        let streams = vec![
            video_desc("1080p", "mp4", 50 * MB, false),
            video_desc("1080p", "mp4", 40 * MB, false),
            video_desc("720p", "mp4", 30 * MB, false),
        ];
        let menu = build_menu(&streams, false);

        assert_eq!(menu.video.len(), 3);
        assert_eq!(menu.video_quality_label(0), "1080p+");
        assert_eq!(menu.video[0].filesize(), 50 * MB);
        assert_eq!(menu.video_quality_label(1), "1080p");
        assert_eq!(menu.video[1].filesize(), 40 * MB);
        assert_eq!(menu.video_quality_label(2), "720p");
        assert_eq!(menu.video[2].filesize(), 30 * MB);
    }

    #[test]
    fn larger_second_1080p_is_discarded() {
        let streams = vec![
            video_desc("1080p", "mp4", 40 * MB, false),
            video_desc("1080p", "mp4", 50 * MB, false),
        ];
        let menu = build_menu(&streams, false);
        assert_eq!(menu.video.len(), 1);
        assert_eq!(menu.video[0].filesize(), 40 * MB);
    }

    #[test]
    fn other_resolutions_keep_first_seen_only() {
        let streams = vec![
            video_desc("720p", "mp4", 30 * MB, false),
            video_desc("720p", "mp4", 10 * MB, false),
            video_desc("360p", "mp4", 5 * MB, true),
        ];
        let menu = build_menu(&streams, false);
        assert_eq!(menu.video.len(), 2);
        assert_eq!(menu.video[0].filesize(), 30 * MB);
        assert_eq!(menu.video_quality_label(1), "360p");
    }

    #[test]
    fn webm_video_is_dropped_unless_lower_codecs_included() {
        let streams = vec![
            video_desc("720p", "webm", 20 * MB, false),
            video_desc("480p", "mp4", 10 * MB, false),
        ];
        let menu = build_menu(&streams, false);
        assert_eq!(menu.video.len(), 1);
        assert_eq!(menu.video_quality_label(0), "480p");

        let menu = build_menu(&streams, true);
        assert_eq!(menu.video.len(), 2);
        assert_eq!(menu.video_quality_label(0), "720p");
    }

    #[test]
    fn audio_collapses_to_best_bucket_conversions() {
        // Scenario: two 128kbps files and one 160kbps; menu keeps the
        // smallest file per bucket and offers mp3+aac of the top bucket.
        let streams = vec![
            audio_desc("128kbps", 5 * MB),
            audio_desc("160kbps", 4 * MB),
            audio_desc("128kbps", 6 * MB),
        ];
        let menu = build_menu(&streams, false);

        assert_eq!(menu.audio.len(), 2);
        for (pos, expected_target) in [(0, AudioTarget::Mp3), (1, AudioTarget::Aac)] {
            match &menu.audio[pos] {
                SelectableOption::Virtual(v) => {
                    assert_eq!(v.target, expected_target);
                    assert_eq!(v.bitrate_label, "160kbps");
                    assert_eq!(v.filesize, 4 * MB);
                }
                other => panic!("expected virtual option, got {:?}", other),
            }
        }
    }

    #[test]
    fn verbose_audio_appends_conversions_after_raw_entries() {
        let streams = vec![audio_desc("160kbps", 4 * MB), audio_desc("128kbps", 5 * MB)];
        let menu = build_menu(&streams, true);

        // Two raw buckets then mp3+aac per bucket.
        assert_eq!(menu.audio.len(), 6);
        assert!(matches!(menu.audio[0], SelectableOption::Direct(_)));
        assert!(matches!(menu.audio[1], SelectableOption::Direct(_)));
        assert_eq!(menu.audio_quality_label(0), "160kbps");
        assert_eq!(menu.audio_quality_label(1), "128kbps");
        assert!(matches!(menu.audio[2], SelectableOption::Virtual(_)));
        assert_eq!(menu.audio_quality_label(2), "160kbps");
        assert_eq!(menu.audio_quality_label(4), "128kbps");
    }

    #[test]
    fn bucket_count_matches_distinct_bitrates() {
        let streams = vec![
            audio_desc("128kbps", 5 * MB),
            audio_desc("128kbps", 4 * MB),
            audio_desc("160kbps", 6 * MB),
            audio_desc("50kbps", 1 * MB),
        ];
        let menu = build_menu(&streams, true);
        let raw: Vec<_> = menu
            .audio
            .iter()
            .filter(|o| matches!(o, SelectableOption::Direct(_)))
            .collect();
        assert_eq!(raw.len(), 3);
        // Smallest file won the 128 bucket.
        assert_eq!(raw[1].filesize(), 4 * MB);
    }

    #[test]
    fn best_audio_is_highest_bitrate_first_seen() {
        let streams = vec![
            audio_desc("128kbps", 5 * MB),
            audio_desc("160kbps", 9 * MB),
            audio_desc("160kbps", 2 * MB),
        ];
        let menu = build_menu(&streams, true);
        let best = menu.best_audio.expect("best audio");
        assert_eq!(best.quality, "160kbps");
        assert_eq!(best.filesize, 9 * MB);
    }

    #[test]
    fn build_menu_is_idempotent() {
        let streams = vec![
            video_desc("1080p", "mp4", 50 * MB, false),
            video_desc("1080p", "mp4", 40 * MB, false),
            video_desc("720p", "webm", 30 * MB, false),
            audio_desc("128kbps", 5 * MB),
            audio_desc("160kbps", 4 * MB),
        ];
        let first = build_menu(&streams, true);
        let second = build_menu(&streams, true);

        assert_eq!(first.len(), second.len());
        for index in 1..=first.len() {
            let (a, b) = (first.get(index), second.get(index));
            match (a, b) {
                (Some(SelectableOption::Direct(x)), Some(SelectableOption::Direct(y))) => {
                    assert_eq!(x.id, y.id);
                    assert_eq!(x.quality, y.quality);
                }
                (Some(SelectableOption::Virtual(x)), Some(SelectableOption::Virtual(y))) => {
                    assert_eq!(x.target, y.target);
                    assert_eq!(x.bitrate_label, y.bitrate_label);
                }
                other => panic!("menus diverge at {}: {:?}", index, other),
            }
        }
    }

    #[test]
    fn empty_descriptor_list_yields_empty_menu() {
        let menu = build_menu(&[], false);
        assert!(menu.is_empty());
        assert!(menu.get(1).is_none());
        assert!(menu.best_audio.is_none());
    }

    #[test]
    fn one_based_indexing_spans_video_then_audio() {
        let streams = vec![
            video_desc("720p", "mp4", 30 * MB, true),
            audio_desc("128kbps", 5 * MB),
        ];
        let menu = build_menu(&streams, false);
        assert_eq!(menu.len(), 3); // 720p + mp3 + aac

        assert!(matches!(menu.get(1), Some(SelectableOption::Direct(_))));
        assert!(matches!(menu.get(2), Some(SelectableOption::Virtual(_))));
        assert!(matches!(menu.get(3), Some(SelectableOption::Virtual(_))));
        assert!(menu.get(0).is_none());
        assert!(menu.get(4).is_none());
    }
}
