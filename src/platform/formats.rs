//! Format registry: static metadata for the platform's stream format ids (itags)

use crate::error::ResolveError;
use std::fmt;
use std::str::FromStr;

/// Coarse kind of media a format carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    AudioOnly,
    VideoOnly,
    /// Audio and video in one file
    Muxed,
}

impl MediaType {
    pub fn has_video(&self) -> bool {
        !matches!(self, MediaType::AudioOnly)
    }

    pub fn has_audio(&self) -> bool {
        !matches!(self, MediaType::VideoOnly)
    }
}

/// Container of a format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Container {
    Mp4,
    WebM,
    ThreeGp,
}

impl Container {
    /// MIME type for a stream of this container carrying `media_type`
    pub fn mime_type(&self, media_type: MediaType) -> &'static str {
        match (self, media_type) {
            (Container::Mp4, MediaType::AudioOnly) => "audio/mp4",
            (Container::Mp4, _) => "video/mp4",
            (Container::WebM, MediaType::AudioOnly) => "audio/webm",
            (Container::WebM, _) => "video/webm",
            (Container::ThreeGp, _) => "video/3gpp",
        }
    }
}

/// Inclusive byte range inside a stream, rendered as `start-end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for ByteRange {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ResolveError::Manifest(format!("invalid byte range: {}", s));
        let (start, end) = s.split_once('-').ok_or_else(invalid)?;
        let start: u64 = start.trim().parse().map_err(|_| invalid())?;
        let end: u64 = end.trim().parse().map_err(|_| invalid())?;
        if end < start {
            return Err(invalid());
        }
        Ok(Self { start, end })
    }
}

/// Metadata for one stream format
///
/// Registry entries are `'static`; byte ranges and measured values reported
/// for a particular stream are attached to a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub id: u32,
    pub media_type: MediaType,
    pub container: Container,
    pub codec: &'static str,
    /// Average bitrate in kbit/s
    pub bitrate_hint: u32,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
    pub audio_channels: Option<u32>,
    pub audio_sample_rate: Option<u32>,
    pub index_range: Option<ByteRange>,
    pub init_range: Option<ByteRange>,
}

impl FormatDescriptor {
    const fn muxed(
        id: u32,
        container: Container,
        codec: &'static str,
        bitrate_hint: u32,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            id,
            media_type: MediaType::Muxed,
            container,
            codec,
            bitrate_hint,
            width: Some(width),
            height: Some(height),
            fps: Some(30),
            audio_channels: Some(2),
            audio_sample_rate: Some(44100),
            index_range: None,
            init_range: None,
        }
    }

    const fn video(
        id: u32,
        container: Container,
        codec: &'static str,
        bitrate_hint: u32,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Self {
        Self {
            id,
            media_type: MediaType::VideoOnly,
            container,
            codec,
            bitrate_hint,
            width: Some(width),
            height: Some(height),
            fps: Some(fps),
            audio_channels: None,
            audio_sample_rate: None,
            index_range: None,
            init_range: None,
        }
    }

    const fn audio(
        id: u32,
        container: Container,
        codec: &'static str,
        bitrate_hint: u32,
        channels: u32,
        sample_rate: u32,
    ) -> Self {
        Self {
            id,
            media_type: MediaType::AudioOnly,
            container,
            codec,
            bitrate_hint,
            width: None,
            height: None,
            fps: None,
            audio_channels: Some(channels),
            audio_sample_rate: Some(sample_rate),
            index_range: None,
            init_range: None,
        }
    }

    /// Copy with the per-stream index and initialization ranges attached
    pub fn with_ranges(mut self, init_range: ByteRange, index_range: ByteRange) -> Self {
        self.init_range = Some(init_range);
        self.index_range = Some(index_range);
        self
    }

    /// Copy with the measured average bitrate in kbit/s
    pub fn with_bitrate(mut self, kbps: u32) -> Self {
        self.bitrate_hint = kbps;
        self
    }

    /// MIME type used for the manifest's adaptation set
    pub fn mime_type(&self) -> &'static str {
        self.container.mime_type(self.media_type)
    }

    /// Bandwidth in bit/s
    pub fn bandwidth(&self) -> u64 {
        u64::from(self.bitrate_hint) * 1000
    }
}

use Container::{Mp4, ThreeGp, WebM};

static FORMATS: &[FormatDescriptor] = &[
    // Muxed
    FormatDescriptor::muxed(17, ThreeGp, "mp4v.20.3", 50, 176, 144),
    FormatDescriptor::muxed(36, ThreeGp, "mp4v.20.3", 175, 320, 240),
    FormatDescriptor::muxed(18, Mp4, "avc1.42001E", 500, 640, 360),
    FormatDescriptor::muxed(34, Mp4, "avc1.4D401E", 500, 640, 360),
    FormatDescriptor::muxed(35, Mp4, "avc1.4D401E", 800, 854, 480),
    FormatDescriptor::muxed(59, Mp4, "avc1.4D401F", 800, 854, 480),
    FormatDescriptor::muxed(78, Mp4, "avc1.4D401F", 800, 854, 480),
    FormatDescriptor::muxed(22, Mp4, "avc1.64001F", 2000, 1280, 720),
    FormatDescriptor::muxed(37, Mp4, "avc1.640028", 3000, 1920, 1080),
    FormatDescriptor::muxed(38, Mp4, "avc1.640032", 4500, 4096, 3072),
    FormatDescriptor::muxed(43, WebM, "vp8.0", 500, 640, 360),
    FormatDescriptor::muxed(44, WebM, "vp8.0", 1000, 854, 480),
    FormatDescriptor::muxed(45, WebM, "vp8.0", 2000, 1280, 720),
    FormatDescriptor::muxed(46, WebM, "vp8.0", 3000, 1920, 1080),
    // Audio only
    FormatDescriptor::audio(139, Mp4, "mp4a.40.5", 48, 2, 22050),
    FormatDescriptor::audio(140, Mp4, "mp4a.40.2", 128, 2, 44100),
    FormatDescriptor::audio(141, Mp4, "mp4a.40.2", 256, 2, 44100),
    FormatDescriptor::audio(256, Mp4, "mp4a.40.5", 192, 6, 44100),
    FormatDescriptor::audio(258, Mp4, "mp4a.40.2", 384, 6, 48000),
    FormatDescriptor::audio(171, WebM, "vorbis", 128, 2, 44100),
    FormatDescriptor::audio(172, WebM, "vorbis", 256, 2, 44100),
    FormatDescriptor::audio(249, WebM, "opus", 50, 2, 48000),
    FormatDescriptor::audio(250, WebM, "opus", 70, 2, 48000),
    FormatDescriptor::audio(251, WebM, "opus", 160, 2, 48000),
    // Video only, H.264
    FormatDescriptor::video(160, Mp4, "avc1.4d400c", 110, 256, 144, 30),
    FormatDescriptor::video(133, Mp4, "avc1.4d4015", 250, 426, 240, 30),
    FormatDescriptor::video(134, Mp4, "avc1.4d401e", 600, 640, 360, 30),
    FormatDescriptor::video(135, Mp4, "avc1.4d401f", 1000, 854, 480, 30),
    FormatDescriptor::video(212, Mp4, "avc1.4d401f", 1000, 854, 480, 30),
    FormatDescriptor::video(136, Mp4, "avc1.4d401f", 1500, 1280, 720, 30),
    FormatDescriptor::video(298, Mp4, "avc1.4d4020", 3000, 1280, 720, 60),
    FormatDescriptor::video(137, Mp4, "avc1.640028", 2500, 1920, 1080, 30),
    FormatDescriptor::video(299, Mp4, "avc1.64002a", 5500, 1920, 1080, 60),
    FormatDescriptor::video(264, Mp4, "avc1.640032", 6000, 2560, 1440, 30),
    FormatDescriptor::video(266, Mp4, "avc1.640033", 12000, 3840, 2160, 30),
    // Video only, VP9
    FormatDescriptor::video(278, WebM, "vp9", 100, 256, 144, 30),
    FormatDescriptor::video(242, WebM, "vp9", 220, 426, 240, 30),
    FormatDescriptor::video(243, WebM, "vp9", 400, 640, 360, 30),
    FormatDescriptor::video(244, WebM, "vp9", 750, 854, 480, 30),
    FormatDescriptor::video(245, WebM, "vp9", 750, 854, 480, 30),
    FormatDescriptor::video(246, WebM, "vp9", 750, 854, 480, 30),
    FormatDescriptor::video(247, WebM, "vp9", 1500, 1280, 720, 30),
    FormatDescriptor::video(248, WebM, "vp9", 2500, 1920, 1080, 30),
    FormatDescriptor::video(271, WebM, "vp9", 9000, 2560, 1440, 30),
    FormatDescriptor::video(272, WebM, "vp9", 18000, 3840, 2160, 30),
    FormatDescriptor::video(302, WebM, "vp9", 2800, 1280, 720, 60),
    FormatDescriptor::video(303, WebM, "vp9", 4500, 1920, 1080, 60),
    FormatDescriptor::video(308, WebM, "vp9", 13000, 2560, 1440, 60),
    FormatDescriptor::video(313, WebM, "vp9", 18000, 3840, 2160, 30),
    FormatDescriptor::video(315, WebM, "vp9", 26000, 3840, 2160, 60),
    // Video only, AV1
    FormatDescriptor::video(394, Mp4, "av01.0.00M.08", 80, 256, 144, 30),
    FormatDescriptor::video(395, Mp4, "av01.0.00M.08", 180, 426, 240, 30),
    FormatDescriptor::video(396, Mp4, "av01.0.01M.08", 350, 640, 360, 30),
    FormatDescriptor::video(397, Mp4, "av01.0.04M.08", 650, 854, 480, 30),
    FormatDescriptor::video(398, Mp4, "av01.0.05M.08", 1300, 1280, 720, 30),
    FormatDescriptor::video(399, Mp4, "av01.0.08M.08", 2300, 1920, 1080, 30),
];

/// Look up a format by id
pub fn lookup(id: u32) -> Result<FormatDescriptor, ResolveError> {
    FORMATS
        .iter()
        .find(|format| format.id == id)
        .copied()
        .ok_or(ResolveError::FormatNotFound(id))
}

/// Check if a format id is in the registry
pub fn is_supported(id: u32) -> bool {
    FORMATS.iter().any(|format| format.id == id)
}

/// All registry entries
pub fn all() -> impl Iterator<Item = &'static FormatDescriptor> {
    FORMATS.iter()
}

/// Registry entries of one media type
pub fn by_media_type(media_type: MediaType) -> impl Iterator<Item = &'static FormatDescriptor> {
    FORMATS.iter().filter(move |format| format.media_type == media_type)
}
