//! DASH manifest synthesis for streams the player cannot address directly

pub mod mpd;
pub mod otf;
pub mod post_live;
pub mod probe;
pub mod progressive;
pub mod timeline;

pub use mpd::format_duration;
pub use otf::synthesize_otf_manifest;
pub use post_live::synthesize_post_live_dvr_manifest;
pub use progressive::synthesize_progressive_manifest;
pub use timeline::SegmentPlan;
