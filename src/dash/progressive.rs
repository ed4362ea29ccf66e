//! Manifests for single-file progressive streams

use super::mpd::{self, write_manifest};
use crate::error::ResolveError;
use crate::platform::formats::FormatDescriptor;

/// Build a manifest addressing one progressive file by byte ranges
///
/// The format must carry both its initialization and index ranges.
pub fn synthesize_progressive_manifest(
    base_url: &str,
    format: &FormatDescriptor,
    duration_ms: u64,
) -> Result<String, ResolveError> {
    let init_range = format.init_range.ok_or(ResolveError::IncompleteMetadata {
        itag: format.id,
        missing: "init_range",
    })?;
    let index_range = format.index_range.ok_or(ResolveError::IncompleteMetadata {
        itag: format.id,
        missing: "index_range",
    })?;

    let index = index_range.to_string();
    let init = init_range.to_string();
    write_manifest(format, duration_ms, |writer| {
        mpd::text_element(writer, "BaseURL", base_url)?;
        mpd::start(writer, "SegmentBase", &[("indexRange", &index)])?;
        mpd::empty(writer, "Initialization", &[("range", &init)])?;
        mpd::end(writer, "SegmentBase")
    })
}
