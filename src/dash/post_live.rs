//! Manifests for ended livestreams still served from their DVR window

use super::mpd::{self, write_manifest};
use super::probe::{probe_error, probe_url};
use crate::error::ResolveError;
use crate::platform::client::Fetcher;
use crate::platform::formats::FormatDescriptor;
use tokio::time::Instant;
use tracing::debug;

const HEAD_TIME_MILLIS: &str = "x-head-time-millis";
const HEAD_SEQNUM: &str = "x-head-seqnum";

/// Build a manifest for a post-live stream from its head sequence headers
///
/// `target_duration_sec` is the per-segment duration advertised by the
/// stream; `duration_ms` is used when the server omits the head time.
pub async fn synthesize_post_live_dvr_manifest(
    fetcher: &dyn Fetcher,
    url: &str,
    format: &FormatDescriptor,
    target_duration_sec: u32,
    duration_ms: u64,
    deadline: Instant,
) -> Result<String, ResolveError> {
    if target_duration_sec == 0 {
        return Err(ResolveError::IncompleteMetadata {
            itag: format.id,
            missing: "target duration",
        });
    }

    let headers = fetcher
        .head(&probe_url(url), deadline)
        .await
        .map_err(|e| probe_error(url, e))?;

    let seqnum: u64 = headers
        .get(HEAD_SEQNUM)
        .and_then(|value| value.trim().parse().ok())
        .ok_or_else(|| ResolveError::ProbeFailed {
            url: url.to_string(),
            reason: "missing X-Head-Seqnum header".to_string(),
        })?;
    let total = headers
        .get(HEAD_TIME_MILLIS)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(duration_ms);
    debug!("Post-live stream {} ends at sequence {}", format.id, seqnum);

    let media = format!("{}&sq=$Number$", url);
    let d = (u64::from(target_duration_sec) * 1000).to_string();
    let r = seqnum.to_string();

    write_manifest(format, total, |writer| {
        mpd::start(
            writer,
            "SegmentTemplate",
            &[
                ("startNumber", "0"),
                ("timescale", "1000"),
                ("media", &media),
            ],
        )?;
        mpd::start(writer, "SegmentTimeline", &[])?;
        mpd::empty(writer, "S", &[("d", &d), ("r", &r)])?;
        mpd::end(writer, "SegmentTimeline")?;
        mpd::end(writer, "SegmentTemplate")
    })
}
