//! Manifests for OTF (on-the-fly segmented) streams

use super::mpd::{self, write_manifest};
use super::probe::{fetch_probe, strip_probe_params};
use super::timeline::SegmentPlan;
use crate::error::ResolveError;
use crate::platform::client::Fetcher;
use crate::platform::formats::FormatDescriptor;
use tokio::time::Instant;
use tracing::debug;

/// Probe an OTF stream and build a segment-template manifest for it
///
/// `duration_ms` is only used when the probe lists no usable durations.
pub async fn synthesize_otf_manifest(
    fetcher: &dyn Fetcher,
    url: &str,
    format: &FormatDescriptor,
    duration_ms: u64,
    deadline: Instant,
) -> Result<String, ResolveError> {
    let response = fetch_probe(fetcher, url, deadline).await?;
    let base_url = strip_probe_params(&response.final_url);

    let plan = SegmentPlan::parse(&response.body).map_err(|e| ResolveError::ProbeFailed {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    debug!(
        "OTF stream {} has {} segments in {} runs",
        format.id,
        plan.segment_count(),
        plan.runs().len()
    );

    let total = match plan.total_duration_ms() {
        0 => duration_ms,
        total => total,
    };
    let initialization = format!("{}&sq=0", base_url);
    let media = format!("{}&sq=$Number$", base_url);

    write_manifest(format, total, |writer| {
        mpd::start(
            writer,
            "SegmentTemplate",
            &[
                ("startNumber", "1"),
                ("timescale", "1000"),
                ("initialization", &initialization),
                ("media", &media),
            ],
        )?;
        plan.write_timeline(writer)?;
        mpd::end(writer, "SegmentTemplate")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dash::mpd::tests::{attribute, elements};
    use crate::dash::probe::tests::{deadline, ProbeFetcher};
    use crate::platform::formats::lookup;

    const URL: &str = "https://rr3.example.com/videoplayback?itag=137&otf=1&c=ANDROID";
    const PROBE: &str = "https://rr3.example.com/videoplayback?itag=137&otf=1&c=ANDROID&sq=0&rn=0";

    fn probe_body(durations: &str) -> String {
        format!("ftyp\r\nSequence-Number: 0\r\nSegment-Durations-Ms: {}\r\nPadding: x\r\n", durations)
    }

    #[tokio::test]
    async fn test_otf_manifest_uses_compressed_timeline() {
        let fetcher = ProbeFetcher::default().respond(PROBE, "video/mp4", &probe_body("5000(r=39),"));
        let format = lookup(137).unwrap();

        let xml = synthesize_otf_manifest(&fetcher, URL, &format, 1, deadline())
            .await
            .unwrap();
        let found = elements(&xml);

        assert!(xml.contains(r#"<SegmentTimeline><S d="5000" r="39"/></SegmentTimeline>"#));
        assert_eq!(found.iter().filter(|(name, _)| name == "S").count(), 1);
        assert_eq!(attribute(&found, "MPD", "mediaPresentationDuration"), Some("PT200.000S"));
        assert_eq!(attribute(&found, "SegmentTemplate", "startNumber"), Some("1"));
        assert_eq!(attribute(&found, "SegmentTemplate", "timescale"), Some("1000"));
        assert_eq!(
            attribute(&found, "SegmentTemplate", "initialization"),
            Some("https://rr3.example.com/videoplayback?itag=137&otf=1&c=ANDROID&sq=0")
        );
        assert_eq!(
            attribute(&found, "SegmentTemplate", "media"),
            Some("https://rr3.example.com/videoplayback?itag=137&otf=1&c=ANDROID&sq=$Number$")
        );
    }

    #[tokio::test]
    async fn test_otf_manifest_follows_web_redirects() {
        let web = "https://rr3.example.com/videoplayback?itag=140&c=WEB";
        let moved = "https://rr9.example.com/videoplayback?itag=140&c=WEB&sq=0&rn=0&alr=yes";
        let fetcher = ProbeFetcher::default()
            .respond(&format!("{}&sq=0&rn=0&alr=yes", web), "text/plain", moved)
            .respond(moved, "audio/mp4", &probe_body("5000,5000,4000,1500"));
        let format = lookup(140).unwrap();

        let xml = synthesize_otf_manifest(&fetcher, web, &format, 1, deadline())
            .await
            .unwrap();
        let found = elements(&xml);

        assert_eq!(
            attribute(&found, "SegmentTemplate", "media"),
            Some("https://rr9.example.com/videoplayback?itag=140&c=WEB&sq=$Number$")
        );
        let runs: Vec<_> = found.iter().filter(|(name, _)| name == "S").collect();
        assert_eq!(runs.len(), 3);
        assert_eq!(attribute(&found, "MPD", "mediaPresentationDuration"), Some("PT15.500S"));
    }

    #[tokio::test]
    async fn test_otf_manifest_is_deterministic() {
        let fetcher = ProbeFetcher::default().respond(PROBE, "video/mp4", &probe_body("5000(r=2),3000"));
        let format = lookup(137).unwrap();
        let first = synthesize_otf_manifest(&fetcher, URL, &format, 1, deadline()).await;
        let second = synthesize_otf_manifest(&fetcher, URL, &format, 1, deadline()).await;
        assert_eq!(first.unwrap(), second.unwrap());
    }

    #[tokio::test]
    async fn test_zero_length_plan_uses_estimate() {
        let fetcher = ProbeFetcher::default().respond(PROBE, "video/mp4", &probe_body("0(r=3)"));
        let format = lookup(137).unwrap();
        let xml = synthesize_otf_manifest(&fetcher, URL, &format, 42_000, deadline())
            .await
            .unwrap();
        assert!(xml.contains(r#"mediaPresentationDuration="PT42.000S""#));
    }

    #[tokio::test]
    async fn test_probe_errors() {
        let format = lookup(137).unwrap();

        let denied = ProbeFetcher::default().fail(PROBE, 404);
        let err = synthesize_otf_manifest(&denied, URL, &format, 1, deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::ProbeFailed { .. }));

        let garbled = ProbeFetcher::default().respond(PROBE, "video/mp4", "no durations");
        let err = synthesize_otf_manifest(&garbled, URL, &format, 1, deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::ProbeFailed { .. }));
    }

    #[tokio::test]
    async fn test_overflowing_segment_counts_fail_the_stream() {
        let format = lookup(137).unwrap();
        for durations in ["5000(r=18446744073709551615)", "4294967296(r=4294967296)"] {
            let fetcher = ProbeFetcher::default().respond(PROBE, "video/mp4", &probe_body(durations));
            let err = synthesize_otf_manifest(&fetcher, URL, &format, 1, deadline())
                .await
                .unwrap_err();
            assert!(matches!(err, ResolveError::ProbeFailed { .. }), "{}: {:?}", durations, err);
        }
    }
}
