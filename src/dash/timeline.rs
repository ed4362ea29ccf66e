//! Run-length segment timelines

use super::mpd::{self, XmlWriter};
use crate::error::ResolveError;

/// Header carrying the segment durations in a probe response
const DURATIONS_HEADER: &str = "Segment-Durations-Ms: ";

/// Ordered `(duration_ms, repeat_count)` runs of equal-length segments
///
/// Segment and duration totals are kept as runs are pushed, so a plan that
/// exists never overflows them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentPlan {
    runs: Vec<(u64, u64)>,
    segments: u64,
    total_ms: u64,
}

impl SegmentPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `count` segments of `duration_ms`, merging with the last run
    pub fn push_run(&mut self, duration_ms: u64, count: u64) -> Result<(), ResolveError> {
        if count == 0 {
            return Ok(());
        }
        let overflow = || {
            ResolveError::Manifest(format!(
                "segment run {}ms x {} overflows the timeline",
                duration_ms, count
            ))
        };
        let segments = self.segments.checked_add(count).ok_or_else(overflow)?;
        let total_ms = duration_ms
            .checked_mul(count)
            .and_then(|run| self.total_ms.checked_add(run))
            .ok_or_else(overflow)?;

        match self.runs.last_mut() {
            Some((last, repeat)) if *last == duration_ms => *repeat += count,
            _ => self.runs.push((duration_ms, count)),
        }
        self.segments = segments;
        self.total_ms = total_ms;
        Ok(())
    }

    /// Parse the `Segment-Durations-Ms` line of an OTF probe body
    ///
    /// Entries are `d` or `d(r=n)`, where `n` counts the extra repetitions.
    pub fn parse(body: &str) -> Result<Self, ResolveError> {
        let start = body
            .find(DURATIONS_HEADER)
            .ok_or_else(|| ResolveError::Manifest("probe response has no segment durations".to_string()))?
            + DURATIONS_HEADER.len();
        let line = body[start..].split('\n').next().unwrap_or_default().trim_end_matches('\r');

        let mut entries: Vec<&str> = line.split(',').collect();
        if entries.last().map_or(false, |entry| entry.trim().is_empty()) {
            entries.pop();
        }

        let mut plan = Self::new();
        for entry in entries {
            let entry = entry.trim();
            let (duration, extra) = match entry.split_once("(r=") {
                Some((duration, repeat)) => {
                    let repeat = repeat.trim_end_matches(')');
                    (duration, parse_number(entry, repeat)?)
                }
                None => (entry, 0),
            };
            let count = extra.checked_add(1).ok_or_else(|| {
                ResolveError::Manifest(format!("segment repeat count out of range in {:?}", entry))
            })?;
            plan.push_run(parse_number(entry, duration)?, count)?;
        }

        if plan.is_empty() {
            return Err(ResolveError::Manifest("probe response lists no segments".to_string()));
        }
        Ok(plan)
    }

    pub fn runs(&self) -> &[(u64, u64)] {
        &self.runs
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn segment_count(&self) -> u64 {
        self.segments
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.total_ms
    }

    /// Per-segment durations in order
    pub fn expand(&self) -> impl Iterator<Item = u64> + '_ {
        self.runs
            .iter()
            .flat_map(|&(duration, count)| std::iter::repeat(duration).take(count as usize))
    }

    /// Write a `SegmentTimeline` with one `S` per run
    pub(crate) fn write_timeline(&self, writer: &mut XmlWriter) -> Result<(), ResolveError> {
        mpd::start(writer, "SegmentTimeline", &[])?;
        for &(duration, count) in &self.runs {
            let d = duration.to_string();
            if count > 1 {
                let r = (count - 1).to_string();
                mpd::empty(writer, "S", &[("d", &d), ("r", &r)])?;
            } else {
                mpd::empty(writer, "S", &[("d", &d)])?;
            }
        }
        mpd::end(writer, "SegmentTimeline")
    }
}

fn parse_number(entry: &str, digits: &str) -> Result<u64, ResolveError> {
    digits
        .trim()
        .parse()
        .map_err(|_| ResolveError::Manifest(format!("invalid segment duration entry {:?}", entry)))
}
