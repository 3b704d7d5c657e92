use regex::Regex;

use crate::domain::ProgressEvent;

/// Best-effort matcher over the managed binary's informal progress output.
///
/// The recognized shape is `[download]  NN.N% of SIZE ... ETA H:MM:SS`
/// interleaved with arbitrary unstructured lines. Size and ETA are kept as
/// verbatim display tokens. Kept behind this type so the matching rule can
/// change with the binary's output format without touching orchestration.
#[derive(Debug, Clone)]
pub struct ProgressParser {
    pattern: Regex,
}

impl Default for ProgressParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressParser {
    pub fn new() -> Self {
        // The pattern is a literal; compilation cannot fail at runtime.
        let pattern = Regex::new(r"\[download\]\s+(\d+\.\d+)%.*?of\s+([\d\.]+\w+).*?ETA\s+([\d:]+)")
            .unwrap_or_else(|e| panic!("invalid progress pattern: {}", e));
        Self { pattern }
    }

    /// Extract a progress event from one output line, or `None` if the line
    /// does not match the full pattern. Total and pure: any input yields
    /// either a fully populated event or `None`.
    pub fn parse_line(&self, line: &str) -> Option<ProgressEvent> {
        let caps = self.pattern.captures(line)?;

        let percent: f32 = caps.get(1)?.as_str().parse().ok()?;
        let total_size = caps.get(2)?.as_str().to_string();
        let eta = caps.get(3)?.as_str().to_string();

        Some(ProgressEvent {
            percent,
            total_size,
            eta,
        })
    }
}
