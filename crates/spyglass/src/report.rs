//! Textual sampler reports and the stat-line grammar
//!
//! Renders a [`SampleBuffer`] as a cumulative-time-sorted text report and
//! parses report lines back into [`StatLine`] rows. The line grammar is a
//! compatibility surface — previously stored reports must stay readable —
//! so the field pattern is fixed:
//!
//! ```text
//! <calls> <tottime> <percall> <cumtime> <percall> <file>:<lineno>(<func>)
//! ```
//!
//! where `<calls>` is either `N` or `N/N` (all activations / primitive
//! activations). Lines that do not match (headers, footers) are skipped.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::sampler::SampleBuffer;

/// Grammar for one report line (compiled once)
fn stat_line_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(
            r"(?P<ncalls>\d+/?\d+|\d+)\s+(?P<tottime>\d+\.?\d+)\s+(?P<tt_percall>\d+\.?\d+)\s+(?P<cumtime>\d+\.?\d+)\s+(?P<ct_percall>\d+\.?\d+)\s+(?P<file>.*):(?P<lineno>\d+)\((?P<function>.*)\)",
        )
        .expect("stat line grammar must compile")
    })
}

/// One parsed report line: a denormalized, queryable view of a sample
/// buffer entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatLine {
    /// Primitive (non-recursive) call count.
    pub calls: u64,
    /// Call count including recursive activations.
    pub recursive_calls: u64,
    /// Self time in seconds.
    pub total_time: f64,
    /// Self time per activation.
    pub time_per_call: f64,
    /// Cumulative time in seconds.
    pub cumulative_time: f64,
    /// Cumulative time per primitive call.
    pub cumulative_time_per_call: f64,
    pub file: String,
    pub line: u32,
    pub function: String,
}

impl StatLine {
    /// The composed `file:line(function)` identity, as stored in reports.
    pub fn fname(&self) -> String {
        format!("{}:{}({})", self.file, self.line, self.function)
    }
}

/// Parse a single report line. Returns `None` for lines outside the grammar.
pub fn parse_line(line: &str) -> Option<StatLine> {
    let line = line.trim_matches(|c: char| c == '\r' || c == '\n' || c == ' ');
    if line.is_empty() {
        return None;
    }
    let caps = stat_line_regex().captures(line)?;

    let ncalls = caps.name("ncalls")?.as_str();
    // "N/M" lists all activations first, primitive activations second; a
    // bare "N" means the two are equal.
    let (recursive_calls, calls) = match ncalls.split_once('/') {
        Some((all, primitive)) => (all.parse().ok()?, primitive.parse().ok()?),
        None => {
            let n: u64 = ncalls.parse().ok()?;
            (n, n)
        }
    };

    Some(StatLine {
        calls,
        recursive_calls,
        total_time: caps.name("tottime")?.as_str().parse().ok()?,
        time_per_call: caps.name("tt_percall")?.as_str().parse().ok()?,
        cumulative_time: caps.name("cumtime")?.as_str().parse().ok()?,
        cumulative_time_per_call: caps.name("ct_percall")?.as_str().parse().ok()?,
        file: caps.name("file")?.as_str().to_string(),
        line: caps.name("lineno")?.as_str().parse().ok()?,
        function: caps.name("function")?.as_str().to_string(),
    })
}

/// Parse every well-formed line of a report, silently skipping the rest.
pub fn parse_report(report: &str) -> Vec<StatLine> {
    report.lines().filter_map(parse_line).collect()
}

/// Render a sample buffer as a text report sorted by cumulative time,
/// in the format accepted by [`parse_line`].
pub fn render_report(buffer: &SampleBuffer) -> String {
    let total_calls: u64 = buffer.values().map(|s| s.calls).sum();
    let primitive_calls: u64 = buffer.values().map(|s| s.primitive_calls).sum();
    let total_secs: f64 = buffer.values().map(|s| s.total_secs()).sum();

    let mut output = String::new();
    output.push_str(&format!(
        "         {} function calls ({} primitive calls) in {:.3} seconds\n\n",
        total_calls, primitive_calls, total_secs
    ));
    output.push_str("   Ordered by: cumulative time\n\n");
    output.push_str("   ncalls  tottime  percall  cumtime  percall filename:lineno(function)\n");

    let mut entries: Vec<_> = buffer.iter().collect();
    entries.sort_by(|a, b| b.1.cumulative_ns.cmp(&a.1.cumulative_ns));

    for (fname, stats) in entries {
        if stats.calls == 0 {
            continue;
        }
        let ncalls = if stats.calls == stats.primitive_calls {
            stats.calls.to_string()
        } else {
            format!("{}/{}", stats.calls, stats.primitive_calls)
        };
        let tottime = stats.total_secs();
        let cumtime = stats.cumulative_secs();
        let tt_percall = tottime / stats.calls as f64;
        let ct_percall = if stats.primitive_calls > 0 {
            cumtime / stats.primitive_calls as f64
        } else {
            0.0
        };
        output.push_str(&format!(
            "{:>9}  {:>7.3}  {:>7.4}  {:>7.3}  {:>7.4} {}\n",
            ncalls, tottime, tt_percall, cumtime, ct_percall, fname
        ));
    }
    output
}
