//! Call-stack sampler
//!
//! Records per-call-site timing and call counts while active. Instrumented
//! code opens a [`SampleSpan`] guard around each unit it wants attributed;
//! the sampler aggregates self time, cumulative time and recursion-aware
//! call counts per site, and serializes the accumulated buffer for storage.
//!
//! The sampler itself is synchronous state. Sharing across execution
//! contexts goes through [`SharedSampler`], an explicitly injected handle
//! (`Arc` + mutex) — there is no process-level static.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use spyglass_common::Result;

/// Serialized form of an empty sample buffer (an empty JSON object).
///
/// A dump equal to this sentinel carries no data and is never persisted.
pub const EMPTY_BUFFER: &[u8] = b"{}";

/// Identity of an instrumented call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallSite {
    pub file: String,
    pub line: u32,
    pub function: String,
}

impl CallSite {
    pub fn new(file: impl Into<String>, line: u32, function: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            function: function.into(),
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}({})", self.file, self.line, self.function)
    }
}

/// Aggregated statistics for one call site.
///
/// `calls` counts every activation; `primitive_calls` only the non-recursive
/// ones. `total_ns` is self time across all activations; `cumulative_ns` is
/// wall time accumulated by outermost activations only, so recursion does
/// not double-count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallStats {
    pub calls: u64,
    pub primitive_calls: u64,
    pub total_ns: u64,
    pub cumulative_ns: u64,
}

impl CallStats {
    /// Self time in seconds.
    pub fn total_secs(&self) -> f64 {
        self.total_ns as f64 / 1_000_000_000.0
    }

    /// Cumulative time in seconds.
    pub fn cumulative_secs(&self) -> f64 {
        self.cumulative_ns as f64 / 1_000_000_000.0
    }
}

/// The accumulated, serializable record produced by a sampler.
pub type SampleBuffer = BTreeMap<String, CallStats>;

/// Handle to an open frame, returned by [`Sampler::begin`].
///
/// Deliberately neither `Copy` nor `Clone`: a frame is closed exactly once.
#[derive(Debug)]
pub struct FrameToken(usize);

#[derive(Debug)]
struct ActiveFrame {
    site: CallSite,
    started: Instant,
    child_ns: u64,
    recursive: bool,
}

/// Records function-call timing and counts while enabled.
#[derive(Debug, Default)]
pub struct Sampler {
    enabled: bool,
    frames: HashMap<CallSite, CallStats>,
    stack: Vec<ActiveFrame>,
}

impl Sampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// True when no samples have been recorded since the last clear.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Open a frame for `site`. Returns `None` while disabled.
    pub fn begin(&mut self, site: CallSite) -> Option<FrameToken> {
        if !self.enabled {
            return None;
        }
        let recursive = self.stack.iter().any(|frame| frame.site == site);
        let token = FrameToken(self.stack.len());
        self.stack.push(ActiveFrame {
            site,
            started: Instant::now(),
            child_ns: 0,
            recursive,
        });
        Some(token)
    }

    /// Close the frame identified by `token`.
    ///
    /// Frames opened after `token` that were never closed (early return,
    /// panic unwound past their guard) are closed here too, in LIFO order,
    /// so timing is always attributed.
    pub fn end(&mut self, token: FrameToken) {
        while self.stack.len() > token.0 {
            let frame = match self.stack.pop() {
                Some(frame) => frame,
                None => return,
            };
            let elapsed_ns = frame.started.elapsed().as_nanos() as u64;
            let self_ns = elapsed_ns.saturating_sub(frame.child_ns);

            let stats = self.frames.entry(frame.site).or_default();
            stats.calls += 1;
            stats.total_ns += self_ns;
            if !frame.recursive {
                stats.primitive_calls += 1;
                stats.cumulative_ns += elapsed_ns;
            }

            if let Some(parent) = self.stack.last_mut() {
                parent.child_ns += elapsed_ns;
            }
        }
    }

    /// Snapshot of the accumulated buffer, keyed by `file:line(function)`.
    pub fn buffer(&self) -> SampleBuffer {
        self.frames
            .iter()
            .map(|(site, stats)| (site.to_string(), *stats))
            .collect()
    }

    /// Serialize the accumulated buffer. An empty buffer serializes to
    /// exactly [`EMPTY_BUFFER`].
    pub fn dump(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.buffer())?)
    }

    /// Deserialize a buffer previously produced by [`Sampler::dump`].
    pub fn load(bytes: &[u8]) -> Result<SampleBuffer> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Drop all accumulated samples and any open frames.
    pub fn clear(&mut self) {
        self.frames.clear();
        self.stack.clear();
    }
}

/// Cloneable handle to a sampler shared between execution contexts.
#[derive(Debug, Clone, Default)]
pub struct SharedSampler {
    inner: Arc<Mutex<Sampler>>,
}

impl SharedSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&self) {
        self.inner.lock().enable();
    }

    pub fn disable(&self) {
        self.inner.lock().disable();
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.lock().is_enabled()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Open a RAII span for `site`. The span records on drop; while the
    /// sampler is disabled the returned span is a no-op.
    pub fn span(&self, site: CallSite) -> SampleSpan {
        let token = self.inner.lock().begin(site);
        SampleSpan {
            sampler: self.clone(),
            token,
        }
    }

    pub fn buffer(&self) -> SampleBuffer {
        self.inner.lock().buffer()
    }

    pub fn dump(&self) -> Result<Vec<u8>> {
        self.inner.lock().dump()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

/// RAII guard for one sampled frame.
#[derive(Debug)]
pub struct SampleSpan {
    sampler: SharedSampler,
    token: Option<FrameToken>,
}

impl Drop for SampleSpan {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.sampler.inner.lock().end(token);
        }
    }
}
