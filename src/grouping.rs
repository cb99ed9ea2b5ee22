//! Grouping per-kernel detection flags into event windows
//!
//! 1. Runs of consecutive detections are found by edge detection on the flag vector
//!    padded with `false` at both ends.
//! 2. Each run opens a window, extended to at least `min_kernels` kernels (clipped
//!    at the last kernel). Later runs starting inside the window are absorbed and may
//!    extend it further.
//! 3. Each window gets a background window of the same length right before it. If
//!    that slot overlaps an earlier window, the slot moves to just before that window
//!    and is checked again against the windows before it. When the slot runs off the
//!    start of the record there is no background window.

use tracing::debug;

/// Inclusive range of kernel indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelSpan {
    pub start: usize,
    pub end: usize,
}

impl KernelSpan {
    /// Number of kernels covered
    pub fn kernels(&self) -> usize {
        self.end - self.start + 1
    }

    fn overlaps(&self, other: &KernelSpan) -> bool {
        self.start <= other.end && self.end >= other.start
    }
}

/// Signal window and its background window, in kernel indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventWindow {
    pub signal: KernelSpan,
    pub noise: Option<KernelSpan>,
}

/// Detection event in seconds from the start of the record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionEvent {
    /// Centre of the signal window
    pub signal_time: f64,
    pub signal_time1: f64,
    pub signal_time2: f64,
    pub noise_time1: Option<f64>,
    pub noise_time2: Option<f64>,
}

impl DetectionEvent {
    /// Convert kernel indices to times; kernel `k` covers `[k, k + 1) * kernel_duration`
    pub fn from_window(window: &EventWindow, kernel_duration: f64) -> Self {
        let signal_time1 = window.signal.start as f64 * kernel_duration;
        let signal_time2 = (window.signal.end + 1) as f64 * kernel_duration;
        Self {
            signal_time: 0.5 * (signal_time1 + signal_time2),
            signal_time1,
            signal_time2,
            noise_time1: window.noise.map(|n| n.start as f64 * kernel_duration),
            noise_time2: window.noise.map(|n| (n.end + 1) as f64 * kernel_duration),
        }
    }
}

/// Maximal runs of `true`
pub fn detection_runs(flags: &[bool]) -> Vec<KernelSpan> {
    let padded = |i: usize| -> bool { i >= 1 && i <= flags.len() && flags[i - 1] };
    let mut starts = Vec::new();
    let mut ends = Vec::new();
    for i in 0..=flags.len() {
        match (padded(i), padded(i + 1)) {
            (false, true) => starts.push(i),
            (true, false) => ends.push(i - 1),
            _ => {}
        }
    }
    starts.into_iter().zip(ends).map(|(start, end)| KernelSpan { start, end }).collect()
}

fn merge_runs(runs: &[KernelSpan], min_kernels: usize, n_kernels: usize) -> Vec<KernelSpan> {
    let min_kernels = min_kernels.max(1);
    let last = n_kernels.saturating_sub(1);
    let mut windows = Vec::new();
    let mut i = 0;
    while i < runs.len() {
        let start = runs[i].start;
        let mut end = runs[i].end.max(start + min_kernels - 1).min(last);
        i += 1;
        while i < runs.len() && runs[i].start <= end {
            end = end.max(runs[i].end);
            i += 1;
        }
        windows.push(KernelSpan { start, end });
    }
    windows
}

fn background(windows: &[KernelSpan], k: usize) -> Option<KernelSpan> {
    let len = windows[k].kernels();
    let mut before = k;
    let mut end = windows[k].start.checked_sub(1)?;
    loop {
        let start = (end + 1).checked_sub(len)?;
        let candidate = KernelSpan { start, end };
        match (0..before).rev().find(|&j| candidate.overlaps(&windows[j])) {
            None => return Some(candidate),
            Some(j) => {
                end = windows[j].start.checked_sub(1)?;
                before = j;
            }
        }
    }
}

/// Group detection flags into signal windows with background windows
pub fn group(flags: &[bool], min_kernels: usize) -> Vec<EventWindow> {
    let runs = detection_runs(flags);
    let windows = merge_runs(&runs, min_kernels, flags.len());
    let events: Vec<EventWindow> = (0..windows.len())
        .map(|k| EventWindow { signal: windows[k], noise: background(&windows, k) })
        .collect();
    debug!(
        runs = runs.len(),
        windows = events.len(),
        without_background = events.iter().filter(|e| e.noise.is_none()).count(),
        "detections grouped"
    );
    events
}
