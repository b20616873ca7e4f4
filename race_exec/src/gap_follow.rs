//! # Gap Follower
//!
//! Reactive planner which finds runs of free space in the forward half of a scan and proposes
//! steering towards the middle of each of them.
//!
//! Each call to [`GapFollower::plan`] does the following:
//! 1. Truncate the scan to a window spanning `truncation_span_rad` about its centre. The window
//!    is computed on the first call and reused.
//! 2. Filter the window: NaN becomes 0, infinite or too long readings become `max_scan_m`.
//! 3. Find the closest reading and zero every reading within the safety bubble around it.
//! 4. Find every run of readings longer than `gap_threshold_m` which has more than
//!    `gap_size_threshold` samples, and take its midpoint as a candidate.
//! 5. Convert candidates to headings relative to straight ahead.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::msg::LaserScan;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters for the gap follower
#[derive(Deserialize, Debug, Clone)]
pub struct GapParams {
    /// Radius of the safety bubble placed around the closest obstacle
    ///
    /// Units: meters
    pub bubble_radius_m: f64,

    /// Readings must be strictly longer than this to be part of a gap
    ///
    /// Units: meters
    pub gap_threshold_m: f64,

    /// A gap must have strictly more samples than this to be navigable
    pub gap_size_threshold: usize,

    /// Ceiling applied to long and infinite readings
    ///
    /// Units: meters
    pub max_scan_m: f64,

    /// Angular span of the window used for planning, centred on the middle of the scan
    ///
    /// Units: radians
    #[serde(default = "default_truncation_span")]
    pub truncation_span_rad: f64,
}

/// Index window of the scan used by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanWindow {
    /// First index (inclusive)
    pub start: usize,

    /// Last index (exclusive)
    pub end: usize,

    /// Length of the scan the window was computed for
    pub scan_len: usize,
}

pub struct GapFollower {
    params: GapParams,

    window: Option<ScanWindow>,
}

/// The result of one planning cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GapPlan {
    /// Candidate headings relative to straight ahead, left positive, in scan order
    ///
    /// Units: radians
    pub headings_rad: Vec<f64>,

    /// Window indices of the candidates
    pub candidate_indices: Vec<usize>,

    /// Window index of the closest reading
    pub closest_index: usize,

    /// Distance to the closest reading
    ///
    /// Units: meters
    pub closest_dist_m: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GapError {
    #[error("The scan contains no readings")]
    EmptyScan,

    #[error("The truncation window of the scan is empty")]
    EmptyWindow,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl GapFollower {
    pub fn new(params: GapParams) -> Self {
        Self {
            params,
            window: None,
        }
    }

    pub fn params(&self) -> &GapParams {
        &self.params
    }

    /// The cached truncation window, if one has been computed.
    pub fn window(&self) -> Option<ScanWindow> {
        self.window
    }

    /// Plan a set of candidate headings from the scan.
    ///
    /// The candidate list is rebuilt on every call. An empty list means no navigable gap was
    /// found.
    pub fn plan(&mut self, scan: &LaserScan) -> Result<GapPlan, GapError> {
        if scan.is_empty() {
            return Err(GapError::EmptyScan);
        }

        let window = match self.window {
            Some(w) if w.scan_len == scan.len() => w,
            cached => {
                if cached.is_some() {
                    warn!(
                        "Scan length changed to {}, recomputing truncation window",
                        scan.len()
                    );
                }
                let w = truncation_window(scan, self.params.truncation_span_rad);
                debug!("Truncation window: {:?}", w);
                self.window = Some(w);
                w
            }
        };

        if window.start >= window.end {
            return Err(GapError::EmptyWindow);
        }

        let mut ranges = filter_ranges(&scan.ranges[window.start..window.end], self.params.max_scan_m);

        let closest_index = closest_index(&ranges).ok_or(GapError::EmptyWindow)?;
        let closest_dist_m = ranges[closest_index];

        eliminate_bubble(
            &mut ranges,
            closest_index,
            closest_dist_m,
            self.params.bubble_radius_m,
            scan.angle_increment,
        );

        let candidate_indices = find_gaps(
            &ranges,
            self.params.gap_threshold_m,
            self.params.gap_size_threshold,
        );

        let headings_rad = candidate_indices
            .iter()
            .map(|&i| heading_of(i, ranges.len(), scan.angle_increment))
            .collect();

        Ok(GapPlan {
            headings_rad,
            candidate_indices,
            closest_index,
            closest_dist_m,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn default_truncation_span() -> f64 {
    std::f64::consts::PI
}

/// Compute the window of indices spanning `span_rad` centred on the middle of the scan. If the
/// scan covers less than the span the whole scan is used.
pub fn truncation_window(scan: &LaserScan, span_rad: f64) -> ScanWindow {
    let n = scan.len();
    let scan_span = scan.angle_max - scan.angle_min;

    let size = if scan_span > 0.0 {
        ((span_rad / scan_span) * n as f64).max(0.0) as usize
    } else {
        n
    };

    if size >= n {
        return ScanWindow {
            start: 0,
            end: n,
            scan_len: n,
        };
    }

    let mid = n / 2;
    ScanWindow {
        start: mid.saturating_sub(size / 2),
        end: (mid + size / 2).min(n),
        scan_len: n,
    }
}

/// Replace NaN readings with zero and clamp infinite or long readings to `max_scan`.
pub fn filter_ranges(ranges: &[f64], max_scan: f64) -> Vec<f64> {
    ranges
        .iter()
        .map(|&r| {
            if r.is_nan() {
                0.0
            } else if r > max_scan || r.is_infinite() {
                max_scan
            } else {
                r
            }
        })
        .collect()
}

/// Index of the smallest reading, the first one if there are several.
pub fn closest_index(ranges: &[f64]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, &r) in ranges.iter().enumerate() {
        match best {
            Some(b) if ranges[b] <= r => (),
            _ => best = Some(i),
        }
    }
    best
}

/// Zero every reading within the safety bubble around `closest`, returning the inclusive range
/// of indices zeroed.
///
/// The bubble's angular half width is `bubble_radius / closest_dist`. A distance of zero zeroes
/// the whole slice.
pub fn eliminate_bubble(
    ranges: &mut [f64],
    closest: usize,
    closest_dist: f64,
    bubble_radius: f64,
    angle_increment: f64,
) -> (usize, usize) {
    if ranges.is_empty() {
        return (0, 0);
    }
    let last = ranges.len() - 1;

    let half_width = (bubble_radius / closest_dist / angle_increment).round();

    let (start, end) = if half_width.is_finite() && half_width >= 0.0 {
        let hw = half_width as usize;
        (closest.saturating_sub(hw), closest.saturating_add(hw).min(last))
    } else {
        (0, last)
    };

    for r in ranges[start..=end].iter_mut() {
        *r = 0.0;
    }

    (start, end)
}

/// Find the midpoints of every run of readings above `threshold` with more than `min_size`
/// samples.
pub fn find_gaps(ranges: &[f64], threshold: f64, min_size: usize) -> Vec<usize> {
    let mut gaps = Vec::new();
    let mut i = 0;

    while i < ranges.len() {
        if ranges[i] <= threshold {
            i += 1;
            continue;
        }

        let start = i;
        while i < ranges.len() && ranges[i] > threshold {
            i += 1;
        }
        let len = i - start;

        if len > min_size {
            gaps.push((2 * start + len - 1) / 2);
        }
    }

    gaps
}

/// Heading of a window index relative to the window centre.
pub fn heading_of(index: usize, window_len: usize, angle_increment: f64) -> f64 {
    angle_increment * (index as f64 - (window_len / 2) as f64)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
