//! Association between predicted tracks and detections: IoU cost
//! matrices and thresholded linear assignment.

use crate::error::TrackError;
use crate::lapjv::lapjv;
use crate::rect::Rect;

/// Result of linear assignment over a tracks x detections cost matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentResult {
    /// Matched pairs as (track_index, detection_index)
    pub matches: Vec<(usize, usize)>,
    /// Indices of unmatched tracks
    pub unmatched_tracks: Vec<usize>,
    /// Indices of unmatched detections
    pub unmatched_detections: Vec<usize>,
}

/// Pairwise IoU between two rectangle lists, shape (|a|, |b|).
pub fn calc_ious(
    a_rects: &[Rect<f32>],
    b_rects: &[Rect<f32>],
) -> Vec<Vec<f32>> {
    let mut ious = vec![vec![0.0; b_rects.len()]; a_rects.len()];
    for (ai, a) in a_rects.iter().enumerate() {
        for (bi, b) in b_rects.iter().enumerate() {
            ious[ai][bi] = a.calc_iou(b);
        }
    }
    ious
}

/// Cost matrix `1 - IoU`, shape (|a|, |b|).
pub fn iou_distance(
    a_rects: &[Rect<f32>],
    b_rects: &[Rect<f32>],
) -> Vec<Vec<f32>> {
    let mut cost = calc_ious(a_rects, b_rects);
    for row in cost.iter_mut() {
        for v in row.iter_mut() {
            *v = 1.0 - *v;
        }
    }
    cost
}

/// Minimum-cost assignment with an unmatched-cost threshold.
///
/// The rectangular matrix is embedded in a square one of side
/// rows + cols where every row and column can escape to a dummy partner
/// at cost `thresh / 2`, so pairs costlier than `thresh` are never
/// taken. Assigned pairs above the threshold are rejected afterwards as
/// a final guard.
pub fn linear_assignment(
    cost: &[Vec<f32>],
    thresh: f32,
) -> Result<AssignmentResult, TrackError> {
    let n_rows = cost.len();
    let n_cols = cost.first().map_or(0, |row| row.len());

    if n_rows == 0 || n_cols == 0 {
        return Ok(AssignmentResult {
            matches: Vec::new(),
            unmatched_tracks: (0..n_rows).collect(),
            unmatched_detections: (0..n_cols).collect(),
        });
    }

    let n = n_rows + n_cols;
    let mut cost_c = vec![vec![thresh as f64 / 2.0; n]; n];
    for row in cost_c.iter_mut().skip(n_rows) {
        for v in row.iter_mut().skip(n_cols) {
            *v = 0.0;
        }
    }
    for (i, row) in cost.iter().enumerate() {
        if row.len() != n_cols {
            return Err(TrackError::Assignment(
                "cost matrix rows have unequal lengths".into(),
            ));
        }
        for (j, &v) in row.iter().enumerate() {
            cost_c[i][j] = v as f64;
        }
    }

    let mut x = vec![-1isize; n];
    let mut y = vec![-1isize; n];
    lapjv(n, &cost_c, &mut x, &mut y)?;

    let mut matches = Vec::new();
    let mut unmatched_tracks = Vec::new();
    let mut unmatched_detections = Vec::new();
    for (i, &j) in x.iter().enumerate().take(n_rows) {
        if 0 <= j && (j as usize) < n_cols && cost[i][j as usize] <= thresh
        {
            matches.push((i, j as usize));
        } else {
            unmatched_tracks.push(i);
        }
    }
    for j in 0..n_cols {
        let row = y[j];
        if row < 0 || row as usize >= n_rows {
            unmatched_detections.push(j);
            continue;
        }
        // The row may itself have been rejected by the threshold guard.
        if !matches.contains(&(row as usize, j)) {
            unmatched_detections.push(j);
        }
    }

    Ok(AssignmentResult {
        matches,
        unmatched_tracks,
        unmatched_detections,
    })
}
