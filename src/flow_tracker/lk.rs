//! Pyramidal Lucas-Kanade sparse optical flow.

use super::gray::{GrayImage, Point};

/// Half-width of the 21x21 integration window.
const WINDOW_RADIUS: isize = 10;
/// Newton iterations per pyramid level.
const MAX_ITERATIONS: usize = 30;
/// Convergence bound on the per-iteration displacement step.
const CONVERGENCE_EPS: f32 = 0.01;
/// Minimum normalised eigenvalue of the spatial gradient matrix.
const MIN_EIGEN_THRESHOLD: f32 = 1e-4;

/*-----------------------------------------------------------------------------
Image pyramid
-----------------------------------------------------------------------------*/

/// Half-resolution image stack, finest level first.
#[derive(Debug, Clone)]
pub struct Pyramid {
    levels: Vec<GrayImage>,
}

impl Pyramid {
    pub fn build(base: GrayImage, max_levels: usize) -> Self {
        let mut levels = vec![base];
        while levels.len() < max_levels {
            let next = levels.last().unwrap().downsample_half();
            if next.width() < 16 || next.height() < 16 {
                break;
            }
            levels.push(next);
        }
        Self { levels }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, index: usize) -> &GrayImage {
        &self.levels[index]
    }

    pub fn base(&self) -> &GrayImage {
        &self.levels[0]
    }
}

/*-----------------------------------------------------------------------------
Lucas-Kanade
-----------------------------------------------------------------------------*/

/// Track `points` from `prev` to `curr`. One `(new_point, good)` pair per
/// input point; positions of bad points are meaningless.
pub fn calc_optical_flow_pyr_lk(
    prev: &Pyramid,
    curr: &Pyramid,
    points: &[Point],
) -> Vec<(Point, bool)> {
    let levels = prev.num_levels().min(curr.num_levels());
    let width = prev.base().width() as f32;
    let height = prev.base().height() as f32;

    points
        .iter()
        .map(|&point| {
            let mut flow = (0.0f32, 0.0f32);
            let mut good = true;

            for level in (0..levels).rev() {
                let scale = (1 << level) as f32;
                let level_point =
                    Point::new(point.x / scale, point.y / scale);
                match refine_at_level(
                    prev.level(level),
                    curr.level(level),
                    level_point,
                    flow,
                ) {
                    Some(level_flow) => {
                        flow = if level > 0 {
                            (2.0 * level_flow.0, 2.0 * level_flow.1)
                        } else {
                            level_flow
                        };
                    }
                    None => {
                        good = false;
                        break;
                    }
                }
            }

            let new_point =
                Point::new(point.x + flow.0, point.y + flow.1);
            let inside = new_point.x >= 0.0
                && new_point.y >= 0.0
                && new_point.x < width
                && new_point.y < height;
            (new_point, good && inside)
        })
        .collect()
}

/// One Newton refinement of the displacement at a single pyramid level.
///
/// `guess` is the displacement carried down from the coarser level, in
/// this level's coordinates.
fn refine_at_level(
    prev: &GrayImage,
    curr: &GrayImage,
    point: Point,
    guess: (f32, f32),
) -> Option<(f32, f32)> {
    if point.x < 0.0
        || point.y < 0.0
        || point.x >= prev.width() as f32
        || point.y >= prev.height() as f32
    {
        return None;
    }

    let win = (2 * WINDOW_RADIUS + 1) * (2 * WINDOW_RADIUS + 1);

    // Template intensities and spatial gradients around the point in the
    // previous frame; border samples clamp.
    let mut template = Vec::with_capacity(win as usize);
    let mut gxx = 0.0f32;
    let mut gyy = 0.0f32;
    let mut gxy = 0.0f32;
    for wy in -WINDOW_RADIUS..=WINDOW_RADIUS {
        for wx in -WINDOW_RADIUS..=WINDOW_RADIUS {
            let x = point.x + wx as f32;
            let y = point.y + wy as f32;
            let value = prev.bilinear_at(x, y);
            let ix =
                0.5 * (prev.bilinear_at(x + 1.0, y) - prev.bilinear_at(x - 1.0, y));
            let iy =
                0.5 * (prev.bilinear_at(x, y + 1.0) - prev.bilinear_at(x, y - 1.0));
            template.push((value, ix, iy));
            gxx += ix * ix;
            gyy += iy * iy;
            gxy += ix * iy;
        }
    }

    // Reject untrackable (aperture-limited or flat) windows.
    let trace = gxx + gyy;
    let delta = ((gxx - gyy) * (gxx - gyy) + 4.0 * gxy * gxy).sqrt();
    let min_eigen = 0.5 * (trace - delta) / win as f32;
    let det = gxx * gyy - gxy * gxy;
    if min_eigen < MIN_EIGEN_THRESHOLD || det.abs() < f32::EPSILON {
        return None;
    }

    let mut flow = guess;
    for _ in 0..MAX_ITERATIONS {
        let mut bx = 0.0f32;
        let mut by = 0.0f32;
        let mut idx = 0;
        for wy in -WINDOW_RADIUS..=WINDOW_RADIUS {
            for wx in -WINDOW_RADIUS..=WINDOW_RADIUS {
                let (value, ix, iy) = template[idx];
                idx += 1;
                let moved = curr.bilinear_at(
                    point.x + wx as f32 + flow.0,
                    point.y + wy as f32 + flow.1,
                );
                let diff = value - moved;
                bx += diff * ix;
                by += diff * iy;
            }
        }

        let step_x = (gyy * bx - gxy * by) / det;
        let step_y = (gxx * by - gxy * bx) / det;
        flow.0 += step_x;
        flow.1 += step_y;

        if step_x.abs() < CONVERGENCE_EPS && step_y.abs() < CONVERGENCE_EPS
        {
            break;
        }
    }

    Some(flow)
}
