//! Shi-Tomasi corner extraction inside a region of interest.

use super::gray::{GrayImage, Point};
use crate::rect::Rect;

/// Extract up to `max_corners` trackable corners inside `roi`.
///
/// Candidate responses are the minimum eigenvalue of the 3x3-summed
/// structure tensor; corners below `quality_level` times the strongest
/// response in the region are discarded and survivors are picked
/// strongest-first with a `min_distance` spacing.
pub fn good_features_to_track(
    image: &GrayImage,
    roi: &Rect<f32>,
    max_corners: usize,
    quality_level: f32,
    min_distance: f32,
) -> Vec<Point> {
    let frame = Rect::new(
        0.0,
        0.0,
        image.width() as f32,
        image.height() as f32,
    );
    let clipped = roi.intersect(&frame);
    if clipped.width() < 5.0 || clipped.height() < 5.0 {
        return Vec::new();
    }

    // Borders need one pixel for the gradient and one more for the
    // tensor window.
    let x0 = (clipped.x().floor() as usize).max(2);
    let y0 = (clipped.y().floor() as usize).max(2);
    let x1 = ((clipped.x() + clipped.width()).ceil() as usize)
        .min(image.width() - 2);
    let y1 = ((clipped.y() + clipped.height()).ceil() as usize)
        .min(image.height() - 2);
    if x1 <= x0 || y1 <= y0 {
        return Vec::new();
    }

    let grad = |x: usize, y: usize| -> (f32, f32) {
        let ix = 0.5 * (image.at(x + 1, y) - image.at(x - 1, y));
        let iy = 0.5 * (image.at(x, y + 1) - image.at(x, y - 1));
        (ix, iy)
    };

    let mut candidates: Vec<(f32, usize, usize)> = Vec::new();
    let mut max_response = 0.0f32;
    for y in y0..y1 {
        for x in x0..x1 {
            let mut ixx = 0.0f32;
            let mut iyy = 0.0f32;
            let mut ixy = 0.0f32;
            for wy in (y - 1)..=(y + 1) {
                for wx in (x - 1)..=(x + 1) {
                    let (ix, iy) = grad(wx, wy);
                    ixx += ix * ix;
                    iyy += iy * iy;
                    ixy += ix * iy;
                }
            }
            // Minimum eigenvalue of [[ixx, ixy], [ixy, iyy]].
            let trace = ixx + iyy;
            let delta = ((ixx - iyy) * (ixx - iyy)
                + 4.0 * ixy * ixy)
                .sqrt();
            let response = 0.5 * (trace - delta);
            if response > 0.0 {
                candidates.push((response, x, y));
                max_response = max_response.max(response);
            }
        }
    }

    if candidates.is_empty() {
        return Vec::new();
    }

    let threshold = quality_level * max_response;
    candidates.retain(|&(response, _, _)| response >= threshold);
    // Strongest first; image position breaks ties so the pick order is
    // reproducible.
    candidates.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| (a.2, a.1).cmp(&(b.2, b.1)))
    });

    let mut corners: Vec<Point> = Vec::new();
    for &(_, x, y) in candidates.iter() {
        if corners.len() >= max_corners {
            break;
        }
        let candidate = Point::new(x as f32, y as f32);
        let spaced = corners
            .iter()
            .all(|p| p.distance_to(&candidate) >= min_distance);
        if spaced {
            corners.push(candidate);
        }
    }
    corners
}
