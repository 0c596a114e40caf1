use super::features::good_features_to_track;
use super::gray::{GrayImage, Point};
use super::lk::{calc_optical_flow_pyr_lk, Pyramid};
use crate::object::Object;
use crate::rect::Rect;
use log::{debug, warn};

/// Corner cap per track.
const MAX_FEATURES: usize = 20;
/// Shi-Tomasi quality level relative to the strongest corner.
const QUALITY_LEVEL: f32 = 0.01;
/// Minimum spacing between extracted corners, in scaled pixels.
const MIN_FEATURE_DISTANCE: f32 = 10.0;
/// A track needs at least this many surviving points to stay alive.
const MIN_TRACK_POINTS: usize = 4;
/// Re-extract corners when the surviving set gets this small.
const REFRESH_POINT_COUNT: usize = 10;
/// Per-frame scale clamp against jitter and runaway growth.
const MIN_SCALE_CHANGE: f32 = 0.97;
const MAX_SCALE_CHANGE: f32 = 1.03;
/// Pyramid depth of the Lucas-Kanade solver.
const PYRAMID_LEVELS: usize = 3;

/*-----------------------------------------------------------------------------
FlowTracker
-----------------------------------------------------------------------------*/

/// Per-track sparse feature state in the scaled frame.
#[derive(Debug, Clone)]
struct FlowTrack {
    track_id: usize,
    label: usize,
    score: f32,
    /// Box in original-resolution pixels.
    bbox: Rect<f32>,
    /// Feature points in scaled-frame pixels.
    points: Vec<Point>,
    valid: bool,
    frames_tracked: usize,
}

/// Optical-flow box propagator for intermediate frames.
///
/// Works on a downscaled copy of the grayscale frame; per-track feature
/// point sets are rebuilt wholesale on every keyframe and carry no state
/// across detector runs.
#[derive(Debug)]
pub struct FlowTracker {
    original_width: usize,
    original_height: usize,
    scale: f32,
    scaled_width: usize,
    scaled_height: usize,
    prev_pyramid: Option<Pyramid>,
    tracks: Vec<FlowTrack>,
}

impl FlowTracker {
    pub fn new(
        original_width: usize,
        original_height: usize,
        scale: f32,
    ) -> Self {
        let scaled_width = (original_width as f32 * scale) as usize;
        let scaled_height = (original_height as f32 * scale) as usize;
        Self {
            original_width,
            original_height,
            scale,
            scaled_width,
            scaled_height,
            prev_pyramid: None,
            tracks: Vec::new(),
        }
    }

    /// Number of tracks still propagating.
    pub fn active_count(&self) -> usize {
        self.tracks.iter().filter(|t| t.valid).count()
    }

    /// Drop all per-track state and the cached previous frame.
    pub fn clear(&mut self) {
        self.tracks.clear();
        self.prev_pyramid = None;
    }

    /// Replace the tracked set wholesale from detection-tracker output
    /// and re-extract feature points on the given keyframe.
    pub fn initialize_trackers(&mut self, frame: &[u8], tracks: &[Object]) {
        self.clear();

        let Some(pyramid) = self.build_pyramid(frame) else {
            warn!("initialize_trackers: unusable frame, nothing tracked");
            return;
        };

        for obj in tracks {
            let Some(track_id) = obj.get_track_id() else {
                debug!("initialize_trackers: object without id skipped");
                continue;
            };

            let scaled = self.scale_rect(&obj.get_rect());
            let Some(clipped) = self.clip_to_scaled_frame(&scaled) else {
                warn!(
                    "invalid scaled box for track {track_id}: {scaled:?}"
                );
                continue;
            };

            let points = good_features_to_track(
                pyramid.base(),
                &clipped,
                MAX_FEATURES,
                QUALITY_LEVEL,
                MIN_FEATURE_DISTANCE,
            );
            if points.len() < MIN_TRACK_POINTS {
                warn!(
                    "not enough feature points for track {track_id} ({})",
                    points.len()
                );
                continue;
            }

            debug!(
                "track {track_id}: initialised with {} feature points",
                points.len()
            );
            self.tracks.push(FlowTrack {
                track_id,
                label: obj.get_label(),
                score: obj.get_prob(),
                bbox: obj.get_rect(),
                points,
                valid: true,
                frames_tracked: 0,
            });
        }

        self.prev_pyramid = Some(pyramid);
    }

    /// Propagate all live tracks onto the next frame and return their
    /// updated boxes at original resolution.
    pub fn update_trackers(&mut self, frame: &[u8]) -> Vec<Object> {
        let Some(curr_pyramid) = self.build_pyramid(frame) else {
            warn!("update_trackers: unusable frame, no outputs");
            return Vec::new();
        };

        let Some(prev_pyramid) = self.prev_pyramid.take() else {
            // Nothing to flow from yet; just cache the frame.
            self.prev_pyramid = Some(curr_pyramid);
            return Vec::new();
        };

        let mut outputs = Vec::new();
        let mut tracks = std::mem::take(&mut self.tracks);
        for track in tracks.iter_mut() {
            if !track.valid || track.points.is_empty() {
                continue;
            }

            let results = calc_optical_flow_pyr_lk(
                &prev_pyramid,
                &curr_pyramid,
                &track.points,
            );
            let mut good_old = Vec::new();
            let mut good_new = Vec::new();
            for (old, &(new, good)) in
                track.points.iter().zip(results.iter())
            {
                if good {
                    good_old.push(*old);
                    good_new.push(new);
                }
            }

            if good_new.len() < MIN_TRACK_POINTS {
                track.valid = false;
                warn!(
                    "track {}: only {} good points after {} frames",
                    track.track_id,
                    good_new.len(),
                    track.frames_tracked
                );
                continue;
            }

            // Robust box motion: mean translation, median scale about
            // the point centroids, clamped against jitter.
            let count = good_new.len() as f32;
            let mut dx = 0.0f32;
            let mut dy = 0.0f32;
            for (old, new) in good_old.iter().zip(good_new.iter()) {
                dx += new.x - old.x;
                dy += new.y - old.y;
            }
            dx /= count;
            dy /= count;

            let scale_change = median_scale(&good_old, &good_new)
                .clamp(MIN_SCALE_CHANGE, MAX_SCALE_CHANGE);

            let scaled = self.scale_rect(&track.bbox);
            let old_w = scaled.width();
            let old_h = scaled.height();
            let new_w = old_w * scale_change;
            let new_h = old_h * scale_change;
            let moved = Rect::new(
                scaled.x() + dx - (new_w - old_w) / 2.0,
                scaled.y() + dy - (new_h - old_h) / 2.0,
                new_w,
                new_h,
            );

            let Some(unscaled) = self.unscale_and_clamp(&moved) else {
                track.valid = false;
                warn!(
                    "track {}: box left the frame after {} frames",
                    track.track_id, track.frames_tracked
                );
                continue;
            };

            track.bbox = unscaled;
            track.points = good_new;
            track.frames_tracked += 1;

            if track.points.len() < REFRESH_POINT_COUNT {
                if let Some(clipped) = self.clip_to_scaled_frame(&moved) {
                    debug!(
                        "track {}: refreshing feature points ({} left)",
                        track.track_id,
                        track.points.len()
                    );
                    let fresh = good_features_to_track(
                        curr_pyramid.base(),
                        &clipped,
                        MAX_FEATURES,
                        QUALITY_LEVEL,
                        MIN_FEATURE_DISTANCE,
                    );
                    track.points.extend(fresh);
                }
            }

            outputs.push(
                Object::new(track.bbox.clone(), track.label, track.score)
                    .with_track_id(track.track_id),
            );
        }

        debug!(
            "propagated {}/{} optical flow tracks",
            outputs.len(),
            tracks.len()
        );
        self.tracks = tracks;
        self.prev_pyramid = Some(curr_pyramid);
        outputs
    }

    /// Validate the raw frame and produce the scaled pyramid. `None` for
    /// empty or mis-sized buffers, which leaves existing state alone.
    fn build_pyramid(&self, frame: &[u8]) -> Option<Pyramid> {
        if frame.len() != self.original_width * self.original_height {
            return None;
        }
        let full = GrayImage::from_luma_u8(
            frame,
            self.original_width,
            self.original_height,
        );
        let scaled =
            full.resize_bilinear(self.scaled_width, self.scaled_height);
        Some(Pyramid::build(scaled, PYRAMID_LEVELS))
    }

    fn scale_rect(&self, rect: &Rect<f32>) -> Rect<f32> {
        Rect::new(
            rect.x() * self.scale,
            rect.y() * self.scale,
            rect.width() * self.scale,
            rect.height() * self.scale,
        )
    }

    /// Clip a scaled-frame box to the frame bounds; `None` when nothing
    /// usable remains.
    fn clip_to_scaled_frame(&self, rect: &Rect<f32>) -> Option<Rect<f32>> {
        let frame = Rect::new(
            0.0,
            0.0,
            self.scaled_width as f32,
            self.scaled_height as f32,
        );
        let clipped = rect.intersect(&frame);
        if clipped.is_empty() {
            None
        } else {
            Some(clipped)
        }
    }

    /// Map a propagated scaled box back to original resolution, clamped
    /// to the frame. `None` when the box no longer intersects it.
    fn unscale_and_clamp(&self, rect: &Rect<f32>) -> Option<Rect<f32>> {
        let unscaled = Rect::new(
            rect.x() / self.scale,
            rect.y() / self.scale,
            rect.width() / self.scale,
            rect.height() / self.scale,
        );
        let frame = Rect::new(
            0.0,
            0.0,
            self.original_width as f32,
            self.original_height as f32,
        );
        let clamped = unscaled.intersect(&frame);
        if clamped.is_empty() {
            None
        } else {
            Some(clamped)
        }
    }
}

/// Median ratio of point distances to their centroid between the old and
/// new point sets; 1.0 when undefined.
fn median_scale(old_points: &[Point], new_points: &[Point]) -> f32 {
    if old_points.is_empty() || old_points.len() != new_points.len() {
        return 1.0;
    }

    let count = old_points.len() as f32;
    let mut old_centroid = Point::new(0.0, 0.0);
    let mut new_centroid = Point::new(0.0, 0.0);
    for (old, new) in old_points.iter().zip(new_points.iter()) {
        old_centroid.x += old.x;
        old_centroid.y += old.y;
        new_centroid.x += new.x;
        new_centroid.y += new.y;
    }
    old_centroid.x /= count;
    old_centroid.y /= count;
    new_centroid.x /= count;
    new_centroid.y /= count;

    let mut ratios: Vec<f32> = old_points
        .iter()
        .zip(new_points.iter())
        .filter_map(|(old, new)| {
            let d_old = old.distance_to(&old_centroid);
            let d_new = new.distance_to(&new_centroid);
            (d_old > 1e-3).then(|| d_new / d_old)
        })
        .collect();
    if ratios.is_empty() {
        return 1.0;
    }

    ratios.sort_by(|a, b| a.partial_cmp(b).unwrap());
    ratios[ratios.len() / 2]
}
