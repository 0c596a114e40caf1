use crate::byte_tracker::ByteTracker;
use crate::error::TrackError;
use crate::flow_tracker::FlowTracker;
use crate::object::Object;
use crate::rect::Rect;
use log::debug;

/// Downscale factor of the optical-flow working frame.
const FLOW_SCALE: f32 = 0.5;
/// Floats per detection tuple: (cx, cy, w, h, class_id, confidence),
/// coordinates normalised to the frame.
const DETECTION_TUPLE_LEN: usize = 6;
/// Floats per track tuple: detection layout plus the track id.
const TRACK_TUPLE_LEN: usize = 7;

/*-----------------------------------------------------------------------------
HybridTracker
-----------------------------------------------------------------------------*/

/// Hybrid controller over the detection-level and optical-flow trackers.
///
/// Keyframes (frames with detector output) run the Byte cascade and
/// re-seed the flow tracker from its result; intermediate frames are
/// carried by optical flow alone, with the Kalman filters resynchronised
/// from the propagated boxes so the next keyframe predicts from fresh
/// state. With a keyframe interval of 1 the flow subsystem is bypassed
/// entirely.
#[derive(Debug)]
pub struct HybridTracker {
    byte_tracker: ByteTracker,
    flow_tracker: FlowTracker,
    frame_width: usize,
    frame_height: usize,
    keyframe_interval: usize,
    frame_count: usize,
}

impl HybridTracker {
    pub fn new(
        frame_rate: usize,
        track_buffer: usize,
        frame_width: usize,
        frame_height: usize,
        keyframe_interval: usize,
    ) -> Result<Self, TrackError> {
        if frame_width == 0 || frame_height == 0 {
            return Err(TrackError::InvalidInput(format!(
                "non-positive frame size {frame_width}x{frame_height}"
            )));
        }
        if keyframe_interval == 0 {
            return Err(TrackError::InvalidInput(
                "keyframe interval must be at least 1".into(),
            ));
        }

        debug!(
            "hybrid tracker created: {frame_width}x{frame_height}, \
             keyframe interval {keyframe_interval}"
        );
        Ok(Self {
            byte_tracker: ByteTracker::new(frame_rate, track_buffer),
            flow_tracker: FlowTracker::new(
                frame_width,
                frame_height,
                FLOW_SCALE,
            ),
            frame_width,
            frame_height,
            keyframe_interval,
            frame_count: 0,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn keyframe_interval(&self) -> usize {
        self.keyframe_interval
    }

    /// Forget all tracks and restart the frame clock.
    pub fn reset(&mut self) {
        self.byte_tracker.reset();
        self.flow_tracker.clear();
        self.frame_count = 0;
        debug!("hybrid tracker reset");
    }

    /// Keyframe path: run the detection cascade, then re-seed the flow
    /// tracker from its output.
    pub fn update_with_detections(
        &mut self,
        frame: &[u8],
        detections: &[Object],
    ) -> Result<Vec<Object>, TrackError> {
        self.frame_count += 1;
        let frame_usable = self.validate_frame(frame)?;

        if self.keyframe_interval == 1 {
            // Pure detection mode; skipping the flow machinery saves the
            // re-initialisation cost on every frame.
            return self.byte_tracker.update(detections);
        }

        let tracks = self.byte_tracker.update(detections)?;
        if frame_usable {
            self.flow_tracker.initialize_trackers(frame, &tracks);
        }
        Ok(tracks)
    }

    /// Intermediate path: propagate boxes by optical flow and pull the
    /// detection tracker's Kalman state along.
    pub fn update_without_detections(
        &mut self,
        frame: &[u8],
    ) -> Result<Vec<Object>, TrackError> {
        if self.keyframe_interval == 1 {
            return Err(TrackError::InvalidInput(
                "intermediate frames require a keyframe interval > 1"
                    .into(),
            ));
        }

        self.frame_count += 1;
        let frame_usable = self.validate_frame(frame)?;

        let propagated = if frame_usable {
            self.flow_tracker.update_trackers(frame)
        } else {
            Vec::new()
        };
        self.byte_tracker.resync_kalman_filters(&propagated)?;
        Ok(propagated)
    }

    /// Decode packed normalised detection tuples into pixel-space
    /// objects. Degenerate boxes are skipped.
    pub fn parse_detections(
        &self,
        tuples: &[f32],
    ) -> Result<Vec<Object>, TrackError> {
        if tuples.len() % DETECTION_TUPLE_LEN != 0 {
            return Err(TrackError::InvalidInput(format!(
                "detection array length {} is not divisible by {}",
                tuples.len(),
                DETECTION_TUPLE_LEN
            )));
        }

        let width = self.frame_width as f32;
        let height = self.frame_height as f32;
        let mut objects = Vec::with_capacity(
            tuples.len() / DETECTION_TUPLE_LEN,
        );
        for tuple in tuples.chunks_exact(DETECTION_TUPLE_LEN) {
            let w = tuple[2] * width;
            let h = tuple[3] * height;
            if w <= 0.0 || h <= 0.0 {
                debug!("skipping degenerate detection tuple {tuple:?}");
                continue;
            }
            let x = tuple[0] * width - w / 2.0;
            let y = tuple[1] * height - h / 2.0;
            let label = tuple[4].max(0.0) as usize;
            objects.push(Object::new(
                Rect::new(x, y, w, h),
                label,
                tuple[5],
            ));
        }
        Ok(objects)
    }

    /// Encode tracks as packed normalised 7-float tuples.
    pub fn tracks_to_tuples(&self, tracks: &[Object]) -> Vec<f32> {
        let width = self.frame_width as f32;
        let height = self.frame_height as f32;
        let mut tuples = Vec::with_capacity(tracks.len() * TRACK_TUPLE_LEN);
        for track in tracks {
            let rect = track.get_rect();
            tuples.push((rect.x() + rect.width() / 2.0) / width);
            tuples.push((rect.y() + rect.height() / 2.0) / height);
            tuples.push(rect.width() / width);
            tuples.push(rect.height() / height);
            tuples.push(track.get_label() as f32);
            tuples.push(track.get_prob());
            tuples.push(track.get_track_id().unwrap_or(0) as f32);
        }
        tuples
    }

    /// Empty frames are a legal no-op; anything else has to match the
    /// configured geometry.
    fn validate_frame(&self, frame: &[u8]) -> Result<bool, TrackError> {
        if frame.is_empty() {
            return Ok(false);
        }
        if frame.len() != self.frame_width * self.frame_height {
            return Err(TrackError::InvalidInput(format!(
                "frame byte length {} does not match {}x{}",
                frame.len(),
                self.frame_width,
                self.frame_height
            )));
        }
        Ok(true)
    }
}
