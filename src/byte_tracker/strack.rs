use super::kalman_filter::{KalmanFilter, StateCov, StateMean};
use crate::error::TrackError;
use crate::rect::Rect;
use std::fmt::Debug;

/*----------------------------------------------------------------------------
STrack state enum
----------------------------------------------------------------------------*/

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum STrackState {
    New,
    Tracked,
    Lost,
    Removed,
}

/*----------------------------------------------------------------------------
STrack struct
----------------------------------------------------------------------------*/

/// A single tracked object: pixel rectangle, Kalman state and lifecycle
/// bookkeeping. Detections are wrapped as `New`-state STracks before
/// entering the association cascade.
#[derive(Clone)]
pub struct STrack {
    kalman_filter: KalmanFilter,
    pub(crate) mean: StateMean,
    pub(crate) covariance: StateCov,
    rect: Rect<f32>,
    state: STrackState,
    is_activated: bool,
    score: f32,
    label: usize,
    track_id: usize,
    frame_id: usize,
    start_frame_id: usize,
    tracklet_len: usize,
}

impl Debug for STrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "STrack {{ track_id: {}, label: {}, frame_id: {}, start_frame_id: {}, tracklet_len: {}, state: {:?}, is_activated: {}, score: {}, rect: {:?} }}",
            self.track_id, self.label, self.frame_id, self.start_frame_id, self.tracklet_len, self.state, self.is_activated, self.score, self.rect
        )
    }
}

impl PartialEq for STrack {
    fn eq(&self, other: &Self) -> bool {
        self.track_id == other.track_id
    }
}

impl STrack {
    pub fn new(rect: Rect<f32>, label: usize, score: f32) -> Self {
        let kalman_filter = KalmanFilter::new(1.0 / 20.0, 1.0 / 160.0);
        Self {
            kalman_filter,
            mean: StateMean::zeros(),
            covariance: StateCov::zeros(),
            rect,
            state: STrackState::New,
            is_activated: false,
            score,
            label,
            track_id: 0,
            frame_id: 0,
            start_frame_id: 0,
            tracklet_len: 0,
        }
    }

    pub fn get_rect(&self) -> Rect<f32> {
        self.rect.clone()
    }

    pub fn get_state(&self) -> STrackState {
        self.state
    }

    pub fn is_activated(&self) -> bool {
        self.is_activated
    }

    pub fn get_score(&self) -> f32 {
        self.score
    }

    pub fn get_label(&self) -> usize {
        self.label
    }

    pub fn get_track_id(&self) -> usize {
        self.track_id
    }

    pub fn get_frame_id(&self) -> usize {
        self.frame_id
    }

    pub fn get_start_frame_id(&self) -> usize {
        self.start_frame_id
    }

    pub fn get_tracklet_length(&self) -> usize {
        self.tracklet_len
    }

    /// Start tracking: assign the id, seed the Kalman state from the
    /// current rect. Tracks born on the very first frame are confirmed
    /// immediately; anything later stays unconfirmed until re-matched.
    pub(crate) fn activate(&mut self, frame_id: usize, track_id: usize) {
        let (mean, covariance) =
            self.kalman_filter.initiate(&self.rect.get_xyah());
        self.mean = mean;
        self.covariance = covariance;
        self.update_rect();

        self.state = STrackState::Tracked;
        if frame_id == 1 {
            self.is_activated = true;
        }
        self.track_id = track_id;
        self.frame_id = frame_id;
        self.start_frame_id = frame_id;
        self.tracklet_len = 0;
    }

    /// Bring a lost track back on a fresh observation. The identity is
    /// preserved unless a replacement id is supplied.
    pub(crate) fn re_activate(
        &mut self,
        detection: &STrack,
        frame_id: usize,
        new_track_id: Option<usize>,
    ) -> Result<(), TrackError> {
        self.kalman_filter.update(
            &mut self.mean,
            &mut self.covariance,
            &detection.get_rect().get_xyah(),
        )?;
        self.update_rect();

        self.state = STrackState::Tracked;
        self.is_activated = true;
        self.score = detection.get_score();
        self.label = detection.get_label();
        if let Some(track_id) = new_track_id {
            self.track_id = track_id;
        }
        self.frame_id = frame_id;
        self.tracklet_len = 0;
        Ok(())
    }

    /// Advance the Kalman state by one step. Lost tracks have their
    /// height velocity zeroed first so they do not coast off-screen.
    pub(crate) fn predict(&mut self) {
        if self.state != STrackState::Tracked {
            self.mean[(0, 7)] = 0.0;
        }
        self.kalman_filter
            .predict(&mut self.mean, &mut self.covariance);
        self.update_rect();
    }

    pub(crate) fn multi_predict(tracks: &mut [&mut STrack]) {
        for track in tracks.iter_mut() {
            track.predict();
        }
    }

    /// Kalman correction from a matched detection; refreshes score and
    /// class label from the observation.
    pub(crate) fn update(
        &mut self,
        detection: &STrack,
        frame_id: usize,
    ) -> Result<(), TrackError> {
        self.kalman_filter.update(
            &mut self.mean,
            &mut self.covariance,
            &detection.get_rect().get_xyah(),
        )?;
        self.update_rect();

        self.state = STrackState::Tracked;
        self.is_activated = true;
        self.score = detection.get_score();
        self.label = detection.get_label();
        self.frame_id = frame_id;
        self.tracklet_len += 1;
        Ok(())
    }

    pub(crate) fn mark_lost(&mut self) {
        self.state = STrackState::Lost;
    }

    pub(crate) fn mark_removed(&mut self) {
        self.state = STrackState::Removed;
    }

    /// Pull the rect back out of the Kalman mean.
    fn update_rect(&mut self) {
        let height = self.mean[(0, 3)];
        let width = self.mean[(0, 2)] * height;
        self.rect.set_width(width);
        self.rect.set_height(height);
        self.rect.set_x(self.mean[(0, 0)] - width / 2.0);
        self.rect.set_y(self.mean[(0, 1)] - height / 2.0);
    }
}
