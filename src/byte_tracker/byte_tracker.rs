use super::assoc::{self, AssignmentResult};
use super::strack::{STrack, STrackState};
use crate::error::TrackError;
use crate::object::Object;
use crate::rect::Rect;
use log::debug;
use std::collections::HashSet;

/// Detection score splitting the two association stages.
const TRACK_THRESH: f32 = 0.5;
/// Minimum score for starting a brand-new track.
const HIGH_THRESH: f32 = 0.7;
/// IoU-cost limit of the first association stage.
const MATCH_THRESH: f32 = 0.8;
/// IoU-cost limit of the low-score association stage.
const LOW_MATCH_THRESH: f32 = 0.5;
/// IoU-cost limit of the unconfirmed-track stage.
const UNCONFIRMED_MATCH_THRESH: f32 = 0.7;
/// Output de-duplication IoU bound.
const DUPLICATE_IOU: f32 = 0.85;

/*-----------------------------------------------------------------------------
ByteTracker
-----------------------------------------------------------------------------*/

/// Byte-style detection-level tracker.
///
/// Associates per-keyframe detections with Kalman-predicted tracks in a
/// two-stage IoU cascade (high-confidence then low-confidence detections)
/// and manages the tracked / lost / removed pools.
#[derive(Debug)]
pub struct ByteTracker {
    max_time_lost: usize,

    frame_id: usize,
    track_id_count: usize,

    tracked_stracks: Vec<STrack>,
    lost_stracks: Vec<STrack>,
    removed_stracks: Vec<STrack>,
}

impl ByteTracker {
    pub fn new(frame_rate: usize, track_buffer: usize) -> Self {
        let max_time_lost =
            (frame_rate as f32 / 30.0 * track_buffer as f32) as usize;
        Self {
            max_time_lost,
            frame_id: 0,
            track_id_count: 0,
            tracked_stracks: Vec::new(),
            lost_stracks: Vec::new(),
            removed_stracks: Vec::new(),
        }
    }

    pub fn frame_id(&self) -> usize {
        self.frame_id
    }

    pub fn max_time_lost(&self) -> usize {
        self.max_time_lost
    }

    /// Drop all tracks and restart frame and id counters.
    pub fn reset(&mut self) {
        self.frame_id = 0;
        self.track_id_count = 0;
        self.tracked_stracks.clear();
        self.lost_stracks.clear();
        self.removed_stracks.clear();
    }

    /// Run one cascade step over the detections of a keyframe and return
    /// snapshots of every confirmed track.
    pub fn update(
        &mut self,
        detections: &[Object],
    ) -> Result<Vec<Object>, TrackError> {
        self.frame_id += 1;
        let frame_id = self.frame_id;

        // Step 1: wrap detections and split them by score.
        let mut det_high = Vec::new();
        let mut det_low = Vec::new();
        for obj in detections {
            if obj.rect.is_empty() {
                debug!(
                    "frame {frame_id}: dropping degenerate detection {:?}",
                    obj.rect
                );
                continue;
            }
            let strack =
                STrack::new(obj.get_rect(), obj.get_label(), obj.get_prob());
            if obj.get_prob() >= TRACK_THRESH {
                det_high.push(strack);
            } else {
                det_low.push(strack);
            }
        }

        // Step 2: split the tracked pool into confirmed and unconfirmed.
        let mut unconfirmed = Vec::new();
        let mut confirmed = Vec::new();
        for track in self.tracked_stracks.drain(..) {
            if track.is_activated() {
                confirmed.push(track);
            } else {
                unconfirmed.push(track);
            }
        }

        // Step 3: predict everything in confirmed + lost.
        let joined = Self::joint_stracks(
            confirmed,
            std::mem::take(&mut self.lost_stracks),
        );
        let mut pool: Vec<Option<STrack>> =
            joined.into_iter().map(Some).collect();
        {
            let mut tracks: Vec<&mut STrack> =
                pool.iter_mut().filter_map(|t| t.as_mut()).collect();
            STrack::multi_predict(&mut tracks);
        }

        let mut activated = Vec::new();
        let mut refound = Vec::new();
        let mut newly_lost = Vec::new();
        let mut removed = Vec::new();

        // Step 4: first association, confirmed + lost against high scores.
        let pool_rects: Vec<Rect<f32>> = pool
            .iter()
            .filter_map(|t| t.as_ref().map(|t| t.get_rect()))
            .collect();
        let det_rects: Vec<Rect<f32>> =
            det_high.iter().map(|d| d.get_rect()).collect();
        let dists = assoc::iou_distance(&pool_rects, &det_rects);
        let AssignmentResult {
            matches,
            unmatched_tracks,
            unmatched_detections,
        } = assoc::linear_assignment(&dists, MATCH_THRESH)?;

        for (itrack, idet) in matches {
            let mut track = pool[itrack].take().expect("assignment yielded a duplicate index");
            let det = &det_high[idet];
            if track.get_state() == STrackState::Tracked {
                track.update(det, frame_id)?;
                activated.push(track);
            } else {
                track.re_activate(det, frame_id, None)?;
                refound.push(track);
            }
        }

        // Step 5: second association, still-tracked leftovers against the
        // low-score detections.
        let mut r_tracked: Vec<Option<STrack>> = unmatched_tracks
            .iter()
            .filter_map(|&itrack| {
                let is_tracked = pool[itrack]
                    .as_ref()
                    .is_some_and(|t| t.get_state() == STrackState::Tracked);
                if is_tracked {
                    pool[itrack].take().map(Some)
                } else {
                    None
                }
            })
            .collect();

        let r_rects: Vec<Rect<f32>> = r_tracked
            .iter()
            .filter_map(|t| t.as_ref().map(|t| t.get_rect()))
            .collect();
        let low_rects: Vec<Rect<f32>> =
            det_low.iter().map(|d| d.get_rect()).collect();
        let dists = assoc::iou_distance(&r_rects, &low_rects);
        let second = assoc::linear_assignment(&dists, LOW_MATCH_THRESH)?;

        for (itrack, idet) in second.matches {
            let mut track = r_tracked[itrack].take().expect("assignment yielded a duplicate index");
            track.update(&det_low[idet], frame_id)?;
            activated.push(track);
        }
        for itrack in second.unmatched_tracks {
            if let Some(mut track) = r_tracked[itrack].take() {
                track.mark_lost();
                newly_lost.push(track);
            }
        }

        // Step 6: unconfirmed tracks against the remaining high scores.
        let remaining_high: Vec<STrack> = unmatched_detections
            .iter()
            .map(|&idet| det_high[idet].clone())
            .collect();
        let unconf_rects: Vec<Rect<f32>> =
            unconfirmed.iter().map(|t| t.get_rect()).collect();
        let rem_rects: Vec<Rect<f32>> =
            remaining_high.iter().map(|d| d.get_rect()).collect();
        let dists = assoc::iou_distance(&unconf_rects, &rem_rects);
        let third =
            assoc::linear_assignment(&dists, UNCONFIRMED_MATCH_THRESH)?;

        let mut unconfirmed: Vec<Option<STrack>> =
            unconfirmed.into_iter().map(Some).collect();
        for (itrack, idet) in third.matches {
            let mut track =
                unconfirmed[itrack].take().expect("assignment yielded a duplicate index");
            track.update(&remaining_high[idet], frame_id)?;
            activated.push(track);
        }
        for itrack in third.unmatched_tracks {
            if let Some(mut track) = unconfirmed[itrack].take() {
                track.mark_removed();
                removed.push(track);
            }
        }

        // Step 7: open a new track for every leftover high-score detection
        // that clears the new-track threshold.
        for idet in third.unmatched_detections {
            let mut track = remaining_high[idet].clone();
            if track.get_score() < HIGH_THRESH {
                continue;
            }
            self.track_id_count += 1;
            track.activate(frame_id, self.track_id_count);
            activated.push(track);
        }

        // Step 8: expire stale lost tracks, rebuild the pools.
        let mut kept_lost = Vec::new();
        for mut track in pool.into_iter().flatten() {
            if frame_id - track.get_frame_id() > self.max_time_lost {
                track.mark_removed();
                removed.push(track);
            } else {
                kept_lost.push(track);
            }
        }

        self.tracked_stracks = Self::joint_stracks(activated, refound);
        self.removed_stracks.extend(removed);

        let mut lost =
            Self::sub_stracks(kept_lost, &self.tracked_stracks);
        lost.extend(newly_lost);
        let lost = Self::sub_stracks(lost, &self.removed_stracks);

        // Step 9: de-duplicate confirmed against lost tracks.
        let (tracked, lost) = Self::remove_duplicate_stracks(
            std::mem::take(&mut self.tracked_stracks),
            lost,
        );
        self.tracked_stracks = tracked;
        self.lost_stracks = lost;

        // The removed pool only feeds the subtraction above; entries far
        // past expiry can go.
        let horizon = 2 * self.max_time_lost;
        let current = self.frame_id;
        self.removed_stracks
            .retain(|t| current - t.get_frame_id() <= horizon);

        // Step 10: emit confirmed tracks.
        Ok(self
            .tracked_stracks
            .iter()
            .filter(|t| t.is_activated())
            .map(strack_to_object)
            .collect())
    }

    /// Overwrite Kalman state from externally propagated boxes, matching
    /// by track id. Counts as one frame for lost-track expiry.
    pub fn resync_kalman_filters(
        &mut self,
        propagated: &[Object],
    ) -> Result<(), TrackError> {
        self.frame_id += 1;
        let frame_id = self.frame_id;
        let mut synced = 0usize;

        for obj in propagated {
            let Some(track_id) = obj.get_track_id() else {
                continue;
            };
            let observation =
                STrack::new(obj.get_rect(), obj.get_label(), obj.get_prob());

            if let Some(track) = self
                .tracked_stracks
                .iter_mut()
                .find(|t| t.get_track_id() == track_id)
            {
                track.update(&observation, frame_id)?;
                synced += 1;
                continue;
            }

            if let Some(pos) = self
                .lost_stracks
                .iter()
                .position(|t| t.get_track_id() == track_id)
            {
                let mut track = self.lost_stracks.remove(pos);
                track.re_activate(&observation, frame_id, None)?;
                self.tracked_stracks.push(track);
                synced += 1;
            } else {
                debug!("resync: unknown track id {track_id}, dropped");
            }
        }

        debug!(
            "frame {frame_id}: resynced {synced}/{} kalman filters",
            propagated.len()
        );
        Ok(())
    }

    /// Union of two track lists, first occurrence of an id wins.
    fn joint_stracks(
        a_tracks: Vec<STrack>,
        b_tracks: Vec<STrack>,
    ) -> Vec<STrack> {
        let mut exists = HashSet::new();
        let mut res = Vec::with_capacity(a_tracks.len() + b_tracks.len());
        for track in a_tracks.into_iter().chain(b_tracks) {
            if exists.insert(track.get_track_id()) {
                res.push(track);
            }
        }
        res
    }

    /// Tracks of `a_tracks` whose id does not occur in `b_tracks`,
    /// keeping the order of `a_tracks`.
    fn sub_stracks(
        a_tracks: Vec<STrack>,
        b_tracks: &[STrack],
    ) -> Vec<STrack> {
        let b_ids: HashSet<usize> =
            b_tracks.iter().map(|t| t.get_track_id()).collect();
        a_tracks
            .into_iter()
            .filter(|t| !b_ids.contains(&t.get_track_id()))
            .collect()
    }

    /// Cross-pool duplicate removal: of any tracked/lost pair overlapping
    /// above `DUPLICATE_IOU`, the longer tracklet survives (lower id on a
    /// tie).
    fn remove_duplicate_stracks(
        tracked: Vec<STrack>,
        lost: Vec<STrack>,
    ) -> (Vec<STrack>, Vec<STrack>) {
        if tracked.is_empty() || lost.is_empty() {
            return (tracked, lost);
        }

        let tracked_rects: Vec<Rect<f32>> =
            tracked.iter().map(|t| t.get_rect()).collect();
        let lost_rects: Vec<Rect<f32>> =
            lost.iter().map(|t| t.get_rect()).collect();
        let ious = assoc::calc_ious(&tracked_rects, &lost_rects);

        let mut dup_tracked = vec![false; tracked.len()];
        let mut dup_lost = vec![false; lost.len()];
        for (i, row) in ious.iter().enumerate() {
            for (j, &iou) in row.iter().enumerate() {
                if iou <= DUPLICATE_IOU {
                    continue;
                }
                let a = &tracked[i];
                let b = &lost[j];
                let keep_tracked = match a
                    .get_tracklet_length()
                    .cmp(&b.get_tracklet_length())
                {
                    std::cmp::Ordering::Greater => true,
                    std::cmp::Ordering::Less => false,
                    std::cmp::Ordering::Equal => {
                        a.get_track_id() < b.get_track_id()
                    }
                };
                if keep_tracked {
                    dup_lost[j] = true;
                } else {
                    dup_tracked[i] = true;
                }
            }
        }

        let tracked = tracked
            .into_iter()
            .zip(dup_tracked)
            .filter_map(|(t, dup)| (!dup).then_some(t))
            .collect();
        let lost = lost
            .into_iter()
            .zip(dup_lost)
            .filter_map(|(t, dup)| (!dup).then_some(t))
            .collect();
        (tracked, lost)
    }
}

fn strack_to_object(track: &STrack) -> Object {
    Object::new(track.get_rect(), track.get_label(), track.get_score())
        .with_track_id(track.get_track_id())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, y: f32, w: f32, h: f32, score: f32) -> Object {
        Object::new(Rect::new(x, y, w, h), 0, score)
    }

    fn single_id(tracks: &[Object]) -> usize {
        assert_eq!(tracks.len(), 1, "expected exactly one track");
        tracks[0].get_track_id().unwrap()
    }

    #[test]
    fn test_identity_persists_under_linear_motion() {
        let mut tracker = ByteTracker::new(30, 30);

        let first = tracker
            .update(&[det(100.0, 100.0, 50.0, 50.0, 0.9)])
            .unwrap();
        let id = single_id(&first);

        for i in 1..30 {
            let x = 100.0 + i as f32 * 3.5;
            let out = tracker.update(&[det(x, 100.0, 50.0, 50.0, 0.9)]).unwrap();
            assert_eq!(single_id(&out), id, "id changed on frame {}", i + 1);
        }
    }

    #[test]
    fn test_two_objects_get_distinct_monotone_ids() {
        let mut tracker = ByteTracker::new(30, 30);

        let out = tracker
            .update(&[
                det(50.0, 50.0, 40.0, 40.0, 0.9),
                det(400.0, 300.0, 40.0, 40.0, 0.9),
            ])
            .unwrap();
        assert_eq!(out.len(), 2);
        let ids: Vec<usize> =
            out.iter().map(|t| t.get_track_id().unwrap()).collect();
        assert!(ids[0] < ids[1]);

        // A third object later gets a strictly larger id.
        for _ in 0..2 {
            tracker
                .update(&[
                    det(50.0, 50.0, 40.0, 40.0, 0.9),
                    det(400.0, 300.0, 40.0, 40.0, 0.9),
                    det(200.0, 400.0, 40.0, 40.0, 0.9),
                ])
                .unwrap();
        }
        let out = tracker
            .update(&[
                det(50.0, 50.0, 40.0, 40.0, 0.9),
                det(400.0, 300.0, 40.0, 40.0, 0.9),
                det(200.0, 400.0, 40.0, 40.0, 0.9),
            ])
            .unwrap();
        assert_eq!(out.len(), 3);
        let max_new = out
            .iter()
            .map(|t| t.get_track_id().unwrap())
            .max()
            .unwrap();
        assert!(max_new > ids[1]);
    }

    #[test]
    fn test_reidentifies_after_short_occlusion() {
        let mut tracker = ByteTracker::new(30, 30);

        let mut id = 0;
        for i in 0..10 {
            let x = 100.0 + i as f32 * 2.0;
            let out = tracker.update(&[det(x, 100.0, 50.0, 50.0, 0.9)]).unwrap();
            id = single_id(&out);
        }

        // Five frames of occlusion.
        for _ in 0..5 {
            let out = tracker.update(&[]).unwrap();
            assert!(out.is_empty());
        }

        // Reappears close to the coasted prediction.
        let out = tracker
            .update(&[det(130.0, 100.0, 50.0, 50.0, 0.9)])
            .unwrap();
        assert_eq!(single_id(&out), id);
    }

    #[test]
    fn test_new_id_after_expiry() {
        // max_time_lost = 30/30 * 2 = 2 frames.
        let mut tracker = ByteTracker::new(30, 2);

        let mut id = 0;
        for _ in 0..3 {
            let out = tracker
                .update(&[det(100.0, 100.0, 50.0, 50.0, 0.9)])
                .unwrap();
            id = single_id(&out);
        }

        for _ in 0..7 {
            tracker.update(&[]).unwrap();
        }

        // The old track has been removed; reappearance founds a new one.
        let out = tracker
            .update(&[det(100.0, 100.0, 50.0, 50.0, 0.9)])
            .unwrap();
        assert!(out.is_empty(), "fresh track must not be confirmed yet");
        let out = tracker
            .update(&[det(100.0, 100.0, 50.0, 50.0, 0.9)])
            .unwrap();
        let new_id = single_id(&out);
        assert!(new_id > id);
    }

    #[test]
    fn test_single_frame_detection_is_suppressed() {
        let mut tracker = ByteTracker::new(30, 30);

        tracker.update(&[]).unwrap();
        let out = tracker
            .update(&[det(100.0, 100.0, 50.0, 50.0, 0.9)])
            .unwrap();
        assert!(out.is_empty(), "unconfirmed track must not be emitted");

        // Nothing on the next frame: the unconfirmed track dies.
        let out = tracker.update(&[]).unwrap();
        assert!(out.is_empty());

        // Even a matching detection afterwards starts over unconfirmed.
        let out = tracker
            .update(&[det(100.0, 100.0, 50.0, 50.0, 0.9)])
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_no_track_from_mid_score_detection() {
        let mut tracker = ByteTracker::new(30, 30);
        for _ in 0..5 {
            let out = tracker
                .update(&[det(100.0, 100.0, 50.0, 50.0, 0.6)])
                .unwrap();
            assert!(out.is_empty());
        }
    }

    #[test]
    fn test_low_score_flicker_keeps_identity() {
        let mut tracker = ByteTracker::new(30, 30);

        let out = tracker
            .update(&[det(100.0, 100.0, 50.0, 50.0, 0.9)])
            .unwrap();
        let id = single_id(&out);

        for i in 1..10 {
            let score = if i % 2 == 0 { 0.9 } else { 0.4 };
            let x = 100.0 + i as f32 * 2.0;
            let out =
                tracker.update(&[det(x, 100.0, 50.0, 50.0, score)]).unwrap();
            assert_eq!(single_id(&out), id, "id changed on frame {}", i + 1);
        }
    }

    #[test]
    fn test_degenerate_detection_rejected() {
        let mut tracker = ByteTracker::new(30, 30);
        let out = tracker
            .update(&[det(100.0, 100.0, 0.0, 50.0, 0.9)])
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(tracker.track_id_count, 0);
    }

    #[test]
    fn test_output_has_no_duplicate_overlaps() {
        let mut tracker = ByteTracker::new(30, 30);
        for i in 0..12 {
            let x = 100.0 + i as f32 * 2.0;
            let out = tracker
                .update(&[
                    det(x, 100.0, 50.0, 50.0, 0.9),
                    det(x + 200.0, 100.0, 50.0, 50.0, 0.9),
                ])
                .unwrap();
            for a in 0..out.len() {
                for b in (a + 1)..out.len() {
                    let iou =
                        out[a].get_rect().calc_iou(&out[b].get_rect());
                    assert!(iou <= DUPLICATE_IOU);
                }
            }
        }
    }

    #[test]
    fn test_remove_duplicate_prefers_longer_tracklet() {
        let rect = Rect::new(100.0f32, 100.0, 50.0, 50.0);

        let mut long_track = STrack::new(rect.clone(), 0, 0.9);
        long_track.activate(1, 1);
        for f in 2..5 {
            long_track.predict();
            long_track
                .update(&STrack::new(rect.clone(), 0, 0.9), f)
                .unwrap();
        }

        let mut short_track = STrack::new(rect.clone(), 0, 0.9);
        short_track.activate(3, 2);
        short_track.mark_lost();

        let (tracked, lost) = ByteTracker::remove_duplicate_stracks(
            vec![long_track],
            vec![short_track],
        );
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].get_track_id(), 1);
        assert!(lost.is_empty());
    }

    #[test]
    fn test_resync_updates_known_track() {
        let mut tracker = ByteTracker::new(30, 30);
        let out = tracker
            .update(&[det(100.0, 100.0, 50.0, 50.0, 0.9)])
            .unwrap();
        let id = single_id(&out);

        let moved = det(120.0, 100.0, 50.0, 50.0, 0.9).with_track_id(id);
        tracker.resync_kalman_filters(&[moved]).unwrap();
        assert_eq!(tracker.frame_id(), 2);

        let track = &tracker.tracked_stracks[0];
        assert!(track.get_rect().x() > 100.0);
        assert_eq!(track.get_frame_id(), 2);
    }

    #[test]
    fn test_resync_ignores_unknown_id() {
        let mut tracker = ByteTracker::new(30, 30);
        tracker
            .update(&[det(100.0, 100.0, 50.0, 50.0, 0.9)])
            .unwrap();

        let ghost = det(300.0, 300.0, 50.0, 50.0, 0.9).with_track_id(999);
        tracker.resync_kalman_filters(&[ghost]).unwrap();

        assert_eq!(tracker.tracked_stracks.len(), 1);
        assert!(tracker.lost_stracks.is_empty());
        assert_eq!(tracker.tracked_stracks[0].get_track_id(), 1);
    }

    #[test]
    fn test_resync_reactivates_lost_track() {
        let mut tracker = ByteTracker::new(30, 30);
        let out = tracker
            .update(&[det(100.0, 100.0, 50.0, 50.0, 0.9)])
            .unwrap();
        let id = single_id(&out);

        // Track goes lost.
        tracker.update(&[]).unwrap();
        assert_eq!(tracker.lost_stracks.len(), 1);

        let seen = det(104.0, 100.0, 50.0, 50.0, 0.9).with_track_id(id);
        tracker.resync_kalman_filters(&[seen]).unwrap();
        assert!(tracker.lost_stracks.is_empty());
        assert_eq!(tracker.tracked_stracks.len(), 1);
        assert_eq!(
            tracker.tracked_stracks[0].get_state(),
            STrackState::Tracked
        );
    }

    #[test]
    fn test_reset_clears_state_and_ids() {
        let mut tracker = ByteTracker::new(30, 30);
        tracker
            .update(&[det(100.0, 100.0, 50.0, 50.0, 0.9)])
            .unwrap();
        tracker.reset();

        assert_eq!(tracker.frame_id(), 0);
        let out = tracker
            .update(&[det(100.0, 100.0, 50.0, 50.0, 0.9)])
            .unwrap();
        assert_eq!(single_id(&out), 1);
    }
}
