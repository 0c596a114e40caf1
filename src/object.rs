use crate::rect::Rect;

/*------------------------------------------------------------------------------
Object struct
------------------------------------------------------------------------------*/

/// A detected or tracked object in pixel coordinates.
///
/// Detections enter the tracker without a `track_id`; emitted tracks carry
/// the identifier assigned by the detection tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub rect: Rect<f32>,
    pub label: usize,
    pub prob: f32,
    pub track_id: Option<usize>,
}

impl Object {
    pub fn new(rect: Rect<f32>, label: usize, prob: f32) -> Self {
        Self {
            rect,
            label,
            prob,
            track_id: None,
        }
    }

    pub fn with_track_id(mut self, track_id: usize) -> Self {
        self.track_id = Some(track_id);
        self
    }

    pub fn get_rect(&self) -> Rect<f32> {
        self.rect.clone()
    }

    pub fn get_label(&self) -> usize {
        self.label
    }

    pub fn get_prob(&self) -> f32 {
        self.prob
    }

    pub fn get_track_id(&self) -> Option<usize> {
        self.track_id
    }
}
