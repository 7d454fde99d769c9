//! Target selection: pick the single track to engage and normalise it.
//!
//! The policy is "largest box wins": among tracks with at least one history
//! point, the one with the greatest scale (box width) is chosen, since it is
//! the closest-looking pedestrian. Equal scales resolve to the lowest id.

use crate::{
    track::Track,
    types::{FrameSize, StateVec, TrackId},
};
use serde::{Deserialize, Serialize};

/// The selected target, normalised against the frame, ready for control.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FusedObservation {
    /// Horizontal offset from frame center in [-1, 1], positive = right
    pub offset_x: f64,
    /// Vertical offset from frame center in [-1, 1], positive = above
    pub offset_y: f64,
    /// Box width over frame width, ≥ 0
    pub proximity: f64,
    /// Which track was selected
    pub track_id: TrackId,
    /// Full filtered state of the selected track (diagnostics)
    pub state: StateVec,
}

impl FusedObservation {
    /// Normalise a track against `frame`. Returns `None` when the track's
    /// center or scale is not finite.
    pub fn from_track(track: &Track, frame: FrameSize) -> Option<Self> {
        let (cx, cy) = frame.center();
        let (x, y) = track.center();
        let scale = track.scale();
        if !(x.is_finite() && y.is_finite() && scale.is_finite()) || cx <= 0.0 || cy <= 0.0 {
            return None;
        }
        Some(Self {
            offset_x: ((x - cx) / cx).clamp(-1.0, 1.0),
            offset_y: ((cy - y) / cy).clamp(-1.0, 1.0),
            proximity: (scale / frame.width as f64).max(0.0),
            track_id: track.id,
            state: track.state,
        })
    }
}

/// Picks the track to engage each frame.
#[derive(Clone, Debug)]
pub struct TargetSelector {
    frame: FrameSize,
}

impl TargetSelector {
    pub fn new(frame: FrameSize) -> Self {
        Self { frame }
    }

    pub fn frame(&self) -> FrameSize {
        self.frame
    }

    /// The largest-scale track with history, ties to the lowest id.
    pub fn select<'a>(&self, tracks: &'a [Track]) -> Option<&'a Track> {
        tracks
            .iter()
            .filter(|t| !t.history.is_empty() && t.scale().is_finite())
            .min_by(|a, b| {
                b.scale()
                    .total_cmp(&a.scale())
                    .then(a.id.cmp(&b.id))
            })
    }

    /// Select and normalise in one step.
    pub fn observe(&self, tracks: &[Track]) -> Option<FusedObservation> {
        self.select(tracks)
            .and_then(|t| FusedObservation::from_track(t, self.frame))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StateCov;
    use approx::assert_abs_diff_eq;

    fn track(id: u64, cx: f64, cy: f64, w: f64) -> Track {
        Track::new(
            TrackId(id),
            StateVec::new(cx, cy, w, 2.0 * w, 0.0, 0.0),
            StateCov::identity(),
            0,
            8,
        )
    }

    #[test]
    fn largest_box_wins_not_most_central() {
        let sel = TargetSelector::new(FrameSize::new(960, 720));
        let tracks = vec![track(0, 480.0, 360.0, 40.0), track(1, 100.0, 100.0, 90.0)];
        assert_eq!(sel.select(&tracks).map(|t| t.id), Some(TrackId(1)));
    }

    #[test]
    fn tie_breaks_on_lowest_id() {
        let sel = TargetSelector::new(FrameSize::new(960, 720));
        let tracks = vec![track(5, 100.0, 100.0, 50.0), track(2, 800.0, 600.0, 50.0)];
        assert_eq!(sel.select(&tracks).map(|t| t.id), Some(TrackId(2)));
    }

    #[test]
    fn empty_set_selects_nothing() {
        let sel = TargetSelector::new(FrameSize::new(960, 720));
        assert!(sel.observe(&[]).is_none());
    }

    #[test]
    fn tracks_without_history_are_skipped() {
        let sel = TargetSelector::new(FrameSize::new(960, 720));
        let mut big = track(0, 480.0, 360.0, 200.0);
        big.history.clear();
        let tracks = vec![big, track(1, 480.0, 360.0, 20.0)];
        assert_eq!(sel.select(&tracks).map(|t| t.id), Some(TrackId(1)));
    }

    #[test]
    fn normalisation_against_frame_center() {
        let sel = TargetSelector::new(FrameSize::new(960, 720));
        let obs = sel.observe(&[track(0, 432.0, 180.0, 80.0)]).unwrap();
        assert_abs_diff_eq!(obs.offset_x, -0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(obs.offset_y, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(obs.proximity, 80.0 / 960.0, epsilon = 1e-12);
    }

    #[test]
    fn offsets_are_clamped() {
        let sel = TargetSelector::new(FrameSize::new(960, 720));
        let obs = sel.observe(&[track(0, 2000.0, -500.0, 10.0)]).unwrap();
        assert_eq!(obs.offset_x, 1.0);
        assert_eq!(obs.offset_y, 1.0);
    }
}
