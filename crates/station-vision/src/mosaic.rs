use image::RgbImage;
use tracing::{info, warn};

pub const MOSAIC_SNAPSHOTS: usize = 5;

/// Collects pilot-triggered snapshots from a feed for later stitching.
#[derive(Debug, Clone, Default)]
pub struct Mosaic {
    taken: usize,
    pending: bool,
}

impl Mosaic {
    /// Arm a capture of the next frame. Returns false once all slots are used.
    pub fn request_capture(&mut self) -> bool {
        if self.taken >= MOSAIC_SNAPSHOTS {
            warn!("mosaic already holds {MOSAIC_SNAPSHOTS} snapshots");
            return false;
        }
        self.pending = true;
        true
    }

    pub fn reset(&mut self) {
        self.taken = 0;
        self.pending = false;
    }

    /// Frames pass through untouched; an armed capture yields `(index, copy)`.
    pub fn process(&mut self, frame: RgbImage) -> (RgbImage, Option<(usize, RgbImage)>) {
        if !self.pending {
            return (frame, None);
        }
        self.pending = false;
        let index = self.taken;
        self.taken += 1;
        info!(index, "mosaic snapshot");
        let snap = frame.clone();
        (frame, Some((index, snap)))
    }
}
