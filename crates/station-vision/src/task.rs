use anyhow::Result;
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::mosaic::Mosaic;
use crate::transect::{Steering, TransectLine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    TransectLine,
    Mosaic,
}

/// Side-band output of a task, delivered next to the processed frame.
#[derive(Debug, Clone)]
pub enum TaskData {
    Steering(Steering),
    MosaicSnapshot { index: usize, image: RgbImage },
}

/// The closed set of per-feed vision tasks.
#[derive(Debug, Clone)]
pub enum VisionTask {
    TransectLine(TransectLine),
    Mosaic(Mosaic),
}

impl VisionTask {
    pub fn new(kind: TaskKind) -> Self {
        match kind {
            TaskKind::TransectLine => VisionTask::TransectLine(TransectLine::default()),
            TaskKind::Mosaic => VisionTask::Mosaic(Mosaic::default()),
        }
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            VisionTask::TransectLine(_) => TaskKind::TransectLine,
            VisionTask::Mosaic(_) => TaskKind::Mosaic,
        }
    }

    pub fn process(&mut self, frame: RgbImage) -> Result<(RgbImage, Option<TaskData>)> {
        Ok(match self {
            VisionTask::TransectLine(t) => {
                let (out, steering) = t.process(frame)?;
                (out, Some(TaskData::Steering(steering)))
            }
            VisionTask::Mosaic(m) => {
                let (out, snap) = m.process(frame);
                (out, snap.map(|(index, image)| TaskData::MosaicSnapshot { index, image }))
            }
        })
    }

    /// Only the mosaic task takes captures.
    pub fn request_capture(&mut self) -> bool {
        match self {
            VisionTask::Mosaic(m) => m.request_capture(),
            VisionTask::TransectLine(_) => false,
        }
    }

    pub fn reset(&mut self) {
        match self {
            VisionTask::Mosaic(m) => m.reset(),
            VisionTask::TransectLine(t) => *t = TransectLine::default(),
        }
    }
}
