//! Scene-video frames paired with the gaze sample nearest to each frame.
//!
//! Video decoding stays outside the crate: a [`FrameSource`] hands out
//! grayscale frames with presentation timestamps. [`ImageSequenceSource`]
//! reads a directory of extracted frames; a `VecDeque<Frame>` serves frames
//! already in memory.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use image::GrayImage;

use crate::sample::GazeSeries;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

// ── Error type ───────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum FrameError {
    Io { path: PathBuf, source: std::io::Error },
    Decode { path: PathBuf, message: String },
    InvalidFps(f64),
    /// No gaze samples to pair frames with.
    NoGaze,
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "{}: {}", path.display(), source),
            Self::Decode { path, message } => {
                write!(f, "cannot decode {}: {}", path.display(), message)
            }
            Self::InvalidFps(fps) => write!(f, "fps must be finite and > 0, got {}", fps),
            Self::NoGaze => write!(f, "gaze series is empty"),
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

// ── Frame sources ────────────────────────────────────────────────────────

/// One decoded frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: GrayImage,
    /// Presentation timestamp in milliseconds of video time.
    pub pts_ms: f64,
}

/// Pull-based frame supplier. `None` marks the end of the video.
pub trait FrameSource {
    fn next_frame(&mut self) -> Option<Result<Frame, FrameError>>;
}

impl FrameSource for VecDeque<Frame> {
    fn next_frame(&mut self) -> Option<Result<Frame, FrameError>> {
        self.pop_front().map(Ok)
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Option<Result<Frame, FrameError>> {
        (**self).next_frame()
    }
}

/// Frames stored as numbered image files, played back at a fixed rate.
#[derive(Debug, Clone)]
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    fps: f64,
    next: usize,
}

impl ImageSequenceSource {
    /// All image files in `dir`, ordered by file name.
    pub fn open(dir: &Path, fps: f64) -> Result<Self, FrameError> {
        let io_err = |source| FrameError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            if path.is_file() && is_image {
                paths.push(path);
            }
        }
        paths.sort();
        tracing::info!("found {} frames in {}", paths.len(), dir.display());
        Self::from_paths(paths, fps)
    }

    pub fn from_paths(paths: Vec<PathBuf>, fps: f64) -> Result<Self, FrameError> {
        if !fps.is_finite() || fps <= 0.0 {
            return Err(FrameError::InvalidFps(fps));
        }
        Ok(Self {
            paths,
            fps,
            next: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Option<Result<Frame, FrameError>> {
        let path = self.paths.get(self.next)?;
        let pts_ms = self.next as f64 * 1000.0 / self.fps;
        self.next += 1;
        let decoded = image::open(path).map_err(|e| FrameError::Decode {
            path: path.clone(),
            message: e.to_string(),
        });
        Some(decoded.map(|img| Frame {
            image: img.to_luma8(),
            pts_ms,
        }))
    }
}

// ── Synchronisation ──────────────────────────────────────────────────────

/// Gaze-clock timestamp paired with the video timestamp it was logged at.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SyncPair {
    pub gaze_ts: f64,
    pub video_ts: f64,
}

/// Piecewise-constant mapping from video time to gaze time.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(from = "Vec<SyncPair>", into = "Vec<SyncPair>")]
pub struct VideoSync {
    pairs: Vec<SyncPair>,
}

impl From<Vec<SyncPair>> for VideoSync {
    fn from(mut pairs: Vec<SyncPair>) -> Self {
        pairs.retain(|p| p.gaze_ts.is_finite() && p.video_ts.is_finite());
        pairs.sort_by(|a, b| a.video_ts.total_cmp(&b.video_ts));
        Self { pairs }
    }
}

impl From<VideoSync> for Vec<SyncPair> {
    fn from(sync: VideoSync) -> Self {
        sync.pairs
    }
}

impl VideoSync {
    pub fn new(pairs: impl IntoIterator<Item = (f64, f64)>) -> Self {
        pairs
            .into_iter()
            .map(|(gaze_ts, video_ts)| SyncPair { gaze_ts, video_ts })
            .collect::<Vec<_>>()
            .into()
    }

    /// Load a JSON array of `{"gaze_ts", "video_ts"}` objects.
    pub fn from_json_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let data = std::fs::read_to_string(path)?;
        let pairs: Vec<SyncPair> = serde_json::from_str(&data)?;
        Ok(pairs.into())
    }

    pub fn pairs(&self) -> &[SyncPair] {
        &self.pairs
    }

    /// Offset (gaze − video) in effect at video time `pts_ms`.
    pub fn offset_at(&self, pts_ms: f64) -> f64 {
        let idx = self.pairs.partition_point(|p| p.video_ts <= pts_ms);
        let pair = match idx {
            0 => self.pairs.first(),
            i => self.pairs.get(i - 1),
        };
        pair.map_or(0.0, |p| p.gaze_ts - p.video_ts)
    }

    pub fn to_gaze_time(&self, pts_ms: f64) -> f64 {
        pts_ms + self.offset_at(pts_ms)
    }
}

// ── Co-iteration ─────────────────────────────────────────────────────────

/// A frame with the gaze sample nearest to it.
#[derive(Debug, Clone)]
pub struct FrameGaze {
    pub frame: Frame,
    pub x: f64,
    pub y: f64,
    /// Timestamp of the gaze sample used.
    pub ts: f64,
}

/// Lazy, single-pass pairing of frames and gaze samples.
///
/// A frame source error is yielded once and ends the iteration.
pub struct FramesAndGaze<S> {
    source: S,
    gaze: GazeSeries,
    sync: VideoSync,
    done: bool,
}

impl<S: FrameSource> FramesAndGaze<S> {
    pub fn new(source: S, gaze: GazeSeries, sync: VideoSync) -> Result<Self, FrameError> {
        if gaze.is_empty() {
            return Err(FrameError::NoGaze);
        }
        Ok(Self {
            source,
            gaze,
            sync,
            done: false,
        })
    }
}

impl<S: FrameSource> Iterator for FramesAndGaze<S> {
    type Item = Result<FrameGaze, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let frame = match self.source.next_frame() {
            None => {
                self.done = true;
                return None;
            }
            Some(Err(e)) => {
                self.done = true;
                return Some(Err(e));
            }
            Some(Ok(frame)) => frame,
        };
        let t = self.sync.to_gaze_time(frame.pts_ms);
        let Some(sample) = self.gaze.nearest(t) else {
            self.done = true;
            return Some(Err(FrameError::NoGaze));
        };
        Some(Ok(FrameGaze {
            x: sample.x,
            y: sample.y,
            ts: sample.ts,
            frame,
        }))
    }
}

impl<S: FrameSource> std::iter::FusedIterator for FramesAndGaze<S> {}
