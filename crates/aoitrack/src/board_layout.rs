//! Fiducial marker board layout.
//!
//! Board JSON follows a parametric schema (`aoitrack.board.v1`): marker
//! corners are generated at runtime from `(markers_x, markers_y,
//! marker_length, marker_separation)`. Per-marker coordinate lists are not
//! part of the schema.
//!
//! Board coordinates have their origin at the top-left corner of the first
//! marker, x to the right and y down. Marker ids run row-major from
//! `first_marker_id`. Template coordinates are pixels of the board drawn
//! centred into a `template_size` image with a fixed margin.

use std::collections::HashMap;
use std::path::Path;

pub const BOARD_SCHEMA_V1: &str = "aoitrack.board.v1";

const DEFAULT_NAME: &str = "board";
const DEFAULT_MARKERS_X: u32 = 3;
const DEFAULT_MARKERS_Y: u32 = 2;
const DEFAULT_MARKER_LENGTH: f64 = 0.1;
const DEFAULT_MARKER_SEPARATION: f64 = 0.1;
pub const DEFAULT_TEMPLATE_SIZE: [u32; 2] = [1920, 1080];
pub const DEFAULT_TEMPLATE_MARGIN: f64 = 40.0;

/// A single marker on the board, corners ordered TL, TR, BR, BL.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BoardMarker {
    pub id: u32,
    pub corners: [[f64; 2]; 4],
}

/// Parametric board description as stored on disk.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoardSpec {
    pub schema: String,
    pub name: String,
    pub markers_x: u32,
    pub markers_y: u32,
    pub marker_length: f64,
    pub marker_separation: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_marker_id: Option<u32>,
    #[serde(default = "default_template_size")]
    pub template_size: [u32; 2],
    #[serde(default = "default_template_margin")]
    pub margin: f64,
}

fn default_template_size() -> [u32; 2] {
    DEFAULT_TEMPLATE_SIZE
}

fn default_template_margin() -> f64 {
    DEFAULT_TEMPLATE_MARGIN
}

impl BoardSpec {
    /// Grid spec with default template geometry and no fixed first id.
    pub fn grid(
        name: &str,
        markers_x: u32,
        markers_y: u32,
        marker_length: f64,
        marker_separation: f64,
    ) -> Self {
        Self {
            schema: BOARD_SCHEMA_V1.to_string(),
            name: name.to_string(),
            markers_x,
            markers_y,
            marker_length,
            marker_separation,
            first_marker_id: None,
            template_size: DEFAULT_TEMPLATE_SIZE,
            margin: DEFAULT_TEMPLATE_MARGIN,
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn markers_per_board(&self) -> u32 {
        self.markers_x.saturating_mul(self.markers_y)
    }
}

impl Default for BoardSpec {
    fn default() -> Self {
        Self::grid(
            DEFAULT_NAME,
            DEFAULT_MARKERS_X,
            DEFAULT_MARKERS_Y,
            DEFAULT_MARKER_LENGTH,
            DEFAULT_MARKER_SEPARATION,
        )
    }
}

/// Runtime board layout used by the marker AOI detector.
#[derive(Debug, Clone)]
pub struct BoardLayout {
    pub name: String,
    pub markers_x: u32,
    pub markers_y: u32,
    pub marker_length: f64,
    pub marker_separation: f64,
    pub first_marker_id: u32,
    pub template_size: [u32; 2],
    pub margin: f64,
    pub markers: Vec<BoardMarker>,

    /// Fast lookup: marker ID -> index into `markers`.
    id_to_idx: HashMap<u32, usize>,
}

impl BoardLayout {
    /// Load and validate a board layout from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let spec = BoardSpec::from_json_file(path)?;
        Self::from_spec(spec).map_err(Into::into)
    }

    /// Build a layout from a spec; a missing `first_marker_id` means 0.
    pub fn from_spec(spec: BoardSpec) -> Result<Self, String> {
        if spec.schema != BOARD_SCHEMA_V1 {
            return Err(format!(
                "unsupported board schema '{}' (expected '{}')",
                spec.schema, BOARD_SCHEMA_V1
            ));
        }
        validate_board_spec(&spec)?;

        let first_marker_id = spec.first_marker_id.unwrap_or(0);
        let markers = generate_markers(&spec, first_marker_id)?;
        let id_to_idx = markers.iter().enumerate().map(|(i, m)| (m.id, i)).collect();

        Ok(Self {
            name: spec.name,
            markers_x: spec.markers_x,
            markers_y: spec.markers_y,
            marker_length: spec.marker_length,
            marker_separation: spec.marker_separation,
            first_marker_id,
            template_size: spec.template_size,
            margin: spec.margin,
            markers,
            id_to_idx,
        })
    }

    /// Spec that reproduces this layout.
    pub fn to_spec(&self) -> BoardSpec {
        BoardSpec {
            schema: BOARD_SCHEMA_V1.to_string(),
            name: self.name.clone(),
            markers_x: self.markers_x,
            markers_y: self.markers_y,
            marker_length: self.marker_length,
            marker_separation: self.marker_separation,
            first_marker_id: Some(self.first_marker_id),
            template_size: self.template_size,
            margin: self.margin,
        }
    }

    /// Board-space corners (TL, TR, BR, BL) for a marker ID.
    pub fn marker_corners(&self, id: u32) -> Option<[[f64; 2]; 4]> {
        self.id_to_idx.get(&id).map(|&idx| self.markers[idx].corners)
    }

    pub fn contains_id(&self, id: u32) -> bool {
        self.id_to_idx.contains_key(&id)
    }

    pub fn n_markers(&self) -> usize {
        self.markers.len()
    }

    pub fn marker_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.markers.iter().map(|m| m.id)
    }

    /// Board extent `[width, height]` in board units.
    pub fn board_size(&self) -> [f64; 2] {
        let pitch = self.marker_length + self.marker_separation;
        [
            (self.markers_x - 1) as f64 * pitch + self.marker_length,
            (self.markers_y - 1) as f64 * pitch + self.marker_length,
        ]
    }

    /// Reference quadrilateral (TL, TR, BR, BL) in board units.
    ///
    /// Multi-row multi-column boards frame the stimulus between the first and
    /// last marker columns; a single marker frames itself; single-row or
    /// single-column boards use the full extent.
    pub fn reference_quad_board(&self) -> [[f64; 2]; 4] {
        let [w, h] = self.board_size();
        let l = self.marker_length;
        if self.markers_x > 1 && self.markers_y > 1 {
            [[l, 0.0], [w - l, 0.0], [w - l, h], [l, h]]
        } else {
            [[0.0, 0.0], [w, 0.0], [w, h], [0.0, h]]
        }
    }

    /// Uniform scale and offset from board units to template pixels.
    pub fn template_transform(&self) -> (f64, [f64; 2]) {
        let [bw, bh] = self.board_size();
        let tw = self.template_size[0] as f64;
        let th = self.template_size[1] as f64;
        let scale = ((tw - 2.0 * self.margin) / bw).min((th - 2.0 * self.margin) / bh);
        let offset = [(tw - scale * bw) * 0.5, (th - scale * bh) * 0.5];
        (scale, offset)
    }

    pub fn to_template(&self, p: [f64; 2]) -> [f64; 2] {
        let (s, o) = self.template_transform();
        [o[0] + s * p[0], o[1] + s * p[1]]
    }

    /// Reference quadrilateral in template pixels.
    pub fn reference_quad(&self) -> [[f64; 2]; 4] {
        self.reference_quad_board().map(|p| self.to_template(p))
    }

    /// File name used for the rendered board snapshot.
    pub fn snapshot_name(&self) -> String {
        format!("aruco_{}.png", self.name)
    }
}

impl Default for BoardLayout {
    fn default() -> Self {
        Self::from_spec(BoardSpec::default()).expect("default board spec must be valid")
    }
}

fn validate_board_spec(spec: &BoardSpec) -> Result<(), String> {
    if spec.name.trim().is_empty() {
        return Err("board name must not be empty".to_string());
    }

    if spec.markers_x == 0 || spec.markers_y == 0 {
        return Err("markers_x and markers_y must be >= 1".to_string());
    }

    if !spec.marker_length.is_finite() || spec.marker_length <= 0.0 {
        return Err("marker_length must be finite and > 0".to_string());
    }

    if !spec.marker_separation.is_finite() || spec.marker_separation < 0.0 {
        return Err("marker_separation must be finite and >= 0".to_string());
    }

    // The stimulus area between the outer columns must have a width.
    if spec.markers_x == 2 && spec.markers_y > 1 && spec.marker_separation <= 0.0 {
        return Err("a two-column board needs marker_separation > 0".to_string());
    }

    if spec.template_size[0] == 0 || spec.template_size[1] == 0 {
        return Err("template_size must be non-zero".to_string());
    }

    if !spec.margin.is_finite() || spec.margin < 0.0 {
        return Err("margin must be finite and >= 0".to_string());
    }

    let usable = [
        spec.template_size[0] as f64 - 2.0 * spec.margin,
        spec.template_size[1] as f64 - 2.0 * spec.margin,
    ];
    if usable[0] <= 0.0 || usable[1] <= 0.0 {
        return Err(format!(
            "margin {} leaves no drawable area in a {}x{} template",
            spec.margin, spec.template_size[0], spec.template_size[1]
        ));
    }

    Ok(())
}

fn generate_markers(spec: &BoardSpec, first_marker_id: u32) -> Result<Vec<BoardMarker>, String> {
    let count = spec.markers_per_board();
    if first_marker_id.checked_add(count).is_none() {
        return Err(format!(
            "marker ids overflow: first id {} with {} markers",
            first_marker_id, count
        ));
    }
    let l = spec.marker_length;
    let pitch = spec.marker_length + spec.marker_separation;
    let mut markers = Vec::with_capacity(spec.markers_per_board() as usize);
    for row in 0..spec.markers_y {
        for col in 0..spec.markers_x {
            let x0 = col as f64 * pitch;
            let y0 = row as f64 * pitch;
            markers.push(BoardMarker {
                id: first_marker_id + row * spec.markers_x + col,
                corners: [[x0, y0], [x0 + l, y0], [x0 + l, y0 + l], [x0, y0 + l]],
            });
        }
    }
    Ok(markers)
}
