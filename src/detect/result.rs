use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel coordinates. `x1 < x2` and `y1 < y2` always hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[i32; 4]", into = "[i32; 4]")]
pub struct BoundingBox {
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Option<Self> {
        if x1 < x2 && y1 < y2 {
            Some(Self { x1, y1, x2, y2 })
        } else {
            None
        }
    }

    pub fn x1(&self) -> i32 {
        self.x1
    }

    pub fn y1(&self) -> i32 {
        self.y1
    }

    pub fn x2(&self) -> i32 {
        self.x2
    }

    pub fn y2(&self) -> i32 {
        self.y2
    }

    pub fn width(&self) -> u32 {
        (self.x2 - self.x1) as u32
    }

    pub fn height(&self) -> u32 {
        (self.y2 - self.y1) as u32
    }
}

impl TryFrom<[i32; 4]> for BoundingBox {
    type Error = String;

    fn try_from(value: [i32; 4]) -> Result<Self, Self::Error> {
        let [x1, y1, x2, y2] = value;
        Self::new(x1, y1, x2, y2)
            .ok_or_else(|| format!("degenerate box [{x1}, {y1}, {x2}, {y2}]"))
    }
}

impl From<BoundingBox> for [i32; 4] {
    fn from(value: BoundingBox) -> Self {
        [value.x1, value.y1, value.x2, value.y2]
    }
}

/// One object reported by a detector backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: u32,
    pub class_name: String,
    /// Score in `0.0..=1.0`.
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

/// Per-call detection parameters, taken from process configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectParams {
    pub confidence_threshold: f32,
    /// When set, only these class ids are reported.
    pub classes_to_track: Option<Vec<u32>>,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            classes_to_track: None,
        }
    }
}

impl DetectParams {
    pub fn admits_class(&self, class_id: u32) -> bool {
        self.classes_to_track
            .as_ref()
            .map_or(true, |classes| classes.contains(&class_id))
    }

    /// Returns true when the detection passes both the threshold and the class filter.
    pub fn admits(&self, detection: &Detection) -> bool {
        detection.confidence >= self.confidence_threshold && self.admits_class(detection.class_id)
    }
}
