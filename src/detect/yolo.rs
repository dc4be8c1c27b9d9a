//! Post-processing for YOLOv8-style detection heads.
//!
//! The head emits a `[1, 4 + C, N]` tensor: for each of the `N` anchors, a
//! centre-format box `(cx, cy, w, h)` in model-input pixels followed by `C`
//! class scores. Decoding keeps the best class per anchor, then applies the
//! threshold, the class filter and class-wise non-maximum suppression.

use anyhow::{anyhow, Result};

use super::result::{BoundingBox, DetectParams, Detection};

/// Decoded anchor before suppression. Box is `[x1, y1, x2, y2]` in model-input pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    pub class_id: u32,
    pub confidence: f32,
    pub xyxy: [f32; 4],
}

pub fn decode_output(output: &[f32], shape: &[usize], params: &DetectParams) -> Result<Vec<Candidate>> {
    let (rows, anchors) = match shape {
        [1, rows, anchors] if *rows > 4 => (*rows, *anchors),
        other => return Err(anyhow!("unexpected detection head shape {:?}", other)),
    };
    if output.len() != rows * anchors {
        return Err(anyhow!(
            "detection head has {} values, expected {}",
            output.len(),
            rows * anchors
        ));
    }

    let num_classes = rows - 4;
    let mut candidates = Vec::new();
    for i in 0..anchors {
        let mut best_class = 0usize;
        let mut best_score = f32::NEG_INFINITY;
        for c in 0..num_classes {
            let score = output[(4 + c) * anchors + i];
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }
        if best_score < params.confidence_threshold || !params.admits_class(best_class as u32) {
            continue;
        }

        let cx = output[i];
        let cy = output[anchors + i];
        let w = output[2 * anchors + i];
        let h = output[3 * anchors + i];
        candidates.push(Candidate {
            class_id: best_class as u32,
            confidence: best_score,
            xyxy: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
        });
    }
    Ok(candidates)
}

/// Intersection over union of two `[x1, y1, x2, y2]` boxes.
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Class-wise non-maximum suppression. Output is sorted by descending confidence.
pub fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut suppressed = vec![false; candidates.len()];
    let mut keep = Vec::new();
    for i in 0..candidates.len() {
        if suppressed[i] {
            continue;
        }
        for j in (i + 1)..candidates.len() {
            if suppressed[j] || candidates[j].class_id != candidates[i].class_id {
                continue;
            }
            if iou(&candidates[i].xyxy, &candidates[j].xyxy) > iou_threshold {
                suppressed[j] = true;
            }
        }
        keep.push(candidates[i].clone());
    }
    keep
}

/// Map model-input boxes back onto the source image and attach class names.
///
/// Boxes are clamped to the image; boxes that collapse after clamping are dropped.
pub fn into_detections(
    candidates: Vec<Candidate>,
    scale: (f32, f32),
    image_dims: (u32, u32),
    class_names: &[String],
) -> Vec<Detection> {
    let (sx, sy) = scale;
    let (w, h) = (image_dims.0 as f32, image_dims.1 as f32);
    candidates
        .into_iter()
        .filter_map(|c| {
            let clamp = |v: f32, max: f32| v.clamp(0.0, max).round() as i32;
            let bbox = BoundingBox::new(
                clamp(c.xyxy[0] * sx, w),
                clamp(c.xyxy[1] * sy, h),
                clamp(c.xyxy[2] * sx, w),
                clamp(c.xyxy[3] * sy, h),
            )?;
            let class_name = class_names
                .get(c.class_id as usize)
                .cloned()
                .unwrap_or_else(|| format!("class_{}", c.class_id));
            Some(Detection {
                class_id: c.class_id,
                class_name,
                confidence: c.confidence.clamp(0.0, 1.0),
                bbox,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a `[1, 6, N]` head (two classes) from per-anchor rows.
    fn head(anchors: &[[f32; 6]]) -> (Vec<f32>, Vec<usize>) {
        let n = anchors.len();
        let mut out = vec![0.0; 6 * n];
        for (i, anchor) in anchors.iter().enumerate() {
            for (row, value) in anchor.iter().enumerate() {
                out[row * n + i] = *value;
            }
        }
        (out, vec![1, 6, n])
    }

    #[test]
    fn decodes_best_class_and_applies_threshold() {
        let (out, shape) = head(&[
            [50.0, 50.0, 20.0, 20.0, 0.9, 0.1],
            [10.0, 10.0, 4.0, 4.0, 0.2, 0.3],
            [80.0, 80.0, 10.0, 10.0, 0.1, 0.7],
        ]);
        let decoded = decode_output(&out, &shape, &DetectParams::default()).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].class_id, 0);
        assert_eq!(decoded[0].xyxy, [40.0, 40.0, 60.0, 60.0]);
        assert_eq!(decoded[1].class_id, 1);
    }

    #[test]
    fn class_filter_drops_untracked_best_class() {
        let (out, shape) = head(&[[50.0, 50.0, 20.0, 20.0, 0.9, 0.6]]);
        let params = DetectParams {
            confidence_threshold: 0.5,
            classes_to_track: Some(vec![1]),
        };
        assert!(decode_output(&out, &shape, &params).unwrap().is_empty());
    }

    #[test]
    fn rejects_mismatched_shape() {
        assert!(decode_output(&[0.0; 10], &[1, 4, 2], &DetectParams::default()).is_err());
        assert!(decode_output(&[0.0; 10], &[1, 6, 2], &DetectParams::default()).is_err());
    }

    #[test]
    fn nms_suppresses_overlaps_within_a_class_only() {
        let candidates = vec![
            Candidate { class_id: 0, confidence: 0.8, xyxy: [0.0, 0.0, 10.0, 10.0] },
            Candidate { class_id: 0, confidence: 0.9, xyxy: [1.0, 1.0, 11.0, 11.0] },
            Candidate { class_id: 1, confidence: 0.7, xyxy: [0.0, 0.0, 10.0, 10.0] },
            Candidate { class_id: 0, confidence: 0.6, xyxy: [50.0, 50.0, 60.0, 60.0] },
        ];
        let kept = non_max_suppression(candidates, 0.45);
        let confidences: Vec<f32> = kept.iter().map(|c| c.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.7, 0.6]);
    }

    #[test]
    fn iou_of_disjoint_and_identical_boxes() {
        let a = [0.0, 0.0, 10.0, 10.0];
        assert_eq!(iou(&a, &a), 1.0);
        assert_eq!(iou(&a, &[20.0, 20.0, 30.0, 30.0]), 0.0);
    }

    #[test]
    fn detections_are_rescaled_clamped_and_named() {
        let candidates = vec![
            Candidate { class_id: 0, confidence: 0.9, xyxy: [10.0, 10.0, 20.0, 20.0] },
            Candidate { class_id: 3, confidence: 0.8, xyxy: [-5.0, 60.0, 40.0, 90.0] },
            Candidate { class_id: 1, confidence: 0.7, xyxy: [70.0, 70.0, 90.0, 90.0] },
        ];
        let names = vec!["egg".to_string(), "empty".to_string()];
        let detections = into_detections(candidates, (2.0, 1.0), (100, 64), &names);

        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].class_name, "egg");
        assert_eq!(detections[0].bbox, BoundingBox::new(20, 10, 40, 20).unwrap());
        assert_eq!(detections[1].class_name, "class_3");
        assert_eq!(detections[1].bbox, BoundingBox::new(0, 60, 80, 64).unwrap());
    }
}
