//! Bounding guide geometry

use super::Landmark;

/// Axis-aligned box in normalized [0, 1] coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuideBox {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl GuideBox {
    pub fn width(&self) -> f32 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f32 {
        self.max_y - self.min_y
    }

    /// Pixel rectangle `(x0, y0, x1, y1)` on a `width` x `height` surface,
    /// inclusive and within bounds.
    pub fn to_pixels(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let max_x = width.saturating_sub(1) as f32;
        let max_y = height.saturating_sub(1) as f32;
        (
            (self.min_x * max_x).round() as u32,
            (self.min_y * max_y).round() as u32,
            (self.max_x * max_x).round() as u32,
            (self.max_y * max_y).round() as u32,
        )
    }
}

/// Min/max of all landmarks, grown by `padding` (a fraction of the box size
/// on each side) and clamped to the image.
///
/// Returns `None` if there are no landmarks with finite coordinates.
pub fn guide_box(landmarks: &[Landmark], padding: f32) -> Option<GuideBox> {
    let mut points = landmarks
        .iter()
        .filter(|l| l.x.is_finite() && l.y.is_finite())
        .map(|l| (l.x, l.y));

    let (x, y) = points.next()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (x, y, x, y);
    for (x, y) in points {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }

    let padding = padding.max(0.0);
    let pad_x = (max_x - min_x) * padding;
    let pad_y = (max_y - min_y) * padding;

    Some(GuideBox {
        min_x: (min_x - pad_x).clamp(0.0, 1.0),
        min_y: (min_y - pad_y).clamp(0.0, 1.0),
        max_x: (max_x + pad_x).clamp(0.0, 1.0),
        max_y: (max_y + pad_y).clamp(0.0, 1.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn test_box_spans_landmarks_with_padding() {
        let landmarks = vec![
            Landmark::new("left_shoulder", 0.4, 0.3),
            Landmark::new("right_hip", 0.6, 0.7),
            Landmark::new("nose", 0.5, 0.2),
        ];
        let b = guide_box(&landmarks, 0.1).unwrap();

        assert!(approx(b.min_x, 0.38));
        assert!(approx(b.max_x, 0.62));
        assert!(approx(b.min_y, 0.15));
        assert!(approx(b.max_y, 0.75));
    }

    #[test]
    fn test_box_clamped_to_image() {
        let landmarks = vec![Landmark::new("a", 0.0, 0.05), Landmark::new("b", 1.0, 1.2)];
        let b = guide_box(&landmarks, 0.5).unwrap();
        assert_eq!((b.min_x, b.min_y, b.max_x, b.max_y), (0.0, 0.0, 1.0, 1.0));
    }

    #[test]
    fn test_no_landmarks() {
        assert_eq!(guide_box(&[], 0.1), None);
        assert_eq!(guide_box(&[Landmark::new("a", f32::NAN, 0.5)], 0.1), None);
    }

    #[test]
    fn test_to_pixels() {
        let b = GuideBox {
            min_x: 0.0,
            min_y: 0.5,
            max_x: 1.0,
            max_y: 1.0,
        };
        assert_eq!(b.to_pixels(101, 201), (0, 100, 100, 200));
    }
}
