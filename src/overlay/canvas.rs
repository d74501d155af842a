//! Guide drawing surface

use image::{Rgba, RgbaImage};

use super::GuideBox;

/// Where the guide is drawn. Owned by the render loop.
pub trait GuideCanvas: Send {
    fn clear(&mut self);
    fn draw_guide(&mut self, guide: &GuideBox, label: &str);
}

const GUIDE_COLOR: Rgba<u8> = Rgba([64, 220, 120, 255]);

/// Bracket arm length as a fraction of the shorter box side
const BRACKET_FRACTION: f32 = 0.2;

/// Transparent RGBA overlay the size of the video frame.
///
/// Text rendering is left to the presenter; the label of the last drawn
/// guide is kept alongside the image.
pub struct RgbaGuideCanvas {
    image: RgbaImage,
    label: Option<String>,
    thickness: u32,
}

impl RgbaGuideCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width, height),
            label: None,
            thickness: 3,
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn fill_rect(&mut self, x0: u32, y0: u32, x1: u32, y1: u32) {
        let (width, height) = self.image.dimensions();
        for y in y0..=y1.min(height.saturating_sub(1)) {
            for x in x0..=x1.min(width.saturating_sub(1)) {
                self.image.put_pixel(x, y, GUIDE_COLOR);
            }
        }
    }
}

impl GuideCanvas for RgbaGuideCanvas {
    fn clear(&mut self) {
        for pixel in self.image.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
        self.label = None;
    }

    fn draw_guide(&mut self, guide: &GuideBox, label: &str) {
        let (width, height) = self.image.dimensions();
        if width == 0 || height == 0 {
            return;
        }

        let (x0, y0, x1, y1) = guide.to_pixels(width, height);
        let shorter = (x1 - x0).min(y1 - y0);
        let arm = ((shorter as f32 * BRACKET_FRACTION).round() as u32).max(1);
        let t = self.thickness.saturating_sub(1);

        // Top-left
        self.fill_rect(x0, y0, x0 + arm, y0 + t);
        self.fill_rect(x0, y0, x0 + t, y0 + arm);
        // Top-right
        self.fill_rect(x1.saturating_sub(arm), y0, x1, y0 + t);
        self.fill_rect(x1.saturating_sub(t), y0, x1, y0 + arm);
        // Bottom-left
        self.fill_rect(x0, y1.saturating_sub(t), x0 + arm, y1);
        self.fill_rect(x0, y1.saturating_sub(arm), x0 + t, y1);
        // Bottom-right
        self.fill_rect(x1.saturating_sub(arm), y1.saturating_sub(t), x1, y1);
        self.fill_rect(x1.saturating_sub(t), y1.saturating_sub(arm), x1, y1);

        self.label = Some(label.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_box() -> GuideBox {
        GuideBox {
            min_x: 0.0,
            min_y: 0.0,
            max_x: 1.0,
            max_y: 1.0,
        }
    }

    #[test]
    fn test_brackets_at_corners_only() {
        let mut canvas = RgbaGuideCanvas::new(101, 101);
        canvas.draw_guide(&full_box(), "Squat");

        let img = canvas.image();
        assert_eq!(img.get_pixel(0, 0), &GUIDE_COLOR);
        assert_eq!(img.get_pixel(100, 0), &GUIDE_COLOR);
        assert_eq!(img.get_pixel(0, 100), &GUIDE_COLOR);
        assert_eq!(img.get_pixel(100, 100), &GUIDE_COLOR);
        // Middle of the top edge is open
        assert_eq!(img.get_pixel(50, 0), &Rgba([0, 0, 0, 0]));
        assert_eq!(img.get_pixel(50, 50), &Rgba([0, 0, 0, 0]));
        assert_eq!(canvas.label(), Some("Squat"));
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut canvas = RgbaGuideCanvas::new(20, 20);
        canvas.draw_guide(&full_box(), "Plank");
        canvas.clear();

        assert!(canvas.image().pixels().all(|p| p[3] == 0));
        assert_eq!(canvas.label(), None);
    }

    #[test]
    fn test_tiny_box_does_not_panic() {
        let mut canvas = RgbaGuideCanvas::new(10, 10);
        let point = GuideBox {
            min_x: 1.0,
            min_y: 1.0,
            max_x: 1.0,
            max_y: 1.0,
        };
        canvas.draw_guide(&point, "Lunge");
        assert_eq!(canvas.image().get_pixel(9, 9), &GUIDE_COLOR);
    }
}
