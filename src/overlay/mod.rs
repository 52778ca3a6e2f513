//! Detection overlay rendering
//!
//! Draws bounding boxes, gradient fills, and label plates over the camera
//! image. All box math happens in native frame pixels and is mapped to the
//! on-screen rect through a [`ViewTransform`], so the native buffer size
//! stays decoupled from the presented size. Boxes are drawn in input order;
//! overlapping labels may collide and that is accepted.

use egui::{Color32, FontId, Pos2, Rect, Stroke, StrokeKind};

use crate::detector::{BBox, Detection};

/// Accent color shared by boxes, fills, and label plates (#3b82f6).
pub const ACCENT: Color32 = Color32::from_rgb(59, 130, 246);

/// Gradient endpoints inside a box: alpha fades top to bottom.
const GRADIENT_TOP: Color32 = Color32::from_rgba_premultiplied(12, 26, 49, 51);
const GRADIENT_BOTTOM: Color32 = Color32::from_rgba_premultiplied(3, 7, 12, 13);

/// Box outline width in native pixels.
const STROKE_WIDTH: f32 = 4.0;

/// Label font size in native pixels.
const LABEL_FONT_SIZE: f32 = 18.0;

/// Maps native frame coordinates to the on-screen rect the video occupies.
/// Built once per rendered frame from the available space; repeated
/// construction with unchanged inputs yields the identical mapping.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewTransform {
    /// On-screen rect of the (aspect-fit) video image.
    pub display: Rect,
    native_width: f32,
    native_height: f32,
}

impl ViewTransform {
    /// Fit a `native_width`x`native_height` image into `avail`, preserving
    /// aspect ratio and centering.
    pub fn fit(avail: Rect, native_width: u32, native_height: u32) -> Self {
        let nw = native_width.max(1) as f32;
        let nh = native_height.max(1) as f32;

        let scale = (avail.width() / nw).min(avail.height() / nh);
        let size = egui::vec2(nw * scale, nh * scale);
        let display = Rect::from_center_size(avail.center(), size);

        Self {
            display,
            native_width: nw,
            native_height: nh,
        }
    }

    /// Uniform native-to-screen scale factor.
    pub fn scale(&self) -> f32 {
        self.display.width() / self.native_width
    }

    /// Map a native-pixel box to screen coordinates.
    pub fn to_screen(&self, bbox: &BBox) -> Rect {
        let s = self.scale();
        let min = Pos2::new(
            self.display.left() + bbox.x * s,
            self.display.top() + bbox.y * s,
        );
        Rect::from_min_size(min, egui::vec2(bbox.w * s, bbox.h * s))
    }

    pub fn native_size(&self) -> (f32, f32) {
        (self.native_width, self.native_height)
    }
}

/// Label plate text: `"<label> <confidence%>"`.
pub fn label_text(detection: &Detection) -> String {
    format!(
        "{} {}%",
        detection.label,
        (detection.score * 100.0).round() as u32
    )
}

/// Paint boxes, gradient fills, and labels for one frame of detections.
pub fn paint(painter: &egui::Painter, detections: &[Detection], transform: &ViewTransform) {
    let s = transform.scale();

    for detection in detections {
        let rect = transform.to_screen(&detection.bbox);

        // Bounding box outline
        painter.rect_stroke(
            rect,
            0.0,
            Stroke::new(STROKE_WIDTH * s, ACCENT),
            StrokeKind::Middle,
        );

        // Translucent gradient fill, fading top to bottom
        let mut mesh = egui::Mesh::default();
        mesh.colored_vertex(rect.left_top(), GRADIENT_TOP);
        mesh.colored_vertex(rect.right_top(), GRADIENT_TOP);
        mesh.colored_vertex(rect.right_bottom(), GRADIENT_BOTTOM);
        mesh.colored_vertex(rect.left_bottom(), GRADIENT_BOTTOM);
        mesh.add_triangle(0, 1, 2);
        mesh.add_triangle(0, 2, 3);
        painter.add(egui::Shape::mesh(mesh));

        // Label plate directly below the box's bottom edge
        let text = label_text(detection);
        let font = FontId::proportional(LABEL_FONT_SIZE * s);
        let galley = painter.layout_no_wrap(text, font, Color32::WHITE);
        let text_size = galley.size();

        let plate = Rect::from_min_size(
            Pos2::new(rect.left(), rect.bottom()),
            egui::vec2(text_size.x + 12.0 * s, text_size.y + 8.0 * s),
        );
        painter.rect_filled(plate, 0.0, ACCENT);
        painter.galley(
            Pos2::new(rect.left() + 6.0 * s, rect.bottom() + 4.0 * s),
            galley,
            Color32::WHITE,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(label: &'static str, score: f32, bbox: BBox) -> Detection {
        Detection { label, score, bbox }
    }

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn test_fit_preserves_aspect_and_centers() {
        let avail = Rect::from_min_size(Pos2::ZERO, egui::vec2(200.0, 200.0));
        let tf = ViewTransform::fit(avail, 1280, 720);

        assert!(close(tf.display.width(), 200.0));
        assert!(close(tf.display.height(), 112.5));
        // Letterboxed vertically, centered
        assert!(close(tf.display.center().y, 100.0));
        assert!(close(tf.display.left(), 0.0));
    }

    #[test]
    fn test_fit_is_idempotent_for_unchanged_dimensions() {
        let avail = Rect::from_min_size(Pos2::new(10.0, 20.0), egui::vec2(640.0, 480.0));
        let first = ViewTransform::fit(avail, 1280, 720);
        let second = ViewTransform::fit(avail, 1280, 720);

        assert_eq!(first, second);
        // Native buffer dimensions are untouched by presentation fitting
        assert_eq!(first.native_size(), (1280.0, 720.0));
    }

    #[test]
    fn test_full_frame_box_maps_to_full_display() {
        let avail = Rect::from_min_size(Pos2::ZERO, egui::vec2(640.0, 360.0));
        let tf = ViewTransform::fit(avail, 1280, 720);

        let full = BBox { x: 0.0, y: 0.0, w: 1280.0, h: 720.0 };
        let mapped = tf.to_screen(&full);
        assert!(close(mapped.left(), tf.display.left()));
        assert!(close(mapped.top(), tf.display.top()));
        assert!(close(mapped.width(), tf.display.width()));
        assert!(close(mapped.height(), tf.display.height()));
    }

    #[test]
    fn test_to_screen_scales_linearly() {
        let avail = Rect::from_min_size(Pos2::ZERO, egui::vec2(640.0, 360.0));
        let tf = ViewTransform::fit(avail, 1280, 720);
        assert!(close(tf.scale(), 0.5));

        let b = BBox { x: 100.0, y: 50.0, w: 200.0, h: 100.0 };
        let r = tf.to_screen(&b);
        assert!(close(r.left(), 50.0));
        assert!(close(r.top(), 25.0));
        assert!(close(r.width(), 100.0));
        assert!(close(r.height(), 50.0));
    }

    #[test]
    fn test_label_text_rounds_percentage() {
        let d = det("cat", 0.9, BBox { x: 0.0, y: 0.0, w: 1.0, h: 1.0 });
        assert_eq!(label_text(&d), "cat 90%");

        let d = det("dog", 0.654, BBox { x: 0.0, y: 0.0, w: 1.0, h: 1.0 });
        assert_eq!(label_text(&d), "dog 65%");

        let d = det("person", 0.996, BBox { x: 0.0, y: 0.0, w: 1.0, h: 1.0 });
        assert_eq!(label_text(&d), "person 100%");
    }
}
