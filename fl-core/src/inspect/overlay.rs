//! Annotation overlays for inspected frames
//!
//! An [`Overlay`] is a list of drawing primitives in pixel space. The display
//! side renders text itself; [`Overlay::render`] burns the geometric items
//! (boxes, border, reference lines) into an RGB copy of the frame.

use image::{Rgb, RgbImage};

use crate::constants::overlay as style;
use crate::data::{BoundingBox, Frame};
use crate::inspect::classifier::{BoardMeasurement, MeasurementSpec};

pub const RED: Rgb<u8> = Rgb([255, 0, 0]);
pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const BLUE: Rgb<u8> = Rgb([0, 0, 255]);
pub const CYAN: Rgb<u8> = Rgb([0, 255, 255]);

#[derive(Debug, Clone, PartialEq)]
pub enum OverlayItem {
    /// Frame-edge rectangle
    Border { color: Rgb<u8>, thickness: u32 },
    Rect { x1: i32, y1: i32, x2: i32, y2: i32, color: Rgb<u8>, thickness: u32 },
    Line { from: (i32, i32), to: (i32, i32), color: Rgb<u8>, thickness: u32 },
    /// Text anchored at its baseline-left corner
    Text { text: String, origin: (i32, i32), color: Rgb<u8> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    width: u32,
    height: u32,
    items: Vec<OverlayItem>,
    defect: bool,
}

impl Overlay {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            items: Vec::new(),
            defect: false,
        }
    }

    pub fn for_frame(frame: &Frame) -> Self {
        Self::new(frame.width, frame.height)
    }

    pub fn items(&self) -> &[OverlayItem] {
        &self.items
    }

    pub fn is_defect(&self) -> bool {
        self.defect
    }

    /// All text entries, in drawing order
    pub fn texts(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter_map(|item| match item {
                OverlayItem::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Red border plus "DEFECT"; repeated calls add nothing
    pub fn mark_defect(&mut self) {
        if self.defect {
            return;
        }
        self.defect = true;
        self.items.push(OverlayItem::Border {
            color: RED,
            thickness: style::DEFECT_BORDER_THICKNESS,
        });
        self.items.push(OverlayItem::Text {
            text: style::DEFECT_LABEL.to_string(),
            origin: style::DEFECT_LABEL_POS,
            color: RED,
        });
    }

    pub fn add_box(&mut self, b: &BoundingBox) {
        self.items.push(OverlayItem::Rect {
            x1: b.x1,
            y1: b.y1,
            x2: b.x2,
            y2: b.y2,
            color: GREEN,
            thickness: style::BOX_THICKNESS,
        });
        self.items.push(OverlayItem::Text {
            text: b.label(),
            origin: (b.x1, b.y1 - style::BOX_LABEL_OFFSET),
            color: GREEN,
        });
    }

    pub fn add_boxes(&mut self, boxes: &[BoundingBox]) {
        for b in boxes {
            self.add_box(b);
        }
    }

    /// Reference lines, their millimetre labels and the tolerance caption
    pub fn add_measurement(&mut self, m: &BoardMeasurement, spec: &MeasurementSpec) {
        let y = m.y_level();
        let label_y = y - style::LINE_LABEL_OFFSET;

        self.items.push(OverlayItem::Line {
            from: (m.first.x2, y),
            to: (m.last.x2, y),
            color: BLUE,
            thickness: style::LINE_THICKNESS,
        });
        self.items.push(OverlayItem::Text {
            text: format!("{:.1}mm", m.right_mm),
            origin: ((m.first.x2 + m.last.x2) / 2, label_y),
            color: BLUE,
        });

        self.items.push(OverlayItem::Line {
            from: (m.first.x1, y),
            to: (m.last.x1, y),
            color: RED,
            thickness: style::LINE_THICKNESS,
        });
        self.items.push(OverlayItem::Text {
            text: format!("{:.1}mm", m.left_mm),
            origin: ((m.first.x1 + m.last.x1) / 2, label_y),
            color: RED,
        });

        self.items.push(OverlayItem::Text {
            text: spec.caption(),
            origin: (10, self.height as i32 - style::CAPTION_MARGIN),
            color: CYAN,
        });
    }

    /// Draw the geometric items onto an RGB copy of `frame`
    pub fn render(&self, frame: &Frame) -> RgbImage {
        let mut img = frame.to_rgb_image();
        for item in &self.items {
            match item {
                OverlayItem::Border { color, thickness } => {
                    let (w, h) = img.dimensions();
                    if w > 0 && h > 0 {
                        draw_rect(&mut img, (0, 0, w as i32 - 1, h as i32 - 1), *color, *thickness);
                    }
                }
                OverlayItem::Rect { x1, y1, x2, y2, color, thickness } => {
                    draw_rect(&mut img, (*x1, *y1, *x2, *y2), *color, *thickness);
                }
                OverlayItem::Line { from, to, color, thickness } => {
                    draw_line(&mut img, *from, *to, *color, *thickness);
                }
                OverlayItem::Text { .. } => {}
            }
        }
        img
    }
}

fn put(img: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    let (w, h) = img.dimensions();
    if x >= 0 && y >= 0 && (x as u32) < w && (y as u32) < h {
        img.put_pixel(x as u32, y as u32, color);
    }
}

/// Rectangle outline growing inwards with `thickness`; clipped to the image
pub fn draw_rect(img: &mut RgbImage, (x0, y0, x1, y1): (i32, i32, i32, i32), color: Rgb<u8>, thickness: u32) {
    let (x0, x1) = (x0.min(x1), x0.max(x1));
    let (y0, y1) = (y0.min(y1), y0.max(y1));
    for t in 0..thickness as i32 {
        let (xx0, yy0, xx1, yy1) = (x0 + t, y0 + t, x1 - t, y1 - t);
        if xx0 > xx1 || yy0 > yy1 {
            break;
        }
        for x in xx0..=xx1 {
            put(img, x, yy0, color);
            put(img, x, yy1, color);
        }
        for y in yy0..=yy1 {
            put(img, xx0, y, color);
            put(img, xx1, y, color);
        }
    }
}

/// Bresenham line with a square brush of side `thickness`
pub fn draw_line(img: &mut RgbImage, (x0, y0): (i32, i32), (x1, y1): (i32, i32), color: Rgb<u8>, thickness: u32) {
    let half = thickness.max(1) as i32 / 2;
    let lo = -half;
    let hi = thickness.max(1) as i32 - half - 1;

    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let (mut x, mut y) = (x0, y0);

    loop {
        for oy in lo..=hi {
            for ox in lo..=hi {
                put(img, x + ox, y + oy, color);
            }
        }
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}
