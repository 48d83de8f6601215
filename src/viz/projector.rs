//! Top-down raster of the map.
//!
//! World `x` maps to image columns and world `z` to image rows, centred on the
//! canvas: `(cx + x * scale, cy + z * scale)`. Drawing order is grid, map
//! points, trajectory, current pose marker, centre cross.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::geometry::SE3;
use crate::map::Map;

const BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const GRID: Rgb<u8> = Rgb([50, 50, 50]);
const CROSS: Rgb<u8> = Rgb([100, 100, 100]);
const POINT: Rgb<u8> = Rgb([0, 255, 0]);
const PATH: Rgb<u8> = Rgb([0, 0, 255]);
const MARKER: Rgb<u8> = Rgb([255, 0, 0]);
const ARROW: Rgb<u8> = Rgb([255, 255, 0]);
const FRAME: Rgb<u8> = Rgb([255, 255, 255]);

/// Grid lines closer than this many pixels are not drawn.
const MIN_GRID_SPACING_PX: f64 = 2.0;
const CROSS_HALF_PX: f32 = 10.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectorConfig {
    /// Below this many map points a placeholder is rendered instead.
    pub min_points_to_render: usize,
    pub point_radius: i32,
    pub marker_radius: i32,
    /// Length of the heading arrow in pixels.
    pub arrow_length: f32,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            min_points_to_render: 10,
            point_radius: 2,
            marker_radius: 8,
            arrow_length: 30.0,
        }
    }
}

pub struct MapProjector {
    config: ProjectorConfig,
}

impl MapProjector {
    pub fn new(config: ProjectorConfig) -> Self {
        Self { config }
    }

    /// Render the map seen from above.
    ///
    /// `canvas` is `(width, height)`; zero dimensions are raised to one pixel.
    /// A non-finite or non-positive `scale` renders the placeholder.
    pub fn render(&self, map: &Map, pose: &SE3, canvas: (u32, u32), scale: f64) -> RgbImage {
        let (width, height) = (canvas.0.max(1), canvas.1.max(1));
        let mut img = RgbImage::from_pixel(width, height, BACKGROUND);

        if map.num_map_points() < self.config.min_points_to_render
            || !scale.is_finite()
            || scale <= 0.0
        {
            debug!(
                points = map.num_map_points(),
                scale, "rendering placeholder map view"
            );
            draw_placeholder(&mut img);
            return img;
        }

        let view = View::new(width, height, scale);

        if scale >= MIN_GRID_SPACING_PX {
            draw_grid(&mut img, &view);
        }

        for mp in map.map_points() {
            if let Some(px) = view.pixel(mp.position.x, mp.position.z) {
                draw_filled_circle_mut(&mut img, px, self.config.point_radius, POINT);
            }
        }

        let path: Vec<(f32, f32)> = map
            .trajectory()
            .positions()
            .map(|p| view.project(p.x, p.z))
            .collect();
        for pair in path.windows(2) {
            // Two pixels wide.
            draw_clipped_line(&mut img, pair[0], pair[1], PATH);
            draw_clipped_line(
                &mut img,
                (pair[0].0 + 1.0, pair[0].1),
                (pair[1].0 + 1.0, pair[1].1),
                PATH,
            );
        }

        if let Some(center) = view.pixel(pose.translation.x, pose.translation.z) {
            draw_filled_circle_mut(&mut img, center, self.config.marker_radius, MARKER);
            let (_, _, yaw) = pose.euler_angles_deg();
            draw_arrow(&mut img, center, yaw.to_radians() as f32, self.config.arrow_length);
        }

        let (cx, cy) = (view.cx as f32, view.cy as f32);
        draw_clipped_line(&mut img, (cx - CROSS_HALF_PX, cy), (cx + CROSS_HALF_PX, cy), CROSS);
        draw_clipped_line(&mut img, (cx, cy - CROSS_HALF_PX), (cx, cy + CROSS_HALF_PX), CROSS);

        img
    }
}

impl Default for MapProjector {
    fn default() -> Self {
        Self::new(ProjectorConfig::default())
    }
}

/// Canvas geometry for one render call.
struct View {
    width: u32,
    height: u32,
    cx: f64,
    cy: f64,
    scale: f64,
}

impl View {
    fn new(width: u32, height: u32, scale: f64) -> Self {
        Self {
            width,
            height,
            cx: (width / 2) as f64,
            cy: (height / 2) as f64,
            scale,
        }
    }

    fn project(&self, x: f64, z: f64) -> (f32, f32) {
        (
            (self.cx + x * self.scale) as f32,
            (self.cy + z * self.scale) as f32,
        )
    }

    /// Integer pixel if it lands on the canvas.
    fn pixel(&self, x: f64, z: f64) -> Option<(i32, i32)> {
        let (u, v) = (self.cx + x * self.scale, self.cy + z * self.scale);
        let inside = u.is_finite()
            && v.is_finite()
            && u >= 0.0
            && v >= 0.0
            && u < self.width as f64
            && v < self.height as f64;
        inside.then_some((u as i32, v as i32))
    }
}

/// One grid line per world unit, through the origin.
fn draw_grid(img: &mut RgbImage, view: &View) {
    let (w, h) = (view.width as f64, view.height as f64);

    let first = -(view.cx / view.scale).floor();
    let mut k = first;
    loop {
        let x = view.cx + k * view.scale;
        if x >= w {
            break;
        }
        draw_clipped_line(img, (x as f32, 0.0), (x as f32, h as f32), GRID);
        k += 1.0;
    }

    let first = -(view.cy / view.scale).floor();
    let mut k = first;
    loop {
        let y = view.cy + k * view.scale;
        if y >= h {
            break;
        }
        draw_clipped_line(img, (0.0, y as f32), (w as f32, y as f32), GRID);
        k += 1.0;
    }
}

fn draw_arrow(img: &mut RgbImage, from: (i32, i32), angle: f32, length: f32) {
    let start = (from.0 as f32, from.1 as f32);
    let tip = (start.0 + length * angle.cos(), start.1 + length * angle.sin());
    draw_clipped_line(img, start, tip, ARROW);

    let head = 0.3 * length;
    for side in [-1.0f32, 1.0] {
        let a = angle + std::f32::consts::PI + side * std::f32::consts::FRAC_PI_6;
        let end = (tip.0 + head * a.cos(), tip.1 + head * a.sin());
        draw_clipped_line(img, tip, end, ARROW);
    }
}

/// Framed canvas with both diagonals.
fn draw_placeholder(img: &mut RgbImage) {
    let (w, h) = img.dimensions();
    draw_hollow_rect_mut(img, Rect::at(0, 0).of_size(w, h), FRAME);
    let (wf, hf) = ((w - 1) as f32, (h - 1) as f32);
    draw_clipped_line(img, (0.0, 0.0), (wf, hf), FRAME);
    draw_clipped_line(img, (wf, 0.0), (0.0, hf), FRAME);
}

/// Draw only the part of the segment inside the canvas.
pub(crate) fn draw_clipped_line(img: &mut RgbImage, a: (f32, f32), b: (f32, f32), color: Rgb<u8>) {
    let (w, h) = img.dimensions();
    if let Some((a, b)) = clip_segment(a, b, w as f32, h as f32) {
        draw_line_segment_mut(img, a, b, color);
    }
}

/// Liang-Barsky clipping against `[0, w] x [0, h]`.
fn clip_segment(a: (f32, f32), b: (f32, f32), w: f32, h: f32) -> Option<((f32, f32), (f32, f32))> {
    if ![a.0, a.1, b.0, b.1].iter().all(|v| v.is_finite()) {
        return None;
    }
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let mut t0 = 0.0f32;
    let mut t1 = 1.0f32;

    for (p, q) in [(-dx, a.0), (dx, w - a.0), (-dy, a.1), (dy, h - a.1)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
        } else {
            let r = q / p;
            if p < 0.0 {
                t0 = t0.max(r);
            } else {
                t1 = t1.min(r);
            }
            if t0 > t1 {
                return None;
            }
        }
    }

    Some((
        (a.0 + t0 * dx, a.1 + t0 * dy),
        (a.0 + t1 * dx, a.1 + t1 * dy),
    ))
}
