//! Keypoint overlay on the camera image.

use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_circle_mut;

use super::projector::draw_clipped_line;
use crate::tracking::frame::FeatureSet;

const KEYPOINT: Rgb<u8> = Rgb([0, 255, 0]);

/// RGB copy of `image` with each keypoint drawn as a circle sized by its
/// pyramid level and a tick along its orientation.
pub fn draw_keypoints(image: &GrayImage, features: &FeatureSet) -> RgbImage {
    let mut out = RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let v = image.get_pixel(x, y)[0];
        Rgb([v, v, v])
    });

    for kp in &features.keypoints {
        let radius = 3 + 2 * kp.octave as i32;
        let center = (kp.x.round() as i32, kp.y.round() as i32);
        draw_hollow_circle_mut(&mut out, center, radius, KEYPOINT);

        let tip = (
            kp.x + radius as f32 * kp.angle.cos(),
            kp.y + radius as f32 * kp.angle.sin(),
        );
        draw_clipped_line(&mut out, (kp.x, kp.y), tip, KEYPOINT);
    }
    out
}

#[cfg(test)]
mod tests {
    use image::Luma;

    use super::*;
    use crate::tracking::frame::{Descriptor, Keypoint};

    #[test]
    fn test_overlay_keeps_size_and_draws() {
        let image = GrayImage::from_pixel(64, 48, Luma([10]));
        let features = FeatureSet {
            keypoints: vec![Keypoint {
                x: 20.0,
                y: 20.0,
                octave: 0,
                angle: 0.0,
                response: 1.0,
                size: 31.0,
            }],
            descriptors: vec![Descriptor::zeros()],
        };

        let out = draw_keypoints(&image, &features);
        assert_eq!(out.dimensions(), (64, 48));
        assert_eq!(*out.get_pixel(23, 20), KEYPOINT);
        assert_eq!(*out.get_pixel(0, 0), Rgb([10, 10, 10]));
    }
}
