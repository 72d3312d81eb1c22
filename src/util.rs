use std::collections::BTreeMap;

use float_ord::FloatOrd;
use geo::{BoundingRect, Coord, MinimumRotatedRect, MultiPoint, Point};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma, Pixel, Rgb};
use imageproc::region_labelling::{connected_components, Connectivity};
use ndarray::{Array2, Array3, ArrayView1, ArrayView2, Axis};
use tracing::instrument;

/// `(pixel - mean) * norm` per channel on `[0, 1]` scaled RGB, laid out channel-first.
#[instrument(level = "debug", skip(image))]
pub(crate) fn subtract_mean_normalize(
    image: &DynamicImage,
    mean_vals: &[f32; 3],
    norm_vals: &[f32; 3],
) -> Array3<f32> {
    let mut image = image.to_rgb32f();
    let norm = Rgb::<f32>(*norm_vals);
    let mean_vals = Rgb::<f32>(*mean_vals).map2(&norm, |c1, c2| c1 * c2);
    for pixel in image.pixels_mut() {
        *pixel = pixel
            .map2(&norm, |c1, c2| c1 * c2)
            .map2(&mean_vals, |c1, c2| c1 - c2);
    }
    Array3::<f32>::from_shape_fn(
        (3, image.height() as usize, image.width() as usize),
        |(ch, y, x)| image.get_pixel(x as u32, y as u32).channels()[ch],
    )
}

/// Single channel intensity with BT.601 weights in 14 bit fixed point, rounded to nearest.
pub(crate) fn to_luma_bt601(image: &DynamicImage) -> GrayImage {
    let rgb = image.to_rgb8();
    ImageBuffer::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let luma = (r as u32 * 4899 + g as u32 * 9617 + b as u32 * 1868 + (1 << 13)) >> 14;
        Luma([luma.min(255) as u8])
    })
}

/// Index of the first maximum.
pub(crate) fn argmax(row: ArrayView1<f32>) -> usize {
    let mut best = 0;
    let mut best_value = FloatOrd(f32::NEG_INFINITY);
    for (index, value) in row.iter().enumerate() {
        if FloatOrd(*value) > best_value {
            best = index;
            best_value = FloatOrd(*value);
        }
    }
    best
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Component {
    pub label: u32,
    pub area: usize,
    pub left: usize,
    pub top: usize,
    pub width: usize,
    pub height: usize,
    pub max_score: f32,
}

/// 4-connected labelling of a binary mask. Each component carries its pixel count, bounding box
/// and the highest `score` value under it.
#[instrument(level = "trace", skip(mask, score))]
pub(crate) fn label_components(
    mask: ArrayView2<bool>,
    score: ArrayView2<f32>,
) -> (Array2<u32>, Vec<Component>) {
    let (height, width) = mask.dim();
    let image = GrayImage::from_fn(width as u32, height as u32, |x, y| {
        Luma([if mask[[y as usize, x as usize]] { 255 } else { 0 }])
    });
    let labelled = connected_components(&image, Connectivity::Four, Luma([0u8]));
    let labels = Array2::from_shape_fn((height, width), |(y, x)| {
        labelled.get_pixel(x as u32, y as u32).0[0]
    });

    // (area, x_min, y_min, x_max, y_max, max_score)
    let mut stats = BTreeMap::<u32, (usize, usize, usize, usize, usize, f32)>::new();
    for ((y, x), &label) in labels.indexed_iter() {
        if label == 0 {
            continue;
        }
        let value = score[[y, x]];
        let entry = stats
            .entry(label)
            .or_insert((0, x, y, x, y, f32::NEG_INFINITY));
        entry.0 += 1;
        entry.1 = entry.1.min(x);
        entry.2 = entry.2.min(y);
        entry.3 = entry.3.max(x);
        entry.4 = entry.4.max(y);
        entry.5 = entry.5.max(value);
    }

    let components = stats
        .into_iter()
        .map(
            |(label, (area, x_min, y_min, x_max, y_max, max_score))| Component {
                label,
                area,
                left: x_min,
                top: y_min,
                width: x_max - x_min + 1,
                height: y_max - y_min + 1,
                max_score,
            },
        )
        .collect();
    (labels, components)
}

/// Max filter with a `size`x`size` rectangle anchored at `size / 2`. Pixels outside the view do
/// not contribute.
pub(crate) fn dilate_rect(src: ArrayView2<u8>, size: usize) -> Array2<u8> {
    if size <= 1 {
        return src.to_owned();
    }
    let anchor = size / 2;
    let horizontal = max_filter_1d(src, Axis(1), size, anchor);
    max_filter_1d(horizontal.view(), Axis(0), size, anchor)
}

fn max_filter_1d(src: ArrayView2<u8>, axis: Axis, size: usize, anchor: usize) -> Array2<u8> {
    let len = src.len_of(axis);
    let mut dst = Array2::zeros(src.dim());
    for (src_lane, mut dst_lane) in src.lanes(axis).into_iter().zip(dst.lanes_mut(axis)) {
        for i in 0..len {
            let start = i.saturating_sub(anchor);
            let end = (i + size - 1 - anchor).min(len - 1);
            dst_lane[i] = (start..=end).map(|j| src_lane[j]).max().unwrap_or(0);
        }
    }
    dst
}

/// Corners of the minimum-area rectangle around `points`. Point sets without a proper convex
/// hull fall back to their axis-aligned extent.
pub(crate) fn min_area_rect(points: &[Coord<f32>]) -> [Coord<f32>; 4] {
    let multi_point = MultiPoint::new(points.iter().copied().map(Point::from).collect());
    let rotated = multi_point
        .minimum_rotated_rect()
        .map(|rect| rect.exterior().coords().copied().collect::<Vec<_>>())
        .filter(|coords| coords.len() >= 4);
    match rotated {
        Some(coords) => [coords[0], coords[1], coords[2], coords[3]],
        None => axis_aligned_corners(points),
    }
}

pub(crate) fn axis_aligned_corners(points: &[Coord<f32>]) -> [Coord<f32>; 4] {
    let multi_point = MultiPoint::new(points.iter().copied().map(Point::from).collect());
    let Some(rect) = multi_point.bounding_rect() else {
        return [Coord::zero(); 4];
    };
    let (min, max) = (rect.min(), rect.max());
    [
        Coord { x: min.x, y: min.y },
        Coord { x: max.x, y: min.y },
        Coord { x: max.x, y: max.y },
        Coord { x: min.x, y: max.y },
    ]
}
