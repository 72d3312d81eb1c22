use geo::Coord;
use image::{imageops::FilterType, DynamicImage};
use ndarray::{s, Array2, Array4, ArrayD, ArrayView2, Axis, Ix4};
use tracing::instrument;

use crate::{
    graph::Graph,
    util::{
        axis_aligned_corners, dilate_rect, label_components, min_area_rect,
        subtract_mean_normalize,
    },
    BoundingBox, DetectionOptions, Error, Result, ScoreMaps,
};

pub const DET_WIDTH: u32 = 800;
pub const DET_HEIGHT: u32 = 608;

const MEAN_VALUES: [f32; 3] = [0.485, 0.456, 0.406];
const NORM_VALUES: [f32; 3] = [1.0 / 0.229, 1.0 / 0.224, 1.0 / 0.225];

const GRAPH_NAME: &str = "detector";

/// Resizes to the fixed detector resolution and normalises into a `(1, 3, 608, 800)` tensor.
#[instrument(level = "debug", skip(image))]
pub fn normalize(image: &DynamicImage) -> Result<Array4<f32>> {
    if image.width() == 0 || image.height() == 0 {
        return Err(Error::InvalidImage {
            context: format!("empty image ({}x{})", image.width(), image.height()),
            source: None,
        });
    }
    let image = image.resize_exact(DET_WIDTH, DET_HEIGHT, FilterType::Triangle);
    Ok(subtract_mean_normalize(&image, &MEAN_VALUES, &NORM_VALUES).insert_axis(Axis(0)))
}

pub struct CraftNet<G> {
    graph: G,
    options: DetectionOptions,
}

impl<G: Graph> CraftNet<G> {
    pub fn new(graph: G, options: DetectionOptions) -> Self {
        Self { graph, options }
    }

    pub fn options(&self) -> &DetectionOptions {
        &self.options
    }

    #[instrument(level = "debug", skip(self, image))]
    pub fn get_score_maps(&self, image: &DynamicImage) -> Result<ScoreMaps> {
        let input = normalize(image)?;
        let maps = split_score_maps(self.graph.run(input)?)?;
        log::trace!("Score maps {:?}", maps.dim());
        Ok(maps)
    }

    /// Single text rectangle in detector working resolution, or `None` when nothing was found.
    #[instrument(level = "debug", skip(self, image))]
    pub fn get_text_box(&self, image: &DynamicImage) -> Result<Option<BoundingBox>> {
        let maps = self.get_score_maps(image)?;
        Ok(postprocess(maps.text.view(), maps.link.view(), &self.options))
    }
}

/// Splits the detector output into text and link maps. The exported graph emits
/// `(1, H, W, 2)`; a channel-first `(1, 2, H, W)` tensor is accepted too.
pub fn split_score_maps(output: ArrayD<f32>) -> Result<ScoreMaps> {
    let shape = output.shape().to_vec();
    let output = output
        .into_dimensionality::<Ix4>()
        .map_err(|_| Error::OutputShape {
            graph: GRAPH_NAME,
            shape: shape.clone(),
        })?;
    match output.dim() {
        (1, _, _, 2) => Ok(ScoreMaps {
            text: output.slice(s![0, .., .., 0]).to_owned(),
            link: output.slice(s![0, .., .., 1]).to_owned(),
        }),
        (1, 2, _, _) => Ok(ScoreMaps {
            text: output.slice(s![0, 0, .., ..]).to_owned(),
            link: output.slice(s![0, 1, .., ..]).to_owned(),
        }),
        _ => Err(Error::OutputShape {
            graph: GRAPH_NAME,
            shape,
        }),
    }
}

/// Merges every detected region into one rectangle in the 800x608 working resolution.
/// Several disjoint lines end up in the same rectangle.
#[instrument(level = "debug", skip(text, link))]
pub fn postprocess(
    text: ArrayView2<f32>,
    link: ArrayView2<f32>,
    options: &DetectionOptions,
) -> Option<BoundingBox> {
    let regions = detect_regions(text, link, options);
    if regions.is_empty() {
        log::debug!("No text regions above threshold");
        return None;
    }

    let (map_height, map_width) = text.dim();
    let ratio_x = DET_WIDTH as f32 / map_width as f32;
    let ratio_y = DET_HEIGHT as f32 / map_height as f32;

    let (mut x_min, mut y_min) = (f32::INFINITY, f32::INFINITY);
    let (mut x_max, mut y_max) = (f32::NEG_INFINITY, f32::NEG_INFINITY);
    for corner in regions.iter().flatten() {
        let (x, y) = (corner.x * ratio_x, corner.y * ratio_y);
        x_min = x_min.min(x);
        y_min = y_min.min(y);
        x_max = x_max.max(x);
        y_max = y_max.max(y);
    }
    log::debug!(
        "Merged {} regions into ({x_min}, {y_min}) - ({x_max}, {y_max})",
        regions.len()
    );

    Some(BoundingBox {
        x_min: x_min as i32,
        y_min: y_min as i32,
        x_max: x_max as i32,
        y_max: y_max as i32,
    })
}

/// Groups thresholded text and link scores into word regions, each a rectangle in score map
/// coordinates.
#[instrument(level = "trace", skip(text, link))]
pub fn detect_regions(
    text: ArrayView2<f32>,
    link: ArrayView2<f32>,
    options: &DetectionOptions,
) -> Vec<[Coord<f32>; 4]> {
    let (map_height, map_width) = text.dim();
    let text_on = text.mapv(|score| score > options.low_text);
    let link_on = link.mapv(|score| score > options.link_threshold);
    let combined = Array2::from_shape_fn(text.dim(), |index| text_on[index] || link_on[index]);

    let (labels, components) = label_components(combined.view(), text);

    components
        .into_iter()
        .filter(|component| component.area >= options.min_component_area)
        .filter(|component| component.max_score >= options.text_threshold)
        .filter_map(|component| {
            let short_side = component.width.min(component.height) as f64;
            let niter = ((component.area as f64 * short_side
                / (component.width * component.height) as f64)
                .sqrt()
                * 2.0) as usize;

            let sx = component.left.saturating_sub(niter);
            let sy = component.top.saturating_sub(niter);
            let ex = (component.left + component.width + niter + 1).min(map_width);
            let ey = (component.top + component.height + niter + 1).min(map_height);

            // Link-only pixels join characters into words but are not part of the region.
            let segment = Array2::from_shape_fn((ey - sy, ex - sx), |(y, x)| {
                let index = (y + sy, x + sx);
                let inside = labels[index] == component.label;
                let link_only = link_on[index] && !text_on[index];
                if inside && !link_only {
                    255u8
                } else {
                    0
                }
            });
            let segment = dilate_rect(segment.view(), niter + 1);

            let points = segment
                .indexed_iter()
                .filter(|(_, value)| **value != 0)
                .map(|((y, x), _)| Coord {
                    x: (x + sx) as f32,
                    y: (y + sy) as f32,
                })
                .collect::<Vec<_>>();
            if points.is_empty() {
                return None;
            }

            let rect = min_area_rect(&points);
            let w = euclidean(rect[0], rect[1]);
            let h = euclidean(rect[1], rect[2]);
            let box_ratio = w.max(h) / (w.min(h) + 1e-5);
            if (1.0 - box_ratio).abs() <= 0.1 {
                Some(axis_aligned_corners(&points))
            } else {
                Some(rect)
            }
        })
        .collect()
}

fn euclidean(a: Coord<f32>, b: Coord<f32>) -> f32 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(map: &mut Array2<f32>, top: usize, left: usize, height: usize, width: usize, v: f32) {
        map.slice_mut(s![top..top + height, left..left + width]).fill(v);
    }

    #[test]
    fn all_zero_maps_detect_nothing() {
        let zeros = Array2::<f32>::zeros((304, 400));
        assert_eq!(
            postprocess(zeros.view(), zeros.view(), &DetectionOptions::default()),
            None
        );
    }

    #[test]
    fn weak_components_are_noise() {
        let mut text = Array2::<f32>::zeros((304, 400));
        blob(&mut text, 10, 10, 10, 30, 0.6);
        let link = Array2::<f32>::zeros((304, 400));
        assert_eq!(
            postprocess(text.view(), link.view(), &DetectionOptions::default()),
            None
        );
    }

    #[test]
    fn tiny_components_are_dropped() {
        let mut text = Array2::<f32>::zeros((304, 400));
        blob(&mut text, 10, 10, 3, 3, 0.9);
        let link = Array2::<f32>::zeros((304, 400));
        assert!(detect_regions(text.view(), link.view(), &DetectionOptions::default()).is_empty());
    }

    #[test]
    fn box_is_rescaled_to_working_resolution() {
        let mut text = Array2::<f32>::zeros((304, 400));
        blob(&mut text, 100, 50, 20, 200, 0.9);
        let link = Array2::<f32>::zeros((304, 400));
        let bbox = postprocess(text.view(), link.view(), &DetectionOptions::default()).unwrap();

        // Dilation grows the 200x20 blob by a few pixels; the map is half resolution.
        assert!(bbox.x_min <= 100 && bbox.x_min >= 80, "{bbox:?}");
        assert!(bbox.x_max >= 2 * 249 && bbox.x_max <= 2 * 260, "{bbox:?}");
        assert!(bbox.y_min <= 200 && bbox.y_min >= 180, "{bbox:?}");
        assert!(bbox.y_max >= 2 * 119 && bbox.y_max <= 2 * 130, "{bbox:?}");
    }

    #[test]
    fn disjoint_regions_merge_into_one_box() {
        let mut text = Array2::<f32>::zeros((304, 400));
        blob(&mut text, 20, 20, 10, 40, 0.9);
        blob(&mut text, 200, 300, 10, 40, 0.9);
        let link = Array2::<f32>::zeros((304, 400));
        let options = DetectionOptions::default();

        assert_eq!(detect_regions(text.view(), link.view(), &options).len(), 2);
        let bbox = postprocess(text.view(), link.view(), &options).unwrap();
        assert!(bbox.x_min < 2 * 20 && bbox.x_max > 2 * 339);
        assert!(bbox.y_min < 2 * 20 && bbox.y_max > 2 * 209);
    }

    #[test]
    fn links_join_characters_into_one_region() {
        let mut text = Array2::<f32>::zeros((100, 100));
        blob(&mut text, 40, 10, 10, 10, 0.9);
        blob(&mut text, 40, 30, 10, 10, 0.9);
        let mut link = Array2::<f32>::zeros((100, 100));
        blob(&mut link, 42, 20, 6, 10, 0.8);
        let regions = detect_regions(text.view(), link.view(), &DetectionOptions::default());
        assert_eq!(regions.len(), 1);
    }

    #[test]
    fn channel_last_and_channel_first_outputs_split_the_same() {
        let mut last = Array4::<f32>::zeros((1, 4, 5, 2));
        last[[0, 1, 2, 0]] = 0.9;
        last[[0, 3, 4, 1]] = 0.5;
        let maps = split_score_maps(last.into_dyn()).unwrap();
        assert_eq!(maps.dim(), (5, 4));
        assert_eq!(maps.text[[1, 2]], 0.9);
        assert_eq!(maps.link[[3, 4]], 0.5);

        let mut first = Array4::<f32>::zeros((1, 2, 4, 5));
        first[[0, 0, 1, 2]] = 0.9;
        let maps = split_score_maps(first.into_dyn()).unwrap();
        assert_eq!(maps.text[[1, 2]], 0.9);

        let wrong = Array4::<f32>::zeros((1, 3, 4, 5)).into_dyn();
        assert!(matches!(
            split_score_maps(wrong),
            Err(Error::OutputShape { .. })
        ));
    }

    #[test]
    fn normalize_produces_detector_input_shape() {
        let image = DynamicImage::new_rgb8(123, 45);
        assert_eq!(normalize(&image).unwrap().dim(), (1, 3, 608, 800));
        assert!(matches!(
            normalize(&DynamicImage::new_rgb8(0, 10)),
            Err(Error::InvalidImage { .. })
        ));
    }
}
