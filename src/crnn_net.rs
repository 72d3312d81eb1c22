use image::{imageops::FilterType, DynamicImage};
use ndarray::{Array4, ArrayD, ArrayView2, Ix3};
use tracing::instrument;

use crate::{
    graph::Graph,
    util::{argmax, to_luma_bt601},
    BoundingBox, Charset, Error, Result,
};

pub const REC_HEIGHT: u32 = 64;
pub const REC_WIDTH: u32 = 1000;

const GRAPH_NAME: &str = "recognizer";

/// Crops the box, converts it to intensity, scales it to 64px height (at most 1000px wide),
/// pads it to 1000px by repeating the last column and maps `[0, 255]` to `[-1, 1]`.
///
/// Box edges outside the image are clamped; a crop left without pixels is a
/// [`Error::DegenerateCrop`].
#[instrument(level = "debug", skip(image))]
pub fn prepare(image: &DynamicImage, bbox: &BoundingBox) -> Result<Array4<f32>> {
    let (x, y, width, height) = bbox.clamped(image.width(), image.height());
    if width == 0 || height == 0 {
        return Err(Error::DegenerateCrop { width, height });
    }

    let crop = image.crop_imm(x, y, width, height);
    let gray = to_luma_bt601(&crop);

    let scale = REC_HEIGHT as f64 / height as f64;
    let dest_width = ((width as f64 * scale).ceil() as u32).clamp(1, REC_WIDTH);
    log::trace!("Scaling {width}x{height} crop to {dest_width}x{REC_HEIGHT}");
    let resized = image::imageops::resize(&gray, dest_width, REC_HEIGHT, FilterType::Triangle);

    Ok(Array4::from_shape_fn(
        (1, 1, REC_HEIGHT as usize, REC_WIDTH as usize),
        |(_, _, row, col)| {
            let col = (col as u32).min(dest_width - 1);
            let value = resized.get_pixel(col, row as u32).0[0] as f32;
            (value / 255.0 - 0.5) / 0.5
        },
    ))
}

/// Greedy decoding: take the best class per timestep, drop blanks and collapse repeats that are
/// not separated by a blank. Classes without a symbol are skipped.
#[instrument(level = "trace", skip(scores, charset))]
pub fn decode(scores: ArrayView2<f32>, charset: &Charset) -> String {
    let mut previous = 0;
    let mut text = String::new();
    for row in scores.outer_iter() {
        let current = argmax(row);
        if current > 0 && current != previous {
            if let Some(symbol) = charset.symbol(current) {
                text.push(symbol);
            }
        }
        previous = current;
    }
    text
}

pub struct CrnnNet<G> {
    graph: G,
}

impl<G: Graph> CrnnNet<G> {
    pub fn new(graph: G) -> Self {
        Self { graph }
    }

    #[instrument(level = "debug", skip(self, image, charset))]
    pub fn get_text_line(
        &self,
        image: &DynamicImage,
        bbox: &BoundingBox,
        charset: &Charset,
    ) -> Result<String> {
        let input = prepare(image, bbox)?;
        let output = self.graph.run(input)?;
        let scores = score_sequence(output)?;
        log::trace!("Score sequence size: {:?}", scores.dim());
        Ok(decode(scores.view(), charset))
    }
}

/// `(T, C)` view of a `(1, T, C)` recognizer output.
fn score_sequence(output: ArrayD<f32>) -> Result<ndarray::Array2<f32>> {
    let shape = output.shape().to_vec();
    let output = output
        .into_dimensionality::<Ix3>()
        .ok()
        .filter(|output| output.len_of(ndarray::Axis(0)) == 1)
        .ok_or(Error::OutputShape {
            graph: GRAPH_NAME,
            shape,
        })?;
    Ok(output.index_axis_move(ndarray::Axis(0), 0))
}
