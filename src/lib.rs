use std::path::PathBuf;

use image::DynamicImage;
use tracing::instrument;

pub mod charset;
pub mod craft_net;
pub mod crnn_net;
pub mod diff;
mod error;
pub mod graph;
pub mod harness;
mod result;
mod util;

pub use charset::{Charset, CharsetCache, Language};
use craft_net::{CraftNet, DET_HEIGHT, DET_WIDTH};
use crnn_net::CrnnNet;
pub use error::{Error, Result};
use graph::{Graph, OnnxGraph};
pub use result::*;

pub use ort as runtime;

pub struct PipelineBuilder {
    threads: usize,
    det_path: Option<PathBuf>,
    rec_path: Option<PathBuf>,
    charset_dir: Option<PathBuf>,
    detection_options: DetectionOptions,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn det_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.det_path = Some(path.into());
        self
    }

    pub fn rec_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.rec_path = Some(path.into());
        self
    }

    pub fn charset_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.charset_dir = Some(path.into());
        self
    }

    pub fn detection_options(mut self, options: DetectionOptions) -> Self {
        self.detection_options = options;
        self
    }

    #[instrument(skip(self))]
    pub fn build(mut self) -> Result<Pipeline<OnnxGraph, OnnxGraph>> {
        let det_path = self
            .det_path
            .take()
            .unwrap_or_else(|| "models/EasyOCRDetector.onnx".into());
        let rec_path = self
            .rec_path
            .take()
            .unwrap_or_else(|| "models/EasyOCRRecognizer.onnx".into());
        let charset_dir = self
            .charset_dir
            .take()
            .unwrap_or_else(|| "character".into());

        let detector = OnnxGraph::init("detector", det_path, self.threads)?;
        let recognizer = OnnxGraph::init("recognizer", rec_path, self.threads)?;
        Ok(Pipeline::new(
            detector,
            recognizer,
            CharsetCache::new(charset_dir),
            self.detection_options,
        ))
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self {
            threads: 4,
            det_path: None,
            rec_path: None,
            charset_dir: None,
            detection_options: DetectionOptions::default(),
        }
    }
}

/// Detector and recognizer graphs plus the charsets they decode against.
pub struct Pipeline<D, R> {
    det_model: CraftNet<D>,
    rec_model: CrnnNet<R>,
    charsets: CharsetCache,
}

impl<D: Graph, R: Graph> Pipeline<D, R> {
    pub fn new(
        detector: D,
        recognizer: R,
        charsets: CharsetCache,
        options: DetectionOptions,
    ) -> Self {
        Self {
            det_model: CraftNet::new(detector, options),
            rec_model: CrnnNet::new(recognizer),
            charsets,
        }
    }

    pub fn charsets(&self) -> &CharsetCache {
        &self.charsets
    }

    /// Recognized text of `image`. No detection and degenerate crops both give an empty string.
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub fn infer(&self, image: &DynamicImage, language: Language) -> Result<String> {
        let Some(bbox) = self.det_model.get_text_box(image)? else {
            return Ok(String::new());
        };
        let bbox = if self.det_model.options().rescale_to_image {
            bbox.rescale((DET_WIDTH, DET_HEIGHT), (image.width(), image.height()))
        } else {
            bbox
        };
        log::debug!("Text box {bbox:?}, {}x{}", bbox.width(), bbox.height());

        let charset = self.charsets.get(language)?;
        match self.rec_model.get_text_line(image, &bbox, &charset) {
            Err(err) if err.is_no_text() => {
                log::debug!("No recognizable text: {err}");
                Ok(String::new())
            }
            result => result,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DetectionOptions {
    pub text_threshold: f32,
    pub link_threshold: f32,
    pub low_text: f32,
    pub min_component_area: usize,
    /// Map the working-resolution box onto source pixels before cropping. When `false` the
    /// 800x608 box is applied to the source image unscaled.
    pub rescale_to_image: bool,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            text_threshold: 0.7,
            link_threshold: 0.4,
            low_text: 0.4,
            min_component_area: 10,
            rescale_to_image: true,
        }
    }
}
