use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid image: {context}")]
    InvalidImage {
        context: String,
        #[source]
        source: Option<image::ImageError>,
    },

    /// Crop has no pixels left after clamping to the image. Callers treat this as "no text".
    #[error("degenerate crop ({width}x{height})")]
    DegenerateCrop { width: u32, height: u32 },

    #[error("{graph} graph execution failed")]
    GraphExecution {
        graph: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("{graph} graph produced unexpected output shape {shape:?}")]
    OutputShape {
        graph: &'static str,
        shape: Vec<usize>,
    },

    #[error("failed to load charset {}", path.display())]
    Charset {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn graph(graph: &'static str, source: ort::Error) -> Self {
        Self::GraphExecution {
            graph,
            source: Box::new(source),
        }
    }

    /// Errors that mean "this image has no recognizable text" rather than a failure.
    pub fn is_no_text(&self) -> bool {
        matches!(self, Self::DegenerateCrop { .. })
    }
}
