use std::path::PathBuf;

use ndarray::{Array4, ArrayD};
use ort::{inputs, GraphOptimizationLevel, Session};
use tracing::instrument;

use crate::{Error, Result};

/// Input name both exported graphs are fed through.
pub const INPUT_NAME: &str = "image";

/// A portable computation graph treated as a pure function of its single input tensor.
pub trait Graph {
    fn run(&self, input: Array4<f32>) -> Result<ArrayD<f32>>;
}

impl<F> Graph for F
where
    F: Fn(Array4<f32>) -> Result<ArrayD<f32>>,
{
    fn run(&self, input: Array4<f32>) -> Result<ArrayD<f32>> {
        self(input)
    }
}

/// ONNX Runtime session for one graph. Sessions are not shared between workers; build one per
/// thread when running images in parallel.
pub struct OnnxGraph {
    name: &'static str,
    session: Session,
}

impl OnnxGraph {
    #[instrument(level = "debug")]
    pub fn init(name: &'static str, path: PathBuf, num_threads: usize) -> Result<Self> {
        let session = Session::builder()
            .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|builder| builder.with_inter_threads(num_threads))
            .and_then(|builder| builder.with_intra_threads(num_threads))
            .and_then(|builder| builder.commit_from_file(&path))
            .map_err(|err| Error::graph(name, err))?;

        log::debug!("{name} inputs: {:?}", session.inputs);
        log::debug!("{name} outputs: {:?}", session.outputs);

        Ok(Self { name, session })
    }
}

impl Graph for OnnxGraph {
    #[instrument(level = "debug", skip(self, input), fields(graph = self.name))]
    fn run(&self, input: Array4<f32>) -> Result<ArrayD<f32>> {
        let inputs = inputs![INPUT_NAME => input].map_err(|err| Error::graph(self.name, err))?;
        let outputs = self
            .session
            .run(inputs)
            .map_err(|err| Error::graph(self.name, err))?;
        let (_, output) = outputs.first_key_value().ok_or(Error::OutputShape {
            graph: self.name,
            shape: vec![],
        })?;
        let tensor = output
            .try_extract_tensor::<f32>()
            .map_err(|err| Error::graph(self.name, err))?;
        log::trace!("{} output tensor size: {:?}", self.name, tensor.shape());
        Ok(tensor.to_owned())
    }
}
