use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};
use ocr_parity::{
    harness::{self, Corpus, Harness},
    Language, PipelineBuilder,
};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

#[derive(Debug, Parser)]
#[command(version, about = "Checks ONNX OCR output against recorded baseline text")]
struct Cli {
    /// Directory holding EasyOCRDetector.onnx and EasyOCRRecognizer.onnx
    #[arg(long, global = true, default_value = "models")]
    models: PathBuf,

    /// Directory holding {lang}_char.txt files
    #[arg(long, global = true, default_value = "character")]
    charsets: PathBuf,

    #[arg(long, global = true, default_value_t = 4)]
    threads: usize,

    /// Apply the 800x608 detector box to the source image without rescaling it
    #[arg(long, global = true)]
    working_coordinates: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the pipeline over every image in a corpus directory and diff against baselines
    Run {
        #[arg(default_value = "examples")]
        corpus: PathBuf,
    },
    /// Re-diff existing candidate files against their baselines without running inference
    Report {
        #[arg(default_value = "examples")]
        corpus: PathBuf,
    },
    /// Print the recognized text of a single image
    Infer {
        image: PathBuf,
        /// Language tag; derived from the file name when omitted
        #[arg(long)]
        lang: Option<Language>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            log::error!("{err}");
            eprintln!("error: {err}");
            ExitCode::from(2)
        }
    }
}

/// `Ok(false)` when any image mismatched or failed.
fn run(cli: Cli) -> ocr_parity::Result<bool> {
    let build_pipeline = || {
        let options = ocr_parity::DetectionOptions {
            rescale_to_image: !cli.working_coordinates,
            ..Default::default()
        };
        PipelineBuilder::new()
            .threads(cli.threads)
            .det_model(cli.models.join("EasyOCRDetector.onnx"))
            .rec_model(cli.models.join("EasyOCRRecognizer.onnx"))
            .charset_dir(&cli.charsets)
            .detection_options(options)
            .build()
    };

    match &cli.command {
        Command::Run { corpus } => {
            let pipeline = build_pipeline()?;
            let harness = Harness::new(&pipeline, Corpus::scan(corpus)?);
            if harness.corpus().is_empty() {
                log::warn!("No images in {}", corpus.display());
            } else {
                log::info!("Checking {} images", harness.corpus().len());
            }
            let mut all_equal = true;
            for verdict in harness.run() {
                println!("{}", verdict.status_line());
                all_equal &= verdict.equal;
            }
            Ok(all_equal)
        }
        Command::Report { corpus } => {
            let verdicts = harness::report(corpus)?;
            for verdict in &verdicts {
                println!("{}: match={}", verdict.id, verdict.equal);
            }
            Ok(verdicts.iter().all(|verdict| verdict.equal))
        }
        Command::Infer { image, lang } => {
            let pipeline = build_pipeline()?;
            let language = lang.unwrap_or_else(|| Language::from_file_name(image));
            let text = pipeline.infer(&harness::load_image(image)?, language)?;
            println!("{text}");
            Ok(true)
        }
    }
}
