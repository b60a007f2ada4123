// Offline captcha tuning: run preprocessing and OCR consensus on a saved image

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};
use tenencia::processing::{ImageProcessor, OcrConsensusSolver, TesseractEngine};

#[derive(Parser)]
#[command(name = "captcha_probe")]
#[command(about = "Print every OCR vote and the consensus answer for a captcha image")]
struct Cli {
    /// Path to the captcha image.
    image: PathBuf,

    /// Tesseract data directory, defaults to TESSDATA_PREFIX.
    #[arg(long, env = "TESSDATA_PREFIX")]
    tessdata: Option<String>,

    /// Write the candidate bitmaps to this directory.
    #[arg(long)]
    debug_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let raw = match fs::read(&cli.image) {
        Ok(raw) => raw,
        Err(e) => {
            error!("Cannot read {}: {}", cli.image.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let candidates = ImageProcessor::preprocess(&raw);
    info!("{} candidate bitmaps from {} bytes", candidates.len(), raw.len());
    if candidates.is_empty() {
        error!("Image could not be preprocessed");
        return ExitCode::FAILURE;
    }

    if let Some(dir) = &cli.debug_dir {
        if let Err(e) = ImageProcessor::save_debug_images(dir, &raw, &candidates) {
            error!("Error saving debug images: {}", e);
        }
    }

    let engine = match &cli.tessdata {
        Some(path) => TesseractEngine::new().with_datapath(path),
        None => TesseractEngine::new(),
    };
    let solver = OcrConsensusSolver::new(engine);

    let votes = solver.collect_votes(&candidates);
    println!("VOTES ({}):", votes.len());
    for vote in &votes {
        println!("  {:<10} {:>5.1}", vote.text, vote.confidence);
    }

    match OcrConsensusSolver::<TesseractEngine>::decide(&votes) {
        Some(answer) => {
            println!("DECISION: {}", answer);
            ExitCode::SUCCESS
        }
        None => {
            println!("DECISION: none");
            ExitCode::FAILURE
        }
    }
}
