use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use crate::config::{SummarizeParams, DEFAULT_MAX_LENGTH, DEFAULT_MIN_LENGTH, DEFAULT_MODEL};
use crate::file_io::{self, FileError};
use crate::summarizer::{self, SummarizeError};

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[clap(author, version, about = "Text summarization with BART", long_about = None)]
pub struct CliArgs {
    /// Path to input text file
    #[clap(long, value_parser)]
    pub input: PathBuf,
    /// Path to output summary file
    #[clap(long, value_parser)]
    pub output: PathBuf,
    /// Hub model id or local model directory
    #[clap(long, value_parser, default_value = DEFAULT_MODEL)]
    pub model: String,
    /// Maximum summary length in tokens
    #[clap(long, value_parser, default_value_t = DEFAULT_MAX_LENGTH)]
    pub max_length: usize,
    /// Minimum summary length in tokens
    #[clap(long, value_parser, default_value_t = DEFAULT_MIN_LENGTH)]
    pub min_length: usize,
}

impl CliArgs {
    pub fn params(&self) -> SummarizeParams {
        SummarizeParams {
            max_length: self.max_length,
            min_length: self.min_length,
        }
    }
}

/// The pipeline stage that failed.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Read(FileError),
    #[error("Error during summarization: {0}")]
    Summarize(#[source] SummarizeError),
    #[error(transparent)]
    Write(FileError),
}

impl StageError {
    pub fn exit_code(&self) -> u8 {
        match self {
            StageError::Read(_) => 1,
            StageError::Summarize(_) => 2,
            StageError::Write(_) => 3,
        }
    }
}

/// Read, summarize, write. Returns the path the summary was saved to.
pub fn run(args: &CliArgs) -> Result<PathBuf, StageError> {
    let text = file_io::read_text_file(&args.input).map_err(StageError::Read)?;
    log::info!("Summarizing {} with {}", args.input.display(), args.model);

    let summary = summarizer::summarize_text(&text, &args.model, &args.params()).map_err(StageError::Summarize)?;

    file_io::write_text_file(&args.output, &summary).map_err(StageError::Write)?;
    Ok(args.output.clone())
}

pub fn run_cli() -> ExitCode {
    let args = CliArgs::parse();
    match run(&args) {
        Ok(path) => {
            println!("Summary successfully saved to '{}'", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
