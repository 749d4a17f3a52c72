use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use kaidoku::dispatch::worker;
use kaidoku::{CancelToken, DocumentAssembler, PoolLauncher, ProcessLauncher, Settings};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "kaidoku", version)]
#[command(about = "Searchable PDFs and plain text from scanned documents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Add an invisible text layer to an image-only PDF
    Convert {
        /// Scanned input PDF
        #[arg(long, alias = "input_path")]
        input: PathBuf,

        /// Searchable output PDF
        #[arg(long, alias = "output_path")]
        output: PathBuf,
    },

    /// Build one searchable PDF from page images
    Images {
        /// Output PDF (must end in .pdf)
        #[arg(long, alias = "output_path")]
        output: PathBuf,

        /// Page images in page order (JPEG, PNG, TIFF, BMP)
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },

    /// Extract the text of an image-only PDF into a UTF-8 file
    Extract {
        #[arg(long, aliases = ["input_path", "pdf_path"])]
        input: PathBuf,

        #[arg(long, alias = "output_path")]
        output: PathBuf,
    },

    /// Save a copy of a password-protected PDF without its password
    Unlock {
        #[arg(long, alias = "input_path")]
        input: PathBuf,

        #[arg(long, alias = "output_path")]
        output: PathBuf,

        #[arg(long)]
        password: String,
    },

    /// Serve OCR jobs on stdin/stdout for a parent process
    #[command(hide = true)]
    Worker,
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // stdout belongs to the worker protocol, so logs always go to stderr.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "kaidoku=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Command::Worker = cli.command {
        return match worker::run_stdio() {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!("worker stopped: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    let settings = Settings::from_env();
    let launcher = match ProcessLauncher::current_exe() {
        Ok(launcher) => Some(Box::new(launcher) as Box<dyn PoolLauncher>),
        Err(e) => {
            tracing::warn!("worker processes unavailable, running sequentially: {}", e);
            None
        }
    };

    let result = DocumentAssembler::from_settings(&settings, launcher).and_then(|assembler| {
        let cancel = CancelToken::new();
        match cli.command {
            Command::Convert { input, output } => {
                assembler.create_searchable_pdf(&input, &output, &cancel, None)
            }
            Command::Images { output, images } => {
                assembler.create_searchable_pdf_from_images(&images, &output, &cancel, None)
            }
            Command::Extract { input, output } => {
                assembler.extract_text_to_file(&input, &output, &cancel, None)
            }
            Command::Unlock {
                input,
                output,
                password,
            } => assembler.remove_pdf_password(&input, &output, &password),
            Command::Worker => Ok(()),
        }
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(2)
        }
    }
}
