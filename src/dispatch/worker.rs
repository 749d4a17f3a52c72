//! The worker side of the process pool.

use std::io::{self, BufReader, BufWriter, Read, Write};
use std::sync::Arc;

use image::DynamicImage;

use super::wire::{self, Reply, Request, WireError};
use crate::adaptive::AdaptiveOcrEngine;
use crate::config::{OcrSettings, RENDER_CONFIDENCE_THRESHOLD};
use crate::engine::{EngineError, Recognizer, TesseractCli};
use crate::frame::filter_by_confidence;
use crate::reconstruct::reconstruct_text;
use crate::types::{PageOutcome, PagePayload, WorkerMode};

/// Recognizes one image and shapes the payload for `mode`.
pub fn process_page(
    engine: &AdaptiveOcrEngine,
    image: &DynamicImage,
    mode: WorkerMode,
) -> Result<PageOutcome, EngineError> {
    let result = engine.recognize(image)?;
    let payload = match mode {
        WorkerMode::WordTable => {
            PagePayload::Words(filter_by_confidence(&result.frame, RENDER_CONFIDENCE_THRESHOLD))
        }
        WorkerMode::Text => PagePayload::Text(reconstruct_text(&result.frame)),
    };
    Ok(PageOutcome { result, payload })
}

/// Answers pool requests until the input stream ends.
///
/// The first frame must be `Init`; the recognizer is built from its settings
/// and its availability reported back before any job is accepted.
pub fn serve<R, W, F>(mut input: R, mut output: W, make_recognizer: F) -> Result<(), WireError>
where
    R: Read,
    W: Write,
    F: FnOnce(&OcrSettings) -> Arc<dyn Recognizer>,
{
    let settings = match wire::read_frame::<_, Request>(&mut input)? {
        None => return Ok(()),
        Some((Request::Init { settings }, _)) => settings,
        Some((other, _)) => {
            return Err(WireError::Protocol(format!("expected init, got {:?}", other)));
        }
    };

    let recognizer = make_recognizer(&settings);
    let recognizer_available = recognizer.is_available();
    wire::write_frame(&mut output, &Reply::Ready { recognizer_available }, &[])?;
    let engine = AdaptiveOcrEngine::new(recognizer, &settings);

    while let Some((request, body)) = wire::read_frame::<_, Request>(&mut input)? {
        let (index, mode) = match request {
            Request::Job { index, mode } => (index, mode),
            Request::Init { .. } => {
                return Err(WireError::Protocol("duplicate init".to_string()));
            }
        };

        let outcome = wire::decode_image(&body)
            .map_err(|err| err.to_string())
            .and_then(|image| process_page(&engine, &image, mode).map_err(|err| err.to_string()));

        let reply = match outcome {
            Ok(outcome) => Reply::Done {
                index,
                record: outcome.into(),
            },
            Err(message) => {
                tracing::warn!("job {} failed: {}", index, message);
                Reply::Failed { index, message }
            }
        };
        wire::write_frame(&mut output, &reply, &[])?;
    }

    Ok(())
}

/// Entry point of the hidden `worker` subcommand.
pub fn run_stdio() -> Result<(), WireError> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    serve(
        BufReader::new(stdin.lock()),
        BufWriter::new(stdout.lock()),
        |settings| Arc::new(TesseractCli::discover(settings)) as Arc<dyn Recognizer>,
    )
}
