//! Order-preserving fan-out of page recognition.
//!
//! Batches go to a pool of worker processes when one is configured and more
//! than one image is queued, otherwise they run in-process one after another.
//! Whatever the path, output index `i` always belongs to input index `i`.

pub mod pool;
pub mod wire;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use image::DynamicImage;

use crate::adaptive::AdaptiveOcrEngine;
use crate::cancel::CancelToken;
use crate::config::{DispatchSettings, OcrSettings};
use crate::engine::Recognizer;
use crate::error::{ConversionError, Result};
use crate::types::{PageOutcome, WorkerMode};

use self::pool::{Completion, Job, PoolError, PoolLauncher, WorkerPool};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

enum PoolFailure {
    /// Environment or process level; the batch is redone sequentially.
    Transient(PoolError),
    Fatal(ConversionError),
}

impl From<PoolError> for PoolFailure {
    fn from(err: PoolError) -> Self {
        PoolFailure::Transient(err)
    }
}

impl From<ConversionError> for PoolFailure {
    fn from(err: ConversionError) -> Self {
        PoolFailure::Fatal(err)
    }
}

pub struct ParallelDispatcher {
    engine: AdaptiveOcrEngine,
    settings: OcrSettings,
    workers: usize,
    parallel: bool,
    launcher: Option<Box<dyn PoolLauncher>>,
}

impl ParallelDispatcher {
    /// In-process only until a launcher is attached.
    pub fn new(recognizer: Arc<dyn Recognizer>, ocr: &OcrSettings, dispatch: &DispatchSettings) -> Self {
        Self {
            engine: AdaptiveOcrEngine::new(recognizer, ocr),
            settings: ocr.clone(),
            workers: dispatch.workers.max(1),
            parallel: dispatch.parallel,
            launcher: None,
        }
    }

    pub fn with_launcher(mut self, launcher: Box<dyn PoolLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Pool size, also used by callers as their chunk size.
    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn recognizer(&self) -> &Arc<dyn Recognizer> {
        self.engine.recognizer()
    }

    /// Recognizes `images`, reporting `(completed, total)` after every result.
    pub fn run(
        &self,
        images: &[DynamicImage],
        mode: WorkerMode,
        cancel: &CancelToken,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<Vec<PageOutcome>> {
        if images.is_empty() {
            return Ok(Vec::new());
        }

        let launcher = match self.launcher.as_deref() {
            Some(launcher) if self.parallel && images.len() > 1 => launcher,
            _ => return self.run_sequential(images, mode, cancel, progress),
        };

        match self.run_pool(launcher, images, mode, cancel, progress) {
            Ok(outcomes) => Ok(outcomes),
            Err(PoolFailure::Fatal(err)) => Err(err),
            Err(PoolFailure::Transient(err)) => {
                tracing::warn!("worker pool failed ({}), retrying batch sequentially", err);
                self.run_sequential(images, mode, cancel, progress)
            }
        }
    }

    fn run_sequential(
        &self,
        images: &[DynamicImage],
        mode: WorkerMode,
        cancel: &CancelToken,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<Vec<PageOutcome>> {
        let total = images.len();
        let mut outcomes = Vec::with_capacity(total);
        for (index, image) in images.iter().enumerate() {
            cancel.check()?;
            outcomes.push(worker::process_page(&self.engine, image, mode)?);
            progress(index + 1, total);
        }
        Ok(outcomes)
    }

    fn run_pool(
        &self,
        launcher: &dyn PoolLauncher,
        images: &[DynamicImage],
        mode: WorkerMode,
        cancel: &CancelToken,
        progress: &mut dyn FnMut(usize, usize),
    ) -> std::result::Result<Vec<PageOutcome>, PoolFailure> {
        cancel.check()?;
        let mut pool = launcher.launch(self.workers.min(images.len()), &self.settings)?;
        let collected = collect(pool.as_mut(), images, mode, cancel, progress);
        pool.shutdown();
        collected
    }
}

fn collect(
    pool: &mut dyn WorkerPool,
    images: &[DynamicImage],
    mode: WorkerMode,
    cancel: &CancelToken,
    progress: &mut dyn FnMut(usize, usize),
) -> std::result::Result<Vec<PageOutcome>, PoolFailure> {
    let total = images.len();
    for (index, image) in images.iter().enumerate() {
        pool.submit(Job {
            index,
            mode,
            image: image.clone(),
        })?;
    }

    let mut slots: Vec<Option<PageOutcome>> = vec![None; total];
    let mut completed = 0;
    while completed < total {
        cancel.check()?;
        match pool.next_completion(POLL_INTERVAL)? {
            None => continue,
            Some(Completion::Done { index, outcome }) => {
                let slot = slots
                    .get_mut(index)
                    .filter(|slot| slot.is_none())
                    .ok_or_else(|| PoolError::Protocol(format!("unexpected result for image {}", index)))?;
                *slot = Some(outcome);
                completed += 1;
                progress(completed, total);
            }
            Some(Completion::Failed { index, message }) => {
                return Err(ConversionError::engine(format!("image {}: {}", index + 1, message)).into());
            }
        }
    }

    Ok(slots.into_iter().flatten().collect())
}
