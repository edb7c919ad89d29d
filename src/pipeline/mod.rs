//! Parallel batch materialization with serial inference and streamed writeback.
//!
//! Worker threads each build their own [`BatchSource`] and answer batch
//! indices dispatched by the controller. The controller runs the model on
//! every returned batch and forwards labels and predictions to two writer
//! threads. Any failure or interrupt tears every thread down before the
//! original error is returned.

mod writer;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::generator::{Batch, BatchSource, GeneratorError};
use crate::model::{Model, ModelError};

pub use writer::{AppendStore, Frame};

/// Errors returned by [`InferencePipeline::run`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid pipeline parameters.
    #[error("invalid pipeline configuration: {0}")]
    Config(String),
    /// A worker failed to build its source or to produce a batch.
    #[error(transparent)]
    Generator(#[from] GeneratorError),
    /// The model rejected a batch.
    #[error(transparent)]
    Model(#[from] ModelError),
    /// The model returned the wrong number of rows.
    #[error("batch {batch}: model returned {found} rows for {expected} examples")]
    PredictionRows {
        /// Batch index.
        batch: usize,
        /// Examples in the batch.
        expected: usize,
        /// Rows returned.
        found: usize,
    },
    /// A store could not be written.
    #[error("failed to write {path}: {source}")]
    Writer {
        /// Store path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The cancel token was triggered.
    #[error("inference interrupted")]
    Interrupted,
    /// A pipeline thread panicked or vanished.
    #[error("{0} thread terminated abnormally")]
    ThreadPanicked(&'static str),
}

/// Shared interrupt flag observed by the controller only.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Fresh, untriggered token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request teardown.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether teardown was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Pipeline parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PipelineConfig {
    /// Worker threads, each owning a batch source.
    pub workers: usize,
    /// Upper bound on dispatched but unanswered batches.
    pub max_in_flight: usize,
    /// Stores are written to `<prefix>.labels` and `<prefix>.predictions`.
    pub output_prefix: PathBuf,
    /// How often the controller checks the cancel token while waiting.
    pub poll_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_in_flight: 16,
            output_prefix: PathBuf::from("predictions"),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl PipelineConfig {
    /// Defaults writing under `output_prefix`.
    pub fn new(output_prefix: impl Into<PathBuf>) -> Self {
        Self {
            output_prefix: output_prefix.into(),
            ..Self::default()
        }
    }

    /// Set the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the dispatch window.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    /// Set the cancel polling interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Path of the label store.
    pub fn labels_path(&self) -> PathBuf {
        with_suffix(&self.output_prefix, "labels")
    }

    /// Path of the prediction store.
    pub fn predictions_path(&self) -> PathBuf {
        with_suffix(&self.output_prefix, "predictions")
    }
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Totals of a successful run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    /// Batches predicted and written.
    pub batches: usize,
    /// Rows written to each store.
    pub rows: usize,
}

enum WorkerMessage {
    Done { index: usize, batch: Batch },
    Failed(GeneratorError),
}

/// Parallel inference over every batch of a source.
#[derive(Debug, Clone)]
pub struct InferencePipeline {
    config: PipelineConfig,
}

impl InferencePipeline {
    /// Validate the configuration.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        if config.workers == 0 {
            return Err(PipelineError::Config("workers must be > 0".to_string()));
        }
        if config.max_in_flight == 0 {
            return Err(PipelineError::Config("max_in_flight must be > 0".to_string()));
        }
        Ok(Self { config })
    }

    /// Active configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Predict every batch produced by `factory` and stream the results.
    ///
    /// `factory(None)` is called once on the calling thread to learn the
    /// epoch length, label columns and seed. Every worker then builds its own
    /// source with `factory(seed)`, so all of them slice the same epoch; a
    /// worker source reporting a different seed fails the run.
    pub fn run<F, S, M>(
        &self,
        factory: F,
        model: &mut M,
        cancel: &CancelToken,
    ) -> Result<PipelineSummary, PipelineError>
    where
        F: Fn(Option<u64>) -> Result<S, GeneratorError> + Sync,
        S: BatchSource,
        M: Model + ?Sized,
    {
        let (total, columns, seed) = {
            let first = factory(None)?;
            (first.len(), first.label_columns().to_vec(), first.seed())
        };
        info!(
            batches = total,
            workers = self.config.workers,
            max_in_flight = self.config.max_in_flight,
            model = model.name(),
            seed = ?seed,
            "starting inference"
        );

        let factory = &factory;
        let terminate = AtomicBool::new(false);
        let terminate = &terminate;
        let exited = AtomicUsize::new(0);
        let exited = &exited;

        thread::scope(|scope| {
            let (label_tx, label_rx) = unbounded::<Frame>();
            let (pred_tx, pred_rx) = unbounded::<Frame>();
            let label_store = AppendStore::new(self.config.labels_path(), columns.clone());
            let pred_store = AppendStore::new(self.config.predictions_path(), columns);
            let label_writer = scope.spawn(move || writer::writer_loop(label_store, label_rx));
            let pred_writer = scope.spawn(move || writer::writer_loop(pred_store, pred_rx));

            let (task_tx, task_rx) = bounded::<usize>(self.config.max_in_flight);
            let (result_tx, result_rx) = bounded::<WorkerMessage>(self.config.max_in_flight);
            let workers: Vec<_> = (0..self.config.workers)
                .map(|_| {
                    let tasks = task_rx.clone();
                    let results = result_tx.clone();
                    scope.spawn(move || {
                        let _guard = ExitGuard(exited);
                        worker_loop(factory, seed, tasks, results, terminate)
                    })
                })
                .collect();
            drop(task_rx);
            drop(result_tx);

            let outcome = self.drive(
                total,
                model,
                cancel,
                exited,
                &task_tx,
                &result_rx,
                [&label_tx, &pred_tx],
            );

            // Teardown: stop workers, then writers, joining every thread.
            terminate.store(true, Ordering::SeqCst);
            drop(task_tx);
            drop(result_rx);
            let mut panicked = None;
            for worker in workers {
                if worker.join().is_err() {
                    panicked = Some("worker");
                }
            }
            let _ = label_tx.send(Frame::Terminate);
            let _ = pred_tx.send(Frame::Terminate);
            let label_rows = joined(label_writer.join());
            let pred_rows = joined(pred_writer.join());

            let summary = match outcome {
                Ok(summary) => summary,
                Err(PipelineError::ThreadPanicked("writer")) => {
                    // The writer's own failure explains the closed channel.
                    let err = label_rows
                        .err()
                        .or(pred_rows.err())
                        .unwrap_or(PipelineError::ThreadPanicked("writer"));
                    warn!(error = %err, "inference aborted");
                    return Err(err);
                }
                Err(err) => {
                    warn!(error = %err, "inference aborted");
                    return Err(err);
                }
            };
            if let Some(which) = panicked {
                return Err(PipelineError::ThreadPanicked(which));
            }
            let label_rows = label_rows?;
            pred_rows?;
            info!(batches = summary.batches, rows = label_rows, "inference finished");
            Ok(summary)
        })
    }

    /// Controller loop: keep at most `max_in_flight` batches outstanding,
    /// predict each answer in completion order and hand it to the writers.
    fn drive<M: Model + ?Sized>(
        &self,
        total: usize,
        model: &mut M,
        cancel: &CancelToken,
        exited: &AtomicUsize,
        tasks: &Sender<usize>,
        results: &Receiver<WorkerMessage>,
        writers: [&Sender<Frame>; 2],
    ) -> Result<PipelineSummary, PipelineError> {
        let [labels_out, predictions_out] = writers;
        let mut summary = PipelineSummary::default();
        let mut next = 0;
        let mut in_flight = 0;
        while summary.batches < total {
            while in_flight < self.config.max_in_flight && next < total {
                if tasks.send(next).is_err() {
                    return Err(PipelineError::ThreadPanicked("worker"));
                }
                next += 1;
                in_flight += 1;
            }
            if cancel.is_cancelled() {
                return Err(PipelineError::Interrupted);
            }
            let (index, batch) = match results.recv_timeout(self.config.poll_interval) {
                Ok(WorkerMessage::Done { index, batch }) => (index, batch),
                Ok(WorkerMessage::Failed(err)) => return Err(err.into()),
                // Workers only exit early by panicking.
                Err(RecvTimeoutError::Timeout) if exited.load(Ordering::SeqCst) > 0 => {
                    return Err(PipelineError::ThreadPanicked("worker"))
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(PipelineError::ThreadPanicked("worker"))
                }
            };
            in_flight -= 1;

            let (positions, inputs, labels) = batch.into_evaluation();
            let predictions = model.predict_batch(&inputs)?;
            if predictions.nrows() != positions.len() {
                return Err(PipelineError::PredictionRows {
                    batch: index,
                    expected: positions.len(),
                    found: predictions.nrows(),
                });
            }
            let positions: Arc<[_]> = positions.into();
            let rows = positions.len();
            let sent = labels_out
                .send(Frame::Data {
                    positions: positions.clone(),
                    values: labels,
                })
                .and_then(|()| {
                    predictions_out.send(Frame::Data {
                        positions,
                        values: predictions,
                    })
                });
            if sent.is_err() {
                // A writer stopped early; its own error surfaces on join.
                return Err(PipelineError::ThreadPanicked("writer"));
            }
            summary.batches += 1;
            summary.rows += rows;
            debug!(batch = index, rows, done = summary.batches, "batch predicted");
        }
        Ok(summary)
    }
}

fn joined(
    result: thread::Result<Result<usize, PipelineError>>,
) -> Result<usize, PipelineError> {
    result.unwrap_or(Err(PipelineError::ThreadPanicked("writer")))
}

/// Build a worker's source and check it replays the first source's draws.
fn worker_source<F, S>(factory: &F, seed: Option<u64>) -> Result<S, GeneratorError>
where
    F: Fn(Option<u64>) -> Result<S, GeneratorError>,
    S: BatchSource,
{
    let source = factory(seed)?;
    if source.seed() != seed {
        return Err(GeneratorError::Config(format!(
            "worker source has seed {:?}, expected {seed:?}",
            source.seed()
        )));
    }
    Ok(source)
}

/// Counts worker exits, including unwinding ones.
struct ExitGuard<'a>(&'a AtomicUsize);

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn worker_loop<F, S>(
    factory: &F,
    seed: Option<u64>,
    tasks: Receiver<usize>,
    results: Sender<WorkerMessage>,
    terminate: &AtomicBool,
) where
    F: Fn(Option<u64>) -> Result<S, GeneratorError>,
    S: BatchSource,
{
    let source = match worker_source(factory, seed) {
        Ok(source) => source,
        Err(err) => {
            let _ = results.send(WorkerMessage::Failed(err));
            return;
        }
    };
    for index in tasks.iter() {
        if terminate.load(Ordering::SeqCst) {
            break;
        }
        let message = match source.get_batch(index) {
            Ok(batch) => WorkerMessage::Done { index, batch },
            Err(err) => WorkerMessage::Failed(err),
        };
        if results.send(message).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_paths_append_suffix() {
        let config = PipelineConfig::new("/tmp/run.v1");
        assert_eq!(config.labels_path(), PathBuf::from("/tmp/run.v1.labels"));
        assert_eq!(config.predictions_path(), PathBuf::from("/tmp/run.v1.predictions"));
    }

    #[test]
    fn zero_workers_rejected() {
        let err = InferencePipeline::new(PipelineConfig::default().with_workers(0)).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
