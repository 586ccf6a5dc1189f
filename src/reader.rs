use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

use tracing::{info, warn};

use crate::{
    assembler::{dedupe_filenames, group_renditions, Assembler, AssetGroup, AssetImageRecord},
    catalog::{CatalogHandle, EnumerateOptions},
    error::ReadError,
    gap_vec::GapVec,
    settings::ReadOptions,
};

/// Lifecycle of a read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadState {
    Idle,
    Opening,
    Enumerating,
    Decoding,
    Completed,
    Failed,
    Cancelled,
}

impl ReadState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Opening,
            2 => Self::Enumerating,
            3 => Self::Decoding,
            4 => Self::Completed,
            5 => Self::Failed,
            _ => Self::Cancelled,
        }
    }

    /// Whether the read reached one of its final states
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Progress of a read, shared between the worker and any observer
///
/// `total_units` is an estimate until decoding starts: the number of stored
/// renditions while enumerating, then the number of asset groups.
pub struct ReadProgress {
    total: AtomicUsize,
    completed: AtomicUsize,
    cancelled: AtomicBool,
    state: AtomicU8,
}

impl ReadProgress {
    pub fn new() -> Self {
        Self {
            total: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
            state: AtomicU8::new(ReadState::Idle as u8),
        }
    }

    pub fn total_units(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    pub fn completed_units(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    /// Completed share of the work, between 0 and 1
    pub fn fraction_completed(&self) -> f64 {
        let total = self.total_units();

        if total == 0 {
            return if self.state() == ReadState::Completed { 1.0 } else { 0.0 };
        }

        (self.completed_units() as f64 / total as f64).min(1.0)
    }

    pub fn state(&self) -> ReadState {
        ReadState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Ask the read to stop as soon as possible
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    fn set_state(&self, state: ReadState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::Release);
    }

    fn complete_unit(&self) {
        self.completed.fetch_add(1, Ordering::AcqRel);
    }

    fn cancel_flag(&self) -> &AtomicBool {
        &self.cancelled
    }
}

impl Default for ReadProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReadProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadProgress")
            .field("state", &self.state())
            .field("completed", &self.completed_units())
            .field("total", &self.total_units())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Result of a read, handed to its completion callback
#[derive(Debug)]
pub enum ReadOutcome {
    /// At least one asset was extracted
    Success(Vec<AssetImageRecord>),
    /// The catalog opened fine but no asset could be extracted from it
    Empty { path: PathBuf },
    /// The catalog could not be opened or is not a compatible catalog
    Failed(ReadError),
    /// The read was cancelled; partial results are discarded
    Cancelled,
}

impl ReadOutcome {
    /// Split into `(records, count, error)`
    ///
    /// Records are `None` when the catalog could not be read or the read was
    /// cancelled, and an empty list along with [`ReadError::NoImagesFound`]
    /// when it was read but holds no image.
    pub fn into_parts(self) -> (Option<Vec<AssetImageRecord>>, usize, Option<ReadError>) {
        match self {
            Self::Success(records) => {
                let count = records.len();
                (Some(records), count, None)
            }
            Self::Empty { path } => (Some(vec![]), 0, Some(ReadError::NoImagesFound { path })),
            Self::Failed(err) => (None, 0, Some(err)),
            Self::Cancelled => (None, 0, Some(ReadError::Cancelled)),
        }
    }

    /// Extracted records, when there are some
    pub fn records(&self) -> Option<&[AssetImageRecord]> {
        match self {
            Self::Success(records) => Some(records),
            Self::Empty { .. } | Self::Failed(_) | Self::Cancelled => None,
        }
    }

    /// Treat every outcome other than [`ReadOutcome::Success`] as an error
    pub fn into_result(self) -> Result<Vec<AssetImageRecord>, ReadError> {
        match self.into_parts() {
            (Some(records), _, None) => Ok(records),
            (_, _, Some(err)) => Err(err),
            (None, _, None) => Err(ReadError::Cancelled),
        }
    }
}

/// A read running in the background
pub struct ReadHandle {
    progress: Arc<ReadProgress>,
    worker: JoinHandle<()>,
}

impl ReadHandle {
    pub fn progress(&self) -> Arc<ReadProgress> {
        Arc::clone(&self.progress)
    }

    /// Ask the read to stop; the completion callback still runs, with [`ReadOutcome::Cancelled`]
    /// unless the read already finished
    pub fn cancel(&self) {
        self.progress.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for the read to complete, after its callback returned
    pub fn join(self) {
        if let Err(payload) = self.worker.join() {
            panic::resume_unwind(payload);
        }
    }
}

/// Reads the image assets of a compiled asset catalog
///
/// ```no_run
/// use carreader::CatalogReader;
///
/// let handle = CatalogReader::new("Assets.car").read(|outcome| {
///     let (records, count, error) = outcome.into_parts();
///     println!("{count} assets, error: {error:?}, {:?}", records.map(|r| r.len()));
/// });
///
/// handle.join();
/// ```
#[derive(Debug, Clone)]
pub struct CatalogReader {
    path: PathBuf,
    options: ReadOptions,
}

impl CatalogReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            options: ReadOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ReadOptions) -> Self {
        self.options = options;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &ReadOptions {
        &self.options
    }

    /// Read every asset of the catalog in the background
    ///
    /// `on_complete` is called exactly once, from the background thread.
    pub fn read<F>(&self, on_complete: F) -> ReadHandle
    where
        F: FnOnce(ReadOutcome) + Send + 'static,
    {
        self.read_with_progress(Arc::new(ReadProgress::new()), None, on_complete)
    }

    /// Like [`CatalogReader::read`], extracting at most `max_items` assets
    pub fn resource_constrained_read<F>(&self, max_items: usize, on_complete: F) -> ReadHandle
    where
        F: FnOnce(ReadOutcome) + Send + 'static,
    {
        self.read_with_progress(Arc::new(ReadProgress::new()), Some(max_items), on_complete)
    }

    /// Read in the background, reporting to a caller-provided progress object
    pub fn read_with_progress<F>(
        &self,
        progress: Arc<ReadProgress>,
        max_items: Option<usize>,
        on_complete: F,
    ) -> ReadHandle
    where
        F: FnOnce(ReadOutcome) + Send + 'static,
    {
        let path = self.path.clone();
        let options = self.options.clone();
        let thread_progress = Arc::clone(&progress);

        let worker = std::thread::spawn(move || {
            on_complete(run(&path, &options, max_items, &thread_progress));
        });

        ReadHandle { progress, worker }
    }

    /// Read on the current thread
    pub fn read_blocking(&self, max_items: Option<usize>) -> ReadOutcome {
        run(&self.path, &self.options, max_items, &ReadProgress::new())
    }
}

#[tracing::instrument(skip(path, options, progress), fields(path = %path.display()))]
fn run(
    path: &Path,
    options: &ReadOptions,
    max_items: Option<usize>,
    progress: &ReadProgress,
) -> ReadOutcome {
    let outcome = read_catalog(path, options, max_items, progress);

    match &outcome {
        ReadOutcome::Success(records) => {
            info!(records = records.len(), "catalog read completed");
            progress.set_state(ReadState::Completed);
        }
        ReadOutcome::Empty { .. } => {
            info!("catalog read completed without any image");
            progress.set_state(ReadState::Completed);
        }
        ReadOutcome::Failed(err) => {
            info!(code = err.code(), %err, "catalog read failed");
            progress.set_state(ReadState::Failed);
        }
        ReadOutcome::Cancelled => {
            info!("catalog read cancelled");
            progress.set_state(ReadState::Cancelled);
        }
    }

    outcome
}

fn read_catalog(
    path: &Path,
    options: &ReadOptions,
    max_items: Option<usize>,
    progress: &ReadProgress,
) -> ReadOutcome {
    if progress.is_cancelled() {
        return ReadOutcome::Cancelled;
    }

    progress.set_state(ReadState::Opening);

    let handle = match CatalogHandle::open(path) {
        Ok(handle) => handle,
        Err(err) => return ReadOutcome::Failed(err),
    };

    progress.set_state(ReadState::Enumerating);
    progress.set_total(match max_items {
        Some(max) => max.min(handle.rendition_count()),
        None => handle.rendition_count(),
    });

    let mut descriptors = vec![];

    for desc in handle.renditions(EnumerateOptions {
        ignore_packed_assets: options.ignore_packed_assets,
        max_accepted: max_items,
    }) {
        if progress.is_cancelled() {
            return ReadOutcome::Cancelled;
        }

        descriptors.push(desc);
    }

    let groups = group_renditions(descriptors, options.distinguish_catalogs_from_theme_stores);

    progress.set_total(groups.len());
    progress.set_state(ReadState::Decoding);

    let Some(mut records) = decode_groups(&handle, &groups, options, progress) else {
        return ReadOutcome::Cancelled;
    };

    if records.is_empty() {
        return ReadOutcome::Empty {
            path: path.to_owned(),
        };
    }

    dedupe_filenames(&mut records);

    ReadOutcome::Success(records)
}

/// Decode groups on several threads, each thread handling every n-th group.
/// Returns `None` if the read got cancelled.
fn decode_groups(
    handle: &CatalogHandle,
    groups: &[AssetGroup],
    options: &ReadOptions,
    progress: &ReadProgress,
) -> Option<Vec<AssetImageRecord>> {
    let assembler = Assembler::new(handle, options, progress.cancel_flag());
    let threads_count = options.effective_worker_threads().clamp(1, groups.len().max(1));

    // Workers finish out of order, results are put back at their group's index
    let mut results = GapVec::new(groups.len());

    std::thread::scope(|s| {
        let workers = (0..threads_count)
            .map(|thread_num| {
                let assembler = &assembler;

                s.spawn(move || {
                    let mut assembled = vec![];

                    // Each worker handles every n-th group
                    for (i, group) in groups
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| i % threads_count == thread_num)
                    {
                        // Checked before each group, the assembler also checks between renditions
                        if progress.is_cancelled() {
                            break;
                        }

                        // A panicking decoder only loses its own asset
                        let record = panic::catch_unwind(AssertUnwindSafe(|| {
                            assembler.assemble(group)
                        }))
                        .unwrap_or_else(|_| {
                            warn!(name = %group.name, "decoder panicked, skipping asset");
                            None
                        });

                        assembled.push((i, record));
                        progress.complete_unit();
                    }

                    assembled
                })
            })
            .collect::<Vec<_>>();

        for worker in workers {
            match worker.join() {
                Ok(assembled) => {
                    for (i, record) in assembled {
                        if let Some(record) = record {
                            results.set(i, record);
                        }
                    }
                }
                // Panics are caught per group, so this one came from the worker itself
                Err(payload) => panic::resume_unwind(payload),
            }
        }
    });

    // Cancelling after the last group was decoded still discards everything
    if progress.is_cancelled() {
        return None;
    }

    Some(results.into_values().collect())
}
