//! Spreading the work list over a fixed pool of workers.
use crate::{
    encoder::{self, ConversionOutcome, Encoder, EncoderSession},
    error::InvalidWorkerCountSnafu,
    files::{self, get_filename, WorkItem},
    settings::Settings,
    sink::ConsoleSink,
    util, Result,
};
use itertools::Itertools as _;
use snafu::ensure;
use std::{
    sync::{Mutex, PoisonError},
    time::Instant,
};

/// Progress shared by every worker. `next_index` only moves forward, and each value below the
/// work list's length is handed out exactly once.
#[derive(Debug, Default)]
pub struct SharedCursor {
    next_index: usize,
    error_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Items handed to a worker.
    pub processed: usize,
    /// Of those, how many failed.
    pub errors: usize,
}

/// Whatever a pool thread does with the items it claims.
pub trait Worker {
    fn process(&mut self, index: usize, item: &WorkItem) -> ConversionOutcome;
}

struct Pool<'a> {
    items: &'a [WorkItem],
    cursor: Mutex<SharedCursor>,
}

impl Pool<'_> {
    fn claim(&self) -> Option<usize> {
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        if cursor.next_index >= self.items.len() {
            return None;
        }
        let index = cursor.next_index;
        cursor.next_index += 1;
        Some(index)
    }

    fn record_failure(&self) {
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        cursor.error_count += 1;
    }

    fn into_cursor(self) -> SharedCursor {
        self.cursor
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Runs exactly `workers` workers over `items` until the list is exhausted, then reports.
/// `spawn_worker` builds each worker on its own thread from the worker's id.
pub fn run_pool<W, F>(
    items: &[WorkItem],
    workers: usize,
    sink: &ConsoleSink,
    spawn_worker: F,
) -> Result<RunSummary>
where
    W: Worker,
    F: Fn(usize) -> W + Sync,
{
    ensure!(workers > 0, InvalidWorkerCountSnafu { count: workers });
    let pool = Pool {
        items,
        cursor: Mutex::new(SharedCursor::default()),
    };
    let threads = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("worker-{}", i))
        .build()?;
    threads.scope(|scope| {
        for worker_id in 0..workers {
            let pool = &pool;
            let spawn_worker = &spawn_worker;
            scope.spawn(move |_| {
                sink.emit(format!("Start worker {}", worker_id));
                let mut worker = spawn_worker(worker_id);
                while let Some(index) = pool.claim() {
                    let item = &pool.items[index];
                    let outcome = worker.process(index, item);
                    if !outcome.is_success() {
                        pool.record_failure();
                    }
                    sink.advance(
                        worker_id,
                        &get_filename(&item.source_path()),
                        !outcome.is_success(),
                    );
                }
                sink.emit(format!("Finish worker {}", worker_id));
            });
        }
    });
    let cursor = pool.into_cursor();
    let summary = RunSummary {
        processed: cursor.next_index,
        errors: cursor.error_count,
    };
    sink.emit(format!(
        "Finish working. Processed: {}, errors: {}",
        summary.processed, summary.errors
    ));
    Ok(summary)
}

/// Converts claimed items with an [`Encoder`], reporting each one on the console.
pub struct ConversionWorker<'a, E: Encoder + ?Sized> {
    encoder: &'a E,
    session: EncoderSession,
    sink: &'a ConsoleSink,
    total: usize,
    preserve_mtimes: bool,
}

impl<'a, E: Encoder + ?Sized> ConversionWorker<'a, E> {
    pub fn new(
        encoder: &'a E,
        session: EncoderSession,
        sink: &'a ConsoleSink,
        total: usize,
        preserve_mtimes: bool,
    ) -> Self {
        Self {
            encoder,
            session,
            sink,
            total,
            preserve_mtimes,
        }
    }
}

impl<E: Encoder + ?Sized> Worker for ConversionWorker<'_, E> {
    fn process(&mut self, index: usize, item: &WorkItem) -> ConversionOutcome {
        let source = item.source_path();
        let size = util::file_megabytes(source);
        self.sink.emit(format!(
            "Worker {} start {}/{} {}, size = {} MB",
            self.session.worker_id(),
            index + 1,
            self.total,
            source.display(),
            size
        ));
        let started = Instant::now();
        match encoder::convert(self.encoder, item, &self.session) {
            Ok(ConversionOutcome::Success) => {
                if self.preserve_mtimes {
                    if let Err(e) = util::sync_mtimes(source, item.destination_path()) {
                        log::warn!(
                            "Failed to copy modified time to {}: {}",
                            item.destination_path().display(),
                            e
                        );
                    }
                }
                self.sink.emit(format!(
                    "Finish {}, time = {}, size = {} MB -> {} MB",
                    source.display(),
                    util::format_duration(started.elapsed()),
                    size,
                    util::file_megabytes(item.destination_path())
                ));
                ConversionOutcome::Success
            }
            Ok(failure) => {
                self.sink.emit(format!(
                    "!!! Error converting file {}, result code: {}",
                    source.display(),
                    failure
                ));
                log::debug!("See {} for details", self.session.log_path().display());
                failure
            }
            Err(e) => {
                self.sink.emit(format!(
                    "!!! Error converting file {}: {}",
                    source.display(),
                    e
                ));
                ConversionOutcome::Failure(None)
            }
        }
    }
}

/// Plans the run described by `settings` and converts everything pending. Returns `None` when
/// there was nothing to do.
pub fn run<E: Encoder + ?Sized>(
    settings: &Settings,
    encoder: &E,
    sink: &ConsoleSink,
) -> Result<Option<RunSummary>> {
    settings.check_dirs()?;
    let plan = files::build_plan(
        settings.source_dir(),
        settings.dest_dir(),
        &settings.classifier(),
    )?;
    if !plan.unknown_extensions().is_empty() {
        sink.emit(format!(
            "Found unknown extensions: [{}]",
            plan.unknown_extensions()
                .iter()
                .map(|ext| format!("'{}'", ext))
                .join(", ")
        ));
    }
    if plan.is_empty() {
        sink.emit("Not found files");
        return Ok(None);
    }
    sink.emit(format!(
        "Found files: {}, work: {}",
        plan.videos_found(),
        plan.items().len()
    ));
    let items = plan.into_items();
    sink.set_length(items.len());
    let summary = run_pool(&items, settings.workers(), sink, |worker_id| {
        ConversionWorker::new(
            encoder,
            EncoderSession::new(settings.dest_dir(), worker_id),
            sink,
            items.len(),
            settings.preserve_mtimes(),
        )
    })?;
    sink.finish();
    Ok(Some(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{encoder::tests::FakeEncoder, sink::tests::SharedBuffer};
    use rand::Rng as _;
    use std::{
        fs,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread,
        time::Duration,
    };

    fn work_list(len: usize) -> Vec<WorkItem> {
        (0..len)
            .map(|i| WorkItem::new(format!("/src/{:03}.mp4", i), format!("/dst/{:03}.mp4", i)))
            .collect()
    }

    /// Records every claim, sleeping a random moment first to shuffle the interleaving.
    struct RecordingWorker {
        id: usize,
        claims: Arc<Mutex<Vec<(usize, usize)>>>,
        fail_every: Option<usize>,
    }

    impl Worker for RecordingWorker {
        fn process(&mut self, index: usize, _item: &WorkItem) -> ConversionOutcome {
            let delay = rand::thread_rng().gen_range(0..300);
            thread::sleep(Duration::from_micros(delay));
            self.claims.lock().unwrap().push((self.id, index));
            match self.fail_every {
                Some(n) if index % n == 0 => ConversionOutcome::Failure(Some(1)),
                _ => ConversionOutcome::Success,
            }
        }
    }

    fn run_recording(
        len: usize,
        workers: usize,
        fail_every: Option<usize>,
    ) -> (RunSummary, Vec<(usize, usize)>, String) {
        let items = work_list(len);
        let buffer = SharedBuffer::default();
        let sink = ConsoleSink::to_writer(buffer.clone());
        let claims = Arc::new(Mutex::new(Vec::new()));
        let summary = run_pool(&items, workers, &sink, |id| RecordingWorker {
            id,
            claims: Arc::clone(&claims),
            fail_every,
        })
        .unwrap();
        let claims = claims.lock().unwrap().clone();
        (summary, claims, buffer.contents())
    }

    #[test]
    fn test_every_index_claimed_exactly_once() {
        for len in [0, 1, 2, 7, 40] {
            for workers in [1, 2, 3, 8] {
                let (summary, claims, _) = run_recording(len, workers, None);
                let mut indices: Vec<usize> = claims.iter().map(|(_, index)| *index).collect();
                indices.sort_unstable();
                assert_eq!(indices, (0..len).collect::<Vec<_>>(), "len {len}, workers {workers}");
                assert_eq!(summary.processed, len);
                assert_eq!(summary.errors, 0);
                assert!(claims.iter().all(|(id, _)| *id < workers));
            }
        }
    }

    #[test]
    fn test_each_worker_claims_in_increasing_order() {
        let (_, claims, _) = run_recording(60, 4, None);
        for worker in 0..4 {
            let mine: Vec<usize> = claims
                .iter()
                .filter(|(id, _)| *id == worker)
                .map(|(_, index)| *index)
                .collect();
            assert!(mine.windows(2).all(|w| w[0] < w[1]), "{:?}", mine);
        }
    }

    #[test]
    fn test_failures_are_counted_not_fatal() {
        let (summary, claims, output) = run_recording(10, 3, Some(3));
        assert_eq!(claims.len(), 10);
        assert_eq!(
            summary,
            RunSummary {
                processed: 10,
                errors: 4
            }
        );
        assert!(output.ends_with("Finish working. Processed: 10, errors: 4\n"));
    }

    #[test]
    fn test_surplus_workers_start_and_finish() {
        let (summary, claims, output) = run_recording(2, 6, None);
        assert_eq!(summary.processed, 2);
        assert_eq!(claims.len(), 2);
        for worker in 0..6 {
            assert!(output.contains(&format!("Start worker {}\n", worker)));
            assert!(output.contains(&format!("Finish worker {}\n", worker)));
        }
    }

    /// Tracks how many workers are inside `process` at once.
    struct OverlapWorker {
        live: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Worker for OverlapWorker {
        fn process(&mut self, _index: usize, _item: &WorkItem) -> ConversionOutcome {
            let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            self.live.fetch_sub(1, Ordering::SeqCst);
            ConversionOutcome::Success
        }
    }

    #[test]
    fn test_workers_run_concurrently() {
        for workers in [1, 3, 5] {
            let sink = ConsoleSink::to_writer(SharedBuffer::default());
            let live = Arc::new(AtomicUsize::new(0));
            let peak = Arc::new(AtomicUsize::new(0));
            let summary = run_pool(&work_list(20), workers, &sink, |_| OverlapWorker {
                live: Arc::clone(&live),
                peak: Arc::clone(&peak),
            })
            .unwrap();
            assert_eq!(summary.processed, 20);
            assert_eq!(live.load(Ordering::SeqCst), 0);
            assert_eq!(peak.load(Ordering::SeqCst), workers, "workers {workers}");
        }
    }

    #[test]
    fn test_zero_workers_rejected() {
        let sink = ConsoleSink::to_writer(SharedBuffer::default());
        let result = run_pool(&work_list(3), 0, &sink, |id| RecordingWorker {
            id,
            claims: Arc::default(),
            fail_every: None,
        });
        assert!(matches!(
            result,
            Err(crate::Error::InvalidWorkerCount { count: 0 })
        ));
    }

    #[test]
    fn test_conversion_worker_reports_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        fs::write(&source, vec![0u8; 1024]).unwrap();
        let buffer = SharedBuffer::default();
        let sink = ConsoleSink::to_writer(buffer.clone());

        let good = FakeEncoder::succeeding();
        let item = WorkItem::new(&source, dir.path().join("clip-out.mp4"));
        let mut worker =
            ConversionWorker::new(&good, EncoderSession::new(dir.path(), 0), &sink, 2, true);
        assert_eq!(worker.process(0, &item), ConversionOutcome::Success);
        assert!(item.destination_path().exists());
        let source_mtime = fs::metadata(&source).unwrap().modified().unwrap();
        let dest_mtime = fs::metadata(item.destination_path()).unwrap().modified().unwrap();
        assert_eq!(source_mtime, dest_mtime);

        let bad = FakeEncoder::failing(69);
        let failed = WorkItem::new(&source, dir.path().join("never.mp4"));
        let mut worker =
            ConversionWorker::new(&bad, EncoderSession::new(dir.path(), 1), &sink, 2, false);
        assert_eq!(worker.process(1, &failed), ConversionOutcome::Failure(Some(69)));
        assert!(!failed.destination_path().exists());

        let output = buffer.contents();
        assert!(output.contains("Worker 0 start 1/2 "));
        assert!(output.contains(", time = 0:00:00, size = 0 MB -> 0 MB\n"));
        assert!(output.contains("Worker 1 start 2/2 "));
        assert!(output.contains("!!! Error converting file "));
        assert!(output.contains(", result code: 69\n"));
    }
}
