//! External record sorter.

use log;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;
use std::io::prelude::*;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::buffer::{chunk_capacity, RecordBuffer};
use crate::merger::RunMerger;
use crate::record::{RecordReader, RecordWriter};
use crate::run::{Run, RunWriter};

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Invalid configuration, rejected before any I/O begins.
    Config(String),
    /// Temporary directory creation error.
    TempDir(io::Error),
    /// Common I/O error.
    IO(io::Error),
    /// The sort was interrupted via the cancellation flag.
    Cancelled,
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::Config(_) => None,
            SortError::TempDir(err) => Some(err),
            SortError::IO(err) => Some(err),
            SortError::Cancelled => None,
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::Config(reason) => write!(f, "invalid configuration: {}", reason),
            SortError::TempDir(err) => write!(f, "temporary directory not created: {}", err),
            SortError::IO(err) => write!(f, "I/O operation failed: {}", err),
            SortError::Cancelled => write!(f, "sorting cancelled"),
        }
    }
}

/// Progress event emitted by the sorter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortProgress {
    /// A run was sorted and persisted.
    RunProduced { index: usize, records: u64 },
    /// An intermediate merge pass reduced the number of live runs.
    MergePass {
        pass: usize,
        input_runs: usize,
        output_runs: usize,
    },
    /// The final merge completed.
    MergeFinished { records: u64 },
}

/// Summary of a completed sort.
#[derive(Debug, Clone, Copy)]
pub struct SortSummary {
    /// Total records written to the output stream.
    pub records: u64,
    /// Number of runs produced from the input stream.
    pub runs: usize,
    /// Wall-clock duration of the run-production phase.
    pub run_phase: Duration,
    /// Wall-clock duration of the merge phase.
    pub merge_phase: Duration,
}

type ProgressHandler = Arc<dyn Fn(&SortProgress) + Send + Sync>;

/// Record sorter builder. Provides methods for [`RecordSorter`] initialization.
#[derive(Clone, Default)]
pub struct RecordSorterBuilder {
    /// Memory budget in bytes bounding the size of one run.
    memory_budget: Option<u64>,
    /// Directory to be used to store run files.
    tmp_dir: Option<Box<Path>>,
    /// Run file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Maximum number of simultaneously open runs during merge.
    max_open_runs: Option<usize>,
    /// Progress observer.
    progress: Option<ProgressHandler>,
    /// Cooperative cancellation flag.
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl RecordSorterBuilder {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        RecordSorterBuilder::default()
    }

    /// Sets the memory budget in bytes. The budget bounds how many records
    /// are held in memory while producing one run.
    pub fn with_memory_budget(mut self, memory_budget: u64) -> RecordSorterBuilder {
        self.memory_budget = Some(memory_budget);
        return self;
    }

    /// Sets directory to be used to store run files.
    pub fn with_tmp_dir(mut self, path: &Path) -> RecordSorterBuilder {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets run file read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> RecordSorterBuilder {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Caps the number of simultaneously open runs during merge. When more
    /// runs were produced, intermediate merge passes reduce them until the
    /// cap is respected. Unset means one open cursor per run.
    pub fn with_max_open_runs(mut self, max_open_runs: usize) -> RecordSorterBuilder {
        self.max_open_runs = Some(max_open_runs);
        return self;
    }

    /// Sets an observer receiving [`SortProgress`] events.
    pub fn with_progress(mut self, handler: ProgressHandler) -> RecordSorterBuilder {
        self.progress = Some(handler);
        return self;
    }

    /// Sets a flag polled between runs and between merge steps; raising it
    /// aborts the sort with [`SortError::Cancelled`].
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> RecordSorterBuilder {
        self.cancel_flag = Some(flag);
        return self;
    }

    /// Builds a [`RecordSorter`] instance using provided configuration.
    /// Configuration is validated here, before any I/O happens.
    pub fn build(self) -> Result<RecordSorter, SortError> {
        let memory_budget = self
            .memory_budget
            .ok_or_else(|| SortError::Config("memory budget is not set".to_string()))?;
        let chunk_cap = chunk_capacity(memory_budget).ok_or_else(|| {
            SortError::Config(format!("memory budget of {} bytes does not cover one record", memory_budget))
        })?;

        if let Some(max_open_runs) = self.max_open_runs {
            if max_open_runs < 2 {
                return Err(SortError::Config(format!(
                    "max open runs must be at least 2, got {}",
                    max_open_runs
                )));
            }
        }

        return Ok(RecordSorter {
            chunk_cap,
            tmp_dir: RecordSorter::init_tmp_directory(self.tmp_dir.as_deref())?,
            rw_buf_size: self.rw_buf_size,
            max_open_runs: self.max_open_runs,
            progress: self.progress,
            cancel_flag: self.cancel_flag,
        });
    }
}

/// External record sorter.
///
/// Sorts a stream of fixed-width binary records that does not fit in
/// memory: the input is split into sorted runs of at most the configured
/// memory budget, the runs are k-way merged into the output stream.
pub struct RecordSorter {
    /// Maximum number of records held in memory per run.
    chunk_cap: usize,
    /// Directory holding the run files.
    tmp_dir: tempfile::TempDir,
    /// Run file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Maximum number of simultaneously open runs during merge.
    max_open_runs: Option<usize>,
    /// Progress observer.
    progress: Option<ProgressHandler>,
    /// Cooperative cancellation flag.
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl RecordSorter {
    fn init_tmp_directory(tmp_path: Option<&Path>) -> Result<tempfile::TempDir, SortError> {
        let tmp_dir = if let Some(tmp_path) = tmp_path {
            tempfile::tempdir_in(tmp_path)
        } else {
            tempfile::tempdir()
        }
        .map_err(|err| SortError::TempDir(err))?;

        log::info!("using {} as a temporary directory", tmp_dir.path().display());

        return Ok(tmp_dir);
    }

    /// Sorts the input stream into the output stream.
    ///
    /// Runs the two phases in sequence: run production, then merge. Returns
    /// a [`SortSummary`] with record/run counts and per-phase durations.
    /// An empty input produces an empty output and zero runs.
    pub fn sort<R, W>(&self, input: R, output: W) -> Result<SortSummary, SortError>
    where
        R: Read,
        W: Write,
    {
        let run_phase_start = Instant::now();
        let runs = self.produce_runs(input)?;
        let run_phase = run_phase_start.elapsed();
        let run_count = runs.len();
        log::info!("produced {} runs in {:?}", run_count, run_phase);

        let merge_phase_start = Instant::now();
        let records = self.merge_runs(runs, output)?;
        let merge_phase = merge_phase_start.elapsed();
        log::info!("merged {} records in {:?}", records, merge_phase);

        return Ok(SortSummary {
            records,
            runs: run_count,
            run_phase,
            merge_phase,
        });
    }

    /// Splits the input stream into sorted run files of at most the chunk
    /// capacity, returning the runs in production order.
    fn produce_runs<R: Read>(&self, input: R) -> Result<Vec<Run>, SortError> {
        let reader = match self.rw_buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, input),
            None => io::BufReader::new(input),
        };
        let mut records = RecordReader::new(reader);

        let mut runs = Vec::new();
        loop {
            self.check_cancelled()?;

            let mut buffer = RecordBuffer::new(self.chunk_cap);
            while !buffer.is_full() {
                match records.next() {
                    Some(Ok(record)) => buffer.push(record),
                    Some(Err(err)) => return Err(SortError::IO(err)),
                    None => break,
                }
            }

            if buffer.is_empty() {
                break;
            }

            let index = runs.len();
            log::debug!("sorting run {} ({} records)", index, buffer.len());
            let sorted = buffer.into_sorted();

            let run = Run::create(self.tmp_dir.path(), index, &sorted, self.rw_buf_size)
                .map_err(|err| SortError::IO(err))?;
            self.emit(SortProgress::RunProduced {
                index,
                records: run.len(),
            });
            runs.push(run);
        }

        return Ok(runs);
    }

    /// Merges the runs into the output stream and deletes their files.
    /// When a fan-in cap is configured, intermediate passes reduce the run
    /// count first so the final merge never opens more than the cap.
    fn merge_runs<W: Write>(&self, mut runs: Vec<Run>, output: W) -> Result<u64, SortError> {
        if let Some(max_open_runs) = self.max_open_runs {
            let mut next_index = runs.len();
            let mut pass = 0;
            while runs.len() > max_open_runs {
                pass += 1;
                runs = self.reduce_runs(runs, max_open_runs, &mut next_index, pass)?;
            }
        }

        let mut cursors = Vec::with_capacity(runs.len());
        for run in &runs {
            cursors.push(run.open(self.rw_buf_size).map_err(|err| SortError::IO(err))?);
        }

        let mut writer = RecordWriter::new(match self.rw_buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, output),
            None => io::BufWriter::new(output),
        });

        let mut written: u64 = 0;
        for record in RunMerger::new(cursors) {
            self.check_cancelled()?;

            let record = record.map_err(|err| SortError::IO(err))?;
            writer.write(record).map_err(|err| SortError::IO(err))?;
            written += 1;
        }
        writer.flush().map_err(|err| SortError::IO(err))?;

        self.delete_runs(runs);
        self.emit(SortProgress::MergeFinished { records: written });

        return Ok(written);
    }

    /// One intermediate merge pass: groups of at most `max_open_runs` runs
    /// are merged into new runs continuing the global index sequence, the
    /// source files removed as each group completes.
    fn reduce_runs(
        &self,
        runs: Vec<Run>,
        max_open_runs: usize,
        next_index: &mut usize,
        pass: usize,
    ) -> Result<Vec<Run>, SortError> {
        let input_runs = runs.len();
        let mut reduced = Vec::with_capacity((input_runs + max_open_runs - 1) / max_open_runs);

        let mut remaining = runs.into_iter();
        loop {
            let group = Vec::from_iter(remaining.by_ref().take(max_open_runs));
            if group.is_empty() {
                break;
            }

            // a lone trailing run needs no rewrite, it is carried over as is
            if group.len() == 1 {
                reduced.extend(group);
                continue;
            }

            let mut cursors = Vec::with_capacity(group.len());
            for run in &group {
                cursors.push(run.open(self.rw_buf_size).map_err(|err| SortError::IO(err))?);
            }

            let mut writer = RunWriter::create(self.tmp_dir.path(), *next_index, self.rw_buf_size)
                .map_err(|err| SortError::IO(err))?;
            *next_index += 1;

            for record in RunMerger::new(cursors) {
                self.check_cancelled()?;

                let record = record.map_err(|err| SortError::IO(err))?;
                writer.push(record).map_err(|err| SortError::IO(err))?;
            }
            let merged = writer.finish().map_err(|err| SortError::IO(err))?;

            self.delete_runs(group);
            reduced.push(merged);
        }

        log::debug!("merge pass {}: {} runs reduced to {}", pass, input_runs, reduced.len());
        self.emit(SortProgress::MergePass {
            pass,
            input_runs,
            output_runs: reduced.len(),
        });

        return Ok(reduced);
    }

    /// Removes consumed run files. The temporary directory reclaims any
    /// leftovers on drop, so a failed removal is only worth a warning.
    fn delete_runs(&self, runs: Vec<Run>) {
        for run in runs {
            let path = run.path().to_path_buf();
            if let Err(err) = run.delete() {
                log::warn!("run file {} not removed: {}", path.display(), err);
            }
        }
    }

    fn check_cancelled(&self) -> Result<(), SortError> {
        match &self.cancel_flag {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(SortError::Cancelled),
            _ => Ok(()),
        }
    }

    fn emit(&self, event: SortProgress) {
        if let Some(progress) = &self.progress {
            progress(&event);
        }
    }
}

#[cfg(test)]
mod test {
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use rand::seq::SliceRandom;
    use rstest::*;

    use super::{RecordSorter, RecordSorterBuilder, SortError, SortProgress, SortSummary};
    use crate::record::{Record, RecordReader, RecordWriter, RECORD_SIZE};

    fn encode(records: &[Record]) -> Vec<u8> {
        let mut writer = RecordWriter::new(Vec::new());
        for &record in records {
            writer.write(record).unwrap();
        }
        writer.into_inner()
    }

    fn decode(bytes: &[u8]) -> Vec<Record> {
        RecordReader::new(io::Cursor::new(bytes))
            .collect::<io::Result<Vec<_>>>()
            .unwrap()
    }

    fn run_sort(sorter: &RecordSorter, input: &[Record]) -> (SortSummary, Vec<Record>) {
        let mut output = Vec::new();
        let summary = sorter.sort(io::Cursor::new(encode(input)), &mut output).unwrap();
        (summary, decode(&output))
    }

    fn budget_for(records: usize) -> u64 {
        (records * RECORD_SIZE) as u64
    }

    #[rstest]
    #[case(budget_for(8))]
    #[case(budget_for(100))]
    #[case(budget_for(1000))]
    fn test_external_sort(#[case] memory_budget: u64) {
        let expected = Vec::from_iter(0..100);
        let mut input = expected.clone();
        input.shuffle(&mut rand::thread_rng());

        let sorter = RecordSorterBuilder::new()
            .with_memory_budget(memory_budget)
            .build()
            .unwrap();

        let (summary, sorted) = run_sort(&sorter, &input);

        assert_eq!(sorted, expected);
        assert_eq!(summary.records, 100);
    }

    #[rstest]
    fn test_two_run_merge() {
        // four records with a budget for two: runs [3, 5] and [1, 8]
        let sorter = RecordSorterBuilder::new()
            .with_memory_budget(budget_for(2))
            .build()
            .unwrap();

        let (summary, sorted) = run_sort(&sorter, &[5, 3, 8, 1]);

        assert_eq!(sorted, vec![1, 3, 5, 8]);
        assert_eq!(summary.runs, 2);
        assert_eq!(summary.records, 4);
    }

    #[rstest]
    fn test_duplicates_preserved() {
        let sorter = RecordSorterBuilder::new()
            .with_memory_budget(budget_for(16))
            .build()
            .unwrap();

        let (summary, sorted) = run_sort(&sorter, &[4, 4, 2]);

        assert_eq!(sorted, vec![2, 4, 4]);
        assert_eq!(summary.runs, 1);
    }

    #[rstest]
    fn test_empty_input() {
        let sorter = RecordSorterBuilder::new()
            .with_memory_budget(budget_for(16))
            .build()
            .unwrap();

        let (summary, sorted) = run_sort(&sorter, &[]);

        assert_eq!(sorted, Vec::<Record>::new());
        assert_eq!(summary.runs, 0);
        assert_eq!(summary.records, 0);
    }

    #[rstest]
    fn test_single_run_matches_in_memory_sort() {
        let mut input = Vec::from_iter(-500..500);
        input.shuffle(&mut rand::thread_rng());

        let sorter = RecordSorterBuilder::new()
            .with_memory_budget(budget_for(10_000))
            .build()
            .unwrap();

        let (summary, sorted) = run_sort(&sorter, &input);

        let mut expected = input.clone();
        expected.sort_unstable();
        assert_eq!(sorted, expected);
        assert_eq!(summary.runs, 1);
    }

    #[rstest]
    fn test_sorted_input_unchanged() {
        let input = Vec::from_iter(0..64);

        let sorter = RecordSorterBuilder::new()
            .with_memory_budget(budget_for(16))
            .build()
            .unwrap();

        let (_, sorted) = run_sort(&sorter, &input);

        assert_eq!(sorted, input);
    }

    #[rstest]
    fn test_multiset_preserved() {
        let mut input = Vec::from_iter((0..50).chain(0..50));
        input.shuffle(&mut rand::thread_rng());

        let sorter = RecordSorterBuilder::new()
            .with_memory_budget(budget_for(7))
            .build()
            .unwrap();

        let (summary, sorted) = run_sort(&sorter, &input);

        let mut expected = input.clone();
        expected.sort_unstable();
        assert_eq!(sorted, expected);
        assert_eq!(summary.records, 100);
    }

    #[rstest]
    fn test_trailing_partial_record_truncated() {
        let mut input = encode(&[5, 1]);
        input.extend([0xFF, 0xFF]);

        let sorter = RecordSorterBuilder::new()
            .with_memory_budget(budget_for(16))
            .build()
            .unwrap();

        let mut output = Vec::new();
        let summary = sorter.sort(io::Cursor::new(input), &mut output).unwrap();

        assert_eq!(decode(&output), vec![1, 5]);
        assert_eq!(summary.records, 2);
    }

    #[rstest]
    #[case(2)]
    #[case(3)]
    fn test_bounded_fan_in(#[case] max_open_runs: usize) {
        let mut input = Vec::from_iter(0..64);
        input.shuffle(&mut rand::thread_rng());

        let events = Arc::new(Mutex::new(Vec::new()));
        let observed = Arc::clone(&events);

        let sorter = RecordSorterBuilder::new()
            .with_memory_budget(budget_for(4))
            .with_max_open_runs(max_open_runs)
            .with_progress(Arc::new(move |event: &SortProgress| observed.lock().unwrap().push(*event)))
            .build()
            .unwrap();

        let (summary, sorted) = run_sort(&sorter, &input);

        assert_eq!(sorted, Vec::from_iter(0..64));
        assert_eq!(summary.runs, 16);

        // 16 initial runs exceed the cap, so at least one reduction pass ran
        // and every pass respected it
        let events = events.lock().unwrap();
        let passes = Vec::from_iter(events.iter().filter_map(|event| match event {
            SortProgress::MergePass {
                input_runs,
                output_runs,
                ..
            } => Some((*input_runs, *output_runs)),
            _ => None,
        }));
        assert!(!passes.is_empty());
        for (input_runs, output_runs) in &passes {
            assert!(output_runs < input_runs);
        }
        assert!(passes.last().unwrap().1 <= max_open_runs);
    }

    #[rstest]
    fn test_run_files_removed_after_merge() {
        let tmp_root = tempfile::tempdir().unwrap();

        let sorter = RecordSorterBuilder::new()
            .with_memory_budget(budget_for(2))
            .with_tmp_dir(tmp_root.path())
            .build()
            .unwrap();

        let (summary, _) = run_sort(&sorter, &[9, 8, 7, 6, 5, 4, 3, 2]);
        assert_eq!(summary.runs, 4);

        let leftovers = std::fs::read_dir(sorter.tmp_dir.path())
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert!(leftovers.is_empty(), "leftovers: {:?}", leftovers);
    }

    #[rstest]
    fn test_cancellation() {
        let flag = Arc::new(AtomicBool::new(false));
        flag.store(true, Ordering::Relaxed);

        let sorter = RecordSorterBuilder::new()
            .with_memory_budget(budget_for(2))
            .with_cancel_flag(Arc::clone(&flag))
            .build()
            .unwrap();

        let mut output = Vec::new();
        let result = sorter.sort(io::Cursor::new(encode(&[3, 1, 2])), &mut output);

        assert!(matches!(result, Err(SortError::Cancelled)));
    }

    #[rstest]
    #[case(RecordSorterBuilder::new())]
    #[case(RecordSorterBuilder::new().with_memory_budget(0))]
    #[case(RecordSorterBuilder::new().with_memory_budget(3))]
    #[case(RecordSorterBuilder::new().with_memory_budget(budget_for(16)).with_max_open_runs(1))]
    fn test_invalid_configuration_rejected(#[case] builder: RecordSorterBuilder) {
        assert!(matches!(builder.build(), Err(SortError::Config(_))));
    }
}
