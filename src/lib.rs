//! `rec-sort` is an external merge sort for fixed-width binary record files.
//!
//! External sorting is required when the data being sorted does not fit into the main memory (RAM) of a
//! computer and instead must reside in slower external memory, usually a hard disk drive. Sorting is
//! achieved in two passes. During the first pass the input is split into chunks that each fit in RAM,
//! sorted in memory and persisted as run files. During the second pass the runs are k-way merged into
//! the sorted output. For more information see [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! `rec-sort` operates on streams of fixed-width records: 4-byte signed integers in native byte order
//! with no header or delimiters. It supports the following features:
//!
//! * **Memory budget:**
//!   the maximum amount of memory spent on run production is configured in bytes and maps directly to
//!   the number of records held per run.
//! * **Bounded fan-in:**
//!   the number of run files open simultaneously during the merge can be capped; surplus runs are
//!   reduced by intermediate merge passes before the final merge.
//! * **Progress reporting:**
//!   an injectable observer receives per-run and per-pass progress events instead of ad hoc console
//!   output.
//! * **Cancellation:**
//!   an atomic flag polled at run and merge-step boundaries aborts a long sort cooperatively.
//!
//! # Example
//!
//! ```no_run
//! use std::fs;
//! use std::io;
//!
//! use rec_sort::RecordSorterBuilder;
//!
//! fn main() {
//!     let input = io::BufReader::new(fs::File::open("input.bin").unwrap());
//!     let output = io::BufWriter::new(fs::File::create("sorted.bin").unwrap());
//!
//!     let sorter = RecordSorterBuilder::new()
//!         .with_memory_budget(50 * 1024 * 1024)
//!         .build()
//!         .unwrap();
//!
//!     let summary = sorter.sort(input, output).unwrap();
//!     println!(
//!         "sorted {} records from {} runs in {:?}",
//!         summary.records,
//!         summary.runs,
//!         summary.run_phase + summary.merge_phase,
//!     );
//! }
//! ```

pub mod buffer;
pub mod merger;
pub mod record;
pub mod run;
pub mod sort;

pub use buffer::{chunk_capacity, RecordBuffer};
pub use merger::RunMerger;
pub use record::{Record, RecordReader, RecordWriter, RECORD_SIZE};
pub use run::{Run, RunReader, RunWriter};
pub use sort::{RecordSorter, RecordSorterBuilder, SortError, SortProgress, SortSummary};
