use std::fs;
use std::io;

use rec_sort::RecordSorterBuilder;

fn main() {
    let input = io::BufReader::new(fs::File::open("input.bin").unwrap());
    let output = io::BufWriter::new(fs::File::create("sorted.bin").unwrap());

    let sorter = RecordSorterBuilder::new()
        .with_memory_budget(16 * 1024 * 1024)
        .with_max_open_runs(64)
        .build()
        .unwrap();

    let summary = sorter.sort(input, output).unwrap();

    println!(
        "sorted {} records from {} runs (run phase: {:?}, merge phase: {:?})",
        summary.records, summary.runs, summary.run_phase, summary.merge_phase
    );
}
