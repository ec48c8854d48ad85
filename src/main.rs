use std::fs;
use std::io::{self, prelude::*};
use std::path;
use std::process;
use std::sync::Arc;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;
use rand::Rng;

use rec_sort::{RecordReader, RecordSorterBuilder, RecordWriter, SortProgress, RECORD_SIZE};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    match arg_parser.subcommand() {
        Some(("generate", args)) => generate(args),
        Some(("sort", args)) => sort(args),
        Some(("dump", args)) => dump(args),
        _ => unreachable!("subcommand is required"),
    }
}

/// Fills a file with uniformly distributed random records.
fn generate(args: &clap::ArgMatches) {
    let output = args.value_of("output").expect("value is required");
    let size = args
        .value_of("size")
        .expect("value is required")
        .parse::<ByteSize>()
        .expect("value is pre-validated")
        .as_u64();

    // sizes round down to whole records, a trailing remainder is not generated
    let total_records = size / RECORD_SIZE as u64;

    let output_stream = match fs::File::create(output) {
        Ok(file) => file,
        Err(err) => {
            log::error!("output file creation error: {}", err);
            process::exit(1);
        }
    };
    let mut writer = RecordWriter::new(io::BufWriter::new(output_stream));

    log::info!("generating {} records into {}", total_records, output);

    let mut rng = rand::thread_rng();
    for _ in 0..total_records {
        if let Err(err) = writer.write(rng.gen::<i32>()) {
            log::error!("record writing error: {}", err);
            process::exit(1);
        }
    }

    if let Err(err) = writer.flush() {
        log::error!("data flushing error: {}", err);
        process::exit(1);
    }

    log::info!("generation completed");
}

/// Runs the sort pipeline over a record file.
fn sort(args: &clap::ArgMatches) {
    let input = args.value_of("input").expect("value is required");
    let output = args.value_of("output").expect("value is required");
    let memory = args
        .value_of("memory")
        .expect("value is required")
        .parse::<ByteSize>()
        .expect("value is pre-validated")
        .as_u64();
    let tmp_dir: Option<&str> = args.value_of("tmp_dir");
    let max_open_runs: Option<usize> = args
        .is_present("max_open_runs")
        .then(|| args.value_of_t_or_exit("max_open_runs"));

    let input_stream = match fs::File::open(input) {
        Ok(file) => file,
        Err(err) => {
            log::error!("input file opening error: {}", err);
            process::exit(1);
        }
    };

    let output_stream = match fs::File::create(output) {
        Ok(file) => file,
        Err(err) => {
            log::error!("output file creation error: {}", err);
            process::exit(1);
        }
    };

    let mut sorter_builder = RecordSorterBuilder::new().with_memory_budget(memory);

    if let Some(tmp_dir) = tmp_dir {
        sorter_builder = sorter_builder.with_tmp_dir(path::Path::new(tmp_dir));
    }

    if let Some(max_open_runs) = max_open_runs {
        sorter_builder = sorter_builder.with_max_open_runs(max_open_runs);
    }

    sorter_builder = sorter_builder.with_progress(Arc::new(|event: &SortProgress| match event {
        SortProgress::RunProduced { index, records } => {
            log::info!("run {} produced ({} records)", index, records)
        }
        SortProgress::MergePass {
            pass,
            input_runs,
            output_runs,
        } => log::info!("merge pass {}: {} runs reduced to {}", pass, input_runs, output_runs),
        SortProgress::MergeFinished { records } => log::info!("merge finished ({} records)", records),
    }));

    let sorter = match sorter_builder.build() {
        Ok(sorter) => sorter,
        Err(err) => {
            log::error!("sorter initialization error: {}", err);
            process::exit(1);
        }
    };

    let summary = match sorter.sort(input_stream, output_stream) {
        Ok(summary) => summary,
        Err(err) => {
            log::error!("data sorting error: {}", err);
            process::exit(1);
        }
    };

    log::info!(
        "sorted {} records from {} runs (run phase: {:?}, merge phase: {:?})",
        summary.records,
        summary.runs,
        summary.run_phase,
        summary.merge_phase,
    );
}

/// Prints the leading records of a file as text, one value per line.
fn dump(args: &clap::ArgMatches) {
    let input = args.value_of("input").expect("value is required");
    let count: u64 = args.value_of_t_or_exit("count");

    let input_stream = match fs::File::open(input) {
        Ok(file) => io::BufReader::new(file),
        Err(err) => {
            log::error!("input file opening error: {}", err);
            process::exit(1);
        }
    };

    let stdout = io::stdout();
    let mut writer = io::BufWriter::new(stdout.lock());

    let mut written: u64 = 0;
    for record in RecordReader::new(input_stream) {
        if count > 0 && written >= count {
            break;
        }

        let record = match record {
            Ok(record) => record,
            Err(err) => {
                log::error!("record reading error: {}", err);
                process::exit(1);
            }
        };

        if let Err(err) = writeln!(writer, "{}", record) {
            log::error!("dump writing error: {}", err);
            process::exit(1);
        }
        written += 1;
    }

    if let Err(err) = writer.flush() {
        log::error!("data flushing error: {}", err);
        process::exit(1);
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

fn validate_size(value: &str) -> Result<(), String> {
    match value.parse::<ByteSize>() {
        Ok(size) if size.as_u64() >= RECORD_SIZE as u64 => Ok(()),
        Ok(_) => Err(format!("size must cover at least one {}-byte record", RECORD_SIZE)),
        Err(err) => Err(format!("size format incorrect: {}", err)),
    }
}

fn validate_max_open_runs(value: &str) -> Result<(), String> {
    match value.parse::<usize>() {
        Ok(runs) if runs >= 2 => Ok(()),
        Ok(_) => Err("max open runs must be at least 2".to_string()),
        Err(err) => Err(format!("max open runs format incorrect: {}", err)),
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("rec-sort")
        .about("external merge sort for fixed-width binary record files")
        .setting(clap::AppSettings::SubcommandRequiredElseHelp)
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .subcommand(
            clap::App::new("generate")
                .about("fill a file with uniformly distributed random records")
                .arg(
                    clap::Arg::new("output")
                        .short('o')
                        .long("output")
                        .help("file to be generated")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("size")
                        .short('s')
                        .long("size")
                        .help("file size, rounded down to whole records")
                        .required(true)
                        .takes_value(true)
                        .validator(validate_size),
                ),
        )
        .subcommand(
            clap::App::new("sort")
                .about("sort a record file")
                .arg(
                    clap::Arg::new("input")
                        .short('i')
                        .long("input")
                        .help("file to be sorted")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("output")
                        .short('o')
                        .long("output")
                        .help("result file")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("memory")
                        .short('m')
                        .long("memory")
                        .help("memory budget bounding the size of one run")
                        .required(true)
                        .takes_value(true)
                        .validator(validate_size),
                )
                .arg(
                    clap::Arg::new("tmp_dir")
                        .short('d')
                        .long("tmp-dir")
                        .help("directory to be used to store run files")
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("max_open_runs")
                        .short('f')
                        .long("max-open-runs")
                        .help("maximum number of simultaneously open runs during merge")
                        .takes_value(true)
                        .validator(validate_max_open_runs),
                ),
        )
        .subcommand(
            clap::App::new("dump")
                .about("print the leading records of a file as text")
                .arg(
                    clap::Arg::new("input")
                        .short('i')
                        .long("input")
                        .help("record file to be dumped")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("count")
                        .short('n')
                        .long("count")
                        .help("number of records to print, 0 for all")
                        .takes_value(true)
                        .default_value("0"),
                ),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
