use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use indoc::indoc;
use log::{LevelFilter, error, info};
use simplelog::{CombinedLogger, Config, SharedLogger, WriteLogger};

use evtx_ripper::csv_output::{CsvOptions, HeaderMode, RowLimit};
use evtx_ripper::settings::{DEFAULT_WORKERS, RipperSettings, RunConfig, SqlOptions};
use evtx_ripper::{InputFormat, SqlErrorPolicy, run_pipeline};

use std::fs::OpenOptions;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::exit;

const DEFAULT_LOG_FILE: &str = "evtx_ripper.log";

fn command() -> Command {
    Command::new("evtx_ripper")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Filters forensically relevant events out of EVTX files into CSV or SQLite")
        .long_about(indoc!(r#"
            Filters forensically relevant events out of EVTX files into CSV or SQLite.

            Every input file is decoded, records whose EventID is on the forensic allow
            list are kept, and the survivors are flattened into one row per event:

              --csv   one `<stem>.csv` per input file in the output directory.
              --db    a shared `results.sql` (or, with --sep, one `<stem>.sql` per file)
                      holding a single `event` table that gains columns as needed.

            Files are processed `--cores` at a time. A file that fails is logged and
            skipped; the rest of the run continues.
        "#))
        .arg(
            Arg::new("cores")
                .long("cores")
                .short('c')
                .value_name("N")
                .default_value("4")
                .value_parser(clap::value_parser!(usize))
                .help("Number of files processed concurrently, must be lower than the number of CPU cores."),
        )
        .arg(
            Arg::new("csv")
                .long("csv")
                .short('C')
                .action(ArgAction::SetTrue)
                .help("Write one CSV file per input file."),
        )
        .arg(
            Arg::new("db")
                .long("db")
                .short('d')
                .action(ArgAction::SetTrue)
                .help("Write events into a SQLite database."),
        )
        .arg(
            Arg::new("sep")
                .long("sep")
                .short('s')
                .action(ArgAction::SetTrue)
                .requires("db")
                .help("With --db, write one database per input file instead of a shared `results.sql`."),
        )
        .arg(
            Arg::new("input")
                .long("input")
                .short('i')
                .value_name("PATH")
                .value_parser(clap::value_parser!(PathBuf))
                .help("Input file, or directory to search recursively."),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .value_name("DIR")
                .value_parser(clap::value_parser!(PathBuf))
                .help("Output directory, created if missing."),
        )
        .arg(
            Arg::new("input-format")
                .long("input-format")
                .value_parser(["evtx", "xml"])
                .default_value("evtx")
                .help("Decode inputs as binary EVTX, or as XML documents of <Event> elements."),
        )
        .arg(
            Arg::new("suffix")
                .long("suffix")
                .value_name("SUFFIX")
                .help("File name suffix collected from directories (default: `.evtx`, `.xml` for --input-format xml)."),
        )
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .value_name("PATH")
                .default_value(DEFAULT_LOG_FILE)
                .value_parser(clap::value_parser!(PathBuf))
                .help("Log file, appended to."),
        )
        .arg(
            Arg::new("temp-dir")
                .long("temp-dir")
                .value_name("DIR")
                .value_parser(clap::value_parser!(PathBuf))
                .help("Directory for the temporary filtered documents (default: system temp directory)."),
        )
        .arg(
            Arg::new("limit")
                .long("limit")
                .value_name("N")
                .default_value("-1")
                .allow_negative_numbers(true)
                .value_parser(clap::value_parser!(i64))
                .help("Maximum number of rows per CSV file, -1 for no limit."),
        )
        .arg(
            Arg::new("buffer-size")
                .long("buffer-size")
                .value_name("N")
                .default_value("1000")
                .value_parser(clap::value_parser!(usize))
                .help("Number of CSV rows buffered before they are written out."),
        )
        .arg(
            Arg::new("delimiter")
                .long("delimiter")
                .value_name("CHAR")
                .default_value(",")
                .value_parser(clap::value_parser!(char))
                .help("CSV field delimiter."),
        )
        .arg(
            Arg::new("no-quotes")
                .long("no-quotes")
                .action(ArgAction::SetTrue)
                .help("Do not wrap CSV values in double quotes."),
        )
        .arg(
            Arg::new("no-header")
                .long("no-header")
                .action(ArgAction::SetTrue)
                .help("Do not write a CSV header line."),
        )
        .arg(
            Arg::new("csv-first-row-header")
                .long("csv-first-row-header")
                .action(ArgAction::SetTrue)
                .help("Take the CSV header from the first row only, instead of the union of all rows."),
        )
        .arg(
            Arg::new("fail-fast")
                .long("fail-fast")
                .action(ArgAction::SetTrue)
                .help("Give up on a file at its first failed SQL insert, instead of skipping the row."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::Count)
                .help("Log more to the log file (-v debug, -vv trace)."),
        )
}

fn init_logging(matches: &ArgMatches) -> Result<()> {
    let log_file = matches
        .get_one::<PathBuf>("log-file")
        .context("log file has a default value")?;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("Failed to open log file `{}`", log_file.display()))?;

    let file_level = match matches.get_count("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let loggers: Vec<Box<dyn SharedLogger>> = vec![
        WriteLogger::new(file_level, Config::default(), file),
        WriteLogger::new(LevelFilter::Warn, Config::default(), std::io::stderr()),
    ];

    CombinedLogger::init(loggers).context("Failed to initialize logging")?;

    Ok(())
}

fn settings_from_matches(matches: &ArgMatches) -> Result<RipperSettings> {
    let mut settings = RipperSettings::new().workers(
        matches
            .get_one::<usize>("cores")
            .copied()
            .unwrap_or(DEFAULT_WORKERS),
    );

    if matches.get_flag("csv") {
        let limit = matches.get_one::<i64>("limit").copied().unwrap_or(-1);

        settings = settings.csv(CsvOptions {
            delimiter: matches.get_one::<char>("delimiter").copied().unwrap_or(','),
            quotes: !matches.get_flag("no-quotes"),
            no_header: matches.get_flag("no-header"),
            limit: RowLimit::from_flag(limit)?,
            buffer_size: matches
                .get_one::<usize>("buffer-size")
                .copied()
                .unwrap_or(1000),
            header_mode: if matches.get_flag("csv-first-row-header") {
                HeaderMode::FirstRow
            } else {
                HeaderMode::Union
            },
        });
    }

    if matches.get_flag("db") {
        settings = settings.sql(SqlOptions {
            separate: matches.get_flag("sep"),
            policy: if matches.get_flag("fail-fast") {
                SqlErrorPolicy::FailFast
            } else {
                SqlErrorPolicy::BestEffort
            },
        });
    }

    if let Some(input) = matches.get_one::<PathBuf>("input") {
        settings = settings.input(input);
    }

    if let Some(output) = matches.get_one::<PathBuf>("output") {
        settings = settings.output_dir(output);
    }

    let format = match matches.get_one::<String>("input-format").map(String::as_str) {
        Some("xml") => InputFormat::Xml,
        _ => InputFormat::Evtx,
    };
    settings = settings.input_format(format);

    if let Some(suffix) = matches.get_one::<String>("suffix") {
        settings = settings.suffix(suffix);
    }

    if let Some(temp_dir) = matches.get_one::<PathBuf>("temp-dir") {
        settings = settings.temp_dir(temp_dir);
    }

    Ok(settings)
}

fn host_cores() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

fn run(matches: &ArgMatches) -> Result<()> {
    let config: RunConfig = settings_from_matches(matches)?.build(host_cores())?;

    info!(
        "Starting run: {} worker(s), input `{}`, output `{}`",
        config.get_workers(),
        config.get_input().display(),
        config.get_output_dir().display()
    );

    let summary = run_pipeline(&config).context("Run aborted")?;

    info!(
        "Done: {} file(s), {} written, {} without matches, {} failed",
        summary.files(),
        summary.written(),
        summary.no_matches(),
        summary.failed()
    );

    Ok(())
}

fn main() {
    let matches = command().get_matches();

    if let Err(e) = init_logging(&matches) {
        eprintln!("{:#}", e);
        exit(1);
    }

    if let Err(e) = run(&matches) {
        error!("{:#}", e);
        exit(1);
    }
}
