
use fixtures::*;

use evtx_ripper::allow_list::is_allowed;
use evtx_ripper::csv_output::{CsvOptions, RowLimit};
use evtx_ripper::evtx_filter::{EvtxFilter, event_id};
use evtx_ripper::settings::{RipperSettings, RunConfig, SqlOptions};
use evtx_ripper::source::{EventLogDecoder, InputFormat, XmlDocumentDecoder};
use evtx_ripper::sql_output::{SqlDestination, SqlErrorPolicy};
use evtx_ripper::{Dispatcher, FileStatus, RipperError, run_pipeline};

use pretty_assertions::assert_eq;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn csv_run(output: &Path, workers: usize, options: CsvOptions) -> RunConfig {
    RipperSettings::new()
        .workers(workers)
        .csv(options)
        .input("/evidence")
        .output_dir(output)
        .build(workers + 1)
        .unwrap()
}

fn sql_run(output: &Path, workers: usize, separate: bool) -> RunConfig {
    RipperSettings::new()
        .workers(workers)
        .sql(SqlOptions {
            separate,
            policy: SqlErrorPolicy::BestEffort,
        })
        .input("/evidence")
        .output_dir(output)
        .build(workers + 1)
        .unwrap()
}

fn evidence(name: &str) -> PathBuf {
    PathBuf::from(format!("/evidence/{name}.evtx"))
}

fn xml(event: String) -> Scripted {
    Scripted::Xml(event)
}

#[test]
fn test_mixed_batch_with_two_workers() {
    ensure_env_logger_initialized();
    let out = tempdir().unwrap();

    let decoder = ScriptedDecoder::new()
        .with_file(evidence("a"), vec![vec![xml(logon("4624", "alice"))]])
        .with_file(evidence("b"), vec![vec![xml(logon("5156", "svc"))]])
        .with_file(evidence("c"), vec![vec![xml(logon("4625", "bob")), xml(logon("4624", "bob"))]])
        .with_file(evidence("d"), vec![vec![], vec![xml(logon("4656", "eve"))]])
        .with_file(evidence("e"), vec![vec![xml(logon("7045", "system"))]]);

    let config = csv_run(out.path(), 2, CsvOptions::default());
    let summary = Dispatcher::new(&config, &decoder)
        .unwrap()
        .run(&decoder.paths())
        .unwrap();

    assert_eq!(summary.files(), 5);
    assert_eq!(summary.written(), 3);
    assert_eq!(summary.no_matches(), 2);
    assert_eq!(summary.failed(), 0);
    assert_eq!(summary.outcome(&evidence("c")), Some(&FileStatus::Written { rows: 2 }));
    assert_eq!(summary.outcome(&evidence("d")), Some(&FileStatus::NoMatches));

    let mut outputs: Vec<String> = fs::read_dir(out.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    outputs.sort();
    assert_eq!(outputs, vec!["a.csv", "c.csv", "e.csv"]);
}

#[test]
fn test_every_file_is_attempted_exactly_once() {
    ensure_env_logger_initialized();

    for workers in 1..=4 {
        let out = tempdir().unwrap();
        let decoder = (0..7).fold(ScriptedDecoder::new(), |decoder, i| {
            decoder.with_file(evidence(&format!("log{i}")), vec![vec![xml(logon("4624", "alice"))]])
        });

        let config = csv_run(out.path(), workers, CsvOptions::default());
        let files = decoder.paths();
        let summary = Dispatcher::new(&config, &decoder).unwrap().run(&files).unwrap();

        assert_eq!(summary.files(), 7);
        assert_eq!(decoder.total_opens(), 7);
        for file in &files {
            assert_eq!(decoder.times_opened(file), 1, "{} with {workers} workers", file.display());
        }
    }
}

#[test]
fn test_decode_failure_skips_only_the_record() {
    ensure_env_logger_initialized();
    let out = tempdir().unwrap();

    let decoder = ScriptedDecoder::new().with_file(
        evidence("Security"),
        vec![vec![
            xml(logon("4624", "alice")),
            Scripted::DecodeFailure("invalid substitution".to_string()),
            xml(logon("4625", "bob")),
        ]],
    );

    let config = csv_run(out.path(), 1, CsvOptions::default());
    let summary = Dispatcher::new(&config, &decoder)
        .unwrap()
        .run(&decoder.paths())
        .unwrap();

    assert_eq!(summary.outcome(&evidence("Security")), Some(&FileStatus::Written { rows: 2 }));

    let csv = fs::read_to_string(out.path().join("Security.csv")).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("System_Name,System_Guid,System_Provider,System_EventID"));
    assert!(lines[1].contains("alice"));
    assert!(lines[2].contains("bob"));
}

#[test]
fn test_unopenable_file_fails_alone() {
    ensure_env_logger_initialized();
    let out = tempdir().unwrap();

    let decoder = ScriptedDecoder::new().with_file(evidence("ok"), vec![vec![xml(logon("4624", "a"))]]);
    let files = vec![evidence("gone"), evidence("ok")];

    let config = csv_run(out.path(), 1, CsvOptions::default());
    let summary = Dispatcher::new(&config, &decoder).unwrap().run(&files).unwrap();

    assert!(matches!(
        summary.outcome(&evidence("gone")),
        Some(FileStatus::Failed { .. })
    ));
    assert_eq!(summary.written(), 1);
}

#[test]
fn test_csv_limit_zero_and_unlimited() {
    ensure_env_logger_initialized();
    let events: Vec<Scripted> = ["4624", "4625", "4648"]
        .iter()
        .map(|id| xml(logon(id, "alice")))
        .collect();
    let decoder = ScriptedDecoder::new().with_file(evidence("Security"), vec![events]);

    let header_only = tempdir().unwrap();
    let config = csv_run(
        header_only.path(),
        1,
        CsvOptions {
            limit: RowLimit::from_flag(0).unwrap(),
            ..Default::default()
        },
    );
    Dispatcher::new(&config, &decoder).unwrap().run(&decoder.paths()).unwrap();
    let csv = fs::read_to_string(header_only.path().join("Security.csv")).unwrap();
    assert_eq!(csv.lines().count(), 1);
    assert!(csv.contains("EventData_Data"));

    let everything = tempdir().unwrap();
    let config = csv_run(
        everything.path(),
        1,
        CsvOptions {
            limit: RowLimit::from_flag(-1).unwrap(),
            ..Default::default()
        },
    );
    Dispatcher::new(&config, &decoder).unwrap().run(&decoder.paths()).unwrap();
    let csv = fs::read_to_string(everything.path().join("Security.csv")).unwrap();
    assert_eq!(csv.lines().count(), 4);
}

#[test]
fn test_same_named_logs_from_different_hosts_keep_their_own_csv() {
    ensure_env_logger_initialized();
    let out = tempdir().unwrap();

    let host = |name: &str| -> Vec<Vec<Scripted>> {
        (0..10)
            .map(|chunk| {
                (0..150)
                    .map(|i| xml(logon("4624", &format!("{name}-user{}", chunk * 150 + i))))
                    .collect()
            })
            .collect()
    };
    let decoder = ScriptedDecoder::new()
        .with_file("/evidence/host1/Security.evtx", host("host1"))
        .with_file("/evidence/host2/Security.evtx", host("host2"));

    let config = csv_run(out.path(), 2, CsvOptions::default());
    let summary = Dispatcher::new(&config, &decoder)
        .unwrap()
        .run(&decoder.paths())
        .unwrap();

    assert_eq!(summary.written(), 2);
    assert_eq!(summary.rows(), 3000);

    for (name, own, other) in [("Security.csv", "host1-", "host2-"), ("Security_1.csv", "host2-", "host1-")] {
        let csv = fs::read_to_string(out.path().join(name)).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 1501, "{name}");
        assert!(lines[0].starts_with("System_Name,"), "{name}");
        assert!(lines[1..].iter().all(|line| line.contains(own)), "{name}");
        assert!(!csv.contains(other), "{name}");
    }
}

#[test]
fn test_shared_sql_output_with_concurrent_writers() {
    ensure_env_logger_initialized();
    let out = tempdir().unwrap();

    let decoder = (0..6).fold(ScriptedDecoder::new(), |decoder, i| {
        let field = format!("Field{i}");
        decoder.with_file(
            evidence(&format!("host{i}")),
            vec![vec![
                xml(event_xml("4624", "WIN-DC01", &[("TargetUserName", "alice"), (&field, "x")])),
                xml(event_xml("5156", "WIN-DC01", &[("Application", "svchost.exe")])),
                xml(event_xml("7045", "WIN-DC01", &[("ServiceName", "evil")])),
            ]],
        )
    });

    let config = sql_run(out.path(), 3, false);
    let summary = Dispatcher::new(&config, &decoder)
        .unwrap()
        .run(&decoder.paths())
        .unwrap();

    assert_eq!(summary.written(), 6);
    assert_eq!(summary.rows(), 12);

    let destination = SqlDestination::open(&out.path().join("results.sql")).unwrap();
    assert_eq!(destination.row_count().unwrap(), 12);

    let columns = destination.columns().unwrap();
    assert_eq!(columns[0], "id");
    for expected in [
        "system_name",
        "system_eventid",
        "system_computer",
        "targetusername",
        "servicename",
        "field0",
        "field5",
    ] {
        assert!(columns.iter().any(|c| c == expected), "missing column {expected}");
    }
    assert!(!columns.iter().any(|c| c == "application"));

    let connection = Connection::open(out.path().join("results.sql")).unwrap();
    let mut statement = connection.prepare("SELECT system_eventid FROM event").unwrap();
    let ids: Vec<String> = statement
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<rusqlite::Result<_>>()
        .unwrap();
    assert!(ids.iter().all(|id| is_allowed(id)));
}

#[test]
fn test_sql_columns_only_grow_across_runs() {
    ensure_env_logger_initialized();
    let out = tempdir().unwrap();

    let first = ScriptedDecoder::new().with_file(
        evidence("Security"),
        vec![vec![xml(event_xml("4624", "A", &[("TargetUserName", "alice")]))]],
    );
    let second = ScriptedDecoder::new().with_file(
        evidence("System"),
        vec![vec![xml(event_xml("7045", "A", &[("ServiceName", "evil")]))]],
    );

    let config = sql_run(out.path(), 1, false);
    Dispatcher::new(&config, &first).unwrap().run(&first.paths()).unwrap();
    let before = SqlDestination::open(&out.path().join("results.sql"))
        .unwrap()
        .columns()
        .unwrap();

    Dispatcher::new(&config, &second).unwrap().run(&second.paths()).unwrap();
    let after = SqlDestination::open(&out.path().join("results.sql"))
        .unwrap()
        .columns()
        .unwrap();

    assert_eq!(&after[..before.len()], &before[..]);
    assert!(after.iter().any(|c| c == "servicename"));

    let connection = Connection::open(out.path().join("results.sql")).unwrap();
    let service: Option<String> = connection
        .query_row(
            "SELECT servicename FROM event WHERE system_eventid = '4624'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(service, None);
}

#[test]
fn test_separate_sql_output() {
    ensure_env_logger_initialized();
    let out = tempdir().unwrap();

    let decoder = ScriptedDecoder::new()
        .with_file(evidence("Security"), vec![vec![xml(logon("4624", "alice"))]])
        .with_file(evidence("System"), vec![vec![xml(event_xml("7045", "A", &[("ServiceName", "evil")]))]])
        .with_file(evidence("Application"), vec![vec![xml(logon("1", "nobody"))]]);

    let config = sql_run(out.path(), 2, true);
    let summary = Dispatcher::new(&config, &decoder)
        .unwrap()
        .run(&decoder.paths())
        .unwrap();

    assert_eq!(summary.written(), 2);
    assert!(out.path().join("Security.sql").exists());
    assert!(out.path().join("System.sql").exists());
    assert!(!out.path().join("Application.sql").exists());
    assert!(!out.path().join("results.sql").exists());

    let system = SqlDestination::open(&out.path().join("System.sql")).unwrap();
    assert!(!system.columns().unwrap().iter().any(|c| c == "targetusername"));
}

#[test]
fn test_unusable_shared_database_aborts_the_run() {
    ensure_env_logger_initialized();
    let out = tempdir().unwrap();
    fs::create_dir(out.path().join("results.sql")).unwrap();

    let decoder = ScriptedDecoder::new();
    let config = sql_run(out.path(), 1, false);

    assert!(matches!(
        Dispatcher::new(&config, &decoder),
        Err(RipperError::SqlDestination { .. })
    ));
    assert_eq!(decoder.total_opens(), 0);
}

#[test]
fn test_refiltering_a_filtered_document_is_idempotent() {
    ensure_env_logger_initialized();
    let temp = tempdir().unwrap();

    let decoder = ScriptedDecoder::new().with_file(
        evidence("Security"),
        vec![vec![
            xml(logon("4624", "alice")),
            xml(logon("4656", "alice")),
            xml(event_xml("4688", "A", &[("NewProcessName", "cmd.exe")])),
            xml(logon("4625", "bob")),
        ]],
    );
    let filter = EvtxFilter::forensic();

    let mut log = decoder.open(&evidence("Security")).unwrap();
    let first = filter
        .filter_log(&evidence("Security"), log.as_mut(), temp.path())
        .unwrap()
        .document
        .unwrap();

    let mut refiltered_log = XmlDocumentDecoder.open(first.path()).unwrap();
    let second = filter
        .filter_log(first.path(), refiltered_log.as_mut(), temp.path())
        .unwrap()
        .document
        .unwrap();

    let first_events: Vec<_> = first.events().unwrap().map(Result::unwrap).collect();
    let second_events: Vec<_> = second.events().unwrap().map(Result::unwrap).collect();

    assert_eq!(first_events.len(), 2);
    assert_eq!(first_events, second_events);
    assert!(first_events.iter().all(|e| is_allowed(event_id(e).unwrap())));
}

#[test]
fn test_xml_inputs_end_to_end() {
    ensure_env_logger_initialized();
    let input = tempdir().unwrap();
    let out = tempdir().unwrap();

    fs::create_dir(input.path().join("host1")).unwrap();
    write_events_document(
        &input.path().join("host1/Security.xml"),
        &[logon("4624", "alice"), logon("4625", "bob"), logon("4656", "eve")],
    );
    write_events_document(&input.path().join("Application.xml"), &[logon("1000", "app")]);
    write_events_document(&input.path().join("Setup.xml"), &[logon("2", "none")]);
    fs::write(input.path().join("notes.txt"), "4624").unwrap();

    let config = RipperSettings::new()
        .workers(2)
        .csv(CsvOptions::default())
        .input_format(InputFormat::Xml)
        .input(input.path())
        .output_dir(out.path().join("nested/out"))
        .build(3)
        .unwrap();

    let summary = run_pipeline(&config).unwrap();

    assert_eq!(summary.files(), 3);
    assert_eq!(summary.written(), 2);
    assert_eq!(summary.no_matches(), 1);
    assert_eq!(summary.rows(), 3);

    let security = fs::read_to_string(out.path().join("nested/out/Security.csv")).unwrap();
    assert!(security.contains(r#""{""TargetUserName"":""alice"",""LogonType"":""3""}""#));
}

#[test]
fn test_missing_input_is_fatal() {
    let out = tempdir().unwrap();
    let config = RipperSettings::new()
        .workers(1)
        .csv(CsvOptions::default())
        .input(out.path().join("does-not-exist"))
        .output_dir(out.path())
        .build(2)
        .unwrap();

    assert!(matches!(
        run_pipeline(&config),
        Err(RipperError::InputPathMissing { .. })
    ));
}
