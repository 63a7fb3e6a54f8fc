//! End-to-end loading through the orchestrator and batch driver.

mod common;

use common::{Call, RecordingExecutor, StatementLog, TestWorkspace, row_count, table_rows};
use csv_loader::batch::{FileOutcome, run_batch};
use csv_loader::loader::LoadError;
use csv_loader::orchestrator::FileLoader;
use csv_loader::reader::{DecodeError, ReaderOptions};
use csv_loader::schema::{Dialect, TextType};
use csv_loader::sqlite::SqliteExecutor;
use csv_loader::store::{SqlExecutor, StoreError};

fn options(chunk_size: usize) -> ReaderOptions {
    ReaderOptions {
        chunk_size,
        ..ReaderOptions::default()
    }
}

fn some(value: &str) -> Option<String> {
    Some(value.to_string())
}

#[test]
fn narrow_file_loads_in_a_single_attempt_with_every_row() {
    let ws = TestWorkspace::new();
    let mut body = String::from("id,name,city\n");
    for i in 0..25 {
        body.push_str(&format!("{i},name-{i},city-{i}\n"));
    }
    let path = ws.write("people.csv", &body);

    let mut executor = RecordingExecutor::new();
    let report = FileLoader::new(&mut executor, options(4))
        .load_file(&path)
        .expect("load succeeds");

    assert_eq!(report.attempts, 1);
    assert_eq!(report.rows, 25);
    assert!(report.overrides.is_empty());
    assert_eq!(executor.creates(), 1);
    assert_eq!(row_count(&executor.inner, "people"), 25);
    assert!(executor.saw(&Call::Promote {
        staging: "people_temp".into(),
        target: "people".into(),
    }));
}

#[test]
fn one_overflowing_column_takes_exactly_two_attempts() {
    let ws = TestWorkspace::new();
    let note = "n".repeat(150);
    let path = ws.write("orders.csv", &format!("id,note\n1,{note}\n"));

    let mut executor = RecordingExecutor::new();
    let report = FileLoader::new(&mut executor, options(50_000))
        .load_file(&path)
        .expect("load succeeds");

    assert_eq!(report.table, "orders");
    assert_eq!(report.attempts, 2);
    assert_eq!(report.overrides.get("note"), Some(TextType::Text));
    assert_eq!(report.overrides.get("id"), None);
    assert_eq!(executor.creates(), 2);
    assert!(executor.saw(&Call::Drop("orders_temp".into())));
    assert_eq!(table_rows(&executor.inner, "orders"), vec![vec![some("1"), Some(note)]]);
    assert!(executor.inner.connection().is_autocommit());
}

#[test]
fn overflow_in_a_later_chunk_restarts_from_the_first_row() {
    let ws = TestWorkspace::new();
    let mut body = String::from("id,note\n");
    for i in 0..5 {
        body.push_str(&format!("{i},short\n"));
    }
    body.push_str(&format!("5,{}\n", "y".repeat(101)));
    let path = ws.write("late.csv", &body);

    let mut executor = RecordingExecutor::new();
    let report = FileLoader::new(&mut executor, options(2))
        .load_file(&path)
        .expect("load succeeds");

    assert_eq!(report.attempts, 2);
    assert_eq!(report.rows, 6);
    let inserts = executor
        .calls
        .iter()
        .filter(|call| matches!(call, Call::Insert { .. }))
        .count();
    // First attempt: chunks 0, 1, 2 (rejected). Second attempt: chunks 0, 1, 2.
    assert_eq!(inserts, 6);
    assert_eq!(row_count(&executor.inner, "late"), 6);
}

#[test]
fn two_columns_overflowing_widen_one_per_attempt() {
    let ws = TestWorkspace::new();
    let long = "z".repeat(120);
    let path = ws.write("both.csv", &format!("a,b\n{long},{long}\n"));

    let mut executor = RecordingExecutor::new();
    let report = FileLoader::new(&mut executor, options(10))
        .load_file(&path)
        .expect("load succeeds");

    assert_eq!(report.attempts, 3);
    assert_eq!(report.overrides.get("a"), Some(TextType::Text));
    assert_eq!(report.overrides.get("b"), Some(TextType::Text));
}

#[test]
fn value_wider_than_every_type_is_terminal_and_leaves_no_table() {
    let ws = TestWorkspace::new();
    let path = ws.write(
        "huge.csv",
        &format!("id,note\n1,{}\n", "x".repeat(16_777_216)),
    );

    let mut executor = RecordingExecutor::new();
    let err = FileLoader::new(&mut executor, options(10))
        .load_file(&path)
        .expect_err("load fails");

    assert!(matches!(
        err.downcast_ref::<LoadError>(),
        Some(LoadError::ColumnAtMaximum { column, ty: TextType::MediumText }) if column == "note"
    ));
    assert_eq!(executor.creates(), 3);
    assert!(executor.saw(&Call::Rollback));
    assert!(!executor.saw(&Call::Commit));
    assert!(!executor.table_exists("huge").unwrap());
    assert!(!executor.table_exists("huge_temp").unwrap());
}

#[test]
fn other_insert_errors_are_fatal_without_retry() {
    let ws = TestWorkspace::new();
    let path = ws.write("orders.csv", "id,note\n1,a\n");

    let mut executor = RecordingExecutor::new();
    executor.insert_error = Some("disk I/O error".into());
    let err = FileLoader::new(&mut executor, options(10))
        .load_file(&path)
        .expect_err("load fails");

    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::Database { message }) if message == "disk I/O error"
    ));
    assert_eq!(executor.creates(), 1);
    assert!(executor.saw(&Call::Rollback));
    assert!(executor.saw(&Call::Drop("orders_temp".into())));
    assert!(!executor.table_exists("orders").unwrap());
}

#[test]
fn overflow_for_a_column_outside_the_header_is_fatal() {
    let ws = TestWorkspace::new();
    let path = ws.write("orders.csv", "id,note\n1,a\n");

    let mut executor = RecordingExecutor::new();
    executor.overflow_column = Some("ghost".into());
    let err = FileLoader::new(&mut executor, options(10))
        .load_file(&path)
        .expect_err("load fails");

    assert!(matches!(
        err.downcast_ref::<LoadError>(),
        Some(LoadError::UnknownColumn { column }) if column == "ghost"
    ));
    assert_eq!(executor.creates(), 1);
}

#[test]
fn commit_failure_rolls_back_and_never_promotes() {
    let ws = TestWorkspace::new();
    let path = ws.write("orders.csv", "id,note\n1,a\n");

    let mut executor = RecordingExecutor::new();
    executor.fail_commit = true;
    assert!(
        FileLoader::new(&mut executor, options(10))
            .load_file(&path)
            .is_err()
    );

    assert!(executor.saw(&Call::Rollback));
    assert!(!executor.calls.iter().any(|c| matches!(c, Call::Promote { .. })));
    assert!(!executor.table_exists("orders").unwrap());
    assert!(!executor.table_exists("orders_temp").unwrap());
}

#[test]
fn missing_values_are_stored_as_null() {
    let ws = TestWorkspace::new();
    let path = ws.write("gaps.csv", "id,a,b\n1,,NaN\n2,NA,x\n3\n");

    let mut executor = SqliteExecutor::open_in_memory().unwrap();
    FileLoader::new(&mut executor, options(10))
        .load_file(&path)
        .expect("load succeeds");

    assert_eq!(
        table_rows(&executor, "gaps"),
        vec![
            vec![some("1"), None, None],
            vec![some("2"), None, some("x")],
            vec![some("3"), None, None],
        ]
    );
    let literal_blanks: i64 = executor
        .connection()
        .query_row(
            "SELECT COUNT(*) FROM gaps WHERE a = '' OR b = '' OR a = 'NaN' OR b = 'NaN'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(literal_blanks, 0);
}

#[test]
fn gbk_file_is_decoded_before_loading() {
    let ws = TestWorkspace::new();
    let (encoded, _, _) = encoding_rs::GBK.encode("编号,城市\n1,北京\n2,上海\n");
    let path = ws.write_bytes("cities.csv", &encoded);

    let mut executor = SqliteExecutor::open_in_memory().unwrap();
    let report = FileLoader::new(&mut executor, options(10))
        .load_file(&path)
        .expect("load succeeds");

    assert_eq!(report.encoding, "GBK");
    assert_eq!(
        table_rows(&executor, "cities"),
        vec![vec![some("1"), some("北京")], vec![some("2"), some("上海")]]
    );
    let header: String = executor
        .connection()
        .query_row(
            "SELECT name FROM pragma_table_info('cities') WHERE cid = 1",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(header, "城市");
}

#[test]
fn batch_isolates_undecodable_files() {
    let ws = TestWorkspace::new();
    let dir = ws.dir("incoming");
    std::fs::write(dir.join("a.csv"), "id,note\n1,hello\n").unwrap();
    std::fs::write(dir.join("b.csv"), b"id,note\n1,\xff\xfe\xff\n").unwrap();
    std::fs::write(dir.join("c.txt"), "not,csv\n").unwrap();

    let mut loader = FileLoader::new(SqliteExecutor::open_in_memory().unwrap(), options(10));
    let summary = run_batch(&mut loader, &dir, ".csv").expect("batch completes");

    assert_eq!(summary.outcomes.len(), 2);
    assert_eq!(summary.loaded(), 1);
    assert_eq!(summary.failed(), 1);
    match &summary.outcomes[1] {
        FileOutcome::Failed { file, error } => {
            assert!(file.ends_with("b.csv"));
            assert!(error.contains("UTF-8") && error.contains("GBK"), "{error}");
        }
        other => panic!("expected b.csv to fail, got {other:?}"),
    }

    let mut executor = loader.into_inner();
    assert_eq!(row_count(&executor, "a"), 1);
    assert!(!executor.table_exists("b").unwrap());
    assert!(!executor.table_exists("b_temp").unwrap());
}

#[test]
fn decode_error_is_typed() {
    let ws = TestWorkspace::new();
    let path = ws.write_bytes("b.csv", b"id\n\xff\n");
    let mut loader = FileLoader::new(SqliteExecutor::open_in_memory().unwrap(), options(10));
    let err = loader.load_file(&path).expect_err("load fails");
    assert!(err.downcast_ref::<DecodeError>().is_some());
}

#[test]
fn running_the_batch_twice_yields_the_same_tables() {
    let ws = TestWorkspace::new();
    let dir = ws.dir("incoming");
    std::fs::write(
        dir.join("orders.csv"),
        format!("id,note\n1,{}\n2,\n", "n".repeat(150)),
    )
    .unwrap();
    std::fs::write(dir.join("users.csv"), "id,name\n1,ann\n2,bob\n").unwrap();

    let db_path = ws.path().join("warehouse.db");
    let config = csv_loader::config::DatabaseConfig {
        path: db_path,
        ..Default::default()
    };

    let snapshot = || {
        let mut loader = FileLoader::new(SqliteExecutor::open(&config).unwrap(), options(1));
        let summary = run_batch(&mut loader, &dir, ".csv").unwrap();
        assert_eq!(summary.failed(), 0);
        let executor = loader.into_inner();
        (
            table_rows(&executor, "orders"),
            table_rows(&executor, "users"),
        )
    };

    let first = snapshot();
    let second = snapshot();
    assert_eq!(first, second);
    assert_eq!(first.0.len(), 2);
    assert_eq!(first.1.len(), 2);
}

#[test]
fn mysql_staging_table_takes_the_charset_of_the_decoded_encoding() {
    let ws = TestWorkspace::new();
    let (encoded, _, _) = encoding_rs::GBK.encode("编号,城市\n1,北京\n");
    let gbk = ws.write_bytes("cities.csv", &encoded);
    let utf8 = ws.write("towns.csv", "编号,城市\n1,北京\n");

    let mut executor = StatementLog::new(Dialect::MySql);
    let mut loader = FileLoader::new(&mut executor, options(10));
    loader.load_file(&gbk).expect("gbk file loads");
    loader.load_file(&utf8).expect("utf-8 file loads");

    assert_eq!(
        executor.creates(),
        vec![
            "CREATE TABLE `cities_temp` (`编号` VARCHAR(100), `城市` VARCHAR(100)) CHARACTER SET gbk",
            "CREATE TABLE `towns_temp` (`编号` VARCHAR(100), `城市` VARCHAR(100)) CHARACTER SET utf8mb4",
        ]
    );
    assert_eq!(executor.inserted_rows, 2);
    assert!(executor
        .statements
        .contains(&"INSERT INTO `cities_temp` (`编号`, `城市`) VALUES (?, ?)".to_string()));
}

#[test]
fn headers_differing_only_in_case_load_as_distinct_columns() {
    let ws = TestWorkspace::new();
    let path = ws.write("mixed.csv", "Note,note\n1,2\n");

    let mut executor = SqliteExecutor::open_in_memory().unwrap();
    let report = FileLoader::new(&mut executor, options(10))
        .load_file(&path)
        .expect("load succeeds");

    assert_eq!(report.rows, 1);
    assert_eq!(table_rows(&executor, "mixed"), vec![vec![some("1"), some("2")]]);
    let names = executor
        .connection()
        .prepare("SELECT name FROM pragma_table_info('mixed') ORDER BY cid")
        .unwrap()
        .query_map([], |row| row.get::<_, String>(0))
        .unwrap()
        .collect::<rusqlite::Result<Vec<_>>>()
        .unwrap();
    assert_eq!(names, vec!["Note", "note.1"]);
}
