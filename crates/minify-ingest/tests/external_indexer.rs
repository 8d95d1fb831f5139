#![cfg(unix)]

mod common;

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{dir_is_empty_or_absent, write_source};
use minify_catalog::{Catalog, SpatialColumns, StorageType};
use minify_ingest::{ExternalIndexer, FileProcessor, IndexError, IngestError};
use minify_store::{Store, StoredValue};
use pretty_assertions::assert_eq;

/// Echoes the input rows and appends `htm<depth>,x,y,z`, numbering cells by line.
const ECHO_INDEXER: &str = r#"#!/bin/sh
awk -F, -v depth="$1" '
  NR == 1 { print $0 ",htm" depth ",x,y,z"; next }
  { print $0 "," (1000 + NR) ",1.0,0.0,0.0" }
' "$2" > "$3"
"#;

const FAILING_INDEXER: &str = "#!/bin/sh\necho 'mesh build failed' >&2\nexit 3\n";

const SILENT_INDEXER: &str = "#!/bin/sh\nexit 0\n";

/// Drops the last input row.
const SHORT_INDEXER: &str = r#"#!/bin/sh
total=$(wc -l < "$2")
head -n $((total - 1)) "$2" | awk -F, '
  NR == 1 { print $0 ",htm20,x,y,z"; next }
  { print $0 ",7,1.0,0.0,0.0" }
' > "$3"
"#;

fn install(dir: &Path, name: &str, script: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, script).expect("write script");
    let mut permissions = std::fs::metadata(&path).expect("metadata").permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions).expect("chmod");
    path
}

fn catalog() -> Catalog {
    Catalog::builder()
        .column("pmra")
        .save("pmra", StorageType::decimal(6, 2), false)
        .build()
        .expect("catalog")
}

fn run(program: &Path, scratch_root: &Path, source: &Path) -> (Result<(), IngestError>, Store) {
    let catalog = catalog();
    let store = Store::open_in_memory(&catalog).expect("open store");
    let indexer = ExternalIndexer::new(program, SpatialColumns::at_depth(20));
    let processor = FileProcessor::new(Arc::new(catalog), store.clone(), indexer)
        .with_scratch_root(scratch_root);
    (processor.process_path(source).map(|_| ()), store)
}

// Scripts are written up front and run from a single test: executing a file
// while another test thread holds it open for writing fails with ETXTBSY.
#[test]
fn external_indexer_process_contract() {
    let dir = tempfile::Builder::new()
        .prefix("minify-indexer-")
        .tempdir_in(env!("CARGO_TARGET_TMPDIR"))
        .expect("temp dir");
    let echo = install(dir.path(), "echo.sh", ECHO_INDEXER);
    let failing = install(dir.path(), "failing.sh", FAILING_INDEXER);
    let silent = install(dir.path(), "silent.sh", SILENT_INDEXER);
    let short = install(dir.path(), "short.sh", SHORT_INDEXER);
    let scratch_root = dir.path().join("scratch");
    let source = write_source(
        dir.path(),
        "GaiaSource_9.csv",
        "ra,dec,pmra\n10.5,-3.25,1.234\n11.0,-3.0,-2.0\n",
    );

    let (result, store) = run(&echo, &scratch_root, &source);
    result.expect("echo indexer");
    assert_eq!(
        store.load_rows().expect("rows"),
        vec![
            vec![
                StoredValue::Integer(1002),
                StoredValue::Real(1.0),
                StoredValue::Real(0.0),
                StoredValue::Real(0.0),
                StoredValue::Real(1.23),
            ],
            vec![
                StoredValue::Integer(1003),
                StoredValue::Real(1.0),
                StoredValue::Real(0.0),
                StoredValue::Real(0.0),
                StoredValue::Real(-2.0),
            ],
        ]
    );
    assert!(dir_is_empty_or_absent(&scratch_root));

    let (result, store) = run(&failing, &scratch_root, &source);
    match result.expect_err("non-zero exit") {
        IngestError::Index(IndexError::Failed { status, stderr }) => {
            assert_eq!(status.code(), Some(3));
            assert_eq!(stderr, "mesh build failed");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.row_count().expect("count"), 0);
    assert!(dir_is_empty_or_absent(&scratch_root));

    let (result, _) = run(&silent, &scratch_root, &source);
    assert!(
        matches!(result, Err(IngestError::Index(IndexError::MissingOutput(_)))),
        "{result:?}"
    );

    let (result, store) = run(&short, &scratch_root, &source);
    assert!(
        matches!(
            result,
            Err(IngestError::Index(IndexError::RowCountMismatch {
                expected: 2,
                found: 1
            }))
        ),
        "{result:?}"
    );
    assert!(store.ingestion_records().expect("records").is_empty());
    assert!(dir_is_empty_or_absent(&scratch_root));
}
