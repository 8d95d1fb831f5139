mod common;

use std::fs::File;
use std::io::Write;

use common::{
    dir_is_empty_or_absent, fixture, gaia_csv, stub_fields, write_source, FailingIndexer,
    StubIndexer, FIVE_ROWS,
};
use flate2::write::GzEncoder;
use flate2::Compression;
use minify_catalog::{Catalog, CatalogError, StorageType};
use minify_ingest::{FileOutcome, IndexError, IngestError, ReadError, SkyPosition};
use minify_store::{CoerceError, StoredValue};
use pretty_assertions::assert_eq;

fn column(rows: &[Vec<StoredValue>], index: usize) -> Vec<f64> {
    rows.iter()
        .map(|row| row[index].as_f64().expect("numeric value"))
        .collect()
}

#[test]
fn five_row_file_keeps_rows_passing_every_cut() {
    let fx = fixture(Catalog::astrometry(), StubIndexer::default());
    let path = write_source(fx.dir.path(), "GaiaSource_1.csv", &gaia_csv(FIVE_ROWS));

    let outcome = fx.processor.process_path(&path).expect("process");
    let FileOutcome::Ingested(record) = outcome else {
        panic!("expected ingestion, got {outcome:?}");
    };
    assert_eq!(record.source_file_id, "GaiaSource_1.csv");
    assert_eq!(record.rows_original, 5);
    assert_eq!(record.rows_retained, 3);

    let store = fx.processor.store();
    let rows = store.load_rows().expect("rows");
    assert_eq!(rows.len(), 3);
    // htm20, x, y, z, phot_rp_mean_mag, pmra, pmdec, parallax
    assert_eq!(rows[0].len(), 8);
    assert_eq!(column(&rows, 4), vec![15.12, 13.0, 18.5]);
    assert_eq!(column(&rows, 5), vec![10.0, -3.0, 0.0]);
    assert_eq!(column(&rows, 7), vec![2.5, 0.5, 100.0]);

    let expected = stub_fields(SkyPosition {
        ra: 10.2,
        dec: -5.2,
    });
    assert_eq!(rows[0][0], StoredValue::Integer(expected.cell_id as i64));
    assert_eq!(rows[0][1], StoredValue::Real(expected.x));

    assert_eq!(fx.processor.indexer().calls(), 1);
    assert!(dir_is_empty_or_absent(&fx.scratch_root));
}

#[test]
fn reprocessing_a_file_is_a_no_op() {
    let fx = fixture(Catalog::astrometry(), StubIndexer::default());
    let path = write_source(fx.dir.path(), "GaiaSource_1.csv", &gaia_csv(FIVE_ROWS));

    let first = fx.processor.process_path(&path).expect("first");
    assert!(matches!(first, FileOutcome::Ingested(_)));

    // The skip is decided from metadata alone; the file is not reopened.
    std::fs::remove_file(&path).expect("remove source");
    let second = fx.processor.process_path(&path).expect("second");
    assert_eq!(second, FileOutcome::Skipped(first.record().clone()));

    let store = fx.processor.store();
    assert_eq!(store.row_count().expect("count"), 3);
    assert_eq!(store.ingestion_records().expect("records").len(), 1);
    assert_eq!(fx.processor.indexer().calls(), 1);
}

#[test]
fn bounds_include_lower_and_exclude_upper() {
    let catalog = Catalog::builder()
        .bounded("phot_rp_mean_mag", Some(12.0), Some(19.0))
        .save("phot_rp_mean_mag", StorageType::decimal(4, 2), false)
        .build()
        .expect("catalog");
    let fx = fixture(catalog, StubIndexer::default());
    let text = "ra,dec,phot_rp_mean_mag\n1.0,1.0,12.0\n2.0,2.0,19.0\n3.0,3.0,11.99\n4.0,4.0,18.99\n";
    let path = write_source(fx.dir.path(), "bounds.csv", text);

    let outcome = fx.processor.process_path(&path).expect("process");
    assert_eq!(outcome.record().rows_retained, 2);
    let rows = fx.processor.store().load_rows().expect("rows");
    assert_eq!(column(&rows, 4), vec![12.0, 18.99]);
}

#[test]
fn rounding_never_stores_a_value_outside_its_bounds() {
    let fx = fixture(Catalog::astrometry(), StubIndexer::default());
    let text = gaia_csv(&[
        "1,10.0,-5.0,1.0,1.0,1.0,1.0,18.996",
        "2,10.1,-5.1,1.0,1.0,1.0,1.0,18.994",
    ]);
    let path = write_source(fx.dir.path(), "rounding.csv", &text);

    let outcome = fx.processor.process_path(&path).expect("process");
    assert_eq!(outcome.record().rows_retained, 1);
    let rows = fx.processor.store().load_rows().expect("rows");
    assert_eq!(column(&rows, 4), vec![18.99]);
    assert!(column(&rows, 4).iter().all(|mag| (12.0..19.0).contains(mag)));
}

#[test]
fn signed_nan_counts_as_missing() {
    let catalog = Catalog::builder()
        .column("pmra")
        .save("pmra", StorageType::decimal(6, 2), false)
        .build()
        .expect("catalog");
    let fx = fixture(catalog, StubIndexer::default());
    let path = write_source(
        fx.dir.path(),
        "nan.csv",
        "ra,dec,pmra\n1,1,-nan\n2,2,1.0\n3,3,NA\n",
    );

    let outcome = fx.processor.process_path(&path).expect("process");
    assert_eq!(outcome.record().rows_original, 3);
    assert_eq!(outcome.record().rows_retained, 1);
    let rows = fx.processor.store().load_rows().expect("rows");
    assert_eq!(rows[0][4], StoredValue::Real(1.0));
}

#[test]
fn proper_motion_cut_is_a_strict_radius() {
    let text = "ra,dec,pmra,pmdec\n1.0,1.0,3.0,4.0\n";
    for (max, retained) in [(5.0, 0), (6.0, 1)] {
        let catalog = Catalog::builder()
            .column("pmra")
            .column("pmdec")
            .max_proper_motion(Some(max))
            .build()
            .expect("catalog");
        let fx = fixture(catalog, StubIndexer::default());
        let path = write_source(fx.dir.path(), "pm.csv", text);
        let outcome = fx.processor.process_path(&path).expect("process");
        assert_eq!(outcome.record().rows_retained, retained, "max {max}");
        assert_eq!(outcome.record().rows_original, 1);
    }
}

#[test]
fn proper_motion_cut_without_pmra_is_a_configuration_error() {
    let err = Catalog::builder()
        .column("pmdec")
        .max_proper_motion(Some(250.0))
        .build()
        .expect_err("pmra is required");
    let CatalogError::MissingProperMotionColumns { missing } = &err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(missing, &vec!["pmra".to_string()]);
    assert!(IngestError::from(err).is_fatal());
}

#[test]
fn compression_accounting_counts_dropped_rows() {
    let catalog = Catalog::builder()
        .bounded("parallax", None, Some(250.0))
        .build()
        .expect("catalog");
    let fx = fixture(catalog, StubIndexer::default());
    let mut text = String::from("ra,dec,parallax\n");
    for i in 0..10 {
        let parallax = match i {
            0 | 1 => "300.0".to_string(),
            2 => String::new(),
            3 => "null".to_string(),
            _ => format!("{}.5", i),
        };
        text.push_str(&format!("{}.0,{}.0,{parallax}\n", i, i));
    }
    let path = write_source(fx.dir.path(), "acct.csv", &text);

    let outcome = fx.processor.process_path(&path).expect("process");
    let record = outcome.record();
    assert_eq!(record.rows_original, 10);
    assert_eq!(record.rows_retained, 6);
    assert!((record.retained_fraction() - 0.6).abs() < 1e-12);
    assert_eq!(fx.processor.store().row_count().expect("count"), 6);
}

#[test]
fn missing_values_are_kept_when_dropping_is_disabled() {
    let catalog = Catalog::builder()
        .column("parallax")
        .drop_missing_rows(false)
        .save("parallax", StorageType::decimal(6, 2), false)
        .build()
        .expect("catalog");
    let fx = fixture(catalog, StubIndexer::default());
    let path = write_source(fx.dir.path(), "keep.csv", "ra,dec,parallax\n1,1,\n2,2,3.25\n");

    let outcome = fx.processor.process_path(&path).expect("process");
    assert_eq!(outcome.record().rows_retained, 2);
    let rows = fx.processor.store().load_rows().expect("rows");
    assert_eq!(rows[0][4], StoredValue::Null);
    assert_eq!(rows[1][4], StoredValue::Real(3.25));
}

#[test]
fn equal_positions_get_equal_spatial_fields_across_files() {
    let fx = fixture(Catalog::astrometry(), StubIndexer::default());
    let row = "9,123.456,-45.5,1.0,1.0,1.0,1.0,15.0";
    let first = write_source(fx.dir.path(), "a.csv", &gaia_csv(&[row]));
    let second = write_source(fx.dir.path(), "b.csv", &gaia_csv(&[FIVE_ROWS[2], row]));

    fx.processor.process_path(&first).expect("first file");
    fx.processor.process_path(&second).expect("second file");

    let rows = fx.processor.store().load_rows().expect("rows");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0][..4], rows[2][..4]);
    assert_ne!(rows[0][..4], rows[1][..4]);
}

#[test]
fn gzip_sources_are_read_transparently() {
    let fx = fixture(Catalog::astrometry(), StubIndexer::default());
    let path = fx.dir.path().join("GaiaSource_000000-003111.csv.gz");
    let mut encoder = GzEncoder::new(File::create(&path).expect("create"), Compression::default());
    encoder
        .write_all(gaia_csv(FIVE_ROWS).as_bytes())
        .expect("compress");
    encoder.finish().expect("finish gzip");

    let outcome = fx.processor.process_path(&path).expect("process");
    assert_eq!(outcome.record().source_file_id, "GaiaSource_000000-003111.csv.gz");
    assert_eq!(outcome.record().rows_retained, 3);
}

#[test]
fn file_missing_a_pulled_column_fails_without_writing() {
    let fx = fixture(Catalog::astrometry(), StubIndexer::default());
    let text = "source_id,ra,dec,parallax,pmra,pmdec,phot_rp_mean_mag\n1,1,1,1,1,1,15\n";
    let path = write_source(fx.dir.path(), "noruwe.csv", text);

    let err = fx.processor.process_path(&path).expect_err("ruwe is missing");
    match &err {
        IngestError::Read(ReadError::MissingColumns { missing }) => {
            assert_eq!(missing, &vec!["ruwe".to_string()])
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!err.is_fatal());
    assert_eq!(fx.processor.store().row_count().expect("count"), 0);
    assert!(fx.processor.store().ingestion_records().expect("records").is_empty());
}

#[test]
fn indexer_failure_cleans_scratch_and_stores_nothing() {
    let fx = fixture(Catalog::astrometry(), FailingIndexer::default());
    let path = write_source(fx.dir.path(), "GaiaSource_2.csv", &gaia_csv(FIVE_ROWS));

    let err = fx.processor.process_path(&path).expect_err("indexer fails");
    assert!(matches!(err, IngestError::Index(IndexError::MissingOutput(_))), "{err}");

    let dirs = fx
        .processor
        .indexer()
        .scratch_dirs
        .lock()
        .expect("scratch dirs mutex poisoned")
        .clone();
    assert_eq!(dirs.len(), 1);
    assert!(!dirs[0].exists(), "scratch area must be removed");
    assert!(dir_is_empty_or_absent(&fx.scratch_root));
    assert!(fx.processor.store().ingestion_records().expect("records").is_empty());
}

#[test]
fn unstorable_value_rolls_back_the_whole_file() {
    let catalog = Catalog::builder()
        .column("pmra")
        .save("pmra", StorageType::decimal(6, 2), false)
        .build()
        .expect("catalog");
    let fx = fixture(catalog, StubIndexer::default());
    let bad = write_source(fx.dir.path(), "wide.csv", "ra,dec,pmra\n1,1,1.5\n2,2,12345.0\n");

    let err = fx.processor.process_path(&bad).expect_err("pmra overflows decimal(6,2)");
    assert!(
        matches!(
            err,
            IngestError::Projection {
                row: 1,
                source: CoerceError::OutOfRange { .. }
            }
        ),
        "{err}"
    );
    assert_eq!(fx.processor.store().row_count().expect("count"), 0);

    // A corrected file under the same identifier loads.
    write_source(fx.dir.path(), "wide.csv", "ra,dec,pmra\n1,1,1.5\n2,2,1234.5\n");
    let outcome = fx.processor.process_path(&bad).expect("retry");
    assert!(matches!(outcome, FileOutcome::Ingested(ref r) if r.rows_retained == 2));
}

#[test]
fn empty_selection_records_metadata_without_indexing() {
    let fx = fixture(Catalog::astrometry(), StubIndexer::default());
    let path = write_source(fx.dir.path(), "faint.csv", &gaia_csv(&FIVE_ROWS[..2]));

    let outcome = fx.processor.process_path(&path).expect("process");
    assert!(matches!(outcome, FileOutcome::Ingested(_)));
    assert_eq!(outcome.record().rows_original, 2);
    assert_eq!(outcome.record().rows_retained, 0);
    assert_eq!(fx.processor.indexer().calls(), 0);
    assert!(fx.processor.store().is_ingested("faint.csv").expect("query"));
}
