#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use minify_catalog::Catalog;
use minify_fs::ScratchArea;
use minify_ingest::{FileProcessor, IndexError, SkyPosition, SpatialFields, SpatialIndexer};
use minify_store::Store;

pub const GAIA_HEADER: &str = "source_id,ra,dec,parallax,pmra,pmdec,ruwe,phot_rp_mean_mag";

/// The five-row file used across the pipeline tests: A fails the magnitude
/// cut, B fails the proper-motion cut, C, D and E survive.
pub const FIVE_ROWS: &[&str] = &[
    "1,10.0,-5.0,1.0,1.0,1.0,1.0,20.0",
    "2,10.1,-5.1,1.0,200.0,200.0,1.0,15.0",
    "3,10.2,-5.2,2.5,10.0,-4.0,1.1,15.123",
    "4,10.3,-5.3,0.5,-3.0,2.0,0.9,13.0",
    "5,10.4,-5.4,100.0,0.0,0.0,1.3,18.5",
];

pub fn gaia_csv(rows: &[&str]) -> String {
    let mut text = format!("# Gaia DR3 test extract\n{GAIA_HEADER}\n");
    for row in rows {
        text.push_str(row);
        text.push('\n');
    }
    text
}

pub fn write_source(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, text).expect("write source file");
    path
}

/// Deterministic in-process mesh: a quantized (ra, dec) grid cell and the
/// exact unit vector.
pub fn stub_fields(position: SkyPosition) -> SpatialFields {
    let (ra, dec) = (position.ra.to_radians(), position.dec.to_radians());
    let ra_bin = (position.ra.rem_euclid(360.0) / 360.0 * f64::from(1u32 << 20)) as u64;
    let dec_bin = ((position.dec + 90.0) / 180.0 * f64::from(1u32 << 20)) as u64;
    SpatialFields {
        cell_id: (ra_bin << 21) | dec_bin,
        x: dec.cos() * ra.cos(),
        y: dec.cos() * ra.sin(),
        z: dec.sin(),
    }
}

#[derive(Debug, Default)]
pub struct StubIndexer {
    calls: AtomicUsize,
}

impl StubIndexer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SpatialIndexer for StubIndexer {
    fn index(
        &self,
        positions: &[SkyPosition],
        _scratch: &ScratchArea,
    ) -> Result<Vec<SpatialFields>, IndexError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(positions.iter().copied().map(stub_fields).collect())
    }
}

/// Leaves an artifact in the scratch area, then fails.
#[derive(Debug, Default)]
pub struct FailingIndexer {
    pub scratch_dirs: Mutex<Vec<PathBuf>>,
}

impl SpatialIndexer for FailingIndexer {
    fn index(
        &self,
        positions: &[SkyPosition],
        scratch: &ScratchArea,
    ) -> Result<Vec<SpatialFields>, IndexError> {
        self.scratch_dirs
            .lock()
            .expect("scratch dirs mutex poisoned")
            .push(scratch.path().to_path_buf());
        std::fs::write(scratch.filtered_path(), format!("{} rows\n", positions.len()))
            .expect("write artifact");
        Err(IndexError::MissingOutput(scratch.indexed_path()))
    }
}

pub struct Fixture<I> {
    pub dir: tempfile::TempDir,
    pub scratch_root: PathBuf,
    pub processor: FileProcessor<I>,
}

pub fn fixture<I: SpatialIndexer>(catalog: Catalog, indexer: I) -> Fixture<I> {
    let dir = tempfile::tempdir().expect("temp dir");
    let scratch_root = dir.path().join("scratch");
    let store = Store::open_in_memory(&catalog).expect("open store");
    let processor =
        FileProcessor::new(Arc::new(catalog), store, indexer).with_scratch_root(&scratch_root);
    Fixture {
        dir,
        scratch_root,
        processor,
    }
}

pub fn dir_is_empty_or_absent(path: &Path) -> bool {
    match std::fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}
