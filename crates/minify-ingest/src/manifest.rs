use std::path::Path;

use crate::error::IngestError;

/// Ordered list of source file identifiers to ingest.
///
/// One identifier per line: the first whitespace-separated token, so listing
/// files with trailing sizes or checksums works. Blank lines and lines
/// starting with `#` are skipped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Manifest {
    ids: Vec<String>,
}

impl Manifest {
    pub fn parse(text: &str) -> Self {
        let ids = text
            .lines()
            .map(str::trim_start)
            .filter(|line| !line.starts_with('#'))
            .filter_map(|line| line.split_whitespace().next())
            .map(str::to_string)
            .collect();
        Self { ids }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| IngestError::Manifest {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&text))
    }

    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
