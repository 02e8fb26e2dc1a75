use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord, WriterBuilder};

use crate::types::{AggregateResult, CityId, Table};

pub const ID_COLUMN: &str = "id_city";
pub const QUEUE_DELIMITER: u8 = b';';

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("No '{column}' column in {path}")]
    MissingColumn { column: &'static str, path: PathBuf },
    #[error("Queue {path} no longer starts with the scraped batch (expected {expected}, found {found})")]
    QueueMoved {
        path: PathBuf,
        expected: CityId,
        found: String,
    },
}

/// Backlog of cities still to scrape, kept in a `;`-separated file.
///
/// Rows keep every column of the file; a rewrite only drops consumed entries.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    headers: StringRecord,
    id_column: usize,
    rows: VecDeque<StringRecord>,
    delimiter: u8,
}

impl WorkQueue {
    /// The id column is `id_city`, or the only column of a single-column file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::load_with_delimiter(path.as_ref(), QUEUE_DELIMITER)
    }

    fn load_with_delimiter(path: &Path, delimiter: u8) -> Result<Self, StoreError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .from_path(path)?;

        let headers = reader.headers()?.clone();
        let id_column = match headers.iter().position(|h| h == ID_COLUMN) {
            Some(i) => i,
            None if headers.len() == 1 => 0,
            None => {
                return Err(StoreError::MissingColumn {
                    column: ID_COLUMN,
                    path: path.to_path_buf(),
                });
            }
        };

        let rows = reader.records().collect::<Result<VecDeque<_>, _>>()?;
        log::debug!("Loaded {} queued cities from {}", rows.len(), path.display());

        Ok(Self {
            headers,
            id_column,
            rows,
            delimiter,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The first `n` ids, capped to the queue length, without consuming them.
    pub fn head(&self, n: usize) -> Vec<CityId> {
        self.rows
            .iter()
            .take(n)
            .map(|row| self.id_of(row))
            .collect()
    }

    /// Removes and returns the first `n` ids, capped to the queue length.
    pub fn consume(&mut self, n: usize) -> Vec<CityId> {
        let n = n.min(self.rows.len());
        let id_column = self.id_column;
        self.rows
            .drain(..n)
            .map(|row| CityId::new(row.get(id_column).unwrap_or_default()))
            .collect()
    }

    /// Rewrites the queue file through a synced temporary sibling and a rename.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        let tmp = temp_sibling(path);

        let mut writer = WriterBuilder::new()
            .delimiter(self.delimiter)
            .from_path(&tmp)?;
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, path)?;
        log::debug!("{} cities left in {}", self.rows.len(), path.display());
        Ok(())
    }

    fn id_of(&self, row: &StringRecord) -> CityId {
        CityId::new(row.get(self.id_column).unwrap_or_default())
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Drops the first `n` queued cities from the file at `path`.
///
/// Call only once the batch built from those cities has been appended.
pub fn consume_and_persist(path: impl AsRef<Path>, n: usize) -> Result<Vec<CityId>, StoreError> {
    let path = path.as_ref();
    let mut queue = WorkQueue::load(path)?;
    let consumed = queue.consume(n);
    queue.save(path)?;
    log::info!(
        "Removed {} cities from {} ({} left)",
        consumed.len(),
        path.display(),
        queue.len()
    );
    Ok(consumed)
}

/// A file that can be appended to and cut back to an earlier length.
trait AppendTarget: Write {
    fn current_len(&self) -> io::Result<u64>;
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl AppendTarget for File {
    fn current_len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

/// Writes `bytes` in one go and syncs them. On failure the target is cut back
/// to its length before the call, so no partial row survives.
fn append_or_rollback<T: AppendTarget>(target: &mut T, bytes: &[u8]) -> io::Result<()> {
    let original_len = target.current_len()?;
    if let Err(e) = target.write_all(bytes).and_then(|_| target.sync()) {
        if let Err(rollback) = target.truncate_to(original_len) {
            log::error!("Failed to roll back to {original_len} bytes: {rollback}");
        }
        return Err(e);
    }
    Ok(())
}

fn encode_rows(table: &Table, with_header: bool) -> Result<Vec<u8>, StoreError> {
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(Vec::new());
    if with_header {
        writer.write_record(&table.columns)?;
    }
    for row in &table.rows {
        writer.write_record(row)?;
    }
    writer
        .into_inner()
        .map_err(|e| StoreError::Io(e.into_error()))
}

/// Appends `table` to the results file, writing the header only into an empty file.
///
/// Either every row lands on disk or the file keeps its previous content.
pub fn append_results(path: impl AsRef<Path>, table: &Table) -> Result<usize, StoreError> {
    let path = path.as_ref();
    if table.is_empty() {
        return Ok(0);
    }

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let bytes = encode_rows(table, file.current_len()? == 0)?;
    append_or_rollback(&mut file, &bytes)?;

    log::info!("Appended {} row(s) to {}", table.rows.len(), path.display());
    Ok(table.rows.len())
}

/// What a committed batch left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed {
    pub rows: usize,
    pub cities: Vec<CityId>,
}

/// Persists a finished batch: results are appended first, then the scraped
/// cities are dropped from the head of the queue.
///
/// The queue must still start with the batch's cities, otherwise nothing is
/// written.
pub fn commit_batch(
    queue_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    aggregate: &AggregateResult,
) -> Result<Committed, StoreError> {
    let queue_path = queue_path.as_ref();
    let head = WorkQueue::load(queue_path)?.head(aggregate.len());

    for (i, expected) in aggregate.cities().enumerate() {
        let found = head.get(i);
        if found != Some(expected) {
            return Err(StoreError::QueueMoved {
                path: queue_path.to_path_buf(),
                expected: expected.clone(),
                found: found.map(|c| c.to_string()).unwrap_or_default(),
            });
        }
    }

    let rows = append_results(output_path, &aggregate.flatten())?;
    let cities = consume_and_persist(queue_path, aggregate.len())?;

    Ok(Committed { rows, cities })
}
