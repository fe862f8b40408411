// Delimited text import, canonical CSV export

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use traitlist_recon::Table;

use crate::error::TableError;

/// Read a delimited text file into a table named `name`.
///
/// The file is decoded to UTF-8 and its delimiter sniffed. The first record is
/// the header row. Cells whose trimmed content is empty become `None`; other
/// cells keep their original text.
pub fn read_table(path: &Path, name: &str) -> Result<Table, TableError> {
    let content = read_file_as_utf8(path)?;
    let delimiter = sniff_delimiter(&content);
    let table = parse_table(&content, delimiter, name).map_err(|e| TableError::csv(path, e))?;
    if table.headers.is_empty() {
        return Err(TableError::Empty {
            path: path.to_path_buf(),
        });
    }
    tracing::debug!(
        table = name,
        path = %path.display(),
        rows = table.len(),
        columns = table.headers.len(),
        delimiter = %(delimiter as char).escape_default(),
        "table read"
    );
    Ok(table)
}

fn parse_table(content: &str, delimiter: u8, name: &str) -> Result<Table, ::csv::Error> {
    let mut reader = ::csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect::<Vec<_>>();
    let mut table = Table::new(name, headers);

    for result in reader.records() {
        let record = result?;
        table.push(
            record
                .iter()
                .map(|field| (!field.trim().is_empty()).then(|| field.to_string()))
                .collect(),
        );
    }
    Ok(table)
}

/// Detect the most likely field delimiter by checking consistency across the first few lines.
///
/// For each candidate (tab, semicolon, comma, pipe), count fields per line. The delimiter
/// that produces the most consistent field count (>1 field) wins.
pub fn sniff_delimiter(content: &str) -> u8 {
    let candidates: &[u8] = &[b'\t', b';', b',', b'|'];
    let sample_lines: Vec<&str> = content.lines().take(10).collect();

    if sample_lines.is_empty() {
        return b',';
    }

    let mut best = b',';
    let mut best_score = 0u64;

    for &delim in candidates {
        let counts: Vec<usize> = sample_lines
            .iter()
            .map(|line| {
                ::csv::ReaderBuilder::new()
                    .delimiter(delim)
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(line.as_bytes())
                    .records()
                    .next()
                    .and_then(|r| r.ok())
                    .map(|r| r.len())
                    .unwrap_or(1)
            })
            .collect();

        // Header line must split
        let target = counts.first().copied().unwrap_or(0);
        if target <= 1 {
            continue;
        }

        // Consistent lines times field count; more columns breaks ties
        let consistent = counts.iter().filter(|&&c| c == target).count() as u64;
        let score = consistent * target as u64;

        if score > best_score {
            best_score = score;
            best = delim;
        }
    }

    best
}

/// Read file and convert to UTF-8 if needed.
///
/// A UTF-8 byte order mark is stripped. Anything that is not valid UTF-8 is
/// decoded as Windows-1252.
pub fn read_file_as_utf8(path: &Path) -> Result<String, TableError> {
    let bytes = fs::read(path).map_err(|e| TableError::io(path, e))?;
    Ok(decode(bytes))
}

fn decode(bytes: Vec<u8>) -> String {
    let bytes = match bytes.strip_prefix(b"\xEF\xBB\xBF") {
        Some(rest) => rest.to_vec(),
        None => bytes,
    };
    match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => {
            let bytes = e.into_bytes();
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);
            // decode() honours a BOM, so strip any that survived
            decoded.trim_start_matches('\u{feff}').to_string()
        }
    }
}

/// Serialize a table in canonical form.
///
/// Comma delimiter, header row, `\n` terminator, minimal quoting, null cells
/// as the empty string. Rows are written in table order.
pub fn write_canonical(table: &Table, writer: impl Write) -> Result<(), ::csv::Error> {
    let mut csv = ::csv::WriterBuilder::new()
        .terminator(::csv::Terminator::Any(b'\n'))
        .quote_style(::csv::QuoteStyle::Necessary)
        .from_writer(writer);

    csv.write_record(&table.headers)?;
    for row in &table.rows {
        csv.write_record(row.iter().map(|cell| cell.as_deref().unwrap_or("")))?;
    }
    csv.flush()?;
    Ok(())
}

/// Canonical bytes of a table, as written by [`write_canonical`].
pub fn to_canonical_bytes(table: &Table) -> Result<Vec<u8>, ::csv::Error> {
    let mut buf = Vec::new();
    write_canonical(table, &mut buf)?;
    Ok(buf)
}

/// Write `bytes` to `path` via a temporary sibling and rename.
///
/// Readers of `path` see either the previous content or the new content,
/// never a partial file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), TableError> {
    let tmp_path = write_tmp(path, bytes)?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        TableError::io(path, e)
    })
}

/// Write `bytes` to `<path>.tmp`, creating parent directories. Returns the
/// temporary path; on failure nothing is left behind.
fn write_tmp(path: &Path, bytes: &[u8]) -> Result<PathBuf, TableError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| TableError::io(parent, e))?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let mut file = fs::File::create(&tmp_path).map_err(|e| TableError::io(&tmp_path, e))?;
    let written = file.write_all(bytes).and_then(|_| file.sync_all());
    drop(file);
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(TableError::io(&tmp_path, e));
    }
    Ok(tmp_path)
}

/// A group of output files published together.
///
/// [`stage`](Self::stage) writes each file to a temporary sibling;
/// [`commit`](Self::commit) renames them into place once every file is
/// staged. A group dropped before commit removes its temporary files and
/// leaves existing outputs untouched.
#[derive(Debug, Default)]
pub struct StagedWrite {
    /// `(temporary, target)` pairs in staging order.
    staged: Vec<(PathBuf, PathBuf)>,
}

impl StagedWrite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&mut self, path: &Path, bytes: &[u8]) -> Result<(), TableError> {
        let tmp_path = write_tmp(path, bytes)?;
        self.staged.push((tmp_path, path.to_path_buf()));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Rename every staged file into place, in staging order.
    pub fn commit(mut self) -> Result<(), TableError> {
        let staged = std::mem::take(&mut self.staged);
        for (i, (tmp_path, path)) in staged.iter().enumerate() {
            if let Err(e) = fs::rename(tmp_path, path) {
                self.staged = staged[i..].to_vec();
                return Err(TableError::io(path, e));
            }
        }
        tracing::debug!(files = staged.len(), "staged outputs committed");
        Ok(())
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        for (tmp_path, _) in &self.staged {
            let _ = fs::remove_file(tmp_path);
        }
    }
}

/// Write a table as canonical CSV, atomically.
pub fn write_table(path: &Path, table: &Table) -> Result<(), TableError> {
    let buf = to_canonical_bytes(table).map_err(|e| TableError::csv(path, e))?;
    write_atomic(path, &buf)?;
    tracing::debug!(table = %table.name, path = %path.display(), rows = table.len(), "table written");
    Ok(())
}
