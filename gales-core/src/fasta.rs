//! Streaming FASTA reading.
//!
//! Records are read one at a time so only a single sequence is held in
//! memory, which keeps whole-genome assemblies cheap to summarise.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use bio::io::fasta;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{GalesError, Result};

/// Per-molecule summary derived from a FASTA record.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Assembly {
    pub id: String,
    pub length: u64,
    pub gc_count: u64,
}

impl Assembly {
    pub fn from_record(record: &fasta::Record) -> Assembly {
        let gc_count = record.seq().iter()
            .filter(|base| matches!(base, b'G' | b'g' | b'C' | b'c'))
            .count() as u64;

        Assembly {
            id: record.id().to_string(),
            length: record.seq().len() as u64,
            gc_count,
        }
    }

    pub fn gc_fraction(&self) -> f64 {
        if self.length == 0 { return 0.0; }
        self.gc_count as f64 / self.length as f64
    }
}

pub struct FastaReader<R: Read> {
    records: fasta::Records<BufReader<R>>,
    path: PathBuf,
}

impl FastaReader<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| GalesError::io(path, e))?;
        Ok(FastaReader::new(file, path))
    }
}

impl<R: Read> FastaReader<R> {
    pub fn new(reader: R, path: impl Into<PathBuf>) -> FastaReader<R> {
        FastaReader {
            records: fasta::Reader::new(reader).records(),
            path: path.into(),
        }
    }

    pub fn read_next(&mut self) -> Result<Option<fasta::Record>> {
        match self.records.next() {
            Some(Ok(record)) => Ok(Some(record)),
            Some(Err(e)) => Err(GalesError::io(&self.path, e)),
            None => Ok(None),
        }
    }

    /// Summarises every remaining record.
    pub fn assemblies(mut self) -> Result<Vec<Assembly>> {
        let mut assemblies = Vec::new();
        while let Some(record) = self.read_next()? {
            assemblies.push(Assembly::from_record(&record));
        }
        debug!(path = %self.path.display(), assemblies = assemblies.len(), "read FASTA");
        Ok(assemblies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_multiline_records() {
        let input = ">contig1 some description\nACGT\nacgg\n>contig2\nNNNN\n>empty\n";
        let mut reader = FastaReader::new(Cursor::new(input), "test.fasta");

        let first = reader.read_next().unwrap().unwrap();
        assert_eq!(first.id(), "contig1");
        assert_eq!(first.seq(), b"ACGTacgg");

        let second = reader.read_next().unwrap().unwrap();
        assert_eq!(second.id(), "contig2");
        assert_eq!(second.seq(), b"NNNN");

        let third = reader.read_next().unwrap().unwrap();
        assert_eq!(third.id(), "empty");
        assert!(third.seq().is_empty());

        assert!(reader.read_next().unwrap().is_none());
    }

    #[test]
    fn test_windows_line_endings() {
        let input = ">a\r\nGC\r\nAT\r\n";
        let assemblies = FastaReader::new(Cursor::new(input), "test.fasta").assemblies().unwrap();
        assert_eq!(assemblies[0].length, 4);
        assert_eq!(assemblies[0].gc_count, 2);
    }

    #[test]
    fn test_assembly_gc_is_case_insensitive() {
        let record = fasta::Record::with_attrs("a", None, b"GgCcAaTt");
        let assembly = Assembly::from_record(&record);
        assert_eq!(assembly.id, "a");
        assert_eq!(assembly.length, 8);
        assert_eq!(assembly.gc_count, 4);
        assert!((assembly.gc_fraction() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_text_before_first_header_is_error() {
        let reader = FastaReader::new(Cursor::new("ACGT\n>a\nAC\n"), "bad.fasta");
        assert!(matches!(reader.assemblies(), Err(GalesError::Io { .. })));
    }

    #[test]
    fn test_empty_input() {
        let reader = FastaReader::new(Cursor::new(""), "empty.fasta");
        assert!(reader.assemblies().unwrap().is_empty());
    }
}
