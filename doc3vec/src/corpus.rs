//! Line-oriented access to a training corpus.
//!
//! Words are separated by spaces, tabs and line breaks. A line may start with
//! a paragraph label `_*<number>`; lines without one are labeled with their
//! own 0-based line number.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::MAX_STRING;

pub const PARAGRAPH_PREFIX: &str = "_*";

/// The vocabulary key of paragraph `id`.
pub fn paragraph_key(id: u64) -> String {
    format!("{PARAGRAPH_PREFIX}{id}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// 0-based line number within the corpus.
    pub number: usize,
    /// Explicit paragraph id from a leading `_*<number>` token.
    pub paragraph: Option<u64>,
    pub tokens: Vec<String>,
}

impl Line {
    /// Split raw line bytes into tokens.
    pub fn parse(number: usize, bytes: &[u8]) -> Line {
        let mut tokens: Vec<String> = bytes
            .split(|&b| b == b' ' || b == b'\t' || b == b'\r' || b == b'\n')
            .filter(|word| !word.is_empty())
            .map(|word| {
                let word = &word[..word.len().min(MAX_STRING - 1)]; // Truncate too long words
                String::from_utf8_lossy(word).into_owned()
            })
            .collect();

        let paragraph = tokens
            .first()
            .and_then(|first| first.strip_prefix(PARAGRAPH_PREFIX))
            .and_then(|id| id.parse::<u64>().ok());
        if paragraph.is_some() {
            tokens.remove(0);
        }
        Line {
            number,
            paragraph,
            tokens,
        }
    }

    /// Key of the paragraph this line belongs to.
    pub fn paragraph_key(&self) -> String {
        paragraph_key(self.paragraph.unwrap_or(self.number as u64))
    }
}

/// A training file with the byte offset of every line, so that workers can
/// start reading at any line.
#[derive(Debug, Clone)]
pub struct Corpus {
    path: PathBuf,
    line_starts: Vec<u64>,
    file_size: u64,
}

impl Corpus {
    pub fn open(path: &Path) -> Result<Self> {
        let mut f = BufReader::new(
            File::open(path)
                .with_context(|| format!("error opening training data file {path:?}"))?,
        );
        let mut line_starts = vec![];
        let mut offset = 0u64;
        let mut buf = vec![];
        loop {
            buf.clear();
            let n = f
                .read_until(b'\n', &mut buf)
                .context("error reading training data file")?;
            if n == 0 {
                break;
            }
            line_starts.push(offset);
            offset += n as u64;
        }
        Ok(Corpus {
            path: path.to_path_buf(),
            line_starts,
            file_size: offset,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn num_lines(&self) -> usize {
        self.line_starts.len()
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Open a new file handle positioned at the start of line `line`.
    pub fn reader_at(&self, line: usize) -> Result<LineReader> {
        let offset = self
            .line_starts
            .get(line)
            .copied()
            .unwrap_or(self.file_size);
        let mut file = BufReader::new(
            File::open(&self.path)
                .with_context(|| format!("error opening training data file {:?}", self.path))?,
        );
        file.seek(SeekFrom::Start(offset))
            .context("error seeking within training data file")?;
        Ok(LineReader {
            file,
            number: line,
            buf: vec![],
        })
    }

    /// Split the lines into `parts` contiguous ranges of nearly equal length.
    pub fn partition(&self, parts: usize) -> Vec<Range<usize>> {
        partition(self.num_lines(), parts)
    }
}

pub fn partition(len: usize, parts: usize) -> Vec<Range<usize>> {
    (0..parts)
        .map(|i| len * i / parts..len * (i + 1) / parts)
        .collect()
}

pub struct LineReader {
    file: BufReader<File>,
    number: usize,
    buf: Vec<u8>,
}

impl LineReader {
    /// Read the next line; `Ok(None)` at end of file.
    pub fn next_line(&mut self) -> Result<Option<Line>> {
        self.buf.clear();
        let n = self
            .file
            .read_until(b'\n', &mut self.buf)
            .with_context(|| format!("error reading line {} of training data", self.number + 1))?;
        if n == 0 {
            return Ok(None);
        }
        let line = Line::parse(self.number, &self.buf);
        self.number += 1;
        Ok(Some(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_line() {
        let line = Line::parse(3, b"  the\tcat  sat\r\n");
        assert_eq!(line.tokens, ["the", "cat", "sat"]);
        assert_eq!(line.paragraph, None);
        assert_eq!(line.paragraph_key(), "_*3");

        let line = Line::parse(0, b"_*42 hello world\n");
        assert_eq!(line.paragraph, Some(42));
        assert_eq!(line.tokens, ["hello", "world"]);
        assert_eq!(line.paragraph_key(), "_*42");

        // not a number: just a word
        let line = Line::parse(0, b"_*x hello\n");
        assert_eq!(line.paragraph, None);
        assert_eq!(line.tokens, ["_*x", "hello"]);
    }

    #[test]
    fn test_truncate_long_words() {
        let long = "a".repeat(500);
        let line = Line::parse(0, long.as_bytes());
        assert_eq!(line.tokens[0].len(), MAX_STRING - 1);
    }

    #[test]
    fn test_partition() {
        assert_eq!(partition(10, 3), vec![0..3, 3..6, 6..10]);
        assert_eq!(partition(2, 4), vec![0..0, 0..1, 1..1, 1..2]);
        let ranges = partition(1000, 7);
        assert_eq!(ranges.iter().map(|r| r.len()).sum::<usize>(), 1000);
    }

    #[test]
    fn test_seek_to_line() -> Result<()> {
        let mut f = tempfile::NamedTempFile::new()?;
        write!(f, "one two\nthree\n\nfour five six")?;
        f.flush()?;

        let corpus = Corpus::open(f.path())?;
        assert_eq!(corpus.num_lines(), 4);

        let mut reader = corpus.reader_at(1)?;
        let line = reader.next_line()?.unwrap();
        assert_eq!(line.number, 1);
        assert_eq!(line.tokens, ["three"]);
        assert!(reader.next_line()?.unwrap().tokens.is_empty());
        assert_eq!(reader.next_line()?.unwrap().tokens, ["four", "five", "six"]);
        assert!(reader.next_line()?.is_none());

        assert!(corpus.reader_at(4)?.next_line()?.is_none());
        Ok(())
    }
}
