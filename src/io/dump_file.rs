//! Line- and frame-oriented dump source.
//!
//! Wraps a buffered file and hands out one logical record at a time:
//! newline-delimited text lines, or raw byte runs for binary framing.
//! Read failures are reported through the [`ErrorSink`] rather than
//! raised; after EOF or a failure the source drops its reader and
//! reports uninitialized, which is how the emission driver learns to
//! stop.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use compact_str::{format_compact, CompactString};

use crate::error::{ErrorSink, SourceError};

/// Buffer size for reading dump files (64KB).
const BUFFER_SIZE: usize = 65536;

/// Buffered record source with landmark diagnostics.
pub struct DumpFile {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    lineno: u64,
    /// Landmark template: `file:LINE` or, after `!binary`,
    /// `file:record N`.
    record_landmark: bool,
    peeked: Option<Vec<u8>>,
    errors: Arc<dyn ErrorSink>,
}

impl DumpFile {
    pub fn new(path: impl AsRef<Path>, errors: Arc<dyn ErrorSink>) -> Self {
        DumpFile {
            path: path.as_ref().to_path_buf(),
            reader: None,
            lineno: 0,
            record_landmark: false,
            peeked: None,
            errors,
        }
    }

    /// Open the underlying file.
    pub fn initialize(&mut self) -> Result<(), SourceError> {
        let file = File::open(&self.path).map_err(|source| SourceError::Open {
            path: self.path.display().to_string(),
            source,
        })?;
        self.reader = Some(BufReader::with_capacity(BUFFER_SIZE, file));
        self.lineno = 0;
        Ok(())
    }

    /// False once EOF or a read failure has closed the source.
    pub fn initialized(&self) -> bool {
        self.reader.is_some()
    }

    /// Release the reader; safe to call repeatedly.
    pub fn cleanup(&mut self) {
        self.reader = None;
        self.peeked = None;
    }

    pub fn lineno(&self) -> u64 {
        self.lineno
    }

    pub fn set_lineno(&mut self, lineno: u64) {
        self.lineno = lineno;
    }

    /// Switch diagnostics to `file:record N` form.
    pub fn set_record_landmark(&mut self) {
        self.record_landmark = true;
    }

    /// Current position for diagnostics.
    pub fn landmark(&self) -> CompactString {
        if self.record_landmark {
            format_compact!("{}:record {}", self.path.display(), self.lineno)
        } else {
            format_compact!("{}:{}", self.path.display(), self.lineno)
        }
    }

    pub fn warning(&self, message: &str) {
        self.errors.warning(&self.landmark(), message);
    }

    pub fn error(&self, message: &str) {
        self.errors.error(&self.landmark(), message);
    }

    fn read_raw_line(&mut self) -> Option<Vec<u8>> {
        let reader = self.reader.as_mut()?;
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => {
                self.cleanup();
                None
            }
            Ok(_) => {
                if line.last() == Some(&b'\n') {
                    line.pop();
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                }
                Some(line)
            }
            Err(err) => {
                self.error(&format!("read error: {err}"));
                self.cleanup();
                None
            }
        }
    }

    /// Next text line without consuming it. Does not advance the line
    /// counter.
    pub fn peek_line(&mut self) -> Option<&[u8]> {
        if self.peeked.is_none() {
            self.peeked = self.read_raw_line();
        }
        self.peeked.as_deref()
    }

    /// Next text line, or `None` at EOF.
    pub fn read_line(&mut self) -> Option<Vec<u8>> {
        let line = match self.peeked.take() {
            Some(line) => Some(line),
            None => self.read_raw_line(),
        };
        if line.is_some() {
            self.lineno += 1;
        }
        line
    }

    /// Copy exactly `n` bytes, satisfying any alignment the caller
    /// needs. `None` at clean EOF; a partial read is a source error.
    pub fn get_unaligned(&mut self, n: usize) -> Option<Vec<u8>> {
        self.read_exactly(n, "binary record truncated")
    }

    /// The next `n` bytes of the stream.
    pub fn get_string(&mut self, n: usize) -> Option<Vec<u8>> {
        self.read_exactly(n, "binary record truncated")
    }

    fn read_exactly(&mut self, n: usize, short_msg: &str) -> Option<Vec<u8>> {
        let reader = self.reader.as_mut()?;
        let mut buf = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            match reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(read) => filled += read,
                Err(err) => {
                    self.error(&format!("read error: {err}"));
                    self.cleanup();
                    return None;
                }
            }
        }
        match filled {
            0 if n > 0 => {
                self.cleanup();
                None
            }
            f if f < n => {
                self.error(short_msg);
                self.cleanup();
                None
            }
            _ => Some(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CountingSink;
    use std::io::Write;

    fn dump_with(content: &[u8]) -> (DumpFile, Arc<CountingSink>, tempfile::NamedTempFile) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        let sink = CountingSink::new();
        let mut ff = DumpFile::new(file.path(), sink.clone());
        ff.initialize().unwrap();
        (ff, sink, file)
    }

    #[test]
    fn test_read_lines_and_count() {
        let (mut ff, _sink, _file) = dump_with(b"one\ntwo\r\nthree");
        assert_eq!(ff.read_line().as_deref(), Some(b"one".as_ref()));
        assert_eq!(ff.read_line().as_deref(), Some(b"two".as_ref()));
        assert_eq!(ff.lineno(), 2);
        assert_eq!(ff.read_line().as_deref(), Some(b"three".as_ref()));
        assert_eq!(ff.read_line(), None);
        assert!(!ff.initialized());
    }

    #[test]
    fn test_peek_does_not_consume() {
        let (mut ff, _sink, _file) = dump_with(b"first\nsecond\n");
        assert_eq!(ff.peek_line(), Some(b"first".as_ref()));
        assert_eq!(ff.lineno(), 0);
        assert_eq!(ff.read_line().as_deref(), Some(b"first".as_ref()));
        assert_eq!(ff.lineno(), 1);
        assert_eq!(ff.read_line().as_deref(), Some(b"second".as_ref()));
    }

    #[test]
    fn test_get_unaligned_eof_and_short() {
        let (mut ff, sink, _file) = dump_with(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(ff.get_unaligned(4).as_deref(), Some([1, 2, 3, 4].as_ref()));
        // only two bytes left: a short read is an error, not EOF
        assert_eq!(ff.get_unaligned(4), None);
        assert_eq!(sink.error_count(), 1);
        assert!(!ff.initialized());
    }

    #[test]
    fn test_get_unaligned_clean_eof() {
        let (mut ff, sink, _file) = dump_with(&[1, 2, 3, 4]);
        assert!(ff.get_unaligned(4).is_some());
        assert_eq!(ff.get_unaligned(4), None);
        assert_eq!(sink.error_count(), 0);
    }

    #[test]
    fn test_landmark_modes() {
        let (mut ff, _sink, file) = dump_with(b"x\n");
        ff.read_line();
        let text = ff.landmark();
        assert_eq!(text, format!("{}:1", file.path().display()).as_str());

        ff.set_record_landmark();
        ff.set_lineno(3);
        let rec = ff.landmark();
        assert_eq!(rec, format!("{}:record 3", file.path().display()).as_str());
    }

    #[test]
    fn test_missing_file_is_config_surface_error() {
        let sink = CountingSink::new();
        let mut ff = DumpFile::new("/nonexistent/sumreplay.dump", sink);
        assert!(ff.initialize().is_err());
        assert!(!ff.initialized());
    }
}
