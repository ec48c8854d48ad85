//! Fixed-width record streams.
//!
//! A record file is a plain sequence of 4-byte signed integers in native
//! byte order, no header, no footer, no delimiters. Input files, run files
//! and the sorted output all share this format.

use std::io;
use std::io::prelude::*;
use std::mem;

/// A single record. Records are value-only: duplicates are preserved and
/// indistinguishable from each other.
pub type Record = i32;

/// On-disk size of one record in bytes.
pub const RECORD_SIZE: usize = mem::size_of::<Record>();

/// Sequential reader over a binary record stream.
///
/// Yields records until the underlying stream is exhausted. A trailing
/// partial record (fewer than [`RECORD_SIZE`] bytes before EOF) is
/// truncated: iteration ends without an error.
pub struct RecordReader<R: Read> {
    reader: R,
}

impl<R: Read> RecordReader<R> {
    pub fn new(reader: R) -> Self {
        RecordReader { reader }
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = io::Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = [0u8; RECORD_SIZE];
        let mut filled = 0;

        while filled < RECORD_SIZE {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Some(Err(err)),
            }
        }

        if filled < RECORD_SIZE {
            // either clean EOF or a trailing partial record, which is dropped
            return None;
        }

        return Some(Ok(Record::from_ne_bytes(buf)));
    }
}

/// Sequential writer producing a binary record stream.
pub struct RecordWriter<W: Write> {
    writer: W,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(writer: W) -> Self {
        RecordWriter { writer }
    }

    /// Appends one record to the stream.
    pub fn write(&mut self, record: Record) -> io::Result<()> {
        self.writer.write_all(&record.to_ne_bytes())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod test {
    use std::io;

    use rstest::*;

    use super::{Record, RecordReader, RecordWriter};

    fn encode(records: &[Record]) -> Vec<u8> {
        let mut writer = RecordWriter::new(Vec::new());
        for &record in records {
            writer.write(record).unwrap();
        }
        writer.into_inner()
    }

    fn decode(bytes: &[u8]) -> Vec<Record> {
        let reader = RecordReader::new(io::Cursor::new(bytes));
        reader.collect::<io::Result<Vec<_>>>().unwrap()
    }

    #[rstest]
    #[case(vec![])]
    #[case(vec![0])]
    #[case(vec![5, 3, 8, 1])]
    #[case(vec![i32::MIN, -1, 0, 1, i32::MAX])]
    fn test_write_read_records(#[case] records: Vec<Record>) {
        assert_eq!(decode(&encode(&records)), records);
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(3)]
    fn test_trailing_partial_record_truncated(#[case] extra_bytes: usize) {
        let mut bytes = encode(&[7, -2]);
        bytes.extend(std::iter::repeat(0xAA).take(extra_bytes));

        assert_eq!(decode(&bytes), vec![7, -2]);
    }

    #[rstest]
    fn test_empty_stream() {
        assert_eq!(decode(&[]), Vec::<Record>::new());
    }
}
