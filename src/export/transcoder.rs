//! CSV transcoder for export batches
//!
//! Turns one batch of rows into one encoded fragment. The first fragment
//! of a job carries the header line; the column order is fixed by the
//! first row seen and reused for every later batch.

use bytes::Bytes;
use csv::{QuoteStyle, Terminator, WriterBuilder};

use crate::error::ExportError;

use super::row::{Record, Schema};

/// Content type of the produced document
pub const CSV_CONTENT_TYPE: &str = "text/csv";

/// Rough per-field size used to pre-size fragment buffers
const ESTIMATED_FIELD_BYTES: usize = 16;

/// Batch-to-CSV transcoder for a single export job
#[derive(Debug, Default)]
pub struct CsvTranscoder {
    schema: Option<Schema>,
}

impl CsvTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schema fixed by the first batch, if any batch was encoded yet
    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    /// Encode one batch into a fragment
    ///
    /// # Arguments
    /// * `batch` - Rows to encode
    /// * `first` - Whether this is the first batch of the job
    ///
    /// # Returns
    /// * `Result<Bytes>` - Header (first batch only) plus one CRLF-terminated
    ///   line per row
    pub fn encode<R: Record>(&mut self, batch: &[R], first: bool) -> Result<Bytes, ExportError> {
        if first {
            let head = batch.first().ok_or(ExportError::EmptyBatch)?;
            self.schema = Some(Schema::from_record(head));
        } else if batch.is_empty() {
            return Ok(Bytes::new());
        }

        let schema = self.schema.as_ref().ok_or_else(|| {
            ExportError::Encoding("data batch encoded before the header batch".to_string())
        })?;

        let capacity = (batch.len() + 1) * schema.columns().len() * ESTIMATED_FIELD_BYTES;
        let mut writer = WriterBuilder::new()
            .delimiter(b',')
            .quote_style(QuoteStyle::Necessary)
            .terminator(Terminator::CRLF)
            .from_writer(Vec::with_capacity(capacity));

        if first {
            writer.write_record(schema.columns())?;
        }
        for record in batch {
            writer.write_record(schema.render(record)?)?;
        }

        let buf = writer
            .into_inner()
            .map_err(|e| ExportError::Encoding(e.error().to_string()))?;
        Ok(Bytes::from(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::row::Row;

    fn row(id: u64, name: &str) -> Row {
        Row {
            id,
            name: name.to_string(),
            value: id as i64 * 10,
            timestamp: "2024-01-02T03:04:05.000000".to_string(),
        }
    }

    #[test]
    fn test_first_batch_has_header() {
        let mut t = CsvTranscoder::new();
        let out = t.encode(&[row(1, "Item 1"), row(2, "Item 2")], true).unwrap();
        assert_eq!(
            &out[..],
            b"id,name,value,timestamp\r\n\
              1,Item 1,10,2024-01-02T03:04:05.000000\r\n\
              2,Item 2,20,2024-01-02T03:04:05.000000\r\n"
        );
    }

    #[test]
    fn test_later_batches_have_no_header() {
        let mut t = CsvTranscoder::new();
        t.encode(&[row(1, "a")], true).unwrap();
        let out = t.encode(&[row(2, "b")], false).unwrap();
        assert_eq!(&out[..], b"2,b,20,2024-01-02T03:04:05.000000\r\n");
    }

    #[test]
    fn test_empty_first_batch_fails() {
        let mut t = CsvTranscoder::new();
        let err = t.encode::<Row>(&[], true).unwrap_err();
        assert!(matches!(err, ExportError::EmptyBatch));
        assert!(t.schema().is_none());
    }

    #[test]
    fn test_empty_later_batch_is_empty_fragment() {
        let mut t = CsvTranscoder::new();
        t.encode(&[row(1, "a")], true).unwrap();
        let out = t.encode::<Row>(&[], false).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_data_batch_before_header_fails() {
        let mut t = CsvTranscoder::new();
        let err = t.encode(&[row(1, "a")], false).unwrap_err();
        assert!(matches!(err, ExportError::Encoding(_)));
    }

    #[test]
    fn test_special_characters_are_quoted() {
        let mut t = CsvTranscoder::new();
        let out = t
            .encode(
                &[
                    row(1, "Hello, world!"),
                    row(2, "Quote: \"test\""),
                    row(3, "Newline\ntest"),
                ],
                true,
            )
            .unwrap();
        let text = std::str::from_utf8(&out).unwrap();
        assert!(text.contains("\"Hello, world!\""));
        assert!(text.contains("\"Quote: \"\"test\"\"\""));
        assert!(text.contains("\"Newline\ntest\""));
    }

    #[test]
    fn test_round_trip_through_csv_reader() {
        let rows = vec![row(1, "plain"), row(2, "a,b"), row(3, "say \"hi\"\r\nbye")];
        let mut t = CsvTranscoder::new();
        let out = t.encode(&rows, true).unwrap();

        let mut reader = csv::Reader::from_reader(&out[..]);
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), ["id", "name", "value", "timestamp"]);

        let parsed: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(parsed.len(), rows.len());
        for (record, row) in parsed.iter().zip(&rows) {
            assert_eq!(record[0].parse::<u64>().unwrap(), row.id);
            assert_eq!(&record[1], row.name);
            assert_eq!(record[2].parse::<i64>().unwrap(), row.value);
            assert_eq!(&record[3], row.timestamp);
        }
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let rows = vec![row(1, "x"), row(2, "y,z")];
        let a = CsvTranscoder::new().encode(&rows, true).unwrap();
        let b = CsvTranscoder::new().encode(&rows, true).unwrap();
        assert_eq!(a, b);
    }
}
