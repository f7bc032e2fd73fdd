use crate::{SinkError, SinkResult};
use csv::{QuoteStyle, Terminator, WriterBuilder};

/// Delimiter and quoting rule of an output file.
///
/// Output is a header record followed by one record per row, `\n`-terminated.
/// With `quote_all` every field (header included) is wrapped in double quotes and
/// embedded quotes are doubled. Without it nothing is quoted, so a field that would
/// need quoting is an error instead of a mis-delimited record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelimitedFormat {
    delimiter: u8,
    quote_all: bool,
}

impl DelimitedFormat {
    /// Build a format from a configured delimiter string.
    pub fn new(delimiter: &str, quote_all: bool) -> SinkResult<Self> {
        let mut chars = delimiter.chars();
        let ch = match (chars.next(), chars.next()) {
            (Some(ch), None) => ch,
            _ => {
                return Err(SinkError::invalid_format(format!(
                    "delimiter must be a single character, got {:?}",
                    delimiter
                )))
            }
        };
        if !ch.is_ascii() || matches!(ch, '"' | '\n' | '\r') {
            return Err(SinkError::invalid_format(format!(
                "delimiter {:?} is not usable",
                ch
            )));
        }
        Ok(Self {
            delimiter: ch as u8,
            quote_all,
        })
    }

    pub fn delimiter(&self) -> char {
        self.delimiter as char
    }

    pub fn quote_all(&self) -> bool {
        self.quote_all
    }

    /// Encode a header and rows. `None` cells are written as empty fields.
    pub fn encode(&self, columns: &[String], rows: &[Vec<Option<String>>]) -> SinkResult<Vec<u8>> {
        if columns.is_empty() {
            return Err(SinkError::invalid_format("no columns to write"));
        }

        if !self.quote_all {
            for name in columns {
                self.check_unquoted(0, name, name)?;
            }
        }
        for (idx, row) in rows.iter().enumerate() {
            let row_number = idx + 1;
            if row.len() != columns.len() {
                return Err(SinkError::Serialization {
                    row: row_number,
                    column: String::new(),
                    message: format!(
                        "expected {} values, found {}",
                        columns.len(),
                        row.len()
                    ),
                });
            }
            if !self.quote_all {
                for (column, value) in row.iter().enumerate() {
                    let value = value.as_deref().unwrap_or("");
                    if columns.len() == 1 && value.is_empty() {
                        // The csv writer quotes a lone empty field even with quoting off.
                        return Err(SinkError::Serialization {
                            row: row_number,
                            column: columns[column].clone(),
                            message: "empty value in a single-column file needs quoting"
                                .to_string(),
                        });
                    }
                    self.check_unquoted(row_number, &columns[column], value)?;
                }
            }
        }

        let mut writer = WriterBuilder::new()
            .delimiter(self.delimiter)
            .quote_style(if self.quote_all {
                QuoteStyle::Always
            } else {
                QuoteStyle::Never
            })
            .terminator(Terminator::Any(b'\n'))
            .from_writer(Vec::new());

        writer.write_record(columns)?;
        for row in rows {
            writer.write_record(row.iter().map(|v| v.as_deref().unwrap_or("")))?;
        }

        writer
            .into_inner()
            .map_err(|e| SinkError::Io(e.into_error()))
    }

    fn check_unquoted(&self, row: usize, column: &str, value: &str) -> SinkResult<()> {
        let delimiter = self.delimiter as char;
        if let Some(bad) = value
            .chars()
            .find(|&c| c == delimiter || matches!(c, '"' | '\n' | '\r'))
        {
            return Err(SinkError::Serialization {
                row,
                column: column.to_string(),
                message: format!(
                    "value contains {:?} and quoting is disabled",
                    bad
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn row(values: &[Option<&str>]) -> Vec<Option<String>> {
        values.iter().map(|v| v.map(str::to_string)).collect()
    }

    #[test]
    fn test_unquoted_comma_file() {
        let format = DelimitedFormat::new(",", false).unwrap();
        let bytes = format
            .encode(
                &cols(&["store", "amount"]),
                &[row(&[Some("9999"), Some("10.00")]), row(&[Some("0001"), None])],
            )
            .unwrap();
        assert_eq!(bytes, b"store,amount\n9999,10.00\n0001,\n");
    }

    #[test]
    fn test_quote_all_pipe_file() {
        let format = DelimitedFormat::new("|", true).unwrap();
        let bytes = format
            .encode(&cols(&["note"]), &[row(&[Some("say \"hi\"")]), row(&[None])])
            .unwrap();
        assert_eq!(bytes, b"\"note\"\n\"say \"\"hi\"\"\"\n\"\"\n");
    }

    #[test]
    fn test_delimiter_in_value_without_quoting_fails() {
        let format = DelimitedFormat::new(",", false).unwrap();
        let err = format
            .encode(&cols(&["a", "b"]), &[row(&[Some("ok"), Some("x,y")])])
            .unwrap_err();
        match err {
            SinkError::Serialization { row, column, .. } => {
                assert_eq!(row, 1);
                assert_eq!(column, "b");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_newline_in_value_without_quoting_fails() {
        let format = DelimitedFormat::new("\t", false).unwrap();
        assert!(format
            .encode(&cols(&["a"]), &[row(&[Some("line\nbreak")])])
            .is_err());
        // A comma is harmless when the delimiter is a tab.
        assert!(format.encode(&cols(&["a"]), &[row(&[Some("x,y")])]).is_ok());
    }

    #[test]
    fn test_single_column_empty_value_without_quoting_fails() {
        let format = DelimitedFormat::new(",", false).unwrap();
        for empty in [None, Some("")] {
            let err = format
                .encode(&cols(&["note"]), &[row(&[Some("x")]), row(&[empty])])
                .unwrap_err();
            assert!(matches!(err, SinkError::Serialization { row: 2, .. }));
        }
        assert_eq!(
            format.encode(&cols(&["note"]), &[row(&[Some("x")])]).unwrap(),
            b"note\nx\n"
        );
    }

    #[test]
    fn test_ragged_row_fails() {
        let format = DelimitedFormat::new(",", true).unwrap();
        assert!(matches!(
            format.encode(&cols(&["a", "b"]), &[row(&[Some("1")])]),
            Err(SinkError::Serialization { row: 1, .. })
        ));
    }

    #[test]
    fn test_invalid_delimiters() {
        assert!(DelimitedFormat::new("", false).is_err());
        assert!(DelimitedFormat::new(",,", false).is_err());
        assert!(DelimitedFormat::new("\"", false).is_err());
        assert!(DelimitedFormat::new("é", false).is_err());
        assert_eq!(DelimitedFormat::new(";", true).unwrap().delimiter(), ';');
    }
}
