//! Column letter and cell reference helpers

use anyhow::{Result, bail};

/// Excel's last column (XFD), zero-based
pub const MAX_COLUMN: u32 = 16_383;

/// Convert a zero-based column number to its letter (0 = A, 25 = Z, 26 = AA)
pub fn number_to_column(num: u32) -> String {
    let mut result = Vec::new();
    let mut n = num as i64;
    while n >= 0 {
        result.push(b'A' + (n % 26) as u8);
        n = n / 26 - 1;
    }
    result.reverse();
    String::from_utf8(result).unwrap_or_default()
}

/// Convert a column letter to its zero-based number (A = 0, AA = 26)
pub fn column_to_number(column: &str) -> Result<u32> {
    if column.is_empty() {
        bail!("Empty column reference");
    }

    let mut result: u64 = 0;
    for ch in column.chars() {
        if !ch.is_ascii_alphabetic() {
            bail!("Invalid column reference: '{}'", column);
        }
        result = result * 26 + (ch.to_ascii_uppercase() as u64 - 'A' as u64 + 1);
        if result > MAX_COLUMN as u64 + 1 {
            bail!("Column '{}' is beyond the last Excel column", column);
        }
    }

    Ok((result - 1) as u32)
}

/// Parse an A1-style reference into zero-based (row, column)
pub fn parse_cell_ref(reference: &str) -> Result<(u32, u32)> {
    let reference = reference.trim().replace('$', "");
    let split = reference
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(reference.len());
    let (letters, digits) = reference.split_at(split);

    let col = column_to_number(letters)?;
    let row: u32 = match digits.parse() {
        Ok(r) if r > 0 => r,
        _ => bail!("Invalid cell reference: '{}'", reference),
    };

    Ok((row - 1, col))
}

/// Build an A1-style reference from zero-based (row, column)
pub fn cell_ref(row: u32, col: u32) -> String {
    format!("{}{}", number_to_column(col), row + 1)
}

/// Inclusive span of columns holding data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnRange {
    pub start: u32,
    pub end: u32,
}

impl ColumnRange {
    pub fn new(start: u32, end: u32) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self { start: end, end: start }
        }
    }

    pub fn contains(&self, col: u32) -> bool {
        col >= self.start && col <= self.end
    }

    pub fn start_letter(&self) -> String {
        number_to_column(self.start)
    }

    pub fn end_letter(&self) -> String {
        number_to_column(self.end)
    }
}

impl std::fmt::Display for ColumnRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start_letter(), self.end_letter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_to_column() {
        assert_eq!(number_to_column(0), "A");
        assert_eq!(number_to_column(25), "Z");
        assert_eq!(number_to_column(26), "AA");
        assert_eq!(number_to_column(51), "AZ");
        assert_eq!(number_to_column(52), "BA");
        assert_eq!(number_to_column(701), "ZZ");
        assert_eq!(number_to_column(702), "AAA");
        assert_eq!(number_to_column(MAX_COLUMN), "XFD");
    }

    #[test]
    fn test_column_to_number() {
        assert_eq!(column_to_number("A").unwrap(), 0);
        assert_eq!(column_to_number("z").unwrap(), 25);
        assert_eq!(column_to_number("AA").unwrap(), 26);
        assert_eq!(column_to_number("XFD").unwrap(), MAX_COLUMN);
        assert!(column_to_number("").is_err());
        assert!(column_to_number("A1").is_err());
        assert!(column_to_number("XFE").is_err());
    }

    #[test]
    fn test_parse_cell_ref() {
        assert_eq!(parse_cell_ref("A1").unwrap(), (0, 0));
        assert_eq!(parse_cell_ref("AB12").unwrap(), (11, 27));
        assert_eq!(parse_cell_ref("$C$3").unwrap(), (2, 2));
        assert!(parse_cell_ref("A0").is_err());
        assert!(parse_cell_ref("12").is_err());
        assert_eq!(cell_ref(11, 27), "AB12");
    }

    #[test]
    fn test_column_range() {
        let range = ColumnRange::new(1, 3);
        assert_eq!(range.to_string(), "B-D");
        assert!(range.contains(2));
        assert!(!range.contains(4));

        assert_eq!(ColumnRange::new(5, 0).to_string(), "A-F");
        assert_eq!(ColumnRange::new(2, 2).to_string(), "C-C");
    }
}
