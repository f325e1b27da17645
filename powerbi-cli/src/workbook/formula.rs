//! Relative reference shifting for A1-style formulas
//!
//! Used to turn a shared formula into the explicit formula of one of its
//! dependent cells: every relative row/column part moves by the offset
//! between the master cell and the dependent, absolute (`$`) parts stay.

use super::column::{MAX_COLUMN, column_to_number, number_to_column};

/// Excel's last row, zero-based
const MAX_ROW: i64 = 1_048_575;

/// Shift the relative parts of every cell reference in `formula`
///
/// String literals and quoted sheet names are copied untouched. A reference
/// pushed off the sheet becomes `#REF!`, as Excel does.
pub fn shift_formula(formula: &str, rows: i64, cols: i64) -> String {
    let chars: Vec<char> = formula.chars().collect();
    let mut out = String::with_capacity(formula.len() + 8);
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        match ch {
            '"' | '\'' => {
                let end = quoted_end(&chars, i);
                out.extend(&chars[i..end]);
                i = end;
            }
            c if c == '$' || c.is_ascii_alphabetic() || c == '_' => {
                let end = word_end(&chars, i);
                let word: String = chars[i..end].iter().collect();
                // A word directly followed by "(" is a function name
                let is_call = chars.get(end) == Some(&'(');
                match (is_call, parse_reference(&word)) {
                    (false, Some(reference)) => out.push_str(&reference.shifted(rows, cols)),
                    _ => out.push_str(&word),
                }
                i = end;
            }
            c if c.is_ascii_digit() => {
                // Numbers (and row-only ranges) are never shifted
                let end = word_end(&chars, i);
                out.extend(&chars[i..end]);
                i = end;
            }
            _ => {
                out.push(ch);
                i += 1;
            }
        }
    }
    out
}

/// Index just past a quoted run starting at `start`; doubled quotes escape
fn quoted_end(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

fn word_end(chars: &[char], start: usize) -> usize {
    let mut i = start;
    while i < chars.len()
        && (chars[i].is_ascii_alphanumeric() || matches!(chars[i], '$' | '_' | '.'))
    {
        i += 1;
    }
    i
}

#[derive(Debug, PartialEq, Eq)]
struct CellReference {
    col: u32,
    col_absolute: bool,
    row: u32,
    row_absolute: bool,
}

impl CellReference {
    fn shifted(&self, rows: i64, cols: i64) -> String {
        let col = if self.col_absolute { self.col as i64 } else { self.col as i64 + cols };
        let row = if self.row_absolute { self.row as i64 } else { self.row as i64 + rows };
        if !(0..=MAX_COLUMN as i64).contains(&col) || !(0..=MAX_ROW).contains(&row) {
            return "#REF!".to_string();
        }
        format!(
            "{}{}{}{}",
            if self.col_absolute { "$" } else { "" },
            number_to_column(col as u32),
            if self.row_absolute { "$" } else { "" },
            row + 1
        )
    }
}

/// `$?LETTERS$?DIGITS`, nothing else
fn parse_reference(word: &str) -> Option<CellReference> {
    let (col_absolute, rest) = match word.strip_prefix('$') {
        Some(rest) => (true, rest),
        None => (false, word),
    };
    let letters_end = rest.find(|c: char| !c.is_ascii_alphabetic())?;
    let (letters, rest) = rest.split_at(letters_end);
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    let (row_absolute, digits) = match rest.strip_prefix('$') {
        Some(digits) => (true, digits),
        None => (false, rest),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let col = column_to_number(letters).ok()?;
    let row: u32 = digits.parse().ok()?;
    if row == 0 || row as i64 > MAX_ROW + 1 {
        return None;
    }
    Some(CellReference {
        col,
        col_absolute,
        row: row - 1,
        row_absolute,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shifts_relative_parts_only() {
        assert_eq!(shift_formula("A5*2", 0, 2), "C5*2");
        assert_eq!(shift_formula("SUM(A1:A4)", 0, 3), "SUM(D1:D4)");
        assert_eq!(shift_formula("$A5+A$5+$A$5", 1, 1), "$A6+B$5+$A$5");
    }

    #[test]
    fn test_leaves_names_strings_and_sheets() {
        assert_eq!(
            shift_formula(r#"IF(LOG10(B2)>1,"A1","x")"#, 1, 0),
            r#"IF(LOG10(B3)>1,"A1","x")"#
        );
        assert_eq!(shift_formula("'Day A1'!B2+Sheet2!C3", 0, 1), "'Day A1'!C2+Sheet2!D3");
        assert_eq!(shift_formula("ROUND(B1,2)+1.5E3", 0, 1), "ROUND(C1,2)+1.5E3");
    }

    #[test]
    fn test_off_sheet_reference_is_ref_error() {
        assert_eq!(shift_formula("B1-A1", 0, -1), "A1-#REF!");
    }
}
