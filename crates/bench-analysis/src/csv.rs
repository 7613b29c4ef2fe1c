//! Minimal RFC 4180 style reading and writing.

pub fn escape_field(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

pub fn format_row<S: AsRef<str>>(fields: &[S]) -> String {
    let mut line = fields
        .iter()
        .map(|f| escape_field(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

/// Splits `text` into records. Blank lines are skipped; an unterminated
/// quoted field is an error.
pub fn parse(text: &str) -> Result<Vec<Vec<String>>, String> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut field_was_quoted = false;
    let mut chars = text.chars().peekable();
    let mut line = 1usize;

    let finish_record = |record: &mut Vec<String>, field: &mut String, quoted: bool, records: &mut Vec<Vec<String>>| {
        let blank = record.is_empty() && field.is_empty() && !quoted;
        record.push(std::mem::take(field));
        let done = std::mem::take(record);
        if !blank {
            records.push(done);
        }
    };

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => {
                in_quotes = true;
                field_was_quoted = true;
            }
            ',' => {
                record.push(std::mem::take(&mut field));
                field_was_quoted = false;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                finish_record(&mut record, &mut field, field_was_quoted, &mut records);
                field_was_quoted = false;
                line += 1;
            }
            _ => field.push(c),
        }
    }
    if in_quotes {
        return Err(format!("unterminated quoted field starting before line {}", line));
    }
    if !record.is_empty() || !field.is_empty() || field_was_quoted {
        finish_record(&mut record, &mut field, field_was_quoted, &mut records);
    }
    Ok(records)
}
