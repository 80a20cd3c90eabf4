use std::ops::Range;

/// One logical line: physical lines joined by open brackets, backslash
/// continuations or triple-quoted strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LogicalLine<'a> {
    pub indent: usize,
    pub offset: usize,
    pub text: &'a str,
}

const TAB_SIZE: usize = 8;

pub(crate) fn logical_lines(src: &str) -> Result<Vec<LogicalLine<'_>>, (Range<usize>, String)> {
    let bytes = src.as_bytes();
    let mut lines = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let mut indent = 0;
        while i < bytes.len() {
            match bytes[i] {
                b' ' => indent += 1,
                b'\t' => indent = (indent / TAB_SIZE + 1) * TAB_SIZE,
                b'\x0c' => indent = 0,
                _ => break,
            }
            i += 1;
        }
        match bytes.get(i) {
            None => break,
            Some(b'\n') | Some(b'\r') => {
                i += 1;
                continue;
            }
            Some(b'#') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            Some(_) => (),
        }
        let start = i;
        let mut depth = 0usize;
        while i < bytes.len() {
            match bytes[i] {
                b'\n' if depth == 0 => break,
                b'(' | b'[' | b'{' => depth += 1,
                b')' | b']' | b'}' => depth = depth.saturating_sub(1),
                b'\\' => i += 1,
                b'#' => {
                    while i + 1 < bytes.len() && bytes[i + 1] != b'\n' {
                        i += 1;
                    }
                }
                q @ (b'\'' | b'"') => i = skip_string(bytes, i, q)?,
                _ => (),
            }
            i += 1;
        }
        let end = i.min(bytes.len());
        lines.push(LogicalLine {
            indent,
            offset: start,
            text: src[start..end].trim_end(),
        });
        i = end + 1;
    }
    Ok(lines)
}

/// Returns the index of the closing quote of the string starting at `start`.
fn skip_string(bytes: &[u8], start: usize, q: u8) -> Result<usize, (Range<usize>, String)> {
    let triple = bytes.get(start + 1) == Some(&q) && bytes.get(start + 2) == Some(&q);
    let mut i = if triple { start + 3 } else { start + 1 };
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'\n' if !triple => break,
            c if c == q => {
                if !triple {
                    return Ok(i);
                }
                if bytes.get(i + 1) == Some(&q) && bytes.get(i + 2) == Some(&q) {
                    return Ok(i + 2);
                }
            }
            _ => (),
        }
        i += 1;
    }
    Err((
        start..i.min(bytes.len()),
        if triple {
            "unterminated triple-quoted string literal".to_string()
        } else {
            "unterminated string literal".to_string()
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::logical_lines;

    #[test]
    fn joins_bracketed_lines() {
        let src = "x = [1,\n     2]\nif x:\n    pass\n";
        let lines = logical_lines(src).unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].text, "x = [1,\n     2]");
        assert_eq!(lines[2].indent, 4);
        assert_eq!(lines[2].text, "pass");
    }

    #[test]
    fn skips_comments_and_blank_lines() {
        let src = "# header\n\n   \nx = 1  # trailing\n";
        let lines = logical_lines(src).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "x = 1  # trailing");
        assert_eq!(lines[0].offset, 14);
    }

    #[test]
    fn triple_quoted_strings_span_lines() {
        let src = "s = '''a\n(b\n'''\ny = 2\n";
        let lines = logical_lines(src).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].text, "y = 2");
    }

    #[test]
    fn backslash_continuation() {
        let lines = logical_lines("x = 1 + \\\n    2\n").unwrap();
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn unterminated_string() {
        assert!(logical_lines("x = 'abc\n").is_err());
    }
}
