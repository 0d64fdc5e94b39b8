/// Split a raw SQL block into individual statements, respecting:
/// - Single-quoted string literals (don't split on `;` inside). A quote
///   preceded by a backslash neither opens nor closes a literal.
/// - Dollar-quoted literals `$tag$ ... $tag$` (tag may be empty)
/// - Empty / whitespace-only statements are skipped
///
/// Each terminated statement keeps its `;`. A trailing statement without a
/// terminator is still returned. Text inside a statement is never rewritten,
/// only the surrounding whitespace is trimmed.
pub fn split_statements(input: &str) -> Vec<String> {
    let mut statements: Vec<String> = Vec::new();
    let mut current = String::new();
    let chars: Vec<char> = input.chars().collect();
    let len = chars.len();
    let mut in_quote = false;
    let mut i = 0;

    while i < len {
        let ch = chars[i];

        // single quote, with the legacy backslash escape
        if ch == '\'' {
            let escaped = i > 0 && chars[i - 1] == '\\';
            if !escaped {
                in_quote = !in_quote;
            }
            current.push(ch);
            i += 1;
            continue;
        }

        if in_quote {
            current.push(ch);
            i += 1;
            continue;
        }

        // $tag$ ... $tag$
        if ch == '$' {
            if let Some(open_end) = dollar_delimiter_end(&chars, i) {
                let delimiter = &chars[i..=open_end];
                current.extend(delimiter.iter());
                let body_start = open_end + 1;
                match find_sequence(&chars, body_start, delimiter) {
                    Some(close) => {
                        let end = close + delimiter.len();
                        current.extend(chars[body_start..end].iter());
                        i = end;
                    }
                    None => {
                        // unterminated: the rest of the block is literal text
                        current.extend(chars[body_start..].iter());
                        i = len;
                    }
                }
                continue;
            }
        }

        // statement terminator
        if ch == ';' {
            current.push(ch);
            let stmt = current.trim();
            if stmt != ";" {
                statements.push(stmt.to_string());
            }
            current.clear();
            i += 1;
            continue;
        }

        current.push(ch);
        i += 1;
    }

    // trailing statement without terminator
    let stmt = current.trim();
    if !stmt.is_empty() {
        statements.push(stmt.to_string());
    }

    statements
}

/// If a dollar-quote delimiter opens at `start`, return the index of its
/// closing `$`. `$1`-style parameters and `$` inside identifiers are not
/// delimiters.
fn dollar_delimiter_end(chars: &[char], start: usize) -> Option<usize> {
    if start > 0 {
        let prev = chars[start - 1];
        if prev.is_alphanumeric() || prev == '_' || prev == '$' {
            return None;
        }
    }
    let mut j = start + 1;
    while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
        j += 1;
    }
    if j >= chars.len() || chars[j] != '$' {
        return None;
    }
    if j > start + 1 && chars[start + 1].is_ascii_digit() {
        return None;
    }
    Some(j)
}

fn find_sequence(chars: &[char], from: usize, needle: &[char]) -> Option<usize> {
    if needle.is_empty() || from >= chars.len() {
        return None;
    }
    chars[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| from + pos)
}
