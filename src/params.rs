//! Statement splitting and named parameter binding.
//!
//! Callers write `@name` placeholders; the PostgreSQL driver expects
//! positional `$n`. A batch is split on `;` into statements, and each
//! statement gets its own numbering over the parameters it mentions.
//! String literals, quoted identifiers, dollar-quoted bodies and comments
//! are never split or rewritten.

use crate::db::{Batch, Command, Value};
use tracing::debug;

/// Splits `sql` into statements and binds the named parameters of each.
///
/// Parameters no statement mentions are not sent; they are logged at debug
/// level.
pub fn bind_batch(sql: &str, parameters: &[(String, Value)]) -> Batch {
    let statements: Vec<Command> = split_statements(sql)
        .iter()
        .map(|statement| bind_named(statement, parameters))
        .collect();

    for (name, _) in parameters {
        let mentioned = statements
            .iter()
            .any(|command| command.names.iter().any(|n| n.eq_ignore_ascii_case(name)));
        if !mentioned {
            debug!("Parameter @{} does not appear in the query text", name);
        }
    }

    Batch::new(statements)
}

/// Splits a batch on top-level `;`, dropping statements that are only
/// whitespace or comments.
pub fn split_statements(sql: &str) -> Vec<String> {
    let chars: Vec<char> = sql.chars().collect();
    let mut statements = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < chars.len() {
        if let Some(end) = skip_lexeme(&chars, i) {
            i = end;
            continue;
        }
        if chars[i] == ';' {
            push_statement(&mut statements, &chars[start..i]);
            start = i + 1;
        }
        i += 1;
    }
    push_statement(&mut statements, &chars[start..]);

    statements
}

fn push_statement(statements: &mut Vec<String>, chars: &[char]) {
    if !is_blank(chars) {
        let text: String = chars.iter().collect();
        statements.push(text.trim().to_string());
    }
}

fn is_blank(chars: &[char]) -> bool {
    let mut i = 0;
    while i < chars.len() {
        i = match (chars[i], chars.get(i + 1)) {
            (c, _) if c.is_whitespace() => i + 1,
            ('-', Some('-')) => skip_line_comment(chars, i),
            ('/', Some('*')) => skip_block_comment(chars, i),
            _ => return false,
        };
    }
    true
}

/// Rewrites the `@name` placeholders of one statement.
///
/// Only the parameters the statement mentions are bound, numbered `$1..$n`
/// in the order they appear in `parameters`. Names match
/// case-insensitively. Placeholders that name no parameter are left as they
/// are so the server reports them.
pub fn bind_named(sql: &str, parameters: &[(String, Value)]) -> Command {
    if parameters.is_empty() {
        return Command::new(sql, Vec::new());
    }

    let chars: Vec<char> = sql.chars().collect();

    // First pass: which parameters does the text mention?
    let mut used = vec![false; parameters.len()];
    scan_placeholders(&chars, parameters, |_, index| used[index] = true);

    let mut slots = vec![0usize; parameters.len()];
    let mut next = 0;
    for (slot, _) in slots.iter_mut().zip(&used).filter(|(_, used)| **used) {
        next += 1;
        *slot = next;
    }

    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    scan_placeholders(&chars, parameters, |range, index| {
        out.extend(&chars[copied..range.0]);
        out.push('$');
        out.push_str(&slots[index].to_string());
        copied = range.1;
    });
    out.extend(&chars[copied..]);

    let mut command = Command::new(out, Vec::new());
    for ((name, value), _) in parameters.iter().zip(&used).filter(|(_, used)| **used) {
        command.names.push(name.clone());
        command.binds.push(value.clone());
    }
    command
}

/// Calls `found((start, end), parameter_index)` for every placeholder that
/// names a known parameter.
fn scan_placeholders(
    chars: &[char],
    parameters: &[(String, Value)],
    mut found: impl FnMut((usize, usize), usize),
) {
    let mut i = 0;
    while i < chars.len() {
        if let Some(end) = skip_lexeme(chars, i) {
            i = end;
            continue;
        }
        if chars[i] == '@' && is_placeholder_start(chars, i) {
            let end = ident_end(chars, i + 1);
            let name: String = chars[i + 1..end].iter().collect();
            if let Some(index) = parameters
                .iter()
                .position(|(param, _)| param.eq_ignore_ascii_case(&name))
            {
                found((i, end), index);
            }
            i = end;
            continue;
        }
        i += 1;
    }
}

/// End of the literal, quoted identifier or comment starting at `i`, if any.
fn skip_lexeme(chars: &[char], i: usize) -> Option<usize> {
    match (chars[i], chars.get(i + 1)) {
        ('\'', _) => Some(skip_quoted(chars, i, is_escape_string(chars, i))),
        ('"', _) => Some(skip_quoted(chars, i, false)),
        ('-', Some('-')) => Some(skip_line_comment(chars, i)),
        ('/', Some('*')) => Some(skip_block_comment(chars, i)),
        ('$', _) if i == 0 || !is_ident_char(chars[i - 1]) => skip_dollar_quoted(chars, i),
        _ => None,
    }
}

/// `E'...'` strings take backslash escapes.
fn is_escape_string(chars: &[char], quote: usize) -> bool {
    quote >= 1
        && matches!(chars[quote - 1], 'E' | 'e')
        && (quote == 1 || !is_ident_char(chars[quote - 2]))
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// `@` followed by an identifier and not glued to a preceding word or `@`.
fn is_placeholder_start(chars: &[char], at: usize) -> bool {
    let next_ok = chars.get(at + 1).is_some_and(|&c| is_ident_start(c));
    let prev_ok = at == 0 || !(is_ident_char(chars[at - 1]) || chars[at - 1] == '@');
    next_ok && prev_ok
}

fn ident_end(chars: &[char], start: usize) -> usize {
    let mut end = start;
    while end < chars.len() && is_ident_char(chars[end]) {
        end += 1;
    }
    end
}

/// Skips a `'...'` or `"..."` run, honoring doubled quotes. Returns the index after it.
fn skip_quoted(chars: &[char], start: usize, backslash_escapes: bool) -> usize {
    let quote = chars[start];
    let mut i = start + 1;
    while i < chars.len() {
        if backslash_escapes && chars[i] == '\\' {
            i += 2;
            continue;
        }
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

fn skip_line_comment(chars: &[char], start: usize) -> usize {
    chars[start..]
        .iter()
        .position(|&c| c == '\n')
        .map_or(chars.len(), |p| start + p + 1)
}

/// Block comments nest in PostgreSQL.
fn skip_block_comment(chars: &[char], start: usize) -> usize {
    let mut depth = 0usize;
    let mut i = start;
    while i < chars.len() {
        match (chars[i], chars.get(i + 1)) {
            ('/', Some('*')) => {
                depth += 1;
                i += 2;
            }
            ('*', Some('/')) => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return i;
                }
            }
            _ => i += 1,
        }
    }
    chars.len()
}

/// Skips `$$...$$` or `$tag$...$tag$`. Returns None when `$` does not open a quote (e.g. `$1`).
fn skip_dollar_quoted(chars: &[char], start: usize) -> Option<usize> {
    let mut j = start + 1;
    if j < chars.len() && !(chars[j] == '$' || is_ident_start(chars[j])) {
        return None;
    }
    while j < chars.len() && is_ident_char(chars[j]) {
        j += 1;
    }
    if chars.get(j) != Some(&'$') {
        return None;
    }

    let tag = &chars[start..=j];
    let body = j + 1;
    let close = chars[body..]
        .windows(tag.len())
        .position(|window| window == tag)
        .map_or(chars.len(), |p| body + p + tag.len());
    Some(close)
}
