//! Just enough of Python's literal syntax to read `text/plain` renderings of
//! strings and tuples of strings.

use std::iter::Peekable;
use std::str::Chars;

/// Parse a single quoted string literal such as `'pong'` or `"a\nb"`.
pub fn parse_str_literal(raw: &str) -> Option<String> {
    let mut chars = raw.trim().chars().peekable();
    let value = scan_string(&mut chars)?;
    chars.next().is_none().then_some(value)
}

/// Parse a tuple of string literals such as `('a.decls', 'a.dtrace')`.
pub fn parse_str_tuple(raw: &str) -> Option<Vec<String>> {
    let inner = raw.trim().strip_prefix('(')?.strip_suffix(')')?;
    let mut chars = inner.chars().peekable();
    let mut items = Vec::new();

    loop {
        skip_whitespace(&mut chars);
        if chars.peek().is_none() {
            return Some(items);
        }
        items.push(scan_string(&mut chars)?);
        skip_whitespace(&mut chars);
        match chars.next() {
            Some(',') => {}
            None => return Some(items),
            Some(_) => return None,
        }
    }
}

fn skip_whitespace(chars: &mut Peekable<Chars<'_>>) {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
}

fn scan_string(chars: &mut Peekable<Chars<'_>>) -> Option<String> {
    let quote = chars.next().filter(|c| *c == '\'' || *c == '"')?;
    let mut value = String::new();

    loop {
        match chars.next()? {
            c if c == quote => return Some(value),
            '\\' => value.push(scan_escape(chars)?),
            c => value.push(c),
        }
    }
}

fn scan_escape(chars: &mut Peekable<Chars<'_>>) -> Option<char> {
    let escaped = match chars.next()? {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '0' => '\0',
        'x' => return scan_hex(chars, 2),
        'u' => return scan_hex(chars, 4),
        'U' => return scan_hex(chars, 8),
        other => other,
    };
    Some(escaped)
}

fn scan_hex(chars: &mut Peekable<Chars<'_>>, digits: usize) -> Option<char> {
    let mut code = 0u32;
    for _ in 0..digits {
        code = code * 16 + chars.next()?.to_digit(16)?;
    }
    char::from_u32(code)
}
