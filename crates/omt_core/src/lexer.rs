//! Offset preserving masking of JavaScript source text.
//!
//! [`mask_source`] returns a copy of the source in which the bodies of string,
//! template and regular expression literals, and whole comments, are replaced
//! by spaces. Newlines and literal delimiters are kept and every byte stays at
//! the same offset, so plain pattern matching over the masked text can never
//! match inside a literal or comment, and any offset found in the masked text
//! can be applied to the original text as is.

/// Words after which a `/` starts a regular expression rather than a division
const KEYWORDS_BEFORE_EXPRESSION: &[&str] = &[
  "return",
  "typeof",
  "instanceof",
  "in",
  "of",
  "new",
  "delete",
  "void",
  "throw",
  "case",
  "do",
  "else",
  "yield",
  "await",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LexError {
  #[error("unterminated string literal starting at byte {0}")]
  UnterminatedString(usize),
  #[error("unterminated comment starting at byte {0}")]
  UnterminatedComment(usize),
  #[error("unterminated template literal starting at byte {0}")]
  UnterminatedTemplate(usize),
  #[error("unterminated regular expression starting at byte {0}")]
  UnterminatedRegex(usize),
}

fn blank(out: &mut [u8], start: usize, end: usize) {
  for byte in &mut out[start..end] {
    if *byte != b'\n' && *byte != b'\r' {
      *byte = b' ';
    }
  }
}

fn line_end(bytes: &[u8], start: usize) -> usize {
  bytes[start..]
    .iter()
    .position(|b| *b == b'\n')
    .map_or(bytes.len(), |offset| start + offset)
}

fn is_identifier_byte(byte: u8) -> bool {
  byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'$' || byte >= 0x80
}

/// Returns the offset of the closing quote of the string starting at `start`
fn skip_string(bytes: &[u8], start: usize) -> Result<usize, LexError> {
  let quote = bytes[start];
  let mut i = start + 1;
  while i < bytes.len() {
    match bytes[i] {
      b'\\' => i += 2,
      b'\n' => break,
      byte if byte == quote => return Ok(i),
      _ => i += 1,
    }
  }
  Err(LexError::UnterminatedString(start))
}

/// Returns the offset of the closing `/` of the regular expression starting at `start`
fn skip_regex(bytes: &[u8], start: usize) -> Result<usize, LexError> {
  let mut in_class = false;
  let mut i = start + 1;
  while i < bytes.len() {
    match bytes[i] {
      b'\n' => break,
      b'\\' => i += 1,
      b'[' => in_class = true,
      b']' => in_class = false,
      b'/' if !in_class => return Ok(i),
      _ => {}
    }
    i += 1;
  }
  Err(LexError::UnterminatedRegex(start))
}

/// Masks template text from `start` up to the closing backtick or the next `${`
///
/// Returns the offset after the delimiter that stopped it and whether that
/// delimiter closed the template.
fn mask_template_text(
  bytes: &[u8],
  out: &mut [u8],
  start: usize,
  template_start: usize,
) -> Result<(usize, bool), LexError> {
  let mut i = start;
  while i < bytes.len() {
    match bytes[i] {
      b'\\' => {
        let end = (i + 2).min(bytes.len());
        blank(out, i, end);
        i = end;
      }
      b'`' => return Ok((i + 1, true)),
      b'$' if bytes.get(i + 1) == Some(&b'{') => return Ok((i + 2, false)),
      _ => {
        blank(out, i, i + 1);
        i += 1;
      }
    }
  }
  Err(LexError::UnterminatedTemplate(template_start))
}

/// Whether the `(` at `open` follows one of the control keywords with a parenthesized head
///
/// `masked` must already be masked up to `open`, so comments read as spaces.
fn opens_control_head(masked: &[u8], open: usize) -> bool {
  let end = masked[..open]
    .iter()
    .rposition(|byte| !byte.is_ascii_whitespace())
    .map_or(0, |position| position + 1);
  let start = masked[..end]
    .iter()
    .rposition(|byte| !is_identifier_byte(*byte))
    .map_or(0, |position| position + 1);
  let is_member = masked[..start]
    .iter()
    .rev()
    .find(|byte| !byte.is_ascii_whitespace())
    == Some(&b'.');

  !is_member && matches!(&masked[start..end], b"if" | b"while" | b"for" | b"with")
}

/// Masks string, template and regex literal bodies and comments with spaces
pub fn mask_source(code: &str) -> Result<String, LexError> {
  let bytes = code.as_bytes();
  let mut out = bytes.to_vec();
  let len = bytes.len();

  // Brace depth at which each open template substitution started
  let mut templates: Vec<(usize, usize)> = Vec::new();
  let mut brace_depth: usize = 0;
  // Whether each open paren is the head of `if`, `while`, `for` or `with`
  let mut parens: Vec<bool> = Vec::new();
  let mut regex_allowed = true;
  let mut i = 0;

  if code.starts_with("#!") {
    i = line_end(bytes, 0);
    blank(&mut out, 0, i);
  }

  while i < len {
    let byte = bytes[i];
    let next = bytes.get(i + 1).copied();

    match byte {
      b'/' if next == Some(b'/') => {
        let end = line_end(bytes, i);
        blank(&mut out, i, end);
        i = end;
      }
      b'/' if next == Some(b'*') => {
        let end = code[i + 2..]
          .find("*/")
          .map(|offset| i + 2 + offset + 2)
          .ok_or(LexError::UnterminatedComment(i))?;
        blank(&mut out, i, end);
        i = end;
      }
      b'\'' | b'"' => {
        let end = skip_string(bytes, i)?;
        blank(&mut out, i + 1, end);
        i = end + 1;
        regex_allowed = false;
      }
      b'`' => {
        let (end, closed) = mask_template_text(bytes, &mut out, i + 1, i)?;
        if !closed {
          templates.push((brace_depth, i));
        }
        i = end;
        regex_allowed = !closed;
      }
      b'/' if regex_allowed => {
        let end = skip_regex(bytes, i)?;
        blank(&mut out, i + 1, end);
        i = end + 1;
        regex_allowed = false;
      }
      b'{' => {
        brace_depth += 1;
        i += 1;
        regex_allowed = true;
      }
      b'}' => match templates.last().copied() {
        Some((depth, template_start)) if depth == brace_depth => {
          templates.pop();
          let (end, closed) = mask_template_text(bytes, &mut out, i + 1, template_start)?;
          if !closed {
            templates.push((brace_depth, template_start));
          }
          i = end;
          regex_allowed = !closed;
        }
        _ => {
          brace_depth = brace_depth.saturating_sub(1);
          i += 1;
          regex_allowed = true;
        }
      },
      b'+' | b'-' if next == Some(byte) => {
        i += 2;
        regex_allowed = false;
      }
      b'(' => {
        parens.push(opens_control_head(&out, i));
        i += 1;
        regex_allowed = true;
      }
      b')' => {
        // A statement, not a value, follows the head of a control statement
        regex_allowed = parens.pop().unwrap_or(false);
        i += 1;
      }
      b']' | b'.' => {
        i += 1;
        regex_allowed = false;
      }
      byte if byte.is_ascii_whitespace() => i += 1,
      byte if is_identifier_byte(byte) => {
        let start = i;
        while i < len && is_identifier_byte(bytes[i]) {
          i += 1;
        }
        let word = &code[start..i];
        regex_allowed = KEYWORDS_BEFORE_EXPRESSION.contains(&word);
      }
      _ => {
        i += 1;
        regex_allowed = true;
      }
    }
  }

  if let Some((_, template_start)) = templates.first() {
    return Err(LexError::UnterminatedTemplate(*template_start));
  }

  // Only whole characters were copied and masked bytes are ASCII spaces
  Ok(String::from_utf8_lossy(&out).into_owned())
}
