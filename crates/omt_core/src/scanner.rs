//! Finds module worker constructions in served JavaScript and rewrites them.
//!
//! Matching happens on the masked source, see [`crate::lexer`], so that
//! constructions inside comments, strings, template text or regular
//! expressions are never touched. Only the argument list between the
//! parentheses of a recognized construction is replaced.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::edit_buffer::EditBuffer;
use crate::lexer::{mask_source, LexError};
use crate::options::WorkerOptions;
use crate::paths::{normalize_url_path, resolve_url_path, url_basename, url_dirname};
use crate::registry::{WorkerEntry, WorkerRegistry};

static WORKER_CONSTRUCTOR: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"\bnew\s+Worker\s*\(").unwrap());

static NEW_URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^new\s+URL\s*\(").unwrap());

static IMPORT_META_URL: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^import\s*\.\s*meta\s*\.\s*url\b").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerTarget {
  /// A string literal, or the first argument of `new URL(<literal>, import.meta.url)`
  Specifier(String),
  /// `import.meta.url`, the constructing module itself
  SelfReference,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConstruction {
  /// Byte range of the argument list, without the parentheses
  pub arguments: Range<usize>,
  pub target: WorkerTarget,
  /// Source text of the options object literal
  pub options: Option<String>,
}

/// Result of rewriting one served file
#[derive(Debug)]
pub struct WorkerRewrite {
  pub buffer: EditBuffer,
  /// Requested paths of the workers that were rewritten, in source order
  pub workers: Vec<String>,
}

struct Cursor<'a> {
  code: &'a str,
  masked: &'a str,
  pos: usize,
}

impl Cursor<'_> {
  fn skip_whitespace(&mut self) {
    while let Some(byte) = self.masked.as_bytes().get(self.pos) {
      if !byte.is_ascii_whitespace() {
        break;
      }
      self.pos += 1;
    }
  }

  fn peek(&mut self) -> Option<u8> {
    self.skip_whitespace();
    self.masked.as_bytes().get(self.pos).copied()
  }

  fn eat(&mut self, byte: u8) -> bool {
    if self.peek() == Some(byte) {
      self.pos += 1;
      true
    } else {
      false
    }
  }

  fn eat_pattern(&mut self, pattern: &Regex) -> bool {
    self.skip_whitespace();
    let Some(rest) = self.masked.get(self.pos..) else {
      return false;
    };
    match pattern.find(rest) {
      Some(found) => {
        self.pos += found.end();
        true
      }
      None => false,
    }
  }

  /// A string literal, or a template literal without substitutions
  fn string_literal(&mut self) -> Option<String> {
    let quote = self.peek()?;
    if !matches!(quote, b'\'' | b'"' | b'`') {
      return None;
    }

    let start = self.pos + 1;
    let end = start
      + self.masked.as_bytes()[start..]
        .iter()
        .position(|byte| *byte == quote)?;
    if quote == b'`' && self.masked[start..end].contains("${") {
      return None;
    }

    self.pos = end + 1;
    Some(unescape(&self.code[start..end]))
  }

  /// Byte range of a balanced `{ ... }` starting at the cursor
  fn object_literal(&mut self) -> Option<Range<usize>> {
    if self.peek()? != b'{' {
      return None;
    }

    let start = self.pos;
    let mut depth = 0usize;
    for (offset, byte) in self.masked.as_bytes()[start..].iter().enumerate() {
      match byte {
        b'{' => depth += 1,
        b'}' => {
          depth -= 1;
          if depth == 0 {
            self.pos = start + offset + 1;
            return Some(start..self.pos);
          }
        }
        _ => {}
      }
    }
    None
  }
}

fn unescape(literal: &str) -> String {
  let mut result = String::with_capacity(literal.len());
  let mut chars = literal.chars();
  while let Some(ch) = chars.next() {
    if ch != '\\' {
      result.push(ch);
      continue;
    }
    match chars.next() {
      Some('n') => result.push('\n'),
      Some('t') => result.push('\t'),
      Some('r') => result.push('\r'),
      Some(other) => result.push(other),
      None => {}
    }
  }
  result
}

/// Parses the arguments of a construction whose `(` ends at `arguments_start`
fn parse_arguments(code: &str, masked: &str, arguments_start: usize) -> Option<WorkerConstruction> {
  let mut cursor = Cursor {
    code,
    masked,
    pos: arguments_start,
  };

  let target = if cursor.eat_pattern(&NEW_URL) {
    let specifier = cursor.string_literal()?;
    if !(cursor.eat(b',') && cursor.eat_pattern(&IMPORT_META_URL)) {
      return None;
    }
    cursor.eat(b',');
    if !cursor.eat(b')') {
      return None;
    }
    WorkerTarget::Specifier(specifier)
  } else if cursor.eat_pattern(&IMPORT_META_URL) {
    WorkerTarget::SelfReference
  } else {
    WorkerTarget::Specifier(cursor.string_literal()?)
  };

  let mut options = None;
  if cursor.eat(b',') && cursor.peek() != Some(b')') {
    let range = cursor.object_literal()?;
    options = Some(code[range].to_string());
    cursor.eat(b',');
  }

  if !cursor.eat(b')') {
    return None;
  }

  Some(WorkerConstruction {
    arguments: arguments_start..cursor.pos - 1,
    target,
    options,
  })
}

/// Finds every `new Worker(...)` whose arguments have a statically known target
pub fn find_worker_constructions(code: &str) -> Result<Vec<WorkerConstruction>, LexError> {
  let masked = mask_source(code)?;
  let mut constructions = Vec::new();

  for found in WORKER_CONSTRUCTOR.find_iter(&masked) {
    match parse_arguments(code, &masked, found.end()) {
      Some(construction) => constructions.push(construction),
      None => debug!(
        offset = found.start(),
        "Skipping worker construction with dynamic arguments"
      ),
    }
  }

  Ok(constructions)
}

/// Rewrites the module worker constructions of `code` and registers their workers
///
/// Each recognized argument list becomes the absolute requested path followed
/// by the options as a canonical object literal. Returns `None` when nothing
/// was rewritten.
pub fn rewrite_module_workers(
  code: &str,
  served_path: &str,
  registry: &mut WorkerRegistry,
) -> Result<Option<WorkerRewrite>, LexError> {
  let served_path = normalize_url_path(served_path);
  let mut buffer = EditBuffer::new(code);
  let mut workers = Vec::new();

  for construction in find_worker_constructions(code)? {
    let Some(options_source) = construction.options.as_deref() else {
      continue;
    };

    let options = match WorkerOptions::parse(options_source) {
      Ok(options) => options,
      Err(error) => {
        debug!(%served_path, %error, "Skipping worker with non-literal options");
        continue;
      }
    };
    if !options.is_module() {
      continue;
    }

    let (source_file, requested_path) = match &construction.target {
      WorkerTarget::SelfReference => (
        format!("./{}", url_basename(&served_path)),
        served_path.clone(),
      ),
      WorkerTarget::Specifier(specifier) => match resolve_url_path(&served_path, specifier) {
        Some(requested_path) => (specifier.clone(), requested_path),
        None if specifier.starts_with('/') && registry.contains(specifier) => continue,
        None => {
          warn!(
            %served_path,
            %specifier,
            "Only ./ and ../ relative module worker paths are supported, leaving it untouched"
          );
          continue;
        }
      },
    };

    let (Ok(path_literal), Ok(options_literal)) =
      (serde_json::to_string(&requested_path), options.to_literal())
    else {
      continue;
    };

    if let Err(error) = buffer.overwrite(
      construction.arguments.clone(),
      format!("{path_literal}, {options_literal}"),
    ) {
      debug!(%served_path, %error, "Skipping overlapping worker construction");
      continue;
    }

    let base_dir = url_dirname(&served_path).trim_start_matches('/').to_string();
    debug!(%served_path, %requested_path, "Found module worker");
    registry.register(WorkerEntry::new(
      requested_path.clone(),
      source_file,
      base_dir,
      options,
    ));
    workers.push(requested_path);
  }

  if workers.is_empty() {
    return Ok(None);
  }

  Ok(Some(WorkerRewrite { buffer, workers }))
}
