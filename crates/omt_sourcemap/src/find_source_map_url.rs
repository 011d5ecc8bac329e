use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

/// A trailing `sourceMappingURL` comment
#[derive(Debug, PartialEq)]
pub struct SourceMapUrlMatch {
  pub url: String,
  /// Byte offsets of the comment, trailing whitespace excluded
  pub start: usize,
  pub end: usize,
}

impl SourceMapUrlMatch {
  pub fn range(&self) -> Range<usize> {
    self.start..self.end
  }
}

static SOURCEMAP_URL: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"\/[*/][@#]\s*sourceMappingURL\s*=\s*(?<url>\S+?)(?:\s*\*\/)?\s*$").unwrap()
});

pub fn find_sourcemap_url(code: &str) -> Option<SourceMapUrlMatch> {
  let captures = SOURCEMAP_URL.captures(code)?;
  let whole = captures.get(0)?;
  let url = captures.name("url")?;

  Some(SourceMapUrlMatch {
    url: url.as_str().to_string(),
    start: whole.start(),
    end: whole.start() + whole.as_str().trim_end().len(),
  })
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  fn comment(code: &str) -> Option<&str> {
    find_sourcemap_url(code).map(|found| &code[found.range()])
  }

  #[test]
  fn ignores_code_without_a_trailing_comment() {
    assert_eq!(find_sourcemap_url(""), None);
    assert_eq!(find_sourcemap_url("/// sourceMappingURL=a.js.map"), None);
    assert_eq!(
      find_sourcemap_url("//# sourceMappingURL=a.js.map\nself.close();"),
      None
    );
  }

  #[test]
  fn finds_line_comments() {
    let code = "self.close();\n//# sourceMappingURL=worker.js.map\n";

    assert_eq!(
      find_sourcemap_url(code),
      Some(SourceMapUrlMatch {
        url: String::from("worker.js.map"),
        start: 14,
        end: 48,
      })
    );
    assert_eq!(comment("x;\n//@ sourceMappingURL=old.js.map  \n\n"), Some("//@ sourceMappingURL=old.js.map"));
  }

  #[test]
  fn finds_block_comments() {
    let code = "a { color: blue; }\n/*# sourceMappingURL=data:application/json;base64,e30= */\n";

    let found = find_sourcemap_url(code).unwrap();
    assert_eq!(found.url, "data:application/json;base64,e30=");
    assert_eq!(
      &code[found.range()],
      "/*# sourceMappingURL=data:application/json;base64,e30= */"
    );
  }
}
