//! ES module analysis and conversion into the body of a `define()` factory.
//!
//! Modules are parsed with swc. Specifiers are rewritten to module ids,
//! `import()` and `import.meta` are replaced with their runtime
//! counterparts, then the `common_js` transform turns `import`/`export`
//! declarations into hoisted `require()` calls and live export getters.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::string::FromUtf8Error;

use omt_sourcemap::{SourceMap, SourceMapError};
use swc_core::common::input::StringInput;
use swc_core::common::source_map::SourceMapGenConfig;
use swc_core::common::sync::Lrc;
use swc_core::common::{
  FileName, Globals, Mark, SourceMap as SwcSourceMap, Span, Spanned, SyntaxContext, DUMMY_SP,
  GLOBALS,
};
use swc_core::ecma::ast::*;
use swc_core::ecma::codegen::text_writer::JsWriter;
use swc_core::ecma::codegen::Emitter;
use swc_core::ecma::parser::lexer::Lexer;
use swc_core::ecma::parser::{Parser, Syntax};
use swc_core::ecma::transforms::base::feature::FeatureFlag;
use swc_core::ecma::transforms::base::fixer::fixer;
use swc_core::ecma::transforms::base::helpers::{inject_helpers, Helpers, HELPERS};
use swc_core::ecma::transforms::base::hygiene::hygiene;
use swc_core::ecma::transforms::base::resolver;
use swc_core::ecma::transforms::module::common_js::common_js;
use swc_core::ecma::transforms::module::path::Resolver;
use swc_core::ecma::transforms::module::util::Config;
use swc_core::ecma::visit::{Visit, VisitMut, VisitMutWith, VisitWith};

/// A syntax error, with a one based line and column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
  pub message: String,
  pub line: usize,
  pub column: usize,
}

impl ParseError {
  fn new(cm: &SwcSourceMap, error: &swc_core::ecma::parser::error::Error) -> Self {
    let location = cm.lookup_char_pos(error.span().lo);
    ParseError {
      message: error.kind().msg().to_string(),
      line: location.line,
      column: location.col.0 + 1,
    }
  }
}

impl fmt::Display for ParseError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} ({}:{})", self.message, self.line, self.column)
  }
}

impl std::error::Error for ParseError {}

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
  #[error(transparent)]
  Parse(#[from] ParseError),
  #[error("Failed to emit code: {0}")]
  Emit(#[from] std::io::Error),
  #[error("Emitted code is not valid utf-8: {0}")]
  Utf8(#[from] FromUtf8Error),
  #[error("Failed to generate a source map: {0}")]
  Map(String),
  #[error(transparent)]
  SourceMap(#[from] SourceMapError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
  /// `import` and `export ... from` statements
  Static,
  /// `import()` of a literal specifier
  Dynamic,
  /// `require()` of a literal specifier
  Require,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
  pub specifier: String,
  pub kind: DependencyKind,
}

/// Where a dependency ended up in the bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTarget {
  pub id: String,
  /// Chunk file to load before requiring `id`, for dynamic imports outside the main bundle
  pub chunk: Option<String>,
}

/// Converted code with its map back to the file that was parsed
#[derive(Debug)]
pub struct RenderedCode {
  pub code: String,
  pub map: SourceMap,
}

/// The module syntax found in one source file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleSyntax {
  pub dependencies: Vec<Dependency>,
}

impl ModuleSyntax {
  pub fn analyze(path: &Path, code: &str) -> Result<Self, ParseError> {
    let cm: Lrc<SwcSourceMap> = Default::default();
    let program = parse(&cm, path, code)?;

    let mut collector = DependencyCollector::default();
    program.visit_with(&mut collector);

    Ok(ModuleSyntax {
      dependencies: collector.dependencies,
    })
  }

  /// Converts the module to the `define()` factory body format
  ///
  /// `targets` holds one entry per dependency, in the order of
  /// [`ModuleSyntax::dependencies`]. `url_path` is the root relative url
  /// `import.meta.url` resolves to. Sources in the returned map are
  /// relative to `map_dir`.
  pub fn render(
    &self,
    path: &Path,
    code: &str,
    targets: &[RenderTarget],
    url_path: &str,
    map_dir: &Path,
  ) -> Result<RenderedCode, TransformError> {
    let targets: HashMap<(String, DependencyKind), RenderTarget> = self
      .dependencies
      .iter()
      .zip(targets)
      .map(|(dependency, target)| ((dependency.specifier.clone(), dependency.kind), target.clone()))
      .collect();

    let cm: Lrc<SwcSourceMap> = Default::default();
    let mut program = parse(&cm, path, code)?;

    let (code, json) = GLOBALS.set(&Globals::new(), || {
      program.visit_mut_with(&mut LegacyRewriter { targets, url_path });

      if has_module_declarations(&program) {
        HELPERS.set(&Helpers::new(false), || {
          let unresolved_mark = Mark::new();
          let top_level_mark = Mark::new();
          let mut passes = (
            resolver(unresolved_mark, top_level_mark, false),
            common_js(
              Resolver::Default,
              unresolved_mark,
              Config::default(),
              FeatureFlag::empty(),
            ),
            inject_helpers(unresolved_mark),
            hygiene(),
            fixer(None),
          );
          passes.process(&mut program);
        });
      }

      emit(&cm, &program)
    })?;
    let map = SourceMap::from_json(map_dir, &json)?;

    Ok(RenderedCode { code, map })
  }
}

/// Names sources by their path and embeds their content
struct OriginalSources;

impl SourceMapGenConfig for OriginalSources {
  fn file_name_to_source(&self, f: &FileName) -> String {
    f.to_string()
  }

  fn inline_sources_content(&self, _f: &FileName) -> bool {
    true
  }
}

fn parse(cm: &Lrc<SwcSourceMap>, path: &Path, code: &str) -> Result<Program, ParseError> {
  let source_file = cm.new_source_file(Lrc::new(FileName::Real(path.to_path_buf())), code.into());
  let lexer = Lexer::new(
    Syntax::Es(Default::default()),
    EsVersion::EsNext,
    StringInput::from(&*source_file),
    None,
  );

  let mut parser = Parser::new_from(lexer);
  let program = parser
    .parse_program()
    .map_err(|error| ParseError::new(cm, &error))?;
  if let Some(error) = parser.take_errors().first() {
    return Err(ParseError::new(cm, error));
  }

  Ok(program)
}

/// Prints `program` and its source map json
fn emit(cm: &Lrc<SwcSourceMap>, program: &Program) -> Result<(String, String), TransformError> {
  let mut code = Vec::new();
  let mut line_positions = Vec::new();
  {
    let mut emitter = Emitter {
      cfg: Default::default(),
      cm: cm.clone(),
      comments: None,
      wr: JsWriter::new(cm.clone(), "\n", &mut code, Some(&mut line_positions)),
    };
    match program {
      Program::Module(module) => emitter.emit_module(module)?,
      Program::Script(script) => emitter.emit_script(script)?,
    }
  }

  let mut json = Vec::new();
  cm.build_source_map_with_config(&line_positions, None, OriginalSources)
    .to_writer(&mut json)
    .map_err(|error| TransformError::Map(error.to_string()))?;

  Ok((String::from_utf8(code)?, String::from_utf8(json)?))
}

fn has_module_declarations(program: &Program) -> bool {
  match program {
    Program::Module(module) => module
      .body
      .iter()
      .any(|item| matches!(item, ModuleItem::ModuleDecl(_))),
    Program::Script(_) => false,
  }
}

/// The string literal passed as the only argument of a call
fn literal_argument(args: &[ExprOrSpread]) -> Option<&Str> {
  match args {
    [ExprOrSpread { spread: None, expr }] => match &**expr {
      Expr::Lit(Lit::Str(specifier)) => Some(specifier),
      _ => None,
    },
    _ => None,
  }
}

fn is_require(callee: &Callee) -> bool {
  match callee {
    Callee::Expr(expr) => matches!(&**expr, Expr::Ident(ident) if &*ident.sym == "require"),
    _ => false,
  }
}

fn is_import_meta(expr: &Expr) -> bool {
  matches!(
    expr,
    Expr::MetaProp(MetaPropExpr {
      kind: MetaPropKind::ImportMeta,
      ..
    })
  )
}

#[derive(Default)]
struct DependencyCollector {
  dependencies: Vec<Dependency>,
}

impl DependencyCollector {
  fn add(&mut self, specifier: &Str, kind: DependencyKind) {
    self.dependencies.push(Dependency {
      specifier: specifier.value.to_string(),
      kind,
    });
  }
}

impl Visit for DependencyCollector {
  fn visit_import_decl(&mut self, import: &ImportDecl) {
    self.add(&import.src, DependencyKind::Static);
  }

  fn visit_named_export(&mut self, export: &NamedExport) {
    if let Some(src) = &export.src {
      self.add(src, DependencyKind::Static);
    }
  }

  fn visit_export_all(&mut self, export: &ExportAll) {
    self.add(&export.src, DependencyKind::Static);
  }

  fn visit_call_expr(&mut self, call: &CallExpr) {
    let kind = match &call.callee {
      Callee::Import(_) => Some(DependencyKind::Dynamic),
      callee if is_require(callee) => Some(DependencyKind::Require),
      _ => None,
    };
    if let (Some(kind), Some(specifier)) = (kind, literal_argument(&call.args)) {
      self.add(specifier, kind);
    }

    call.visit_children_with(self);
  }
}

/// Points specifiers at module ids and replaces what classic workers lack
struct LegacyRewriter<'a> {
  targets: HashMap<(String, DependencyKind), RenderTarget>,
  url_path: &'a str,
}

impl LegacyRewriter<'_> {
  fn target(&self, specifier: &Str, kind: DependencyKind) -> Option<&RenderTarget> {
    self.targets.get(&(specifier.value.to_string(), kind))
  }

  fn rewrite_specifier(&self, specifier: &mut Str, kind: DependencyKind) {
    if let Some(target) = self.target(specifier, kind) {
      *specifier = Str {
        span: specifier.span,
        value: target.id.as_str().into(),
        raw: None,
      };
    }
  }

  /// `new URL("/<id>", location.origin).href`
  fn meta_url(&self, span: Span) -> Expr {
    Expr::Member(MemberExpr {
      span,
      obj: Box::new(Expr::New(NewExpr {
        span,
        ctxt: SyntaxContext::empty(),
        callee: Box::new(identifier("URL")),
        args: Some(vec![
          argument(string_literal(self.url_path)),
          argument(member(identifier("location"), "origin")),
        ]),
        type_args: None,
      })),
      prop: MemberProp::Ident(IdentName::new("href".into(), DUMMY_SP)),
    })
  }

  /// `__omt.load(<chunk or null>, "<id>")`
  fn load_call(&self, span: Span, target: &RenderTarget) -> Expr {
    let chunk = match &target.chunk {
      Some(chunk) => string_literal(chunk),
      None => Expr::Lit(Lit::Null(Null { span: DUMMY_SP })),
    };

    Expr::Call(CallExpr {
      span,
      ctxt: SyntaxContext::empty(),
      callee: Callee::Expr(Box::new(member(identifier("__omt"), "load"))),
      args: vec![argument(chunk), argument(string_literal(&target.id))],
      type_args: None,
    })
  }
}

impl VisitMut for LegacyRewriter<'_> {
  fn visit_mut_import_decl(&mut self, import: &mut ImportDecl) {
    self.rewrite_specifier(&mut import.src, DependencyKind::Static);
  }

  fn visit_mut_named_export(&mut self, export: &mut NamedExport) {
    if let Some(src) = &mut export.src {
      self.rewrite_specifier(src, DependencyKind::Static);
    }
  }

  fn visit_mut_export_all(&mut self, export: &mut ExportAll) {
    self.rewrite_specifier(&mut export.src, DependencyKind::Static);
  }

  fn visit_mut_expr(&mut self, expr: &mut Expr) {
    match expr {
      Expr::Member(MemberExpr {
        span,
        obj,
        prop: MemberProp::Ident(prop),
      }) if is_import_meta(&**obj) && &*prop.sym == "url" => {
        *expr = self.meta_url(*span);
        return;
      }
      Expr::MetaProp(MetaPropExpr {
        span,
        kind: MetaPropKind::ImportMeta,
      }) => {
        let span = *span;
        *expr = Expr::Paren(ParenExpr {
          span,
          expr: Box::new(Expr::Object(ObjectLit {
            span,
            props: vec![PropOrSpread::Prop(Box::new(Prop::KeyValue(KeyValueProp {
              key: PropName::Ident(IdentName::new("url".into(), DUMMY_SP)),
              value: Box::new(self.meta_url(span)),
            })))],
          })),
        });
        return;
      }
      Expr::Call(call) if matches!(call.callee, Callee::Import(_)) => {
        let load = literal_argument(&call.args)
          .and_then(|specifier| self.target(specifier, DependencyKind::Dynamic))
          .map(|target| self.load_call(call.span, target));
        if let Some(load) = load {
          *expr = load;
          return;
        }
      }
      _ => {}
    }

    expr.visit_mut_children_with(self);
  }

  fn visit_mut_call_expr(&mut self, call: &mut CallExpr) {
    call.visit_mut_children_with(self);

    if !is_require(&call.callee) || literal_argument(&call.args).is_none() {
      return;
    }
    if let Expr::Lit(Lit::Str(specifier)) = &mut *call.args[0].expr {
      self.rewrite_specifier(specifier, DependencyKind::Require);
    }
  }
}

fn identifier(name: &str) -> Expr {
  Expr::Ident(Ident::new_no_ctxt(name.into(), DUMMY_SP))
}

fn member(object: Expr, property: &str) -> Expr {
  Expr::Member(MemberExpr {
    span: DUMMY_SP,
    obj: Box::new(object),
    prop: MemberProp::Ident(IdentName::new(property.into(), DUMMY_SP)),
  })
}

fn string_literal(value: &str) -> Expr {
  Expr::Lit(Lit::Str(Str::from(value)))
}

fn argument(expr: Expr) -> ExprOrSpread {
  ExprOrSpread {
    spread: None,
    expr: Box::new(expr),
  }
}
