use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use omt_core::paths::join_normalized;
use omt_filesystem::FileSystemRef;
use serde::Deserialize;

use crate::error::BundleError;
use crate::options::LegacyBundlerOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Specifier<'a> {
  /// `./` or `../` relative to the importing file
  Relative(&'a str),
  /// `/` relative to the served root
  Absolute(&'a str),
  Package {
    name: &'a str,
    subpath: Option<&'a str>,
  },
  Url(&'a str),
}

impl<'a> Specifier<'a> {
  pub fn parse(specifier: &'a str) -> Self {
    if specifier.starts_with("./")
      || specifier.starts_with("../")
      || specifier == "."
      || specifier == ".."
    {
      return Specifier::Relative(specifier);
    }

    if specifier.starts_with('/') {
      return Specifier::Absolute(specifier);
    }

    let scheme_end = specifier.find(':');
    let first_slash = specifier.find('/');
    if let Some(colon) = scheme_end {
      if first_slash.map_or(true, |slash| colon < slash) {
        return Specifier::Url(specifier);
      }
    }

    let name_end = if specifier.starts_with('@') {
      first_slash.and_then(|slash| {
        specifier[slash + 1..]
          .find('/')
          .map(|next| slash + 1 + next)
      })
    } else {
      first_slash
    };

    match name_end {
      Some(end) => Specifier::Package {
        name: &specifier[..end],
        subpath: Some(&specifier[end + 1..]).filter(|subpath| !subpath.is_empty()),
      },
      None => Specifier::Package {
        name: specifier,
        subpath: None,
      },
    }
  }
}

#[derive(Debug, Default, Deserialize)]
struct PackageJson {
  #[serde(default)]
  browser: Option<serde_json::Value>,
  #[serde(default)]
  module: Option<String>,
  #[serde(default)]
  main: Option<String>,
}

/// Node style module resolution over a [`omt_filesystem::FileSystem`]
#[derive(Debug)]
pub struct Resolver<'a> {
  fs: &'a FileSystemRef,
  options: &'a LegacyBundlerOptions,
  root_dir: &'a Path,
}

impl<'a> Resolver<'a> {
  pub fn new(
    fs: &'a FileSystemRef,
    options: &'a LegacyBundlerOptions,
    root_dir: &'a Path,
  ) -> Self {
    Self {
      fs,
      options,
      root_dir,
    }
  }

  /// Resolves `specifier` imported by the file at `from`
  ///
  /// Every `package.json` read on the way is added to `read_files`.
  pub fn resolve(
    &self,
    specifier: &str,
    from: &Path,
    read_files: &mut BTreeSet<PathBuf>,
  ) -> Result<PathBuf, BundleError> {
    let from_dir = from.parent().unwrap_or(self.root_dir);

    let resolved = match Specifier::parse(specifier) {
      Specifier::Relative(relative) => {
        self.resolve_path(&join_normalized(from_dir, relative), read_files)
      }
      Specifier::Absolute(absolute) => {
        self.resolve_path(&join_normalized(self.root_dir, absolute), read_files)
      }
      Specifier::Package { name, subpath } => {
        self.resolve_package(name, subpath, from_dir, read_files)
      }
      Specifier::Url(_) => None,
    };

    resolved.ok_or_else(|| BundleError::Unresolved {
      specifier: specifier.to_string(),
      from: from.to_path_buf(),
    })
  }

  fn resolve_package(
    &self,
    name: &str,
    subpath: Option<&str>,
    from_dir: &Path,
    read_files: &mut BTreeSet<PathBuf>,
  ) -> Option<PathBuf> {
    for dir in from_dir.ancestors() {
      let package_dir = dir.join("node_modules").join(name);
      if !self.fs.is_dir(&package_dir) {
        continue;
      }

      return match subpath {
        Some(subpath) => self.resolve_path(&join_normalized(&package_dir, subpath), read_files),
        None => self.resolve_directory(&package_dir, read_files),
      };
    }

    None
  }

  fn resolve_path(&self, path: &Path, read_files: &mut BTreeSet<PathBuf>) -> Option<PathBuf> {
    self
      .probe_file(path)
      .or_else(|| self.resolve_directory(path, read_files))
  }

  fn probe_file(&self, path: &Path) -> Option<PathBuf> {
    if self.fs.is_file(path) {
      return Some(path.to_path_buf());
    }

    self.options.extensions.iter().find_map(|extension| {
      let mut candidate = OsString::from(path.as_os_str());
      candidate.push(extension);
      let candidate = PathBuf::from(candidate);
      self.fs.is_file(&candidate).then_some(candidate)
    })
  }

  fn resolve_directory(&self, dir: &Path, read_files: &mut BTreeSet<PathBuf>) -> Option<PathBuf> {
    if !self.fs.is_dir(dir) {
      return None;
    }

    let package_json_path = dir.join("package.json");
    if self.fs.is_file(&package_json_path) {
      read_files.insert(package_json_path.clone());
      let package_json = self.read_package_json(&package_json_path);

      for entry in self.entry_fields(&package_json) {
        if let Some(resolved) = self.probe_file(&join_normalized(dir, entry)) {
          return Some(resolved);
        }
        let entry_dir = join_normalized(dir, entry);
        if entry_dir != dir {
          if let Some(resolved) = self.probe_file(&entry_dir.join("index")) {
            return Some(resolved);
          }
        }
      }
    }

    self.probe_file(&dir.join("index"))
  }

  fn read_package_json(&self, path: &Path) -> PackageJson {
    let parsed = self
      .fs
      .read_to_string(path)
      .map_err(|error| error.to_string())
      .and_then(|json| serde_json::from_str(&json).map_err(|error| error.to_string()));

    match parsed {
      Ok(package_json) => package_json,
      Err(error) => {
        tracing::warn!(path = %path.display(), "Ignoring unreadable package.json: {error}");
        PackageJson::default()
      }
    }
  }

  fn entry_fields<'p>(&self, package_json: &'p PackageJson) -> Vec<&'p str> {
    let browser = package_json
      .browser
      .as_ref()
      .filter(|_| self.options.browser_field)
      .and_then(|browser| browser.as_str());

    [browser, package_json.module.as_deref(), package_json.main.as_deref()]
      .into_iter()
      .flatten()
      .collect()
  }
}
