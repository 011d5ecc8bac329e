use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMapErrorType {
  UnexpectedNegativeNumber,
  UnexpectedlyBigNumber,
  VlqUnexpectedEof,
  VlqInvalidBase64,
  VlqOverflow,
  IOError,
  NameOutOfRange,
  SourceOutOfRange,
  InvalidFilePath,
  JSONError,
  DataUrlError,
  NotFound,
}

impl SourceMapErrorType {
  fn describe(&self) -> &'static str {
    match self {
      Self::UnexpectedNegativeNumber => "Unexpected negative number",
      Self::UnexpectedlyBigNumber => "Unexpected big number",
      Self::VlqUnexpectedEof => "VLQ unexpected end of input",
      Self::VlqInvalidBase64 => "VLQ invalid base 64 character",
      Self::VlqOverflow => "VLQ overflow",
      Self::IOError => "IO error",
      Self::NameOutOfRange => "Name index out of range",
      Self::SourceOutOfRange => "Source index out of range",
      Self::InvalidFilePath => "Invalid file path",
      Self::JSONError => "Invalid source map JSON",
      Self::DataUrlError => "Invalid data url",
      Self::NotFound => "Source map not found",
    }
  }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub struct SourceMapError {
  pub error_type: SourceMapErrorType,
  pub reason: Option<String>,
}

impl SourceMapError {
  pub fn new(error_type: SourceMapErrorType) -> Self {
    Self {
      error_type,
      reason: None,
    }
  }

  pub fn new_with_reason(error_type: SourceMapErrorType, reason: &str) -> Self {
    Self {
      error_type,
      reason: Some(String::from(reason)),
    }
  }
}

impl fmt::Display for SourceMapError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.error_type.describe())?;
    if let Some(reason) = &self.reason {
      write!(f, ": {reason}")?;
    }
    Ok(())
  }
}

impl From<vlq::Error> for SourceMapError {
  fn from(err: vlq::Error) -> Self {
    match err {
      vlq::Error::UnexpectedEof => SourceMapError::new(SourceMapErrorType::VlqUnexpectedEof),
      vlq::Error::InvalidBase64(_) => SourceMapError::new(SourceMapErrorType::VlqInvalidBase64),
      vlq::Error::Overflow => SourceMapError::new(SourceMapErrorType::VlqOverflow),
    }
  }
}

impl From<std::io::Error> for SourceMapError {
  fn from(err: std::io::Error) -> Self {
    let error_type = if err.kind() == std::io::ErrorKind::NotFound {
      SourceMapErrorType::NotFound
    } else {
      SourceMapErrorType::IOError
    };
    SourceMapError::new_with_reason(error_type, &err.to_string())
  }
}

impl From<serde_json::Error> for SourceMapError {
  fn from(err: serde_json::Error) -> Self {
    SourceMapError::new_with_reason(SourceMapErrorType::JSONError, &err.to_string())
  }
}

impl From<data_url::DataUrlError> for SourceMapError {
  fn from(_err: data_url::DataUrlError) -> Self {
    SourceMapError::new(SourceMapErrorType::DataUrlError)
  }
}
