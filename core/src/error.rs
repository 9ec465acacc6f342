// stepchain/src/error.rs
use anyhow::Error as AnyhowError;
use std::fmt;
use thiserror::Error;

/// Reserved name of the protocol-violation kind.
pub const INTERNAL_ERROR: &str = "InternalError";
/// Reserved name of the kind raised by an expired step timeout.
pub const TIMEOUT: &str = "Timeout";
/// Reserved name of the loop `break` signal.
pub const LOOP_BREAK: &str = "LoopBreak";
/// Reserved name of the loop `continue` signal.
pub const LOOP_CONTINUE: &str = "LoopContinue";
/// Kind used for foreign errors converted through `anyhow`.
pub const UNSPECIFIED_ERROR: &str = "UnspecifiedError";

/// What went wrong, as seen by error handlers.
///
/// `LoopBreak` and `LoopContinue` are control signals, not failures. They
/// carry the target loop label (`None` meaning the innermost loop) and are
/// only ever delivered to the loop machinery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
  Internal,
  Timeout,
  LoopBreak(Option<String>),
  LoopContinue(Option<String>),
  Domain(String),
}

impl ErrorKind {
  /// The string identifier of this kind.
  pub fn name(&self) -> &str {
    match self {
      ErrorKind::Internal => INTERNAL_ERROR,
      ErrorKind::Timeout => TIMEOUT,
      ErrorKind::LoopBreak(_) => LOOP_BREAK,
      ErrorKind::LoopContinue(_) => LOOP_CONTINUE,
      ErrorKind::Domain(name) => name,
    }
  }

  pub fn is_loop_control(&self) -> bool {
    matches!(self, ErrorKind::LoopBreak(_) | ErrorKind::LoopContinue(_))
  }
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ErrorKind::LoopBreak(Some(label)) | ErrorKind::LoopContinue(Some(label)) => {
        write!(f, "{}({})", self.name(), label)
      }
      _ => f.write_str(self.name()),
    }
  }
}

/// Builds a kind from its string name. Only `InternalError` and `Timeout`
/// map onto reserved variants; loop signals cannot be forged by name.
impl From<&str> for ErrorKind {
  fn from(name: &str) -> Self {
    match name {
      INTERNAL_ERROR => ErrorKind::Internal,
      TIMEOUT => ErrorKind::Timeout,
      other => ErrorKind::Domain(other.to_string()),
    }
  }
}

impl From<String> for ErrorKind {
  fn from(name: String) -> Self {
    ErrorKind::from(name.as_str())
  }
}

/// The single error type of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}{}", info_suffix(.info))]
pub struct StepError {
  pub kind: ErrorKind,
  pub info: Option<String>,
}

impl StepError {
  pub fn new(kind: impl Into<ErrorKind>) -> Self {
    Self {
      kind: kind.into(),
      info: None,
    }
  }

  pub fn with_info(kind: impl Into<ErrorKind>, info: impl Into<String>) -> Self {
    Self {
      kind: kind.into(),
      info: Some(info.into()),
    }
  }

  /// Protocol violation detected by the engine.
  pub fn internal(info: impl Into<String>) -> Self {
    Self::with_info(ErrorKind::Internal, info)
  }

  pub fn timeout() -> Self {
    Self::new(ErrorKind::Timeout)
  }

  pub(crate) fn loop_break(label: Option<&str>) -> Self {
    Self::new(ErrorKind::LoopBreak(label.map(str::to_string)))
  }

  pub(crate) fn loop_continue(label: Option<&str>) -> Self {
    Self::new(ErrorKind::LoopContinue(label.map(str::to_string)))
  }

  /// Shorthand for `self.kind.name()`.
  pub fn name(&self) -> &str {
    self.kind.name()
  }

  pub fn is_internal(&self) -> bool {
    self.kind == ErrorKind::Internal
  }
}

impl From<&str> for StepError {
  fn from(kind: &str) -> Self {
    StepError::new(kind)
  }
}

// Foreign failures propagated with `?` inside a step body.
impl From<AnyhowError> for StepError {
  fn from(err: AnyhowError) -> Self {
    if let Some(step_err) = err.downcast_ref::<StepError>() {
      return step_err.clone();
    }
    StepError::with_info(UNSPECIFIED_ERROR, format!("{err:#}"))
  }
}

fn info_suffix(info: &Option<String>) -> String {
  match info {
    Some(info) => format!(": {info}"),
    None => String::new(),
  }
}

pub type StepResult<T = (), E = StepError> = std::result::Result<T, E>;
