use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Where in the template text an error points to.
///
/// `line` and `column` are 1-based, `column` counts characters; `pos` is the
/// byte offset into the template text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TemplateLocation {
    pub line: usize,
    pub column: usize,
    pub pos: usize,
}

impl TemplateLocation {
    /// Computes the line/column of a byte offset in `text`.
    ///
    /// Offsets past the end are clamped to the end of the text.
    pub fn of(text: &str, pos: usize) -> Self {
        let mut pos = pos.min(text.len());
        while !text.is_char_boundary(pos) {
            pos -= 1;
        }
        let before = &text[..pos];
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let column = text[line_start..pos].chars().count() + 1;
        Self { line, column, pos }
    }
}

impl fmt::Display for TemplateLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Syntax Error at {location}: {message}{}", expected_suffix(.expected))]
    Syntax {
        message: String,
        location: TemplateLocation,
        expected: Vec<String>,
    },
    #[error("Semantic Error at {location}: {message}")]
    Semantic {
        message: String,
        location: TemplateLocation,
    },
    #[error("Compile Error {}: {message}", compile_origin(.location, .generated_line))]
    Compile {
        message: String,
        generated_source: String,
        generated_line: Option<usize>,
        location: Option<TemplateLocation>,
        has_incorrect_line_numbers: bool,
    },
    #[error("Render Error {}: {message}", render_origin(.location))]
    Render {
        message: String,
        generated_line: Option<usize>,
        location: Option<TemplateLocation>,
        has_incorrect_line_numbers: bool,
    },
    #[error("Serialization Error: {0}")]
    Serialization(String),
    #[error("Template Load Error: {0}")]
    Load(String),
    #[error("Internal Error: {0}")]
    Internal(String),
}

impl TemplateError {
    /// The template location the error was traced back to, if any.
    pub fn location(&self) -> Option<TemplateLocation> {
        match self {
            TemplateError::Syntax { location, .. } | TemplateError::Semantic { location, .. } => {
                Some(*location)
            }
            TemplateError::Compile { location, .. } | TemplateError::Render { location, .. } => {
                *location
            }
            _ => None,
        }
    }

    /// True when the error comes from a backend that could not report
    /// generated-source line numbers.
    pub fn has_incorrect_line_numbers(&self) -> bool {
        match self {
            TemplateError::Compile {
                has_incorrect_line_numbers,
                ..
            }
            | TemplateError::Render {
                has_incorrect_line_numbers,
                ..
            } => *has_incorrect_line_numbers,
            _ => false,
        }
    }
}

fn expected_suffix(expected: &[String]) -> String {
    if expected.is_empty() {
        String::new()
    } else {
        format!(" (expected one of: {})", expected.join(", "))
    }
}

fn compile_origin(location: &Option<TemplateLocation>, generated_line: &Option<usize>) -> String {
    match (location, generated_line) {
        (Some(loc), _) => format!("caused by template line {}", loc.line),
        (None, Some(line)) => format!(
            "in generated source line {} (template line number unavailable)",
            line
        ),
        (None, None) => "in generated source".to_string(),
    }
}

fn render_origin(location: &Option<TemplateLocation>) -> String {
    match location {
        Some(loc) => format!("at template line {}", loc.line),
        None => "in template".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, TemplateError>;

impl serde::ser::Error for TemplateError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        TemplateError::Serialization(msg.to_string())
    }
}
