//! Reporting: what the stages trace, and how errors reach the user.

use serde::Serialize;

use crate::compiler::{CompilerError, CompilerErrorDisplay};

pub mod config;

/// A compiler error in the shape written by `--json-errors`.
#[derive(Debug, PartialEq, Serialize)]
pub struct JsonDiagnostic {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub kind: String,
    pub message: String,
}

impl JsonDiagnostic {
    pub fn from_error<IE: CompilerErrorDisplay>(error: &CompilerError<IE>) -> JsonDiagnostic {
        let location = error.location();
        JsonDiagnostic {
            file: location.file.clone(),
            line: location.line,
            column: location.column,
            kind: error.kind().to_string(),
            message: error.inner_ref().format(),
        }
    }

    pub fn to_json(&self) -> crate::result::Result<String> {
        serde_json::to_string(self).map_err(|e| format!("{}", e))
    }
}
