// src/worker/check.rs

use std::path::Path;

use csv::{ReaderBuilder, StringRecord};

/// Pass/fail verdict of a content check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckVerdict {
    pub passed: bool,
    pub reason: Option<String>,
}

impl CheckVerdict {
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Validates the content of a produced file.
pub trait ContentCheck {
    fn check(&self, path: &Path, expected_columns: Option<usize>) -> CheckVerdict;
}

/// Comma-delimited text with a header row.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvContentCheck;

impl ContentCheck for CsvContentCheck {
    fn check(&self, path: &Path, expected_columns: Option<usize>) -> CheckVerdict {
        let mut reader = match ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)
        {
            Ok(r) => r,
            Err(e) => return CheckVerdict::fail(format!("cannot open output: {e}")),
        };

        let mut header = StringRecord::new();
        match reader.read_record(&mut header) {
            Ok(false) => return CheckVerdict::fail("output is empty"),
            Ok(true) => {}
            Err(e) => return CheckVerdict::fail(format!("cannot read output: {e}")),
        }

        // Blank leading lines are skipped by the reader; the header must be
        // the first line.
        let first_line = header.position().is_none_or(|p| p.line() == 1);
        if !first_line || header.iter().all(|f| f.trim().is_empty()) {
            return CheckVerdict::fail("output has a blank header");
        }

        if let Some(expected) = expected_columns {
            let found = header.len();
            if found != expected {
                return CheckVerdict::fail(format!(
                    "expected {expected} columns, header has {found}"
                ));
            }
        }
        CheckVerdict::pass()
    }
}
