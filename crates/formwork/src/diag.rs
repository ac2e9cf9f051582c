//! Diagnostics sink for expression problems.
//!
//! Nothing in the engine surfaces a fatal error: malformed expressions are
//! replaced with constant-null programs and described here, so a front end
//! can render them (the CLI uses ariadne reports).

use std::ops::Range;

/// One recorded problem with an expression source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    /// The expression text the problem was found in.
    pub source: String,
    pub message: String,
    /// Byte range into `source`.
    pub span: Range<usize>,
}

#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        log::warn!(
            "expression error at {}..{} in {:?}: {}",
            diagnostic.span.start,
            diagnostic.span.end,
            diagnostic.source,
            diagnostic.message
        );
        self.entries.push(diagnostic);
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.entries)
    }
}
