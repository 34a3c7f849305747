/// A compile-time diagnostic with source location.
///
/// `line` is 1-based and `col` is 0-based, both taken from the lookahead
/// token at the point of detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>, line: usize, col: usize) -> Self {
        Diagnostic {
            message: message.into(),
            line,
            col,
        }
    }
}

impl std::fmt::Display for Diagnostic {
    /// Formats as `line L col C: message`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {} col {}: {}", self.line, self.col, self.message)
    }
}

/// Error sink for one compilation.
///
/// Reporting is throttled: after an error, further errors are dropped until
/// `min_distance` tokens have been consumed. Every report, kept or dropped,
/// restarts the count.
#[derive(Debug)]
pub struct Diagnostics {
    errors: Vec<Diagnostic>,
    warnings: Vec<Diagnostic>,
    distance: usize,
    min_distance: usize,
}

impl Diagnostics {
    pub fn new(min_distance: usize) -> Self {
        Diagnostics {
            errors: Vec::new(),
            warnings: Vec::new(),
            distance: min_distance,
            min_distance,
        }
    }

    /// Called once per consumed token.
    pub fn token_consumed(&mut self) {
        self.distance = self.distance.saturating_add(1);
    }

    /// Restarts the distance count without reporting anything.
    pub fn resync(&mut self) {
        self.distance = 0;
    }

    /// Reports an error subject to the distance throttle.
    ///
    /// Returns whether the error was recorded.
    pub fn error(&mut self, message: impl Into<String>, line: usize, col: usize) -> bool {
        let kept = self.distance >= self.min_distance;
        if kept {
            self.errors.push(Diagnostic::new(message, line, col));
        }
        self.distance = 0;
        kept
    }

    /// Records an error unconditionally, leaving the throttle untouched.
    pub fn error_unthrottled(&mut self, diagnostic: Diagnostic) {
        self.errors.push(diagnostic);
    }

    pub fn warning(&mut self, diagnostic: Diagnostic) {
        self.warnings.push(diagnostic);
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn into_parts(self) -> (Vec<Diagnostic>, Vec<Diagnostic>) {
        (self.errors, self.warnings)
    }
}
