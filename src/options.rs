/// Knobs for one compilation.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Report overflowing integer literals as errors instead of warnings.
    pub strict_literals: bool,
    /// Tokens that must be consumed after an error before the next one is
    /// reported.
    pub error_distance: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            strict_literals: false,
            error_distance: 3,
        }
    }
}
