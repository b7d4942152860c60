use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid compiler options: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("compile_threshold must be at least 1")]
    ZeroThreshold,
}

/// Options controlling binding, lowering and backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerOptions {
    /// Value of `__name__` in the compiled module.
    pub module_name: SmolStr,
    /// Value of `__file__`, also used in tracebacks.
    pub filename: SmolStr,
    /// Fold literal-only expressions at lowering time.
    pub optimize: bool,
    /// Allow code objects to start on the light instruction path.
    pub interpret: bool,
    /// Invocations after which a light code object is served by its compiled delegate.
    pub compile_threshold: u32,
    /// Emit line-number updates before statements that can raise.
    pub line_tracking: bool,
    /// Warm class-body delegates on a background thread.
    pub background_class_compile: bool,
    /// Light code larger than this goes straight to the compiled path.
    pub max_light_instructions: usize,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            module_name: SmolStr::new_static("__main__"),
            filename: SmolStr::new_static("<string>"),
            optimize: true,
            interpret: true,
            compile_threshold: 2,
            line_tracking: true,
            background_class_compile: true,
            max_light_instructions: 4096,
        }
    }
}

impl CompilerOptions {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let options: CompilerOptions = toml::from_str(s)?;
        if options.compile_threshold == 0 {
            return Err(ConfigError::ZeroThreshold);
        }
        Ok(options)
    }

    pub fn with_module_name(mut self, module_name: impl Into<SmolStr>) -> Self {
        self.module_name = module_name.into();
        self
    }

    pub fn with_interpret(mut self, interpret: bool) -> Self {
        self.interpret = interpret;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_empty_toml_uses_defaults() {
        assert_eq!(CompilerOptions::from_toml_str("").unwrap(), CompilerOptions::default());
    }

    #[rstest]
    #[case::threshold("compile_threshold = 8", |o: &CompilerOptions| o.compile_threshold == 8)]
    #[case::interpret("interpret = false", |o: &CompilerOptions| !o.interpret)]
    #[case::module_name("module_name = \"pkg.mod\"", |o: &CompilerOptions| o.module_name == "pkg.mod")]
    #[case::line_tracking("line_tracking = false", |o: &CompilerOptions| !o.line_tracking)]
    fn test_from_toml_str(#[case] input: &str, #[case] check: fn(&CompilerOptions) -> bool) {
        let options = CompilerOptions::from_toml_str(input).unwrap();
        assert!(check(&options));
        assert!(options.optimize);
    }

    #[rstest]
    #[case::zero_threshold("compile_threshold = 0")]
    #[case::wrong_type("optimize = \"yes\"")]
    fn test_from_toml_str_rejects(#[case] input: &str) {
        assert!(CompilerOptions::from_toml_str(input).is_err());
    }
}
