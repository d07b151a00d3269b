//! Compiler configuration
//!
//! Bundles the knobs a single compilation needs: where to look for included
//! headers, and which stage's intermediate tree (if any) the driver should
//! dump instead of producing final assembly.

use std::path::PathBuf;

/// Which stage's output the driver prints instead of continuing to assembly.
/// Named after the CLI's debug-code argument (§6): `tokens`, `c-ast`,
/// `typed-ast`, `tac`, `assembly`, or `none` to emit the final `.s` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugStage {
    Tokens,
    CAst,
    TypedAst,
    Tac,
    Assembly,
    None,
}

impl DebugStage {
    /// Parses a CLI debug-code argument, matching the exact spellings §6
    /// names. Unknown spellings are the caller's problem to report as
    /// `ArgumentError::InvalidDebugCode`.
    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "tokens" => Some(DebugStage::Tokens),
            "c-ast" => Some(DebugStage::CAst),
            "typed-ast" => Some(DebugStage::TypedAst),
            "tac" => Some(DebugStage::Tac),
            "assembly" => Some(DebugStage::Assembly),
            "none" => Some(DebugStage::None),
            _ => None,
        }
    }
}

/// Baked-in standard library search paths tried before any CLI include
/// directory, per §6. Empty on non-POSIX targets since there's no
/// established convention there.
#[cfg(unix)]
pub fn standard_library_search_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("/usr/include"), PathBuf::from("/usr/local/include")]
}

#[cfg(not(unix))]
pub fn standard_library_search_paths() -> Vec<PathBuf> {
    Vec::new()
}

/// Per-compilation configuration threaded through the pipeline.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Include directories, in search order, following the standard library paths.
    pub include_dirs: Vec<PathBuf>,
    pub debug_stage: DebugStage,
}

impl CompilerConfig {
    pub fn new(include_dirs: Vec<PathBuf>, debug_stage: DebugStage) -> Self {
        CompilerConfig { include_dirs, debug_stage }
    }

    /// Standard library paths followed by this config's include directories,
    /// in the order the lexer should search them.
    pub fn search_paths(&self) -> Vec<PathBuf> {
        let mut paths = standard_library_search_paths();
        paths.extend(self.include_dirs.iter().cloned());
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_documented_debug_code() {
        assert_eq!(DebugStage::parse("tokens"), Some(DebugStage::Tokens));
        assert_eq!(DebugStage::parse("c-ast"), Some(DebugStage::CAst));
        assert_eq!(DebugStage::parse("typed-ast"), Some(DebugStage::TypedAst));
        assert_eq!(DebugStage::parse("tac"), Some(DebugStage::Tac));
        assert_eq!(DebugStage::parse("assembly"), Some(DebugStage::Assembly));
        assert_eq!(DebugStage::parse("none"), Some(DebugStage::None));
    }

    #[test]
    fn rejects_unknown_debug_code() {
        assert_eq!(DebugStage::parse("bogus"), None);
    }

    #[test]
    fn search_paths_put_cli_include_dirs_after_stdlib_paths() {
        let config = CompilerConfig::new(vec![PathBuf::from("/tmp/inc")], DebugStage::None);
        let paths = config.search_paths();
        assert_eq!(paths.last(), Some(&PathBuf::from("/tmp/inc")));
    }
}
