//! Script front ends
//!
//! The engine never parses script source itself. A `ScriptCompiler` turns a
//! source asset into a `CompiledScript`; `PrecompiledLoader` accepts scripts
//! that were already lowered to their JSON form.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::CompiledScript;
use crate::errors::CompileError;

/// Source text of a script asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptSource {
    pub asset_id: String,
    pub text: String,
}

impl ScriptSource {
    pub fn new(asset_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
            text: text.into(),
        }
    }

    /// Read a source file. The file stem becomes the asset id.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let asset_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { asset_id, text })
    }
}

pub trait ScriptCompiler: Send + Sync {
    /// Compile `source`. With `force` set, any intermediate artifacts the
    /// compiler keeps must be ignored and rebuilt.
    fn compile(&self, source: &ScriptSource, force: bool) -> Result<CompiledScript, CompileError>;
}

/// Loads scripts already in compiled JSON form
#[derive(Debug, Clone, Copy, Default)]
pub struct PrecompiledLoader;

impl ScriptCompiler for PrecompiledLoader {
    fn compile(&self, source: &ScriptSource, _force: bool) -> Result<CompiledScript, CompileError> {
        let mut compiled: CompiledScript =
            serde_json::from_str(&source.text).map_err(|e| CompileError::Failed {
                asset_id: source.asset_id.clone(),
                diagnostics: vec![format!("line {} column {}: {}", e.line(), e.column(), e)],
            })?;
        if compiled.asset_id.is_empty() {
            compiled.asset_id = source.asset_id.clone();
        }
        Ok(compiled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precompiled_fills_asset_id() {
        let src = ScriptSource::new("from-source", r#"{"asset_id": "", "states": ["default"]}"#);
        let compiled = PrecompiledLoader.compile(&src, false).unwrap();
        assert_eq!(compiled.asset_id, "from-source");
    }

    #[test]
    fn test_precompiled_reports_position() {
        let src = ScriptSource::new("bad", "{\n  \"states\": [");
        let CompileError::Failed { diagnostics, .. } =
            PrecompiledLoader.compile(&src, false).unwrap_err()
        else {
            panic!("expected a compile failure");
        };
        assert!(diagnostics[0].starts_with("line 2"));
    }
}
