//! Shared script cache
//!
//! Instances of the same asset share one `LoadedScript`. A failed load is
//! retried once with `force` so a compiler can rebuild stale artifacts.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{LoadedScript, ScriptCompiler, ScriptSource};
use crate::capabilities::CapabilityTable;
use crate::errors::CompileError;

pub struct ScriptCache {
    compiler: Arc<dyn ScriptCompiler>,
    capabilities: Arc<CapabilityTable>,
    entries: Mutex<HashMap<String, Arc<LoadedScript>>>,
}

impl ScriptCache {
    pub fn new(compiler: Arc<dyn ScriptCompiler>, capabilities: Arc<CapabilityTable>) -> Self {
        Self {
            compiler,
            capabilities,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    pub fn get_or_load(&self, source: &ScriptSource) -> Result<Arc<LoadedScript>, CompileError> {
        if let Some(script) = self.entries.lock().get(&source.asset_id) {
            return Ok(script.clone());
        }

        let loaded = match self.load(source, false) {
            Ok(s) => s,
            Err(e) => {
                warn!(asset_id = %source.asset_id, error = %e, "load failed, retrying with force");
                self.load(source, true)?
            }
        };

        // Another thread may have loaded the same asset meanwhile; keep the first.
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(source.asset_id.clone())
            .or_insert_with(|| Arc::new(loaded));
        debug!(asset_id = %source.asset_id, "script loaded");
        Ok(entry.clone())
    }

    fn load(&self, source: &ScriptSource, force: bool) -> Result<LoadedScript, CompileError> {
        let compiled = self.compiler.compile(source, force)?;
        LoadedScript::load(compiled, &self.capabilities)
    }

    pub fn get(&self, asset_id: &str) -> Option<Arc<LoadedScript>> {
        self.entries.lock().get(asset_id).cloned()
    }

    /// Drop a cached script. Instances already holding it are unaffected.
    pub fn evict(&self, asset_id: &str) -> bool {
        self.entries.lock().remove(asset_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{CompiledScript, PrecompiledLoader};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails every non-forced compile
    struct StaleArtifacts {
        calls: AtomicUsize,
    }

    impl ScriptCompiler for StaleArtifacts {
        fn compile(
            &self,
            source: &ScriptSource,
            force: bool,
        ) -> Result<CompiledScript, CompileError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !force {
                return Err(CompileError::Failed {
                    asset_id: source.asset_id.clone(),
                    diagnostics: vec!["stale object file".into()],
                });
            }
            PrecompiledLoader.compile(source, force)
        }
    }

    const SRC: &str = r#"{"asset_id": "s", "states": ["default"]}"#;

    #[test]
    fn test_instances_share_script() {
        let cache = ScriptCache::new(
            Arc::new(PrecompiledLoader),
            Arc::new(CapabilityTable::new()),
        );
        let src = ScriptSource::new("s", SRC);
        let a = cache.get_or_load(&src).unwrap();
        let b = cache.get_or_load(&src).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_retry_with_force() {
        let compiler = Arc::new(StaleArtifacts {
            calls: AtomicUsize::new(0),
        });
        let cache = ScriptCache::new(compiler.clone(), Arc::new(CapabilityTable::new()));
        cache.get_or_load(&ScriptSource::new("s", SRC)).unwrap();
        assert_eq!(compiler.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failure_after_retry_is_reported() {
        let cache = ScriptCache::new(
            Arc::new(PrecompiledLoader),
            Arc::new(CapabilityTable::new()),
        );
        assert!(cache
            .get_or_load(&ScriptSource::new("broken", "not json"))
            .is_err());
        assert!(cache.is_empty());
    }
}
