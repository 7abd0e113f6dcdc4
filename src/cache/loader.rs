//! SC-024: Artifact loader — resolve, rebuild, write back, memoize.
//!
//! One entry per artifact (keyed by store name). Each entry has its own lock,
//! so concurrent loads of the same artifact resolve and persist once.

use super::digest::fingerprint;
use super::store::ArtifactStore;
use super::trailer::{merge, resolve_text, ResolveOptions, Validation};
use crate::core::config::LoadPolicy;
use crate::core::error::{Result, ScriptError};
use crate::core::executable::Executable;
use crate::engine::Registry;
use dashmap::DashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
enum Entry {
    #[default]
    Unresolved,
    Resolved(Arc<Executable>),
    /// Dropped by `force_reload`; the next load reads the store again.
    Invalidated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Trailer was valid; nothing recompiled.
    Fresh,
    /// Recompiled from source; carries why.
    Rebuilt(Validation),
    /// Served from the loader's memo without touching the store.
    Memoized,
}

impl fmt::Display for LoadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fresh => write!(f, "fresh"),
            Self::Rebuilt(why) => write!(f, "rebuilt ({})", why),
            Self::Memoized => write!(f, "memoized"),
        }
    }
}

/// What one load did.
#[derive(Debug, Clone)]
pub struct LoadReport {
    pub artifact: String,
    pub outcome: LoadOutcome,
    pub executable: Arc<Executable>,
    /// A rebuilt artifact was written back.
    pub persisted: bool,
    /// Why a rebuilt artifact could not be written back.
    pub persist_error: Option<String>,
    /// BLAKE3 of the artifact text as last read or written; `None` when memoized.
    pub fingerprint: Option<String>,
}

pub struct Loader {
    registry: Arc<Registry>,
    policy: LoadPolicy,
    entries: DashMap<String, Arc<Mutex<Entry>>>,
}

impl Loader {
    /// Loader over `registry`, applying the policy's default engine.
    pub fn new(mut registry: Registry, policy: LoadPolicy) -> Result<Self> {
        if policy.force_recompile && !policy.recompile {
            return Err(ScriptError::Config(
                "force_recompile requires recompile: true".to_string(),
            ));
        }
        if policy.default_engine.is_some() {
            registry.set_default_engine(policy.default_engine.as_deref())?;
        }
        Ok(Self {
            registry: Arc::new(registry),
            policy,
            entries: DashMap::new(),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn policy(&self) -> &LoadPolicy {
        &self.policy
    }

    pub fn load(&self, store: &dyn ArtifactStore) -> Result<Arc<Executable>> {
        Ok(self.load_with_report(store)?.executable)
    }

    pub fn load_with_report(&self, store: &dyn ArtifactStore) -> Result<LoadReport> {
        let name = store.name().to_string();
        // clone the slot out so the map shard is not held while resolving
        let slot = self.entries.entry(name.clone()).or_default().clone();
        let mut entry = slot.lock().unwrap_or_else(|e| e.into_inner());

        match &*entry {
            Entry::Resolved(executable) => {
                return Ok(LoadReport {
                    artifact: name,
                    outcome: LoadOutcome::Memoized,
                    executable: executable.clone(),
                    persisted: false,
                    persist_error: None,
                    fingerprint: None,
                });
            }
            Entry::Invalidated => log::debug!("{}: reloading after invalidation", name),
            Entry::Unresolved => {}
        }

        let report = self.resolve(&name, store)?;
        *entry = Entry::Resolved(report.executable.clone());
        Ok(report)
    }

    fn resolve(&self, name: &str, store: &dyn ArtifactStore) -> Result<LoadReport> {
        let text = store.load()?;
        let options = ResolveOptions {
            recompile: self.policy.recompile,
            force: self.policy.force_recompile,
        };
        let resolved = resolve_text(name, &text, &self.registry, options)?;
        let Some(executable) = resolved.executable else {
            return Err(ScriptError::Stale {
                artifact: name.to_string(),
                state: resolved.validation.to_string(),
            });
        };

        if !resolved.rebuilt {
            return Ok(LoadReport {
                artifact: name.to_string(),
                outcome: LoadOutcome::Fresh,
                executable: Arc::new(executable),
                persisted: false,
                persist_error: None,
                fingerprint: Some(fingerprint(&text)),
            });
        }

        let mut report = LoadReport {
            artifact: name.to_string(),
            outcome: LoadOutcome::Rebuilt(resolved.validation),
            executable: Arc::new(executable),
            persisted: false,
            persist_error: None,
            fingerprint: Some(fingerprint(&text)),
        };
        if !self.policy.write_back {
            return Ok(report);
        }

        match self.write_back(store, &text, &resolved.code, &report.executable) {
            Ok(Some(merged)) => {
                report.persisted = true;
                report.fingerprint = Some(fingerprint(&merged));
            }
            Ok(None) => {}
            Err(e) => {
                log::warn!(
                    "compiled data of '{}' is out-of-date or improperly altered; unable to write the result back: {}",
                    name,
                    e
                );
                report.persist_error = Some(e.to_string());
            }
        }
        Ok(report)
    }

    /// Merge and save; `None` when the merged text equals what is stored.
    fn write_back(
        &self,
        store: &dyn ArtifactStore,
        current: &str,
        code: &str,
        executable: &Executable,
    ) -> Result<Option<String>> {
        let merged = merge(code, executable)?;
        if merged == current {
            return Ok(None);
        }
        if !store.is_writable() {
            return Err(ScriptError::Persist {
                artifact: store.name().to_string(),
                message: "store is read-only".to_string(),
            });
        }
        store.save(&merged)?;
        log::info!("{}: compiled data refreshed", store.name());
        Ok(Some(merged))
    }

    /// Drop the memoized executable for `name`. Returns whether one existed.
    pub fn force_reload(&self, name: &str) -> bool {
        let Some(slot) = self.entries.get(name).map(|s| s.clone()) else {
            return false;
        };
        let mut entry = slot.lock().unwrap_or_else(|e| e.into_inner());
        let was_resolved = matches!(*entry, Entry::Resolved(_));
        *entry = Entry::Invalidated;
        was_resolved
    }

    /// Remove every trace of `name`. Returns whether it was tracked.
    pub fn forget(&self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    pub fn tracked(&self) -> usize {
        self.entries.len()
    }

    pub fn is_resolved(&self, name: &str) -> bool {
        self.entries.get(name).is_some_and(|slot| {
            matches!(
                *slot.lock().unwrap_or_else(|e| e.into_inner()),
                Entry::Resolved(_)
            )
        })
    }
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("registry", &self.registry)
            .field("policy", &self.policy)
            .field("entries", &self.tracked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::{FileStore, MemoryStore};
    use crate::cache::trailer::extract;
    use crate::core::types::Value;

    const TWICE: &str = "// @RPN:\n// { function (n:Integer):Integer }\nn 2 *\n";

    fn loader(policy: LoadPolicy) -> Loader {
        Loader::new(Registry::with_builtins(), policy).unwrap()
    }

    #[test]
    fn test_sc024_rebuild_then_fresh_then_memoized() {
        let store = MemoryStore::new("twice.rpn", TWICE);
        let first = loader(LoadPolicy::default()).load_with_report(&store).unwrap();
        assert_eq!(first.outcome, LoadOutcome::Rebuilt(Validation::NoTrailer));
        assert!(first.persisted);
        assert_eq!(store.saves(), 1);
        assert_eq!(first.executable.run(&[Value::Int(21)]).unwrap(), Value::Int(42));

        let l = loader(LoadPolicy::default());
        let second = l.load_with_report(&store).unwrap();
        assert_eq!(second.outcome, LoadOutcome::Fresh);
        assert_eq!(second.fingerprint, Some(fingerprint(&store.text())));
        let third = l.load_with_report(&store).unwrap();
        assert_eq!(third.outcome, LoadOutcome::Memoized);
        assert!(Arc::ptr_eq(&second.executable, &third.executable));
        assert_eq!(store.saves(), 1);
    }

    #[test]
    fn test_sc024_stale_without_recompile_is_refused() {
        let store = MemoryStore::new("twice.rpn", TWICE);
        let l = loader(LoadPolicy {
            recompile: false,
            ..LoadPolicy::default()
        });
        let err = l.load(&store).unwrap_err();
        assert!(matches!(err, ScriptError::Stale { .. }));
        assert!(err.is_cache_condition());
        assert!(!l.is_resolved("twice.rpn"));
    }

    #[test]
    fn test_sc024_read_only_store_reports_persist_failure() {
        let store = MemoryStore::read_only("ro.rpn", TWICE);
        let report = loader(LoadPolicy::default()).load_with_report(&store).unwrap();
        assert!(!report.persisted);
        assert!(report.persist_error.unwrap().contains("read-only"));
        assert_eq!(store.text(), TWICE);
        assert_eq!(report.executable.run(&[Value::Int(4)]).unwrap(), Value::Int(8));
    }

    #[test]
    fn test_sc024_write_back_disabled() {
        let store = MemoryStore::new("twice.rpn", TWICE);
        let report = loader(LoadPolicy {
            write_back: false,
            ..LoadPolicy::default()
        })
        .load_with_report(&store)
        .unwrap();
        assert!(matches!(report.outcome, LoadOutcome::Rebuilt(_)));
        assert!(report.persist_error.is_none());
        assert_eq!(store.saves(), 0);
    }

    #[test]
    fn test_sc024_force_reload_rereads_store() {
        let store = MemoryStore::new("twice.rpn", TWICE);
        let l = loader(LoadPolicy::default());
        l.load(&store).unwrap();
        assert!(l.is_resolved("twice.rpn"));
        assert!(l.force_reload("twice.rpn"));
        assert!(!l.is_resolved("twice.rpn"));
        assert!(!l.force_reload("other.rpn"));

        store.save(&store.text().replacen("n 2 *", "n 3 *", 1)).unwrap();
        let report = l.load_with_report(&store).unwrap();
        assert_eq!(report.outcome, LoadOutcome::Rebuilt(Validation::StaleSource));
        assert_eq!(report.executable.run(&[Value::Int(2)]).unwrap(), Value::Int(6));
    }

    #[test]
    fn test_sc024_forget_drops_the_entry() {
        let store = MemoryStore::new("twice.rpn", TWICE);
        let l = loader(LoadPolicy::default());
        l.load(&store).unwrap();
        l.force_reload("twice.rpn");
        assert_eq!(l.tracked(), 1);

        assert!(l.forget("twice.rpn"));
        assert_eq!(l.tracked(), 0);
        assert!(!l.forget("twice.rpn"));

        let report = l.load_with_report(&store).unwrap();
        assert_eq!(report.outcome, LoadOutcome::Fresh);
        assert_eq!(l.tracked(), 1);
    }

    #[test]
    fn test_sc024_force_recompile_keeps_identical_text() {
        let store = MemoryStore::new("twice.rpn", TWICE);
        loader(LoadPolicy::default()).load(&store).unwrap();
        let report = loader(LoadPolicy {
            force_recompile: true,
            ..LoadPolicy::default()
        })
        .load_with_report(&store)
        .unwrap();
        assert_eq!(report.outcome, LoadOutcome::Rebuilt(Validation::Fresh));
        assert!(!report.persisted);
        assert_eq!(store.saves(), 1);
    }

    #[test]
    fn test_sc024_inconsistent_policy_rejected() {
        let policy = LoadPolicy {
            recompile: false,
            force_recompile: true,
            ..LoadPolicy::default()
        };
        assert!(Loader::new(Registry::with_builtins(), policy).is_err());
        let policy = LoadPolicy {
            default_engine: Some("Lua".to_string()),
            ..LoadPolicy::default()
        };
        assert!(Loader::new(Registry::with_builtins(), policy).is_err());
    }

    #[test]
    fn test_sc024_default_engine_from_policy() {
        let store = MemoryStore::new("plain.rpn", "// { script }\n40 2 +\n");
        let l = loader(LoadPolicy {
            default_engine: Some("RPN".to_string()),
            ..LoadPolicy::default()
        });
        assert_eq!(l.load(&store).unwrap().run(&[]).unwrap(), Value::Int(42));
    }

    #[test]
    fn test_sc024_concurrent_loads_persist_once() {
        let store = MemoryStore::new("twice.rpn", TWICE);
        let l = loader(LoadPolicy::default());
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    let exec = l.load(&store).unwrap();
                    assert_eq!(exec.run(&[Value::Int(1)]).unwrap(), Value::Int(2));
                });
            }
        });
        assert_eq!(store.saves(), 1);
    }

    #[test]
    fn test_sc024_file_store_is_refreshed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("twice.rpn");
        std::fs::write(&path, TWICE).unwrap();
        let store = FileStore::new(&path);
        loader(LoadPolicy::default()).load(&store).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with(TWICE));
        assert!(extract(&written, &Registry::with_builtins()).validation.is_fresh());
    }
}
