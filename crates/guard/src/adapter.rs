// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Scoped replacement of a host model loader
//!
//! A [`LoaderSlot`] is the host's single point of entry for loading models.
//! [`LoaderSlot::patch`] swaps in a [`GuardedLoader`] for as long as the
//! returned [`PatchGuard`] lives; dropping it restores whatever was there
//! before, also during unwinding.

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use runtime::Value;
use tracing::warn;

use crate::{Guard, GuardError, GuardResult};

/// Anything that turns a model file into a value
pub trait ModelLoader: Send + Sync {
    fn load(&self, path: &Path) -> GuardResult<Value>;
}

/// Routes loads through a [`Guard`], keeping the replaced loader as a
/// warn-mode fallback
pub struct GuardedLoader {
    guard: Arc<Guard>,
    fallback: Arc<dyn ModelLoader>,
}

impl GuardedLoader {
    pub fn new(guard: Arc<Guard>, fallback: Arc<dyn ModelLoader>) -> Self {
        Self { guard, fallback }
    }

    /// Only failures of the restricted load itself fall back. Policy and
    /// signature failures, and anything in enforce mode, are final.
    fn may_fall_back(&self, err: &GuardError) -> bool {
        !self.guard.policy().enforce
            && matches!(
                err,
                GuardError::Load { .. } | GuardError::UnsupportedFormat { .. }
            )
    }
}

impl ModelLoader for GuardedLoader {
    fn load(&self, path: &Path) -> GuardResult<Value> {
        match self.guard.load(path) {
            Err(err) if self.may_fall_back(&err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "guarded load failed, using original loader"
                );
                self.fallback.load(path)
            }
            result => result,
        }
    }
}

/// Holder of the loader currently in effect
pub struct LoaderSlot {
    current: RwLock<Arc<dyn ModelLoader>>,
}

impl LoaderSlot {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            current: RwLock::new(loader),
        }
    }

    pub fn current(&self) -> Arc<dyn ModelLoader> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn load(&self, path: &Path) -> GuardResult<Value> {
        self.current().load(path)
    }

    /// Install a [`GuardedLoader`] around the current loader until the
    /// returned guard is dropped.
    pub fn patch(&self, guard: Arc<Guard>) -> PatchGuard<'_> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let original = current.clone();
        *current = Arc::new(GuardedLoader::new(guard, original.clone()));
        PatchGuard {
            slot: self,
            original,
        }
    }
}

/// Restores the patched slot on drop
#[must_use = "the original loader is restored as soon as the guard is dropped"]
pub struct PatchGuard<'a> {
    slot: &'a LoaderSlot,
    original: Arc<dyn ModelLoader>,
}

impl Drop for PatchGuard<'_> {
    fn drop(&mut self) {
        let mut current = self
            .slot
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *current = self.original.clone();
    }
}
