// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! A lookup table of pipe managers by name, so a host application can
//! construct a pipeline without hard-coding every manager's concrete type.
//!
//! Every binary wires its own pipeline by hand; this is the natural
//! registration surface for going from a textual pipeline description to
//! actual `Arc<dyn UpipeMgr>` instances.

use std::collections::HashMap;
use std::sync::Arc;

use crate::upipe::UpipeMgr;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no manager registered under name {0:?}")]
    NotFound(String),
    #[error("a manager is already registered under name {0:?}")]
    AlreadyRegistered(String),
}

/// Registry of pipe managers, keyed by [`UpipeMgr::name`].
#[derive(Default)]
pub struct UpipeMgrRegistry {
    managers: HashMap<&'static str, Arc<dyn UpipeMgr>>,
}

impl UpipeMgrRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self { managers: HashMap::new() }
    }

    pub fn register(&mut self, mgr: Arc<dyn UpipeMgr>) -> Result<(), RegistryError> {
        let name = mgr.name();
        if self.managers.contains_key(name) {
            return Err(RegistryError::AlreadyRegistered(name.to_string()));
        }
        tracing::debug!(manager = name, "registered pipe manager");
        self.managers.insert(name, mgr);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn UpipeMgr>> {
        self.managers.get(name).cloned()
    }

    pub fn require(&self, name: &str) -> Result<Arc<dyn UpipeMgr>, RegistryError> {
        self.get(name).ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.managers.keys().copied().collect()
    }
}
