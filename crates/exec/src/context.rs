//! Session context threaded through every executor call

use crate::config::ExecConfig;
use crate::cursor::CursorLink;
use crate::error::{Error, Result};
use crate::transaction::TransactionManager;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

/// Named cursors of a session. Entries are weak; a closed cursor drops
/// out on its own even if it was never unregistered.
#[derive(Debug, Default)]
pub struct CursorRegistry {
    cursors: HashMap<String, Weak<CursorLink>>,
}

impl CursorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, link: &Arc<CursorLink>) -> Result<()> {
        if self.lookup(name).is_some() {
            return Err(Error::CursorNameInUse(name.to_string()));
        }
        self.cursors.insert(name.to_string(), Arc::downgrade(link));
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) {
        self.cursors.remove(name);
    }

    /// The live cursor registered under `name`
    pub fn lookup(&self, name: &str) -> Option<Arc<CursorLink>> {
        self.cursors.get(name).and_then(Weak::upgrade)
    }

    pub fn len(&self) -> usize {
        self.cursors.values().filter(|w| w.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-attachment state consulted by executors
#[derive(Debug)]
pub struct SessionContext {
    config: ExecConfig,
    transactions: Arc<dyn TransactionManager>,
    cursors: CursorRegistry,
    statement_timeout_ms: u32,
    role: Option<String>,
    attributes: BTreeMap<String, String>,
}

impl SessionContext {
    pub fn new(config: ExecConfig, transactions: Arc<dyn TransactionManager>) -> Self {
        Self {
            config,
            transactions,
            cursors: CursorRegistry::new(),
            statement_timeout_ms: 0,
            role: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    pub fn transaction_manager(&self) -> &Arc<dyn TransactionManager> {
        &self.transactions
    }

    pub fn cursors(&self) -> &CursorRegistry {
        &self.cursors
    }

    pub fn cursors_mut(&mut self) -> &mut CursorRegistry {
        &mut self.cursors
    }

    /// Session-level statement timeout (0 = none)
    pub fn statement_timeout_ms(&self) -> u32 {
        self.statement_timeout_ms
    }

    pub fn set_statement_timeout(&mut self, timeout_ms: u32) {
        self.statement_timeout_ms = timeout_ms;
    }

    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    pub fn set_role(&mut self, role: Option<String>) {
        self.role = role;
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Back to the state of a fresh attachment. Registered cursors are
    /// untouched; they belong to their executors.
    pub fn reset(&mut self) {
        self.statement_timeout_ms = 0;
        self.role = None;
        self.attributes.clear();
    }
}
