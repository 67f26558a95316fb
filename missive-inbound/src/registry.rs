use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use missive_common::MailboxHandler;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A handler is already registered for this address.
    #[error("an inbox already exists with that username: {0}")]
    Duplicate(String),
}

/// Local mailboxes and the handlers receiving their mail.
///
/// Addresses are compared case-insensitively.
#[derive(Default)]
pub struct MailboxRegistry {
    mailboxes: DashMap<String, Arc<dyn MailboxHandler>>,
}

impl MailboxRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `local@domain`, returning the address it was stored under.
    pub fn register(
        &self,
        local: &str,
        domain: &str,
        handler: Arc<dyn MailboxHandler>,
    ) -> Result<String, RegistryError> {
        let address = format!("{local}@{domain}").to_lowercase();

        match self.mailboxes.entry(address.clone()) {
            Entry::Occupied(_) => Err(RegistryError::Duplicate(address)),
            Entry::Vacant(entry) => {
                entry.insert(handler);
                Ok(address)
            }
        }
    }

    pub fn get(&self, address: &str) -> Option<Arc<dyn MailboxHandler>> {
        self.mailboxes
            .get(&address.to_lowercase())
            .map(|handler| Arc::clone(handler.value()))
    }

    pub fn contains(&self, address: &str) -> bool {
        self.mailboxes.contains_key(&address.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.mailboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mailboxes.is_empty()
    }
}

impl std::fmt::Debug for MailboxRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set()
            .entries(self.mailboxes.iter().map(|entry| entry.key().clone()))
            .finish()
    }
}
