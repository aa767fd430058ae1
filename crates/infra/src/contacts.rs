//! Contact list provider.
//!
//! Ingestion and phone validation live elsewhere; the delivery pipeline only
//! reads the immutable (name, phone) pairs once, when a campaign is created.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use sendwave_campaigns::Contact;
use sendwave_core::{ContactListId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContactListError {
    #[error("contact list not found: {0}")]
    NotFound(ContactListId),
    #[error("contact list source unavailable: {0}")]
    Unavailable(String),
}

/// Source of contacts for campaign creation.
pub trait ContactListProvider: Send + Sync {
    /// Contacts of `list_id`, scoped to its owner.
    fn contacts(&self, user_id: UserId, list_id: ContactListId)
    -> Result<Vec<Contact>, ContactListError>;
}

impl<P: ContactListProvider + ?Sized> ContactListProvider for Arc<P> {
    fn contacts(
        &self,
        user_id: UserId,
        list_id: ContactListId,
    ) -> Result<Vec<Contact>, ContactListError> {
        (**self).contacts(user_id, list_id)
    }
}

/// In-memory contact lists keyed by owner and list id.
#[derive(Debug, Default)]
pub struct InMemoryContactLists {
    lists: RwLock<HashMap<(UserId, ContactListId), Vec<Contact>>>,
}

impl InMemoryContactLists {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Store (or replace) a list and return its id.
    pub fn register(
        &self,
        user_id: UserId,
        contacts: Vec<Contact>,
    ) -> Result<ContactListId, ContactListError> {
        let list_id = ContactListId::new();
        self.lists
            .write()
            .map_err(|_| ContactListError::Unavailable("contact list lock poisoned".into()))?
            .insert((user_id, list_id), contacts);
        Ok(list_id)
    }
}

impl ContactListProvider for InMemoryContactLists {
    fn contacts(
        &self,
        user_id: UserId,
        list_id: ContactListId,
    ) -> Result<Vec<Contact>, ContactListError> {
        self.lists
            .read()
            .map_err(|_| ContactListError::Unavailable("contact list lock poisoned".into()))?
            .get(&(user_id, list_id))
            .cloned()
            .ok_or(ContactListError::NotFound(list_id))
    }
}
