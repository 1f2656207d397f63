//! Handle registry.
//!
//! Handles are small non-zero integers standing in for contact, list and
//! group names. Each handle type has its own [`HandleRepo`]; a repo maps names
//! to handles 1:1 for the lifetime of the process and counts the references
//! held by live channels.
//!
//! Repos are shared by every channel of a connection, so all methods take
//! `&self`. The bridge is single-threaded, which makes `RefCell` sufficient.

use std::{cell::RefCell, collections::HashMap, fmt, num::NonZeroU32};

use crate::error::ChannelError;

/// Name of the only contact list the bridge exposes.
pub const SUBSCRIBE_LIST: &str = "subscribe";

/// Opaque, non-zero identifier for a contact, list or group name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(NonZeroU32);

impl Handle {
    /// Wrap a raw handle value. `None` for the reserved value 0.
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    /// Raw handle value as seen on the wire.
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of entity a handle names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum HandleType {
    /// No handle; used for anonymous channels.
    None = 0,
    /// A contact on the account's roster or in a conversation.
    Contact = 1,
    /// A multi-user chat room.
    Room = 2,
    /// A server-side contact list such as `subscribe`.
    List = 3,
    /// A user-defined roster group.
    Group = 4,
}

#[derive(Debug)]
struct Entry {
    name: String,
    refs: u32,
}

#[derive(Debug, Default)]
struct RepoInner {
    by_name: HashMap<String, Handle>,
    /// Indexed by `handle - 1`. Entries are never removed.
    entries: Vec<Entry>,
}

/// Interning table for one handle type.
#[derive(Debug)]
pub struct HandleRepo {
    handle_type: HandleType,
    inner: RefCell<RepoInner>,
}

impl HandleRepo {
    /// Create an empty repo for `handle_type`.
    pub fn new(handle_type: HandleType) -> Self {
        Self { handle_type, inner: RefCell::new(RepoInner::default()) }
    }

    /// Handle type this repo hands out.
    pub fn handle_type(&self) -> HandleType {
        self.handle_type
    }

    /// Handle for `name`, allocating one if the name was never seen.
    ///
    /// The returned handle is not referenced; callers that keep it must call
    /// [`HandleRepo::ref_handle`].
    pub fn ensure(&self, name: &str) -> Handle {
        if let Some(handle) = self.lookup(name) {
            return handle;
        }

        let mut inner = self.inner.borrow_mut();
        let raw = u32::try_from(inner.entries.len() + 1).unwrap_or(u32::MAX);
        let Some(handle) = Handle::new(raw) else {
            unreachable!("invariant: handle index starts at 1");
        };
        inner.entries.push(Entry { name: name.to_owned(), refs: 0 });
        inner.by_name.insert(name.to_owned(), handle);
        handle
    }

    /// Handle for `name`. `None` if the name was never interned.
    pub fn lookup(&self, name: &str) -> Option<Handle> {
        self.inner.borrow().by_name.get(name).copied()
    }

    /// Name behind `handle`. `None` if the handle was never allocated here.
    pub fn inspect(&self, handle: Handle) -> Option<String> {
        self.inner.borrow().entries.get(Self::index(handle)).map(|e| e.name.clone())
    }

    /// Name behind `handle`, or [`ChannelError::UnknownHandle`].
    pub fn resolve(&self, handle: Handle) -> Result<String, ChannelError> {
        self.inspect(handle).ok_or(ChannelError::UnknownHandle(handle.get()))
    }

    /// Check that `handle` was allocated by this repo.
    pub fn is_valid(&self, handle: Handle) -> bool {
        Self::index(handle) < self.inner.borrow().entries.len()
    }

    /// Take a reference on `handle`.
    pub fn ref_handle(&self, handle: Handle) -> Result<(), ChannelError> {
        let mut inner = self.inner.borrow_mut();
        let entry = inner
            .entries
            .get_mut(Self::index(handle))
            .ok_or(ChannelError::UnknownHandle(handle.get()))?;
        entry.refs += 1;
        Ok(())
    }

    /// Release a reference on `handle`.
    ///
    /// The name mapping survives the last release; handles are stable for
    /// the lifetime of the process.
    pub fn unref_handle(&self, handle: Handle) {
        let mut inner = self.inner.borrow_mut();
        match inner.entries.get_mut(Self::index(handle)) {
            Some(entry) if entry.refs > 0 => entry.refs -= 1,
            Some(entry) => {
                tracing::warn!(handle = %handle, name = %entry.name, "unbalanced handle unref");
            },
            None => tracing::warn!(handle = %handle, "unref of unknown handle"),
        }
    }

    /// Number of live references on `handle`. 0 for unknown handles.
    pub fn ref_count(&self, handle: Handle) -> u32 {
        self.inner.borrow().entries.get(Self::index(handle)).map_or(0, |e| e.refs)
    }

    /// Sum of live references across every handle in this repo.
    pub fn total_refs(&self) -> u64 {
        self.inner.borrow().entries.iter().map(|e| u64::from(e.refs)).sum()
    }

    /// Number of allocated handles.
    pub fn len(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    /// Check if no handle has been allocated.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn index(handle: Handle) -> usize {
        handle.get() as usize - 1
    }
}

/// The handle repos of one connection.
#[derive(Debug)]
pub struct Handles {
    contacts: HandleRepo,
    lists: HandleRepo,
    groups: HandleRepo,
    self_handle: Handle,
    subscribe: Handle,
}

impl Handles {
    /// Create the repos for a connection whose own contact is `self_id`.
    ///
    /// The self handle and the `subscribe` list handle are allocated up
    /// front and referenced for the lifetime of the connection.
    pub fn new(self_id: &str) -> Self {
        let contacts = HandleRepo::new(HandleType::Contact);
        let lists = HandleRepo::new(HandleType::List);
        let groups = HandleRepo::new(HandleType::Group);

        let self_handle = contacts.ensure(self_id);
        let subscribe = lists.ensure(SUBSCRIBE_LIST);
        // Freshly allocated above, so these cannot fail.
        let _ = contacts.ref_handle(self_handle);
        let _ = lists.ref_handle(subscribe);

        Self { contacts, lists, groups, self_handle, subscribe }
    }

    /// Contact handle repo.
    pub fn contacts(&self) -> &HandleRepo {
        &self.contacts
    }

    /// Contact list handle repo.
    pub fn lists(&self) -> &HandleRepo {
        &self.lists
    }

    /// Roster group handle repo.
    pub fn groups(&self) -> &HandleRepo {
        &self.groups
    }

    /// Repo for `handle_type`. `None` for types without a repo.
    pub fn repo(&self, handle_type: HandleType) -> Option<&HandleRepo> {
        match handle_type {
            HandleType::Contact => Some(&self.contacts),
            HandleType::List => Some(&self.lists),
            HandleType::Group => Some(&self.groups),
            HandleType::None | HandleType::Room => None,
        }
    }

    /// Handle of the connection's own contact.
    pub fn self_handle(&self) -> Handle {
        self.self_handle
    }

    /// Handle of the `subscribe` contact list.
    pub fn subscribe_list(&self) -> Handle {
        self.subscribe
    }
}
