// Local View - what the client currently displays, bounded by an LRU
// Snapshots are explicit values so a failed mutation can put back exactly what it changed

use lru::LruCache;
use std::num::NonZeroUsize;

use crate::core::{EntityId, EntityState};

/// Displayed counters for one entity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityView {
    pub likes: i64,
    pub shares: i64,
    pub comments: i64,
    pub liked: bool,
}

impl From<EntityState> for EntityView {
    fn from(state: EntityState) -> Self {
        Self {
            likes: state.counters.likes,
            shares: state.counters.shares,
            comments: state.counters.comments,
            liked: state.liked_by_viewer,
        }
    }
}

/// The part of an `EntityView` one kind of mutation touches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewField {
    /// `likes` together with `liked`
    Likes,
    Shares,
    Comments,
}

/// Value of one field of one entity before an optimistic change.
///
/// `version` is the entity's overwrite generation at capture time; `None` means the entity
/// was not displayed, so there is nothing to put back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewSnapshot {
    pub entity_id: EntityId,
    pub field: ViewField,
    pub previous: Option<EntityView>,
    pub version: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    view: EntityView,
    /// Bumped on every authoritative overwrite
    version: u64,
}

pub struct LocalView {
    entities: LruCache<EntityId, Entry>,
    next_version: u64,
    unread: i64,
}

impl LocalView {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entities: LruCache::new(capacity),
            next_version: 0,
            unread: 0,
        }
    }

    pub fn peek(&self, entity_id: EntityId) -> Option<EntityView> {
        self.entities.peek(&entity_id).map(|entry| entry.view)
    }

    pub fn contains(&self, entity_id: EntityId) -> bool {
        self.entities.contains(&entity_id)
    }

    pub fn snapshot(&self, entity_id: EntityId, field: ViewField) -> ViewSnapshot {
        let entry = self.entities.peek(&entity_id);
        ViewSnapshot {
            entity_id,
            field,
            previous: entry.map(|entry| entry.view),
            version: entry.map(|entry| entry.version),
        }
    }

    /// Put back the snapshot's field, leaving every other field as it is now.
    ///
    /// Skipped when the entity was overwritten with server state after the snapshot was
    /// taken: that state already excludes the failed change. Returns whether anything was
    /// restored.
    pub fn restore(&mut self, snapshot: ViewSnapshot) -> bool {
        let (Some(previous), Some(version)) = (snapshot.previous, snapshot.version) else {
            return false;
        };
        let Some(entry) = self.entities.get_mut(&snapshot.entity_id) else {
            return false;
        };
        if entry.version != version {
            return false;
        }

        match snapshot.field {
            ViewField::Likes => {
                entry.view.likes = previous.likes;
                entry.view.liked = previous.liked;
            }
            ViewField::Shares => entry.view.shares = previous.shares,
            ViewField::Comments => entry.view.comments = previous.comments,
        }
        true
    }

    /// Edit a displayed entity in place and mark it recently used. Entities that are not
    /// displayed are left alone.
    pub fn update(&mut self, entity_id: EntityId, edit: impl FnOnce(&mut EntityView)) -> bool {
        match self.entities.get_mut(&entity_id) {
            Some(entry) => {
                edit(&mut entry.view);
                true
            }
            None => false,
        }
    }

    /// Replace the displayed entity with authoritative state
    pub fn overwrite(&mut self, entity_id: EntityId, view: EntityView) {
        self.next_version += 1;
        self.entities.put(
            entity_id,
            Entry {
                view,
                version: self.next_version,
            },
        );
    }

    pub fn forget(&mut self, entity_id: EntityId) -> Option<EntityView> {
        self.entities.pop(&entity_id).map(|entry| entry.view)
    }

    pub fn unread(&self) -> i64 {
        self.unread
    }

    pub fn set_unread(&mut self, unread: i64) {
        self.unread = unread.max(0);
    }

    /// Displayed entity ids, most recently used first
    pub fn tracked(&self) -> Vec<EntityId> {
        self.entities.iter().map(|(id, _)| *id).collect()
    }
}
