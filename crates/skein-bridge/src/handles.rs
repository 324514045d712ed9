//! Handle registry for host objects referenced from scripts
//!
//! Scripts never hold host objects directly. They hold [`HandleToken`]s that
//! this registry maps back to the object. Tokens carry a generation counter,
//! so a token whose slot was released and reused never resolves to the new
//! occupant, and a type tag, so a token can only resolve as the class it was
//! issued for.

use std::rc::Rc;

use rustc_hash::FxHashMap;
use skein_sdk::HandleToken;

use crate::error::{BridgeError, BridgeResult};
use crate::host::HostObject;
use crate::surface::StaticSurface;

/// Tag for handles that are not bound to a forwarded type
pub const UNTYPED_TAG: u32 = 0;

/// What a live handle refers to
#[derive(Debug, Clone)]
pub enum HandleEntry {
    /// Host object instance
    Object(HostObject),
    /// Static surface of a forwarded type
    Surface(Rc<StaticSurface>),
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    tag: u32,
    entry: Option<HandleEntry>,
}

/// Generational arena mapping tokens to host objects.
///
/// Token ids pack `generation << 32 | slot index`. Generations start at 1,
/// so no live token ever has id 0.
#[derive(Debug, Default)]
pub struct HandleRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    limit: Option<usize>,
    /// Token issued for each live object, keyed by object address
    objects: FxHashMap<usize, HandleToken>,
}

impl HandleRegistry {
    /// Create an empty, unbounded registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry that refuses to hold more than `limit` live handles
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Issue a token for `entry` under `tag`
    pub fn alloc(&mut self, entry: HandleEntry, tag: u32) -> BridgeResult<HandleToken> {
        if let Some(limit) = self.limit {
            if self.live >= limit {
                return Err(BridgeError::HandleLimit(limit));
            }
        }

        let object = match &entry {
            HandleEntry::Object(obj) => Some(obj.addr()),
            HandleEntry::Surface(_) => None,
        };
        let index = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.tag = tag;
                slot.entry = Some(entry);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 1,
                    tag,
                    entry: Some(entry),
                });
                (self.slots.len() - 1) as u32
            }
        };
        self.live += 1;

        let generation = self.slots[index as usize].generation;
        let token = HandleToken::new(pack(generation, index), tag);
        if let Some(addr) = object {
            self.objects.insert(addr, token);
        }
        Ok(token)
    }

    /// Live token already issued for `obj`, if any
    pub fn token_of(&self, obj: &HostObject) -> Option<HandleToken> {
        let token = *self.objects.get(&obj.addr())?;
        match self.get(token) {
            Ok(HandleEntry::Object(live)) if live.ptr_eq(obj) => Some(token),
            _ => None,
        }
    }

    /// Look up the entry for `token`
    pub fn get(&self, token: HandleToken) -> BridgeResult<&HandleEntry> {
        let (generation, index) = unpack(token.id);
        self.slots
            .get(index as usize)
            .filter(|slot| slot.generation == generation && slot.tag == token.tag)
            .and_then(|slot| slot.entry.as_ref())
            .ok_or(BridgeError::UnresolvedHandle { token })
    }

    /// Look up and clone the entry for `token`.
    ///
    /// The registry is not borrowed afterwards, so the caller may run host
    /// code that allocates further handles.
    pub fn resolve(&self, token: HandleToken) -> BridgeResult<HandleEntry> {
        self.get(token).cloned()
    }

    /// Release one handle. The token and every copy of it stop resolving.
    pub fn release(&mut self, token: HandleToken) -> BridgeResult<HandleEntry> {
        self.get(token)?;
        let (_, index) = unpack(token.id);
        let slot = &mut self.slots[index as usize];
        let entry = slot.entry.take().ok_or(BridgeError::UnresolvedHandle { token })?;
        slot.generation = slot.generation.wrapping_add(1).max(1);
        self.free.push(index);
        self.live -= 1;
        if let HandleEntry::Object(obj) = &entry {
            if self.objects.get(&obj.addr()) == Some(&token) {
                self.objects.remove(&obj.addr());
            }
        }
        Ok(entry)
    }

    /// Release every live handle, returning how many were released
    pub fn release_all(&mut self) -> usize {
        let released = self.live;
        self.free.clear();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.entry.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1).max(1);
            }
            self.free.push(index as u32);
        }
        // Lowest indices are reused first
        self.free.reverse();
        self.objects.clear();
        self.live = 0;
        released
    }

    /// Number of live handles
    pub fn len(&self) -> usize {
        self.live
    }

    /// Check if no handle is live
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

fn pack(generation: u32, index: u32) -> u64 {
    ((generation as u64) << 32) | index as u64
}

fn unpack(id: u64) -> (u32, u32) {
    ((id >> 32) as u32, id as u32)
}
