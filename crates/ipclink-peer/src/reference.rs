//! Correlation handles for outstanding exchanges.
//!
//! References live in a slot map. A [`RefHandle`] is an index plus a
//! generation; releasing a reference bumps the slot's generation, so a handle
//! kept past its release can never reach whatever reuses the slot.

use std::sync::Arc;

use ipclink_transport::ConnectionId;

use crate::error::{PeerError, Result};
use crate::message::MessageDef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefHandle {
    index: u32,
    generation: u32,
}

/// Whether a response has gone out for a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    Pending,
    Responded,
    /// Answered outside its handler; freed as soon as the response is sent.
    Detached,
}

#[derive(Debug, Clone)]
pub struct Reference {
    /// Correlation id used on the wire.
    pub id: i32,
    pub msg: Option<Arc<MessageDef>>,
    /// Owned copy of the message name the reference was created with.
    pub name: Option<String>,
    /// Connection the reply is expected on.
    pub reply_to: Option<ConnectionId>,
    pub response: ResponseState,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    entry: Option<Reference>,
}

/// Process-wide store of references with a free-index stack.
#[derive(Debug, Default)]
pub struct RefTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl RefTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new reference, reusing a released slot when one is free.
    pub fn acquire(&mut self, msg: Option<Arc<MessageDef>>, name: Option<&str>, id: i32) -> RefHandle {
        let entry = Reference {
            id,
            msg,
            name: name.map(str::to_owned),
            reply_to: None,
            response: ResponseState::Pending,
        };
        self.live += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            return RefHandle {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            entry: Some(entry),
        });
        RefHandle {
            index,
            generation: 0,
        }
    }

    /// Remove a reference and return what it held.
    pub fn release(&mut self, handle: RefHandle) -> Result<Reference> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.entry.is_some())
            .ok_or(PeerError::StaleReference(handle))?;
        let entry = slot.entry.take().ok_or(PeerError::StaleReference(handle))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.live -= 1;
        Ok(entry)
    }

    pub fn get(&self, handle: RefHandle) -> Result<&Reference> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_ref())
            .ok_or(PeerError::StaleReference(handle))
    }

    pub fn get_mut(&mut self, handle: RefHandle) -> Result<&mut Reference> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_mut())
            .ok_or(PeerError::StaleReference(handle))
    }

    /// References acquired and not yet released.
    pub fn live(&self) -> usize {
        self.live
    }

    /// Slots allocated so far, live or free.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
