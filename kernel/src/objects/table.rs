//! Object table
//!
//! Capabilities name objects by a small integer handle. The table owns one
//! strong reference to every live object; removing the entry is the last
//! step of object deletion.
//!
//! Slots are reused. Each slot counts its generation, and a handle only
//! resolves while its generation matches the slot's.

use alloc::{sync::Arc, vec::Vec};

use spin::RwLock;

use super::KernelObject;
use crate::{
    cap::ObjectHandle,
    error::{Error, KernelResult},
};

#[derive(Default)]
struct Slot {
    generation: u32,
    obj: Option<Arc<dyn KernelObject>>,
}

struct Table {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

static TABLE: RwLock<Table> = RwLock::new(Table {
    slots: Vec::new(),
    free: Vec::new(),
});

fn position(handle: ObjectHandle) -> Option<usize> {
    (handle.index() as usize).checked_sub(1)
}

impl Table {
    fn slot(&self, handle: ObjectHandle) -> Option<&Slot> {
        self.slots
            .get(position(handle)?)
            .filter(|slot| slot.generation == handle.generation())
    }

    fn slot_mut(&mut self, handle: ObjectHandle) -> Option<&mut Slot> {
        self.slots
            .get_mut(position(handle)?)
            .filter(|slot| slot.generation == handle.generation())
    }
}

fn reserve() -> KernelResult<ObjectHandle> {
    let mut table = TABLE.write();
    if let Some(index) = table.free.pop() {
        let slot = &mut table.slots[index as usize - 1];
        slot.generation = (slot.generation + 1) % ObjectHandle::GENERATIONS;
        return ObjectHandle::from_parts(index, slot.generation).ok_or(Error::GenericError);
    }
    let index = table.slots.len() as u32 + 1;
    let handle = ObjectHandle::from_parts(index, 0).ok_or(Error::InsufficientResources)?;
    table.slots.push(Slot::default());
    Ok(handle)
}

/// Register an object built with knowledge of its own handle.
pub fn insert_with<T, F>(build: F) -> KernelResult<(ObjectHandle, Arc<T>)>
where
    T: KernelObject,
    F: FnOnce(ObjectHandle) -> KernelResult<Arc<T>>,
{
    let handle = reserve()?;
    match build(handle) {
        Ok(obj) => {
            if let Some(slot) = TABLE.write().slot_mut(handle) {
                slot.obj = Some(obj.clone() as Arc<dyn KernelObject>);
            }
            Ok((handle, obj))
        }
        Err(e) => {
            TABLE.write().free.push(handle.index());
            Err(e)
        }
    }
}

pub fn get(handle: ObjectHandle) -> Option<Arc<dyn KernelObject>> {
    TABLE.read().slot(handle).and_then(|slot| slot.obj.clone())
}

/// Unregister an object. The slot may be reused afterwards under a new
/// generation.
pub fn remove(handle: ObjectHandle) -> Option<Arc<dyn KernelObject>> {
    let mut table = TABLE.write();
    let obj = table.slot_mut(handle).and_then(|slot| slot.obj.take());
    if obj.is_some() {
        table.free.push(handle.index());
    }
    obj
}
