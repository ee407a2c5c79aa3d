//! Mapped buffer arena with per-slot ownership.

use std::io;

use crate::traits::{Error, Result};

/// Who may touch a buffer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Queued; the driver may write to it.
    WithDriver,
    /// Dequeued (or never queued); the caller may read it.
    WithCaller,
}

#[derive(Debug)]
struct Slot {
    mapping: usize,
    offset: usize,
    len: usize,
    state: SlotState,
}

/// Buffers shared with the driver, addressed by index.
///
/// A V2 pool holds one mapping per buffer, a V1 pool a single mapping carved
/// into frames. Dropping the pool unmaps everything.
#[derive(Debug)]
pub struct BufferPool<M> {
    mappings: Vec<M>,
    slots: Vec<Slot>,
}

impl<M> Default for BufferPool<M> {
    fn default() -> Self {
        Self {
            mappings: Vec::new(),
            slots: Vec::new(),
        }
    }
}

impl<M: AsRef<[u8]>> BufferPool<M> {
    /// Take ownership of a mapping; returns its handle for [`Self::add_slot`].
    pub fn push_mapping(&mut self, mapping: M) -> usize {
        self.mappings.push(mapping);
        self.mappings.len() - 1
    }

    /// Add a buffer of `len` bytes at `offset` inside mapping `mapping`.
    pub fn add_slot(&mut self, mapping: usize, offset: usize, len: usize) -> io::Result<()> {
        let fits = self
            .mappings
            .get(mapping)
            .is_some_and(|m| offset.checked_add(len).is_some_and(|end| end <= m.as_ref().len()));
        if !fits {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("buffer {offset}+{len} lies outside mapping {mapping}"),
            ));
        }
        self.slots.push(Slot {
            mapping,
            offset,
            len,
            state: SlotState::WithCaller,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn state(&self, index: usize) -> Option<SlotState> {
        self.slots.get(index).map(|slot| slot.state)
    }

    /// Length of slot `index` in bytes.
    pub fn slot_len(&self, index: usize) -> Option<usize> {
        self.slots.get(index).map(|slot| slot.len)
    }

    /// Fail unless the caller currently holds `index`.
    pub fn check_held(&self, index: usize) -> Result<()> {
        match self.state(index) {
            Some(SlotState::WithCaller) => Ok(()),
            _ => Err(Error::InvalidBuffer { index }),
        }
    }

    pub fn mark_queued(&mut self, index: usize) -> Result<()> {
        self.set_state(index, SlotState::WithCaller, SlotState::WithDriver)
    }

    pub fn mark_dequeued(&mut self, index: usize) -> Result<()> {
        self.set_state(index, SlotState::WithDriver, SlotState::WithCaller)
    }

    pub fn mark_all_queued(&mut self) {
        for slot in &mut self.slots {
            slot.state = SlotState::WithDriver;
        }
    }

    fn set_state(&mut self, index: usize, from: SlotState, to: SlotState) -> Result<()> {
        match self.slots.get_mut(index) {
            Some(slot) if slot.state == from => {
                slot.state = to;
                Ok(())
            }
            _ => Err(Error::InvalidBuffer { index }),
        }
    }

    /// Bytes of slot `index`, at most `limit` of them.
    pub fn data(&self, index: usize, limit: usize) -> Option<&[u8]> {
        let slot = self.slots.get(index)?;
        let mapping = self.mappings.get(slot.mapping)?.as_ref();
        mapping.get(slot.offset..slot.offset + slot.len.min(limit))
    }
}

/// Driver-side index for pool slot `index`.
pub fn driver_index(index: usize) -> io::Result<u32> {
    u32::try_from(index)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "buffer index overflow"))
}
