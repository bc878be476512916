//! MIDI-in staging between device callbacks and the audio thread.
//!
//! Incoming device MIDI lands in a fixed pool threaded into two lists:
//! `pending` (producer side) and `data` (consumer side). Producers acquire the
//! mutex blocking; the audio thread only ever try-locks, splices `pending`
//! onto `data` in O(1), and converts the entries into block-relative engine
//! events. On contention the drain is skipped for the block and the events
//! stay queued - delayed by at most one block, never lost.

use parking_lot::Mutex;

use crate::event::{EngineEvent, EventBuffer, MAX_MIDI_DATA_SIZE};

/// Capacity of the staging pool.
pub const MIDI_IN_POOL_SIZE: usize = 512;

const NONE: u16 = u16::MAX;

/// A raw device MIDI event stamped with the engine's running sample counter.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RtMidiEvent {
    /// Absolute time in samples, on the engine's frame clock.
    pub time: u64,
    pub size: u8,
    pub data: [u8; MAX_MIDI_DATA_SIZE],
}

impl RtMidiEvent {
    /// Copies `bytes` inline. Returns `None` for empty or oversized messages.
    pub fn new(time: u64, bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() || bytes.len() > MAX_MIDI_DATA_SIZE {
            return None;
        }
        let mut data = [0; MAX_MIDI_DATA_SIZE];
        data[..bytes.len()].copy_from_slice(bytes);
        Some(Self {
            time,
            size: bytes.len() as u8,
            data,
        })
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.size as usize]
    }
}

#[derive(Clone, Copy)]
struct Slot {
    event: RtMidiEvent,
    next: u16,
}

/// Index list over the slot pool: head and tail, or `NONE` when empty.
#[derive(Clone, Copy)]
struct List {
    head: u16,
    tail: u16,
}

impl List {
    const EMPTY: List = List {
        head: NONE,
        tail: NONE,
    };

    #[inline]
    fn is_empty(&self) -> bool {
        self.head == NONE
    }
}

struct Pool {
    slots: Box<[Slot]>,
    free: List,
    pending: List,
    data: List,
}

impl Pool {
    fn new(capacity: usize) -> Self {
        assert!(capacity > 0 && capacity < NONE as usize);
        let mut slots = vec![
            Slot {
                event: RtMidiEvent::default(),
                next: NONE,
            };
            capacity
        ]
        .into_boxed_slice();
        for (i, slot) in slots.iter_mut().enumerate() {
            slot.next = if i + 1 < capacity { (i + 1) as u16 } else { NONE };
        }
        Self {
            slots,
            free: List {
                head: 0,
                tail: (capacity - 1) as u16,
            },
            pending: List::EMPTY,
            data: List::EMPTY,
        }
    }

    fn pop_head(&mut self, list: fn(&mut Pool) -> &mut List) -> Option<u16> {
        let l = list(self);
        let idx = l.head;
        if idx == NONE {
            return None;
        }
        let next = self.slots[idx as usize].next;
        let l = list(self);
        l.head = next;
        if next == NONE {
            l.tail = NONE;
        }
        Some(idx)
    }

    fn push_tail(&mut self, list: fn(&mut Pool) -> &mut List, idx: u16) {
        self.slots[idx as usize].next = NONE;
        let tail = list(self).tail;
        if tail == NONE {
            let l = list(self);
            l.head = idx;
            l.tail = idx;
        } else {
            self.slots[tail as usize].next = idx;
            list(self).tail = idx;
        }
    }

    /// Splices the whole pending list onto the end of the data list.
    fn splice_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        if self.data.is_empty() {
            self.data = self.pending;
        } else {
            self.slots[self.data.tail as usize].next = self.pending.head;
            self.data.tail = self.pending.tail;
        }
        self.pending = List::EMPTY;
    }
}

/// The MIDI-in staging queue (see the module docs for the locking contract).
pub struct MidiInQueue {
    pool: Mutex<Pool>,
}

impl Default for MidiInQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MidiInQueue {
    pub fn new() -> Self {
        Self::with_capacity(MIDI_IN_POOL_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pool: Mutex::new(Pool::new(capacity)),
        }
    }

    /// Appends an event from a producer thread. Blocks on the mutex; never
    /// call this from the audio thread.
    ///
    /// When the pool is exhausted the oldest pending event is dropped to make
    /// room, with a warning.
    pub fn push(&self, event: RtMidiEvent) {
        let mut pool = self.pool.lock();
        let idx = match pool.pop_head(|p| &mut p.free) {
            Some(idx) => idx,
            None => {
                log::warn!("MIDI-in pool exhausted, dropping oldest pending event");
                match pool.pop_head(|p| &mut p.pending) {
                    Some(idx) => idx,
                    // every slot is on the consumer side; nothing we can steal
                    None => return,
                }
            }
        };
        pool.slots[idx as usize].event = event;
        pool.push_tail(|p| &mut p.pending, idx);
    }

    /// Drains queued events into `out` with timestamps normalised to
    /// `[0, frames)` relative to `frame_base`.
    ///
    /// Audio-thread path: try-locks, and returns `false` without touching the
    /// queue when the producer holds the mutex. Events beyond the buffer's
    /// capacity are dropped with a warning.
    pub fn drain_into(&self, out: &mut EventBuffer, frame_base: u64, frames: u32) -> bool {
        let Some(mut pool) = self.pool.try_lock() else {
            return false;
        };
        pool.splice_pending();

        let mut idx = pool.data.head;
        while idx != NONE {
            let slot = pool.slots[idx as usize];
            let time = if slot.event.time < frame_base {
                0
            } else if slot.event.time >= frame_base + frames as u64 {
                log::warn!(
                    "late MIDI event clamped to end of block (time {}, block starts at {})",
                    slot.event.time,
                    frame_base
                );
                frames - 1
            } else {
                (slot.event.time - frame_base) as u32
            };
            if let Some(event) = EngineEvent::from_raw_midi(time, slot.event.bytes()) {
                out.push(event);
            }
            let next = slot.next;
            pool.push_tail(|p| &mut p.free, idx);
            idx = next;
        }
        pool.data = List::EMPTY;
        true
    }

    /// Number of events currently staged (pending + data). Test hook.
    pub fn len(&self) -> usize {
        let pool = self.pool.lock();
        let mut count = 0;
        for head in [pool.pending.head, pool.data.head] {
            let mut idx = head;
            while idx != NONE {
                count += 1;
                idx = pool.slots[idx as usize].next;
            }
        }
        count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
