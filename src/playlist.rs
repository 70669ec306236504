use crate::error::{Error, Result};

/// Ordered, doubly linked list with a single movable cursor.
///
/// Nodes live in an arena of slots and link to each other by index, so the
/// cursor is just a slot index. Freed slots are recycled by later pushes.
///
/// Invariant: when the list is non-empty the cursor points at a live node and
/// `position` is its zero-based distance from the head.
#[derive(Debug, Clone)]
pub struct Playlist<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    cursor: Option<usize>,
    position: usize,
    len: usize,
}

#[derive(Debug, Clone)]
struct Slot<T> {
    value: Option<T>,
    prev: Option<usize>,
    next: Option<usize>,
}

impl<T> Default for Playlist<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Playlist<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            cursor: None,
            position: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Offset of the cursor from the head; 0 on an empty list.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn current(&self) -> Option<&T> {
        self.cursor.and_then(|idx| self.slots[idx].value.as_ref())
    }

    pub fn front(&self) -> Option<&T> {
        self.head.and_then(|idx| self.slots[idx].value.as_ref())
    }

    pub fn back(&self) -> Option<&T> {
        self.tail.and_then(|idx| self.slots[idx].value.as_ref())
    }

    /// Appends at the tail. The first node of an empty list becomes current.
    pub fn push_back(&mut self, value: T) {
        let slot = Slot {
            value: Some(value),
            prev: self.tail,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = slot;
                idx
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        };
        match self.tail {
            Some(tail) => self.slots[tail].next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        if self.cursor.is_none() {
            self.cursor = Some(idx);
            self.position = 0;
        }
        self.len += 1;
    }

    /// Removes the head. If the cursor was on the head it snaps to the new
    /// head; otherwise it stays on its node, one step closer to the front.
    pub fn pop_front(&mut self) -> Result<T> {
        let idx = self.head.ok_or(Error::EmptyPlaylist)?;
        let next = self.slots[idx].next;
        if self.cursor == Some(idx) {
            self.cursor = next;
            self.position = 0;
        } else {
            self.position = self.position.saturating_sub(1);
        }
        self.head = next;
        match next {
            Some(n) => self.slots[n].prev = None,
            None => self.tail = None,
        }
        Ok(self.release(idx))
    }

    /// Removes the tail. A cursor on the tail moves to the new tail.
    pub fn pop_back(&mut self) -> Result<T> {
        let idx = self.tail.ok_or(Error::EmptyPlaylist)?;
        let prev = self.slots[idx].prev;
        if self.cursor == Some(idx) {
            self.cursor = prev;
            self.position = self.position.saturating_sub(1);
        }
        self.tail = prev;
        match prev {
            Some(p) => self.slots[p].next = None,
            None => self.head = None,
        }
        Ok(self.release(idx))
    }

    fn release(&mut self, idx: usize) -> T {
        let slot = &mut self.slots[idx];
        slot.prev = None;
        slot.next = None;
        let value = slot.value.take();
        self.free.push(idx);
        self.len -= 1;
        if self.len == 0 {
            self.cursor = None;
            self.position = 0;
            self.slots.clear();
            self.free.clear();
        }
        // A slot on the link chain always holds a value.
        value.unwrap_or_else(|| unreachable!("linked slot {idx} was empty"))
    }

    /// Advances the cursor, wrapping from the tail back to the head.
    pub fn move_next(&mut self) {
        let Some(cur) = self.cursor else { return };
        match self.slots[cur].next {
            Some(next) => {
                self.cursor = Some(next);
                self.position += 1;
            }
            None => {
                self.cursor = self.head;
                self.position = 0;
            }
        }
    }

    /// Steps the cursor towards the head. At the head this is a dead end:
    /// the cursor stays put and `false` is returned.
    pub fn move_prev(&mut self) -> bool {
        let Some(cur) = self.cursor else {
            return false;
        };
        match self.slots[cur].prev {
            Some(prev) => {
                self.cursor = Some(prev);
                self.position -= 1;
                true
            }
            None => {
                self.cursor = self.head;
                self.position = 0;
                false
            }
        }
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Head to tail.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            next: self.head,
        }
    }
}

pub struct Iter<'a, T> {
    list: &'a Playlist<T>,
    next: Option<usize>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.next?;
        let slot = &self.list.slots[idx];
        self.next = slot.next;
        slot.value.as_ref()
    }
}

impl<'a, T> IntoIterator for &'a Playlist<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T> FromIterator<T> for Playlist<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut list = Playlist::new();
        for value in iter {
            list.push_back(value);
        }
        list
    }
}

impl<T> Extend<T> for Playlist<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.push_back(value);
        }
    }
}
