use crate::error::{Error, Result};

/// Fixed-capacity FIFO ring buffer for pending download jobs.
///
/// Capacity is set once and never grows; overflowing is an error rather than
/// a silent drop, since every job must stay reachable.
#[derive(Debug, Clone)]
pub struct FixedQueue<T> {
    buf: Vec<Option<T>>,
    start: usize,
    count: usize,
}

impl<T> FixedQueue<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut buf = Vec::with_capacity(capacity);
        buf.resize_with(capacity, || None);
        Self {
            buf,
            start: 0,
            count: 0,
        }
    }

    /// Builds a queue pre-filled with `items` in order.
    pub fn from_items<I>(items: I, capacity: usize) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
    {
        let mut queue = Self::with_capacity(capacity);
        for item in items {
            queue.enqueue(item)?;
        }
        Ok(queue)
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.capacity()
    }

    pub fn enqueue(&mut self, item: T) -> Result<()> {
        if self.is_full() {
            return Err(Error::QueueFull(self.capacity()));
        }
        let idx = (self.start + self.count) % self.capacity();
        self.buf[idx] = Some(item);
        self.count += 1;
        Ok(())
    }

    pub fn dequeue(&mut self) -> Result<T> {
        if self.is_empty() {
            return Err(Error::QueueEmpty);
        }
        let item = self.buf[self.start].take().ok_or(Error::QueueEmpty)?;
        self.start = (self.start + 1) % self.capacity();
        self.count -= 1;
        Ok(item)
    }

    pub fn peek(&self) -> Option<&T> {
        if self.is_empty() {
            return None;
        }
        self.buf[self.start].as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_across_wraparound() {
        let mut queue = FixedQueue::with_capacity(3);
        queue.enqueue(1).unwrap();
        queue.enqueue(2).unwrap();
        assert_eq!(queue.dequeue().unwrap(), 1);
        queue.enqueue(3).unwrap();
        queue.enqueue(4).unwrap();
        assert_eq!(queue.len(), 3);
        let drained: Vec<_> = std::iter::from_fn(|| queue.dequeue().ok()).collect();
        assert_eq!(drained, vec![2, 3, 4]);
    }

    #[test]
    fn enqueue_on_full_fails_without_mutation() {
        let mut queue = FixedQueue::from_items([1, 2], 2).unwrap();
        assert!(matches!(queue.enqueue(3), Err(Error::QueueFull(2))));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.peek(), Some(&1));
        assert_eq!(queue.dequeue().unwrap(), 1);
        assert_eq!(queue.dequeue().unwrap(), 2);
    }

    #[test]
    fn dequeue_on_empty_fails() {
        let mut queue: FixedQueue<u8> = FixedQueue::with_capacity(2);
        assert!(matches!(queue.dequeue(), Err(Error::QueueEmpty)));
        let mut zero: FixedQueue<u8> = FixedQueue::with_capacity(0);
        assert!(matches!(zero.dequeue(), Err(Error::QueueEmpty)));
        assert!(matches!(zero.enqueue(1), Err(Error::QueueFull(0))));
    }

    #[test]
    fn from_items_rejects_overflow() {
        assert!(matches!(
            FixedQueue::from_items(0..4, 3),
            Err(Error::QueueFull(3))
        ));
    }

    #[test]
    fn count_never_exceeds_capacity() {
        let mut queue = FixedQueue::with_capacity(4);
        for i in 0..10 {
            let _ = queue.enqueue(i);
            assert!(queue.len() <= queue.capacity());
            if i % 3 == 0 {
                queue.dequeue().unwrap();
            }
        }
    }
}
