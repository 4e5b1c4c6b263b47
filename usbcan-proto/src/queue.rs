//! Fixed-capacity FIFO used to hold frames waiting for a free transmit slot.
//!
//! `push` writes at a rotating cursor and `pop` reads the trailing edge, so the
//! storage never moves and order survives wraparound. There is no locking; a
//! queue shared between contexts needs the caller's own mutual exclusion.

pub struct Queue<T, const N: usize> {
    items: [T; N],
    index: usize,
    count: usize,
}

impl<T: Copy + Default, const N: usize> Queue<T, N> {
    pub fn new() -> Self {
        Queue {
            items: [T::default(); N],
            index: 0,
            count: 0,
        }
    }

    /// Hands the item back if the queue is full. The queue is left untouched.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.count >= N {
            return Err(item);
        }
        self.items[self.index] = item;
        self.index = if self.index + 1 < N { self.index + 1 } else { 0 };
        self.count += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<T> {
        let oldest = self.peek()?;
        self.count -= 1;
        Some(oldest)
    }

    /// The item `pop` would return next.
    pub fn peek(&self) -> Option<T> {
        if self.count == 0 {
            return None;
        }
        Some(self.items[(self.index + N - self.count) % N])
    }

    pub fn clear(&mut self) {
        self.count = 0;
        self.index = 0;
    }

    pub fn free(&self) -> usize {
        N - self.count
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn capacity(&self) -> usize {
        N
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == N
    }
}

impl<T: Copy + Default, const N: usize> Default for Queue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut queue: Queue<u32, 4> = Queue::new();
        for i in 0..3 {
            queue.push(i).unwrap();
        }
        assert_eq!(queue.peek(), Some(0));
        assert_eq!(queue.pop(), Some(0));
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.peek(), None);
    }

    #[test]
    fn test_order_survives_wraparound() {
        let mut queue: Queue<u32, 3> = Queue::new();
        let mut next_in = 0;
        let mut next_out = 0;
        // Interleave so the cursor wraps several times with the queue partly full.
        for round in 0..10 {
            for _ in 0..(round % 3) + 1 {
                if queue.push(next_in).is_ok() {
                    next_in += 1;
                }
            }
            for _ in 0..(round % 2) + 1 {
                if let Some(item) = queue.pop() {
                    assert_eq!(item, next_out);
                    next_out += 1;
                }
            }
        }
        while let Some(item) = queue.pop() {
            assert_eq!(item, next_out);
            next_out += 1;
        }
        assert_eq!(next_in, next_out);
    }

    #[test]
    fn test_push_full_is_rejected() {
        let mut queue: Queue<u8, 2> = Queue::new();
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        assert!(queue.is_full());
        assert_eq!(queue.push(3), Err(3));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
    }

    #[test]
    fn test_occupancy() {
        let mut queue: Queue<u8, 8> = Queue::new();
        assert_eq!(queue.free(), 8);
        queue.push(7).unwrap();
        queue.push(8).unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.free(), 6);
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.free(), queue.capacity());
    }
}
