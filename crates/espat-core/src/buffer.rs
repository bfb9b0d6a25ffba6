//! Receive buffer
//!
//! Single-producer/single-consumer byte ring between the serial receive path
//! and the frame parser. The producer side is safe to drive from an interrupt
//! or reader thread: it only touches atomics and never the engine.

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

struct Ring {
    slots: Box<[AtomicU8]>,
    /// Total bytes ever written (wrapping). Written only by the producer.
    head: AtomicUsize,
    /// Total bytes ever read (wrapping). Written only by the consumer.
    tail: AtomicUsize,
    dropped: AtomicU64,
}

impl Ring {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }
}

/// Create a receive buffer holding up to `capacity` unread bytes
///
/// A capacity of zero is bumped to one so the ring is always usable.
pub fn rx_buffer(capacity: usize) -> (RxProducer, RxConsumer) {
    let capacity = capacity.max(1);
    let slots: Vec<AtomicU8> = (0..capacity).map(|_| AtomicU8::new(0)).collect();
    let ring = Arc::new(Ring {
        slots: slots.into_boxed_slice(),
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
        dropped: AtomicU64::new(0),
    });

    (
        RxProducer { ring: ring.clone() },
        RxConsumer { ring },
    )
}

/// Writing half, owned by whatever receives bytes from the module
pub struct RxProducer {
    ring: Arc<Ring>,
}

impl RxProducer {
    /// Push one received byte. Returns false (and counts a drop) when full.
    pub fn on_byte_received(&mut self, byte: u8) -> bool {
        let ring = &self.ring;
        let head = ring.head.load(Ordering::Relaxed);
        let tail = ring.tail.load(Ordering::Acquire);

        if head.wrapping_sub(tail) >= ring.capacity() {
            ring.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        ring.slots[head % ring.capacity()].store(byte, Ordering::Relaxed);
        ring.head.store(head.wrapping_add(1), Ordering::Release);
        true
    }

    /// Push a run of bytes, returning how many were accepted
    pub fn push_slice(&mut self, bytes: &[u8]) -> usize {
        let mut accepted = 0;
        for &byte in bytes {
            if self.on_byte_received(byte) {
                accepted += 1;
            }
        }
        accepted
    }

    /// Push bytes until the ring is full, without counting a drop. Returns how
    /// many were accepted; the caller keeps the rest.
    pub fn try_push(&mut self, bytes: &[u8]) -> usize {
        let ring = &self.ring;
        let head = ring.head.load(Ordering::Relaxed);
        let tail = ring.tail.load(Ordering::Acquire);
        let room = ring.capacity() - head.wrapping_sub(tail);
        let count = room.min(bytes.len());

        for (offset, &byte) in bytes[..count].iter().enumerate() {
            ring.slots[head.wrapping_add(offset) % ring.capacity()].store(byte, Ordering::Relaxed);
        }
        ring.head.store(head.wrapping_add(count), Ordering::Release);
        count
    }

    /// Number of bytes dropped because the consumer fell behind
    pub fn dropped(&self) -> u64 {
        self.ring.dropped.load(Ordering::Relaxed)
    }
}

/// Reading half, owned by the engine
pub struct RxConsumer {
    ring: Arc<Ring>,
}

impl RxConsumer {
    /// Pop the oldest unread byte
    pub fn pop(&mut self) -> Option<u8> {
        let ring = &self.ring;
        let tail = ring.tail.load(Ordering::Relaxed);
        let head = ring.head.load(Ordering::Acquire);

        if head == tail {
            return None;
        }

        let byte = ring.slots[tail % ring.capacity()].load(Ordering::Relaxed);
        ring.tail.store(tail.wrapping_add(1), Ordering::Release);
        Some(byte)
    }

    /// Bytes waiting to be parsed
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// True when nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of unread bytes the ring can hold
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Number of bytes the producer had to drop
    pub fn dropped(&self) -> u64 {
        self.ring.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let (mut tx, mut rx) = rx_buffer(8);
        assert_eq!(tx.push_slice(b"abc"), 3);
        assert_eq!(rx.len(), 3);
        assert_eq!(rx.pop(), Some(b'a'));
        assert_eq!(rx.pop(), Some(b'b'));
        assert_eq!(rx.pop(), Some(b'c'));
        assert_eq!(rx.pop(), None);
        assert!(rx.is_empty());
    }

    #[test]
    fn test_full_ring_drops_and_counts() {
        let (mut tx, mut rx) = rx_buffer(4);
        assert_eq!(tx.push_slice(b"123456"), 4);
        assert_eq!(tx.dropped(), 2);
        assert_eq!(rx.dropped(), 2);

        let mut out = Vec::new();
        while let Some(b) = rx.pop() {
            out.push(b);
        }
        assert_eq!(out, b"1234");
    }

    #[test]
    fn test_try_push_keeps_the_rest() {
        let (mut tx, mut rx) = rx_buffer(4);
        assert_eq!(tx.try_push(b"123456"), 4);
        assert_eq!(tx.try_push(b"56"), 0);
        assert_eq!(tx.dropped(), 0);

        assert_eq!(rx.pop(), Some(b'1'));
        assert_eq!(tx.try_push(b"56"), 1);
        let mut out = Vec::new();
        while let Some(b) = rx.pop() {
            out.push(b);
        }
        assert_eq!(out, b"2345");
    }

    #[test]
    fn test_wraps_around() {
        let (mut tx, mut rx) = rx_buffer(3);
        for round in 0..10u8 {
            assert!(tx.on_byte_received(round));
            assert!(tx.on_byte_received(round.wrapping_add(100)));
            assert_eq!(rx.pop(), Some(round));
            assert_eq!(rx.pop(), Some(round.wrapping_add(100)));
        }
        assert!(rx.is_empty());
    }

    #[test]
    fn test_cross_thread_delivery() {
        let (mut tx, mut rx) = rx_buffer(64);
        let producer = std::thread::spawn(move || {
            let mut sent = 0usize;
            while sent < 1000 {
                if tx.on_byte_received((sent % 251) as u8) {
                    sent += 1;
                } else {
                    std::thread::yield_now();
                }
            }
        });

        let mut received = 0usize;
        while received < 1000 {
            match rx.pop() {
                Some(b) => {
                    assert_eq!(b, (received % 251) as u8);
                    received += 1;
                }
                None => std::thread::yield_now(),
            }
        }
        producer.join().unwrap();
    }
}
