//! Bounded buffers shared between reader threads and status queries

use std::collections::VecDeque;

use super::event::DecodedEvent;

/// Audio is trimmed once the buffer grows past this many bytes
pub const AUDIO_BUFFER_LIMIT: usize = 1_000_000;

/// Bytes kept after a trim (the newest ones)
pub const AUDIO_BUFFER_KEEP: usize = 500_000;

/// Fixed-capacity FIFO of decoded events. Pushing into a full ring evicts
/// the oldest entry; it never blocks and never fails.
#[derive(Debug, Clone)]
pub struct EventRing {
    capacity: usize,
    events: VecDeque<DecodedEvent>,
    total: u64,
}

impl EventRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity),
            total: 0,
        }
    }

    pub fn push(&mut self, event: DecodedEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
        self.total += 1;
    }

    /// Swap in a complete snapshot, keeping only the last `capacity` entries
    pub fn replace_all(&mut self, events: Vec<DecodedEvent>) {
        self.total += events.len() as u64;
        let skip = events.len().saturating_sub(self.capacity);
        self.events.clear();
        self.events.extend(events.into_iter().skip(skip));
    }

    /// Up to `n` most recent events, oldest first
    pub fn recent(&self, n: usize) -> Vec<DecodedEvent> {
        let skip = self.events.len().saturating_sub(n);
        self.events.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events ever pushed, including evicted ones
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

/// Raw PCM bytes waiting to be consumed
#[derive(Debug, Default)]
pub struct AudioBuffer {
    data: Vec<u8>,
}

impl AudioBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        if self.data.len() > AUDIO_BUFFER_LIMIT {
            let excess = self.data.len() - AUDIO_BUFFER_KEEP;
            self.data.drain(..excess);
        }
    }

    /// Remove and return up to `n` bytes from the front
    pub fn take(&mut self, n: usize) -> Vec<u8> {
        let n = n.min(self.data.len());
        self.data.drain(..n).collect()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::event::Payload;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn text(i: usize) -> DecodedEvent {
        DecodedEvent::new(Payload::Text(format!("msg {}", i)))
    }

    fn labels(events: &[DecodedEvent]) -> Vec<String> {
        events
            .iter()
            .map(|e| e.payload.as_text().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let mut ring = EventRing::new(3);
        for i in 0..5 {
            ring.push(text(i));
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.total(), 5);
        assert_eq!(labels(&ring.recent(10)), vec!["msg 2", "msg 3", "msg 4"]);
        assert_eq!(labels(&ring.recent(2)), vec!["msg 3", "msg 4"]);
        assert!(ring.recent(0).is_empty());
    }

    #[test]
    fn test_ring_model_random_pushes() {
        // Length is min(pushed, capacity) and contents are the last pushes in order
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..50 {
            let capacity = rng.gen_range(1..20);
            let pushes = rng.gen_range(0..60);
            let mut ring = EventRing::new(capacity);
            for i in 0..pushes {
                ring.push(text(i));
            }
            assert_eq!(ring.len(), pushes.min(capacity));
            let expected: Vec<String> = (pushes.saturating_sub(capacity)..pushes)
                .map(|i| format!("msg {}", i))
                .collect();
            assert_eq!(labels(&ring.recent(usize::MAX)), expected);
        }
    }

    #[test]
    fn test_replace_all_truncates_to_capacity() {
        let mut ring = EventRing::new(2);
        ring.push(text(0));
        ring.replace_all((10..14).map(text).collect());
        assert_eq!(labels(&ring.recent(5)), vec!["msg 12", "msg 13"]);
        ring.replace_all(Vec::new());
        assert!(ring.is_empty());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut ring = EventRing::new(0);
        ring.push(text(0));
        ring.push(text(1));
        assert_eq!(ring.capacity(), 1);
        assert_eq!(labels(&ring.recent(5)), vec!["msg 1"]);
    }

    #[test]
    fn test_audio_buffer_take_consumes_front() {
        let mut audio = AudioBuffer::new();
        audio.extend(&[1, 2, 3, 4, 5]);
        assert_eq!(audio.take(2), vec![1, 2]);
        assert_eq!(audio.take(10), vec![3, 4, 5]);
        assert!(audio.take(4).is_empty());
    }

    #[test]
    fn test_audio_buffer_trims_to_newest() {
        let mut audio = AudioBuffer::new();
        audio.extend(&vec![0u8; AUDIO_BUFFER_LIMIT]);
        assert_eq!(audio.len(), AUDIO_BUFFER_LIMIT);
        audio.extend(&[7u8; 10]);
        assert_eq!(audio.len(), AUDIO_BUFFER_KEEP);
        let tail = audio.take(AUDIO_BUFFER_KEEP);
        assert_eq!(&tail[AUDIO_BUFFER_KEEP - 10..], &[7u8; 10]);
    }
}
