use super::error::{SimError, SimResult};
use super::event::Event;
use super::types::EventId;

/// Priority queue of events ordered by `(time, priority, sequence_num)`
pub trait EventQueue: Send {
    /// Add an event, assigning its sequence number
    fn insert(&mut self, event: Event);

    /// Remove and return the minimum event, or `SimError::EmptyQueue`
    fn extract(&mut self) -> SimResult<Event>;

    /// Remove a still-queued event by identity. `None` if it is not queued.
    fn remove(&mut self, id: EventId) -> Option<Event>;

    fn size(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Chronological snapshot of all queued events; the live queue is untouched
    fn all_events(&self) -> Vec<Event>;
}

/// Binary min-heap of events.
///
/// `extract()` moves the last element to the root without sifting it down;
/// the repair is deferred to the next heap operation (`fix_root_if_needed`).
/// Draining many same-instant events therefore skips one sift per pop.
#[derive(Debug, Default, Clone)]
pub struct EventHeap {
    heap: Vec<Event>,
    root_dirty: bool,
    sequence_counter: u64,
}

impl EventHeap {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: Vec::with_capacity(capacity),
            root_dirty: false,
            sequence_counter: 0,
        }
    }

    /// The minimum event without removing it
    pub fn peek(&mut self) -> Option<&Event> {
        self.fix_root_if_needed();
        self.heap.first()
    }

    pub fn contains(&self, id: EventId) -> bool {
        self.heap.iter().any(|e| e.id == id)
    }

    fn fix_root_if_needed(&mut self) {
        if self.root_dirty {
            self.root_dirty = false;
            self.sift_down(0);
        }
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.heap[pos] < self.heap[parent] {
                self.heap.swap(pos, parent);
                pos = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * pos + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let smallest = if right < len && self.heap[right] < self.heap[left] {
                right
            } else {
                left
            };
            if self.heap[smallest] < self.heap[pos] {
                self.heap.swap(pos, smallest);
                pos = smallest;
            } else {
                break;
            }
        }
    }
}

impl EventQueue for EventHeap {
    fn insert(&mut self, mut event: Event) {
        self.fix_root_if_needed();
        event.sequence_num = self.sequence_counter;
        self.sequence_counter += 1;
        self.heap.push(event);
        let last = self.heap.len() - 1;
        self.sift_up(last);
    }

    fn extract(&mut self) -> SimResult<Event> {
        self.fix_root_if_needed();
        if self.heap.is_empty() {
            return Err(SimError::EmptyQueue);
        }
        let min = self.heap.swap_remove(0);
        self.root_dirty = self.heap.len() > 1;
        Ok(min)
    }

    fn remove(&mut self, id: EventId) -> Option<Event> {
        self.fix_root_if_needed();
        let pos = self.heap.iter().position(|e| e.id == id)?;
        let removed = self.heap.swap_remove(pos);
        if pos < self.heap.len() {
            self.sift_down(pos);
            self.sift_up(pos);
        }
        Some(removed)
    }

    fn size(&self) -> usize {
        self.heap.len()
    }

    fn all_events(&self) -> Vec<Event> {
        let mut copy = self.clone();
        let mut events = Vec::with_capacity(copy.size());
        while let Ok(event) = copy.extract() {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_on_empty_fails() {
        let mut heap = EventHeap::new();
        assert_eq!(heap.extract().unwrap_err(), SimError::EmptyQueue);
        assert!(heap.is_empty());
    }

    #[test]
    fn test_sequence_numbers_are_assigned_on_insert() {
        let mut heap = EventHeap::new();
        heap.insert(Event::marker(1.0));
        heap.insert(Event::marker(1.0));
        let a = heap.extract().unwrap();
        let b = heap.extract().unwrap();
        assert_eq!(a.sequence_num(), 0);
        assert_eq!(b.sequence_num(), 1);
    }

    #[test]
    fn test_deferred_root_repair_keeps_order() {
        let mut heap = EventHeap::new();
        for t in [5.0, 1.0, 4.0, 2.0, 3.0] {
            heap.insert(Event::marker(t));
        }
        assert_eq!(heap.extract().unwrap().time(), 1.0);
        // root is dirty now; peek must repair it before reading
        assert_eq!(heap.peek().map(|e| e.time()), Some(2.0));
        heap.insert(Event::marker(0.5));
        let order: Vec<f64> = std::iter::from_fn(|| heap.extract().ok())
            .map(|e| e.time())
            .collect();
        assert_eq!(order, vec![0.5, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_all_events_does_not_mutate() {
        let mut heap = EventHeap::new();
        for t in [3.0, 1.0, 2.0] {
            heap.insert(Event::marker(t));
        }
        heap.extract().unwrap();
        let snapshot: Vec<f64> = heap.all_events().iter().map(|e| e.time()).collect();
        assert_eq!(snapshot, vec![2.0, 3.0]);
        assert_eq!(heap.size(), 2);
    }
}
