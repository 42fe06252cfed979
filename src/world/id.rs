//! Element id allocation

use std::sync::atomic::{AtomicU32, Ordering};

use super::element::ElementId;
use super::WorldError;

/// Source of element ids. Must never return an id twice.
pub trait ElementIdGenerator: Send + Sync {
    fn next_id(&self) -> Result<ElementId, WorldError>;

    /// Mark an id chosen outside the generator as taken
    fn reserve(&self, id: ElementId);
}

/// Monotonic counter; ids are not recycled
pub struct SequentialIdGenerator {
    next: AtomicU32,
}

impl SequentialIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
        }
    }
}

impl Default for SequentialIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ElementIdGenerator for SequentialIdGenerator {
    fn next_id(&self) -> Result<ElementId, WorldError> {
        let result = self
            .next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < ElementId::INVALID.0).then(|| current + 1)
            });

        match result {
            Ok(id) => Ok(ElementId(id)),
            Err(_) => Err(WorldError::IdSpaceExhausted),
        }
    }

    fn reserve(&self, id: ElementId) {
        if id.is_valid() {
            self.next.fetch_max(id.0 + 1, Ordering::AcqRel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn ids_are_sequential() {
        let generator = SequentialIdGenerator::starting_at(5);
        assert_eq!(generator.next_id().unwrap(), ElementId(5));
        assert_eq!(generator.next_id().unwrap(), ElementId(6));
    }

    #[test]
    fn reserved_ids_are_skipped() {
        let generator = SequentialIdGenerator::starting_at(1);
        generator.reserve(ElementId(4));
        assert_eq!(generator.next_id().unwrap(), ElementId(5));

        // reserving below the counter never moves it back
        generator.reserve(ElementId(2));
        assert_eq!(generator.next_id().unwrap(), ElementId(6));
    }

    #[test]
    fn never_hands_out_the_invalid_id() {
        let generator = SequentialIdGenerator::starting_at(u32::MAX - 1);
        assert_eq!(generator.next_id().unwrap(), ElementId(u32::MAX - 1));
        assert!(matches!(
            generator.next_id(),
            Err(WorldError::IdSpaceExhausted)
        ));
    }

    #[test]
    fn concurrent_allocation_has_no_duplicates() {
        let generator = Arc::new(SequentialIdGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = generator.clone();
                std::thread::spawn(move || {
                    (0..1000)
                        .map(|_| generator.next_id().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 4000);
    }
}
