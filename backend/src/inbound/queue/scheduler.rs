//! Smooth weighted round-robin over queue names.
//!
//! Each pick adds every queue's weight to its running score, returns the
//! highest scorer and lowers it by the total weight. Over `total` picks each
//! queue is chosen exactly `weight` times and picks are interleaved rather
//! than bursty.

use parking_lot::Mutex;

#[derive(Debug)]
struct Entry {
    name: String,
    weight: i64,
    score: i64,
}

/// Queue selection shared by every worker in a pool.
///
/// # Examples
/// ```
/// use skeleton::inbound::queue::WeightedQueues;
///
/// let queues = WeightedQueues::new([("critical", 2), ("low", 1)]);
/// let picks: Vec<String> = (0..3).map(|_| queues.order()[0].clone()).collect();
/// assert_eq!(picks, ["critical", "low", "critical"]);
/// ```
#[derive(Debug)]
pub struct WeightedQueues {
    entries: Mutex<Vec<Entry>>,
}

impl WeightedQueues {
    /// Queues with non-positive weights are dropped.
    pub fn new<I, S>(weights: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let entries = weights
            .into_iter()
            .filter(|(_, weight)| *weight > 0)
            .map(|(name, weight)| Entry {
                name: name.into(),
                weight: i64::from(weight),
                score: 0,
            })
            .collect();
        Self {
            entries: Mutex::new(entries),
        }
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.entries.lock().iter().map(|entry| entry.name.clone()).collect()
    }

    /// Queues to try for the next job: the round-robin pick first, then the
    /// rest by descending weight so an empty pick falls back to the others.
    #[must_use]
    pub fn order(&self) -> Vec<String> {
        let mut entries = self.entries.lock();
        let total: i64 = entries.iter().map(|entry| entry.weight).sum();
        for entry in entries.iter_mut() {
            entry.score += entry.weight;
        }
        let Some(chosen) = entries
            .iter()
            .enumerate()
            .max_by(|(left_index, left), (right_index, right)| {
                // Ties go to the earlier queue.
                left.score
                    .cmp(&right.score)
                    .then_with(|| right_index.cmp(left_index))
            })
            .map(|(index, _)| index)
        else {
            return Vec::new();
        };

        let mut order = Vec::with_capacity(entries.len());
        if let Some(entry) = entries.get_mut(chosen) {
            entry.score -= total;
            order.push(entry.name.clone());
        }
        let mut rest: Vec<&Entry> = entries
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != chosen)
            .map(|(_, entry)| entry)
            .collect();
        rest.sort_by(|left, right| right.weight.cmp(&left.weight));
        order.extend(rest.into_iter().map(|entry| entry.name.clone()));
        order
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn first_picks(queues: &WeightedQueues, count: usize) -> Vec<String> {
        (0..count)
            .filter_map(|_| queues.order().into_iter().next())
            .collect()
    }

    #[test]
    fn picks_follow_the_weights() {
        let queues = WeightedQueues::new([("critical", 6), ("default", 3), ("low", 1)]);
        let mut counts: HashMap<String, usize> = HashMap::new();
        for name in first_picks(&queues, 100) {
            *counts.entry(name).or_default() += 1;
        }
        assert_eq!(counts.get("critical"), Some(&60));
        assert_eq!(counts.get("default"), Some(&30));
        assert_eq!(counts.get("low"), Some(&10));
    }

    #[test]
    fn picks_are_interleaved() {
        let queues = WeightedQueues::new([("a", 5), ("b", 1), ("c", 1)]);
        assert_eq!(
            first_picks(&queues, 7),
            ["a", "a", "b", "a", "c", "a", "a"]
        );
    }

    #[test]
    fn order_lists_every_queue_once() {
        let queues = WeightedQueues::new([("critical", 6), ("default", 3), ("low", 1)]);
        for _ in 0..10 {
            let mut order = queues.order();
            order.sort();
            assert_eq!(order, ["critical", "default", "low"]);
        }
    }

    #[test]
    fn fallback_prefers_heavier_queues() {
        let queues = WeightedQueues::new([("low", 1), ("critical", 6), ("default", 3)]);
        assert_eq!(queues.order(), ["critical", "default", "low"]);
    }

    #[test]
    fn zero_weights_are_ignored() {
        let queues = WeightedQueues::new([("on", 1), ("off", 0)]);
        assert_eq!(queues.names(), ["on"]);
        assert!(WeightedQueues::new(Vec::<(String, u32)>::new()).order().is_empty());
    }
}
