//! Oldest-write-first eviction planning
//!
//! Entries are ordered by write time, not by access. Corrupted entries have
//! no usable timestamp and go first.

/// An entry that may be evicted
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Candidate {
    pub key: String,
    /// `None` for records that could not be decoded
    pub timestamp: Option<u64>,
    pub size: u64,
}

/// Pick the entries to remove so that `free + freed >= required`
///
/// Victims are taken strictly in eviction order, so no entry is chosen while
/// an older one is kept. Returns every candidate if the target cannot be met.
pub(crate) fn select_victims(mut candidates: Vec<Candidate>, free: u64, required: u64) -> Vec<Candidate> {
    // Option orders None first: corrupted entries lead
    candidates.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.key.cmp(&b.key))
    });

    let mut freed = 0u64;
    let mut victims = Vec::new();
    for candidate in candidates {
        if free.saturating_add(freed) >= required {
            break;
        }
        freed += candidate.size;
        victims.push(candidate);
    }
    victims
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(key: &str, timestamp: Option<u64>, size: u64) -> Candidate {
        Candidate {
            key: key.to_string(),
            timestamp,
            size,
        }
    }

    fn keys(victims: &[Candidate]) -> Vec<&str> {
        victims.iter().map(|c| c.key.as_str()).collect()
    }

    #[test]
    fn test_oldest_first() {
        let candidates = vec![
            candidate("new", Some(300), 10),
            candidate("old", Some(100), 10),
            candidate("mid", Some(200), 10),
        ];

        let victims = select_victims(candidates, 0, 15);
        assert_eq!(keys(&victims), vec!["old", "mid"]);
    }

    #[test]
    fn test_corrupted_first() {
        let candidates = vec![
            candidate("old", Some(1), 10),
            candidate("broken", None, 0),
        ];

        let victims = select_victims(candidates, 0, 5);
        assert_eq!(keys(&victims), vec!["broken", "old"]);
    }

    #[test]
    fn test_nothing_when_already_fits() {
        let candidates = vec![candidate("a", Some(1), 10)];
        assert!(select_victims(candidates, 20, 20).is_empty());
    }

    #[test]
    fn test_everything_when_target_unreachable() {
        let candidates = vec![candidate("a", Some(1), 10), candidate("b", Some(2), 10)];

        let victims = select_victims(candidates, 0, 1_000);
        assert_eq!(victims.len(), 2);
    }

    #[test]
    fn test_ties_break_by_key() {
        let candidates = vec![candidate("b", Some(5), 1), candidate("a", Some(5), 1)];

        let victims = select_victims(candidates, 0, 1);
        assert_eq!(keys(&victims), vec!["a"]);
    }
}
