// ID Generator - Snowflake-like IDs for comments, shares, notifications and registered entities
// 64-bit ID format: [timestamp:42][node_id:10][sequence:12]

use std::sync::Mutex;

use crate::core::current_time_millis;

const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const MAX_NODE_ID: u16 = (1 << NODE_BITS) - 1;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;
const TIMESTAMP_MASK: u64 = (1 << 42) - 1;

#[derive(Debug, Default)]
struct GeneratorState {
    last_timestamp: u64,
    sequence: u64,
}

/// Time-ordered ID generator. 1024 nodes, 4096 IDs per millisecond per node.
///
/// IDs from one generator are strictly increasing, which keeps notification
/// cursors (`id < cursor`) stable.
#[derive(Debug)]
pub struct IdGenerator {
    node_id: u16,
    state: Mutex<GeneratorState>,
}

impl IdGenerator {
    /// Node IDs above 1023 are masked into range
    pub fn new(node_id: u16) -> Self {
        Self {
            node_id: node_id & MAX_NODE_ID,
            state: Mutex::new(GeneratorState::default()),
        }
    }

    /// Generate next unique ID with embedded node information
    pub fn next_id(&self) -> i64 {
        loop {
            let now = current_time_millis().max(0) as u64;
            {
                let mut state = match self.state.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };

                // Clock went backwards: keep issuing from the last seen millisecond
                let now = now.max(state.last_timestamp);

                if now == state.last_timestamp {
                    if state.sequence < SEQUENCE_MASK {
                        state.sequence += 1;
                        return self.compose(now, state.sequence);
                    }
                    // Sequence exhausted, wait for the next millisecond
                } else {
                    state.last_timestamp = now;
                    state.sequence = 0;
                    return self.compose(now, 0);
                }
            }
            // Busy-wait for the clock to advance; never park the calling thread
            std::hint::spin_loop();
        }
    }

    fn compose(&self, timestamp: u64, sequence: u64) -> i64 {
        (((timestamp & TIMESTAMP_MASK) << (NODE_BITS + SEQUENCE_BITS))
            | ((self.node_id as u64) << SEQUENCE_BITS)
            | (sequence & SEQUENCE_MASK)) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn node_of(id: i64) -> u16 {
        (((id as u64) >> SEQUENCE_BITS) & MAX_NODE_ID as u64) as u16
    }

    fn timestamp_of(id: i64) -> u64 {
        (id as u64) >> (NODE_BITS + SEQUENCE_BITS)
    }

    #[test]
    fn test_id_generation() {
        let generator = IdGenerator::new(123);

        let id1 = generator.next_id();
        let id2 = generator.next_id();
        let id3 = generator.next_id();

        assert!(id1 < id2 && id2 < id3);
        assert_eq!(node_of(id1), 123);
        assert_eq!(node_of(id3), 123);
        assert!(timestamp_of(id1) > 0);
    }

    #[test]
    fn test_node_id_is_masked() {
        let generator = IdGenerator::new(1024 + 5);
        assert_eq!(node_of(generator.next_id()), 5);
    }

    #[test]
    fn test_ids_unique_across_threads() {
        let generator = Arc::new(IdGenerator::new(1));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = generator.clone();
                std::thread::spawn(move || (0..5000).map(|_| generator.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {}", id);
            }
        }
        assert_eq!(seen.len(), 20_000);
    }

    #[tokio::test]
    async fn test_sequence_exhaustion_rolls_into_next_millisecond_without_sleeping() {
        let generator = IdGenerator::new(2);
        let ids: Vec<i64> = (0..3 * 4096).map(|_| generator.next_id()).collect();

        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
        // More than one millisecond's worth of sequence numbers was needed
        assert!(timestamp_of(ids[ids.len() - 1]) > timestamp_of(ids[0]));
        assert!(ids.iter().all(|id| node_of(*id) == 2));
    }
}
