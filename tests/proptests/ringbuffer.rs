// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Property tests: ring buffer sequencing
//!
//! Whatever the capacity and however claims are batched, a consumer sees
//! every published value exactly once and in claim order, and a full
//! ring refuses claims instead of overwriting unread slots.

use eventline::{ProducerMode, RingBuffer, WaitStrategy};
use proptest::prelude::*;
use std::sync::Arc;

fn producer_mode() -> impl Strategy<Value = ProducerMode> {
    prop_oneof![Just(ProducerMode::Single), Just(ProducerMode::Multi)]
}

proptest! {
    #[test]
    fn test_batched_claims_are_consumed_in_order(
        shift in 0u32..6,
        mode in producer_mode(),
        batches in prop::collection::vec(1usize..40, 1..20),
    ) {
        let capacity = 1usize << shift;
        let ring = Arc::new(RingBuffer::<u64>::new(capacity, mode, WaitStrategy::BusySpin, 1));
        let mut consumer = ring.consumer(0).unwrap();

        let mut next = 0u64;
        let mut refused = 0u64;
        let mut seen = Vec::new();

        for batch in batches {
            for _ in 0..batch {
                match ring.try_claim_next() {
                    Some(mut claim) => {
                        prop_assert_eq!(claim.sequence(), next);
                        *claim = next;
                        next += 1;
                        claim.publish();
                    }
                    None => {
                        prop_assert_eq!(ring.len(), capacity);
                        refused += 1;
                    }
                }
            }

            while consumer.position() < ring.claimed() {
                let end = consumer.next_available().unwrap();
                for sequence in consumer.position()..end {
                    seen.push(*consumer.get(sequence).unwrap());
                }
                consumer.advance(end);
            }
            prop_assert!(ring.is_empty());
            prop_assert!(consumer.is_drained());
        }

        prop_assert_eq!(seen, (0..next).collect::<Vec<_>>());
        prop_assert_eq!(ring.dropped(), refused);
    }
}
