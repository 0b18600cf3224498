//! Property-based tests for Ferry relays
//!
//! Uses proptest to check delivery and cleanup across arbitrary payloads,
//! chunkings, offsets and spool media.

use ferry_core::{ErrorCategory, Relay, RelayConfig, RelayMedium, TransferRequest};
use ferry_integration_tests::fixtures::{Failure, ScriptedEndpoint};
use ferry_integration_tests::test_helpers::leftovers;
use proptest::prelude::*;

fn medium() -> impl Strategy<Value = RelayMedium> {
    prop_oneof![Just(RelayMedium::Disk), Just(RelayMedium::Memory)]
}

fn config(medium: RelayMedium, ring_capacity: usize, spool: &std::path::Path) -> RelayConfig {
    RelayConfig {
        medium,
        ring_capacity,
        ..RelayConfig::spooled_in(spool)
    }
}

// ============================================================================
// Delivery Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Whatever the chunking on either side, the target receives exactly the
    /// source bytes past the restart offset, in order
    #[test]
    fn relay_preserves_bytes(
        data in prop::collection::vec(any::<u8>(), 0..64 * 1024),
        source_chunk in 1usize..8192,
        target_chunk in 1usize..8192,
        ring_capacity in 256usize..16 * 1024,
        restart_fraction in 0.0f64..1.0,
        medium in medium(),
    ) {
        let restart_at = (data.len() as f64 * restart_fraction) as usize;
        let source = ScriptedEndpoint::serving(data.clone()).chunk_size(source_chunk);
        let target = ScriptedEndpoint::new().chunk_size(target_chunk);
        let spool = tempfile::tempdir().unwrap();

        let request = TransferRequest::new("src", "dst").restart_at(restart_at as u64);
        let stats = Relay::new(&source, &target)
            .with_config(config(medium, ring_capacity, spool.path()))
            .run(&request, None)
            .unwrap();

        prop_assert_eq!(stats.bytes_relayed, (data.len() - restart_at) as u64);
        prop_assert_eq!(target.received(), data[restart_at..].to_vec());
        prop_assert_eq!(target.empty_read_count(), 1);
        prop_assert!(leftovers(spool.path()).is_empty());
    }

    /// A source failing at any point surfaces its own error, aborts the sink
    /// once and never delivers more than was produced
    #[test]
    fn source_failure_wins(
        len in 1usize..32 * 1024,
        fail_fraction in 0.0f64..1.0,
        source_chunk in 1usize..4096,
        medium in medium(),
    ) {
        let fail_at = ((len as f64 * fail_fraction) as u64).min(len as u64 - 1);
        let data: Vec<u8> = (0..len).map(|i| (i % 253) as u8).collect();
        let source = ScriptedEndpoint::serving(data)
            .chunk_size(source_chunk)
            .fail_after(fail_at, Failure::Network);
        let target = ScriptedEndpoint::new();
        let spool = tempfile::tempdir().unwrap();

        let err = Relay::new(&source, &target)
            .with_config(config(medium, 4096, spool.path()))
            .run(&TransferRequest::new("src", "dst"), None)
            .unwrap_err();

        prop_assert_eq!(err.category(), ErrorCategory::Transfer);
        prop_assert_eq!(target.abort_count(), 1);
        prop_assert!(target.received().len() as u64 <= fail_at);
        prop_assert!(leftovers(spool.path()).is_empty());
    }
}
