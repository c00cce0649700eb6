use ferry_mem::float16::{f16_to_f32, f32_to_f16};
use ferry_mem::refs::{MemoryRef, RefInt};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

#[test]
fn far_reference_reference_values() {
    let reference = MemoryRef::encode_far(13, 7331, 1337);
    assert_eq!(reference, 0xA7_3CA3);
    assert_eq!(reference.decode_far(13), (7331, 1337));
}

proptest! {
    #[test]
    fn far_references_round_trip(
        num_idx_bits in 0u8..31,
        table_index: u32,
        offset: u32,
    ) {
        // clip both fields to what the packing can carry
        let table_index = if num_idx_bits == 0 {
            0
        } else {
            table_index & (u32::MAX >> (32 - u32::from(num_idx_bits)))
        };
        let offset = u64::from(offset >> (num_idx_bits + 1));

        let reference = MemoryRef::encode_far(num_idx_bits, table_index, offset);
        prop_assert!(reference.is_far());
        prop_assert_eq!(reference.decode_far(num_idx_bits), (table_index, offset));
    }

    #[test]
    fn half_floats_round_trip_through_f32(bits: u16) {
        // exact decode followed by re-encode restores every bit pattern,
        // NaN payloads included
        let decoded = f16_to_f32(bits);
        prop_assert_eq!(f32_to_f16(decoded), bits);
    }

    #[test]
    fn f16_decode_matches_reference_semantics(bits in 0u16..0x7C00) {
        // finite positive patterns decode monotonically
        let value = f16_to_f32(bits);
        prop_assert!(value.is_finite());
        prop_assert!(value >= 0.0);
        if bits > 0 {
            prop_assert!(value > f16_to_f32(bits - 1));
        }
    }
}
