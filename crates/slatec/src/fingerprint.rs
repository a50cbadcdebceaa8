use crate::cache::SpecKey;

/// Stable 128-bit FNV-1a fingerprint of a specialization key.
///
/// Used as the compact artifact id in module dumps and reports; the cache
/// itself is keyed on the full `SpecKey`, never on this hash.
pub(crate) fn spec_fingerprint(key: &SpecKey) -> u128 {
    const FNV_OFFSET_BASIS: u128 = 0x6c62272e07bb014262b821756295c58d;
    const FNV_PRIME: u128 = 0x0000000001000000000000000000013b;

    fn write_bytes(mut h: u128, bytes: &[u8]) -> u128 {
        const FNV_PRIME: u128 = 0x0000000001000000000000000000013b;
        for b in bytes {
            h ^= *b as u128;
            h = h.wrapping_mul(FNV_PRIME);
        }
        h
    }

    let mut h = FNV_OFFSET_BASIS;
    h = h.wrapping_mul(FNV_PRIME);

    h = write_bytes(h, &[0x01]);
    let len: u32 = key.kernel.len() as u32;
    h = write_bytes(h, &len.to_le_bytes());
    h = write_bytes(h, key.kernel.as_bytes());

    h = write_bytes(h, &[0x02, key.debug as u8]);

    h = write_bytes(h, &[0x03]);
    let n: u32 = key.constexpr.len() as u32;
    h = write_bytes(h, &n.to_le_bytes());
    for (name, value) in &key.constexpr {
        let len: u32 = name.len() as u32;
        h = write_bytes(h, &len.to_le_bytes());
        h = write_bytes(h, name.as_bytes());
        h = write_bytes(h, &value.to_le_bytes());
    }
    h
}

#[cfg(test)]
mod tests {
    use super::spec_fingerprint;
    use crate::cache::SpecKey;
    use std::collections::BTreeMap;

    fn key(kernel: &str, debug: bool, constexpr: &[(&str, i64)]) -> SpecKey {
        SpecKey {
            kernel: kernel.to_string(),
            debug,
            constexpr: constexpr
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn debug_mode_changes_the_fingerprint() {
        let on = key("main.k", true, &[("BLOCK", 128)]);
        let off = key("main.k", false, &[("BLOCK", 128)]);
        assert_ne!(spec_fingerprint(&on), spec_fingerprint(&off));
    }

    #[test]
    fn constexpr_values_change_the_fingerprint() {
        let a = key("main.k", true, &[("BLOCK", 128)]);
        let b = key("main.k", true, &[("BLOCK", 64)]);
        assert_ne!(spec_fingerprint(&a), spec_fingerprint(&b));
    }

    #[test]
    fn equal_keys_fingerprint_equal() {
        let a = key("main.k", false, &[("A", 1), ("B", 2)]);
        let b = key("main.k", false, &[("B", 2), ("A", 1)]);
        assert_eq!(spec_fingerprint(&a), spec_fingerprint(&b));
    }
}
