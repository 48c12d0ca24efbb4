//! Encrypt, split, drop shares, merge, decrypt.

use bytes::Bytes;
use proptest::prelude::*;
use sv_crypto::{Cipher, CipherKind};
use sv_split::{SplitKind, Splitter};

fn sealed_roundtrip(kind: CipherKind, split: SplitKind, data: &[u8], m: usize, lost: usize) -> Vec<u8> {
    let mut cipher = Cipher::new(kind);
    let key = cipher.generate_key();
    cipher.set_key(key);
    let codec = Splitter::new(split);

    let sealed = cipher.encrypt(data).unwrap();
    let groups = codec.split(&sealed, m).unwrap();
    let parts: Vec<Vec<Option<Bytes>>> = groups
        .into_iter()
        .enumerate()
        .map(|(i, g)| g.into_iter().map(|s| (i != lost).then_some(s)).collect())
        .collect();
    let merged = codec.merge(&parts, m).unwrap();
    cipher.decrypt(&merged).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn shamir_any_k_of_m(data in proptest::collection::vec(any::<u8>(), 0..2048),
                         m in 2usize..7,
                         lost_seed in any::<usize>()) {
        let lost = lost_seed % m;
        let out = sealed_roundtrip(CipherKind::Aes, SplitKind::Shamir, &data, m, lost);
        prop_assert_eq!(out, data);
    }

    #[test]
    fn replicated_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..2048),
                                       m in 1usize..5) {
        let out = sealed_roundtrip(CipherKind::XChaCha20, SplitKind::None, &data, m, m);
        prop_assert_eq!(out, data);
    }
}

#[test]
fn scenario_four_backends_one_mib() {
    let data: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();
    for lost in 0..4 {
        let out = sealed_roundtrip(CipherKind::Aes, SplitKind::Shamir, &data, 4, lost);
        assert_eq!(out, data);
    }
}

#[test]
fn null_cipher_with_no_split() {
    let out = sealed_roundtrip(CipherKind::Null, SplitKind::None, b"hello", 2, 1);
    assert_eq!(out, b"hello");
}
