#![allow(clippy::unwrap_used)] // unwrap() is idiomatic in property tests

mod common;

use common::*;
use keyseal::*;
use proptest::prelude::*;

fn symmetric() -> impl Strategy<Value = SymmetricAlgorithm> {
    prop_oneof![
        Just(SymmetricAlgorithm::Aes128),
        Just(SymmetricAlgorithm::Aes192),
        Just(SymmetricAlgorithm::Aes256),
    ]
}

fn compression() -> impl Strategy<Value = CompressionAlgorithm> {
    prop_oneof![
        Just(CompressionAlgorithm::Uncompressed),
        Just(CompressionAlgorithm::Zip),
        Just(CompressionAlgorithm::Zlib),
    ]
}

// ============================================================================
// Property: Round-trip encryption/decryption
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_encrypt_decrypt_roundtrip(
        message in prop::collection::vec(any::<u8>(), 0..10000),
        file_name in "[A-Za-z0-9_.-]{0,24}",
        symmetric in symmetric(),
        compression in compression(),
        armor in any::<bool>(),
        with_integrity in any::<bool>(),
    ) {
        let alice = alice();
        let options = EncryptOptions { armor, with_integrity, symmetric, compression };

        let wire = encrypt_bytes(&message, &file_name, alice.recipient(), &options)?;
        let literal = decrypt(&wire, &alice.secret, ALICE_PASS)?;

        prop_assert_eq!(literal.data, message);
        prop_assert_eq!(literal.file_name, file_name);
    }
}

// ============================================================================
// Property: Any ciphertext bit flip is caught by the integrity tag
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_ciphertext_tamper_detected(
        message in prop::collection::vec(any::<u8>(), 1..2000),
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let alice = alice();
        let wire = binary_message_for(alice, &message, "");
        let tampered = edit_payload(&wire, |payload| {
            let i = position.index(payload.ciphertext.len());
            payload.ciphertext[i] ^= 1 << bit;
        });

        let result = decrypt(&tampered, &alice.secret, ALICE_PASS);
        prop_assert!(matches!(result, Err(KeysealError::Integrity)), "got {:?}", result);
    }
}

// ============================================================================
// Property: Armor round-trips arbitrary payloads
// ============================================================================

proptest! {
    #[test]
    fn prop_armor_roundtrip(payload in prop::collection::vec(any::<u8>(), 0..4096)) {
        let text = armor::armor_encode(armor::ArmorType::Message, &[armor::version_header()], &payload);
        let block = armor::armor_decode(&text)?;
        prop_assert_eq!(block.armor_type, armor::ArmorType::Message);
        prop_assert_eq!(block.payload, payload);
    }
}

// ============================================================================
// Property: Decoding never panics on arbitrary input
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_decrypt_garbage_is_an_error(data in prop::collection::vec(any::<u8>(), 0..512)) {
        prop_assert!(decrypt(&data, &alice().secret, ALICE_PASS).is_err());
    }
}
