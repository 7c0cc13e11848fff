#![allow(dead_code)]

use std::sync::OnceLock;

use keyseal::*;

pub const ALICE_PASS: &str = "alice's correct horse";
pub const BOB_PASS: &str = "bob's battery staple";

/// Key generation options with a KDF cheap enough for tests.
pub fn cheap_keygen() -> KeyGenOptions {
    KeyGenOptions {
        kdf: KdfParams {
            m_cost_kib: 64,
            t_cost: 1,
            p_cost: 1,
        },
        ..KeyGenOptions::default()
    }
}

pub struct Fixture {
    pub pair: GeneratedKeyPair,
    pub public: KeyRingBundle,
    pub secret: KeyRingBundle,
}

impl Fixture {
    fn generate(identity: &str, passphrase: &str) -> Self {
        let pair = generate_key_pair(identity, passphrase, &cheap_keygen()).unwrap();
        let public = load_public_ring(&pair.public_key).unwrap();
        let secret = load_secret_ring(&pair.secret_key).unwrap();
        Self {
            pair,
            public,
            secret,
        }
    }

    pub fn recipient(&self) -> &Key {
        find_encryption_key(&self.public).unwrap()
    }
}

pub fn alice() -> &'static Fixture {
    static ALICE: OnceLock<Fixture> = OnceLock::new();
    ALICE.get_or_init(|| Fixture::generate("Alice <alice@example.com>", ALICE_PASS))
}

pub fn bob() -> &'static Fixture {
    static BOB: OnceLock<Fixture> = OnceLock::new();
    BOB.get_or_init(|| Fixture::generate("Bob <bob@example.com>", BOB_PASS))
}

/// Binary packet stream of possibly armored input.
pub fn binary(data: &[u8]) -> Vec<u8> {
    armor::dearmor_if_needed(data).unwrap().into_owned()
}

/// Binary message for alice with default options apart from armor.
pub fn binary_message_for(fixture: &Fixture, plaintext: &[u8], file_name: &str) -> Vec<u8> {
    let options = EncryptOptions {
        armor: false,
        ..EncryptOptions::default()
    };
    encrypt_bytes(plaintext, file_name, fixture.recipient(), &options).unwrap()
}

/// Apply `edit` to every encrypted payload packet of a binary message.
pub fn edit_payload(message: &[u8], edit: impl Fn(&mut EncryptedPayload)) -> Vec<u8> {
    let mut packets = decode_packets(message).unwrap();
    for packet in &mut packets {
        if let Packet::EncryptedPayload(payload) = packet {
            edit(payload);
        }
    }
    encode_packets(&packets).unwrap()
}
