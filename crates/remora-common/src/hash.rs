use std::hash::Hasher;

use rand::Rng;
use siphasher::sip::SipHasher24;
use smallvec::SmallVec;

/// The 16-byte seed for the keyed hash.
///
/// The host picks one seed per store before the first dict is created and
/// threads it through `dict::DictContext`; there is no process-wide global.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashSeed([u8; 16]);

impl HashSeed {
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn random<R: Rng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; 16];
        rng.fill(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    fn keys(&self) -> (u64, u64) {
        (
            u64::from_le_bytes(self.0[..8].try_into().unwrap()),
            u64::from_le_bytes(self.0[8..].try_into().unwrap()),
        )
    }
}

/// SipHash-2-4 of `data` keyed by `seed`, bit-for-bit compatible with the
/// reference implementation (the seed is the reference's 16-byte `k`).
pub fn hash_bytes(seed: &HashSeed, data: &[u8]) -> u64 {
    let (k0, k1) = seed.keys();
    let mut hasher = SipHasher24::new_with_keys(k0, k1);
    hasher.write(data);
    hasher.finish()
}

/// Case-insensitive variant of [`hash_bytes`]: the input is ASCII-lowercased
/// before hashing, so `b"FOO"` and `b"foo"` collide on purpose.
pub fn hash_bytes_nocase(seed: &HashSeed, data: &[u8]) -> u64 {
    let mut folded: SmallVec<[u8; 64]> = SmallVec::with_capacity(data.len());
    folded.extend(data.iter().map(|b| b.to_ascii_lowercase()));
    hash_bytes(seed, &folded)
}

/// A streaming hasher keyed by `seed`, for hashing values that are not
/// plain byte strings. Same SipHash-2-4 core as [`hash_bytes`].
pub fn seeded_hasher(seed: &HashSeed) -> impl Hasher {
    let (k0, k1) = seed.keys();
    SipHasher24::new_with_keys(k0, k1)
}
