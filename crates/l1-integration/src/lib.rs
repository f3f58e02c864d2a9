//! Shared types for L1/L2 integration
//!
//! Primitives used by every crate in the rollup: fixed-size hashes and
//! addresses, token amounts, the L1 block/transaction view the bridge
//! consumes, and the error taxonomy shared by all services.

pub mod error;
pub mod l1;

pub use error::{Classify, ErrorKind};
pub use l1::{L1BlockHeader, L1Event, L1Transaction, L1TxOutput};

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Token amount in base units
pub type Amount = u64;

/// L2 chain identifier, as carried in the burn payload
pub type ChainId = u32;

/// Base units per whole CAS
pub const COIN: Amount = 100_000_000;

/// Maximum amount that can ever exist (21M CAS)
pub const MAX_MONEY: Amount = 21_000_000 * COIN;

/// Chain id used when none is configured
pub const DEFAULT_L2_CHAIN_ID: ChainId = 1;

/// Implements hex display/parsing and dual serde for a fixed byte newtype.
///
/// Human-readable formats (JSON config, feeds) see a hex string; binary
/// formats (bincode on disk) see the raw byte array.
macro_rules! fixed_bytes {
    ($name:ident, $len:expr) => {
        impl $name {
            /// Byte length
            pub const LEN: usize = $len;

            /// All-zero value
            pub const ZERO: Self = Self([0u8; $len]);

            /// Borrow the raw bytes
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// True if every byte is zero
            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }

            /// Copy from a slice of exactly the right length
            pub fn from_slice(bytes: &[u8]) -> Option<Self> {
                let arr: [u8; $len] = bytes.try_into().ok()?;
                Some(Self(arr))
            }

            /// Parse from hex, with or without a `0x` prefix
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let mut out = [0u8; $len];
                hex::decode_to_slice(s.trim_start_matches("0x"), &mut out)?;
                Ok(Self(out))
            }

            /// Lowercase hex encoding
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.to_hex()[..16])
            }
        }

        impl FromStr for $name {
            type Err = hex::FromHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                if serializer.is_human_readable() {
                    serializer.serialize_str(&self.to_hex())
                } else {
                    Serialize::serialize(&self.0, serializer)
                }
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                if deserializer.is_human_readable() {
                    let s = <String as Deserialize>::deserialize(deserializer)?;
                    Self::from_hex(&s).map_err(de::Error::custom)
                } else {
                    <[u8; $len] as Deserialize>::deserialize(deserializer).map(Self)
                }
            }
        }
    };
}

/// 256-bit hash (blake3 digest, L1 txid, state root, record id)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BorshSerialize, BorshDeserialize)]
pub struct Hash256(pub [u8; 32]);

fixed_bytes!(Hash256, 32);

impl Hash256 {
    /// blake3 digest of a byte string
    pub fn digest(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// blake3 digest over several byte strings in order
    pub fn digest_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Bit at `index`, where bit 0 is the most significant bit of byte 0
    pub fn bit(&self, index: usize) -> bool {
        (self.0[index / 8] >> (7 - (index % 8))) & 1 == 1
    }
}

/// 160-bit L2 account address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BorshSerialize, BorshDeserialize)]
pub struct Address(pub [u8; 20]);

fixed_bytes!(Address, 20);

impl Address {
    /// Holds funds of withdrawals that are still inside their challenge period
    pub const WITHDRAWAL_ESCROW: Address = Address::reserved(0x01);

    /// Accumulates supply released back to L1 by completed withdrawals
    pub const RELEASED_SUPPLY: Address = Address::reserved(0x02);

    const fn reserved(tag: u8) -> Address {
        let mut bytes = [0xffu8; 20];
        bytes[19] = tag;
        Address(bytes)
    }

    /// Derive the L2 address for a compressed L1 public key
    pub fn from_pubkey(pubkey: &[u8]) -> Self {
        let digest = blake3::hash(pubkey);
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest.as_bytes()[..20]);
        Self(out)
    }

    /// Key of this account in the global state tree
    pub fn to_key(&self) -> Hash256 {
        let mut key = [0u8; 32];
        key[..20].copy_from_slice(&self.0);
        Hash256(key)
    }

    /// True for the zero address and the protocol-owned accounts
    pub fn is_reserved(&self) -> bool {
        self.is_zero() || self.0[..19].iter().all(|b| *b == 0xff)
    }
}
