//! Burn script parser
//!
//! A burn is an L1 output whose script is `OP_RETURN <51-byte push>`:
//!
//! ```text
//! "L2BURN" | chain id (u32 LE) | recipient pubkey (33 bytes) | amount (u64 LE)
//! ```
//!
//! The push is either a direct `0x33` push or `OP_PUSHDATA1 0x33`. Nothing may
//! follow it.

use crate::error::ParseError;
use borsh::{BorshDeserialize, BorshSerialize};
use l1_integration::{Address, Amount, ChainId, L1Transaction};
use serde::{Deserialize, Serialize};

/// Tag opening every burn payload
pub const BURN_MAGIC: &[u8; 6] = b"L2BURN";

/// Compressed secp256k1 public key length
pub const PUBKEY_LEN: usize = 33;

/// Payload length: tag + chain id + pubkey + amount
pub const BURN_PAYLOAD_LEN: usize = BURN_MAGIC.len() + 4 + PUBKEY_LEN + 8;

const OP_RETURN: u8 = 0x6a;
const OP_PUSHDATA1: u8 = 0x4c;

/// Decoded burn payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct BurnIntent {
    pub chain_id: ChainId,
    #[serde(with = "pubkey_hex")]
    pub recipient_pubkey: [u8; PUBKEY_LEN],
    pub amount: Amount,
}

impl BurnIntent {
    /// L2 address credited by this burn
    pub fn recipient_address(&self) -> Address {
        Address::from_pubkey(&self.recipient_pubkey)
    }

    /// Payload bytes carried by the OP_RETURN push
    pub fn to_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(BURN_PAYLOAD_LEN);
        payload.extend_from_slice(BURN_MAGIC);
        payload.extend_from_slice(&self.chain_id.to_le_bytes());
        payload.extend_from_slice(&self.recipient_pubkey);
        payload.extend_from_slice(&self.amount.to_le_bytes());
        payload
    }
}

/// Parse a complete output script
pub fn parse_burn_script(script: &[u8]) -> Result<BurnIntent, ParseError> {
    if script.first() != Some(&OP_RETURN) {
        return Err(ParseError::NotOpReturn);
    }

    let (len, offset) = match script.get(1) {
        Some(&OP_PUSHDATA1) => match script.get(2) {
            Some(len) => (*len as usize, 3),
            None => {
                return Err(ParseError::WrongLength {
                    expected: BURN_PAYLOAD_LEN,
                    actual: 0,
                })
            }
        },
        Some(&op) if op as usize == BURN_PAYLOAD_LEN => (BURN_PAYLOAD_LEN, 2),
        Some(&op) => return Err(ParseError::BadPush(op)),
        None => {
            return Err(ParseError::WrongLength {
                expected: BURN_PAYLOAD_LEN,
                actual: 0,
            })
        }
    };

    if len != BURN_PAYLOAD_LEN {
        return Err(ParseError::WrongLength {
            expected: BURN_PAYLOAD_LEN,
            actual: len,
        });
    }

    let available = script.len() - offset;
    if available < BURN_PAYLOAD_LEN {
        return Err(ParseError::WrongLength {
            expected: BURN_PAYLOAD_LEN,
            actual: available,
        });
    }
    if available > BURN_PAYLOAD_LEN {
        return Err(ParseError::TrailingBytes(available - BURN_PAYLOAD_LEN));
    }

    parse_burn_payload(&script[offset..])
}

/// Parse the 51-byte payload
pub fn parse_burn_payload(payload: &[u8]) -> Result<BurnIntent, ParseError> {
    if payload.len() != BURN_PAYLOAD_LEN {
        return Err(ParseError::WrongLength {
            expected: BURN_PAYLOAD_LEN,
            actual: payload.len(),
        });
    }

    let (magic, rest) = payload.split_at(BURN_MAGIC.len());
    if magic != BURN_MAGIC {
        return Err(ParseError::BadMagic);
    }

    let (chain_bytes, rest) = rest.split_at(4);
    let (pubkey_bytes, amount_bytes) = rest.split_at(PUBKEY_LEN);

    let mut chain = [0u8; 4];
    chain.copy_from_slice(chain_bytes);
    let chain_id = ChainId::from_le_bytes(chain);
    if chain_id == 0 {
        return Err(ParseError::ZeroChainId);
    }

    let prefix = pubkey_bytes[0];
    if prefix != 0x02 && prefix != 0x03 {
        return Err(ParseError::BadPubkeyPrefix(prefix));
    }
    let mut recipient_pubkey = [0u8; PUBKEY_LEN];
    recipient_pubkey.copy_from_slice(pubkey_bytes);

    let mut amount_le = [0u8; 8];
    amount_le.copy_from_slice(amount_bytes);
    let amount = Amount::from_le_bytes(amount_le);
    if amount == 0 {
        return Err(ParseError::ZeroAmount);
    }

    Ok(BurnIntent {
        chain_id,
        recipient_pubkey,
        amount,
    })
}

/// Build the canonical (direct push) burn script
pub fn build_burn_script(intent: &BurnIntent) -> Vec<u8> {
    let mut script = Vec::with_capacity(2 + BURN_PAYLOAD_LEN);
    script.push(OP_RETURN);
    script.push(BURN_PAYLOAD_LEN as u8);
    script.extend_from_slice(&intent.to_payload());
    script
}

/// True if the script claims to be a burn: OP_RETURN carrying the tag
pub fn is_burn_candidate(script: &[u8]) -> bool {
    script.first() == Some(&OP_RETURN)
        && script
            .windows(BURN_MAGIC.len())
            .take(4)
            .any(|w| w == BURN_MAGIC)
}

/// Find and parse the burn output of an L1 transaction
///
/// Returns the output index. A transaction with no burn candidate yields
/// `None`; one with several is malformed.
pub fn find_burn_output(tx: &L1Transaction) -> Result<Option<(usize, BurnIntent)>, ParseError> {
    let candidates: Vec<usize> = tx
        .outputs
        .iter()
        .enumerate()
        .filter(|(_, out)| is_burn_candidate(&out.script))
        .map(|(i, _)| i)
        .collect();

    match candidates.as_slice() {
        [] => Ok(None),
        [index] => {
            let intent = parse_burn_script(&tx.outputs[*index].script)?;
            Ok(Some((*index, intent)))
        }
        many => Err(ParseError::MultipleBurnOutputs(many.len())),
    }
}

mod pubkey_hex {
    use super::PUBKEY_LEN;
    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(key: &[u8; PUBKEY_LEN], s: S) -> Result<S::Ok, S::Error> {
        if s.is_human_readable() {
            hex::encode(key).serialize(s)
        } else {
            key.as_slice().serialize(s)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; PUBKEY_LEN], D::Error> {
        let bytes: Vec<u8> = if d.is_human_readable() {
            let s = String::deserialize(d)?;
            hex::decode(s).map_err(de::Error::custom)?
        } else {
            Vec::<u8>::deserialize(d)?
        };
        <[u8; PUBKEY_LEN]>::try_from(bytes.as_slice()).map_err(|_| de::Error::custom("pubkey must be 33 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use l1_integration::{Hash256, L1TxOutput, COIN};

    fn intent() -> BurnIntent {
        let mut recipient_pubkey = [7u8; PUBKEY_LEN];
        recipient_pubkey[0] = 0x02;
        BurnIntent {
            chain_id: 1,
            recipient_pubkey,
            amount: 100 * COIN,
        }
    }

    #[test]
    fn test_parse_direct_and_pushdata1() {
        let script = build_burn_script(&intent());
        assert_eq!(script.len(), 53);
        assert_eq!(parse_burn_script(&script).unwrap(), intent());

        let mut long_form = vec![0x6a, 0x4c, 0x33];
        long_form.extend_from_slice(&intent().to_payload());
        assert_eq!(parse_burn_script(&long_form).unwrap(), intent());
    }

    #[test]
    fn test_rejects_bad_layouts() {
        let good = build_burn_script(&intent());

        let mut not_op_return = good.clone();
        not_op_return[0] = 0x51;
        assert_eq!(parse_burn_script(&not_op_return), Err(ParseError::NotOpReturn));

        let mut trailing = good.clone();
        trailing.push(0);
        assert_eq!(parse_burn_script(&trailing), Err(ParseError::TrailingBytes(1)));

        assert!(matches!(
            parse_burn_script(&good[..40]),
            Err(ParseError::WrongLength { actual: 38, .. })
        ));

        let mut bad_magic = good.clone();
        bad_magic[2] = b'X';
        assert_eq!(parse_burn_script(&bad_magic), Err(ParseError::BadMagic));

        let mut bad_push = good.clone();
        bad_push[1] = 0x20;
        assert_eq!(parse_burn_script(&bad_push), Err(ParseError::BadPush(0x20)));

        assert_eq!(parse_burn_script(&[]), Err(ParseError::NotOpReturn));
        assert!(parse_burn_script(&[0x6a]).is_err());
    }

    #[test]
    fn test_rejects_bad_fields() {
        let mut zero_chain = intent();
        zero_chain.chain_id = 0;
        assert_eq!(
            parse_burn_script(&build_burn_script(&zero_chain)),
            Err(ParseError::ZeroChainId)
        );

        let mut zero_amount = intent();
        zero_amount.amount = 0;
        assert_eq!(
            parse_burn_script(&build_burn_script(&zero_amount)),
            Err(ParseError::ZeroAmount)
        );

        let mut uncompressed = intent();
        uncompressed.recipient_pubkey[0] = 0x04;
        assert_eq!(
            parse_burn_script(&build_burn_script(&uncompressed)),
            Err(ParseError::BadPubkeyPrefix(0x04))
        );
    }

    #[test]
    fn test_find_burn_output() {
        let change = L1TxOutput {
            value: 5 * COIN,
            script: vec![0x76, 0xa9, 0x14],
        };
        let memo = L1TxOutput {
            value: 0,
            script: vec![0x6a, 0x04, b'm', b'e', b'm', b'o'],
        };
        let burn = L1TxOutput {
            value: 100 * COIN,
            script: build_burn_script(&intent()),
        };

        let tx = L1Transaction {
            txid: Hash256([1; 32]),
            outputs: vec![change.clone(), memo.clone(), burn.clone()],
        };
        assert_eq!(find_burn_output(&tx).unwrap(), Some((2, intent())));

        let plain = L1Transaction {
            txid: Hash256([2; 32]),
            outputs: vec![change, memo],
        };
        assert_eq!(find_burn_output(&plain).unwrap(), None);

        let double = L1Transaction {
            txid: Hash256([3; 32]),
            outputs: vec![burn.clone(), burn],
        };
        assert_eq!(find_burn_output(&double), Err(ParseError::MultipleBurnOutputs(2)));
    }

    #[test]
    fn test_recipient_address_is_stable() {
        let a = intent().recipient_address();
        assert_eq!(a, Address::from_pubkey(&intent().recipient_pubkey));
        let mut other = intent();
        other.recipient_pubkey[5] = 9;
        assert_ne!(other.recipient_address(), a);
    }

    #[test]
    fn test_json_uses_hex_pubkey() {
        let json = serde_json::to_string(&intent()).unwrap();
        assert!(json.contains("\"recipient_pubkey\":\"0207"));
        let back: BurnIntent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, intent());
    }
}
