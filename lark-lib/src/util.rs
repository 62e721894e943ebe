
use std::io;

use base64::Engine;
use elements::hashes::{sha256, Hash, HashEngine};
use elements::pset::PartiallySignedTransaction;
use elements::secp256k1_zkp::{self as secp256k1, Secp256k1};
use elements::taproot::{ControlBlock, TapNodeHash, TapLeafHash};
use elements::{Script, Sequence};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ValidationError;
use crate::X_H_POINT;

lazy_static! {
	/// Global secp context.
	pub static ref SECP: Secp256k1<secp256k1::All> = Secp256k1::new();
}

const SEQUENCE_LOCKTIME_DISABLE_FLAG: u32 = 1 << 31;
const SEQUENCE_LOCKTIME_TYPE_FLAG: u32 = 1 << 22;
const SEQUENCE_LOCKTIME_MASK: u32 = 0x0000_ffff;
/// BIP-68 time-based locks tick in units of 2^9 = 512 seconds.
const SEQUENCE_LOCKTIME_GRANULARITY: u32 = 9;

/// Encode a relative timelock in seconds as a time-based BIP-68
/// sequence number.
///
/// Defined only for multiples of 512 seconds up to `0xffff * 512`.
pub fn bip68(seconds: u32) -> Result<Sequence, ValidationError> {
	if seconds % 512 != 0 {
		return Err(ValidationError::InvalidTimelock("seconds must be a multiple of 512"));
	}
	let units = seconds >> SEQUENCE_LOCKTIME_GRANULARITY;
	if units > SEQUENCE_LOCKTIME_MASK {
		return Err(ValidationError::InvalidTimelock("timelock exceeds the BIP-68 range"));
	}
	Ok(Sequence(SEQUENCE_LOCKTIME_TYPE_FLAG | units))
}

/// Decode a sequence number that must be a time-based BIP-68 relative
/// timelock, returning the timelock in seconds.
pub fn decode_bip68(sequence: Sequence) -> Result<u32, ValidationError> {
	let n = sequence.0;
	if n & SEQUENCE_LOCKTIME_DISABLE_FLAG != 0 {
		return Err(ValidationError::InvalidTimelock("relative timelock is disabled"));
	}
	if n & SEQUENCE_LOCKTIME_TYPE_FLAG == 0 {
		return Err(ValidationError::InvalidTimelock("timelock is block-based"));
	}
	if n & !(SEQUENCE_LOCKTIME_TYPE_FLAG | SEQUENCE_LOCKTIME_MASK) != 0 {
		return Err(ValidationError::InvalidTimelock("unknown sequence bits set"));
	}
	Ok((n & SEQUENCE_LOCKTIME_MASK) << SEQUENCE_LOCKTIME_GRANULARITY)
}

/// Encode a non-negative integer the way script number pushes encode
/// them: little-endian, minimal, with an empty buffer for zero.
pub fn script_int(n: u32) -> Vec<u8> {
	let mut ret = Vec::with_capacity(5);
	let mut n = n as u64;
	while n > 0 {
		ret.push((n & 0xff) as u8);
		n >>= 8;
	}
	// A set top bit would flip the sign, so pad with a zero byte.
	if let Some(last) = ret.last() {
		if last & 0x80 != 0 {
			ret.push(0x00);
		}
	}
	ret
}

/// Recompute the taproot merkle root committed to by a control block,
/// starting from the leaf script it belongs to.
pub fn compute_merkle_root(script: &Script, control_block: &ControlBlock) -> sha256::Hash {
	let leaf = TapLeafHash::from_script(script, control_block.leaf_version);
	let mut node = sha256::Hash::from_byte_array(leaf.to_byte_array());
	for sibling in control_block.merkle_branch.as_inner() {
		let curr_hash = TapNodeHash::from_byte_array(node.to_byte_array());
		let mut eng = TapNodeHash::engine();
		if curr_hash.as_byte_array() < sibling.as_byte_array() {
			eng.input(curr_hash.as_ref());
			eng.input(sibling.as_ref());
		} else {
			eng.input(sibling.as_ref());
			eng.input(curr_hash.as_ref());
		}
		let branch = TapNodeHash::from_engine(eng);
		node = sha256::Hash::from_byte_array(branch.to_byte_array());
	}
	node
}

/// The taproot output script for the protocol's unspendable internal
/// key and the given merkle root.
pub fn h_point_script(merkle_root: sha256::Hash) -> Script {
	let root = TapNodeHash::from_byte_array(merkle_root.to_byte_array());
	Script::new_v1_p2tr(&SECP, *X_H_POINT, Some(root))
}

/// Base64 encoding of a PSET, the interchange format used towards users.
pub fn pset_to_base64(pset: &PartiallySignedTransaction) -> String {
	base64::engine::general_purpose::STANDARD.encode(elements::encode::serialize(pset))
}

/// Error decoding a base64 PSET.
#[derive(Debug, thiserror::Error)]
pub enum PsetDecodeError {
	#[error("invalid base64: {0}")]
	Base64(#[from] base64::DecodeError),
	#[error("invalid pset encoding: {0}")]
	Encoding(#[from] elements::encode::Error),
}

pub fn pset_from_base64(s: &str) -> Result<PartiallySignedTransaction, PsetDecodeError> {
	let bytes = base64::engine::general_purpose::STANDARD.decode(s)?;
	Ok(elements::encode::deserialize(&bytes)?)
}

pub trait Encodable: Serialize {
	fn encode(&self) -> Vec<u8> {
		let mut buf = Vec::new();
		ciborium::into_writer(self, &mut buf).expect("write to vec");
		buf
	}

	fn encode_into(&self, buf: &mut impl io::Write) {
		ciborium::into_writer(self, buf).expect("write error");
	}
}

pub trait Decodable: DeserializeOwned {
	fn decode(bytes: &[u8]) -> Result<Self, ciborium::de::Error<io::Error>> {
		ciborium::from_reader(bytes)
	}
}
