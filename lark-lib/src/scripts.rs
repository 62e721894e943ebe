
//! The three tapscript leaves of the protocol.
//!
//! Every codec compiles to a canonical byte sequence and decompiles
//! strictly: any deviation from the canonical opcode sequence is
//! rejected. The covenant leaves depend on byte-for-byte
//! reproducibility between signer and verifier.

use elements::opcodes::all::*;
use elements::opcodes::All;
use elements::script::{Builder, Instruction, Instructions};
use elements::secp256k1_zkp::{schnorr, XOnlyPublicKey};
use elements::taproot::ControlBlock;
use elements::{Script, Sequence};

use crate::error::ValidationError;
use crate::util;

/// A strict cursor over a script's instructions.
struct Decompiler<'a> {
	kind: &'static str,
	iter: Instructions<'a>,
}

impl<'a> Decompiler<'a> {
	fn new(kind: &'static str, script: &'a Script) -> Decompiler<'a> {
		Decompiler { kind, iter: script.instructions() }
	}

	fn fail(&self, reason: &'static str) -> ValidationError {
		ValidationError::MalformedScript { kind: self.kind, reason }
	}

	fn op(&mut self, op: All) -> Result<(), ValidationError> {
		match self.iter.next() {
			Some(Ok(Instruction::Op(o))) if o == op => Ok(()),
			_ => Err(self.fail("unexpected opcode")),
		}
	}

	fn ops(&mut self, ops: &[All]) -> Result<(), ValidationError> {
		for op in ops {
			self.op(*op)?;
		}
		Ok(())
	}

	fn push(&mut self, len: usize) -> Result<&'a [u8], ValidationError> {
		match self.iter.next() {
			Some(Ok(Instruction::PushBytes(b))) if b.len() == len => Ok(b),
			_ => Err(self.fail("unexpected push")),
		}
	}

	fn key(&mut self) -> Result<XOnlyPublicKey, ValidationError> {
		let bytes = self.push(32)?;
		XOnlyPublicKey::from_slice(bytes).map_err(|_| self.fail("invalid x-only public key"))
	}

	fn finish(mut self) -> Result<(), ValidationError> {
		if self.iter.next().is_some() {
			return Err(self.fail("trailing script bytes"));
		}
		Ok(())
	}
}

/// Claim clause releasing a coin to `owner` after a relative timelock:
///
/// `<timeout> CSV DROP <owner> CHECKSIG`
///
/// The timeout is pushed as its 4-byte little-endian consensus
/// encoding and must be a valid time-based BIP-68 lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckSequenceVerifyScript {
	pub owner: XOnlyPublicKey,
	pub timeout: Sequence,
}

impl CheckSequenceVerifyScript {
	pub fn new(owner: XOnlyPublicKey, timeout: Sequence) -> Result<Self, ValidationError> {
		util::decode_bip68(timeout)?;
		Ok(CheckSequenceVerifyScript { owner, timeout })
	}

	pub fn compile(&self) -> Script {
		Builder::new()
			.push_slice(&self.timeout.0.to_le_bytes())
			.push_opcode(OP_CSV)
			.push_opcode(OP_DROP)
			.push_slice(&self.owner.serialize())
			.push_opcode(OP_CHECKSIG)
			.into_script()
	}

	pub fn decompile(script: &Script) -> Result<Self, ValidationError> {
		let mut d = Decompiler::new("csv", script);
		let timeout = {
			let bytes = d.push(4)?;
			Sequence(u32::from_le_bytes(bytes.try_into().expect("4 bytes")))
		};
		util::decode_bip68(timeout)?;
		d.ops(&[OP_CSV, OP_DROP])?;
		let owner = d.key()?;
		d.op(OP_CHECKSIG)?;
		d.finish()?;
		Ok(CheckSequenceVerifyScript { owner, timeout })
	}

	/// Witness stack for a claim spend. The spending input must carry
	/// [Self::timeout] (or later) as its sequence number.
	pub fn witness(
		&self,
		signature: &schnorr::Signature,
		control_block: &ControlBlock,
	) -> Vec<Vec<u8>> {
		vec![
			signature[..].to_vec(),
			self.compile().into_bytes(),
			control_block.serialize(),
		]
	}
}

const FROZEN_RECEIVER_FORWARD_OPS: &[All] = &[
	// assert the named output carries the input's asset, byte for byte
	OP_DUP,
	OP_PUSHCURRENTINPUTINDEX,
	OP_INSPECTINPUTASSET,
	OP_CAT,
	OP_SWAP,
	OP_INSPECTOUTPUTASSET,
	OP_CAT,
	OP_EQUALVERIFY,
	// same for the value
	OP_DUP,
	OP_PUSHCURRENTINPUTINDEX,
	OP_INSPECTINPUTVALUE,
	OP_CAT,
	OP_SWAP,
	OP_INSPECTOUTPUTVALUE,
	OP_CAT,
	OP_EQUALVERIFY,
	// the named output must be segwit v1
	OP_INSPECTOUTPUTSCRIPTPUBKEY,
	OP_PUSHNUM_1,
	OP_EQUALVERIFY,
];

/// Introspection covenant forcing the spent coin to be forwarded in its
/// entirety, asset and value preserved, to one segwit v1 output whose
/// witness program equals [Self::witness_program].
///
/// Witness stack at spend: `[outputIndexOrEmpty, ownerSig, <script>,
/// <controlBlock>]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrozenReceiverScript {
	pub owner: XOnlyPublicKey,
	pub witness_program: [u8; 32],
}

impl FrozenReceiverScript {
	pub fn compile(&self) -> Script {
		let mut b = Builder::new()
			.push_slice(&self.owner.serialize())
			.push_opcode(OP_CHECKSIGVERIFY);
		for op in FROZEN_RECEIVER_FORWARD_OPS {
			b = b.push_opcode(*op);
		}
		b.push_slice(&self.witness_program)
			.push_opcode(OP_EQUAL)
			.into_script()
	}

	pub fn decompile(script: &Script) -> Result<Self, ValidationError> {
		let mut d = Decompiler::new("frozen-receiver", script);
		let owner = d.key()?;
		d.op(OP_CHECKSIGVERIFY)?;
		d.ops(FROZEN_RECEIVER_FORWARD_OPS)?;
		let witness_program = d.push(32)?.try_into().expect("32 bytes");
		d.op(OP_EQUAL)?;
		d.finish()?;
		Ok(FrozenReceiverScript { owner, witness_program })
	}

	/// The segwit v1 output script the covenant forwards to.
	pub fn receiver_script(&self) -> Script {
		Builder::new()
			.push_opcode(OP_PUSHNUM_1)
			.push_slice(&self.witness_program)
			.into_script()
	}

	/// Witness stack for a covenant spend forwarding the coin to output
	/// `output_index`. Index zero is encoded as an empty push.
	pub fn witness(
		&self,
		output_index: u32,
		owner_sig: &schnorr::Signature,
		control_block: &ControlBlock,
	) -> Vec<Vec<u8>> {
		vec![
			util::script_int(output_index),
			owner_sig[..].to_vec(),
			self.compile().into_bytes(),
			control_block.serialize(),
		]
	}
}

/// Joint forfeit clause of a redeem output.
///
/// Witness stack at spend: `[aspSig, userSig, outpointBytes,
/// promisedTxId, <script>, <controlBlock>]`, where `outpointBytes` is
/// the 36-byte spent-vUTXO outpoint and `promisedTxId` the raw
/// (reversed) txid of the promised pool transaction.
///
/// The script hashes `outpointBytes || promisedTxId`, verifies both
/// signatures over the digest with CHECKSIGFROMSTACK, and finally
/// requires input 0 of the spending transaction to spend the promised
/// pool transaction. Neither signature commits to the spending
/// transaction itself; the introspection check is what ties the spend
/// to the promised pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForfeitScript {
	pub owner: XOnlyPublicKey,
	pub provider: XOnlyPublicKey,
}

impl ForfeitScript {
	pub fn compile(&self) -> Script {
		Builder::new()
			// hash = SHA256(outpoint || promised)
			.push_opcode(OP_2DUP)
			.push_opcode(OP_CAT)
			.push_opcode(OP_SHA256)
			// drop the outpoint, keep the promised txid for later
			.push_opcode(OP_ROT)
			.push_opcode(OP_DROP)
			.push_opcode(OP_ROT)
			.push_opcode(OP_SWAP)
			.push_opcode(OP_DUP)
			.push_opcode(OP_TOALTSTACK)
			.push_slice(&self.owner.serialize())
			.push_opcode(OP_CHECKSIGFROMSTACKVERIFY)
			.push_opcode(OP_FROMALTSTACK)
			.push_opcode(OP_ROT)
			.push_opcode(OP_SWAP)
			.push_slice(&self.provider.serialize())
			.push_opcode(OP_CHECKSIGFROMSTACKVERIFY)
			// input 0 must spend the promised pool tx
			.push_int(0)
			.push_opcode(OP_INSPECTINPUTOUTPOINT)
			.push_opcode(OP_DROP)
			.push_opcode(OP_DROP)
			.push_opcode(OP_EQUAL)
			.into_script()
	}

	pub fn decompile(script: &Script) -> Result<Self, ValidationError> {
		let mut d = Decompiler::new("forfeit", script);
		d.ops(&[
			OP_2DUP, OP_CAT, OP_SHA256, OP_ROT, OP_DROP, OP_ROT, OP_SWAP, OP_DUP,
			OP_TOALTSTACK,
		])?;
		let owner = d.key()?;
		d.ops(&[OP_CHECKSIGFROMSTACKVERIFY, OP_FROMALTSTACK, OP_ROT, OP_SWAP])?;
		let provider = d.key()?;
		d.op(OP_CHECKSIGFROMSTACKVERIFY)?;
		d.push(0)?;
		d.ops(&[OP_INSPECTINPUTOUTPOINT, OP_DROP, OP_DROP, OP_EQUAL])?;
		d.finish()?;
		Ok(ForfeitScript { owner, provider })
	}

	/// Witness stack for a forfeit spend.
	pub fn witness(
		&self,
		outpoint: &[u8; 36],
		promised_txid: &[u8; 32],
		asp_sig: &schnorr::Signature,
		user_sig: &schnorr::Signature,
		control_block: &ControlBlock,
	) -> Vec<Vec<u8>> {
		vec![
			asp_sig[..].to_vec(),
			user_sig[..].to_vec(),
			outpoint.to_vec(),
			promised_txid.to_vec(),
			self.compile().into_bytes(),
			control_block.serialize(),
		]
	}
}

#[cfg(test)]
mod test {
	use super::*;

	use crate::test::{ASP_KEY, USER_KEY};
	use crate::{util, REDEEM_TIMEOUT};

	fn owner() -> XOnlyPublicKey {
		USER_KEY.x_only_public_key().0
	}

	fn provider() -> XOnlyPublicKey {
		ASP_KEY.x_only_public_key().0
	}

	#[test]
	fn csv_roundtrip() {
		let script = CheckSequenceVerifyScript::new(owner(), REDEEM_TIMEOUT).unwrap();
		let compiled = script.compile();
		let decompiled = CheckSequenceVerifyScript::decompile(&compiled).unwrap();
		assert_eq!(script, decompiled);
		assert_eq!(compiled, decompiled.compile());
	}

	#[test]
	fn csv_rejects_bad_timeout() {
		// block-based sequence numbers are not admissible
		assert!(CheckSequenceVerifyScript::new(owner(), Sequence(100)).is_err());

		// a script carrying a block-based lock must not decompile
		let script = Builder::new()
			.push_slice(&100u32.to_le_bytes())
			.push_opcode(OP_CSV)
			.push_opcode(OP_DROP)
			.push_slice(&owner().serialize())
			.push_opcode(OP_CHECKSIG)
			.into_script();
		assert!(CheckSequenceVerifyScript::decompile(&script).is_err());
	}

	#[test]
	fn csv_rejects_deviations() {
		let script = CheckSequenceVerifyScript::new(owner(), REDEEM_TIMEOUT).unwrap();
		let bytes = script.compile().into_bytes();

		// swapping the trailing CHECKSIG for CHECKSIGVERIFY
		let mut tampered = bytes.clone();
		*tampered.last_mut().unwrap() = OP_CHECKSIGVERIFY.into_u8();
		assert!(CheckSequenceVerifyScript::decompile(&tampered.into()).is_err());

		// trailing garbage
		let mut tampered = bytes.clone();
		tampered.push(OP_DROP.into_u8());
		assert!(CheckSequenceVerifyScript::decompile(&tampered.into()).is_err());

		// truncation
		let tampered = bytes[..bytes.len() - 1].to_vec();
		assert!(CheckSequenceVerifyScript::decompile(&tampered.into()).is_err());
	}

	#[test]
	fn frozen_receiver_roundtrip() {
		let script = FrozenReceiverScript { owner: owner(), witness_program: [0x42; 32] };
		let compiled = script.compile();
		let decompiled = FrozenReceiverScript::decompile(&compiled).unwrap();
		assert_eq!(script, decompiled);
		assert_eq!(compiled, decompiled.compile());

		let spk = script.receiver_script();
		assert_eq!(spk.len(), 34);
		assert_eq!(spk.as_bytes()[0], OP_PUSHNUM_1.into_u8());
		assert_eq!(&spk.as_bytes()[2..], &[0x42; 32]);
	}

	#[test]
	fn frozen_receiver_rejects_other_scripts() {
		let csv = CheckSequenceVerifyScript::new(owner(), REDEEM_TIMEOUT).unwrap();
		assert!(FrozenReceiverScript::decompile(&csv.compile()).is_err());

		let forfeit = ForfeitScript { owner: owner(), provider: provider() };
		assert!(FrozenReceiverScript::decompile(&forfeit.compile()).is_err());
	}

	#[test]
	fn frozen_receiver_witness_shape() {
		let script = FrozenReceiverScript { owner: owner(), witness_program: [0x42; 32] };
		let tree = crate::taproot::redeem_taproot(
			owner(), provider(), REDEEM_TIMEOUT,
		).unwrap();
		let sig = schnorr::Signature::from_slice(&[1; 64]).unwrap();

		let w = script.witness(0, &sig, &tree.forfeit_leaf.control_block);
		assert_eq!(w.len(), 4);
		// index zero is an empty push
		assert!(w[0].is_empty());
		assert_eq!(w[1].len(), 64);
		assert_eq!(w[2], script.compile().into_bytes());

		let w = script.witness(3, &sig, &tree.forfeit_leaf.control_block);
		assert_eq!(w[0], vec![0x03]);
	}

	#[test]
	fn forfeit_roundtrip() {
		let script = ForfeitScript { owner: owner(), provider: provider() };
		let compiled = script.compile();
		let decompiled = ForfeitScript::decompile(&compiled).unwrap();
		assert_eq!(script, decompiled);
		assert_eq!(compiled, decompiled.compile());
	}

	#[test]
	fn forfeit_swapped_keys_decompile_differently() {
		let script = ForfeitScript { owner: owner(), provider: provider() };
		let swapped = ForfeitScript { owner: provider(), provider: owner() };
		let decompiled = ForfeitScript::decompile(&swapped.compile()).unwrap();
		assert_ne!(script, decompiled);
		assert_eq!(decompiled.owner, provider());
		assert_eq!(decompiled.provider, owner());
	}

	#[test]
	fn forfeit_witness_shape() {
		let script = ForfeitScript { owner: owner(), provider: provider() };
		let tree = crate::taproot::redeem_taproot(
			owner(), provider(), REDEEM_TIMEOUT,
		).unwrap();
		let sig = schnorr::Signature::from_slice(&[1; 64]).unwrap();

		let w = script.witness(
			&[7; 36], &[9; 32], &sig, &sig, &tree.forfeit_leaf.control_block,
		);
		assert_eq!(w.len(), 6);
		assert_eq!(w[2].len(), 36);
		assert_eq!(w[3].len(), 32);
		assert_eq!(w[4], script.compile().into_bytes());
		assert_eq!(w[5], tree.forfeit_leaf.control_block.serialize());
	}

	#[test]
	fn scripts_are_distinct() {
		// byte-level canonical forms never collide between codecs
		let csv = CheckSequenceVerifyScript::new(owner(), util::bip68(1024).unwrap())
			.unwrap().compile();
		let frozen = FrozenReceiverScript { owner: owner(), witness_program: [0; 32] }.compile();
		let forfeit = ForfeitScript { owner: owner(), provider: provider() }.compile();
		assert_ne!(csv, frozen);
		assert_ne!(csv, forfeit);
		assert_ne!(frozen, forfeit);
	}
}
