
//! Assembly of the protocol's two nested taproot trees.
//!
//! Every output built here uses the unspendable [H_POINT](crate::H_POINT)
//! as internal key, so the only spending paths are the leaves.

use elements::hashes::sha256;
use elements::secp256k1_zkp::XOnlyPublicKey;
use elements::taproot::{ControlBlock, LeafVersion, TaprootBuilder, TaprootSpendInfo};
use elements::{Script, Sequence};

use crate::error::ValidationError;
use crate::scripts::{CheckSequenceVerifyScript, ForfeitScript, FrozenReceiverScript};
use crate::util::{self, SECP};
use crate::X_H_POINT;


/// A resolved tapscript leaf: the script together with the control
/// block proving its place in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaprootLeaf {
	pub script: Script,
	pub control_block: ControlBlock,
}

impl TaprootLeaf {
	fn resolve(spend_info: &TaprootSpendInfo, script: Script) -> TaprootLeaf {
		let control_block = spend_info
			.control_block(&(script.clone(), LeafVersion::default()))
			.expect("leaf is in the tree");
		TaprootLeaf { script, control_block }
	}

	/// Recompute the merkle root this leaf commits to.
	pub fn merkle_root(&self) -> sha256::Hash {
		util::compute_merkle_root(&self.script, &self.control_block)
	}
}

#[derive(Deserialize, Serialize)]
struct TaprootLeafEncoding {
	script: Vec<u8>,
	control_block: Vec<u8>,
}

impl serde::Serialize for TaprootLeaf {
	fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
		TaprootLeafEncoding {
			script: self.script.to_bytes(),
			control_block: self.control_block.serialize(),
		}.serialize(s)
	}
}

impl<'de> serde::Deserialize<'de> for TaprootLeaf {
	fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
		let enc = TaprootLeafEncoding::deserialize(d)?;
		Ok(TaprootLeaf {
			script: enc.script.into(),
			control_block: ControlBlock::from_slice(&enc.control_block)
				.map_err(serde::de::Error::custom)?,
		})
	}
}

/// The taproot tree of a per-user redeem output: the user's delayed
/// claim and the joint forfeit clause tied to a promised pool txid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RedeemTaprootTree {
	pub forfeit_leaf: TaprootLeaf,
	pub claim_leaf: TaprootLeaf,
	pub output_script: Script,
}

impl RedeemTaprootTree {
	/// The 32-byte witness program of the redeem output.
	pub fn witness_program(&self) -> [u8; 32] {
		self.output_script.as_bytes()[2..34].try_into().expect("p2tr script")
	}
}

impl util::Encodable for RedeemTaprootTree {}
impl util::Decodable for RedeemTaprootTree {}

/// Build the redeem tree for `owner`.
pub fn redeem_taproot(
	owner: XOnlyPublicKey,
	provider: XOnlyPublicKey,
	redeem_timeout: Sequence,
) -> Result<RedeemTaprootTree, ValidationError> {
	let forfeit_script = ForfeitScript { owner, provider }.compile();
	let claim_script = CheckSequenceVerifyScript::new(owner, redeem_timeout)?.compile();
	let spend_info = TaprootBuilder::new()
		.add_leaf(1, forfeit_script.clone()).expect("valid depth")
		.add_leaf(1, claim_script.clone()).expect("valid depth")
		.finalize(&SECP, *X_H_POINT)
		.map_err(|_| ValidationError::Taproot("redeem tree finalization failed"))?;
	Ok(RedeemTaprootTree {
		forfeit_leaf: TaprootLeaf::resolve(&spend_info, forfeit_script),
		claim_leaf: TaprootLeaf::resolve(&spend_info, claim_script),
		output_script: Script::new_v1_p2tr_tweaked(spend_info.output_key()),
	})
}

/// Build a stakeholder's redeem tree together with the FrozenReceiver
/// leaf script that forwards the shared coin into it.
pub fn stakeholder_scripts(
	owner: XOnlyPublicKey,
	provider: XOnlyPublicKey,
	redeem_timeout: Sequence,
) -> Result<(RedeemTaprootTree, Script), ValidationError> {
	let redeem_tree = redeem_taproot(owner, provider, redeem_timeout)?;
	let frozen = FrozenReceiverScript {
		owner,
		witness_program: redeem_tree.witness_program(),
	}.compile();
	Ok((redeem_tree, frozen))
}

/// One stakeholder's view of the shared pool output: the provider's
/// claim leaf and the stakeholder's own redeem leaf.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct VirtualUtxoTaprootTree {
	pub claim_leaf: TaprootLeaf,
	pub redeem_leaf: TaprootLeaf,
	pub output_script: Script,
}

impl util::Encodable for VirtualUtxoTaprootTree {}
impl util::Decodable for VirtualUtxoTaprootTree {}

/// The taproot tree of a shared pool output.
///
/// The tree is an amount-weighted Huffman tree over the stakeholders'
/// redeem leaves, with one provider claim leaf weighted at the
/// stakeholder total. The construction is deterministic in the ordered
/// stakeholder list, which is what lets builder and validator agree on
/// the merkle root.
#[derive(Debug, Clone)]
pub struct SharedCoinTree {
	spend_info: TaprootSpendInfo,
	claim_script: Script,
	stakeholder_scripts: Vec<Script>,
	output_script: Script,
}

/// Build the shared coin tree from the ordered `(amount, redeem leaf
/// script)` stakeholder list and the provider claim leaf script.
pub fn shared_coin_tree(
	stakeholders: &[(u64, Script)],
	claim_script: Script,
) -> Result<SharedCoinTree, ValidationError> {
	if stakeholders.is_empty() {
		return Err(ValidationError::Empty);
	}
	let total: u64 = stakeholders.iter().map(|(amount, _)| *amount).sum();
	// Huffman weights are u32; amounts above that just saturate, which
	// only flattens the tree.
	let weight = |amount: u64| amount.min(u32::MAX as u64) as u32;
	let leaves = stakeholders.iter()
		.map(|(amount, script)| (weight(*amount), script.clone()))
		.chain([(weight(total), claim_script.clone())]);
	let spend_info = TaprootSpendInfo::with_huffman_tree(&SECP, *X_H_POINT, leaves)
		.map_err(|_| ValidationError::Taproot("huffman tree construction failed"))?;
	let output_script = Script::new_v1_p2tr_tweaked(spend_info.output_key());
	Ok(SharedCoinTree {
		spend_info,
		claim_script,
		stakeholder_scripts: stakeholders.iter().map(|(_, s)| s.clone()).collect(),
		output_script,
	})
}

impl SharedCoinTree {
	pub fn output_script(&self) -> &Script {
		&self.output_script
	}

	pub fn nb_stakeholders(&self) -> usize {
		self.stakeholder_scripts.len()
	}

	/// The provider's claim leaf.
	pub fn claim_leaf(&self) -> TaprootLeaf {
		TaprootLeaf::resolve(&self.spend_info, self.claim_script.clone())
	}

	/// The redeem leaf of the stakeholder at `idx` in the original
	/// stakeholder list.
	pub fn redeem_leaf(&self, idx: usize) -> TaprootLeaf {
		TaprootLeaf::resolve(&self.spend_info, self.stakeholder_scripts[idx].clone())
	}

	/// The full per-stakeholder tree for the stakeholder at `idx`.
	pub fn vutxo_tree(&self, idx: usize) -> VirtualUtxoTaprootTree {
		VirtualUtxoTaprootTree {
			claim_leaf: self.claim_leaf(),
			redeem_leaf: self.redeem_leaf(idx),
			output_script: self.output_script.clone(),
		}
	}
}
