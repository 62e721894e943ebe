
use std::fmt;
use std::str::FromStr;

use elements::hashes::Hash;
use elements::secp256k1_zkp::XOnlyPublicKey;
use elements::{AssetId, OutPoint, TxOut, Txid};

use crate::error::ValidationError;
use crate::scripts::{CheckSequenceVerifyScript, ForfeitScript, FrozenReceiverScript};
use crate::taproot::{RedeemTaprootTree, VirtualUtxoTaprootTree};
use crate::util::{self, Decodable, Encodable};
use crate::X_H_POINT;


/// Identifier of a vUTXO: the pool transaction that created it and
/// the output index of the shared coin it lives in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct VtxoId {
	pub pool_txid: Txid,
	pub vout: u32,
}

impl VtxoId {
	/// The fixed-width form used where vUTXOs key a byte table: raw
	/// txid bytes followed by the little-endian output index.
	pub fn to_key_bytes(self) -> [u8; 36] {
		let mut ret = [0u8; 36];
		ret[0..32].copy_from_slice(&self.pool_txid[..]);
		ret[32..36].copy_from_slice(&self.vout.to_le_bytes());
		ret
	}

	/// Inverse of [VtxoId::to_key_bytes].
	pub fn from_key_bytes(bytes: [u8; 36]) -> VtxoId {
		VtxoId {
			pool_txid: Txid::from_slice(&bytes[0..32]).expect("32 bytes"),
			vout: u32::from_le_bytes(bytes[32..36].try_into().expect("4 bytes")),
		}
	}

	pub fn outpoint(self) -> OutPoint {
		OutPoint::new(self.pool_txid, self.vout)
	}
}

impl From<OutPoint> for VtxoId {
	fn from(p: OutPoint) -> VtxoId {
		VtxoId { pool_txid: p.txid, vout: p.vout }
	}
}

impl fmt::Display for VtxoId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}:{}", self.pool_txid, self.vout)
	}
}

impl FromStr for VtxoId {
	type Err = &'static str;
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (txid, vout) = s.split_once(':').ok_or("expected <txid>:<vout>")?;
		Ok(VtxoId {
			pool_txid: txid.parse().map_err(|_| "invalid txid")?,
			vout: vout.parse().map_err(|_| "invalid output index")?,
		})
	}
}

/// An off-chain claim on one index of a pool transaction.
///
/// Immutable: a vUTXO is created by a pool transaction and destroyed
/// when its owner either transfers it in a later pool or broadcasts a
/// redeem transaction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct VirtualUtxo {
	pub txid: Txid,
	pub index: u32,
	pub tap_internal_key: XOnlyPublicKey,
	pub witness_utxo: TxOut,
}

impl VirtualUtxo {
	pub fn id(&self) -> VtxoId {
		self.outpoint().into()
	}

	pub fn outpoint(&self) -> OutPoint {
		OutPoint::new(self.txid, self.index)
	}

	/// The explicit value of the shared output.
	pub fn value(&self) -> Result<u64, ValidationError> {
		self.witness_utxo.value.explicit()
			.ok_or(ValidationError::Confidential("output value"))
	}

	/// The explicit asset of the shared output.
	pub fn asset(&self) -> Result<AssetId, ValidationError> {
		self.witness_utxo.asset.explicit()
			.ok_or(ValidationError::Confidential("output asset"))
	}
}

impl Encodable for VirtualUtxo {}
impl Decodable for VirtualUtxo {}

/// A vUTXO together with the taproot trees needed to spend or validate
/// it: the shared-output tree and the owner's redeem tree.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExtendedVirtualUtxo {
	pub vutxo: VirtualUtxo,
	pub vutxo_tree: VirtualUtxoTaprootTree,
	pub redeem_tree: RedeemTaprootTree,
}

impl Encodable for ExtendedVirtualUtxo {}
impl Decodable for ExtendedVirtualUtxo {}

/// Validate an [ExtendedVirtualUtxo] against the provider key and
/// return the owner key it is bound to.
///
/// Checks, in order: the internal key, the provider's claim leaf on the
/// shared output, the redeem tree's claim and forfeit leaves, that the
/// covenant leaf forwards into the redeem tree, and that every control
/// block reproduces the on-chain script. Any mismatch is fatal.
pub fn validate(
	ext: &ExtendedVirtualUtxo,
	provider: XOnlyPublicKey,
) -> Result<XOnlyPublicKey, ValidationError> {
	let bad = |reason| Err(ValidationError::InvalidVtxo(reason));

	if ext.vutxo.tap_internal_key != *X_H_POINT {
		return bad("internal key is not the protocol H point");
	}
	ext.vutxo.value()?;
	ext.vutxo.asset()?;

	let shared_claim = CheckSequenceVerifyScript::decompile(&ext.vutxo_tree.claim_leaf.script)?;
	if shared_claim.owner != provider {
		return bad("shared claim leaf is not owned by the provider");
	}

	let redeem_claim = CheckSequenceVerifyScript::decompile(&ext.redeem_tree.claim_leaf.script)?;
	let owner = redeem_claim.owner;

	if util::decode_bip68(redeem_claim.timeout)? >= util::decode_bip68(shared_claim.timeout)? {
		return bad("redeem timeout does not precede the claim timeout");
	}

	let forfeit = ForfeitScript::decompile(&ext.redeem_tree.forfeit_leaf.script)?;
	if forfeit.owner != owner {
		return bad("forfeit leaf owner differs from the redeem claim owner");
	}
	if forfeit.provider != provider {
		return bad("forfeit leaf provider mismatch");
	}

	let redeem_root = ext.redeem_tree.forfeit_leaf.merkle_root();
	if ext.redeem_tree.claim_leaf.merkle_root() != redeem_root {
		return bad("redeem tree leaves disagree on the merkle root");
	}
	if util::h_point_script(redeem_root) != ext.redeem_tree.output_script {
		return bad("redeem tree output script mismatch");
	}

	let frozen = FrozenReceiverScript::decompile(&ext.vutxo_tree.redeem_leaf.script)?;
	if frozen.owner != owner {
		return bad("covenant leaf owner mismatch");
	}
	if frozen.witness_program != ext.redeem_tree.witness_program() {
		return bad("covenant does not forward into the redeem tree");
	}

	let shared_root = ext.vutxo_tree.claim_leaf.merkle_root();
	if ext.vutxo_tree.redeem_leaf.merkle_root() != shared_root {
		return bad("shared output control blocks disagree on the merkle root");
	}
	let shared_script = util::h_point_script(shared_root);
	if shared_script != ext.vutxo.witness_utxo.script_pubkey {
		return bad("shared output script does not match the witness utxo");
	}
	if ext.vutxo_tree.output_script != shared_script {
		return bad("shared tree output script mismatch");
	}

	for leaf in [
		&ext.vutxo_tree.claim_leaf,
		&ext.vutxo_tree.redeem_leaf,
		&ext.redeem_tree.claim_leaf,
		&ext.redeem_tree.forfeit_leaf,
	] {
		if leaf.control_block.internal_key != *X_H_POINT {
			return bad("control block internal key is not the protocol H point");
		}
	}

	Ok(owner)
}
