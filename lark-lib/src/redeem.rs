
//! Unilateral exit: the redeem transaction a user broadcasts to move
//! their vUTXO out of the shared pool output without the provider.

use elements::hashes::Hash;
use elements::pset::{self, PartiallySignedTransaction};
use elements::secp256k1_zkp::{schnorr, Message};
use elements::sighash::{self, SighashCache};
use elements::taproot::{TapNodeHash, TapLeafHash};
use elements::BlockHash;

use crate::error::ValidationError;
use crate::scripts::FrozenReceiverScript;
use crate::taproot::TaprootLeaf;
use crate::vtxo::VirtualUtxo;
use crate::{Network, X_H_POINT};


/// A redeem PSET together with the covenant finalizer for its input.
///
/// The covenant forwards the full vUTXO value to the redeem-tree
/// output at index 0. The transaction pays no fee by itself: the
/// caller adds a fee input and fee output before signing.
#[derive(Debug, Clone)]
pub struct RedeemTransaction {
	pub pset: PartiallySignedTransaction,
	frozen: FrozenReceiverScript,
	redeem_leaf: TaprootLeaf,
}

/// Build the redeem transaction spending `vutxo` through its
/// FrozenReceiver leaf.
pub fn make_redeem_transaction(
	vutxo: &VirtualUtxo,
	redeem_leaf: &TaprootLeaf,
	network: &Network,
) -> Result<RedeemTransaction, ValidationError> {
	let frozen = FrozenReceiverScript::decompile(&redeem_leaf.script)?;
	let value = vutxo.value()?;
	if vutxo.asset()? != network.asset {
		return Err(ValidationError::WrongAsset);
	}

	let mut pset = PartiallySignedTransaction::new_v2();

	let mut inp = pset::Input::default();
	inp.previous_txid = vutxo.txid;
	inp.previous_output_index = vutxo.index;
	inp.witness_utxo = Some(vutxo.witness_utxo.clone());
	inp.tap_internal_key = Some(*X_H_POINT);
	inp.tap_merkle_root = Some(TapNodeHash::from_byte_array(
		redeem_leaf.merkle_root().to_byte_array(),
	));
	inp.tap_scripts.insert(
		redeem_leaf.control_block.clone(),
		(redeem_leaf.script.clone(), redeem_leaf.control_block.leaf_version),
	);
	pset.add_input(inp);

	let mut out = pset::Output::default();
	out.script_pubkey = frozen.receiver_script();
	out.amount = Some(value);
	out.asset = Some(network.asset);
	pset.add_output(out);

	Ok(RedeemTransaction {
		pset,
		frozen,
		redeem_leaf: redeem_leaf.clone(),
	})
}

impl RedeemTransaction {
	/// The sighash the owner signs to spend the covenant leaf.
	///
	/// Every input added to the PSET must carry its witness utxo.
	pub fn leaf_sighash(&self, genesis_hash: BlockHash) -> Result<Message, ValidationError> {
		leaf_sighash(&self.pset, 0, &self.redeem_leaf, genesis_hash)
	}

	/// Finalize the covenant input, forwarding the coin to the output
	/// at `output_index`.
	pub fn finalize(
		&mut self,
		output_index: u32,
		owner_sig: &schnorr::Signature,
	) -> Result<(), ValidationError> {
		let witness = self.frozen.witness(
			output_index, owner_sig, &self.redeem_leaf.control_block,
		);
		self.pset.inputs_mut()[0].final_script_witness = Some(witness);
		Ok(())
	}
}

/// The Elements tap-script sighash (SIGHASH_DEFAULT) of one input of a
/// PSET, spending the given leaf. Every input must carry its witness
/// utxo.
pub fn leaf_sighash(
	pset: &PartiallySignedTransaction,
	input_index: usize,
	leaf: &TaprootLeaf,
	genesis_hash: BlockHash,
) -> Result<Message, ValidationError> {
	let tx = pset.extract_tx()
		.map_err(|_| ValidationError::Pset("failed to extract the spending tx"))?;
	let prevouts = pset.inputs().iter()
		.map(|i| {
			i.witness_utxo.clone()
				.ok_or(ValidationError::Pset("input missing its witness utxo"))
		})
		.collect::<Result<Vec<_>, _>>()?;
	let leaf_hash = TapLeafHash::from_script(&leaf.script, leaf.control_block.leaf_version);
	let mut cache = SighashCache::new(&tx);
	let hash = cache.taproot_script_spend_signature_hash(
		input_index,
		&sighash::Prevouts::All(&prevouts),
		leaf_hash,
		sighash::SchnorrSighashType::Default,
		genesis_hash,
	).map_err(|_| ValidationError::Pset("sighash computation failed"))?;
	Ok(Message::from_digest(hash.to_byte_array()))
}
