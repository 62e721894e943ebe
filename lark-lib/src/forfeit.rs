
//! The forfeit protocol: the message a sender signs to kill their old
//! vUTXO, and the transaction the provider broadcasts to enforce it.
//!
//! Neither party signs the spending transaction itself. Both sign the
//! forfeit digest; the covenant's introspection check is what binds the
//! spend to the promised pool transaction (whose connector output the
//! forfeit consumes as input 0).

use elements::hashes::{sha256, Hash};
use elements::pset::{self, PartiallySignedTransaction, PsbtSighashType};
use elements::secp256k1_zkp::{self as secp256k1, schnorr, Keypair, Message, XOnlyPublicKey};
use elements::{Script, Txid};

use crate::error::ValidationError;
use crate::scripts::ForfeitScript;
use crate::taproot::TaprootLeaf;
use crate::util::SECP;
use crate::{Coin, Network, FORFEIT_FEE};


/// The message a sender signs to promise their old vUTXO to the
/// provider, bound to exactly one future pool transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct ForfeitMessage {
	/// Txid of the pool transaction holding the forfeited vUTXO.
	pub vutxo_txid: Txid,
	/// Output index of the forfeited vUTXO.
	pub vutxo_index: u32,
	/// Txid of the pool transaction the provider promises in return.
	pub promised_pool_txid: Txid,
}

impl ForfeitMessage {
	/// The 36-byte outpoint of the forfeited vUTXO, as the forfeit
	/// witness carries it: raw txid bytes followed by the
	/// little-endian index.
	pub fn outpoint_bytes(&self) -> [u8; 36] {
		let mut buf = [0u8; 36];
		buf[0..32].copy_from_slice(&self.vutxo_txid[..]);
		buf[32..36].copy_from_slice(&self.vutxo_index.to_le_bytes());
		buf
	}

	/// Canonical serialization: `reverse(vutxo_txid) || u32_le(index)
	/// || reverse(promised_pool_txid)`.
	pub fn serialize(&self) -> [u8; 68] {
		let mut buf = [0u8; 68];
		buf[0..36].copy_from_slice(&self.outpoint_bytes());
		buf[36..68].copy_from_slice(&self.promised_pool_txid[..]);
		buf
	}

	/// The digest both the sender and the provider sign.
	pub fn digest(&self) -> sha256::Hash {
		sha256::Hash::hash(&self.serialize())
	}

	/// BIP-340 sign the digest with empty aux-rand.
	pub fn sign(&self, key: &Keypair) -> schnorr::Signature {
		let msg = Message::from_digest(self.digest().to_byte_array());
		SECP.sign_schnorr_no_aux_rand(&msg, key)
	}

	/// Verify a signature over the digest.
	pub fn verify(
		&self,
		signature: &schnorr::Signature,
		owner: XOnlyPublicKey,
	) -> Result<(), secp256k1::UpstreamError> {
		let msg = Message::from_digest(self.digest().to_byte_array());
		SECP.verify_schnorr(signature, &msg, &owner)
	}
}

/// Build the unsigned forfeit PSET claiming a broadcast redeem output.
///
/// Input 0 spends `connector` (SIGHASH_ALL, signed by the provider
/// wallet), input 1 spends `redeem` through the forfeit leaf
/// (SIGHASH_DEFAULT; the leaf does not commit to the sighash at all).
/// One output pays the combined value minus [FORFEIT_FEE] to
/// `claim_script_pubkey`, followed by the explicit fee output.
pub fn create_forfeit_transaction(
	network: &Network,
	connector: &Coin,
	redeem: &Coin,
	claim_script_pubkey: Script,
) -> Result<PartiallySignedTransaction, ValidationError> {
	for coin in [connector, redeem] {
		if coin.asset()? != network.asset {
			return Err(ValidationError::WrongAsset);
		}
	}
	let input_value = connector.value()? + redeem.value()?;
	let claim_value = input_value.checked_sub(FORFEIT_FEE)
		.filter(|v| *v > 0)
		.ok_or(ValidationError::Unbalanced { inputs: input_value, outputs: FORFEIT_FEE })?;

	let mut pset = PartiallySignedTransaction::new_v2();

	let mut inp = pset::Input::default();
	inp.previous_txid = connector.outpoint.txid;
	inp.previous_output_index = connector.outpoint.vout;
	inp.witness_utxo = Some(connector.txout.clone());
	inp.sighash_type = Some(PsbtSighashType::from_u32(0x01));
	pset.add_input(inp);

	let mut inp = pset::Input::default();
	inp.previous_txid = redeem.outpoint.txid;
	inp.previous_output_index = redeem.outpoint.vout;
	inp.witness_utxo = Some(redeem.txout.clone());
	inp.sighash_type = Some(PsbtSighashType::from_u32(0x00));
	pset.add_input(inp);

	let mut out = pset::Output::default();
	out.script_pubkey = claim_script_pubkey;
	out.amount = Some(claim_value);
	out.asset = Some(network.asset);
	pset.add_output(out);

	let mut fee = pset::Output::default();
	fee.amount = Some(FORFEIT_FEE);
	fee.asset = Some(network.asset);
	pset.add_output(fee);

	Ok(pset)
}

/// Finalize input 1 of a forfeit PSET with the covenant witness.
pub fn finalize_forfeit_input(
	pset: &mut PartiallySignedTransaction,
	forfeit_leaf: &TaprootLeaf,
	message: &ForfeitMessage,
	asp_sig: &schnorr::Signature,
	user_sig: &schnorr::Signature,
) -> Result<(), ValidationError> {
	let script = ForfeitScript::decompile(&forfeit_leaf.script)?;
	let witness = script.witness(
		&message.outpoint_bytes(),
		&message.promised_pool_txid.to_byte_array(),
		asp_sig,
		user_sig,
		&forfeit_leaf.control_block,
	);
	pset.inputs_mut()[1].final_script_witness = Some(witness);
	Ok(())
}
