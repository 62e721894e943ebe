
//! Shared fixtures for the unit tests.

use elements::hashes::Hash;
use elements::secp256k1_zkp::Keypair;
use elements::{confidential, BlockHash, Txid, TxOut, TxOutWitness};

use crate::scripts::CheckSequenceVerifyScript;
use crate::taproot;
use crate::util::SECP;
use crate::vtxo::{ExtendedVirtualUtxo, VirtualUtxo};
use crate::{Network, CLAIM_TIMEOUT, REDEEM_TIMEOUT, X_H_POINT};

lazy_static! {
	pub static ref ASP_KEY: Keypair = Keypair::from_seckey_str(
		&SECP, "1fb316e653eec61de11c6b794636d230379509389215df1ceb520b65313e5426",
	).unwrap();
	pub static ref USER_KEY: Keypair = Keypair::from_seckey_str(
		&SECP, "5255d132d6ec7d4fc2a41c8f0018bb14343489ddd0344025cc60c7aa2b3fda6a",
	).unwrap();
	pub static ref BOB_KEY: Keypair = Keypair::from_seckey_str(
		&SECP, "9a8745e11dbdd26ae7eb49e0e26ba09d8d3c03ed26ab84307f1ed9f7cd4e8b0e",
	).unwrap();

	pub static ref NETWORK: Network = Network::elements_regtest(
		BlockHash::all_zeros(),
		"5ac9f65c0efcc4775e0baec4ec03abdde22473cd3cf33c0419ca290e0751b225"
			.parse().unwrap(),
	);
}

/// A valid single-stakeholder vUTXO owned by `owner`, as a pool
/// transaction would have created it.
pub fn dummy_extended_vutxo(owner: &Keypair, value: u64) -> ExtendedVirtualUtxo {
	let owner_pk = owner.x_only_public_key().0;
	let asp_pk = ASP_KEY.x_only_public_key().0;

	let (redeem_tree, leaf_script) =
		taproot::stakeholder_scripts(owner_pk, asp_pk, REDEEM_TIMEOUT).unwrap();
	let claim_script = CheckSequenceVerifyScript::new(asp_pk, CLAIM_TIMEOUT)
		.unwrap().compile();
	let shared = taproot::shared_coin_tree(&[(value, leaf_script)], claim_script).unwrap();

	ExtendedVirtualUtxo {
		vutxo: VirtualUtxo {
			txid: Txid::from_byte_array([0x11; 32]),
			index: 0,
			tap_internal_key: *X_H_POINT,
			witness_utxo: TxOut {
				asset: confidential::Asset::Explicit(NETWORK.asset),
				value: confidential::Value::Explicit(value),
				nonce: confidential::Nonce::Null,
				script_pubkey: shared.output_script().clone(),
				witness: TxOutWitness::default(),
			},
		},
		vutxo_tree: shared.vutxo_tree(0),
		redeem_tree,
	}
}
