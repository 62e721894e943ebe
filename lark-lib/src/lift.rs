
//! Lift flow: moving on-chain coins into a fresh shared pool output.
//!
//! A lift is a pool transaction without connectors: the users fund the
//! shared output themselves, so there are no old vUTXOs to forfeit.

use elements::pset::{self, PartiallySignedTransaction};
use elements::secp256k1_zkp::PublicKey;
use elements::Sequence;

use crate::error::ValidationError;
use crate::pool::{
	self, PoolLeaves, PoolStakeholder, UnsignedPoolTransaction, POOL_TX_SHARED_VOUT,
};
use crate::vtxo::VirtualUtxo;
use crate::{LiftRequest, Network, X_H_POINT};


/// Build the unsigned lift transaction for a batch of lift orders.
///
/// The miner fee is split equally over the orders, rounded up per
/// order, and paid through a single fee output at the end. Every order
/// lifts its input sum minus its change and fee share; an order that
/// cannot cover its fee share is rejected.
///
/// Output layout: the shared covenant output, each order's change in
/// order, then the fee output.
pub fn create_lift_transaction(
	provider: PublicKey,
	requests: &[LiftRequest],
	network: &Network,
	miner_fee: u64,
	claim_timeout: Sequence,
	redeem_timeout: Sequence,
) -> Result<UnsignedPoolTransaction, ValidationError> {
	if requests.is_empty() {
		return Err(ValidationError::Empty);
	}
	let fee_share = miner_fee.div_ceil(requests.len() as u64);

	let mut stakeholders = Vec::with_capacity(requests.len());
	for request in requests {
		let mut inputs_sum = 0u64;
		for coin in &request.coins {
			if coin.asset()? != network.asset {
				return Err(ValidationError::WrongAsset);
			}
			inputs_sum += coin.value()?;
		}
		let change = match request.change {
			Some(ref txout) => {
				if txout.asset.explicit() != Some(network.asset) {
					return Err(ValidationError::WrongAsset);
				}
				txout.value.explicit()
					.ok_or(ValidationError::Confidential("change value"))?
			},
			None => 0,
		};
		let lifted = inputs_sum
			.checked_sub(change)
			.and_then(|v| v.checked_sub(fee_share))
			.filter(|v| *v > 0)
			.ok_or(ValidationError::UncoveredFeeShare { fee_share })?;
		stakeholders.push(PoolStakeholder {
			pubkey: request.vutxo_pubkey.x_only_public_key().0,
			amount: lifted,
		});
	}

	let provider_x = provider.x_only_public_key().0;
	let (shared, redeem_trees, shared_txout) = pool::build_shared_output(
		provider_x, &stakeholders, network, claim_timeout, redeem_timeout,
	)?;

	let mut pset = PartiallySignedTransaction::new_v2();
	for request in requests {
		for coin in &request.coins {
			let mut inp = pset::Input::default();
			inp.previous_txid = coin.outpoint.txid;
			inp.previous_output_index = coin.outpoint.vout;
			inp.witness_utxo = Some(coin.txout.clone());
			pset.add_input(inp);
		}
	}

	pset.add_output(pset::Output::from_txout(shared_txout.clone()));
	for request in requests {
		if let Some(ref change) = request.change {
			pset.add_output(pset::Output::from_txout(change.clone()));
		}
	}
	let mut fee = pset::Output::default();
	fee.amount = Some(fee_share * requests.len() as u64);
	fee.asset = Some(network.asset);
	pset.add_output(fee);

	let tx = pset.extract_tx()
		.map_err(|_| ValidationError::Pset("failed to extract the unsigned lift tx"))?;
	let vutxo = VirtualUtxo {
		txid: tx.txid(),
		index: POOL_TX_SHARED_VOUT,
		tap_internal_key: *X_H_POINT,
		witness_utxo: shared_txout,
	};

	let leaves = stakeholders.iter().enumerate().map(|(i, s)| {
		(s.pubkey, PoolLeaves {
			vutxo_tree: shared.vutxo_tree(i),
			redeem_tree: redeem_trees[i].clone(),
		})
	}).collect();

	Ok(UnsignedPoolTransaction {
		pset,
		vutxo,
		stakeholders,
		leaves,
		connectors: Vec::new(),
	})
}
