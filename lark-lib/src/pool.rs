
//! Pool transaction construction.
//!
//! A pool transaction retires the spent vUTXOs of a batch of transfers
//! and creates one shared covenant output carrying every new
//! stakeholder, plus one dust connector per transfer that anchors a
//! future forfeit.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use elements::pset::{self, PartiallySignedTransaction};
use elements::secp256k1_zkp::{PublicKey, XOnlyPublicKey};
use elements::{confidential, Script, Sequence, Txid, TxOut, TxOutWitness};

use crate::error::ValidationError;
use crate::scripts::{CheckSequenceVerifyScript, FrozenReceiverScript};
use crate::taproot::{self, RedeemTaprootTree, SharedCoinTree, VirtualUtxoTaprootTree};
use crate::vtxo::{ExtendedVirtualUtxo, VirtualUtxo};
use crate::{Coin, Network, VirtualTransfer, DUST, X_H_POINT};


/// The output index of the shared covenant output in a pool tx.
pub const POOL_TX_SHARED_VOUT: u32 = 0;
/// The output index of the fee output in a pool tx.
pub const POOL_TX_FEE_VOUT: u32 = 1;
/// The output index of the first connector in a pool tx.
pub const POOL_TX_FIRST_CONNECTOR_VOUT: u32 = 2;

/// Identifier for a pool: the txid of the pool tx.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PoolId(Txid);

impl PoolId {
	pub const fn new(txid: Txid) -> PoolId {
		PoolId(txid)
	}

	pub fn as_pool_txid(&self) -> Txid {
		self.0
	}
}

impl From<Txid> for PoolId {
	fn from(txid: Txid) -> PoolId {
		PoolId::new(txid)
	}
}

impl std::ops::Deref for PoolId {
	type Target = Txid;
	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl fmt::Display for PoolId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for PoolId {
	type Err = <Txid as FromStr>::Err;
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Txid::from_str(s).map(PoolId::new)
	}
}

impl serde::Serialize for PoolId {
	fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
		serde::Serialize::serialize(&self.0, s)
	}
}

impl<'de> serde::Deserialize<'de> for PoolId {
	fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
		serde::Deserialize::deserialize(d).map(PoolId::new)
	}
}

/// One claim on the shared output of a pool under construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStakeholder {
	pub pubkey: XOnlyPublicKey,
	pub amount: u64,
}

/// The resolved leaves a stakeholder needs to spend or validate their
/// new vUTXO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolLeaves {
	pub vutxo_tree: VirtualUtxoTaprootTree,
	pub redeem_tree: RedeemTaprootTree,
}

/// A pool transaction before the provider signed it.
#[derive(Debug, Clone)]
pub struct UnsignedPoolTransaction {
	pub pset: PartiallySignedTransaction,
	/// Template of the shared output every stakeholder's vUTXO points at.
	pub vutxo: VirtualUtxo,
	/// Stakeholders in insertion order.
	pub stakeholders: Vec<PoolStakeholder>,
	/// Per-stakeholder leaves, keyed by the stakeholder key.
	pub leaves: HashMap<XOnlyPublicKey, PoolLeaves>,
	/// Output indices of the connector outputs.
	pub connectors: Vec<u32>,
}

impl UnsignedPoolTransaction {
	pub fn pool_id(&self) -> PoolId {
		self.vutxo.txid.into()
	}

	/// The new vUTXO of the given stakeholder, restricted to their
	/// leaves.
	pub fn extended_vutxo(&self, pubkey: XOnlyPublicKey) -> Option<ExtendedVirtualUtxo> {
		let leaves = self.leaves.get(&pubkey)?;
		Some(ExtendedVirtualUtxo {
			vutxo: self.vutxo.clone(),
			vutxo_tree: leaves.vutxo_tree.clone(),
			redeem_tree: leaves.redeem_tree.clone(),
		})
	}
}

/// Compute the stakeholder list a batch of transfers resolves to.
///
/// Each transfer contributes the recipient's stake and, when the
/// transferred amount is smaller than the vUTXO value, a change stake
/// for the sender recovered from the redeem leaf.
pub fn pool_stakeholders(
	transfers: &[VirtualTransfer],
) -> Result<Vec<PoolStakeholder>, ValidationError> {
	let mut ret = Vec::with_capacity(transfers.len());
	for transfer in transfers {
		let value = transfer.vutxo.value()?;
		let amount = transfer.amount.unwrap_or(value);
		if amount == 0 {
			return Err(ValidationError::ZeroAmount);
		}
		if amount > value {
			return Err(ValidationError::AmountExceedsValue { amount, value });
		}
		ret.push(PoolStakeholder {
			pubkey: transfer.to_pubkey.x_only_public_key().0,
			amount,
		});
		if amount < value {
			let sender = FrozenReceiverScript::decompile(&transfer.redeem_leaf.script)?.owner;
			ret.push(PoolStakeholder { pubkey: sender, amount: value - amount });
		}
	}
	Ok(ret)
}

/// The native-asset liquidity the provider wallet must select to fund
/// a pool with the given stakeholders.
pub fn required_funding(
	stakeholders: &[PoolStakeholder],
	miner_fee: u64,
	nb_transfers: usize,
) -> u64 {
	stakeholders.iter().map(|s| s.amount).sum::<u64>()
		+ miner_fee
		+ nb_transfers as u64 * DUST
}

/// Build the shared covenant output for the given stakeholders.
///
/// Returns the shared tree, each stakeholder's redeem tree in order,
/// and the output itself.
pub(crate) fn build_shared_output(
	provider: XOnlyPublicKey,
	stakeholders: &[PoolStakeholder],
	network: &Network,
	claim_timeout: Sequence,
	redeem_timeout: Sequence,
) -> Result<(SharedCoinTree, Vec<RedeemTaprootTree>, TxOut), ValidationError> {
	let mut seen = HashSet::with_capacity(stakeholders.len());
	for stakeholder in stakeholders {
		if !seen.insert(stakeholder.pubkey) {
			return Err(ValidationError::DuplicateStakeholder);
		}
	}

	let mut redeem_trees = Vec::with_capacity(stakeholders.len());
	let mut leaves = Vec::with_capacity(stakeholders.len());
	for stakeholder in stakeholders {
		let (redeem_tree, leaf_script) =
			taproot::stakeholder_scripts(stakeholder.pubkey, provider, redeem_timeout)?;
		redeem_trees.push(redeem_tree);
		leaves.push((stakeholder.amount, leaf_script));
	}
	let claim_script = CheckSequenceVerifyScript::new(provider, claim_timeout)?.compile();
	let shared = taproot::shared_coin_tree(&leaves, claim_script)?;

	let total = stakeholders.iter().map(|s| s.amount).sum();
	let txout = TxOut {
		asset: confidential::Asset::Explicit(network.asset),
		value: confidential::Value::Explicit(total),
		nonce: confidential::Nonce::Null,
		script_pubkey: shared.output_script().clone(),
		witness: TxOutWitness::default(),
	};
	Ok((shared, redeem_trees, txout))
}

/// Funding the provider wallet selected for a pool transaction.
#[derive(Debug, Clone)]
pub struct PoolFunding {
	pub coins: Vec<Coin>,
	pub change: Option<TxOut>,
	/// Script the connector outputs pay to; must be spendable by the
	/// provider wallet.
	pub connector_script: Script,
}

/// Build the unsigned pool transaction for a batch of transfers.
///
/// Output layout: the shared covenant output, the fee output, one
/// connector of [DUST] per transfer, then the provider's change.
pub fn create_pool_transaction(
	provider: PublicKey,
	transfers: &[VirtualTransfer],
	funding: &PoolFunding,
	network: &Network,
	miner_fee: u64,
	claim_timeout: Sequence,
	redeem_timeout: Sequence,
) -> Result<UnsignedPoolTransaction, ValidationError> {
	if transfers.is_empty() {
		return Err(ValidationError::Empty);
	}
	let stakeholders = pool_stakeholders(transfers)?;
	let provider_x = provider.x_only_public_key().0;
	let (shared, redeem_trees, shared_txout) = build_shared_output(
		provider_x, &stakeholders, network, claim_timeout, redeem_timeout,
	)?;

	let mut in_sum = 0u64;
	for coin in &funding.coins {
		if coin.asset()? != network.asset {
			return Err(ValidationError::WrongAsset);
		}
		in_sum += coin.value()?;
	}
	let change_value = match funding.change {
		Some(ref txout) => txout.value.explicit()
			.ok_or(ValidationError::Confidential("change value"))?,
		None => 0,
	};
	let total: u64 = stakeholders.iter().map(|s| s.amount).sum();
	let nb_connectors = transfers.len() as u64;
	let out_sum = total + miner_fee + nb_connectors * DUST + change_value;
	if in_sum != out_sum {
		return Err(ValidationError::Unbalanced { inputs: in_sum, outputs: out_sum });
	}

	let mut pset = PartiallySignedTransaction::new_v2();
	for coin in &funding.coins {
		let mut inp = pset::Input::default();
		inp.previous_txid = coin.outpoint.txid;
		inp.previous_output_index = coin.outpoint.vout;
		inp.witness_utxo = Some(coin.txout.clone());
		pset.add_input(inp);
	}

	pset.add_output(pset::Output::from_txout(shared_txout.clone()));

	let mut fee = pset::Output::default();
	fee.amount = Some(miner_fee);
	fee.asset = Some(network.asset);
	pset.add_output(fee);

	let mut connectors = Vec::with_capacity(transfers.len());
	for i in 0..transfers.len() {
		let mut out = pset::Output::default();
		out.script_pubkey = funding.connector_script.clone();
		out.amount = Some(DUST);
		out.asset = Some(network.asset);
		pset.add_output(out);
		connectors.push(POOL_TX_FIRST_CONNECTOR_VOUT + i as u32);
	}

	if let Some(ref change) = funding.change {
		pset.add_output(pset::Output::from_txout(change.clone()));
	}

	let tx = pset.extract_tx()
		.map_err(|_| ValidationError::Pset("failed to extract the unsigned pool tx"))?;
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

	Ok(UnsignedPoolTransaction { pset, vutxo, stakeholders, leaves, connectors })
}
