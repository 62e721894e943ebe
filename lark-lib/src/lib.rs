
pub extern crate elements;

#[macro_use] extern crate serde;
#[macro_use] extern crate lazy_static;

pub mod error;
pub mod forfeit;
pub mod lift;
pub mod pool;
pub mod redeem;
pub mod scripts;
pub mod taproot;
pub mod util;
pub mod vtxo;

#[cfg(test)]
mod test;

use elements::secp256k1_zkp::{PublicKey, XOnlyPublicKey};
use elements::{AssetId, BlockHash, OutPoint, Sequence, TxOut};

pub use crate::error::ValidationError;
pub use crate::forfeit::ForfeitMessage;
pub use crate::pool::{PoolId, UnsignedPoolTransaction};
pub use crate::taproot::{RedeemTaprootTree, TaprootLeaf, VirtualUtxoTaprootTree};
pub use crate::vtxo::{ExtendedVirtualUtxo, VirtualUtxo, VtxoId};


/// Value in satoshi of every connector output of a pool transaction.
pub const DUST: u64 = 400;

/// Flat fee in satoshi paid by a forfeit transaction.
pub const FORFEIT_FEE: u64 = 500;

const SEQUENCE_LOCKTIME_TYPE_FLAG: u32 = 1 << 22;

/// Relative timelock after which the provider can sweep the shared
/// pool output: 30 days, in BIP-68 512-second granularity.
pub const CLAIM_TIMEOUT: Sequence =
	Sequence(SEQUENCE_LOCKTIME_TYPE_FLAG | (30 * 24 * 60 * 60 / 512));

/// Relative timelock after which the owner of a broadcast redeem
/// transaction can claim its output: 15 days.
///
/// Must fire strictly before [CLAIM_TIMEOUT] so that a cooperating user
/// can always exit before the provider's sweep matures.
pub const REDEEM_TIMEOUT: Sequence =
	Sequence(SEQUENCE_LOCKTIME_TYPE_FLAG | (15 * 24 * 60 * 60 / 512));

lazy_static! {
	/// Provably unspendable public key used as the internal key of every
	/// taproot output in the protocol. This is the BIP-341
	/// nothing-up-my-sleeve point.
	pub static ref H_POINT: PublicKey =
		"0250929b74c1a04954b78b4b6035e97a5e078a5a0f28ec96d547bfee9ace803ac0"
			.parse().expect("valid pubkey");

	/// The x-only form of [H_POINT], as it appears inside scripts.
	pub static ref X_H_POINT: XOnlyPublicKey = H_POINT.x_only_public_key().0;
}

/// Static parameters of the Elements chain the protocol runs on.
///
/// NB the protocol has no replay protection across provider key
/// rotations; a provider must use a fresh key for every incarnation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Network {
	pub name: String,
	/// The native asset all pool amounts are denominated in.
	pub asset: AssetId,
	/// Hash of the chain's genesis block, committed to by every
	/// Elements taproot sighash.
	pub genesis_hash: BlockHash,
}

impl Network {
	pub fn liquid() -> Network {
		Network {
			name: "liquidv1".into(),
			asset: "6f0279e9ed041c3d710a9f57d0c02928416460c4b722ae3457a11eec381c526d"
				.parse().expect("valid asset id"),
			genesis_hash: "1466275836220db2944ca059a3a10ef6fd2ea684b0688d2c379296888a206003"
				.parse().expect("valid block hash"),
		}
	}

	pub fn elements_regtest(genesis_hash: BlockHash, asset: AssetId) -> Network {
		Network {
			name: "elementsregtest".into(),
			asset,
			genesis_hash,
		}
	}
}

/// An on-chain coin spent into a lift or pool transaction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Coin {
	pub outpoint: OutPoint,
	pub txout: TxOut,
}

impl Coin {
	/// The explicit value of the coin.
	pub fn value(&self) -> Result<u64, ValidationError> {
		self.txout.value.explicit()
			.ok_or(ValidationError::Confidential("input value"))
	}

	/// The explicit asset of the coin.
	pub fn asset(&self) -> Result<AssetId, ValidationError> {
		self.txout.asset.explicit()
			.ok_or(ValidationError::Confidential("input asset"))
	}
}

/// Request to lift on-chain coins into a vUTXO.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LiftRequest {
	/// The on-chain coins funding the lift.
	pub coins: Vec<Coin>,
	/// Optional change output, passed through to the lift transaction.
	pub change: Option<TxOut>,
	/// The key the new vUTXO will be owned by.
	pub vutxo_pubkey: PublicKey,
}

/// Request to transfer a vUTXO to another user through the provider.
#[derive(Debug, Clone)]
pub struct VirtualTransfer {
	/// The vUTXO being spent.
	pub vutxo: VirtualUtxo,
	/// The sender's redeem leaf of the shared pool output.
	pub redeem_leaf: TaprootLeaf,
	/// The recipient.
	pub to_pubkey: PublicKey,
	/// Amount to transfer; the full vUTXO value when absent.
	pub amount: Option<u64>,
}
