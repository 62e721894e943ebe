
//! The provider wallet seam.
//!
//! The core never holds keys for on-chain coins itself; coin
//! selection and signing are delegated to an implementation of
//! [Wallet], typically backed by the provider's on-chain wallet.

use async_trait::async_trait;
use elements::pset::PartiallySignedTransaction;
use elements::secp256k1_zkp::{schnorr, PublicKey};
use elements::{AssetId, Script, TxOut};

use lark_lib::Coin;


/// A coin selection result: the coins to spend and the change output
/// the wallet wants back, if any.
#[derive(Debug, Clone)]
pub struct CoinSelection {
	pub coins: Vec<Coin>,
	pub change: Option<TxOut>,
}

#[async_trait]
pub trait Wallet: Send + Sync {
	/// The provider's identity key, in 33-byte compressed form.
	fn public_key(&self) -> PublicKey;

	/// Script used for connector outputs and change; must be a segwit
	/// script the wallet can sign.
	fn change_script_pubkey(&self) -> Script;

	/// Select coins covering `amount` of `asset`.
	///
	/// Fails with [crate::error::CoinSelectionError] when the wallet
	/// cannot cover the amount.
	async fn coin_select(&self, amount: u64, asset: AssetId) -> anyhow::Result<CoinSelection>;

	/// Sign and finalize every input the wallet can sign; other inputs
	/// are left untouched.
	async fn sign(
		&self,
		pset: PartiallySignedTransaction,
	) -> anyhow::Result<PartiallySignedTransaction>;

	/// BIP-340 Schnorr signature over a 32-byte message with empty
	/// aux-rand, under the provider identity key.
	fn sign_schnorr(&self, msg: [u8; 32]) -> schnorr::Signature;
}
