
//! The chain source seam: an Electrum-like backend the daemon uses to
//! enumerate unspents, fetch transactions and broadcast.

use std::time::Duration;

use async_trait::async_trait;
use elements::hashes::{sha256, Hash};
use elements::{Script, Transaction, Txid};
use log::debug;

use crate::error::MissingTransaction;

/// Number of attempts for [fetch_transactions] before a
/// `missingtransaction` error is given up on.
const FETCH_TX_ATTEMPTS: usize = 5;
/// Spacing between [fetch_transactions] attempts.
const FETCH_TX_RETRY_DELAY: Duration = Duration::from_secs(1);

/// One unspent output paying a watched script, in Electrum
/// `listunspent` terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Unspent {
	pub height: u32,
	pub tx_pos: u32,
	pub tx_hash: Txid,
}

#[async_trait]
pub trait ChainSource: Send + Sync {
	/// List the unspent outputs paying `script`.
	async fn list_unspents(&self, script: &Script) -> anyhow::Result<Vec<Unspent>>;

	/// Fetch a transaction by txid.
	///
	/// An unknown txid fails with [MissingTransaction]; use
	/// [fetch_transactions] for the bounded-retry variant.
	async fn fetch_transaction(&self, txid: Txid) -> anyhow::Result<Transaction>;

	/// Broadcast a raw transaction in hex, returning its txid.
	async fn broadcast_transaction(&self, hex: &str) -> anyhow::Result<Txid>;

	/// Close the underlying connection.
	async fn close(&self) -> anyhow::Result<()>;
}

/// The Electrum script-hash convention: the SHA-256 of the script
/// pubkey with its byte order reversed. Implementations key their
/// subscriptions and unspent queries by this.
pub fn script_hash(script: &Script) -> sha256::Hash {
	let mut bytes = sha256::Hash::hash(script.as_bytes()).to_byte_array();
	bytes.reverse();
	sha256::Hash::from_byte_array(bytes)
}

/// Fetch a batch of transactions, retrying each `missingtransaction`
/// up to [FETCH_TX_ATTEMPTS] times with [FETCH_TX_RETRY_DELAY] spacing.
/// A freshly broadcast transaction can take a moment to reach the
/// backend's index. All other errors propagate immediately.
pub async fn fetch_transactions(
	chain: &dyn ChainSource,
	txids: &[Txid],
) -> anyhow::Result<Vec<Transaction>> {
	let mut ret = Vec::with_capacity(txids.len());
	for txid in txids {
		let mut attempt = 1;
		let tx = loop {
			match chain.fetch_transaction(*txid).await {
				Ok(tx) => break tx,
				Err(e) if e.downcast_ref::<MissingTransaction>().is_some()
					&& attempt < FETCH_TX_ATTEMPTS =>
				{
					debug!("tx {} missing from chain source, attempt {}/{}",
						txid, attempt, FETCH_TX_ATTEMPTS,
					);
					attempt += 1;
					tokio::time::sleep(FETCH_TX_RETRY_DELAY).await;
				},
				Err(e) => return Err(e),
			}
		};
		ret.push(tx);
	}
	Ok(ret)
}
