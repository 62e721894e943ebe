
//! The pool watcher: the provider's enforcement loop against users
//! who broadcast a redeem transaction for a vUTXO they already
//! forfeited.
//!
//! For every redeem output found on-chain the watcher combines the
//! stored forfeit signature with the next connector of the promised
//! pool and broadcasts the forfeit transaction, claiming the coin
//! before the user's redeem timeout matures.

use std::sync::Arc;

use anyhow::Context;
use elements::encode;
use elements::secp256k1_zkp::{schnorr, PublicKey};
use elements::{OutPoint, Transaction, Txid};
use log::{info, warn};

use elements::hashes::Hash;

use lark_lib::taproot::{self, RedeemTaprootTree};
use lark_lib::{forfeit, Coin, PoolId};

use crate::chain::{self, ChainSource, Unspent};
use crate::config::Config;
use crate::error::{AnyhowErrorExt, InsufficientConnectors};
use crate::repository::{StoredForfeit, WatcherStore};
use crate::wallet::Wallet;


pub struct PoolWatcher {
	config: Config,
	wallet: Arc<dyn Wallet>,
	chain: Arc<dyn ChainSource>,
	store: Arc<dyn WatcherStore>,
}

impl PoolWatcher {
	pub fn new(
		config: Config,
		wallet: Arc<dyn Wallet>,
		chain: Arc<dyn ChainSource>,
		store: Arc<dyn WatcherStore>,
	) -> PoolWatcher {
		PoolWatcher { config, wallet, chain, store }
	}

	/// Scan the chain for redeem outputs of the vUTXO owner and claim
	/// every one found with a forfeit transaction.
	///
	/// Per-output failures are logged and skipped; connector
	/// exhaustion is fatal and aborts the scan, because the provider
	/// cannot forfeit more users than it funded connectors for.
	pub async fn watch_redeem(&self, vutxo_pubkey: PublicKey) -> anyhow::Result<Vec<Txid>> {
		let provider = self.wallet.public_key().x_only_public_key().0;
		let owner = vutxo_pubkey.x_only_public_key().0;
		let redeem_tree = taproot::redeem_taproot(
			owner, provider, self.config.redeem_timeout,
		).context("failed to rebuild the redeem tree")?;
		let redeem_script = redeem_tree.output_script.clone();

		let forfeit = self.store.get_forfeit(&redeem_script).await?
			.with_context(|| format!("no stored forfeit for owner {}", vutxo_pubkey))?;
		let asp_sig = self.wallet.sign_schnorr(forfeit.message.digest().to_byte_array());

		let unspents = self.chain.list_unspents(&redeem_script).await
			.context("failed to list redeem unspents")?;
		if unspents.is_empty() {
			return Ok(Vec::new());
		}
		info!("Found {} redeem output(s) for owner {}", unspents.len(), vutxo_pubkey);

		let txids = unspents.iter().map(|u| u.tx_hash).collect::<Vec<_>>();
		let txs = chain::fetch_transactions(&*self.chain, &txids).await
			.context("failed to fetch redeem transactions")?;

		let mut claimed = Vec::new();
		for (unspent, redeem_tx) in unspents.iter().zip(&txs) {
			match self.claim_redeem(&redeem_tree, &forfeit, &asp_sig, unspent, redeem_tx).await {
				Ok(txid) => {
					info!("Broadcast forfeit tx {} claiming redeem {}:{}",
						txid, unspent.tx_hash, unspent.tx_pos,
					);
					claimed.push(txid);
				},
				Err(e) if e.downcast_ref::<InsufficientConnectors>().is_some() => {
					return Err(e);
				},
				Err(e) => {
					warn!("Failed to claim redeem {}:{}: {}",
						unspent.tx_hash, unspent.tx_pos, e.full_msg(),
					);
				},
			}
		}
		Ok(claimed)
	}

	/// Claim one detected redeem output with the next connector of
	/// the promised pool.
	async fn claim_redeem(
		&self,
		redeem_tree: &RedeemTaprootTree,
		forfeit_entry: &StoredForfeit,
		asp_sig: &schnorr::Signature,
		unspent: &Unspent,
		redeem_tx: &Transaction,
	) -> anyhow::Result<Txid> {
		let pool_id = PoolId::new(forfeit_entry.message.promised_pool_txid);
		let pool = self.store.get_pool_transaction(pool_id).await?
			.with_context(|| format!("promised pool {} is not stored", pool_id))?;
		if pool.connectors.is_empty() {
			return Err(InsufficientConnectors { pool: pool_id }.into());
		}

		let pool_tx: Transaction = encode::deserialize(&hex::decode(&pool.hex)?)
			.context("stored pool tx does not decode")?;
		// connectors are consumed strictly in order
		let connector_vout = pool.connectors[0];
		let connector = Coin {
			outpoint: OutPoint::new(pool_tx.txid(), connector_vout),
			txout: pool_tx.output.get(connector_vout as usize)
				.context("connector index out of range")?
				.clone(),
		};
		let redeem = Coin {
			outpoint: OutPoint::new(unspent.tx_hash, unspent.tx_pos),
			txout: redeem_tx.output.get(unspent.tx_pos as usize)
				.context("redeem index out of range")?
				.clone(),
		};

		let pset = forfeit::create_forfeit_transaction(
			&self.config.network,
			&connector,
			&redeem,
			self.wallet.change_script_pubkey(),
		).context("failed to build the forfeit tx")?;
		let mut pset = self.wallet.sign(pset).await
			.context("wallet failed to sign the connector input")?;
		forfeit::finalize_forfeit_input(
			&mut pset,
			&redeem_tree.forfeit_leaf,
			&forfeit_entry.message,
			asp_sig,
			&forfeit_entry.signature,
		).context("failed to finalize the forfeit input")?;

		let tx = pset.extract_tx().context("failed to extract the forfeit tx")?;
		let txid = self.chain.broadcast_transaction(&encode::serialize_hex(&tx)).await
			.context("failed to broadcast the forfeit tx")?;

		self.store.update_connectors(pool_id, &pool.connectors[1..]).await
			.context("failed to mark the connector as consumed")?;
		Ok(txid)
	}
}
