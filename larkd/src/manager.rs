
//! The pool manager: collects transfer orders, batches them into pool
//! transactions on a timer, and gathers the forfeit signatures that
//! let the provider finalize each pool.
//!
//! Per pending pool the state machine is: `Open` (awaiting forfeit
//! signatures) -> `Closed` (all collected) -> persist + broadcast ->
//! removed. A batch-level build failure rejects every queued order
//! uniformly; a bad forfeit signature rejects only its own caller.

use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use anyhow::Context;
use elements::pset::PartiallySignedTransaction;
use elements::secp256k1_zkp::{schnorr, PublicKey, XOnlyPublicKey};
use elements::Script;
use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};

use lark_lib::pool::{self, PoolFunding};
use lark_lib::util as lark_util;
use lark_lib::vtxo;
use lark_lib::{
	ExtendedVirtualUtxo, ForfeitMessage, PoolId, TaprootLeaf, VirtualTransfer, VirtualUtxo,
};

use crate::chain::ChainSource;
use crate::config::Config;
use crate::error::{badarg, AnyhowErrorExt, ContextExt, SignatureError};
use crate::repository::ManagerStore;
use crate::wallet::Wallet;


/// What a sender gets back for a queued transfer once the batch it
/// joined has been built.
#[derive(Debug)]
pub struct TransferOutcome {
	/// The next pool transaction as a base64 PSET, before provider
	/// signing.
	pub pool_pset: String,
	/// The challenge the sender must sign and return through
	/// [PoolManager::send].
	pub forfeit_message: ForfeitMessage,
	/// The recipient's new vUTXO.
	pub receiver_utxo: ExtendedVirtualUtxo,
	/// The sender's change vUTXO when the transfer was partial.
	pub change_utxo: Option<ExtendedVirtualUtxo>,
}

enum Ctrl {
	Transfer {
		vutxo: ExtendedVirtualUtxo,
		to_pubkey: PublicKey,
		amount: Option<u64>,
		resp: oneshot::Sender<anyhow::Result<TransferOutcome>>,
	},
	Forfeit {
		message: ForfeitMessage,
		signature: schnorr::Signature,
		resp: oneshot::Sender<anyhow::Result<String>>,
	},
}

/// Handle to the pool manager task.
pub struct PoolManager {
	ctrl_tx: mpsc::UnboundedSender<Ctrl>,
}

impl PoolManager {
	pub fn start(
		config: Config,
		wallet: Arc<dyn Wallet>,
		chain: Arc<dyn ChainSource>,
		store: Arc<dyn ManagerStore>,
	) -> PoolManager {
		let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();
		let proc = Process {
			config,
			wallet,
			chain,
			store,
			queue: Vec::new(),
			pending: HashMap::new(),
		};
		tokio::spawn(proc.run(ctrl_rx));
		PoolManager { ctrl_tx }
	}

	/// Queue a transfer of `vutxo` to `to_pubkey` for the next pool.
	///
	/// Resolves when the batching window closes: the caller receives
	/// the pending pool PSET, its new vUTXOs, and the forfeit message
	/// to sign. The transfer only completes once every sender of the
	/// batch has answered through [PoolManager::send].
	pub async fn send_request(
		&self,
		vutxo: ExtendedVirtualUtxo,
		to_pubkey: PublicKey,
		amount: Option<u64>,
	) -> anyhow::Result<TransferOutcome> {
		let (resp_tx, resp_rx) = oneshot::channel();
		self.ctrl_tx.send(Ctrl::Transfer { vutxo, to_pubkey, amount, resp: resp_tx })
			.ok().context("pool manager is down")?;
		resp_rx.await.context("pool manager dropped the request")?
	}

	/// Deliver the sender's signature over a forfeit message.
	///
	/// Resolves with the final pool transaction hex once the whole
	/// batch has signed.
	pub async fn send(
		&self,
		message: ForfeitMessage,
		signature: schnorr::Signature,
	) -> anyhow::Result<String> {
		let (resp_tx, resp_rx) = oneshot::channel();
		self.ctrl_tx.send(Ctrl::Forfeit { message, signature, resp: resp_tx })
			.ok().context("pool manager is down")?;
		resp_rx.await.context("pool manager dropped the request")?
	}
}

struct SendOrder {
	vutxo: VirtualUtxo,
	redeem_leaf: TaprootLeaf,
	/// Script pubkey of the sender's redeem output, the key the
	/// watcher will look the forfeit up by.
	redeem_script: Script,
	owner: XOnlyPublicKey,
	to_pubkey: PublicKey,
	amount: Option<u64>,
	resp: oneshot::Sender<anyhow::Result<TransferOutcome>>,
}

struct PendingForfeit {
	message: ForfeitMessage,
	owner: XOnlyPublicKey,
	redeem_script: Script,
}

struct CollectedForfeit {
	message: ForfeitMessage,
	signature: schnorr::Signature,
	redeem_script: Script,
	resp: oneshot::Sender<anyhow::Result<String>>,
}

struct PendingPool {
	pset: PartiallySignedTransaction,
	connectors: Vec<u32>,
	to_forfeit: Vec<PendingForfeit>,
	signatures: Vec<CollectedForfeit>,
}

struct Process {
	config: Config,
	wallet: Arc<dyn Wallet>,
	chain: Arc<dyn ChainSource>,
	store: Arc<dyn ManagerStore>,

	queue: Vec<SendOrder>,
	pending: HashMap<PoolId, PendingPool>,
}

impl Process {
	async fn run(mut self, mut ctrl_rx: mpsc::UnboundedReceiver<Ctrl>) {
		info!("Starting pool manager");
		let mut deadline: Option<Instant> = None;
		loop {
			tokio::select! {
				ctrl = ctrl_rx.recv() => match ctrl {
					Some(Ctrl::Transfer { vutxo, to_pubkey, amount, resp }) => {
						let queued = self.handle_transfer(vutxo, to_pubkey, amount, resp);
						if queued && deadline.is_none() {
							deadline = Some(Instant::now() + self.config.batch_interval);
						}
					},
					Some(Ctrl::Forfeit { message, signature, resp }) => {
						self.handle_forfeit(message, signature, resp).await;
					},
					None => break,
				},
				_ = async { sleep_until(deadline.unwrap()).await }, if deadline.is_some() => {
					deadline = None;
					self.process_send_orders().await;
				},
			}
		}
		info!("Pool manager terminated");
	}

	/// Validate and enqueue a transfer order. Returns whether the
	/// order joined the batch.
	fn handle_transfer(
		&mut self,
		ext: ExtendedVirtualUtxo,
		to_pubkey: PublicKey,
		amount: Option<u64>,
		resp: oneshot::Sender<anyhow::Result<TransferOutcome>>,
	) -> bool {
		let provider = self.wallet.public_key().x_only_public_key().0;
		let owner = match vtxo::validate(&ext, provider) {
			Ok(owner) => owner,
			Err(e) => {
				let _ = resp.send(Err(e).badarg("invalid vutxo"));
				return false;
			},
		};
		debug!("Queueing transfer of vutxo {} for {}", ext.vutxo.id(), to_pubkey);
		self.queue.push(SendOrder {
			vutxo: ext.vutxo,
			redeem_leaf: ext.vutxo_tree.redeem_leaf,
			redeem_script: ext.redeem_tree.output_script,
			owner,
			to_pubkey,
			amount,
			resp,
		});
		true
	}

	/// Batch every queued order into one pool transaction.
	async fn process_send_orders(&mut self) {
		let orders = mem::take(&mut self.queue);
		if orders.is_empty() {
			return;
		}
		info!("Processing {} queued transfer orders", orders.len());
		match self.build_pool(&orders).await {
			Ok(outcomes) => {
				for (order, outcome) in orders.into_iter().zip(outcomes) {
					let _ = order.resp.send(Ok(outcome));
				}
			},
			Err(e) => {
				// one batch-level error rejects all queued promises
				// uniformly
				let msg = e.full_msg();
				warn!("Failed to build pool: {}", msg);
				for order in orders {
					let _ = order.resp.send(Err(anyhow::anyhow!(msg.clone())));
				}
			},
		}
	}

	async fn build_pool(&mut self, orders: &[SendOrder]) -> anyhow::Result<Vec<TransferOutcome>> {
		let transfers = orders.iter().map(|o| VirtualTransfer {
			vutxo: o.vutxo.clone(),
			redeem_leaf: o.redeem_leaf.clone(),
			to_pubkey: o.to_pubkey,
			amount: o.amount,
		}).collect::<Vec<_>>();

		let stakeholders = pool::pool_stakeholders(&transfers)
			.badarg("invalid transfer batch")?;
		let required = pool::required_funding(
			&stakeholders, self.config.miner_fee, transfers.len(),
		);
		let selection = self.wallet.coin_select(required, self.config.network.asset).await
			.context("coin selection for pool funding failed")?;
		let funding = PoolFunding {
			coins: selection.coins,
			change: selection.change,
			connector_script: self.wallet.change_script_pubkey(),
		};
		let unsigned = pool::create_pool_transaction(
			self.wallet.public_key(),
			&transfers,
			&funding,
			&self.config.network,
			self.config.miner_fee,
			self.config.claim_timeout,
			self.config.redeem_timeout,
		).context("pool construction failed")?;

		let pool_id = unsigned.pool_id();
		let pool_pset = lark_util::pset_to_base64(&unsigned.pset);

		let mut to_forfeit = Vec::with_capacity(orders.len());
		let mut outcomes = Vec::with_capacity(orders.len());
		for order in orders {
			let value = order.vutxo.value().expect("validated on arrival");
			let amount = order.amount.unwrap_or(value);
			let receiver = order.to_pubkey.x_only_public_key().0;
			let receiver_utxo = unsigned.extended_vutxo(receiver)
				.context("receiver missing from the pool leaves")?;
			let change_utxo = if amount < value {
				Some(unsigned.extended_vutxo(order.owner)
					.context("change stakeholder missing from the pool leaves")?)
			} else {
				None
			};
			let message = ForfeitMessage {
				vutxo_txid: order.vutxo.txid,
				vutxo_index: order.vutxo.index,
				promised_pool_txid: pool_id.as_pool_txid(),
			};
			to_forfeit.push(PendingForfeit {
				message,
				owner: order.owner,
				redeem_script: order.redeem_script.clone(),
			});
			outcomes.push(TransferOutcome {
				pool_pset: pool_pset.clone(),
				forfeit_message: message,
				receiver_utxo,
				change_utxo,
			});
		}

		info!("Built pending pool {} awaiting {} forfeit signatures",
			pool_id, to_forfeit.len(),
		);
		self.pending.insert(pool_id, PendingPool {
			pset: unsigned.pset,
			connectors: unsigned.connectors,
			to_forfeit,
			signatures: Vec::new(),
		});
		Ok(outcomes)
	}

	async fn handle_forfeit(
		&mut self,
		message: ForfeitMessage,
		signature: schnorr::Signature,
		resp: oneshot::Sender<anyhow::Result<String>>,
	) {
		let pool_id = PoolId::new(message.promised_pool_txid);
		let pending = match self.pending.get_mut(&pool_id) {
			Some(p) => p,
			None => {
				let _ = resp.send(badarg!("no pending pool {}", pool_id));
				return;
			},
		};
		let idx = match pending.to_forfeit.iter().position(|f| f.message == message) {
			Some(idx) => idx,
			None => {
				let _ = resp.send(badarg!("no outstanding forfeit for vutxo {}:{}",
					message.vutxo_txid, message.vutxo_index,
				));
				return;
			},
		};
		if message.verify(&signature, pending.to_forfeit[idx].owner).is_err() {
			// only this caller is rejected; the pending pool is
			// untouched and a later correct signature still completes
			let _ = resp.send(Err(anyhow::Error::from(SignatureError)));
			return;
		}

		let entry = pending.to_forfeit.remove(idx);
		pending.signatures.push(CollectedForfeit {
			message: entry.message,
			signature,
			redeem_script: entry.redeem_script,
			resp,
		});
		debug!("Collected forfeit signature for pool {}, {} outstanding",
			pool_id, pending.to_forfeit.len(),
		);

		if pending.to_forfeit.is_empty() {
			self.finish_pool(pool_id).await;
		}
	}

	/// Sign, persist and broadcast a fully collected pool, then
	/// resolve every waiting [PoolManager::send] with the tx hex.
	///
	/// NB persistence and broadcast are not atomic: a crash between
	/// the two leaves a stored pool that was never broadcast, to be
	/// recovered by re-broadcasting the stored hex.
	async fn finish_pool(&mut self, pool_id: PoolId) {
		let pending = self.pending.remove(&pool_id).expect("pending pool exists");
		match self.finalize_and_broadcast(&pending).await {
			Ok(hex) => {
				info!("Pool {} finalized and broadcast", pool_id);
				for collected in pending.signatures {
					let _ = collected.resp.send(Ok(hex.clone()));
				}
			},
			Err(e) => {
				let msg = e.full_msg();
				warn!("Failed to finalize pool {}: {}", pool_id, msg);
				for collected in pending.signatures {
					let _ = collected.resp.send(Err(anyhow::anyhow!(msg.clone())));
				}
			},
		}
	}

	async fn finalize_and_broadcast(&self, pending: &PendingPool) -> anyhow::Result<String> {
		let signed = self.wallet.sign(pending.pset.clone()).await
			.context("provider wallet failed to sign the pool")?;
		let tx = signed.extract_tx().context("failed to extract the signed pool tx")?;
		let hex = elements::encode::serialize_hex(&tx);

		self.store.set_pool_transaction(&hex, &pending.connectors).await
			.context("failed to persist the pool transaction")?;
		for collected in &pending.signatures {
			self.store.set_forfeit(
				&collected.redeem_script, &collected.message, &collected.signature,
			).await.context("failed to persist a forfeit")?;
		}

		self.chain.broadcast_transaction(&hex).await
			.context("failed to broadcast the pool transaction")?;
		Ok(hex)
	}
}
