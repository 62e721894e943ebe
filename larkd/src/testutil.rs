
//! In-memory doubles for the daemon's external collaborators, used by
//! the manager and watcher tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use elements::encode;
use elements::hashes::Hash;
use elements::pset::PartiallySignedTransaction;
use elements::secp256k1_zkp::{schnorr, Keypair, Message, PublicKey, Scalar, XOnlyPublicKey};
use elements::sighash::{self, SighashCache};
use elements::taproot::TapTweakHash;
use elements::{
	confidential, AssetId, BlockHash, OutPoint, Script, Transaction, Txid, TxOut, TxOutWitness,
};

use lark_lib::util::SECP;
use lark_lib::{lift, Coin, ExtendedVirtualUtxo, ForfeitMessage, LiftRequest, Network, PoolId};

use crate::chain::{ChainSource, Unspent};
use crate::config::Config;
use crate::error::{CoinSelectionError, MissingTransaction};
use crate::repository::{ManagerStore, StoredForfeit, StoredPool, WatcherStore};
use crate::wallet::{CoinSelection, Wallet};

lazy_static! {
	pub static ref ASP_KEY: Keypair = Keypair::from_seckey_str(
		&SECP, "1fb316e653eec61de11c6b794636d230379509389215df1ceb520b65313e5426",
	).unwrap();
	pub static ref ALICE_KEY: Keypair = Keypair::from_seckey_str(
		&SECP, "5255d132d6ec7d4fc2a41c8f0018bb14343489ddd0344025cc60c7aa2b3fda6a",
	).unwrap();
	pub static ref BOB_KEY: Keypair = Keypair::from_seckey_str(
		&SECP, "9a8745e11dbdd26ae7eb49e0e26ba09d8d3c03ed26ab84307f1ed9f7cd4e8b0e",
	).unwrap();
	pub static ref CAROL_KEY: Keypair = Keypair::from_seckey_str(
		&SECP, "43f0216b5f5caeba3d1e30f4f2f4d26e0297a2ac12cf31950734088ae62a1b7c",
	).unwrap();

	pub static ref NETWORK: Network = Network::elements_regtest(
		BlockHash::all_zeros(),
		"5ac9f65c0efcc4775e0baec4ec03abdde22473cd3cf33c0419ca290e0751b225"
			.parse().unwrap(),
	);
}

static NEXT_TXID_BYTE: AtomicU8 = AtomicU8::new(1);

fn explicit_txout(asset: AssetId, value: u64, script_pubkey: Script) -> TxOut {
	TxOut {
		asset: confidential::Asset::Explicit(asset),
		value: confidential::Value::Explicit(value),
		nonce: confidential::Nonce::Null,
		script_pubkey,
		witness: TxOutWitness::default(),
	}
}

/// A wallet holding one big keyspend coin.
pub struct MockWallet {
	keypair: Keypair,
	network: Network,
	funds: u64,
}

impl MockWallet {
	pub fn new(keypair: Keypair, network: Network, funds: u64) -> MockWallet {
		MockWallet { keypair, network, funds }
	}

	fn keyspend_script(&self) -> Script {
		Script::new_v1_p2tr(&SECP, self.keypair.x_only_public_key().0, None)
	}

	fn keyspend_keypair(&self) -> Keypair {
		let tweak = TapTweakHash::from_key_and_tweak(self.keypair.x_only_public_key().0, None);
		let scalar = Scalar::from_be_bytes(tweak.to_byte_array()).expect("tweak in range");
		self.keypair.add_xonly_tweak(&SECP, &scalar).expect("valid tweak")
	}
}

#[async_trait]
impl Wallet for MockWallet {
	fn public_key(&self) -> PublicKey {
		self.keypair.public_key()
	}

	fn change_script_pubkey(&self) -> Script {
		self.keyspend_script()
	}

	async fn coin_select(&self, amount: u64, asset: AssetId) -> anyhow::Result<CoinSelection> {
		if amount > self.funds {
			return Err(CoinSelectionError { required: amount }.into());
		}
		let coin = Coin {
			outpoint: OutPoint::new(Txid::from_byte_array([0xfd; 32]), 0),
			txout: explicit_txout(asset, self.funds, self.keyspend_script()),
		};
		let change = if amount < self.funds {
			Some(explicit_txout(asset, self.funds - amount, self.keyspend_script()))
		} else {
			None
		};
		Ok(CoinSelection { coins: vec![coin], change })
	}

	async fn sign(
		&self,
		mut pset: PartiallySignedTransaction,
	) -> anyhow::Result<PartiallySignedTransaction> {
		let tx = pset.extract_tx()?;
		let prevouts = pset.inputs().iter()
			.map(|i| i.witness_utxo.clone().expect("witness utxo present"))
			.collect::<Vec<_>>();
		let spk = self.keyspend_script();
		let keypair = self.keyspend_keypair();
		let mut cache = SighashCache::new(&tx);

		for idx in 0..pset.inputs().len() {
			let input = &pset.inputs()[idx];
			if input.final_script_witness.is_some() {
				continue;
			}
			if prevouts[idx].script_pubkey != spk {
				// not ours, leave untouched
				continue;
			}
			let sighash_all = input.sighash_type.map(|t| t.to_u32()) == Some(0x01);
			let ty = if sighash_all {
				sighash::SchnorrSighashType::All
			} else {
				sighash::SchnorrSighashType::Default
			};
			let hash = cache.taproot_key_spend_signature_hash(
				idx, &sighash::Prevouts::All(&prevouts), ty, self.network.genesis_hash,
			)?;
			let sig = SECP.sign_schnorr_no_aux_rand(
				&Message::from_digest(hash.to_byte_array()), &keypair,
			);
			let mut witness = sig[..].to_vec();
			if sighash_all {
				witness.push(0x01);
			}
			pset.inputs_mut()[idx].final_script_witness = Some(vec![witness]);
		}
		Ok(pset)
	}

	fn sign_schnorr(&self, msg: [u8; 32]) -> schnorr::Signature {
		SECP.sign_schnorr_no_aux_rand(&Message::from_digest(msg), &self.keypair)
	}
}

/// A chain source backed by hash maps. Broadcast transactions are
/// registered so their outputs become visible as unspents.
#[derive(Default)]
pub struct MockChain {
	txs: Mutex<HashMap<Txid, Transaction>>,
	unspents: Mutex<HashMap<Script, Vec<Unspent>>>,
	broadcasts: Mutex<Vec<Txid>>,
}

impl MockChain {
	pub fn register_tx(&self, tx: &Transaction) {
		let txid = tx.txid();
		let mut unspents = self.unspents.lock().unwrap();
		// the registered tx consumes whatever it spends
		for inp in &tx.input {
			for list in unspents.values_mut() {
				list.retain(|u| {
					OutPoint::new(u.tx_hash, u.tx_pos) != inp.previous_output
				});
			}
		}
		for (vout, out) in tx.output.iter().enumerate() {
			if out.script_pubkey.is_empty() {
				continue;
			}
			unspents
				.entry(out.script_pubkey.clone())
				.or_default()
				.push(Unspent { height: 1, tx_pos: vout as u32, tx_hash: txid });
		}
		self.txs.lock().unwrap().insert(txid, tx.clone());
	}

	pub fn broadcast_count(&self) -> usize {
		self.broadcasts.lock().unwrap().len()
	}

	pub fn broadcasts(&self) -> Vec<Txid> {
		self.broadcasts.lock().unwrap().clone()
	}

	pub fn tx(&self, txid: Txid) -> Option<Transaction> {
		self.txs.lock().unwrap().get(&txid).cloned()
	}
}

#[async_trait]
impl ChainSource for MockChain {
	async fn list_unspents(&self, script: &Script) -> anyhow::Result<Vec<Unspent>> {
		Ok(self.unspents.lock().unwrap().get(script).cloned().unwrap_or_default())
	}

	async fn fetch_transaction(&self, txid: Txid) -> anyhow::Result<Transaction> {
		self.txs.lock().unwrap().get(&txid).cloned()
			.ok_or_else(|| MissingTransaction { txid }.into())
	}

	async fn broadcast_transaction(&self, hex: &str) -> anyhow::Result<Txid> {
		let tx: Transaction = encode::deserialize(&hex::decode(hex)?)?;
		self.register_tx(&tx);
		let txid = tx.txid();
		self.broadcasts.lock().unwrap().push(txid);
		Ok(txid)
	}

	async fn close(&self) -> anyhow::Result<()> {
		Ok(())
	}
}

/// Repository double implementing both capability sets.
#[derive(Default)]
pub struct MemoryStore {
	forfeits: Mutex<HashMap<Script, StoredForfeit>>,
	pools: Mutex<HashMap<PoolId, StoredPool>>,
}

impl MemoryStore {
	pub fn forfeit_for(&self, script: &Script) -> Option<StoredForfeit> {
		self.forfeits.lock().unwrap().get(script).copied()
	}

	pub fn pool_for(&self, pool: PoolId) -> Option<StoredPool> {
		self.pools.lock().unwrap().get(&pool).cloned()
	}
}

#[async_trait]
impl ManagerStore for MemoryStore {
	async fn set_forfeit(
		&self,
		redeem_script: &Script,
		message: &ForfeitMessage,
		signature: &schnorr::Signature,
	) -> anyhow::Result<()> {
		self.forfeits.lock().unwrap().insert(redeem_script.clone(), StoredForfeit {
			message: *message,
			signature: *signature,
		});
		Ok(())
	}

	async fn set_pool_transaction(&self, hex: &str, connectors: &[u32]) -> anyhow::Result<()> {
		let tx: Transaction = encode::deserialize(&hex::decode(hex)?)?;
		self.pools.lock().unwrap().insert(tx.txid().into(), StoredPool {
			hex: hex.into(),
			connectors: connectors.to_vec(),
		});
		Ok(())
	}
}

#[async_trait]
impl WatcherStore for MemoryStore {
	async fn get_forfeit(&self, redeem_script: &Script) -> anyhow::Result<Option<StoredForfeit>> {
		Ok(self.forfeit_for(redeem_script))
	}

	async fn get_pool_transaction(&self, pool: PoolId) -> anyhow::Result<Option<StoredPool>> {
		Ok(self.pool_for(pool))
	}

	async fn update_connectors(&self, pool: PoolId, connectors: &[u32]) -> anyhow::Result<()> {
		let mut pools = self.pools.lock().unwrap();
		let entry = pools.get_mut(&pool).expect("pool exists");
		entry.connectors = connectors.to_vec();
		Ok(())
	}
}

pub struct Setup {
	pub config: Config,
	pub wallet: Arc<MockWallet>,
	pub chain: Arc<MockChain>,
	pub store: Arc<MemoryStore>,
}

/// Fresh fixture with a provider wallet holding `wallet_funds`.
pub fn setup(wallet_funds: u64) -> Setup {
	let network = NETWORK.clone();
	Setup {
		config: Config::new(network.clone()),
		wallet: Arc::new(MockWallet::new(*ASP_KEY, network, wallet_funds)),
		chain: Arc::new(MockChain::default()),
		store: Arc::new(MemoryStore::default()),
	}
}

impl Setup {
	pub fn asp_xonly(&self) -> XOnlyPublicKey {
		ASP_KEY.x_only_public_key().0
	}

	/// Lift `value` into a fresh vUTXO owned by `owner` and register
	/// the lift tx on the mock chain.
	pub fn lift(&self, owner: &Keypair, value: u64) -> ExtendedVirtualUtxo {
		let miner_fee = 500;
		let txid_byte = NEXT_TXID_BYTE.fetch_add(1, Ordering::SeqCst);
		let request = LiftRequest {
			coins: vec![Coin {
				outpoint: OutPoint::new(Txid::from_byte_array([txid_byte; 32]), 0),
				txout: explicit_txout(
					self.config.network.asset,
					value + miner_fee,
					Script::new_v1_p2tr(&SECP, owner.x_only_public_key().0, None),
				),
			}],
			change: None,
			vutxo_pubkey: owner.public_key(),
		};
		let lifted = lift::create_lift_transaction(
			ASP_KEY.public_key(),
			&[request],
			&self.config.network,
			miner_fee,
			self.config.claim_timeout,
			self.config.redeem_timeout,
		).unwrap();
		let tx = lifted.pset.extract_tx().unwrap();
		self.chain.register_tx(&tx);
		lifted.extended_vutxo(owner.x_only_public_key().0).unwrap()
	}
}
