
//! The persistence seam, split into the two disjoint capability sets
//! of the pool manager and the watcher.

use async_trait::async_trait;
use elements::secp256k1_zkp::schnorr;
use elements::Script;

use lark_lib::{ForfeitMessage, PoolId};


/// A stored forfeit promise: the message and the sender's signature
/// over its digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct StoredForfeit {
	pub message: ForfeitMessage,
	pub signature: schnorr::Signature,
}

/// A stored pool transaction with its unused connector indices.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StoredPool {
	pub hex: String,
	pub connectors: Vec<u32>,
}

/// Writes performed by the pool manager when a pool finalizes.
#[async_trait]
pub trait ManagerStore: Send + Sync {
	/// Record a collected forfeit, keyed by the redeem script pubkey
	/// the watcher will scan for.
	async fn set_forfeit(
		&self,
		redeem_script: &Script,
		message: &ForfeitMessage,
		signature: &schnorr::Signature,
	) -> anyhow::Result<()>;

	/// Record a finalized pool transaction and its connector indices.
	async fn set_pool_transaction(&self, hex: &str, connectors: &[u32]) -> anyhow::Result<()>;
}

/// Reads and connector bookkeeping performed by the watcher.
#[async_trait]
pub trait WatcherStore: Send + Sync {
	async fn get_forfeit(&self, redeem_script: &Script) -> anyhow::Result<Option<StoredForfeit>>;

	async fn get_pool_transaction(&self, pool: PoolId) -> anyhow::Result<Option<StoredPool>>;

	/// Replace the unused connector list of a pool after one was
	/// consumed.
	async fn update_connectors(&self, pool: PoolId, connectors: &[u32]) -> anyhow::Result<()>;
}
