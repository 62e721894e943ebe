
use std::time::Duration;

use elements::Sequence;

use lark_lib::{Network, CLAIM_TIMEOUT, REDEEM_TIMEOUT};

use crate::serde_util;


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
	pub network: Network,
	/// How long the pool manager collects transfer orders before it
	/// builds the next pool.
	#[serde(with = "serde_util::duration")]
	pub batch_interval: Duration,
	/// Flat miner fee of a pool transaction.
	pub miner_fee: u64,
	#[serde(with = "serde_util::sequence")]
	pub claim_timeout: Sequence,
	#[serde(with = "serde_util::sequence")]
	pub redeem_timeout: Sequence,
}

impl Config {
	pub fn new(network: Network) -> Config {
		Config {
			network,
			batch_interval: Duration::from_secs(5),
			miner_fee: 500,
			claim_timeout: CLAIM_TIMEOUT,
			redeem_timeout: REDEEM_TIMEOUT,
		}
	}
}
