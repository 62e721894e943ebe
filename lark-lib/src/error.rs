
/// Error for anything that makes a script, tree, transaction or vUTXO
/// unacceptable to the protocol.
///
/// Validation errors are final: the offending object can never become
/// valid, so callers should not retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
	#[error("malformed {kind} script: {reason}")]
	MalformedScript {
		kind: &'static str,
		reason: &'static str,
	},
	#[error("invalid BIP-68 timelock: {0}")]
	InvalidTimelock(&'static str),
	#[error("confidential {0} are not supported")]
	Confidential(&'static str),
	#[error("invalid vUTXO: {0}")]
	InvalidVtxo(&'static str),
	#[error("taproot assembly failed: {0}")]
	Taproot(&'static str),
	#[error("transfer amount {amount} exceeds the vUTXO value {value}")]
	AmountExceedsValue {
		amount: u64,
		value: u64,
	},
	#[error("lifted amount does not cover its fee share of {fee_share}")]
	UncoveredFeeShare {
		fee_share: u64,
	},
	#[error("unbalanced transaction: inputs {inputs}, outputs {outputs}")]
	Unbalanced {
		inputs: u64,
		outputs: u64,
	},
	#[error("asset mismatch: expected the network asset")]
	WrongAsset,
	#[error("a stakeholder key appears more than once in the pool")]
	DuplicateStakeholder,
	#[error("a stakeholder cannot carry a zero amount")]
	ZeroAmount,
	#[error("pool has no orders")]
	Empty,
	#[error("pset assembly failed: {0}")]
	Pset(&'static str),
}
