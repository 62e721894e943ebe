
use std::borrow::Borrow;
use std::error::Error as StdError;
use std::fmt::{self, Write};

use anyhow::Context;

use elements::Txid;
use lark_lib::PoolId;


pub trait AnyhowErrorExt: Borrow<anyhow::Error> {
	fn full_msg(&self) -> String {
		let mut ret = String::new();
		for (i, e) in self.borrow().chain().enumerate() {
			if i == 0 {
				write!(ret, "{}", e).expect("write to buf");
			} else {
				write!(ret, ": {}", e).expect("write to buf");
			}
		}
		ret
	}
}
impl AnyhowErrorExt for anyhow::Error {}


/// An error type to add context to anyhow to indicate any form
/// of incorrect user input.
pub struct BadArgument {
	context: Box<dyn fmt::Display + Send + Sync + 'static>,
}

impl BadArgument {
	pub fn new(context: impl fmt::Display + Send + Sync + 'static) -> BadArgument {
		BadArgument {
			context: Box::new(context),
		}
	}
}

impl fmt::Debug for BadArgument {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		fmt::Display::fmt(self, f)
	}
}

impl fmt::Display for BadArgument {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "bad user input: {}", self.context)
	}
}

impl StdError for BadArgument {}

/// A forfeit signature that failed Schnorr verification. Rejects only
/// the call that carried it.
#[derive(Debug)]
pub struct SignatureError;

impl fmt::Display for SignatureError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "forfeit signature verification failed")
	}
}

impl StdError for SignatureError {}

/// The promised pool has no connector output left to anchor a forfeit.
///
/// Fatal: the provider cannot forfeit more users than it funded
/// connectors for, so this must surface to the operator.
#[derive(Debug)]
pub struct InsufficientConnectors {
	pub pool: PoolId,
}

impl fmt::Display for InsufficientConnectors {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "pool {} has no unused connectors left", self.pool)
	}
}

impl StdError for InsufficientConnectors {}

/// The chain source does not know the requested transaction. Subject
/// to bounded retry; see [crate::chain::fetch_transactions].
#[derive(Debug)]
pub struct MissingTransaction {
	pub txid: Txid,
}

impl fmt::Display for MissingTransaction {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "missingtransaction: {}", self.txid)
	}
}

impl StdError for MissingTransaction {}

/// The wallet could not cover the requested amount.
#[derive(Debug)]
pub struct CoinSelectionError {
	pub required: u64,
}

impl fmt::Display for CoinSelectionError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "wallet cannot cover {} sat", self.required)
	}
}

impl StdError for CoinSelectionError {}


/// Return an [mod@anyhow] error tagged with [BadArgument].
macro_rules! badarg {
	($($arg:tt)*) => {
		Err(anyhow::Error::from($crate::error::BadArgument::new(format!($($arg)*))))
	};
}
pub(crate) use badarg;


/// Extension trait for adding larkd-specific error info.
pub trait ContextExt<T, E>: Context<T, E> {
	/// Tag an error with [BadArgument].
	fn badarg<C>(self, context: C) -> anyhow::Result<T>
		where C: fmt::Display + Send + Sync + 'static;
}

impl<R, T, E> ContextExt<T, E> for R
where
	R: Context<T, E>,
{
	fn badarg<C>(self, context: C) -> anyhow::Result<T>
	where
		C: fmt::Display + Send + Sync + 'static,
	{
		self.context(BadArgument::new(context))
	}
}
