
//! Serde helpers for config fields.

pub mod duration {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
		s.serialize_u64(duration.as_millis() as u64)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
		Ok(Duration::from_millis(u64::deserialize(d)?))
	}
}

pub mod sequence {
	use elements::Sequence;
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(sequence: &Sequence, s: S) -> Result<S::Ok, S::Error> {
		s.serialize_u32(sequence.0)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Sequence, D::Error> {
		Ok(Sequence(u32::deserialize(d)?))
	}
}
