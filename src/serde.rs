//! Contains the [Serde] abstraction used to turn typed Domain Events and
//! Commands into the opaque payload bytes stored in the Event Log, and back.

use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

/// A [Serde] can be used to serialize into and deserialize from a given type
/// into a wire format, such as [JSON][Json].
pub trait Serde<T>: Send + Sync {
    /// The error returned by the [Serde::serialize] and [Serde::deserialize] methods.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Serializes the given value into the wire format supported by this [Serde].
    fn serialize(&self, value: &T) -> Result<Vec<u8>, Self::Error>;

    /// Deserializes the given value from a message encoded in the wire format
    /// supported by this [Serde].
    fn deserialize(&self, data: &[u8]) -> Result<T, Self::Error>;
}

/// Implements the [Serde] trait using the [serde] crate to serialize
/// and deserialize a message into JSON.
#[derive(Debug, Clone, Copy)]
pub struct Json<T>(PhantomData<T>)
where
    T: Serialize + Send + Sync,
    for<'d> T: Deserialize<'d>;

impl<T> Default for Json<T>
where
    T: Serialize + Send + Sync,
    for<'d> T: Deserialize<'d>,
{
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T> Serde<T> for Json<T>
where
    T: Serialize + Send + Sync,
    for<'d> T: Deserialize<'d>,
{
    type Error = serde_json::Error;

    fn serialize(&self, value: &T) -> Result<Vec<u8>, Self::Error> {
        serde_json::to_vec(value)
    }

    fn deserialize(&self, data: &[u8]) -> Result<T, Self::Error> {
        serde_json::from_slice(data)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Deposit {
        wallet_id: String,
        amount: u64,
    }

    #[test]
    fn json_serde_reads_back_what_it_writes() {
        let serde = Json::<Deposit>::default();
        let value = Deposit {
            wallet_id: "w-1".to_owned(),
            amount: 50,
        };

        let bytes = serde.serialize(&value).expect("serialization should not fail");
        assert_eq!(br#"{"wallet_id":"w-1","amount":50}"#.to_vec(), bytes);
        assert_eq!(value, serde.deserialize(&bytes).expect("deserialization should not fail"));
    }

    #[test]
    fn json_serde_rejects_malformed_payloads() {
        let serde = Json::<Deposit>::default();
        assert!(serde.deserialize(b"{not json").is_err());
    }
}
