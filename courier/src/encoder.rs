use serde::{de::DeserializeOwned, Serialize};

use crate::QueueError;

pub fn encode(input: impl Serialize) -> Result<Vec<u8>, QueueError> {
    Ok(rmp_serde::to_vec(&input)?)
}

pub fn decode<T: DeserializeOwned>(input: &[u8]) -> Result<T, QueueError> {
    Ok(rmp_serde::from_slice(input)?)
}
