// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

/// Encoding error
#[derive(Debug, PartialEq, Eq, Error)]
pub enum Error {
    #[error("could not encode as cbor: {0}")]
    Encode(String),
    #[error("could not decode cbor: {0}")]
    Decode(String),
}
