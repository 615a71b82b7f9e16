// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

/// Schema error
#[derive(Debug, PartialEq, Error)]
pub enum Error {
    #[error("{0}")]
    Encoding(#[from] mirror_encoding::Error),
    #[error("advertisement is not signed")]
    NotSigned,
    #[error("invalid signature key: {0}")]
    Key(String),
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("signing failed: {0}")]
    Signing(String),
}
