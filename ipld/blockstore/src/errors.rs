// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

/// Blockstore error
#[derive(Debug, PartialEq, Error)]
pub enum Error {
    #[error("{0}")]
    Db(#[from] mirror_db::Error),
    #[error("{0}")]
    Encoding(#[from] mirror_encoding::Error),
}
