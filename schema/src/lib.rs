// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod advertisement;
mod entries;
mod errors;

pub use self::advertisement::{AdSignature, Advertisement};
pub use self::entries::{EntriesKind, EntryChunk, NO_ENTRIES};
pub use self::errors::Error;
