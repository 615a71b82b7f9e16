// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod behaviour;
mod codec;
mod messages;
mod service;

pub use self::behaviour::{MirrorBehaviour, MirrorBehaviourEvent};
pub use self::messages::{Announce, BlockRequest, BlockResponse, HeadRequest, HeadResponse};
pub use self::service::{build_transport, Libp2pService};
