// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::messages::{BlockRequest, BlockResponse, HeadRequest, HeadResponse};
use async_trait::async_trait;
use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use libp2p::request_response::{ProtocolName, RequestResponseCodec};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use std::marker::PhantomData;

/// Libp2p head exchange protocol ID.
pub const HEAD_PROTOCOL_ID: &[u8] = b"/indexer/head/0.0.1";
/// Libp2p block exchange protocol ID.
pub const BLOCK_PROTOCOL_ID: &[u8] = b"/indexer/block/0.0.1";

// Sanity bound on a single request or response frame.
const MAX_FRAME_BYTES: u64 = 8 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct HeadProtocolName;

impl ProtocolName for HeadProtocolName {
    fn protocol_name(&self) -> &[u8] {
        HEAD_PROTOCOL_ID
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct BlockProtocolName;

impl ProtocolName for BlockProtocolName {
    fn protocol_name(&self) -> &[u8] {
        BLOCK_PROTOCOL_ID
    }
}

/// Request-response codec carrying one DAG-CBOR frame per substream, closed
/// after writing.
#[derive(Clone)]
pub struct DagCborRequestResponse<P, RQ, RS> {
    _marker: PhantomData<fn() -> (P, RQ, RS)>,
}

impl<P, RQ, RS> Default for DagCborRequestResponse<P, RQ, RS> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

async fn read_frame<T, M>(io: &mut T) -> io::Result<M>
where
    T: AsyncRead + Unpin + Send,
    M: DeserializeOwned,
{
    let mut bytes = Vec::new();
    io.take(MAX_FRAME_BYTES).read_to_end(&mut bytes).await?;
    mirror_encoding::from_slice(&bytes)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
}

async fn write_frame<T, M>(io: &mut T, message: M) -> io::Result<()>
where
    T: AsyncWrite + Unpin + Send,
    M: Serialize,
{
    let bytes = mirror_encoding::to_vec(&message)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    io.write_all(&bytes).await?;
    io.close().await
}

#[async_trait]
impl<P, RQ, RS> RequestResponseCodec for DagCborRequestResponse<P, RQ, RS>
where
    P: ProtocolName + Clone + Send + Sync,
    RQ: Serialize + DeserializeOwned + Send,
    RS: Serialize + DeserializeOwned + Send,
{
    type Protocol = P;
    type Request = RQ;
    type Response = RS;

    async fn read_request<T>(&mut self, _: &Self::Protocol, io: &mut T) -> io::Result<Self::Request>
    where
        T: AsyncRead + Unpin + Send,
    {
        read_frame(io).await
    }

    async fn read_response<T>(
        &mut self,
        _: &Self::Protocol,
        io: &mut T,
    ) -> io::Result<Self::Response>
    where
        T: AsyncRead + Unpin + Send,
    {
        read_frame(io).await
    }

    async fn write_request<T>(
        &mut self,
        _: &Self::Protocol,
        io: &mut T,
        req: Self::Request,
    ) -> io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        write_frame(io, req).await
    }

    async fn write_response<T>(
        &mut self,
        _: &Self::Protocol,
        io: &mut T,
        res: Self::Response,
    ) -> io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        write_frame(io, res).await
    }
}

pub type HeadCodec = DagCborRequestResponse<HeadProtocolName, HeadRequest, HeadResponse>;
pub type BlockCodec = DagCborRequestResponse<BlockProtocolName, BlockRequest, BlockResponse>;
