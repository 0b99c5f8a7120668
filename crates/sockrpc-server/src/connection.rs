//! Per-connection protocol state machine.
//!
//! A connection moves through
//! `Reading -> Decoding -> Dispatching -> Encoding -> Writing -> Closed`
//! exactly once. It never goes back and is never reused. At most one response
//! frame is written.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, trace, warn};

use sockrpc_protocol::{Codec, Response, decode_request, encode_response};

use crate::dispatch::Dispatcher;
use crate::error::{ServerError, ServerResult};

/// Size of each socket read.
pub const READ_CHUNK_SIZE: usize = 512;

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accumulating bytes until the terminator.
    Reading,
    /// Turning the frame into a request.
    Decoding,
    /// Running the handler.
    Dispatching,
    /// Turning the response into a frame.
    Encoding,
    /// Sending the frame.
    Writing,
    /// Done; the socket is shut down.
    Closed,
}

/// A client connection, holding one worker slot until dropped.
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    codec: Arc<dyn Codec>,
    max_frame_size: usize,
    io_timeout: Duration,
    state: ConnectionState,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Connection {
    /// Wraps an accepted stream.
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        codec: Arc<dyn Codec>,
        max_frame_size: usize,
        io_timeout: Duration,
    ) -> Self {
        Self {
            stream,
            peer,
            codec,
            max_frame_size,
            io_timeout,
            state: ConnectionState::Reading,
            _permit: None,
        }
    }

    /// Attaches the worker-pool permit released when the connection drops.
    pub(crate) fn with_permit(mut self, permit: OwnedSemaphorePermit) -> Self {
        self._permit = Some(permit);
        self
    }

    /// Returns the remote address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Returns the current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn transition(&mut self, next: ConnectionState) {
        trace!(peer = %self.peer, from = ?self.state, to = ?next, "Connection state change");
        self.state = next;
    }

    /// Serves the single request on this connection and closes it.
    ///
    /// Returns an error when the connection ended without a response:
    /// oversized frame, undecodable request without an id, IO failure or
    /// timeout. A clean EOF before any request is not an error.
    #[tracing::instrument(skip_all, fields(peer = %self.peer))]
    pub async fn serve(mut self, dispatcher: &Dispatcher) -> ServerResult<()> {
        let result = self.exchange(dispatcher).await;
        self.transition(ConnectionState::Closed);
        if let Err(e) = self.stream.shutdown().await {
            trace!(error = %e, "Failed to shut down stream");
        }
        result
    }

    async fn exchange(&mut self, dispatcher: &Dispatcher) -> ServerResult<()> {
        let Some(frame) = self.read_frame().await? else {
            return Ok(());
        };

        self.transition(ConnectionState::Decoding);
        let request = match decode_request(self.codec.as_ref(), &frame) {
            Ok(request) => request,
            Err(failure) => {
                warn!(error = %failure, id = ?failure.id, "Failed to decode request");
                return match failure.into_response() {
                    Ok(response) => self.respond(&response).await,
                    Err(failure) => Err(ServerError::Decode(failure)),
                };
            }
        };

        self.transition(ConnectionState::Dispatching);
        let response = dispatcher.dispatch(request).await;
        self.respond(&response).await
    }

    /// Reads one frame, terminator stripped.
    ///
    /// Returns `Ok(None)` if the peer closed before sending a terminator.
    pub async fn read_frame(&mut self) -> ServerResult<Option<Vec<u8>>> {
        let terminator = self.codec.terminator();
        let mut frame = Vec::with_capacity(READ_CHUNK_SIZE);
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        loop {
            let n = match tokio::time::timeout(self.io_timeout, self.stream.read(&mut chunk)).await
            {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(ServerError::timeout("read request frame")),
            };

            if n == 0 {
                if !frame.is_empty() {
                    debug!(bytes = frame.len(), "Peer closed before frame terminator");
                }
                return Ok(None);
            }

            let received = &chunk[..n];
            match received.iter().position(|b| *b == terminator) {
                Some(end) => {
                    frame.extend_from_slice(&received[..end]);
                    self.check_frame_size(frame.len())?;
                    return Ok(Some(frame));
                }
                None => {
                    frame.extend_from_slice(received);
                    self.check_frame_size(frame.len())?;
                }
            }
        }
    }

    fn check_frame_size(&self, size: usize) -> ServerResult<()> {
        if size > self.max_frame_size {
            return Err(ServerError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }
        Ok(())
    }

    async fn respond(&mut self, response: &Response) -> ServerResult<()> {
        self.transition(ConnectionState::Encoding);
        let frame = match encode_response(self.codec.as_ref(), response) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Failed to encode response, sending encoding error instead");
                let fallback =
                    Response::error(response.id.clone(), format!("failed to encode response: {e}"));
                encode_response(self.codec.as_ref(), &fallback)?
            }
        };

        self.transition(ConnectionState::Writing);
        self.write_frame(&frame).await
    }

    /// Writes a complete frame.
    pub async fn write_frame(&mut self, frame: &[u8]) -> ServerResult<()> {
        match tokio::time::timeout(self.io_timeout, self.stream.write_all(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(ServerError::timeout("write response")),
        }
    }
}
