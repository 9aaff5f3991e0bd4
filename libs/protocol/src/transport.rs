//! Interface to the message transport the driver sits on.
//!
//! A transport delivers `Call`s to the master and pushes everything it
//! receives into the driver's inbound queue. Within one connection epoch it
//! is ordered and reliable. When the link drops it pushes
//! `Inbound::LinkLost`, reconnects on its own, and pushes
//! `Inbound::LinkRestored` once the new link is usable.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::messages::{Call, Event};

/// Item placed in the driver's inbound queue by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A message from the master.
    Message(Event),

    /// The link to the master was lost.
    LinkLost { reason: String },

    /// A new link to the (possibly different) master is up.
    LinkRestored,
}

/// Sending half of the inbound queue.
pub type InboundSender = mpsc::UnboundedSender<Inbound>;

/// Receiving half of the inbound queue.
pub type InboundReceiver = mpsc::UnboundedReceiver<Inbound>;

/// Errors raised by a transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// There is no usable link right now.
    #[error("not connected to master")]
    NotConnected,

    /// The initial connection could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A message could not be handed to the link.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The transport was closed.
    #[error("transport closed")]
    Closed,
}

/// Transport adapter between the driver and the master.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish the first link and start feeding `inbound`.
    ///
    /// Called once per driver, before any `send`.
    async fn open(&self, inbound: InboundSender) -> Result<(), TransportError>;

    /// Hand one message to the link. Returns once the message is queued for
    /// delivery; never waits for a reply.
    async fn send(&self, call: Call) -> Result<(), TransportError>;

    /// Drop the current link and establish a new one.
    ///
    /// Used when the driver decides the master is unresponsive. The transport
    /// reports the outcome through `LinkLost` / `LinkRestored`.
    async fn reconnect(&self, reason: &str);

    /// Close the link for good. Idempotent.
    async fn close(&self);
}
