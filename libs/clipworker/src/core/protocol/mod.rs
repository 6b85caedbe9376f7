// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Request/response protocol between the controller and its workers.
//!
//! Both directions share one framing ([`codec`]) and one pump ([`Handler`]).
//! The worker runs a [`Responder`] in front of its dispatcher; the controller
//! runs one [`Requester`] per worker.

pub mod codec;
mod handler;
mod messages;
mod requester;
mod responder;

pub use handler::{Disconnect, Handler, MessageSink, ReadChannel};
pub use messages::{
    Command, ExecuteParams, FrameMeta, FrameRef, HandshakeReply, Message, RawPayload, Reply,
    Request, Response, SourceKind, EXECUTE, RESULTS, RESULTS_META, RESULTS_RAW,
};
pub use requester::Requester;
pub use responder::{Responder, Service, REDACTED};
