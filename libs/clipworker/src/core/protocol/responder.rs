// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Worker-side protocol role: turns Requests into Service calls.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use super::handler::{Disconnect, Handler, MessageSink, ReadChannel};
use super::messages::{Command, Message, Reply, Request, Response};
use crate::core::{Deferred, Result, WorkerError};

/// Something that answers commands asynchronously.
pub trait Service: Send + Sync + 'static {
    fn call(&self, command: Command) -> Deferred<Reply>;
}

/// Placeholder logged instead of protected payloads.
pub const REDACTED: &str = "(protected)";

type DisconnectHook = Box<dyn Fn(&Disconnect) + Send + Sync>;

pub struct Responder {
    handler: Arc<Handler>,
}

struct ResponderSink {
    handler: Arc<Handler>,
    service: Arc<dyn Service>,
    pid: u32,
    on_disconnect: Option<DisconnectHook>,
}

impl Responder {
    /// Start answering requests read from `reader`.
    ///
    /// `on_disconnect` runs on the reader thread when the channel ends, which
    /// the worker uses to stop its dispatcher once the controller goes away.
    pub fn start<R: ReadChannel>(
        reader: R,
        writer: Box<dyn Write + Send>,
        service: Arc<dyn Service>,
        poll_interval: Duration,
        on_disconnect: Option<DisconnectHook>,
    ) -> Result<Self> {
        let pid = std::process::id();
        let handler = Handler::new(format!("responder-{}", pid), writer);
        let sink = Arc::new(ResponderSink {
            handler: Arc::clone(&handler),
            service,
            pid,
            on_disconnect,
        });
        handler.start(reader, poll_interval, sink)?;
        Ok(Self { handler })
    }

    pub fn stop(&self) {
        self.handler.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.handler.is_stopped()
    }

    /// Replies whose encoding exceeds `limit` are answered with a
    /// `protocol` error instead.
    pub fn set_frame_limit(&self, limit: usize) {
        self.handler.set_frame_limit(limit);
    }
}

impl ResponderSink {
    fn handle_request(&self, request: Request) {
        tracing::debug!(
            pid = self.pid,
            id = request.id,
            "> {} {}",
            request.request_type,
            if request.protect {
                REDACTED.to_string()
            } else {
                format!("{} bytes", request.data.len())
            }
        );

        let command = match request.command() {
            Ok(command) => command,
            Err(err) => {
                tracing::warn!(
                    pid = self.pid,
                    id = request.id,
                    "Rejecting request: {}",
                    err
                );
                send_response(&self.handler, self.pid, request.fail(&err));
                return;
            }
        };

        let handler = Arc::clone(&self.handler);
        let pid = self.pid;
        self.service
            .call(command)
            .add_done_callback(move |result| {
                let response = match result {
                    Ok(reply) => request.respond(reply),
                    Err(err) => request.fail(&err),
                };
                send_response(&handler, pid, response);
            });
    }
}

fn send_response(handler: &Handler, pid: u32, response: Response) {
    match (&response.error, &response.data) {
        (Some(error), _) => tracing::debug!(pid, id = response.id, "< failed: {}", error),
        (None, _) if response.protected => tracing::debug!(pid, id = response.id, "< {}", REDACTED),
        (None, data) => tracing::debug!(pid, id = response.id, "< {:?}", data),
    }

    let (id, protected) = (response.id, response.protected);
    match handler.send(&Message::Response(response)) {
        Ok(()) => {}
        // Encoding failed before anything was written; the id still gets an answer.
        Err(err @ WorkerError::Protocol(_)) => {
            tracing::warn!(pid, id, "Response could not be encoded: {}", err);
            let fallback = Response {
                id,
                data: None,
                error: Some(err.to_remote()),
                protected,
            };
            if let Err(e) = handler.send(&Message::Response(fallback)) {
                tracing::warn!(pid, id, "Could not deliver response: {}", e);
            }
        }
        Err(e) => tracing::warn!(pid, id, "Could not deliver response: {}", e),
    }
}

impl MessageSink for ResponderSink {
    fn on_message(&self, message: Message) {
        match message {
            Message::Request(request) => self.handle_request(request),
            Message::Response(response) => {
                tracing::warn!(
                    pid = self.pid,
                    id = response.id,
                    "Ignoring response sent to a responder"
                );
            }
        }
    }

    fn on_disconnect(&self, reason: Disconnect) {
        if let Some(hook) = &self.on_disconnect {
            hook(&reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::{codec, FrameRef, RawPayload};
    use std::os::unix::net::UnixStream;

    struct Oversized;

    impl Service for Oversized {
        fn call(&self, _command: Command) -> Deferred<Reply> {
            Deferred::resolved(Reply::Raw(Some(RawPayload::Inline(vec![7; 4096]))))
        }
    }

    #[test]
    fn test_unencodable_reply_is_answered_with_an_error() {
        let (mut controller, worker) = UnixStream::pair().unwrap();
        let responder = Responder::start(
            worker.try_clone().unwrap(),
            Box::new(worker),
            Arc::new(Oversized),
            Duration::from_millis(20),
            None,
        )
        .unwrap();
        responder.set_frame_limit(1024);

        let frame = FrameRef {
            id: "0".into(),
            frame: 0,
        };
        let request = Request::new(7, &Command::ResultsRaw(frame)).unwrap();
        codec::write_frame(&mut controller, &Message::Request(request)).unwrap();

        controller
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let response = match codec::read_message::<_, Message>(&mut controller).unwrap() {
            Some(Message::Response(response)) => response,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(response.id, 7);
        assert!(response.data.is_none());
        assert_eq!(response.error.map(|e| e.kind), Some("protocol".to_string()));
        responder.stop();
    }
}
