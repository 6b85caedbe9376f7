// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The worker command namespace, answered from the hosted script.

use std::sync::Arc;

use super::dispatcher::LocalDispatcher;
use crate::core::protocol::{Command, FrameMeta, FrameRef, Reply, Service};
use crate::core::{
    run_coroutine, Deferred, Frame, Result, Script, SharedFrameBuffer, WorkerError,
};

/// Translates each [`Command`] into calls on the script.
pub struct BasicCommands {
    script: Arc<dyn Script>,
    frame_buffer: Arc<SharedFrameBuffer>,
}

impl BasicCommands {
    pub fn new(script: Arc<dyn Script>, frame_buffer: Arc<SharedFrameBuffer>) -> Self {
        Self {
            script,
            frame_buffer,
        }
    }

    pub fn handle(&self, command: Command) -> Deferred<Reply> {
        if !self.script.alive() {
            return Deferred::failed(WorkerError::DeadCore(
                "the script engine is no longer usable".into(),
            ));
        }

        match command {
            Command::Execute(params) => self
                .script
                .execute(params.into())
                .map(|value| Ok(Reply::Executed(value))),
            Command::Results => self.script.get_results().map(|clips| {
                Ok(Reply::Results(
                    clips
                        .iter()
                        .map(|(name, clip)| (name.clone(), clip.len()))
                        .collect(),
                ))
            }),
            Command::ResultsMeta(frame) => {
                let script = Arc::clone(&self.script);
                run_coroutine(async move {
                    let Some(frame) = find_frame(script, &frame).await? else {
                        return Ok(Reply::Meta(None));
                    };
                    let size = frame.size().await?;
                    let format = frame.format().await?;
                    Ok(Reply::Meta(Some(FrameMeta { size, format })))
                })
            }
            Command::ResultsRaw(frame) => {
                let script = Arc::clone(&self.script);
                let frame_buffer = Arc::clone(&self.frame_buffer);
                run_coroutine(async move {
                    let Some(frame) = find_frame(script, &frame).await? else {
                        return Ok(Reply::Raw(None));
                    };
                    let raw = frame.to_raw().await?;
                    Ok(Reply::Raw(Some(frame_buffer.store(&raw))))
                })
            }
        }
    }
}

/// `None` when the clip does not exist or has no such frame.
async fn find_frame(script: Arc<dyn Script>, frame: &FrameRef) -> Result<Option<Arc<dyn Frame>>> {
    let clips = script.get_results().await?;
    let Some(clip) = clips.get(&frame.id) else {
        return Ok(None);
    };
    if frame.frame >= clip.len() {
        return Ok(None);
    }
    match clip.frame(frame.frame).await {
        Ok(found) => Ok(Some(found)),
        Err(WorkerError::IndexOutOfRange { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// [`Service`] that queues every command on the dispatcher.
pub struct WorkerService {
    dispatcher: Arc<LocalDispatcher<Reply>>,
    commands: Arc<BasicCommands>,
}

impl WorkerService {
    pub fn new(dispatcher: Arc<LocalDispatcher<Reply>>, commands: BasicCommands) -> Self {
        Self {
            dispatcher,
            commands: Arc::new(commands),
        }
    }
}

impl Service for WorkerService {
    fn call(&self, command: Command) -> Deferred<Reply> {
        let commands = Arc::clone(&self.commands);
        self.dispatcher
            .submit(move || commands.handle(command).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pattern::PatternScript;
    use crate::core::protocol::RawPayload;
    use crate::core::{RawFormat, ScriptSource, Size};

    fn commands(source: &str) -> (Arc<PatternScript>, BasicCommands) {
        let script = Arc::new(PatternScript::new(Default::default()));
        script.initialize().unwrap();
        script
            .execute(ScriptSource::Code(source.into()))
            .join()
            .unwrap();
        let buffer = Arc::new(SharedFrameBuffer::create(64 * 48 * 3).unwrap());
        let commands = BasicCommands::new(script.clone(), buffer);
        (script, commands)
    }

    fn frame(id: &str, frame: u32) -> FrameRef {
        FrameRef {
            id: id.into(),
            frame,
        }
    }

    #[test]
    fn test_results_map_names_to_lengths() {
        let (_, commands) = commands("output 0 length=5\noutput extra length=2 format=gray8");
        let reply = commands.handle(Command::Results).join().unwrap();
        let map = reply.into_results().unwrap();
        assert_eq!(map.get("0"), Some(&5));
        assert_eq!(map.get("extra"), Some(&2));
    }

    #[test]
    fn test_meta_for_missing_frames_is_none() {
        let (_, commands) = commands("output 0 length=5");
        for missing in [frame("0", 5), frame("0", 99), frame("nope", 0)] {
            let reply = commands
                .handle(Command::ResultsMeta(missing))
                .join()
                .unwrap();
            assert_eq!(reply, Reply::Meta(None));
        }

        let reply = commands
            .handle(Command::ResultsMeta(frame("0", 4)))
            .join()
            .unwrap();
        assert_eq!(
            reply,
            Reply::Meta(Some(FrameMeta {
                size: Size::new(64, 48),
                format: RawFormat::RGB24,
            }))
        );
    }

    #[test]
    fn test_raw_goes_through_shared_buffer() {
        let (_, commands) = commands("output 0 length=2");
        let reply = commands
            .handle(Command::ResultsRaw(frame("0", 1)))
            .join()
            .unwrap();
        assert_eq!(reply, Reply::Raw(Some(RawPayload::Shared(64 * 48 * 3))));
    }

    #[test]
    fn test_oversized_raw_falls_back_inline() {
        let (_, commands) = commands("output 0 length=1 width=65 height=48");
        let reply = commands
            .handle(Command::ResultsRaw(frame("0", 0)))
            .join()
            .unwrap();
        assert!(matches!(reply, Reply::Raw(Some(RawPayload::Inline(d))) if d.len() == 65 * 48 * 3));
    }

    #[test]
    fn test_dead_core_is_reported_before_dispatch() {
        let (script, commands) = commands("output 0 length=1");
        script
            .execute(ScriptSource::Code("kill".into()))
            .join()
            .unwrap();
        let err = commands.handle(Command::Results).join().unwrap_err();
        assert!(err.is_dead_core());
    }
}
