// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Message shapes exchanged between the controller and a worker.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::script::{RawFormat, ScriptSource, Size};
use crate::core::{RemoteError, Result, WorkerError};

pub const EXECUTE: &str = "script/subprocess/execute";
pub const RESULTS: &str = "script/subprocess/results";
pub const RESULTS_META: &str = "script/subprocess/results/meta";
pub const RESULTS_RAW: &str = "script/subprocess/results/raw";

/// Payload of an `execute` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteParams {
    #[serde(rename = "type")]
    pub kind: SourceKind,
    pub code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Path,
    String,
}

impl From<ScriptSource> for ExecuteParams {
    fn from(source: ScriptSource) -> Self {
        match source {
            ScriptSource::Path(path) => ExecuteParams {
                kind: SourceKind::Path,
                code: path.to_string_lossy().into_owned(),
            },
            ScriptSource::Code(code) => ExecuteParams {
                kind: SourceKind::String,
                code,
            },
        }
    }
}

impl From<ExecuteParams> for ScriptSource {
    fn from(params: ExecuteParams) -> Self {
        match params.kind {
            SourceKind::Path => ScriptSource::Path(params.code.into()),
            SourceKind::String => ScriptSource::Code(params.code),
        }
    }
}

/// Addresses one frame of one output clip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRef {
    pub id: String,
    pub frame: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Empty {}

/// Every request a worker understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Execute(ExecuteParams),
    Results,
    ResultsMeta(FrameRef),
    ResultsRaw(FrameRef),
}

impl Command {
    pub fn request_type(&self) -> &'static str {
        match self {
            Command::Execute(_) => EXECUTE,
            Command::Results => RESULTS,
            Command::ResultsMeta(_) => RESULTS_META,
            Command::ResultsRaw(_) => RESULTS_RAW,
        }
    }

    /// Raw frame payloads are kept out of logs.
    pub fn is_protected(&self) -> bool {
        matches!(self, Command::ResultsRaw(_))
    }

    pub fn encode_data(&self) -> Result<Vec<u8>> {
        let data = match self {
            Command::Execute(params) => rmp_serde::to_vec_named(params)?,
            Command::Results => rmp_serde::to_vec_named(&Empty::default())?,
            Command::ResultsMeta(frame) | Command::ResultsRaw(frame) => {
                rmp_serde::to_vec_named(frame)?
            }
        };
        Ok(data)
    }

    pub fn decode(request_type: &str, data: &[u8]) -> Result<Self> {
        match request_type {
            EXECUTE => Ok(Command::Execute(rmp_serde::from_slice(data)?)),
            RESULTS => Ok(Command::Results),
            RESULTS_META => Ok(Command::ResultsMeta(rmp_serde::from_slice(data)?)),
            RESULTS_RAW => Ok(Command::ResultsRaw(rmp_serde::from_slice(data)?)),
            other => Err(WorkerError::UnknownRequestType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    #[serde(rename = "type")]
    pub request_type: String,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
    #[serde(default)]
    pub protect: bool,
}

impl Request {
    pub fn new(id: u64, command: &Command) -> Result<Self> {
        Ok(Self {
            id,
            request_type: command.request_type().to_string(),
            data: command.encode_data()?,
            protect: command.is_protected(),
        })
    }

    pub fn command(&self) -> Result<Command> {
        Command::decode(&self.request_type, &self.data)
    }

    pub fn respond(&self, data: Reply) -> Response {
        Response {
            id: self.id,
            data: Some(data),
            error: None,
            protected: self.protect,
        }
    }

    pub fn fail(&self, error: &WorkerError) -> Response {
        Response {
            id: self.id,
            data: None,
            error: Some(error.to_remote()),
            protected: self.protect,
        }
    }
}

/// Answer to a [`Request`]. Exactly one of `data` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub data: Option<Reply>,
    pub error: Option<RemoteError>,
    #[serde(default)]
    pub protected: bool,
}

impl Response {
    pub fn into_result(self) -> Result<Reply> {
        match (self.error, self.data) {
            (Some(error), _) => Err(WorkerError::from_remote(error)),
            (None, Some(data)) => Ok(data),
            (None, None) => Ok(Reply::Null),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Message {
    Request(Request),
    Response(Response),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMeta {
    pub size: Size,
    pub format: RawFormat,
}

/// Where the bytes of a `results/raw` answer are.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawPayload {
    /// This many bytes now sit at the start of the shared frame buffer.
    Shared(usize),
    /// Payload did not fit the shared buffer and travels in the response.
    Inline(#[serde(with = "serde_bytes")] Vec<u8>),
}

impl RawPayload {
    pub fn len(&self) -> usize {
        match self {
            RawPayload::Shared(len) => *len,
            RawPayload::Inline(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    Null,
    Executed(Option<String>),
    Results(BTreeMap<String, u32>),
    Meta(Option<FrameMeta>),
    Raw(Option<RawPayload>),
}

impl Reply {
    pub fn name(&self) -> &'static str {
        match self {
            Reply::Null => "null",
            Reply::Executed(_) => "executed",
            Reply::Results(_) => "results",
            Reply::Meta(_) => "meta",
            Reply::Raw(_) => "raw",
        }
    }

    fn unexpected(&self, wanted: &str) -> WorkerError {
        WorkerError::Protocol(format!(
            "expected a {} reply, got {}",
            wanted,
            self.name()
        ))
    }

    pub fn into_executed(self) -> Result<Option<String>> {
        match self {
            Reply::Executed(value) => Ok(value),
            Reply::Null => Ok(None),
            other => Err(other.unexpected("executed")),
        }
    }

    pub fn into_results(self) -> Result<BTreeMap<String, u32>> {
        match self {
            Reply::Results(map) => Ok(map),
            other => Err(other.unexpected("results")),
        }
    }

    pub fn into_meta(self) -> Result<Option<FrameMeta>> {
        match self {
            Reply::Meta(meta) => Ok(meta),
            Reply::Null => Ok(None),
            other => Err(other.unexpected("meta")),
        }
    }

    pub fn into_raw(self) -> Result<Option<RawPayload>> {
        match self {
            Reply::Raw(raw) => Ok(raw),
            Reply::Null => Ok(None),
            other => Err(other.unexpected("raw")),
        }
    }
}

/// Worker's one-shot answer to the provider configuration sent at boot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeReply {
    Ready { pid: u32 },
    Failed(RemoteError),
}
