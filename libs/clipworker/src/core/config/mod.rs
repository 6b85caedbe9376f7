// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod worker_config;

pub use worker_config::{WorkerConfig, WORKER_BIN_ENV, WORKER_BIN_NAME};
