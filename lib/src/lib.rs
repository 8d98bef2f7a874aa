// Copyright 2023 The Skiff Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![warn(missing_docs)]

//! Library for Skiff, a one-way source code migration engine.
//!
//! A migration reads a revision from an *origin* version control system,
//! transforms the checked-out files and the commit metadata according to a
//! Starlark configuration, and writes the result to a *destination* VCS.
//! The destination records the origin revision id under a label, which is
//! the durable linkage that lets subsequent runs import only new work.
//!
//! The crate contains the migration pipeline (planner, transformation
//! engine, workflow runner) and the configuration loader. Concrete VCS
//! backends implement the [`origin::Origin`] and
//! [`destination::Destination`] traits elsewhere.

pub mod authoring;
pub mod builtins;
pub mod config_file;
pub mod console;
pub mod destination;
pub mod error;
pub mod file_util;
pub mod glob;
pub mod loader;
pub mod metadata;
pub mod migration;
pub mod modules;
pub mod options;
pub mod origin;
pub mod revision;
pub mod transform;
pub mod transform_work;
pub mod validate;
pub mod workdir;
pub mod workflow;
