// Copyright 2025 The shrike authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
#![allow(clippy::too_many_arguments)]

//! # shrike
//!
//! A whole-program bytecode optimizer and shrinker. `shrike` ingests a
//! decoded class/method model, builds an SSA intermediate representation
//! per method, runs interacting whole-program and per-method optimization
//! passes ordered by a cycle-free call graph, and lowers the result back
//! to stack-machine bytecode with exact stack-map frames - ready for an
//! external class-file or dex writer.
//!
//! ## Features
//!
//! - **SSA method IR** - true single-assignment form with use-lists,
//!   per-predecessor phis, and exception-edge modeling
//! - **Call-graph scheduling** - cycle elimination honoring forced-inline
//!   requirements, callees-first parallel wave processing
//! - **Whole-program analyses** - class-hierarchy override collection,
//!   field access bits, enum-unboxing classification, member-value facts
//! - **Sound desugaring** - always-throwing invokes rewritten to shared,
//!   deduplicated throw helpers with precise error diagnosis
//! - **Class merging** - horizontal/vertical/static merging with
//!   merged-classes records consulted by every later pass
//! - **Exact lowering** - slot allocation, phi elimination via parallel
//!   edge copies, and verifier-grade stack-map frame computation
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use shrike::bytecode::InstructionAssembler;
//! use shrike::model::{
//!     Application, ClassAccessFlags, ClassKind, KeepNothing, MethodAccessFlags,
//!     ProgramClass, ProgramMethod, SymbolTable, ValueType,
//! };
//! use shrike::{optimize, Options};
//!
//! // Assemble a one-method program.
//! let symbols = Arc::new(SymbolTable::new());
//! let mut app = Application::new(Arc::clone(&symbols));
//! let holder = symbols.object_type("com/example/Main");
//! let mut class = ProgramClass::new(holder, ClassKind::Class, ClassAccessFlags::PUBLIC);
//! class.super_class = Some(symbols.object());
//!
//! let proto = symbols.intern_proto("answer", vec![], symbols.int());
//! let method = symbols.intern_method(holder, proto);
//! let mut asm = InstructionAssembler::new(0);
//! asm.iconst(40).iconst(2).iadd().ret(Some(ValueType::Int));
//! class.add_method(ProgramMethod::with_body(
//!     method,
//!     proto,
//!     MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
//!     asm.finish()?,
//! ));
//! app.add_class(class)?;
//!
//! // Optimize and inspect the lowered output.
//! let outcome = optimize(&mut app, Options::default(), Arc::new(KeepNothing))?;
//! assert_eq!(outcome.summary.methods_compiled, 1);
//! # Ok::<(), shrike::Error>(())
//! ```
//!
//! ## Architecture
//!
//! `shrike` is organized into focused modules:
//!
//! - [`model`] - interned symbols, program classes, the application, and
//!   the keep-rule oracle
//! - [`bytecode`] - the typed instruction model shared by input, IR, and
//!   output, plus a label-based assembler
//! - [`ir`] - the per-method SSA representation and its builder
//! - [`callgraph`] - the whole-program call graph and cycle eliminator
//! - [`hierarchy`] - class-hierarchy walkers and the method-overrides
//!   collector
//! - [`optimizer`] - shared pipeline state, the pass interface, the
//!   built-in passes, and the wave scheduler
//! - [`lowering`] - SSA to bytecode emission, stack-map frames, and
//!   utility-method synthesis
//! - [`diagnostics`] - program-level diagnostics and graph-inspection
//!   nodes
//!
//! The binary encodings themselves (class-file and dex) are external
//! target formats: writers consume [`lowering::LoweredMethod`] values and
//! the application's class model.

#[macro_use]
pub(crate) mod macros;

mod error;
mod options;

pub mod bytecode;
pub mod callgraph;
pub mod diagnostics;
pub mod hierarchy;
pub mod ir;
pub mod lowering;
pub mod model;
pub mod optimizer;
pub(crate) mod utils;

pub use error::Error;
pub use options::{Options, OutputKind};

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

use std::sync::Arc;

use model::{Application, KeepOracle};
use optimizer::{OptimizerContext, Pipeline, PipelineSummary};

/// Everything a pipeline run leaves behind besides the mutated
/// application: statistics, events, and diagnostics.
pub struct CompilationOutcome {
    /// Run statistics.
    pub summary: PipelineSummary,
    /// The context with its event log, diagnostics, and side tables.
    pub context: OptimizerContext,
}

/// Optimizes an application in place with the standard pipeline.
///
/// This is the library's front door: it builds an [`OptimizerContext`],
/// runs [`Pipeline::standard`], and returns the run's outcome. Drivers
/// needing custom pass rosters compose [`Pipeline`] directly.
///
/// # Errors
///
/// Fails on malformed input bytecode, cyclic forced inlining, ambiguous
/// resolution, or violated merging invariants. Drivers that need the
/// collected diagnostics in the error case construct the context
/// themselves and call [`Pipeline::run`] directly.
pub fn optimize(
    app: &mut Application,
    options: Options,
    keep: Arc<dyn KeepOracle>,
) -> Result<CompilationOutcome> {
    let context = OptimizerContext::new(Arc::clone(app.symbols()), options, keep);
    let pipeline = Pipeline::standard(&context.options);
    let summary = pipeline.run(&context, app)?;
    Ok(CompilationOutcome { summary, context })
}
