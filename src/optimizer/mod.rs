//! The optimization engine: shared state, passes, and the pipeline.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Pipeline                                 │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  OptimizerContext            Shared interprocedural state        │
//! │    ├─ IR functions            (per-method SSA, DashMap)          │
//! │    ├─ metadata providers      (per-instruction side tables)      │
//! │    ├─ field bits / enum candidates / known field values          │
//! │    ├─ merged-classes records, synthetic-method cache             │
//! │    └─ EventLog + Diagnostics                                     │
//! │                                                                  │
//! │  Pipeline                    Wave execution                      │
//! │    ├─ IR construction         (parallel, fail-collect)           │
//! │    ├─ call graph + cycles     (forced-inline order)              │
//! │    ├─ per-method waves        (parallel; normalize per change)   │
//! │    └─ global boundaries       (merging, staticizing, install)    │
//! │                                                                  │
//! │  IrPass trait                Interface for all passes            │
//! │    ├─ run_on_method()         Per-method transformation          │
//! │    └─ run_global()            Whole-program transformation       │
//! │                                                                  │
//! │  Lowering                    SSA → output code (see lowering)    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

mod context;
mod events;
pub mod merging;
mod metadata;
mod pass;
pub mod passes;
mod scheduler;

pub use context::OptimizerContext;
pub use events::{DerivedStats, Event, EventKind, EventLog, EventRecorder};
pub use metadata::{BytecodeMetadataProvider, InstructionMetadata};
pub use pass::IrPass;
pub use scheduler::{Pipeline, PipelineSummary};
