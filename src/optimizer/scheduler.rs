//! The pipeline: IR construction, wave scheduling, and finalization.
//!
//! One [`Pipeline::run`] performs a whole-program compile:
//!
//! 1. **IR construction** - every method with input code is converted to
//!    SSA in parallel; verification failures are collected as diagnostics
//!    for the whole program before the first of them aborts the compile
//! 2. **Call graph** - built from the IR, cycles broken so a
//!    callees-first order exists, methods grouped into waves along
//!    forced-inline edges
//! 3. **Waves** - per-method passes run in parallel within a wave; after
//!    a pass changes a method, the normalize passes run on it to a fixed
//!    point. Wave boundaries are the only places class-level state
//!    mutates: global passes (merging, staticizing) and synthetic-method
//!    installation run serially between iterations
//! 4. **Finalization** - merged-source invariants are checked, every
//!    method is lowered in parallel, and the output code is installed
//!    into the application
//!
//! The class model is read-only while any wave is in flight; this is
//! enforced by the phase structure, not by locks.

use std::sync::Mutex;

use rayon::prelude::*;

use crate::{
    callgraph::CallGraph,
    diagnostics::{Diagnostic, DiagnosticKind, DiagnosticLevel, Origin},
    ir::{IrBuilder, IrFunction},
    lowering::CodeEmitter,
    model::{Application, MethodCode, MethodId},
    optimizer::{
        merging::{HorizontalClassMergerPass, StaticizerPass, VerticalClassMergerPass},
        passes::{
            AlwaysThrowingPass, DeadCodeEliminationPass, EnumUnboxingPass,
            FieldAccessAnalysisPass, NullCheckInsertionPass, PhiSimplificationPass,
        },
        EventKind, IrPass, OptimizerContext,
    },
    Error, Options, Result,
};

/// Summary of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSummary {
    /// Methods compiled through the IR pipeline.
    pub methods_compiled: usize,
    /// Call edges removed by cycle elimination (first iteration).
    pub call_edges_removed: usize,
    /// Full pipeline iterations executed.
    pub iterations: usize,
}

/// The configured pass pipeline.
pub struct Pipeline {
    method_passes: Vec<Box<dyn IrPass>>,
    normalize: Vec<Box<dyn IrPass>>,
    global_passes: Vec<Box<dyn IrPass>>,
    max_iterations: usize,
}

impl Pipeline {
    /// The standard pipeline for the given options.
    #[must_use]
    pub fn standard(options: &Options) -> Self {
        let mut method_passes: Vec<Box<dyn IrPass>> = Vec::new();
        if options.phi_simplification {
            method_passes.push(Box::new(PhiSimplificationPass));
        }
        if options.throwing_desugar {
            method_passes.push(Box::new(AlwaysThrowingPass));
        }
        method_passes.push(Box::new(FieldAccessAnalysisPass));
        if options.enum_unboxing {
            method_passes.push(Box::new(EnumUnboxingPass));
        }
        method_passes.push(Box::new(NullCheckInsertionPass));

        let mut global_passes: Vec<Box<dyn IrPass>> = vec![Box::new(StaticizerPass)];
        if options.class_merging {
            global_passes.push(Box::new(HorizontalClassMergerPass));
            global_passes.push(Box::new(VerticalClassMergerPass));
        }

        Self {
            method_passes,
            normalize: vec![Box::new(DeadCodeEliminationPass)],
            global_passes,
            max_iterations: 2,
        }
    }

    /// An empty pipeline (IR build + lowering only); used by tests.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            method_passes: Vec::new(),
            normalize: Vec::new(),
            global_passes: Vec::new(),
            max_iterations: 1,
        }
    }

    /// Runs the whole pipeline.
    ///
    /// # Errors
    ///
    /// Fails fast on malformed input (after collecting diagnostics for
    /// every failing method), cyclic forced inlining, ambiguous
    /// resolution, or violated merging invariants.
    pub fn run(&self, ctx: &OptimizerContext, app: &mut Application) -> Result<PipelineSummary> {
        match ctx.options.thread_count {
            Some(threads) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| Error::Error(e.to_string()))?;
                pool.install(|| self.run_inner(ctx, app))
            }
            None => self.run_inner(ctx, app),
        }
    }

    fn run_inner(&self, ctx: &OptimizerContext, app: &mut Application) -> Result<PipelineSummary> {
        // Phase 1: parallel IR construction, fail-fast after full
        // collection so one bad archive does not hide the rest.
        let methods = app.methods_with_code();
        let built: Vec<(MethodId, Result<IrFunction>)> = methods
            .par_iter()
            .map(|&method| {
                let program_method = app
                    .program_method(method)
                    .expect("listed methods are present");
                let body = program_method
                    .code
                    .input()
                    .expect("listed methods carry input code");
                let is_static = program_method.is_static();
                (
                    method,
                    IrBuilder::new(&ctx.symbols).build(method, is_static, body),
                )
            })
            .collect();

        let mut functions: Vec<IrFunction> = Vec::with_capacity(built.len());
        let mut first_error: Option<Error> = None;
        for (method, result) in built {
            match result {
                Ok(func) => functions.push(func),
                Err(error) => {
                    ctx.diagnostics.report(Diagnostic {
                        level: DiagnosticLevel::Error,
                        kind: DiagnosticKind::MalformedInput,
                        origin: Origin::Class(ctx.symbols.method(method).holder),
                        method: Some(method),
                        min_api: None,
                        message: error.to_string(),
                    });
                    first_error.get_or_insert(error);
                }
            }
        }
        if let Some(error) = first_error {
            return Err(error);
        }
        let methods_compiled = functions.len();

        // Phase 2/3: iterate waves and global boundaries.
        let mut call_edges_removed = 0;
        let mut iterations = 0;
        for iteration in 0..self.max_iterations {
            iterations = iteration + 1;

            // (Re)build the call graph from the current IR set.
            if iteration > 0 {
                functions.clear();
                for method in ctx.compiled_methods() {
                    if let Some((_, func)) = ctx.ir_functions.remove(&method) {
                        functions.push(func);
                    }
                }
            }
            let mut call_graph = CallGraph::build(app, functions.iter());
            let removed = call_graph.break_cycles(&ctx.symbols)?;
            if iteration == 0 {
                call_edges_removed = removed;
                for _ in 0..removed {
                    ctx.events.record(EventKind::CallEdgeRemoved);
                }
            }
            let waves = call_graph.processing_waves()?;
            for func in functions.drain(..) {
                ctx.ir_functions.insert(func.method(), func);
            }

            let mut changed = self.run_waves(ctx, app, &waves)?;

            // Serial boundary: whole-program passes and synthetics. Global
            // passes leave call-site fixups to the next wave sweep, so the
            // final iteration runs waves only.
            if iteration + 1 < self.max_iterations {
                for pass in &self.global_passes {
                    if pass.run_global(ctx, app)? {
                        changed = true;
                    }
                }
            }
            ctx.synthetics.install(app)?;

            if !changed {
                break;
            }
        }

        // Phase 4: invariants, then lowering.
        ctx.merged_classes
            .lock()
            .map_err(|_| Error::LockError)?
            .verify_sources_removed(app)?;

        let lowered: Vec<Result<(MethodId, crate::lowering::LoweredMethod)>> = ctx
            .compiled_methods()
            .par_iter()
            .map(|&method| {
                let func = ctx
                    .ir_functions
                    .get(&method)
                    .ok_or_else(|| Error::Error(format!("missing IR for {method}")))?;
                let provider = ctx.metadata.get(&method);
                let emitter = CodeEmitter::new(&ctx.symbols);
                let code = emitter.lower(&func, provider.as_deref())?;
                Ok((method, code))
            })
            .collect();

        for result in lowered {
            let (method, code) = result?;
            if let Some(program_method) = app.program_method_mut(method) {
                program_method.code = MethodCode::Output(code);
            }
            ctx.events.record(EventKind::MethodLowered).at(method);
        }
        // IR and per-method metadata are transient; drop them now that
        // output code is installed.
        ctx.ir_functions.clear();
        ctx.metadata.clear();

        Ok(PipelineSummary {
            methods_compiled,
            call_edges_removed,
            iterations,
        })
    }

    /// Runs the per-method passes over every wave, in parallel within a
    /// wave, with normalization after each change.
    fn run_waves(
        &self,
        ctx: &OptimizerContext,
        app: &Application,
        waves: &[Vec<MethodId>],
    ) -> Result<bool> {
        let any_changed = Mutex::new(false);
        let first_error: Mutex<Option<Error>> = Mutex::new(None);

        for wave in waves {
            for pass in &self.method_passes {
                wave.par_iter().for_each(|&method| {
                    if first_error.lock().map(|g| g.is_some()).unwrap_or(true) {
                        return;
                    }
                    if !pass.should_run(method, ctx) {
                        return;
                    }
                    // Brief map access, then no locks held while running.
                    let Some((_, mut func)) = ctx.ir_functions.remove(&method) else {
                        return;
                    };
                    let result = pass.run_on_method(&mut func, ctx, app);
                    match result {
                        Ok(true) => {
                            for normalize in &self.normalize {
                                let mut rounds = 0;
                                while normalize
                                    .run_on_method(&mut func, ctx, app)
                                    .unwrap_or(false)
                                {
                                    rounds += 1;
                                    if rounds >= ctx.options.max_normalize_iterations {
                                        break;
                                    }
                                }
                            }
                            ctx.processed.insert(method);
                            if let Ok(mut guard) = any_changed.lock() {
                                *guard = true;
                            }
                        }
                        Ok(false) => {}
                        Err(error) => {
                            if let Ok(mut guard) = first_error.lock() {
                                guard.get_or_insert(error);
                            }
                        }
                    }
                    ctx.ir_functions.insert(method, func);
                });
            }
        }

        if let Ok(mut guard) = first_error.lock() {
            if let Some(error) = guard.take() {
                return Err(error);
            }
        }
        Ok(any_changed.into_inner().map_err(|_| Error::LockError)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::InstructionAssembler;
    use crate::model::{
        ClassAccessFlags, ClassKind, KeepNothing, MethodAccessFlags, ProgramClass, ProgramMethod,
        SymbolTable, ValueType,
    };
    use std::sync::Arc;

    fn small_app() -> (Arc<SymbolTable>, Application, MethodId) {
        let symbols = Arc::new(SymbolTable::new());
        let mut app = Application::new(Arc::clone(&symbols));

        let holder = symbols.object_type("com/example/Main");
        let mut class = ProgramClass::new(holder, ClassKind::Class, ClassAccessFlags::PUBLIC);
        class.super_class = Some(symbols.object());

        let proto = symbols.intern_proto("answer", vec![], symbols.int());
        let method = symbols.intern_method(holder, proto);
        let mut asm = InstructionAssembler::new(0);
        asm.iconst(40).iconst(2).iadd().ret(Some(ValueType::Int));
        class.add_method(ProgramMethod::with_body(
            method,
            proto,
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            asm.finish().unwrap(),
        ));
        app.add_class(class).unwrap();
        (symbols, app, method)
    }

    #[test]
    fn test_minimal_pipeline_compiles_and_lowers() {
        let (symbols, mut app, method) = small_app();
        let ctx = OptimizerContext::new(
            Arc::clone(&symbols),
            Options::default(),
            Arc::new(KeepNothing),
        );

        let summary = Pipeline::minimal().run(&ctx, &mut app).unwrap();
        assert_eq!(summary.methods_compiled, 1);
        assert_eq!(summary.call_edges_removed, 0);

        let lowered = app
            .program_method(method)
            .unwrap()
            .code
            .output()
            .expect("output installed");
        assert!(!lowered.instructions.is_empty());
        assert_eq!(ctx.events.count(EventKind::MethodLowered), 1);
    }

    #[test]
    fn test_malformed_method_collected_then_fails() {
        let (symbols, mut app, _) = small_app();

        // Add a second method with broken bytecode.
        let holder = symbols.object_type("com/example/Main");
        let proto = symbols.intern_proto("broken", vec![], symbols.int());
        let bad = symbols.intern_method(holder, proto);
        let mut asm = InstructionAssembler::new(0);
        asm.iadd().ret(Some(ValueType::Int)); // stack underflow
        app.class_mut(holder).unwrap().add_method(ProgramMethod::with_body(
            bad,
            proto,
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            asm.finish().unwrap(),
        ));

        let ctx = OptimizerContext::new(
            Arc::clone(&symbols),
            Options::default(),
            Arc::new(KeepNothing),
        );
        let err = Pipeline::minimal().run(&ctx, &mut app).unwrap_err();
        assert!(matches!(err, Error::Verification { .. }));
        assert!(ctx.diagnostics.has_errors());
    }

    #[test]
    fn test_standard_pipeline_runs_clean_program() {
        let (symbols, mut app, method) = small_app();
        let ctx = OptimizerContext::new(
            Arc::clone(&symbols),
            Options::default(),
            Arc::new(KeepNothing),
        );

        let summary = Pipeline::standard(&ctx.options).run(&ctx, &mut app).unwrap();
        assert_eq!(summary.methods_compiled, 1);
        assert!(app.program_method(method).is_some() || {
            // Horizontal merging may have re-homed the method; it must
            // then exist under the surviving class.
            app.classes().any(|c| !c.methods.is_empty())
        });
    }
}
