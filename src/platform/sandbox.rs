//! Sandboxed evaluation of extracted cipher functions
//!
//! Every compiled function owns a V8 isolate on its own thread, since the
//! isolate is not `Send`. No extensions are registered, so the isolate has no
//! network, filesystem or timer ops. The runtime's `Deno` and `__bootstrap`
//! objects are deleted from the global object before extracted code runs, and
//! the remaining host names are shadowed inside the evaluation scope.
//!
//! Calls are queued on the worker thread. The budget of a call starts when the
//! worker picks it up, and an overrun only ever terminates that call.

use crate::error::{EvalStage, FunctionKind, ResolveError};
use crate::platform::locator::FunctionSource;
use crate::utils::js::quote_string;
use anyhow::{anyhow, Context};
use deno_core::{v8, FastString, JsRuntime, RuntimeOptions};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

const WORKER_STACK_SIZE: usize = 4 * 1024 * 1024;

/// Global the compiled function is bound to inside its isolate
const ENTRY: &str = "__ryt_entry";

/// Removes the runtime's handles from the real global object
const PRELUDE: &str = "delete globalThis.Deno;delete globalThis.__bootstrap;\
typeof globalThis.Deno+','+typeof globalThis.__bootstrap";

/// Globals hidden from extracted code
const SHADOWED: &str = "Deno, __bootstrap, performance, fetch, setTimeout, setInterval, queueMicrotask";

/// Job id the worker reports while no call is running
const IDLE: u64 = 0;

/// Job id the worker reports while the extracted code is being compiled
const COMPILING: u64 = 1;

struct Job {
    id: u64,
    arg: String,
    started: oneshot::Sender<()>,
    reply: oneshot::Sender<Result<String, String>>,
}

/// A function compiled once into an isolated evaluator
pub struct CompiledFunction {
    kind: FunctionKind,
    name: String,
    snippet: String,
    budget: Duration,
    jobs: mpsc::UnboundedSender<Job>,
    isolate: v8::IsolateHandle,
    next_job: AtomicU64,
    running: Arc<AtomicU64>,
}

impl std::fmt::Debug for CompiledFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledFunction")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("budget", &self.budget)
            .finish()
    }
}

impl CompiledFunction {
    /// Compile `source` on a fresh isolate
    ///
    /// `budget` bounds compilation and every later invocation. Running out of
    /// it is a [`ResolveError::Timeout`], so a slow host never marks a player
    /// version as unusable.
    pub async fn compile(source: &FunctionSource, budget: Duration) -> Result<Self, ResolveError> {
        let kind = source.kind;
        let snippet = source.snippet();
        let program = wrap_source(source);

        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (handle_tx, handle_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let running = Arc::new(AtomicU64::new(COMPILING));

        let worker_running = running.clone();
        std::thread::Builder::new()
            .name(format!("ryt-{}-eval", kind))
            .stack_size(WORKER_STACK_SIZE)
            .spawn(move || worker(program, handle_tx, ready_tx, jobs_rx, worker_running))
            .map_err(|e| compile_error(kind, &snippet, format!("spawn evaluator thread: {}", e)))?;

        let isolate = handle_rx
            .await
            .map_err(|_| compile_error(kind, &snippet, "evaluator thread exited".to_string()))?;

        let guard = RunningScript {
            isolate: &isolate,
            running: &running,
            id: COMPILING,
        };
        match tokio::time::timeout(budget, ready_rx).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(cause))) => return Err(compile_error(kind, &snippet, cause)),
            Ok(Err(_)) => {
                return Err(compile_error(kind, &snippet, "evaluator thread exited".to_string()))
            }
            Err(_) => {
                warn!(
                    "Compiling {} function {} exceeded its {:?} budget, terminating",
                    kind, source.name, budget
                );
                return Err(ResolveError::Timeout(format!(
                    "compilation of {} function {} (evaluation budget {:?})",
                    kind, source.name, budget
                )));
            }
        }

        drop(guard);

        debug!("Compiled {} function {}", kind, source.name);
        Ok(Self {
            kind,
            name: source.name.clone(),
            snippet,
            budget,
            jobs: jobs_tx,
            isolate,
            next_job: AtomicU64::new(COMPILING + 1),
            running,
        })
    }

    /// Run the function on one token
    ///
    /// Time spent queued behind other calls is bounded by the caller, not by
    /// the evaluation budget.
    pub async fn invoke(&self, arg: &str) -> Result<String, ResolveError> {
        let id = self.next_job.fetch_add(1, Ordering::Relaxed);
        let (started_tx, started_rx) = oneshot::channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.jobs
            .send(Job {
                id,
                arg: arg.to_string(),
                started: started_tx,
                reply: reply_tx,
            })
            .map_err(|_| self.invoke_error("evaluator thread exited".to_string()))?;

        started_rx
            .await
            .map_err(|_| self.invoke_error("evaluator thread exited".to_string()))?;

        let _guard = RunningScript {
            isolate: &self.isolate,
            running: &self.running,
            id,
        };
        match tokio::time::timeout(self.budget, reply_rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(cause))) => Err(self.invoke_error(cause)),
            Ok(Err(_)) => Err(self.invoke_error("evaluator thread exited".to_string())),
            Err(_) => {
                warn!(
                    "{} function {} exceeded its {:?} budget, terminating",
                    self.kind, self.name, self.budget
                );
                Err(ResolveError::Timeout(format!(
                    "{} function {} (evaluation budget {:?})",
                    self.kind, self.name, self.budget
                )))
            }
        }
    }

    pub fn kind(&self) -> FunctionKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn invoke_error(&self, cause: String) -> ResolveError {
        ResolveError::CipherEvaluation {
            function: self.kind,
            stage: EvalStage::Invoke,
            cause,
            snippet: self.snippet.clone(),
        }
    }
}

/// Terminates the isolate if dropped while its script is still running
///
/// Covers budget overruns as well as callers that stop waiting.
struct RunningScript<'a> {
    isolate: &'a v8::IsolateHandle,
    running: &'a AtomicU64,
    id: u64,
}

impl Drop for RunningScript<'_> {
    fn drop(&mut self) {
        if self.running.load(Ordering::SeqCst) == self.id {
            self.isolate.terminate_execution();
        }
    }
}

fn compile_error(kind: FunctionKind, snippet: &str, cause: String) -> ResolveError {
    ResolveError::CipherEvaluation {
        function: kind,
        stage: EvalStage::Compile,
        cause,
        snippet: snippet.to_string(),
    }
}

fn wrap_source(source: &FunctionSource) -> String {
    format!(
        "var {entry}=(function({shadowed}){{\n{code}\n;return {name};}})();\ntypeof {entry}",
        entry = ENTRY,
        shadowed = SHADOWED,
        code = source.code,
        name = source.name,
    )
}

fn worker(
    program: String,
    handle_tx: oneshot::Sender<v8::IsolateHandle>,
    ready_tx: oneshot::Sender<Result<(), String>>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    running: Arc<AtomicU64>,
) {
    let mut runtime = JsRuntime::new(RuntimeOptions::default());
    if handle_tx
        .send(runtime.v8_isolate().thread_safe_handle())
        .is_err()
    {
        return;
    }

    let compiled = strip_runtime_globals(&mut runtime)
        .and_then(|()| run_script(&mut runtime, "<cipher>", program))
        .and_then(|kind| {
            if kind == "function" {
                Ok(())
            } else {
                Err(anyhow!("extracted code evaluated to {} instead of a function", kind))
            }
        });
    running.store(IDLE, Ordering::SeqCst);
    let failed = compiled.is_err();
    if ready_tx.send(compiled.map_err(|e| format!("{:#}", e))).is_err() || failed {
        return;
    }

    while let Some(job) = jobs.blocking_recv() {
        // Abandoned while queued
        if job.reply.is_closed() {
            continue;
        }
        running.store(job.id, Ordering::SeqCst);
        runtime.v8_isolate().cancel_terminate_execution();
        if job.started.send(()).is_err() {
            running.store(IDLE, Ordering::SeqCst);
            continue;
        }

        let call = format!("{}({})", ENTRY, quote_string(&job.arg));
        let result = run_script(&mut runtime, "<invoke>", call)
            .map_err(|e| format!("{:#}", e));
        running.store(IDLE, Ordering::SeqCst);
        // The caller may have given up already
        let _ = job.reply.send(result);
    }
}

fn strip_runtime_globals(runtime: &mut JsRuntime) -> anyhow::Result<()> {
    let remaining = run_script(runtime, "<prelude>", PRELUDE.to_string())?;
    if remaining != "undefined,undefined" {
        return Err(anyhow!("runtime globals could not be removed ({})", remaining));
    }
    Ok(())
}

/// Execute `code` and read a non-empty string result
fn run_script(runtime: &mut JsRuntime, name: &'static str, code: String) -> anyhow::Result<String> {
    let value = runtime
        .execute_script(name, FastString::from(code))
        .with_context(|| format!("{} failed", name))?;

    let scope = &mut runtime.handle_scope();
    let local = value.open(scope);
    if !local.is_string() {
        let shown = local.to_rust_string_lossy(scope);
        return Err(anyhow!("returned a non-string value: {}", shown));
    }
    let result = local.to_rust_string_lossy(scope);
    if result.is_empty() {
        return Err(anyhow!("returned an empty string"));
    }
    Ok(result)
}
