//! Interpreter instances and script execution.
//!
//! A [`PageInstance`] is one bootstrapped interpreter: a store carrying a
//! [`PageContext`] plus a linker with the host functions and both glue
//! environments registered. Instances are produced by the preload pool,
//! bound to one request at a time, and either disposed after a single run
//! or kept resident with a pre-loaded script ([`LoadedPage`]).
//!
//! Script faults (traps, missing entry point, exceeded deadline) are not
//! `Err` values: they are an expected outcome of running user-authored
//! scripts and surface as [`Outcome::Fault`] so the caller can render an
//! error page. `Err` is reserved for runtime-side problems such as a
//! bytecode artifact that no longer loads.

use tracing::{debug, instrument};
use uuid::Uuid;
use wasmtime::{Linker, Module, Store, TypedFunc};

use crate::ScriptEngine;
use crate::bindings;
use crate::bytecode::Bytecode;
use crate::context::{PageContext, ScriptRequest, ScriptResponse, create_store};
use crate::glue;
use dynpage_common::{ExecutionConfig, PageError};

/// Entry point exported by every page script.
pub const ENTRY_POINT: &str = "_start";

/// Result of executing a script in an instance.
#[derive(Debug)]
pub enum Outcome {
    /// The script ran to completion; the response is in the context.
    Success,

    /// The script was loaded but failed during execution: a trap, a
    /// missing or ill-typed entry point, or an exceeded deadline.
    Fault {
        /// Human-readable fault description.
        message: String,
    },
}

impl Outcome {
    /// Returns `true` for a successful run.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// One bootstrapped interpreter instance.
pub struct PageInstance {
    engine: ScriptEngine,
    store: Store<PageContext>,
    linker: Linker<PageContext>,
}

impl PageInstance {
    /// Create and bootstrap a fresh instance.
    ///
    /// Registers the host functions, then executes both glue programs in
    /// order. The returned instance is ready to bind and run.
    ///
    /// # Errors
    ///
    /// Returns `BootstrapFailed` if either glue program fails; callers
    /// treat this as fatal.
    #[instrument(skip(engine, exec))]
    pub async fn bootstrap(
        engine: &ScriptEngine,
        exec: &ExecutionConfig,
    ) -> Result<Self, PageError> {
        let mut store = create_store(engine);
        let mut linker = Linker::new(engine.inner());
        bindings::register_all(&mut linker)?;

        // Glue start functions execute during instantiation, so they need
        // a deadline too.
        if engine.config().epoch_interruption {
            store.set_epoch_deadline(exec.timeout_ms);
        }

        glue::bootstrap(engine, &mut linker, &mut store).await?;
        debug!("Instance bootstrapped");

        Ok(Self {
            engine: engine.clone(),
            store,
            linker,
        })
    }

    /// Bind a request context for the next execution.
    ///
    /// Assigns a fresh request id and fully overwrites any state left by a
    /// previous request. Returns the request id.
    pub fn bind(&mut self, request: ScriptRequest) -> String {
        let request_id = Uuid::new_v4().to_string();
        self.store.data_mut().rebind(request_id.clone(), request);
        request_id
    }

    /// Load bytecode and run its entry point against the bound context.
    ///
    /// # Errors
    ///
    /// Returns `LoadFailed` if the bytecode artifact cannot be re-loaded;
    /// script-level failures come back as `Ok(Outcome::Fault)`.
    #[instrument(skip(self, bytecode, exec))]
    pub async fn run(
        &mut self,
        bytecode: &Bytecode,
        exec: &ExecutionConfig,
    ) -> Result<Outcome, PageError> {
        let module = self.load_module(bytecode)?;
        self.arm_deadline(exec);

        let instance = match self.linker.instantiate_async(&mut self.store, &module).await {
            Ok(instance) => instance,
            Err(e) => return Ok(Outcome::Fault {
                message: e.to_string(),
            }),
        };

        let entry = match instance.get_typed_func::<(), ()>(&mut self.store, ENTRY_POINT) {
            Ok(entry) => entry,
            Err(e) => return Ok(Outcome::Fault {
                message: e.to_string(),
            }),
        };

        match entry.call_async(&mut self.store, ()).await {
            Ok(()) => Ok(Outcome::Success),
            Err(trap) => Ok(Outcome::Fault {
                message: trap.to_string(),
            }),
        }
    }

    /// Take the response the bound script produced.
    pub fn take_response(&mut self) -> ScriptResponse {
        self.store.data_mut().take_response()
    }

    /// The request id of the currently bound request.
    pub fn request_id(&self) -> &str {
        &self.store.data().request_id
    }

    fn arm_deadline(&mut self, exec: &ExecutionConfig) {
        if self.engine.config().epoch_interruption {
            // One epoch tick per millisecond; see the runtime's ticker.
            self.store.set_epoch_deadline(exec.timeout_ms);
        }
    }

    fn load_module(&self, bytecode: &Bytecode) -> Result<Module, PageError> {
        // SAFETY: the artifact was produced by `BytecodeCompiler` on the
        // same engine configuration, never accepted from external input.
        #[allow(unsafe_code)]
        let module = unsafe { Module::deserialize(self.engine.inner(), bytecode.as_bytes()) }
            .map_err(|e| PageError::load_failed(e.to_string()))?;
        Ok(module)
    }
}

impl std::fmt::Debug for PageInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageInstance")
            .field("request_id", &self.store.data().request_id)
            .finish_non_exhaustive()
    }
}

/// An instance with a script pre-loaded for repeated invocation.
///
/// Used by pooled dynamic routes: the script is instantiated once, then
/// each cycle re-binds a fresh request context and calls the entry point
/// again.
pub struct LoadedPage {
    inner: PageInstance,
    entry: TypedFunc<(), ()>,
}

impl LoadedPage {
    /// Load bytecode into an instance, ready for repeated invocation.
    ///
    /// # Errors
    ///
    /// Returns `LoadFailed` if the artifact cannot be re-loaded or lacks
    /// the entry point. Unlike a one-shot run this is an `Err`: a route
    /// registered with a broken script is a configuration problem, not a
    /// per-request fault.
    pub async fn load(mut inner: PageInstance, bytecode: &Bytecode) -> Result<Self, PageError> {
        let module = inner.load_module(bytecode)?;

        let instance = inner
            .linker
            .instantiate_async(&mut inner.store, &module)
            .await
            .map_err(|e| PageError::load_failed(e.to_string()))?;

        let entry = instance
            .get_typed_func::<(), ()>(&mut inner.store, ENTRY_POINT)
            .map_err(|e| PageError::load_failed(e.to_string()))?;

        Ok(Self { inner, entry })
    }

    /// Bind a request context for the next invocation.
    pub fn bind(&mut self, request: ScriptRequest) -> String {
        self.inner.bind(request)
    }

    /// Invoke the pre-loaded entry point against the bound context.
    pub async fn invoke(&mut self, exec: &ExecutionConfig) -> Outcome {
        self.inner.arm_deadline(exec);
        match self.entry.call_async(&mut self.inner.store, ()).await {
            Ok(()) => Outcome::Success,
            Err(trap) => Outcome::Fault {
                message: trap.to_string(),
            },
        }
    }

    /// Take the response the bound script produced.
    pub fn take_response(&mut self) -> ScriptResponse {
        self.inner.take_response()
    }
}

impl std::fmt::Debug for LoadedPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedPage").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::BytecodeCompiler;
    use dynpage_common::EngineConfig;

    fn test_engine() -> ScriptEngine {
        let config = EngineConfig {
            pooling_allocator: false,
            epoch_interruption: false,
            ..Default::default()
        };
        ScriptEngine::new(&config).unwrap()
    }

    async fn bootstrapped(engine: &ScriptEngine) -> PageInstance {
        PageInstance::bootstrap(engine, &ExecutionConfig::default())
            .await
            .unwrap()
    }

    // A page script using the main glue and the host functions directly
    const GREETING_WAT: &str = r#"
        (module
          (import "env" "begin_html" (func $begin_html))
          (import "page" "emit" (func $emit (param i32 i32)))
          (memory (export "memory") 1)
          (data (i32.const 0) "<h1>hello</h1>")
          (func (export "_start")
            (call $begin_html)
            (call $emit (i32.const 0) (i32.const 14))))
    "#;

    const TRAPPING_WAT: &str = r#"
        (module
          (func (export "_start")
            unreachable))
    "#;

    #[tokio::test]
    async fn test_run_produces_response() {
        let engine = test_engine();
        let compiler = BytecodeCompiler::new(engine.clone());
        let bytecode = compiler.compile(GREETING_WAT.as_bytes()).unwrap();

        let mut instance = bootstrapped(&engine).await;
        instance.bind(ScriptRequest::new("GET", "/greeting.wat"));

        let outcome = instance
            .run(&bytecode, &ExecutionConfig::default())
            .await
            .unwrap();
        assert!(outcome.is_success());

        let response = instance.take_response();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"<h1>hello</h1>");
        assert!(response
            .headers
            .iter()
            .any(|(n, v)| n == "content-type" && v == "text/html; charset=utf-8"));
    }

    #[tokio::test]
    async fn test_trap_is_a_fault_not_an_error() {
        let engine = test_engine();
        let compiler = BytecodeCompiler::new(engine.clone());
        let bytecode = compiler.compile(TRAPPING_WAT.as_bytes()).unwrap();

        let mut instance = bootstrapped(&engine).await;
        instance.bind(ScriptRequest::new("GET", "/boom.wat"));

        let outcome = instance
            .run(&bytecode, &ExecutionConfig::default())
            .await
            .unwrap();
        let Outcome::Fault { message } = outcome else {
            panic!("expected Fault");
        };
        assert!(message.contains("unreachable"));
    }

    #[tokio::test]
    async fn test_missing_entry_point_is_a_fault() {
        let engine = test_engine();
        let compiler = BytecodeCompiler::new(engine.clone());
        let bytecode = compiler.compile(b"(module)").unwrap();

        let mut instance = bootstrapped(&engine).await;
        instance.bind(ScriptRequest::new("GET", "/empty.wat"));

        let outcome = instance
            .run(&bytecode, &ExecutionConfig::default())
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Fault { .. }));
    }

    #[tokio::test]
    async fn test_loaded_page_reinvocation_sees_fresh_context() {
        // Echoes the request path into the body, so leakage across cycles
        // would be visible.
        const ECHO_PATH_WAT: &str = r#"
            (module
              (import "env" "begin_html" (func $begin_html))
              (import "page" "req_get" (func $req_get (param i32 i32 i32) (result i32)))
              (import "page" "emit" (func $emit (param i32 i32)))
              (memory (export "memory") 1)
              (func (export "_start")
                (call $begin_html)
                (call $emit
                  (i32.const 0)
                  (call $req_get (i32.const 1) (i32.const 0) (i32.const 1024)))))
        "#;

        let engine = test_engine();
        let compiler = BytecodeCompiler::new(engine.clone());
        let bytecode = compiler.compile(ECHO_PATH_WAT.as_bytes()).unwrap();
        let exec = ExecutionConfig::default();

        let instance = bootstrapped(&engine).await;
        let mut page = LoadedPage::load(instance, &bytecode).await.unwrap();

        let first_id = page.bind(ScriptRequest::new("GET", "/first"));
        assert!(page.invoke(&exec).await.is_success());
        assert_eq!(page.take_response().body, b"/first");

        let second_id = page.bind(ScriptRequest::new("GET", "/second"));
        assert_ne!(first_id, second_id);
        assert!(page.invoke(&exec).await.is_success());
        assert_eq!(page.take_response().body, b"/second");
    }
}
