//! Fixed bootstrap programs ("glue") for fresh instances.
//!
//! Every instance executes two fixed programs, in order, before it enters
//! the preload pool: the main glue (standard page environment) and the
//! route glue (dynamic route environment). Each has a `start` function, so
//! instantiation *is* execution, and each instance's exports are registered
//! into the linker under a fixed namespace (`env`, `route`) for page
//! scripts to import.
//!
//! A failure in either program is fatal for the whole process: a broken
//! bootstrap would invalidate every instance the producer creates.

use wasmtime::{Linker, Module, Store};

use crate::ScriptEngine;
use crate::context::PageContext;
use dynpage_common::PageError;

/// Main glue: the baseline page environment.
///
/// Exports `begin_html`, which marks the response as a successful HTML
/// page, the common first call of a dynamic page script.
pub const MAIN_GLUE: &str = r#"
(module
  (import "page" "log" (func $log (param i32 i32 i32)))
  (import "page" "status" (func $status (param i32)))
  (import "page" "header" (func $header (param i32 i32 i32 i32)))
  (memory (export "memory") 1)
  (data (i32.const 0) "content-type")
  (data (i32.const 32) "text/html; charset=utf-8")
  (data (i32.const 64) "main glue ready")
  (func $init
    (call $log (i32.const 0) (i32.const 64) (i32.const 15)))
  (start $init)
  (func (export "begin_html")
    (call $status (i32.const 200))
    (call $header (i32.const 0) (i32.const 12) (i32.const 32) (i32.const 24))))
"#;

/// Route glue: the environment for dynamic route scripts.
///
/// Exports `fail`, which flags the response as a server-side failure.
pub const ROUTE_GLUE: &str = r#"
(module
  (import "page" "log" (func $log (param i32 i32 i32)))
  (import "page" "status" (func $status (param i32)))
  (memory (export "memory") 1)
  (data (i32.const 0) "route glue ready")
  (func $init
    (call $log (i32.const 0) (i32.const 0) (i32.const 16)))
  (start $init)
  (func (export "fail")
    (call $status (i32.const 500))))
"#;

/// Execute both bootstrap programs against a fresh store, in order.
///
/// # Errors
///
/// Returns `BootstrapFailed` naming the failing program. Callers treat
/// this as fatal.
pub async fn bootstrap(
    engine: &ScriptEngine,
    linker: &mut Linker<PageContext>,
    store: &mut Store<PageContext>,
) -> Result<(), PageError> {
    instantiate_glue(engine, linker, store, "main", "env", MAIN_GLUE).await?;
    instantiate_glue(engine, linker, store, "route", "route", ROUTE_GLUE).await?;
    Ok(())
}

async fn instantiate_glue(
    engine: &ScriptEngine,
    linker: &mut Linker<PageContext>,
    store: &mut Store<PageContext>,
    program: &str,
    namespace: &str,
    source: &str,
) -> Result<(), PageError> {
    let module = Module::new(engine.inner(), source)
        .map_err(|e| PageError::bootstrap_failed(program, e.to_string()))?;

    let instance = linker
        .instantiate_async(&mut *store, &module)
        .await
        .map_err(|e| PageError::bootstrap_failed(program, e.to_string()))?;

    linker
        .instance(&mut *store, namespace, instance)
        .map_err(|e| PageError::bootstrap_failed(program, e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings;
    use crate::context::create_store;
    use dynpage_common::EngineConfig;

    #[tokio::test]
    async fn test_bootstrap_succeeds() {
        let config = EngineConfig {
            pooling_allocator: false,
            epoch_interruption: false,
            ..Default::default()
        };
        let engine = ScriptEngine::new(&config).unwrap();
        let mut store = create_store(&engine);
        let mut linker = Linker::new(engine.inner());
        bindings::register_all(&mut linker).unwrap();

        bootstrap(&engine, &mut linker, &mut store).await.unwrap();

        // Both glue programs logged through page.log at start
        assert_eq!(store.data().logs.len(), 2);
        assert_eq!(store.data().logs[0].message, "main glue ready");
        assert_eq!(store.data().logs[1].message, "route glue ready");
    }

    #[tokio::test]
    async fn test_broken_glue_is_bootstrap_failure() {
        let config = EngineConfig {
            pooling_allocator: false,
            epoch_interruption: false,
            ..Default::default()
        };
        let engine = ScriptEngine::new(&config).unwrap();
        let mut store = create_store(&engine);
        let mut linker = Linker::new(engine.inner());
        bindings::register_all(&mut linker).unwrap();

        let err = instantiate_glue(&engine, &mut linker, &mut store, "main", "env", "(module (func")
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
