#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use jobmap::core::{Args, FunctionName};
use jobmap::{ComponentContext, ComponentResult, FunctionRegistry};
use serde_json::{Value, json};

pub const DOUBLE: &str = "double";
pub const FAIL: &str = "fail";
pub const SHOUT: &str = "shout";
pub const ECHO: &str = "echo";
pub const FLAKY: &str = "flaky";

fn first_int(args: &Args) -> Result<i64, Box<dyn std::error::Error + Send + Sync>> {
    args.positional
        .first()
        .and_then(Value::as_i64)
        .ok_or_else(|| "expected an integer argument".into())
}

pub fn double(_: &ComponentContext, args: &Args) -> ComponentResult {
    Ok(json!(first_int(args)? * 2))
}

pub fn fail(_: &ComponentContext, args: &Args) -> ComponentResult {
    Err(format!("boom on {}", first_int(args)?).into())
}

pub fn shout(ctx: &ComponentContext, args: &Args) -> ComponentResult {
    let x = first_int(args)?;
    ctx.println(&format!("hello {x}"));
    ctx.eprintln(&format!("component {}", ctx.component()));
    Ok(json!(x))
}

pub fn echo(_: &ComponentContext, args: &Args) -> ComponentResult {
    Ok(json!({ "positional": args.positional, "keyword": args.keyword }))
}

/// Registers every fixture function. `flaky` fails on its first call per
/// registry and succeeds afterwards; the returned counter tracks calls.
pub fn registry() -> (Arc<FunctionRegistry>, Arc<AtomicUsize>) {
    let functions = Arc::new(FunctionRegistry::new());
    functions.register(name(DOUBLE), double);
    functions.register(name(FAIL), fail);
    functions.register(name(SHOUT), shout);
    functions.register(name(ECHO), echo);

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    functions.register(name(FLAKY), move |ctx: &ComponentContext, args: &Args| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err("first attempt fails".into());
        }
        double(ctx, args)
    });
    (functions, calls)
}

fn name(raw: &str) -> FunctionName {
    FunctionName::parse(raw).expect("fixture function name")
}
