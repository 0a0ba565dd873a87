//! The `eval` meta-tool: type-check, execute, store, render.

use mcpman_surface::{check_script, format_diagnostics};
use mcpman_types::AppError;
use serde::Deserialize;
use serde_json::Value;

use super::HandlerResult;
use crate::engine::Engine;
use crate::format::{combine_result_and_output, result_record};

#[derive(Debug, Deserialize)]
struct EvalParams {
    code: String,

    #[serde(default)]
    arg: Option<Value>,
}

pub(crate) fn display_execution_error(error: AppError) -> String {
    match error {
        AppError::Script(message) => format!("Execution error: {}", message),
        other => format!("Execution error: {}", other),
    }
}

pub async fn handle(engine: &Engine, args: Value) -> HandlerResult {
    let params: EvalParams = match serde_json::from_value(args) {
        Ok(params) => params,
        Err(e) => return HandlerResult::err(format!("Invalid arguments: {}", e)),
    };

    let surface = engine.surface().await;

    // Static check against the current tool surface before anything runs.
    let diagnostics = check_script(&params.code, &surface);
    if !diagnostics.is_empty() {
        return HandlerResult::err(format_diagnostics(&diagnostics));
    }

    let globals = engine.globals(&surface);
    match engine.runtime.eval(&params.code, params.arg, globals).await {
        Ok(outcome) => {
            let stored = combine_result_and_output(outcome.result, &outcome.output);
            let index = engine.runtime.append_result(stored.clone()).await;
            HandlerResult::ok(result_record(index, "eval", &stored))
        }
        // Execution failures do not touch $results.
        Err(error) => HandlerResult::err(display_execution_error(error)),
    }
}
