//! The `code` meta-tool: generate, validate, execute.

use mcpman_surface::{check_declarations, check_script, format_diagnostics};
use serde::Deserialize;
use serde_json::Value;

use super::eval::display_execution_error;
use super::HandlerResult;
use crate::codegen;
use crate::engine::Engine;
use crate::format::{combine_result_and_output, result_record};

const MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Deserialize)]
struct CodeParams {
    #[serde(rename = "functionDescription")]
    function_description: String,

    #[serde(default)]
    servers: Option<Vec<String>>,
}

pub async fn handle(engine: &Engine, args: Value) -> HandlerResult {
    let params: CodeParams = match serde_json::from_value(args) {
        Ok(params) => params,
        Err(e) => return HandlerResult::err(format!("Invalid arguments: {}", e)),
    };

    let full = engine.surface().await;
    let scoped = match &params.servers {
        Some(servers) => match full.filtered(servers) {
            Ok(scoped) => scoped,
            Err(e) => return HandlerResult::err(e.to_string()),
        },
        None => full.clone(),
    };

    let type_text = match engine
        .cache
        .type_definitions(&full, params.servers.as_deref())
    {
        Ok(text) => text,
        Err(e) => return HandlerResult::err(e.to_string()),
    };

    // The generated declarations must themselves parse. A failure here is a
    // bug in the type generator, so fail loudly instead of bothering the
    // model with it.
    if let Err(diagnostics) = check_declarations(&type_text) {
        return HandlerResult::err(format!(
            "INTERNAL ERROR: mcpman's generated type definitions failed to compile. \
             This is a bug in the type generator, not in your request.\n{}",
            format_diagnostics(&diagnostics)
        ));
    }

    let tool_summary = engine.cache.tool_descriptions(&scoped);

    let backend = codegen::backend(engine);
    tracing::info!("Generating code via {} backend", backend.name());

    let mut last_code = String::new();
    let mut last_errors = String::new();
    let mut accepted = None;

    for attempt in 1..=MAX_ATTEMPTS {
        let feedback = if attempt == 1 {
            None
        } else {
            Some(last_errors.as_str())
        };
        let prompt =
            codegen::build_prompt(&params.function_description, &type_text, &tool_summary, feedback);

        let raw = match backend.generate(&params.function_description, &prompt).await {
            Ok(raw) => raw,
            Err(e) => return HandlerResult::err(format!("Code generation failed: {}", e)),
        };
        let code = codegen::extract_code(&raw);

        let diagnostics = check_script(&code, &scoped);
        if diagnostics.is_empty() {
            accepted = Some(code);
            break;
        }

        tracing::warn!(
            "Generated code failed validation (attempt {}/{})",
            attempt,
            MAX_ATTEMPTS
        );
        last_errors = format_diagnostics(&diagnostics);
        last_code = code;
    }

    let Some(code) = accepted else {
        return HandlerResult::err(format!(
            "Code generation failed after {} attempts.\nLast attempt:\n{}\nErrors:\n{}",
            MAX_ATTEMPTS, last_code, last_errors
        ));
    };

    let globals = engine.globals(&full);
    match engine.runtime.eval(&code, None, globals).await {
        Ok(outcome) => {
            let stored = combine_result_and_output(outcome.result, &outcome.output);
            let index = engine.runtime.append_result(stored.clone()).await;
            HandlerResult::ok(format!(
                "// Generated code:\n{}\n\n// Execution result:\n{}",
                code,
                result_record(index, "code", &stored)
            ))
        }
        Err(error) => HandlerResult::err(format!(
            "// Generated code:\n{}\n\n// {}",
            code,
            display_execution_error(error)
        )),
    }
}
