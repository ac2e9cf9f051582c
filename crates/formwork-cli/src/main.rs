use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use ariadne::{Color, Label, Report, ReportKind, Source};
use clap::{Parser as ClapParser, Subcommand};
use formwork::expr::query;
use formwork::{
    ControlContext, ControlDefinition, DataId, ExpressionPayload, FormEngine, FormId,
    SchemaDocument,
};
use serde_json::{Value, json};
use thiserror::Error;

#[derive(ClapParser)]
#[command(name = "formwork")]
#[command(about = "Form-state engine CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve and print every control state of a form against a document
    Inspect {
        /// Path to the schema JSON file
        schema: PathBuf,
        /// Path to the form-definition JSON file
        form: PathBuf,
        /// Path to the data JSON file
        data: PathBuf,
        /// Pretty-print the output
        #[arg(long)]
        pretty: bool,
    },
    /// Check every embedded expression of a form definition
    Check {
        /// Path to the form-definition JSON file
        form: PathBuf,
    },
    /// Evaluate one embedded expression against a data file
    Eval {
        /// The expression to evaluate
        expression: String,
        /// Path to the data JSON file
        #[arg(long)]
        data: Option<PathBuf>,
        /// Path to the schema JSON file
        #[arg(long)]
        schema: Option<PathBuf>,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Inspect { schema, form, data, pretty } => inspect(&schema, &form, &data, pretty),
        Commands::Check { form } => return check(&form),
        Commands::Eval { expression, data, schema } => eval(&expression, data, schema),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("Error: {error}");
            ExitCode::FAILURE
        }
    }
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let text = fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| CliError::Parse {
        path: path.display().to_string(),
        source,
    })
}

fn inspect(schema: &Path, form: &Path, data: &Path, pretty: bool) -> Result<(), CliError> {
    let schema_document: SchemaDocument = load_json(schema)?;
    let form_definition: ControlDefinition = load_json(form)?;
    let document: Value = load_json(data)?;

    let mut engine = FormEngine::new();
    let schema_root = engine.load_schema(schema_document);
    let data_root = engine.bind_data(schema_root, document);
    let form_root = engine.load_form(form_definition);

    let tree = render(&mut engine, Some(data_root), form_root, ControlContext::default());
    let output = if pretty {
        serde_json::to_string_pretty(&tree).unwrap_or_default()
    } else {
        tree.to_string()
    };
    println!("{output}");

    for diagnostic in engine.diagnostics().entries() {
        report_expression_error(&diagnostic.source, &diagnostic.message, diagnostic.span.clone());
    }
    Ok(())
}

/// Resolve one control and descend: child controls bind through their
/// `field` reference, collection fields expand per element.
fn render(
    engine: &mut FormEngine,
    data: Option<DataId>,
    form: FormId,
    ctx: ControlContext,
) -> Value {
    let control = engine.control_state(data, form, ctx);
    engine.run_until_settled();
    let state = engine.snapshot(control);

    let mut entry = serde_json::Map::new();
    if let Some(title) = state.title() {
        entry.insert("title".into(), json!(title));
    }
    if let Some(id) = &state.data_node {
        entry.insert("dataNode".into(), json!(id.as_ref()));
        entry.insert("value".into(), state.value.clone());
    }
    entry.insert("hidden".into(), json!(state.hidden));
    entry.insert("readonly".into(), json!(state.readonly));
    entry.insert("disabled".into(), json!(state.disabled));
    if let Some(style) = state.style_class() {
        entry.insert("styleClass".into(), json!(style));
    }
    if let Some(layout) = state.layout_class() {
        entry.insert("layoutClass".into(), json!(layout));
    }
    let options = state.allowed_options();
    if !options.is_empty() {
        entry.insert(
            "allowedOptions".into(),
            Value::Array(options.iter().map(|option| json!({ "name": option.name, "value": option.value })).collect()),
        );
    }

    let child_ctx = ControlContext::under(control);
    let children = engine.form_children(form);
    if !children.is_empty() {
        let rendered: Vec<Value> = children
            .into_iter()
            .map(|child_form| {
                let definition = engine.form_definition(child_form);
                let bound = match (&definition.field, data) {
                    (Some(reference), Some(parent)) => {
                        Some(engine.data_node_for(parent, reference))
                    }
                    _ => data,
                };
                match bound {
                    Some(node) if engine.decl_of(node).collection => {
                        let count = engine.element_count(node);
                        let elements: Vec<Value> = (0..count)
                            .map(|index| {
                                let element = engine.element_node(node, index);
                                render(engine, Some(element), child_form, child_ctx)
                            })
                            .collect();
                        json!({ "collection": true, "elements": elements })
                    }
                    bound => render(engine, bound, child_form, child_ctx),
                }
            })
            .collect();
        entry.insert("children".into(), Value::Array(rendered));
    }
    Value::Object(entry)
}

/// Compile every embedded expression in the definition tree and report the
/// failures with source labels.
fn check(form: &Path) -> ExitCode {
    let form_definition: ControlDefinition = match load_json(form) {
        Ok(definition) => definition,
        Err(error) => {
            eprintln!("Error: {error}");
            return ExitCode::FAILURE;
        }
    };

    let mut checked = 0usize;
    let mut failed = 0usize;
    let mut pending = vec![form_definition];
    while let Some(definition) = pending.pop() {
        for entry in &definition.dynamic {
            if let ExpressionPayload::Jsonata { expression } = &entry.expr {
                checked += 1;
                if let Err(errors) = query::compile(expression) {
                    failed += 1;
                    for error in errors {
                        report_expression_error(expression, &error.message, error.span);
                    }
                }
            }
        }
        pending.extend(definition.children);
    }

    eprintln!("{checked} expression(s) checked, {failed} failed");
    if failed > 0 { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

fn eval(
    expression: &str,
    data: Option<PathBuf>,
    schema: Option<PathBuf>,
) -> Result<(), CliError> {
    let document: Value = match &data {
        Some(path) => load_json(path)?,
        None => json!({}),
    };
    let schema_document: SchemaDocument = match &schema {
        Some(path) => load_json(path)?,
        None => SchemaDocument::default(),
    };

    let mut engine = FormEngine::new();
    let schema_root = engine.load_schema(schema_document);
    let data_root = engine.bind_data(schema_root, document);

    let payload = ExpressionPayload::Jsonata { expression: expression.to_string() };
    let result = engine.evaluate_expression(&payload, data_root);

    for diagnostic in engine.diagnostics().entries() {
        report_expression_error(&diagnostic.source, &diagnostic.message, diagnostic.span.clone());
    }
    println!("{result}");
    Ok(())
}

fn report_expression_error(source: &str, message: &str, span: std::ops::Range<usize>) {
    let span = if span.start <= span.end && span.end <= source.len() {
        span
    } else {
        0..source.len()
    };
    Report::build(ReportKind::Error, ("expression", span.clone()))
        .with_message(message)
        .with_label(
            Label::new(("expression", span))
                .with_message(message)
                .with_color(Color::Red),
        )
        .finish()
        .eprint(("expression", Source::from(source)))
        .ok();
}
