use log::warn;
use serde_json::{Number, Value};

use super::{BinaryOp, Expr, Program};
use crate::expr::{EvalContext, stringify, truthy};

/// Interpret a compiled program. Undefined results (missing paths, unknown
/// functions, type mismatches) surface as null; nothing throws.
pub fn evaluate(program: &Program, ctx: &mut EvalContext<'_>) -> Value {
    eval(&program.expr, ctx).unwrap_or(Value::Null)
}

/// `None` is "undefined": distinct from a stored null so `$exists` and
/// `$count` can tell absence from emptiness.
fn eval(expr: &Expr, ctx: &mut EvalContext<'_>) -> Option<Value> {
    match expr {
        Expr::Null => Some(Value::Null),
        Expr::Bool(flag) => Some(Value::Bool(*flag)),
        Expr::Number(number) => Some(number_value(*number)),
        Expr::Text(text) => Some(Value::String(text.clone())),
        Expr::Path { from_root, segments } => ctx.read_segments(*from_root, segments),
        Expr::Call { name, args } => call(name, args, ctx),
        Expr::Negate(inner) => {
            let number = as_number(&eval(inner, ctx)?)?;
            Some(number_value(-number))
        }
        Expr::Binary { op, left, right } => binary(*op, left, right, ctx),
        Expr::Conditional { condition, then_branch, else_branch } => {
            let chosen = truthy(&eval(condition, ctx).unwrap_or(Value::Null));
            if chosen {
                eval(then_branch, ctx)
            } else {
                else_branch.as_ref().and_then(|branch| eval(branch, ctx))
            }
        }
    }
}

fn binary(op: BinaryOp, left: &Expr, right: &Expr, ctx: &mut EvalContext<'_>) -> Option<Value> {
    match op {
        BinaryOp::And => {
            let left = truthy(&eval(left, ctx).unwrap_or(Value::Null));
            let right = truthy(&eval(right, ctx).unwrap_or(Value::Null));
            Some(Value::Bool(left && right))
        }
        BinaryOp::Or => {
            let left = truthy(&eval(left, ctx).unwrap_or(Value::Null));
            let right = truthy(&eval(right, ctx).unwrap_or(Value::Null));
            Some(Value::Bool(left || right))
        }
        BinaryOp::Concat => {
            let left = eval(left, ctx).unwrap_or(Value::Null);
            let right = eval(right, ctx).unwrap_or(Value::Null);
            Some(Value::String(format!("{}{}", stringify(&left), stringify(&right))))
        }
        BinaryOp::Equal | BinaryOp::NotEqual => {
            let equal = match (eval(left, ctx), eval(right, ctx)) {
                (Some(left), Some(right)) => loose_eq(&left, &right),
                // An undefined operand never equals anything, including
                // another undefined operand.
                _ => false,
            };
            Some(Value::Bool(if op == BinaryOp::Equal { equal } else { !equal }))
        }
        BinaryOp::Less | BinaryOp::LessOrEqual | BinaryOp::Greater | BinaryOp::GreaterOrEqual => {
            let left = eval(left, ctx)?;
            let right = eval(right, ctx)?;
            let ordering = compare(&left, &right)?;
            let satisfied = match op {
                BinaryOp::Less => ordering.is_lt(),
                BinaryOp::LessOrEqual => ordering.is_le(),
                BinaryOp::Greater => ordering.is_gt(),
                BinaryOp::GreaterOrEqual => ordering.is_ge(),
                _ => unreachable!(),
            };
            Some(Value::Bool(satisfied))
        }
        BinaryOp::In => {
            let needle = eval(left, ctx)?;
            let haystack = eval(right, ctx)?;
            let found = match &haystack {
                Value::Array(items) => items.iter().any(|item| loose_eq(item, &needle)),
                // Singleton-sequence semantics.
                other => loose_eq(other, &needle),
            };
            Some(Value::Bool(found))
        }
        BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide
        | BinaryOp::Modulo => {
            let left = as_number(&eval(left, ctx)?)?;
            let right = as_number(&eval(right, ctx)?)?;
            let result = match op {
                BinaryOp::Add => left + right,
                BinaryOp::Subtract => left - right,
                BinaryOp::Multiply => left * right,
                BinaryOp::Divide => left / right,
                BinaryOp::Modulo => left % right,
                _ => unreachable!(),
            };
            result.is_finite().then(|| number_value(result))
        }
    }
}

fn call(name: &str, args: &[Expr], ctx: &mut EvalContext<'_>) -> Option<Value> {
    match (name, args) {
        ("exists", [argument]) => Some(Value::Bool(eval(argument, ctx).is_some())),
        ("count", [argument]) => {
            let count = match eval(argument, ctx) {
                None | Some(Value::Null) => 0,
                Some(Value::Array(items)) => items.len(),
                Some(_) => 1,
            };
            Some(Value::Number(Number::from(count)))
        }
        ("not", [argument]) => {
            let value = eval(argument, ctx).unwrap_or(Value::Null);
            Some(Value::Bool(!truthy(&value)))
        }
        ("string", [argument]) => {
            let value = eval(argument, ctx)?;
            Some(Value::String(stringify(&value)))
        }
        ("number", [argument]) => {
            let value = eval(argument, ctx)?;
            let number = match &value {
                Value::Number(_) => return Some(value),
                Value::String(text) => text.trim().parse::<f64>().ok()?,
                Value::Bool(flag) => {
                    if *flag {
                        1.0
                    } else {
                        0.0
                    }
                }
                _ => return None,
            };
            Some(number_value(number))
        }
        ("boolean", [argument]) => {
            let value = eval(argument, ctx).unwrap_or(Value::Null);
            Some(Value::Bool(truthy(&value)))
        }
        ("uppercase", [argument]) => {
            let value = eval(argument, ctx)?;
            Some(Value::String(stringify(&value).to_uppercase()))
        }
        ("lowercase", [argument]) => {
            let value = eval(argument, ctx)?;
            Some(Value::String(stringify(&value).to_lowercase()))
        }
        _ => {
            let key = format!("$fn:{name}/{}", args.len());
            if ctx.rt.report_once(ctx.scope, &key) {
                warn!("unknown query function '${name}' with {} argument(s)", args.len());
            }
            None
        }
    }
}

fn number_value(number: f64) -> Value {
    Number::from_f64(number).map(Value::Number).unwrap_or(Value::Null)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        _ => None,
    }
}

/// Equality with numeric normalization: integer and float encodings of the
/// same number compare equal.
fn loose_eq(left: &Value, right: &Value) -> bool {
    match (as_number(left), as_number(right)) {
        (Some(left), Some(right)) => left == right,
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    match (left, right) {
        (Value::String(left), Value::String(right)) => Some(left.cmp(right)),
        _ => {
            let left = as_number(left)?;
            let right = as_number(right)?;
            left.partial_cmp(&right)
        }
    }
}
