//! Expression evaluation
//!
//! Expressions are pure. They read locals, globals and imported constants and
//! never call or pause, so evaluation is a plain recursive function.

use super::context::ExecContext;
use super::env::Env;
use super::errors::{
    ErrorInfo, BAD_GLOBAL_SLOT, DIVISION_BY_ZERO, HEAP_EXCEEDED, INDEX_OUT_OF_BOUNDS,
    UNDEFINED_VARIABLE,
};
use super::types::{BinOp, Expr, UnaryOp, Val, Vector};
use crate::capabilities::Capability;
use crate::heap::value_size;

pub fn eval_expr(expr: &Expr, env: &Env, ctx: &ExecContext<'_>) -> Result<Val, ErrorInfo> {
    match expr {
        Expr::Lit { v } => Ok(v.clone()),
        Expr::LitInt { v } => Ok(Val::Int(*v)),
        Expr::LitFloat { v } => Ok(Val::Float(*v)),
        Expr::LitStr { v } => Ok(Val::Str(v.clone())),
        Expr::LitBool { v } => Ok(Val::Bool(*v)),

        Expr::Ident { name } => env.get(name).cloned().ok_or_else(|| {
            ErrorInfo::new(UNDEFINED_VARIABLE, format!("'{}' is not defined", name))
        }),

        Expr::Global { slot } => ctx.globals.get(*slot).cloned().ok_or_else(|| {
            ErrorInfo::new(BAD_GLOBAL_SLOT, format!("no global slot {}", slot))
        }),

        Expr::Const { name } => match ctx.script.capability(name) {
            Some(Capability::Constant(v)) => Ok(v.clone()),
            _ => Err(ErrorInfo::new(
                UNDEFINED_VARIABLE,
                format!("constant '{}' is not imported", name),
            )),
        },

        Expr::List { items } => {
            let items = items
                .iter()
                .map(|e| eval_expr(e, env, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            fits_heap(Val::List(items), ctx)
        }

        Expr::Vector { x, y, z } => {
            let component = |e: &Expr| -> Result<f64, ErrorInfo> {
                let v = eval_expr(e, env, ctx)?;
                v.as_float().ok_or_else(|| {
                    ErrorInfo::type_error(format!("vector component cannot be {}", v.type_name()))
                })
            };
            Ok(Val::Vector(Vector {
                x: component(&**x)?,
                y: component(&**y)?,
                z: component(&**z)?,
            }))
        }

        Expr::Index { object, index } => {
            let object = eval_expr(object, env, ctx)?;
            let index = eval_expr(index, env, ctx)?;
            eval_index(object, index)
        }

        Expr::Len { value } => match eval_expr(value, env, ctx)? {
            Val::Str(s) => Ok(Val::Int(s.chars().count() as i64)),
            Val::List(items) => Ok(Val::Int(items.len() as i64)),
            Val::Map(m) => Ok(Val::Int(m.len() as i64)),
            other => Err(ErrorInfo::type_error(format!(
                "{} has no length",
                other.type_name()
            ))),
        },

        Expr::Unary { op, operand } => {
            let v = eval_expr(operand, env, ctx)?;
            eval_unary(*op, v)
        }

        Expr::Binary { op, left, right } => {
            // Logical operators short-circuit
            match op {
                BinOp::And => {
                    let l = eval_expr(left, env, ctx)?;
                    if !l.is_truthy() {
                        return Ok(Val::Bool(false));
                    }
                    return Ok(Val::Bool(eval_expr(right, env, ctx)?.is_truthy()));
                }
                BinOp::Or => {
                    let l = eval_expr(left, env, ctx)?;
                    if l.is_truthy() {
                        return Ok(Val::Bool(true));
                    }
                    return Ok(Val::Bool(eval_expr(right, env, ctx)?.is_truthy()));
                }
                _ => {}
            }
            let l = eval_expr(left, env, ctx)?;
            let r = eval_expr(right, env, ctx)?;
            let result = eval_binary(*op, l, r)?;
            match result {
                Val::Str(_) | Val::List(_) => fits_heap(result, ctx),
                _ => Ok(result),
            }
        }
    }
}

/// Reject temporaries larger than the whole heap limit
///
/// Only an upper bound: a store may release the value it replaces, so the
/// real check happens when the value is committed to a slot.
fn fits_heap(val: Val, ctx: &ExecContext<'_>) -> Result<Val, ErrorInfo> {
    let size = value_size(&val);
    let limit = ctx.heap.limit();
    if size > limit {
        return Err(ErrorInfo::new(
            HEAP_EXCEEDED,
            format!(
                "temporary of {} bytes exceeds the heap limit of {} bytes",
                size, limit
            ),
        ));
    }
    Ok(val)
}

fn eval_index(object: Val, index: Val) -> Result<Val, ErrorInfo> {
    match (object, index) {
        (Val::List(items), Val::Int(i)) => {
            let idx = normalize_index(i, items.len())?;
            Ok(items[idx].clone())
        }
        (Val::Str(s), Val::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            let idx = normalize_index(i, chars.len())?;
            Ok(Val::Str(chars[idx].to_string()))
        }
        (Val::Map(m), Val::Str(key)) => Ok(m.get(&key).cloned().unwrap_or(Val::Null)),
        (o, i) => Err(ErrorInfo::type_error(format!(
            "cannot index {} with {}",
            o.type_name(),
            i.type_name()
        ))),
    }
}

/// Negative indices count from the end
fn normalize_index(i: i64, len: usize) -> Result<usize, ErrorInfo> {
    let resolved = if i < 0 { len as i64 + i } else { i };
    if resolved < 0 || resolved >= len as i64 {
        return Err(ErrorInfo::new(
            INDEX_OUT_OF_BOUNDS,
            format!("index {} out of bounds for length {}", i, len),
        ));
    }
    Ok(resolved as usize)
}

fn eval_unary(op: UnaryOp, v: Val) -> Result<Val, ErrorInfo> {
    match (op, v) {
        (UnaryOp::Not, v) => Ok(Val::Bool(!v.is_truthy())),
        (UnaryOp::Neg, Val::Int(i)) => Ok(Val::Int(i.wrapping_neg())),
        (UnaryOp::Neg, Val::Float(f)) => Ok(Val::Float(-f)),
        (UnaryOp::Neg, Val::Vector(v)) => Ok(Val::Vector(Vector {
            x: -v.x,
            y: -v.y,
            z: -v.z,
        })),
        (UnaryOp::Neg, v) => Err(ErrorInfo::type_error(format!(
            "cannot negate {}",
            v.type_name()
        ))),
    }
}

pub fn eval_binary(op: BinOp, l: Val, r: Val) -> Result<Val, ErrorInfo> {
    use BinOp::*;

    match op {
        Eq => return Ok(Val::Bool(values_equal(&l, &r))),
        Ne => return Ok(Val::Bool(!values_equal(&l, &r))),
        Lt | Le | Gt | Ge => return compare(op, &l, &r),
        And => return Ok(Val::Bool(l.is_truthy() && r.is_truthy())),
        Or => return Ok(Val::Bool(l.is_truthy() || r.is_truthy())),
        _ => {}
    }

    match (l, r) {
        (Val::Int(a), Val::Int(b)) => int_arith(op, a, b),
        (a @ (Val::Int(_) | Val::Float(_)), b @ (Val::Int(_) | Val::Float(_))) => {
            // Both arms are numeric, as_float cannot fail here
            float_arith(op, a.as_float().unwrap_or(0.0), b.as_float().unwrap_or(0.0))
        }
        (Val::Str(a), Val::Str(b)) if op == Add => Ok(Val::Str(a + &b)),
        (Val::List(mut a), Val::List(b)) if op == Add => {
            a.extend(b);
            Ok(Val::List(a))
        }
        (Val::List(mut a), b) if op == Add => {
            a.push(b);
            Ok(Val::List(a))
        }
        (a, Val::List(mut b)) if op == Add => {
            b.insert(0, a);
            Ok(Val::List(b))
        }
        (Val::Vector(a), Val::Vector(b)) => match op {
            Add => Ok(Val::Vector(Vector {
                x: a.x + b.x,
                y: a.y + b.y,
                z: a.z + b.z,
            })),
            Sub => Ok(Val::Vector(Vector {
                x: a.x - b.x,
                y: a.y - b.y,
                z: a.z - b.z,
            })),
            Mul => Ok(Val::Float(a.x * b.x + a.y * b.y + a.z * b.z)),
            _ => Err(ErrorInfo::type_error(format!("{:?} not defined on vectors", op))),
        },
        (Val::Vector(a), s @ (Val::Int(_) | Val::Float(_))) => {
            let s = s.as_float().unwrap_or(0.0);
            match op {
                Mul => Ok(Val::Vector(Vector {
                    x: a.x * s,
                    y: a.y * s,
                    z: a.z * s,
                })),
                Div if s == 0.0 => Err(ErrorInfo::new(DIVISION_BY_ZERO, "vector divided by zero")),
                Div => Ok(Val::Vector(Vector {
                    x: a.x / s,
                    y: a.y / s,
                    z: a.z / s,
                })),
                _ => Err(ErrorInfo::type_error(format!(
                    "{:?} not defined on vector and number",
                    op
                ))),
            }
        }
        (a, b) => Err(ErrorInfo::type_error(format!(
            "{:?} not defined on {} and {}",
            op,
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn int_arith(op: BinOp, a: i64, b: i64) -> Result<Val, ErrorInfo> {
    match op {
        BinOp::Add => Ok(Val::Int(a.wrapping_add(b))),
        BinOp::Sub => Ok(Val::Int(a.wrapping_sub(b))),
        BinOp::Mul => Ok(Val::Int(a.wrapping_mul(b))),
        BinOp::Div | BinOp::Mod if b == 0 => {
            Err(ErrorInfo::new(DIVISION_BY_ZERO, "integer division by zero"))
        }
        BinOp::Div => Ok(Val::Int(a.wrapping_div(b))),
        BinOp::Mod => Ok(Val::Int(a.wrapping_rem(b))),
        _ => Err(ErrorInfo::type_error(format!("{:?} not defined on int", op))),
    }
}

fn float_arith(op: BinOp, a: f64, b: f64) -> Result<Val, ErrorInfo> {
    match op {
        BinOp::Add => Ok(Val::Float(a + b)),
        BinOp::Sub => Ok(Val::Float(a - b)),
        BinOp::Mul => Ok(Val::Float(a * b)),
        BinOp::Div if b == 0.0 => Err(ErrorInfo::new(DIVISION_BY_ZERO, "division by zero")),
        BinOp::Div => Ok(Val::Float(a / b)),
        _ => Err(ErrorInfo::type_error(format!("{:?} not defined on float", op))),
    }
}

fn values_equal(l: &Val, r: &Val) -> bool {
    match (l, r) {
        (Val::Int(a), Val::Float(b)) | (Val::Float(b), Val::Int(a)) => (*a as f64) == *b,
        _ => l == r,
    }
}

fn compare(op: BinOp, l: &Val, r: &Val) -> Result<Val, ErrorInfo> {
    let ordering = match (l, r) {
        (Val::Int(a), Val::Int(b)) => a.partial_cmp(b),
        (Val::Str(a), Val::Str(b)) => a.partial_cmp(b),
        _ => match (l.as_float(), r.as_float()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => {
                return Err(ErrorInfo::type_error(format!(
                    "cannot compare {} with {}",
                    l.type_name(),
                    r.type_name()
                )))
            }
        },
    };
    let Some(ord) = ordering else {
        // NaN compares false both ways
        return Ok(Val::Bool(false));
    };
    let result = match op {
        BinOp::Lt => ord.is_lt(),
        BinOp::Le => ord.is_le(),
        BinOp::Gt => ord.is_gt(),
        BinOp::Ge => ord.is_ge(),
        _ => false,
    };
    Ok(Val::Bool(result))
}
