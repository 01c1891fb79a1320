//! Compiled handler code
//!
//! The front end lowers script source into this tree. Calls to user functions
//! and host capabilities only ever appear at statement level, so every call
//! site and every loop back-edge is a checkpoint the VM can stop at.

use super::values::Val;
use serde::{Deserialize, Serialize};

/// Statement node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Stmt {
    Block {
        body: Vec<Stmt>,
    },
    Let {
        name: String,
        init: Option<Expr>,
    },
    Assign {
        target: Target,
        expr: Expr,
    },
    If {
        test: Expr,
        then_s: Box<Stmt>,
        else_s: Option<Box<Stmt>>,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
    },
    /// Call a user-defined function of the same script
    Call {
        function: String,
        args: Vec<Expr>,
        dest: Option<Target>,
    },
    /// Call a host capability (built-in function)
    Invoke {
        name: String,
        args: Vec<Expr>,
        dest: Option<Target>,
    },
    Try {
        body: Box<Stmt>,
        catch_var: Option<String>,
        handler: Box<Stmt>,
    },
    Throw {
        value: Expr,
    },
    Return {
        value: Option<Expr>,
    },
    /// Switch the instance to another state once the handler unwinds
    State {
        name: String,
    },
    Break,
    Continue,
}

/// Assignment destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Target {
    Local { name: String },
    Global { slot: usize },
}

/// Expression node. Expressions are pure: they never call and never pause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Expr {
    Lit { v: Val },
    LitInt { v: i64 },
    LitFloat { v: f64 },
    LitStr { v: String },
    LitBool { v: bool },
    Ident { name: String },
    Global { slot: usize },
    /// Host-provided constant, resolved when the script is loaded
    Const { name: String },
    List { items: Vec<Expr> },
    Vector { x: Box<Expr>, y: Box<Expr>, z: Box<Expr> },
    Index { object: Box<Expr>, index: Box<Expr> },
    Len { value: Box<Expr> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinOp, left: Box<Expr>, right: Box<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl Stmt {
    /// Visit this statement and every nested statement
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Stmt)) {
        visit(self);
        match self {
            Stmt::Block { body } => body.iter().for_each(|s| s.walk(visit)),
            Stmt::If { then_s, else_s, .. } => {
                then_s.walk(visit);
                if let Some(e) = else_s {
                    e.walk(visit);
                }
            }
            Stmt::While { body, .. } => body.walk(visit),
            Stmt::Try { body, handler, .. } => {
                body.walk(visit);
                handler.walk(visit);
            }
            _ => {}
        }
    }

    /// Expressions evaluated directly by this statement (not nested statements)
    pub fn exprs(&self) -> Vec<&Expr> {
        match self {
            Stmt::Let { init, .. } => init.iter().collect(),
            Stmt::Assign { expr, .. } => vec![expr],
            Stmt::If { test, .. } | Stmt::While { test, .. } => vec![test],
            Stmt::Call { args, .. } | Stmt::Invoke { args, .. } => args.iter().collect(),
            Stmt::Throw { value } => vec![value],
            Stmt::Return { value } => value.iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Destination written by this statement, if any
    pub fn target(&self) -> Option<&Target> {
        match self {
            Stmt::Assign { target, .. } => Some(target),
            Stmt::Call { dest, .. } | Stmt::Invoke { dest, .. } => dest.as_ref(),
            _ => None,
        }
    }
}

impl Expr {
    /// Visit this expression and every sub-expression
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Expr)) {
        visit(self);
        match self {
            Expr::List { items } => items.iter().for_each(|e| e.walk(visit)),
            Expr::Vector { x, y, z } => {
                x.walk(visit);
                y.walk(visit);
                z.walk(visit);
            }
            Expr::Index { object, index } => {
                object.walk(visit);
                index.walk(visit);
            }
            Expr::Len { value } => value.walk(visit),
            Expr::Unary { operand, .. } => operand.walk(visit),
            Expr::Binary { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            _ => {}
        }
    }
}
