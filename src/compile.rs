//! Rule compilation: turns a [`crate::goal::RuleDef`] (the host-built AST)
//! into a [`crate::rule::CompiledRule`] (a head [`Pattern`] plus a body
//! [`Call`] tree), resolving variable names to shared [`Cell`]s, choosing
//! an index for each atom, hoisting functional sub-expressions into `Eval`
//! goals, and collecting the set of predicates the body calls and whether it
//! invokes any impure primitive/function along the way.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use crate::call::{AndState, Call};
use crate::cell::Cell;
use crate::error::Error;
use crate::goal::{AggKind, ArithExpr, BodyGoal, RuleDef, Term};
use crate::index::TableIndex;
use crate::pattern::{MatchOp, Pattern};
use crate::predicate::PredicateRef;
use crate::program::Program;
use crate::row::RowId;
use crate::rule::CompiledRule;

/// Variable name → the cell a rule binds it to. Cloned (not shared
/// mutably) whenever a sub-scope must see the outer bindings without being
/// able to leak its own back out (`Not`, `FirstOf` branches, aggregation
/// generators).
type Scope = HashMap<String, Cell>;

/// Compile one rule declaration against the predicates and primitives
/// already registered on `program`. Returns the compiled rule plus the set
/// of predicate names its body directly calls (for stratification).
pub fn compile_rule(program: &Program, index: usize, def: RuleDef) -> Result<(CompiledRule, HashSet<String>), Error> {
    let mut scope = Scope::new();
    let mut deps = HashSet::new();
    let mut impure = false;

    let body = compile_goal(&def.body, &mut scope, program, &mut deps, &mut impure)?;

    let mut head_ops = Vec::with_capacity(def.head.args.len());
    let mut pre_head = Vec::new();
    for arg in &def.head.args {
        match arg {
            Term::Var(name) => {
                let cell = scope.get(name).cloned().ok_or_else(|| {
                    Error::invalid_program(format!(
                        "head variable '{name}' of predicate '{}' is not bound by the rule body",
                        def.head.predicate
                    ))
                })?;
                head_ops.push(MatchOp::Read(cell));
            }
            Term::Const(v) => head_ops.push(MatchOp::Constant(program.intern_constant(v.clone()))),
            Term::Expr(e) => {
                let fresh = Cell::new_var();
                let expr = compile_expr(e, &mut scope, program)?;
                if expr_is_impure(e, program) {
                    impure = true;
                }
                pre_head.push(Call::Eval {
                    var: fresh.clone(),
                    expr,
                    done: RefCell::new(false),
                });
                head_ops.push(MatchOp::Read(fresh));
            }
        }
    }
    let head = Pattern::new(head_ops);

    let body = if pre_head.is_empty() {
        body
    } else {
        match body {
            Call::And { mut goals, .. } => {
                goals.extend(pre_head);
                Call::And { goals, state: RefCell::new(AndState::Fresh) }
            }
            other => {
                let mut goals = vec![other];
                goals.extend(pre_head);
                Call::And { goals, state: RefCell::new(AndState::Fresh) }
            }
        }
    };

    Ok((CompiledRule::new(index, head, body, impure), deps))
}

fn compile_goal(goal: &BodyGoal, scope: &mut Scope, program: &Program, deps: &mut HashSet<String>, impure: &mut bool) -> Result<Call, Error> {
    match goal {
        BodyGoal::Atom { predicate, args } => compile_atom(predicate, args, scope, program, deps, impure),
        BodyGoal::Compare(op, lhs, rhs) => {
            if expr_is_impure(lhs, program) || expr_is_impure(rhs, program) {
                *impure = true;
            }
            let lhs = compile_expr(lhs, scope, program)?;
            let rhs = compile_expr(rhs, scope, program)?;
            Ok(Call::Compare { op: *op, lhs, rhs, done: RefCell::new(false) })
        }
        BodyGoal::Eval { var, expr } => {
            if expr_is_impure(expr, program) {
                *impure = true;
            }
            let compiled = compile_expr(expr, scope, program)?;
            let cell = scope.entry(var.clone()).or_insert_with(Cell::new_var).clone();
            Ok(Call::Eval { var: cell, expr: compiled, done: RefCell::new(false) })
        }
        BodyGoal::Primitive { name, args } => {
            if program.is_test_pure(name) == Some(false) {
                *impure = true;
            }
            let func = program
                .primitive_test(name)
                .ok_or_else(|| Error::invalid_program(format!("no primitive test registered under '{name}'")))?;
            let compiled_args: Result<Vec<_>, Error> = args
                .iter()
                .map(|t| compile_expr(&ArithExpr::Term(t.clone()), scope, program))
                .collect();
            Ok(Call::Primitive { func, args: compiled_args?, done: RefCell::new(false) })
        }
        BodyGoal::In { element, collection } => {
            let mut pre_goals = Vec::new();
            let collection_cell = term_to_bound_cell(collection, scope, program, &mut pre_goals)?;
            let element_op = resolve_term(element, scope, program)?;
            let call = Call::In {
                collection: collection_cell,
                element: element_op,
                cursor: RefCell::new(0),
            };
            Ok(wrap_with_pre_goals(pre_goals, call))
        }
        BodyGoal::Not(inner) => {
            let mut child = scope.clone();
            let compiled = compile_goal(inner, &mut child, program, deps, impure)?;
            Ok(Call::Not { inner: Box::new(compiled), done: RefCell::new(false) })
        }
        BodyGoal::Once(inner) => {
            let compiled = compile_goal(inner, scope, program, deps, impure)?;
            Ok(Call::Once { inner: Box::new(compiled), done: RefCell::new(false) })
        }
        BodyGoal::Limit(n, inner) => {
            let compiled = compile_goal(inner, scope, program, deps, impure)?;
            Ok(Call::Limit { limit: *n, inner: Box::new(compiled), count: RefCell::new(0) })
        }
        BodyGoal::And(goals) => {
            let compiled: Result<Vec<_>, Error> = goals.iter().map(|g| compile_goal(g, scope, program, deps, impure)).collect();
            Ok(Call::And { goals: compiled?, state: RefCell::new(AndState::Fresh) })
        }
        BodyGoal::FirstOf(branches) => compile_first_of(branches, scope, program, deps, impure),
        BodyGoal::Aggregate { kind, result, term, generator } => {
            let mut child = scope.clone();
            let compiled_generator = compile_goal(generator, &mut child, program, deps, impure)?;
            let term_expr = compile_expr(&ArithExpr::Term(term.clone()), &mut child, program)?;
            // Argmax/Argmin report `result` as it stands in the generator's
            // own scope at the solution where `term` is extremal, rather
            // than `term`'s value itself; every other kind ignores this.
            let term_cell_owner = match (kind, result) {
                (AggKind::Argmax | AggKind::Argmin, Term::Var(name)) => child.get(name).cloned(),
                _ => None,
            };
            let result_cell = bind_fresh(result, scope)?;
            Ok(Call::Aggregate {
                kind: *kind,
                result: result_cell,
                term: term_expr,
                term_cell_owner,
                generator: Box::new(compiled_generator),
                done: RefCell::new(false),
            })
        }
        BodyGoal::PickRandomly { generator } => {
            *impure = true;
            let compiled = compile_goal(generator, scope, program, deps, impure)?;
            Ok(Call::PickRandomly { generator: Box::new(compiled), done: RefCell::new(false) })
        }
    }
}

fn wrap_with_pre_goals(mut pre_goals: Vec<Call>, call: Call) -> Call {
    if pre_goals.is_empty() {
        call
    } else {
        pre_goals.push(call);
        Call::And { goals: pre_goals, state: RefCell::new(AndState::Fresh) }
    }
}

fn compile_atom(
    predicate: &str,
    args: &[Term],
    scope: &mut Scope,
    program: &Program,
    deps: &mut HashSet<String>,
    impure: &mut bool,
) -> Result<Call, Error> {
    deps.insert(predicate.to_string());
    let predicate_ref = program
        .predicate(predicate)
        .ok_or_else(|| Error::invalid_program(format!("unknown predicate '{predicate}'")))?;

    let mut pre_goals = Vec::new();
    let hoisted = hoist_expr_args(args, scope, program, &mut pre_goals, impure)?;
    let ops: Result<Vec<MatchOp>, Error> = hoisted.iter().map(|t| resolve_term(t, scope, program)).collect();
    let pattern = Pattern::new(ops?);

    let call = build_index_call(predicate_ref, pattern);
    Ok(wrap_with_pre_goals(pre_goals, call))
}

/// Replace any `Term::Expr` argument with a fresh variable bound by a
/// synthesized `Eval` goal pushed onto `pre_goals`, so every atom's match
/// pattern only ever sees `Var`/`Const` positions.
fn hoist_expr_args(
    args: &[Term],
    scope: &mut Scope,
    program: &Program,
    pre_goals: &mut Vec<Call>,
    impure: &mut bool,
) -> Result<Vec<Term>, Error> {
    args.iter()
        .enumerate()
        .map(|(i, arg)| match arg {
            Term::Expr(e) => {
                let fresh = Cell::new_var();
                let compiled = compile_expr(e, scope, program)?;
                if expr_is_impure(e, program) {
                    *impure = true;
                }
                pre_goals.push(Call::Eval { var: fresh.clone(), expr: compiled, done: RefCell::new(false) });
                let name = format!("$hoisted{}_{}", pre_goals.len(), i);
                scope.insert(name.clone(), fresh);
                Ok(Term::Var(name))
            }
            other => Ok(other.clone()),
        })
        .collect()
}

/// Whether `expr` transitively calls a function registered as impure.
fn expr_is_impure(expr: &ArithExpr, program: &Program) -> bool {
    match expr {
        ArithExpr::Term(_) => false,
        ArithExpr::BinOp(_, a, b) => expr_is_impure(a, program) || expr_is_impure(b, program),
        ArithExpr::Call(name, args) => {
            program.is_function_pure(name) == Some(false) || args.iter().any(|a| expr_is_impure(a, program))
        }
    }
}

/// Resolve one atom/In-element argument position to a match directive:
/// first occurrence of a variable writes, a repeat reads, a literal is a
/// constant check.
fn resolve_term(term: &Term, scope: &mut Scope, program: &Program) -> Result<MatchOp, Error> {
    match term {
        Term::Var(name) => {
            if let Some(cell) = scope.get(name) {
                Ok(MatchOp::Read(cell.clone()))
            } else {
                let cell = Cell::new_var();
                scope.insert(name.clone(), cell.clone());
                Ok(MatchOp::Write(cell))
            }
        }
        Term::Const(v) => Ok(MatchOp::Constant(program.intern_constant(v.clone()))),
        Term::Expr(_) => Err(Error::invalid_program(
            "a functional expression cannot appear directly in a match position; it should have been hoisted",
        )),
    }
}

/// Resolve a term that must already denote a bound value (an `In`
/// collection, an aggregation's grouping key): existing variables read
/// their cell, constants are interned, and expressions are hoisted into an
/// `Eval` goal the caller prepends.
fn term_to_bound_cell(term: &Term, scope: &mut Scope, program: &Program, pre_goals: &mut Vec<Call>) -> Result<Cell, Error> {
    match term {
        Term::Var(name) => scope
            .get(name)
            .cloned()
            .ok_or_else(|| Error::instantiation(format!("'{name}' must be bound before it can be used here"))),
        Term::Const(v) => Ok(program.intern_constant(v.clone())),
        Term::Expr(e) => {
            let fresh = Cell::new_var();
            let compiled = compile_expr(e, scope, program)?;
            pre_goals.push(Call::Eval { var: fresh.clone(), expr: compiled, done: RefCell::new(false) });
            Ok(fresh)
        }
    }
}

/// Bind a fresh output cell for an aggregation result (or similar
/// write-only) position: must be a bare variable.
fn bind_fresh(term: &Term, scope: &mut Scope) -> Result<Cell, Error> {
    match term {
        Term::Var(name) => {
            let cell = Cell::new_var();
            scope.insert(name.clone(), cell.clone());
            Ok(cell)
        }
        _ => Err(Error::invalid_program("an aggregate result must bind a plain variable")),
    }
}

fn compile_expr(expr: &ArithExpr, scope: &mut Scope, program: &Program) -> Result<crate::call::CompiledExpr, Error> {
    use crate::call::CompiledExpr;
    match expr {
        ArithExpr::Term(Term::Var(name)) => scope
            .get(name)
            .cloned()
            .map(CompiledExpr::Cell)
            .ok_or_else(|| Error::instantiation(format!("'{name}' is used before it is bound"))),
        ArithExpr::Term(Term::Const(v)) => Ok(CompiledExpr::Cell(program.intern_constant(v.clone()))),
        ArithExpr::Term(Term::Expr(inner)) => compile_expr(inner, scope, program),
        ArithExpr::BinOp(op, lhs, rhs) => Ok(CompiledExpr::BinOp(
            *op,
            Box::new(compile_expr(lhs, scope, program)?),
            Box::new(compile_expr(rhs, scope, program)?),
        )),
        ArithExpr::Call(name, call_args) => {
            let func = program
                .primitive_function(name)
                .ok_or_else(|| Error::invalid_program(format!("no function registered under '{name}'")))?;
            let compiled: Result<Vec<_>, Error> = call_args.iter().map(|a| compile_expr(a, scope, program)).collect();
            Ok(CompiledExpr::Call(func, compiled?))
        }
    }
}

/// Choose the cheapest attached index that can answer `pattern`'s bound
/// columns, falling back to a full scan when none applies.
fn build_index_call(predicate_ref: PredicateRef, pattern: Pattern) -> Call {
    let chosen = {
        let pred = predicate_ref.borrow();
        let mut best: Option<usize> = None;
        let mut best_priority = i32::MIN;
        for (i, idx) in pred.table.indices().iter().enumerate() {
            if idx.can_match_on(&pattern) && idx.priority() > best_priority {
                best = Some(i);
                best_priority = idx.priority();
            }
        }
        best
    };

    match chosen {
        Some(i) => {
            let kind = {
                let pred = predicate_ref.borrow();
                match &pred.table.indices()[i] {
                    TableIndex::RowSet(_) => 0,
                    TableIndex::Key(_) => 1,
                    TableIndex::General(_) => 2,
                }
            };
            match kind {
                0 => Call::RowSetProbe { predicate: predicate_ref, pattern, index: i, done: RefCell::new(false) },
                1 => Call::KeyLookup { predicate: predicate_ref, pattern, index: i, done: RefCell::new(false) },
                _ => Call::GeneralScan {
                    predicate: predicate_ref,
                    pattern,
                    index: i,
                    cursor: RefCell::new(crate::call::Cursor::fresh()),
                },
            }
        }
        None => Call::Scan { predicate: predicate_ref, pattern, cursor: RefCell::new(RowId::NONE) },
    }
}

/// Compile an ordered disjunction. Every variable any branch introduces is
/// given the same backing cell across all branches (so whichever branch
/// succeeds binds the one cell downstream goals read); only variables
/// introduced by *every* branch are merged back into the outer scope as
/// reliably bound, matching the rule that a variable FirstOf exports must
/// be safe regardless of which branch actually ran.
fn compile_first_of(
    branches: &[BodyGoal],
    scope: &mut Scope,
    program: &Program,
    deps: &mut HashSet<String>,
    impure: &mut bool,
) -> Result<Call, Error> {
    let outer_vars: HashSet<String> = scope.keys().cloned().collect();
    let per_branch_vars: Vec<HashSet<String>> = branches
        .iter()
        .map(|b| {
            let mut vars = HashSet::new();
            goal_vars(b, &mut vars);
            vars.difference(&outer_vars).cloned().collect()
        })
        .collect();

    let mut all_new: HashSet<String> = HashSet::new();
    for vars in &per_branch_vars {
        all_new.extend(vars.iter().cloned());
    }

    let mut shared_scope = scope.clone();
    let mut shared_cells = Vec::new();
    for name in &all_new {
        let cell = Cell::new_var();
        shared_scope.insert(name.clone(), cell.clone());
        shared_cells.push(cell);
    }

    let compiled_branches: Result<Vec<Call>, Error> = branches
        .iter()
        .map(|b| {
            let mut branch_scope = shared_scope.clone();
            compile_goal(b, &mut branch_scope, program, deps, impure)
        })
        .collect();

    let intersection: HashSet<String> = if per_branch_vars.is_empty() {
        HashSet::new()
    } else {
        per_branch_vars
            .iter()
            .skip(1)
            .fold(per_branch_vars[0].clone(), |acc, next| acc.intersection(next).cloned().collect())
    };
    for name in &intersection {
        if let Some(cell) = shared_scope.get(name) {
            scope.insert(name.clone(), cell.clone());
        }
    }

    Ok(Call::FirstOf {
        branches: compiled_branches?,
        shared_cells,
        active: RefCell::new(None),
    })
}

fn goal_vars(goal: &BodyGoal, out: &mut HashSet<String>) {
    match goal {
        BodyGoal::Atom { args, .. } => args.iter().for_each(|t| term_vars(t, out)),
        BodyGoal::Compare(_, a, b) => {
            expr_vars(a, out);
            expr_vars(b, out);
        }
        BodyGoal::Eval { var, expr } => {
            out.insert(var.clone());
            expr_vars(expr, out);
        }
        BodyGoal::Primitive { args, .. } => args.iter().for_each(|t| term_vars(t, out)),
        BodyGoal::In { element, collection } => {
            term_vars(element, out);
            term_vars(collection, out);
        }
        BodyGoal::Not(inner) | BodyGoal::Once(inner) | BodyGoal::Limit(_, inner) => goal_vars(inner, out),
        BodyGoal::And(goals) | BodyGoal::FirstOf(goals) => goals.iter().for_each(|g| goal_vars(g, out)),
        BodyGoal::Aggregate { result, term, generator, .. } => {
            term_vars(result, out);
            term_vars(term, out);
            goal_vars(generator, out);
        }
        BodyGoal::PickRandomly { generator } => goal_vars(generator, out),
    }
}

fn term_vars(term: &Term, out: &mut HashSet<String>) {
    match term {
        Term::Var(name) => {
            out.insert(name.clone());
        }
        Term::Const(_) => {}
        Term::Expr(e) => expr_vars(e, out),
    }
}

fn expr_vars(expr: &ArithExpr, out: &mut HashSet<String>) {
    match expr {
        ArithExpr::Term(t) => term_vars(t, out),
        ArithExpr::BinOp(_, a, b) => {
            expr_vars(a, out);
            expr_vars(b, out);
        }
        ArithExpr::Call(_, args) => args.iter().for_each(|a| expr_vars(a, out)),
    }
}
