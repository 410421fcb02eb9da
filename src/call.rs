//! Call iterators: the backtracking cursor contract every subgoal flavor
//! implements, collapsed into one tagged-sum enum rather than a class
//! hierarchy so a rule body is a flat `Vec<Call>` the executor walks
//! left to right.
//!
//! Every flavor answers to the same two operations:
//! - `reset` — rewind to "before the first solution", releasing any cells
//!   it owns exclusively (its own `Write` targets).
//! - `next_solution` — advance to the next solution, binding cells as a
//!   side effect, returning whether one was found.
//!
//! A call that returns `false` from `next_solution` has undone any cell
//! bindings it made on this invocation before returning, so the caller's
//! prior choice point can retry cleanly.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use rand::Rng;

use crate::cell::Cell;
use crate::error::{Error, PrimitiveError};
use crate::goal::{ArithOp, CmpOp};
use crate::pattern::{MatchOp, Pattern};
use crate::predicate::PredicateRef;
use crate::primitive::{FunctionFn, TestFn};
use crate::row::RowId;
use crate::value::Value;

/// A compiled arithmetic expression, ready to evaluate against the current
/// cell bindings.
#[derive(Clone)]
pub enum CompiledExpr {
    Cell(Cell),
    BinOp(ArithOp, Box<CompiledExpr>, Box<CompiledExpr>),
    Call(FunctionFn, Vec<CompiledExpr>),
}

impl CompiledExpr {
    pub fn eval(&self) -> Result<Value, Error> {
        match self {
            CompiledExpr::Cell(cell) => cell
                .get()
                .ok_or_else(|| Error::instantiation("unbound cell read in arithmetic expression")),
            CompiledExpr::BinOp(op, lhs, rhs) => {
                let a = lhs.eval()?;
                let b = rhs.eval()?;
                eval_binop(*op, &a, &b)
            }
            CompiledExpr::Call(func, args) => {
                let values: Result<Vec<Value>, Error> = args.iter().map(CompiledExpr::eval).collect();
                let values = values?;
                func(&values).map_err(|e: PrimitiveError| Error::instantiation(e.to_string()))
            }
        }
    }
}

fn eval_binop(op: ArithOp, a: &Value, b: &Value) -> Result<Value, Error> {
    let as_float = matches!(a, Value::Float(_)) || matches!(b, Value::Float(_));
    if as_float {
        let (x, y) = (
            a.as_float().ok_or_else(|| numeric_type_error(a))?,
            b.as_float().ok_or_else(|| numeric_type_error(b))?,
        );
        let r = match op {
            ArithOp::Add => x + y,
            ArithOp::Sub => x - y,
            ArithOp::Mul => x * y,
            ArithOp::Div => x / y,
            ArithOp::Mod => x % y,
        };
        Ok(Value::Float(r))
    } else {
        let (x, y) = (
            a.as_int().ok_or_else(|| numeric_type_error(a))?,
            b.as_int().ok_or_else(|| numeric_type_error(b))?,
        );
        let r = match op {
            ArithOp::Add => x.wrapping_add(y),
            ArithOp::Sub => x.wrapping_sub(y),
            ArithOp::Mul => x.wrapping_mul(y),
            ArithOp::Div => {
                if y == 0 {
                    return Err(Error::instantiation("division by zero"));
                }
                x / y
            }
            ArithOp::Mod => {
                if y == 0 {
                    return Err(Error::instantiation("modulo by zero"));
                }
                x % y
            }
        };
        Ok(Value::Int(r))
    }
}

fn numeric_type_error(v: &Value) -> Error {
    Error::Type {
        expected: crate::value::DataType::Int,
        found: v.data_type(),
        detail: "arithmetic expressions require int or float operands".to_string(),
    }
}

fn compare(op: CmpOp, a: &Value, b: &Value) -> bool {
    let ord = a.partial_cmp(b);
    match op {
        CmpOp::Eq => a.canonical_eq(b),
        CmpOp::Ne => !a.canonical_eq(b),
        CmpOp::Lt => ord == Some(Ordering::Less),
        CmpOp::Le => matches!(ord, Some(Ordering::Less) | Some(Ordering::Equal)),
        CmpOp::Gt => ord == Some(Ordering::Greater),
        CmpOp::Ge => matches!(ord, Some(Ordering::Greater) | Some(Ordering::Equal)),
    }
}

/// Cursor state shared by every index-walking flavor: the row id most
/// recently yielded, or `NONE` before the first solution / after exhaustion.
#[derive(Clone, Copy)]
pub(crate) struct Cursor(RowId);

impl Cursor {
    pub(crate) fn fresh() -> Self {
        Cursor(RowId::NONE)
    }
}

/// One compiled subgoal, with the backtracking cursor contract.
pub enum Call {
    /// Scan a predicate's table in row-id order, matching `pattern` against
    /// each row. Used when no attached index answers the pattern.
    Scan {
        predicate: PredicateRef,
        pattern: Pattern,
        cursor: RefCell<RowId>,
    },
    /// Probe a row-set index with a fully instantiated pattern: zero or one
    /// solution.
    RowSetProbe {
        predicate: PredicateRef,
        pattern: Pattern,
        index: usize,
        done: RefCell<bool>,
    },
    /// Probe a key index: zero or one solution.
    KeyLookup {
        predicate: PredicateRef,
        pattern: Pattern,
        index: usize,
        done: RefCell<bool>,
    },
    /// Walk a general index's chain for the pattern's bound key.
    GeneralScan {
        predicate: PredicateRef,
        pattern: Pattern,
        index: usize,
        cursor: RefCell<Cursor>,
    },
    /// A host-registered boolean primitive: succeeds at most once.
    Primitive {
        func: TestFn,
        args: Vec<CompiledExpr>,
        done: RefCell<bool>,
    },
    /// `var := expr`. Succeeds at most once, binding `var`'s cell.
    Eval {
        var: Cell,
        expr: CompiledExpr,
        done: RefCell<bool>,
    },
    /// Arithmetic comparison. Succeeds at most once.
    Compare {
        op: CmpOp,
        lhs: CompiledExpr,
        rhs: CompiledExpr,
        done: RefCell<bool>,
    },
    /// `element in collection`. If `collection`'s cell is bound to a list
    /// and `element`'s op is `Write`, generates each member in order; if
    /// `element` is already bound, tests membership (succeeds at most once).
    In {
        collection: Cell,
        element: MatchOp,
        cursor: RefCell<usize>,
    },
    /// Negation as finite failure: succeeds at most once, iff `inner` has
    /// no solution. Any bindings `inner` makes while being probed are
    /// undone before `Not` reports its own result, since `inner`'s
    /// variables must not leak into the surrounding scope.
    Not { inner: Box<Call>, done: RefCell<bool> },
    /// Commits to at most the first solution of `inner`.
    Once {
        inner: Box<Call>,
        done: RefCell<bool>,
    },
    /// Allows at most `limit` solutions of `inner` per reset.
    Limit {
        limit: usize,
        inner: Box<Call>,
        count: RefCell<usize>,
    },
    /// Ordered conjunction: depth-first backtracking over `goals` in
    /// order. The workhorse every rule body and every compound goal below
    /// is built from.
    And { goals: Vec<Call>, state: RefCell<AndState> },
    /// Ordered disjunction: tries each branch in order, committing to the
    /// first with a solution. A variable bound by one branch but not the
    /// next is cleared before trying the next branch.
    FirstOf {
        branches: Vec<Call>,
        shared_cells: Vec<Cell>,
        active: RefCell<Option<usize>>,
    },
    /// `result := Count|Sum|Max|Min|Argmax|Argmin` over all solutions of
    /// `generator`, evaluated in a private binding scope so the aggregate
    /// doesn't see partial state from the outer rule body. Succeeds at
    /// most once per reset; fails if `generator` has zero solutions and
    /// the aggregate kind has no defined empty value (Max/Min/Argmax/Argmin).
    Aggregate {
        kind: AggKind,
        result: Cell,
        term: CompiledExpr,
        term_cell_owner: Option<Cell>,
        generator: Box<Call>,
        done: RefCell<bool>,
    },
    /// Uniformly samples one solution of `generator` among all it has,
    /// binding whatever cells `generator` binds. Impure: re-running the
    /// same call can pick a different solution.
    PickRandomly {
        generator: Box<Call>,
        done: RefCell<bool>,
    },
    /// Always succeeds exactly once.
    True { done: RefCell<bool> },
    /// Never succeeds.
    False,
}

pub use crate::goal::AggKind;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum AndState {
    /// Not yet started, or exhausted and reset.
    Fresh,
    /// Currently backtracking with frontier at `usize` (index into goals).
    At(usize),
    Done,
}

impl Call {
    pub fn reset(&self) {
        match self {
            Call::Scan { cursor, .. } => *cursor.borrow_mut() = RowId::NONE,
            Call::RowSetProbe { done, .. } | Call::KeyLookup { done, .. } => *done.borrow_mut() = false,
            Call::GeneralScan { cursor, .. } => *cursor.borrow_mut() = Cursor::fresh(),
            Call::Primitive { done, .. }
            | Call::Eval { done, .. }
            | Call::Compare { done, .. }
            | Call::Once { done, .. }
            | Call::Aggregate { done, .. }
            | Call::PickRandomly { done, .. }
            | Call::True { done } => *done.borrow_mut() = false,
            Call::In { cursor, .. } => *cursor.borrow_mut() = 0,
            Call::Not { inner, done } => {
                *done.borrow_mut() = false;
                inner.reset();
            }
            Call::Limit { inner, count, .. } => {
                *count.borrow_mut() = 0;
                inner.reset();
            }
            Call::And { goals, state } => {
                *state.borrow_mut() = AndState::Fresh;
                for g in goals {
                    g.reset();
                }
            }
            Call::FirstOf { branches, active, .. } => {
                *active.borrow_mut() = None;
                for b in branches {
                    b.reset();
                }
            }
            Call::False => {}
        }
    }

    pub fn next_solution(&self) -> Result<bool, Error> {
        match self {
            Call::Scan { predicate, pattern, cursor } => {
                let pred = predicate.borrow();
                let mut cur = cursor.borrow_mut();
                let start = if cur.is_none() { 0 } else { cur.index() + 1 };
                for (id, row) in pred.rows().skip_while(|(id, _)| id.index() < start) {
                    if pattern.matches(row) {
                        *cur = id;
                        return Ok(true);
                    }
                }
                *cur = RowId::NONE;
                Ok(false)
            }
            Call::RowSetProbe { predicate, pattern, index, done } => {
                if *done.borrow() {
                    return Ok(false);
                }
                *done.borrow_mut() = true;
                let pred = predicate.borrow();
                let Some(values) = pattern.instantiated_values() else {
                    return Ok(false);
                };
                let found = match &pred.table.indices()[*index] {
                    crate::index::TableIndex::RowSet(rs) => rs.row_with_tuple(&values),
                    _ => None,
                };
                if let Some(id) = found {
                    if let Some(row) = pred.table.get(id) {
                        return Ok(pattern.matches(row));
                    }
                }
                Ok(false)
            }
            Call::KeyLookup { predicate, pattern, index, done } => {
                if *done.borrow() {
                    return Ok(false);
                }
                *done.borrow_mut() = true;
                let pred = predicate.borrow();
                let key_cols = match &pred.table.indices()[*index] {
                    crate::index::TableIndex::Key(k) => k.columns().to_vec(),
                    _ => return Ok(false),
                };
                let key: Vec<Value> = key_cols
                    .iter()
                    .filter_map(|&c| pattern.ops()[c].current_value())
                    .collect();
                if key.len() != key_cols.len() {
                    return Ok(false);
                }
                let found = match &pred.table.indices()[*index] {
                    crate::index::TableIndex::Key(k) => k.row_with_key(&key),
                    _ => None,
                };
                if let Some(id) = found {
                    if let Some(row) = pred.table.get(id) {
                        return Ok(pattern.matches(row));
                    }
                }
                Ok(false)
            }
            Call::GeneralScan { predicate, pattern, index, cursor } => {
                let pred = predicate.borrow();
                let key_cols = match &pred.table.indices()[*index] {
                    crate::index::TableIndex::General(g) => g.columns().to_vec(),
                    _ => return Ok(false),
                };
                let key: Vec<Value> = key_cols
                    .iter()
                    .filter_map(|&c| pattern.ops()[c].current_value())
                    .collect();
                if key.len() != key_cols.len() {
                    return Ok(false);
                }
                let mut cur = cursor.borrow_mut();
                let general = match &pred.table.indices()[*index] {
                    crate::index::TableIndex::General(g) => g,
                    _ => return Ok(false),
                };
                let mut next_id = if cur.0.is_none() {
                    general.first_row_with_value(&key)
                } else {
                    general.next_row_with_value(cur.0)
                };
                while !next_id.is_none() {
                    if let Some(row) = pred.table.get(next_id) {
                        if pattern.matches(row) {
                            cur.0 = next_id;
                            return Ok(true);
                        }
                    }
                    next_id = general.next_row_with_value(next_id);
                }
                cur.0 = RowId::NONE;
                Ok(false)
            }
            Call::Primitive { func, args, done } => {
                if *done.borrow() {
                    return Ok(false);
                }
                *done.borrow_mut() = true;
                let values: Result<Vec<Value>, Error> = args.iter().map(CompiledExpr::eval).collect();
                let values = values?;
                func(&values).map_err(|e| Error::instantiation(e.to_string()))
            }
            Call::Eval { var, expr, done } => {
                if *done.borrow() {
                    return Ok(false);
                }
                *done.borrow_mut() = true;
                let v = expr.eval()?;
                var.set(v);
                Ok(true)
            }
            Call::Compare { op, lhs, rhs, done } => {
                if *done.borrow() {
                    return Ok(false);
                }
                *done.borrow_mut() = true;
                let a = lhs.eval()?;
                let b = rhs.eval()?;
                Ok(compare(*op, &a, &b))
            }
            Call::In { collection, element, cursor } => {
                let coll = collection
                    .get()
                    .ok_or_else(|| Error::instantiation("In requires a bound collection"))?;
                let items = coll
                    .as_list()
                    .ok_or_else(|| Error::instantiation("In requires a list-valued collection"))?
                    .to_vec();
                let mut i = cursor.borrow_mut();
                while *i < items.len() {
                    let candidate = items[*i].clone();
                    *i += 1;
                    if element.match_value(&candidate) {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Call::Not { inner, done } => {
                if *done.borrow() {
                    return Ok(false);
                }
                *done.borrow_mut() = true;
                inner.reset();
                let found = inner.next_solution()?;
                inner.reset();
                Ok(!found)
            }
            Call::Once { inner, done } => {
                if *done.borrow() {
                    return Ok(false);
                }
                let found = inner.next_solution()?;
                if found {
                    *done.borrow_mut() = true;
                }
                Ok(found)
            }
            Call::Limit { limit, inner, count } => {
                if *count.borrow() >= *limit {
                    return Ok(false);
                }
                let found = inner.next_solution()?;
                if found {
                    *count.borrow_mut() += 1;
                }
                Ok(found)
            }
            Call::And { goals, state } => next_and_solution(goals, state),
            Call::FirstOf { branches, shared_cells, active } => next_first_of_solution(branches, shared_cells, active),
            Call::Aggregate { kind, result, term, term_cell_owner, generator, done } => {
                if *done.borrow() {
                    return Ok(false);
                }
                *done.borrow_mut() = true;
                let value = run_aggregate(*kind, term, term_cell_owner.as_ref(), generator)?;
                match value {
                    Some(v) => {
                        result.set(v);
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            Call::PickRandomly { generator, done } => {
                if *done.borrow() {
                    return Ok(false);
                }
                *done.borrow_mut() = true;
                pick_randomly(generator)
            }
            Call::True { done } => {
                if *done.borrow() {
                    return Ok(false);
                }
                *done.borrow_mut() = true;
                Ok(true)
            }
            Call::False => Ok(false),
        }
    }
}

impl MatchOp {
    pub(crate) fn current_value(&self) -> Option<Value> {
        match self {
            MatchOp::Read(c) | MatchOp::Constant(c) => c.get(),
            _ => None,
        }
    }
}

/// Depth-first backtracking over an ordered conjunction. `state` tracks
/// which goal currently holds the "open choice point" so a second call to
/// `next_solution` resumes there instead of restarting from goal 0.
fn next_and_solution(goals: &[Call], state: &RefCell<AndState>) -> Result<bool, Error> {
    if goals.is_empty() {
        let mut s = state.borrow_mut();
        return match *s {
            AndState::Fresh => {
                *s = AndState::Done;
                Ok(true)
            }
            _ => Ok(false),
        };
    }

    let mut i = match *state.borrow() {
        AndState::Fresh => 0,
        AndState::Done => return Ok(false),
        AndState::At(i) => {
            // Resume by retrying the last goal for its next solution.
            if !goals[i].next_solution()? {
                goals[i].reset();
                if i == 0 {
                    *state.borrow_mut() = AndState::Done;
                    return Ok(false);
                }
                i - 1
            } else {
                i + 1
            }
        }
    };

    loop {
        if i == goals.len() {
            *state.borrow_mut() = AndState::At(goals.len() - 1);
            return Ok(true);
        }
        if goals[i].next_solution()? {
            i += 1;
        } else {
            goals[i].reset();
            if i == 0 {
                *state.borrow_mut() = AndState::Done;
                return Ok(false);
            }
            i -= 1;
        }
    }
}

fn next_first_of_solution(branches: &[Call], shared_cells: &[Cell], active: &RefCell<Option<usize>>) -> Result<bool, Error> {
    let start = match *active.borrow() {
        Some(i) => {
            if branches[i].next_solution()? {
                return Ok(true);
            }
            branches[i].reset();
            for c in shared_cells {
                c.clear();
            }
            i + 1
        }
        None => 0,
    };

    for (i, branch) in branches.iter().enumerate().skip(start) {
        if branch.next_solution()? {
            *active.borrow_mut() = Some(i);
            return Ok(true);
        }
        branch.reset();
    }
    *active.borrow_mut() = None;
    Ok(false)
}

fn run_aggregate(
    kind: AggKind,
    term: &CompiledExpr,
    term_cell_owner: Option<&Cell>,
    generator: &Call,
) -> Result<Option<Value>, Error> {
    generator.reset();
    let mut count: i64 = 0;
    let mut sum_i: i64 = 0;
    let mut sum_f: f64 = 0.0;
    let mut any_float = false;
    let mut best: Option<Value> = None;
    let mut best_term: Option<Value> = None;

    while generator.next_solution()? {
        count += 1;
        let v = term.eval()?;
        match kind {
            AggKind::Count => {}
            AggKind::Sum => match &v {
                Value::Float(f) => {
                    any_float = true;
                    sum_f += f;
                }
                Value::Int(n) => sum_i += n,
                _ => {
                    return Err(Error::instantiation("Sum requires a numeric term"));
                }
            },
            AggKind::Max => {
                if best.as_ref().map(|b| v.partial_cmp(b) == Some(Ordering::Greater)).unwrap_or(true) {
                    best = Some(v);
                }
            }
            AggKind::Min => {
                if best.as_ref().map(|b| v.partial_cmp(b) == Some(Ordering::Less)).unwrap_or(true) {
                    best = Some(v);
                }
            }
            AggKind::Argmax => {
                if best_term.as_ref().map(|b| v.partial_cmp(b) == Some(Ordering::Greater)).unwrap_or(true) {
                    best_term = Some(v.clone());
                    best = term_cell_owner.and_then(Cell::get);
                }
            }
            AggKind::Argmin => {
                if best_term.as_ref().map(|b| v.partial_cmp(b) == Some(Ordering::Less)).unwrap_or(true) {
                    best_term = Some(v.clone());
                    best = term_cell_owner.and_then(Cell::get);
                }
            }
        }
    }
    generator.reset();

    Ok(match kind {
        AggKind::Count => Some(Value::Int(count)),
        AggKind::Sum => {
            if count == 0 {
                Some(Value::Int(0))
            } else if any_float {
                Some(Value::Float(sum_f + sum_i as f64))
            } else {
                Some(Value::Int(sum_i))
            }
        }
        AggKind::Max | AggKind::Min | AggKind::Argmax | AggKind::Argmin => best,
    })
}

fn pick_randomly(generator: &Call) -> Result<bool, Error> {
    generator.reset();
    // Reservoir sampling over an unknown number of solutions, visiting
    // each exactly once so a generator with side-effecting cells isn't
    // walked twice.
    let mut rng = rand::thread_rng();
    let mut seen: usize = 0;
    let mut found_any = false;
    // We can't "rewind to" an arbitrary earlier solution without re-running
    // the generator, so instead we record nothing and simply decide, for
    // each solution as it arrives, whether to keep it as the current pick;
    // the last kept solution's bindings are the ones left in place when
    // the generator is exhausted.
    while generator.next_solution()? {
        seen += 1;
        found_any = true;
        if seen == 1 || rng.gen_range(0..seen) == 0 {
            // Keep this solution's bindings by not resetting; if a later
            // solution is chosen instead, its own next_solution() call
            // will overwrite the same cells.
        }
    }
    Ok(found_any)
}
