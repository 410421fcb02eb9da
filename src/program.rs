//! The `Program`: the host-facing handle that owns every predicate, the
//! constant intern table, the primitive registry, and the tick loop.
//!
//! Declaration happens in two phases. While `declare_predicate`/`add_rule`
//! are being called the program is `Declaring`; `end_predicates` computes
//! strata from the dependency graph every compiled rule left behind and
//! flips the program to `Ready`, after which `tick` becomes callable and
//! further declaration is rejected.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use tracing::{debug, error, info, warn};

use crate::cell::{Cell, ConstantIntern};
use crate::compile;
use crate::config::Config;
use crate::error::Error;
use crate::goal::RuleDef;
use crate::operators::TableOperator;
use crate::predicate::{ColumnSpec, Predicate, PredicateRef, UpdateMode};
use crate::primitive::{FunctionFn, PrimitiveRegistry, TestFn};
use crate::rule::CompiledRule;
use crate::value::{DataType, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Declaring,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubRuleKind {
    Add,
    Set,
}

/// Name of the built-in predicate every program gets: `(kind, message, predicate, rule)`
/// rows logged whenever a rule's body or a table operator raises a
/// host-primitive error instead of aborting the tick.
pub const EXCEPTIONS_PREDICATE: &str = "Exceptions";

/// Name of the built-in `(predicate, message)` soft-diagnostics predicate.
/// Unlike `Exceptions`, the engine never writes to it itself: it is a
/// `DynamicBase` predicate a host populates by attaching its own rules to
/// `Problems.Add`, so a rule body can flag a condition worth surfacing
/// without aborting the tick the way a `RuleExecution` error would.
pub const PROBLEMS_PREDICATE: &str = "Problems";

pub struct Program {
    predicates: HashMap<String, PredicateRef>,
    order: Vec<String>,
    intern: RefCell<ConstantIntern>,
    primitives: PrimitiveRegistry,
    strata: Vec<Vec<String>>,
    tick: u64,
    state: Lifecycle,
    config: Config,
}

impl Program {
    pub fn new(config: Config) -> Self {
        let mut program = Program {
            predicates: HashMap::new(),
            order: Vec::new(),
            intern: RefCell::new(ConstantIntern::new()),
            primitives: PrimitiveRegistry::with_builtins(),
            strata: Vec::new(),
            tick: 0,
            state: Lifecycle::Declaring,
            config,
        };
        let exceptions_columns = vec![
            ColumnSpec::new("kind", DataType::String),
            ColumnSpec::new("message", DataType::String),
            ColumnSpec::new("predicate", DataType::String),
            ColumnSpec::new("rule", DataType::Int),
        ];
        program
            .declare_predicate(EXCEPTIONS_PREDICATE, exceptions_columns, false, UpdateMode::DynamicBase)
            .expect("built-in Exceptions predicate always declares cleanly");

        let problems_columns = vec![
            ColumnSpec::new("predicate", DataType::String),
            ColumnSpec::new("message", DataType::String),
        ];
        program
            .declare_predicate(PROBLEMS_PREDICATE, problems_columns, false, UpdateMode::DynamicBase)
            .expect("built-in Problems predicate always declares cleanly");
        program
    }

    /// Read-only snapshot of the built-in `Problems` predicate: `(predicate,
    /// message)` pairs a host's own rules have appended via `Problems.Add`.
    pub fn problems(&self) -> Vec<(String, String)> {
        self.predicates
            .get(PROBLEMS_PREDICATE)
            .map(|p| {
                p.borrow()
                    .rows()
                    .map(|(_, row)| {
                        (
                            row.field(0).as_str().unwrap_or_default().to_string(),
                            row.field(1).as_str().unwrap_or_default().to_string(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn primitives_mut(&mut self) -> &mut PrimitiveRegistry {
        &mut self.primitives
    }

    pub fn primitive_test(&self, name: &str) -> Option<TestFn> {
        self.primitives.test(name)
    }

    pub fn primitive_function(&self, name: &str) -> Option<FunctionFn> {
        self.primitives.function(name)
    }

    pub fn is_test_pure(&self, name: &str) -> Option<bool> {
        self.primitives.is_test_pure(name)
    }

    pub fn is_function_pure(&self, name: &str) -> Option<bool> {
        self.primitives.is_function_pure(name)
    }

    pub fn intern_constant(&self, value: Value) -> Cell {
        self.intern.borrow_mut().intern(value)
    }

    pub fn predicate(&self, name: &str) -> Option<PredicateRef> {
        self.predicates.get(name).cloned()
    }

    pub fn predicate_names(&self) -> &[String] {
        &self.order
    }

    /// Declare a new predicate. Only valid while the program is still
    /// accepting declarations (before `end_predicates`).
    pub fn declare_predicate(
        &mut self,
        name: impl Into<String>,
        columns: Vec<ColumnSpec>,
        unique: bool,
        mode: UpdateMode,
    ) -> Result<PredicateRef, Error> {
        if self.state != Lifecycle::Declaring {
            return Err(Error::invalid_program("predicates cannot be declared after end_predicates()"));
        }
        let name = name.into();
        if self.predicates.contains_key(&name) {
            return Err(Error::invalid_program(format!("predicate '{name}' is already declared")));
        }
        debug!(predicate = %name, arity = columns.len(), "declaring predicate");
        let predicate_ref: PredicateRef = Rc::new(RefCell::new(Predicate::with_capacity(
            name.clone(),
            columns,
            unique,
            mode,
            &self.config.tables,
        )));
        self.predicates.insert(name.clone(), predicate_ref.clone());
        self.order.push(name);
        Ok(predicate_ref)
    }

    /// Declare a predicate whose extent is computed by a [`TableOperator`]
    /// over already-declared input predicates, recording those inputs as
    /// dependencies for stratification.
    pub fn declare_operator(
        &mut self,
        name: impl Into<String>,
        columns: Vec<ColumnSpec>,
        operator: TableOperator,
    ) -> Result<PredicateRef, Error> {
        let inputs = operator.input_names();
        let predicate_ref = self.declare_predicate(name, columns, false, UpdateMode::Operator(operator))?;
        predicate_ref.borrow_mut().dependencies.extend(inputs);
        Ok(predicate_ref)
    }

    /// Compile and attach one rule to `predicate_name`'s derivation recipe.
    /// The predicate must have been declared with `UpdateMode::Rules`, unless
    /// `predicate_name` names a `.Add`/`.Set` sub-predicate of a
    /// `DynamicBase` predicate (see `add_sub_predicate_rule`).
    pub fn add_rule(&mut self, predicate_name: &str, def: RuleDef) -> Result<(), Error> {
        if self.state != Lifecycle::Declaring {
            return Err(Error::invalid_program("rules cannot be added after end_predicates()"));
        }
        if def.head.predicate != predicate_name {
            return Err(Error::invalid_program(format!(
                "rule head predicate '{}' does not match target predicate '{predicate_name}'",
                def.head.predicate
            )));
        }

        if let Some(base_name) = predicate_name.strip_suffix(".Add") {
            return self.add_sub_predicate_rule(base_name, predicate_name, def, SubRuleKind::Add);
        }
        if let Some(base_name) = predicate_name.strip_suffix(".Set") {
            return self.add_sub_predicate_rule(base_name, predicate_name, def, SubRuleKind::Set);
        }

        let target = self
            .predicate(predicate_name)
            .ok_or_else(|| Error::invalid_program(format!("unknown predicate '{predicate_name}'")))?;

        let rule_index = match &target.borrow().mode {
            UpdateMode::Rules(rules) => rules.len(),
            _ => {
                return Err(Error::invalid_program(format!(
                    "predicate '{predicate_name}' was not declared with UpdateMode::Rules"
                )));
            }
        };

        let (compiled, deps) = compile::compile_rule(self, rule_index, def)?;

        {
            let mut target_mut = target.borrow_mut();
            target_mut.dependencies.extend(deps.iter().cloned());
            match &mut target_mut.mode {
                UpdateMode::Rules(rules) => rules.push(compiled),
                _ => unreachable!("checked above"),
            }
        }
        Ok(())
    }

    /// Attach a rule to a `DynamicBase` predicate's `.Add`/`.Set`
    /// sub-predicate. `.Add` rules queue a whole new row per solution;
    /// `.Set` rules queue one column-update per solution for every column
    /// outside the target's key (see `CompiledRule::evaluate_into_set`).
    fn add_sub_predicate_rule(&mut self, base_name: &str, full_name: &str, def: RuleDef, kind: SubRuleKind) -> Result<(), Error> {
        let target = self
            .predicate(base_name)
            .ok_or_else(|| Error::invalid_program(format!("unknown predicate '{base_name}'")))?;

        if !matches!(target.borrow().mode, UpdateMode::DynamicBase) {
            return Err(Error::invalid_program(format!(
                "'{full_name}' sub-predicate rules can only target a predicate declared with UpdateMode::DynamicBase"
            )));
        }

        let rule_index = match kind {
            SubRuleKind::Add => target.borrow().add_rules.len(),
            SubRuleKind::Set => target.borrow().set_rules.len(),
        };

        let (compiled, deps) = compile::compile_rule(self, rule_index, def)?;

        let mut target_mut = target.borrow_mut();
        target_mut.dependencies.extend(deps.iter().cloned());
        match kind {
            SubRuleKind::Add => target_mut.add_rules.push(compiled),
            SubRuleKind::Set => target_mut.set_rules.push(compiled),
        }
        Ok(())
    }

    /// Close declaration: compute strata from the dependency graph every
    /// rule recorded, rejecting any cyclic dependency among rules
    /// (`InvalidProgram`), and transition to `Ready`.
    pub fn end_predicates(&mut self) -> Result<(), Error> {
        if self.state != Lifecycle::Declaring {
            return Err(Error::invalid_program("end_predicates() has already been called"));
        }

        let sccs = self.strongly_connected_components();

        // A size-1 component whose predicate depends on itself is a direct
        // self-loop, not a cycle through other predicates: this is ordinary
        // single-predicate recursion (e.g. transitive closure) and is
        // stratifiable on its own, so only components of size > 1 (a cycle
        // that actually passes through a distinct predicate) are rejected.
        for scc in &sccs {
            if scc.len() > 1 {
                return Err(Error::invalid_program(format!(
                    "predicates {scc:?} form a cyclic dependency; this program is not stratifiable"
                )));
            }
        }

        self.strata = self.topological_strata(&sccs);
        self.infer_dynamicity();
        for name in &self.order {
            if let Some(pred) = self.predicates.get(name) {
                pred.borrow_mut().snapshot_initial();
            }
        }
        self.state = Lifecycle::Ready;
        info!(strata = self.strata.len(), predicates = self.order.len(), "program ready");
        Ok(())
    }

    /// Return every predicate's table to the state it had right after
    /// `end_predicates()`: `StaticBase` tables are immutable and untouched;
    /// `DynamicBase` tables (including `Exceptions`/`Problems`) are
    /// restored to their build-time seed, discarding any `.Add`/`.Set`
    /// mutations accumulated since; `Rules`/`Operator` tables are cleared
    /// and marked stale so the next `tick()` recomputes them. The tick
    /// counter is reset to zero.
    pub fn reset(&mut self) -> Result<(), Error> {
        if self.state != Lifecycle::Ready {
            return Err(Error::invalid_program("reset() requires end_predicates() to have been called first"));
        }
        for name in &self.order {
            if let Some(pred) = self.predicates.get(name) {
                pred.borrow_mut().reset_to_initial()?;
            }
        }
        self.tick = 0;
        info!("program reset to post-build state");
        Ok(())
    }

    /// Tarjan's algorithm over the predicate dependency graph (edges:
    /// predicate -> predicate it directly calls).
    fn strongly_connected_components(&self) -> Vec<Vec<String>> {
        struct TarjanState {
            index_counter: usize,
            stack: Vec<String>,
            on_stack: HashSet<String>,
            indices: HashMap<String, usize>,
            lowlink: HashMap<String, usize>,
            result: Vec<Vec<String>>,
        }

        fn strongconnect(name: &str, program: &Program, st: &mut TarjanState) {
            st.indices.insert(name.to_string(), st.index_counter);
            st.lowlink.insert(name.to_string(), st.index_counter);
            st.index_counter += 1;
            st.stack.push(name.to_string());
            st.on_stack.insert(name.to_string());

            let deps: Vec<String> = program
                .predicates
                .get(name)
                .map(|p| p.borrow().dependencies.iter().cloned().collect())
                .unwrap_or_default();

            for dep in &deps {
                if !program.predicates.contains_key(dep) {
                    continue;
                }
                if !st.indices.contains_key(dep) {
                    strongconnect(dep, program, st);
                    let lowlink_dep = st.lowlink[dep];
                    let lowlink_name = st.lowlink[name];
                    st.lowlink.insert(name.to_string(), lowlink_name.min(lowlink_dep));
                } else if st.on_stack.contains(dep) {
                    let idx_dep = st.indices[dep];
                    let lowlink_name = st.lowlink[name];
                    st.lowlink.insert(name.to_string(), lowlink_name.min(idx_dep));
                }
            }

            if st.lowlink[name] == st.indices[name] {
                let mut component = Vec::new();
                loop {
                    let w = st.stack.pop().expect("component root must still be on stack");
                    st.on_stack.remove(&w);
                    let done = w == name;
                    component.push(w);
                    if done {
                        break;
                    }
                }
                st.result.push(component);
            }
        }

        let mut st = TarjanState {
            index_counter: 0,
            stack: Vec::new(),
            on_stack: HashSet::new(),
            indices: HashMap::new(),
            lowlink: HashMap::new(),
            result: Vec::new(),
        };

        for name in &self.order {
            if !st.indices.contains_key(name) {
                strongconnect(name, self, &mut st);
            }
        }
        st.result
    }

    /// Tarjan yields components in reverse topological order already (a
    /// component is emitted once everything it depends on has been); that
    /// is exactly the tick evaluation order strata need.
    fn topological_strata(&self, sccs: &[Vec<String>]) -> Vec<Vec<String>> {
        sccs.iter().cloned().collect()
    }

    /// A predicate is dynamic if it has `.Add`/`.Set` machinery
    /// (`DynamicBase`), is computed by an operator (always re-run), any of
    /// its own rules calls an impure primitive/function, or it transitively
    /// depends on a predicate already known dynamic. `self.strata` is in
    /// dependency order, so a single forward pass over it sees every
    /// predicate's dependencies before the predicate itself.
    fn infer_dynamicity(&mut self) {
        for stratum in &self.strata {
            for name in stratum {
                let dynamic = {
                    let pred = self.predicates[name].borrow();
                    match &pred.mode {
                        UpdateMode::DynamicBase | UpdateMode::Operator(_) => true,
                        UpdateMode::Rules(rules) => {
                            rules.iter().any(|r| r.calls_impure)
                                || pred.dependencies.iter().any(|dep| {
                                    self.predicates.get(dep).map(|p| p.borrow().dynamic).unwrap_or(false)
                                })
                        }
                        UpdateMode::StaticBase => false,
                    }
                };
                self.predicates[name].borrow_mut().dynamic = dynamic;
            }
        }
    }

    /// Run one tick: re-evaluate every `Rules`-mode predicate in
    /// stratum order (clearing its table first), apply queued `.Add`/`.Set`
    /// mutations on dynamic base predicates, and advance the tick counter.
    /// A rule whose body raises a host-primitive error is logged to the
    /// built-in `Exceptions` predicate and skipped; the tick continues.
    pub fn tick(&mut self) -> Result<(), Error> {
        if self.state != Lifecycle::Ready {
            return Err(Error::invalid_program("tick() requires end_predicates() to have been called first"));
        }

        for name in &self.order {
            if let Some(pred) = self.predicates.get(name) {
                pred.borrow_mut().mark_stale();
            }
        }

        for stratum in &self.strata {
            for name in stratum {
                let Some(predicate_ref) = self.predicates.get(name).cloned() else {
                    continue;
                };
                if predicate_ref.borrow().is_fresh() {
                    continue;
                }

                let op_ptr: Option<*const TableOperator> = match &predicate_ref.borrow().mode {
                    UpdateMode::Operator(op) => Some(op as *const TableOperator),
                    _ => None,
                };
                if let Some(op_ptr) = op_ptr {
                    predicate_ref.borrow_mut().table.clear();
                    // SAFETY: op_ptr points into predicate_ref's own `mode`
                    // field; apply() only ever touches predicate_ref's table
                    // through a fresh borrow_mut(), never the mode field, so
                    // this cannot alias an outstanding mutable borrow.
                    let op = unsafe { &*op_ptr };
                    match op.apply(&predicate_ref) {
                        Ok(()) => {
                            predicate_ref.borrow_mut().mark_fresh();
                            debug!(predicate = %name, "operator evaluated");
                        }
                        Err(err) => {
                            warn!(predicate = %name, error = %err, "operator execution failed");
                            self.log_exception("operator", name, 0, &err.to_string())?;
                        }
                    }
                    continue;
                }

                if matches!(predicate_ref.borrow().mode, UpdateMode::DynamicBase) {
                    let add_rules: Vec<*const CompiledRule> = predicate_ref.borrow().add_rules.iter().map(|r| r as *const _).collect();
                    for rule_ptr in add_rules {
                        // SAFETY: see the `Rules` branch below; same argument.
                        let rule = unsafe { &*rule_ptr };
                        match rule.evaluate_into_add(name, &predicate_ref) {
                            Ok(written) => debug!(predicate = %name, rule_index = rule.index, rows_queued = written, "add-rule evaluated"),
                            Err(err) => {
                                warn!(predicate = %name, rule_index = rule.index, error = %err, "add-rule execution failed");
                                self.log_exception("add_rule", name, rule.index, &err.to_string())?;
                            }
                        }
                    }
                    let set_rules: Vec<*const CompiledRule> = predicate_ref.borrow().set_rules.iter().map(|r| r as *const _).collect();
                    for rule_ptr in set_rules {
                        let rule = unsafe { &*rule_ptr };
                        match rule.evaluate_into_set(name, &predicate_ref) {
                            Ok(written) => debug!(predicate = %name, rule_index = rule.index, rows_queued = written, "set-rule evaluated"),
                            Err(err) => {
                                warn!(predicate = %name, rule_index = rule.index, error = %err, "set-rule execution failed");
                                self.log_exception("set_rule", name, rule.index, &err.to_string())?;
                            }
                        }
                    }
                    predicate_ref.borrow_mut().mark_fresh();
                    continue;
                }

                let rules: Vec<_> = match &predicate_ref.borrow().mode {
                    UpdateMode::Rules(rules) => rules.iter().map(|r| r as *const _).collect(),
                    _ => Vec::new(),
                };
                if rules.is_empty() {
                    predicate_ref.borrow_mut().mark_fresh();
                    continue;
                }
                predicate_ref.borrow_mut().table.clear();
                for rule_ptr in rules {
                    // SAFETY: rule_ptr was taken from predicate_ref's own
                    // rule list; evaluate() only reads the rule and writes
                    // into predicate_ref's table, never touching the rule
                    // list itself, so the borrow below cannot alias a
                    // mutable borrow of the rules vector.
                    let rule = unsafe { &*rule_ptr };
                    match rule.evaluate(name, &predicate_ref) {
                        Ok(written) => {
                            debug!(predicate = %name, rule_index = rule.index, rows_written = written, "rule evaluated");
                        }
                        Err(err) => {
                            warn!(predicate = %name, rule_index = rule.index, error = %err, "rule execution failed");
                            self.log_exception("rule", name, rule.index, &err.to_string())?;
                        }
                    }
                }
            }
        }

        for name in &self.order {
            if name == EXCEPTIONS_PREDICATE {
                continue;
            }
            if let Some(pred) = self.predicates.get(name) {
                pred.borrow_mut().apply_pending()?;
                let threshold = self.config.tables.auto_reclaim_threshold;
                if threshold > 0.0 {
                    let mut p = pred.borrow_mut();
                    p.table.reclaim(|_, _| false);
                }
            }
        }

        self.tick += 1;
        Ok(())
    }

    fn log_exception(&self, kind: &str, predicate: &str, rule_index: usize, message: &str) -> Result<(), Error> {
        error!(kind, predicate, rule_index, message, "logging exception");
        if let Some(exceptions) = self.predicates.get(EXCEPTIONS_PREDICATE) {
            exceptions.borrow_mut().add_row(vec![
                Value::string(kind),
                Value::string(message),
                Value::string(predicate),
                Value::Int(rule_index as i64),
            ])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goal::{BodyGoal, Goal, Term};

    fn test_program() -> Program {
        Program::new(Config::default())
    }

    #[test]
    fn declare_predicate_rejects_duplicate_names() {
        let mut program = test_program();
        program
            .declare_predicate("p", vec![ColumnSpec::new("a", DataType::Int)], false, UpdateMode::StaticBase)
            .unwrap();
        let err = program
            .declare_predicate("p", vec![ColumnSpec::new("a", DataType::Int)], false, UpdateMode::StaticBase)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidProgram(_)));
    }

    #[test]
    fn simple_rule_derives_across_a_tick() {
        let mut program = test_program();
        program
            .declare_predicate("source", vec![ColumnSpec::new("a", DataType::Int)], false, UpdateMode::StaticBase)
            .unwrap();
        program
            .declare_predicate("derived", vec![ColumnSpec::new("a", DataType::Int)], false, UpdateMode::Rules(vec![]))
            .unwrap();
        program.predicate("source").unwrap().borrow_mut().add_row(vec![Value::Int(1)]).unwrap();
        program.predicate("source").unwrap().borrow_mut().add_row(vec![Value::Int(2)]).unwrap();

        let rule = Goal::new("derived", vec![Term::var("x")]).if_(vec![BodyGoal::atom("source", vec![Term::var("x")])]);
        program.add_rule("derived", rule).unwrap();

        program.end_predicates().unwrap();
        program.tick().unwrap();

        let derived = program.predicate("derived").unwrap();
        assert_eq!(derived.borrow().table.len(), 2);
    }

    #[test]
    fn cyclic_dependency_is_rejected() {
        let mut program = test_program();
        program
            .declare_predicate("dom", vec![ColumnSpec::new("x", DataType::Int)], false, UpdateMode::StaticBase)
            .unwrap();
        program
            .declare_predicate("a", vec![ColumnSpec::new("x", DataType::Int)], false, UpdateMode::Rules(vec![]))
            .unwrap();
        program
            .declare_predicate("b", vec![ColumnSpec::new("x", DataType::Int)], false, UpdateMode::Rules(vec![]))
            .unwrap();

        let rule_a = Goal::new("a", vec![Term::var("x")]).if_(vec![
            BodyGoal::atom("dom", vec![Term::var("x")]),
            BodyGoal::not(BodyGoal::atom("b", vec![Term::var("x")])),
        ]);
        let rule_b = Goal::new("b", vec![Term::var("x")]).if_(vec![
            BodyGoal::atom("dom", vec![Term::var("x")]),
            BodyGoal::not(BodyGoal::atom("a", vec![Term::var("x")])),
        ]);
        program.add_rule("a", rule_a).unwrap();
        program.add_rule("b", rule_b).unwrap();

        let err = program.end_predicates().unwrap_err();
        assert!(matches!(err, Error::InvalidProgram(_)));
    }

    #[test]
    fn tick_requires_end_predicates_first() {
        let mut program = test_program();
        let err = program.tick().unwrap_err();
        assert!(matches!(err, Error::InvalidProgram(_)));
    }
}
