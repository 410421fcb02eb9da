//! Table operators: predicates whose extent is computed by an opaque
//! transform over declared input predicates rather than by rules.
//!
//! Each operator reads one or more input predicates' current rows and
//! refills its own output table from scratch every time it runs, the same
//! "clear then refill" contract [`crate::rule::CompiledRule`] uses for
//! intensional predicates. [`Program::tick`](crate::program::Program::tick)
//! invokes [`TableOperator::apply`] once per tick for every `Operator`-mode
//! predicate, in dependency order.

use std::collections::{HashMap, HashSet};

use rand::Rng;

use crate::error::Error;
use crate::predicate::PredicateRef;
use crate::value::Value;

/// The set of table-operator kinds a predicate's extent can be wired to.
pub enum TableOperator {
    CountsBy(CountsBy),
    Closure(Closure),
    EquivalenceClass(EquivalenceClass),
    AssignRandomly(AssignRandomly),
    AssignGreedily(AssignGreedily),
    MatchGreedily(MatchGreedily),
}

impl TableOperator {
    /// Recompute `output`'s extent from this operator's inputs. The caller
    /// is responsible for clearing `output`'s table first, mirroring how a
    /// `Rules` predicate is cleared before its rules run.
    pub fn apply(&self, output: &PredicateRef) -> Result<(), Error> {
        match self {
            TableOperator::CountsBy(op) => op.apply(output),
            TableOperator::Closure(op) => op.apply(output),
            TableOperator::EquivalenceClass(op) => op.apply(output),
            TableOperator::AssignRandomly(op) => op.apply(output),
            TableOperator::AssignGreedily(op) => op.apply(output),
            TableOperator::MatchGreedily(op) => op.apply(output),
        }
    }

    /// Names of the predicates this operator reads, for dependency
    /// tracking and stratification.
    pub fn input_names(&self) -> Vec<String> {
        match self {
            TableOperator::CountsBy(op) => vec![op.input.borrow().name.clone()],
            TableOperator::Closure(op) => vec![op.input.borrow().name.clone()],
            TableOperator::EquivalenceClass(op) => vec![op.input.borrow().name.clone()],
            TableOperator::AssignRandomly(op) => vec![op.candidates.borrow().name.clone()],
            TableOperator::AssignGreedily(op) => {
                let mut names = vec![op.candidates.borrow().name.clone()];
                if let Some(capacities) = &op.capacities {
                    names.push(capacities.borrow().name.clone());
                }
                names
            }
            TableOperator::MatchGreedily(op) => vec![op.candidates.borrow().name.clone()],
        }
    }
}

/// `(group, count)` pairs: the cardinality of `input` restricted to each
/// distinct value of `group_columns`.
pub struct CountsBy {
    pub input: PredicateRef,
    pub group_columns: Vec<usize>,
}

impl CountsBy {
    pub fn new(input: PredicateRef, group_columns: Vec<usize>) -> Self {
        CountsBy { input, group_columns }
    }

    fn apply(&self, output: &PredicateRef) -> Result<(), Error> {
        let mut counts: HashMap<Vec<Value>, i64> = HashMap::new();
        let mut order: Vec<Vec<Value>> = Vec::new();
        {
            let input = self.input.borrow();
            for (_, row) in input.rows() {
                let key = row.project(&self.group_columns);
                let entry = counts.entry(key.clone()).or_insert(0);
                if *entry == 0 {
                    order.push(key);
                }
                *entry += 1;
            }
        }
        let mut out = output.borrow_mut();
        for key in order {
            let count = counts[&key];
            let mut values = key;
            values.push(Value::Int(count));
            out.add_row(values)?;
        }
        Ok(())
    }
}

/// Transitive closure of a two-column relation. The reflexive variant adds
/// `(x, x)` for every `x` appearing in either column, whether or not it is
/// otherwise reachable from itself.
pub struct Closure {
    pub input: PredicateRef,
    pub reflexive: bool,
}

impl Closure {
    pub fn new(input: PredicateRef, reflexive: bool) -> Self {
        Closure { input, reflexive }
    }

    fn apply(&self, output: &PredicateRef) -> Result<(), Error> {
        let mut adjacency: HashMap<Value, Vec<Value>> = HashMap::new();
        let mut nodes: Vec<Value> = Vec::new();
        let mut seen: HashSet<Value> = HashSet::new();
        {
            let input = self.input.borrow();
            for (_, row) in input.rows() {
                let from = row.field(0).clone();
                let to = row.field(1).clone();
                for node in [&from, &to] {
                    if seen.insert(node.clone()) {
                        nodes.push(node.clone());
                    }
                }
                adjacency.entry(from).or_default().push(to);
            }
        }

        let mut out = output.borrow_mut();
        for start in &nodes {
            let mut visited: HashSet<Value> = HashSet::new();
            let mut stack = vec![start.clone()];
            while let Some(current) = stack.pop() {
                if let Some(successors) = adjacency.get(&current) {
                    for next in successors {
                        if visited.insert(next.clone()) {
                            out.add_row(vec![start.clone(), next.clone()])?;
                            stack.push(next.clone());
                        }
                    }
                }
            }
            if self.reflexive && !visited.contains(start) {
                out.add_row(vec![start.clone(), start.clone()])?;
            }
        }
        Ok(())
    }
}

/// Union-find over the edges of a two-column relation: `rep` is a
/// canonical representative per connected component.
pub struct EquivalenceClass {
    pub input: PredicateRef,
}

impl EquivalenceClass {
    pub fn new(input: PredicateRef) -> Self {
        EquivalenceClass { input }
    }

    fn apply(&self, output: &PredicateRef) -> Result<(), Error> {
        let mut parent: HashMap<Value, Value> = HashMap::new();
        let mut order: Vec<Value> = Vec::new();

        {
            let input = self.input.borrow();
            for (_, row) in input.rows() {
                let a = row.field(0).clone();
                let b = row.field(1).clone();
                ensure_member(&mut parent, &mut order, &a);
                ensure_member(&mut parent, &mut order, &b);
                union(&mut parent, &a, &b);
            }
        }

        let mut out = output.borrow_mut();
        for member in &order {
            let rep = find(&mut parent, member);
            out.add_row(vec![member.clone(), rep])?;
        }
        Ok(())
    }
}

fn ensure_member(parent: &mut HashMap<Value, Value>, order: &mut Vec<Value>, v: &Value) {
    if !parent.contains_key(v) {
        parent.insert(v.clone(), v.clone());
        order.push(v.clone());
    }
}

fn find(parent: &mut HashMap<Value, Value>, x: &Value) -> Value {
    let mut root = x.clone();
    while let Some(p) = parent.get(&root) {
        if p == &root {
            break;
        }
        root = p.clone();
    }
    let mut cur = x.clone();
    while let Some(p) = parent.get(&cur).cloned() {
        if p == cur {
            break;
        }
        parent.insert(cur.clone(), root.clone());
        cur = p;
    }
    root
}

/// Union two components, breaking ties in favor of the smaller value under
/// `Value`'s partial order so the representative is stable across runs;
/// incomparable values keep whichever root was discovered first.
fn union(parent: &mut HashMap<Value, Value>, a: &Value, b: &Value) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra == rb {
        return;
    }
    if matches!(rb.partial_cmp(&ra), Some(std::cmp::Ordering::Less)) {
        parent.insert(ra, rb);
    } else {
        parent.insert(rb, ra);
    }
}

/// For each unique first-column value in `candidates`, pick one row with
/// that value uniformly at random.
pub struct AssignRandomly {
    pub candidates: PredicateRef,
}

impl AssignRandomly {
    pub fn new(candidates: PredicateRef) -> Self {
        AssignRandomly { candidates }
    }

    fn apply(&self, output: &PredicateRef) -> Result<(), Error> {
        let mut groups: HashMap<Value, Vec<Vec<Value>>> = HashMap::new();
        let mut order: Vec<Value> = Vec::new();
        {
            let candidates = self.candidates.borrow();
            for (_, row) in candidates.rows() {
                let key = row.field(0).clone();
                if !groups.contains_key(&key) {
                    order.push(key.clone());
                }
                groups.entry(key).or_default().push(row.fields().to_vec());
            }
        }

        let mut rng = rand::thread_rng();
        let mut out = output.borrow_mut();
        for key in order {
            let rows = &groups[&key];
            let chosen = &rows[rng.gen_range(0..rows.len())];
            out.add_row(chosen.clone())?;
        }
        Ok(())
    }
}

/// Sort candidate rows `(from, to, utility, ..)` by `utility` (the last
/// column) descending, then walk the sorted list assigning each `from`
/// value to the highest-utility unused `to` value, respecting `capacity_of`.
fn greedy_assign(candidates: &PredicateRef, capacity_of: impl Fn(&Value) -> i64) -> Result<Vec<(Value, Value)>, Error> {
    let mut rows: Vec<(Value, Value, f64)> = Vec::new();
    {
        let candidates = candidates.borrow();
        if candidates.arity() < 3 {
            return Err(Error::invalid_program(
                "greedy assignment candidates need at least 3 columns: (from, to, utility)",
            ));
        }
        let utility_col = candidates.arity() - 1;
        for (_, row) in candidates.rows() {
            let utility = row
                .field(utility_col)
                .as_float()
                .ok_or_else(|| Error::instantiation("greedy assignment utility column must be numeric"))?;
            rows.push((row.field(0).clone(), row.field(1).clone(), utility));
        }
    }

    rows.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

    let mut remaining: HashMap<Value, i64> = HashMap::new();
    let mut assigned: HashSet<Value> = HashSet::new();
    let mut result = Vec::new();
    for (from, to, _) in rows {
        if assigned.contains(&from) {
            continue;
        }
        let cap = remaining.entry(to.clone()).or_insert_with(|| capacity_of(&to));
        if *cap <= 0 {
            continue;
        }
        *cap -= 1;
        assigned.insert(from.clone());
        result.push((from, to));
    }
    Ok(result)
}

/// Greedy assignment with optional per-`to`-value capacities. Without
/// `capacities`, every `to` value defaults to capacity 1 (equivalent to
/// [`MatchGreedily`]).
pub struct AssignGreedily {
    pub candidates: PredicateRef,
    pub capacities: Option<PredicateRef>,
}

impl AssignGreedily {
    pub fn new(candidates: PredicateRef, capacities: Option<PredicateRef>) -> Self {
        AssignGreedily { candidates, capacities }
    }

    fn apply(&self, output: &PredicateRef) -> Result<(), Error> {
        let capacity_map: HashMap<Value, i64> = match &self.capacities {
            Some(capacities) => capacities
                .borrow()
                .rows()
                .map(|(_, row)| (row.field(0).clone(), row.field(1).as_int().unwrap_or(1)))
                .collect(),
            None => HashMap::new(),
        };

        let assignments = greedy_assign(&self.candidates, |to| *capacity_map.get(to).unwrap_or(&1))?;
        let mut out = output.borrow_mut();
        for (from, to) in assignments {
            out.add_row(vec![from, to])?;
        }
        Ok(())
    }
}

/// Greedy bipartite matching: as [`AssignGreedily`], but the second column
/// is itself an assignee space, so every value is used at most once.
pub struct MatchGreedily {
    pub candidates: PredicateRef,
}

impl MatchGreedily {
    pub fn new(candidates: PredicateRef) -> Self {
        MatchGreedily { candidates }
    }

    fn apply(&self, output: &PredicateRef) -> Result<(), Error> {
        let assignments = greedy_assign(&self.candidates, |_| 1)?;
        let mut out = output.borrow_mut();
        for (from, to) in assignments {
            out.add_row(vec![from, to])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::{ColumnSpec, Predicate, UpdateMode};
    use crate::value::DataType;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn predicate(name: &str, columns: Vec<ColumnSpec>) -> PredicateRef {
        Rc::new(RefCell::new(Predicate::new(name, columns, false, UpdateMode::StaticBase)))
    }

    #[test]
    fn counts_by_groups_and_counts() {
        let input = predicate("seen", vec![ColumnSpec::new("team", DataType::String), ColumnSpec::new("id", DataType::Int)]);
        for (team, id) in [("red", 1), ("red", 2), ("blue", 3)] {
            input.borrow_mut().add_row(vec![Value::string(team), Value::Int(id)]).unwrap();
        }
        let output = predicate("team_counts", vec![ColumnSpec::new("team", DataType::String), ColumnSpec::new("n", DataType::Int)]);
        let op = CountsBy::new(input, vec![0]);
        op.apply(&output).unwrap();

        let rows: HashMap<String, i64> = output
            .borrow()
            .rows()
            .map(|(_, r)| (r.field(0).as_str().unwrap().to_string(), r.field(1).as_int().unwrap()))
            .collect();
        assert_eq!(rows["red"], 2);
        assert_eq!(rows["blue"], 1);
    }

    #[test]
    fn closure_reaches_transitively_but_not_reflexively() {
        let input = predicate("edge", vec![ColumnSpec::new("a", DataType::Int), ColumnSpec::new("b", DataType::Int)]);
        input.borrow_mut().add_row(vec![Value::Int(1), Value::Int(2)]).unwrap();
        input.borrow_mut().add_row(vec![Value::Int(2), Value::Int(3)]).unwrap();
        let output = predicate("reach", vec![ColumnSpec::new("a", DataType::Int), ColumnSpec::new("b", DataType::Int)]);
        let op = Closure::new(input, false);
        op.apply(&output).unwrap();

        let pairs: HashSet<(i64, i64)> = output
            .borrow()
            .rows()
            .map(|(_, r)| (r.field(0).as_int().unwrap(), r.field(1).as_int().unwrap()))
            .collect();
        assert!(pairs.contains(&(1, 2)));
        assert!(pairs.contains(&(1, 3)));
        assert!(pairs.contains(&(2, 3)));
        assert!(!pairs.contains(&(1, 1)));
    }

    #[test]
    fn closure_reflexive_adds_self_pairs() {
        let input = predicate("edge", vec![ColumnSpec::new("a", DataType::Int), ColumnSpec::new("b", DataType::Int)]);
        input.borrow_mut().add_row(vec![Value::Int(1), Value::Int(2)]).unwrap();
        let output = predicate("reach", vec![ColumnSpec::new("a", DataType::Int), ColumnSpec::new("b", DataType::Int)]);
        let op = Closure::new(input, true);
        op.apply(&output).unwrap();

        let pairs: HashSet<(i64, i64)> = output
            .borrow()
            .rows()
            .map(|(_, r)| (r.field(0).as_int().unwrap(), r.field(1).as_int().unwrap()))
            .collect();
        assert!(pairs.contains(&(1, 1)));
        assert!(pairs.contains(&(2, 2)));
    }

    #[test]
    fn equivalence_class_merges_connected_components() {
        let input = predicate("edge", vec![ColumnSpec::new("a", DataType::Int), ColumnSpec::new("b", DataType::Int)]);
        input.borrow_mut().add_row(vec![Value::Int(3), Value::Int(1)]).unwrap();
        input.borrow_mut().add_row(vec![Value::Int(1), Value::Int(2)]).unwrap();
        input.borrow_mut().add_row(vec![Value::Int(9), Value::Int(9)]).unwrap();
        let output = predicate("class", vec![ColumnSpec::new("x", DataType::Int), ColumnSpec::new("rep", DataType::Int)]);
        let op = EquivalenceClass::new(input);
        op.apply(&output).unwrap();

        let reps: HashMap<i64, i64> = output
            .borrow()
            .rows()
            .map(|(_, r)| (r.field(0).as_int().unwrap(), r.field(1).as_int().unwrap()))
            .collect();
        assert_eq!(reps[&1], reps[&2]);
        assert_eq!(reps[&2], reps[&3]);
        assert_eq!(reps[&1], 1);
        assert_eq!(reps[&9], 9);
    }

    #[test]
    fn assign_greedily_prefers_higher_utility_and_respects_capacity() {
        let candidates = predicate(
            "candidates",
            vec![
                ColumnSpec::new("worker", DataType::String),
                ColumnSpec::new("task", DataType::String),
                ColumnSpec::new("utility", DataType::Float),
            ],
        );
        for (worker, task, utility) in [("a", "x", 0.9), ("b", "x", 0.8), ("a", "y", 0.1), ("b", "y", 0.95)] {
            candidates
                .borrow_mut()
                .add_row(vec![Value::string(worker), Value::string(task), Value::Float(utility)])
                .unwrap();
        }
        let output = predicate(
            "assigned",
            vec![ColumnSpec::new("worker", DataType::String), ColumnSpec::new("task", DataType::String)],
        );
        let op = MatchGreedily::new(candidates);
        op.apply(&output).unwrap();

        let assignments: HashMap<String, String> = output
            .borrow()
            .rows()
            .map(|(_, r)| (r.field(0).as_str().unwrap().to_string(), r.field(1).as_str().unwrap().to_string()))
            .collect();
        assert_eq!(assignments["b"], "y");
        assert_eq!(assignments["a"], "x");
    }
}
