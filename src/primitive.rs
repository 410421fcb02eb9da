//! Host-supplied primitive functions and tests, registered on a
//! [`crate::program::Program`] rather than as process-wide singletons.

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::PrimitiveError;
use crate::value::Value;

/// A boolean test primitive: `name(args...)`. Called from `BodyGoal::Primitive`.
pub type TestFn = Rc<dyn Fn(&[Value]) -> Result<bool, PrimitiveError>>;

/// A value-producing function: used by `ArithExpr::Call` inside `Eval`.
pub type FunctionFn = Rc<dyn Fn(&[Value]) -> Result<Value, PrimitiveError>>;

#[derive(Clone)]
struct Test {
    func: TestFn,
    pure_: bool,
}

#[derive(Clone)]
struct Function {
    func: FunctionFn,
    pure_: bool,
}

/// Per-`Program` registry of named primitives, keyed by name. Untyped
/// `Value` slices rather than a generic dispatch layer, since arity and
/// argument types are checked by the host's own primitive body.
#[derive(Default, Clone)]
pub struct PrimitiveRegistry {
    tests: HashMap<String, Test>,
    functions: HashMap<String, Function>,
}

impl PrimitiveRegistry {
    pub fn new() -> Self {
        PrimitiveRegistry {
            tests: HashMap::new(),
            functions: HashMap::new(),
        }
    }

    /// Register a pure boolean test, eligible for constant folding when
    /// every argument is a compile-time constant.
    pub fn register_pure_test(
        &mut self,
        name: impl Into<String>,
        func: impl Fn(&[Value]) -> Result<bool, PrimitiveError> + 'static,
    ) {
        self.tests.insert(
            name.into(),
            Test {
                func: Rc::new(func),
                pure_: true,
            },
        );
    }

    /// Register an impure boolean test (e.g. one that consults external
    /// state) — never folded, and forces dynamicity on any predicate that
    /// calls it.
    pub fn register_impure_test(
        &mut self,
        name: impl Into<String>,
        func: impl Fn(&[Value]) -> Result<bool, PrimitiveError> + 'static,
    ) {
        self.tests.insert(
            name.into(),
            Test {
                func: Rc::new(func),
                pure_: false,
            },
        );
    }

    pub fn register_pure_function(
        &mut self,
        name: impl Into<String>,
        func: impl Fn(&[Value]) -> Result<Value, PrimitiveError> + 'static,
    ) {
        self.functions.insert(
            name.into(),
            Function {
                func: Rc::new(func),
                pure_: true,
            },
        );
    }

    pub fn register_impure_function(
        &mut self,
        name: impl Into<String>,
        func: impl Fn(&[Value]) -> Result<Value, PrimitiveError> + 'static,
    ) {
        self.functions.insert(
            name.into(),
            Function {
                func: Rc::new(func),
                pure_: false,
            },
        );
    }

    pub fn test(&self, name: &str) -> Option<TestFn> {
        self.tests.get(name).map(|t| t.func.clone())
    }

    pub fn is_test_pure(&self, name: &str) -> Option<bool> {
        self.tests.get(name).map(|t| t.pure_)
    }

    pub fn function(&self, name: &str) -> Option<FunctionFn> {
        self.functions.get(name).map(|f| f.func.clone())
    }

    pub fn is_function_pure(&self, name: &str) -> Option<bool> {
        self.functions.get(name).map(|f| f.pure_)
    }

    /// Install the small built-in library every program gets for free:
    /// arithmetic comparisons are handled directly by `Call::Compare`, but
    /// a few common pure helpers (`abs`, `min`, `max`) are registered here
    /// so rule bodies can call them by name.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register_pure_function("abs", |args| {
            let v = args.first().ok_or(PrimitiveError("abs requires 1 argument".into()))?;
            match v {
                Value::Int(i) => Ok(Value::Int(i.abs())),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                _ => Err(PrimitiveError("abs requires a numeric argument".into())),
            }
        });
        reg.register_pure_function("min", |args| {
            args.iter()
                .cloned()
                .reduce(|a, b| if a.partial_cmp(&b) == Some(std::cmp::Ordering::Greater) { b } else { a })
                .ok_or_else(|| PrimitiveError("min requires at least 1 argument".into()))
        });
        reg.register_pure_function("max", |args| {
            args.iter()
                .cloned()
                .reduce(|a, b| if a.partial_cmp(&b) == Some(std::cmp::Ordering::Less) { b } else { a })
                .ok_or_else(|| PrimitiveError("max requires at least 1 argument".into()))
        });
        reg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_abs_works() {
        let reg = PrimitiveRegistry::with_builtins();
        let f = reg.function("abs").unwrap();
        assert_eq!(f(&[Value::Int(-3)]).unwrap(), Value::Int(3));
    }

    #[test]
    fn custom_registration_tracks_purity() {
        let mut reg = PrimitiveRegistry::new();
        reg.register_impure_test("coin_flip", |_| Ok(true));
        assert_eq!(reg.is_test_pure("coin_flip"), Some(false));
    }
}
