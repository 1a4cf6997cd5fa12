// Variable runtime: values, scope chains, expansion and the expression seam.

pub mod eval;
pub mod expand;
pub mod scope;
pub mod value;

pub use eval::{EvalScope, ExprEvaluator, InferredScope, SexprEvaluator};
pub use expand::{boolify, expand_vars, infer_string, parse_simple_map};
pub use scope::{import_vars_file, splice_overrides, NestedScope, PriorityScope, Scope, Vars};
pub use value::Value;
