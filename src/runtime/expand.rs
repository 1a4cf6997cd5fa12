// Variable expansion: {{name}} templates, then $name / $(expr) forms.

use super::eval::{ExprEvaluator, InferredScope};
use super::scope::{Scope, Vars};
use super::value::Value;
use crate::output::errors::TachyonError;

fn var_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Render a value into expanded text: integers decimal, strings verbatim,
/// futures resolved first.
async fn render(val: &Value) -> String {
    val.read().await.to_string()
}

async fn expand_templates(
    scope: &dyn Scope,
    args: &str,
) -> Result<String, TachyonError> {
    let mut rest = args;
    let mut buf = String::with_capacity(args.len());

    while let Some(idx) = rest.find("{{") {
        buf.push_str(&rest[..idx]);

        let inner = &rest[idx + 2..];
        let fin = inner.find("}}").ok_or(TachyonError::UnclosedTemplate)?;
        let name = inner[..fin].trim();

        match scope.get(name) {
            Some(val) => buf.push_str(&render(&val).await),
            None => return Err(TachyonError::UndefinedVariable(name.to_string())),
        }

        rest = &inner[fin + 2..];
    }

    buf.push_str(rest);
    Ok(buf)
}

/// Index of the closing paren balancing the one `buf` starts with.
fn find_expr_close(buf: &str) -> Option<usize> {
    let mut opens = 0usize;

    for (idx, c) in buf.char_indices() {
        match c {
            '(' => opens += 1,
            ')' => {
                opens -= 1;
                if opens == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }

    None
}

/// The two passes compose: templates run first, so a template may produce a
/// `$(...)` form that the second pass then evaluates. Applying the passes to
/// their own output changes nothing.
pub async fn expand_vars(
    scope: &dyn Scope,
    eval: &dyn ExprEvaluator,
    args: &str,
) -> Result<String, TachyonError> {
    let expanded = expand_templates(scope, args).await?;

    let mut rest = expanded.as_str();
    let mut buf = String::with_capacity(expanded.len());

    while let Some(idx) = rest.find('$') {
        buf.push_str(&rest[..idx]);
        let inner = &rest[idx + 1..];

        if inner.starts_with('(') {
            let fin = find_expr_close(inner).ok_or(TachyonError::UnclosedExpr)?;
            let sexp = &inner[..=fin];
            let val = eval.eval(sexp, &InferredScope::new(scope))?;
            buf.push_str(&val.to_string());
            rest = &inner[fin + 1..];
        } else {
            let fin = inner.find(|c: char| !var_char(c)).unwrap_or(inner.len());
            let name = &inner[..fin];

            match scope.get(name) {
                Some(val) => buf.push_str(&render(&val).await),
                None => return Err(TachyonError::UndefinedVariable(name.to_string())),
            }

            rest = &inner[fin..];
        }
    }

    buf.push_str(rest);
    Ok(buf)
}

/// Expand, shell-tokenize, then split each token on the first `=`. Bare
/// tokens become `key=true`; values are type-inferred.
pub async fn parse_simple_map(
    scope: &dyn Scope,
    eval: &dyn ExprEvaluator,
    args: &str,
) -> Result<Vars, TachyonError> {
    let expanded = expand_vars(scope, eval, args).await?;

    let parts = shlex::split(&expanded)
        .ok_or_else(|| TachyonError::Parse(format!("bad quoting in: {}", expanded)))?;

    let mut sm = Vars::new();
    for part in parts {
        match part.split_once('=') {
            Some((k, v)) => {
                sm.insert(k.to_string(), infer_string(v));
            }
            None => {
                sm.insert(part, Value::Bool(true));
            }
        }
    }

    Ok(sm)
}

/// Literal booleans and integers keep their types; everything else stays a
/// string. Integer parsing honors 0x/0o/0b prefixes.
pub fn infer_string(s: &str) -> Value {
    match s.to_lowercase().as_str() {
        "true" | "yes" => return Value::Bool(true),
        "false" | "no" => return Value::Bool(false),
        _ => {}
    }

    if let Some(i) = parse_int(s) {
        return Value::Int(i);
    }

    Value::Str(s.to_string())
}

fn parse_int(s: &str) -> Option<i64> {
    let (neg, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };

    let parsed = if let Some(hex) = body.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).ok()?
    } else if let Some(oct) = body.strip_prefix("0o") {
        i64::from_str_radix(oct, 8).ok()?
    } else if let Some(bin) = body.strip_prefix("0b") {
        i64::from_str_radix(bin, 2).ok()?
    } else {
        body.parse::<i64>().ok()?
    };

    Some(if neg { -parsed } else { parsed })
}

/// The falsy literals a `when:` expansion can produce.
pub fn boolify(s: &str) -> bool {
    !matches!(s, "" | "false" | "no")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::eval::SexprEvaluator;
    use crate::runtime::scope::NestedScope;

    async fn expand(scope: &NestedScope, s: &str) -> Result<String, TachyonError> {
        expand_vars(scope, &SexprEvaluator, s).await
    }

    #[tokio::test]
    async fn template_and_dollar_forms() {
        let s = NestedScope::root();
        s.set("port", Value::Int(5150));

        let out = expand(&s, "echo {{port}}-$port").await.unwrap();
        assert_eq!(out, "echo 5150-5150");
    }

    #[tokio::test]
    async fn templates_tolerate_whitespace() {
        let s = NestedScope::root();
        s.set("name", Value::Str("web".into()));
        assert_eq!(expand(&s, "{{  name  }}").await.unwrap(), "web");
    }

    #[tokio::test]
    async fn template_output_feeds_the_dollar_pass() {
        let s = NestedScope::root();
        s.set("calc", Value::Str("$(+ 1 2)".into()));

        let out = expand(&s, "got {{calc}}").await.unwrap();
        assert_eq!(out, "got 3");

        // the composed result is a fixed point
        assert_eq!(expand(&s, &out).await.unwrap(), out);
    }

    #[tokio::test]
    async fn sexpr_sees_integer_variables_as_numbers() {
        let s = NestedScope::root();
        s.set("port", Value::Int(80));
        assert_eq!(expand(&s, "$(+ port 8000)").await.unwrap(), "8080");
    }

    #[tokio::test]
    async fn error_kinds() {
        let s = NestedScope::root();
        assert!(matches!(
            expand(&s, "a {{b").await,
            Err(TachyonError::UnclosedTemplate)
        ));
        assert!(matches!(
            expand(&s, "a $(+ 1 2").await,
            Err(TachyonError::UnclosedExpr)
        ));
        assert!(matches!(
            expand(&s, "{{missing}}").await,
            Err(TachyonError::UndefinedVariable(name)) if name == "missing"
        ));
        assert!(matches!(
            expand(&s, "$missing").await,
            Err(TachyonError::UndefinedVariable(name)) if name == "missing"
        ));
    }

    #[tokio::test]
    async fn simple_map_inference() {
        let s = NestedScope::root();
        let sm = parse_simple_map(&s, &SexprEvaluator, "pkg=nginx count=3 force dry=no")
            .await
            .unwrap();

        assert_eq!(sm["pkg"], Value::Str("nginx".into()));
        assert_eq!(sm["count"], Value::Int(3));
        assert_eq!(sm["force"], Value::Bool(true));
        assert_eq!(sm["dry"], Value::Bool(false));
    }

    #[tokio::test]
    async fn simple_map_honors_quoting() {
        let s = NestedScope::root();
        let sm = parse_simple_map(&s, &SexprEvaluator, r#"msg="hello world""#)
            .await
            .unwrap();
        assert_eq!(sm["msg"], Value::Str("hello world".into()));
    }

    #[test]
    fn boolify_falsy_literals() {
        assert!(!boolify(""));
        assert!(!boolify("false"));
        assert!(!boolify("no"));
        assert!(boolify("yes"));
        assert!(boolify("0"));
    }

    #[test]
    fn infer_radix_prefixes() {
        assert_eq!(infer_string("0x10"), Value::Int(16));
        assert_eq!(infer_string("-12"), Value::Int(-12));
        assert_eq!(infer_string("12az"), Value::Str("12az".into()));
    }
}
