use serde_json::Value;

/// Kernel body expression.
///
/// Bodies are S-expression JSON: numbers are `i64` literals, strings are
/// identifiers, arrays are head-applied forms, and `{"lit": "..."}` carries a
/// string literal (assertion messages).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Int(i64),
    Ident(String),
    Str(String),
    List(Vec<Expr>),
}

impl Expr {
    pub fn node_count(&self) -> usize {
        match self {
            Expr::Int(_) | Expr::Ident(_) | Expr::Str(_) => 1,
            Expr::List(items) => 1 + items.iter().map(Expr::node_count).sum::<usize>(),
        }
    }

    pub fn as_ident(&self) -> Option<&str> {
        match self {
            Expr::Ident(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_str_lit(&self) -> Option<&str> {
        match self {
            Expr::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

pub fn expr_from_json(v: &Value) -> Result<Expr, String> {
    match v {
        Value::Number(n) => {
            let i = n
                .as_i64()
                .ok_or_else(|| format!("number is not an i64: {n}"))?;
            Ok(Expr::Int(i))
        }
        Value::String(s) => Ok(Expr::Ident(s.to_string())),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(expr_from_json(item)?);
            }
            Ok(Expr::List(out))
        }
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(s)) = map.get("lit") {
                    return Ok(Expr::Str(s.to_string()));
                }
            }
            Err(format!("unsupported JSON object in expr: {v:?}"))
        }
        _ => Err(format!("unsupported JSON value in expr: {v:?}")),
    }
}
