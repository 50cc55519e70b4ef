//! Tree-walking evaluator for parsed formulas.
//!
//! A [`Scope`] is the whole world a formula can see: the parent values, the
//! evaluation instant and a step budget. Names outside the built-in set
//! resolve to `UnknownIdentifier`.

use super::parser::{BinaryOp, Expr, LogicalOp, UnaryOp};
use crate::compute::ledger::{format_date, format_number, parse_date, ComputationError, Value};
use chrono::{DateTime, Datelike, TimeZone, Utc};

/// Intermediate result. Only `parentValues` is a list; everything else is scalar.
#[derive(Debug, Clone)]
pub enum Datum<'a> {
    Scalar(Value),
    List(&'a [Value]),
}

impl Datum<'_> {
    fn is_truthy(&self) -> bool {
        match self {
            Datum::Scalar(v) => v.is_truthy(),
            Datum::List(_) => true,
        }
    }
}

pub struct Scope<'a> {
    parent_values: &'a [Value],
    now: DateTime<Utc>,
    steps: usize,
    max_steps: usize,
}

impl<'a> Scope<'a> {
    pub fn new(parent_values: &'a [Value], now: DateTime<Utc>, max_steps: usize) -> Self {
        Self { parent_values, now, steps: 0, max_steps }
    }

    pub fn eval(&mut self, expr: &Expr) -> Result<Datum<'a>, ComputationError> {
        self.steps += 1;
        if self.steps > self.max_steps {
            return Err(ComputationError::StepLimitExceeded { limit: self.max_steps });
        }

        let value = match expr {
            Expr::Number(n) => Value::Number(*n),
            Expr::Str(s) => Value::Text(s.clone()),
            Expr::Bool(b) => Value::Boolean(*b),
            Expr::Null => Value::Empty,
            Expr::Ident(name) => return self.lookup(name),
            Expr::Unary { op, operand } => {
                let v = self.eval_scalar(operand)?;
                match op {
                    UnaryOp::Neg => Value::Number(-v.to_number()),
                    UnaryOp::Plus => Value::Number(v.to_number()),
                    UnaryOp::Not => Value::Boolean(!v.is_truthy()),
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let l = self.eval_scalar(lhs)?;
                let r = self.eval_scalar(rhs)?;
                binary(*op, &l, &r)?
            }
            Expr::Logical { op, lhs, rhs } => {
                let l = self.eval(lhs)?;
                let short_circuit = match op {
                    LogicalOp::And => !l.is_truthy(),
                    LogicalOp::Or => l.is_truthy(),
                };
                return if short_circuit { Ok(l) } else { self.eval(rhs) };
            }
            Expr::Conditional { cond, then, otherwise } => {
                return if self.eval(cond)?.is_truthy() { self.eval(then) } else { self.eval(otherwise) };
            }
            Expr::Member { target, name } => {
                if matches!(target.as_ref(), Expr::Ident(ns) if ns == "Math") {
                    math_constant(name)?
                } else {
                    let target = self.eval(target)?;
                    property(&target, name)?
                }
            }
            Expr::Index { target, index } => {
                let target = self.eval(target)?;
                let index = self.eval_scalar(index)?.to_number();
                element(&target, index)
            }
            Expr::Call { callee, args } => self.call(callee, args)?,
            Expr::New { callee, args } => match callee.as_ref() {
                Expr::Ident(name) if name == "Date" => {
                    let args = self.eval_args(args)?;
                    self.construct_date(&args)
                }
                Expr::Ident(name) => return Err(ComputationError::UnknownFunction(format!("new {}", name))),
                _ => return Err(ComputationError::TypeMismatch("'new' needs a constructor name".into())),
            },
        };
        Ok(Datum::Scalar(value))
    }

    fn eval_scalar(&mut self, expr: &Expr) -> Result<Value, ComputationError> {
        match self.eval(expr)? {
            Datum::Scalar(v) => Ok(v),
            Datum::List(_) => Err(ComputationError::TypeMismatch("a list cannot be used as a single value".into())),
        }
    }

    fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Value>, ComputationError> {
        args.iter().map(|a| self.eval_scalar(a)).collect()
    }

    fn lookup(&self, name: &str) -> Result<Datum<'a>, ComputationError> {
        match name {
            "parentValues" => Ok(Datum::List(self.parent_values)),
            "NaN" => Ok(Datum::Scalar(Value::Number(f64::NAN))),
            "Infinity" => Ok(Datum::Scalar(Value::Number(f64::INFINITY))),
            _ => Err(ComputationError::UnknownIdentifier(name.to_string())),
        }
    }

    fn call(&mut self, callee: &Expr, args: &[Expr]) -> Result<Value, ComputationError> {
        match callee {
            Expr::Ident(name) => {
                let args = self.eval_args(args)?;
                self.call_global(name, &args)
            }
            Expr::Member { target, name } => {
                if matches!(target.as_ref(), Expr::Ident(ns) if ns == "Math") {
                    let args = self.eval_args(args)?;
                    return call_math(name, &args);
                }
                let receiver = self.eval(target)?;
                let args = self.eval_args(args)?;
                call_method(&receiver, name, &args)
            }
            _ => Err(ComputationError::TypeMismatch("expression is not callable".into())),
        }
    }

    fn call_global(&self, name: &str, args: &[Value]) -> Result<Value, ComputationError> {
        let first = args.first();
        Ok(match name {
            "Number" => Value::Number(first.map_or(0.0, Value::to_number)),
            "String" => Value::Text(first.map(Value::to_display_string).unwrap_or_default()),
            "parseInt" => {
                let radix = args.get(1).map(Value::to_number);
                Value::Number(parse_int_prefix(&first.map(Value::to_display_string).unwrap_or_default(), radix))
            }
            "parseFloat" => Value::Number(parse_float_prefix(&first.map(Value::to_display_string).unwrap_or_default())),
            "isNaN" => Value::Boolean(first.map_or(f64::NAN, Value::to_number).is_nan()),
            "Date" => self.construct_date(args),
            _ => return Err(ComputationError::UnknownFunction(name.to_string())),
        })
    }

    /// `new Date(...)`. An unparseable input yields NaN, the invalid-date value.
    fn construct_date(&self, args: &[Value]) -> Value {
        let date = match args {
            [] => Some(self.now),
            [Value::Empty] => Utc.timestamp_millis_opt(0).single(),
            [Value::Text(s)] => parse_date(s),
            [single] => single.as_date(),
            [year, month, rest @ ..] => {
                let part = |i: usize, default: f64| rest.get(i).map_or(default, Value::to_number);
                date_from_parts(year.to_number(), month.to_number(), part(0, 1.0), part(1, 0.0), part(2, 0.0), part(3, 0.0))
            }
        };
        date.map_or(Value::Number(f64::NAN), Value::Date)
    }
}

fn date_from_parts(year: f64, month: f64, day: f64, hour: f64, minute: f64, second: f64) -> Option<DateTime<Utc>> {
    let parts = [year, month, day, hour, minute, second];
    if parts.iter().any(|p| !p.is_finite()) {
        return None;
    }
    Utc.with_ymd_and_hms(
        year as i32,
        u32::try_from((month as i64).checked_add(1)?).ok()?,
        u32::try_from(day as i64).ok()?,
        u32::try_from(hour as i64).ok()?,
        u32::try_from(minute as i64).ok()?,
        u32::try_from(second as i64).ok()?,
    )
    .single()
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, ComputationError> {
    Ok(match op {
        BinaryOp::Add => {
            let textual = |v: &Value| matches!(v, Value::Text(_) | Value::Date(_));
            if textual(l) || textual(r) {
                Value::Text(l.to_display_string() + &r.to_display_string())
            } else {
                Value::Number(l.to_number() + r.to_number())
            }
        }
        BinaryOp::Sub => Value::Number(l.to_number() - r.to_number()),
        BinaryOp::Mul => Value::Number(l.to_number() * r.to_number()),
        BinaryOp::Div | BinaryOp::Rem => {
            let divisor = r.to_number();
            if divisor == 0.0 {
                return Err(ComputationError::DivisionByZero);
            }
            let n = l.to_number();
            Value::Number(if op == BinaryOp::Div { n / divisor } else { n % divisor })
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => Value::Boolean(compare(op, l, r)),
        BinaryOp::Eq => Value::Boolean(loose_eq(l, r)),
        BinaryOp::Ne => Value::Boolean(!loose_eq(l, r)),
        BinaryOp::StrictEq => Value::Boolean(strict_eq(l, r)),
        BinaryOp::StrictNe => Value::Boolean(!strict_eq(l, r)),
    })
}

fn compare(op: BinaryOp, l: &Value, r: &Value) -> bool {
    if let (Value::Text(a), Value::Text(b)) = (l, r) {
        return match op {
            BinaryOp::Lt => a < b,
            BinaryOp::Le => a <= b,
            BinaryOp::Gt => a > b,
            _ => a >= b,
        };
    }
    // NaN compares false on every side.
    let (a, b) = (l.to_number(), r.to_number());
    match op {
        BinaryOp::Lt => a < b,
        BinaryOp::Le => a <= b,
        BinaryOp::Gt => a > b,
        _ => a >= b,
    }
}

fn strict_eq(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Empty, Value::Empty) => true,
        (Value::Text(a), Value::Text(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::Boolean(a), Value::Boolean(b)) => a == b,
        (Value::Date(a), Value::Date(b)) => a == b,
        _ => false,
    }
}

fn loose_eq(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Empty, Value::Empty) => true,
        (Value::Empty, _) | (_, Value::Empty) => false,
        (Value::Error(_), _) | (_, Value::Error(_)) => false,
        _ if std::mem::discriminant(l) == std::mem::discriminant(r) => strict_eq(l, r),
        _ => l.to_number() == r.to_number(),
    }
}

/// `Math.round`: halves go toward +Infinity. Adding 0.5 first would round
/// 0.49999999999999994 up.
fn round_half_up(x: f64) -> f64 {
    let floor = x.floor();
    if x - floor >= 0.5 { floor + 1.0 } else { floor }
}

fn math_constant(name: &str) -> Result<Value, ComputationError> {
    match name {
        "PI" => Ok(Value::Number(std::f64::consts::PI)),
        "E" => Ok(Value::Number(std::f64::consts::E)),
        _ => Err(ComputationError::UnknownIdentifier(format!("Math.{}", name))),
    }
}

fn call_math(name: &str, args: &[Value]) -> Result<Value, ComputationError> {
    let arg = |i: usize| args.get(i).map_or(f64::NAN, Value::to_number);
    let n = match name {
        "floor" => arg(0).floor(),
        "ceil" => arg(0).ceil(),
        "round" => round_half_up(arg(0)),
        "abs" => arg(0).abs(),
        "sqrt" => arg(0).sqrt(),
        "trunc" => arg(0).trunc(),
        "pow" => arg(0).powf(arg(1)),
        "min" => args.iter().map(Value::to_number).fold(f64::INFINITY, |acc, x| if x.is_nan() || acc.is_nan() { f64::NAN } else { acc.min(x) }),
        "max" => args.iter().map(Value::to_number).fold(f64::NEG_INFINITY, |acc, x| if x.is_nan() || acc.is_nan() { f64::NAN } else { acc.max(x) }),
        _ => return Err(ComputationError::UnknownFunction(format!("Math.{}", name))),
    };
    Ok(Value::Number(n))
}

fn property(target: &Datum<'_>, name: &str) -> Result<Value, ComputationError> {
    match (target, name) {
        (Datum::List(items), "length") => Ok(Value::Number(items.len() as f64)),
        (Datum::Scalar(Value::Text(s)), "length") => Ok(Value::Number(s.chars().count() as f64)),
        _ => Err(ComputationError::TypeMismatch(format!("value has no property '{}'", name))),
    }
}

/// `target[index]`. Out-of-range and non-integer indexes read as empty.
fn element(target: &Datum<'_>, index: f64) -> Value {
    if index < 0.0 || index.fract() != 0.0 || !index.is_finite() {
        return Value::Empty;
    }
    let i = index as usize;
    match target {
        Datum::List(items) => items.get(i).cloned().unwrap_or_default(),
        Datum::Scalar(Value::Text(s)) => s.chars().nth(i).map(|c| Value::Text(c.to_string())).unwrap_or_default(),
        Datum::Scalar(_) => Value::Empty,
    }
}

fn call_method(receiver: &Datum<'_>, name: &str, args: &[Value]) -> Result<Value, ComputationError> {
    let unknown = || ComputationError::UnknownFunction(format!(".{}", name));
    let value = match receiver {
        Datum::List(items) => {
            return match name {
                "join" => {
                    let sep = args.first().map_or_else(|| ",".to_string(), Value::to_display_string);
                    let parts: Vec<String> = items.iter().map(Value::to_display_string).collect();
                    Ok(Value::Text(parts.join(&sep)))
                }
                _ => Err(unknown()),
            };
        }
        Datum::Scalar(v) => v,
    };

    if name == "toString" {
        return Ok(Value::Text(value.to_display_string()));
    }

    Ok(match (value, name) {
        (Value::Text(s), "trim") => Value::Text(s.trim().to_string()),
        (Value::Text(s), "toUpperCase") => Value::Text(s.to_uppercase()),
        (Value::Text(s), "toLowerCase") => Value::Text(s.to_lowercase()),
        (Value::Number(n), "toFixed") => {
            let digits = args.first().map_or(0.0, Value::to_number);
            if !(0.0..=100.0).contains(&digits) {
                return Err(ComputationError::TypeMismatch("toFixed() digits must be between 0 and 100".into()));
            }
            if n.is_finite() {
                Value::Text(format!("{:.*}", digits as usize, n))
            } else {
                Value::Text(format_number(*n))
            }
        }
        (Value::Date(d), "getFullYear") => Value::Number(f64::from(d.year())),
        (Value::Date(d), "getMonth") => Value::Number(f64::from(d.month0())),
        (Value::Date(d), "getDate") => Value::Number(f64::from(d.day())),
        (Value::Date(d), "getDay") => Value::Number(f64::from(d.weekday().num_days_from_sunday())),
        (Value::Date(d), "getTime") => Value::Number(d.timestamp_millis() as f64),
        (Value::Date(d), "toISOString") => Value::Text(format_date(d)),
        _ => return Err(unknown()),
    })
}

/// Reads the leading integer of `s`, ignoring any trailing garbage.
fn parse_int_prefix(s: &str, radix: Option<f64>) -> f64 {
    let mut t = s.trim_start();
    let negative = t.starts_with('-');
    if negative || t.starts_with('+') {
        t = &t[1..];
    }

    let (mut radix, explicit) = match radix {
        None => (10, false),
        Some(r) if r == 0.0 || r.is_nan() => (10, false),
        Some(r) if (2.0..=36.0).contains(&r) => (r as u32, true),
        Some(_) => return f64::NAN,
    };
    if (!explicit || radix == 16) && (t.starts_with("0x") || t.starts_with("0X")) {
        radix = 16;
        t = &t[2..];
    }

    let digits: Vec<u32> = t.chars().map_while(|c| c.to_digit(radix)).collect();
    if digits.is_empty() {
        return f64::NAN;
    }
    let magnitude = digits.iter().fold(0.0, |acc, &d| acc * f64::from(radix) + f64::from(d));
    if negative { -magnitude } else { magnitude }
}

/// Reads the longest leading decimal literal of `s`.
fn parse_float_prefix(s: &str) -> f64 {
    let t = s.trim_start();
    let unsigned = t.trim_start_matches(&['+', '-'][..]);
    if unsigned.starts_with("Infinity") && t.len() - unsigned.len() <= 1 {
        return if t.starts_with('-') { f64::NEG_INFINITY } else { f64::INFINITY };
    }

    let bytes = t.as_bytes();
    let mut end = 0;
    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }
    let mut best = None;
    let mut seen_dot = false;
    let mut seen_digit = false;
    while end < bytes.len() {
        match bytes[end] {
            b'0'..=b'9' => {
                seen_digit = true;
                end += 1;
                best = Some(end);
            }
            b'.' if !seen_dot => {
                seen_dot = true;
                end += 1;
            }
            b'e' | b'E' if seen_digit => {
                let mut j = end + 1;
                if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
                    j += 1;
                }
                let exp_start = j;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                if j > exp_start {
                    best = Some(j);
                }
                break;
            }
            _ => break,
        }
    }
    best.and_then(|end| t[..end].parse::<f64>().ok()).unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::expr::parser::parse;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn run(src: &str, parents: &[Value]) -> Result<Value, ComputationError> {
        let expr = parse(src, 64)?.expect("expression");
        let mut scope = Scope::new(parents, now(), 10_000);
        match scope.eval(&expr)? {
            Datum::Scalar(v) => Ok(v),
            Datum::List(_) => Err(ComputationError::UnsupportedResult),
        }
    }

    #[test]
    fn test_arithmetic_and_concatenation() {
        let parents = [Value::Number(3.0), Value::text("x")];
        assert_eq!(run("parentValues[0] * 2 + 1", &parents), Ok(Value::Number(7.0)));
        assert_eq!(run("parentValues[1] + parentValues[0]", &parents), Ok(Value::text("x3")));
        assert_eq!(run("parentValues[0] % 2", &parents), Ok(Value::Number(1.0)));
    }

    #[test]
    fn test_division_by_zero_is_an_error() {
        assert_eq!(run("1 / 0", &[]), Err(ComputationError::DivisionByZero));
    }

    #[test]
    fn test_age_style_formula() {
        let parents = [Value::text("2000-01-01")];
        let src = "Math.floor((new Date() - new Date(parentValues[0])) / (365.25 * 24 * 60 * 60 * 1000))";
        assert_eq!(run(src, &parents), Ok(Value::Number(24.0)));
    }

    #[test]
    fn test_out_of_range_index_reads_empty() {
        assert_eq!(run("parentValues[5]", &[Value::Number(1.0)]), Ok(Value::Empty));
        assert_eq!(run("parentValues.length", &[Value::Number(1.0)]), Ok(Value::Number(1.0)));
    }

    #[test]
    fn test_logical_operators_return_operands() {
        assert_eq!(run("parentValues[0] || 'none'", &[Value::text("")]), Ok(Value::text("none")));
        assert_eq!(run("parentValues[0] && 'yes'", &[Value::Number(0.0)]), Ok(Value::Number(0.0)));
        assert_eq!(run("parentValues[0] > 10 ? 'big' : 'small'", &[Value::Number(11.0)]), Ok(Value::text("big")));
    }

    #[test]
    fn test_equality() {
        assert_eq!(run("'3' == 3", &[]), Ok(Value::Boolean(true)));
        assert_eq!(run("'3' === 3", &[]), Ok(Value::Boolean(false)));
        assert_eq!(run("null == 0", &[]), Ok(Value::Boolean(false)));
    }

    #[test]
    fn test_builtins() {
        assert_eq!(run("parseInt('42px')", &[]), Ok(Value::Number(42.0)));
        assert_eq!(run("parseInt('ff', 16)", &[]), Ok(Value::Number(255.0)));
        assert_eq!(run("parseFloat('3.5kg')", &[]), Ok(Value::Number(3.5)));
        assert_eq!(run("Math.max(1, 7, 3)", &[]), Ok(Value::Number(7.0)));
        assert_eq!(run("Math.round(-2.5)", &[]), Ok(Value::Number(-2.0)));
        assert_eq!(run("(3.14159).toFixed(2)", &[]), Ok(Value::text("3.14")));
        assert_eq!(run("String(12) + 'a'", &[]), Ok(Value::text("12a")));
        assert_eq!(run("' Jane '.trim().toUpperCase()", &[]), Ok(Value::text("JANE")));
        assert_eq!(run("new Date(2020, 0, 15).getMonth()", &[]), Ok(Value::Number(0.0)));
        assert_eq!(run("isNaN(Number('abc'))", &[]), Ok(Value::Boolean(true)));
        assert!(matches!(run("new Date(2020, 1e19)", &[]), Ok(Value::Number(n)) if n.is_nan()));
        assert!(matches!(run("new Date(1e300, -1e300, 1e19)", &[]), Ok(Value::Number(n)) if n.is_nan()));
    }

    #[test]
    fn test_round_halves_toward_positive_infinity() {
        assert_eq!(run("Math.round(0.49999999999999994)", &[]), Ok(Value::Number(0.0)));
        assert_eq!(run("Math.round(2.5)", &[]), Ok(Value::Number(3.0)));
        assert_eq!(run("Math.round(-2.5)", &[]), Ok(Value::Number(-2.0)));
        assert_eq!(run("Math.round(-2.6)", &[]), Ok(Value::Number(-3.0)));
    }

    #[test]
    fn test_join_parent_values() {
        let parents = [Value::text("a"), Value::Empty, Value::Number(2.0)];
        assert_eq!(run("parentValues.join('-')", &parents), Ok(Value::text("a--2")));
    }

    #[test]
    fn test_ambient_names_are_not_reachable() {
        for src in ["window", "localStorage.getItem('x')", "process.exit()", "fetch('http://x')"] {
            assert!(
                matches!(run(src, &[]), Err(ComputationError::UnknownIdentifier(_) | ComputationError::UnknownFunction(_))),
                "should be rejected: {}",
                src
            );
        }
    }

    #[test]
    fn test_step_budget() {
        let expr = parse("1 + 1 + 1 + 1 + 1", 64).unwrap().unwrap();
        let mut scope = Scope::new(&[], now(), 4);
        assert_eq!(scope.eval(&expr).unwrap_err(), ComputationError::StepLimitExceeded { limit: 4 });
    }
}
