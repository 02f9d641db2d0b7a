//! Formula item: derives a sample series from other items' series.
//!
//! Inputs are combined on the union of their timestamps with
//! last-value-hold semantics: at each timestamp in any input, every input
//! contributes its most recent value at or before that time (NaN before
//! its first sample). When every input carries min/max statistics, the
//! expression is additionally evaluated over all-mins and all-maxes to
//! derive the result's min/max band.
//!
//! Expression compilation sits behind [`FormulaEvaluator`] so the backend
//! is replaceable; [`ExprEvaluator`] is the built-in arithmetic parser.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::FormulaError;
use crate::events::{EventController, EventKind, ItemId, ModelEvent};
use crate::sample::{Quality, Sample, SampleStats, SOURCE_FORMULA};
use crate::series::{PlainSeries, SeriesLock, SeriesSource};

/// Compiled expression, evaluated over one value per input variable.
pub trait CompiledFormula: Send + Sync {
    /// `values[i]` is the current value of the i-th variable passed to
    /// [`FormulaEvaluator::parse`]. NaN inputs yield NaN results.
    fn eval(&self, values: &[f64]) -> f64;
}

/// Expression compiler backend.
pub trait FormulaEvaluator: Send + Sync {
    fn parse(
        &self,
        expression: &str,
        variables: &[&str],
    ) -> Result<Box<dyn CompiledFormula>, FormulaError>;
}

/// Binding of one formula variable to another item's sample series.
pub struct FormulaInput {
    source: Arc<dyn SeriesSource>,
    item_name: String,
    variable: String,
}

impl FormulaInput {
    pub fn new(
        source: Arc<dyn SeriesSource>,
        item_name: impl Into<String>,
        variable: impl Into<String>,
    ) -> Self {
        Self {
            source,
            item_name: item_name.into(),
            variable: variable.into(),
        }
    }

    pub fn item_name(&self) -> &str {
        &self.item_name
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }
}

struct Guts {
    expression: String,
    compiled: Box<dyn CompiledFormula>,
    inputs: Vec<FormulaInput>,
}

/// Model item computing its series from other items via an expression.
pub struct FormulaChannel {
    id: ItemId,
    name: Mutex<String>,
    display_name: Mutex<Option<String>>,
    events: EventController,
    evaluator: Arc<dyn FormulaEvaluator>,
    guts: Mutex<Guts>,
    series: Arc<SeriesLock<PlainSeries>>,
}

impl FormulaChannel {
    pub fn new(
        id: ItemId,
        name: impl Into<String>,
        expression: impl Into<String>,
        inputs: Vec<FormulaInput>,
        evaluator: Arc<dyn FormulaEvaluator>,
        events: EventController,
    ) -> Result<Self, FormulaError> {
        let expression = expression.into();
        let variables: Vec<&str> = inputs.iter().map(|i| i.variable()).collect();
        let compiled = evaluator.parse(&expression, &variables)?;
        let channel = Self {
            id,
            name: Mutex::new(name.into()),
            display_name: Mutex::new(None),
            events,
            evaluator,
            guts: Mutex::new(Guts {
                expression,
                compiled,
                inputs,
            }),
            series: Arc::new(SeriesLock::new(PlainSeries::new())),
        };
        channel.recompute(&channel.guts.lock());
        Ok(channel)
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) -> bool {
        let name = name.into();
        {
            let mut current = self.name.lock();
            if *current == name {
                return false;
            }
            *current = name;
        }
        self.events
            .emit(ModelEvent::for_item(EventKind::ITEM_LOOK, self.id, self.name()));
        true
    }

    /// Label for display purposes; falls back to the item name.
    pub fn display_name(&self) -> String {
        self.display_name
            .lock()
            .clone()
            .unwrap_or_else(|| self.name())
    }

    pub fn set_display_name(&self, label: Option<String>) {
        {
            let mut current = self.display_name.lock();
            if *current == label {
                return;
            }
            *current = label;
        }
        self.events
            .emit(ModelEvent::for_item(EventKind::ITEM_LOOK, self.id, self.name()));
    }

    pub fn expression(&self) -> String {
        self.guts.lock().expression.clone()
    }

    /// Display names of the items feeding this formula.
    pub fn input_names(&self) -> Vec<String> {
        self.guts
            .lock()
            .inputs
            .iter()
            .map(|i| i.item_name.clone())
            .collect()
    }

    pub fn uses_input(&self, item_name: &str) -> bool {
        self.guts
            .lock()
            .inputs
            .iter()
            .any(|i| i.item_name == item_name)
    }

    pub fn samples(&self) -> &SeriesLock<PlainSeries> {
        &self.series
    }

    /// Read-side handle, so formulas can feed other formulas.
    pub fn series_source(&self) -> Arc<dyn SeriesSource> {
        Arc::clone(&self.series) as Arc<dyn SeriesSource>
    }

    /// Replace expression and input bindings atomically: the new
    /// expression is compiled before anything is swapped, so a parse error
    /// leaves the previous formula in effect.
    pub fn update_formula(
        &self,
        expression: impl Into<String>,
        inputs: Vec<FormulaInput>,
    ) -> Result<(), FormulaError> {
        let expression = expression.into();
        let variables: Vec<&str> = inputs.iter().map(|i| i.variable()).collect();
        let compiled = self.evaluator.parse(&expression, &variables)?;
        let mut guts = self.guts.lock();
        guts.expression = expression;
        guts.compiled = compiled;
        guts.inputs = inputs;
        self.recompute(&guts);
        drop(guts);
        self.events.emit(ModelEvent::for_item(
            EventKind::DATA_CONFIG,
            self.id,
            self.name(),
        ));
        Ok(())
    }

    /// Recompute if any input received samples since its flag was last
    /// cleared. Returns whether a recomputation happened.
    pub fn reevaluate(&self) -> bool {
        let guts = self.guts.lock();
        if !guts.inputs.iter().any(|i| i.source.has_new_samples()) {
            return false;
        }
        self.recompute(&guts);
        true
    }

    fn recompute(&self, guts: &Guts) {
        let samples = compute(guts.compiled.as_ref(), &guts.inputs);
        if let Some(mut guard) = self.series.write() {
            guard.set(samples);
        }
    }
}

struct InputCursor {
    samples: Vec<Sample>,
    index: usize,
    value: f64,
    min: f64,
    max: f64,
}

/// Map non-finite input values to NaN so they poison results instead of
/// producing misleading infinities.
fn normalize(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        f64::NAN
    }
}

fn result_quality(v: f64) -> Quality {
    if v.is_finite() {
        Quality::Ok
    } else {
        Quality::Invalid
    }
}

/// Evaluate the expression over the union time grid of all inputs.
fn compute(compiled: &dyn CompiledFormula, inputs: &[FormulaInput]) -> Vec<Sample> {
    let mut cursors: Vec<InputCursor> = inputs
        .iter()
        .map(|input| InputCursor {
            samples: input.source.snapshot(),
            index: 0,
            value: f64::NAN,
            min: f64::NAN,
            max: f64::NAN,
        })
        .collect();

    let mut out = Vec::new();
    loop {
        let ts = cursors
            .iter()
            .filter_map(|c| c.samples.get(c.index).map(|s| s.time()))
            .min();
        let Some(ts) = ts else {
            break;
        };

        // Advance each cursor through all samples at or before ts; the
        // others hold their previous value.
        for cursor in &mut cursors {
            while let Some(sample) = cursor.samples.get(cursor.index) {
                if sample.time() > ts {
                    break;
                }
                cursor.value = normalize(sample.value());
                match sample.stats() {
                    Some(stats) => {
                        cursor.min = normalize(stats.min);
                        cursor.max = normalize(stats.max);
                    }
                    None => {
                        cursor.min = f64::NAN;
                        cursor.max = f64::NAN;
                    }
                }
                cursor.index += 1;
            }
        }

        let values: Vec<f64> = cursors.iter().map(|c| c.value).collect();
        let value = compiled.eval(&values);
        let have_min_max = cursors
            .iter()
            .all(|c| c.min.is_finite() && c.max.is_finite());
        let sample = if have_min_max {
            let mins: Vec<f64> = cursors.iter().map(|c| c.min).collect();
            let maxs: Vec<f64> = cursors.iter().map(|c| c.max).collect();
            let a = compiled.eval(&mins);
            let b = compiled.eval(&maxs);
            // Negation and the like can swap the band.
            let (min, max) = if a <= b { (a, b) } else { (b, a) };
            Sample::with_stats(
                SOURCE_FORMULA,
                ts,
                value,
                SampleStats {
                    min,
                    max,
                    stddev: 0.0,
                },
                result_quality(value),
            )
        } else {
            Sample::new(SOURCE_FORMULA, ts, value, result_quality(value))
        };
        out.push(sample);
    }
    out
}

// ---------------------------------------------------------------------
// Built-in expression compiler
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Func {
    Abs,
    Sqrt,
    Exp,
    Ln,
    Log10,
    Sin,
    Cos,
    Tan,
    Min,
    Max,
    Pow,
}

impl Func {
    fn lookup(name: &str) -> Option<(Func, usize)> {
        Some(match name {
            "abs" => (Func::Abs, 1),
            "sqrt" => (Func::Sqrt, 1),
            "exp" => (Func::Exp, 1),
            "ln" => (Func::Ln, 1),
            "log10" => (Func::Log10, 1),
            "sin" => (Func::Sin, 1),
            "cos" => (Func::Cos, 1),
            "tan" => (Func::Tan, 1),
            "min" => (Func::Min, 2),
            "max" => (Func::Max, 2),
            "pow" => (Func::Pow, 2),
            _ => return None,
        })
    }
}

#[derive(Debug)]
enum Expr {
    Number(f64),
    Variable(usize),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

impl Expr {
    fn eval(&self, values: &[f64]) -> f64 {
        match self {
            Expr::Number(n) => *n,
            Expr::Variable(i) => values.get(*i).copied().unwrap_or(f64::NAN),
            Expr::Neg(e) => -e.eval(values),
            Expr::Binary(op, a, b) => {
                let a = a.eval(values);
                let b = b.eval(values);
                match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => a / b,
                    BinOp::Pow => a.powf(b),
                }
            }
            Expr::Call(func, args) => {
                let a = args[0].eval(values);
                match func {
                    Func::Abs => a.abs(),
                    Func::Sqrt => a.sqrt(),
                    Func::Exp => a.exp(),
                    Func::Ln => a.ln(),
                    Func::Log10 => a.log10(),
                    Func::Sin => a.sin(),
                    Func::Cos => a.cos(),
                    Func::Tan => a.tan(),
                    Func::Min | Func::Max | Func::Pow => {
                        let b = args[1].eval(values);
                        if a.is_nan() || b.is_nan() {
                            return f64::NAN;
                        }
                        match func {
                            Func::Min => a.min(b),
                            Func::Max => a.max(b),
                            _ => a.powf(b),
                        }
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    Comma,
}

struct CompiledExpr {
    ast: Expr,
}

impl CompiledFormula for CompiledExpr {
    fn eval(&self, values: &[f64]) -> f64 {
        self.ast.eval(values)
    }
}

/// Built-in recursive-descent compiler: `+ - * / ^`, parentheses, unary
/// minus, numeric literals, bound variables and a small function set.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExprEvaluator;

impl FormulaEvaluator for ExprEvaluator {
    fn parse(
        &self,
        expression: &str,
        variables: &[&str],
    ) -> Result<Box<dyn CompiledFormula>, FormulaError> {
        let tokens = tokenize(expression).map_err(|reason| FormulaError::Parse {
            expression: expression.to_owned(),
            reason,
        })?;
        let mut parser = Parser {
            expression,
            tokens: &tokens,
            pos: 0,
            variables,
        };
        let ast = parser.expr()?;
        if parser.pos != tokens.len() {
            return Err(parser.fail("trailing input after expression"));
        }
        Ok(Box::new(CompiledExpr { ast }))
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '^' => {
                chars.next();
                tokens.push(Token::Caret);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '0'..='9' | '.' => {
                let mut text = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        text.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let number: f64 = text
                    .parse()
                    .map_err(|_| format!("bad number literal '{text}'"))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut text = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        text.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(text));
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    expression: &'a str,
    tokens: &'a [Token],
    pos: usize,
    variables: &'a [&'a str],
}

impl Parser<'_> {
    fn fail(&self, reason: impl Into<String>) -> FormulaError {
        FormulaError::Parse {
            expression: self.expression.to_owned(),
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, token: Token) -> Result<(), FormulaError> {
        if self.peek() == Some(&token) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.fail(format!("expected {token:?}")))
        }
    }

    fn expr(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn term(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.power()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.power()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    // Right-associative.
    fn power(&mut self) -> Result<Expr, FormulaError> {
        let base = self.unary()?;
        if self.peek() == Some(&Token::Caret) {
            self.pos += 1;
            let exponent = self.power()?;
            Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)))
        } else {
            Ok(base)
        }
    }

    fn unary(&mut self) -> Result<Expr, FormulaError> {
        if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            Ok(Expr::Neg(Box::new(self.unary()?)))
        } else {
            self.primary()
        }
    }

    fn primary(&mut self) -> Result<Expr, FormulaError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    let (func, arity) = Func::lookup(&name)
                        .ok_or_else(|| self.fail(format!("unknown function '{name}'")))?;
                    self.pos += 1;
                    let mut args = vec![self.expr()?];
                    while self.peek() == Some(&Token::Comma) {
                        self.pos += 1;
                        args.push(self.expr()?);
                    }
                    self.expect(Token::RParen)?;
                    if args.len() != arity {
                        return Err(self.fail(format!(
                            "function '{name}' takes {arity} argument(s), got {}",
                            args.len()
                        )));
                    }
                    Ok(Expr::Call(func, args))
                } else {
                    let index = self
                        .variables
                        .iter()
                        .position(|v| *v == name)
                        .ok_or(FormulaError::UnboundVariable(name))?;
                    Ok(Expr::Variable(index))
                }
            }
            _ => Err(self.fail("unexpected end of expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::SeriesView;
    use chrono::{TimeZone, Utc};

    fn eval(expression: &str, variables: &[&str], values: &[f64]) -> f64 {
        ExprEvaluator
            .parse(expression, variables)
            .unwrap()
            .eval(values)
    }

    fn plain(t: i64, v: f64) -> Sample {
        Sample::new("test", Utc.timestamp_opt(t, 0).unwrap(), v, Quality::Ok)
    }

    fn stats(t: i64, min: f64, v: f64, max: f64) -> Sample {
        Sample::with_stats(
            "test",
            Utc.timestamp_opt(t, 0).unwrap(),
            v,
            SampleStats {
                min,
                max,
                stddev: 0.0,
            },
            Quality::Ok,
        )
    }

    fn source(samples: Vec<Sample>) -> Arc<dyn SeriesSource> {
        let lock = SeriesLock::new(PlainSeries::new());
        if let Some(mut guard) = lock.write() {
            guard.set(samples);
        }
        Arc::new(lock)
    }

    fn input(name: &str, var: &str, samples: Vec<Sample>) -> FormulaInput {
        FormulaInput::new(source(samples), name, var)
    }

    #[test]
    fn expression_arithmetic() {
        assert_eq!(eval("2 + 3 * 4", &[], &[]), 14.0);
        assert_eq!(eval("(2 + 3) * 4", &[], &[]), 20.0);
        assert_eq!(eval("2 ^ 3 ^ 2", &[], &[]), 512.0, "right associative");
        assert_eq!(eval("-x + 1", &["x"], &[3.0]), -2.0);
        assert_eq!(eval("max(a, b) - min(a, b)", &["a", "b"], &[2.0, 7.0]), 5.0);
        assert!(eval("sqrt(x)", &["x"], &[f64::NAN]).is_nan());
    }

    #[test]
    fn parse_errors() {
        let e = ExprEvaluator.parse("2 +", &[]);
        assert!(matches!(e, Err(FormulaError::Parse { .. })));
        let e = ExprEvaluator.parse("y + 1", &["x"]);
        assert!(matches!(e, Err(FormulaError::UnboundVariable(v)) if v == "y"));
        let e = ExprEvaluator.parse("blorp(1)", &[]);
        assert!(matches!(e, Err(FormulaError::Parse { .. })));
        let e = ExprEvaluator.parse("min(1)", &[]);
        assert!(matches!(e, Err(FormulaError::Parse { .. })));
    }

    #[test]
    fn staircase_holds_last_value_per_input() {
        let compiled = ExprEvaluator.parse("a + b", &["a", "b"]).unwrap();
        let inputs = vec![
            input("A", "a", vec![plain(0, 1.0), plain(10, 3.0)]),
            input("B", "b", vec![plain(5, 2.0)]),
        ];
        let rows = compute(compiled.as_ref(), &inputs);
        assert_eq!(rows.len(), 3);

        // t=0: B has no value yet, result is invalid.
        assert_eq!(rows[0].time().timestamp(), 0);
        assert!(rows[0].value().is_nan());
        assert_eq!(rows[0].quality(), Quality::Invalid);

        // t=5: A holds 1, B contributes 2.
        assert_eq!(rows[1].time().timestamp(), 5);
        assert_eq!(rows[1].value(), 3.0);
        assert_eq!(rows[1].quality(), Quality::Ok);

        // t=10: A contributes 3, B holds 2.
        assert_eq!(rows[2].time().timestamp(), 10);
        assert_eq!(rows[2].value(), 5.0);
        assert_eq!(rows[2].source(), SOURCE_FORMULA);
    }

    #[test]
    fn coincident_timestamps_consume_both_inputs() {
        let compiled = ExprEvaluator.parse("a * b", &["a", "b"]).unwrap();
        let inputs = vec![
            input("A", "a", vec![plain(10, 2.0)]),
            input("B", "b", vec![plain(10, 3.0)]),
        ];
        let rows = compute(compiled.as_ref(), &inputs);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value(), 6.0);
    }

    #[test]
    fn min_max_band_derived_when_all_inputs_have_stats() {
        let compiled = ExprEvaluator.parse("-x", &["x"]).unwrap();
        let inputs = vec![input("X", "x", vec![stats(0, 1.0, 2.0, 5.0)])];
        let rows = compute(compiled.as_ref(), &inputs);
        let band = rows[0].stats().expect("band expected");
        assert_eq!(rows[0].value(), -2.0);
        // Negation swaps the band edges.
        assert_eq!(band.min, -5.0);
        assert_eq!(band.max, -1.0);
    }

    #[test]
    fn no_band_when_any_input_is_plain() {
        let compiled = ExprEvaluator.parse("x + y", &["x", "y"]).unwrap();
        let inputs = vec![
            input("X", "x", vec![stats(0, 1.0, 2.0, 3.0)]),
            input("Y", "y", vec![plain(0, 1.0)]),
        ];
        let rows = compute(compiled.as_ref(), &inputs);
        assert!(rows[0].stats().is_none());
        assert_eq!(rows[0].value(), 3.0);
    }

    #[test]
    fn infinite_input_poisons_the_row() {
        let compiled = ExprEvaluator.parse("x", &["x"]).unwrap();
        let inputs = vec![input("X", "x", vec![plain(0, f64::INFINITY), plain(1, 2.0)])];
        let rows = compute(compiled.as_ref(), &inputs);
        assert!(rows[0].value().is_nan());
        assert_eq!(rows[0].quality(), Quality::Invalid);
        assert_eq!(rows[1].value(), 2.0);
    }

    #[test]
    fn channel_computes_on_construction_and_reevaluates_on_new_input() {
        let input_lock = Arc::new(SeriesLock::new(PlainSeries::new()));
        if let Some(mut guard) = input_lock.write() {
            guard.set(vec![plain(0, 1.0)]);
        }
        input_lock.take_new_samples();

        let channel = FormulaChannel::new(
            ItemId(1),
            "calc",
            "x * 2",
            vec![FormulaInput::new(
                Arc::clone(&input_lock) as Arc<dyn SeriesSource>,
                "X",
                "x",
            )],
            Arc::new(ExprEvaluator),
            EventController::new(),
        )
        .unwrap();
        assert_eq!(channel.samples().read().len(), 1, "initial computation");
        channel.samples().take_new_samples();

        assert!(!channel.reevaluate(), "no new input samples");
        assert!(!channel.samples().take_new_samples());

        if let Some(mut guard) = input_lock.write() {
            guard.set(vec![plain(0, 1.0), plain(5, 3.0)]);
        }
        assert!(channel.reevaluate());
        let guard = channel.samples().read();
        assert_eq!(guard.len(), 2);
        assert_eq!(guard.last().unwrap().value(), 6.0);
    }

    #[test]
    fn update_formula_keeps_old_on_parse_error() {
        let channel = FormulaChannel::new(
            ItemId(2),
            "calc",
            "x + 1",
            vec![input("X", "x", vec![plain(0, 1.0)])],
            Arc::new(ExprEvaluator),
            EventController::new(),
        )
        .unwrap();
        let err = channel.update_formula("x +", vec![input("X", "x", vec![plain(0, 1.0)])]);
        assert!(err.is_err());
        assert_eq!(channel.expression(), "x + 1");

        channel
            .update_formula("x * 10", vec![input("X", "x", vec![plain(0, 4.0)])])
            .unwrap();
        assert_eq!(channel.expression(), "x * 10");
        assert_eq!(channel.samples().read().last().unwrap().value(), 40.0);
    }

    #[test]
    fn formula_can_feed_another_formula() {
        let base = input("X", "x", vec![plain(0, 2.0)]);
        let first = FormulaChannel::new(
            ItemId(3),
            "double",
            "x * 2",
            vec![base],
            Arc::new(ExprEvaluator),
            EventController::new(),
        )
        .unwrap();
        let second = FormulaChannel::new(
            ItemId(4),
            "quad",
            "d * 2",
            vec![FormulaInput::new(first.series_source(), "double", "d")],
            Arc::new(ExprEvaluator),
            EventController::new(),
        )
        .unwrap();
        assert_eq!(second.samples().read().last().unwrap().value(), 8.0);
        assert!(second.uses_input("double"));
        assert!(!second.uses_input("X"));
    }
}
