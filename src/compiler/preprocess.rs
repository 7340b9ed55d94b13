//! OpenCL C preprocessor
//!
//! Supports comments, line continuations, object-like and function-like
//! `#define`, `#undef`, conditional compilation with integer constant
//! expressions and `defined`, and ignores `#pragma`. `#include` is rejected.
//! Line numbers of the output match the input so diagnostics point at the
//! original source.

use log::trace;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreprocessError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl PreprocessError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column: 1,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct Macro {
    params: Option<Vec<String>>,
    body: String,
}

#[derive(Debug)]
struct Conditional {
    /// The current branch is being emitted
    active: bool,
    /// Some branch of this chain was already taken
    taken: bool,
    /// The enclosing region is active
    parent_active: bool,
    seen_else: bool,
    line: usize,
}

/// Preprocessor state for one translation unit
pub struct Preprocessor {
    macros: FxHashMap<String, Macro>,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Preprocessor {
    /// A preprocessor with the standard OpenCL 1.2 predefined macros
    pub fn new() -> Self {
        let mut pp = Self {
            macros: FxHashMap::default(),
        };
        for (name, value) in [
            ("__OPENCL_VERSION__", "120"),
            ("__OPENCL_C_VERSION__", "120"),
            ("CL_VERSION_1_0", "100"),
            ("CL_VERSION_1_1", "110"),
            ("CL_VERSION_1_2", "120"),
            ("__ENDIAN_LITTLE__", "1"),
        ] {
            pp.define(name, value);
        }
        pp
    }

    /// Define an object-like macro
    pub fn define(&mut self, name: &str, value: &str) {
        self.macros.insert(
            name.to_string(),
            Macro {
                params: None,
                body: value.to_string(),
            },
        );
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    /// Run the preprocessor over `source`
    pub fn process(&mut self, source: &str) -> Result<String, PreprocessError> {
        let stripped = strip_comments(source)?;
        let physical: Vec<&str> = stripped.split('\n').collect();
        let mut output: Vec<String> = Vec::with_capacity(physical.len());
        let mut stack: Vec<Conditional> = Vec::new();

        let mut idx = 0;
        while idx < physical.len() {
            let line_no = idx + 1;
            // Join continuation lines into one logical line
            let mut logical = String::from(physical[idx]);
            let mut consumed = 1;
            while logical.ends_with('\\') && idx + consumed < physical.len() {
                logical.pop();
                logical.push_str(physical[idx + consumed]);
                consumed += 1;
            }
            idx += consumed;

            let active = stack.last().map(|c| c.active).unwrap_or(true);
            let trimmed = logical.trim_start();
            if let Some(directive) = trimmed.strip_prefix('#') {
                self.directive(directive.trim(), line_no, active, &mut stack)?;
                output.push(String::new());
            } else if active {
                let expanded = self
                    .expand(&logical, &mut Vec::new())
                    .map_err(|m| PreprocessError::new(line_no, m))?;
                output.push(expanded);
            } else {
                output.push(String::new());
            }
            for _ in 1..consumed {
                output.push(String::new());
            }
        }

        if let Some(open) = stack.last() {
            return Err(PreprocessError::new(open.line, "unterminated conditional directive"));
        }

        let result = output.join("\n");
        trace!("Preprocessed source:\n{}", result);
        Ok(result)
    }

    fn directive(
        &mut self,
        directive: &str,
        line: usize,
        active: bool,
        stack: &mut Vec<Conditional>,
    ) -> Result<(), PreprocessError> {
        let (name, rest) = split_word(directive);
        let rest = rest.trim();

        match name {
            "ifdef" | "ifndef" => {
                let (ident, _) = split_word(rest);
                if ident.is_empty() {
                    return Err(PreprocessError::new(line, format!("#{} without a macro name", name)));
                }
                let cond = self.is_defined(ident) == (name == "ifdef");
                push_conditional(stack, active, cond, line);
            }
            "if" => {
                let cond = if active { self.evaluate(rest, line)? } else { false };
                push_conditional(stack, active, cond, line);
            }
            "elif" => {
                let top = stack
                    .last_mut()
                    .ok_or_else(|| PreprocessError::new(line, "#elif without #if"))?;
                if top.seen_else {
                    return Err(PreprocessError::new(line, "#elif after #else"));
                }
                if top.taken || !top.parent_active {
                    top.active = false;
                } else {
                    let parent = top.parent_active;
                    let cond = self.evaluate(rest, line)?;
                    let top = stack
                        .last_mut()
                        .ok_or_else(|| PreprocessError::new(line, "#elif without #if"))?;
                    top.active = parent && cond;
                    top.taken = cond;
                }
            }
            "else" => {
                let top = stack
                    .last_mut()
                    .ok_or_else(|| PreprocessError::new(line, "#else without #if"))?;
                if top.seen_else {
                    return Err(PreprocessError::new(line, "duplicate #else"));
                }
                top.seen_else = true;
                top.active = top.parent_active && !top.taken;
                top.taken = true;
            }
            "endif" => {
                stack
                    .pop()
                    .ok_or_else(|| PreprocessError::new(line, "#endif without #if"))?;
            }
            _ if !active => {}
            "define" => self.parse_define(rest, line)?,
            "undef" => {
                let (ident, _) = split_word(rest);
                self.macros.remove(ident);
            }
            "pragma" | "" => {}
            "include" => {
                return Err(PreprocessError::new(line, "#include is not supported"));
            }
            "error" => {
                return Err(PreprocessError::new(line, format!("#error {}", rest)));
            }
            "line" => {}
            other => {
                return Err(PreprocessError::new(
                    line,
                    format!("unknown preprocessing directive '#{}'", other),
                ));
            }
        }
        Ok(())
    }

    fn parse_define(&mut self, rest: &str, line: usize) -> Result<(), PreprocessError> {
        let name_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        let name = &rest[..name_len];
        if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(PreprocessError::new(line, "macro name must be an identifier"));
        }
        let after = &rest[name_len..];

        let (params, body) = if let Some(params_src) = after.strip_prefix('(') {
            let close = params_src
                .find(')')
                .ok_or_else(|| PreprocessError::new(line, "missing ')' in macro parameter list"))?;
            let params: Vec<String> = params_src[..close]
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
            if params.iter().any(|p| !is_identifier(p)) {
                return Err(PreprocessError::new(line, "invalid macro parameter"));
            }
            (Some(params), params_src[close + 1..].trim().to_string())
        } else {
            (None, after.trim().to_string())
        };

        self.macros.insert(name.to_string(), Macro { params, body });
        Ok(())
    }

    /// Evaluate a `#if`/`#elif` condition
    fn evaluate(&self, expr: &str, line: usize) -> Result<bool, PreprocessError> {
        let resolved = self.replace_defined(expr);
        let expanded = self
            .expand(&resolved, &mut Vec::new())
            .map_err(|m| PreprocessError::new(line, m))?;
        let tokens = tokenize(&expanded);
        let mut eval = CondEval { tokens, pos: 0 };
        let value = eval
            .conditional()
            .map_err(|m| PreprocessError::new(line, m))?;
        if eval.pos != eval.tokens.len() {
            return Err(PreprocessError::new(
                line,
                "unexpected tokens in preprocessor expression",
            ));
        }
        Ok(value != 0)
    }

    fn replace_defined(&self, expr: &str) -> String {
        let tokens = tokenize(expr);
        let mut out = String::new();
        let mut i = 0;
        while i < tokens.len() {
            if tokens[i] == "defined" {
                let mut j = i + 1;
                let parenthesized = tokens.get(j).map(String::as_str) == Some("(");
                if parenthesized {
                    j += 1;
                }
                if let Some(name) = tokens.get(j) {
                    let value = if self.is_defined(name) { "1" } else { "0" };
                    j += 1;
                    if parenthesized && tokens.get(j).map(String::as_str) == Some(")") {
                        j += 1;
                    }
                    out.push_str(value);
                    out.push(' ');
                    i = j;
                    continue;
                }
            }
            out.push_str(&tokens[i]);
            out.push(' ');
            i += 1;
        }
        out
    }

    /// Expand macros in `text`; `disabled` holds macros currently being expanded
    fn expand(&self, text: &str, disabled: &mut Vec<String>) -> Result<String, String> {
        let chars: Vec<char> = text.chars().collect();
        let mut out = String::with_capacity(text.len());
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            if c.is_ascii_alphabetic() || c == '_' {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                let Some(mac) = self.macros.get(&ident).filter(|_| !disabled.contains(&ident))
                else {
                    out.push_str(&ident);
                    continue;
                };

                match &mac.params {
                    None => {
                        disabled.push(ident);
                        let body = self.expand(&mac.body, disabled);
                        disabled.pop();
                        out.push_str(&body?);
                    }
                    Some(params) => {
                        let mut j = i;
                        while j < chars.len() && chars[j].is_whitespace() {
                            j += 1;
                        }
                        if j >= chars.len() || chars[j] != '(' {
                            out.push_str(&ident);
                            continue;
                        }
                        let (args, end) = collect_args(&chars, j + 1)
                            .ok_or_else(|| format!("unterminated call to macro '{}'", ident))?;
                        let args = if params.is_empty() && args.len() == 1 && args[0].trim().is_empty()
                        {
                            Vec::new()
                        } else {
                            args
                        };
                        if args.len() != params.len() {
                            return Err(format!(
                                "macro '{}' expects {} argument(s), got {}",
                                ident,
                                params.len(),
                                args.len()
                            ));
                        }
                        let expanded_args = args
                            .iter()
                            .map(|a| self.expand(a, disabled))
                            .collect::<Result<Vec<_>, _>>()?;
                        let substituted = substitute(&mac.body, params, &args, &expanded_args);
                        disabled.push(ident);
                        let body = self.expand(&substituted, disabled);
                        disabled.pop();
                        out.push_str(&body?);
                        i = end;
                    }
                }
            } else if c.is_ascii_digit() {
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
                    out.push(chars[i]);
                    i += 1;
                }
            } else if c == '"' || c == '\'' {
                let end = skip_literal(&chars, i);
                out.extend(&chars[i..end]);
                i = end;
            } else {
                out.push(c);
                i += 1;
            }
        }
        Ok(out)
    }
}

fn push_conditional(stack: &mut Vec<Conditional>, parent_active: bool, cond: bool, line: usize) {
    stack.push(Conditional {
        active: parent_active && cond,
        taken: cond,
        parent_active,
        seen_else: false,
        line,
    });
}

fn split_word(s: &str) -> (&str, &str) {
    let end = s
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(s.len());
    (&s[..end], &s[end..])
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// End index (exclusive) of the string or char literal starting at `start`
fn skip_literal(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    chars.len()
}

/// Parse macro call arguments starting after the opening parenthesis
fn collect_args(chars: &[char], start: usize) -> Option<(Vec<String>, usize)> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut i = start;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' if depth == 0 => {
                args.push(current.trim().to_string());
                return Some((args, i + 1));
            }
            ')' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                args.push(current.trim().to_string());
                current.clear();
            }
            '"' | '\'' => {
                let end = skip_literal(chars, i);
                current.extend(&chars[i..end]);
                i = end;
                continue;
            }
            _ => current.push(c),
        }
        i += 1;
    }
    None
}

/// Substitute parameters in a function-like macro body, handling `#` and `##`
fn substitute(body: &str, params: &[String], raw: &[String], expanded: &[String]) -> String {
    let tokens = tokenize_keep_space(body);
    let significant = |idx: usize, step: isize| -> Option<&str> {
        let mut k = idx as isize + step;
        while k >= 0 && (k as usize) < tokens.len() {
            let t = tokens[k as usize].as_str();
            if !t.trim().is_empty() {
                return Some(t);
            }
            k += step;
        }
        None
    };

    let mut out = String::new();
    let mut i = 0;
    while i < tokens.len() {
        let tok = &tokens[i];
        if tok == "#" {
            let mut j = i + 1;
            while j < tokens.len() && tokens[j].trim().is_empty() {
                j += 1;
            }
            if let Some(p) = tokens.get(j).and_then(|t| params.iter().position(|p| p == t)) {
                out.push('"');
                out.push_str(&raw[p].trim().replace('\\', "\\\\").replace('"', "\\\""));
                out.push('"');
                i = j + 1;
                continue;
            }
        }
        if let Some(p) = params.iter().position(|p| p == tok) {
            let pasted = significant(i, -1) == Some("##") || significant(i, 1) == Some("##");
            if pasted {
                out.push_str(raw[p].trim());
            } else {
                out.push_str(&expanded[p]);
            }
        } else {
            out.push_str(tok);
        }
        i += 1;
    }

    // Token pasting: drop `##` and the whitespace around it
    while let Some(at) = out.find("##") {
        let before = out[..at].trim_end().len();
        let after_start = at + 2;
        let after = after_start + (out[after_start..].len() - out[after_start..].trim_start().len());
        out.replace_range(before..after, "");
    }
    out
}

fn tokenize_keep_space(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let start = i;
        if c.is_whitespace() {
            while i < chars.len() && chars[i].is_whitespace() {
                i += 1;
            }
        } else if c.is_ascii_alphanumeric() || c == '_' {
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                i += 1;
            }
        } else if c == '"' || c == '\'' {
            i = skip_literal(&chars, i);
        } else if c == '#' && chars.get(i + 1) == Some(&'#') {
            i += 2;
        } else {
            i += 1;
        }
        tokens.push(chars[start..i].iter().collect());
    }
    tokens
}

/// Tokens of a preprocessor expression (whitespace dropped)
fn tokenize(text: &str) -> Vec<String> {
    const PUNCT2: [&str; 8] = ["<<", ">>", "<=", ">=", "==", "!=", "&&", "||"];
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        if c.is_ascii_alphanumeric() || c == '_' {
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
        } else {
            let pair: String = chars[i..(i + 2).min(chars.len())].iter().collect();
            i += if PUNCT2.contains(&pair.as_str()) { 2 } else { 1 };
        }
        tokens.push(chars[start..i].iter().collect());
    }
    tokens
}

/// Replace comments with whitespace, keeping newlines
fn strip_comments(source: &str) -> Result<String, PreprocessError> {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut i = 0;
    let mut line = 1;
    while i < chars.len() {
        let c = chars[i];
        if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
        } else if c == '/' && chars.get(i + 1) == Some(&'*') {
            let start_line = line;
            i += 2;
            loop {
                if i >= chars.len() {
                    return Err(PreprocessError::new(start_line, "unterminated comment"));
                }
                if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                    i += 2;
                    break;
                }
                if chars[i] == '\n' {
                    out.push('\n');
                    line += 1;
                }
                i += 1;
            }
            out.push(' ');
        } else if c == '"' || c == '\'' {
            let end = skip_literal(&chars, i);
            out.extend(&chars[i..end]);
            i = end;
        } else {
            if c == '\n' {
                line += 1;
            }
            out.push(c);
            i += 1;
        }
    }
    Ok(out)
}

/// Integer constant expression evaluator for `#if`
struct CondEval {
    tokens: Vec<String>,
    pos: usize,
}

impl CondEval {
    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn eat(&mut self, tok: &str) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn conditional(&mut self) -> Result<i64, String> {
        let cond = self.binary(0)?;
        if self.eat("?") {
            let a = self.conditional()?;
            if !self.eat(":") {
                return Err("expected ':' in conditional expression".to_string());
            }
            let b = self.conditional()?;
            return Ok(if cond != 0 { a } else { b });
        }
        Ok(cond)
    }

    fn precedence(op: &str) -> Option<u8> {
        Some(match op {
            "||" => 1,
            "&&" => 2,
            "|" => 3,
            "^" => 4,
            "&" => 5,
            "==" | "!=" => 6,
            "<" | "<=" | ">" | ">=" => 7,
            "<<" | ">>" => 8,
            "+" | "-" => 9,
            "*" | "/" | "%" => 10,
            _ => return None,
        })
    }

    fn binary(&mut self, min_prec: u8) -> Result<i64, String> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.peek().map(str::to_string) {
            let Some(prec) = Self::precedence(&op) else {
                break;
            };
            if prec <= min_prec {
                break;
            }
            self.pos += 1;
            let rhs = self.binary(prec)?;
            lhs = match op.as_str() {
                "||" => ((lhs != 0) || (rhs != 0)) as i64,
                "&&" => ((lhs != 0) && (rhs != 0)) as i64,
                "|" => lhs | rhs,
                "^" => lhs ^ rhs,
                "&" => lhs & rhs,
                "==" => (lhs == rhs) as i64,
                "!=" => (lhs != rhs) as i64,
                "<" => (lhs < rhs) as i64,
                "<=" => (lhs <= rhs) as i64,
                ">" => (lhs > rhs) as i64,
                ">=" => (lhs >= rhs) as i64,
                "<<" => lhs.wrapping_shl(rhs as u32),
                ">>" => lhs.wrapping_shr(rhs as u32),
                "+" => lhs.wrapping_add(rhs),
                "-" => lhs.wrapping_sub(rhs),
                "*" => lhs.wrapping_mul(rhs),
                "/" | "%" => {
                    if rhs == 0 {
                        return Err("division by zero in preprocessor expression".to_string());
                    }
                    if op == "/" {
                        lhs.wrapping_div(rhs)
                    } else {
                        lhs.wrapping_rem(rhs)
                    }
                }
                other => return Err(format!("unknown operator '{}'", other)),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<i64, String> {
        let tok = self
            .peek()
            .map(str::to_string)
            .ok_or_else(|| "unexpected end of preprocessor expression".to_string())?;
        self.pos += 1;
        match tok.as_str() {
            "!" => Ok((self.unary()? == 0) as i64),
            "~" => Ok(!self.unary()?),
            "-" => Ok(self.unary()?.wrapping_neg()),
            "+" => self.unary(),
            "(" => {
                let v = self.conditional()?;
                if !self.eat(")") {
                    return Err("expected ')' in preprocessor expression".to_string());
                }
                Ok(v)
            }
            t if t.starts_with(|c: char| c.is_ascii_digit()) => parse_int(t)
                .map(|v| v as i64)
                .ok_or_else(|| format!("invalid integer '{}' in preprocessor expression", t)),
            // Identifiers left after expansion evaluate to zero
            t if is_identifier(t) => Ok(0),
            t => Err(format!("unexpected '{}' in preprocessor expression", t)),
        }
    }
}

/// Parse a C integer literal, ignoring `u`/`l` suffixes
pub(crate) fn parse_int(text: &str) -> Option<u64> {
    let digits = text.trim_end_matches(['u', 'U', 'l', 'L']);
    if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).ok()
    } else if digits.len() > 1 && digits.starts_with('0') {
        u64::from_str_radix(&digits[1..], 8).ok()
    } else {
        digits.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> String {
        Preprocessor::new().process(source).unwrap()
    }

    #[test]
    fn test_comments_keep_line_numbers() {
        let out = run("a /* x\ny */ b\n// c\nd");
        assert_eq!(out.lines().count(), 4);
        assert!(out.lines().nth(1).unwrap().contains('b'));
        assert_eq!(out.lines().nth(3).unwrap(), "d");
    }

    #[test]
    fn test_object_and_function_macros() {
        let out = run("#define N 16\n#define SQ(x) ((x) * (x))\nint a = SQ(N + 1);");
        assert_eq!(out.lines().nth(2).unwrap(), "int a = ((16 + 1) * (16 + 1));");
    }

    #[test]
    fn test_token_pasting_and_stringify() {
        let out = run("#define CAT(a, b) a ## b\n#define STR(a) #a\nCAT(foo, bar) STR(x y)");
        assert_eq!(out.lines().nth(2).unwrap(), "foobar \"x y\"");
    }

    #[test]
    fn test_conditionals() {
        let src = "#define A 2\n#if A > 1 && defined(A)\nyes\n#elif 1\nno\n#else\nno\n#endif\n#ifndef B\nb\n#endif";
        let out = run(src);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[2], "yes");
        assert_eq!(lines[4], "");
        assert_eq!(lines[9], "b");
    }

    #[test]
    fn test_predefined_version() {
        let out = run("#if __OPENCL_VERSION__ >= CL_VERSION_1_2\nok\n#endif");
        assert_eq!(out.lines().nth(1).unwrap(), "ok");
    }

    #[test]
    fn test_continuation_lines() {
        let out = run("#define ADD(a, b) \\\n  ((a) + (b))\nint x = ADD(1, 2);");
        assert_eq!(out.lines().count(), 3);
        assert_eq!(out.lines().nth(2).unwrap(), "int x = ((1) + (2));");
    }

    #[test]
    fn test_recursive_macro_is_not_expanded_again() {
        let out = run("#define X X + 1\nX");
        assert_eq!(out.lines().nth(1).unwrap(), "X + 1");
    }

    #[test]
    fn test_include_is_rejected() {
        let err = Preprocessor::new()
            .process("\n#include \"a.h\"")
            .unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_unterminated_conditional() {
        let err = Preprocessor::new().process("#ifdef A\nx").unwrap_err();
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int("0x1F"), Some(31));
        assert_eq!(parse_int("42u"), Some(42));
        assert_eq!(parse_int("010"), Some(8));
        assert_eq!(parse_int("0"), Some(0));
    }
}
