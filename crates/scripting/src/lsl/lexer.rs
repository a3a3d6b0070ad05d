//! LSL Lexer
//!
//! Turns source text into statement lines: token groups ending at `;`,
//! at `{` or `}` (which always form a line of their own), or at the `:`
//! of a `case`/`default` label. Semicolons inside parentheses do not end
//! a line, so a `for` header stays whole.

use crate::error::CompileError;
use crate::lsl::directives::Directives;

/// Maximum `#include` nesting
pub const MAX_INCLUDE_DEPTH: usize = 16;

/// Stripped like whitespace; hosts use it to mark injected text
pub const DEFAULT_CONTROL_CHAR: char = '\u{1}';

const KEYWORDS: &[&str] = &[
    "if", "else", "for", "while", "do", "return", "jump", "state", "default", "switch", "case", "break",
    "continue", "foreach", "in", "struct", "extern", "rpc",
];

const OPERATORS: &[&str] = &[
    "<<=", ">>=", "++", "--", "+=", "-=", "*=", "/=", "%=", "==", "!=", "<=", ">=", "&&", "||", "<<", ">>", "&=",
    "|=", "^=", "+", "-", "*", "/", "%", "=", "<", ">", "!", "&", "|", "^", "~",
];

const OPERATOR_CHARS: &str = "+-*/%=<>!&|^~";

pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

/// Token classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    Keyword,
    Integer,
    Float,
    /// String literal; the token text is the unescaped content
    String,
    Operator,
    Punct,
}

/// A token with the source line it started on
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            line,
        }
    }

    /// Punctuation or operator with this exact text
    pub fn is(&self, text: &str) -> bool {
        matches!(self.kind, TokenKind::Punct | TokenKind::Operator) && self.text == text
    }

    pub fn is_keyword(&self, word: &str) -> bool {
        self.kind == TokenKind::Keyword && self.text == word
    }
}

/// One statement line
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatementLine {
    pub tokens: Vec<Token>,
}

impl StatementLine {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens }
    }

    /// Line of the first token
    pub fn line(&self) -> usize {
        self.tokens.first().map(|t| t.line).unwrap_or(0)
    }

    pub fn texts(&self) -> Vec<&str> {
        self.tokens.iter().map(|t| t.text.as_str()).collect()
    }
}

/// Supplies the text of `#include "name"`
pub trait IncludeResolver: Send + Sync {
    fn resolve(&self, name: &str) -> std::result::Result<String, String>;
}

/// Lexer output
#[derive(Debug, Clone, Default)]
pub struct Lexed {
    pub lines: Vec<StatementLine>,
    pub directives: Directives,
}

/// LSL lexer
pub struct Lexer<'a> {
    source: &'a str,
    resolver: Option<&'a dyn IncludeResolver>,
    control_char: char,
    directives: Directives,
    lines: Vec<StatementLine>,
    current: Vec<Token>,
    brackets: Vec<(char, usize)>,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            resolver: None,
            control_char: DEFAULT_CONTROL_CHAR,
            directives: Directives::default(),
            lines: Vec::new(),
            current: Vec::new(),
            brackets: Vec::new(),
        }
    }

    pub fn with_include_resolver(mut self, resolver: &'a dyn IncludeResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_control_char(mut self, c: char) -> Self {
        self.control_char = c;
        self
    }

    /// Directive lines supplied by the host, applied before the source
    pub fn with_directives(mut self, lines: &[String]) -> Result<Self, CompileError> {
        for line in lines {
            let body = line.trim().trim_start_matches('#');
            if !self.directives.apply(body, 0)? {
                return Err(CompileError::lex(0, format!("unsupported directive '{}'", line.trim())));
            }
        }
        Ok(self)
    }

    /// Tokenize the whole source
    pub fn tokenize(mut self) -> Result<Lexed, CompileError> {
        let source = self.source;
        self.scan(source, 0, None)?;

        if let Some((open, line)) = self.brackets.last() {
            return Err(CompileError::lex(*line, format!("unclosed '{}'", open)));
        }
        self.flush();

        Ok(Lexed {
            lines: self.lines,
            directives: self.directives,
        })
    }

    fn scan(&mut self, source: &str, nesting: usize, fixed_line: Option<usize>) -> Result<(), CompileError> {
        let chars: Vec<char> = source.chars().collect();
        let mut i = 0;
        let mut line = 1;
        let mut at_line_start = true;

        while i < chars.len() {
            let c = chars[i];
            let tok_line = fixed_line.unwrap_or(line);

            if c == '\n' {
                line += 1;
                at_line_start = true;
                i += 1;
                continue;
            }
            if c.is_whitespace() || c == self.control_char {
                i += 1;
                continue;
            }

            if c == '#' && at_line_start {
                let end = chars[i..].iter().position(|&ch| ch == '\n').map_or(chars.len(), |p| i + p);
                let text: String = chars[i + 1..end].iter().collect();
                self.directive(text.trim(), tok_line, nesting)?;
                i = end;
                continue;
            }
            at_line_start = false;

            // Comments
            if c == '/' && chars.get(i + 1) == Some(&'/') {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            if c == '/' && chars.get(i + 1) == Some(&'*') {
                i += 2;
                loop {
                    match chars.get(i) {
                        None => return Err(CompileError::lex(tok_line, "unterminated comment")),
                        Some('*') if chars.get(i + 1) == Some(&'/') => {
                            i += 2;
                            break;
                        }
                        Some('\n') => line += 1,
                        _ => {}
                    }
                    i += 1;
                }
                continue;
            }

            if c == '"' || c == '\'' {
                let (text, next, newlines) = read_string(&chars, i, tok_line)?;
                self.current.push(Token::new(TokenKind::String, text, tok_line));
                line += newlines;
                i = next;
                continue;
            }

            if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).map_or(false, |d| d.is_ascii_digit())) {
                let (kind, text, next) = read_number(&chars, i, tok_line)?;
                self.current.push(Token::new(kind, text, tok_line));
                i = next;
                continue;
            }

            if c.is_alphabetic() || c == '_' {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let kind = if is_keyword(&word) {
                    TokenKind::Keyword
                } else {
                    TokenKind::Identifier
                };
                self.current.push(Token::new(kind, word, tok_line));
                continue;
            }

            if OPERATOR_CHARS.contains(c) {
                i = self.operator_run(&chars, i, tok_line)?;
                continue;
            }

            self.punct(c, tok_line)?;
            i += 1;
        }

        Ok(())
    }

    /// Split a run of operator characters greedily, folding a trailing `-`
    /// into a following numeric literal where it can only be a sign
    fn operator_run(&mut self, chars: &[char], start: usize, line: usize) -> Result<usize, CompileError> {
        let mut end = start;
        while end < chars.len() && OPERATOR_CHARS.contains(chars[end]) {
            if chars[end] == '/' && matches!(chars.get(end + 1), Some('/') | Some('*')) {
                break;
            }
            end += 1;
        }
        let run: String = chars[start..end].iter().collect();

        let mut pos = 0;
        while pos < run.len() {
            let rest = &run[pos..];
            let op = OPERATORS
                .iter()
                .find(|op| rest.starts_with(**op))
                .ok_or_else(|| CompileError::lex(line, format!("unknown operator '{}'", rest)))?;
            pos += op.len();

            let is_last = pos == run.len();
            let starts_number = match chars.get(end) {
                Some(d) if d.is_ascii_digit() => true,
                Some('.') => chars.get(end + 1).map_or(false, |d| d.is_ascii_digit()),
                _ => false,
            };
            if is_last && *op == "-" && starts_number && self.sign_can_fold() {
                let (kind, text, next) = read_number(chars, end, line)?;
                self.current.push(Token::new(kind, format!("-{}", text), line));
                return Ok(next);
            }

            self.current.push(Token::new(TokenKind::Operator, *op, line));
        }

        Ok(end)
    }

    fn sign_can_fold(&self) -> bool {
        match self.current.last() {
            None => true,
            Some(prev) => match prev.kind {
                TokenKind::Operator => prev.text != "++" && prev.text != "--",
                TokenKind::Keyword => true,
                TokenKind::Punct => !matches!(prev.text.as_str(), ")" | "]"),
                _ => false,
            },
        }
    }

    fn punct(&mut self, c: char, line: usize) -> Result<(), CompileError> {
        match c {
            '(' | '[' => {
                self.brackets.push((c, line));
                self.current.push(Token::new(TokenKind::Punct, c.to_string(), line));
            }
            ')' | ']' => {
                let expected = if c == ')' { '(' } else { '[' };
                match self.brackets.pop() {
                    Some((open, _)) if open == expected => {}
                    _ => return Err(CompileError::lex(line, format!("unmatched '{}'", c))),
                }
                self.current.push(Token::new(TokenKind::Punct, c.to_string(), line));
            }
            '{' | '}' => {
                self.flush();
                self.lines.push(StatementLine::new(vec![Token::new(TokenKind::Punct, c.to_string(), line)]));
            }
            ';' => {
                self.current.push(Token::new(TokenKind::Punct, ";", line));
                if self.brackets.is_empty() {
                    self.flush();
                }
            }
            ':' => {
                self.current.push(Token::new(TokenKind::Punct, ":", line));
                let is_label = self
                    .current
                    .first()
                    .map_or(false, |t| t.is_keyword("case") || t.is_keyword("default"));
                if is_label && self.brackets.is_empty() {
                    self.flush();
                }
            }
            ',' | '.' | '@' => {
                self.current.push(Token::new(TokenKind::Punct, c.to_string(), line));
            }
            other => {
                return Err(CompileError::lex(line, format!("unexpected character '{}'", other.escape_default())));
            }
        }
        Ok(())
    }

    fn directive(&mut self, text: &str, line: usize, nesting: usize) -> Result<(), CompileError> {
        if self.directives.apply(text, line)? {
            return Ok(());
        }

        if text == "endinclude" {
            return Ok(());
        }

        if let Some(rest) = text.strip_prefix("include") {
            let name = rest.trim().trim_matches('"');
            if name.is_empty() {
                return Err(CompileError::lex(line, "#include without a name"));
            }
            if nesting + 1 > MAX_INCLUDE_DEPTH {
                return Err(CompileError::lex(line, format!("#include nesting deeper than {}", MAX_INCLUDE_DEPTH)));
            }
            let resolver = self
                .resolver
                .ok_or_else(|| CompileError::lex(line, format!("cannot include '{}': no include resolver", name)))?;
            let included = resolver
                .resolve(name)
                .map_err(|e| CompileError::lex(line, format!("cannot include '{}': {}", name, e)))?;

            tracing::debug!("Including '{}' at line {} (depth {})", name, line, nesting + 1);
            return self.scan(&included, nesting + 1, Some(line));
        }

        Err(CompileError::lex(line, format!("unknown directive '#{}'", text)))
    }

    fn flush(&mut self) {
        if !self.current.is_empty() {
            let tokens = std::mem::take(&mut self.current);
            self.lines.push(StatementLine::new(tokens));
        }
    }
}

/// Tokenize without includes or host directives
pub fn tokenize(source: &str) -> Result<Vec<StatementLine>, CompileError> {
    Ok(Lexer::new(source).tokenize()?.lines)
}

/// Returns (content, next index, newlines consumed)
fn read_string(chars: &[char], start: usize, line: usize) -> Result<(String, usize, usize), CompileError> {
    let quote = chars[start];
    let mut text = String::new();
    let mut newlines = 0;
    let mut i = start + 1;

    loop {
        match chars.get(i) {
            None => return Err(CompileError::lex(line, "unterminated string literal")),
            Some(&c) if c == quote => return Ok((text, i + 1, newlines)),
            Some('\\') => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or_else(|| CompileError::lex(line, "unterminated string literal"))?;
                match escaped {
                    'n' => text.push('\n'),
                    't' => text.push_str("    "),
                    '\n' => {
                        newlines += 1;
                        text.push('\n');
                    }
                    other => text.push(*other),
                }
                i += 2;
            }
            Some(&c) => {
                if c == '\n' {
                    newlines += 1;
                }
                text.push(c);
                i += 1;
            }
        }
    }
}

fn read_number(chars: &[char], start: usize, line: usize) -> Result<(TokenKind, String, usize), CompileError> {
    let mut i = start;

    if chars[i] == '0' && matches!(chars.get(i + 1), Some('x') | Some('X')) {
        i += 2;
        let digits_start = i;
        while i < chars.len() && chars[i].is_ascii_hexdigit() {
            i += 1;
        }
        if i == digits_start {
            return Err(CompileError::lex(line, "malformed hexadecimal literal"));
        }
        check_number_end(chars, i, line)?;
        return Ok((TokenKind::Integer, chars[start..i].iter().collect(), i));
    }

    let mut is_float = false;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        is_float = true;
        i += 1;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
    }
    if matches!(chars.get(i), Some('e') | Some('E')) {
        let mut j = i + 1;
        if matches!(chars.get(j), Some('+') | Some('-')) {
            j += 1;
        }
        if chars.get(j).map_or(false, |d| d.is_ascii_digit()) {
            while j < chars.len() && chars[j].is_ascii_digit() {
                j += 1;
            }
            is_float = true;
            i = j;
        } else {
            return Err(CompileError::lex(line, "malformed exponent"));
        }
    }

    let text: String = chars[start..i].iter().collect();
    if is_float && matches!(chars.get(i), Some('f') | Some('F')) {
        i += 1;
    }
    check_number_end(chars, i, line)?;

    let kind = if is_float { TokenKind::Float } else { TokenKind::Integer };
    Ok((kind, text, i))
}

fn check_number_end(chars: &[char], i: usize, line: usize) -> Result<(), CompileError> {
    match chars.get(i) {
        Some(c) if c.is_alphanumeric() || *c == '_' => {
            Err(CompileError::lex(line, format!("malformed numeric literal near '{}'", c)))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompileErrorKind;

    fn texts(source: &str) -> Vec<Vec<String>> {
        tokenize(source)
            .unwrap()
            .iter()
            .map(|l| l.tokens.iter().map(|t| t.text.clone()).collect())
            .collect()
    }

    #[test]
    fn test_compound_assignment_tokens() {
        assert_eq!(texts("x += 1;"), vec![vec!["x", "+=", "1", ";"]]);
    }

    #[test]
    fn test_greedy_operator_split() {
        assert_eq!(texts("x = x+++1;"), vec![vec!["x", "=", "x", "++", "+", "1", ";"]]);
        assert_eq!(texts("x = x---1;"), vec![vec!["x", "=", "x", "--", "-", "1", ";"]]);
    }

    #[test]
    fn test_sign_folding() {
        assert_eq!(texts("x=-1;"), vec![vec!["x", "=", "-1", ";"]]);
        assert_eq!(texts("y = a -1;"), vec![vec!["y", "=", "a", "-", "1", ";"]]);
        assert_eq!(texts("f(-2.5, <-1,0,0>);")[0][2], "-2.5");
        let lines = tokenize("float z = -0.0;").unwrap();
        let lit = &lines[0].tokens[3];
        assert_eq!(lit.kind, TokenKind::Float);
        assert_eq!(lit.text, "-0.0");
    }

    #[test]
    fn test_line_splitting() {
        let lines = texts("if (a) { b(); } else c();\nfor (i = 0; i < 3; i++) x;");
        assert_eq!(lines[0], vec!["if", "(", "a", ")"]);
        assert_eq!(lines[1], vec!["{"]);
        assert_eq!(lines[2], vec!["b", "(", ")", ";"]);
        assert_eq!(lines[3], vec!["}"]);
        assert_eq!(lines[4], vec!["else", "c", "(", ")", ";"]);
        assert_eq!(lines[5].len(), 15);
    }

    #[test]
    fn test_case_labels_end_lines() {
        let lines = texts("case 1: x = 2; default: y();");
        assert_eq!(lines[0], vec!["case", "1", ":"]);
        assert_eq!(lines[1], vec!["x", "=", "2", ";"]);
        assert_eq!(lines[2], vec!["default", ":"]);
    }

    #[test]
    fn test_comments_keep_line_numbers() {
        let lines = tokenize("/* one\n two */ a;\n// three\nb;").unwrap();
        assert_eq!(lines[0].line(), 2);
        assert_eq!(lines[1].line(), 4);
    }

    #[test]
    fn test_string_escapes() {
        let lines = tokenize("s = \"a\\\"b\\n\" + 'c';").unwrap();
        assert_eq!(lines[0].tokens[2].text, "a\"b\n");
        assert_eq!(lines[0].tokens[4].kind, TokenKind::String);
    }

    #[test]
    fn test_lex_errors() {
        let err = tokenize("s = \"open;").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Lex);
        assert_eq!(tokenize("x = 1);").unwrap_err().kind, CompileErrorKind::Lex);
        assert_eq!(tokenize("f(1;\n").unwrap_err().kind, CompileErrorKind::Lex);
        assert_eq!(tokenize("x = 1 $ 2;").unwrap_err().kind, CompileErrorKind::Lex);
        assert_eq!(tokenize("/* never closed").unwrap_err().kind, CompileErrorKind::Lex);
        assert_eq!(tokenize("x = 12abc;").unwrap_err().kind, CompileErrorKind::Lex);
    }

    #[test]
    fn test_control_char_is_stripped() {
        assert_eq!(texts("x\u{1} = 1;"), vec![vec!["x", "=", "1", ";"]]);
    }

    struct MapResolver;

    impl IncludeResolver for MapResolver {
        fn resolve(&self, name: &str) -> std::result::Result<String, String> {
            match name {
                "lib" => Ok("integer shared = 4;\n\nfloat other;".into()),
                "self" => Ok("#include \"self\"".into()),
                _ => Err("not found".into()),
            }
        }
    }

    #[test]
    fn test_include_uses_directive_line() {
        let resolver = MapResolver;
        let lexed = Lexer::new("integer a;\n#include \"lib\"\n#endinclude\nb;")
            .with_include_resolver(&resolver)
            .tokenize()
            .unwrap();
        let lines: Vec<usize> = lexed.lines.iter().map(|l| l.line()).collect();
        assert_eq!(lines, vec![1, 2, 2, 4]);
    }

    #[test]
    fn test_include_errors() {
        let resolver = MapResolver;
        let err = Lexer::new("#include \"self\"")
            .with_include_resolver(&resolver)
            .tokenize()
            .unwrap_err();
        assert!(err.message.contains("nesting"));

        let err = Lexer::new("\n#include \"missing\"")
            .with_include_resolver(&resolver)
            .tokenize()
            .unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_directives_are_collected() {
        let lexed = Lexer::new("#!Mode:aurora\n#!Enable:Structs\ninteger x;")
            .with_directives(&["#!UsesSinglePrecision".to_string()])
            .unwrap()
            .tokenize()
            .unwrap();
        assert!(lexed.directives.single_precision);
        assert_eq!(lexed.directives.extensions[0].0, "Structs");
        assert_eq!(lexed.lines.len(), 1);
    }
}
