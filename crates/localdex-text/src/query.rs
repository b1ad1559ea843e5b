//! Query analysis shared by every lexical engine.
//!
//! A query is either natural language, searched as a phrase and then as any
//! of its terms, or an operator query (`AND`, `OR`, `NOT`, `term*`,
//! `"a phrase"`, `"a phrase"~N`, parentheses). Operator queries that do not
//! parse degrade to a substring match over their words.

pub const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is", "it", "its", "of", "on",
    "that", "the", "to", "was", "will", "with", "or", "but", "not", "this", "these", "they", "them", "their", "there",
    "then", "than", "so", "if", "when", "where", "why", "how", "what", "which", "who", "whom", "whose", "can", "could",
    "should", "would", "may", "might", "must", "shall", "do", "does", "did", "have", "had", "having",
];

/// Lowercased alphanumeric tokens with their positions, stop words removed.
/// Positions count removed stop words so phrase offsets stay aligned.
pub fn tokenize(text: &str) -> Vec<(usize, String)> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .enumerate()
        .map(|(i, s)| (i, s.to_lowercase()))
        .filter(|(_, s)| !STOP_WORDS.contains(&s.as_str()))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Term(String),
    Prefix(String),
    /// Terms with their relative positions; at least two terms.
    Phrase { terms: Vec<(usize, String)>, slop: u32 },
    And(Vec<Query>),
    Or(Vec<Query>),
    /// Only valid as a child of `And` beside a positive clause.
    Not(Box<Query>),
    /// Case-insensitive containment of any of the words.
    Substring(Vec<String>),
}

impl Query {
    /// Terms that contribute to ranking (those not under a `Not`).
    pub fn positive_terms(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_terms(&mut out);
        out
    }

    fn collect_terms(&self, out: &mut Vec<String>) {
        match self {
            Query::Term(t) | Query::Prefix(t) => out.push(t.clone()),
            Query::Phrase { terms, .. } => out.extend(terms.iter().map(|(_, t)| t.clone())),
            Query::And(qs) | Query::Or(qs) => qs.iter().for_each(|q| q.collect_terms(out)),
            Query::Not(_) => {}
            Query::Substring(ws) => out.extend(ws.iter().cloned()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Natural,
    Operators,
    Substring,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub kind: QueryKind,
    /// `None` when nothing searchable is left.
    pub primary: Option<Query>,
    /// Tried when the primary query finds nothing.
    pub fallback: Option<Query>,
}

pub fn analyze(raw: &str) -> QueryPlan {
    let raw = raw.trim();
    if !looks_like_operators(raw) {
        let terms = tokenize(raw);
        if terms.is_empty() {
            return substring_plan(raw);
        }
        let fallback = (terms.len() > 1).then(|| Query::Or(terms.iter().map(|(_, t)| Query::Term(t.clone())).collect()));
        return QueryPlan { kind: QueryKind::Natural, primary: phrase_or_term(terms, 0), fallback };
    }
    match lex(raw).and_then(|tokens| Parser { tokens, pos: 0 }.parse()) {
        Ok(q) => QueryPlan { kind: QueryKind::Operators, primary: Some(q), fallback: None },
        Err(_) => substring_plan(raw),
    }
}

fn substring_plan(raw: &str) -> QueryPlan {
    let mut words: Vec<String> = raw
        .split_whitespace()
        .filter(|w| !matches!(*w, "AND" | "OR" | "NOT"))
        .map(|w| w.trim_matches(|c: char| matches!(c, '"' | '(' | ')' | '*' | '~')).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect();
    words.dedup();
    let primary = (!words.is_empty()).then_some(Query::Substring(words));
    QueryPlan { kind: QueryKind::Substring, primary, fallback: None }
}

fn looks_like_operators(raw: &str) -> bool {
    raw.contains(['"', '(', ')'])
        || raw.split_whitespace().any(|w| matches!(w, "AND" | "OR" | "NOT") || (w.len() > 1 && w.ends_with('*')))
}

fn phrase_or_term(mut terms: Vec<(usize, String)>, slop: u32) -> Option<Query> {
    match terms.len() {
        0 => None,
        1 => terms.pop().map(|(_, t)| Query::Term(t)),
        _ => {
            let base = terms[0].0;
            let terms = terms.into_iter().map(|(p, t)| (p - base, t)).collect();
            Some(Query::Phrase { terms, slop })
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Prefix(String),
    Quoted(String, u32),
    And,
    Or,
    Not,
    Open,
    Close,
}

fn lex(raw: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = raw.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '"' => {
                chars.next();
                let mut body = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '"' {
                        closed = true;
                        break;
                    }
                    body.push(c);
                }
                if !closed {
                    return Err("unterminated quote".into());
                }
                let mut slop = 0;
                if chars.peek() == Some(&'~') {
                    chars.next();
                    let mut digits = String::new();
                    while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                        digits.push(d);
                        chars.next();
                    }
                    slop = digits.parse().map_err(|_| "proximity needs a number".to_string())?;
                }
                tokens.push(Token::Quoted(body, slop));
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '(' | ')' | '"') {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(match word.as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    w if w.len() > 1 && w.ends_with('*') => Token::Prefix(w.trim_end_matches('*').to_string()),
                    _ => Token::Word(word),
                });
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn parse(mut self) -> Result<Query, String> {
        let q = self.or()?.ok_or("query has no searchable terms")?;
        if self.pos != self.tokens.len() {
            return Err(format!("unexpected token at {}", self.pos));
        }
        validate(&q, false)?;
        Ok(q)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, t: &Token) -> bool {
        if self.peek() == Some(t) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn starts_unit(&self) -> bool {
        matches!(self.peek(), Some(Token::Word(_) | Token::Prefix(_) | Token::Quoted(..) | Token::Open | Token::Not))
    }

    /// Adjacent units without an operator are alternatives.
    fn or(&mut self) -> Result<Option<Query>, String> {
        let mut parts = Vec::new();
        parts.extend(self.and()?);
        loop {
            if self.eat(&Token::Or) {
                if !self.starts_unit() {
                    return Err("dangling OR".into());
                }
            } else if !self.starts_unit() || self.peek() == Some(&Token::Not) {
                break;
            }
            parts.extend(self.and()?);
        }
        Ok(collapse(parts, Query::Or))
    }

    /// `a AND b` and `a NOT b` both bind tighter than alternation.
    fn and(&mut self) -> Result<Option<Query>, String> {
        let mut parts = Vec::new();
        parts.extend(self.unary()?);
        loop {
            if self.eat(&Token::And) {
                if !self.starts_unit() {
                    return Err("dangling AND".into());
                }
            } else if self.peek() != Some(&Token::Not) {
                break;
            }
            parts.extend(self.unary()?);
        }
        Ok(collapse(parts, Query::And))
    }

    fn unary(&mut self) -> Result<Option<Query>, String> {
        if self.eat(&Token::Not) {
            let inner = self.unary()?.ok_or("NOT needs an operand")?;
            return Ok(Some(Query::Not(Box::new(inner))));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Option<Query>, String> {
        let Some(token) = self.peek().cloned() else { return Err("unexpected end of query".into()) };
        self.pos += 1;
        match token {
            Token::Open => {
                let inner = self.or()?;
                if !self.eat(&Token::Close) {
                    return Err("unbalanced parenthesis".into());
                }
                Ok(inner)
            }
            Token::Word(w) => Ok(phrase_or_term(tokenize(&w), 0)),
            Token::Prefix(p) => {
                let mut toks = tokenize(&p);
                match toks.len() {
                    0 => Ok(None),
                    1 => Ok(toks.pop().map(|(_, t)| Query::Prefix(t))),
                    _ => Err("prefix must be a single word".into()),
                }
            }
            Token::Quoted(body, slop) => Ok(phrase_or_term(tokenize(&body), slop)),
            other => Err(format!("unexpected {other:?}")),
        }
    }
}

fn collapse(mut parts: Vec<Query>, wrap: fn(Vec<Query>) -> Query) -> Option<Query> {
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(wrap(parts)),
    }
}

/// `Not` must sit in an `And` that also has a positive clause.
fn validate(q: &Query, in_and: bool) -> Result<(), String> {
    match q {
        Query::Not(inner) if in_and => validate(inner, false),
        Query::Not(_) => Err("NOT needs a positive clause beside it".into()),
        Query::And(qs) => {
            if qs.iter().all(|q| matches!(q, Query::Not(_))) {
                return Err("NOT needs a positive clause beside it".into());
            }
            qs.iter().try_for_each(|q| validate(q, true))
        }
        Query::Or(qs) => qs.iter().try_for_each(|q| validate(q, false)),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(t: &str) -> Query {
        Query::Term(t.into())
    }

    #[test]
    fn natural_language_becomes_phrase_with_or_fallback() {
        let plan = analyze("parse the config file");
        assert_eq!(plan.kind, QueryKind::Natural);
        assert_eq!(
            plan.primary,
            Some(Query::Phrase { terms: vec![(0, "parse".into()), (2, "config".into()), (3, "file".into())], slop: 0 })
        );
        assert_eq!(plan.fallback, Some(Query::Or(vec![term("parse"), term("config"), term("file")])));
    }

    #[test]
    fn single_word_is_a_term() {
        let plan = analyze("Tokenizer");
        assert_eq!(plan.primary, Some(term("tokenizer")));
        assert_eq!(plan.fallback, None);
    }

    #[test]
    fn boolean_operators_are_passed_through() {
        let plan = analyze("embed* AND (lance OR tantivy) NOT legacy");
        assert_eq!(plan.kind, QueryKind::Operators);
        assert_eq!(
            plan.primary,
            Some(Query::And(vec![
                Query::Prefix("embed".into()),
                Query::Or(vec![term("lance"), term("tantivy")]),
                Query::Not(Box::new(term("legacy"))),
            ]))
        );
    }

    #[test]
    fn proximity_phrase_keeps_slop() {
        let plan = analyze("\"index writer\"~3");
        assert_eq!(
            plan.primary,
            Some(Query::Phrase { terms: vec![(0, "index".into()), (1, "writer".into())], slop: 3 })
        );
    }

    #[test]
    fn malformed_queries_degrade_to_substring() {
        for raw in ["\"unterminated phrase", "(open AND", "NOT alone", "foo AND"] {
            let plan = analyze(raw);
            assert_eq!(plan.kind, QueryKind::Substring, "{raw}");
        }
        assert_eq!(analyze("(open AND").primary, Some(Query::Substring(vec!["open".into()])));
    }

    #[test]
    fn stop_word_only_query_falls_back_to_substring() {
        let plan = analyze("the");
        assert_eq!(plan.primary, Some(Query::Substring(vec!["the".into()])));
    }

    #[test]
    fn positive_terms_skip_negations() {
        let q = analyze("alpha NOT beta").primary.expect("query");
        assert_eq!(q.positive_terms(), vec!["alpha".to_string()]);
    }
}
