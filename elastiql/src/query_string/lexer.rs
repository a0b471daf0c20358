//! Query-string tokenizer

use nom::{
    branch::alt,
    bytes::complete::{escaped, is_not, tag, take_while1},
    character::complete::{anychar, char, digit1, multispace0, one_of},
    combinator::{map, not, opt, peek, recognize, value},
    multi::{many0, many1},
    number::complete::recognize_float,
    sequence::{delimited, pair, preceded, terminated},
    IResult,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    LParen,
    RParen,
    Plus,
    Minus,
    Not,
    And,
    Or,
    To,
    /// A field name; the trailing `:` is consumed
    Field(String),
    /// A bare term, backslash escapes preserved
    Term(String),
    /// A quoted phrase, escapes removed
    Phrase(String),
    Regex(String),
    RangeOpen { inclusive: bool },
    RangeClose { inclusive: bool },
    Compare(String),
    Boost(f64),
    Fuzzy(Option<f64>),
}

fn is_term_char(c: char) -> bool {
    !c.is_whitespace() && !"()[]{}:^~\"".contains(c)
}

/// A term is a run of ordinary characters or backslash escapes
fn raw_term(input: &str) -> IResult<&str, &str> {
    recognize(many1_term_part)(input)
}

fn many1_term_part(input: &str) -> IResult<&str, Vec<&str>> {
    let part = alt((
        recognize(pair(char('\\'), anychar)),
        take_while1(|c: char| is_term_char(c) && c != '\\'),
    ));
    many1(part)(input)
}

fn field(input: &str) -> IResult<&str, Token> {
    map(terminated(raw_term, char(':')), |f: &str| {
        Token::Field(f.replace('\\', ""))
    })(input)
}

fn phrase(input: &str) -> IResult<&str, Token> {
    map(
        delimited(
            char('"'),
            opt(escaped(is_not("\\\""), '\\', anychar)),
            char('"'),
        ),
        |s: Option<&str>| Token::Phrase(unescape(s.unwrap_or(""))),
    )(input)
}

fn regex(input: &str) -> IResult<&str, Token> {
    map(
        delimited(
            char('/'),
            opt(escaped(is_not("\\/"), '\\', anychar)),
            char('/'),
        ),
        |s: Option<&str>| Token::Regex(s.unwrap_or("").to_string()),
    )(input)
}

/// Keywords must stand alone, so `ANDROID` stays a term
fn word_end(input: &str) -> IResult<&str, ()> {
    peek(not(take_while1(is_term_char)))(input)
}

fn keyword(input: &str) -> IResult<&str, Token> {
    let end = word_end;
    alt((
        value(Token::And, terminated(tag("AND"), end)),
        value(Token::Or, terminated(tag("OR"), end)),
        value(Token::Not, terminated(tag("NOT"), end)),
        value(Token::To, terminated(tag("TO"), end)),
        value(Token::And, tag("&&")),
        value(Token::Or, tag("||")),
    ))(input)
}

fn punctuation(input: &str) -> IResult<&str, Token> {
    alt((
        value(Token::LParen, char('(')),
        value(Token::RParen, char(')')),
        value(Token::RangeOpen { inclusive: true }, char('[')),
        value(Token::RangeOpen { inclusive: false }, char('{')),
        value(Token::RangeClose { inclusive: true }, char(']')),
        value(Token::RangeClose { inclusive: false }, char('}')),
        value(Token::Not, char('!')),
    ))(input)
}

fn compare(input: &str) -> IResult<&str, Token> {
    map(alt((tag(">="), tag("<="), tag(">"), tag("<"))), |op: &str| {
        Token::Compare(op.to_string())
    })(input)
}

fn modifier(input: &str) -> IResult<&str, Token> {
    alt((
        value(Token::Plus, char('+')),
        value(Token::Minus, terminated(char('-'), peek(not(one_of(" \t\r\n"))))),
    ))(input)
}

fn boost(input: &str) -> IResult<&str, Token> {
    map(preceded(char('^'), recognize_float), |n: &str| {
        Token::Boost(n.parse().unwrap_or(1.0))
    })(input)
}

fn fuzzy(input: &str) -> IResult<&str, Token> {
    map(
        preceded(char('~'), opt(recognize(pair(digit1, opt(pair(char('.'), digit1)))))),
        |n: Option<&str>| Token::Fuzzy(n.and_then(|n| n.parse().ok())),
    )(input)
}

fn term(input: &str) -> IResult<&str, Token> {
    map(raw_term, |t: &str| Token::Term(t.to_string()))(input)
}

fn token(input: &str) -> IResult<&str, Token> {
    alt((
        punctuation,
        phrase,
        regex,
        compare,
        boost,
        fuzzy,
        keyword,
        field,
        modifier,
        term,
    ))(input)
}

/// Tokenize a query string; whitespace separates tokens
pub fn tokenize(input: &str) -> IResult<&str, Vec<Token>> {
    terminated(many0(preceded(multispace0, token)), multispace0)(input)
}

/// Remove backslash escapes
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(input: &str) -> Vec<Token> {
        let (rest, tokens) = tokenize(input).unwrap();
        assert_eq!(rest, "", "unconsumed input for {:?}", input);
        tokens
    }

    #[test]
    fn test_tokenize_terms_and_modifiers() {
        assert_eq!(
            lex("test +foo -abc"),
            vec![
                Token::Term("test".into()),
                Token::Plus,
                Token::Term("foo".into()),
                Token::Minus,
                Token::Term("abc".into()),
            ]
        );
    }

    #[test]
    fn test_tokenize_hyphenated_term() {
        assert_eq!(
            lex("9166ddf7-10b5-42fb-91cf-198eb4d62a3f"),
            vec![Token::Term("9166ddf7-10b5-42fb-91cf-198eb4d62a3f".into())]
        );
    }

    #[test]
    fn test_tokenize_range() {
        assert_eq!(
            lex("count:[1 TO 5}"),
            vec![
                Token::Field("count".into()),
                Token::RangeOpen { inclusive: true },
                Token::Term("1".into()),
                Token::To,
                Token::Term("5".into()),
                Token::RangeClose { inclusive: false },
            ]
        );
    }

    #[test]
    fn test_tokenize_phrase_regex_and_suffixes() {
        assert_eq!(
            lex(r#"path:/se.rch/ "a \"b\"" foo~2 bar^3"#),
            vec![
                Token::Field("path".into()),
                Token::Regex("se.rch".into()),
                Token::Phrase("a \"b\"".into()),
                Token::Term("foo".into()),
                Token::Fuzzy(Some(2.0)),
                Token::Term("bar".into()),
                Token::Boost(3.0),
            ]
        );
    }

    #[test]
    fn test_tokenize_operators() {
        assert_eq!(
            lex("a AND b || NOT c ANDROID"),
            vec![
                Token::Term("a".into()),
                Token::And,
                Token::Term("b".into()),
                Token::Or,
                Token::Not,
                Token::Term("c".into()),
                Token::Term("ANDROID".into()),
            ]
        );
    }

    #[test]
    fn test_tokenize_compare_and_exists() {
        assert_eq!(
            lex("test:>=10 _exists_:foo"),
            vec![
                Token::Field("test".into()),
                Token::Compare(">=".into()),
                Token::Term("10".into()),
                Token::Field("_exists_".into()),
                Token::Term("foo".into()),
            ]
        );
    }
}
