use std::fmt;

use chumsky::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Token<'code> {
    Ident(&'code str),
    Number(f64),
    Text(&'code str),
    Dollar,
    Dot,
    ParenOpen,
    ParenClose,
    Comma,
    Question,
    Colon,
    NotEqual,
    LessOrEqual,
    GreaterOrEqual,
    Less,
    Greater,
    Equal,
    Ampersand,
    Plus,
    Minus,
    Asterisk,
    Slash,
    Percent,
    And,
    Or,
    In,
    True,
    False,
    Null,
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            Token::Ident(name) => name,
            Token::Number(number) => return write!(f, "{number}"),
            Token::Text(text) => return write!(f, "'{text}'"),
            Token::Dollar => "$",
            Token::Dot => ".",
            Token::ParenOpen => "(",
            Token::ParenClose => ")",
            Token::Comma => ",",
            Token::Question => "?",
            Token::Colon => ":",
            Token::NotEqual => "!=",
            Token::LessOrEqual => "<=",
            Token::GreaterOrEqual => ">=",
            Token::Less => "<",
            Token::Greater => ">",
            Token::Equal => "=",
            Token::Ampersand => "&",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Asterisk => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::And => "and",
            Token::Or => "or",
            Token::In => "in",
            Token::True => "true",
            Token::False => "false",
            Token::Null => "null",
        };
        write!(f, "{text}")
    }
}

pub fn lexer<'code>()
-> impl Parser<'code, &'code str, Vec<(Token<'code>, SimpleSpan)>, extra::Err<Rich<'code, char>>> {
    let number = text::int(10)
        .then(just('.').then(text::digits(10)).or_not())
        .to_slice()
        .from_str()
        .unwrapped()
        .map(Token::Number);

    let single_quoted = just('\'')
        .ignore_then(none_of('\'').repeated().to_slice())
        .then_ignore(just('\''));
    let double_quoted = just('"')
        .ignore_then(none_of('"').repeated().to_slice())
        .then_ignore(just('"'));
    let text_literal = single_quoted.or(double_quoted).map(Token::Text);

    let word = any()
        .filter(|character: &char| character.is_ascii_alphabetic() || *character == '_')
        .then(
            any()
                .filter(|character: &char| character.is_ascii_alphanumeric() || *character == '_')
                .repeated(),
        )
        .to_slice()
        .map(|word: &str| match word {
            "and" => Token::And,
            "or" => Token::Or,
            "in" => Token::In,
            "true" => Token::True,
            "false" => Token::False,
            "null" => Token::Null,
            identifier => Token::Ident(identifier),
        });

    let operator = choice((
        just("!=").to(Token::NotEqual),
        just("<=").to(Token::LessOrEqual),
        just(">=").to(Token::GreaterOrEqual),
        just('<').to(Token::Less),
        just('>').to(Token::Greater),
        just('=').to(Token::Equal),
        just('&').to(Token::Ampersand),
        just('+').to(Token::Plus),
        just('-').to(Token::Minus),
        just('*').to(Token::Asterisk),
        just('/').to(Token::Slash),
        just('%').to(Token::Percent),
        just('$').to(Token::Dollar),
        just('.').to(Token::Dot),
        just('(').to(Token::ParenOpen),
        just(')').to(Token::ParenClose),
        just(',').to(Token::Comma),
        just('?').to(Token::Question),
        just(':').to(Token::Colon),
    ));

    let token = choice((number, text_literal, word, operator));

    token
        .map_with(|token, extra| (token, extra.span()))
        .padded()
        .repeated()
        .collect()
        .then_ignore(end())
}
