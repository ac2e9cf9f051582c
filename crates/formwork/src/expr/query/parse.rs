use chumsky::{input::ValueInput, pratt::*, prelude::*};

use super::lexer::Token;
use super::{BinaryOp, Expr};

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary { op, left: Box::new(left), right: Box::new(right) }
}

pub fn parser<'code, I>()
-> impl Parser<'code, I, Expr, extra::Err<Rich<'code, Token<'code>, SimpleSpan>>>
where
    I: ValueInput<'code, Token = Token<'code>, Span = SimpleSpan>,
{
    let expression = recursive(|expression| {
        let ident = select! { Token::Ident(name) => name.to_string() };

        let literal = select! {
            Token::Null => Expr::Null,
            Token::True => Expr::Bool(true),
            Token::False => Expr::Bool(false),
            Token::Number(number) => Expr::Number(number),
            Token::Text(text) => Expr::Text(text.to_string()),
        };

        // $name(args): the function namespace is flat and call-only.
        let call = just(Token::Dollar)
            .ignore_then(ident)
            .then(
                expression
                    .clone()
                    .separated_by(just(Token::Comma))
                    .collect()
                    .delimited_by(just(Token::ParenOpen), just(Token::ParenClose)),
            )
            .map(|(name, args)| Expr::Call { name, args });

        // $.a.b from the data root; bare $ is the root itself.
        let root_path = just(Token::Dollar)
            .ignore_then(
                just(Token::Dot)
                    .ignore_then(ident)
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .map(|segments| Expr::Path { from_root: true, segments });

        // a.b.c relative to the evaluating node.
        let relative_path = ident
            .separated_by(just(Token::Dot))
            .at_least(1)
            .collect::<Vec<_>>()
            .map(|segments| Expr::Path { from_root: false, segments });

        let nested = expression
            .clone()
            .delimited_by(just(Token::ParenOpen), just(Token::ParenClose));

        let atom = choice((literal, call, root_path, relative_path, nested));

        let operand = atom.pratt((
            prefix(8, just(Token::Minus), |_, rhs, _| Expr::Negate(Box::new(rhs))),
            // Precedence 7: multiplicative
            infix(left(7), just(Token::Asterisk), |l, _, r, _| binary(BinaryOp::Multiply, l, r)),
            infix(left(7), just(Token::Slash), |l, _, r, _| binary(BinaryOp::Divide, l, r)),
            infix(left(7), just(Token::Percent), |l, _, r, _| binary(BinaryOp::Modulo, l, r)),
            // Precedence 6: additive
            infix(left(6), just(Token::Plus), |l, _, r, _| binary(BinaryOp::Add, l, r)),
            infix(left(6), just(Token::Minus), |l, _, r, _| binary(BinaryOp::Subtract, l, r)),
            // Precedence 5: string concatenation
            infix(left(5), just(Token::Ampersand), |l, _, r, _| binary(BinaryOp::Concat, l, r)),
            // Precedence 4: comparisons
            infix(left(4), just(Token::Equal), |l, _, r, _| binary(BinaryOp::Equal, l, r)),
            infix(left(4), just(Token::NotEqual), |l, _, r, _| binary(BinaryOp::NotEqual, l, r)),
            infix(left(4), just(Token::Less), |l, _, r, _| binary(BinaryOp::Less, l, r)),
            infix(left(4), just(Token::LessOrEqual), |l, _, r, _| {
                binary(BinaryOp::LessOrEqual, l, r)
            }),
            infix(left(4), just(Token::Greater), |l, _, r, _| binary(BinaryOp::Greater, l, r)),
            infix(left(4), just(Token::GreaterOrEqual), |l, _, r, _| {
                binary(BinaryOp::GreaterOrEqual, l, r)
            }),
            // Precedence 3: membership
            infix(left(3), just(Token::In), |l, _, r, _| binary(BinaryOp::In, l, r)),
            // Precedence 2..1: boolean connectives
            infix(left(2), just(Token::And), |l, _, r, _| binary(BinaryOp::And, l, r)),
            infix(left(1), just(Token::Or), |l, _, r, _| binary(BinaryOp::Or, l, r)),
        ));

        // Conditional binds loosest: `cond ? then : else`, else optional.
        operand
            .then(
                just(Token::Question)
                    .ignore_then(expression.clone())
                    .then(just(Token::Colon).ignore_then(expression).or_not())
                    .or_not(),
            )
            .map(|(condition, tail)| match tail {
                None => condition,
                Some((then_branch, else_branch)) => Expr::Conditional {
                    condition: Box::new(condition),
                    then_branch: Box::new(then_branch),
                    else_branch: else_branch.map(Box::new),
                },
            })
    });

    expression.then_ignore(end())
}
