// Parser for symbolic expression and range text.
//
// Parses a token stream (from the lexer) into `symbolic::Expr` trees, and
// comma-separated range lists (`0:N:32, i`) into per-dimension expression
// tuples. Uses chumsky combinators.
//
// Preconditions: input is expression text as persisted in SDFG documents.
// Postconditions: returns an unsimplified expression tree.
// Failure modes: lex or syntax errors → `SdfgError::Parse` carrying every
//   message chumsky produced.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::error::SdfgError;
use crate::lexer::Token;
use crate::symbolic::Expr;

/// One range dimension as written: `start[:end[:step[:tile]]]`.
pub type RawDim = Vec<Expr>;

/// Parse a single expression.
pub fn parse_expr(text: &str) -> Result<Expr, SdfgError> {
    let tokens = lex_checked(text)?;
    let len = text.len();

    let token_iter = tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    expr_parser()
        .then_ignore(end())
        .parse(stream)
        .into_result()
        .map_err(|errs| parse_error(text, errs))
}

/// Parse a comma-separated list of range dimensions.
pub fn parse_dims(text: &str) -> Result<Vec<RawDim>, SdfgError> {
    let tokens = lex_checked(text)?;
    let len = text.len();

    let token_iter = tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    dims_parser()
        .then_ignore(end())
        .parse(stream)
        .into_result()
        .map_err(|errs| parse_error(text, errs))
}

fn lex_checked(text: &str) -> Result<Vec<(Token, crate::lexer::Span)>, SdfgError> {
    let lexed = crate::lexer::lex(text);
    if let Some(first) = lexed.errors.first() {
        return Err(SdfgError::Parse {
            text: text.to_string(),
            message: first.message.clone(),
        });
    }
    Ok(lexed.tokens)
}

fn parse_error(text: &str, errs: Vec<Rich<'_, Token, SimpleSpan>>) -> SdfgError {
    let message = errs
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    SdfgError::Parse {
        text: text.to_string(),
        message,
    }
}

// ── Grammar ──
//
//   expr    := product (('+' | '-') product)*
//   product := unary (('*' | '/' | '//' | '%') unary)*
//   unary   := '-' unary | power
//   power   := atom ('**' INT)?
//   atom    := INT | IDENT | IDENT '(' expr (',' expr)* ')' | '(' expr ')'

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    FloorDiv,
    Mod,
}

impl BinOp {
    fn apply(self, lhs: Expr, rhs: Expr) -> Expr {
        match self {
            BinOp::Add => Expr::add(lhs, rhs),
            BinOp::Sub => Expr::sub(lhs, rhs),
            BinOp::Mul => Expr::mul(lhs, rhs),
            BinOp::FloorDiv => Expr::floor_div(lhs, rhs),
            BinOp::Mod => Expr::modulo(lhs, rhs),
        }
    }
}

fn expr_parser<'tokens, I>(
) -> impl Parser<'tokens, I, Expr, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    recursive(|expr| {
        let args = expr
            .clone()
            .separated_by(just(Token::Comma))
            .at_least(1)
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let ident = select! { Token::Ident(name) => name };

        let call_or_symbol = ident.then(args.or_not()).try_map(
            |(name, args): (String, Option<Vec<Expr>>), span| match args {
                None => Ok(Expr::Sym(name)),
                Some(args) => build_call(&name, args).map_err(|msg| Rich::custom(span, msg)),
            },
        );

        let int = select! { Token::Int(n) => Expr::Int(n) };

        let atom = int
            .or(call_or_symbol)
            .or(expr
                .clone()
                .delimited_by(just(Token::LParen), just(Token::RParen)));

        let exponent = just(Token::StarStar).ignore_then(select! { Token::Int(n) => n });

        let power = atom.then(exponent.or_not()).try_map(
            |(base, exp): (Expr, Option<i64>), span| match exp {
                None => Ok(base),
                Some(n) => u32::try_from(n)
                    .map(|k| Expr::Pow(Box::new(base), k))
                    .map_err(|_| Rich::custom(span, "exponent out of range")),
            },
        );

        let unary = just(Token::Minus)
            .repeated()
            .foldr(power, |_, e: Expr| Expr::Neg(Box::new(e)));

        let product_op = choice((
            just(Token::Star).to(BinOp::Mul),
            just(Token::SlashSlash).to(BinOp::FloorDiv),
            just(Token::Slash).to(BinOp::FloorDiv),
            just(Token::Percent).to(BinOp::Mod),
        ));

        let product = unary.clone().foldl(
            product_op.then(unary).repeated(),
            |lhs: Expr, (op, rhs): (BinOp, Expr)| op.apply(lhs, rhs),
        );

        let sum_op = choice((
            just(Token::Plus).to(BinOp::Add),
            just(Token::Minus).to(BinOp::Sub),
        ));

        product.clone().foldl(
            sum_op.then(product).repeated(),
            |lhs: Expr, (op, rhs): (BinOp, Expr)| op.apply(lhs, rhs),
        )
    })
}

fn dims_parser<'tokens, I>(
) -> impl Parser<'tokens, I, Vec<RawDim>, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let dim = expr_parser()
        .separated_by(just(Token::Colon))
        .at_least(1)
        .at_most(4)
        .collect::<Vec<_>>();

    dim.separated_by(just(Token::Comma))
        .at_least(1)
        .collect::<Vec<_>>()
}

/// Map a function name and its arguments onto an expression node.
fn build_call(name: &str, mut args: Vec<Expr>) -> Result<Expr, String> {
    let arity = |n: usize| -> Result<(), String> {
        if args.len() == n {
            Ok(())
        } else {
            Err(format!("`{name}` takes {n} argument(s), got {}", args.len()))
        }
    };
    match name {
        // `ceil(a/b)`: the argument is a division; an integer argument is
        // already its own ceiling.
        "ceil" | "ceiling" | "floor" => {
            arity(1)?;
            let arg = args.remove(0);
            Ok(match (name, arg) {
                ("floor", e) => e,
                (_, Expr::FloorDiv(a, b)) => Expr::CeilDiv(a, b),
                (_, e) => e,
            })
        }
        "int_ceil" => {
            arity(2)?;
            let b = args.remove(1);
            Ok(Expr::ceil_div(args.remove(0), b))
        }
        "int_floor" => {
            arity(2)?;
            let b = args.remove(1);
            Ok(Expr::floor_div(args.remove(0), b))
        }
        "Mod" | "mod" => {
            arity(2)?;
            let b = args.remove(1);
            Ok(Expr::modulo(args.remove(0), b))
        }
        "Min" | "min" => Ok(Expr::Min(args)),
        "Max" | "max" => Ok(Expr::Max(args)),
        _ => Err(format!("unknown function `{name}`")),
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn p(text: &str) -> Expr {
        parse_expr(text).unwrap_or_else(|e| panic!("parse `{text}`: {e}"))
    }

    #[test]
    fn precedence() {
        assert_eq!(
            p("1 + 2 * N"),
            Expr::add(Expr::Int(1), Expr::mul(Expr::Int(2), Expr::sym("N")))
        );
        assert_eq!(
            p("(1 + 2) * N"),
            Expr::mul(Expr::add(Expr::Int(1), Expr::Int(2)), Expr::sym("N"))
        );
    }

    #[test]
    fn subtraction_is_left_associative() {
        assert_eq!(
            p("N - 1 - 2"),
            Expr::sub(Expr::sub(Expr::sym("N"), Expr::Int(1)), Expr::Int(2))
        );
    }

    #[test]
    fn unary_minus_and_power() {
        assert_eq!(p("-N"), Expr::Neg(Box::new(Expr::sym("N"))));
        assert_eq!(p("N**2"), Expr::Pow(Box::new(Expr::sym("N")), 2));
    }

    #[test]
    fn ceiling_forms() {
        let expected = Expr::ceil_div(Expr::sym("N"), Expr::Int(32));
        assert_eq!(p("ceil(N/32)"), expected);
        assert_eq!(p("ceiling(N/32)"), expected);
        assert_eq!(p("int_ceil(N, 32)"), expected);
        assert_eq!(p("floor(N/32)"), Expr::floor_div(Expr::sym("N"), Expr::Int(32)));
        assert_eq!(p("N // 32"), Expr::floor_div(Expr::sym("N"), Expr::Int(32)));
    }

    #[test]
    fn min_max_calls() {
        assert_eq!(
            p("min(N, 32)"),
            Expr::Min(vec![Expr::sym("N"), Expr::Int(32)])
        );
        assert!(matches!(p("max(a, b, c)"), Expr::Max(args) if args.len() == 3));
    }

    #[test]
    fn unknown_function_is_rejected() {
        let err = parse_expr("sqrt(N)").unwrap_err();
        assert!(err.to_string().contains("unknown function"), "{err}");
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        assert!(parse_expr("N +").is_err());
        assert!(parse_expr("N N").is_err());
        assert!(parse_expr("").is_err());
    }

    #[test]
    fn lex_error_is_reported() {
        let err = parse_expr("N $ 2").unwrap_err();
        assert!(matches!(err, SdfgError::Parse { .. }));
    }

    #[test]
    fn dims() {
        let dims = parse_dims("0:N:32, i + j").unwrap();
        assert_eq!(dims.len(), 2);
        assert_eq!(dims[0], vec![Expr::Int(0), Expr::sym("N"), Expr::Int(32)]);
        assert_eq!(dims[1].len(), 1);
    }

    #[test]
    fn dims_with_tile() {
        let dims = parse_dims("0:N:32:4").unwrap();
        assert_eq!(dims[0].len(), 4);
        assert!(parse_dims("0:1:2:3:4").is_err());
    }
}
