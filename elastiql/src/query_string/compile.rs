//! Lower a parsed query string to a SQL predicate

use super::lexer::unescape;
use super::parser::{CompareOp, FieldExpr, QsExpr, QsValue};
use crate::context::QueryContext;
use crate::error::{Result, TranslateError};
use crate::literal::Literal;
use crate::mapping::format::format_in;
use crate::mapping::FieldRef;
use crate::query::text::{
    text_match, TextValue, MODE_CONTAINS, MODE_KEYWORD, MODE_KEYWORD_IGNORE_CASE,
};
use crate::sql::{BinaryOp, Expr, UnaryOp};

pub fn compile(ctx: &QueryContext, expr: &QsExpr, default_field: &[String]) -> Result<Expr> {
    Ok(match expr {
        QsExpr::And(l, r) => Expr::and(compile(ctx, l, default_field)?, compile(ctx, r, default_field)?),
        QsExpr::Or(l, r) => Expr::or(compile(ctx, l, default_field)?, compile(ctx, r, default_field)?),
        QsExpr::Not(e) => Expr::not(compile(ctx, e, default_field)?),
        QsExpr::Field(fe) => compile_field(ctx, fe, default_field)?,
    })
}

fn compile_field(ctx: &QueryContext, fe: &FieldExpr, default_field: &[String]) -> Result<Expr> {
    let match_all = fe.op == CompareOp::Eq && matches!(&fe.value, QsValue::Text(t) if t == "*");
    if match_all && fe.field.is_none() {
        return Ok(Expr::lit(true));
    }

    let parts = fe.field.as_deref().unwrap_or(default_field);
    if parts.iter().all(|p| p.is_empty()) {
        return Err(TranslateError::malformed("no fieldname set"));
    }
    let field = FieldRef::resolve_parts(ctx, parts);

    let op = match fe.op {
        CompareOp::Exists => return Ok(Expr::unary(UnaryOp::IsNotMissing, Expr::Field(field))),
        CompareOp::Eq => BinaryOp::Eq,
        CompareOp::Lt => BinaryOp::Lt,
        CompareOp::Le => BinaryOp::Le,
        CompareOp::Gt => BinaryOp::Gt,
        CompareOp::Ge => BinaryOp::Ge,
    };

    if op != BinaryOp::Eq {
        let literal = match &fe.value {
            QsValue::Regex(_) => return Err(TranslateError::malformed("invalid regex operator")),
            QsValue::Text(t) => Literal::String(unescape(t)),
            QsValue::Phrase(t) => Literal::String(t.clone()),
            QsValue::Int(i) => Literal::Int(*i),
            QsValue::Float(f) => Literal::Float(*f),
        };
        return compare(ctx, field, op, literal);
    }

    match &fe.value {
        QsValue::Text(_) if match_all => Ok(Expr::unary(UnaryOp::IsNotMissing, Expr::Field(field))),
        QsValue::Text(t) if t.eq_ignore_ascii_case("true") || t.eq_ignore_ascii_case("false") => {
            compare(ctx, field, op, Literal::Bool(t.eq_ignore_ascii_case("true")))
        }
        QsValue::Text(t) => match text_match(ctx, &field, TextValue::Term(t)) {
            Some(e) => Ok(e),
            None => compare(ctx, field, op, Literal::String(unescape(t))),
        },
        QsValue::Phrase(t) => match text_match(ctx, &field, TextValue::Phrase(t)) {
            Some(e) => Ok(e),
            None => compare(ctx, field, op, Literal::String(t.clone())),
        },
        QsValue::Regex(r) => text_match(ctx, &field, TextValue::Regex(r))
            .ok_or_else(|| TranslateError::malformed("invalid regex operator")),
        QsValue::Int(_) | QsValue::Float(_) => {
            let literal = match fe.value {
                QsValue::Int(i) => Literal::Int(i),
                QsValue::Float(f) => Literal::Float(f),
                _ => Literal::Null,
            };
            // keyword-like fields hold the number as text
            let mode = field.field_type(ctx);
            if [MODE_KEYWORD, MODE_KEYWORD_IGNORE_CASE, MODE_CONTAINS].contains(&mode.as_str()) {
                let text = literal.to_string();
                if let Some(e) = text_match(ctx, &field, TextValue::Term(&text)) {
                    return Ok(e);
                }
            }
            compare(ctx, field, op, literal)
        }
    }
}

fn compare(ctx: &QueryContext, field: FieldRef, op: BinaryOp, literal: Literal) -> Result<Expr> {
    let value = format_in(ctx, &field.key, literal)?;
    Ok(Expr::binary(op, Expr::Field(field), Expr::Literal(value)))
}

#[cfg(test)]
mod tests {
    use crate::context::QueryContext;
    use crate::mapping::TypeMapping;
    use crate::query_string::{translate, DefaultOperator};
    use crate::sql::print_expr;

    fn ctx() -> QueryContext {
        QueryContext::new("test")
            .with_mapping("timestamp", TypeMapping::new("datetime"))
            .with_mapping(
                "u_*",
                TypeMapping::new("text")
                    .with_field("keyword", "keyword")
                    .with_field("raw", "keyword-ignore-case"),
            )
            .with_mapping("code", TypeMapping::new("keyword"))
    }

    fn run(query: &str) -> String {
        let expr = translate(&ctx(), query, &["default".to_string()], DefaultOperator::Or)
            .unwrap()
            .unwrap();
        print_expr(&expr)
    }

    fn word(field: &str, term: &str) -> String {
        format!(r#"("$source"."{}" ~ '(^|[ \t])(?i){}([ \t]|$)')"#, field, term)
    }

    #[test]
    fn test_single_terms() {
        assert_eq!(run("foo"), word("default", "foo"));
        assert_eq!(run("foo~"), word("default", "foo"));
        assert_eq!(run("foo~12"), word("default", "foo"));
        assert_eq!(run("foo^32"), word("default", "foo"));
        assert_eq!(run("f*o"), word("default", "f.*o"));
        assert_eq!(run("f?o"), word("default", "f.o"));
        assert_eq!(
            run("9166ddf7-10b5-42fb-91cf-198eb4d62a3f"),
            word("default", "9166ddf7-10b5-42fb-91cf-198eb4d62a3f")
        );
    }

    #[test]
    fn test_modifiers() {
        assert_eq!(
            run("test +foo -abc"),
            format!("({} AND (NOT {}))", word("default", "foo"), word("default", "abc"))
        );
    }

    #[test]
    fn test_boolean_operators() {
        assert_eq!(
            run("test AND foo"),
            format!("({} AND {})", word("default", "test"), word("default", "foo"))
        );
        assert_eq!(
            run("test OR foo"),
            format!("({} OR {})", word("default", "test"), word("default", "foo"))
        );
        assert_eq!(
            run("test AND (foo OR bar)"),
            format!(
                "({} AND ({} OR {}))",
                word("default", "test"),
                word("default", "foo"),
                word("default", "bar")
            )
        );
        assert_eq!(
            run("test AND u_boolean_allow:true AND u_string_reason:foo"),
            format!(
                r#"(({} AND ("$source"."u_boolean_allow" = TRUE)) AND {})"#,
                word("default", "test"),
                word("u_string_reason", "foo")
            )
        );
    }

    #[test]
    fn test_exists_and_booleans() {
        assert_eq!(run("_exists_:foo"), r#"("$source"."foo" IS NOT MISSING)"#);
        assert_eq!(run("u_boolean_allowed:true"), r#"("$source"."u_boolean_allowed" = TRUE)"#);
        assert_eq!(run("u_name:*"), r#"("$source"."u_name" IS NOT MISSING)"#);
        assert_eq!(run("*"), "TRUE");
    }

    #[test]
    fn test_regex() {
        assert_eq!(
            run("u_string_path.raw:/search/ path"),
            format!(
                r#"(("$source"."u_string_path" ~ '^(?i)search$') OR {})"#,
                word("default", "path")
            )
        );
        assert_eq!(
            run("u_string_path:/search/ path"),
            format!(
                r#"((LOWER("$source"."u_string_path") ~ '(^|[ \t])search([ \t]|$)') OR {})"#,
                word("default", "path")
            )
        );
        assert_eq!(
            run("u_string_name:/joh?n(ath[oa]n)/"),
            r#"(LOWER("$source"."u_string_name") ~ '(^|[ \t])joh?n(ath[oa]n)([ \t]|$)')"#
        );
    }

    #[test]
    fn test_ranges() {
        assert_eq!(
            run("u_integer_count:[1 TO 5}"),
            r#"(("$source"."u_integer_count" >= 1) AND ("$source"."u_integer_count" < 5))"#
        );
        assert_eq!(run("test:>=10"), r#"("$source"."test" >= 10)"#);
        assert_eq!(run("<10"), r#"("$source"."default" < 10)"#);
        assert_eq!(
            run("age:(+>=10 +<20)"),
            r#"(("$source"."age" >= 10) AND ("$source"."age" < 20))"#
        );
        assert_eq!(
            run("age:(abc def)^3"),
            format!("({} OR {})", word("age", "abc"), word("age", "def"))
        );
    }

    #[test]
    fn test_timestamp_range() {
        assert_eq!(
            run(r#"timestamp:["2019-07-24T01:02:03-07:00" TO "2019-07-25T04:05:06-07:00"}"#),
            r#"(("$source"."timestamp" >= `2019-07-24T08:02:03Z`) AND ("$source"."timestamp" < `2019-07-25T11:05:06Z`))"#
        );
    }

    #[test]
    fn test_keyword_number() {
        assert_eq!(run("code:200"), r#"("$source"."code" = '200')"#);
        assert_eq!(run("status:200"), r#"("$source"."status" = 200)"#);
    }

    #[test]
    fn test_errors() {
        let ctx = ctx();
        assert!(translate(&ctx, "foo", &[], DefaultOperator::Or).is_err());
        assert_eq!(
            translate(&ctx, "*", &[], DefaultOperator::Or).unwrap(),
            Some(crate::sql::Expr::lit(true))
        );
        assert!(translate(&ctx, "x:>/re/", &["d".to_string()], DefaultOperator::Or).is_err());
        assert!(translate(&ctx, "(foo", &["d".to_string()], DefaultOperator::Or).is_err());
    }
}
