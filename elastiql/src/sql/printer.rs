//! Deterministic SQL rendering
//!
//! The pretty form indents nested selects and puts every projection on its
//! own line. The compact form collapses all line breaks into single spaces.

use super::{quote_ident, Expr, FromItem, OrderBy, Projection, Select, UnaryOp};
use crate::context::TableSource;
use crate::naming::{DEFAULT_SOURCE, NESTED_ALIAS};

pub struct Printer {
    pretty: bool,
    indent: usize,
    spaces: usize,
    stack: Vec<usize>,
    out: String,
    inline: bool,
}

impl Printer {
    pub fn new(pretty: bool) -> Self {
        Self {
            pretty,
            indent: 2,
            spaces: 0,
            stack: Vec::new(),
            out: String::new(),
            inline: false,
        }
    }

    pub fn finish(self) -> String {
        self.out
    }

    fn level(&self) -> usize {
        self.stack.len()
    }

    fn push(&mut self) {
        self.push_n(self.indent);
    }

    fn push_n(&mut self, n: usize) {
        self.spaces += n;
        self.stack.push(self.spaces);
    }

    fn push_str(&mut self, text: &str) {
        self.write(text);
        self.push_n(text.len());
    }

    fn pop(&mut self) {
        if self.stack.len() > 1 {
            self.stack.pop();
            self.spaces = self.stack.last().copied().unwrap_or(0);
        } else {
            self.stack.clear();
            self.spaces = 0;
        }
    }

    fn write(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.indent_if_needed(text);
        self.out.push_str(text);
        self.inline = true;
    }

    fn indent_if_needed(&mut self, text: &str) {
        if self.inline {
            return;
        }
        if self.pretty {
            self.out.extend(std::iter::repeat(' ').take(self.spaces));
        } else if !self.out.is_empty()
            && !self.out.ends_with(' ')
            && !self.out.ends_with('(')
            && !text.starts_with(')')
        {
            self.out.push(' ');
        }
    }

    fn newline(&mut self) {
        if self.inline {
            if self.pretty {
                self.out.push('\n');
            }
            self.inline = false;
        }
    }

    fn newline_n(&mut self, n: usize) {
        self.newline();
        if self.pretty {
            for _ in 1..n {
                self.out.push('\n');
            }
        }
    }

    pub fn select(&mut self, select: &Select) {
        if !select.with.is_empty() {
            self.write("WITH");
            self.newline();
            self.push();
            for (i, (alias, sub)) in select.with.iter().enumerate() {
                if i > 0 {
                    self.write(",");
                    self.newline_n(2);
                }
                self.write(&quote_ident(alias));
                self.write(" AS");
                self.push();
                self.newline();
                if sub.is_single_row() {
                    self.write("(SELECT [(");
                    self.push();
                    self.newline();
                    self.select(sub);
                    self.pop();
                    self.newline();
                    self.write(")])");
                } else {
                    self.push_str("(");
                    self.select(sub);
                    self.pop();
                    self.newline();
                    self.write(")");
                }
                self.pop();
            }
            self.pop();
            self.newline_n(2);
        }

        let top_level = self.level() == 0;
        if top_level {
            self.write("SELECT");
            self.newline();
            self.push();
        } else {
            self.push_str("SELECT ");
        }
        for (i, projection) in select.projection.iter().enumerate() {
            if i > 0 {
                self.write(",");
                if top_level {
                    self.newline_n(2);
                } else {
                    self.newline();
                }
            }
            self.projection(projection);
        }
        self.pop();

        if !select.from.is_empty() {
            self.newline();
            self.push_str("FROM ");
            for (i, item) in select.from.iter().enumerate() {
                if i > 0 {
                    self.write(",");
                    self.newline();
                }
                self.from_item(item);
            }
            self.pop();
        }

        if let Some(where_) = &select.where_ {
            self.newline();
            self.write("WHERE ");
            self.expr(where_);
        }

        if !select.group_by.is_empty() {
            self.newline();
            self.push_str("GROUP BY ");
            for (i, expr) in select.group_by.iter().enumerate() {
                if i > 0 {
                    self.write(",");
                    self.newline();
                }
                self.expr(expr);
            }
            self.pop();
        }

        if let Some(having) = &select.having {
            self.newline();
            self.write("HAVING ");
            self.expr(having);
        }

        if !select.order_by.is_empty() {
            self.newline();
            self.write("ORDER BY ");
            for (i, order) in select.order_by.iter().enumerate() {
                if i > 0 {
                    self.write(",");
                    self.newline();
                }
                self.order_by(order);
            }
        }

        if let Some(limit) = select.limit.filter(|l| *l > 0) {
            self.newline();
            self.write(&format!("LIMIT {}", limit));
        }
        if let Some(offset) = select.offset.filter(|o| *o > 0) {
            self.newline();
            self.write(&format!("OFFSET {}", offset));
        }
    }

    fn projection(&mut self, projection: &Projection) {
        let Some(alias) = &projection.alias else {
            self.expr(&projection.expr);
            return;
        };

        match &projection.expr {
            Expr::Select(sub) if sub.is_single_row() => {
                self.push_str("[(");
                self.select(sub);
                self.pop();
                self.write(")]");
            }
            Expr::Select(sub) => {
                self.push_str("(");
                self.select(sub);
                self.pop();
                self.newline();
                self.write(")");
            }
            Expr::Literal(_)
            | Expr::Field(_)
            | Expr::Function { .. }
            | Expr::Binary(..)
            | Expr::Unary(..)
            | Expr::Over { .. }
            | Expr::Ident(_) => self.expr(&projection.expr),
            other => {
                self.write("(");
                self.expr(other);
                self.write(")");
            }
        }
        self.write(&format!(" AS {}", quote_ident(alias)));
    }

    fn from_item(&mut self, item: &FromItem) {
        match item {
            FromItem::Tables(tables) => {
                let text = tables_text(tables);
                self.write(&format!("{} AS {}", text, quote_ident(DEFAULT_SOURCE)));
            }
            FromItem::Source { name, alias } => {
                self.write(&quote_ident(name));
                if let Some(alias) = alias {
                    self.write(&format!(" AS {}", quote_ident(alias)));
                }
            }
            FromItem::ListAlias { alias, path } => {
                let path: Vec<String> = path.iter().map(|p| quote_ident(p)).collect();
                self.write(&format!("{} AS {}", path.join("."), quote_ident(alias)));
            }
            FromItem::SubSelect { select, alias } => {
                self.push_str("(");
                self.select(select);
                self.pop();
                self.newline();
                let alias = if alias.is_empty() { NESTED_ALIAS } else { alias };
                self.write(&format!(") AS {}", quote_ident(alias)));
            }
        }
    }

    fn order_by(&mut self, order: &OrderBy) {
        self.expr(&order.expr);
        if let Some(o) = order.order {
            self.write(&format!(" {}", o.as_str()));
        }
    }

    pub fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal(lit) => self.write(&lit.to_string()),
            Expr::LiteralList(values) => {
                let items: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                self.write(&format!("({})", items.join(",")));
            }
            Expr::Field(field) => {
                if field.fields.is_empty() {
                    self.write("*");
                    return;
                }
                let mut text = quote_ident(field.source_name());
                for part in &field.fields {
                    text.push('.');
                    text.push_str(&quote_ident(part));
                }
                self.write(&text);
            }
            Expr::Ident(name) => self.write(&quote_ident(name)),
            Expr::Text(text) => self.write(text),
            Expr::Unary(op, inner) => match op {
                UnaryOp::Distinct => {
                    self.write("DISTINCT ");
                    self.expr(inner);
                }
                UnaryOp::Not => {
                    self.write("(NOT ");
                    self.expr(inner);
                    self.write(")");
                }
                UnaryOp::IsMissing | UnaryOp::IsNotMissing => {
                    self.write("(");
                    self.expr(inner);
                    self.write(if *op == UnaryOp::IsMissing {
                        " IS MISSING)"
                    } else {
                        " IS NOT MISSING)"
                    });
                }
            },
            Expr::Binary(op, left, right) => {
                self.write("(");
                self.expr(left);
                self.write(&format!(" {} ", op.as_str()));
                if let Expr::Select(sub) = right.as_ref() {
                    self.write("(");
                    self.select(sub);
                    self.write(")");
                } else {
                    self.expr(right);
                }
                self.write(")");
            }
            Expr::Function { name, args, filter } => {
                self.write(name);
                self.write("(");
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        self.write(",");
                    }
                    self.expr(arg);
                }
                self.write(")");
                if let Some(filter) = filter {
                    self.write(" FILTER (WHERE ");
                    self.expr(filter);
                    self.write(")");
                }
            }
            Expr::Over {
                function,
                partition_by,
                order_by,
            } => {
                self.expr(function);
                self.write(" OVER (");
                if !partition_by.is_empty() {
                    self.write("PARTITION BY ");
                    for (i, p) in partition_by.iter().enumerate() {
                        if i > 0 {
                            self.write(", ");
                        }
                        self.expr(p);
                    }
                }
                if !order_by.is_empty() {
                    if !partition_by.is_empty() {
                        self.write(" ");
                    }
                    self.write("ORDER BY ");
                    for (i, o) in order_by.iter().enumerate() {
                        if i > 0 {
                            self.write(", ");
                        }
                        self.order_by(o);
                    }
                }
                self.write(")");
            }
            Expr::Object(fields) => {
                self.write("{");
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        self.write(",");
                    }
                    self.write(&format!("'{}':", name.replace('\'', "''")));
                    self.expr(value);
                }
                self.write("}");
            }
            Expr::Select(sub) => {
                if sub.is_single_row() {
                    self.write("[");
                    self.select(sub);
                    self.write("]");
                } else {
                    self.write("(");
                    self.select(sub);
                    self.write(")");
                }
            }
        }
    }
}

fn tables_text(tables: &[TableSource]) -> String {
    let names: Vec<String> = tables
        .iter()
        .map(|t| match &t.database {
            Some(db) => format!("{}.{}", quote_ident(db), quote_ident(&t.table)),
            None => quote_ident(&t.table),
        })
        .collect();
    match names.len() {
        1 => names[0].clone(),
        _ => format!("({})", names.join(" ++ ")),
    }
}

/// Render an expression on a single line
pub fn print_expr(expr: &Expr) -> String {
    let mut printer = Printer::new(false);
    printer.expr(expr);
    printer.finish()
}

pub fn print_select(select: &Select, pretty: bool) -> String {
    let mut printer = Printer::new(pretty);
    printer.select(select);
    printer.finish()
}
