//! Minimal SQL expression tree
//!
//! Expressions carry no precedence; the printer parenthesizes every operator
//! so the rendered text is unambiguous and deterministic.

mod printer;

pub use printer::{print_expr, print_select, Printer};

use crate::context::TableSource;
use crate::literal::Literal;
use crate::mapping::FieldRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    IsMissing,
    IsNotMissing,
    Distinct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Like,
    ILike,
    SimilarTo,
    Regex,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "IN",
            BinaryOp::Like => "LIKE",
            BinaryOp::ILike => "ILIKE",
            BinaryOp::SimilarTo => "SIMILAR TO",
            BinaryOp::Regex => "~",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    pub fn parse(text: &str) -> Option<Self> {
        match text.to_ascii_lowercase().as_str() {
            "asc" => Some(Order::Asc),
            "desc" => Some(Order::Desc),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    LiteralList(Vec<Literal>),
    Field(FieldRef),
    /// A quoted identifier such as a CTE or column alias
    Ident(String),
    /// Verbatim SQL text
    Text(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Function {
        name: String,
        args: Vec<Expr>,
        filter: Option<Box<Expr>>,
    },
    Over {
        function: Box<Expr>,
        partition_by: Vec<Expr>,
        order_by: Vec<OrderBy>,
    },
    Object(Vec<(String, Expr)>),
    Select(Box<Select>),
}

impl Expr {
    pub fn lit(value: impl Into<Literal>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn ident(name: &str) -> Self {
        Expr::Ident(name.to_string())
    }

    pub fn star() -> Self {
        Expr::Text("*".to_string())
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary(op, Box::new(left), Box::new(right))
    }

    pub fn unary(op: UnaryOp, expr: Expr) -> Self {
        Expr::Unary(op, Box::new(expr))
    }

    pub fn not(expr: Expr) -> Self {
        Expr::unary(UnaryOp::Not, expr)
    }

    pub fn function(name: &str, args: Vec<Expr>) -> Self {
        Expr::Function {
            name: name.to_string(),
            args,
            filter: None,
        }
    }

    pub fn count_star() -> Self {
        Expr::function("COUNT", vec![Expr::star()])
    }

    pub fn and(left: Expr, right: Expr) -> Self {
        Expr::binary(BinaryOp::And, left, right)
    }

    pub fn or(left: Expr, right: Expr) -> Self {
        Expr::binary(BinaryOp::Or, left, right)
    }

    /// Left-fold the expressions with `op`; `None` when empty
    pub fn join<I: IntoIterator<Item = Expr>>(op: BinaryOp, exprs: I) -> Option<Expr> {
        exprs
            .into_iter()
            .reduce(|acc, expr| Expr::binary(op, acc, expr))
    }

    pub fn and_all<I: IntoIterator<Item = Expr>>(exprs: I) -> Option<Expr> {
        Expr::join(BinaryOp::And, exprs)
    }

    fn visit_fields<'a>(&'a self, f: &mut dyn FnMut(&'a FieldRef)) {
        match self {
            Expr::Field(field) => f(field),
            Expr::Unary(_, e) => e.visit_fields(f),
            Expr::Binary(_, l, r) => {
                l.visit_fields(f);
                r.visit_fields(f);
            }
            Expr::Function { args, filter, .. } => {
                args.iter().for_each(|a| a.visit_fields(f));
                if let Some(filter) = filter {
                    filter.visit_fields(f);
                }
            }
            Expr::Over {
                function,
                partition_by,
                order_by,
            } => {
                function.visit_fields(f);
                partition_by.iter().for_each(|p| p.visit_fields(f));
                order_by.iter().for_each(|o| o.expr.visit_fields(f));
            }
            Expr::Object(fields) => fields.iter().for_each(|(_, e)| e.visit_fields(f)),
            // sub-selects resolve their own sources
            Expr::Select(_)
            | Expr::Literal(_)
            | Expr::LiteralList(_)
            | Expr::Ident(_)
            | Expr::Text(_) => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl Projection {
    pub fn new(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    pub fn aliased(expr: Expr, alias: impl Into<String>) -> Self {
        Self {
            expr,
            alias: Some(alias.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub expr: Expr,
    pub order: Option<Order>,
}

impl OrderBy {
    pub fn new(expr: Expr, order: Option<Order>) -> Self {
        Self { expr, order }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FromItem {
    /// The tenant tables, aliased as `$source`
    Tables(Vec<TableSource>),
    Source { name: String, alias: Option<String> },
    /// A list-typed field exposed as its own row source
    ListAlias { alias: String, path: Vec<String> },
    SubSelect { select: Box<Select>, alias: String },
}

impl FromItem {
    pub fn source(name: &str) -> Self {
        FromItem::Source {
            name: name.to_string(),
            alias: None,
        }
    }

    pub fn source_as(name: &str, alias: &str) -> Self {
        FromItem::Source {
            name: name.to_string(),
            alias: Some(alias.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Select {
    pub with: Vec<(String, Select)>,
    pub projection: Vec<Projection>,
    pub from: Vec<FromItem>,
    pub where_: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Select {
    /// `SELECT * FROM "<name>"`
    pub fn star_from(name: &str) -> Self {
        Select {
            projection: vec![Projection::new(Expr::star())],
            from: vec![FromItem::source(name)],
            ..Default::default()
        }
    }

    pub fn is_single_row(&self) -> bool {
        self.limit == Some(1)
    }

    /// Add `"$source"."<prefix>" AS "$source:<prefix>"` for every list field
    /// this select references directly.
    pub fn attach_list_aliases(&mut self) {
        let mut aliases: Vec<(String, Vec<String>)> = Vec::new();
        {
            let mut collect = |field: &FieldRef| {
                if let Some(alias) = field.list_alias() {
                    if !aliases.iter().any(|(a, _)| *a == alias.0) {
                        aliases.push(alias);
                    }
                }
            };
            for p in &self.projection {
                p.expr.visit_fields(&mut collect);
            }
            if let Some(w) = &self.where_ {
                w.visit_fields(&mut collect);
            }
            for g in &self.group_by {
                g.visit_fields(&mut collect);
            }
            if let Some(h) = &self.having {
                h.visit_fields(&mut collect);
            }
            for o in &self.order_by {
                o.expr.visit_fields(&mut collect);
            }
        }

        for (alias, path) in aliases {
            let exists = self
                .from
                .iter()
                .any(|f| matches!(f, FromItem::ListAlias { alias: a, .. } if *a == alias));
            if !exists {
                self.from.push(FromItem::ListAlias { alias, path });
            }
        }
    }
}

/// Quote an identifier with double quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
