//! Query construction and filter evaluation.
//!
//! Filters, updates and index keys travel to drivers as Mongo-style BSON
//! documents. This module provides:
//!
//! - [`Conditions`] - an ordered condition mapping with the cursor merge rule
//! - [`Query`] / [`QueryBuilder`] - a materialized find request (filter, sort, skip, limit)
//! - [`FindAndModify`] - an atomic update-or-remove request
//! - [`IndexSpec`] - an index declaration
//! - [`Expr`] and [`QueryVisitor`] - a parsed filter tree that drivers without a
//!   native query engine can evaluate
//!
//! # Example
//!
//! ```ignore
//! use docmodel::query::{Conditions, Query, Sort};
//!
//! let query = Query::builder()
//!     .filter(Conditions::new().eq("user", "Jack").gte("count", 2))
//!     .sort(Sort::parse("-count"))
//!     .limit(10)
//!     .build();
//! ```

use bson::{Bson, Document};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

impl SortDirection {
    /// The numeric form used in sort and index documents.
    pub fn as_i32(self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

/// One key of a sort specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    /// The key to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Sort { field: field.into(), direction: SortDirection::Asc }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Sort { field: field.into(), direction: SortDirection::Desc }
    }

    /// Parses `"name"` as ascending and `"-name"` as descending.
    pub fn parse(spec: &str) -> Self {
        match spec.strip_prefix('-') {
            Some(field) => Sort::desc(field),
            None => Sort::asc(spec),
        }
    }

    /// Renders a sort specification as a driver sort document.
    pub fn to_document(sorts: &[Sort]) -> Document {
        sorts
            .iter()
            .map(|sort| (sort.field.clone(), Bson::Int32(sort.direction.as_i32())))
            .collect()
    }
}

/// Field comparison operators understood in filter documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    /// Equal to (`$eq`, or a bare literal).
    Eq,
    /// Not equal to (`$ne`).
    Ne,
    /// Greater than (`$gt`).
    Gt,
    /// Greater than or equal to (`$gte`).
    Gte,
    /// Less than (`$lt`).
    Lt,
    /// Less than or equal to (`$lte`).
    Lte,
    /// Value is one of the given values (`$in`).
    AnyOf,
    /// Value is none of the given values (`$nin`).
    NoneOf,
}

impl FieldOp {
    pub fn operator(self) -> &'static str {
        match self {
            FieldOp::Eq => "$eq",
            FieldOp::Ne => "$ne",
            FieldOp::Gt => "$gt",
            FieldOp::Gte => "$gte",
            FieldOp::Lt => "$lt",
            FieldOp::Lte => "$lte",
            FieldOp::AnyOf => "$in",
            FieldOp::NoneOf => "$nin",
        }
    }

    pub fn from_operator(operator: &str) -> Option<Self> {
        Some(match operator {
            "$eq" => FieldOp::Eq,
            "$ne" => FieldOp::Ne,
            "$gt" => FieldOp::Gt,
            "$gte" => FieldOp::Gte,
            "$lt" => FieldOp::Lt,
            "$lte" => FieldOp::Lte,
            "$in" => FieldOp::AnyOf,
            "$nin" => FieldOp::NoneOf,
            _ => return None,
        })
    }
}

/// Returns true when every key of `doc` is an operator (`$`-prefixed).
///
/// Such a document is an operator sub-document (`{"$gt": 1, "$lt": 5}`) rather
/// than a literal embedded document.
pub fn is_operator_document(doc: &Document) -> bool {
    !doc.is_empty() && doc.keys().all(|key| key.starts_with('$'))
}

/// An ordered mapping from key to either a literal or an operator sub-document.
///
/// Keys may be model attribute names or raw storage keys; models translate
/// them before anything reaches a driver. Builder methods and [`merge`](Self::merge)
/// apply the same composition rule: when a key already holds an operator
/// sub-document and the new condition is also one, the two are merged
/// operator by operator (later wins); otherwise the new condition replaces
/// the old one outright.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conditions(Document);

impl Conditions {
    pub fn new() -> Self {
        Conditions(Document::new())
    }

    /// Matches documents whose `key` equals `value`.
    pub fn eq(self, key: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.with(key, value.into())
    }

    pub fn ne(self, key: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.op(key, FieldOp::Ne, value)
    }

    pub fn gt(self, key: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.op(key, FieldOp::Gt, value)
    }

    pub fn gte(self, key: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.op(key, FieldOp::Gte, value)
    }

    pub fn lt(self, key: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.op(key, FieldOp::Lt, value)
    }

    pub fn lte(self, key: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.op(key, FieldOp::Lte, value)
    }

    /// Matches documents whose `key` is one of `values`.
    pub fn any_of<V: Into<Bson>>(self, key: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        let values = values.into_iter().map(Into::into).collect::<Vec<Bson>>();
        self.op(key, FieldOp::AnyOf, values)
    }

    /// Matches documents whose `key` is none of `values`.
    pub fn none_of<V: Into<Bson>>(self, key: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        let values = values.into_iter().map(Into::into).collect::<Vec<Bson>>();
        self.op(key, FieldOp::NoneOf, values)
    }

    /// Matches documents where `key` is present (or absent).
    pub fn exists(self, key: impl Into<String>, should_exist: bool) -> Self {
        let mut operators = Document::new();
        operators.insert("$exists", should_exist);
        self.with(key, Bson::Document(operators))
    }

    /// Adds an arbitrary operator condition.
    pub fn op(self, key: impl Into<String>, op: FieldOp, value: impl Into<Bson>) -> Self {
        let mut operators = Document::new();
        operators.insert(op.operator(), value.into());
        self.with(key, Bson::Document(operators))
    }

    fn with(mut self, key: impl Into<String>, value: Bson) -> Self {
        merge_condition(&mut self.0, key.into(), value);
        self
    }

    /// Layers `other` on top of these conditions.
    pub fn merge(mut self, other: impl Into<Conditions>) -> Self {
        for (key, value) in other.into().0 {
            merge_condition(&mut self.0, key, value);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_document(&self) -> &Document {
        &self.0
    }

    pub fn into_document(self) -> Document {
        self.0
    }
}

fn merge_condition(target: &mut Document, key: String, value: Bson) {
    if let (Some(Bson::Document(current)), Bson::Document(incoming)) = (target.get_mut(&key), &value) {
        if is_operator_document(current) && is_operator_document(incoming) {
            for (operator, operand) in incoming {
                current.insert(operator.clone(), operand.clone());
            }
            return;
        }
    }
    target.insert(key, value);
}

impl From<Document> for Conditions {
    fn from(doc: Document) -> Self {
        Conditions::new().merge_document(doc)
    }
}

impl From<()> for Conditions {
    fn from(_: ()) -> Self {
        Conditions::new()
    }
}

impl Conditions {
    fn merge_document(mut self, doc: Document) -> Self {
        for (key, value) in doc {
            merge_condition(&mut self.0, key, value);
        }
        self
    }
}

impl From<Conditions> for Document {
    fn from(conditions: Conditions) -> Self {
        conditions.0
    }
}

/// A parsed filter expression.
///
/// Drivers with a native query language pass filter documents through as is;
/// drivers without one parse them with [`Expr::from_filter`] and evaluate the
/// tree with a [`QueryVisitor`].
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Logical AND of multiple expressions (all must match).
    And(Vec<Expr>),
    /// Logical OR of multiple expressions (any must match).
    Or(Vec<Expr>),
    /// Logical NOT of an expression (inverts the result).
    Not(Box<Expr>),
    /// Checks if a field exists or doesn't exist.
    Exists(String, bool),
    /// Field comparison expression.
    Field {
        /// The field key to compare.
        field: String,
        /// The comparison operator.
        op: FieldOp,
        /// The value to compare against.
        value: Bson,
    },
}

impl Expr {
    /// Creates a field comparison expression.
    pub fn field(field: String, op: FieldOp, value: Bson) -> Self {
        Expr::Field { field, op, value }
    }

    /// Combines this expression with another using logical AND.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// Combines this expression with another using logical OR.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }

    /// Negates this expression (logical NOT).
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// Parses a Mongo-style filter document.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidQuery`] for unknown operators or
    /// malformed operands.
    pub fn from_filter(filter: &Document) -> DocumentStoreResult<Expr> {
        let mut exprs = Vec::with_capacity(filter.len());

        for (key, value) in filter {
            match key.as_str() {
                "$and" => exprs.push(Expr::And(Self::from_clauses(key, value)?)),
                "$or" => exprs.push(Expr::Or(Self::from_clauses(key, value)?)),
                "$nor" => exprs.push(Expr::Or(Self::from_clauses(key, value)?).not()),
                operator if operator.starts_with('$') => {
                    return Err(DocumentStoreError::InvalidQuery(format!(
                        "unsupported top-level operator {operator}"
                    )));
                }
                field => exprs.push(Self::from_condition(field, value)?),
            }
        }

        Ok(Expr::And(exprs))
    }

    fn from_clauses(operator: &str, value: &Bson) -> DocumentStoreResult<Vec<Expr>> {
        let Bson::Array(clauses) = value else {
            return Err(DocumentStoreError::InvalidQuery(format!("{operator} expects an array")));
        };

        clauses
            .iter()
            .map(|clause| match clause {
                Bson::Document(doc) => Self::from_filter(doc),
                _ => Err(DocumentStoreError::InvalidQuery(format!(
                    "{operator} expects an array of documents"
                ))),
            })
            .collect()
    }

    fn from_condition(field: &str, value: &Bson) -> DocumentStoreResult<Expr> {
        let operators = match value {
            Bson::Document(doc) if is_operator_document(doc) => doc,
            literal => return Ok(Expr::field(field.to_string(), FieldOp::Eq, literal.clone())),
        };

        let mut exprs = Vec::with_capacity(operators.len());

        for (operator, operand) in operators {
            let expr = match operator.as_str() {
                "$exists" => Expr::Exists(field.to_string(), truthy(operand)),
                "$not" => Self::from_condition(field, operand)?.not(),
                other => match FieldOp::from_operator(other) {
                    Some(op @ (FieldOp::AnyOf | FieldOp::NoneOf)) if !matches!(operand, Bson::Array(_)) => {
                        return Err(DocumentStoreError::InvalidQuery(format!(
                            "{} expects an array for field {field}",
                            op.operator()
                        )));
                    }
                    Some(op) => Expr::field(field.to_string(), op, operand.clone()),
                    None => {
                        return Err(DocumentStoreError::InvalidQuery(format!(
                            "unsupported operator {other} for field {field}"
                        )));
                    }
                },
            };
            exprs.push(expr);
        }

        Ok(if exprs.len() == 1 { exprs.remove(0) } else { Expr::And(exprs) })
    }
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(flag) => *flag,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(n) => *n != 0.0,
        Bson::Null => false,
        _ => true,
    }
}

/// A structured find request.
///
/// Materialized from a cursor only when the store is actually touched:
/// filter first, then sort, then skip/limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Filter document keyed by storage keys.
    pub filter: Document,
    /// Sort keys, most significant first.
    pub sort: Vec<Sort>,
    /// Number of documents to skip.
    pub skip: Option<u64>,
    /// Maximum number of documents to return.
    pub limit: Option<u64>,
}

impl Query {
    /// Creates a new empty query matching every document.
    pub fn new() -> Self {
        Query::default()
    }

    /// Creates a new query builder for fluent construction.
    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    /// Creates a new query builder.
    pub fn new() -> Self {
        QueryBuilder { query: Query::default() }
    }

    /// Sets the filter document for this query.
    pub fn filter(mut self, filter: impl Into<Conditions>) -> Self {
        self.query.filter = filter.into().into_document();
        self
    }

    /// Appends a sort key.
    pub fn sort(mut self, sort: Sort) -> Self {
        self.query.sort.push(sort);
        self
    }

    /// Sets the number of documents to skip.
    pub fn skip(mut self, skip: u64) -> Self {
        self.query.skip = Some(skip);
        self
    }

    /// Sets the maximum number of documents to return.
    pub fn limit(mut self, limit: u64) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Builds and returns the final query.
    pub fn build(self) -> Query {
        self.query
    }
}

/// An atomic find-and-modify request.
///
/// Exactly one document (the first by `sort`) matching `query` is either
/// updated with `update` or removed. With `upsert`, a missing document is
/// created from the equality terms of `query` plus `update`. `new` selects
/// whether the post-update or pre-update document is returned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindAndModify {
    pub query: Document,
    pub update: Option<Document>,
    pub sort: Vec<Sort>,
    pub upsert: bool,
    pub new: bool,
    pub remove: bool,
}

impl FindAndModify {
    /// Updates the first document matching `query`.
    pub fn updating(query: impl Into<Conditions>, update: Document) -> Self {
        FindAndModify {
            query: query.into().into_document(),
            update: Some(update),
            ..FindAndModify::default()
        }
    }

    /// Removes the first document matching `query`, returning it.
    pub fn removing(query: impl Into<Conditions>) -> Self {
        FindAndModify {
            query: query.into().into_document(),
            remove: true,
            ..FindAndModify::default()
        }
    }

    pub fn sort_by(mut self, sort: Sort) -> Self {
        self.sort.push(sort);
        self
    }

    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }

    /// Return the document as it is after the modification.
    pub fn return_new(mut self, new: bool) -> Self {
        self.new = new;
        self
    }
}

/// An index declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    /// Index keys, most significant first.
    pub keys: Vec<Sort>,
    pub unique: bool,
    pub sparse: bool,
    pub name: Option<String>,
}

impl IndexSpec {
    pub fn new(keys: impl IntoIterator<Item = Sort>) -> Self {
        IndexSpec {
            keys: keys.into_iter().collect(),
            unique: false,
            sparse: false,
            name: None,
        }
    }

    /// Single-key ascending index; `"-key"` makes it descending.
    pub fn on(key: &str) -> Self {
        IndexSpec::new([Sort::parse(key)])
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn sparse(mut self, sparse: bool) -> Self {
        self.sparse = sparse;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

pub trait QueryVisitor {
    type Output;
    type Error: Into<DocumentStoreError>;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error>;
    fn visit_exists(
        &mut self,
        field: &str,
        should_exist: bool,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_field(
        &mut self,
        field: &str,
        op: &FieldOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Not(expr) => self.visit_not(expr),
            Expr::Exists(field, should_exist) => self.visit_exists(field, *should_exist),
            Expr::Field { field, op, value } => self.visit_field(field, op, value),
        }
    }
}
