//! Filter evaluation and ordering for in-memory documents.
//!
//! Filters arrive as parsed [`Expr`] trees and are evaluated with Mongo
//! semantics: a missing field compares equal to null, an array field matches
//! when the array itself or any of its elements matches, and values of
//! different types never satisfy a range comparison.

use std::cmp::Ordering;

use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};

use docmodel_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Expr, FieldOp, QueryVisitor, Sort, SortDirection},
};

/// Comparable view of a BSON value.
///
/// All numeric types are normalized to f64.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    DateTime(DateTime),
    String(&'a str),
    ObjectId(ObjectId),
    Array(Vec<Comparable<'a>>),
    Map(Vec<(&'a str, Comparable<'a>)>),
    /// Any other value, compared by raw equality only.
    Opaque(&'a Bson),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(f64::from(*value)),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) | Bson::Symbol(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect(),
            ),
            other => Comparable::Opaque(other),
        }
    }
}

impl<'a> Comparable<'a> {
    /// Position of the value's type in the cross-type sort order.
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Number(_) => 1,
            Comparable::String(_) => 2,
            Comparable::Map(_) => 3,
            Comparable::Array(_) => 4,
            Comparable::Opaque(_) => 5,
            Comparable::ObjectId(_) => 6,
            Comparable::Bool(_) => 7,
            Comparable::DateTime(_) => 8,
        }
    }

    /// Total order used for sorting, across types.
    fn sort_cmp(&self, other: &Self) -> Ordering {
        self.partial_cmp(other)
            .unwrap_or_else(|| self.rank().cmp(&other.rank()))
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            (Comparable::Opaque(a), Comparable::Opaque(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Resolves a possibly dotted key against nested documents.
pub(crate) fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;
    for segment in segments {
        current = current.as_document()?.get(segment)?;
    }
    Some(current)
}

/// Compares two documents by a multi-key sort specification.
pub(crate) fn compare_documents(left: &Document, right: &Document, sort: &[Sort]) -> Ordering {
    static NULL: Bson = Bson::Null;

    for key in sort {
        let a = Comparable::from(lookup(left, &key.field).unwrap_or(&NULL));
        let b = Comparable::from(lookup(right, &key.field).unwrap_or(&NULL));
        let ordering = match key.direction {
            SortDirection::Asc => a.sort_cmp(&b),
            SortDirection::Desc => b.sort_cmp(&a),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> DocumentStoreResult<bool> {
        self.visit_expr(expr)
    }

    /// Whether `document` satisfies `expr`.
    pub fn matches(document: &Document, expr: &Expr) -> DocumentStoreResult<bool> {
        DocumentEvaluator::new(document).evaluate(expr)
    }

    fn equals(field_value: Option<&Bson>, value: &Bson) -> bool {
        let expected = Comparable::from(value);
        match field_value {
            None => expected == Comparable::Null,
            Some(field_value) => {
                let actual = Comparable::from(field_value);
                match &actual {
                    _ if actual == expected => true,
                    Comparable::Array(items) => items.iter().any(|item| *item == expected),
                    _ => false,
                }
            }
        }
    }

    fn compares(field_value: Option<&Bson>, op: FieldOp, value: &Bson) -> bool {
        let Some(field_value) = field_value else {
            return false;
        };
        let expected = Comparable::from(value);
        let satisfies = |actual: &Comparable<'_>| match actual.partial_cmp(&expected) {
            Some(ordering) => match op {
                FieldOp::Gt => ordering == Ordering::Greater,
                FieldOp::Gte => ordering != Ordering::Less,
                FieldOp::Lt => ordering == Ordering::Less,
                FieldOp::Lte => ordering != Ordering::Greater,
                _ => false,
            },
            None => false,
        };

        match Comparable::from(field_value) {
            Comparable::Array(items) => items.iter().any(satisfies),
            actual => satisfies(&actual),
        }
    }

    fn any_of(field_value: Option<&Bson>, values: &Bson) -> DocumentStoreResult<bool> {
        match values {
            Bson::Array(values) => Ok(values.iter().any(|value| Self::equals(field_value, value))),
            other => Err(DocumentStoreError::InvalidQuery(format!("$in expects an array, got {other}"))),
        }
    }
}

impl<'a> QueryVisitor for DocumentEvaluator<'a> {
    type Output = bool;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_expr(expr)?)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(lookup(self.document, field).is_some() == should_exist)
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let field_value = lookup(self.document, field);
        match op {
            FieldOp::Eq => Ok(Self::equals(field_value, value)),
            FieldOp::Ne => Ok(!Self::equals(field_value, value)),
            FieldOp::Gt | FieldOp::Gte | FieldOp::Lt | FieldOp::Lte => Ok(Self::compares(field_value, *op, value)),
            FieldOp::AnyOf => Self::any_of(field_value, value),
            FieldOp::NoneOf => Ok(!Self::any_of(field_value, value)?),
        }
    }
}
