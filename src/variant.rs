//! The typed value container used across the public API, and its bridge to
//! RDF terms. A value is either a single scalar or a homogeneous list of
//! scalars; a one-element list compares equal to the bare scalar.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use oxigraph::model::vocab::xsd;
use oxigraph::model::{Literal, NamedNode, Term};
use url::Url;

use crate::errors::{Error, Result};

/// A single typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Int(i32),
    UInt(u32),
    Long(i64),
    ULong(u64),
    Bool(bool),
    Double(f64),
    String(String),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(DateTime<Utc>),
    Url(Url),
    Resource(NamedNode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Int,
    UInt,
    Long,
    ULong,
    Bool,
    Double,
    String,
    Date,
    Time,
    DateTime,
    Url,
    Resource,
}

impl Scalar {
    pub fn kind(&self) -> ScalarKind {
        match self {
            Scalar::Int(_) => ScalarKind::Int,
            Scalar::UInt(_) => ScalarKind::UInt,
            Scalar::Long(_) => ScalarKind::Long,
            Scalar::ULong(_) => ScalarKind::ULong,
            Scalar::Bool(_) => ScalarKind::Bool,
            Scalar::Double(_) => ScalarKind::Double,
            Scalar::String(_) => ScalarKind::String,
            Scalar::Date(_) => ScalarKind::Date,
            Scalar::Time(_) => ScalarKind::Time,
            Scalar::DateTime(_) => ScalarKind::DateTime,
            Scalar::Url(_) => ScalarKind::Url,
            Scalar::Resource(_) => ScalarKind::Resource,
        }
    }

    /// Renders the scalar as a plain string. Never fails; resource
    /// references render as their URI.
    pub fn value_string(&self) -> String {
        match self {
            Scalar::Int(v) => v.to_string(),
            Scalar::UInt(v) => v.to_string(),
            Scalar::Long(v) => v.to_string(),
            Scalar::ULong(v) => v.to_string(),
            Scalar::Bool(v) => v.to_string(),
            Scalar::Double(v) => v.to_string(),
            Scalar::String(v) => v.clone(),
            Scalar::Date(v) => v.to_string(),
            Scalar::Time(v) => v.to_string(),
            Scalar::DateTime(v) => v.to_rfc3339(),
            Scalar::Url(v) => v.to_string(),
            Scalar::Resource(v) => v.as_str().to_string(),
        }
    }

    /// Converts to an RDF term without schema knowledge: literal with
    /// datatype for value scalars, a resource node for URLs and references.
    pub fn to_term(&self) -> Term {
        match self {
            Scalar::Int(v) => Literal::new_typed_literal(v.to_string(), xsd::INT).into(),
            Scalar::UInt(v) => Literal::new_typed_literal(v.to_string(), xsd::UNSIGNED_INT).into(),
            Scalar::Long(v) => Literal::new_typed_literal(v.to_string(), xsd::LONG).into(),
            Scalar::ULong(v) => {
                Literal::new_typed_literal(v.to_string(), xsd::UNSIGNED_LONG).into()
            }
            Scalar::Bool(v) => Literal::new_typed_literal(v.to_string(), xsd::BOOLEAN).into(),
            Scalar::Double(v) => Literal::new_typed_literal(v.to_string(), xsd::DOUBLE).into(),
            Scalar::String(v) => Literal::new_simple_literal(v).into(),
            Scalar::Date(v) => Literal::new_typed_literal(v.to_string(), xsd::DATE).into(),
            Scalar::Time(v) => Literal::new_typed_literal(v.to_string(), xsd::TIME).into(),
            Scalar::DateTime(v) => {
                Literal::new_typed_literal(v.to_rfc3339(), xsd::DATE_TIME).into()
            }
            // a parsed Url is guaranteed to be an absolute IRI
            Scalar::Url(v) => NamedNode::new_unchecked(v.as_str()).into(),
            Scalar::Resource(v) => v.clone().into(),
        }
    }

    /// Converts an RDF term back to a scalar. Literals map to their native
    /// scalar; resource nodes map to a URL-typed scalar so that round-trips
    /// through the canonical URL stay lossless.
    pub fn from_term(term: &Term) -> Result<Scalar> {
        match term {
            Term::NamedNode(n) => {
                let url = Url::parse(n.as_str())
                    .map_err(|e| Error::invalid(format!("{}: {e}", n.as_str())))?;
                Ok(Scalar::Url(url))
            }
            Term::Literal(lit) => Scalar::from_literal(lit),
            Term::BlankNode(b) => Err(Error::invalid(format!(
                "cannot convert blank node {b} to a value"
            ))),
        }
    }

    pub fn from_literal(lit: &Literal) -> Result<Scalar> {
        let value = lit.value();
        let dt = lit.datatype();
        let bad = || Error::invalid(format!("malformed {} literal: {value}", dt.as_str()));
        if dt == xsd::INT {
            Ok(Scalar::Int(value.parse().map_err(|_| bad())?))
        } else if dt == xsd::UNSIGNED_INT {
            Ok(Scalar::UInt(value.parse().map_err(|_| bad())?))
        } else if dt == xsd::LONG || dt == xsd::INTEGER {
            Ok(Scalar::Long(value.parse().map_err(|_| bad())?))
        } else if dt == xsd::UNSIGNED_LONG {
            Ok(Scalar::ULong(value.parse().map_err(|_| bad())?))
        } else if dt == xsd::BOOLEAN {
            Ok(Scalar::Bool(value.parse().map_err(|_| bad())?))
        } else if dt == xsd::DOUBLE || dt == xsd::FLOAT || dt == xsd::DECIMAL {
            Ok(Scalar::Double(value.parse().map_err(|_| bad())?))
        } else if dt == xsd::DATE_TIME {
            let parsed = DateTime::parse_from_rfc3339(value).map_err(|_| bad())?;
            Ok(Scalar::DateTime(parsed.with_timezone(&Utc)))
        } else if dt == xsd::DATE {
            Ok(Scalar::Date(value.parse().map_err(|_| bad())?))
        } else if dt == xsd::TIME {
            Ok(Scalar::Time(value.parse().map_err(|_| bad())?))
        } else if dt == xsd::ANY_URI {
            Ok(Scalar::Url(Url::parse(value).map_err(|_| bad())?))
        } else {
            // unknown datatypes and plain strings keep their lexical form
            Ok(Scalar::String(value.to_string()))
        }
    }
}

/// A value crossing the API: a single scalar or a homogeneous list. The
/// element kind is carried explicitly so empty lists stay typed.
#[derive(Debug, Clone)]
pub enum Variant {
    Scalar(Scalar),
    List(ScalarKind, Vec<Scalar>),
}

impl Variant {
    /// Builds a list variant, verifying homogeneity.
    pub fn list(kind: ScalarKind, elements: Vec<Scalar>) -> Result<Variant> {
        if let Some(off) = elements.iter().find(|e| e.kind() != kind) {
            return Err(Error::invalid(format!(
                "list of {kind:?} contains a {:?} element",
                off.kind()
            )));
        }
        Ok(Variant::List(kind, elements))
    }

    pub fn kind(&self) -> ScalarKind {
        match self {
            Variant::Scalar(s) => s.kind(),
            Variant::List(k, _) => *k,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Variant::List(..))
    }

    pub fn as_slice(&self) -> &[Scalar] {
        match self {
            Variant::Scalar(s) => std::slice::from_ref(s),
            Variant::List(_, v) => v.as_slice(),
        }
    }

    /// Never fails; list variants join their elements with ",".
    pub fn to_string_lossy(&self) -> String {
        self.as_slice()
            .iter()
            .map(Scalar::value_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Converts a single-valued variant to an RDF term. List variants are an
    /// error; callers iterate `as_slice` instead.
    pub fn to_term(&self) -> Result<Term> {
        match self {
            Variant::Scalar(s) => Ok(s.to_term()),
            Variant::List(..) => Err(Error::invalid(
                "list variants have no single node representation",
            )),
        }
    }
}

impl PartialEq for Variant {
    /// Two variants are equal iff their element kind matches and their
    /// element sequences compare equal; a one-element list equals the scalar.
    fn eq(&self, other: &Self) -> bool {
        self.kind() == other.kind() && self.as_slice() == other.as_slice()
    }
}

impl From<Scalar> for Variant {
    fn from(s: Scalar) -> Variant {
        Variant::Scalar(s)
    }
}

macro_rules! variant_from {
    ($ty:ty, $tag:ident) => {
        impl From<$ty> for Scalar {
            fn from(v: $ty) -> Scalar {
                Scalar::$tag(v)
            }
        }
        impl From<$ty> for Variant {
            fn from(v: $ty) -> Variant {
                Variant::Scalar(Scalar::$tag(v))
            }
        }
    };
}

variant_from!(i32, Int);
variant_from!(u32, UInt);
variant_from!(i64, Long);
variant_from!(u64, ULong);
variant_from!(bool, Bool);
variant_from!(f64, Double);
variant_from!(String, String);
variant_from!(Url, Url);
variant_from!(NamedNode, Resource);

impl From<&str> for Scalar {
    fn from(v: &str) -> Scalar {
        Scalar::String(v.to_string())
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Variant {
        Variant::Scalar(Scalar::String(v.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_element_list_equals_scalar() {
        let a = Variant::from(42i32);
        let b = Variant::list(ScalarKind::Int, vec![Scalar::Int(42)]).unwrap();
        assert_eq!(a, b);
        let c = Variant::list(ScalarKind::Int, vec![Scalar::Int(42), Scalar::Int(7)]).unwrap();
        assert_ne!(a, c);
        // kind mismatch is never equal, even for equal renderings
        let d = Variant::from("42");
        assert_ne!(a, d);
    }

    #[test]
    fn heterogeneous_list_is_rejected() {
        let res = Variant::list(ScalarKind::Int, vec![Scalar::Int(1), Scalar::Bool(true)]);
        assert!(res.is_err());
    }

    #[test]
    fn to_string_joins_lists() {
        let v = Variant::list(
            ScalarKind::String,
            vec![Scalar::from("a"), Scalar::from("b")],
        )
        .unwrap();
        assert_eq!(v.to_string_lossy(), "a,b");
    }

    #[test]
    fn literal_round_trip() {
        let cases = vec![
            Scalar::Int(-3),
            Scalar::UInt(3),
            Scalar::Long(1 << 40),
            Scalar::Bool(true),
            Scalar::Double(2.5),
            Scalar::String("hello".into()),
        ];
        for s in cases {
            let term = s.to_term();
            let back = Scalar::from_term(&term).unwrap();
            assert_eq!(s, back);
        }
    }

    #[test]
    fn resource_node_becomes_url() {
        let term: Term = NamedNode::new("http://example.org/a").unwrap().into();
        let back = Scalar::from_term(&term).unwrap();
        assert_eq!(back.kind(), ScalarKind::Url);
        assert_eq!(back.value_string(), "http://example.org/a");
    }

    #[test]
    fn list_variant_has_no_single_node() {
        let v = Variant::list(ScalarKind::Int, vec![Scalar::Int(1)]).unwrap();
        assert!(v.to_term().is_err());
    }
}
