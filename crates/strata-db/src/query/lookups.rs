//! Lookups and Q objects for building filter predicates.
//!
//! A filter keyword such as `album__name__icontains` names a field path and,
//! optionally, a lookup operator as its last `__` segment. [`Q::kw`] splits
//! the keyword; validation against the model happens when the queryset is
//! compiled, so an unknown field or operator surfaces as
//! [`StrataError::FieldLookup`](strata_core::StrataError::FieldLookup) before
//! any SQL is issued.
//!
//! ```
//! use strata_db::query::lookups::{and_, not_, or_, Lookup, Q};
//!
//! let q = Q::kw("album__name__icontains", "surf");
//! assert!(matches!(&q, Q::Compare { path, lookup: Lookup::IContains, .. } if path == "album__name"));
//!
//! // Equality is the default lookup.
//! let q = Q::kw("title", "Kokomo");
//! assert!(matches!(&q, Q::Compare { lookup: Lookup::Exact, .. }));
//!
//! let either = or_([Q::kw("title", "Kokomo"), Q::kw("title", "Wipeout")]);
//! let neither = not_(either.clone());
//! let both = and_([either, Q::kw("position__gt", 2)]);
//! assert!(matches!(neither, Q::Not(_)));
//! assert!(matches!(both, Q::And(ref v) if v.len() == 2));
//! ```

use std::ops;

use crate::value::Value;

/// A comparison operator applied to one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Exact,
    IExact,
    Contains,
    IContains,
    /// Membership in a [`Value::List`].
    In,
    Gt,
    Gte,
    Lt,
    Lte,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    /// Takes a [`Value::Bool`].
    IsNull,
}

impl Lookup {
    const ALL: [Self; 14] = [
        Self::Exact,
        Self::IExact,
        Self::Contains,
        Self::IContains,
        Self::In,
        Self::Gt,
        Self::Gte,
        Self::Lt,
        Self::Lte,
        Self::StartsWith,
        Self::IStartsWith,
        Self::EndsWith,
        Self::IEndsWith,
        Self::IsNull,
    ];

    /// Parses the keyword suffix form (`icontains`, `gte`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.name() == name)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::IExact => "iexact",
            Self::Contains => "contains",
            Self::IContains => "icontains",
            Self::In => "in",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::StartsWith => "startswith",
            Self::IStartsWith => "istartswith",
            Self::EndsWith => "endswith",
            Self::IEndsWith => "iendswith",
            Self::IsNull => "isnull",
        }
    }
}

/// A boolean predicate tree over model fields.
///
/// `path` is a `__`-separated field path relative to the queried model; it
/// may cross relations (`team__org__ident`) and may use `pk` for the primary
/// key.
#[derive(Debug, Clone, PartialEq)]
pub enum Q {
    Compare {
        path: String,
        lookup: Lookup,
        value: Value,
    },
    /// All children hold. An empty `And` is always true.
    And(Vec<Q>),
    /// Any child holds. An empty `Or` is always false.
    Or(Vec<Q>),
    Not(Box<Q>),
}

impl Q {
    /// Builds a comparison from a filter keyword.
    ///
    /// The last `__` segment is taken as the lookup when it names one;
    /// otherwise the whole keyword is the field path and the lookup is
    /// [`Lookup::Exact`].
    pub fn kw(key: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        if let Some((path, suffix)) = key.rsplit_once("__") {
            if let Some(lookup) = Lookup::from_name(suffix) {
                return Self::compare(path, lookup, value);
            }
        }
        Self::compare(key, Lookup::Exact, value)
    }

    pub fn compare(path: impl Into<String>, lookup: Lookup, value: impl Into<Value>) -> Self {
        Self::Compare {
            path: path.into(),
            lookup,
            value: value.into(),
        }
    }

    /// An implicit AND of keyword comparisons.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        Self::And(
            pairs
                .into_iter()
                .map(|(k, v)| Self::kw(k.as_ref(), v))
                .collect(),
        )
    }

    /// `true` for an empty conjunction, which filters nothing.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::And(children) if children.iter().all(Self::is_empty))
    }
}

impl<K: AsRef<str>, V: Into<Value>> From<(K, V)> for Q {
    fn from((key, value): (K, V)) -> Self {
        Self::kw(key.as_ref(), value)
    }
}

/// Conjunction of the given predicates.
pub fn and_(items: impl IntoIterator<Item = Q>) -> Q {
    items.into_iter().fold(Q::And(Vec::new()), ops::BitAnd::bitand)
}

/// Disjunction of the given predicates.
pub fn or_(items: impl IntoIterator<Item = Q>) -> Q {
    items.into_iter().fold(Q::Or(Vec::new()), ops::BitOr::bitor)
}

/// Negation of a predicate.
pub fn not_(q: Q) -> Q {
    !q
}

impl ops::BitAnd for Q {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), other) => {
                left.push(other);
                Self::And(left)
            }
            (other, Self::And(mut right)) => {
                right.insert(0, other);
                Self::And(right)
            }
            (left, right) => Self::And(vec![left, right]),
        }
    }
}

impl ops::BitOr for Q {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (Self::Or(mut left), Self::Or(right)) => {
                left.extend(right);
                Self::Or(left)
            }
            (Self::Or(mut left), other) => {
                left.push(other);
                Self::Or(left)
            }
            (other, Self::Or(mut right)) => {
                right.insert(0, other);
                Self::Or(right)
            }
            (left, right) => Self::Or(vec![left, right]),
        }
    }
}

impl ops::Not for Q {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            Self::Not(inner) => *inner,
            other => Self::Not(Box::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kw_splits_lookup_suffix() {
        assert_eq!(
            Q::kw("name__icontains", "bird"),
            Q::compare("name", Lookup::IContains, "bird")
        );
        assert_eq!(
            Q::kw("team__org__ident", "acme"),
            Q::compare("team__org__ident", Lookup::Exact, "acme")
        );
        assert_eq!(
            Q::kw("team__isnull", true),
            Q::compare("team", Lookup::IsNull, true)
        );
    }

    #[test]
    fn test_kw_unknown_suffix_stays_in_path() {
        // Rejected later, when the path is resolved against the model.
        assert_eq!(
            Q::kw("name__bogus", 1),
            Q::compare("name__bogus", Lookup::Exact, 1)
        );
    }

    #[test]
    fn test_lookup_names_roundtrip() {
        for lookup in Lookup::ALL {
            assert_eq!(Lookup::from_name(lookup.name()), Some(lookup));
        }
        assert_eq!(Lookup::from_name("regex"), None);
    }

    #[test]
    fn test_from_pairs_is_implicit_and() {
        let q = Q::from_pairs([("name", "Test"), ("language", "English")]);
        assert_eq!(
            q,
            Q::And(vec![Q::kw("name", "Test"), Q::kw("language", "English")])
        );
    }

    #[test]
    fn test_and_flattens() {
        let q = Q::kw("a", 1) & Q::kw("b", 2) & Q::kw("c", 3);
        assert!(matches!(q, Q::And(ref v) if v.len() == 3));
        let q = and_([Q::kw("a", 1) & Q::kw("b", 2), Q::kw("c", 3)]);
        assert!(matches!(q, Q::And(ref v) if v.len() == 3));
    }

    #[test]
    fn test_or_flattens() {
        let q = or_([Q::kw("a", 1), Q::kw("b", 2) | Q::kw("c", 3)]);
        assert!(matches!(q, Q::Or(ref v) if v.len() == 3));
    }

    #[test]
    fn test_double_negation_cancels() {
        let q = Q::kw("a", 1);
        assert_eq!(not_(not_(q.clone())), q);
    }

    #[test]
    fn test_is_empty() {
        assert!(Q::And(vec![]).is_empty());
        assert!(Q::And(vec![Q::And(vec![])]).is_empty());
        assert!(!Q::Or(vec![]).is_empty());
    }

    #[test]
    fn test_from_tuple() {
        let q: Q = ("position__gte", 3).into();
        assert_eq!(q, Q::compare("position", Lookup::Gte, 3));
    }
}
