use std::{fmt, sync::Arc};

use smol_str::SmolStr;

/// A literal value known at compile time.
///
/// `Tuple` only appears after constant folding; `Missing` marks an omitted
/// slice bound.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(SmolStr),
    Tuple(Arc<[Constant]>),
    Missing,
}

impl Constant {
    pub fn str(s: impl Into<SmolStr>) -> Self {
        Constant::Str(s.into())
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Constant::None | Constant::Missing => false,
            Constant::Bool(b) => *b,
            Constant::Int(i) => *i != 0,
            Constant::Float(f) => *f != 0.0,
            Constant::Str(s) => !s.is_empty(),
            Constant::Tuple(items) => !items.is_empty(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Constant::None => "NoneType",
            Constant::Bool(_) => "bool",
            Constant::Int(_) => "int",
            Constant::Float(_) => "float",
            Constant::Str(_) => "str",
            Constant::Tuple(_) => "tuple",
            Constant::Missing => "missing",
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::None => write!(f, "None"),
            Constant::Bool(true) => write!(f, "True"),
            Constant::Bool(false) => write!(f, "False"),
            Constant::Int(i) => write!(f, "{i}"),
            Constant::Float(v) if v.fract() == 0.0 && v.is_finite() => write!(f, "{v:.1}"),
            Constant::Float(v) => write!(f, "{v}"),
            Constant::Str(s) => write!(f, "'{s}'"),
            Constant::Tuple(items) if items.len() == 1 => write!(f, "({},)", items[0]),
            Constant::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            Constant::Missing => write!(f, "<missing>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::none(Constant::None, "None")]
    #[case::float(Constant::Float(2.0), "2.0")]
    #[case::str(Constant::str("a"), "'a'")]
    #[case::singleton(Constant::Tuple(Arc::from(vec![Constant::Int(1)])), "(1,)")]
    #[case::pair(Constant::Tuple(Arc::from(vec![Constant::Int(1), Constant::Bool(true)])), "(1, True)")]
    fn test_display(#[case] constant: Constant, #[case] expected: &str) {
        assert_eq!(constant.to_string(), expected);
    }

    #[rstest]
    #[case(Constant::Int(0), false)]
    #[case(Constant::str(""), false)]
    #[case(Constant::Float(0.5), true)]
    #[case(Constant::Tuple(Arc::from(Vec::<Constant>::new())), false)]
    fn test_is_truthy(#[case] constant: Constant, #[case] expected: bool) {
        assert_eq!(constant.is_truthy(), expected);
    }
}
